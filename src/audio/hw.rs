//! The audio device: global routing state, the stream lists and the
//! parameter surface.
//!
//! Locking: the device lock ([`DeviceShared::lock`]) is always taken before
//! an input stream's lock, and that before an output stream's lock. Flags
//! that the write path checks without the device lock are mirrored in
//! atomics on [`DeviceShared`].

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::HalSettings;
use super::card::CardDescriptor;
use super::device::{AudioDevice, AudioMode, AudioSource, DeviceSet, TtyMode};
use super::effects::EchoReference;
use super::error::{HalError, HalResult};
use super::format::{DEFAULT_OUTPUT_SAMPLE_RATE, PcmFormat};
use super::params::{self, Params};
use super::pcm::AudioBackend;
use super::registry::CardRegistry;
use super::router::{self, RouteState};
use super::sco::ScoBridge;
use super::stream_in::{self, InputConfig, StreamIn};
use super::stream_out::{OutputConfig, OutputFlags, StreamOut};

/// One second of mono history at the primary rate.
const ECHO_REFERENCE_CAPACITY: usize = DEFAULT_OUTPUT_SAMPLE_RATE as usize;

/// State behind the device lock.
pub(crate) struct DeviceState {
    pub(crate) registry: CardRegistry,
    pub(crate) mode: AudioMode,
    pub(crate) tty_mode: TtyMode,
    pub(crate) out_device: DeviceSet,
    pub(crate) in_device: DeviceSet,
    pub(crate) outputs: Vec<Arc<StreamOut>>,
    pub(crate) inputs: Vec<Arc<StreamIn>>,
    pub(crate) primary: Option<Arc<StreamOut>>,
    pub(crate) active_input: Option<Arc<StreamIn>>,
    pub(crate) active_source: Option<AudioSource>,
    pub(crate) echo_reference: Option<Arc<EchoReference>>,
    pub(crate) sco: Option<ScoBridge>,
    pub(crate) sco_rate: u32,
    pub(crate) pcm_bit: PcmFormat,
    pub(crate) voice_volume: f32,
}

impl DeviceState {
    fn route_state(&self) -> RouteState {
        RouteState {
            out_device: self.out_device,
            in_device: self.in_device,
            mode: self.mode,
            tty_mode: self.tty_mode,
            source: self.active_source,
        }
    }

    /// Re-plan and apply the output stage for the current selection.
    pub(crate) fn select_output(&mut self) {
        let plan = router::plan_output(&self.route_state(), self.registry.len());
        if let Err(e) = router::apply_plan(&mut self.registry, &plan) {
            log::warn!("Output route for {} incomplete: {}", self.out_device, e);
        }
    }

    /// Re-plan and apply the capture front-end.
    pub(crate) fn select_input(&mut self) {
        let plan = router::plan_input(&self.route_state(), self.registry.len());
        if let Err(e) = router::apply_plan(&mut self.registry, &plan) {
            log::warn!("Input route for {} incomplete: {}", self.in_device, e);
        }
    }

    pub(crate) fn find_input(&self, stream: &StreamIn) -> Option<Arc<StreamIn>> {
        self.inputs
            .iter()
            .find(|s| std::ptr::eq(s.as_ref(), stream))
            .cloned()
    }

    pub(crate) fn is_active_input(&self, stream: &StreamIn) -> bool {
        self.active_input
            .as_ref()
            .is_some_and(|s| std::ptr::eq(s.as_ref(), stream))
    }

    /// Hand out the echo reference, creating it and attaching it to the
    /// primary output. Returns `None` while the primary output is in standby.
    pub(crate) fn acquire_echo_reference(&mut self) -> Option<Arc<EchoReference>> {
        if let Some(old) = self.echo_reference.clone() {
            self.release_echo_reference(&old);
        }
        let primary = self.primary.clone()?;
        if primary.is_standby() {
            log::debug!("Primary output in standby, no echo reference");
            return None;
        }
        let reference = Arc::new(EchoReference::new(ECHO_REFERENCE_CAPACITY));
        primary.attach_echo_reference(reference.clone());
        self.echo_reference = Some(reference.clone());
        Some(reference)
    }

    pub(crate) fn release_echo_reference(&mut self, reference: &Arc<EchoReference>) {
        let current = match &self.echo_reference {
            Some(r) if Arc::ptr_eq(r, reference) => r.clone(),
            _ => return,
        };
        if let Some(primary) = &self.primary {
            primary.detach_echo_reference(&current);
        }
        self.echo_reference = None;
    }
}

/// Device-wide state shared with every stream.
pub(crate) struct DeviceShared {
    state: Mutex<DeviceState>,
    pub(crate) backend: Arc<dyn AudioBackend>,
    pub(crate) settings: HalSettings,
    pub(crate) in_call: AtomicBool,
    pub(crate) passthrough: AtomicBool,
    pub(crate) mic_mute: AtomicBool,
    pub(crate) sco_rx_running: Arc<AtomicBool>,
    pub(crate) sco_tx_running: Arc<AtomicBool>,
}

impl DeviceShared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ======================== AudioHw ========================

/// An opened audio HAL instance.
pub struct AudioHw {
    shared: Arc<DeviceShared>,
}

impl AudioHw {
    /// Resolve `descriptors` against the cards `backend` exposes and bring
    /// the device up in NORMAL mode on the speaker and built-in mic.
    pub fn open(
        backend: Arc<dyn AudioBackend>,
        descriptors: Vec<CardDescriptor>,
        settings: HalSettings,
    ) -> HalResult<Self> {
        let mut registry = CardRegistry::scan(backend.as_ref(), descriptors, &settings)?;
        registry.apply_init_routes();

        let mut state = DeviceState {
            registry,
            mode: AudioMode::Normal,
            tty_mode: TtyMode::Off,
            out_device: DeviceSet::single(AudioDevice::Speaker),
            in_device: DeviceSet::single(AudioDevice::BuiltinMic),
            outputs: Vec::new(),
            inputs: Vec::new(),
            primary: None,
            active_input: None,
            active_source: None,
            echo_reference: None,
            sco: None,
            sco_rate: settings.sco_rate,
            pcm_bit: PcmFormat::S16Le,
            voice_volume: 1.0,
        };
        state.select_output();

        log::info!(
            "Audio HAL open: {} card(s), board '{}'",
            state.registry.len(),
            settings.board_name
        );

        Ok(Self {
            shared: Arc::new(DeviceShared {
                state: Mutex::new(state),
                backend,
                settings,
                in_call: AtomicBool::new(false),
                passthrough: AtomicBool::new(false),
                mic_mute: AtomicBool::new(false),
                sco_rx_running: Arc::new(AtomicBool::new(false)),
                sco_tx_running: Arc::new(AtomicBool::new(false)),
            }),
        })
    }

    pub fn init_check(&self) -> HalResult<()> {
        if self.shared.lock().registry.is_empty() {
            return Err(HalError::NoCard {
                what: "any descriptor".into(),
            });
        }
        Ok(())
    }

    // ======================== Streams ========================

    pub fn open_output_stream(
        &self,
        devices: DeviceSet,
        flags: OutputFlags,
        config: OutputConfig,
        address: &str,
    ) -> HalResult<Arc<StreamOut>> {
        let mut state = self.shared.lock();
        let stream = Arc::new(StreamOut::open(&self.shared, &state, devices, flags, config, address)?);
        if stream.is_primary() {
            state.primary = Some(stream.clone());
        }
        state.outputs.push(stream.clone());
        log::info!(
            "Opened output {} on {} ({} outputs)",
            stream.describe(),
            devices,
            state.outputs.len()
        );
        Ok(stream)
    }

    pub fn close_output_stream(&self, stream: &Arc<StreamOut>) {
        let mut state = self.shared.lock();
        stream.close(&self.shared);
        state.outputs.retain(|s| !Arc::ptr_eq(s, stream));
        if state.primary.as_ref().is_some_and(|p| Arc::ptr_eq(p, stream)) {
            state.primary = None;
        }
        log::info!("Closed output {}", stream.describe());
    }

    pub fn open_input_stream(
        &self,
        devices: DeviceSet,
        config: InputConfig,
        source: AudioSource,
        address: &str,
    ) -> HalResult<Arc<StreamIn>> {
        stream_in::refine_input_parameters(&config)?;
        let mut state = self.shared.lock();
        let stream = Arc::new(StreamIn::open(&self.shared, devices, &config, source, address));
        state.inputs.push(stream.clone());
        log::info!(
            "Opened input on {}: rate {}, {} ch, source {:?}",
            devices,
            config.rate,
            config.mask.channel_count(),
            source
        );
        Ok(stream)
    }

    pub fn close_input_stream(&self, stream: &Arc<StreamIn>) {
        let mut state = self.shared.lock();
        stream.standby_locked(&mut state);
        state.inputs.retain(|s| !Arc::ptr_eq(s, stream));
        if state.is_active_input(stream) {
            state.active_input = None;
            state.active_source = None;
        }
    }

    /// Capture buffer size for a configuration, 0 when it would be refused.
    pub fn input_buffer_size(&self, config: &InputConfig) -> usize {
        if stream_in::refine_input_parameters(config).is_err() {
            return 0;
        }
        stream_in::input_buffer_size(config, self.shared.settings.capture_period_size)
    }

    // ======================== Mode and routing ========================

    pub fn set_mode(&self, mode: AudioMode) -> HalResult<()> {
        let mut state = self.shared.lock();
        if state.mode == mode {
            return Ok(());
        }
        log::info!("Mode {:?} -> {:?}", state.mode, mode);
        state.mode = mode;
        self.select_mode(&mut state);
        Ok(())
    }

    fn select_mode(&self, state: &mut DeviceState) {
        let in_call = self.shared.in_call.load(Ordering::SeqCst);
        if state.mode == AudioMode::InCall {
            if in_call {
                return;
            }
            // a call never starts on the loudspeaker alone
            if state.out_device.is_only(AudioDevice::Speaker) {
                state.out_device = DeviceSet::single(AudioDevice::Earpiece);
                state.in_device = DeviceSet::single(AudioDevice::BuiltinMic);
            } else {
                state.out_device = state.out_device.without(AudioDevice::Speaker);
            }
            state.select_output();
            self.shared.in_call.store(true, Ordering::SeqCst);
            log::info!("Entered call on {}", state.out_device);
        } else if in_call {
            self.shared.in_call.store(false, Ordering::SeqCst);
            state.select_output();
            state.select_input();
            log::info!("Left call, output {}", state.out_device);
        }
    }

    pub fn mode(&self) -> AudioMode {
        self.shared.lock().mode
    }

    pub fn out_device(&self) -> DeviceSet {
        self.shared.lock().out_device
    }

    pub fn in_device(&self) -> DeviceSet {
        self.shared.lock().in_device
    }

    // ======================== Volume ========================

    /// Recorded only; call volume is owned by the modem.
    pub fn set_voice_volume(&self, volume: f32) -> HalResult<()> {
        self.shared.lock().voice_volume = volume;
        Ok(())
    }

    pub fn set_master_volume(&self, _volume: f32) -> HalResult<()> {
        Err(HalError::Unsupported)
    }

    pub fn set_mic_mute(&self, mute: bool) {
        self.shared.mic_mute.store(mute, Ordering::SeqCst);
    }

    pub fn mic_mute(&self) -> bool {
        self.shared.mic_mute.load(Ordering::SeqCst)
    }

    // ======================== Parameters ========================

    /// Apply a `key=value;...` string. Unknown keys are ignored.
    ///
    /// An invalid `tty_mode` rejects the whole string. A failing
    /// `hfp_enable=true` is reported after the remaining keys are applied.
    pub fn set_parameters(&self, kvpairs: &str) -> HalResult<()> {
        let params = Params::parse(kvpairs);
        let mut result = Ok(());
        let mut state = self.shared.lock();

        if let Some(value) = params.get(params::KEY_TTY_MODE) {
            let tty = TtyMode::from_param(value)
                .ok_or_else(|| HalError::BadParameter(format!("{}={}", params::KEY_TTY_MODE, value)))?;
            if tty != state.tty_mode {
                log::info!("TTY mode {:?}", tty);
                state.tty_mode = tty;
                if state.mode == AudioMode::InCall {
                    state.select_output();
                }
            }
        }

        if params.contains(params::KEY_HFP_SAMPLING_RATE) {
            match params.get_u32(params::KEY_HFP_SAMPLING_RATE) {
                Some(rate) if rate > 0 => state.sco_rate = rate,
                _ => log::warn!("Ignoring bad {}", params::KEY_HFP_SAMPLING_RATE),
            }
        }

        match params.get(params::KEY_HFP_ENABLE) {
            Some("true") => {
                if state.sco.is_some() {
                    log::info!("SCO bridge already running");
                } else {
                    match ScoBridge::start(&self.shared, &mut state) {
                        Ok(bridge) => state.sco = Some(bridge),
                        Err(e) => {
                            log::error!("Cannot start SCO bridge: {}", e);
                            result = Err(e);
                        }
                    }
                }
            }
            Some("false") => {
                if let Some(mut bridge) = state.sco.take() {
                    bridge.stop();
                }
            }
            Some(other) => log::warn!("Ignoring {}={}", params::KEY_HFP_ENABLE, other),
            None => {}
        }

        if params.contains(params::KEY_PCM_BIT) {
            match params.get_u32(params::KEY_PCM_BIT).and_then(PcmFormat::from_bits) {
                Some(format) => state.pcm_bit = format,
                None => log::warn!("Ignoring bad {}", params::KEY_PCM_BIT),
            }
        }

        match params.get(params::KEY_PASSTHROUGH) {
            Some("true") => self.shared.passthrough.store(true, Ordering::SeqCst),
            Some("false") => self.shared.passthrough.store(false, Ordering::SeqCst),
            _ => {}
        }

        if let Some(value) = params.get(params::KEY_SCREEN_STATE) {
            log::debug!("screen_state={}", value);
        }

        result
    }

    /// Answer the requested keys this device knows.
    pub fn get_parameters(&self, keys: &str) -> String {
        let query = Params::parse(keys);
        let state = self.shared.lock();
        let mut reply = Params::new();
        for key in query.keys() {
            match key {
                params::KEY_TTY_MODE => reply.add(key, state.tty_mode.as_param()),
                params::KEY_HFP_ENABLE => reply.add(key, state.sco.is_some()),
                params::KEY_HFP_SAMPLING_RATE => reply.add(key, state.sco_rate),
                params::KEY_PCM_BIT => reply.add(key, state.pcm_bit.bits()),
                params::KEY_PASSTHROUGH => {
                    reply.add(key, self.shared.passthrough.load(Ordering::SeqCst))
                }
                _ => {}
            }
        }
        reply.to_string()
    }

    pub fn dump(&self) -> String {
        let state = self.shared.lock();
        let mut out = String::new();
        let _ = writeln!(out, "audio card num {}", state.registry.len());
        for (i, card) in state.registry.cards().iter().enumerate() {
            let _ = writeln!(
                out,
                "  [{}] card{} {} out={} in={} in_format={:?}",
                i,
                card.index,
                card.driver_name(),
                card.desc.supported_out_devices,
                card.desc.supported_in_devices,
                card.in_format
            );
        }
        let _ = writeln!(
            out,
            "mode {:?} tty {:?} out {} in {} sco {}",
            state.mode,
            state.tty_mode,
            state.out_device,
            state.in_device,
            if state.sco.is_some() { state.sco_rate } else { 0 }
        );
        for stream in &state.outputs {
            let _ = writeln!(out, "  output {}", stream.describe());
        }
        let _ = writeln!(out, "  inputs {}", state.inputs.len());
        out
    }
}

impl Drop for AudioHw {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if let Some(mut bridge) = state.sco.take() {
            bridge.stop();
        }
        for stream in std::mem::take(&mut state.inputs) {
            stream.standby_locked(&mut state);
        }
        for stream in std::mem::take(&mut state.outputs) {
            stream.close(&self.shared);
        }
        state.primary = None;
        state.active_input = None;
        state.echo_reference = None;
        log::info!("Audio HAL closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::card::{RoutePath, RouteSetting};
    use crate::audio::mock::{MockBackend, MockMixer};

    fn wm8962_hal() -> (Arc<MockBackend>, AudioHw) {
        let backend = Arc::new(
            MockBackend::new().with_card(
                MockMixer::new("wm8962-audio")
                    .with_int("Speaker Switch", 1)
                    .with_int("Earpiece Switch", 1)
                    .with_int("Headphone Switch", 1),
            ),
        );
        let desc = CardDescriptor::new("wm8962")
            .with_out_devices(&[AudioDevice::Speaker, AudioDevice::Earpiece, AudioDevice::WiredHeadphone])
            .with_in_devices(&[AudioDevice::BuiltinMic])
            .with_route(RoutePath::Speaker, vec![RouteSetting::int("Speaker Switch", 1)])
            .with_route(RoutePath::Earpiece, vec![RouteSetting::int("Earpiece Switch", 1)])
            .with_route(RoutePath::Headphone, vec![RouteSetting::int("Headphone Switch", 1)]);
        let hw = AudioHw::open(backend.clone(), vec![desc], HalSettings::default()).unwrap();
        (backend, hw)
    }

    #[test]
    fn opens_on_speaker() {
        let (backend, hw) = wm8962_hal();
        assert!(hw.init_check().is_ok());
        assert_eq!(hw.mode(), AudioMode::Normal);
        assert_eq!(hw.out_device(), DeviceSet::single(AudioDevice::Speaker));
        let mixer = backend.mixer(0).unwrap();
        assert_eq!(mixer.int_values("Speaker Switch"), [1]);
    }

    #[test]
    fn call_moves_speaker_to_earpiece_and_back() {
        let (backend, hw) = wm8962_hal();
        let mixer = backend.mixer(0).unwrap();

        hw.set_mode(AudioMode::InCall).unwrap();
        assert_eq!(hw.out_device(), DeviceSet::single(AudioDevice::Earpiece));
        assert_eq!(hw.in_device(), DeviceSet::single(AudioDevice::BuiltinMic));
        assert_eq!(mixer.int_values("Earpiece Switch"), [1]);

        // no-op when the mode does not change
        mixer.clear_writes();
        hw.set_mode(AudioMode::InCall).unwrap();
        assert!(mixer.writes().is_empty());

        hw.set_mode(AudioMode::Normal).unwrap();
        assert_eq!(hw.out_device(), DeviceSet::single(AudioDevice::Earpiece));
        assert!(!mixer.writes().is_empty());
    }

    #[test]
    fn call_drops_speaker_from_a_combined_selection() {
        let (_backend, hw) = wm8962_hal();
        hw.shared.lock().out_device = DeviceSet::of(&[AudioDevice::Speaker, AudioDevice::WiredHeadphone]);
        hw.set_mode(AudioMode::InCall).unwrap();
        assert_eq!(hw.out_device(), DeviceSet::single(AudioDevice::WiredHeadphone));
    }

    #[test]
    fn parameters_round_trip() {
        let (_backend, hw) = wm8962_hal();
        hw.set_parameters("tty_mode=tty_full;hfp_set_sampling_rate=8000;pcm_bit=24;screen_state=on")
            .unwrap();
        assert_eq!(
            hw.get_parameters("tty_mode;hfp_set_sampling_rate;pcm_bit;hfp_enable;unknown"),
            "tty_mode=tty_full;hfp_set_sampling_rate=8000;pcm_bit=24;hfp_enable=false"
        );
    }

    #[test]
    fn bad_tty_mode_is_rejected() {
        let (_backend, hw) = wm8962_hal();
        let err = hw.set_parameters("tty_mode=loud;pcm_bit=32").unwrap_err();
        assert!(matches!(err, HalError::BadParameter(_)));
        assert_eq!(hw.get_parameters("pcm_bit"), "pcm_bit=16");
    }

    #[test]
    fn hfp_without_sco_card_fails_cleanly() {
        let (backend, hw) = wm8962_hal();
        let err = hw.set_parameters("hfp_enable=true").unwrap_err();
        assert!(matches!(err, HalError::NoCard { .. }));
        assert_eq!(hw.get_parameters("hfp_enable"), "hfp_enable=false");
        assert!(backend.live().is_empty());
        assert!(!hw.shared.sco_rx_running.load(Ordering::SeqCst));
    }

    #[test]
    fn volumes() {
        let (_backend, hw) = wm8962_hal();
        assert!(hw.set_voice_volume(0.5).is_ok());
        assert!(matches!(hw.set_master_volume(0.5), Err(HalError::Unsupported)));
        hw.set_mic_mute(true);
        assert!(hw.mic_mute());
    }

    #[test]
    fn dump_lists_cards() {
        let (_backend, hw) = wm8962_hal();
        let dump = hw.dump();
        assert!(dump.starts_with("audio card num 1"));
        assert!(dump.contains("wm8962"));
    }
}
