//! Input streams.
//!
//! Capture runs at whatever the card delivers and is converted to the
//! requested layout: bit depth and channel count first, then rate, then the
//! attached preprocessors.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use super::convert;
use super::device::{AudioMode, AudioSource, DeviceSet, Direction};
use super::effects::{self, EchoReference, EffectId, Preprocessor};
use super::error::{HalError, HalResult, PcmError};
use super::format::{AudioFormat, ChannelMask, DEFAULT_INPUT_SAMPLE_RATE, PcmConfig, PcmFormat};
use super::hw::{DeviceShared, DeviceState};
use super::params::{self, Params};
use super::pcm::{self, Pcm};
use super::resampler::{self, Resampler};

const INPUT_RATES: [u32; 8] = [8000, 11025, 16000, 22050, 24000, 32000, 44100, 48000];

const MAX_READ_FAILURES: u32 = 100;
const MAX_PREPROCESSORS: usize = 5;
const BUSY_BACKOFF: Duration = Duration::from_millis(2);
/// Upper bound on hardware reads to fill one resampled buffer.
const MAX_RESAMPLE_PASSES: usize = 8;

/// Requested capture configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputConfig {
    pub rate: u32,
    pub mask: ChannelMask,
    pub format: AudioFormat,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            rate: DEFAULT_INPUT_SAMPLE_RATE,
            mask: ChannelMask::IN_STEREO,
            format: AudioFormat::Pcm16Bit,
        }
    }
}

/// Check a capture configuration; on refusal the error carries the nearest
/// configuration that would be accepted.
///
/// Only 16-bit mono or stereo is accepted. An unsupported rate is rounded
/// up to the next standard rate, or down to 48 kHz.
pub fn refine_input_parameters(config: &InputConfig) -> HalResult<()> {
    let mut refined = *config;
    let mut ok = true;

    if config.format != AudioFormat::Pcm16Bit {
        refined.format = AudioFormat::Pcm16Bit;
        ok = false;
    }
    let channels = config.mask.channel_count();
    if channels != 1 && channels != 2 {
        refined.mask = ChannelMask::IN_STEREO;
        ok = false;
    }
    if !INPUT_RATES.contains(&config.rate) {
        refined.rate = INPUT_RATES
            .iter()
            .copied()
            .find(|r| *r > config.rate)
            .unwrap_or(DEFAULT_INPUT_SAMPLE_RATE);
        ok = false;
    }

    if ok {
        return Ok(());
    }
    log::warn!("Input config {:?} refused, nearest {:?}", config, refined);
    Err(HalError::InvalidArgument {
        rate: refined.rate,
        mask: refined.mask,
        format: refined.format,
    })
}

/// Bytes per read: one capture period scaled to the stream rate, rounded up
/// to 16 frames.
pub fn input_buffer_size(config: &InputConfig, period_size: u32) -> usize {
    let frames = u64::from(period_size) * u64::from(config.rate) / u64::from(DEFAULT_INPUT_SAMPLE_RATE);
    let frames = (frames as usize).div_ceil(16) * 16;
    frames * config.mask.channel_count() as usize * std::mem::size_of::<i16>()
}

struct InState {
    source: AudioSource,
    config: PcmConfig,
    pcm: Option<Box<dyn Pcm>>,
    card: Option<usize>,
    resampler: Option<Box<dyn Resampler>>,
    /// Resampled samples left over from the previous read.
    pending: Vec<i16>,
    effects: Vec<(EffectId, Box<dyn Preprocessor>)>,
    next_effect: EffectId,
    need_echo_reference: bool,
    echo_reference: Option<Arc<EchoReference>>,
    /// Bytes still muted after start.
    mute_bytes: usize,
    fail_count: u32,
    frames_read: u64,
}

/// One capture stream.
pub struct StreamIn {
    dev: Weak<DeviceShared>,
    rate: u32,
    mask: ChannelMask,
    channels: u32,
    address: String,
    devices: AtomicU32,
    standby: AtomicBool,
    inner: Mutex<InState>,
}

impl fmt::Debug for StreamIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamIn")
            .field("rate", &self.rate)
            .field("mask", &self.mask)
            .field("channels", &self.channels)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl StreamIn {
    /// Build a stream for a configuration [`refine_input_parameters`]
    /// accepted.
    pub(crate) fn open(
        dev: &Arc<DeviceShared>,
        devices: DeviceSet,
        config: &InputConfig,
        source: AudioSource,
        address: &str,
    ) -> Self {
        let settings = &dev.settings;
        let channels = config.mask.channel_count();
        let mut effects: Vec<(EffectId, Box<dyn Preprocessor>)> = Vec::new();
        if settings.denoise {
            // 10 ms frames
            if let Some(fx) = effects::denoise((config.rate / 100) as usize, config.rate) {
                log::info!("Capture denoise: {}", fx.name());
                effects.push((1, fx));
            }
        }

        Self {
            dev: Arc::downgrade(dev),
            rate: config.rate,
            mask: config.mask,
            channels,
            address: address.to_string(),
            devices: AtomicU32::new(devices.filter(Direction::Input).bits()),
            standby: AtomicBool::new(true),
            inner: Mutex::new(InState {
                source,
                config: PcmConfig::new(
                    channels,
                    DEFAULT_INPUT_SAMPLE_RATE,
                    settings.capture_period_size,
                    settings.capture_period_count,
                    PcmFormat::S16Le,
                ),
                pcm: None,
                card: None,
                resampler: None,
                pending: Vec::new(),
                next_effect: effects.len() as EffectId + 1,
                effects,
                need_echo_reference: false,
                echo_reference: None,
                mute_bytes: 0,
                fail_count: 0,
                frames_read: 0,
            }),
        }
    }

    fn device(&self) -> HalResult<Arc<DeviceShared>> {
        self.dev
            .upgrade()
            .ok_or(HalError::InvalidState("audio device closed"))
    }

    fn lock(&self) -> MutexGuard<'_, InState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sample_rate(&self) -> u32 {
        self.rate
    }

    pub fn channel_mask(&self) -> ChannelMask {
        self.mask
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::Pcm16Bit
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn devices(&self) -> DeviceSet {
        DeviceSet::from_bits(self.devices.load(Ordering::SeqCst))
    }

    pub fn source(&self) -> AudioSource {
        self.lock().source
    }

    pub fn is_standby(&self) -> bool {
        self.standby.load(Ordering::SeqCst)
    }

    pub fn frame_size(&self) -> usize {
        self.channels as usize * std::mem::size_of::<i16>()
    }

    pub fn buffer_size(&self) -> usize {
        let period = self.lock().config.period_size;
        input_buffer_size(
            &InputConfig {
                rate: self.rate,
                mask: self.mask,
                format: AudioFormat::Pcm16Bit,
            },
            period,
        )
    }

    /// Frames delivered since open.
    pub fn frames_read(&self) -> u64 {
        self.lock().frames_read
    }

    /// Capture PCM configuration of the running (or next) start.
    pub fn pcm_config(&self) -> PcmConfig {
        self.lock().config
    }

    // ======================== Start / standby ========================

    fn start(&self, dev: &DeviceShared, state: &mut DeviceState, inp: &mut InState) -> HalResult<()> {
        let devices = self.devices();
        if dev.sco_tx_running.load(Ordering::SeqCst) {
            thread::sleep(BUSY_BACKOFF);
            log::warn!("Capture busy: SCO uplink owns the microphone");
            return Err(HalError::Busy(devices));
        }
        let me = state
            .find_input(self)
            .ok_or(HalError::InvalidState("input stream closed"))?;

        state.active_input = Some(me);
        state.active_source = Some(inp.source);
        state.in_device = devices;
        if state.mode != AudioMode::InCall {
            state.select_input();
        }

        let result = self.open_pcm(dev, state, inp);
        if result.is_err() {
            state.active_input = None;
            state.active_source = None;
        }
        result
    }

    fn open_pcm(&self, dev: &DeviceShared, state: &mut DeviceState, inp: &mut InState) -> HalResult<()> {
        let devices = self.devices();
        let card = state
            .registry
            .card_for_device(devices, Direction::Input)
            .ok_or_else(|| HalError::NoCard {
                what: devices.to_string(),
            })?;
        let sound_card = state.registry.get(card).ok_or_else(|| HalError::NoCard {
            what: format!("card idx {}", card),
        })?;
        let index = sound_card.index;

        let mut config = PcmConfig::new(
            2,
            DEFAULT_INPUT_SAMPLE_RATE,
            dev.settings.capture_period_size,
            dev.settings.capture_period_count,
            state.registry.input_format_for(devices),
        );
        if devices.intersects(DeviceSet::ALL_SCO_IN) {
            config.rate = state.sco_rate;
            config.channels = state.registry.hsp_channels();
        }

        if inp.need_echo_reference && inp.echo_reference.is_none() {
            inp.echo_reference = state.acquire_echo_reference();
        }

        let resampler = if config.rate != self.rate {
            Some(resampler::create_resampler(config.rate, self.rate, self.channels)?)
        } else {
            None
        };

        log::info!("Starting input on card{}: pcm {}", index, config);
        let pcm = dev
            .backend
            .open_pcm(index, 0, Direction::Input, &config)
            .inspect_err(|e| log::error!("Cannot open input PCM: {}", e))?;

        inp.pcm = Some(pcm);
        inp.config = config;
        inp.card = Some(card);
        inp.resampler = resampler;
        inp.pending.clear();
        // half a second of silence while the codec settles
        inp.mute_bytes = self.rate as usize * self.frame_size() / 2;
        self.standby.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn do_standby(&self, state: &mut DeviceState, inp: &mut InState) {
        if inp.pcm.is_none() {
            return;
        }
        inp.pcm = None;
        inp.fail_count = 0;

        if state.is_active_input(self) {
            state.active_input = None;
            state.active_source = None;
            if state.mode != AudioMode::InCall {
                state.in_device = DeviceSet::EMPTY;
                state.select_input();
            }
        }
        if let Some(reference) = inp.echo_reference.take() {
            state.release_echo_reference(&reference);
        }
        self.standby.store(true, Ordering::SeqCst);
        log::info!("Input on {} standby", self.devices());
    }

    /// Standby with the device lock already held.
    pub(crate) fn standby_locked(&self, state: &mut DeviceState) {
        let mut inp = self.lock();
        self.do_standby(state, &mut inp);
    }

    pub fn standby(&self) -> HalResult<()> {
        let dev = self.device()?;
        let mut state = dev.lock();
        self.standby_locked(&mut state);
        Ok(())
    }

    // ======================== Read path ========================

    /// Fill `buf` with captured frames.
    ///
    /// Always reports the full length: on failure the buffer is silence and
    /// the call sleeps for its duration.
    pub fn read(&self, buf: &mut [u8]) -> HalResult<usize> {
        let dev = self.device()?;
        let mut force_standby = false;

        let mut state = dev.lock();
        let mut inp = self.lock();
        let mut result = Ok(());
        if inp.pcm.is_none() {
            result = self.start(&dev, &mut state, &mut inp);
        }
        if result.is_ok() {
            self.follow_spdif_rate(&state, &mut inp);
        }
        drop(state);

        if result.is_ok() {
            result = self.capture(&mut inp, buf).map_err(HalError::from);
            match &result {
                Ok(()) => inp.fail_count = 0,
                Err(_) => {
                    inp.fail_count += 1;
                    force_standby = inp.fail_count > MAX_READ_FAILURES;
                }
            }
        }

        if result.is_ok() {
            if dev.mic_mute.load(Ordering::SeqCst) {
                buf.fill(0);
            }
            if inp.mute_bytes > 0 {
                let n = inp.mute_bytes.min(buf.len());
                buf[..n].fill(0);
                inp.mute_bytes -= n;
            }
        }
        inp.frames_read += (buf.len() / self.frame_size()) as u64;
        drop(inp);

        if let Err(e) = result {
            log::warn!("Input read of {} bytes failed: {}", buf.len(), e);
            buf.fill(0);
            let stream = PcmConfig::new(self.channels, self.rate, 0, 0, PcmFormat::S16Le);
            thread::sleep(pcm::buffer_duration(buf.len(), &stream));
        }
        if force_standby {
            log::error!("Input failed {} reads in a row", MAX_READ_FAILURES + 1);
            let mut state = dev.lock();
            self.standby_locked(&mut state);
        }
        Ok(buf.len())
    }

    /// An S/PDIF receiver runs at the rate of the incoming signal; follow it.
    fn follow_spdif_rate(&self, state: &DeviceState, inp: &mut InState) {
        let Some(card) = inp.card else {
            return;
        };
        let Some(raw) = state.registry.spdif_rx_rate(card) else {
            return;
        };
        let rate = convert::snap_spdif_rate(raw);
        if rate == 0 || rate == inp.config.rate {
            return;
        }
        log::warn!("S/PDIF input rate {} -> {}", inp.config.rate, rate);
        inp.config.rate = rate;
        inp.pending.clear();
        inp.resampler = if rate == self.rate {
            None
        } else {
            match resampler::create_resampler(rate, self.rate, self.channels) {
                Ok(r) => Some(r),
                Err(e) => {
                    log::error!("No resampler for S/PDIF rate {}: {}", rate, e);
                    None
                }
            }
        };
    }

    fn capture(&self, inp: &mut InState, buf: &mut [u8]) -> Result<(), PcmError> {
        let frames = buf.len() / self.frame_size();
        let mut samples = if inp.resampler.is_some() {
            self.read_resampled(inp, frames)?
        } else {
            self.read_converted(inp, frames)?
        };

        if !inp.effects.is_empty() {
            let echo = inp.echo_reference.as_ref().map(|r| r.read(frames));
            for (_, fx) in inp.effects.iter_mut() {
                let reference = if fx.wants_echo_reference() { echo.as_deref() } else { None };
                fx.process(&mut samples, self.channels, reference);
            }
        }

        let bytes = convert::i16_to_bytes(&samples);
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        buf[n..].fill(0);
        Ok(())
    }

    /// Read `frames` hardware frames and convert them to the stream layout.
    fn read_converted(&self, inp: &mut InState, frames: usize) -> Result<Vec<i16>, PcmError> {
        let config = inp.config;
        let pcm = inp.pcm.as_mut().ok_or(PcmError::NotPrepared)?;
        let mut raw = vec![0u8; config.frames_to_bytes(frames)];
        pcm::read_with_retry(pcm.as_mut(), &mut raw)?;
        let converted = convert::convert_record_data(&raw, config.format, config.channels, self.channels);
        Ok(convert::bytes_to_i16(&converted))
    }

    fn read_resampled(&self, inp: &mut InState, frames: usize) -> Result<Vec<i16>, PcmError> {
        let channels = self.channels.max(1) as usize;
        let want = frames * channels;
        for _ in 0..MAX_RESAMPLE_PASSES {
            if inp.pending.len() >= want {
                break;
            }
            let missing = (want - inp.pending.len()).div_ceil(channels) as u64;
            let step = inp.resampler.as_ref().map_or(1, |r| r.input_granularity()).max(1);
            let hw_frames = (missing * u64::from(inp.config.rate))
                .div_ceil(u64::from(self.rate.max(1)))
                .max(1) as usize;
            let chunk = self.read_converted(inp, hw_frames.div_ceil(step) * step)?;
            let Some(r) = inp.resampler.as_mut() else {
                inp.pending.extend_from_slice(&chunk);
                continue;
            };
            let produced = r.process(&chunk);
            inp.pending.extend_from_slice(&produced);
        }
        let take = want.min(inp.pending.len());
        let mut out: Vec<i16> = inp.pending.drain(..take).collect();
        out.resize(want, 0);
        Ok(out)
    }

    // ======================== Control ========================

    /// A change of source restarts the stream so routing can follow.
    pub fn set_source(&self, source: AudioSource) -> HalResult<()> {
        let dev = self.device()?;
        let mut state = dev.lock();
        let mut inp = self.lock();
        if source != AudioSource::Default && source != inp.source {
            log::info!("Input source {:?} -> {:?}", inp.source, source);
            inp.source = source;
            self.do_standby(&mut state, &mut inp);
        }
        Ok(())
    }

    /// `input_source=<id>`; routing through parameters is refused.
    pub fn set_parameters(&self, kvpairs: &str) -> HalResult<()> {
        let params = Params::parse(kvpairs);
        if params.contains(params::KEY_ROUTING) {
            log::warn!("Input routing must go through set_device");
        }
        if let Some(value) = params.get(params::KEY_INPUT_SOURCE) {
            let source = value
                .parse()
                .ok()
                .and_then(AudioSource::from_id)
                .ok_or_else(|| HalError::BadParameter(format!("{}={}", params::KEY_INPUT_SOURCE, value)))?;
            self.set_source(source)?;
        }
        Ok(())
    }

    pub fn get_parameters(&self, keys: &str) -> String {
        let query = Params::parse(keys);
        let mut reply = Params::new();
        if query.contains(params::KEY_SUP_FORMATS) {
            reply.add(params::KEY_SUP_FORMATS, AudioFormat::Pcm16Bit.name());
        }
        reply.to_string()
    }

    pub fn set_device(&self, devices: DeviceSet) -> HalResult<()> {
        let devices = devices.filter(Direction::Input);
        let dev = self.device()?;
        let mut state = dev.lock();
        let mut inp = self.lock();
        if self.devices() != devices {
            self.do_standby(&mut state, &mut inp);
            self.devices.store(devices.bits(), Ordering::SeqCst);
            log::info!("Input moved to {}", devices);
        }
        Ok(())
    }

    /// Attach a preprocessor. One that wants the echo reference restarts
    /// the stream so the reference is wired up on the next read.
    pub fn add_effect(&self, effect: Box<dyn Preprocessor>) -> HalResult<EffectId> {
        let dev = self.device()?;
        let mut state = dev.lock();
        let mut inp = self.lock();
        if inp.effects.len() >= MAX_PREPROCESSORS {
            return Err(HalError::Unsupported);
        }
        let id = inp.next_effect;
        inp.next_effect += 1;
        let wants_echo = effect.wants_echo_reference();
        log::info!("Input effect {} added as {}", effect.name(), id);
        inp.effects.push((id, effect));
        if wants_echo {
            inp.need_echo_reference = true;
            self.do_standby(&mut state, &mut inp);
        }
        Ok(id)
    }

    pub fn remove_effect(&self, id: EffectId) -> HalResult<()> {
        let dev = self.device()?;
        let mut state = dev.lock();
        let mut inp = self.lock();
        let pos = inp
            .effects
            .iter()
            .position(|(e, _)| *e == id)
            .ok_or_else(|| HalError::BadParameter(format!("effect {}", id)))?;
        let (_, effect) = inp.effects.remove(pos);
        log::info!("Input effect {} removed", effect.name());
        if effect.wants_echo_reference() {
            inp.need_echo_reference = inp.effects.iter().any(|(_, e)| e.wants_echo_reference());
            if !inp.need_echo_reference {
                if let Some(reference) = inp.echo_reference.take() {
                    state.release_echo_reference(&reference);
                }
            }
            self.do_standby(&mut state, &mut inp);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rate: u32, mask: ChannelMask, format: AudioFormat) -> InputConfig {
        InputConfig { rate, mask, format }
    }

    fn refined(c: InputConfig) -> Option<(u32, ChannelMask, AudioFormat)> {
        match refine_input_parameters(&c) {
            Ok(()) => None,
            Err(HalError::InvalidArgument { rate, mask, format }) => Some((rate, mask, format)),
            Err(e) => panic!("unexpected {e}"),
        }
    }

    #[test]
    fn accepts_standard_configs() {
        for rate in INPUT_RATES {
            assert!(refined(config(rate, ChannelMask::IN_MONO, AudioFormat::Pcm16Bit)).is_none());
        }
        assert!(refined(InputConfig::default()).is_none());
    }

    #[test]
    fn rounds_rate_up_or_caps() {
        assert_eq!(
            refined(config(12000, ChannelMask::IN_STEREO, AudioFormat::Pcm16Bit)),
            Some((16000, ChannelMask::IN_STEREO, AudioFormat::Pcm16Bit))
        );
        assert_eq!(
            refined(config(96000, ChannelMask::IN_STEREO, AudioFormat::Pcm16Bit)),
            Some((48000, ChannelMask::IN_STEREO, AudioFormat::Pcm16Bit))
        );
    }

    #[test]
    fn refuses_other_formats_and_channel_counts() {
        assert_eq!(
            refined(config(48000, ChannelMask::IN_STEREO, AudioFormat::Default)),
            Some((48000, ChannelMask::IN_STEREO, AudioFormat::Pcm16Bit))
        );
        assert_eq!(
            refined(config(44100, ChannelMask::OUT_5POINT1, AudioFormat::Pcm32Bit)),
            Some((44100, ChannelMask::IN_STEREO, AudioFormat::Pcm16Bit))
        );
    }

    #[test]
    fn buffer_size_rounds_to_16_frames() {
        // 256 frames at 48k -> 85.33 at 16k -> 96
        let c = config(16000, ChannelMask::IN_MONO, AudioFormat::Pcm16Bit);
        assert_eq!(input_buffer_size(&c, 256), 96 * 2);
        let c = config(48000, ChannelMask::IN_STEREO, AudioFormat::Pcm16Bit);
        assert_eq!(input_buffer_size(&c, 256), 256 * 4);
    }
}
