//! Output streams.
//!
//! A stream is configured once at open time into one of five kinds and
//! then moves between STANDBY (no PCM) and ACTIVE (PCM open). The first
//! write after standby starts it: routes the device, resolves the card and
//! opens the PCM. Every write then runs the conversion pipeline and hands
//! the result to the PCM with one xrun retry.

use std::borrow::Cow;
use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use super::convert;
use super::device::{AudioDevice, AudioMode, AudioSource, DeviceSet, Direction};
use super::effects::EchoReference;
use super::error::{HalError, HalResult, PcmError};
use super::format::{
    AudioFormat, ChannelMask, DEFAULT_OUTPUT_SAMPLE_RATE, DSD64_SAMPLING_RATE, DSD_FRAMESIZE_BYTES,
    DSD_RATE_TO_PCM_RATE, PcmConfig, PcmFormat,
};
use super::hw::{DeviceShared, DeviceState};
use super::params::{self, Params};
use super::pcm::{self, Pcm};
use super::resampler::{self, Resampler};

/// Consecutive failed writes after which the primary output gives up its PCM.
const MAX_WRITE_FAILURES: u32 = 100;

/// Back-off before reporting a busy output device.
const BUSY_BACKOFF: Duration = Duration::from_millis(2);

// ======================== Flags and config ========================

/// Output flags as the framework passes them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OutputFlags(u32);

impl OutputFlags {
    pub const NONE: OutputFlags = OutputFlags(0);
    pub const DIRECT: OutputFlags = OutputFlags(0x1);
    pub const PRIMARY: OutputFlags = OutputFlags(0x2);
    pub const FAST: OutputFlags = OutputFlags(0x4);
    pub const DEEP_BUFFER: OutputFlags = OutputFlags(0x8);
    pub const COMPRESS_OFFLOAD: OutputFlags = OutputFlags(0x10);
    pub const NON_BLOCKING: OutputFlags = OutputFlags(0x20);
    pub const HW_AV_SYNC: OutputFlags = OutputFlags(0x40);

    pub const fn from_bits(bits: u32) -> Self {
        OutputFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Whether every flag in `other` is set. `other` must not be `NONE`.
    pub fn contains(self, other: OutputFlags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for OutputFlags {
    type Output = OutputFlags;

    fn bitor(self, rhs: OutputFlags) -> OutputFlags {
        OutputFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for OutputFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputFlags({:#x})", self.0)
    }
}

/// Requested stream configuration. Zero / `NONE` / `Default` fields ask
/// the HAL to pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputConfig {
    pub rate: u32,
    pub mask: ChannelMask,
    pub format: AudioFormat,
}

// ======================== Stream kinds ========================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputKind {
    /// DSD through the offload path.
    Offload,
    /// Multichannel PCM to HDMI.
    HdmiMulti,
    /// Multichannel PCM to the ESAI codec.
    EsaiMulti,
    /// Mixer output on HDMI or Bluetooth SCO.
    Mixer,
    Primary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseMode {
    Unsupported,
    /// Pause through the driver.
    Driver,
    /// Accepted but nothing to pause.
    Placeholder,
}

fn is_sco_output(devices: DeviceSet) -> bool {
    !devices.is_empty() && DeviceSet::ALL_SCO_OUT.intersection(devices) == devices
}

struct OutState {
    config: PcmConfig,
    pcm: Option<Box<dyn Pcm>>,
    /// Registry index of the card serving the stream.
    card: Option<usize>,
    pcm_device: u32,
    keeps_route_in_call: bool,
    resampler: Option<Box<dyn Resampler>>,
    echo_reference: Option<Arc<EchoReference>>,
    /// Frames handed to the driver since open or the last flush.
    written: u64,
    fail_count: u32,
    paused: bool,
}

/// One output stream.
pub struct StreamOut {
    dev: Weak<DeviceShared>,
    kind: OutputKind,
    flags: OutputFlags,
    rate: u32,
    mask: ChannelMask,
    format: AudioFormat,
    address: String,
    primary: bool,
    pause_mode: PauseMode,
    /// 16-bit stream widened for a 24-bit passthrough sink.
    passthrough_s24: bool,
    devices: AtomicU32,
    standby: AtomicBool,
    inner: Mutex<OutState>,
}

impl fmt::Debug for StreamOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOut")
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .field("rate", &self.rate)
            .field("mask", &self.mask)
            .field("format", &self.format)
            .field("address", &self.address)
            .field("primary", &self.primary)
            .finish_non_exhaustive()
    }
}

impl StreamOut {
    /// Resolve a stream configuration against the device capabilities.
    ///
    /// Fills in defaults for unspecified fields; a specified field that
    /// differs from what the stream will run fails with `InvalidArgument`
    /// carrying the values it would accept.
    pub(crate) fn open(
        dev: &Arc<DeviceShared>,
        state: &DeviceState,
        devices: DeviceSet,
        flags: OutputFlags,
        requested: OutputConfig,
        address: &str,
    ) -> HalResult<Self> {
        let registry = &state.registry;
        let mut resolved = requested;
        let mut pause_mode = PauseMode::Unsupported;
        let mut passthrough_s24 = false;
        let mut primary = false;

        let (kind, config) = if flags.contains(OutputFlags::COMPRESS_OFFLOAD) {
            if requested.format != AudioFormat::Dsd {
                log::error!("Offload supports DSD only, got {:?}", requested.format);
                return Err(HalError::InvalidArgument {
                    rate: DSD64_SAMPLING_RATE,
                    mask: ChannelMask::OUT_STEREO,
                    format: AudioFormat::Dsd,
                });
            }
            if resolved.rate == 0 {
                resolved.rate = DSD64_SAMPLING_RATE;
            }
            if resolved.mask.is_none() {
                resolved.mask = ChannelMask::OUT_STEREO;
            }
            let mut config = PcmConfig::dsd();
            config.rate = resolved.rate / DSD_RATE_TO_PCM_RATE;
            (OutputKind::Offload, config)
        } else if flags.contains(OutputFlags::DIRECT) && devices.is_only(AudioDevice::AuxDigital) {
            Self::fill_multichannel_defaults(&mut resolved);
            let mut config = PcmConfig::hdmi_multi();
            config.rate = resolved.rate;
            config.channels = resolved.mask.channel_count();
            if dev.settings.board_name.contains("evk_8mp") {
                config.format = PcmFormat::S24Le;
                passthrough_s24 = dev.passthrough.load(Ordering::SeqCst);
            }
            (OutputKind::HdmiMulti, config)
        } else if flags.contains(OutputFlags::DIRECT)
            && (devices.is_only(AudioDevice::Speaker)
                || devices.is_only(AudioDevice::Line)
                || devices.is_only(AudioDevice::WiredHeadphone))
            && (registry.supports_multichannel() || registry.supports_lpa())
        {
            Self::fill_multichannel_defaults(&mut resolved);
            let mut config = PcmConfig::esai_multi();
            config.rate = resolved.rate;
            config.channels = resolved.mask.channel_count();
            // frames go out as written, so the PCM carries the stream's own format
            config.format = resolved.format.pcm_format().unwrap_or(PcmFormat::S16Le);
            pause_mode = PauseMode::Driver;
            (OutputKind::EsaiMulti, config)
        } else if flags.is_none() && (devices.is_only(AudioDevice::AuxDigital) || is_sco_output(devices)) {
            if resolved.rate == 0 {
                resolved.rate = DEFAULT_OUTPUT_SAMPLE_RATE;
            }
            if resolved.mask.is_none() {
                resolved.mask = ChannelMask::OUT_STEREO;
            }
            if resolved.format == AudioFormat::Default {
                resolved.format = AudioFormat::Pcm16Bit;
            }
            let mut config = PcmConfig::mm_out();
            config.rate = resolved.rate;
            config.channels = if is_sco_output(devices) {
                registry.hsp_channels()
            } else {
                resolved.mask.channel_count()
            };
            (OutputKind::Mixer, config)
        } else {
            if flags.contains(OutputFlags::PRIMARY) {
                if state.primary.is_none() {
                    primary = true;
                } else if devices.is_only(AudioDevice::Bus) {
                    log::debug!("Additional primary output on bus '{}'", address);
                } else {
                    log::error!("Primary output already exists");
                    return Err(HalError::AlreadyExists);
                }
            }
            if flags.contains(OutputFlags::DIRECT) {
                pause_mode = PauseMode::Placeholder;
            }
            resolved = OutputConfig {
                rate: DEFAULT_OUTPUT_SAMPLE_RATE,
                mask: ChannelMask::OUT_STEREO,
                format: AudioFormat::Pcm16Bit,
            };
            (OutputKind::Primary, registry.primary_config())
        };

        let mismatch = (requested.format != AudioFormat::Default && requested.format != resolved.format)
            || (!requested.mask.is_none() && requested.mask != resolved.mask)
            || (requested.rate != 0 && requested.rate != resolved.rate);
        if mismatch {
            log::error!(
                "Output {:?} on {} rejects {:?}, supports rate {} mask {:?} format {:?}",
                kind,
                devices,
                requested,
                resolved.rate,
                resolved.mask,
                resolved.format
            );
            return Err(HalError::InvalidArgument {
                rate: resolved.rate,
                mask: resolved.mask,
                format: resolved.format,
            });
        }

        log::info!("Output {:?} on {}: pcm {}", kind, devices, config);
        Ok(Self {
            dev: Arc::downgrade(dev),
            kind,
            flags,
            rate: resolved.rate,
            mask: resolved.mask,
            format: resolved.format,
            address: address.to_string(),
            primary,
            pause_mode,
            passthrough_s24,
            devices: AtomicU32::new(devices.bits()),
            standby: AtomicBool::new(true),
            inner: Mutex::new(OutState {
                config,
                pcm: None,
                card: None,
                pcm_device: 0,
                keeps_route_in_call: false,
                resampler: None,
                echo_reference: None,
                written: 0,
                fail_count: 0,
                paused: false,
            }),
        })
    }

    fn fill_multichannel_defaults(config: &mut OutputConfig) {
        if config.rate == 0 {
            config.rate = DEFAULT_OUTPUT_SAMPLE_RATE;
        }
        if config.mask.is_none() {
            config.mask = ChannelMask::OUT_5POINT1;
        }
        if config.format == AudioFormat::Default {
            config.format = AudioFormat::Pcm16Bit;
        }
    }

    fn device(&self) -> HalResult<Arc<DeviceShared>> {
        self.dev
            .upgrade()
            .ok_or(HalError::InvalidState("audio device closed"))
    }

    fn lock(&self) -> MutexGuard<'_, OutState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ======================== Accessors ========================

    pub fn sample_rate(&self) -> u32 {
        self.rate
    }

    pub fn channel_mask(&self) -> ChannelMask {
        self.mask
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn flags(&self) -> OutputFlags {
        self.flags
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn devices(&self) -> DeviceSet {
        DeviceSet::from_bits(self.devices.load(Ordering::SeqCst))
    }

    pub fn is_standby(&self) -> bool {
        self.standby.load(Ordering::SeqCst)
    }

    /// Whether this stream holds the device's primary slot.
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Bytes per frame as the framework writes them.
    pub fn frame_size(&self) -> usize {
        if self.format == AudioFormat::Dsd {
            DSD_FRAMESIZE_BYTES
        } else {
            (self.mask.channel_count() as usize * self.format.bytes_per_sample()).max(1)
        }
    }

    /// Bytes the framework should hand to one `write`: one hardware period
    /// at the stream rate.
    pub fn buffer_size(&self) -> usize {
        let config = self.lock().config;
        let frames = u64::from(config.period_size) * u64::from(self.rate) / u64::from(config.rate.max(1));
        frames as usize * self.frame_size()
    }

    pub fn pcm_config(&self) -> PcmConfig {
        self.lock().config
    }

    pub fn latency(&self) -> u32 {
        self.lock().config.latency_ms()
    }

    /// Frames written since open or the last flush.
    pub fn render_position(&self) -> u64 {
        self.lock().written
    }

    pub(crate) fn describe(&self) -> String {
        format!(
            "{:?}{} {} Hz {} {}",
            self.kind,
            if self.primary { " (primary)" } else { "" },
            self.rate,
            self.mask.name(),
            self.format.name()
        )
    }

    fn uses_mixer_path(&self) -> bool {
        matches!(self.kind, OutputKind::Primary | OutputKind::Mixer)
    }

    /// The stream's frames described as a PCM would carry them. DSD counts
    /// in driver frames.
    fn stream_config(&self) -> PcmConfig {
        if self.format == AudioFormat::Dsd {
            let mut config = PcmConfig::dsd();
            config.rate = self.rate / DSD_RATE_TO_PCM_RATE;
            return config;
        }
        PcmConfig {
            channels: self.mask.channel_count(),
            rate: self.rate,
            format: self.format.pcm_format().unwrap_or(PcmFormat::S16Le),
            ..PcmConfig::mm_out()
        }
    }

    fn backoff(&self, bytes: usize) -> Duration {
        pcm::buffer_duration(bytes, &self.stream_config())
    }

    // ======================== Start / standby ========================

    /// Route, resolve the card and open the PCM. Device lock and stream lock
    /// held.
    fn start(&self, dev: &DeviceShared, state: &mut DeviceState, out: &mut OutState) -> HalResult<()> {
        let devices = self.devices();
        let direct = self.flags.contains(OutputFlags::DIRECT);

        let others = state
            .outputs
            .iter()
            .filter(|s| !std::ptr::eq(s.as_ref(), self) && s.devices() == devices && !s.is_standby());
        if direct {
            for other in others.filter(|s| !s.flags.contains(OutputFlags::DIRECT)) {
                log::info!("Direct output takes {} from {}", devices, other.describe());
                let mut other_out = other.lock();
                other.do_standby(dev, &mut other_out);
            }
        } else if !devices.is_only(AudioDevice::Bus) {
            let mut others = others;
            if others.next().is_some() {
                thread::sleep(BUSY_BACKOFF);
                log::warn!("Output {} busy", devices);
                return Err(HalError::Busy(devices));
            }
        }
        if !direct && dev.passthrough.load(Ordering::SeqCst) {
            thread::sleep(BUSY_BACKOFF);
            log::warn!("Passthrough active, output {} busy", devices);
            return Err(HalError::Busy(devices));
        }

        if state.mode != AudioMode::InCall {
            state.select_output();
        }

        let (card, pcm_device) = if devices.is_only(AudioDevice::Bus) {
            state.registry.card_for_bus(&self.address).ok_or_else(|| HalError::NoCard {
                what: format!("bus '{}'", self.address),
            })?
        } else if self.format == AudioFormat::Dsd {
            let card = state
                .registry
                .card_for_dsd()
                .ok_or_else(|| HalError::NoCard { what: "DSD".into() })?;
            (card, 0)
        } else {
            let card = state
                .registry
                .card_for_device(devices, Direction::Output)
                .ok_or_else(|| HalError::NoCard {
                    what: devices.to_string(),
                })?;
            (card, 0)
        };
        let sound_card = state.registry.get(card).ok_or_else(|| HalError::NoCard {
            what: format!("card idx {}", card),
        })?;

        log::info!(
            "Starting output {} on {} card{} device {}",
            self.describe(),
            sound_card.driver_name(),
            sound_card.index,
            pcm_device
        );
        let pcm = dev
            .backend
            .open_pcm(sound_card.index, pcm_device, Direction::Output, &out.config)
            .inspect_err(|e| log::error!("Cannot open output PCM: {}", e))?;

        out.pcm = Some(pcm);
        out.card = Some(card);
        out.pcm_device = pcm_device;
        out.keeps_route_in_call = sound_card.keeps_route_in_call;

        if self.uses_mixer_path() {
            if let Some(reference) = &state.echo_reference {
                out.echo_reference = Some(reference.clone());
            }
            if self.rate != out.config.rate {
                let stale = out
                    .resampler
                    .as_ref()
                    .is_none_or(|r| r.in_rate() != self.rate || r.out_rate() != out.config.rate);
                if stale {
                    out.resampler = Some(resampler::create_resampler(
                        self.rate,
                        out.config.rate,
                        out.config.channels,
                    )?);
                }
            }
            if let Some(r) = out.resampler.as_mut() {
                r.reset();
            }
        }

        self.standby.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Close the PCM, unless the device still needs it.
    fn do_standby(&self, dev: &DeviceShared, out: &mut OutState) {
        if out.pcm.is_none() {
            return;
        }
        if self.primary && dev.sco_rx_running.load(Ordering::SeqCst) {
            log::debug!("Primary output carries the SCO downlink, staying active");
            return;
        }
        if out.keeps_route_in_call && dev.in_call.load(Ordering::SeqCst) {
            log::debug!("Output keeps its path up during the call");
            return;
        }

        out.pcm = None;
        out.fail_count = 0;
        out.paused = false;
        if let Some(reference) = out.echo_reference.take() {
            reference.clear();
        }
        if dev.passthrough.load(Ordering::SeqCst) {
            out.written = 0;
        }
        self.standby.store(true, Ordering::SeqCst);
        log::info!("Output {} standby", self.describe());
    }

    pub fn standby(&self) -> HalResult<()> {
        let dev = self.device()?;
        let _state = dev.lock();
        let mut out = self.lock();
        self.do_standby(&dev, &mut out);
        Ok(())
    }

    pub(crate) fn close(&self, dev: &DeviceShared) {
        let mut out = self.lock();
        self.do_standby(dev, &mut out);
        out.resampler = None;
    }

    /// Open the PCM for the SCO downlink if the stream is in standby.
    pub(crate) fn start_for_sco(&self, dev: &DeviceShared, state: &mut DeviceState) -> HalResult<()> {
        let mut out = self.lock();
        if out.pcm.is_some() {
            return Ok(());
        }
        self.start(dev, state, &mut out)
    }

    /// Write SCO downlink frames straight to the PCM. Returns `false` when
    /// the stream has no PCM.
    pub(crate) fn write_sco_downlink(&self, data: &[u8]) -> Result<bool, PcmError> {
        let mut out = self.lock();
        match out.pcm.as_mut() {
            Some(pcm) => pcm::write_with_retry(pcm.as_mut(), data).map(|()| true),
            None => Ok(false),
        }
    }

    pub(crate) fn attach_echo_reference(&self, reference: Arc<EchoReference>) {
        self.lock().echo_reference = Some(reference);
    }

    pub(crate) fn detach_echo_reference(&self, reference: &Arc<EchoReference>) {
        let mut out = self.lock();
        if out.echo_reference.as_ref().is_some_and(|r| Arc::ptr_eq(r, reference)) {
            out.echo_reference = None;
        }
    }

    // ======================== Write path ========================

    /// Play a buffer of whole frames.
    ///
    /// Transfer failures are absorbed: the call sleeps for the buffer's
    /// duration and still reports the full length. A stream that cannot
    /// start returns the error after the same sleep.
    pub fn write(&self, buf: &[u8]) -> HalResult<usize> {
        let dev = self.device()?;
        let mut force_input_standby = false;

        let mut state = dev.lock();
        let mut out = self.lock();
        if out.pcm.is_none() {
            if let Err(e) = self.start(&dev, &mut state, &mut out) {
                drop(out);
                drop(state);
                thread::sleep(self.backoff(buf.len()));
                return Err(e);
            }
            force_input_standby = state.active_source == Some(AudioSource::VoiceCommunication);
        }
        drop(state);

        let result = self.transfer(&dev, &mut out, buf);
        out.written += (buf.len() / self.frame_size()) as u64;
        drop(out);

        if let Err(e) = result {
            log::warn!("Output write of {} bytes failed: {}", buf.len(), e);
            thread::sleep(self.backoff(buf.len()));
        }

        if force_input_standby {
            let mut state = dev.lock();
            if let Some(input) = state.active_input.clone() {
                log::info!("Restarting capture against the new echo path");
                input.standby_locked(&mut state);
            }
        }
        Ok(buf.len())
    }

    fn transfer(&self, dev: &DeviceShared, out: &mut OutState, buf: &[u8]) -> Result<(), PcmError> {
        let result = self.convert_and_write(out, buf);
        match result {
            Ok(()) => out.fail_count = 0,
            Err(_) => {
                out.fail_count += 1;
                if self.primary && out.fail_count > MAX_WRITE_FAILURES {
                    log::error!("Output failed {} writes in a row", out.fail_count);
                    self.do_standby(dev, out);
                }
            }
        }
        result
    }

    fn convert_and_write(&self, out: &mut OutState, buf: &[u8]) -> Result<(), PcmError> {
        let OutState {
            config,
            pcm,
            resampler,
            echo_reference,
            ..
        } = out;
        let Some(pcm) = pcm.as_mut() else {
            return Ok(());
        };
        let stream_channels = self.mask.channel_count();
        let mut data = Cow::Borrowed(buf);

        if config.channels == 1 && stream_channels == 2 && is_sco_output(self.devices()) {
            data = Cow::Owned(convert::fold_stereo_to_mono(&data));
        }
        if let Some(reference) = echo_reference {
            if self.format.bytes_per_sample() == 2 {
                reference.write(&convert::bytes_to_i16(buf), stream_channels);
            }
        }
        if config.channels > 2 {
            let sample = self.format.pcm_format().unwrap_or(config.format);
            convert::esai_reorder(data.to_mut(), config.channels, sample);
        }
        if self.passthrough_s24 {
            data = Cow::Owned(convert::expand_s16_to_s24(&data));
        }
        if let Some(r) = resampler {
            let samples = r.process(&convert::bytes_to_i16(&data));
            data = Cow::Owned(convert::i16_to_bytes(&samples));
        }

        pcm::write_with_retry(pcm.as_mut(), &data)
    }

    // ======================== Control ========================

    pub fn pause(&self) -> HalResult<()> {
        self.set_paused(true)
    }

    pub fn resume(&self) -> HalResult<()> {
        self.set_paused(false)
    }

    fn set_paused(&self, pause: bool) -> HalResult<()> {
        match self.pause_mode {
            PauseMode::Unsupported => Err(HalError::Unsupported),
            PauseMode::Placeholder => Err(HalError::NoData),
            PauseMode::Driver => {
                let mut out = self.lock();
                if out.paused == pause {
                    return Ok(());
                }
                let pcm = out
                    .pcm
                    .as_mut()
                    .ok_or(HalError::InvalidState("output not started"))?;
                pcm.pause(pause)?;
                out.paused = pause;
                log::info!("Output {}", if pause { "paused" } else { "resumed" });
                Ok(())
            }
        }
    }

    /// Drop queued frames and restart position counting.
    pub fn flush(&self) -> HalResult<()> {
        if !matches!(self.kind, OutputKind::Offload | OutputKind::EsaiMulti) {
            return Err(HalError::Unsupported);
        }
        let dev = self.device()?;
        let state = dev.lock();
        let mut out = self.lock();
        out.written = 0;
        out.paused = false;
        if out.pcm.take().is_none() {
            return Ok(());
        }

        let index = out.card.and_then(|c| state.registry.get(c)).map(|c| c.index);
        let reopened = match index {
            Some(index) => dev
                .backend
                .open_pcm(index, out.pcm_device, Direction::Output, &out.config)
                .map_err(HalError::from),
            None => Err(HalError::InvalidState("flushed output lost its card")),
        };
        match reopened {
            Ok(pcm) => {
                out.pcm = Some(pcm);
                log::info!("Output {} flushed", self.describe());
                Ok(())
            }
            Err(e) => {
                log::error!("Cannot reopen flushed output: {}", e);
                self.standby.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Move the stream to other devices. The primary output also moves the
    /// device's output selection.
    pub fn set_device(&self, devices: DeviceSet) -> HalResult<()> {
        let devices = devices.filter(Direction::Output);
        let dev = self.device()?;
        let mut state = dev.lock();
        if self.devices() == devices {
            return Ok(());
        }
        {
            let mut out = self.lock();
            self.do_standby(&dev, &mut out);
            if out.pcm.is_none() {
                out.card = None;
            }
        }
        self.devices.store(devices.bits(), Ordering::SeqCst);
        log::info!("Output {} moved to {}", self.describe(), devices);

        if self.primary && state.out_device != devices {
            state.out_device = devices;
            state.select_output();
        }
        Ok(())
    }

    /// Per-channel gain through the card's volume controls.
    pub fn set_volume(&self, left: f32, right: f32) -> HalResult<()> {
        let dev = self.device()?;
        let mut state = dev.lock();
        let card = {
            let mut out = self.lock();
            if out.card.is_none() {
                out.card = if self.format == AudioFormat::Dsd {
                    state.registry.card_for_dsd()
                } else {
                    state.registry.card_for_device(self.devices(), Direction::Output)
                };
            }
            out.card
        };
        let card = card.ok_or(HalError::Unsupported)?;
        let (l, r) = state.registry.set_output_volume(card, left, right)?;
        log::debug!("Output volume {}/{}", l, r);
        Ok(())
    }

    /// Answer `sup_channels`, `sup_sampling_rates` and `sup_formats`.
    pub fn get_parameters(&self, keys: &str) -> String {
        let query = Params::parse(keys);
        let mut reply = Params::new();
        for key in query.keys() {
            match key {
                params::KEY_SUP_CHANNELS => reply.add(key, self.mask.name()),
                params::KEY_SUP_SAMPLING_RATES => reply.add(key, self.rate),
                params::KEY_SUP_FORMATS => reply.add(key, self.format.name()),
                _ => {}
            }
        }
        reply.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_contain() {
        let flags = OutputFlags::DIRECT | OutputFlags::PRIMARY;
        assert!(flags.contains(OutputFlags::DIRECT));
        assert!(flags.contains(OutputFlags::DIRECT | OutputFlags::PRIMARY));
        assert!(!flags.contains(OutputFlags::COMPRESS_OFFLOAD));
        assert!(!flags.contains(OutputFlags::NONE));
        assert!(OutputFlags::NONE.is_none());
        assert_eq!(format!("{:?}", OutputFlags::HW_AV_SYNC), "OutputFlags(0x40)");
    }

    #[test]
    fn sco_output_sets() {
        assert!(is_sco_output(DeviceSet::single(AudioDevice::BtSco)));
        assert!(is_sco_output(DeviceSet::ALL_SCO_OUT));
        assert!(!is_sco_output(DeviceSet::EMPTY));
        assert!(!is_sco_output(DeviceSet::of(&[AudioDevice::BtSco, AudioDevice::Speaker])));
    }

    #[test]
    fn multichannel_defaults() {
        let mut config = OutputConfig::default();
        StreamOut::fill_multichannel_defaults(&mut config);
        assert_eq!(config.rate, 48000);
        assert_eq!(config.mask, ChannelMask::OUT_5POINT1);
        assert_eq!(config.format, AudioFormat::Pcm16Bit);
    }
}
