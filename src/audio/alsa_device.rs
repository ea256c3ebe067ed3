//! ALSA backend: PCMs as `hw:<card>,<device>` and mixers through the
//! simple-element API.

use alsa::mixer::{Selem, SelemChannelId, SelemId};
use alsa::pcm::{Access, Format, HwParams, PCM, State};
use alsa::ValueOr;

use super::device::Direction;
use super::error::{HalError, HalResult, PcmError};
use super::format::{PcmConfig, PcmFormat};
use super::mixer::Mixer;
use super::pcm::{AudioBackend, Pcm, PcmState};

const CHANNELS: [SelemChannelId; 2] = [SelemChannelId::FrontLeft, SelemChannelId::FrontRight];

fn alsa_format(format: PcmFormat) -> Format {
    match format {
        PcmFormat::S16Le => Format::S16LE,
        PcmFormat::S24Le => Format::S24LE,
        PcmFormat::S32Le => Format::S32LE,
    }
}

fn pcm_error(e: alsa::Error) -> PcmError {
    match e.errno().abs() {
        libc::EPIPE | libc::ESTRPIPE => PcmError::Xrun,
        libc::EBADFD => PcmError::NotPrepared,
        errno => PcmError::Io {
            errno,
            reason: e.to_string(),
        },
    }
}

fn mixer_error(e: alsa::Error) -> HalError {
    HalError::Mixer(e.to_string())
}

// ======================== PCM ========================

pub struct AlsaPcm {
    pcm: PCM,
    config: PcmConfig,
}

// A PCM handle is used by one thread at a time, under the owning stream's lock
unsafe impl Send for AlsaPcm {}

impl AlsaPcm {
    fn open(card: u32, device: u32, direction: Direction, config: &PcmConfig) -> Result<Self, PcmError> {
        let name = format!("hw:{},{}", card, device);
        let dir = match direction {
            Direction::Output => alsa::Direction::Playback,
            Direction::Input => alsa::Direction::Capture,
        };
        let open_err = |e: alsa::Error| PcmError::Open {
            card,
            device,
            reason: e.to_string(),
        };

        let pcm = PCM::new(&name, dir, false).map_err(open_err)?;
        {
            let hwp = HwParams::any(&pcm).map_err(open_err)?;
            hwp.set_access(Access::RWInterleaved).map_err(open_err)?;
            hwp.set_format(alsa_format(config.format)).map_err(open_err)?;
            hwp.set_channels(config.channels).map_err(open_err)?;
            hwp.set_rate(config.rate, ValueOr::Nearest).map_err(open_err)?;
            hwp.set_period_size_near(config.period_size as alsa::pcm::Frames, ValueOr::Nearest)
                .map_err(open_err)?;
            hwp.set_buffer_size_near((config.period_size * config.period_count) as alsa::pcm::Frames)
                .map_err(open_err)?;
            pcm.hw_params(&hwp).map_err(open_err)?;
        }

        let mut actual = *config;
        if let Ok(hwp) = pcm.hw_params_current() {
            if let Ok(rate) = hwp.get_rate() {
                actual.rate = rate;
            }
            if let Ok(ps) = hwp.get_period_size() {
                actual.period_size = ps as u32;
            }
        }
        log::info!("ALSA {} {:?}: {}", name, direction, actual);

        Ok(Self { pcm, config: actual })
    }
}

impl Pcm for AlsaPcm {
    fn config(&self) -> &PcmConfig {
        &self.config
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PcmError> {
        let frame = self.config.frame_bytes().max(1);
        let io = self.pcm.io_bytes();
        let mut offset = 0;
        while offset < data.len() {
            let frames = io.writei(&data[offset..]).map_err(pcm_error)?;
            offset += frames * frame;
        }
        Ok(())
    }

    fn read(&mut self, data: &mut [u8]) -> Result<(), PcmError> {
        let frame = self.config.frame_bytes().max(1);
        let io = self.pcm.io_bytes();
        let mut offset = 0;
        while offset < data.len() {
            let frames = io.readi(&mut data[offset..]).map_err(pcm_error)?;
            offset += frames * frame;
        }
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), PcmError> {
        self.pcm.prepare().map_err(pcm_error)
    }

    fn pause(&mut self, enable: bool) -> Result<(), PcmError> {
        self.pcm.pause(enable).map_err(pcm_error)
    }

    fn state(&self) -> PcmState {
        match self.pcm.state() {
            State::Open | State::Setup | State::Disconnected => PcmState::Setup,
            State::Prepared => PcmState::Prepared,
            State::Running | State::Draining => PcmState::Running,
            State::Paused | State::Suspended => PcmState::Paused,
            State::XRun => PcmState::Xrun,
        }
    }
}

// ======================== Mixer ========================

/// How a named control maps onto a simple element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlKind {
    Switch,
    Volume,
    Enum,
}

pub struct AlsaMixer {
    mixer: alsa::mixer::Mixer,
    card_name: String,
    driver_name: String,
}

// Mixer access is serialized by the device lock
unsafe impl Send for AlsaMixer {}

impl AlsaMixer {
    fn open(card: u32) -> HalResult<Self> {
        let alsa_card = alsa::card::Card::new(card as i32);
        let card_name = alsa_card.get_name().map_err(|e| HalError::NoCard {
            what: format!("card{}: {}", card, e),
        })?;
        let ctl = alsa::ctl::Ctl::from_card(&alsa_card, false).map_err(mixer_error)?;
        let driver_name = ctl
            .card_info()
            .and_then(|info| info.get_driver().map(str::to_string))
            .unwrap_or_else(|_| card_name.clone());
        let mixer = alsa::mixer::Mixer::new(&format!("hw:{}", card), false).map_err(mixer_error)?;
        Ok(Self {
            mixer,
            card_name,
            driver_name,
        })
    }

    /// Find the simple element behind a control name such as
    /// `"Headphone Switch"` or `"Capture Mux"`.
    fn find(&self, control: &str) -> Option<(Selem<'_>, ControlKind)> {
        if let Some(selem) = self.selem(control) {
            if selem.is_enumerated() {
                return Some((selem, ControlKind::Enum));
            }
        }
        let (base, kind) = if let Some(base) = control.strip_suffix(" Switch") {
            (base, ControlKind::Switch)
        } else if let Some(base) = control.strip_suffix(" Volume") {
            (base, ControlKind::Volume)
        } else {
            return self.selem(control).map(|s| (s, ControlKind::Volume));
        };
        let base = base
            .strip_suffix(" Playback")
            .or_else(|| base.strip_suffix(" Capture"))
            .unwrap_or(base);
        self.selem(base).map(|s| (s, kind))
    }

    fn selem(&self, name: &str) -> Option<Selem<'_>> {
        self.mixer.find_selem(&SelemId::new(name, 0))
    }
}

fn channels_of(selem: &Selem<'_>) -> Vec<SelemChannelId> {
    let capture = !selem.has_playback_volume() && !selem.has_playback_switch();
    CHANNELS
        .into_iter()
        .filter(|c| {
            if capture {
                selem.has_capture_channel(*c)
            } else {
                selem.has_playback_channel(*c)
            }
        })
        .collect()
}

impl Mixer for AlsaMixer {
    fn card_name(&self) -> &str {
        &self.card_name
    }

    fn driver_name(&self) -> &str {
        &self.driver_name
    }

    fn value_count(&self, control: &str) -> Option<u32> {
        let (selem, kind) = self.find(control)?;
        if kind == ControlKind::Enum {
            return Some(1);
        }
        Some((channels_of(&selem).len() as u32).max(1))
    }

    fn get_int(&self, control: &str, index: u32) -> HalResult<i32> {
        let (selem, kind) = self
            .find(control)
            .ok_or_else(|| HalError::MissingControl(control.to_string()))?;
        let channel = CHANNELS[(index as usize).min(CHANNELS.len() - 1)];
        let value = match kind {
            ControlKind::Switch if selem.has_playback_switch() => {
                selem.get_playback_switch(channel).map_err(mixer_error)?
            }
            ControlKind::Switch => selem.get_capture_switch(channel).map_err(mixer_error)?,
            ControlKind::Volume if selem.has_playback_volume() => {
                selem.get_playback_volume(channel).map_err(mixer_error)? as i32
            }
            ControlKind::Volume => selem.get_capture_volume(channel).map_err(mixer_error)? as i32,
            ControlKind::Enum => return Err(HalError::Mixer(format!("{} is enumerated", control))),
        };
        Ok(value)
    }

    fn set_int(&mut self, control: &str, index: u32, value: i32) -> HalResult<()> {
        let (selem, kind) = self
            .find(control)
            .ok_or_else(|| HalError::MissingControl(control.to_string()))?;
        let channel = CHANNELS[(index as usize).min(CHANNELS.len() - 1)];
        match kind {
            ControlKind::Switch if selem.has_playback_switch() => {
                selem.set_playback_switch(channel, value).map_err(mixer_error)
            }
            ControlKind::Switch => selem.set_capture_switch(channel, value).map_err(mixer_error),
            ControlKind::Volume if selem.has_playback_volume() => selem
                .set_playback_volume(channel, i64::from(value))
                .map_err(mixer_error),
            ControlKind::Volume => selem
                .set_capture_volume(channel, i64::from(value))
                .map_err(mixer_error),
            ControlKind::Enum => Err(HalError::Mixer(format!("{} is enumerated", control))),
        }
    }

    fn set_enum(&mut self, control: &str, item: &str) -> HalResult<()> {
        let (selem, kind) = self
            .find(control)
            .ok_or_else(|| HalError::MissingControl(control.to_string()))?;
        if kind != ControlKind::Enum {
            return Err(HalError::Mixer(format!("{} is not enumerated", control)));
        }
        let index = selem
            .iter_enum()
            .map_err(mixer_error)?
            .position(|name| matches!(name, Ok(ref n) if n == item))
            .ok_or_else(|| HalError::Mixer(format!("{} has no item '{}'", control, item)))?;
        selem
            .set_enum_item(SelemChannelId::mono(), index as u32)
            .map_err(mixer_error)
    }
}

// ======================== Backend ========================

/// Cards as the kernel exposes them.
#[derive(Debug, Default)]
pub struct AlsaBackend;

impl AlsaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for AlsaBackend {
    fn open_pcm(
        &self,
        card: u32,
        device: u32,
        direction: Direction,
        config: &PcmConfig,
    ) -> Result<Box<dyn Pcm>, PcmError> {
        Ok(Box::new(AlsaPcm::open(card, device, direction, config)?))
    }

    fn open_mixer(&self, card: u32) -> HalResult<Box<dyn Mixer>> {
        Ok(Box::new(AlsaMixer::open(card)?))
    }

    fn supports_format(&self, card: u32, device: u32, direction: Direction, format: PcmFormat) -> bool {
        let dir = match direction {
            Direction::Output => alsa::Direction::Playback,
            Direction::Input => alsa::Direction::Capture,
        };
        let Ok(pcm) = PCM::new(&format!("hw:{},{}", card, device), dir, false) else {
            return false;
        };
        HwParams::any(&pcm)
            .and_then(|hwp| hwp.set_format(alsa_format(format)))
            .is_ok()
    }
}
