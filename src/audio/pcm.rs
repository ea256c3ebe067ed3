//! PCM device protocol and the backends that provide it.
//!
//! A [`Pcm`] is one opened hardware stream; an [`AudioBackend`] opens PCMs
//! and mixers by card index. The ALSA backend lives in `alsa_device`, the
//! in-memory one in `mock`.

use super::device::Direction;
use super::error::{HalResult, PcmError};
use super::format::{PcmConfig, PcmFormat};
use super::mixer::Mixer;

/// Driver-side state of an opened PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmState {
    /// Configured but not prepared.
    Setup,
    Prepared,
    Running,
    Paused,
    Xrun,
}

/// One opened PCM stream. Buffers are interleaved frames in the configured
/// format; a call transfers the whole buffer or fails.
pub trait Pcm: Send {
    fn config(&self) -> &PcmConfig;

    fn write(&mut self, data: &[u8]) -> Result<(), PcmError>;

    fn read(&mut self, data: &mut [u8]) -> Result<(), PcmError>;

    fn prepare(&mut self) -> Result<(), PcmError>;

    fn pause(&mut self, enable: bool) -> Result<(), PcmError>;

    fn state(&self) -> PcmState;
}

/// Opens PCMs and mixers on physical cards.
pub trait AudioBackend: Send + Sync {
    fn open_pcm(
        &self,
        card: u32,
        device: u32,
        direction: Direction,
        config: &PcmConfig,
    ) -> Result<Box<dyn Pcm>, PcmError>;

    /// Fails when no card exists at this index.
    fn open_mixer(&self, card: u32) -> HalResult<Box<dyn Mixer>>;

    /// Whether the hardware accepts `format` on this PCM.
    fn supports_format(&self, card: u32, device: u32, direction: Direction, format: PcmFormat) -> bool;
}

fn needs_recovery(pcm: &dyn Pcm, err: &PcmError) -> bool {
    err.is_transient() || matches!(pcm.state(), PcmState::Setup | PcmState::Xrun)
}

/// Write a buffer, recovering once from an xrun.
///
/// A transient failure gets one `prepare` and one retry; the retry's result
/// is returned. Any other failure is returned as is.
pub fn write_with_retry(pcm: &mut dyn Pcm, data: &[u8]) -> Result<(), PcmError> {
    match pcm.write(data) {
        Err(e) if needs_recovery(pcm, &e) => {
            log::warn!("PCM write of {} bytes failed: {}, preparing", data.len(), e);
            pcm.prepare()?;
            pcm.write(data)
        }
        other => other,
    }
}

/// Read counterpart of [`write_with_retry`].
pub fn read_with_retry(pcm: &mut dyn Pcm, data: &mut [u8]) -> Result<(), PcmError> {
    match pcm.read(data) {
        Err(e) if needs_recovery(pcm, &e) => {
            log::warn!("PCM read of {} bytes failed: {}, preparing", data.len(), e);
            pcm.prepare()?;
            pcm.read(data)
        }
        other => other,
    }
}

/// Caller-side back-off after a failed transfer: the time the buffer would
/// have taken to play.
pub fn buffer_duration(bytes: usize, config: &PcmConfig) -> std::time::Duration {
    let frame = config.frame_bytes();
    if frame == 0 || config.rate == 0 {
        return std::time::Duration::ZERO;
    }
    let micros = bytes as u64 * 1_000_000 / frame as u64 / u64::from(config.rate);
    std::time::Duration::from_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockPcm;

    #[test]
    fn xrun_gets_one_prepare_and_one_retry() {
        let mut pcm = MockPcm::new(PcmConfig::mm_out());
        pcm.inject_errors(&[PcmError::Xrun]);

        write_with_retry(&mut pcm, &[0u8; 64]).unwrap();
        assert_eq!(pcm.prepare_count(), 1);
        assert_eq!(pcm.write_calls(), 2);
        assert_eq!(pcm.bytes_written(), 64);
    }

    #[test]
    fn retry_failure_is_returned() {
        let mut pcm = MockPcm::new(PcmConfig::mm_out());
        pcm.inject_errors(&[PcmError::Xrun, PcmError::Xrun]);

        assert_eq!(write_with_retry(&mut pcm, &[0u8; 8]), Err(PcmError::Xrun));
        assert_eq!(pcm.prepare_count(), 1);
        assert_eq!(pcm.write_calls(), 2);
    }

    #[test]
    fn fatal_error_is_not_retried() {
        let mut pcm = MockPcm::new(PcmConfig::mm_in());
        let eio = PcmError::Io {
            errno: libc::EIO,
            reason: "gone".into(),
        };
        pcm.inject_errors(&[eio.clone()]);

        let mut buf = [0u8; 16];
        assert_eq!(read_with_retry(&mut pcm, &mut buf), Err(eio));
        assert_eq!(pcm.prepare_count(), 0);
        assert_eq!(pcm.read_calls(), 1);
    }

    #[test]
    fn buffer_duration_matches_rate() {
        // 48 kHz stereo S16: 192 frames = 4 ms
        let d = buffer_duration(192 * 4, &PcmConfig::mm_out());
        assert_eq!(d.as_micros(), 4000);
    }
}
