//! Error types for the HAL core.
//!
//! - [`PcmError`]: failures reported by a PCM device, split into transient
//!   conditions the stream recovers from locally and everything else.
//! - [`HalError`]: what the HAL surface returns to its caller.

use super::device::DeviceSet;
use super::format::{AudioFormat, ChannelMask};

/// Errors from a PCM device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PcmError {
    /// Underrun on playback or overrun on capture.
    #[error("xrun")]
    Xrun,

    /// The device left the prepared state and must be prepared again.
    #[error("PCM not prepared")]
    NotPrepared,

    /// The PCM device could not be opened with the requested configuration.
    #[error("cannot open PCM card {card} device {device}: {reason}")]
    Open {
        card: u32,
        device: u32,
        reason: String,
    },

    /// Any other driver error, with its errno.
    #[error("PCM I/O error {errno}: {reason}")]
    Io { errno: i32, reason: String },
}

impl PcmError {
    /// Whether a single prepare-and-retry may clear this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, PcmError::Xrun | PcmError::NotPrepared)
    }
}

/// Errors from the descriptor loader.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed descriptor {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("descriptor '{driver}': {reason}")]
    Invalid { driver: String, reason: String },
}

/// Errors returned by the HAL surface.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    /// No resolved card serves the requested device or capability.
    #[error("no sound card for {what}")]
    NoCard { what: String },

    /// Stream configuration rejected; carries the values the HAL would accept.
    #[error("unsupported stream config (rate {rate}, mask {mask:?}, format {format:?})")]
    InvalidArgument {
        rate: u32,
        mask: ChannelMask,
        format: AudioFormat,
    },

    /// A malformed parameter or argument.
    #[error("invalid parameter: {0}")]
    BadParameter(String),

    #[error("operation not supported")]
    Unsupported,

    /// The output or input path is claimed by another stream.
    #[error("device {0} busy")]
    Busy(DeviceSet),

    #[error("primary output already open")]
    AlreadyExists,

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Returned by the placeholder pause/resume of streams that cannot pause.
    #[error("no data")]
    NoData,

    #[error("mixer control '{0}' not found")]
    MissingControl(String),

    #[error("mixer error: {0}")]
    Mixer(String),

    #[error(transparent)]
    Pcm(#[from] PcmError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("cannot spawn thread: {0}")]
    Thread(#[from] std::io::Error),
}

impl HalError {
    /// Negative errno equivalent, as the framework ABI reports it.
    pub fn errno(&self) -> i32 {
        match self {
            HalError::NoCard { .. }
            | HalError::InvalidArgument { .. }
            | HalError::BadParameter(_)
            | HalError::MissingControl(_)
            | HalError::Descriptor(_) => -libc::EINVAL,
            HalError::Unsupported => -libc::ENOSYS,
            HalError::Busy(_) => -libc::EBUSY,
            HalError::AlreadyExists => -libc::EEXIST,
            HalError::InvalidState(_) => -libc::ENOSYS,
            HalError::NoData => -libc::ENODATA,
            HalError::Mixer(_) => -libc::EIO,
            HalError::Pcm(PcmError::Xrun) => -libc::EPIPE,
            HalError::Pcm(PcmError::NotPrepared) => -libc::EBADFD,
            HalError::Pcm(PcmError::Open { .. }) => -libc::ENOMEM,
            HalError::Pcm(PcmError::Io { errno, .. }) => -errno.abs(),
            HalError::Thread(_) => -libc::EAGAIN,
        }
    }
}

pub type HalResult<T> = Result<T, HalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(PcmError::Xrun.is_transient());
        assert!(PcmError::NotPrepared.is_transient());
        assert!(
            !PcmError::Io {
                errno: 5,
                reason: "EIO".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(HalError::Busy(DeviceSet::EMPTY).errno(), -libc::EBUSY);
        assert_eq!(HalError::AlreadyExists.errno(), -libc::EEXIST);
        assert_eq!(HalError::from(PcmError::Xrun).errno(), -libc::EPIPE);
    }
}
