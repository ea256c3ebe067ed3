//! audio - Card registry, routing, stream lifecycle and the SCO bridge
//!
//! The HAL core for i.MX boards: it resolves card descriptors against the
//! hardware, enables mixer paths for the selected devices, runs output and
//! input PCM streams with format/rate conversion, and bridges Bluetooth SCO
//! calls on dedicated real-time threads.

#[cfg(feature = "alsa")]
pub mod alsa_device;
pub mod card;
pub mod convert;
pub mod device;
pub mod effects;
pub mod error;
pub mod format;
mod hw;
pub mod mixer;
pub mod mock;
pub mod params;
pub mod pcm;
pub mod registry;
pub mod resampler;
pub mod router;
mod sco;
#[cfg(feature = "speexdsp")]
pub mod speex;
mod stream_in;
mod stream_out;

pub use card::{CardDescriptor, RoutePath, RouteSetting, RouteValue, load_descriptors};
pub use device::{AudioDevice, AudioMode, AudioSource, DeviceSet, Direction, TtyMode};
pub use error::{HalError, HalResult, PcmError};
pub use format::{AudioFormat, ChannelMask, PcmConfig, PcmFormat};
pub use hw::AudioHw;
pub use pcm::{AudioBackend, Pcm, PcmState};
pub use stream_in::{InputConfig, StreamIn};
pub use stream_out::{OutputConfig, OutputFlags, StreamOut};

/// Runtime settings the HAL is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalSettings {
    /// Board name; selects card ordering and passthrough quirks.
    pub board_name: String,
    /// Highest card index probed, exclusive.
    pub max_cards: u32,
    pub playback_period_size: u32,
    pub playback_period_count: u32,
    pub capture_period_size: u32,
    pub capture_period_count: u32,
    /// Initial Bluetooth SCO rate.
    pub sco_rate: u32,
    /// Attach noise suppression to every new capture stream.
    pub denoise: bool,
}

impl Default for HalSettings {
    fn default() -> Self {
        Self {
            board_name: String::new(),
            max_cards: 8,
            playback_period_size: format::LONG_PERIOD_SIZE,
            playback_period_count: format::PLAYBACK_LONG_PERIOD_COUNT,
            capture_period_size: format::CAPTURE_PERIOD_SIZE,
            capture_period_count: format::CAPTURE_PERIOD_COUNT,
            sco_rate: format::SCO_RATE,
            denoise: false,
        }
    }
}
