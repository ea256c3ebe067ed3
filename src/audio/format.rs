//! Sample formats, channel masks and PCM configurations.

use std::fmt;

pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 48000;
pub const DEFAULT_OUTPUT_CHANNELS: u32 = 2;
pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 48000;
pub const DEFAULT_INPUT_CHANNELS: u32 = 2;

pub const LONG_PERIOD_SIZE: u32 = 192;
pub const PLAYBACK_LONG_PERIOD_COUNT: u32 = 8;
pub const HDMI_PERIOD_SIZE: u32 = 192;
pub const PLAYBACK_HDMI_PERIOD_COUNT: u32 = 8;
pub const ESAI_PERIOD_SIZE: u32 = 1024;
pub const PLAYBACK_ESAI_PERIOD_COUNT: u32 = 4;
pub const DSD_PERIOD_SIZE: u32 = 1024;
pub const PLAYBACK_DSD_PERIOD_COUNT: u32 = 8;
pub const CAPTURE_PERIOD_SIZE: u32 = 256;
pub const CAPTURE_PERIOD_COUNT: u32 = 32;

pub const DSD64_SAMPLING_RATE: u32 = 2_822_400;
pub const DSD_RATE_TO_PCM_RATE: u32 = 32;
/// Two channels of 32-bit DSD words.
pub const DSD_FRAMESIZE_BYTES: usize = 8;

/// Upper bound reported by `latency()`.
pub const LPA_LATENCY_MS: u32 = 300;

pub const SCO_RATE: u32 = 16000;

/// Sample layout the hardware runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PcmFormat {
    #[default]
    S16Le,
    /// 24 significant bits in a 32-bit little-endian container.
    S24Le,
    S32Le,
}

impl PcmFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            PcmFormat::S16Le => 2,
            PcmFormat::S24Le | PcmFormat::S32Le => 4,
        }
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            16 => Some(PcmFormat::S16Le),
            24 => Some(PcmFormat::S24Le),
            32 => Some(PcmFormat::S32Le),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            PcmFormat::S16Le => 16,
            PcmFormat::S24Le => 24,
            PcmFormat::S32Le => 32,
        }
    }
}

/// Sample format as the framework requests it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AudioFormat {
    #[default]
    Default,
    Pcm16Bit,
    Pcm8_24Bit,
    Pcm32Bit,
    Dsd,
}

impl AudioFormat {
    /// Hardware format carrying this framework format, if any.
    pub fn pcm_format(self) -> Option<PcmFormat> {
        match self {
            AudioFormat::Pcm16Bit => Some(PcmFormat::S16Le),
            AudioFormat::Pcm8_24Bit => Some(PcmFormat::S24Le),
            AudioFormat::Pcm32Bit | AudioFormat::Dsd => Some(PcmFormat::S32Le),
            AudioFormat::Default => None,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            AudioFormat::Pcm16Bit | AudioFormat::Default => 2,
            AudioFormat::Pcm8_24Bit | AudioFormat::Pcm32Bit => 4,
            // DSD has no proportional frame; the driver frame is handled separately
            AudioFormat::Dsd => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AudioFormat::Default => "AUDIO_FORMAT_DEFAULT",
            AudioFormat::Pcm16Bit => "AUDIO_FORMAT_PCM_16_BIT",
            AudioFormat::Pcm8_24Bit => "AUDIO_FORMAT_PCM_8_24_BIT",
            AudioFormat::Pcm32Bit => "AUDIO_FORMAT_PCM_32_BIT",
            AudioFormat::Dsd => "AUDIO_FORMAT_DSD",
        }
    }
}

/// Channel position bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelMask(u32);

impl ChannelMask {
    pub const NONE: ChannelMask = ChannelMask(0);

    pub const OUT_MONO: ChannelMask = ChannelMask(0x1);
    pub const OUT_STEREO: ChannelMask = ChannelMask(0x3);
    pub const OUT_QUAD: ChannelMask = ChannelMask(0x33);
    pub const OUT_5POINT1: ChannelMask = ChannelMask(0x3f);
    pub const OUT_7POINT1: ChannelMask = ChannelMask(0x63f);

    pub const IN_MONO: ChannelMask = ChannelMask(0x10);
    pub const IN_STEREO: ChannelMask = ChannelMask(0x30);

    pub const fn from_bits(bits: u32) -> Self {
        ChannelMask(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn channel_count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelMask::OUT_MONO => "AUDIO_CHANNEL_OUT_MONO",
            ChannelMask::OUT_STEREO => "AUDIO_CHANNEL_OUT_STEREO",
            ChannelMask::OUT_QUAD => "AUDIO_CHANNEL_OUT_QUAD",
            ChannelMask::OUT_5POINT1 => "AUDIO_CHANNEL_OUT_5POINT1",
            ChannelMask::OUT_7POINT1 => "AUDIO_CHANNEL_OUT_7POINT1",
            ChannelMask::IN_MONO => "AUDIO_CHANNEL_IN_MONO",
            ChannelMask::IN_STEREO => "AUDIO_CHANNEL_IN_STEREO",
            _ => "AUDIO_CHANNEL_NONE",
        }
    }

    /// Output mask for a channel count.
    pub fn out_for_count(count: u32) -> Self {
        match count {
            1 => ChannelMask::OUT_MONO,
            4 => ChannelMask::OUT_QUAD,
            6 => ChannelMask::OUT_5POINT1,
            8 => ChannelMask::OUT_7POINT1,
            _ => ChannelMask::OUT_STEREO,
        }
    }

    /// Input mask for a channel count.
    pub fn in_for_count(count: u32) -> Self {
        if count == 1 {
            ChannelMask::IN_MONO
        } else {
            ChannelMask::IN_STEREO
        }
    }
}

impl fmt::Debug for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelMask({:#x})", self.0)
    }
}

/// Configuration a PCM device is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmConfig {
    pub channels: u32,
    pub rate: u32,
    /// Frames per period.
    pub period_size: u32,
    pub period_count: u32,
    pub format: PcmFormat,
}

impl PcmConfig {
    pub const fn new(channels: u32, rate: u32, period_size: u32, period_count: u32, format: PcmFormat) -> Self {
        Self {
            channels,
            rate,
            period_size,
            period_count,
            format,
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.frame_bytes()
    }

    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        let frame = self.frame_bytes();
        if frame == 0 { 0 } else { bytes / frame }
    }

    pub fn period_bytes(&self) -> usize {
        self.frames_to_bytes(self.period_size as usize)
    }

    /// Buffered playback duration, capped at [`LPA_LATENCY_MS`].
    pub fn latency_ms(&self) -> u32 {
        if self.rate == 0 {
            return 0;
        }
        let ms = u64::from(self.period_count) * u64::from(self.period_size) * 1000
            / u64::from(self.rate);
        (ms as u32).min(LPA_LATENCY_MS)
    }

    /// Default primary output: 48 kHz stereo S16.
    pub const fn mm_out() -> Self {
        Self::new(
            DEFAULT_OUTPUT_CHANNELS,
            DEFAULT_OUTPUT_SAMPLE_RATE,
            LONG_PERIOD_SIZE,
            PLAYBACK_LONG_PERIOD_COUNT,
            PcmFormat::S16Le,
        )
    }

    pub const fn mm_in() -> Self {
        Self::new(
            DEFAULT_INPUT_CHANNELS,
            DEFAULT_INPUT_SAMPLE_RATE,
            CAPTURE_PERIOD_SIZE,
            CAPTURE_PERIOD_COUNT,
            PcmFormat::S16Le,
        )
    }

    pub const fn hdmi_multi() -> Self {
        Self::new(8, DEFAULT_OUTPUT_SAMPLE_RATE, HDMI_PERIOD_SIZE, PLAYBACK_HDMI_PERIOD_COUNT, PcmFormat::S16Le)
    }

    pub const fn esai_multi() -> Self {
        Self::new(8, DEFAULT_OUTPUT_SAMPLE_RATE, ESAI_PERIOD_SIZE, PLAYBACK_ESAI_PERIOD_COUNT, PcmFormat::S16Le)
    }

    pub const fn dsd() -> Self {
        Self::new(
            2,
            DSD64_SAMPLING_RATE / DSD_RATE_TO_PCM_RATE,
            DSD_PERIOD_SIZE,
            PLAYBACK_DSD_PERIOD_COUNT,
            PcmFormat::S32Le,
        )
    }

    pub const fn sco_out(rate: u32) -> Self {
        Self::new(1, rate, LONG_PERIOD_SIZE, PLAYBACK_LONG_PERIOD_COUNT, PcmFormat::S16Le)
    }

    pub const fn sco_in(rate: u32) -> Self {
        Self::new(1, rate, CAPTURE_PERIOD_SIZE, CAPTURE_PERIOD_COUNT, PcmFormat::S16Le)
    }
}

impl fmt::Display for PcmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate={}, ch={}, fmt={:?}, period={}x{}",
            self.rate, self.channels, self.format, self.period_size, self.period_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_is_capped() {
        assert_eq!(PcmConfig::mm_out().latency_ms(), 32);
        let long = PcmConfig::new(2, 48000, 48000, 8, PcmFormat::S16Le);
        assert_eq!(long.latency_ms(), LPA_LATENCY_MS);
    }

    #[test]
    fn frame_math() {
        let cfg = PcmConfig::new(2, 48000, 192, 8, PcmFormat::S24Le);
        assert_eq!(cfg.frame_bytes(), 8);
        assert_eq!(cfg.period_bytes(), 192 * 8);
        assert_eq!(cfg.bytes_to_frames(80), 10);
    }

    #[test]
    fn channel_counts() {
        assert_eq!(ChannelMask::OUT_5POINT1.channel_count(), 6);
        assert_eq!(ChannelMask::OUT_7POINT1.channel_count(), 8);
        assert_eq!(ChannelMask::IN_MONO.channel_count(), 1);
        assert_eq!(ChannelMask::out_for_count(6), ChannelMask::OUT_5POINT1);
    }

    #[test]
    fn dsd_pcm_rate() {
        assert_eq!(PcmConfig::dsd().rate, 88200);
    }
}
