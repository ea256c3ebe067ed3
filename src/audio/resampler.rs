//! Sample rate conversion for interleaved 16-bit frames.
//!
//! The default converter wraps rubato's polynomial resampler. rubato works
//! on fixed input chunks, so frames short of a chunk are kept for the next
//! call and a stream resampled in period-sized pieces has no seams. With
//! the `speexdsp` feature, [`create_resampler`] returns the SpeexDSP
//! resampler instead.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};

use super::error::{HalError, HalResult};

/// A stateful rate converter keyed by (source rate, destination rate,
/// channels).
pub trait Resampler: Send {
    fn in_rate(&self) -> u32;

    fn out_rate(&self) -> u32;

    fn channels(&self) -> u32;

    /// Convert interleaved frames, returning the produced frames.
    fn process(&mut self, input: &[i16]) -> Vec<i16>;

    /// Forget history; the next call starts a fresh stream.
    fn reset(&mut self);

    /// Input frames consumed per step; shorter input waits for more.
    fn input_granularity(&self) -> usize {
        1
    }

    /// Output frames expected for `frames` input frames.
    fn output_frames(&self, frames: usize) -> usize {
        (frames as u64 * u64::from(self.out_rate()) / u64::from(self.in_rate().max(1))) as usize
    }
}

/// Build the resampler for this build configuration.
pub fn create_resampler(in_rate: u32, out_rate: u32, channels: u32) -> HalResult<Box<dyn Resampler>> {
    log::debug!("Resampler {} -> {} Hz, {} ch", in_rate, out_rate, channels);
    #[cfg(feature = "speexdsp")]
    {
        Ok(Box::new(super::speex::SpeexResampler::new(channels, in_rate, out_rate)?))
    }
    #[cfg(not(feature = "speexdsp"))]
    {
        Ok(Box::new(RubatoResampler::new(in_rate, out_rate, channels)?))
    }
}

// ======================== rubato ========================

/// Input frames per rubato chunk: one millisecond of the source rate.
fn chunk_frames(in_rate: u32) -> usize {
    (in_rate / 1000).max(1) as usize
}

fn to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

pub struct RubatoResampler {
    inner: FastFixedIn<f32>,
    in_rate: u32,
    out_rate: u32,
    channels: usize,
    /// Interleaved input not yet handed to rubato.
    pending: Vec<i16>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
}

impl RubatoResampler {
    pub fn new(in_rate: u32, out_rate: u32, channels: u32) -> HalResult<Self> {
        if in_rate == 0 || out_rate == 0 {
            return Err(HalError::BadParameter(format!(
                "resampler {} -> {} Hz",
                in_rate, out_rate
            )));
        }
        let channels = channels.max(1) as usize;
        let inner = FastFixedIn::<f32>::new(
            f64::from(out_rate) / f64::from(in_rate),
            1.1,
            PolynomialDegree::Cubic,
            chunk_frames(in_rate),
            channels,
        )
        .map_err(|e| HalError::BadParameter(format!("resampler {} -> {} Hz: {}", in_rate, out_rate, e)))?;
        let input = inner.input_buffer_allocate(true);
        let output = inner.output_buffer_allocate(true);
        Ok(Self {
            inner,
            in_rate,
            out_rate,
            channels,
            pending: Vec::new(),
            input,
            output,
        })
    }
}

impl Resampler for RubatoResampler {
    fn in_rate(&self) -> u32 {
        self.in_rate
    }

    fn out_rate(&self) -> u32 {
        self.out_rate
    }

    fn channels(&self) -> u32 {
        self.channels as u32
    }

    fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let ch = self.channels;
        let frames = input.len() / ch;
        if self.in_rate == self.out_rate {
            return input[..frames * ch].to_vec();
        }
        self.pending.extend_from_slice(&input[..frames * ch]);

        let mut out = Vec::with_capacity((self.output_frames(frames) + 1) * ch);
        let mut consumed = 0;
        loop {
            let need = self.inner.input_frames_next();
            if self.pending.len() - consumed < need * ch {
                break;
            }
            let chunk = &self.pending[consumed..consumed + need * ch];
            for (i, frame) in chunk.chunks_exact(ch).enumerate() {
                for (c, sample) in frame.iter().enumerate() {
                    self.input[c][i] = to_f32(*sample);
                }
            }
            match self.inner.process_into_buffer(&self.input, &mut self.output, None) {
                Ok((used, produced)) => {
                    consumed += used * ch;
                    for i in 0..produced {
                        out.extend(self.output.iter().map(|channel| to_i16(channel[i])));
                    }
                }
                Err(e) => {
                    log::warn!("Resampler {} -> {} Hz failed: {}", self.in_rate, self.out_rate, e);
                    self.pending.clear();
                    return out;
                }
            }
        }
        self.pending.drain(..consumed);
        out
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.pending.clear();
    }

    fn input_granularity(&self) -> usize {
        chunk_frames(self.in_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, channels: usize) -> Vec<i16> {
        (0..frames * channels).map(|i| ((i * 37) % 2000) as i16).collect()
    }

    #[test]
    fn same_rate_is_a_copy() {
        let mut r = RubatoResampler::new(48000, 48000, 2).unwrap();
        assert_eq!(r.process(&[1, 2, 3, 4, 5]), [1, 2, 3, 4]);
    }

    #[test]
    fn zero_rate_is_refused() {
        assert!(matches!(RubatoResampler::new(0, 48000, 1), Err(HalError::BadParameter(_))));
    }

    #[test]
    fn downsample_keeps_the_ratio() {
        let mut r = RubatoResampler::new(48000, 16000, 1).unwrap();
        let out = r.process(&vec![500i16; 4800]);
        assert!((1596..=1604).contains(&out.len()), "{} frames", out.len());
    }

    #[test]
    fn constant_signal_survives_conversion() {
        let mut r = RubatoResampler::new(16000, 48000, 2).unwrap();
        let out = r.process(&[1000i16, -1000].repeat(1600));
        // skip the filter's start-up
        for frame in out[out.len() / 2..].chunks_exact(2) {
            assert!((i32::from(frame[0]) - 1000).abs() <= 1);
            assert!((i32::from(frame[1]) + 1000).abs() <= 1);
        }
    }

    #[test]
    fn split_input_matches_whole() {
        let samples = ramp(960, 2);

        let mut whole = RubatoResampler::new(44100, 48000, 2).unwrap();
        let expected = whole.process(&samples);

        let mut split = RubatoResampler::new(44100, 48000, 2).unwrap();
        let mut got = split.process(&samples[..333 * 2]);
        got.extend(split.process(&samples[333 * 2..]));

        assert_eq!(expected, got);
    }

    #[test]
    fn short_input_is_held_for_the_next_call() {
        let mut r = RubatoResampler::new(48000, 16000, 1).unwrap();
        assert!(r.process(&[100i16; 10]).is_empty());
        assert!(!r.process(&[100i16; 38]).is_empty());
    }

    #[test]
    fn granularity_is_one_millisecond() {
        let r = RubatoResampler::new(44100, 48000, 2).unwrap();
        assert_eq!(r.input_granularity(), 44);
    }

    #[test]
    fn reset_forgets_history() {
        let mut r = RubatoResampler::new(16000, 48000, 1).unwrap();
        let first = r.process(&ramp(200, 1));
        r.process(&ramp(7, 1));
        r.reset();
        assert_eq!(r.process(&ramp(200, 1)), first);
    }

    #[test]
    fn output_frame_estimate() {
        let r = RubatoResampler::new(16000, 48000, 1).unwrap();
        assert_eq!(r.output_frames(160), 480);
    }
}
