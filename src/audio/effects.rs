//! Capture preprocessing contract and the shared echo reference.
//!
//! Effects are opaque: the HAL only calls [`Preprocessor::process`] on each
//! captured buffer. An effect that cancels echo also receives the frames
//! most recently played on the primary output.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Handle returned by `add_effect`.
pub type EffectId = u32;

/// A capture-side effect (AEC, NS, AGC, ...).
pub trait Preprocessor: Send {
    fn name(&self) -> &str;

    /// Whether this effect needs played-back frames as a reference.
    fn wants_echo_reference(&self) -> bool {
        false
    }

    /// Process interleaved 16-bit frames in place. `echo` holds one mono
    /// reference sample per frame when the effect asked for it.
    fn process(&mut self, frames: &mut [i16], channels: u32, echo: Option<&[i16]>);
}

/// Mono history of what the primary output played.
pub struct EchoReference {
    samples: Mutex<VecDeque<i16>>,
    capacity: usize,
}

impl EchoReference {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append played frames, keeping the newest `capacity` samples.
    pub fn write(&self, frames: &[i16], channels: u32) {
        let ch = channels.max(1) as usize;
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        for frame in frames.chunks_exact(ch) {
            let sum: i32 = frame.iter().map(|s| i32::from(*s)).sum();
            samples.push_back((sum / ch as i32) as i16);
        }
        let excess = samples.len().saturating_sub(self.capacity);
        samples.drain(..excess);
    }

    /// Take the oldest `frames` samples, zero-padded when short.
    pub fn read(&self, frames: usize) -> Vec<i16> {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let n = frames.min(samples.len());
        let mut out: Vec<i16> = samples.drain(..n).collect();
        out.resize(frames, 0);
        out
    }

    pub fn clear(&self) {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Noise suppression and AGC for new capture streams, when this build has
/// a preprocessor to offer.
pub fn denoise(frame_size: usize, rate: u32) -> Option<Box<dyn Preprocessor>> {
    #[cfg(feature = "speexdsp")]
    {
        match super::speex::SpeexDenoise::new(frame_size, rate) {
            Ok(p) => Some(Box::new(p)),
            Err(e) => {
                log::warn!("Denoise unavailable: {}", e);
                None
            }
        }
    }
    #[cfg(not(feature = "speexdsp"))]
    {
        log::debug!("Denoise requested ({} frames @ {} Hz) without speexdsp", frame_size, rate);
        None
    }
}
