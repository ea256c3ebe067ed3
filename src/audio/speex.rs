//! SpeexDSP resampler and denoise/AGC preprocessor.

use std::ffi::{c_int, c_void};

use super::effects::Preprocessor;
use super::error::{HalError, HalResult};
use super::resampler::Resampler;

// ======================== FFI declarations ========================

#[repr(C)]
pub struct SpeexPreprocessState {
    _private: [u8; 0],
}

#[repr(C)]
pub struct SpeexResamplerState {
    _private: [u8; 0],
}

const SPEEX_PREPROCESS_SET_DENOISE: c_int = 0;
const SPEEX_PREPROCESS_SET_AGC: c_int = 2;
const SPEEX_PREPROCESS_SET_AGC_LEVEL: c_int = 6;
const SPEEX_PREPROCESS_SET_NOISE_SUPPRESS: c_int = 8;

const SPEEX_RESAMPLER_QUALITY_DEFAULT: c_int = 4;
const RESAMPLER_ERR_SUCCESS: c_int = 0;

unsafe extern "C" {
    fn speex_preprocess_state_init(frame_size: c_int, sampling_rate: c_int)
        -> *mut SpeexPreprocessState;
    fn speex_preprocess_state_destroy(st: *mut SpeexPreprocessState);
    fn speex_preprocess_run(st: *mut SpeexPreprocessState, x: *mut i16) -> c_int;
    fn speex_preprocess_ctl(
        st: *mut SpeexPreprocessState,
        request: c_int,
        ptr: *mut c_void,
    ) -> c_int;

    fn speex_resampler_init(
        nb_channels: u32,
        in_rate: u32,
        out_rate: u32,
        quality: c_int,
        err: *mut c_int,
    ) -> *mut SpeexResamplerState;
    fn speex_resampler_destroy(st: *mut SpeexResamplerState);
    fn speex_resampler_process_interleaved_int(
        st: *mut SpeexResamplerState,
        in_: *const i16,
        in_len: *mut u32,
        out: *mut i16,
        out_len: *mut u32,
    ) -> c_int;
    fn speex_resampler_reset_mem(st: *mut SpeexResamplerState) -> c_int;
}

// ======================== Preprocessor (denoise + AGC) ========================

/// Noise suppression and AGC on mono frames of a fixed size. Multichannel
/// input is processed on its first channel.
pub struct SpeexDenoise {
    state: *mut SpeexPreprocessState,
    frame_size: usize,
    scratch: Vec<i16>,
}

// SpeexPreprocessState is only touched under the owning stream's lock
unsafe impl Send for SpeexDenoise {}

impl SpeexDenoise {
    pub fn new(frame_size: usize, sample_rate: u32) -> HalResult<Self> {
        let state = unsafe { speex_preprocess_state_init(frame_size as c_int, sample_rate as c_int) };
        if state.is_null() {
            return Err(HalError::BadParameter(format!(
                "speex preprocessor for {} frames @ {} Hz",
                frame_size, sample_rate
            )));
        }
        let mut pp = Self {
            state,
            frame_size,
            scratch: vec![0; frame_size],
        };
        pp.ctl_int(SPEEX_PREPROCESS_SET_DENOISE, 1);
        pp.ctl_int(SPEEX_PREPROCESS_SET_NOISE_SUPPRESS, -25);
        pp.ctl_int(SPEEX_PREPROCESS_SET_AGC, 1);
        let mut level: f32 = 24000.0;
        unsafe {
            speex_preprocess_ctl(
                pp.state,
                SPEEX_PREPROCESS_SET_AGC_LEVEL,
                &mut level as *mut f32 as *mut c_void,
            );
        }
        Ok(pp)
    }

    fn ctl_int(&mut self, request: c_int, value: c_int) {
        let mut val = value;
        unsafe {
            speex_preprocess_ctl(self.state, request, &mut val as *mut c_int as *mut c_void);
        }
    }
}

impl Preprocessor for SpeexDenoise {
    fn name(&self) -> &str {
        "speex-ns-agc"
    }

    fn process(&mut self, frames: &mut [i16], channels: u32, _echo: Option<&[i16]>) {
        let ch = channels.max(1) as usize;
        for block in frames.chunks_exact_mut(self.frame_size * ch) {
            for (dst, frame) in self.scratch.iter_mut().zip(block.chunks_exact(ch)) {
                *dst = frame[0];
            }
            unsafe {
                speex_preprocess_run(self.state, self.scratch.as_mut_ptr());
            }
            for (frame, src) in block.chunks_exact_mut(ch).zip(&self.scratch) {
                frame.fill(*src);
            }
        }
    }
}

impl Drop for SpeexDenoise {
    fn drop(&mut self) {
        unsafe {
            speex_preprocess_state_destroy(self.state);
        }
    }
}

// ======================== Resampler ========================

pub struct SpeexResampler {
    state: *mut SpeexResamplerState,
    channels: u32,
    in_rate: u32,
    out_rate: u32,
}

unsafe impl Send for SpeexResampler {}

impl SpeexResampler {
    pub fn new(channels: u32, in_rate: u32, out_rate: u32) -> HalResult<Self> {
        let mut err: c_int = 0;
        let state = unsafe {
            speex_resampler_init(
                channels,
                in_rate,
                out_rate,
                SPEEX_RESAMPLER_QUALITY_DEFAULT,
                &mut err,
            )
        };
        if err != RESAMPLER_ERR_SUCCESS || state.is_null() {
            return Err(HalError::BadParameter(format!(
                "speex resampler {} -> {} Hz: err={}",
                in_rate, out_rate, err
            )));
        }
        Ok(Self {
            state,
            channels,
            in_rate,
            out_rate,
        })
    }
}

impl Resampler for SpeexResampler {
    fn in_rate(&self) -> u32 {
        self.in_rate
    }

    fn out_rate(&self) -> u32 {
        self.out_rate
    }

    fn channels(&self) -> u32 {
        self.channels
    }

    fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let ch = self.channels.max(1) as usize;
        let frames = input.len() / ch;
        let mut output = vec![0i16; (self.output_frames(frames) + 16) * ch];
        let mut in_len = frames as u32;
        let mut out_len = (output.len() / ch) as u32;
        let err = unsafe {
            speex_resampler_process_interleaved_int(
                self.state,
                input.as_ptr(),
                &mut in_len,
                output.as_mut_ptr(),
                &mut out_len,
            )
        };
        if err != RESAMPLER_ERR_SUCCESS {
            log::warn!("Speex resampler error: {}", err);
            return Vec::new();
        }
        output.truncate(out_len as usize * ch);
        output
    }

    fn reset(&mut self) {
        unsafe {
            speex_resampler_reset_mem(self.state);
        }
    }
}

impl Drop for SpeexResampler {
    fn drop(&mut self) {
        unsafe {
            speex_resampler_destroy(self.state);
        }
    }
}
