//! Sample conversions between what a stream carries and what the hardware
//! runs. Buffers are interleaved little-endian PCM.

use std::borrow::Cow;

use super::format::PcmFormat;

pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

pub fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn read_sample(bytes: &[u8], format: PcmFormat) -> i32 {
    match format {
        PcmFormat::S16Le => i32::from(i16::from_le_bytes([bytes[0], bytes[1]])),
        PcmFormat::S24Le | PcmFormat::S32Le => {
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        }
    }
}

fn to_s16(sample: i32, format: PcmFormat) -> i16 {
    match format {
        PcmFormat::S16Le => sample as i16,
        PcmFormat::S24Le => (sample >> 8) as i16,
        PcmFormat::S32Le => (sample >> 16) as i16,
    }
}

/// Mix two samples down to one 16-bit sample without overflow.
fn fold(l: i32, r: i32, format: PcmFormat) -> i16 {
    let mixed = match format {
        PcmFormat::S16Le => (l >> 1) + (r >> 1),
        PcmFormat::S24Le => ((l << 8) >> 17) + ((r << 8) >> 17),
        PcmFormat::S32Le => (l >> 17) + (r >> 17),
    };
    mixed as i16
}

/// Convert captured frames to 16-bit with `out_channels` channels.
///
/// Handles one bit-depth step (24→16, 32→16) and one channel step
/// (stereo→mono, mono→stereo). When neither applies the input is returned
/// without a copy.
pub fn convert_record_data(
    input: &[u8],
    format: PcmFormat,
    in_channels: u32,
    out_channels: u32,
) -> Cow<'_, [u8]> {
    if format == PcmFormat::S16Le && in_channels == out_channels {
        return Cow::Borrowed(input);
    }

    let sample_bytes = format.bytes_per_sample();
    let frame_bytes = sample_bytes * in_channels as usize;
    if frame_bytes == 0 {
        return Cow::Borrowed(input);
    }

    let frames = input.len() / frame_bytes;
    let mut out = Vec::with_capacity(frames * out_channels as usize * 2);
    for frame in input.chunks_exact(frame_bytes) {
        let sample = |ch: usize| read_sample(&frame[ch * sample_bytes..], format);
        match (in_channels, out_channels) {
            (2, 1) => {
                out.extend_from_slice(&fold(sample(0), sample(1), format).to_le_bytes());
            }
            (1, 2) => {
                let s = to_s16(sample(0), format).to_le_bytes();
                out.extend_from_slice(&s);
                out.extend_from_slice(&s);
            }
            _ => {
                for ch in 0..out_channels.min(in_channels) as usize {
                    out.extend_from_slice(&to_s16(sample(ch), format).to_le_bytes());
                }
            }
        }
    }
    Cow::Owned(out)
}

/// Fold stereo 16-bit to mono for a Bluetooth SCO link.
pub fn fold_stereo_to_mono(input: &[u8]) -> Vec<u8> {
    input
        .chunks_exact(4)
        .flat_map(|f| {
            let l = i32::from(i16::from_le_bytes([f[0], f[1]]));
            let r = i32::from(i16::from_le_bytes([f[2], f[3]]));
            fold(l, r, PcmFormat::S16Le).to_le_bytes()
        })
        .collect()
}

/// Duplicate mono 16-bit samples into stereo frames.
pub fn mono_to_stereo(input: &[u8]) -> Vec<u8> {
    input
        .chunks_exact(2)
        .flat_map(|s| [s[0], s[1], s[0], s[1]])
        .collect()
}

/// Widen 16-bit samples into a 32-bit container with 24 significant bits.
pub fn expand_s16_to_s24(input: &[u8]) -> Vec<u8> {
    input
        .chunks_exact(2)
        .flat_map(|s| (i32::from(i16::from_le_bytes([s[0], s[1]])) << 8).to_le_bytes())
        .collect()
}

// ======================== ESAI channel order ========================

/// (FL,FR,C,LFE,BL,BR) → (FL,BL,C,FR,BR,LFE)
const ESAI_ORDER_6: [usize; 6] = [0, 4, 2, 1, 5, 3];
/// (FL,FR,C,LFE,BL,BR,SL,SR) → (FL,BL,C,SL,FR,BR,LFE,SR)
const ESAI_ORDER_8: [usize; 8] = [0, 4, 2, 6, 1, 5, 3, 7];

/// Reorder multichannel frames in place for the ESAI serial interface.
///
/// Only 6 and 8 channels are reordered; other counts are left untouched.
pub fn esai_reorder(buf: &mut [u8], channels: u32, format: PcmFormat) {
    let order: &[usize] = match channels {
        6 => &ESAI_ORDER_6,
        8 => &ESAI_ORDER_8,
        _ => return,
    };
    let size = format.bytes_per_sample();
    let frame_bytes = size * order.len();
    let mut tmp = [0u8; 32];

    for frame in buf.chunks_exact_mut(frame_bytes) {
        tmp[..frame_bytes].copy_from_slice(frame);
        for (dst, src) in order.iter().enumerate() {
            frame[dst * size..(dst + 1) * size].copy_from_slice(&tmp[src * size..(src + 1) * size]);
        }
    }
}

// ======================== S/PDIF rate ========================

const SPDIF_RATES: [u32; 13] = [
    0, 8000, 11025, 16000, 22050, 32000, 44100, 48000, 64000, 88200, 96000, 176400, 196000,
];

/// Snap a measured S/PDIF receiver rate to the standard rate whose
/// neighbourhood (bounded by midpoints) contains it.
pub fn snap_spdif_rate(rate: u32) -> u32 {
    SPDIF_RATES
        .windows(2)
        .find(|w| rate <= (w[0] + w[1]) / 2)
        .map(|w| w[0])
        .unwrap_or(SPDIF_RATES[SPDIF_RATES.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn s16(samples: &[i16]) -> Vec<u8> {
        i16_to_bytes(samples)
    }

    fn s32(samples: &[i32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn sco_fold_averages_channels() {
        let out = fold_stereo_to_mono(&s16(&[100, 300, -200, -400]));
        assert_eq!(bytes_to_i16(&out), [200, -300]);
    }

    #[test]
    fn esai_reorders_six_channels() {
        let mut buf = s16(&[1, 2, 3, 4, 5, 6]);
        esai_reorder(&mut buf, 6, PcmFormat::S16Le);
        assert_eq!(bytes_to_i16(&buf), [1, 5, 3, 2, 6, 4]);
    }

    #[test]
    fn esai_reorders_eight_channels_in_32_bit() {
        let mut buf = s32(&[1, 2, 3, 4, 5, 6, 7, 8, 11, 12, 13, 14, 15, 16, 17, 18]);
        esai_reorder(&mut buf, 8, PcmFormat::S32Le);
        let out: Vec<i32> = buf
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(out, [1, 5, 3, 7, 2, 6, 4, 8, 11, 15, 13, 17, 12, 16, 14, 18]);
    }

    #[test]
    fn esai_ignores_stereo() {
        let mut buf = s16(&[1, 2, 3, 4]);
        esai_reorder(&mut buf, 2, PcmFormat::S16Le);
        assert_eq!(bytes_to_i16(&buf), [1, 2, 3, 4]);
    }

    #[test]
    fn record_conversion_borrows_when_nothing_to_do() {
        let input = s16(&[1, 2, 3, 4]);
        assert!(matches!(
            convert_record_data(&input, PcmFormat::S16Le, 2, 2),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn record_conversion_bit_depth_and_channels() {
        let input = s32(&[0x0001_0000 * 100, 0x0001_0000 * 300]);
        let out = convert_record_data(&input, PcmFormat::S32Le, 2, 1);
        assert_eq!(bytes_to_i16(&out), [200]);

        let out = convert_record_data(&input, PcmFormat::S32Le, 2, 2);
        assert_eq!(bytes_to_i16(&out), [100, 300]);

        let input = s32(&[1000 << 8, 3000 << 8]);
        let out = convert_record_data(&input, PcmFormat::S24Le, 2, 1);
        assert_eq!(bytes_to_i16(&out), [2000]);

        let input = s16(&[7, -7]);
        let out = convert_record_data(&input, PcmFormat::S16Le, 1, 2);
        assert_eq!(bytes_to_i16(&out), [7, 7, -7, -7]);
    }

    #[test]
    fn s24_expansion() {
        let out = expand_s16_to_s24(&s16(&[1, -1]));
        assert_eq!(out, s32(&[256, -256]));
    }

    #[test]
    fn spdif_rates_snap_between_midpoints() {
        assert_eq!(snap_spdif_rate(0), 0);
        assert_eq!(snap_spdif_rate(4000), 0);
        assert_eq!(snap_spdif_rate(4001), 8000);
        assert_eq!(snap_spdif_rate(44_000), 44100);
        assert_eq!(snap_spdif_rate(47_990), 48000);
        assert_eq!(snap_spdif_rate(186_200), 176400);
        assert_eq!(snap_spdif_rate(300_000), 196000);
    }

    proptest! {
        #[test]
        fn fold_stays_between_channels(l in any::<i16>(), r in any::<i16>()) {
            let out = i32::from(bytes_to_i16(&fold_stereo_to_mono(&s16(&[l, r])))[0]);
            let (lo, hi) = (i32::from(l.min(r)), i32::from(l.max(r)));
            prop_assert!(out >= lo - 1 && out <= hi);
        }

        #[test]
        fn esai_reorder_permutes_samples(frame in proptest::collection::vec(any::<i16>(), 6)) {
            let mut buf = s16(&frame);
            esai_reorder(&mut buf, 6, PcmFormat::S16Le);
            let mut a = bytes_to_i16(&buf);
            let mut b = frame.clone();
            a.sort_unstable();
            b.sort_unstable();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn conversion_output_length(frames in 0usize..64, stereo in any::<bool>()) {
            let in_ch = if stereo { 2 } else { 1 };
            let out_ch = 3 - in_ch;
            let input = vec![0u8; frames * in_ch as usize * 4];
            let out = convert_record_data(&input, PcmFormat::S32Le, in_ch, out_ch);
            prop_assert_eq!(out.len(), frames * out_ch as usize * 2);
        }
    }
}
