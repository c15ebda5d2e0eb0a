use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate of every audio frame exchanged with the peer, in both directions.
pub const SESSION_PCM16_SAMPLE_RATE: u32 = 24_000;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,                     // No cutoff frequency, pass all frequencies
        PolynomialDegree::Cubic, // Cubic interpolation for quality
        chunk_size,
        1, // 1 channel (mono)
    )?;
    Ok(resampler)
}

/// Decodes a base64 PCM16 (little endian) fragment into i16 samples.
///
/// Returns `None` when the fragment is not valid base64 or holds an odd
/// number of bytes.
pub fn decode_i16(base64_fragment: &str) -> Option<Vec<i16>> {
    let pcm16_bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_fragment)
        .ok()?;
    if pcm16_bytes.len() % 2 != 0 {
        return None;
    }
    Some(
        pcm16_bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect(),
    )
}

pub fn encode_i16(pcm16: &[i16]) -> String {
    let pcm16_bytes: Vec<u8> = pcm16
        .iter()
        .flat_map(|&sample| sample.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16_bytes)
}

/// Converts one f32 sample to i16, clamping out-of-range input instead of wrapping.
///
/// Negative values scale by 32768 and positive values by 32767 so that both
/// -1.0 and 1.0 land exactly on the representable extremes.
#[inline]
pub fn sample_f32_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Averages interleaved frames down to a single channel.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        let result = create_resampler(48000.0, 24000.0, 1024);
        assert!(result.is_ok());

        let result = create_resampler(24000.0, 24000.0, 1024);
        assert!(result.is_ok());

        let result = create_resampler(16000.0, 24000.0, 480);
        assert!(result.is_ok());
    }

    #[test]
    fn test_out_of_range_samples_are_clamped() {
        assert_eq!(sample_f32_to_i16(2.0), 32767);
        assert_eq!(sample_f32_to_i16(-5.0), -32768);
        assert_eq!(sample_f32_to_i16(1.0), i16::MAX);
        assert_eq!(sample_f32_to_i16(-1.0), i16::MIN);
        assert_eq!(sample_f32_to_i16(f32::INFINITY), i16::MAX);
        assert_eq!(sample_f32_to_i16(f32::NEG_INFINITY), i16::MIN);
        assert_eq!(sample_f32_to_i16(0.0), 0);
        assert_eq!(sample_f32_to_i16(0.5), 16383);
        assert_eq!(sample_f32_to_i16(-0.5), -16384);
    }

    #[test]
    fn test_convert_i16_to_f32() {
        let input = vec![i16::MAX, i16::MIN, 0i16, 16384i16];
        let result = convert_i16_to_f32(&input);

        assert_eq!(result.len(), 4);
        assert_abs_diff_eq!(result[0], i16::MAX as f32 / 32768.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[1], -1.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[2], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[3], 0.5, epsilon = 0.0001);
    }

    #[test]
    fn test_decode_i16() {
        // i16 value 16384 = 0x4000 in little endian = [0x00, 0x40]
        let encoded = base64::engine::general_purpose::STANDARD.encode([0x00u8, 0x40, 0x00, 0x80]);
        assert_eq!(decode_i16(&encoded), Some(vec![16384, i16::MIN]));

        assert_eq!(decode_i16(&encode_i16(&[256, -256, 0])), Some(vec![256, -256, 0]));
        assert_eq!(decode_i16(""), Some(vec![]));
    }

    #[test]
    fn test_decode_i16_rejects_bad_input() {
        assert_eq!(decode_i16("invalid_base64!"), None);

        // A single byte cannot form a sample.
        let odd = base64::engine::general_purpose::STANDARD.encode([0x00u8]);
        assert_eq!(decode_i16(&odd), None);
    }

    #[test]
    fn test_downmix_to_mono() {
        let stereo = vec![1.0f32, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono.len(), 3);
        assert_abs_diff_eq!(mono[0], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(mono[1], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(mono[2], 0.0, epsilon = 0.0001);

        assert_eq!(downmix_to_mono(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }
}
