//! Pure conversions between raw little-endian samples and normalised floats.
//!
//! Integer encodings map their full positive range onto `0.0..=1.0`; values
//! are clamped to `-1.0..=1.0` so the most negative integer doesn't overshoot.
//! Float samples pass through unchanged.

use crate::models::audio_models::SampleEncoding;

/// Largest magnitude of an unsigned 8-bit sample around its 128 midpoint.
pub const MAX_SAMPLE_8BIT: f32 = 127.0;
pub const MAX_SAMPLE_16BIT: f32 = i16::MAX as f32;
pub const MAX_SAMPLE_24BIT: f32 = 8_388_607.0;
pub const MAX_SAMPLE_32BIT: f64 = i32::MAX as f64;

/// Decode one sample from the start of `bytes` into `-1.0..=1.0`.
///
/// `bytes` must hold at least `encoding.bytes_per_sample()` bytes.
pub fn sample_to_f32(bytes: &[u8], encoding: SampleEncoding) -> f32 {
    match encoding {
        SampleEncoding::Pcm8 => ((f32::from(bytes[0]) - 128.0) / MAX_SAMPLE_8BIT).clamp(-1.0, 1.0),
        SampleEncoding::Pcm16 => {
            let value = i16::from_le_bytes([bytes[0], bytes[1]]);
            (f32::from(value) / MAX_SAMPLE_16BIT).clamp(-1.0, 1.0)
        }
        SampleEncoding::Pcm24Packed => {
            // shift into the top of an i32 so the arithmetic shift sign-extends
            let value = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
            (value as f32 / MAX_SAMPLE_24BIT).clamp(-1.0, 1.0)
        }
        SampleEncoding::Pcm32 => {
            let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (f64::from(value) / MAX_SAMPLE_32BIT).clamp(-1.0, 1.0) as f32
        }
        SampleEncoding::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

/// Absolute level of one sample, used for metering.
pub fn sample_magnitude(bytes: &[u8], encoding: SampleEncoding) -> f32 {
    sample_to_f32(bytes, encoding).abs()
}

/// Encode `value` into the first `encoding.bytes_per_sample()` bytes of `out`.
/// Inverse of [`sample_to_f32`] up to quantisation.
pub fn f32_to_sample(value: f32, encoding: SampleEncoding, out: &mut [u8]) {
    match encoding {
        SampleEncoding::Pcm8 => {
            let scaled = (value.clamp(-1.0, 1.0) * MAX_SAMPLE_8BIT).round() + 128.0;
            out[0] = scaled as u8;
        }
        SampleEncoding::Pcm16 => {
            let scaled = (value.clamp(-1.0, 1.0) * MAX_SAMPLE_16BIT).round() as i16;
            out[..2].copy_from_slice(&scaled.to_le_bytes());
        }
        SampleEncoding::Pcm24Packed => {
            let scaled = (value.clamp(-1.0, 1.0) * MAX_SAMPLE_24BIT).round() as i32;
            out[..3].copy_from_slice(&scaled.to_le_bytes()[..3]);
        }
        SampleEncoding::Pcm32 => {
            let scaled = (f64::from(value.clamp(-1.0, 1.0)) * MAX_SAMPLE_32BIT).round() as i32;
            out[..4].copy_from_slice(&scaled.to_le_bytes());
        }
        SampleEncoding::Float32 => out[..4].copy_from_slice(&value.to_le_bytes()),
    }
}

/// Largest representable error of a round trip through `encoding`.
pub fn quantization_step(encoding: SampleEncoding) -> f32 {
    match encoding {
        SampleEncoding::Pcm8 => 1.0 / MAX_SAMPLE_8BIT,
        SampleEncoding::Pcm16 => 1.0 / MAX_SAMPLE_16BIT,
        SampleEncoding::Pcm24Packed => 1.0 / MAX_SAMPLE_24BIT,
        SampleEncoding::Pcm32 => (1.0 / MAX_SAMPLE_32BIT) as f32,
        SampleEncoding::Float32 => 0.0,
    }
}

/// The bytes of sample `index` within `frame`, where each sample is
/// `sample_size` bytes wide. `None` if the frame is too short.
pub fn sample_in_frame(frame: &[u8], sample_size: usize, index: usize) -> Option<&[u8]> {
    let start = index * sample_size;
    frame.get(start..start + sample_size)
}
