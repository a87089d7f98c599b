//! WAV file format utilities.
//!
//! Generates the canonical 44-byte RIFF header and provides helpers for
//! patching its size fields once the amount of sample data is known.

use crate::models::audio_models::SampleEncoding;
use crate::models::error::CaptureError;

/// Size of the canonical WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Length of the `fmt ` sub-chunk body the writer emits.
pub const FMT_CHUNK_SIZE: u32 = 16;

pub const FORMAT_TAG_PCM: u16 = 0x0001;
pub const FORMAT_TAG_IEEE_FLOAT: u16 = 0x0003;

pub const SIGIL_RIFF: &[u8; 4] = b"RIFF";
pub const SIGIL_WAVE: &[u8; 4] = b"WAVE";
pub const SIGIL_FMT: &[u8; 4] = b"fmt ";
pub const SIGIL_DATA: &[u8; 4] = b"data";

/// Byte offset of the RIFF chunk size field.
pub const RIFF_SIZE_OFFSET: u64 = 4;
/// Byte offset of the data chunk size field.
pub const DATA_SIZE_OFFSET: u64 = 40;

/// The audio format described by a WAV `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub encoding: SampleEncoding,
    pub channels: u16,
    pub sample_rate: u32,
}

impl WavFormat {
    pub fn new(encoding: SampleEncoding, channels: u16, sample_rate: u32) -> Self {
        Self {
            encoding,
            channels,
            sample_rate,
        }
    }

    pub fn format_tag(&self) -> u16 {
        format_tag_for(self.encoding)
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.encoding.bits_per_sample()
    }

    /// Bytes per frame, "block align" in WAV terms. Saturates for channel
    /// counts a WAV header cannot describe.
    pub fn block_align(&self) -> u16 {
        compute_block_align(self.bits_per_sample(), self.channels).unwrap_or(u16::MAX)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate.saturating_mul(u32::from(self.block_align()))
    }
}

pub fn format_tag_for(encoding: SampleEncoding) -> u16 {
    if encoding.is_float() {
        FORMAT_TAG_IEEE_FLOAT
    } else {
        FORMAT_TAG_PCM
    }
}

/// Frame size for the given sample width, rounding partial bytes up.
/// `None` if it does not fit the header's 16-bit field.
pub fn compute_block_align(bits_per_sample: u16, channels: u16) -> Option<u16> {
    channels.checked_mul(bits_per_sample.div_ceil(8))
}

/// Maps a `fmt ` chunk's format tag and bit depth to an encoding.
pub fn encoding_for(format_tag: u16, bits_per_sample: u16) -> Result<SampleEncoding, CaptureError> {
    let is_integer = match format_tag {
        FORMAT_TAG_PCM => true,
        FORMAT_TAG_IEEE_FLOAT => false,
        other => {
            return Err(CaptureError::UnsupportedWavFile(format!(
                "format tag {:#06x}, only 0x0001 (PCM) and 0x0003 (IEEE float) are supported",
                other
            )))
        }
    };

    match (bits_per_sample, is_integer) {
        (8, true) => Ok(SampleEncoding::Pcm8),
        (16, true) => Ok(SampleEncoding::Pcm16),
        (24, true) => Ok(SampleEncoding::Pcm24Packed),
        (32, true) => Ok(SampleEncoding::Pcm32),
        (32, false) => Ok(SampleEncoding::Float32),
        (8 | 16 | 24, false) => Err(CaptureError::UnsupportedWavFile(format!(
            "{}-bit floats, only 32-bit floats are supported",
            bits_per_sample
        ))),
        (other, _) => Err(CaptureError::UnsupportedWavFile(format!(
            "sample size of {} bits, only 8, 16, 24 and 32 are supported",
            other
        ))),
    }
}

/// Generate a 44-byte WAV RIFF header.
///
/// Layout (little-endian):
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    file size - 8 (36 + data_size)
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (format chunk size)
/// [20-21]  format tag (1 = PCM, 3 = IEEE float)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * block_align
/// [32-33]  block_align = channels * bytes per sample
/// [34-35]  bits per sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &WavFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let chunk_size = 36 + data_size;

    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(SIGIL_RIFF);
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(SIGIL_WAVE);

    header[12..16].copy_from_slice(SIGIL_FMT);
    header[16..20].copy_from_slice(&FMT_CHUNK_SIZE.to_le_bytes());
    header[20..22].copy_from_slice(&format.format_tag().to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample().to_le_bytes());

    header[36..40].copy_from_slice(SIGIL_DATA);
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Value of the RIFF chunk size field for a file of `total_file_size` bytes.
pub fn riff_chunk_size(total_file_size: u64) -> u32 {
    total_file_size.saturating_sub(8) as u32
}

/// Value of the data chunk size field for a file of `total_file_size` bytes.
pub fn data_chunk_size(total_file_size: u64) -> u32 {
    total_file_size.saturating_sub(WAV_HEADER_SIZE as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_u16(bytes: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([bytes[at], bytes[at + 1]])
    }

    fn le_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    #[test]
    fn header_riff_magic() {
        let header = generate_wav_header(&WavFormat::new(SampleEncoding::Pcm16, 2, 48000), 0);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
        assert_eq!(le_u32(&header, 16), 16);
    }

    #[test]
    fn header_48khz_stereo_24bit() {
        let header = generate_wav_header(&WavFormat::new(SampleEncoding::Pcm24Packed, 2, 48000), 600);

        assert_eq!(le_u16(&header, 20), 1);
        assert_eq!(le_u16(&header, 22), 2);
        assert_eq!(le_u32(&header, 24), 48000);
        assert_eq!(le_u32(&header, 28), 288000); // 48000 * 2 * 3
        assert_eq!(le_u16(&header, 32), 6);
        assert_eq!(le_u16(&header, 34), 24);
        assert_eq!(le_u32(&header, 40), 600);
        assert_eq!(le_u32(&header, 4), 36 + 600);
    }

    #[test]
    fn header_float_uses_ieee_tag() {
        let header = generate_wav_header(&WavFormat::new(SampleEncoding::Float32, 1, 44100), 0);
        assert_eq!(le_u16(&header, 20), 3);
        assert_eq!(le_u16(&header, 32), 4);
        assert_eq!(le_u16(&header, 34), 32);
    }

    #[test]
    fn size_fields_for_file_length() {
        assert_eq!(data_chunk_size(19200 + 44), 19200);
        assert_eq!(riff_chunk_size(19200 + 44), 19200 + 36);
        assert_eq!(data_chunk_size(10), 0);
    }

    #[test]
    fn encoding_lookup() {
        assert_eq!(encoding_for(1, 8), Ok(SampleEncoding::Pcm8));
        assert_eq!(encoding_for(1, 24), Ok(SampleEncoding::Pcm24Packed));
        assert_eq!(encoding_for(3, 32), Ok(SampleEncoding::Float32));
        assert!(encoding_for(3, 16).unwrap_err().is_unsupported_wav());
        assert!(encoding_for(1, 12).unwrap_err().is_unsupported_wav());
        assert!(encoding_for(0xFFFE, 16).unwrap_err().is_unsupported_wav());
    }

    #[test]
    fn block_align_rounds_up_partial_bytes() {
        assert_eq!(compute_block_align(24, 2), Some(6));
        assert_eq!(compute_block_align(12, 2), Some(4));
        assert_eq!(compute_block_align(8, 1), Some(1));
        assert_eq!(compute_block_align(32, 20000), None);
    }
}
