//! Streaming WAV reader.
//!
//! Accepts the subset of RIFF/WAVE the writer produces: a `fmt ` chunk
//! (possibly longer than 16 bytes) directly followed by the `data` chunk.

use std::io::{self, Read};

use super::sample;
use super::wav_format::{self, WavFormat, FMT_CHUNK_SIZE, SIGIL_DATA, SIGIL_FMT, SIGIL_RIFF, SIGIL_WAVE};
use crate::models::error::CaptureError;

pub struct WavReader<R: Read> {
    inner: R,
    format: WavFormat,
    data_len: u32,
    remaining: u32,
    frame: Vec<u8>,
}

impl<R: Read> WavReader<R> {
    /// Parse and validate the header. The reader is left at the first sample.
    pub fn new(mut inner: R) -> Result<Self, CaptureError> {
        expect_sigil(&mut inner, SIGIL_RIFF)?;
        let _riff_size = read_u32(&mut inner)?;
        expect_sigil(&mut inner, SIGIL_WAVE)?;
        expect_sigil(&mut inner, SIGIL_FMT)?;

        let header_size = read_u32(&mut inner)?;
        if header_size < FMT_CHUNK_SIZE {
            return Err(CaptureError::InvalidWavFile(format!(
                "fmt chunk of {} bytes, at least {} expected",
                header_size, FMT_CHUNK_SIZE
            )));
        }

        let format_tag = read_u16(&mut inner)?;
        let channels = read_u16(&mut inner)?;
        let sample_rate = read_u32(&mut inner)?;
        let _byte_rate = read_u32(&mut inner)?;
        let block_align = read_u16(&mut inner)?;
        let bits_per_sample = read_u16(&mut inner)?;

        let encoding = wav_format::encoding_for(format_tag, bits_per_sample)?;
        let expected = wav_format::compute_block_align(bits_per_sample, channels).ok_or_else(|| {
            CaptureError::InvalidWavFile(format!("{} channels of {} bits overflow a frame", channels, bits_per_sample))
        })?;
        if block_align != expected {
            return Err(CaptureError::InvalidWavFile(format!(
                "block align {} does not match {} channels of {} bits",
                block_align, channels, bits_per_sample
            )));
        }
        if channels == 0 {
            return Err(CaptureError::InvalidWavFile("zero channels".into()));
        }

        // cbSize and friends of extended fmt chunks
        let extra = u64::from(header_size - FMT_CHUNK_SIZE);
        let skipped = io::copy(&mut (&mut inner).take(extra), &mut io::sink()).map_err(read_error)?;
        if skipped != extra {
            return Err(CaptureError::InvalidWavFile("file ends inside the fmt chunk".into()));
        }

        expect_sigil(&mut inner, SIGIL_DATA)?;
        let data_len = read_u32(&mut inner)?;

        Ok(Self {
            inner,
            format: WavFormat::new(encoding, channels, sample_rate),
            data_len,
            remaining: data_len,
            frame: vec![0u8; usize::from(block_align)],
        })
    }

    pub fn format(&self) -> WavFormat {
        self.format
    }

    /// Size of the data chunk as declared in the header.
    pub fn data_len(&self) -> u32 {
        self.data_len
    }

    /// Number of whole frames declared in the data chunk.
    pub fn frame_count(&self) -> u32 {
        self.data_len / u32::from(self.format.block_align())
    }

    /// Read the next frame into `out`, one normalised sample per channel.
    ///
    /// Returns `Ok(false)` once the data chunk is exhausted. `out` must hold
    /// at least as many elements as the file has channels.
    pub fn read_frame(&mut self, out: &mut [f32]) -> Result<bool, CaptureError> {
        let frame_len = self.frame.len() as u32;
        if self.remaining < frame_len {
            return Ok(false);
        }
        if out.len() < usize::from(self.format.channels) {
            return Err(CaptureError::InvariantViolation(format!(
                "frame buffer holds {} samples, file has {} channels",
                out.len(),
                self.format.channels
            )));
        }

        match self.inner.read_exact(&mut self.frame) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                // truncated file: the header promised more than exists
                self.remaining = 0;
                return Ok(false);
            }
            Err(e) => return Err(read_error(e)),
        }
        self.remaining -= frame_len;

        let encoding = self.format.encoding;
        let width = encoding.bytes_per_sample();
        for (slot, bytes) in out.iter_mut().zip(self.frame.chunks_exact(width)) {
            *slot = sample::sample_to_f32(bytes, encoding);
        }
        Ok(true)
    }

    /// Iterate the remaining frames as vectors of normalised samples.
    pub fn frames(&mut self) -> Frames<'_, R> {
        Frames { reader: self }
    }
}

pub struct Frames<'a, R: Read> {
    reader: &'a mut WavReader<R>,
}

impl<R: Read> Iterator for Frames<'_, R> {
    type Item = Result<Vec<f32>, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut frame = vec![0.0; usize::from(self.reader.format.channels)];
        match self.reader.read_frame(&mut frame) {
            Ok(true) => Some(Ok(frame)),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

fn read_error(e: io::Error) -> CaptureError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CaptureError::InvalidWavFile("unexpected end of file in header".into())
    } else {
        CaptureError::StorageError(format!("failed to read WAV file: {}", e))
    }
}

fn expect_sigil<R: Read>(inner: &mut R, sigil: &[u8; 4]) -> Result<(), CaptureError> {
    let mut found = [0u8; 4];
    inner.read_exact(&mut found).map_err(read_error)?;
    if &found != sigil {
        return Err(CaptureError::InvalidWavFile(format!(
            "expected {:?}, found {:?}",
            String::from_utf8_lossy(sigil),
            String::from_utf8_lossy(&found)
        )));
    }
    Ok(())
}

fn read_u16<R: Read>(inner: &mut R) -> Result<u16, CaptureError> {
    let mut bytes = [0u8; 2];
    inner.read_exact(&mut bytes).map_err(read_error)?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_u32<R: Read>(inner: &mut R) -> Result<u32, CaptureError> {
    let mut bytes = [0u8; 4];
    inner.read_exact(&mut bytes).map_err(read_error)?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::SampleEncoding;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;

    fn wav_bytes(format: WavFormat, data: &[u8]) -> Vec<u8> {
        let mut bytes = wav_format::generate_wav_header(&format, data.len() as u32).to_vec();
        bytes.extend_from_slice(data);
        bytes
    }

    fn expect_invalid(bytes: Vec<u8>) -> CaptureError {
        match WavReader::new(Cursor::new(bytes)) {
            Ok(_) => panic!("header was accepted"),
            Err(e) => e,
        }
    }

    #[test]
    fn reads_16bit_stereo_frames() {
        let mut data = Vec::new();
        for s in [16384i16, -16384, 32767, 0] {
            data.extend_from_slice(&s.to_le_bytes());
        }
        let bytes = wav_bytes(WavFormat::new(SampleEncoding::Pcm16, 2, 44100), &data);
        let mut reader = WavReader::new(Cursor::new(bytes)).unwrap();

        assert_eq!(reader.format().sample_rate, 44100);
        assert_eq!(reader.frame_count(), 2);

        let frames: Vec<Vec<f32>> = reader.frames().map(Result::unwrap).collect();
        assert_eq!(frames.len(), 2);
        assert_abs_diff_eq!(frames[0][0], 0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(frames[0][1], -0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(frames[1][0], 1.0);
        assert_abs_diff_eq!(frames[1][1], 0.0);
    }

    #[test]
    fn skips_extended_fmt_chunk() {
        let format = WavFormat::new(SampleEncoding::Pcm8, 1, 8000);
        let header = wav_format::generate_wav_header(&format, 2);
        let mut bytes = header[..16].to_vec();
        bytes.extend_from_slice(&18u32.to_le_bytes());
        bytes.extend_from_slice(&header[20..36]);
        bytes.extend_from_slice(&[0, 0]); // cbSize
        bytes.extend_from_slice(&header[36..]);
        bytes.extend_from_slice(&[255, 128]);

        let mut reader = WavReader::new(Cursor::new(bytes)).unwrap();
        let mut frame = [0.0f32];
        assert!(reader.read_frame(&mut frame).unwrap());
        assert_abs_diff_eq!(frame[0], 1.0);
        assert!(reader.read_frame(&mut frame).unwrap());
        assert_abs_diff_eq!(frame[0], 0.0);
        assert!(!reader.read_frame(&mut frame).unwrap());
    }

    #[test]
    fn rejects_bad_sigils() {
        let mut bytes = wav_bytes(WavFormat::new(SampleEncoding::Pcm16, 1, 48000), &[]);
        bytes[8..12].copy_from_slice(b"AVI ");
        assert!(matches!(expect_invalid(bytes), CaptureError::InvalidWavFile(_)));

        let mut bytes = wav_bytes(WavFormat::new(SampleEncoding::Pcm16, 1, 48000), &[]);
        bytes[36..40].copy_from_slice(b"LIST");
        assert!(matches!(expect_invalid(bytes), CaptureError::InvalidWavFile(_)));
    }

    #[test]
    fn rejects_short_fmt_chunk() {
        let mut bytes = wav_bytes(WavFormat::new(SampleEncoding::Pcm16, 1, 48000), &[]);
        bytes[16..20].copy_from_slice(&14u32.to_le_bytes());
        assert!(matches!(expect_invalid(bytes), CaptureError::InvalidWavFile(_)));
    }

    #[test]
    fn rejects_unsupported_tag_and_depth() {
        let mut bytes = wav_bytes(WavFormat::new(SampleEncoding::Pcm16, 1, 48000), &[]);
        bytes[20..22].copy_from_slice(&0xFFFEu16.to_le_bytes());
        assert!(matches!(expect_invalid(bytes), CaptureError::UnsupportedWavFile(_)));

        let mut bytes = wav_bytes(WavFormat::new(SampleEncoding::Pcm16, 1, 48000), &[]);
        bytes[34..36].copy_from_slice(&12u16.to_le_bytes());
        assert!(expect_invalid(bytes).is_unsupported_wav());
    }

    #[test]
    fn rejects_block_align_mismatch() {
        let mut bytes = wav_bytes(WavFormat::new(SampleEncoding::Pcm24Packed, 2, 48000), &[]);
        bytes[32..34].copy_from_slice(&8u16.to_le_bytes());
        assert!(matches!(expect_invalid(bytes), CaptureError::InvalidWavFile(_)));
    }

    #[test]
    fn rejects_channel_counts_that_overflow_the_frame() {
        let mut bytes = wav_bytes(WavFormat::new(SampleEncoding::Pcm32, 1, 48000), &[]);
        bytes[22..24].copy_from_slice(&20000u16.to_le_bytes());
        // what a wrapping 16-bit multiply would have produced
        bytes[32..34].copy_from_slice(&20000u16.wrapping_mul(4).to_le_bytes());
        assert!(matches!(expect_invalid(bytes), CaptureError::InvalidWavFile(_)));
    }

    #[test]
    fn truncated_header_is_invalid() {
        let bytes = wav_bytes(WavFormat::new(SampleEncoding::Pcm16, 1, 48000), &[]);
        assert!(matches!(expect_invalid(bytes[..30].to_vec()), CaptureError::InvalidWavFile(_)));
    }

    #[test]
    fn truncated_data_ends_iteration() {
        let mut bytes = wav_bytes(WavFormat::new(SampleEncoding::Pcm16, 1, 48000), &[0, 0, 0, 0]);
        bytes.truncate(46);
        let mut reader = WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.frames().count(), 1);
    }
}
