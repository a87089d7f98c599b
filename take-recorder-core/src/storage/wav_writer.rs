use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::models::error::CaptureError;
use crate::processing::wav_format::{self, WavFormat};

/// Buffered streaming WAV writer.
///
/// The header is written with zero sizes when the file is created and
/// backpatched on [`close`](Self::close):
/// ```text
/// [44-byte WAV header, sizes patched on close]
/// [raw interleaved samples...]
/// ```
///
/// Not thread-safe; owned by whichever thread produces the samples.
pub struct WavFileWriter {
    file_path: PathBuf,
    file: Option<File>,
    buffer: Vec<u8>,
    capacity: usize,
    flush_threshold: usize,
    total_bytes_written: u64,
}

impl WavFileWriter {
    /// Create `file_path` and write the header.
    ///
    /// `buffer_capacity` bytes are held in memory; the buffer is flushed
    /// whenever its free space drops to 1/80th of the capacity or less.
    pub fn create(file_path: PathBuf, format: &WavFormat, buffer_capacity: usize) -> Result<Self, CaptureError> {
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CaptureError::StorageError(format!("failed to create directory: {}", e)))?;
        }

        let mut file = File::create(&file_path)
            .map_err(|e| CaptureError::StorageError(format!("failed to create file: {}", e)))?;

        let header = wav_format::generate_wav_header(format, 0);
        file.write_all(&header)
            .map_err(|e| CaptureError::StorageError(format!("failed to write header: {}", e)))?;

        let capacity = buffer_capacity.max(1);
        Ok(Self {
            file_path,
            file: Some(file),
            buffer: Vec::with_capacity(capacity),
            capacity,
            flush_threshold: capacity / 80,
            total_bytes_written: header.len() as u64,
        })
    }

    /// Append raw sample bytes.
    pub fn write(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        if self.file.is_none() {
            return Err(CaptureError::WriterClosed);
        }

        let capacity = self.capacity;
        let mut rest = data;
        while !rest.is_empty() {
            let room = capacity - self.buffer.len();
            let n = room.min(rest.len());
            self.buffer.extend_from_slice(&rest[..n]);
            rest = &rest[n..];

            if capacity - self.buffer.len() <= self.flush_threshold {
                self.flush_buffer()?;
            }
        }
        Ok(())
    }

    /// Flush, patch the RIFF and data chunk sizes, and close the file.
    ///
    /// Closing twice fails with [`CaptureError::WriterClosed`].
    pub fn close(&mut self) -> Result<u64, CaptureError> {
        if self.file.is_none() {
            return Err(CaptureError::WriterClosed);
        }

        let flushed = self.flush_buffer();
        // the writer is closed from here on, even if patching fails
        let mut file = match self.file.take() {
            Some(file) => file,
            None => return Err(CaptureError::WriterClosed),
        };
        flushed?;

        let file_size = self.total_bytes_written;

        file.seek(SeekFrom::Start(wav_format::RIFF_SIZE_OFFSET))?;
        file.write_all(&wav_format::riff_chunk_size(file_size).to_le_bytes())?;

        file.seek(SeekFrom::Start(wav_format::DATA_SIZE_OFFSET))?;
        file.write_all(&wav_format::data_chunk_size(file_size).to_le_bytes())?;

        file.flush()?;
        Ok(file_size)
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Bytes written so far including the header and buffered bytes.
    pub fn bytes_written(&self) -> u64 {
        self.total_bytes_written + self.buffer.len() as u64
    }

    /// Path of the output file.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn flush_buffer(&mut self) -> Result<(), CaptureError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or(CaptureError::WriterClosed)?;
        file.write_all(&self.buffer)
            .map_err(|e| CaptureError::StorageError(format!("write failed: {}", e)))?;
        self.total_bytes_written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::SampleEncoding;
    use crate::processing::sample;
    use crate::processing::wav_reader::WavReader;
    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;

    fn le_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    #[test]
    fn close_patches_sizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("take.wav");
        let format = WavFormat::new(SampleEncoding::Pcm16, 2, 48000);

        let mut writer = WavFileWriter::create(path.clone(), &format, 4096).unwrap();
        writer.write(&[0u8; 16]).unwrap();
        assert_eq!(writer.bytes_written(), 44 + 16);
        assert_eq!(writer.close().unwrap(), 60);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 60);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(le_u32(&bytes, 4), bytes.len() as u32 - 8);
        assert_eq!(le_u32(&bytes, 40), bytes.len() as u32 - 44);
    }

    #[test]
    fn close_is_one_shot() {
        let dir = TempDir::new().unwrap();
        let format = WavFormat::new(SampleEncoding::Pcm8, 1, 8000);
        let mut writer = WavFileWriter::create(dir.path().join("a.wav"), &format, 256).unwrap();
        writer.close().unwrap();
        assert!(writer.is_closed());
        assert_eq!(writer.close(), Err(CaptureError::WriterClosed));
        assert_eq!(writer.write(&[1]), Err(CaptureError::WriterClosed));
    }

    #[test]
    fn small_buffer_flushes_while_writing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.wav");
        let format = WavFormat::new(SampleEncoding::Pcm24Packed, 1, 48000);

        // 160-byte buffer flushes at 2 bytes of free space
        let mut writer = WavFileWriter::create(path.clone(), &format, 160).unwrap();
        let data: Vec<u8> = (0..999u32).map(|i| (i % 251) as u8).collect();
        for chunk in data.chunks(37) {
            writer.write(chunk).unwrap();
        }
        assert!(fs::metadata(&path).unwrap().len() > 44);
        writer.close().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[44..], &data[..]);
        assert_eq!(le_u32(&bytes, 40), 999);
    }

    #[test]
    fn synthetic_waveform_reads_back_at_every_encoding() {
        let dir = TempDir::new().unwrap();
        let frames = 480;
        let wave: Vec<f32> = (0..frames)
            .map(|i| 0.8 * (i as f32 * 2.0 * std::f32::consts::PI / 48.0).sin())
            .collect();

        for encoding in SampleEncoding::ALL {
            let path = dir.path().join(format!("{:?}.wav", encoding));
            let format = WavFormat::new(encoding, 2, 48000);
            let width = encoding.bytes_per_sample();

            let mut writer = WavFileWriter::create(path.clone(), &format, 1024).unwrap();
            let mut frame = vec![0u8; width * 2];
            for value in &wave {
                sample::f32_to_sample(*value, encoding, &mut frame[..width]);
                sample::f32_to_sample(-*value, encoding, &mut frame[width..]);
                writer.write(&frame).unwrap();
            }
            let file_size = writer.close().unwrap();

            let bytes = fs::read(&path).unwrap();
            assert_eq!(bytes.len() as u64, file_size);
            assert_eq!(le_u32(&bytes, 4) as usize, bytes.len() - 8);
            assert_eq!(le_u32(&bytes, 40) as usize, frames * width * 2);

            let mut reader = WavReader::new(fs::File::open(&path).unwrap()).unwrap();
            assert_eq!(reader.format(), format);
            let epsilon = sample::quantization_step(encoding) + f32::EPSILON;
            let mut read = 0;
            for (frame, expected) in reader.frames().zip(&wave) {
                let frame = frame.unwrap();
                assert_abs_diff_eq!(frame[0].abs(), expected.abs(), epsilon = epsilon);
                assert_abs_diff_eq!(frame[1], -expected, epsilon = epsilon);
                read += 1;
            }
            assert_eq!(read, frames, "{}", encoding);
        }
    }
}
