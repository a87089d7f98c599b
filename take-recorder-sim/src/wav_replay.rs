//! Plays a multichannel WAV file as if it were an input device.
//!
//! The device offers the file's sample rate, every encoding (samples are
//! re-encoded on the fly) and the channel layouts of a simple interface
//! with as many inputs as the file has channels.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use take_recorder_core::models::audio_models::{DeviceCapability, DeviceIdentity, InputFormat, SampleEncoding};
use take_recorder_core::models::error::CaptureError;
use take_recorder_core::processing::wav_format::WavFormat;
use take_recorder_core::processing::wav_reader::WavReader;
use take_recorder_core::traits::audio_source::AudioSource;

use crate::paced_input::{FrameSource, PacedInput};
use crate::synthetic_source::interface_masks;

pub struct WavReplaySource {
    path: PathBuf,
    file_format: WavFormat,
    device: DeviceCapability,
    looped: bool,
}

impl WavReplaySource {
    /// A device called `id` replaying `path`.
    pub fn open_file(path: impl Into<PathBuf>, id: &str) -> Result<Self, CaptureError> {
        let path = path.into();
        let reader = open_reader(&path)?;
        let file_format = reader.format();
        let channel_count = u8::try_from(file_format.channels)
            .map_err(|_| CaptureError::UnsupportedWavFile(format!("{} channels", file_format.channels)))?;

        let device = DeviceCapability {
            identity: DeviceIdentity::new(id, path.display().to_string()),
            name: format!("Replay of {}", path.display()),
            channel_masks: interface_masks(channel_count)?,
            sample_rates: vec![file_format.sample_rate],
            encodings: SampleEncoding::ALL.to_vec(),
        };
        log::info!(
            "replaying {}: {} channels at {}Hz, {} frames",
            path.display(),
            file_format.channels,
            file_format.sample_rate,
            reader.frame_count()
        );

        Ok(Self {
            path,
            file_format,
            device,
            looped: false,
        })
    }

    /// Start over at the end of the file instead of going silent.
    pub fn looped(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    pub fn file_format(&self) -> WavFormat {
        self.file_format
    }

    pub fn device(&self) -> &DeviceCapability {
        &self.device
    }
}

impl AudioSource for WavReplaySource {
    type Input = PacedInput;

    fn devices(&self) -> Vec<DeviceCapability> {
        vec![self.device.clone()]
    }

    fn has_capture_permission(&self) -> bool {
        true
    }

    fn open(&self, device: &DeviceIdentity, format: &InputFormat) -> Result<PacedInput, CaptureError> {
        if device != &self.device.identity {
            return Err(CaptureError::DeviceNotAvailable);
        }
        if format.sample_rate != self.file_format.sample_rate {
            return Err(CaptureError::ConfigurationFailed(format!(
                "{} plays at {}Hz, not {}Hz",
                self.path.display(),
                self.file_format.sample_rate,
                format.sample_rate
            )));
        }
        if !self.device.channel_masks.contains(&format.channel_mask) {
            return Err(CaptureError::ConfigurationFailed(format!(
                "{} does not offer {}",
                device, format.channel_mask
            )));
        }

        let frames = ReplayFrames {
            reader: open_reader(&self.path)?,
            path: self.path.clone(),
            file_frame: vec![0.0; usize::from(self.file_format.channels)],
            // mask channel n is file channel n - 1
            indices: format
                .channel_mask
                .channels()
                .map(|ch| usize::from(ch.number()) - 1)
                .collect(),
            looped: self.looped,
        };
        PacedInput::start(frames, *format, Some(device.id.clone()))
    }
}

fn open_reader(path: &Path) -> Result<WavReader<BufReader<File>>, CaptureError> {
    let file = File::open(path)
        .map_err(|e| CaptureError::StorageError(format!("failed to open {}: {}", path.display(), e)))?;
    WavReader::new(BufReader::new(file))
}

struct ReplayFrames {
    reader: WavReader<BufReader<File>>,
    path: PathBuf,
    file_frame: Vec<f32>,
    indices: Vec<usize>,
    looped: bool,
}

impl FrameSource for ReplayFrames {
    fn next_frame(&mut self, out: &mut [f32]) -> Result<bool, CaptureError> {
        if !self.reader.read_frame(&mut self.file_frame)? {
            if !self.looped {
                return Ok(false);
            }
            self.reader = open_reader(&self.path)?;
            if !self.reader.read_frame(&mut self.file_frame)? {
                return Ok(false);
            }
        }
        for (slot, index) in out.iter_mut().zip(&self.indices) {
            *slot = self.file_frame[*index];
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use take_recorder_core::models::channel::{Channel, ChannelMask};
    use take_recorder_core::storage::wav_writer::WavFileWriter;
    use take_recorder_core::traits::audio_source::AudioInput;
    use tempfile::TempDir;

    /// Four channels of 16-bit audio at 8kHz; channel c of frame i holds
    /// `(c + 1) * 1000 + i`.
    fn write_fixture(dir: &TempDir, frames: i16) -> PathBuf {
        let path = dir.path().join("band.wav");
        let format = WavFormat::new(SampleEncoding::Pcm16, 4, 8000);
        let mut writer = WavFileWriter::create(path.clone(), &format, 1024).unwrap();
        for i in 0..frames {
            let frame: Vec<u8> = (1..=4i16).flat_map(|c| (c * 1000 + i).to_le_bytes()).collect();
            writer.write(&frame).unwrap();
        }
        writer.close().unwrap();
        path
    }

    fn collect(input: &mut PacedInput, bytes: usize) -> Vec<u8> {
        let mut collected = Vec::new();
        let mut buffer = vec![0u8; 1024];
        for _ in 0..100 {
            let n = input.read(&mut buffer).unwrap();
            collected.extend_from_slice(&buffer[..n]);
            if collected.len() >= bytes {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        collected
    }

    #[test]
    fn device_mirrors_the_file() {
        let dir = TempDir::new().unwrap();
        let source = WavReplaySource::open_file(write_fixture(&dir, 10), "replay").unwrap();
        let device = source.device();
        assert_eq!(device.sample_rates, vec![8000]);
        assert_eq!(device.channel_masks.len(), 3);
        assert_eq!(source.file_format().channels, 4);
    }

    #[test]
    fn replays_the_selected_channels() {
        let dir = TempDir::new().unwrap();
        let source = WavReplaySource::open_file(write_fixture(&dir, 200), "replay").unwrap();
        let format = InputFormat {
            sample_rate: 8000,
            encoding: SampleEncoding::Pcm16,
            channel_mask: ChannelMask::for_channels([Channel::new(3).unwrap(), Channel::new(4).unwrap()]),
        };
        let mut input = source.open(&source.device().identity, &format).unwrap();
        let bytes = collect(&mut input, 200 * 4);
        input.release();

        assert_eq!(bytes.len(), 200 * 4);
        for (i, frame) in bytes.chunks_exact(4).enumerate() {
            let third = i16::from_le_bytes([frame[0], frame[1]]);
            let fourth = i16::from_le_bytes([frame[2], frame[3]]);
            assert_eq!(third, 3000 + i as i16, "frame {}", i);
            assert_eq!(fourth, 4000 + i as i16);
        }
    }

    #[test]
    fn rejects_other_sample_rates() {
        let dir = TempDir::new().unwrap();
        let source = WavReplaySource::open_file(write_fixture(&dir, 10), "replay").unwrap();
        let format = InputFormat {
            sample_rate: 48000,
            encoding: SampleEncoding::Pcm16,
            channel_mask: source.device().channel_masks[0],
        };
        assert!(matches!(
            source.open(&source.device().identity, &format),
            Err(CaptureError::ConfigurationFailed(_))
        ));
    }
}
