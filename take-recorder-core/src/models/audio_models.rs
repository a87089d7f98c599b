use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::channel::ChannelMask;

/// Sample encodings the recorder can capture and write to WAV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleEncoding {
    /// Unsigned 8-bit PCM, offset by 128 as WAV stores it.
    Pcm8,
    Pcm16,
    /// Signed 24-bit PCM, packed into three bytes.
    Pcm24Packed,
    Pcm32,
    Float32,
}

impl SampleEncoding {
    pub const ALL: [SampleEncoding; 5] = [
        SampleEncoding::Pcm8,
        SampleEncoding::Pcm16,
        SampleEncoding::Pcm24Packed,
        SampleEncoding::Pcm32,
        SampleEncoding::Float32,
    ];

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Pcm8 => 1,
            Self::Pcm16 => 2,
            Self::Pcm24Packed => 3,
            Self::Pcm32 | Self::Float32 => 4,
        }
    }

    pub fn bits_per_sample(self) -> u16 {
        self.bytes_per_sample() as u16 * 8
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32)
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pcm8 => "8-bit PCM",
            Self::Pcm16 => "16-bit PCM",
            Self::Pcm24Packed => "24-bit packed PCM",
            Self::Pcm32 => "32-bit PCM",
            Self::Float32 => "32-bit float",
        };
        f.write_str(name)
    }
}

/// Identity of an input device: the pair of id and address must match for a
/// configuration to apply to the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: String,
    pub address: String,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} ({})", self.id, self.address)
        }
    }
}

/// What an input device can deliver, as reported by the audio source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapability {
    pub identity: DeviceIdentity,
    pub name: String,
    pub channel_masks: Vec<ChannelMask>,
    pub sample_rates: Vec<u32>,
    pub encodings: Vec<SampleEncoding>,
}

/// Format a device input is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFormat {
    pub sample_rate: u32,
    pub encoding: SampleEncoding,
    pub channel_mask: ChannelMask,
}

impl InputFormat {
    pub fn channel_count(&self) -> usize {
        self.channel_mask.count() as usize
    }

    /// Bytes per frame: one sample for every channel in the mask.
    pub fn frame_size(&self) -> usize {
        self.channel_count() * self.encoding.bytes_per_sample()
    }

    pub fn bytes_per_second(&self) -> usize {
        self.frame_size() * self.sample_rate as usize
    }
}

/// Peak levels of one track over the last processed buffer, as normalised
/// magnitudes in `0.0..=1.0`. `right` is `None` for mono tracks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackLevels {
    pub left: f32,
    pub right: Option<f32>,
}

/// Status broadcast by the capture loop after every buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordingStatus {
    pub is_listening: bool,
    pub is_recording: bool,
    /// Time spent processing a buffer relative to the audio time it holds.
    /// A diagnostic only; values near 100 mean samples are at risk.
    pub load_percentage: u32,
    /// Keyed by track id.
    pub track_levels: BTreeMap<u64, TrackLevels>,
    /// Audio time recorded into the current take; zero when not recording.
    pub take_duration: Duration,
}

impl RecordingStatus {
    /// The last status sent after listening stops.
    pub fn stopped() -> Self {
        Self::default()
    }
}
