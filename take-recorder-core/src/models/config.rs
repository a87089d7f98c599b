use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_models::{DeviceCapability, DeviceIdentity, SampleEncoding};
use super::channel::{Channel, ChannelMask};

/// One output track: a mono or stereo selection of hardware channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackConfig {
    /// Must be unique among the tracks of a [`SessionConfig`].
    pub id: u64,

    /// Human-readable label, e.g. "guitar" or "vocals". Part of the take's
    /// file name.
    pub label: String,

    pub left_or_mono_channel: Channel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_channel: Option<Channel>,
}

impl TrackConfig {
    pub fn mono(id: u64, label: impl Into<String>, channel: Channel) -> Self {
        Self {
            id,
            label: label.into(),
            left_or_mono_channel: channel,
            right_channel: None,
        }
    }

    pub fn stereo(id: u64, label: impl Into<String>, left: Channel, right: Channel) -> Self {
        Self {
            id,
            label: label.into(),
            left_or_mono_channel: left,
            right_channel: Some(right),
        }
    }

    pub fn is_stereo(&self) -> bool {
        self.right_channel.is_some()
    }

    pub fn channel_count(&self) -> u16 {
        if self.is_stereo() {
            2
        } else {
            1
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> {
        std::iter::once(self.left_or_mono_channel).chain(self.right_channel)
    }
}

/// What to record: device, format and the tracks to split the input into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub device: DeviceIdentity,
    pub sample_rate: u32,
    pub encoding: SampleEncoding,
    pub tracks: Vec<TrackConfig>,
}

impl SessionConfig {
    /// The mask covering every channel used by any track.
    pub fn desired_channel_mask(&self) -> ChannelMask {
        ChannelMask::for_channels(self.tracks.iter().flat_map(TrackConfig::channels))
    }

    /// Checks that doesn't need a device: at least one track, unique ids and
    /// labels that can be part of a file name.
    pub fn validate(&self) -> Result<(), String> {
        if self.tracks.is_empty() {
            return Err("no tracks configured".into());
        }
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        let mut ids = HashSet::new();
        for track in &self.tracks {
            if !ids.insert(track.id) {
                return Err(format!("duplicate track id {}", track.id));
            }
            if track.label.chars().any(|c| matches!(c, '/' | '\\') || c.is_control()) {
                return Err(format!("track {} label {:?} cannot be used in a file name", track.id, track.label));
            }
            if track.right_channel == Some(track.left_or_mono_channel) {
                return Err(format!(
                    "track {} uses channel {} for both sides",
                    track.id, track.left_or_mono_channel
                ));
            }
        }
        Ok(())
    }

    /// Validates this config against a device and picks the smallest
    /// device-offered mask that covers every track channel.
    pub fn resolve_against(&self, device: &DeviceCapability) -> Result<ChannelMask, String> {
        self.validate()?;

        if device.identity != self.device {
            return Err(format!("config targets {}, not {}", self.device, device.identity));
        }
        if !device.encodings.contains(&self.encoding) {
            return Err(format!("{} does not support {}", device.identity, self.encoding));
        }
        if !device.sample_rates.contains(&self.sample_rate) {
            return Err(format!(
                "{} does not support a sample rate of {}Hz",
                device.identity, self.sample_rate
            ));
        }

        let desired = self.desired_channel_mask();
        device
            .channel_masks
            .iter()
            .copied()
            .filter(|mask| mask.contains_mask(desired))
            .min_by(|a, b| a.count().cmp(&b.count()).then(a.bits().cmp(&b.bits())))
            .ok_or_else(|| format!("{} offers no channel mask covering {}", device.identity, desired))
    }
}

/// Tunables of a recording session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Where take files are written while recording and until retained.
    pub take_directory: PathBuf,

    /// Sleep between capture loop iterations (default: 50ms).
    pub poll_delay: Duration,

    /// Initial wait before polling for a capture loop response (default: 100ms).
    pub command_response_after: Duration,

    /// Floor of the response polling backoff (default: 20ms).
    pub command_backoff_floor: Duration,

    /// Unretained takes are discarded after this long (default: 15s).
    pub take_lifetime: Duration,

    /// Per-track WAV write buffer size in bytes (default: 64 KiB).
    pub writer_buffer_capacity: usize,
}

impl SessionSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_delay.is_zero() {
            return Err("poll delay must be positive".into());
        }
        if self.command_backoff_floor.is_zero() {
            return Err("command backoff floor must be positive".into());
        }
        if self.take_lifetime.is_zero() {
            return Err("take lifetime must be positive".into());
        }
        if self.writer_buffer_capacity < 80 {
            return Err(format!("writer buffer of {} bytes is too small", self.writer_buffer_capacity));
        }
        Ok(())
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            take_directory: std::env::temp_dir(),
            poll_delay: Duration::from_millis(50),
            command_response_after: Duration::from_millis(100),
            command_backoff_floor: Duration::from_millis(20),
            take_lifetime: Duration::from_secs(15),
            writer_buffer_capacity: 64 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(n: u8) -> Channel {
        Channel::new(n).unwrap()
    }

    fn mask(channels: &[u8]) -> ChannelMask {
        ChannelMask::for_channels(channels.iter().map(|n| ch(*n)))
    }

    fn device() -> DeviceCapability {
        DeviceCapability {
            identity: DeviceIdentity::new("12", "usb-interface"),
            name: "8-in interface".into(),
            channel_masks: vec![mask(&[1, 2]), mask(&[1, 2, 3, 4]), mask(&[1, 2, 3, 4, 5, 6, 7, 8])],
            sample_rates: vec![44100, 48000],
            encodings: vec![SampleEncoding::Pcm16, SampleEncoding::Pcm24Packed],
        }
    }

    fn config(tracks: Vec<TrackConfig>) -> SessionConfig {
        SessionConfig {
            device: DeviceIdentity::new("12", "usb-interface"),
            sample_rate: 48000,
            encoding: SampleEncoding::Pcm24Packed,
            tracks,
        }
    }

    #[test]
    fn labels_must_fit_in_a_file_name() {
        assert!(config(vec![TrackConfig::mono(1, "lead vox (take 2)", ch(1))]).validate().is_ok());
        for label in ["drums/kick", "..\\out", "tab\there"] {
            assert!(config(vec![TrackConfig::mono(1, label, ch(1))]).validate().is_err(), "{:?}", label);
        }
    }

    #[test]
    fn picks_smallest_covering_mask() {
        let cfg = config(vec![TrackConfig::mono(1, "vox", ch(3))]);
        assert_eq!(cfg.resolve_against(&device()), Ok(mask(&[1, 2, 3, 4])));

        let cfg = config(vec![TrackConfig::stereo(1, "keys", ch(1), ch(2))]);
        assert_eq!(cfg.resolve_against(&device()), Ok(mask(&[1, 2])));
    }

    #[test]
    fn rejects_uncovered_channels() {
        let cfg = config(vec![TrackConfig::mono(1, "vox", ch(9))]);
        assert!(cfg.resolve_against(&device()).is_err());
    }

    #[test]
    fn rejects_mismatched_identity_rate_or_encoding() {
        let mut cfg = config(vec![TrackConfig::mono(1, "vox", ch(1))]);
        cfg.device.address = "other".into();
        assert!(cfg.resolve_against(&device()).is_err());

        let mut cfg = config(vec![TrackConfig::mono(1, "vox", ch(1))]);
        cfg.sample_rate = 96000;
        assert!(cfg.resolve_against(&device()).is_err());

        let mut cfg = config(vec![TrackConfig::mono(1, "vox", ch(1))]);
        cfg.encoding = SampleEncoding::Float32;
        assert!(cfg.resolve_against(&device()).is_err());
    }

    #[test]
    fn rejects_duplicate_track_ids() {
        let cfg = config(vec![TrackConfig::mono(1, "a", ch(1)), TrackConfig::mono(1, "b", ch(2))]);
        assert_eq!(cfg.validate(), Err("duplicate track id 1".into()));
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = config(vec![TrackConfig::mono(1, "bass", ch(2)), TrackConfig::stereo(2, "od", ch(3), ch(4))]);
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"pcm24_packed\""));
        let parsed: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn default_settings_are_valid() {
        assert!(SessionSettings::default().validate().is_ok());
        let settings = SessionSettings {
            poll_delay: Duration::ZERO,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
