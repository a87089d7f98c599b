//! One-shot recording: configure, listen, record for a while, then keep or
//! drop the take.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use take_recorder_core::models::audio_models::{DeviceCapability, RecordingStatus, SampleEncoding};
use take_recorder_core::models::config::{SessionConfig, TrackConfig};
use take_recorder_core::models::recording_result::TakeId;
use take_recorder_core::models::results::{ConfigResult, ListenResult, TakeFinishResult, TakeStartResult};
use take_recorder_core::session::recording_session::RecordingSession;
use take_recorder_core::traits::audio_source::AudioSource;
use take_recorder_core::traits::status_subscriber::StatusSubscriber;
use take_recorder_core::traits::track_store::TrackStore;

use crate::error::SimError;

pub fn load_config(path: &Path) -> Result<SessionConfig, SimError> {
    let json = fs::read_to_string(path).map_err(|source| SimError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&json)?)
}

/// Record every input of the device's widest mask: consecutive channels
/// are paired into stereo tracks, a leftover channel becomes a mono track.
pub fn default_config(device: &DeviceCapability) -> Option<SessionConfig> {
    let widest = device.channel_masks.iter().copied().max_by_key(|m| m.count())?;
    let sample_rate = if device.sample_rates.contains(&48000) {
        48000
    } else {
        *device.sample_rates.first()?
    };
    let encoding = if device.encodings.contains(&SampleEncoding::Pcm16) {
        SampleEncoding::Pcm16
    } else {
        *device.encodings.first()?
    };

    let channels: Vec<_> = widest.channels().collect();
    let tracks = channels
        .chunks(2)
        .zip(1u64..)
        .map(|(pair, id)| match *pair {
            [left, right] => TrackConfig::stereo(id, format!("in{}-{}", left.number(), right.number()), left, right),
            _ => TrackConfig::mono(id, format!("in{}", pair[0].number()), pair[0]),
        })
        .collect();

    Some(SessionConfig {
        device: device.identity.clone(),
        sample_rate,
        encoding,
        tracks,
    })
}

/// Logs track levels in dBFS at most once per interval.
pub struct LevelMeter {
    interval: Duration,
    last_report: Mutex<Option<Instant>>,
}

impl LevelMeter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_report: Mutex::new(None),
        }
    }
}

impl StatusSubscriber for LevelMeter {
    fn on_status(&self, status: &RecordingStatus) {
        let mut last = self.last_report.lock();
        if last.map_or(false, |at| at.elapsed() < self.interval) || !status.is_listening {
            return;
        }
        *last = Some(Instant::now());

        let levels: Vec<String> = status
            .track_levels
            .iter()
            .map(|(id, levels)| match levels.right {
                Some(right) => format!("{}: {} | {}", id, dbfs(levels.left), dbfs(right)),
                None => format!("{}: {}", id, dbfs(levels.left)),
            })
            .collect();
        log::info!(
            "{}load {}%, {}",
            if status.is_recording {
                format!("REC {:.1}s, ", status.take_duration.as_secs_f32())
            } else {
                String::new()
            },
            status.load_percentage,
            levels.join("  ")
        );
    }
}

fn dbfs(peak: f32) -> String {
    if peak <= 0.0 {
        "-inf dB".into()
    } else {
        format!("{:.1} dB", 20.0 * peak.log10())
    }
}

/// Record one take of `duration` and retain it if `keep`, discard it
/// otherwise. Leaves the session configured but not listening.
pub fn record_take<A, S>(
    session: &mut RecordingSession<A, S>,
    config: SessionConfig,
    duration: Duration,
    keep: bool,
) -> Result<TakeId, SimError>
where
    A: AudioSource,
    S: TrackStore + 'static,
{
    match session.configure(config)? {
        ConfigResult::Ok => {}
        other => return Err(refused("configure the session", other)),
    }
    match session.start_listening()? {
        ListenResult::Listening => {}
        other => return Err(refused("start listening", other)),
    }
    match session.start_take()? {
        TakeStartResult::Recording => {}
        other => return Err(refused("start a take", other)),
    }
    log::info!("recording for {:?}", duration);
    thread::sleep(duration);

    let id = match session.finish_take()? {
        TakeFinishResult::Finished(id) => id,
        other => return Err(refused("finish the take", other)),
    };
    if keep {
        keep_take(session, id)?;
    } else {
        session.discard_take(id)?;
    }
    match session.stop_listening()? {
        ListenResult::NotListening => Ok(id),
        other => Err(refused("stop listening", other)),
    }
}

/// Retain take `id`, failing if it already expired or was decided on.
pub fn keep_take<A, S>(session: &RecordingSession<A, S>, id: TakeId) -> Result<(), SimError>
where
    A: AudioSource,
    S: TrackStore + 'static,
{
    if session.retain_take(id)? {
        Ok(())
    } else {
        Err(SimError::Refused {
            action: "retain the take",
            outcome: format!("take {} is no longer held", id),
        })
    }
}

fn refused(action: &'static str, outcome: impl std::fmt::Debug) -> SimError {
    SimError::Refused {
        action,
        outcome: format!("{:?}", outcome),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory_store::DirectoryStore;
    use crate::synthetic_source::SyntheticSource;
    use std::fs::File;
    use std::sync::Arc;
    use take_recorder_core::models::config::SessionSettings;
    use take_recorder_core::processing::wav_reader::WavReader;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> SessionSettings {
        SessionSettings {
            take_directory: dir.path().join("scratch"),
            poll_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[test]
    fn default_config_pairs_the_widest_mask() {
        let source = SyntheticSource::interface("sim-5", 5).unwrap();
        let config = default_config(&source.devices()[0]).unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.encoding, SampleEncoding::Pcm16);
        let labels: Vec<_> = config.tracks.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, ["in1-2", "in3-4", "in5"]);
        assert!(config.tracks[0].is_stereo());
        assert!(!config.tracks[2].is_stereo());
    }

    #[test]
    fn config_files_are_parsed_and_checked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let source = SyntheticSource::interface("sim-2", 2).unwrap();
        let config = default_config(&source.devices()[0]).unwrap();
        fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);

        fs::write(&path, "{\"device\": 1}").unwrap();
        assert!(matches!(load_config(&path), Err(SimError::ParseConfig(_))));
        assert!(matches!(
            load_config(&dir.path().join("missing.json")),
            Err(SimError::ReadConfig { .. })
        ));
    }

    #[test]
    fn recorded_take_lands_in_the_store() {
        let dir = TempDir::new().unwrap();
        let source = SyntheticSource::interface("sim-4", 4).unwrap();
        let config = default_config(&source.devices()[0]).unwrap();
        let store = Arc::new(DirectoryStore::new(dir.path().join("takes")).unwrap());
        let mut session = RecordingSession::new(source, Arc::clone(&store), settings(&dir)).unwrap();
        session.subscribe(Arc::new(LevelMeter::new(Duration::from_millis(50)))).unwrap();

        record_take(&mut session, config, Duration::from_millis(300), true).unwrap();

        let mut wavs: Vec<_> = fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().map_or(false, |e| e == "wav"))
            .collect();
        wavs.sort();
        assert_eq!(wavs.len(), 2);
        assert!(wavs[0].to_string_lossy().ends_with("_in1-2.wav"));

        let reader = WavReader::new(File::open(&wavs[0]).unwrap()).unwrap();
        assert_eq!(reader.format().channels, 2);
        assert_eq!(reader.format().sample_rate, 48000);
        assert!(reader.frame_count() > 0);

        let sidecars = fs::read_dir(store.root())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".take.json"))
            .count();
        assert_eq!(sidecars, 1);
    }

    #[test]
    fn discarded_take_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let source = SyntheticSource::interface("sim-2", 2).unwrap();
        let config = default_config(&source.devices()[0]).unwrap();
        let store = Arc::new(DirectoryStore::new(dir.path().join("takes")).unwrap());
        let mut session = RecordingSession::new(source, Arc::clone(&store), settings(&dir)).unwrap();

        record_take(&mut session, config, Duration::from_millis(50), false).unwrap();
        assert_eq!(fs::read_dir(store.root()).unwrap().count(), 0);
        assert_eq!(fs::read_dir(dir.path().join("scratch")).unwrap().count(), 0);
    }

    #[test]
    fn keeping_a_take_twice_is_refused() {
        let dir = TempDir::new().unwrap();
        let source = SyntheticSource::interface("sim-2", 2).unwrap();
        let config = default_config(&source.devices()[0]).unwrap();
        let store = Arc::new(DirectoryStore::new(dir.path().join("takes")).unwrap());
        let mut session = RecordingSession::new(source, store, settings(&dir)).unwrap();

        let id = record_take(&mut session, config, Duration::from_millis(20), true).unwrap();
        match keep_take(&session, id) {
            Err(SimError::Refused { action, outcome }) => {
                assert_eq!(action, "retain the take");
                assert!(outcome.contains("no longer held"), "{}", outcome);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn refusals_are_reported() {
        let dir = TempDir::new().unwrap();
        let source = SyntheticSource::interface("sim-2", 2).unwrap();
        source.set_permission(false);
        let config = default_config(&source.devices()[0]).unwrap();
        let store = Arc::new(DirectoryStore::new(dir.path().join("takes")).unwrap());
        let mut session = RecordingSession::new(source, store, settings(&dir)).unwrap();

        match record_take(&mut session, config, Duration::ZERO, true) {
            Err(SimError::Refused { action, outcome }) => {
                assert_eq!(action, "start listening");
                assert_eq!(outcome, "NoPermission");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
