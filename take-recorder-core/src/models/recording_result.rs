use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Identifies a finished take held for retention.
pub type TakeId = u32;

/// A take's on-disk file for one track, plus the name it gets when persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeFile {
    pub path: PathBuf,
    pub display_name: String,
    pub track_id: u64,
}

/// The files of a take once recording has stopped, as handed to retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedTake {
    /// Start timestamp shared by every file of the take, `yyyyMMdd_HHmmss`.
    pub name: String,
    pub finished_at: DateTime<Local>,
    pub files: Vec<TakeFile>,
}

/// A file of a retained take as it was handed to the track store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedFile {
    pub track_id: u64,
    pub display_name: String,
    pub size_bytes: u64,
    pub checksum: String,
}

/// Result of retaining a take. Serializable so stores can keep it as a
/// sidecar next to the audio files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedTake {
    pub id: String,
    pub finished_at: DateTime<Local>,
    pub retained_at: DateTime<Local>,
    pub files: Vec<RetainedFile>,
}
