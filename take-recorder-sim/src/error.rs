use std::io;
use std::path::PathBuf;

use thiserror::Error;

use take_recorder_core::models::error::CaptureError;

/// Errors of the simulator CLI.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("failed to read {path}: {source}")]
    ReadConfig { path: PathBuf, source: io::Error },

    #[error("invalid session config: {0}")]
    ParseConfig(#[from] serde_json::Error),

    /// The session answered with a sequencing outcome instead of doing it.
    #[error("could not {action}: {outcome}")]
    Refused { action: &'static str, outcome: String },

    #[error("no input device available")]
    NoDevice,
}
