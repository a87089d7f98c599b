//! # take-recorder-sim
//!
//! Reference backends for take-recorder-core that need no OS audio API.
//!
//! Provides:
//! - `SyntheticSource`: tone-generating multichannel interfaces, paced in real time
//! - `WavReplaySource`: a multichannel WAV file played back as an input device
//! - `DirectoryStore`: a `TrackStore` writing retained takes into a directory
//! - `runner`: configure, record and retain a take in one call
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use take_recorder_core::{RecordingSession, SessionSettings};
//! use take_recorder_sim::{DirectoryStore, SyntheticSource};
//!
//! let source = SyntheticSource::interface("sim-8", 8)?;
//! let store = Arc::new(DirectoryStore::new("takes")?);
//! let mut session = RecordingSession::new(source, store, SessionSettings::default())?;
//! ```

pub mod directory_store;
pub mod error;
pub mod paced_input;
pub mod runner;
pub mod synthetic_source;
pub mod wav_replay;

pub use directory_store::DirectoryStore;
pub use error::SimError;
pub use paced_input::{FrameSource, PacedInput};
pub use synthetic_source::SyntheticSource;
pub use wav_replay::WavReplaySource;
