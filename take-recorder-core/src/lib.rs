//! # take-recorder-core
//!
//! Platform-agnostic multitrack take recorder.
//!
//! Reads interleaved PCM from one multichannel input device, splits it into
//! mono and stereo tracks, meters every track and writes each track of a
//! take to its own WAV file. Finished takes wait in a take directory until
//! they are retained into a [`TrackStore`] or discarded.
//!
//! Platform backends implement [`AudioSource`] for capture and
//! [`TrackStore`] for durable storage and plug into [`RecordingSession`].
//!
//! ## Architecture
//!
//! ```text
//! take-recorder-core (this crate)
//! ├── traits/       ← AudioSource, AudioInput, TrackStore, StatusSubscriber
//! ├── models/       ← CaptureError, Channel, ChannelMask, SessionConfig, result enums
//! ├── processing/   ← sample conversion, WAV header generation and parsing
//! ├── control/      ← RemoteControl (controller ⇄ worker command channel)
//! ├── session/      ← RecordingSession, state machine, capture loop
//! └── storage/      ← WavFileWriter, take retention, metadata sidecars
//! ```

pub mod control;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
mod test_support;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{
    DeviceCapability, DeviceIdentity, InputFormat, RecordingStatus, SampleEncoding, TrackLevels,
};
pub use models::channel::{Channel, ChannelMask};
pub use models::config::{SessionConfig, SessionSettings, TrackConfig};
pub use models::error::CaptureError;
pub use models::recording_result::{FinishedTake, RetainedFile, RetainedTake, TakeFile, TakeId};
pub use models::results::{ConfigResult, ListenResult, TakeFinishResult, TakeStartResult};
pub use models::state::SessionPhase;
pub use processing::wav_format::WavFormat;
pub use processing::wav_reader::WavReader;
pub use session::recording_session::RecordingSession;
pub use storage::wav_writer::WavFileWriter;
pub use traits::audio_source::{AudioInput, AudioSource};
pub use traits::status_subscriber::{StatusSubscriber, SubscriberId};
pub use traits::track_store::TrackStore;
