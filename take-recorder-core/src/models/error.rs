use thiserror::Error;

/// Errors that can occur while configuring, capturing or retaining takes.
///
/// Sequencing outcomes (e.g. "still recording") are not errors; they are
/// reported through the result enums in [`crate::models::results`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("channel {0} is out of range, channels are numbered 1 to 32")]
    InvalidChannel(u8),

    #[error("unsupported sample encoding: {0}")]
    UnsupportedEncoding(String),

    /// The audio input reported a negative read result.
    #[error("reading from the audio input failed with code {0}")]
    ReadFailed(i32),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("invalid WAV file: {0}")]
    InvalidWavFile(String),

    #[error("unsupported WAV file: {0}")]
    UnsupportedWavFile(String),

    #[error("the WAV writer has already been closed")]
    WriterClosed,

    /// A controller found the worker's mailbox occupied.
    #[error("another command is already pending")]
    CommandPending,

    #[error("the worker thread has terminated")]
    WorkerTerminated,

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("the take has already been moved to the track store")]
    TakeMoved,

    #[error("the take has already been discarded")]
    TakeDiscarded,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CaptureError {
    /// True for both flavours of WAV rejection; an invalid file is a special
    /// case of an unsupported one.
    pub fn is_unsupported_wav(&self) -> bool {
        matches!(self, Self::InvalidWavFile(_) | Self::UnsupportedWavFile(_))
    }

    /// True when a take has reached a terminal retention state.
    pub fn is_already_finalized(&self) -> bool {
        matches!(self, Self::TakeMoved | Self::TakeDiscarded)
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(e: std::io::Error) -> Self {
        CaptureError::StorageError(e.to_string())
    }
}
