use super::recording_result::TakeId;

/// Outcome of `configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigResult {
    Ok,
    /// No device matches the config, or the device can't deliver it.
    Invalid,
    /// A take is being recorded; finish it before reconfiguring.
    StopRecordingFirst,
}

/// Outcome of `start_listening` and `stop_listening`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenResult {
    /// Audio is being read from the device.
    Listening,
    NotListening,
    /// The device could not be opened, or the input was routed elsewhere.
    DeviceNotAvailable,
    /// Capture permission is not granted; ask the user and retry.
    NoPermission,
    NotConfigured,
    /// A take is being recorded; finish it before stopping.
    StillRecording,
}

/// Outcome of `start_take`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeStartResult {
    Recording,
    AlreadyRecording,
    InvalidState,
}

/// Outcome of `finish_take`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeFinishResult {
    /// The take is held for retention under the given id.
    Finished(TakeId),
    NotRecording,
    InvalidState,
}
