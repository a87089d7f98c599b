use std::io::Write;

use crate::models::error::CaptureError;
use crate::models::recording_result::RetainedTake;

/// Persistent storage for retained takes, e.g. the user's music library.
///
/// Files are created pending, written, then finalized; a pending entry is
/// invisible to other readers of the store.
pub trait TrackStore: Send + Sync {
    type Handle: Send;

    fn create_pending(&self, display_name: &str) -> Result<Self::Handle, CaptureError>;

    fn open_for_write(&self, handle: &Self::Handle) -> Result<Box<dyn Write + Send>, CaptureError>;

    fn finalize(&self, handle: Self::Handle) -> Result<(), CaptureError>;

    /// Called once every file of a take has been finalized.
    fn take_retained(&self, _take: &RetainedTake) -> Result<(), CaptureError> {
        Ok(())
    }
}
