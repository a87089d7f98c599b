use crossbeam_channel::Sender;

use crate::models::audio_models::RecordingStatus;

/// Receives a status update after every buffer the capture loop processes.
///
/// Called on the capture thread: implementations must return quickly and
/// must not block.
pub trait StatusSubscriber: Send + Sync {
    fn on_status(&self, status: &RecordingStatus);
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub(crate) u64);

/// Updates are dropped while the channel is full.
impl StatusSubscriber for Sender<RecordingStatus> {
    fn on_status(&self, status: &RecordingStatus) {
        let _ = self.try_send(status.clone());
    }
}
