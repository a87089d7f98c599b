//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::{DeviceCapability, DeviceIdentity, InputFormat, RecordingStatus, SampleEncoding};
use crate::models::channel::{Channel, ChannelMask};
use crate::models::error::CaptureError;
use crate::models::recording_result::RetainedTake;
use crate::traits::audio_source::{AudioInput, AudioSource};
use crate::traits::status_subscriber::StatusSubscriber;
use crate::traits::track_store::TrackStore;

pub fn ch(n: u8) -> Channel {
    Channel::new(n).unwrap()
}

pub fn mask(channels: &[u8]) -> ChannelMask {
    ChannelMask::for_channels(channels.iter().map(|n| ch(*n)))
}

/// A four-input interface offering stereo pairs and all four channels.
pub fn four_channel_device() -> DeviceCapability {
    DeviceCapability {
        identity: DeviceIdentity::new("4", "usb-4in"),
        name: "4-in test interface".into(),
        channel_masks: vec![mask(&[1, 2]), mask(&[3, 4]), mask(&[1, 2, 3, 4])],
        sample_rates: vec![44100, 48000],
        encodings: SampleEncoding::ALL.to_vec(),
    }
}

#[derive(Default)]
struct Feed {
    bytes: VecDeque<u8>,
    frame_size: usize,
    read_error: Option<i32>,
    opened: Vec<InputFormat>,
    released: usize,
}

/// An [`AudioSource`] with one device that delivers exactly the bytes pushed
/// into it, in whole frames.
pub struct ScriptedSource {
    device: DeviceCapability,
    permission: AtomicBool,
    routed_to: Mutex<Option<String>>,
    feed: Arc<Mutex<Feed>>,
}

impl ScriptedSource {
    pub fn new(device: DeviceCapability) -> Self {
        Self {
            device,
            permission: AtomicBool::new(true),
            routed_to: Mutex::new(None),
            feed: Arc::new(Mutex::new(Feed::default())),
        }
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    /// Make subsequently opened inputs report `device_id` as routed device.
    pub fn route_to(&self, device_id: &str) {
        *self.routed_to.lock() = Some(device_id.to_string());
    }

    pub fn push(&self, bytes: &[u8]) {
        self.feed.lock().bytes.extend(bytes.iter().copied());
    }

    pub fn fail_reads_with(&self, code: i32) {
        self.feed.lock().read_error = Some(code);
    }

    /// Bytes pushed but not yet read.
    pub fn backlog(&self) -> usize {
        self.feed.lock().bytes.len()
    }

    pub fn opened(&self) -> Vec<InputFormat> {
        self.feed.lock().opened.clone()
    }

    pub fn released(&self) -> usize {
        self.feed.lock().released
    }
}

impl AudioSource for ScriptedSource {
    type Input = ScriptedInput;

    fn devices(&self) -> Vec<DeviceCapability> {
        vec![self.device.clone()]
    }

    fn has_capture_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn open(&self, device: &DeviceIdentity, format: &InputFormat) -> Result<ScriptedInput, CaptureError> {
        if device != &self.device.identity {
            return Err(CaptureError::DeviceNotAvailable);
        }
        let mut feed = self.feed.lock();
        feed.frame_size = format.frame_size();
        feed.opened.push(*format);
        Ok(ScriptedInput {
            feed: Arc::clone(&self.feed),
            routed: self.routed_to.lock().clone().unwrap_or_else(|| device.id.clone()),
        })
    }
}

pub struct ScriptedInput {
    feed: Arc<Mutex<Feed>>,
    routed: String,
}

impl AudioInput for ScriptedInput {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, CaptureError> {
        let mut feed = self.feed.lock();
        if let Some(code) = feed.read_error {
            return Err(CaptureError::ReadFailed(code));
        }
        let frame_size = feed.frame_size.max(1);
        let available = feed.bytes.len().min(buffer.len());
        let n = available - available % frame_size;
        for (slot, byte) in buffer[..n].iter_mut().zip(feed.bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn routed_device_id(&self) -> Option<String> {
        Some(self.routed.clone())
    }

    fn release(&mut self) {
        self.feed.lock().released += 1;
    }
}

#[derive(Default)]
struct StoredFile {
    name: String,
    bytes: Arc<Mutex<Vec<u8>>>,
    finalized: bool,
}

/// A [`TrackStore`] keeping finalized files in memory.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<Vec<StoredFile>>,
    takes: Mutex<Vec<RetainedTake>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Contents of the finalized file called `name`.
    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .iter()
            .find(|f| f.finalized && f.name == name)
            .map(|f| f.bytes.lock().clone())
    }

    pub fn finalized_names(&self) -> Vec<String> {
        self.files
            .lock()
            .iter()
            .filter(|f| f.finalized)
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn retained_takes(&self) -> Vec<RetainedTake> {
        self.takes.lock().clone()
    }
}

struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TrackStore for MemoryStore {
    type Handle = usize;

    fn create_pending(&self, display_name: &str) -> Result<usize, CaptureError> {
        let mut files = self.files.lock();
        files.push(StoredFile {
            name: display_name.to_string(),
            ..Default::default()
        });
        Ok(files.len() - 1)
    }

    fn open_for_write(&self, handle: &usize) -> Result<Box<dyn Write + Send>, CaptureError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CaptureError::StorageError("store is read-only".into()));
        }
        let files = self.files.lock();
        let file = files
            .get(*handle)
            .ok_or_else(|| CaptureError::StorageError(format!("no pending entry {}", handle)))?;
        Ok(Box::new(SharedWriter(Arc::clone(&file.bytes))))
    }

    fn finalize(&self, handle: usize) -> Result<(), CaptureError> {
        let mut files = self.files.lock();
        let file = files
            .get_mut(handle)
            .ok_or_else(|| CaptureError::StorageError(format!("no pending entry {}", handle)))?;
        file.finalized = true;
        Ok(())
    }

    fn take_retained(&self, take: &RetainedTake) -> Result<(), CaptureError> {
        self.takes.lock().push(take.clone());
        Ok(())
    }
}

/// Records every status update it receives.
#[derive(Default)]
pub struct StatusLog {
    updates: Mutex<Vec<RecordingStatus>>,
}

impl StatusLog {
    pub fn updates(&self) -> Vec<RecordingStatus> {
        self.updates.lock().clone()
    }

    pub fn last(&self) -> Option<RecordingStatus> {
        self.updates.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.updates.lock().len()
    }
}

impl StatusSubscriber for StatusLog {
    fn on_status(&self, status: &RecordingStatus) {
        self.updates.lock().push(status.clone());
    }
}

/// Poll `condition` until it holds or a second has passed.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    condition()
}
