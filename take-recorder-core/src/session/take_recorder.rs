//! The capture loop.
//!
//! Runs on its own thread and owns the audio input and every take writer.
//! Each iteration reads what the input has buffered, splits the frames into
//! tracks, meters and writes them, answers at most one controller command and
//! broadcasts a [`RecordingStatus`].
//!
//! ```text
//! [AudioInput] → frame buffer ─┬→ track 1 → peaks, WavFileWriter
//!                              ├→ track 2 → peaks, WavFileWriter
//!                              └→ ...
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;

use crate::control::remote_control::{self, CommandReceiver, RemoteControl};
use crate::models::audio_models::{InputFormat, RecordingStatus, TrackLevels};
use crate::models::channel::Channel;
use crate::models::config::{SessionSettings, TrackConfig};
use crate::models::error::CaptureError;
use crate::models::recording_result::{FinishedTake, TakeFile};
use crate::processing::sample;
use crate::processing::wav_format::WavFormat;
use crate::storage::wav_writer::WavFileWriter;
use crate::traits::audio_source::AudioInput;
use crate::traits::status_subscriber::{StatusSubscriber, SubscriberId};

/// Timestamp prefix shared by the files of a take.
pub const TAKE_NAME_FORMAT: &str = "%Y%m%d_%H%M%S";

pub type Subscribers = Vec<(SubscriberId, Arc<dyn StatusSubscriber>)>;

/// Commands the controller sends to the capture loop.
pub enum RecorderCommand {
    /// Close the current take, if any, and optionally start the next one.
    FinishTake { start_next: bool },
    /// Leave the loop. Refused while recording.
    StopListening,
    Subscribe(SubscriberId, Arc<dyn StatusSubscriber>),
    Unsubscribe(SubscriberId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderResponse {
    /// The take that was closed, `None` if nothing was recording.
    TakeFinished(Option<FinishedTake>),
    Stopped,
    CannotStopWhileRecording,
    Done,
}

/// How the capture loop ended.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub result: Result<(), CaptureError>,
    /// Files of a take that was still recording when the loop ended; the
    /// writers have been closed best-effort.
    pub unfinished_take: Option<FinishedTake>,
}

struct TrackRuntime {
    config: TrackConfig,
    left_index: usize,
    right_index: Option<usize>,
    left_peak: f32,
    right_peak: f32,
    staged: Vec<u8>,
    writer: Option<(WavFileWriter, TakeFile)>,
}

impl TrackRuntime {
    fn levels(&self) -> TrackLevels {
        TrackLevels {
            left: self.left_peak,
            right: self.right_index.map(|_| self.right_peak),
        }
    }
}

struct TakeInProgress {
    name: String,
    frames: u64,
}

/// State owned by the capture thread.
pub struct TakeRecorder<I: AudioInput> {
    input: I,
    format: InputFormat,
    tracks: Vec<TrackRuntime>,
    subscribers: Subscribers,
    buffer: Vec<u8>,
    take_directory: PathBuf,
    poll_delay: Duration,
    writer_buffer_capacity: usize,
    recording: Option<TakeInProgress>,
    listening: bool,
}

impl<I: AudioInput> TakeRecorder<I> {
    /// Every track channel must be part of `format.channel_mask`.
    pub fn new(
        input: I,
        format: InputFormat,
        tracks: &[TrackConfig],
        settings: &SessionSettings,
        subscribers: Subscribers,
    ) -> Result<Self, CaptureError> {
        let mask = format.channel_mask;
        let index_of = |channel: Channel| {
            mask.index_of(channel).ok_or_else(|| {
                CaptureError::ConfigurationFailed(format!("channel {} is not part of {}", channel, mask))
            })
        };

        let tracks = tracks
            .iter()
            .map(|config| -> Result<TrackRuntime, CaptureError> {
                Ok(TrackRuntime {
                    left_index: index_of(config.left_or_mono_channel)?,
                    right_index: config.right_channel.map(index_of).transpose()?,
                    config: config.clone(),
                    left_peak: 0.0,
                    right_peak: 0.0,
                    staged: Vec::new(),
                    writer: None,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let frame_size = format.frame_size();
        if frame_size == 0 || format.sample_rate == 0 {
            return Err(CaptureError::ConfigurationFailed(format!(
                "cannot capture {} at {}Hz from {}",
                format.encoding, format.sample_rate, mask
            )));
        }

        Ok(Self {
            input,
            format,
            tracks,
            subscribers,
            // about one second of audio
            buffer: vec![0u8; format.bytes_per_second()],
            take_directory: settings.take_directory.clone(),
            poll_delay: settings.poll_delay,
            writer_buffer_capacity: settings.writer_buffer_capacity,
            recording: None,
            listening: true,
        })
    }

    /// Run until stopped or until reading or writing fails.
    pub fn run(mut self, commands: CommandReceiver<RecorderCommand, RecorderResponse>) -> CaptureOutcome {
        log::info!(
            "capture loop started: {} tracks from {} at {}Hz, {}",
            self.tracks.len(),
            self.format.channel_mask,
            self.format.sample_rate,
            self.format.encoding
        );

        let result = loop {
            match self.iterate(&commands) {
                Ok(true) => thread::sleep(self.poll_delay),
                Ok(false) => break Ok(()),
                Err(e) => {
                    log::error!("capture loop failed: {}", e);
                    break Err(e);
                }
            }
        };

        let unfinished_take = if self.recording.is_some() {
            Some(self.close_take())
        } else {
            None
        };
        self.input.release();
        self.listening = false;
        self.broadcast(&RecordingStatus::stopped());
        log::info!("capture loop stopped");

        CaptureOutcome { result, unfinished_take }
    }

    /// One pass of the loop. `Ok(false)` once listening has stopped.
    fn iterate(&mut self, commands: &CommandReceiver<RecorderCommand, RecorderResponse>) -> Result<bool, CaptureError> {
        let bytes_read = self.input.read(&mut self.buffer)?;
        let frames = (bytes_read / self.format.frame_size()) as u64;
        let audio_time = Duration::from_micros(frames * 1_000_000 / u64::from(self.format.sample_rate));

        let started = Instant::now();
        self.process_frames(frames as usize)?;
        let spent = started.elapsed();

        let load = load_percentage(spent, audio_time);
        log::debug!(
            "{} frames ({:?} of audio) processed in {:?}, load {}%",
            frames,
            audio_time,
            spent,
            load
        );
        if let Some(take) = &mut self.recording {
            take.frames += frames;
        }

        commands.process_next_command(|command| self.handle_command(command))?;
        if !self.listening {
            return Ok(false);
        }

        let status = RecordingStatus {
            is_listening: true,
            is_recording: self.recording.is_some(),
            load_percentage: load,
            track_levels: self.tracks.iter().map(|t| (t.config.id, t.levels())).collect::<BTreeMap<_, _>>(),
            take_duration: self.take_duration(),
        };
        self.broadcast(&status);
        Ok(true)
    }

    fn process_frames(&mut self, frames: usize) -> Result<(), CaptureError> {
        let frame_size = self.format.frame_size();
        let encoding = self.format.encoding;
        let width = encoding.bytes_per_sample();
        let data = &self.buffer[..frames * frame_size];

        for track in &mut self.tracks {
            track.left_peak = 0.0;
            track.right_peak = 0.0;
            track.staged.clear();
            let recording = track.writer.is_some();

            for frame in data.chunks_exact(frame_size) {
                if let Some(left) = sample::sample_in_frame(frame, width, track.left_index) {
                    track.left_peak = track.left_peak.max(sample::sample_magnitude(left, encoding));
                    if recording {
                        track.staged.extend_from_slice(left);
                    }
                }
                if let Some(right) = track
                    .right_index
                    .and_then(|index| sample::sample_in_frame(frame, width, index))
                {
                    track.right_peak = track.right_peak.max(sample::sample_magnitude(right, encoding));
                    if recording {
                        track.staged.extend_from_slice(right);
                    }
                }
            }

            if let Some((writer, _)) = &mut track.writer {
                writer.write(&track.staged)?;
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, command: RecorderCommand) -> Result<RecorderResponse, CaptureError> {
        match command {
            RecorderCommand::FinishTake { start_next } => {
                let finished = match self.recording {
                    Some(_) => Some(self.close_take()),
                    None => None,
                };
                if start_next {
                    self.open_take()?;
                }
                Ok(RecorderResponse::TakeFinished(finished))
            }
            RecorderCommand::StopListening => {
                if self.recording.is_some() {
                    Ok(RecorderResponse::CannotStopWhileRecording)
                } else {
                    self.listening = false;
                    Ok(RecorderResponse::Stopped)
                }
            }
            RecorderCommand::Subscribe(id, subscriber) => {
                self.subscribers.retain(|(existing, _)| *existing != id);
                self.subscribers.push((id, subscriber));
                Ok(RecorderResponse::Done)
            }
            RecorderCommand::Unsubscribe(id) => {
                self.subscribers.retain(|(existing, _)| *existing != id);
                Ok(RecorderResponse::Done)
            }
        }
    }

    fn open_take(&mut self) -> Result<(), CaptureError> {
        let name = Local::now().format(TAKE_NAME_FORMAT).to_string();

        for index in 0..self.tracks.len() {
            let track = &self.tracks[index];
            let format = WavFormat::new(
                self.format.encoding,
                track.config.channel_count(),
                self.format.sample_rate,
            );
            let path = self.take_directory.join(format!("take-{}.wav.tmp", uuid::Uuid::new_v4()));
            let file = TakeFile {
                path: path.clone(),
                display_name: format!("{}_{}.wav", name, track.config.label),
                track_id: track.config.id,
            };

            match WavFileWriter::create(path, &format, self.writer_buffer_capacity) {
                Ok(writer) => self.tracks[index].writer = Some((writer, file)),
                Err(e) => {
                    // undo the files opened so far
                    for track in &mut self.tracks[..index] {
                        if let Some((mut writer, file)) = track.writer.take() {
                            let _ = writer.close();
                            let _ = fs::remove_file(&file.path);
                        }
                    }
                    return Err(e);
                }
            }
        }

        log::info!("take {} started", name);
        self.recording = Some(TakeInProgress { name, frames: 0 });
        Ok(())
    }

    /// Close every writer of the current take. A writer that fails to close
    /// is logged and its file is still reported.
    fn close_take(&mut self) -> FinishedTake {
        let take = self.collect_take(|e| log::error!("failed to close take file: {}", e));
        log::info!("take {} finished", take.name);
        take
    }

    fn collect_take(&mut self, mut on_error: impl FnMut(CaptureError)) -> FinishedTake {
        let name = self.recording.take().map(|t| t.name).unwrap_or_default();
        let mut files = Vec::with_capacity(self.tracks.len());
        for track in &mut self.tracks {
            if let Some((mut writer, file)) = track.writer.take() {
                if let Err(e) = writer.close() {
                    on_error(e);
                }
                files.push(file);
            }
        }
        FinishedTake {
            name,
            finished_at: Local::now(),
            files,
        }
    }

    fn take_duration(&self) -> Duration {
        match &self.recording {
            Some(take) => Duration::from_micros(take.frames * 1_000_000 / u64::from(self.format.sample_rate)),
            None => Duration::ZERO,
        }
    }

    fn broadcast(&self, status: &RecordingStatus) {
        for (_, subscriber) in &self.subscribers {
            subscriber.on_status(status);
        }
    }
}

/// Processing time relative to the audio time it covered, in percent.
/// Zero when no audio was read.
pub fn load_percentage(spent: Duration, audio_time: Duration) -> u32 {
    if audio_time.is_zero() {
        return 0;
    }
    let percent = spent.as_secs_f64() / audio_time.as_secs_f64() * 100.0;
    percent.round().min(f64::from(u32::MAX)) as u32
}

/// Controller's handle on a running capture loop.
pub struct RecorderHandle {
    control: RemoteControl<RecorderCommand, RecorderResponse>,
    thread: thread::JoinHandle<CaptureOutcome>,
}

impl RecorderHandle {
    /// Start `recorder` on a new thread.
    pub fn spawn<I: AudioInput + 'static>(
        recorder: TakeRecorder<I>,
        backoff_floor: Duration,
    ) -> Result<Self, CaptureError> {
        let (control, commands) = remote_control::remote_control(backoff_floor);
        let thread = thread::Builder::new()
            .name("take-recorder".into())
            .spawn(move || recorder.run(commands))
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn capture thread: {}", e)))?;
        Ok(Self { control, thread })
    }

    pub fn execute(&self, command: RecorderCommand, expect_response_after: Duration) -> Result<RecorderResponse, CaptureError> {
        self.control.execute_command(command, expect_response_after)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the capture thread to exit.
    pub fn join(self) -> CaptureOutcome {
        self.thread.join().unwrap_or_else(|_| CaptureOutcome {
            result: Err(CaptureError::Unknown("capture thread panicked".into())),
            unfinished_take: None,
        })
    }
}
