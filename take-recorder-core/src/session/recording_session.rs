use std::fs;
use std::mem;
use std::sync::Arc;

use crate::models::audio_models::DeviceCapability;
use crate::models::channel::ChannelMask;
use crate::models::config::{SessionConfig, SessionSettings};
use crate::models::error::CaptureError;
use crate::models::recording_result::TakeId;
use crate::models::results::{ConfigResult, ListenResult, TakeFinishResult, TakeStartResult};
use crate::models::state::SessionPhase;
use crate::session::machine::{Context, SessionCommand, SessionResponse, SessionState};
use crate::session::take_recorder::Subscribers;
use crate::storage::retention::TakeRetention;
use crate::traits::audio_source::AudioSource;
use crate::traits::status_subscriber::{StatusSubscriber, SubscriberId};
use crate::traits::track_store::TrackStore;

/// A multitrack recording session on one audio input device.
///
/// The session is the controller side: it validates configurations, starts
/// and stops the capture loop and sends it take commands. Finished takes
/// are held in the take directory until retained into the [`TrackStore`]
/// or discarded, either explicitly or once the take lifetime passes.
///
/// ```text
/// configure → start_listening → start_take → finish_take → retain_take
///                                                        ↘ discard_take
/// ```
///
/// Sequencing outcomes come back as result enums; `Err` is reserved for
/// failures such as a dead capture loop or a storage error.
pub struct RecordingSession<A: AudioSource, S: TrackStore + 'static> {
    source: A,
    settings: SessionSettings,
    state: SessionState,
    subscribers: Subscribers,
    next_subscriber_id: u64,
    retention: TakeRetention<S>,
    shut_down: bool,
}

impl<A: AudioSource, S: TrackStore + 'static> RecordingSession<A, S> {
    pub fn new(source: A, store: Arc<S>, settings: SessionSettings) -> Result<Self, CaptureError> {
        settings.validate().map_err(CaptureError::ConfigurationFailed)?;
        fs::create_dir_all(&settings.take_directory)?;
        let retention = TakeRetention::new(store, settings.take_lifetime)?;

        Ok(Self {
            source,
            settings,
            state: SessionState::Idle,
            subscribers: Vec::new(),
            next_subscriber_id: 0,
            retention,
            shut_down: false,
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn source(&self) -> &A {
        &self.source
    }

    /// Input devices offered by the audio source.
    pub fn devices(&self) -> Vec<DeviceCapability> {
        self.source.devices()
    }

    /// The accepted configuration, if any.
    pub fn config(&self) -> Option<&SessionConfig> {
        self.state.configured().map(|c| &c.config)
    }

    /// The device mask the capture loop reads, if configured.
    pub fn channel_mask(&self) -> Option<ChannelMask> {
        self.state.configured().map(|c| c.channel_mask)
    }

    /// Validate `config` against its device and adopt it.
    ///
    /// Refused while recording. While listening the loop is restarted with
    /// the new config; an invalid config leaves the session idle.
    pub fn configure(&mut self, config: SessionConfig) -> Result<ConfigResult, CaptureError> {
        self.step(SessionCommand::Configure(config))?.into_config()
    }

    pub fn start_listening(&mut self) -> Result<ListenResult, CaptureError> {
        self.step(SessionCommand::StartListening)?.into_listen()
    }

    /// Stop the capture loop. Refused while recording.
    pub fn stop_listening(&mut self) -> Result<ListenResult, CaptureError> {
        self.step(SessionCommand::StopListening)?.into_listen()
    }

    pub fn start_take(&mut self) -> Result<TakeStartResult, CaptureError> {
        self.step(SessionCommand::StartTake)?.into_take_start()
    }

    /// Close the current take. Its files stay in the take directory under
    /// the returned id until retained, discarded or expired.
    pub fn finish_take(&mut self) -> Result<TakeFinishResult, CaptureError> {
        self.step(SessionCommand::FinishTake)?.into_take_finish()
    }

    /// Move a finished take into the track store. `Ok(false)` when no take
    /// is known under `id`, e.g. because it expired.
    pub fn retain_take(&self, id: TakeId) -> Result<bool, CaptureError> {
        Ok(self.retention.retain(id)?.is_some())
    }

    /// Delete a finished take's files. Unknown ids are ignored.
    pub fn discard_take(&self, id: TakeId) -> Result<(), CaptureError> {
        self.retention.discard(id)
    }

    /// Ids of finished takes still awaiting a decision.
    pub fn pending_takes(&self) -> Vec<TakeId> {
        self.retention.pending_ids()
    }

    /// Receive a [`RecordingStatus`](crate::RecordingStatus) after every
    /// capture loop iteration. Subscriptions survive stopping and restarting
    /// the loop.
    pub fn subscribe(&mut self, subscriber: Arc<dyn StatusSubscriber>) -> Result<SubscriberId, CaptureError> {
        let id = SubscriberId(self.next_subscriber_id);
        self.next_subscriber_id += 1;
        self.subscribers.push((id, Arc::clone(&subscriber)));
        self.step(SessionCommand::Subscribe(id, subscriber))?;
        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> Result<(), CaptureError> {
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.step(SessionCommand::Unsubscribe(id))?;
        Ok(())
    }

    /// Finish and retain any take in progress, stop listening and discard
    /// every take still awaiting a decision.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if let Err(e) = self.step(SessionCommand::Shutdown) {
            log::warn!("session shutdown: {}", e);
        }
        self.retention.shutdown();
        log::info!("session shut down");
    }

    fn step(&mut self, command: SessionCommand) -> Result<SessionResponse, CaptureError> {
        if self.shut_down && !matches!(command, SessionCommand::Shutdown) {
            return Err(CaptureError::InvariantViolation("session has been shut down".into()));
        }

        let ctx = Context {
            source: &self.source,
            settings: &self.settings,
            subscribers: &self.subscribers,
            retention: &self.retention,
        };
        let before = self.state.phase();
        let state = mem::replace(&mut self.state, SessionState::Idle);
        let (state, response) = state.step(command, &ctx);
        self.state = state;

        let after = self.state.phase();
        if before != after {
            log::info!("session {:?} → {:?}", before, after);
        }
        response
    }
}

impl<A: AudioSource, S: TrackStore + 'static> Drop for RecordingSession<A, S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
