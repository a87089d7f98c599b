//! Session state and its transition function.
//!
//! ```text
//! Idle ──configure──▶ Configured ──start_listening──▶ Active (listening)
//!  ▲                      ▲  │                          │  ▲
//!  └──invalid config──────┘  └──configure (re-validate)  start_take / finish_take
//!                         ◀──────stop_listening─────────┘
//! ```
//!
//! [`SessionState::step`] consumes the current state and returns the next
//! one along with the response; nothing else mutates session state.

use std::fmt;
use std::sync::Arc;

use crate::models::audio_models::{DeviceCapability, InputFormat};
use crate::models::channel::ChannelMask;
use crate::models::config::{SessionConfig, SessionSettings};
use crate::models::error::CaptureError;
use crate::models::recording_result::TakeId;
use crate::models::results::{ConfigResult, ListenResult, TakeFinishResult, TakeStartResult};
use crate::models::state::SessionPhase;
use crate::session::take_recorder::{
    CaptureOutcome, RecorderCommand, RecorderHandle, RecorderResponse, Subscribers, TakeRecorder,
};
use crate::storage::retention::TakeRetention;
use crate::traits::audio_source::{AudioInput, AudioSource};
use crate::traits::status_subscriber::{StatusSubscriber, SubscriberId};
use crate::traits::track_store::TrackStore;

/// A config validated against the device it targets.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredSession {
    pub device: DeviceCapability,
    pub config: SessionConfig,
    /// Smallest device-offered mask covering every track channel.
    pub channel_mask: ChannelMask,
}

impl ConfiguredSession {
    pub fn input_format(&self) -> InputFormat {
        InputFormat {
            sample_rate: self.config.sample_rate,
            encoding: self.config.encoding,
            channel_mask: self.channel_mask,
        }
    }
}

/// A running capture loop.
pub struct ActiveSession {
    pub configured: ConfiguredSession,
    recorder: RecorderHandle,
    recording: bool,
}

impl ActiveSession {
    pub fn is_recording(&self) -> bool {
        self.recording
    }
}

pub enum SessionState {
    Idle,
    Configured(ConfiguredSession),
    Active(ActiveSession),
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            Self::Idle => SessionPhase::Idle,
            Self::Configured(_) => SessionPhase::Configured,
            Self::Active(active) if active.recording => SessionPhase::Recording,
            Self::Active(_) => SessionPhase::Listening,
        }
    }

    pub fn configured(&self) -> Option<&ConfiguredSession> {
        match self {
            Self::Idle => None,
            Self::Configured(configured) => Some(configured),
            Self::Active(active) => Some(&active.configured),
        }
    }

    /// Apply `command`, returning the next state and the response.
    pub fn step<A, S>(self, command: SessionCommand, ctx: &Context<'_, A, S>) -> Step
    where
        A: AudioSource,
        S: TrackStore + 'static,
    {
        use SessionCommand as C;
        use SessionResponse as R;
        use SessionState::{Active, Configured, Idle};

        match (self, command) {
            (state, C::Configure(config)) => configure(state, config, ctx),

            (Idle, C::StartListening) => (Idle, Ok(R::Listen(ListenResult::NotConfigured))),
            (Configured(configured), C::StartListening) => start_listening(configured, ctx),
            (Active(active), C::StartListening) => (Active(active), Ok(R::Listen(ListenResult::Listening))),

            (Active(active), C::StopListening) if active.recording => {
                (Active(active), Ok(R::Listen(ListenResult::StillRecording)))
            }
            (Active(active), C::StopListening) => stop_loop(active, ctx),
            (state, C::StopListening) => (state, Ok(R::Listen(ListenResult::NotListening))),

            (Active(active), C::StartTake) => start_take(active, ctx),
            (state, C::StartTake) => (state, Ok(R::TakeStart(TakeStartResult::InvalidState))),

            (Active(active), C::FinishTake) => finish_take(active, ctx),
            (state, C::FinishTake) => (state, Ok(R::TakeFinish(TakeFinishResult::InvalidState))),

            (Active(active), C::Subscribe(id, subscriber)) => {
                forward(active, RecorderCommand::Subscribe(id, subscriber), ctx)
            }
            (Active(active), C::Unsubscribe(id)) => forward(active, RecorderCommand::Unsubscribe(id), ctx),
            (state, C::Subscribe(..) | C::Unsubscribe(_)) => (state, Ok(R::Done)),

            (state, C::Shutdown) => shutdown(state, ctx),
        }
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Configured(c) => write!(f, "Configured({} on {})", c.channel_mask, c.config.device),
            Self::Active(a) => write!(
                f,
                "Active({} on {}, recording: {})",
                a.configured.channel_mask, a.configured.config.device, a.recording
            ),
        }
    }
}

pub enum SessionCommand {
    Configure(SessionConfig),
    StartListening,
    StopListening,
    StartTake,
    FinishTake,
    Subscribe(SubscriberId, Arc<dyn StatusSubscriber>),
    Unsubscribe(SubscriberId),
    /// Finish and retain any take in progress, then stop listening.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionResponse {
    Config(ConfigResult),
    Listen(ListenResult),
    TakeStart(TakeStartResult),
    TakeFinish(TakeFinishResult),
    Done,
}

impl SessionResponse {
    pub fn into_config(self) -> Result<ConfigResult, CaptureError> {
        match self {
            Self::Config(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    pub fn into_listen(self) -> Result<ListenResult, CaptureError> {
        match self {
            Self::Listen(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    pub fn into_take_start(self) -> Result<TakeStartResult, CaptureError> {
        match self {
            Self::TakeStart(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    pub fn into_take_finish(self) -> Result<TakeFinishResult, CaptureError> {
        match self {
            Self::TakeFinish(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: impl fmt::Debug) -> CaptureError {
    CaptureError::InvariantViolation(format!("unexpected response {:?}", response))
}

pub type Step = (SessionState, Result<SessionResponse, CaptureError>);

/// What a transition may use besides the state itself.
pub struct Context<'a, A: AudioSource, S: TrackStore> {
    pub source: &'a A,
    pub settings: &'a SessionSettings,
    pub subscribers: &'a Subscribers,
    pub retention: &'a TakeRetention<S>,
}

/// Validate `config` against the device it names.
pub fn resolve<A: AudioSource>(source: &A, config: SessionConfig) -> Result<ConfiguredSession, String> {
    let device = source
        .capabilities(&config.device)
        .ok_or_else(|| format!("no input device {}", config.device))?;
    let channel_mask = config.resolve_against(&device)?;
    Ok(ConfiguredSession {
        device,
        config,
        channel_mask,
    })
}

fn configure<A, S>(state: SessionState, config: SessionConfig, ctx: &Context<'_, A, S>) -> Step
where
    A: AudioSource,
    S: TrackStore + 'static,
{
    match state {
        SessionState::Active(active) if active.recording => (
            SessionState::Active(active),
            Ok(SessionResponse::Config(ConfigResult::StopRecordingFirst)),
        ),
        SessionState::Active(active) => {
            let (state, stopped) = stop_loop(active, ctx);
            if let Err(e) = stopped {
                return (state, Err(e));
            }
            if let SessionState::Active(_) = state {
                return (state, Ok(SessionResponse::Config(ConfigResult::StopRecordingFirst)));
            }

            let (state, result) = configure(state, config, ctx);
            if result != Ok(SessionResponse::Config(ConfigResult::Ok)) {
                return (state, result);
            }
            let (state, listen) = state.step(SessionCommand::StartListening, ctx);
            match listen {
                Ok(SessionResponse::Listen(ListenResult::Listening)) => {}
                other => log::warn!("could not resume listening after reconfiguring: {:?}", other),
            }
            (state, result)
        }
        SessionState::Idle | SessionState::Configured(_) => match resolve(ctx.source, config) {
            Ok(configured) => {
                log::info!(
                    "configured {} tracks on {} using {}",
                    configured.config.tracks.len(),
                    configured.config.device,
                    configured.channel_mask
                );
                (
                    SessionState::Configured(configured),
                    Ok(SessionResponse::Config(ConfigResult::Ok)),
                )
            }
            Err(reason) => {
                log::warn!("rejected configuration: {}", reason);
                (SessionState::Idle, Ok(SessionResponse::Config(ConfigResult::Invalid)))
            }
        },
    }
}

fn start_listening<A, S>(configured: ConfiguredSession, ctx: &Context<'_, A, S>) -> Step
where
    A: AudioSource,
    S: TrackStore + 'static,
{
    let not_listening = |configured: ConfiguredSession, result: ListenResult| -> Step {
        (SessionState::Configured(configured), Ok(SessionResponse::Listen(result)))
    };

    if !ctx.source.has_capture_permission() {
        return not_listening(configured, ListenResult::NoPermission);
    }

    let format = configured.input_format();
    let mut input = match ctx.source.open(&configured.config.device, &format) {
        Ok(input) => input,
        Err(CaptureError::PermissionDenied) => return not_listening(configured, ListenResult::NoPermission),
        Err(e) => {
            log::warn!("failed to open {}: {}", configured.config.device, e);
            return not_listening(configured, ListenResult::DeviceNotAvailable);
        }
    };

    let routed = input.routed_device_id();
    if routed.as_deref() != Some(configured.config.device.id.as_str()) {
        log::warn!(
            "input for {} was routed to {:?}",
            configured.config.device,
            routed
        );
        input.release();
        return not_listening(configured, ListenResult::DeviceNotAvailable);
    }

    let recorder = match TakeRecorder::new(
        input,
        format,
        &configured.config.tracks,
        ctx.settings,
        ctx.subscribers.clone(),
    ) {
        Ok(recorder) => recorder,
        Err(e) => return (SessionState::Configured(configured), Err(e)),
    };
    let recorder = match RecorderHandle::spawn(recorder, ctx.settings.command_backoff_floor) {
        Ok(handle) => handle,
        Err(e) => return (SessionState::Configured(configured), Err(e)),
    };

    log::info!("listening on {}", configured.config.device);
    (
        SessionState::Active(ActiveSession {
            configured,
            recorder,
            recording: false,
        }),
        Ok(SessionResponse::Listen(ListenResult::Listening)),
    )
}

/// Ask the loop to stop and reap its thread.
fn stop_loop<A, S>(mut active: ActiveSession, ctx: &Context<'_, A, S>) -> Step
where
    A: AudioSource,
    S: TrackStore + 'static,
{
    match execute(&active, RecorderCommand::StopListening, ctx) {
        Ok(RecorderResponse::Stopped) => {
            let outcome = active.recorder.join();
            hold_unfinished_take(outcome, ctx);
            log::info!("stopped listening on {}", active.configured.config.device);
            (
                SessionState::Configured(active.configured),
                Ok(SessionResponse::Listen(ListenResult::NotListening)),
            )
        }
        Ok(RecorderResponse::CannotStopWhileRecording) => {
            active.recording = true;
            (
                SessionState::Active(active),
                Ok(SessionResponse::Listen(ListenResult::StillRecording)),
            )
        }
        Ok(other) => (SessionState::Active(active), Err(unexpected(other))),
        Err(CaptureError::WorkerTerminated) => loop_died(active, ctx),
        Err(e) => (SessionState::Active(active), Err(e)),
    }
}

fn start_take<A, S>(mut active: ActiveSession, ctx: &Context<'_, A, S>) -> Step
where
    A: AudioSource,
    S: TrackStore + 'static,
{
    if active.recording {
        return (
            SessionState::Active(active),
            Ok(SessionResponse::TakeStart(TakeStartResult::AlreadyRecording)),
        );
    }

    match execute(&active, RecorderCommand::FinishTake { start_next: true }, ctx) {
        Ok(RecorderResponse::TakeFinished(previous)) => {
            if let Some(take) = previous {
                ctx.retention.register(take);
            }
            active.recording = true;
            (
                SessionState::Active(active),
                Ok(SessionResponse::TakeStart(TakeStartResult::Recording)),
            )
        }
        Ok(other) => (SessionState::Active(active), Err(unexpected(other))),
        Err(CaptureError::WorkerTerminated) => loop_died(active, ctx),
        Err(e) => (SessionState::Active(active), Err(e)),
    }
}

fn finish_take<A, S>(mut active: ActiveSession, ctx: &Context<'_, A, S>) -> Step
where
    A: AudioSource,
    S: TrackStore + 'static,
{
    if !active.recording {
        return (
            SessionState::Active(active),
            Ok(SessionResponse::TakeFinish(TakeFinishResult::NotRecording)),
        );
    }

    match execute(&active, RecorderCommand::FinishTake { start_next: false }, ctx) {
        Ok(RecorderResponse::TakeFinished(finished)) => {
            active.recording = false;
            let result = match finished {
                Some(take) => TakeFinishResult::Finished(ctx.retention.register(take)),
                None => TakeFinishResult::NotRecording,
            };
            (SessionState::Active(active), Ok(SessionResponse::TakeFinish(result)))
        }
        Ok(other) => (SessionState::Active(active), Err(unexpected(other))),
        Err(CaptureError::WorkerTerminated) => loop_died(active, ctx),
        Err(e) => (SessionState::Active(active), Err(e)),
    }
}

fn forward<A, S>(active: ActiveSession, command: RecorderCommand, ctx: &Context<'_, A, S>) -> Step
where
    A: AudioSource,
    S: TrackStore + 'static,
{
    match execute(&active, command, ctx) {
        Ok(RecorderResponse::Done) => (SessionState::Active(active), Ok(SessionResponse::Done)),
        Ok(other) => (SessionState::Active(active), Err(unexpected(other))),
        Err(CaptureError::WorkerTerminated) => loop_died(active, ctx),
        Err(e) => (SessionState::Active(active), Err(e)),
    }
}

fn shutdown<A, S>(state: SessionState, ctx: &Context<'_, A, S>) -> Step
where
    A: AudioSource,
    S: TrackStore + 'static,
{
    let SessionState::Active(mut active) = state else {
        return (SessionState::Idle, Ok(SessionResponse::Done));
    };

    if active.recording {
        match execute(&active, RecorderCommand::FinishTake { start_next: false }, ctx) {
            Ok(RecorderResponse::TakeFinished(Some(take))) => {
                active.recording = false;
                retain_now(ctx.retention.register(take), ctx);
            }
            Ok(other) => log::warn!("unexpected response while finishing the take: {:?}", other),
            Err(CaptureError::WorkerTerminated) => {
                let outcome = active.recorder.join();
                log::warn!("capture loop was already gone at shutdown: {:?}", outcome.result);
                if let Some(id) = hold_unfinished_take(outcome, ctx) {
                    retain_now(id, ctx);
                }
                return (SessionState::Idle, Ok(SessionResponse::Done));
            }
            Err(e) => log::error!("failed to finish the take at shutdown: {}", e),
        }
    }

    match stop_loop(active, ctx) {
        (SessionState::Active(_), result) => {
            // the capture thread is left detached
            log::error!("capture loop refused to stop at shutdown: {:?}", result);
        }
        (_, Err(e)) => log::warn!("capture loop ended with an error: {}", e),
        _ => {}
    }
    (SessionState::Idle, Ok(SessionResponse::Done))
}

fn execute<A, S>(
    active: &ActiveSession,
    command: RecorderCommand,
    ctx: &Context<'_, A, S>,
) -> Result<RecorderResponse, CaptureError>
where
    A: AudioSource,
    S: TrackStore,
{
    active.recorder.execute(command, ctx.settings.command_response_after)
}

/// The loop exited on its own, e.g. after a read failure. Whatever it was
/// recording is held for retention and the session needs reconfiguring.
fn loop_died<A, S>(active: ActiveSession, ctx: &Context<'_, A, S>) -> Step
where
    A: AudioSource,
    S: TrackStore + 'static,
{
    let outcome = active.recorder.join();
    log::error!("capture loop on {} terminated: {:?}", active.configured.config.device, outcome.result);
    hold_unfinished_take(outcome, ctx);
    (SessionState::Idle, Err(CaptureError::WorkerTerminated))
}

fn hold_unfinished_take<A, S>(outcome: CaptureOutcome, ctx: &Context<'_, A, S>) -> Option<TakeId>
where
    A: AudioSource,
    S: TrackStore + 'static,
{
    let take = outcome.unfinished_take?;
    let id = ctx.retention.register(take);
    log::warn!("unfinished take held for retention as #{}", id);
    Some(id)
}

fn retain_now<A, S>(id: TakeId, ctx: &Context<'_, A, S>)
where
    A: AudioSource,
    S: TrackStore + 'static,
{
    match ctx.retention.retain(id) {
        Ok(Some(take)) => log::info!("retained take {} at shutdown", take.id),
        Ok(None) => log::warn!("take #{} vanished before it could be retained", id),
        Err(e) => log::error!("failed to retain take #{} at shutdown: {}", id, e),
    }
}
