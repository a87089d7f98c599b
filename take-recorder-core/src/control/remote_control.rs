//! Command/response mailbox between a controller and a worker thread that
//! must never block.
//!
//! Both directions are single-slot bounded channels. The worker only ever
//! uses `try_recv`/`try_send`; controllers wait on the response with a
//! decaying timeout and are serialised by a mutex so at most one command is
//! in flight.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::{Mutex, MutexGuard};

use crate::models::error::CaptureError;

/// Lowest wait between two response polls.
pub const DEFAULT_BACKOFF_FLOOR: Duration = Duration::from_millis(20);

type Envelope<R> = (u64, Result<R, CaptureError>);

/// Create a connected controller/worker pair.
pub fn remote_control<C, R>(backoff_floor: Duration) -> (RemoteControl<C, R>, CommandReceiver<C, R>) {
    let (command_tx, command_rx) = bounded(1);
    let (result_tx, result_rx) = bounded(1);
    let worker = Arc::new(OnceLock::new());
    let alive = Arc::new(AtomicBool::new(true));

    let control = RemoteControl {
        in_flight: Mutex::new(()),
        commands: command_tx,
        results: result_rx.clone(),
        sequence: AtomicU64::new(0),
        worker: Arc::clone(&worker),
        worker_alive: Arc::clone(&alive),
        backoff_floor: backoff_floor.max(Duration::from_millis(1)),
    };
    let receiver = CommandReceiver {
        commands: command_rx,
        results: result_tx,
        stale_results: result_rx,
        worker,
        alive,
    };
    (control, receiver)
}

/// Controller side. Shareable between controller threads.
pub struct RemoteControl<C, R> {
    in_flight: Mutex<()>,
    commands: Sender<(u64, C)>,
    results: Receiver<Envelope<R>>,
    sequence: AtomicU64,
    worker: Arc<OnceLock<ThreadId>>,
    worker_alive: Arc<AtomicBool>,
    backoff_floor: Duration,
}

impl<C, R> RemoteControl<C, R> {
    /// Send `command` and wait for the worker's response.
    ///
    /// Waits for other controllers first, then polls for the response with a
    /// timeout that starts at `expect_response_after` and halves on every
    /// retry down to the backoff floor. Errors returned by the worker's
    /// handler are passed through unchanged.
    ///
    /// A command left queued by an abandoned [`PendingResponse`] is the
    /// "already pending" invariant violation; it is reported as
    /// [`CaptureError::CommandPending`] so callers can tell it apart from
    /// misuse such as calling from the worker thread.
    pub fn execute_command(&self, command: C, expect_response_after: Duration) -> Result<R, CaptureError> {
        self.check_not_worker()?;
        let guard = self.in_flight.lock();
        self.send(guard, command)?.wait(expect_response_after)
    }

    /// Send `command` without waiting for the response.
    ///
    /// Fails with [`CaptureError::CommandPending`] instead of blocking when
    /// another command is in flight.
    pub fn submit(&self, command: C) -> Result<PendingResponse<'_, C, R>, CaptureError> {
        self.check_not_worker()?;
        let guard = self.in_flight.try_lock().ok_or(CaptureError::CommandPending)?;
        self.send(guard, command)
    }

    /// True once the worker side has been dropped.
    pub fn is_worker_terminated(&self) -> bool {
        !self.worker_alive.load(Ordering::SeqCst)
    }

    fn check_not_worker(&self) -> Result<(), CaptureError> {
        if self.worker.get() == Some(&thread::current().id()) {
            return Err(CaptureError::InvariantViolation(
                "a command was issued from the worker thread".into(),
            ));
        }
        Ok(())
    }

    fn send<'a>(&'a self, guard: MutexGuard<'a, ()>, command: C) -> Result<PendingResponse<'a, C, R>, CaptureError> {
        // responses to abandoned commands
        while self.results.try_recv().is_ok() {}

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        match self.commands.try_send((sequence, command)) {
            Ok(()) => Ok(PendingResponse {
                control: self,
                sequence,
                _guard: guard,
            }),
            Err(TrySendError::Full(_)) => Err(CaptureError::CommandPending),
            Err(TrySendError::Disconnected(_)) => Err(CaptureError::WorkerTerminated),
        }
    }
}

/// A command that has been handed to the worker. Holds the controller lock
/// until the response is collected or the value is dropped.
pub struct PendingResponse<'a, C, R> {
    control: &'a RemoteControl<C, R>,
    sequence: u64,
    _guard: MutexGuard<'a, ()>,
}

impl<C, R> PendingResponse<'_, C, R> {
    pub fn wait(self, expect_response_after: Duration) -> Result<R, CaptureError> {
        let floor = self.control.backoff_floor;
        let mut timeout = expect_response_after.max(floor);
        loop {
            match self.control.results.recv_timeout(timeout) {
                Ok((sequence, result)) if sequence == self.sequence => return result,
                Ok((sequence, _)) => log::warn!("dropping stale response to command #{}", sequence),
                Err(RecvTimeoutError::Timeout) => timeout = (timeout / 2).max(floor),
                Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::WorkerTerminated),
            }
        }
    }
}

/// Worker side. Owned by the worker thread.
pub struct CommandReceiver<C, R> {
    commands: Receiver<(u64, C)>,
    results: Sender<Envelope<R>>,
    stale_results: Receiver<Envelope<R>>,
    worker: Arc<OnceLock<ThreadId>>,
    alive: Arc<AtomicBool>,
}

impl<C, R> CommandReceiver<C, R> {
    /// Run `handler` on the pending command, if there is one, and publish its
    /// result. Never blocks.
    ///
    /// Returns whether a command was processed. Panics in `handler` are
    /// reported to the controller as [`CaptureError::Unknown`].
    pub fn process_next_command<F>(&self, handler: F) -> Result<bool, CaptureError>
    where
        F: FnOnce(C) -> Result<R, CaptureError>,
    {
        let current = thread::current().id();
        if *self.worker.get_or_init(|| current) != current {
            return Err(CaptureError::InvariantViolation(
                "commands must be processed on the worker thread".into(),
            ));
        }

        let (sequence, command) = match self.commands.try_recv() {
            Ok(envelope) => envelope,
            Err(TryRecvError::Empty) => return Ok(false),
            // every controller is gone; nothing left to answer
            Err(TryRecvError::Disconnected) => return Ok(false),
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| handler(command)))
            .unwrap_or_else(|payload| Err(CaptureError::Unknown(panic_message(payload.as_ref()))));

        self.publish((sequence, result));
        Ok(true)
    }

    fn publish(&self, mut envelope: Envelope<R>) {
        for _ in 0..2 {
            match self.results.try_send(envelope) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(rejected)) => {
                    // an abandoned response is still in the slot
                    let _ = self.stale_results.try_recv();
                    envelope = rejected;
                }
            }
        }
        log::warn!("response to command #{} could not be delivered", envelope.0);
    }
}

impl<C, R> Drop for CommandReceiver<C, R> {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "command handler panicked".to_string()
    }
}
