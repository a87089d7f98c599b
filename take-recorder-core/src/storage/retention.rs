//! Deferred retention of finished takes.
//!
//! A finished take stays on disk in the take directory until it is either
//! retained (copied into the [`TrackStore`]) or discarded. A sweep thread
//! discards takes nobody decided about within the take lifetime.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::metadata;
use crate::models::error::CaptureError;
use crate::models::recording_result::{FinishedTake, RetainedFile, RetainedTake, TakeFile, TakeId};
use crate::traits::track_store::TrackStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TakeLifecycle {
    Movable,
    Moved,
    Discarded,
}

/// A finished take awaiting a retain-or-discard decision.
///
/// Retaining and discarding are mutually exclusive: once one has happened
/// the other fails with [`CaptureError::TakeMoved`] or
/// [`CaptureError::TakeDiscarded`].
pub struct RetainableTake {
    take: FinishedTake,
    registered_at: Instant,
    lifecycle: Mutex<TakeLifecycle>,
}

impl RetainableTake {
    pub fn new(take: FinishedTake) -> Self {
        Self {
            take,
            registered_at: Instant::now(),
            lifecycle: Mutex::new(TakeLifecycle::Movable),
        }
    }

    pub fn take(&self) -> &FinishedTake {
        &self.take
    }

    pub fn age(&self) -> Duration {
        self.registered_at.elapsed()
    }

    pub fn is_movable(&self) -> bool {
        *self.lifecycle.lock() == TakeLifecycle::Movable
    }

    /// Copy every file that still exists into `store` and remove it from the
    /// take directory.
    ///
    /// On failure the take stays movable; files persisted before the failure
    /// are skipped when retrying.
    pub fn retain<S: TrackStore + ?Sized>(&self, store: &S) -> Result<RetainedTake, CaptureError> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            TakeLifecycle::Moved => return Err(CaptureError::TakeMoved),
            TakeLifecycle::Discarded => return Err(CaptureError::TakeDiscarded),
            TakeLifecycle::Movable => {}
        }

        let mut files = Vec::with_capacity(self.take.files.len());
        for file in &self.take.files {
            if !file.path.exists() {
                log::debug!("{} is already persisted, skipping", file.display_name);
                continue;
            }
            files.push(persist_file(store, file)?);
        }

        *lifecycle = TakeLifecycle::Moved;
        drop(lifecycle);

        let retained = RetainedTake {
            id: self.take.name.clone(),
            finished_at: self.take.finished_at,
            retained_at: Local::now(),
            files,
        };
        if let Err(e) = store.take_retained(&retained) {
            log::warn!("failed to record metadata of take {}: {}", retained.id, e);
        }
        log::info!("retained take {} ({} files)", retained.id, retained.files.len());
        Ok(retained)
    }

    /// Delete the take's files. Discarding twice is a no-op.
    pub fn discard(&self) -> Result<(), CaptureError> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            TakeLifecycle::Moved => return Err(CaptureError::TakeMoved),
            TakeLifecycle::Discarded => return Ok(()),
            TakeLifecycle::Movable => *lifecycle = TakeLifecycle::Discarded,
        }
        drop(lifecycle);

        for file in &self.take.files {
            match fs::remove_file(&file.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("failed to delete {}: {}", file.path.display(), e),
            }
        }
        log::info!("discarded take {}", self.take.name);
        Ok(())
    }
}

fn persist_file<S: TrackStore + ?Sized>(store: &S, file: &TakeFile) -> Result<RetainedFile, CaptureError> {
    let checksum = metadata::sha256_file(&file.path)?;

    let handle = store.create_pending(&file.display_name)?;
    let size_bytes = {
        let mut input = File::open(&file.path)?;
        let mut output = store.open_for_write(&handle)?;
        let copied = io::copy(&mut input, &mut output)?;
        output.flush()?;
        copied
    };
    store.finalize(handle)?;

    fs::remove_file(&file.path)?;
    Ok(RetainedFile {
        track_id: file.track_id,
        display_name: file.display_name.clone(),
        size_bytes,
        checksum,
    })
}

type Registry = Arc<Mutex<BTreeMap<TakeId, Arc<RetainableTake>>>>;

/// Registry of finished takes plus the sweep thread that expires them.
pub struct TakeRetention<S: TrackStore> {
    store: Arc<S>,
    takes: Registry,
    lifetime: Duration,
    stop_sweep: Option<Sender<()>>,
    sweep_handle: Option<thread::JoinHandle<()>>,
}

impl<S: TrackStore + 'static> TakeRetention<S> {
    /// Start the sweep thread. It wakes once per `lifetime`.
    pub fn new(store: Arc<S>, lifetime: Duration) -> Result<Self, CaptureError> {
        let takes: Registry = Arc::new(Mutex::new(BTreeMap::new()));
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let registry = Arc::clone(&takes);
        let handle = thread::Builder::new()
            .name("take-sweep".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(lifetime) {
                    Err(RecvTimeoutError::Timeout) => sweep_expired(&registry, lifetime),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn sweep thread: {}", e)))?;

        Ok(Self {
            store,
            takes,
            lifetime,
            stop_sweep: Some(stop_tx),
            sweep_handle: Some(handle),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Hold `take` under the smallest unused id.
    pub fn register(&self, take: FinishedTake) -> TakeId {
        let mut takes = self.takes.lock();
        let id = (0..=TakeId::MAX).find(|id| !takes.contains_key(id)).unwrap_or(TakeId::MAX);
        log::info!("take {} held for retention as #{}", take.name, id);
        takes.insert(id, Arc::new(RetainableTake::new(take)));
        id
    }

    pub fn get(&self, id: TakeId) -> Option<Arc<RetainableTake>> {
        self.takes.lock().get(&id).cloned()
    }

    pub fn pending_ids(&self) -> Vec<TakeId> {
        self.takes.lock().keys().copied().collect()
    }

    /// Persist take `id`. `Ok(None)` if no such take is held, e.g. because
    /// it expired.
    pub fn retain(&self, id: TakeId) -> Result<Option<RetainedTake>, CaptureError> {
        let Some(take) = self.takes.lock().remove(&id) else {
            return Ok(None);
        };

        match take.retain(self.store.as_ref()) {
            Ok(retained) => Ok(Some(retained)),
            Err(e) => {
                if take.is_movable() {
                    // keep it around for a retry or the sweep
                    self.takes.lock().entry(id).or_insert(take);
                }
                Err(e)
            }
        }
    }

    /// Delete take `id`. Unknown ids are ignored.
    pub fn discard(&self, id: TakeId) -> Result<(), CaptureError> {
        let take = self.takes.lock().remove(&id);
        match take {
            Some(take) => take.discard(),
            None => Ok(()),
        }
    }

}

impl<S: TrackStore> TakeRetention<S> {
    /// Stop the sweep thread and discard every take still held.
    pub fn shutdown(&mut self) {
        drop(self.stop_sweep.take());
        if let Some(handle) = self.sweep_handle.take() {
            let _ = handle.join();
        }

        let remaining = std::mem::take(&mut *self.takes.lock());
        for (id, take) in remaining {
            if let Err(e) = take.discard() {
                log::warn!("failed to discard take #{} on shutdown: {}", id, e);
            }
        }
    }
}

impl<S: TrackStore> Drop for TakeRetention<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sweep_expired(registry: &Mutex<BTreeMap<TakeId, Arc<RetainableTake>>>, lifetime: Duration) {
    let expired: Vec<(TakeId, Arc<RetainableTake>)> = {
        let mut takes = registry.lock();
        let ids: Vec<TakeId> = takes
            .iter()
            .filter(|(_, take)| take.age() >= lifetime)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| takes.remove(&id).map(|take| (id, take)))
            .collect()
    };

    for (id, take) in expired {
        log::info!("take #{} expired after {:?}", id, take.age());
        if let Err(e) = take.discard() {
            log::warn!("failed to discard expired take #{}: {}", id, e);
        }
    }
}
