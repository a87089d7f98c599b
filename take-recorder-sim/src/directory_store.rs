//! A [`TrackStore`] backed by a plain directory.
//!
//! Files are written under a hidden pending name and renamed to their
//! display name on finalize. Retained takes get a JSON sidecar next to their
//! files.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use take_recorder_core::models::error::CaptureError;
use take_recorder_core::models::recording_result::RetainedTake;
use take_recorder_core::storage::metadata;
use take_recorder_core::traits::track_store::TrackStore;

const PENDING_PREFIX: &str = ".pending-";

#[derive(Debug)]
pub struct PendingFile {
    pending: PathBuf,
    display_name: String,
}

pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CaptureError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| CaptureError::StorageError(format!("failed to create {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove pending files left behind by an interrupted run.
    pub fn clean_pending(&self) -> Result<usize, CaptureError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(PENDING_PREFIX) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("removed {} stale pending files from {}", removed, self.root.display());
        }
        Ok(removed)
    }

    /// `display_name`, or `stem-N.ext` for the first free N if taken.
    fn free_path(&self, display_name: &str) -> PathBuf {
        let candidate = self.root.join(display_name);
        if !candidate.exists() {
            return candidate;
        }
        let path = Path::new(display_name);
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let extension = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
        (1..)
            .map(|n| self.root.join(format!("{}-{}{}", stem, n, extension)))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }
}

impl TrackStore for DirectoryStore {
    type Handle = PendingFile;

    fn create_pending(&self, display_name: &str) -> Result<PendingFile, CaptureError> {
        if display_name.is_empty() || display_name.contains(['/', '\\']) {
            return Err(CaptureError::StorageError(format!("invalid file name {:?}", display_name)));
        }
        let pending = self
            .root
            .join(format!("{}{}-{}", PENDING_PREFIX, uuid::Uuid::new_v4(), display_name));
        File::create(&pending)
            .map_err(|e| CaptureError::StorageError(format!("failed to create {}: {}", pending.display(), e)))?;
        Ok(PendingFile {
            pending,
            display_name: display_name.to_string(),
        })
    }

    fn open_for_write(&self, handle: &PendingFile) -> Result<Box<dyn Write + Send>, CaptureError> {
        let file = File::create(&handle.pending)
            .map_err(|e| CaptureError::StorageError(format!("failed to open {}: {}", handle.pending.display(), e)))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn finalize(&self, handle: PendingFile) -> Result<(), CaptureError> {
        let target = self.free_path(&handle.display_name);
        fs::rename(&handle.pending, &target).map_err(|e| {
            CaptureError::StorageError(format!("failed to finalize {}: {}", target.display(), e))
        })?;
        log::debug!("stored {}", target.display());
        Ok(())
    }

    fn take_retained(&self, take: &RetainedTake) -> Result<(), CaptureError> {
        let path = metadata::write_metadata(take, &self.root)?;
        log::debug!("wrote {}", path.display());
        Ok(())
    }
}
