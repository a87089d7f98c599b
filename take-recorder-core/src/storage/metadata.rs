use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::CaptureError;
use crate::models::recording_result::RetainedTake;

/// Path of the JSON sidecar for `take` inside `directory`:
/// `{directory}/{take.id}.take.json`.
pub fn sidecar_path(directory: &Path, take_id: &str) -> PathBuf {
    directory.join(format!("{}.take.json", take_id))
}

/// Write retained-take metadata as a JSON sidecar file.
pub fn write_metadata(take: &RetainedTake, directory: &Path) -> Result<PathBuf, CaptureError> {
    let path = sidecar_path(directory, &take.id);
    let json = serde_json::to_string_pretty(take)
        .map_err(|e| CaptureError::StorageError(format!("failed to serialize metadata: {}", e)))?;
    fs::write(&path, json).map_err(|e| CaptureError::StorageError(format!("failed to write metadata: {}", e)))?;
    Ok(path)
}

/// Read retained-take metadata from a JSON sidecar file.
pub fn read_metadata(path: &Path) -> Result<RetainedTake, CaptureError> {
    let json = fs::read_to_string(path)
        .map_err(|e| CaptureError::StorageError(format!("failed to read metadata: {}", e)))?;
    serde_json::from_str(&json).map_err(|e| CaptureError::StorageError(format!("failed to parse metadata: {}", e)))
}

/// SHA-256 hex digest of a file, streamed.
pub fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let mut file = File::open(path)
        .map_err(|e| CaptureError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
