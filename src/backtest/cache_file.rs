//! Shared on-disk JSON cache helpers for the instrument-info and risk-limit
//! caches (§6.6): a size cap, symlink rejection, and advisory cross-process
//! file locking on the read-modify-write path via `fs2`.
//!
//! A corrupt or oversized file is treated as empty rather than fatal — the
//! caller falls back to the next source in its provider chain (exchange
//! call, then hardcoded defaults) and the file is simply overwritten on the
//! next successful write.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::core::error::{CoreError, CoreResult};

/// Cache files larger than this are refused outright (spec §6.6).
pub const MAX_CACHE_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Refuse to operate on a symlinked cache path — prevents a malicious or
/// stale symlink from redirecting the read/write outside the intended cache
/// directory.
fn reject_symlink(path: &Path) -> CoreResult<()> {
    if path.is_symlink() {
        return Err(CoreError::CachePermissionError(format!("refusing symlinked cache path: {}", path.display())));
    }
    Ok(())
}

/// Read and parse a JSON cache file. Returns `None` (treated as "empty
/// cache") when the file is missing, oversized, symlinked, unreadable, or
/// not valid JSON for `T` — every one of those is logged, none is fatal.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if reject_symlink(path).is_err() {
        warn!(path = %path.display(), "cache path is a symlink, ignoring");
        return None;
    }
    let metadata = std::fs::metadata(path).ok()?;
    if metadata.len() > MAX_CACHE_FILE_BYTES {
        warn!(path = %path.display(), size = metadata.len(), "cache file exceeds size cap, treating as empty");
        return None;
    }
    let mut file = File::open(path).ok()?;
    // Readers re-parse after the writer releases its exclusive lock; a
    // shared lock here just waits out any in-flight write.
    let _ = file.lock_shared();
    let mut buf = String::new();
    if file.read_to_string(&mut buf).is_err() {
        warn!(path = %path.display(), "cache file unreadable, treating as empty");
        return None;
    }
    match serde_json::from_str(&buf) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache file is not valid JSON, treating as empty");
            None
        }
    }
}

/// Write a JSON cache file under an exclusive advisory lock. Failure is
/// logged and swallowed (`CachePermissionError`, per spec §7): callers
/// continue the run without caching rather than aborting.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::CachePermissionError(format!("creating cache dir {}: {e}", parent.display())))?;
        }
    }
    reject_symlink(path)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| CoreError::CachePermissionError(format!("opening cache file {}: {e}", path.display())))?;

    file.lock_exclusive()
        .map_err(|e| CoreError::CachePermissionError(format!("locking cache file {}: {e}", path.display())))?;

    let serialized = serde_json::to_string_pretty(value)
        .map_err(|e| CoreError::CachePermissionError(format!("serializing cache file {}: {e}", path.display())))?;

    let result = file
        .write_all(serialized.as_bytes())
        .map_err(|e| CoreError::CachePermissionError(format!("writing cache file {}: {e}", path.display())));

    let _ = FileExt::unlock(&file);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        write_json(&path, &Sample { value: 7 }).unwrap();
        let loaded: Sample = read_json(&path).unwrap();
        assert_eq!(loaded, Sample { value: 7 });
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: Option<Sample> = read_json(&path);
        assert!(loaded.is_none());
    }

    #[test]
    fn corrupt_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, b"not json").unwrap();
        let loaded: Option<Sample> = read_json(&path);
        assert!(loaded.is_none());
    }

    #[test]
    fn oversized_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.json");
        let huge = "x".repeat((MAX_CACHE_FILE_BYTES + 1) as usize);
        std::fs::write(&path, huge).unwrap();
        let loaded: Option<Sample> = read_json(&path);
        assert!(loaded.is_none());
    }

    #[test]
    fn symlinked_path_is_refused() {
        #[cfg(unix)]
        {
            let dir = tempdir().unwrap();
            let real = dir.path().join("real.json");
            write_json(&real, &Sample { value: 1 }).unwrap();
            let link = dir.path().join("link.json");
            std::os::unix::fs::symlink(&real, &link).unwrap();
            let loaded: Option<Sample> = read_json(&link);
            assert!(loaded.is_none());
        }
    }
}
