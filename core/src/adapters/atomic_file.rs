//! Atomic whole-file replacement.
//!
//! Writes a temp file in the target's directory, fsyncs it, copies the
//! target's permissions, renames it over the target and fsyncs the directory.
//! The whole sequence runs as one blocking job. Dropping the returned future
//! before the rename happens guarantees the rename never happens; once the
//! drop returns, the target holds either the old or the new content for good.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Progress of one replacement, shared with the blocking job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Swap {
    Pending,
    Abandoned,
    Renamed,
}

/// Marks the swap abandoned if the caller goes away first.
struct AbandonOnDrop(Arc<Mutex<Swap>>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        let mut swap = self.0.lock();
        if *swap == Swap::Pending {
            *swap = Swap::Abandoned;
        }
    }
}

/// Removes the temp file unless it was renamed into place.
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove temp file");
            }
        }
    }
}

/// Replace `target` with `content` atomically.
pub async fn replace(target: &Path, content: String) -> io::Result<()> {
    let swap = Arc::new(Mutex::new(Swap::Pending));
    let _abandon = AbandonOnDrop(Arc::clone(&swap));

    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || replace_blocking(&target, content.as_bytes(), &swap))
        .await
        .map_err(io::Error::other)?
}

fn replace_blocking(target: &Path, content: &[u8], swap: &Mutex<Swap>) -> io::Result<()> {
    let file_name = target
        .file_name()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", target.display()),
            )
        })?
        .to_string_lossy()
        .into_owned();
    let dir = match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut temp = TempFile {
        path: dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple())),
        armed: false,
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp.path)
        .map_err(|e| step("create temp file", e))?;
    temp.armed = true;

    file.write_all(content).map_err(|e| step("write", e))?;
    file.sync_all().map_err(|e| step("sync", e))?;
    drop(file);

    // The document may hold credentials; keep whatever mode the owner set.
    if let Ok(metadata) = fs::metadata(target) {
        fs::set_permissions(&temp.path, metadata.permissions())
            .map_err(|e| step("copy permissions", e))?;
    }

    {
        let mut state = swap.lock();
        if *state == Swap::Abandoned {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "replacement abandoned before rename",
            ));
        }
        fs::rename(&temp.path, target).map_err(|e| step("rename", e))?;
        *state = Swap::Renamed;
    }
    temp.armed = false;

    sync_dir(&dir);
    Ok(())
}

fn step(what: &str, e: io::Error) -> io::Error {
    io::Error::new(e.kind(), format!("{} failed: {}", what, e))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    match fs::File::open(dir) {
        Ok(handle) => {
            if let Err(e) = handle.sync_all() {
                warn!(dir = %dir.display(), error = %e, "Failed to sync directory");
            }
        }
        Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to open directory for sync"),
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn temp_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count()
    }

    #[tokio::test]
    async fn test_replace() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("config.json");
        fs::write(&target, "old").unwrap();

        replace(&target, "new".to_string()).await.unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
        assert_eq!(temp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_replace_creates_missing_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("settings.json");

        replace(&target, "{}".to_string()).await.unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "{}");
    }

    #[test]
    fn test_abandoned_swap_never_renames() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("config.json");
        fs::write(&target, "old").unwrap();

        let swap = Mutex::new(Swap::Abandoned);
        let err = replace_blocking(&target, b"new", &swap).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
        assert_eq!(temp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_dropped_replace_settles_immediately() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("config.json");
        fs::write(&target, "old").unwrap();

        let content = "x".repeat(1024 * 1024);
        let result = tokio::time::timeout(Duration::ZERO, replace(&target, content)).await;
        let seen = fs::read_to_string(&target).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fs::read_to_string(&target).unwrap(), seen);
        if result.is_err() {
            assert_eq!(temp_files(dir.path()), 0);
        }
    }

    #[tokio::test]
    async fn test_failed_rename_cleans_up() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("blocked");
        fs::create_dir(&target).unwrap();

        let err = replace(&target, "new".to_string()).await.unwrap_err();
        assert!(err.to_string().contains("rename failed"));
        assert!(target.is_dir());
        assert_eq!(temp_files(dir.path()), 0);
    }
}
