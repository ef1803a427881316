//! Cross-process single-flight lock.
//!
//! Two `proxyport` processes must not reconfigure the same proxy at once. The
//! lock is an advisory `flock` on a file next to the config. The kernel drops
//! it when the holder exits, so a crashed run leaves nothing to reclaim. The
//! file holds the owner's PID for diagnostics only.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Interval between attempts when waiting for the lock.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Opens tried when a releasing holder unlinks the file under us.
const OPEN_ATTEMPTS: usize = 3;

#[cfg(unix)]
type Held = nix::fcntl::Flock<std::fs::File>;

#[cfg(not(unix))]
type Held = std::fs::File;

/// What to do when another reconfiguration holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum LockPolicy {
    /// Return `Error::Busy` immediately.
    #[default]
    FailFast,
    /// Block until the other attempt finishes.
    Wait,
}

/// A held lock. The file is removed and the lock released on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    _held: Held,
}

impl LockFile {
    /// Acquire the lock at `path` according to `policy`.
    ///
    /// With `LockPolicy::Wait`, gives up with `Error::Busy` after `wait_limit`.
    pub async fn acquire(path: &Path, policy: LockPolicy, wait_limit: Duration) -> Result<Self> {
        let deadline = Instant::now() + wait_limit;
        loop {
            if let Some(lock) = Self::try_acquire(path).await? {
                return Ok(lock);
            }
            if policy == LockPolicy::FailFast || Instant::now() >= deadline {
                debug!(path = %path.display(), "Lock held by another process");
                return Err(Error::Busy);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Try once. `Ok(None)` means another holder has the lock.
    pub async fn try_acquire(path: &Path) -> Result<Option<Self>> {
        for _ in 0..OPEN_ATTEMPTS {
            let file = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .await?
                .into_std()
                .await;

            let Some(held) = lock_exclusive(file)? else {
                return Ok(None);
            };

            // The previous holder unlinks the file on release; a handle opened
            // before that points at an inode nobody else will ever lock.
            if !still_linked(&held, path).await {
                debug!(path = %path.display(), "Lock file replaced while opening, retrying");
                continue;
            }

            record_owner(&held)?;
            debug!(path = %path.display(), "Acquired lock");
            return Ok(Some(Self {
                path: path.to_path_buf(),
                _held: held,
            }));
        }
        Ok(None)
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // Unlink while still holding the lock; the lock goes with the handle.
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}

fn record_owner(held: &Held) -> Result<()> {
    let mut file: &std::fs::File = held;
    file.set_len(0)?;
    file.write_all(std::process::id().to_string().as_bytes())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn lock_exclusive(file: std::fs::File) -> Result<Option<Held>> {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(held) => Ok(Some(held)),
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
        Err((_, errno)) => Err(std::io::Error::from(errno).into()),
    }
}

#[cfg(not(unix))]
fn lock_exclusive(file: std::fs::File) -> Result<Option<Held>> {
    Ok(Some(file))
}

#[cfg(unix)]
async fn still_linked(held: &Held, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let (Ok(ours), Ok(on_disk)) = (held.metadata(), fs::metadata(path).await) else {
        return false;
    };
    ours.dev() == on_disk.dev() && ours.ino() == on_disk.ino()
}

#[cfg(not(unix))]
async fn still_linked(_held: &Held, _path: &Path) -> bool {
    true
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json.lock");

        let lock = LockFile::acquire(&path, LockPolicy::FailFast, Duration::ZERO)
            .await
            .unwrap();
        assert!(path.exists());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );

        let second = LockFile::acquire(&path, LockPolicy::FailFast, Duration::ZERO).await;
        assert!(matches!(second, Err(Error::Busy)));

        drop(lock);
        assert!(!path.exists());
        assert!(LockFile::try_acquire(&path).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_wait_gives_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json.lock");
        let _held = LockFile::try_acquire(&path).await.unwrap().unwrap();

        let start = std::time::Instant::now();
        let result = LockFile::acquire(&path, LockPolicy::Wait, Duration::from_millis(250)).await;
        assert!(matches!(result, Err(Error::Busy)));
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_wait_acquires_after_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json.lock");
        let held = LockFile::try_acquire(&path).await.unwrap().unwrap();

        let waiter = {
            let path = path.clone();
            tokio::spawn(async move {
                LockFile::acquire(&path, LockPolicy::Wait, Duration::from_secs(5)).await
            })
        };
        sleep(Duration::from_millis(150)).await;
        drop(held);

        let lock = waiter.await.unwrap().unwrap();
        assert!(path.exists());
        drop(lock);
    }

    #[tokio::test]
    async fn test_leftover_file_from_dead_owner_is_reused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json.lock");
        std::fs::write(&path, "4194304").unwrap();

        let lock = LockFile::try_acquire(&path).await.unwrap();
        assert!(lock.is_some());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );
    }

    #[tokio::test]
    async fn test_racing_claims_on_leftover_file_have_one_winner() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json.lock");
        std::fs::write(&path, "garbage").unwrap();

        let claims: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                tokio::spawn(async move { LockFile::try_acquire(&path).await.unwrap() })
            })
            .collect();

        let mut held = Vec::new();
        for claim in claims {
            if let Some(lock) = claim.await.unwrap() {
                held.push(lock);
            }
        }
        assert_eq!(held.len(), 1);
    }
}
