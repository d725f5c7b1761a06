// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Advisory lock around the shared Helm repository index.
//!
//! Concurrent `helm repo add` runs can corrupt the index. The lock is a file
//! created exclusively next to it; acquisition polls until a deadline and
//! never blocks indefinitely. A lock left behind by a crashed process is
//! reclaimed once it is older than [`STALE_AFTER`].
//!
//! Each holder writes a fresh token into the file and only removes a file
//! that still carries its own token, so a holder whose lock was reclaimed
//! never deletes the lock of the process that took it over.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;
use zonectl_core::ZonectlError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Age after which an existing lock file is treated as abandoned.
pub const STALE_AFTER: Duration = Duration::from_secs(600);

/// Default lock location: the per-user cache directory.
pub fn default_lock_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("zonectl")
        .join("helm-repository.lock")
}

/// Held lock. Released on drop.
#[derive(Debug)]
pub struct RepositoryLock {
    path: PathBuf,
    token: String,
}

impl RepositoryLock {
    /// Try to take the lock at `path` until `timeout` elapses.
    pub async fn acquire(
        path: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, ZonectlError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ZonectlError::Storage {
                    source: Box::new(e),
                })?;
        }

        let token = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match try_create(path, &token).await {
                Ok(()) => {
                    debug!(path = %path.display(), "acquired repository lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        token,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(path).await {
                        warn!(path = %path.display(), "removing stale repository lock");
                        let _ = tokio::fs::remove_file(path).await;
                        continue;
                    }
                }
                Err(e) => {
                    return Err(ZonectlError::Storage {
                        source: Box::new(e),
                    });
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ZonectlError::Timeout { duration: timeout });
            }
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => return Err(ZonectlError::Cancelled),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepositoryLock {
    fn drop(&mut self) {
        match std::fs::read_to_string(&self.path) {
            Ok(holder) if holder == self.token => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    debug!(path = %self.path.display(), error = %e, "failed to release repository lock");
                }
            }
            Ok(_) => {
                warn!(path = %self.path.display(), "repository lock was taken over, leaving it in place");
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "repository lock already gone");
            }
        }
    }
}

async fn try_create(path: &Path, token: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let written = async {
        file.write_all(token.as_bytes()).await?;
        file.sync_all().await
    }
    .await;
    if written.is_err() {
        // Never leave a lock file without a token behind.
        let _ = tokio::fs::remove_file(path).await;
    }
    written
}

async fn is_stale(path: &Path) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_AFTER)
}
