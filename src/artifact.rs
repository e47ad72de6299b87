//! Temporary artifact lifecycle: allocate, verify, release, sweep.
//!
//! All artifacts live in one flat staging directory shared by every user.
//! There is no locking and no reference counting; the only protection
//! against two in-flight operations colliding is the file name, which
//! combines the wall clock, a process-wide sequence number and a random
//! suffix, and is created with `O_EXCL` by [`tempfile::Builder`].
//!
//! Abandoned artifacts are reclaimed by [`ArtifactManager::sweep`], which
//! deletes anything older than the retention threshold. The threshold must
//! stay above the slowest expected engine call so an artifact that an
//! operation is still using is never swept.

use crate::error::BotError;
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Opaque reference to a staged file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ArtifactHandle(PathBuf);

impl ArtifactHandle {
    #[cfg(test)]
    pub(crate) fn detached(path: PathBuf) -> Self {
        ArtifactHandle(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// File extension without the dot, lower-cased.
    pub fn extension(&self) -> Option<String> {
        self.0
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }

    pub fn file_name(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Owns the staging directory and every artifact inside it.
#[derive(Debug)]
pub struct ArtifactManager {
    staging_dir: PathBuf,
    retention: Duration,
}

impl ArtifactManager {
    /// Create the manager, creating the staging directory if needed.
    pub fn new(staging_dir: impl Into<PathBuf>, retention: Duration) -> Result<Self, BotError> {
        let staging_dir = staging_dir.into();
        std::fs::create_dir_all(&staging_dir).map_err(|source| BotError::Io {
            context: "create staging directory",
            path: staging_dir.clone(),
            source,
        })?;
        debug!("Staging directory ready: {}", staging_dir.display());
        Ok(Self {
            staging_dir,
            retention,
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Reserve a fresh, empty artifact with the given extension.
    ///
    /// The exclusive create runs on the blocking pool.
    pub async fn allocate(&self, extension: &str) -> Result<ArtifactHandle, BotError> {
        let staging_dir = self.staging_dir.clone();
        let extension = extension.to_string();
        tokio::task::spawn_blocking(move || create_unique(&staging_dir, &extension))
            .await
            .map_err(|e| BotError::Io {
                context: "allocate artifact",
                path: self.staging_dir.clone(),
                source: std::io::Error::other(e),
            })?
    }

    /// Allocate an artifact and write `bytes` into it.
    pub async fn stage(&self, extension: &str, bytes: &[u8]) -> Result<ArtifactHandle, BotError> {
        let handle = self.allocate(extension).await?;
        if let Err(source) = tokio::fs::write(handle.path(), bytes).await {
            self.release(&handle).await;
            return Err(BotError::Io {
                context: "write artifact",
                path: handle.0,
                source,
            });
        }
        Ok(handle)
    }

    /// True when the artifact exists, is a regular file and is non-empty.
    pub async fn verify(&self, handle: &ArtifactHandle) -> bool {
        match tokio::fs::metadata(handle.path()).await {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(_) => false,
        }
    }

    /// Delete one artifact. Failures are logged, never propagated.
    pub async fn release(&self, handle: &ArtifactHandle) {
        match tokio::fs::remove_file(handle.path()).await {
            Ok(()) => debug!("Released artifact {}", handle),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Artifact already gone: {}", handle)
            }
            Err(e) => warn!("Failed to release artifact {}: {}", handle, e),
        }
    }

    /// Release a batch of artifacts concurrently.
    pub async fn release_all<'a>(&self, handles: impl IntoIterator<Item = &'a ArtifactHandle>) {
        join_all(handles.into_iter().map(|h| self.release(h))).await;
    }

    /// Whether `path` is a file directly inside the staging directory.
    pub fn owns(&self, path: &Path) -> bool {
        path.parent() == Some(self.staging_dir.as_path())
    }

    /// Adopt a path produced by an engine inside the staging directory.
    pub fn adopt(&self, path: PathBuf) -> Option<ArtifactHandle> {
        self.owns(&path).then_some(ArtifactHandle(path))
    }

    /// Delete every artifact last modified longer ago than the retention.
    pub async fn sweep(&self) -> Result<SweepReport, BotError> {
        let mut report = SweepReport::default();
        let now = SystemTime::now();

        let mut entries =
            tokio::fs::read_dir(&self.staging_dir)
                .await
                .map_err(|source| BotError::Io {
                    context: "scan staging directory",
                    path: self.staging_dir.clone(),
                    source,
                })?;

        while let Some(entry) = entries.next_entry().await.map_err(|source| BotError::Io {
            context: "scan staging directory",
            path: self.staging_dir.clone(),
            source,
        })? {
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Cannot stat {}: {}", entry.path().display(), e);
                    report.failed += 1;
                    continue;
                }
            };
            report.scanned += 1;

            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age <= self.retention {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!(
                        "Swept stale artifact {} (age {}s)",
                        entry.path().display(),
                        age.as_secs()
                    );
                    report.removed += 1;
                }
                Err(e) => {
                    warn!("Failed to sweep {}: {}", entry.path().display(), e);
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 {
            info!(
                "Artifact sweep removed {}/{} files from {}",
                report.removed,
                report.scanned,
                self.staging_dir.display()
            );
        }
        Ok(report)
    }
}

fn create_unique(staging_dir: &Path, extension: &str) -> Result<ArtifactHandle, BotError> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let prefix = format!("{millis:x}-{seq:x}-");
    let suffix = match extension.trim_start_matches('.') {
        "" => String::new(),
        ext => format!(".{ext}"),
    };

    let file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(&suffix)
        .rand_bytes(8)
        .tempfile_in(staging_dir)
        .map_err(|source| BotError::Io {
            context: "allocate artifact",
            path: staging_dir.to_path_buf(),
            source,
        })?;

    let path = file
        .into_temp_path()
        .keep()
        .map_err(|e| BotError::Io {
            context: "persist artifact",
            path: e.path.to_path_buf(),
            source: e.error,
        })?;

    debug!("Allocated artifact {}", path.display());
    Ok(ArtifactHandle(path))
}
