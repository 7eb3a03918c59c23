// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Persistence boundary for diagnostic snapshots.
//!
//! [`DiagnosticFileWriter`] is what the capture pipeline talks to.
//! [`FsDiagnosticWriter`] is the filesystem implementation: one directory per
//! rotation pool, one artifact per capture, created lazily.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::capture::snapshot::{encode_artifact, DiagnosticSnapshot, ARTIFACT_EXTENSION};
use crate::error::CaptureError;
use crate::types::RotationPool;

/// Default free-space floor below which the filesystem writer reports pressure.
pub const DEFAULT_MIN_FREE_BYTES: u64 = 50 * 1024 * 1024;

/// Age after which a leftover temporary file is treated as orphaned.
pub const STALE_TMP_AGE: Duration = Duration::from_secs(60);

/// A persisted artifact, addressable by pool and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub pool: RotationPool,
    pub name: String,
    pub path: PathBuf,
}

/// Storage collaborator of the capture pipeline.
pub trait DiagnosticFileWriter: Send + Sync {
    /// Persist one snapshot into `pool`.
    fn write(&self, snapshot: &DiagnosticSnapshot, pool: RotationPool)
        -> Result<PoolEntry, CaptureError>;

    /// True when storage is too constrained to accept a capture.
    fn check_storage_pressure(&self) -> bool;

    /// Entries currently held in `pool`, oldest first.
    fn list_entries(&self, pool: RotationPool) -> Result<Vec<PoolEntry>, CaptureError>;

    fn delete_entry(&self, entry: &PoolEntry) -> Result<(), CaptureError>;
}

/// Delete the oldest entries of `pool` until at most `max_entries` remain.
/// Returns the evicted entries.
pub fn enforce_pool_ceiling(
    writer: &dyn DiagnosticFileWriter,
    pool: RotationPool,
    max_entries: usize,
) -> Result<Vec<PoolEntry>, CaptureError> {
    let entries = writer.list_entries(pool)?;
    let excess = entries.len().saturating_sub(max_entries);

    let mut evicted = Vec::with_capacity(excess);
    for entry in entries.into_iter().take(excess) {
        writer.delete_entry(&entry)?;
        tracing::debug!(pool = %pool, entry = %entry.name, "Evicted snapshot");
        evicted.push(entry);
    }

    if !evicted.is_empty() {
        tracing::info!(
            pool = %pool,
            evicted = evicted.len(),
            max_entries = max_entries,
            "Rotation pool trimmed"
        );
    }
    Ok(evicted)
}

/// Writes artifacts under `<root>/<pool>/`.
#[derive(Debug, Clone)]
pub struct FsDiagnosticWriter {
    root: PathBuf,
    min_free_bytes: u64,
}

impl FsDiagnosticWriter {
    pub fn new(root: impl Into<PathBuf>, min_free_bytes: u64) -> Self {
        Self {
            root: root.into(),
            min_free_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pool_dir(&self, pool: RotationPool) -> PathBuf {
        self.root.join(pool.as_str())
    }

    /// Free bytes on the filesystem that holds (or will hold) the root.
    pub fn free_bytes(&self) -> Result<u64, nix::Error> {
        // statvfs needs an existing path; before the first write that is an ancestor.
        let probe = self
            .root
            .ancestors()
            .find(|p| p.exists())
            .unwrap_or_else(|| Path::new("."));
        let stats = nix::sys::statvfs::statvfs(probe)?;
        Ok((stats.blocks_available() as u64).saturating_mul(stats.fragment_size() as u64))
    }
}

impl DiagnosticFileWriter for FsDiagnosticWriter {
    fn write(
        &self,
        snapshot: &DiagnosticSnapshot,
        pool: RotationPool,
    ) -> Result<PoolEntry, CaptureError> {
        let write_failed = |reason: String| CaptureError::WriteFailed { pool, reason };

        let dir = self.pool_dir(pool);
        std::fs::create_dir_all(&dir)
            .map_err(|e| write_failed(format!("creating {}: {}", dir.display(), e)))?;

        let bytes = encode_artifact(snapshot)?;
        let name = snapshot.artifact_name();
        let path = dir.join(&name);
        // Write-then-rename so listings never see a partial artifact.
        let tmp = dir.join(format!(".{}.tmp", name));

        std::fs::write(&tmp, &bytes)
            .map_err(|e| write_failed(format!("writing {}: {}", tmp.display(), e)))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(write_failed(format!("renaming to {}: {}", path.display(), e)));
        }

        Ok(PoolEntry { pool, name, path })
    }

    fn check_storage_pressure(&self) -> bool {
        match self.free_bytes() {
            Ok(free) => free < self.min_free_bytes,
            Err(e) => {
                tracing::warn!(
                    root = %self.root.display(),
                    error = %e,
                    "Cannot query free space, assuming storage pressure"
                );
                true
            }
        }
    }

    fn list_entries(&self, pool: RotationPool) -> Result<Vec<PoolEntry>, CaptureError> {
        let dir = self.pool_dir(pool);
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CaptureError::EvictionFailed {
                    pool,
                    reason: format!("listing {}: {}", dir.display(), e),
                })
            }
        };

        let now = SystemTime::now();
        let mut entries = Vec::new();
        for entry in read_dir.filter_map(Result::ok) {
            let path = entry.path();
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };

            if name.starts_with('.') {
                if name.ends_with(".tmp") && is_stale(&entry, now) {
                    remove_orphan(&path);
                }
                continue;
            }
            if path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION) {
                entries.push(PoolEntry { pool, name, path });
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn delete_entry(&self, entry: &PoolEntry) -> Result<(), CaptureError> {
        match std::fs::remove_file(&entry.path) {
            Ok(()) => Ok(()),
            // Someone else already evicted it.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CaptureError::EvictionFailed {
                pool: entry.pool,
                reason: format!("deleting {}: {}", entry.path.display(), e),
            }),
        }
    }
}

/// A write interrupted before its rename leaves a temporary file behind.
fn is_stale(entry: &std::fs::DirEntry, now: SystemTime) -> bool {
    entry
        .metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .is_some_and(|age| age > STALE_TMP_AGE)
}

fn remove_orphan(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed orphaned temporary artifact"),
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to remove orphaned temporary artifact"
        ),
    }
}
