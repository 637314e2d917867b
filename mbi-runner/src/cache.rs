// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-addressed memoization of test executions.
//!
//! Every executed test case leaves sidecar artifacts in the cache directory, named after its
//! [`CacheId`]:
//!
//! * `<id>.txt`: the combined build and execution log.
//! * `<id>.elapsed`: the elapsed wall-clock time in decimal seconds.
//! * `<id>.timeout`: present if and only if the time budget was exceeded.
//! * `<id>.md5sum`: the hash of the source file as of the last complete run.
//!
//! The hash sidecar is always written last, so an entry is complete exactly when the log, the
//! elapsed time and a matching hash are all present.

use crate::errors::{SidecarError, SidecarOp};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, io, io::Write};

/// The line appended to a log when the build command fails.
pub(crate) const BUILD_FAILURE_MARKER: &str = "raised an error (retcode: ";
/// The line appended to a log when the exec command cannot be started.
pub(crate) const SPAWN_FAILURE_MARKER: &str = "Command could not be started: ";

/// The identifier of a test case's cached artifacts: `<binary>_<index>`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CacheId(String);

impl CacheId {
    /// Creates a new cache identifier.
    pub fn new(binary: &str, index: usize) -> Self {
        Self(format!("{binary}_{index}"))
    }

    /// Returns the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Paths to the sidecar artifacts of one test case.
#[derive(Clone, Debug)]
pub struct Sidecars {
    dir: Utf8PathBuf,
    id: CacheId,
}

impl Sidecars {
    /// Returns the sidecars of `id` within `dir`.
    pub fn new(dir: impl Into<Utf8PathBuf>, id: CacheId) -> Self {
        Self {
            dir: dir.into(),
            id,
        }
    }

    /// Returns the cache identifier.
    pub fn id(&self) -> &CacheId {
        &self.id
    }

    /// Returns the cache directory.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Returns the path to the combined log.
    pub fn log(&self) -> Utf8PathBuf {
        self.with_suffix(".txt")
    }

    /// Returns the path to the elapsed time.
    pub fn elapsed(&self) -> Utf8PathBuf {
        self.with_suffix(".elapsed")
    }

    /// Returns the path to the timeout marker.
    pub fn timeout_marker(&self) -> Utf8PathBuf {
        self.with_suffix(".timeout")
    }

    /// Returns the path to the source hash.
    pub fn hash(&self) -> Utf8PathBuf {
        self.with_suffix(".md5sum")
    }

    /// Returns the path to a tool-specific artifact, such as `<id>.html`.
    pub fn with_suffix(&self, suffix: &str) -> Utf8PathBuf {
        self.dir.join(format!("{}{suffix}", self.id))
    }

    /// Returns true if the timeout marker exists.
    pub fn timed_out(&self) -> bool {
        self.timeout_marker().exists()
    }

    /// Reads the combined log, if it exists.
    ///
    /// Invalid UTF-8 is replaced rather than rejected: tools print all sorts of things.
    pub fn read_log(&self) -> Option<String> {
        read_lossy(&self.log())
    }

    /// Reads the elapsed time in seconds, if it exists and parses.
    pub fn read_elapsed(&self) -> Option<f64> {
        read_lossy(&self.elapsed()).and_then(|s| s.trim().parse().ok())
    }
}

/// A complete cached execution.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub(crate) content_hash: String,
    pub(crate) combined_log: String,
    pub(crate) elapsed_seconds: f64,
    pub(crate) timed_out: bool,
}

impl CacheEntry {
    /// Returns the hash of the source file this entry was produced from.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Returns the combined build and execution log.
    pub fn combined_log(&self) -> &str {
        &self.combined_log
    }

    /// Returns the elapsed wall-clock time in seconds.
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    /// Returns true if the time budget was exceeded.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Returns true if the build command failed, in which case nothing was executed.
    pub fn build_failed(&self) -> bool {
        self.combined_log.contains(BUILD_FAILURE_MARKER)
    }
}

/// Decides whether previous runs are still valid.
#[derive(Clone, Debug)]
pub struct ExecutionCache {
    dir: Utf8PathBuf,
}

impl ExecutionCache {
    /// Creates a cache rooted at `dir`.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the cache directory.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Returns the sidecars of `id`.
    pub fn sidecars(&self, id: &CacheId) -> Sidecars {
        Sidecars::new(self.dir.clone(), id.clone())
    }

    /// Returns true if a complete entry exists for `id` and was produced from the current
    /// contents of `source_path`.
    pub fn is_valid(&self, id: &CacheId, source_path: &Utf8Path) -> bool {
        self.load(id, source_path).is_some()
    }

    /// Returns the cached entry for `id` if it is valid.
    pub fn load(&self, id: &CacheId, source_path: &Utf8Path) -> Option<CacheEntry> {
        let sidecars = self.sidecars(id);

        // Read the hash first: if it is missing, the entry is incomplete regardless of what else
        // exists.
        let stored_hash = read_lossy(&sidecars.hash())?;
        let combined_log = sidecars.read_log()?;
        let elapsed_seconds = sidecars.read_elapsed()?;

        let current_hash = match hash_source(source_path) {
            Ok(hash) => hash,
            Err(error) => {
                tracing::debug!("failed to hash `{source_path}`: {error}");
                return None;
            }
        };
        if stored_hash.trim() != current_hash {
            tracing::debug!(
                "cache entry {id} is stale (stored hash {}, current hash {current_hash})",
                stored_hash.trim(),
            );
            return None;
        }

        Some(CacheEntry {
            content_hash: current_hash,
            combined_log,
            elapsed_seconds,
            timed_out: sidecars.timed_out(),
        })
    }

    /// Removes every sidecar of `id`, the hash first.
    ///
    /// Tool-specific artifacts are left alone: adapters overwrite them on the next run.
    pub fn invalidate(&self, id: &CacheId) -> Result<(), SidecarError> {
        let sidecars = self.sidecars(id);
        for path in [
            sidecars.hash(),
            sidecars.timeout_marker(),
            sidecars.log(),
            sidecars.elapsed(),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(SidecarError::new(SidecarOp::Remove, path, err)),
            }
        }
        Ok(())
    }
}

/// Returns the hex-encoded MD5 digest of the file at `path`.
pub fn hash_source(path: &Utf8Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(format!("{:x}", md5::compute(bytes)))
}

/// Durably writes `contents` to `path`, replacing any previous contents.
pub(crate) fn write_sidecar(path: &Utf8Path, contents: &[u8]) -> Result<(), SidecarError> {
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .map_err(|err| SidecarError::new(SidecarOp::Write, path, err.into()))
}

fn read_lossy(path: &Utf8Path) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}
