// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The currently open output destination.
//!
//! Exactly one [`ActiveSink`] is installed in a [`SinkSlot`] at a time. A
//! rotation builds a complete replacement first, swaps it in under the slot
//! mutex and only then closes the old handle, so there is never a moment
//! without a writable destination.

use crate::error::{Error, Result};
use std::fmt;
use std::fs::{File, Metadata, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Filesystem identity of an open log file, used to notice that the path now
/// points at a different file than the handle we hold.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    device: u64,
    inode: u64,
}

#[cfg(unix)]
impl FileIdentity {
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        })
    }
}

// Without inodes the creation time is the best fingerprint we have; when the
// platform can't report it the rotation check falls back to existence only.
#[cfg(not(unix))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    created: std::time::SystemTime,
}

#[cfg(not(unix))]
impl FileIdentity {
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        metadata.created().ok().map(|created| Self { created })
    }
}

/// An open destination for formatted records: either a log file or a
/// fallback stream such as stdout.
pub struct ActiveSink {
    handle: Box<dyn Write + Send>,
    path: Option<PathBuf>,
    identity: Option<FileIdentity>,
}

impl ActiveSink {
    /// Opens `path` for appending, creating it if missing.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let identity = file
            .metadata()
            .ok()
            .and_then(|metadata| FileIdentity::from_metadata(&metadata));

        Ok(Self::from_file(file, path.to_path_buf(), identity))
    }

    fn from_file(file: File, path: PathBuf, identity: Option<FileIdentity>) -> Self {
        Self {
            handle: Box::new(file),
            path: Some(path),
            identity,
        }
    }

    pub fn stream(handle: Box<dyn Write + Send>) -> Self {
        Self {
            handle,
            path: None,
            identity: None,
        }
    }

    /// Path of the open file, `None` for a stream.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn identity(&self) -> Option<FileIdentity> {
        self.identity
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.handle.write_all(record)?;
        self.handle.flush()
    }

    pub fn close(mut self) -> io::Result<()> {
        self.handle.flush()
    }
}

impl fmt::Debug for ActiveSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSink")
            .field("path", &self.path)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct SinkInfo {
    path: Option<PathBuf>,
    identity: Option<FileIdentity>,
}

impl SinkInfo {
    fn of(sink: &ActiveSink) -> Self {
        Self {
            path: sink.path().map(Path::to_path_buf),
            identity: sink.identity(),
        }
    }
}

/// Shared, mutex-guarded holder of the active sink.
///
/// The sink lock is held for a whole write, which can take arbitrarily long
/// on a hung filesystem. Path and identity are mirrored under a separate
/// lock so that queries never wait behind a write.
#[derive(Debug, Clone)]
pub struct SinkSlot {
    sink: Arc<Mutex<Option<ActiveSink>>>,
    info: Arc<Mutex<Option<SinkInfo>>>,
    retired: Arc<AtomicBool>,
}

impl SinkSlot {
    pub fn new(sink: ActiveSink) -> Self {
        Self {
            info: Arc::new(Mutex::new(Some(SinkInfo::of(&sink)))),
            sink: Arc::new(Mutex::new(Some(sink))),
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock_sink(&self) -> MutexGuard<'_, Option<ActiveSink>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_info(&self) -> MutexGuard<'_, Option<SinkInfo>> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes one record to whatever sink is installed. Returns `Ok(false)`
    /// once the slot has been closed or retired.
    pub fn write(&self, record: &[u8]) -> io::Result<bool> {
        let mut guard = self.lock_sink();
        if self.retired.load(Ordering::Acquire) {
            return Ok(false);
        }
        match guard.as_mut() {
            Some(sink) => sink.write_record(record).map(|()| true),
            None => Ok(false),
        }
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock_info().as_ref().and_then(|info| info.path.clone())
    }

    /// Path and identity of the installed sink, `None` once closed.
    pub fn current(&self) -> Option<(Option<PathBuf>, Option<FileIdentity>)> {
        self.lock_info()
            .as_ref()
            .map(|info| (info.path.clone(), info.identity))
    }

    /// Installs `next` and hands back the sink that is no longer installed:
    /// the previous one, or `next` itself if the slot was already closed.
    /// The caller closes the returned sink after the lock is released.
    ///
    /// Waits for any write in progress, so call it off the async workers.
    #[must_use]
    pub fn install(&self, next: ActiveSink) -> ActiveSink {
        let mut guard = self.lock_sink();
        if self.retired.load(Ordering::Acquire) {
            return next;
        }
        match guard.as_mut() {
            Some(current) => {
                *self.lock_info() = Some(SinkInfo::of(&next));
                std::mem::replace(current, next)
            }
            None => next,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock_info().is_none()
    }

    /// Marks the slot closed without waiting for a write in progress. Later
    /// writes and installs are rejected; the sink itself still has to be
    /// released with [`SinkSlot::close`].
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.lock_info().take();
    }

    /// Takes the installed sink out of the slot. Later writes are no-ops.
    /// Waits for any write in progress.
    pub fn close(&self) -> io::Result<()> {
        let sink = {
            let mut guard = self.lock_sink();
            self.lock_info().take();
            guard.take()
        };
        match sink {
            Some(sink) => sink.close(),
            None => Ok(()),
        }
    }
}
