// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the queue, flusher and maintenance tasks. Drops are
/// counted here instead of being logged one by one.
#[derive(Debug, Default)]
pub struct SinkStats {
    pub(crate) accepted: AtomicU64,
    pub(crate) dropped_full: AtomicU64,
    pub(crate) dropped_backlog: AtomicU64,
    pub(crate) late_writes: AtomicU64,
    pub(crate) write_errors: AtomicU64,
    pub(crate) rotations: AtomicU64,
    pub(crate) swept_files: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records taken into the queue
    pub accepted: u64,
    /// Records rejected because the queue was full
    pub dropped_full: u64,
    /// Records discarded because the writer could not take them in time
    pub dropped_backlog: u64,
    /// Writes that were still pending when the flush timeout elapsed
    pub late_writes: u64,
    pub write_errors: u64,
    pub rotations: u64,
    pub swept_files: u64,
}

impl SinkStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            dropped_backlog: self.dropped_backlog.load(Ordering::Relaxed),
            late_writes: self.late_writes.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            swept_files: self.swept_files.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    pub fn dropped(&self) -> u64 {
        self.dropped_full + self.dropped_backlog
    }
}
