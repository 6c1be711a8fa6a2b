// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retention sweep ("mill") for rotated log files.
//!
//! A sweep lists the log directory, keeps only names that parse as rotated
//! files, and removes the ones that are older than the age limit or fall
//! outside the size budget once files are counted newest first. The file the
//! sink currently writes to is never a candidate.
//!
//! Sweeps run on a single worker task that is started on the first trigger.
//! A trigger while a sweep is pending or running is a no-op.

use crate::active_sink::SinkSlot;
use crate::clock::Clock;
use crate::constants::MEGABYTE;
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleTracker;
use crate::naming::FileNaming;
use crate::stats::SinkStats;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Limits applied to rotated files. `0` disables a dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    pub max_size_megabytes: u64,
}

impl RetentionPolicy {
    pub fn is_unlimited(&self) -> bool {
        self.max_age_days == 0 && self.max_size_megabytes == 0
    }

    pub fn max_age(&self) -> Option<ChronoDuration> {
        (self.max_age_days > 0).then(|| ChronoDuration::days(i64::from(self.max_age_days)))
    }

    pub fn size_budget_bytes(&self) -> Option<u64> {
        (self.max_size_megabytes > 0).then(|| self.max_size_megabytes.saturating_mul(MEGABYTE))
    }
}

/// A rotated file found on disk, rebuilt from the directory on every sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalFile {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, io::Error)>,
}

/// Lists rotated files next to the configured path, newest first. Entries
/// whose names don't parse are skipped.
pub fn list_historical(naming: &FileNaming) -> Result<Vec<HistoricalFile>> {
    let dir = naming.directory();
    let entries = fs::read_dir(dir).map_err(|source| Error::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(timestamp) = name.to_str().and_then(|n| naming.parse_timestamp(n)) else {
            continue;
        };
        files.push(HistoricalFile {
            path: dir.join(&name),
            timestamp,
            size_bytes: metadata.len(),
        });
    }

    files.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(files)
}

/// Picks the files a sweep should delete.
///
/// Age is applied first and independently of size. The size budget is then
/// filled newest first; the first file that would overflow it and every older
/// file after it are evicted.
pub fn select_for_removal(
    mut files: Vec<HistoricalFile>,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    active: Option<&Path>,
) -> Vec<HistoricalFile> {
    files.retain(|file| Some(file.path.as_path()) != active);
    files.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut remove = Vec::new();

    if let Some(max_age) = policy.max_age() {
        let cutoff = now - max_age;
        let (expired, kept): (Vec<_>, Vec<_>) =
            files.into_iter().partition(|file| file.timestamp < cutoff);
        remove.extend(expired);
        files = kept;
    }

    if let Some(budget) = policy.size_budget_bytes() {
        let mut seen = HashSet::new();
        let mut total: u64 = 0;
        let mut exhausted = false;
        for file in files {
            if !seen.insert(file.path.clone()) {
                continue;
            }
            if !exhausted && total.saturating_add(file.size_bytes) <= budget {
                total += file.size_bytes;
            } else {
                exhausted = true;
                remove.push(file);
            }
        }
    }

    remove
}

/// Runs one sweep against the directory. Removal failures don't stop the
/// sweep; they are collected in the report.
pub fn sweep_once(
    naming: &FileNaming,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    active: Option<&Path>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    if policy.is_unlimited() {
        return Ok(report);
    }

    let files = list_historical(naming)?;
    for file in select_for_removal(files, policy, now, active) {
        match fs::remove_file(&file.path) {
            Ok(()) => report.removed.push(file.path),
            Err(e) => report.failures.push((file.path, e)),
        }
    }
    Ok(report)
}

/// Single-flight driver for [`sweep_once`].
#[derive(Debug)]
pub struct RetentionSweeper {
    naming: FileNaming,
    policy: RetentionPolicy,
    clock: Arc<dyn Clock>,
    slot: SinkSlot,
    tracker: LifecycleTracker,
    stats: Arc<SinkStats>,
    cancel: CancellationToken,
    wakeup: Arc<Notify>,
    in_flight: Arc<AtomicBool>,
    completed: Arc<AtomicU64>,
    start_worker: Once,
}

impl RetentionSweeper {
    pub fn new(
        naming: FileNaming,
        policy: RetentionPolicy,
        clock: Arc<dyn Clock>,
        slot: SinkSlot,
        tracker: LifecycleTracker,
        stats: Arc<SinkStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            naming,
            policy,
            clock,
            slot,
            tracker,
            stats,
            cancel,
            wakeup: Arc::new(Notify::new()),
            in_flight: Arc::new(AtomicBool::new(false)),
            completed: Arc::new(AtomicU64::new(0)),
            start_worker: Once::new(),
        }
    }

    /// Requests a sweep. Returns `false` when the request was folded into a
    /// sweep that is already pending or running, or when there is nothing to
    /// enforce.
    pub fn trigger(&self) -> bool {
        if self.policy.is_unlimited() || self.cancel.is_cancelled() {
            return false;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.start_worker.call_once(|| self.spawn_worker());
        self.wakeup.notify_one();
        true
    }

    /// Number of sweeps that have finished.
    pub fn completed_sweeps(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn spawn_worker(&self) {
        let naming = self.naming.clone();
        let policy = self.policy;
        let clock = Arc::clone(&self.clock);
        let slot = self.slot.clone();
        let stats = Arc::clone(&self.stats);
        let cancel = self.cancel.clone();
        let wakeup = Arc::clone(&self.wakeup);
        let in_flight = Arc::clone(&self.in_flight);
        let completed = Arc::clone(&self.completed);

        self.tracker.spawn("retention sweeper", async move {
            debug!("Retention sweeper started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = wakeup.notified() => {}
                }

                let naming = naming.clone();
                let now = clock.now();
                let active = slot.current_path();
                let result = tokio::task::spawn_blocking(move || {
                    sweep_once(&naming, &policy, now, active.as_deref())
                })
                .await;

                match result {
                    Ok(Ok(report)) => log_report(&report, &stats),
                    Ok(Err(e)) => warn!("Retention sweep failed: {e}"),
                    Err(e) => error!("Retention sweep aborted: {e}"),
                }

                completed.fetch_add(1, Ordering::AcqRel);
                in_flight.store(false, Ordering::Release);
            }
            debug!("Retention sweeper stopped");
        });
    }

    /// Triggers a sweep every `period` until cancelled.
    pub async fn run_ticker(self: Arc<Self>, period: Duration) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.trigger();
                }
            }
        }
    }
}

fn log_report(report: &SweepReport, stats: &SinkStats) {
    for path in &report.removed {
        debug!("Removed rotated log file {}", path.display());
    }
    stats
        .swept_files
        .fetch_add(report.removed.len() as u64, Ordering::Relaxed);

    if let Some((path, e)) = report.failures.first() {
        warn!(
            "Failed to remove {} rotated log file(s), first failure {}: {e}",
            report.failures.len(),
            path.display()
        );
    }
}
