// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Keeps the active sink pointed at the file the clock and the filesystem
//! say it should be writing to.

use crate::active_sink::{ActiveSink, FileIdentity, SinkSlot};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::naming::FileNaming;
use crate::stats::SinkStats;
use derive_more::Display;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Span};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// The clock entered a new rotation bucket, or the sink is still on its
    /// fallback stream.
    #[display("time boundary")]
    Boundary,
    /// The path now refers to a different file than the open handle.
    #[display("file replaced")]
    Replaced,
    #[display("file missing")]
    Missing,
}

#[derive(Debug, Clone)]
pub struct RotationController {
    naming: FileNaming,
    clock: Arc<dyn Clock>,
    slot: SinkSlot,
    stats: Arc<SinkStats>,
}

impl RotationController {
    pub fn new(
        naming: FileNaming,
        clock: Arc<dyn Clock>,
        slot: SinkSlot,
        stats: Arc<SinkStats>,
    ) -> Self {
        Self {
            naming,
            clock,
            slot,
            stats,
        }
    }

    pub fn target_path(&self) -> PathBuf {
        self.naming.target_path(self.clock.now())
    }

    /// Runs one rotation check and swaps the active sink when needed.
    ///
    /// On an open failure the current sink stays installed and the error is
    /// returned; the next tick tries again.
    pub fn tick(&self) -> Result<Option<RotationReason>> {
        let Some((current_path, identity)) = self.slot.current() else {
            return Ok(None);
        };
        let target = self.target_path();

        let reason = match current_path {
            Some(path) if path == target => match fs::metadata(&path) {
                Ok(metadata) => match (identity, FileIdentity::from_metadata(&metadata)) {
                    (Some(open), Some(on_disk)) if open != on_disk => Some(RotationReason::Replaced),
                    _ => None,
                },
                Err(e) if e.kind() == io::ErrorKind::NotFound => Some(RotationReason::Missing),
                Err(source) => return Err(Error::Stat { path, source }),
            },
            _ => Some(RotationReason::Boundary),
        };

        let Some(reason) = reason else {
            return Ok(None);
        };

        let next = ActiveSink::open(&target)?;
        let previous = self.slot.install(next);
        if let Err(e) = previous.close() {
            warn!("Failed to close previous log sink: {e}");
        }
        SinkStats::bump(&self.stats.rotations);
        debug!("Rotated log sink to {} ({reason})", target.display());
        Ok(Some(reason))
    }

    /// [`RotationController::tick`] on the blocking pool, so a write stuck on
    /// the current sink never parks an async worker.
    pub async fn check(&self) -> Result<Option<RotationReason>> {
        let controller = self.clone();
        let span = Span::current();
        tokio::task::spawn_blocking(move || span.in_scope(|| controller.tick()))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }

    /// Ticks every `period` until `cancel` fires.
    pub async fn run(self, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failing = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.check() => result,
            };

            match result {
                Ok(_) if failing => {
                    debug!("Log file rotation recovered");
                    failing = false;
                }
                Ok(_) => {}
                // Only the first failure of a streak is worth a warning, the
                // rest would repeat it once per tick.
                Err(e) if !failing => {
                    warn!("Log file rotation failed, keeping the current sink: {e}");
                    failing = true;
                }
                Err(e) => debug!("Log file rotation still failing: {e}"),
            }
        }
    }
}
