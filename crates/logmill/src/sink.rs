// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The assembled file sink: queue, flusher, writer, rotation and retention.

use crate::active_sink::{ActiveSink, SinkSlot};
use crate::clock::{Clock, SystemClock};
use crate::config::SinkConfig;
use crate::error::{Error, Result};
use crate::flusher::{spawn_writer, FlushExit, Flusher};
use crate::lifecycle::LifecycleTracker;
use crate::naming::FileNaming;
use crate::queue::{ingest_queue, LogRecord, RecordSender};
use crate::retention::RetentionSweeper;
use crate::rotation::{RotationController, RotationReason};
use crate::stats::{SinkStats, StatsSnapshot};
use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

enum FlusherState {
    Running {
        pause: CancellationToken,
        parked: oneshot::Receiver<Flusher>,
    },
    Paused(Flusher),
    Stopped,
}

impl fmt::Debug for FlusherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlusherState::Running { .. } => "Running",
            FlusherState::Paused(_) => "Paused",
            FlusherState::Stopped => "Stopped",
        })
    }
}

pub struct FileSinkBuilder {
    config: SinkConfig,
    clock: Arc<dyn Clock>,
    fallback: Option<Box<dyn Write + Send>>,
}

impl FileSinkBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stream used when no file is configured or the file can't be opened.
    /// Defaults to stdout.
    pub fn with_fallback(mut self, fallback: Box<dyn Write + Send>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Opens the initial sink and starts the background tasks. Must be
    /// called from within a tokio runtime.
    ///
    /// Failing to open the log file is not an error: the sink starts on the
    /// fallback stream and keeps retrying the file on every rotation tick.
    pub fn start(self) -> Result<FileSink> {
        let FileSinkBuilder {
            config,
            clock,
            fallback,
        } = self;
        config.validate()?;

        let fallback =
            || ActiveSink::stream(fallback.unwrap_or_else(|| Box::new(io::stdout())));
        let naming = config.base_path.as_deref().map(|path| {
            FileNaming::new(path, config.rotation_interval_hours, config.use_local_time)
        });
        let initial = match &naming {
            Some(naming) => match ActiveSink::open(&naming.target_path(clock.now())) {
                Ok(sink) => sink,
                Err(e) => {
                    error!("{e}, writing to the fallback stream until it can be opened");
                    fallback()
                }
            },
            None => fallback(),
        };

        let slot = SinkSlot::new(initial);
        let stats = Arc::new(SinkStats::default());
        let tracker = LifecycleTracker::new();
        let quit = CancellationToken::new();
        let (sender, receiver) = ingest_queue(config.queue_capacity, Arc::clone(&stats));

        let writer = spawn_writer(&tracker, slot.clone(), Arc::clone(&stats), config.write_backlog);
        let flusher = Flusher::new(receiver, writer, Arc::clone(&stats), config.flush_timeout());

        let (rotation, sweeper) = match naming {
            Some(naming) => {
                let rotation = RotationController::new(
                    naming.clone(),
                    Arc::clone(&clock),
                    slot.clone(),
                    Arc::clone(&stats),
                );
                tracker.spawn(
                    "rotation ticker",
                    rotation
                        .clone()
                        .run(config.rotation_check_interval(), quit.clone()),
                );

                let policy = config.retention();
                let sweeper = (!policy.is_unlimited()).then(|| {
                    let sweeper = Arc::new(RetentionSweeper::new(
                        naming,
                        policy,
                        Arc::clone(&clock),
                        slot.clone(),
                        tracker.clone(),
                        Arc::clone(&stats),
                        quit.clone(),
                    ));
                    tracker.spawn(
                        "retention ticker",
                        Arc::clone(&sweeper).run_ticker(config.retention_interval()),
                    );
                    sweeper
                });

                (Some(rotation), sweeper)
            }
            None => (None, None),
        };

        let state = spawn_flusher(&tracker, &quit, flusher);
        let sink = FileSink {
            config,
            sender,
            slot,
            stats,
            tracker,
            quit,
            rotation,
            sweeper,
            flusher: Mutex::new(state),
            shut_down: AtomicBool::new(false),
        };

        debug!(
            "File sink started on {}",
            sink.current_path()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "the fallback stream".to_string())
        );
        Ok(sink)
    }
}

/// Buffered, rotating file sink.
///
/// Producers call [`FileSink::enqueue`] (or a cloned [`RecordSender`]); the
/// call never blocks and returns `false` when the record was dropped.
/// [`FileSink::shutdown`] drains what is buffered and closes the file.
#[derive(Debug)]
pub struct FileSink {
    config: SinkConfig,
    sender: RecordSender,
    slot: SinkSlot,
    stats: Arc<SinkStats>,
    tracker: LifecycleTracker,
    quit: CancellationToken,
    rotation: Option<RotationController>,
    sweeper: Option<Arc<RetentionSweeper>>,
    flusher: Mutex<FlusherState>,
    shut_down: AtomicBool,
}

impl FileSink {
    pub fn builder(config: SinkConfig) -> FileSinkBuilder {
        FileSinkBuilder {
            config,
            clock: Arc::new(SystemClock),
            fallback: None,
        }
    }

    pub fn start(config: SinkConfig) -> Result<Self> {
        Self::builder(config).start()
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// A producer handle that can be moved to other tasks or threads.
    pub fn sender(&self) -> RecordSender {
        self.sender.clone()
    }

    pub fn enqueue(&self, record: impl Into<LogRecord>) -> bool {
        self.sender.enqueue(record)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Path of the file currently written to, `None` on the fallback stream.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.slot.current_path()
    }

    /// Runs a rotation check right away instead of waiting for the ticker.
    pub async fn check_rotation(&self) -> Result<Option<RotationReason>> {
        match &self.rotation {
            Some(rotation) => rotation.check().await,
            None => Ok(None),
        }
    }

    /// Requests a retention sweep. See [`RetentionSweeper::trigger`].
    pub fn trigger_sweep(&self) -> bool {
        self.sweeper
            .as_ref()
            .is_some_and(|sweeper| sweeper.trigger())
    }

    /// Stops the flusher after it has written what is buffered. Producers can
    /// keep enqueueing; records pile up in the queue until [`FileSink::resume`].
    pub async fn close(&self) -> Result<()> {
        let mut state = self.flusher.lock().await;
        match std::mem::replace(&mut *state, FlusherState::Stopped) {
            FlusherState::Running { pause, parked } => {
                pause.cancel();
                match parked.await {
                    Ok(flusher) => {
                        *state = FlusherState::Paused(flusher);
                        debug!("Flusher paused");
                        Ok(())
                    }
                    Err(_) => Err(Error::AlreadyShutdown),
                }
            }
            paused @ FlusherState::Paused(_) => {
                *state = paused;
                Ok(())
            }
            FlusherState::Stopped => Err(Error::AlreadyShutdown),
        }
    }

    /// Restarts a flusher stopped by [`FileSink::close`].
    pub async fn resume(&self) -> Result<()> {
        if self.quit.is_cancelled() {
            return Err(Error::AlreadyShutdown);
        }
        let mut state = self.flusher.lock().await;
        match std::mem::replace(&mut *state, FlusherState::Stopped) {
            FlusherState::Paused(flusher) => {
                *state = spawn_flusher(&self.tracker, &self.quit, flusher);
                debug!("Flusher resumed");
                Ok(())
            }
            running @ FlusherState::Running { .. } => {
                *state = running;
                Ok(())
            }
            FlusherState::Stopped => Err(Error::AlreadyShutdown),
        }
    }

    /// Drains the queue, stops every background task and closes the active
    /// sink. Only the first call does anything.
    ///
    /// From the moment this is called `enqueue` returns `false`. If the
    /// tasks don't finish within `timeout` the sink is retired right away
    /// and released as soon as a stuck write returns.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyShutdown);
        }
        self.quit.cancel();

        let finished = tokio::time::timeout(timeout, async {
            let mut state = self.flusher.lock().await;
            if let FlusherState::Paused(flusher) =
                std::mem::replace(&mut *state, FlusherState::Stopped)
            {
                // quit is already cancelled, so this run only drains.
                let quit = self.quit.clone();
                self.tracker.spawn("flusher", async move {
                    flusher.run(quit, CancellationToken::new()).await;
                });
            }
            drop(state);
            self.tracker.join().await;
        })
        .await;

        match finished {
            Ok(()) => {
                if let Err(e) = self.slot.close() {
                    warn!("Failed to close log sink: {e}");
                }
                let stats = self.stats.snapshot();
                debug!(
                    "File sink shut down, {} accepted, {} dropped",
                    stats.accepted,
                    stats.dropped()
                );
                Ok(())
            }
            Err(_) => {
                // The writer may be stuck inside a write holding the sink, so
                // the close happens on the blocking pool once it lets go.
                self.slot.retire();
                let slot = self.slot.clone();
                tokio::task::spawn_blocking(move || {
                    if let Err(e) = slot.close() {
                        warn!("Failed to close log sink: {e}");
                    }
                });
                Err(Error::ShutdownTimeout)
            }
        }
    }
}

fn spawn_flusher(
    tracker: &LifecycleTracker,
    quit: &CancellationToken,
    flusher: Flusher,
) -> FlusherState {
    let pause = CancellationToken::new();
    let (park, parked) = oneshot::channel();
    let quit = quit.clone();
    let pause_signal = pause.clone();

    tracker.spawn("flusher", async move {
        if let FlushExit::Paused(flusher) = flusher.run(quit, pause_signal).await {
            let _ = park.send(flusher);
        }
    });
    FlusherState::Running { pause, parked }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        // Without an explicit shutdown the tasks would outlive the sink.
        self.quit.cancel();
    }
}
