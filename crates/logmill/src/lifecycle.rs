// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Supervision of the sink's background tasks.
//!
//! Every long-lived task (flusher, writer, rotation ticker, retention ticker,
//! sweeper) is launched through a [`LifecycleTracker`]. Each task runs in its
//! own tokio task with a supervising task awaiting it, so a panic inside a
//! task is turned into an `error!` event instead of tearing down the process.
//! [`LifecycleTracker::join`] is the shutdown barrier.

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn, Instrument, Span};

#[derive(Debug, Clone, Default)]
pub struct LifecycleTracker {
    tracker: TaskTracker,
    panics: Arc<AtomicUsize>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` on the runtime under supervision.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = tokio::spawn(task.in_current_span());
        let panics = Arc::clone(&self.panics);
        self.tracker
            .spawn(async move { supervise(name, inner.await, &panics) }.in_current_span());
    }

    /// Runs blocking `work` on the blocking pool under supervision.
    pub fn spawn_blocking<F>(&self, name: &'static str, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let span = Span::current();
        let inner = tokio::task::spawn_blocking(move || span.in_scope(work));
        let panics = Arc::clone(&self.panics);
        self.tracker
            .spawn(async move { supervise(name, inner.await, &panics) }.in_current_span());
    }

    /// Waits until every supervised task has exited. Tasks are expected to
    /// have been signalled to stop before this is called.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Number of supervised tasks still running.
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Number of tasks that ended in a panic.
    pub fn panics(&self) -> usize {
        self.panics.load(Ordering::Relaxed)
    }
}

fn supervise(name: &'static str, result: Result<(), JoinError>, panics: &AtomicUsize) {
    match result {
        Ok(()) => debug!("{name} task stopped"),
        Err(e) if e.is_panic() => {
            panics.fetch_add(1, Ordering::Relaxed);
            let payload = e.into_panic();
            error!("{name} task panicked: {}", panic_message(payload.as_ref()));
        }
        Err(e) => warn!("{name} task was cancelled: {e}"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
