// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The single consumer of the ingest queue.
//!
//! Writes happen on one dedicated blocking writer fed through a small backlog
//! channel. The flusher hands each record over and waits at most the flush
//! timeout for the write to be acknowledged:
//!
//! - if the backlog is still full when the deadline passes, the record is
//!   dropped (`dropped_backlog`);
//! - if the record was handed over but not yet written, the flusher moves on
//!   and the write still lands later, in order (`late_writes`).
//!
//! A hung filesystem therefore costs at most `write_backlog + 1` records
//! parked behind the writer, never a growing pile of detached writes.

use crate::active_sink::SinkSlot;
use crate::lifecycle::LifecycleTracker;
use crate::queue::{LogRecord, QueueReceiver};
use crate::stats::SinkStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
pub(crate) struct WriteJob {
    record: LogRecord,
    ack: Option<oneshot::Sender<()>>,
}

/// Starts the blocking writer. It exits once every sender is dropped.
pub(crate) fn spawn_writer(
    tracker: &LifecycleTracker,
    slot: SinkSlot,
    stats: Arc<SinkStats>,
    backlog: usize,
) -> mpsc::Sender<WriteJob> {
    let (tx, mut rx) = mpsc::channel::<WriteJob>(backlog);

    tracker.spawn_blocking("log writer", move || {
        while let Some(job) = rx.blocking_recv() {
            // Empty jobs are barriers, they only ask for an ack.
            if !job.record.is_empty() {
                if let Err(e) = slot.write(job.record.as_bytes()) {
                    SinkStats::bump(&stats.write_errors);
                    warn!("Failed to write log record: {e}");
                }
            }
            if let Some(ack) = job.ack {
                let _ = ack.send(());
            }
        }
    });

    tx
}

/// How a flusher run ended.
#[derive(Debug)]
pub(crate) enum FlushExit {
    /// Local close: the queue is still open and the flusher can be resumed.
    Paused(Flusher),
    Stopped,
}

#[derive(Debug)]
pub(crate) struct Flusher {
    queue: QueueReceiver,
    writer: mpsc::Sender<WriteJob>,
    stats: Arc<SinkStats>,
    flush_timeout: Duration,
}

impl Flusher {
    pub(crate) fn new(
        queue: QueueReceiver,
        writer: mpsc::Sender<WriteJob>,
        stats: Arc<SinkStats>,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            writer,
            stats,
            flush_timeout,
        }
    }

    /// Moves records from the queue to the writer until `quit` or `pause`
    /// fires. Both drain what is buffered first. `quit` closes the queue
    /// before draining; only `pause` hands the flusher back with the queue
    /// still open.
    pub(crate) async fn run(mut self, quit: CancellationToken, pause: CancellationToken) -> FlushExit {
        loop {
            tokio::select! {
                biased;
                _ = quit.cancelled() => {
                    // Producers still running must see `false` from here on,
                    // otherwise the drain never ends.
                    self.queue.close();
                    self.drain(true).await;
                    return FlushExit::Stopped;
                }
                _ = pause.cancelled() => {
                    self.drain(false).await;
                    return FlushExit::Paused(self);
                }
                record = self.queue.recv() => match record {
                    Some(record) => self.write_bounded(record).await,
                    None => return FlushExit::Stopped,
                },
            }
        }
    }

    async fn write_bounded(&self, record: LogRecord) {
        let deadline = Instant::now() + self.flush_timeout;
        let (ack, done) = oneshot::channel();

        match timeout_at(deadline, self.writer.reserve()).await {
            Ok(Ok(permit)) => permit.send(WriteJob {
                record,
                ack: Some(ack),
            }),
            Ok(Err(_)) => {
                SinkStats::bump(&self.stats.write_errors);
                return;
            }
            Err(_) => {
                SinkStats::bump(&self.stats.dropped_backlog);
                return;
            }
        }

        if timeout_at(deadline, done).await.is_err() {
            SinkStats::bump(&self.stats.late_writes);
        }
    }

    /// Hands every buffered record to the writer, waiting as long as it
    /// takes, and returns once the writer has written all of them.
    ///
    /// On a closed queue this also waits for sends that were already
    /// accepted but not yet visible to the receiver.
    async fn drain(&mut self, closed: bool) {
        let mut drained = 0usize;
        loop {
            let record = if closed {
                self.queue.recv().await
            } else {
                self.queue.try_recv()
            };
            let Some(record) = record else {
                break;
            };
            if self
                .writer
                .send(WriteJob { record, ack: None })
                .await
                .is_err()
            {
                SinkStats::bump(&self.stats.write_errors);
                return;
            }
            drained += 1;
        }

        let (ack, done) = oneshot::channel();
        let barrier = WriteJob {
            record: LogRecord::from(Vec::new()),
            ack: Some(ack),
        };
        if self.writer.send(barrier).await.is_ok() {
            let _ = done.await;
        }
        debug!("Flusher drained {drained} buffered records");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::active_sink::ActiveSink;
    use crate::queue::ingest_queue;
    use crate::test_utils::{GatedWriter, SharedBuffer};
    use std::io::{self, Write};

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_writes_in_fifo_order_and_drains_on_quit() {
        let buffer = SharedBuffer::default();
        let slot = SinkSlot::new(ActiveSink::stream(Box::new(buffer.clone())));
        let stats = Arc::new(SinkStats::default());
        let tracker = LifecycleTracker::new();
        let (sender, receiver) = ingest_queue(1_000, Arc::clone(&stats));

        let writer = spawn_writer(&tracker, slot, Arc::clone(&stats), 4);
        let flusher = Flusher::new(receiver, writer, Arc::clone(&stats), Duration::from_secs(1));
        let quit = CancellationToken::new();
        let task = tokio::spawn(flusher.run(quit.clone(), CancellationToken::new()));

        let mut expected = String::new();
        for i in 0..500 {
            let line = format!("record {i}\n");
            assert!(sender.enqueue(line.as_str()));
            expected.push_str(&line);
        }

        quit.cancel();
        assert!(matches!(task.await.unwrap(), FlushExit::Stopped));
        tracker.join().await;

        assert_eq!(buffer.text(), expected);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dropped(), 0);
        assert_eq!(snapshot.write_errors, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_quit_drains_while_producer_keeps_enqueueing() {
        let buffer = SharedBuffer::default();
        let slot = SinkSlot::new(ActiveSink::stream(Box::new(buffer.clone())));
        let stats = Arc::new(SinkStats::default());
        let tracker = LifecycleTracker::new();
        let (sender, receiver) = ingest_queue(256, Arc::clone(&stats));

        let writer = spawn_writer(&tracker, slot, Arc::clone(&stats), 4);
        let flusher = Flusher::new(receiver, writer, Arc::clone(&stats), Duration::from_secs(1));
        let quit = CancellationToken::new();
        let task = tokio::spawn(flusher.run(quit.clone(), CancellationToken::new()));

        let producer = std::thread::spawn(move || {
            let mut accepted = 0u64;
            let mut i = 0u64;
            while !sender.is_closed() {
                if sender.enqueue(format!("{i}\n")) {
                    accepted += 1;
                }
                i += 1;
            }
            accepted
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        quit.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        tracker.join().await;
        let accepted = producer.join().unwrap();

        assert_eq!(stats.snapshot().accepted, accepted);
        assert_eq!(buffer.text().lines().count() as u64, accepted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pause_returns_flusher_with_queue_intact() {
        let buffer = SharedBuffer::default();
        let slot = SinkSlot::new(ActiveSink::stream(Box::new(buffer.clone())));
        let stats = Arc::new(SinkStats::default());
        let tracker = LifecycleTracker::new();
        let (sender, receiver) = ingest_queue(16, Arc::clone(&stats));

        let writer = spawn_writer(&tracker, slot, Arc::clone(&stats), 4);
        let flusher = Flusher::new(receiver, writer, Arc::clone(&stats), Duration::from_secs(1));
        sender.enqueue("one\n");

        let pause = CancellationToken::new();
        pause.cancel();
        let FlushExit::Paused(flusher) = flusher.run(CancellationToken::new(), pause).await else {
            panic!("flusher should have paused");
        };

        assert!(sender.enqueue("two\n"));
        let quit = CancellationToken::new();
        quit.cancel();
        assert!(matches!(
            flusher.run(quit, CancellationToken::new()).await,
            FlushExit::Stopped
        ));
        tracker.join().await;

        assert_eq!(buffer.text(), "one\ntwo\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stalled_writer_bounds_wait_and_keeps_order() {
        let gated = GatedWriter::default();
        let slot = SinkSlot::new(ActiveSink::stream(Box::new(gated.clone())));
        let stats = Arc::new(SinkStats::default());
        let tracker = LifecycleTracker::new();
        let (sender, receiver) = ingest_queue(64, Arc::clone(&stats));

        let writer = spawn_writer(&tracker, slot, Arc::clone(&stats), 2);
        let flusher = Flusher::new(receiver, writer, Arc::clone(&stats), Duration::from_millis(10));
        let quit = CancellationToken::new();
        let task = tokio::spawn(flusher.run(quit.clone(), CancellationToken::new()));

        for i in 0..10 {
            sender.enqueue(format!("{i}\n"));
        }

        // Every record either waits out its deadline or is dropped; none of
        // them can hold the flusher longer than the timeout.
        tokio::time::timeout(Duration::from_secs(2), async {
            while stats.snapshot().late_writes + stats.snapshot().dropped_backlog < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        gated.open();
        quit.cancel();
        task.await.unwrap();
        tracker.join().await;

        let snapshot = stats.snapshot();
        assert!(snapshot.late_writes >= 1);
        assert!(snapshot.dropped_backlog >= 1);
        // Writer holds one in flight and two in the backlog.
        assert!(snapshot.late_writes <= 3);

        let written: Vec<u32> = gated.inner.text()
            .lines()
            .map(|line| line.parse().unwrap())
            .collect();
        assert_eq!(written.len() as u64, snapshot.late_writes);
        assert!(written.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_errors_are_counted() {
        let slot = SinkSlot::new(ActiveSink::stream(Box::new(FailingWriter)));
        let stats = Arc::new(SinkStats::default());
        let tracker = LifecycleTracker::new();
        let (sender, receiver) = ingest_queue(8, Arc::clone(&stats));

        let writer = spawn_writer(&tracker, slot, Arc::clone(&stats), 4);
        let flusher = Flusher::new(receiver, writer, Arc::clone(&stats), Duration::from_secs(1));
        sender.enqueue("lost\n");
        sender.enqueue("also lost\n");

        let quit = CancellationToken::new();
        quit.cancel();
        flusher.run(quit, CancellationToken::new()).await;
        tracker.join().await;

        assert_eq!(stats.snapshot().write_errors, 2);
    }
}
