// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded ingestion queue between log producers and the flusher.
//!
//! Producers hold cloneable [`RecordSender`]s; exactly one [`QueueReceiver`]
//! exists and is owned by whichever flusher is currently running. `enqueue`
//! never waits: when the queue is full the record is dropped and counted, so
//! a stalled disk can't stall the code that is logging.

use crate::stats::SinkStats;
use derive_more::{From, Into};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// One already-formatted log line. The sink never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, From, Into)]
pub struct LogRecord(Vec<u8>);

impl LogRecord {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for LogRecord {
    fn from(line: String) -> Self {
        Self(line.into_bytes())
    }
}

impl From<&str> for LogRecord {
    fn from(line: &str) -> Self {
        Self(line.as_bytes().to_vec())
    }
}

impl From<&[u8]> for LogRecord {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for LogRecord {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Producer side of the queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<LogRecord>,
    stats: Arc<SinkStats>,
}

impl RecordSender {
    /// Offers a record to the queue without waiting. `false` means the record
    /// was dropped; callers should never surface that as an error.
    pub fn enqueue(&self, record: impl Into<LogRecord>) -> bool {
        match self.tx.try_send(record.into()) {
            Ok(()) => {
                SinkStats::bump(&self.stats.accepted);
                true
            }
            Err(TrySendError::Full(_) | TrySendError::Closed(_)) => {
                SinkStats::bump(&self.stats.dropped_full);
                false
            }
        }
    }

    /// Free slots left in the queue.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// `true` once the sink has stopped accepting records for good.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the queue, owned by a single flusher at a time.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<LogRecord>,
}

impl QueueReceiver {
    pub async fn recv(&mut self) -> Option<LogRecord> {
        self.rx.recv().await
    }

    /// Next buffered record, without waiting.
    pub fn try_recv(&mut self) -> Option<LogRecord> {
        self.rx.try_recv().ok()
    }

    /// Rejects every later `enqueue`. Records already accepted stay
    /// buffered and can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Creates a queue holding at most `capacity` records.
pub fn ingest_queue(capacity: usize, stats: Arc<SinkStats>) -> (RecordSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (RecordSender { tx, stats }, QueueReceiver { rx })
}
