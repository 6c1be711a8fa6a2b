// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffered, rotating file sink for pre-formatted log records.
//!
//! Producers hand opaque byte records to a bounded queue without ever
//! blocking. A single flusher writes them to the active file, a rotation
//! controller swaps that file when the time bucket changes or the file is
//! replaced underneath us, and a retention sweep removes rotated files that
//! are too old or exceed the size budget.
//!
//! ```no_run
//! use logmill::{FileSink, SinkConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> logmill::Result<()> {
//! let sink = FileSink::start(SinkConfig {
//!     base_path: Some("/var/log/app/server.log".into()),
//!     rotation_interval_hours: 1,
//!     max_age_days: 7,
//!     ..Default::default()
//! })?;
//! sink.enqueue("hello\n");
//! sink.shutdown(Duration::from_secs(5)).await
//! # }
//! ```
//!
//! [`Logger`], [`LineFormatter`] and [`BrokerHook`] sit in front of the sink
//! for callers that log structured entries instead of ready-made lines.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod active_sink;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
mod flusher;
pub mod format;
pub mod hook;
pub mod lifecycle;
pub mod logger;
pub mod naming;
pub mod queue;
pub mod retention;
pub mod rotation;
pub mod sink;
pub mod stats;
#[cfg(test)]
mod test_utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SinkConfig;
pub use error::{Error, Result};
pub use format::{Entry, Level, LineFormatter, RecordFormatter, TraceIdGenerator};
pub use hook::{BrokerConfig, BrokerHook, BrokerMessage, Hook, Publisher};
pub use lifecycle::LifecycleTracker;
pub use logger::Logger;
pub use queue::{LogRecord, RecordSender};
pub use retention::{RetentionPolicy, SweepReport};
pub use rotation::RotationReason;
pub use sink::{FileSink, FileSinkBuilder};
pub use stats::StatsSnapshot;
