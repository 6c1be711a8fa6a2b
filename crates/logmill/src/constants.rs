// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Default tunables for the sink pipeline.

/// Records buffered between producers and the flusher before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

/// How long the flusher waits for a single write before moving on.
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 50;

/// Period of the rotation check.
pub const DEFAULT_ROTATION_CHECK_INTERVAL_MS: u64 = 1_000;

/// Period of the retention sweep trigger.
pub const DEFAULT_RETENTION_INTERVAL_MS: u64 = 10_000;

/// Records handed to the writer but not yet on disk. Once this many writes
/// are outstanding, further records are dropped instead of queued behind a
/// stuck filesystem call.
pub const DEFAULT_WRITE_BACKLOG: usize = 16;

/// Upper bound for the rotation bucket size.
pub const MAX_ROTATION_INTERVAL_HOURS: u32 = 24;

/// Size budgets are configured in binary megabytes.
pub const MEGABYTE: u64 = 1024 * 1024;

/// Timestamp layout embedded in rotated file names (`YYYYMMDDHH`).
pub const FILE_NAME_TIME_FORMAT: &str = "%Y%m%d%H";

/// chrono pattern for the line formatter's timestamp column.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f%z";

/// Field whose value becomes the line tag instead of a `k=v` pair.
pub const TAG_FIELD: &str = "tag";

pub const UNDEFINED_TAG: &str = "_undef";

/// Field keys that would read like the line's own columns; they are printed
/// as `fields.<key>`.
pub const FIELD_CLASH_KEYS: &[&str] = &["time", "msg", "level"];

pub const VALUE_TRIM_CHARS: &[char] = &[' ', '\r', '\t', '\x0b', '\n'];

/// Field rendering an entry's elapsed time since [`crate::Entry::began_at`],
/// in milliseconds.
pub const PROC_TIME_FIELD: &str = "proc_time";

/// Header carrying the trace id between services.
pub const DEFAULT_TRACE_HEADER: &str = "default-header-rid";

pub const HOSTNAME_FIELD: &str = "hostname";

/// Field that overrides the broker topic for a single entry.
pub const TOPIC_FIELD: &str = "topic";

/// Messages waiting for the broker publisher before new ones are dropped.
pub const DEFAULT_BROKER_QUEUE_CAPACITY: usize = 10_000;
