// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::format::{Entry, Level, RecordFormatter};
use crate::hook::Hook;
use crate::queue::RecordSender;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Level filter, formatter and hooks in front of a sink's queue.
///
/// Clones share the log id and the appended fields.
#[derive(Clone)]
pub struct Logger {
    level: Level,
    formatter: Arc<dyn RecordFormatter>,
    sender: RecordSender,
    hooks: Vec<Arc<dyn Hook>>,
    log_id: Arc<RwLock<Option<i64>>>,
    fields: Arc<RwLock<Vec<(String, String)>>>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Logs at `Info` and above, or `Debug` and above when `debug` is set.
    pub fn new(sender: RecordSender, formatter: Arc<dyn RecordFormatter>, debug: bool) -> Self {
        Self {
            level: if debug { Level::Debug } else { Level::Info },
            formatter,
            sender,
            hooks: Vec::new(),
            log_id: Arc::new(RwLock::new(None)),
            fields: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn enabled(&self, level: Level) -> bool {
        level >= self.level
    }

    pub fn trace_id(&self) -> Option<String> {
        self.formatter.trace_id()
    }

    /// Log id stamped on entries that don't carry their own. `None` leaves
    /// the formatter's worker id in place.
    pub fn log_id(&self) -> Option<i64> {
        *self.log_id.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_log_id(&self, log_id: i64) {
        *self.log_id.write().unwrap_or_else(PoisonError::into_inner) = Some(log_id);
    }

    /// Adds fields to every later entry. They replace entry fields of the
    /// same key, and a later call replaces an earlier value.
    pub fn append_fields<K, V>(&self, fields: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: fmt::Display,
    {
        let mut appended = self.fields.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in fields {
            let (key, value) = (key.into(), value.to_string());
            match appended.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) => *existing = value,
                None => appended.push((key, value)),
            }
        }
    }

    /// Formats `entry` once, offers it to the sink and fires the hooks that
    /// want its level. Returns whether the sink accepted the record; hook
    /// failures never change the result.
    pub fn log(&self, mut entry: Entry) -> bool {
        if !self.enabled(entry.level) {
            return false;
        }

        if entry.log_id.is_none() {
            entry.log_id = self.log_id();
        }
        for (key, value) in self
            .fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            entry.set_field(key.clone(), value.clone());
        }

        for hook in &self.hooks {
            if hook.levels().contains(&entry.level) {
                if let Err(e) = hook.fire(&entry) {
                    debug!("Log hook failed: {e}");
                }
            }
        }

        match self.formatter.format(&entry) {
            Ok(record) => self.sender.enqueue(record),
            Err(e) => {
                warn!("Dropping log entry: {e}");
                false
            }
        }
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.log(Entry::new(Level::Error, message))
    }

    #[track_caller]
    pub fn warn(&self, message: impl Into<String>) -> bool {
        self.log(Entry::new(Level::Warn, message))
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<String>) -> bool {
        self.log(Entry::new(Level::Info, message))
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<String>) -> bool {
        self.log(Entry::new(Level::Debug, message))
    }
}
