// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Republishing formatted entries to a message broker.
//!
//! [`BrokerHook::fire`] only shapes the message and offers it to a bounded
//! channel; a background task hands it to the [`Publisher`]. A slow or broken
//! broker therefore never touches the file path: a full channel drops the
//! message and publish failures are logged from the background task.

use crate::constants::{DEFAULT_BROKER_QUEUE_CAPACITY, HOSTNAME_FIELD, TOPIC_FIELD};
use crate::error::{Error, Result};
use crate::format::{Entry, Level, RecordFormatter};
use crate::lifecycle::LifecycleTracker;
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Receives entries at the levels it asks for, after the level filter.
pub trait Hook: Send + Sync {
    fn levels(&self) -> &[Level];
    fn fire(&self, entry: &Entry) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Bootstrap servers handed to the publisher's constructor
    pub servers: Vec<String>,
    /// Topic used when an entry has no `topic` field
    pub topic: String,
    pub app: String,
    pub app_name: String,
    pub env_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    /// Partition key, the entry timestamp
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Delivers messages to the broker. Implementations own their client and
/// its retry policy.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn publish(&self, message: BrokerMessage) -> Result<()>;
}

#[derive(Serialize)]
struct Envelope<'a> {
    app: &'a str,
    app_name: &'a str,
    env_name: &'a str,
    message: &'a str,
    trace_id: &'a str,
}

pub struct BrokerHook {
    config: BrokerConfig,
    levels: Vec<Level>,
    hostname: Option<String>,
    formatter: Arc<dyn RecordFormatter>,
    tx: mpsc::Sender<BrokerMessage>,
    dropped: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl fmt::Debug for BrokerHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerHook")
            .field("config", &self.config)
            .field("levels", &self.levels)
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

impl BrokerHook {
    /// Builds the publisher for `config.servers` with `connect` and starts
    /// the publishing task on `tracker`. It stops when `cancel` fires or the
    /// hook is dropped, after publishing what is still queued.
    pub fn start<P, F>(
        config: BrokerConfig,
        formatter: Arc<dyn RecordFormatter>,
        connect: F,
        debug: bool,
        tracker: &LifecycleTracker,
        cancel: CancellationToken,
    ) -> Result<Self>
    where
        P: Publisher,
        F: FnOnce(&[String]) -> Result<P>,
    {
        if config.servers.is_empty() {
            return Err(Error::InvalidConfig(
                "broker hook needs at least one server".to_string(),
            ));
        }
        let publisher = connect(&config.servers)?;

        let levels = if debug {
            Level::ALL.to_vec()
        } else {
            vec![Level::Error, Level::Warn, Level::Info]
        };
        let (tx, rx) = mpsc::channel(DEFAULT_BROKER_QUEUE_CAPACITY);
        let failed = Arc::new(AtomicU64::new(0));

        tracker.spawn(
            "broker publisher",
            run_publisher(publisher, rx, cancel, Arc::clone(&failed)),
        );

        Ok(Self {
            config,
            levels,
            hostname: Some(detect_hostname()),
            formatter,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            failed,
        })
    }

    /// Overrides the detected hostname; `None` disables the injection.
    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname;
        self
    }

    /// Messages dropped because the publish channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Messages the publisher rejected.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn message_for(&self, entry: &Entry) -> Result<BrokerMessage> {
        let mut entry = entry.clone();
        if let Some(hostname) = &self.hostname {
            if entry.field(HOSTNAME_FIELD).is_none() {
                entry.set_field(HOSTNAME_FIELD.to_string(), hostname.clone());
            }
        }

        let line = self.formatter.format(&entry)?;
        let line = String::from_utf8_lossy(&line);
        let trace_id = self.formatter.trace_id().unwrap_or_default();
        let value = serde_json::to_vec(&Envelope {
            app: &self.config.app,
            app_name: &self.config.app_name,
            env_name: &self.config.env_name,
            message: &line,
            trace_id: &trace_id,
        })
        .map_err(|e| Error::Format(e.to_string()))?;

        let topic = entry
            .field(TOPIC_FIELD)
            .unwrap_or(&self.config.topic)
            .to_string();

        Ok(BrokerMessage {
            topic,
            key: entry
                .time
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .into_bytes(),
            value,
        })
    }
}

impl Hook for BrokerHook {
    fn levels(&self) -> &[Level] {
        &self.levels
    }

    fn fire(&self, entry: &Entry) -> Result<()> {
        let message = self.message_for(entry)?;
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                Err(Error::Publish("broker publisher has stopped".to_string()))
            }
        }
    }
}

async fn run_publisher<P: Publisher>(
    publisher: P,
    mut rx: mpsc::Receiver<BrokerMessage>,
    cancel: CancellationToken,
    failed: Arc<AtomicU64>,
) {
    loop {
        tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(message) => publish_one(&publisher, message, &failed).await,
                None => return,
            },
            _ = cancel.cancelled() => break,
        }
    }

    rx.close();
    let mut remaining = 0usize;
    while let Ok(message) = rx.try_recv() {
        publish_one(&publisher, message, &failed).await;
        remaining += 1;
    }
    debug!("Broker publisher stopped after flushing {remaining} queued messages");
}

async fn publish_one<P: Publisher>(publisher: &P, message: BrokerMessage, failed: &AtomicU64) {
    if let Err(e) = publisher.publish(message).await {
        failed.fetch_add(1, Ordering::Relaxed);
        error!("Failed to send log entry to broker: {e}");
    }
}

fn detect_hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }
    system_hostname().unwrap_or_else(|| "localhost".to_string())
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(hostname) => hostname
            .to_str()
            .filter(|hostname| !hostname.is_empty())
            .map(str::to_string),
        Err(e) => {
            tracing::warn!("Failed to get system hostname: {e}");
            None
        }
    }
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    None
}
