// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Errors that can occur while running the log sink
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stat log file {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Can't read log file directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to format record: {0}")]
    Format(String),

    #[error("Failed to publish record: {0}")]
    Publish(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Sink already shut down")]
    AlreadyShutdown,

    #[error("Shutdown timeout exceeded")]
    ShutdownTimeout,
}

pub type Result<T> = std::result::Result<T, Error>;
