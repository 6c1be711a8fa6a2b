// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use logmill::{FileSink, SinkConfig};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("LOGMILL_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    let config = match SinkConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error creating config on logmill-tee startup: {e}");
            return ExitCode::FAILURE;
        }
    };

    let sink = match FileSink::start(config) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Error starting file sink: {e}");
            return ExitCode::FAILURE;
        }
    };

    let sender = sink.sender();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(mut line)) => {
                    line.push('\n');
                    sender.enqueue(line);
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            },
            _ = &mut ctrl_c => {
                debug!("Received Ctrl-C");
                break;
            }
        }
    }

    let result = sink.shutdown(SHUTDOWN_TIMEOUT).await;
    let stats = sink.stats();
    info!(
        accepted = stats.accepted,
        dropped_full = stats.dropped_full,
        dropped_backlog = stats.dropped_backlog,
        late_writes = stats.late_writes,
        write_errors = stats.write_errors,
        rotations = stats.rotations,
        swept_files = stats.swept_files,
        "logmill-tee finished"
    );

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            warn!("File sink did not shut down cleanly: {e}");
            ExitCode::FAILURE
        }
    }
}
