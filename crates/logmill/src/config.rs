// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    DEFAULT_FLUSH_TIMEOUT_MS, DEFAULT_QUEUE_CAPACITY, DEFAULT_RETENTION_INTERVAL_MS,
    DEFAULT_ROTATION_CHECK_INTERVAL_MS, DEFAULT_WRITE_BACKLOG, MAX_ROTATION_INTERVAL_HOURS,
};
use crate::error::{Error, Result};
use crate::retention::RetentionPolicy;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the file sink. Created once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Configured log file path, before any rotation suffix is added.
    /// `None` keeps the sink on its fallback stream.
    pub base_path: Option<PathBuf>,
    /// Size of a rotation bucket in hours; 0 keeps a single static file
    pub rotation_interval_hours: u32,
    /// Rotated files older than this many days are removed; 0 = unlimited
    pub max_age_days: u32,
    /// Cumulative size budget for rotated files in binary megabytes; 0 = unlimited
    pub max_size_megabytes: u64,
    /// Name buckets after local wall-clock time instead of UTC
    pub use_local_time: bool,
    pub queue_capacity: usize,
    pub flush_timeout_ms: u64,
    pub rotation_check_interval_ms: u64,
    pub retention_interval_ms: u64,
    pub write_backlog: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            rotation_interval_hours: 0,
            max_age_days: 0,
            max_size_megabytes: 0,
            use_local_time: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
            rotation_check_interval_ms: DEFAULT_ROTATION_CHECK_INTERVAL_MS,
            retention_interval_ms: DEFAULT_RETENTION_INTERVAL_MS,
            write_backlog: DEFAULT_WRITE_BACKLOG,
        }
    }
}

impl SinkConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            base_path: env::var_os("LOGMILL_FILE")
                .filter(|val| !val.is_empty())
                .map(PathBuf::from),
            rotation_interval_hours: parse_env("LOGMILL_ROTATE_HOURS")?
                .unwrap_or(defaults.rotation_interval_hours),
            max_age_days: parse_env("LOGMILL_MAX_AGE_DAYS")?.unwrap_or(defaults.max_age_days),
            max_size_megabytes: parse_env("LOGMILL_MAX_SIZE_MB")?
                .unwrap_or(defaults.max_size_megabytes),
            use_local_time: parse_env_bool("LOGMILL_LOCAL_TIME")?
                .unwrap_or(defaults.use_local_time),
            queue_capacity: parse_env("LOGMILL_QUEUE_CAPACITY")?
                .unwrap_or(defaults.queue_capacity),
            flush_timeout_ms: parse_env("LOGMILL_FLUSH_TIMEOUT_MS")?
                .unwrap_or(defaults.flush_timeout_ms),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.rotation_interval_hours > MAX_ROTATION_INTERVAL_HOURS {
            return Err(Error::InvalidConfig(format!(
                "rotation interval must be at most {MAX_ROTATION_INTERVAL_HOURS} hours, got {}",
                self.rotation_interval_hours
            )));
        }

        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.write_backlog == 0 {
            return Err(Error::InvalidConfig(
                "write backlog must be greater than 0".to_string(),
            ));
        }

        if self.flush_timeout_ms == 0
            || self.rotation_check_interval_ms == 0
            || self.retention_interval_ms == 0
        {
            return Err(Error::InvalidConfig(
                "flush timeout and tick intervals must be greater than 0".to_string(),
            ));
        }

        if let Some(path) = &self.base_path {
            if path.file_name().is_none() {
                return Err(Error::InvalidConfig(format!(
                    "log path {} does not name a file",
                    path.display()
                )));
            }
        }

        Ok(())
    }

    pub fn rotation_enabled(&self) -> bool {
        self.rotation_interval_hours > 0
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age_days: self.max_age_days,
            max_size_megabytes: self.max_size_megabytes,
        }
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn rotation_check_interval(&self) -> Duration {
        Duration::from_millis(self.rotation_check_interval_ms)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_millis(self.retention_interval_ms)
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::InvalidConfig(format!("{name}={val:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// `true`/`false` in any case; anything else is rejected.
fn parse_env_bool(name: &str) -> Result<Option<bool>> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .to_lowercase()
            .parse::<bool>()
            .map(Some)
            .map_err(|e| Error::InvalidConfig(format!("{name}={val:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: [&str; 7] = [
        "LOGMILL_FILE",
        "LOGMILL_ROTATE_HOURS",
        "LOGMILL_MAX_AGE_DAYS",
        "LOGMILL_MAX_SIZE_MB",
        "LOGMILL_LOCAL_TIME",
        "LOGMILL_QUEUE_CAPACITY",
        "LOGMILL_FLUSH_TIMEOUT_MS",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SinkConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.rotation_enabled());
        assert_eq!(config.queue_capacity, 100_000);
        assert_eq!(config.flush_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_validate_rotation_interval_bound() {
        let config = SinkConfig {
            rotation_interval_hours: 24,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = SinkConfig {
            rotation_interval_hours: 25,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_zero_capacity() {
        let config = SinkConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_path_without_file_name() {
        let config = SinkConfig {
            base_path: Some(PathBuf::from("/")),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: SinkConfig = serde_json::from_str(
            r#"{"base_path": "/var/log/app/server.log", "rotation_interval_hours": 4, "max_size_megabytes": 512}"#,
        )
        .unwrap();
        assert_eq!(
            config.base_path,
            Some(PathBuf::from("/var/log/app/server.log"))
        );
        assert_eq!(config.rotation_interval_hours, 4);
        assert_eq!(config.retention().max_size_megabytes, 512);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        env::set_var("LOGMILL_FILE", "/tmp/logmill/app.log");
        env::set_var("LOGMILL_ROTATE_HOURS", "4");
        env::set_var("LOGMILL_MAX_AGE_DAYS", "7");
        env::set_var("LOGMILL_LOCAL_TIME", "TRUE");

        let config = SinkConfig::from_env().unwrap();
        assert_eq!(config.base_path, Some(PathBuf::from("/tmp/logmill/app.log")));
        assert_eq!(config.rotation_interval_hours, 4);
        assert_eq!(config.max_age_days, 7);
        assert!(config.use_local_time);
        assert_eq!(config.max_size_megabytes, 0);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        clear_env();
        env::set_var("LOGMILL_MAX_SIZE_MB", "lots");
        assert!(matches!(
            SinkConfig::from_env(),
            Err(Error::InvalidConfig(_))
        ));

        env::remove_var("LOGMILL_MAX_SIZE_MB");
        env::set_var("LOGMILL_ROTATE_HOURS", "48");
        assert!(SinkConfig::from_env().is_err());
        clear_env();

        for val in ["1", "yes", "ture"] {
            env::set_var("LOGMILL_LOCAL_TIME", val);
            assert!(
                matches!(SinkConfig::from_env(), Err(Error::InvalidConfig(_))),
                "{val}"
            );
        }
        env::set_var("LOGMILL_LOCAL_TIME", " False ");
        assert!(!SinkConfig::from_env().unwrap().use_local_time);
        clear_env();
    }
}
