// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mapping between wall-clock time and on-disk file names.
//!
//! Rotated files live next to the configured path as
//! `<dir>/<prefix>-<YYYYMMDDHH><ext>`, where `<prefix>` is the configured file
//! name without its extension. The same rules are used in both directions, so
//! the retention sweep can recover the bucket a file was opened for.

use crate::constants::FILE_NAME_TIME_FORMAT;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNaming {
    base_path: PathBuf,
    dir: PathBuf,
    prefix: String,
    ext: String,
    interval_hours: u32,
    use_local_time: bool,
}

impl FileNaming {
    pub fn new(base_path: &Path, interval_hours: u32, use_local_time: bool) -> Self {
        let dir = match base_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = base_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = base_path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        Self {
            base_path: base_path.to_path_buf(),
            dir,
            prefix,
            ext,
            interval_hours,
            use_local_time,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn rotation_enabled(&self) -> bool {
        self.interval_hours > 0
    }

    /// Path the sink should be writing to at `now`.
    pub fn target_path(&self, now: DateTime<Utc>) -> PathBuf {
        if !self.rotation_enabled() {
            return self.base_path.clone();
        }
        let bucket = self.bucket_start(now);
        self.dir.join(format!(
            "{}-{}{}",
            self.prefix,
            bucket.format(FILE_NAME_TIME_FORMAT),
            self.ext
        ))
    }

    /// Start of the rotation bucket containing `now`, in the configured timezone.
    fn bucket_start(&self, now: DateTime<Utc>) -> NaiveDateTime {
        let naive = if self.use_local_time {
            now.with_timezone(&Local).naive_local()
        } else {
            now.naive_utc()
        };
        let hour = naive.hour() - naive.hour() % self.interval_hours;
        // hour is always within 0..24 here, so this never falls back
        naive
            .date()
            .and_hms_opt(hour, 0, 0)
            .unwrap_or(naive)
    }

    /// Recovers the bucket timestamp from a rotated file name. Names that do
    /// not follow the rotated pattern exactly yield `None`.
    pub fn parse_timestamp(&self, file_name: &str) -> Option<DateTime<Utc>> {
        let stamp = file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('-')?
            .strip_suffix(self.ext.as_str())?;
        if stamp.len() != 10 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let naive = NaiveDate::from_ymd_opt(
            stamp[0..4].parse().ok()?,
            stamp[4..6].parse().ok()?,
            stamp[6..8].parse().ok()?,
        )?
        .and_hms_opt(stamp[8..10].parse().ok()?, 0, 0)?;
        if self.use_local_time {
            Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
        } else {
            Some(Utc.from_utc_datetime(&naive))
        }
    }
}
