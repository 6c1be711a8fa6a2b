// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turning log entries into the opaque byte records the sink carries.

use crate::constants::{
    DEFAULT_TIMESTAMP_FORMAT, DEFAULT_TRACE_HEADER, FIELD_CLASH_KEYS, PROC_TIME_FIELD, TAG_FIELD,
    UNDEFINED_TAG, VALUE_TRIM_CHARS,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Local, Utc};
use derive_more::Display;
use hyper::http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::fmt::{self, Write as _};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::panic::Location;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[display("TRACE")]
    Trace,
    #[display("DEBUG")]
    Debug,
    #[display("INFO")]
    Info,
    #[display("WARNING")]
    Warn,
    #[display("ERROR")]
    Error,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Debug,
        Level::Trace,
    ];
}

/// One log event before formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub level: Level,
    pub time: DateTime<Utc>,
    pub message: String,
    pub tag: Option<String>,
    /// `dir/file.rs:line` of the code that created the entry
    pub caller: Option<String>,
    /// Key/value pairs in insertion order
    pub fields: Vec<(String, String)>,
    /// When the work being logged started; rendered as `proc_time`
    pub began: Option<DateTime<Utc>>,
    /// Overrides the formatter's log id for this entry
    pub log_id: Option<i64>,
}

impl Entry {
    #[track_caller]
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            time: Utc::now(),
            message: message.into(),
            tag: None,
            caller: Some(caller_location(Location::caller())),
            fields: Vec::new(),
            began: None,
            log_id: None,
        }
    }

    /// Records when the logged operation started.
    pub fn began_at(mut self, start: DateTime<Utc>) -> Self {
        self.began = Some(start);
        self
    }

    pub fn with_log_id(mut self, log_id: i64) -> Self {
        self.log_id = Some(log_id);
        self
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Adds a field, replacing an earlier value for the same key.
    pub fn with_field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.set_field(key.into(), value.to_string());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn set_field(&mut self, key: String, value: String) {
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key, value)),
        }
    }
}

fn caller_location(location: &Location<'_>) -> String {
    let mut parts = location.file().rsplit(['/', '\\']);
    let file = parts.next().unwrap_or_default();
    match parts.next() {
        Some(dir) => format!("{dir}/{file}:{}", location.line()),
        None => format!("{file}:{}", location.line()),
    }
}

/// Renders an [`Entry`] into the bytes that get enqueued.
pub trait RecordFormatter: Send + Sync {
    fn format(&self, entry: &Entry) -> Result<Vec<u8>>;

    /// Trace id carried by formatters that track one.
    fn trace_id(&self) -> Option<String> {
        None
    }
}

/// Builds 32-ish character trace ids from the host address, the time, the
/// process id and a random tail.
#[derive(Debug, Clone)]
pub struct TraceIdGenerator {
    ip_hex: String,
    pid: u32,
}

impl TraceIdGenerator {
    pub fn new(ip: Ipv4Addr) -> Self {
        let [a, b, c, d] = ip.octets();
        Self {
            ip_hex: format!("{a:02x}{b:02x}{c:02x}{d:02x}"),
            pid: std::process::id(),
        }
    }

    /// Uses the address of the interface that routes outwards, or loopback.
    pub fn from_host() -> Self {
        Self::new(outbound_ipv4().unwrap_or(Ipv4Addr::LOCALHOST))
    }

    pub fn generate(&self, now: DateTime<Utc>) -> String {
        let seconds = (now.timestamp() & 0xffff_ffff) as u32;
        let nanos = now.timestamp_nanos_opt().unwrap_or_default() & 0xffff;
        format!(
            "{}{seconds:x}{nanos:04x}{:04x}{:06x}b0",
            self.ip_hex,
            self.pid & 0xffff,
            fastrand::u32(..1 << 24)
        )
    }
}

// Connecting a UDP socket sends nothing; it only asks the kernel for a route.
fn outbound_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 80)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// The `[LEVEL][time][caller] tag||_msg=..||logid=..||traceid=..||k=v` line format.
#[derive(Debug)]
pub struct LineFormatter {
    worker_id: i64,
    timestamp_format: String,
    full_timestamp: bool,
    disable_sorting: bool,
    use_local_time: bool,
    fields: Vec<(String, String)>,
    trace_id: Mutex<Option<String>>,
    trace_ids: TraceIdGenerator,
    trace_header: String,
    started: Instant,
}

impl LineFormatter {
    pub fn new(worker_id: i64) -> Self {
        Self {
            worker_id,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            full_timestamp: true,
            disable_sorting: false,
            use_local_time: true,
            fields: Vec::new(),
            trace_id: Mutex::new(None),
            trace_ids: TraceIdGenerator::from_host(),
            trace_header: DEFAULT_TRACE_HEADER.to_string(),
            started: Instant::now(),
        }
    }

    /// chrono `strftime` pattern for the timestamp column.
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    /// Prints seconds since the formatter was built instead of a timestamp.
    pub fn with_elapsed_timestamp(mut self) -> Self {
        self.full_timestamp = false;
        self
    }

    pub fn with_sorting(mut self, sort: bool) -> Self {
        self.disable_sorting = !sort;
        self
    }

    pub fn with_utc(mut self) -> Self {
        self.use_local_time = false;
        self
    }

    pub fn with_trace_ids(mut self, generator: TraceIdGenerator) -> Self {
        self.trace_ids = generator;
        self
    }

    /// Header name used by [`LineFormatter::parse_trace`] and
    /// [`LineFormatter::inject_trace`]. An empty name keeps the default.
    pub fn with_trace_header(mut self, header: impl Into<String>) -> Self {
        let header = header.into();
        if !header.is_empty() {
            self.trace_header = header;
        }
        self
    }

    pub fn trace_header(&self) -> &str {
        &self.trace_header
    }

    /// Field added to every entry; it wins over an entry field of the same key.
    pub fn with_field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn set_trace_id(&self, trace_id: impl Into<String>) {
        *self.lock_trace() = Some(trace_id.into());
    }

    pub fn clear_trace_id(&self) {
        *self.lock_trace() = None;
    }

    /// The current trace id, generating one on first use.
    pub fn current_trace_id(&self) -> String {
        self.lock_trace()
            .get_or_insert_with(|| self.trace_ids.generate(Utc::now()))
            .clone()
    }

    /// Adopts the trace id of an incoming request. Without the header a new
    /// id is generated on next use.
    pub fn parse_trace(&self, headers: &HeaderMap) {
        let incoming = headers
            .get(self.trace_header.as_str())
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        *self.lock_trace() = incoming;
    }

    /// Writes the current trace id into `headers`, for an outgoing request
    /// or a response, and returns it.
    pub fn inject_trace(&self, headers: &mut HeaderMap) -> Result<String> {
        let trace_id = self.current_trace_id();
        let name = HeaderName::from_bytes(self.trace_header.as_bytes())
            .map_err(|e| Error::Format(format!("invalid trace header name: {e}")))?;
        let value = HeaderValue::from_str(&trace_id)
            .map_err(|e| Error::Format(format!("trace id is not a valid header value: {e}")))?;
        headers.insert(name, value);
        Ok(trace_id)
    }

    fn lock_trace(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.trace_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timestamp(&self, time: &DateTime<Utc>) -> String {
        if !self.full_timestamp {
            return self.started.elapsed().as_secs().to_string();
        }
        if self.use_local_time {
            time.with_timezone(&Local)
                .format(&self.timestamp_format)
                .to_string()
        } else {
            time.format(&self.timestamp_format).to_string()
        }
    }
}

impl RecordFormatter for LineFormatter {
    fn format(&self, entry: &Entry) -> Result<Vec<u8>> {
        let mut tag = entry.tag.clone();
        let mut fields: Vec<(String, String)> = Vec::with_capacity(entry.fields.len());
        for (key, value) in entry.fields.iter().chain(self.fields.iter()) {
            if key == TAG_FIELD {
                tag = tag.or_else(|| Some(value.clone()));
                continue;
            }
            let key = if FIELD_CLASH_KEYS.contains(&key.as_str()) {
                format!("fields.{key}")
            } else {
                key.clone()
            };
            match fields.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) => *existing = value.clone(),
                None => fields.push((key, value.clone())),
            }
        }
        if let Some(began) = entry.began {
            let elapsed = (entry.time - began).num_nanoseconds().unwrap_or_default();
            let millis = elapsed as f64 / 1_000_000.0;
            match fields.iter_mut().find(|(k, _)| k == PROC_TIME_FIELD) {
                Some((_, existing)) => *existing = millis.to_string(),
                None => fields.push((PROC_TIME_FIELD.to_string(), millis.to_string())),
            }
        }
        if !self.disable_sorting {
            fields.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let mut line = String::with_capacity(128 + entry.message.len());
        // Writing into a String can't fail.
        let _ = write!(
            line,
            "[{}][{}][{}] {}||_msg={}||logid={}||traceid={}",
            entry.level,
            self.timestamp(&entry.time),
            entry.caller.as_deref().unwrap_or("???:1"),
            tag.as_deref().unwrap_or(UNDEFINED_TAG),
            entry.message.trim_matches(VALUE_TRIM_CHARS),
            entry.log_id.unwrap_or(self.worker_id),
            self.current_trace_id(),
        );
        for (key, value) in &fields {
            let _ = write!(line, "||{key}={}", value.trim_matches(VALUE_TRIM_CHARS));
        }
        line.push('\n');
        Ok(line.into_bytes())
    }

    fn trace_id(&self) -> Option<String> {
        Some(self.current_trace_id())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn formatter() -> LineFormatter {
        LineFormatter::new(7)
            .with_utc()
            .with_trace_ids(TraceIdGenerator::new(Ipv4Addr::new(10, 0, 0, 1)))
    }

    fn render(formatter: &LineFormatter, entry: &Entry) -> String {
        String::from_utf8(formatter.format(entry).unwrap()).unwrap()
    }

    fn entry() -> Entry {
        Entry::new(Level::Info, "  request served \n")
            .at(Utc.with_ymd_and_hms(2024, 3, 1, 7, 5, 9).unwrap())
    }

    #[test]
    fn test_line_layout() {
        let formatter = formatter();
        formatter.set_trace_id("abc123");
        let entry = Entry {
            caller: Some("src/server.rs:42".to_string()),
            ..entry()
        }
        .with_field("status", 200)
        .with_field("path", " /health\t");

        assert_eq!(
            render(&formatter, &entry),
            "[INFO][2024-03-01 07:05:09.000+0000][src/server.rs:42] _undef||_msg=request served\
             ||logid=7||traceid=abc123||path=/health||status=200\n"
        );
    }

    #[test]
    fn test_tag_and_field_clashes() {
        let formatter = formatter().with_field("service", "checkout");
        formatter.set_trace_id("t");
        let entry = entry()
            .with_field("tag", "_com_request_in")
            .with_field("msg", "shadowed")
            .with_field("level", "x");

        let line = render(&formatter, &entry);
        assert!(line.contains("] _com_request_in||_msg=request served||"));
        assert!(line.ends_with("||fields.level=x||fields.msg=shadowed||service=checkout\n"));
        assert!(!line.contains("||tag="));
    }

    #[test]
    fn test_unsorted_keeps_insertion_order() {
        let formatter = formatter().with_sorting(false);
        formatter.set_trace_id("t");
        let entry = entry().with_field("zeta", 1).with_field("alpha", 2);
        assert!(render(&formatter, &entry).ends_with("||zeta=1||alpha=2\n"));
    }

    #[test]
    fn test_caller_points_at_constructor_site() {
        let entry = Entry::new(Level::Warn, "here");
        let caller = entry.caller.unwrap();
        assert!(caller.starts_with("src/format.rs:"), "{caller}");
    }

    #[test]
    fn test_trace_id_is_stable_until_cleared() {
        let formatter = formatter();
        let first = formatter.trace_id().unwrap();
        assert_eq!(formatter.trace_id().unwrap(), first);
        assert!(first.starts_with("0a000001"));
        assert!(first.ends_with("b0"));

        formatter.clear_trace_id();
        formatter.set_trace_id("from-header");
        assert_eq!(formatter.trace_id().as_deref(), Some("from-header"));
    }

    #[test]
    fn test_trace_id_layout() {
        let generator = TraceIdGenerator::new(Ipv4Addr::new(192, 168, 1, 20));
        let now = Utc.timestamp_opt(1_700_000_000, 0x1234).unwrap();
        let id = generator.generate(now);

        let pid = format!("{:04x}", std::process::id() & 0xffff);
        assert!(id.starts_with("c0a80114"));
        assert_eq!(&id[8..16], "6553f100");
        assert_eq!(&id[20..24], pid);
        assert_eq!(id.len(), 8 + 8 + 4 + 4 + 6 + 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_level_order_and_names() {
        assert!(Level::Error > Level::Warn);
        assert!(Level::Debug < Level::Info);
        assert_eq!(Level::Warn.to_string(), "WARNING");
        let level: Level = serde_json::from_str("\"debug\"").unwrap();
        assert_eq!(level, Level::Debug);
    }

    #[test]
    fn test_proc_time_is_elapsed_milliseconds() {
        let formatter = formatter();
        formatter.set_trace_id("t");
        let entry = entry()
            .began_at(Utc.with_ymd_and_hms(2024, 3, 1, 7, 5, 8).unwrap())
            .with_field("zone", "eu");
        assert!(render(&formatter, &entry).ends_with("||proc_time=1000||zone=eu\n"));

        let entry = Entry {
            time: entry.time + chrono::Duration::microseconds(2_500),
            ..entry
        };
        assert!(render(&formatter, &entry).contains("||proc_time=1002.5||"));
    }

    #[test]
    fn test_entry_log_id_overrides_worker_id() {
        let formatter = formatter();
        formatter.set_trace_id("t");
        assert!(render(&formatter, &entry()).contains("||logid=7||"));
        assert!(render(&formatter, &entry().with_log_id(99)).contains("||logid=99||"));
    }

    #[test]
    fn test_trace_header_round_trip() {
        let formatter = formatter().with_trace_header("x-request-id");
        let mut incoming = HeaderMap::new();
        incoming.insert("x-request-id", HeaderValue::from_static("upstream-42"));

        formatter.parse_trace(&incoming);
        assert_eq!(formatter.current_trace_id(), "upstream-42");

        let mut outgoing = HeaderMap::new();
        assert_eq!(formatter.inject_trace(&mut outgoing).unwrap(), "upstream-42");
        assert_eq!(outgoing.get("x-request-id").unwrap(), "upstream-42");

        formatter.parse_trace(&HeaderMap::new());
        let generated = formatter.current_trace_id();
        assert!(generated.starts_with("0a000001"));
    }

    #[test]
    fn test_trace_header_defaults_and_rejects_bad_values() {
        let formatter = formatter().with_trace_header("");
        assert_eq!(formatter.trace_header(), DEFAULT_TRACE_HEADER);

        formatter.set_trace_id("line\nbreak");
        let mut headers = HeaderMap::new();
        assert!(matches!(
            formatter.inject_trace(&mut headers),
            Err(Error::Format(_))
        ));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_trace_id_seconds_wrap_to_32_bits() {
        let generator = TraceIdGenerator::new(Ipv4Addr::new(10, 0, 0, 1));
        let now = Utc.timestamp_opt(0x1_0000_0010, 0).unwrap();
        assert_eq!(&generator.generate(now)[8..10], "10");
    }
}
