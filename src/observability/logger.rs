//! Structured JSON logger
//!
//! Every record is a single JSON line: `event`, `severity`, then the caller's
//! fields in key order. Records below the process-wide minimum severity are
//! discarded before rendering.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};

use serde_json::{Map, Value};

static MIN_SEVERITY: AtomicU8 = AtomicU8::new(Severity::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Severity {
    /// Per-document detail
    Trace = 0,
    Info = 1,
    /// Conflicts, timeouts, reverted changes
    Warn = 2,
    Error = 3,
    Fatal = 4,
}

const ALL_SEVERITIES: [Severity; 5] = [
    Severity::Trace,
    Severity::Info,
    Severity::Warn,
    Severity::Error,
    Severity::Fatal,
];

impl Severity {
    /// Parses a configured level name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        ALL_SEVERITIES
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Logger;

impl Logger {
    pub fn set_min_severity(severity: Severity) {
        MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
    }

    pub fn min_severity() -> Severity {
        let raw = MIN_SEVERITY.load(Ordering::Relaxed) as usize;
        ALL_SEVERITIES[raw.min(ALL_SEVERITIES.len() - 1)]
    }

    pub fn enabled(severity: Severity) -> bool {
        severity >= Self::min_severity()
    }

    /// Writes a record to stdout.
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if Self::enabled(severity) {
            Self::emit(&mut io::stdout().lock(), severity, event, fields);
        }
    }

    /// Writes a record to stderr.
    pub fn log_stderr(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if Self::enabled(severity) {
            Self::emit(&mut io::stderr().lock(), severity, event, fields);
        }
    }

    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log_stderr(Severity::Error, event, fields);
    }

    pub fn fatal(event: &str, fields: &[(&str, &str)]) {
        Self::log_stderr(Severity::Fatal, event, fields);
    }

    fn emit<W: Write>(writer: &mut W, severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let mut line = render(severity, event, fields);
        line.push('\n');
        // A lost log line never fails the operation being logged.
        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }
}

/// Renders one record without the trailing newline. A field repeated in
/// `fields` keeps its last value; fields cannot shadow `event` or `severity`.
fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let sorted: BTreeMap<&str, &str> = fields
        .iter()
        .copied()
        .filter(|(name, _)| *name != "event" && *name != "severity")
        .collect();

    let mut record = Map::with_capacity(sorted.len() + 2);
    record.insert("event".into(), Value::from(event));
    record.insert("severity".into(), Value::from(severity.as_str()));
    for (name, value) in sorted {
        record.insert(name.into(), Value::from(value));
    }
    Value::Object(record).to_string()
}
