//! Scoped logging for structural collection operations
//!
//! A scope logs `{name}_BEGIN` when opened and exactly one of
//! `{name}_COMPLETE` or `{name}_FAILED` when closed, each carrying the
//! elapsed time. A scope dropped without being closed logs
//! `{name}_INCOMPLETE`.

use std::cell::Cell;
use std::time::Instant;

use super::logger::{Logger, Severity};

pub struct ObservationScope<'a> {
    name: &'a str,
    closed: Cell<bool>,
    fields: Vec<(&'a str, String)>,
    timer: Timer,
}

impl<'a> ObservationScope<'a> {
    pub fn new(name: &'a str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Opens a scope whose fields are repeated on every event it logs.
    pub fn with_fields(name: &'a str, fields: &[(&'a str, &str)]) -> Self {
        Logger::trace(&format!("{}_BEGIN", name), fields);

        Self {
            name,
            closed: Cell::new(false),
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            timer: Timer::new(),
        }
    }

    fn emit(&self, severity: Severity, suffix: &str, extra: &[(&str, &str)]) {
        let elapsed = self.timer.elapsed_ms();
        let mut all: Vec<(&str, &str)> = self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        all.extend(extra.iter().copied());
        all.push(("elapsed_ms", elapsed.as_str()));

        let event = format!("{}_{}", self.name, suffix);
        if severity >= Severity::Error {
            Logger::log_stderr(severity, &event, &all);
        } else {
            Logger::log(severity, &event, &all);
        }
    }

    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    pub fn complete_with_fields(self, extra_fields: &[(&str, &str)]) {
        self.closed.set(true);
        self.emit(Severity::Info, "COMPLETE", extra_fields);
    }

    /// Logs `{name}_FAILED` at ERROR level, or FATAL when `fatal` is set.
    pub fn fail(self, reason: &str, fatal: bool) {
        self.closed.set(true);
        let severity = if fatal { Severity::Fatal } else { Severity::Error };
        self.emit(severity, "FAILED", &[("reason", reason)]);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.closed.get() {
            self.emit(Severity::Warn, "INCOMPLETE", &[]);
        }
    }
}

/// Wall-clock stopwatch
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> String {
        self.start.elapsed().as_millis().to_string()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_starts_open() {
        let scope = ObservationScope::new("COLLECTION_LOAD");
        assert!(!scope.is_closed());
        scope.complete();
    }

    #[test]
    fn test_scope_with_fields_completes() {
        let scope = ObservationScope::with_fields("COLLECTION_RENAME", &[("collection", "users")]);
        scope.complete_with_fields(&[("new_name", "people")]);
    }

    #[test]
    fn test_scope_fail() {
        let scope = ObservationScope::new("COLLECTION_DROP");
        scope.fail("lock timeout", false);
    }

    #[test]
    fn test_scope_drop_without_close_does_not_panic() {
        let scope = ObservationScope::new("COLLECTION_UNLOAD");
        drop(scope);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let ms: u64 = timer.elapsed_ms().parse().unwrap();
        assert!(ms >= 10);
    }
}
