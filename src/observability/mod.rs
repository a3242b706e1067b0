//! Observability for the collection engine
//!
//! - Structured, single-line JSON logging with a process-wide minimum level
//! - Engine counters shared across collections
//! - A closed set of lifecycle and write events
//!
//! Observability is read-only: nothing here influences whether an
//! operation succeeds.
//!
//! ```ignore
//! use colldb::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::CollectionRenamed, &[("collection", "users"), ("new_name", "people")]);
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::{ObservationScope, Timer};

/// Logs an event at its own severity. ERROR and above go to stderr.
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let severity = event.severity();
    if severity >= Severity::Error {
        Logger::log_stderr(severity, event.as_str(), fields);
    } else {
        Logger::log(severity, event.as_str(), fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::ConfigLoaded);
        log_event(Event::CollectionLoadFailed);
    }

    #[test]
    fn test_log_event_with_fields() {
        log_event_with_fields(Event::CollectionCreated, &[("collection", "users"), ("id", "42")]);
    }
}
