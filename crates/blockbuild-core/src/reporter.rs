//! Reporter trait for dependency injection
//!
//! Build stages report progress and diagnostics through this trait so the
//! core stays decoupled from whatever surface (terminal, build-server log)
//! presents them. The accumulated lines are the user-visible record of a
//! build, shown alongside the terminal failure message when a stage aborts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

pub trait Reporter: Send + Sync {
    /// A stage has started executing.
    fn task_start(&self, name: &str);

    /// A stage finished successfully.
    fn task_done(&self, name: &str, elapsed: Duration);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning. Warnings never fail the build.
    fn warn(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for Arc<T> {
    fn task_start(&self, name: &str) {
        (**self).task_start(name);
    }
    fn task_done(&self, name: &str, elapsed: Duration) {
        (**self).task_done(name, elapsed);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warn(&self, msg: &str) {
        (**self).warn(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
}

/// A no-op reporter for silent operations (e.g. probing, testing).
#[derive(Clone, Copy, Debug)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn task_start(&self, _: &str) {}
    fn task_done(&self, _: &str, _: Duration) {}
    fn info(&self, _: &str) {}
    fn warn(&self, _: &str) {}
    fn error(&self, _: &str) {}
}

/// Severity of a recorded reporter line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A reporter that accumulates every line in memory.
///
/// The build server hands the collected lines back to the caller together
/// with the terminal result; tests assert on them.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    lines: Mutex<Vec<(Severity, String)>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded lines, in order.
    pub fn lines(&self) -> Vec<(Severity, String)> {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Recorded messages of one severity.
    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, m)| m)
            .collect()
    }

    fn push(&self, severity: Severity, msg: &str) {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((severity, msg.to_string()));
    }
}

impl Reporter for MemoryReporter {
    fn task_start(&self, name: &str) {
        self.push(Severity::Info, &format!("=== {name} ==="));
    }
    fn task_done(&self, name: &str, elapsed: Duration) {
        self.push(
            Severity::Info,
            &format!("=== {name} done in {}ms ===", elapsed.as_millis()),
        );
    }
    fn info(&self, msg: &str) {
        self.push(Severity::Info, msg);
    }
    fn warn(&self, msg: &str) {
        self.push(Severity::Warning, msg);
    }
    fn error(&self, msg: &str) {
        self.push(Severity::Error, msg);
    }
}
