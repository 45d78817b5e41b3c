//! Result records and the pluggable log sink.
//!
//! Every worker result produces at most one [`ResultLine`] with a
//! `DONE`/`FAIL`/`WARN` outcome, the stage, elapsed seconds, the worker
//! pid, and an optional annotation (`using cache`, `using prebuilt`,
//! `from <mirror>`). The [`Reporter`] trait is the seam the embedding
//! CLI renders through; the default forwards to `tracing`.

use crate::job::JobType;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome tag of one log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The stage succeeded.
    Done,
    /// The stage failed.
    Fail,
    /// Noteworthy but not fatal.
    Warn,
}

impl Outcome {
    /// Tag as it appears in log records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Done => "DONE",
            Self::Fail => "FAIL",
            Self::Warn => "WARN",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record describing a completed worker job.
#[derive(Debug, Clone)]
pub struct ResultLine {
    /// Outcome tag.
    pub outcome: Outcome,
    /// The stage that ran.
    pub job_type: JobType,
    /// Wall-clock seconds the stage took.
    pub elapsed: f64,
    /// Worker process id.
    pub pid: u32,
    /// What the job was about (distvname or package).
    pub message: String,
    /// Optional annotation such as `using cache`.
    pub annotation: Option<String>,
}

impl fmt::Display for ResultLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({:.3} sec, pid {})",
            self.outcome, self.job_type, self.message, self.elapsed, self.pid
        )?;
        if let Some(annotation) = &self.annotation {
            write!(f, " ({annotation})")?;
        }
        Ok(())
    }
}

/// Pluggable log sink.
pub trait Reporter: Send {
    /// Record one completed job.
    fn result(&self, line: &ResultLine);

    /// Log a contextual message.
    fn log(&self, context: &str, message: &str);

    /// Log a contextual failure message.
    fn log_fail(&self, context: &str, message: &str);

    /// Progress update after an install: `installed` of `total` done.
    fn progress(&self, installed: usize, total: usize) {
        let _ = (installed, total);
    }
}

impl<R: Reporter + Sync> Reporter for Arc<R> {
    fn result(&self, line: &ResultLine) {
        (**self).result(line);
    }

    fn log(&self, context: &str, message: &str) {
        (**self).log(context, message);
    }

    fn log_fail(&self, context: &str, message: &str) {
        (**self).log_fail(context, message);
    }

    fn progress(&self, installed: usize, total: usize) {
        (**self).progress(installed, total);
    }
}

/// Default sink: structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn result(&self, line: &ResultLine) {
        match line.outcome {
            Outcome::Done => info!(
                job = line.job_type.as_str(),
                elapsed = line.elapsed,
                pid = line.pid,
                "{line}"
            ),
            Outcome::Fail | Outcome::Warn => warn!(
                job = line.job_type.as_str(),
                elapsed = line.elapsed,
                pid = line.pid,
                "{line}"
            ),
        }
    }

    fn log(&self, context: &str, message: &str) {
        info!(context, "{message}");
    }

    fn log_fail(&self, context: &str, message: &str) {
        warn!(context, "{message}");
    }

    fn progress(&self, installed: usize, total: usize) {
        info!("{installed}/{total} installed");
    }
}

/// Sink collecting formatted records, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    records: Mutex<Vec<String>>,
}

impl MemoryReporter {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn records(&self) -> Vec<String> {
        self.records.lock().clone()
    }

    /// Does any record contain the needle?
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.records.lock().iter().any(|r| r.contains(needle))
    }

    fn push(&self, record: String) {
        self.records.lock().push(record);
    }
}

impl Reporter for MemoryReporter {
    fn result(&self, line: &ResultLine) {
        self.push(line.to_string());
    }

    fn log(&self, context: &str, message: &str) {
        self.push(format!("{context}: {message}"));
    }

    fn log_fail(&self, context: &str, message: &str) {
        self.push(format!("{context}: {message}"));
    }

    fn progress(&self, installed: usize, total: usize) {
        self.push(format!("{installed}/{total}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_line_formatting() {
        let line = ResultLine {
            outcome: Outcome::Done,
            job_type: JobType::Install,
            elapsed: 1.5,
            pid: 42,
            message: "HTTP-Tiny-0.088".into(),
            annotation: Some("using cache".into()),
        };
        assert_eq!(
            line.to_string(),
            "DONE install HTTP-Tiny-0.088 (1.500 sec, pid 42) (using cache)"
        );
    }

    #[test]
    fn memory_reporter_collects() {
        let reporter = MemoryReporter::new();
        reporter.log("A-1.0", "needs B");
        reporter.log_fail("B-1.0", "failed because of dependencies");
        assert!(reporter.contains("needs B"));
        assert!(reporter.contains("failed because of dependencies"));
        assert_eq!(reporter.records().len(), 2);
    }
}
