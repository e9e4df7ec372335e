//! Uncaught exception reports, buffered per evaluation label.
//!
//! The engine reports an uncaught exception once, at the top of an evaluation.
//! The report is parked under the label of that evaluation until the context
//! claims it right after the failing engine call returns.

use crate::error::ErrorReport;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::trace;

/// Label used by `exec`.
pub const EXEC_LABEL: &str = "exec";
/// Label used by `eval`.
pub const EVAL_LABEL: &str = "eval";
/// Label used by `exec_from`.
pub const READER_LABEL: &str = "reader";
/// Catch-all label for reports raised outside a labeled evaluation.
pub const FATAL_LABEL: &str = "__fatal__";

/// Splits a stack frame into its file and line, with or without a function name.
static FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*at (?:.*? \()?(.+?):(\d+)(?::\d+)?\)?\s*$").expect("valid regex")
});

/// Per-context buffer of unclaimed reports, at most one per label.
#[derive(Debug, Default)]
pub(crate) struct ErrorBuffer {
    reports: HashMap<String, ErrorReport>,
}

impl ErrorBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Park a report under its filename. A newer report replaces an unclaimed one.
    pub(crate) fn record(&mut self, report: ErrorReport) {
        if let Some(previous) = self.reports.insert(report.filename.clone(), report) {
            trace!(label = %previous.filename, message = %previous.message, "overwriting unclaimed error report");
        }
    }

    /// Take the report for `label`, falling back to the fatal slot.
    pub(crate) fn claim(&mut self, label: &str) -> Option<ErrorReport> {
        self.reports
            .remove(label)
            .or_else(|| self.reports.remove(FATAL_LABEL))
    }

    pub(crate) fn len(&self) -> usize {
        self.reports.len()
    }
}

/// Line of the innermost frame that is not in `skip_file`.
///
/// Native frames carry no location and are passed over as well.
pub(crate) fn line_from_stack(stack: &str, skip_file: &str) -> Option<u32> {
    stack
        .lines()
        .filter_map(|frame| FRAME.captures(frame))
        .find(|caps| &caps[1] != skip_file)
        .and_then(|caps| caps[2].parse().ok())
}
