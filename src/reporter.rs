use parking_lot::Mutex;
use std::fmt::Debug;
use strum_macros::Display;
use tracing::{error, warn};

/// Leveled sink through which the engine reports conditions it does not treat as errors,
/// such as clipped runtime or unmet heat, and fatal conditions just before surfacing them.
///
/// Passed by reference into every core operation; the engine never decides how messages are
/// formatted or where they go.
pub trait Reporter: Debug + Send + Sync {
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards reports to the `tracing` macros, for whichever subscriber the caller has installed
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn warning(&self, message: &str) {
        warn!("{message}");
    }

    fn error(&self, message: &str) {
        error!("{message}");
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Keeps every report in memory, e.g. so that tests can check what was reported
#[derive(Debug, Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl RecordingReporter {
    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.lock().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|(message_severity, _)| *message_severity == severity)
            .count()
    }
}

impl Reporter for RecordingReporter {
    fn warning(&self, message: &str) {
        self.messages
            .lock()
            .push((Severity::Warning, message.to_string()));
    }

    fn error(&self, message: &str) {
        self.messages
            .lock()
            .push((Severity::Error, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    fn should_record_messages_in_order() {
        let reporter = RecordingReporter::default();
        reporter.warning("runtime clipped");
        reporter.error("no convergence");
        reporter.warning("unmet heat");

        assert_eq!(reporter.count(Severity::Warning), 2);
        assert_eq!(reporter.count(Severity::Error), 1);
        assert_eq!(
            reporter.messages()[1],
            (Severity::Error, "no convergence".to_string())
        );
        assert_eq!(Severity::Warning.to_string(), "Warning");
    }
}
