//! Log sinks for handled requests.
//!
//! A [`Notifier`] receives the one-line summary of each handled request and
//! any failures. Handlers hold an optional notifier; with none set, logging is
//! a no-op.

use parking_lot::Mutex;
use std::error::Error;
use std::sync::Arc;
use tracing::{error, info};

/// Sink for informational and error log lines.
pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);

    fn error(&self, message: &str);

    fn error_with_cause(&self, message: &str, cause: &(dyn Error + 'static)) {
        let _ = cause;
        self.error(message);
    }
}

/// Forwards notifications to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn info(&self, message: &str) {
        info!(target: "zentinel_mock_dispatch::requests", "{}", message);
    }

    fn error(&self, message: &str) {
        error!(target: "zentinel_mock_dispatch::requests", "{}", message);
    }

    fn error_with_cause(&self, message: &str, cause: &(dyn Error + 'static)) {
        error!(
            target: "zentinel_mock_dispatch::requests",
            cause = %error_chain(cause),
            "{}",
            message
        );
    }
}

/// Records every line it receives. Useful for asserting on log output.
#[derive(Debug, Default)]
pub struct CapturingNotifier {
    info: Mutex<Vec<String>>,
    error: Mutex<Vec<String>>,
}

impl CapturingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn info_messages(&self) -> Vec<String> {
        self.info.lock().clone()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.error.lock().clone()
    }
}

impl Notifier for CapturingNotifier {
    fn info(&self, message: &str) {
        self.info.lock().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.error.lock().push(message.to_string());
    }

    fn error_with_cause(&self, message: &str, cause: &(dyn Error + 'static)) {
        self.error
            .lock()
            .push(format!("{}: {}", message, error_chain(cause)));
    }
}

/// Render an error and its sources as `outer: inner: root`.
pub(crate) fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RenderError, TransformError};

    #[test]
    fn test_capturing_notifier_separates_channels() {
        let notifier = CapturingNotifier::new();
        notifier.info("first");
        notifier.error("boom");
        notifier.info("second");

        assert_eq!(notifier.info_messages(), vec!["first", "second"]);
        assert_eq!(notifier.error_messages(), vec!["boom"]);
    }

    #[test]
    fn test_error_with_cause_includes_chain() {
        let notifier = CapturingNotifier::new();
        let err = RenderError::Transformer {
            name: "upper".to_string(),
            source: TransformError::Other("no body".to_string()),
        };
        notifier.error_with_cause("render failed", &err);

        assert_eq!(
            notifier.error_messages(),
            vec!["render failed: response transformer upper failed: no body"]
        );
    }
}
