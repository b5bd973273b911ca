//! Operator-facing notifications.
//!
//! The adapter reports what happens to messages (received, pushed back, skipped) through a
//! [`LoggerSink`]. Sinks are fire-and-forget: nothing they do can affect message processing.

/// Receives human-readable status notifications from the queue adapter.
pub trait LoggerSink: Send + Sync + 'static {
    fn info(&self, message: &str);

    /// Something worked out, e.g. the consumer is ready.
    fn success(&self, message: &str);

    /// A recoverable failure, e.g. a message was pushed back to the broker.
    ///
    /// Defaults to [`LoggerSink::error`].
    fn warning(&self, message: &str) {
        self.error(message)
    }

    fn error(&self, message: &str);
}

/// Forwards notifications to `tracing`, tagging each record with an `outcome` field.
///
/// This is the sink used by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl LoggerSink for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!(outcome = "info", "{}", message);
    }

    fn success(&self, message: &str) {
        tracing::info!(outcome = "success", "{}", message);
    }

    fn warning(&self, message: &str) {
        tracing::warn!(outcome = "warning", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(outcome = "error", "{}", message);
    }
}

/// Drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyLogger;

impl LoggerSink for EmptyLogger {
    fn info(&self, _message: &str) {}

    fn success(&self, _message: &str) {}

    fn error(&self, _message: &str) {}
}
