use crate::consumers::{BrokerAction, ByMessageId, RetryKey, DEFAULT_MAX_TRIES};
use crate::publishers::DEFAULT_PUBLISH_TIMEOUT;
use std::sync::Arc;
use std::time::Duration;

/// Knobs of a [`QueueAdapter`](super::QueueAdapter).
///
/// The defaults fit most consumers: three attempts per message, failures counted by message id,
/// publisher confirmations on, failed deliveries rejected without broker-side requeueing.
#[derive(Clone)]
pub struct AdapterOptions {
    pub(crate) max_tries: u32,
    pub(crate) retry_key: Arc<dyn RetryKey>,
    pub(crate) publisher_confirms: bool,
    pub(crate) publish_timeout: Duration,
    pub(crate) requeue_failed: bool,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            retry_key: Arc::new(ByMessageId),
            publisher_confirms: true,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            requeue_failed: false,
        }
    }
}

impl AdapterOptions {
    /// How many times a message may fail on a retrying queue before it is dropped.
    #[must_use]
    pub fn max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// How failures of the same message are recognised across deliveries.
    /// Defaults to [`ByMessageId`].
    #[must_use]
    pub fn retry_key<K: RetryKey>(mut self, key: K) -> Self {
        self.retry_key = Arc::new(key);
        self
    }

    /// Wait for the broker to confirm every publish.
    #[must_use]
    pub fn publisher_confirms(mut self, enabled: bool) -> Self {
        self.publisher_confirms = enabled;
        self
    }

    /// Timeout applied when publishing a message, confirmation included.
    /// Defaults to 3 seconds.
    #[must_use]
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Ask the broker to requeue failed deliveries (nack) instead of rejecting them.
    ///
    /// Beware: on retrying queues the message is then retried by the broker *and* pushed back
    /// by the adapter.
    #[must_use]
    pub fn requeue_failed(mut self, requeue: bool) -> Self {
        self.requeue_failed = requeue;
        self
    }

    pub(crate) fn failure_action(&self) -> BrokerAction {
        if self.requeue_failed {
            BrokerAction::Nack
        } else {
            BrokerAction::Reject
        }
    }
}
