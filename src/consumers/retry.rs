//! Application-level retries: a failed message is pushed back to its own queue until it has
//! failed `max_tries` times, then it is dropped.
use crate::amqp::convenience::BasicPropertiesExt;
use crate::consumers::acknowledgement::catching_panics;
use crate::consumers::{Delivery, DeliveryWatcher, Handler, HandlerError, Incoming};
use crate::logger::LoggerSink;
use crate::publishers::{OutgoingMessage, Republish};
use std::sync::{Arc, Mutex, PoisonError};

/// Decides which messages are "the same message" for the purpose of counting failures.
///
/// Implemented for closures with a matching signature, so a custom strategy is a one-liner:
///
/// ```rust
/// use warren::consumers::{Delivery, RetryKey};
///
/// fn assert_key<K: RetryKey>(_: K) {}
/// assert_key(|delivery: &Delivery, body: &str| format!("{}:{body}", delivery.routing_key.as_str()));
/// ```
pub trait RetryKey: Send + Sync + 'static {
    fn key(&self, delivery: &Delivery, body: &str) -> String;
}

impl<F> RetryKey for F
where
    F: Fn(&Delivery, &str) -> String + Send + Sync + 'static,
{
    fn key(&self, delivery: &Delivery, body: &str) -> String {
        (self)(delivery, body)
    }
}

/// The message body is the key.
///
/// Two different messages with the same content share their failure count.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByBody;

impl RetryKey for ByBody {
    fn key(&self, _delivery: &Delivery, body: &str) -> String {
        body.to_owned()
    }
}

/// The AMQP `message_id` property is the key, falling back to the body when it is missing.
///
/// Messages published through the adapter always carry a message id, and pushed back copies
/// keep the id of the original.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByMessageId;

impl RetryKey for ByMessageId {
    fn key(&self, delivery: &Delivery, body: &str) -> String {
        match delivery.properties.message_id() {
            Some(id) => id.as_str().to_owned(),
            None => body.to_owned(),
        }
    }
}

/// A string header is the key (e.g. a correlation id), falling back to the body when it is
/// missing or not a string.
#[derive(Debug, Clone)]
pub struct ByHeader(pub String);

impl RetryKey for ByHeader {
    fn key(&self, delivery: &Delivery, body: &str) -> String {
        delivery
            .properties
            .get_header_str(self.0.as_str())
            .map(|value| value.into_owned())
            .unwrap_or_else(|| body.to_owned())
    }
}

/// Turns a handler into one that pushes failed messages back to their queue.
///
/// One `RetryPolicy` (and therefore one [`DeliveryWatcher`]) is shared by all the queues
/// bound to an adapter.
#[derive(Clone)]
pub struct RetryPolicy {
    watcher: Arc<Mutex<DeliveryWatcher>>,
    key: Arc<dyn RetryKey>,
    republisher: Arc<dyn Republish>,
    logger: Arc<dyn LoggerSink>,
}

impl RetryPolicy {
    pub fn new(
        watcher: DeliveryWatcher,
        key: Arc<dyn RetryKey>,
        republisher: Arc<dyn Republish>,
        logger: Arc<dyn LoggerSink>,
    ) -> Self {
        Self {
            watcher: Arc::new(Mutex::new(watcher)),
            key,
            republisher,
            logger,
        }
    }

    /// Wrap `handler`: failed messages are pushed back to `queue_name`.
    ///
    /// The wrapped handler always returns the failure of the inner handler, whether the message
    /// was pushed back or dropped: the delivery that failed is rejected either way.
    pub fn wrap<Context>(
        &self,
        queue_name: impl Into<String>,
        handler: Arc<dyn Handler<Context>>,
    ) -> Arc<dyn Handler<Context>>
    where
        Context: Send + Sync + 'static,
    {
        Arc::new(RetryingHandler {
            inner: handler,
            queue_name: queue_name.into(),
            policy: self.clone(),
        })
    }

    /// Run `f` against the watcher. The guard never lives across an `.await`.
    fn with_watcher<T>(&self, f: impl FnOnce(&mut DeliveryWatcher) -> T) -> T {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut watcher)
    }

    /// How many failed attempts are currently recorded for `key`.
    pub fn attempts(&self, key: &str) -> u32 {
        self.with_watcher(|watcher| watcher.attempts(key))
    }

    fn on_failure<Context>(&self, queue_name: &str, key: &str, incoming: &Incoming<Context>) {
        let (exhausted, max_tries) = self.with_watcher(|watcher| {
            watcher.add(key);
            let exhausted = watcher.is_max(key);
            if exhausted {
                watcher.remove(key);
            }
            (exhausted, watcher.max_tries())
        });

        if exhausted {
            self.logger.error(&format!(
                "\"{}\" already retried {max_tries} times. Skipped.",
                incoming.body
            ));
            return;
        }

        self.logger.warning(&format!(
            "In \"{}\" error is occurred. Pushing back it to rabbit.",
            incoming.body
        ));
        let message = OutgoingMessage::text(incoming.body.as_str())
            .with_properties(incoming.delivery.properties.clone());
        let republish = self.republisher.republish(queue_name, message);
        let logger = Arc::clone(&self.logger);
        let body = incoming.body.clone();
        tokio::spawn(async move {
            if let Err(e) = republish.await {
                logger.error(&format!("Failed to push \"{body}\" back to rabbit: {e}"));
            }
        });
    }
}

struct RetryingHandler<Context> {
    inner: Arc<dyn Handler<Context>>,
    queue_name: String,
    policy: RetryPolicy,
}

#[async_trait::async_trait]
impl<Context> Handler<Context> for RetryingHandler<Context>
where
    Context: Send + Sync + 'static,
{
    async fn handle(&self, incoming: &Incoming<Context>) -> Result<(), HandlerError> {
        let key = self.policy.key.key(&incoming.delivery, &incoming.body);
        // a panic is a failure like any other: it is counted and pushed back
        match catching_panics(self.inner.handle(incoming)).await {
            Ok(()) => {
                self.policy.with_watcher(|watcher| watcher.remove(&key));
                Ok(())
            }
            Err(e) => {
                self.policy.on_failure(&self.queue_name, &key, incoming);
                Err(e)
            }
        }
    }
}
