use crate::adapter::consumer::Dispatcher;
use crate::adapter::{AdapterError, AdapterOptions, AdapterState};
use crate::amqp::{ConnectionConfig, ConnectionFactory};
use crate::consumers::{DeliveryWatcher, Handler, RetryPolicy};
use crate::logger::{LoggerSink, TracingLogger};
use crate::publishers::{ChannelPublisher, OutgoingMessage};
use lapin::options::{
    BasicCancelOptions, BasicConsumeOptions, BasicQosOptions, ConfirmSelectOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection};
use futures_util::stream::{FuturesUnordered, Stream};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A queue bound to a handler, consumed by its own task.
struct Binding {
    queue_name: String,
    consumer_tag: String,
    task: JoinHandle<Result<(), anyhow::Error>>,
    /// The task outcome was already handed over by `consumer_stopped`.
    stopped: bool,
}

/// Owns a RabbitMq connection and channel, and dispatches the messages consumed from
/// the bound queues to their handlers.
///
/// The lifecycle is strictly ordered:
///
/// 1. [`connect`](QueueAdapter::connect);
/// 2. [`init_channel`](QueueAdapter::init_channel), optionally capping the number of
///    unacknowledged deliveries;
/// 3. one [`set_queue_handler`](QueueAdapter::set_queue_handler) per queue.
///
/// Messages can be published once the channel is open. [`close`](QueueAdapter::close)
/// terminates everything, from any state.
///
/// Every message is processed in its own task: a handler failure (or panic) is contained to
/// its delivery, which is rejected, and never stops the adapter.
pub struct QueueAdapter<C> {
    context: Arc<C>,
    logger: Arc<dyn LoggerSink>,
    options: AdapterOptions,
    state: AdapterState,
    connection: Option<Connection>,
    channel: Option<Channel>,
    publisher: Option<ChannelPublisher>,
    retry_policy: Option<RetryPolicy>,
    bindings: Vec<Binding>,
}

impl<C> QueueAdapter<C>
where
    C: Send + Sync + 'static,
{
    /// A new, unconnected adapter. `context` is shared with every handler.
    pub fn new(context: C) -> Self {
        Self {
            context: Arc::new(context),
            logger: Arc::new(TracingLogger),
            options: AdapterOptions::default(),
            state: AdapterState::Unconnected,
            connection: None,
            channel: None,
            publisher: None,
            retry_policy: None,
            bindings: Vec::new(),
        }
    }

    /// Send operator-facing notices to `logger` instead of `tracing`.
    #[must_use]
    pub fn with_logger(mut self, logger: impl LoggerSink + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: AdapterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    /// The retry policy shared by the retrying queues. Available once the channel is open.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    /// Connect to the broker described by `config`.
    ///
    /// There is no retry: an unreachable broker, rejected credentials or an elapsed
    /// connection timeout are returned as [`AdapterError::Connection`].
    pub async fn connect(&mut self, config: &ConnectionConfig) -> Result<(), AdapterError> {
        self.expect_state("connect", &[AdapterState::Unconnected])?;

        let factory =
            ConnectionFactory::new_from_config(config).map_err(AdapterError::Connection)?;
        let connection = factory
            .new_connection()
            .await
            .map_err(AdapterError::Connection)?;

        self.connection = Some(connection);
        self.state = AdapterState::Connected;
        Ok(())
    }

    /// Open the channel used to consume and publish.
    ///
    /// `max_concurrency` caps the number of deliveries the broker hands over without them
    /// being acknowledged (the channel prefetch). `None` leaves it unbounded.
    #[tracing::instrument(name = "rabbitmq_init_channel", skip(self))]
    pub async fn init_channel(&mut self, max_concurrency: Option<u16>) -> Result<(), AdapterError> {
        self.expect_state("init_channel", &[AdapterState::Connected])?;
        let connection = self
            .connection
            .as_ref()
            .ok_or(AdapterError::InvalidState {
                operation: "init_channel",
                state: self.state,
            })?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| AdapterError::Channel(e.into()))?;
        if self.options.publisher_confirms {
            channel
                .confirm_select(ConfirmSelectOptions { nowait: false })
                .await
                .map_err(|e| AdapterError::Channel(e.into()))?;
        }
        if let Some(prefetch_count) = max_concurrency {
            channel
                .basic_qos(prefetch_count, BasicQosOptions { global: false })
                .await
                .map_err(|e| AdapterError::Channel(e.into()))?;
        }

        let publisher = ChannelPublisher::new(channel.clone(), self.options.publish_timeout);
        self.retry_policy = Some(RetryPolicy::new(
            DeliveryWatcher::new(self.options.max_tries),
            Arc::clone(&self.options.retry_key),
            Arc::new(publisher.clone()),
            Arc::clone(&self.logger),
        ));
        self.publisher = Some(publisher);
        self.channel = Some(channel);
        self.state = AdapterState::ChannelOpen;
        Ok(())
    }

    /// Declare `queue_name` (if it does not exist yet) and start consuming it with `handler`.
    ///
    /// With `retrying_on_error`, a message whose processing failed is pushed back to the
    /// queue until it has failed `max_tries` times.
    ///
    /// Every delivery is processed in its own task. The channel prefetch set by
    /// [`init_channel`](QueueAdapter::init_channel) is the only limit: without a
    /// `max_concurrency`, there is no upper bound on the number of handlers running in
    /// parallel.
    #[tracing::instrument(name = "rabbitmq_bind_queue", skip(self, handler))]
    pub async fn set_queue_handler<H>(
        &mut self,
        queue_name: &str,
        handler: H,
        retrying_on_error: bool,
    ) -> Result<(), AdapterError>
    where
        H: Handler<C>,
    {
        self.expect_state(
            "set_queue_handler",
            &[AdapterState::ChannelOpen, AdapterState::Consuming],
        )?;
        if self.bindings.iter().any(|b| b.queue_name == queue_name) {
            return Err(AdapterError::DuplicateBinding(queue_name.to_owned()));
        }
        let (channel, retry_policy) = match (&self.channel, &self.retry_policy) {
            (Some(channel), Some(retry_policy)) => (channel, retry_policy),
            _ => {
                return Err(AdapterError::InvalidState {
                    operation: "set_queue_handler",
                    state: self.state,
                })
            }
        };

        declare_queue(channel, queue_name).await?;

        let handler: Arc<dyn Handler<C>> = Arc::new(handler);
        let handler = if retrying_on_error {
            retry_policy.wrap(queue_name, handler)
        } else {
            handler
        };

        let consumer_tag = uuid::Uuid::new_v4().to_string();
        let consumer = channel
            .basic_consume(
                queue_name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| AdapterError::Consume {
                queue_name: queue_name.to_owned(),
                error: e.into(),
            })?;

        self.spawn_consumer(queue_name, consumer_tag, handler, consumer);
        self.logger
            .success("[*] Waiting for messages. To exit press CTRL+C");
        Ok(())
    }

    /// Dispatch the deliveries of `consumer` to `handler` in a background task.
    pub(crate) fn spawn_consumer<S, E>(
        &mut self,
        queue_name: &str,
        consumer_tag: String,
        handler: Arc<dyn Handler<C>>,
        consumer: S,
    ) where
        S: Stream<Item = Result<lapin::message::Delivery, E>> + Unpin + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let dispatcher = Dispatcher {
            context: Arc::clone(&self.context),
            handler,
            logger: Arc::clone(&self.logger),
            queue_name: queue_name.to_owned(),
            on_failure: self.options.failure_action(),
        };
        self.bindings.push(Binding {
            queue_name: queue_name.to_owned(),
            consumer_tag,
            task: tokio::spawn(dispatcher.run(consumer)),
            stopped: false,
        });
        self.state = AdapterState::Consuming;
    }

    /// Resolves as soon as one of the bound consumers stops, with the reason why.
    ///
    /// A consumer only stops on its own when the broker cancels it or when the channel (or the
    /// connection) is lost: the adapter does not consume that queue anymore and should be
    /// closed. Never resolves if no consumer is running.
    pub async fn consumer_stopped(&mut self) -> AdapterError {
        let mut running: FuturesUnordered<_> = self
            .bindings
            .iter_mut()
            .filter(|binding| !binding.stopped)
            .map(|binding| async move {
                let outcome = (&mut binding.task).await;
                binding.stopped = true;
                (binding.queue_name.clone(), outcome)
            })
            .collect();

        let Some((queue_name, outcome)) = running.next().await else {
            return std::future::pending().await;
        };
        let error = match outcome {
            Ok(Ok(())) => anyhow::anyhow!("The consumer was cancelled by the broker"),
            Ok(Err(e)) => e,
            Err(e) => e.into(),
        };
        AdapterError::ConsumerStopped { queue_name, error }
    }

    /// Declare `queue_name` if it does not exist yet, e.g. to publish to it before its
    /// handler is bound.
    pub async fn declare_queue(&self, queue_name: &str) -> Result<(), AdapterError> {
        self.expect_state(
            "declare_queue",
            &[AdapterState::ChannelOpen, AdapterState::Consuming],
        )?;
        let channel = self.channel.as_ref().ok_or(AdapterError::InvalidState {
            operation: "declare_queue",
            state: self.state,
        })?;
        declare_queue(channel, queue_name).await
    }

    /// Publish `message` to `queue_name` through the default exchange.
    ///
    /// A message id and a timestamp are added to the properties when missing. The call
    /// returns once the broker confirmed the message (if publisher confirms are enabled), or
    /// fails after the publish timeout.
    pub async fn publish_message(
        &self,
        queue_name: &str,
        message: impl Into<OutgoingMessage>,
    ) -> Result<(), AdapterError> {
        self.expect_state(
            "publish_message",
            &[AdapterState::ChannelOpen, AdapterState::Consuming],
        )?;
        let publisher = self.publisher.as_ref().ok_or(AdapterError::InvalidState {
            operation: "publish_message",
            state: self.state,
        })?;
        publisher
            .publish(queue_name, message.into())
            .await
            .map_err(|error| AdapterError::Publish {
                queue_name: queue_name.to_owned(),
                error,
            })
    }

    /// Cancel the consumers, stop their tasks (aborting the messages being processed) and
    /// close the connection.
    ///
    /// The adapter is closed once this returns, even if the broker could not be told.
    #[tracing::instrument(name = "rabbitmq_close", skip(self))]
    pub async fn close(&mut self) -> Result<(), AdapterError> {
        if self.state == AdapterState::Closed {
            return Err(AdapterError::InvalidState {
                operation: "close",
                state: self.state,
            });
        }
        self.state = AdapterState::Closed;

        if let Some(channel) = self.channel.take() {
            for binding in &self.bindings {
                if let Err(e) = channel
                    .basic_cancel(&binding.consumer_tag, BasicCancelOptions::default())
                    .await
                {
                    tracing::warn!(
                        queue_name = %binding.queue_name,
                        "Failed to cancel the consumer: {:?}",
                        e
                    );
                }
            }
        }
        for binding in self.bindings.drain(..) {
            binding.task.abort();
        }
        self.publisher = None;
        self.retry_policy = None;

        match self.connection.take() {
            Some(connection) => connection
                .close(200, "OK")
                .await
                .map_err(|e| AdapterError::Close(e.into())),
            None => Ok(()),
        }
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[AdapterState],
    ) -> Result<(), AdapterError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(AdapterError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

async fn declare_queue(channel: &Channel, queue_name: &str) -> Result<(), AdapterError> {
    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| AdapterError::Declare {
            queue_name: queue_name.to_owned(),
            error: e.into(),
        })?;
    Ok(())
}

impl<C> Drop for QueueAdapter<C> {
    fn drop(&mut self) {
        for binding in &self.bindings {
            binding.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::QueueAdapter;
    use crate::adapter::{AdapterError, AdapterState};
    use crate::consumers::{ClosureHandler, Handler, HandlerError, Incoming};
    use crate::logger::EmptyLogger;
    use fake::{Fake, Faker};
    use futures_util::stream;
    use std::sync::Arc;
    use std::time::Duration;

    fn adapter() -> QueueAdapter<()> {
        QueueAdapter::new(()).with_logger(EmptyLogger)
    }

    fn noop_handler() -> impl Handler<()> {
        ClosureHandler(|_: Incoming<()>| async { Ok::<(), HandlerError>(()) })
    }

    fn assert_invalid_state(
        outcome: Result<(), AdapterError>,
        expected_operation: &str,
        expected_state: AdapterState,
    ) {
        match outcome {
            Err(AdapterError::InvalidState { operation, state }) => {
                assert_eq!(operation, expected_operation);
                assert_eq!(state, expected_state);
            }
            other => panic!("Expected an invalid state error, got {other:?}"),
        }
    }

    #[test]
    fn a_new_adapter_is_unconnected() {
        let adapter = QueueAdapter::new(42u32);

        assert_eq!(adapter.state(), AdapterState::Unconnected);
        assert_eq!(**adapter.context(), 42);
        assert!(adapter.retry_policy().is_none());
    }

    #[tokio::test]
    async fn the_channel_cannot_be_opened_before_connecting() {
        let mut adapter = adapter();

        let outcome = adapter.init_channel(Some(1)).await;

        assert_invalid_state(outcome, "init_channel", AdapterState::Unconnected);
    }

    #[tokio::test]
    async fn handlers_cannot_be_bound_before_the_channel_is_open() {
        let mut adapter = adapter();
        let queue_name: String = Faker.fake();

        let outcome = adapter
            .set_queue_handler(&queue_name, noop_handler(), true)
            .await;

        assert_invalid_state(outcome, "set_queue_handler", AdapterState::Unconnected);
    }

    #[tokio::test]
    async fn messages_cannot_be_published_before_the_channel_is_open() {
        let adapter = adapter();

        let outcome = adapter.publish_message("orders", "hello").await;

        assert_invalid_state(outcome, "publish_message", AdapterState::Unconnected);
    }

    #[tokio::test]
    async fn closing_twice_is_a_misuse() {
        let mut adapter = adapter();

        adapter.close().await.unwrap();
        assert_eq!(adapter.state(), AdapterState::Closed);

        let outcome = adapter.close().await;
        assert_invalid_state(outcome, "close", AdapterState::Closed);
    }

    #[tokio::test]
    async fn a_closed_adapter_cannot_reconnect() {
        let mut adapter = adapter();
        adapter.close().await.unwrap();

        let outcome = adapter
            .connect(&crate::amqp::ConnectionConfig::default())
            .await;

        assert_invalid_state(outcome, "connect", AdapterState::Closed);
    }

    #[tokio::test]
    async fn a_consumer_losing_its_channel_is_reported() {
        // Arrange
        let mut adapter = adapter();
        adapter.spawn_consumer(
            "healthy",
            "tag-1".into(),
            Arc::new(noop_handler()),
            stream::pending::<Result<lapin::message::Delivery, std::io::Error>>(),
        );
        adapter.spawn_consumer(
            "orders",
            "tag-2".into(),
            Arc::new(noop_handler()),
            stream::iter(vec![Err::<lapin::message::Delivery, _>(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "channel closed",
            ))]),
        );
        assert_eq!(adapter.state(), AdapterState::Consuming);

        // Act
        let error = tokio::time::timeout(Duration::from_secs(5), adapter.consumer_stopped())
            .await
            .unwrap();

        // Assert
        match error {
            AdapterError::ConsumerStopped { queue_name, error } => {
                assert_eq!(queue_name, "orders");
                assert!(error.to_string().contains("channel closed"));
            }
            other => panic!("Unexpected error: {other:?}"),
        }
        // the healthy consumer is still running
        let still_waiting =
            tokio::time::timeout(Duration::from_millis(50), adapter.consumer_stopped()).await;
        assert!(still_waiting.is_err());
        adapter.close().await.unwrap();
    }
}
