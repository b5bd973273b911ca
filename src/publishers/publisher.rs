use futures_util::future::BoxFuture;
use lapin::message::BasicReturnMessage;
use lapin::options::BasicPublishOptions;
use lapin::publisher_confirm::Confirmation;
use lapin::{BasicProperties, Channel};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;
use uuid::Uuid;

/// Publishes go through the default exchange: the routing key is the queue name.
const DEFAULT_EXCHANGE: &str = "";

/// How long we wait for a publish (and its confirmation) before giving up.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

/// A message ready to be sent to a queue.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutgoingMessage {
    /// The encoded message body.
    pub payload: Vec<u8>,
    /// AMQP properties and headers attached to the message.
    pub properties: BasicProperties,
}

impl OutgoingMessage {
    /// A text message, encoded as UTF-8, with no properties set.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            payload: body.into().into_bytes(),
            properties: BasicProperties::default(),
        }
    }

    #[must_use]
    pub fn with_properties(mut self, properties: BasicProperties) -> Self {
        self.properties = properties;
        self
    }
}

impl From<&str> for OutgoingMessage {
    fn from(body: &str) -> Self {
        Self::text(body)
    }
}

impl From<String> for OutgoingMessage {
    fn from(body: String) -> Self {
        Self::text(body)
    }
}

/// Error returned when trying to publish a message.
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("Generic error encountered when interacting with the RabbitMq broker")]
    Broker(#[source] anyhow::Error),
    #[error("The timeout threshold was reached while trying to publish the message")]
    Timeout,
    #[error("The RabbitMq broker nacked the publishing of the message: {0:?}")]
    NegativeAck(Option<Box<BasicReturnMessage>>),
}

/// The primitive the retry policy uses to push a failed message back to its queue.
///
/// `republish` hands back a future instead of being an `async fn`: the retry policy spawns it
/// and moves on without waiting for the broker.
pub trait Republish: Send + Sync + 'static {
    fn republish(
        &self,
        queue_name: &str,
        message: OutgoingMessage,
    ) -> BoxFuture<'static, Result<(), PublishError>>;
}

/// Publishes messages to queues over an open channel, through the default exchange.
#[derive(Clone)]
pub struct ChannelPublisher {
    channel: Channel,
    timeout: Duration,
}

impl ChannelPublisher {
    pub fn new(channel: Channel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    /// Publish a new message to `queue_name`.
    ///
    /// A message id and a timestamp are injected in the message properties when missing.
    pub async fn publish(
        &self,
        queue_name: &str,
        message: OutgoingMessage,
    ) -> Result<(), PublishError> {
        let message = inject_amqp_properties(message);
        publish(&self.channel, self.timeout, queue_name, message).await
    }
}

impl Republish for ChannelPublisher {
    /// Push a message back as-is: its properties (message id included) are left untouched
    /// so the retry key of the copy matches the original.
    fn republish(
        &self,
        queue_name: &str,
        message: OutgoingMessage,
    ) -> BoxFuture<'static, Result<(), PublishError>> {
        let channel = self.channel.clone();
        let timeout = self.timeout;
        let queue_name = queue_name.to_owned();
        Box::pin(async move { publish(&channel, timeout, &queue_name, message).await })
    }
}

/// Publish a payload to a queue via the default exchange, waiting for the publisher
/// confirmation if the channel has confirmations enabled.
#[tracing::instrument(level = "debug", skip(channel, message))]
async fn publish(
    channel: &Channel,
    timeout: Duration,
    queue_name: &str,
    message: OutgoingMessage,
) -> Result<(), PublishError> {
    let OutgoingMessage {
        payload,
        properties,
    } = message;
    let publish_future = async {
        // Delivery mode: Non-persistent (1) or persistent (2).
        let properties = properties.with_delivery_mode(2);

        channel
            .basic_publish(
                DEFAULT_EXCHANGE,
                queue_name,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| PublishError::Broker(e.into()))?
            .await
            .map_err(|e| PublishError::Broker(e.into()))
    };

    let confirm = match tokio::time::timeout(timeout, publish_future).await {
        Ok(confirm) => confirm?,
        Err(_) => return Err(PublishError::Timeout),
    };

    match confirm {
        Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
        Confirmation::Nack(nack) => Err(PublishError::NegativeAck(nack)),
    }
}

fn inject_amqp_properties(mut message: OutgoingMessage) -> OutgoingMessage {
    let current_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|ct| ct.as_secs());

    let props = message.properties;
    let props = if let Some(ct) = current_timestamp {
        let ts = *props.timestamp();
        props.with_timestamp(ts.unwrap_or(ct))
    } else {
        warn!("System time is before 1970");
        props
    };

    let message_id = props.message_id().clone();
    message.properties =
        props.with_message_id(message_id.unwrap_or_else(|| Uuid::new_v4().to_string().into()));

    message
}
