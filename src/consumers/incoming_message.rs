use amq_protocol_types::{DeliveryTag, ShortString};
use lapin::BasicProperties;
use std::sync::Arc;

/// A dequeued message with its body decoded as text, ready for processing.
///
/// `Incoming` is the input type of message handlers (check out
/// [`Handler`](crate::consumers::Handler)'s docs for more details).
pub struct Incoming<C> {
    /// `context` is a set of resources that are required to process the message and are outside
    /// the lifecycle of the message itself - e.g. an HTTP client for a third-party API, a db connection
    /// pool, etc.
    ///
    /// The same context is shared by every message processed by an adapter.
    pub context: Arc<C>,
    /// The message payload, decoded as UTF-8.
    pub body: String,
    /// What we received from RabbitMq besides the payload: delivery tag, properties, etc.
    pub delivery: Arc<Delivery>,
    /// The name of the queue the message was consumed from.
    pub queue_name: String,
}

impl<C> Clone for Incoming<C> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            body: self.body.clone(),
            delivery: Arc::clone(&self.delivery),
            queue_name: self.queue_name.clone(),
        }
    }
}

/// Broker-assigned metadata of a received AMQP message.
///
/// The acknowledgement handle is deliberately left out: the adapter resolves the delivery
/// once processing is over, handlers never do.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Delivery {
    /// The delivery tag of the message.
    pub delivery_tag: DeliveryTag,

    /// The exchange of the message. May be an empty string
    /// if the default exchange is used.
    pub exchange: ShortString,

    /// The routing key of the message. May be an empty string
    /// if no routing key is specified.
    pub routing_key: ShortString,

    /// Whether this message was redelivered by the broker.
    pub redelivered: bool,

    /// Contains the properties and the headers of the
    /// message.
    pub properties: BasicProperties,
}

impl Delivery {
    /// Split a `lapin` delivery into its metadata, its raw payload and its acknowledgement handle.
    pub(crate) fn split(delivery: lapin::message::Delivery) -> (Self, Vec<u8>, lapin::acker::Acker) {
        let lapin::message::Delivery {
            delivery_tag,
            exchange,
            routing_key,
            redelivered,
            properties,
            data,
            acker,
            ..
        } = delivery;
        (
            Self {
                delivery_tag,
                exchange,
                routing_key,
                redelivered,
                properties,
            },
            data,
            acker,
        )
    }
}
