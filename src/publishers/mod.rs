//! Facilities to publish messages to a RabbitMq queue. Check out [`ChannelPublisher`] as a starting point.
mod publisher;

pub use publisher::{
    ChannelPublisher, OutgoingMessage, PublishError, Republish, DEFAULT_PUBLISH_TIMEOUT,
};
