//! Facilities to process messages consumed from a RabbitMq queue: handlers, application-level
//! retries and acknowledgement of deliveries.
//!
//! Check out [`Handler`] and [`RetryPolicy`] as starting points.
pub use acknowledgement::{process_acknowledged, Acknowledge, BrokerAction, ProcessingError};
pub use error::HandlerError;
pub use handler::{ClosureHandler, Handler};
pub use incoming_message::{Delivery, Incoming};
pub use retry::{ByBody, ByHeader, ByMessageId, RetryKey, RetryPolicy};
pub use watcher::{DeliveryWatcher, DEFAULT_MAX_TRIES};

pub(crate) mod acknowledgement;
mod error;
mod handler;
mod incoming_message;
mod retry;
mod watcher;
