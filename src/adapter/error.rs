use crate::adapter::AdapterState;
use crate::publishers::PublishError;

/// Errors returned by [`QueueAdapter`](super::QueueAdapter) operations.
///
/// Message processing failures are not part of this list: they are contained per delivery
/// and never reach the caller of the adapter.
#[derive(thiserror::Error, Debug)]
pub enum AdapterError {
    /// The broker is unreachable, rejected our credentials or did not answer in time.
    #[error("Failed to connect to the RabbitMq broker")]
    Connection(#[source] anyhow::Error),
    #[error("Failed to open a channel on the RabbitMq connection")]
    Channel(#[source] anyhow::Error),
    #[error("Failed to declare queue `{queue_name}`")]
    Declare {
        queue_name: String,
        #[source]
        error: anyhow::Error,
    },
    #[error("Failed to start consuming messages from queue `{queue_name}`")]
    Consume {
        queue_name: String,
        #[source]
        error: anyhow::Error,
    },
    #[error("Failed to publish a message to queue `{queue_name}`")]
    Publish {
        queue_name: String,
        #[source]
        error: PublishError,
    },
    /// A consumer stopped pulling messages, e.g. because the connection was lost.
    #[error("The consumer of queue `{queue_name}` stopped")]
    ConsumerStopped {
        queue_name: String,
        #[source]
        error: anyhow::Error,
    },
    #[error("Failed to close the RabbitMq connection")]
    Close(#[source] anyhow::Error),
    /// An operation was called out of order, e.g. `init_channel` before `connect`.
    #[error("`{operation}` cannot be called while the adapter is {state}")]
    InvalidState {
        operation: &'static str,
        state: AdapterState,
    },
    /// Only one handler can be bound to a queue.
    #[error("A handler is already bound to queue `{0}`")]
    DuplicateBinding(String),
}
