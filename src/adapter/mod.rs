//! The queue adapter: one broker connection, one channel, any number of queues bound to
//! handlers.
//!
//! Check out [`QueueAdapter`] for the lifecycle.
pub use error::AdapterError;
pub use options::AdapterOptions;
pub use queue_adapter::QueueAdapter;

mod consumer;
mod error;
mod options;
mod queue_adapter;

/// Where a [`QueueAdapter`] stands in its lifecycle.
///
/// Operations are only valid in some states: calling them in any other state returns
/// [`AdapterError::InvalidState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unconnected,
    Connected,
    ChannelOpen,
    Consuming,
    Closed,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            AdapterState::Unconnected => "unconnected",
            AdapterState::Connected => "connected",
            AdapterState::ChannelOpen => "holding an open channel",
            AdapterState::Consuming => "consuming",
            AdapterState::Closed => "closed",
        };
        f.write_str(state)
    }
}
