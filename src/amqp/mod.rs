//! Connection settings and low-level helpers for talking to a RabbitMq broker.

pub mod configuration;
pub mod convenience;
mod factory;

pub use configuration::{ConnectionConfig, TlsConfig};
pub use factory::ConnectionFactory;

pub use lapin::{options, types, BasicProperties, Channel, Connection};
