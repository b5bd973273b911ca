//! `warren` is a small framework, built on top of [`lapin`], to consume RabbitMQ queues with
//! typed handlers and application-level retries.
//!
//! [`QueueAdapter`](crate::adapter::QueueAdapter) owns the connection and dispatches messages
//! to [`Handler`](crate::consumers::Handler)s; [`App`](crate::app::App) wraps it into a
//! runnable consumer application. Both are good starting points to learn more about what
//! `warren` provides.
//!
//! ## Examples
//!
//! Check the `demos` directory to see the library in action.

pub mod adapter;
pub mod amqp;
pub mod app;
pub mod consumers;
pub mod logger;
pub mod publishers;
