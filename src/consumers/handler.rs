//! The `Handler` trait is heavily inspired by `tide`'s approach to endpoint handlers.
use crate::consumers::{HandlerError, Incoming};
use std::future::Future;
use std::sync::Arc;

/// Implementers of the `Handler` trait process messages retrieved from a queue.
///
/// # Scope
///
/// `handle` does not get access to the underlying RabbitMq channel.
/// The framework takes care of acking/rejecting the message with the broker according to the outcome
/// of processing, and of pushing failed messages back to their queue when retrying is enabled
/// (see [`RetryPolicy`]).
/// This decouples the low-level interactions with the message broker and the retry logic from
/// the actual business logic associated with the processing of a message.
///
/// # Implementers
///
/// While you can implement `Handler` for a struct or enum, most of the time you will be relying
/// on [`ClosureHandler`], which turns any async function with a matching signature -
/// `Fn(Incoming<Context>) -> Fut` - into a `Handler`.
///
/// [`RetryPolicy`]: crate::consumers::RetryPolicy
#[async_trait::async_trait]
pub trait Handler<Context>: Send + Sync + 'static {
    async fn handle(&self, incoming: &Incoming<Context>) -> Result<(), HandlerError>;
}

#[async_trait::async_trait]
impl<Context, H> Handler<Context> for Box<H>
where
    Context: Send + Sync + 'static,
    H: Handler<Context> + ?Sized,
{
    async fn handle(&self, incoming: &Incoming<Context>) -> Result<(), HandlerError> {
        H::handle(self, incoming).await
    }
}

#[async_trait::async_trait]
impl<Context, H> Handler<Context> for Arc<H>
where
    Context: Send + Sync + 'static,
    H: Handler<Context> + ?Sized,
{
    async fn handle(&self, incoming: &Incoming<Context>) -> Result<(), HandlerError> {
        H::handle(self, incoming).await
    }
}

/// Wrapper type to turn an async function into a [`Handler`].
///
/// ```rust
/// use warren::consumers::{ClosureHandler, Handler, Incoming};
///
/// async fn print(incoming: Incoming<()>) -> Result<(), anyhow::Error> {
///     println!("{}", incoming.body);
///     Ok(())
/// }
///
/// fn assert_handler<H: Handler<()>>(_: H) {}
/// assert_handler(ClosureHandler(print));
/// ```
///
/// The function gets its own clone of the [`Incoming`] message: it is cheap, the context and the
/// delivery metadata are behind `Arc` pointers.
///
/// We do not require the function to return a [`HandlerError`] directly - it is enough for it
/// to return an error type that can be converted into [`HandlerError`], e.g. `anyhow::Error`.
pub struct ClosureHandler<F>(pub F);

#[async_trait::async_trait]
impl<Context, F, Fut, Err> Handler<Context> for ClosureHandler<F>
where
    Context: Send + Sync + 'static,
    F: Fn(Incoming<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Err>> + Send + 'static,
    Err: Into<HandlerError> + 'static,
{
    async fn handle(&self, incoming: &Incoming<Context>) -> Result<(), HandlerError> {
        (self.0)(incoming.clone()).await.map_err(Into::into)
    }
}
