/// The error type returned by message handlers.
///
/// The framework does not look inside it: every handler failure is treated the same way,
/// i.e. the delivery is rejected and, if retrying is enabled, the message is pushed back
/// to its queue until it runs out of attempts.
///
/// Any `anyhow::Error` converts into a `HandlerError`, so handlers can use `?` on
/// `anyhow::Result` values directly.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct HandlerError(#[from] anyhow::Error);

impl HandlerError {
    /// Wrap an arbitrary error.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(error.into())
    }

    /// Build a `HandlerError` out of a message.
    pub fn msg<M>(message: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Self(anyhow::Error::msg(message))
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.0
    }
}
