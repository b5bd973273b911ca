//! Resolving a delivery with the broker once processing is over.
//!
//! Every delivery must be acked, nacked or rejected exactly once.
//! [`process_acknowledged`] owns that guarantee: it runs the processing future and resolves the
//! delivery on every exit path, including errors and panics.
use crate::consumers::HandlerError;
use futures_util::FutureExt;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// The action we asked the broker to take when finalising the processing of
/// the current message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerAction {
    /// Positive acknowledgement - the message can be removed from the queue.
    Ack,
    /// Negative acknowledgement - the message was not processed successfully and the broker
    /// puts it back in the queue.
    Nack,
    /// Rejection. The message was not processed successfully and should NOT be requeued.
    /// The message will be sent to the dead letter exchange if configured.
    Reject,
}

/// Something that can resolve a delivery with the broker.
///
/// Implemented for [`lapin::acker::Acker`].
#[async_trait::async_trait]
pub trait Acknowledge: Send + Sync {
    async fn resolve(&self, action: BrokerAction) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl Acknowledge for lapin::acker::Acker {
    async fn resolve(&self, action: BrokerAction) -> Result<(), anyhow::Error> {
        match action {
            BrokerAction::Ack => self.ack(BasicAckOptions { multiple: false }).await?,
            BrokerAction::Nack => {
                self.nack(BasicNackOptions {
                    multiple: false,
                    requeue: true,
                })
                .await?
            }
            BrokerAction::Reject => self.reject(BasicRejectOptions { requeue: false }).await?,
        }
        Ok(())
    }
}

/// What went wrong while processing a delivery.
#[derive(thiserror::Error, Debug)]
pub enum ProcessingError {
    /// The handler failed; the delivery was resolved with the failure action.
    #[error("An error was encountered while processing the message.")]
    Handler(#[source] HandlerError),
    /// We could not tell the broker what to do with the delivery.
    #[error("Failed to {action:?} the message.")]
    Acknowledgement {
        action: BrokerAction,
        #[source]
        error: anyhow::Error,
        /// The handler failure that led us to try to resolve the delivery, if any.
        handler_error: Option<HandlerError>,
    },
}

/// Run `processing` and resolve the delivery behind `acker` afterwards, whatever happens.
///
/// Success acks the delivery. A failure, or a panic in `processing`, resolves it with
/// `on_failure`; the failure is returned once the delivery has been resolved.
pub async fn process_acknowledged<A, Fut>(
    acker: &A,
    on_failure: BrokerAction,
    processing: Fut,
) -> Result<(), ProcessingError>
where
    A: Acknowledge + ?Sized,
    Fut: Future<Output = Result<(), HandlerError>>,
{
    let outcome = catching_panics(processing).await;

    let action = match outcome {
        Ok(()) => BrokerAction::Ack,
        Err(_) => on_failure,
    };

    match acker.resolve(action).await {
        Ok(()) => outcome.map_err(ProcessingError::Handler),
        Err(error) => Err(ProcessingError::Acknowledgement {
            action,
            error,
            handler_error: outcome.err(),
        }),
    }
}

/// Run `processing`, turning a panic into a [`HandlerError`].
pub(crate) async fn catching_panics<Fut>(processing: Fut) -> Result<(), HandlerError>
where
    Fut: Future<Output = Result<(), HandlerError>>,
{
    AssertUnwindSafe(processing)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HandlerError::msg(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let reason = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown reason".to_owned());
    format!("The message handler panicked: {reason}")
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{Acknowledge, BrokerAction};
    use std::sync::Mutex;

    /// Remembers every resolution, optionally failing them.
    #[derive(Default)]
    pub(crate) struct RecordingAcker {
        pub(crate) actions: Mutex<Vec<BrokerAction>>,
        pub(crate) broken: bool,
    }

    impl RecordingAcker {
        pub(crate) fn actions(&self) -> Vec<BrokerAction> {
            self.actions.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Acknowledge for RecordingAcker {
        async fn resolve(&self, action: BrokerAction) -> Result<(), anyhow::Error> {
            self.actions.lock().unwrap().push(action);
            if self.broken {
                anyhow::bail!("channel closed");
            }
            Ok(())
        }
    }
}
