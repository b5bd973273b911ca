use crate::consumers::{
    process_acknowledged, Acknowledge, BrokerAction, Delivery, Handler, HandlerError, Incoming,
    ProcessingError,
};
use crate::logger::LoggerSink;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Everything needed to process a delivery coming from one queue.
pub(super) struct Dispatcher<C> {
    pub(super) context: Arc<C>,
    pub(super) handler: Arc<dyn Handler<C>>,
    pub(super) logger: Arc<dyn LoggerSink>,
    pub(super) queue_name: String,
    /// How a failed delivery is resolved with the broker.
    pub(super) on_failure: BrokerAction,
}

impl<C> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            handler: Arc::clone(&self.handler),
            logger: Arc::clone(&self.logger),
            queue_name: self.queue_name.clone(),
            on_failure: self.on_failure,
        }
    }
}

impl<C: Send + Sync + 'static> Dispatcher<C> {
    /// Pull deliveries off `consumer` until the broker cancels it or the channel fails.
    ///
    /// Each delivery is processed in its own task, so a slow or failing message does not hold
    /// up the others (up to the channel prefetch). Dropping the returned future aborts the
    /// deliveries still in flight.
    #[tracing::instrument(skip_all, name = "consumer_run", fields(queue_name = %self.queue_name))]
    pub(super) async fn run<S, E>(self, mut consumer: S) -> Result<(), anyhow::Error>
    where
        S: Stream<Item = Result<lapin::message::Delivery, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut in_flight = JoinSet::new();

        let result = 'event_loop: loop {
            tokio::select! {
                // clear out finished deliveries
                _ = in_flight.join_next(), if !in_flight.is_empty() => {}

                event = consumer.next() => {
                    match event {
                        // the consumer was cancelled
                        None => break 'event_loop Ok(()),
                        Some(Err(e)) => {
                            tracing::error!("Consumer error: {}", e);
                            break 'event_loop Err(e.into());
                        }
                        Some(Ok(delivery)) => {
                            in_flight.spawn(self.clone().dispatch(delivery));
                        }
                    }
                }
            }
        };

        while in_flight.join_next().await.is_some() {}

        result
    }

    async fn dispatch(self, delivery: lapin::message::Delivery) {
        let (delivery, payload, acker) = Delivery::split(delivery);
        if let Err(e) = self.process(delivery, payload, &acker).await {
            tracing::error!(
                queue_name = %self.queue_name,
                error = ?e,
                "Message processing failed"
            );
        }
    }

    /// Decode, hand over to the handler, resolve the delivery.
    ///
    /// The delivery is always resolved before this returns; a handler failure is returned
    /// afterwards.
    #[tracing::instrument(
        name = "process_message",
        skip_all,
        fields(queue_name = %self.queue_name, delivery_tag = delivery.delivery_tag),
        level = tracing::Level::DEBUG
    )]
    pub(super) async fn process<A>(
        &self,
        delivery: Delivery,
        payload: Vec<u8>,
        acker: &A,
    ) -> Result<(), ProcessingError>
    where
        A: Acknowledge + ?Sized,
    {
        let body = match String::from_utf8(payload) {
            Ok(body) => body,
            Err(e) => {
                self.logger
                    .error("[x] Received a message that is not valid UTF-8. Rejected.");
                return process_acknowledged(acker, BrokerAction::Reject, async move {
                    Err(HandlerError::new(e))
                })
                .await;
            }
        };

        let incoming = Incoming {
            context: Arc::clone(&self.context),
            body,
            delivery: Arc::new(delivery),
            queue_name: self.queue_name.clone(),
        };
        process_acknowledged(acker, self.on_failure, async {
            self.logger.info(&format!("[x] Received {}", incoming.body));
            self.handler.handle(&incoming).await
        })
        .await
    }
}
