use crate::helpers::{get_connection_config, get_unreachable_config, temp_queue_name};
use shutdown_handler::ShutdownHandler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use warren::adapter::QueueAdapter;
use warren::app::{App, StartupHook};
use warren::consumers::{ClosureHandler, HandlerError, Incoming};
use warren::logger::EmptyLogger;

#[derive(Clone, Default)]
struct FlagHook {
    ran: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl<C: Send + Sync + 'static> StartupHook<C> for FlagHook {
    async fn run(&self, _adapter: &QueueAdapter<C>) -> Result<(), anyhow::Error> {
        self.ran.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn an_unreachable_broker_stops_the_app_before_the_hooks_run() {
    // Arrange
    let hook = FlagHook::default();
    let app = App::builder(get_unreachable_config(), ())
        .with_logger(EmptyLogger)
        .startup_hook(hook.clone())
        .build();

    // Act
    let outcome = app.run_until_shutdown(Arc::new(ShutdownHandler::new())).await;

    // Assert
    assert!(outcome.is_err());
    assert!(!hook.ran.load(Ordering::SeqCst));
}

/// Seeds the queue before its handler is bound.
struct Seed {
    queue_name: String,
}

#[async_trait::async_trait]
impl StartupHook<mpsc::UnboundedSender<String>> for Seed {
    async fn run(
        &self,
        adapter: &QueueAdapter<mpsc::UnboundedSender<String>>,
    ) -> Result<(), anyhow::Error> {
        adapter.declare_queue(&self.queue_name).await?;
        adapter.publish_message(&self.queue_name, "seed").await?;
        Ok(())
    }
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn messages_published_by_startup_hooks_are_consumed_until_shutdown() {
    // Arrange
    let queue_name = temp_queue_name();
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let app = App::builder(get_connection_config(), sender)
        .with_logger(EmptyLogger)
        .max_concurrency(1)
        .startup_hook(Seed {
            queue_name: queue_name.clone(),
        })
        .retrying_queue_handler(
            queue_name,
            ClosureHandler(
                |incoming: Incoming<mpsc::UnboundedSender<String>>| async move {
                    incoming.context.send(incoming.body.clone()).unwrap();
                    Ok::<(), HandlerError>(())
                },
            ),
        )
        .build();
    let shutdown = Arc::new(ShutdownHandler::new());

    // Act
    let handle = tokio::spawn(app.run_until_shutdown(shutdown.clone()));
    let body = tokio::time::timeout(Duration::from_secs(10), receiver.recv())
        .await
        .unwrap();
    shutdown.shutdown();

    // Assert
    assert_eq!(body.as_deref(), Some("seed"));
    handle.await.unwrap().unwrap();
}
