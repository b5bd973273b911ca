//! A ready-made consumer application around a [`QueueAdapter`].
//!
//! [`App`] drives the whole lifecycle of the adapter: connect, open the channel, run the
//! startup hooks, bind the queues, then wait for a shutdown signal and close.
use crate::adapter::{AdapterOptions, QueueAdapter};
use crate::amqp::ConnectionConfig;
use crate::consumers::Handler;
use crate::logger::LoggerSink;
use shutdown_handler::ShutdownHandler;
use std::sync::Arc;

/// Logic to execute once the channel is open, before the queues are bound.
///
/// # Use case
///
/// Seeding a queue, declaring the exchanges the application relies on, checking that a
/// dependency is reachable. The hook gets the adapter, and through it the shared context
/// ([`QueueAdapter::context`]) and the publish primitive ([`QueueAdapter::publish_message`]).
///
/// A failing hook aborts the start of the application.
#[async_trait::async_trait]
pub trait StartupHook<C>: Send + Sync + 'static {
    async fn run(&self, adapter: &QueueAdapter<C>) -> Result<(), anyhow::Error>;
}

/// assert it's object safe
type _CHECK = Box<dyn StartupHook<()>>;

struct QueueBinding<C> {
    queue_name: String,
    handler: Arc<dyn Handler<C>>,
    retrying_on_error: bool,
}

/// A consumer application: a set of queues bound to handlers, sharing one connection and one
/// typed context.
///
/// Use [`App::builder`] to assemble one.
pub struct App<C> {
    config: ConnectionConfig,
    adapter: QueueAdapter<C>,
    max_concurrency: Option<u16>,
    bindings: Vec<QueueBinding<C>>,
    startup_hooks: Vec<Box<dyn StartupHook<C>>>,
}

impl<C> App<C>
where
    C: Send + Sync + 'static,
{
    /// Start assembling an application that connects to the broker described by `config`.
    /// `context` is shared by every handler and startup hook.
    pub fn builder(config: ConnectionConfig, context: C) -> AppBuilder<C> {
        AppBuilder {
            app: App {
                config,
                adapter: QueueAdapter::new(context),
                max_concurrency: None,
                bindings: Vec::new(),
                startup_hooks: Vec::new(),
            },
        }
    }

    /// Run the application until the process receives SIGTERM.
    ///
    /// `run_until_sigterm` returns control to the caller only if:
    /// - the application fails to start (unreachable broker, failing startup hook, etc.);
    /// - one of the consumers stops (e.g. disconnection);
    /// - the application is stopped via SIGTERM.
    pub async fn run_until_sigterm(self) -> Result<(), anyhow::Error> {
        self.run_until_shutdown(ShutdownHandler::sigterm()?).await
    }

    /// Run the application until `shutdown` is triggered or one of the consumers stops.
    ///
    /// A stopped consumer triggers `shutdown` and is returned as an error.
    ///
    /// Messages being processed when the signal is received are aborted: their deliveries are
    /// left unacknowledged and the broker hands them over again.
    #[tracing::instrument(skip_all, name = "app_run")]
    pub async fn run_until_shutdown(
        self,
        shutdown: Arc<ShutdownHandler>,
    ) -> Result<(), anyhow::Error> {
        let Self {
            config,
            mut adapter,
            max_concurrency,
            bindings,
            startup_hooks,
        } = self;

        adapter.connect(&config).await?;
        if let Err(e) = start(&mut adapter, max_concurrency, bindings, startup_hooks).await {
            if let Err(close_error) = adapter.close().await {
                tracing::warn!("Failed to close the adapter: {:?}", close_error);
            }
            return Err(e);
        }

        let outcome = wait_for_shutdown(&mut adapter, &shutdown).await;
        if let Err(e) = adapter.close().await {
            match outcome {
                Ok(()) => return Err(e.into()),
                Err(_) => tracing::warn!("Failed to close the adapter: {:?}", e),
            }
        }
        outcome
    }
}

async fn wait_for_shutdown<C>(
    adapter: &mut QueueAdapter<C>,
    shutdown: &ShutdownHandler,
) -> Result<(), anyhow::Error>
where
    C: Send + Sync + 'static,
{
    tokio::select! {
        _ = shutdown.wait_for_signal() => {
            tracing::info!("Received shutdown event, closing the adapter");
            Ok(())
        }
        error = adapter.consumer_stopped() => {
            tracing::error!("Consumer failed: {:?}", error);
            shutdown.shutdown();
            Err(error.into())
        }
    }
}

async fn start<C>(
    adapter: &mut QueueAdapter<C>,
    max_concurrency: Option<u16>,
    bindings: Vec<QueueBinding<C>>,
    startup_hooks: Vec<Box<dyn StartupHook<C>>>,
) -> Result<(), anyhow::Error>
where
    C: Send + Sync + 'static,
{
    adapter.init_channel(max_concurrency).await?;
    for hook in &startup_hooks {
        hook.run(adapter).await?;
    }
    for binding in bindings {
        adapter
            .set_queue_handler(
                &binding.queue_name,
                binding.handler,
                binding.retrying_on_error,
            )
            .await?;
    }
    Ok(())
}

/// Registers queue handlers and startup hooks for an [`App`].
pub struct AppBuilder<C> {
    app: App<C>,
}

impl<C> AppBuilder<C>
where
    C: Send + Sync + 'static,
{
    #[must_use]
    pub fn with_logger(mut self, logger: impl LoggerSink + 'static) -> Self {
        self.app.adapter = self.app.adapter.with_logger(logger);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: AdapterOptions) -> Self {
        self.app.adapter = self.app.adapter.with_options(options);
        self
    }

    /// At most `max_concurrency` deliveries are processed at the same time.
    #[must_use]
    pub fn max_concurrency(mut self, max_concurrency: u16) -> Self {
        self.app.max_concurrency = Some(max_concurrency);
        self
    }

    /// Consume `queue_name` with `handler`. Failed messages are rejected.
    #[must_use]
    pub fn queue_handler(self, queue_name: impl Into<String>, handler: impl Handler<C>) -> Self {
        self.bind(queue_name.into(), Arc::new(handler), false)
    }

    /// Consume `queue_name` with `handler`. Failed messages are pushed back to the queue
    /// until they exhaust their tries.
    #[must_use]
    pub fn retrying_queue_handler(
        self,
        queue_name: impl Into<String>,
        handler: impl Handler<C>,
    ) -> Self {
        self.bind(queue_name.into(), Arc::new(handler), true)
    }

    /// Hooks run in registration order.
    #[must_use]
    pub fn startup_hook(mut self, hook: impl StartupHook<C>) -> Self {
        self.app.startup_hooks.push(Box::new(hook));
        self
    }

    pub fn build(self) -> App<C> {
        self.app
    }

    fn bind(mut self, queue_name: String, handler: Arc<dyn Handler<C>>, retrying: bool) -> Self {
        self.app.bindings.push(QueueBinding {
            queue_name,
            handler,
            retrying_on_error: retrying,
        });
        self
    }
}
