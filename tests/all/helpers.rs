use std::future::Future;
use std::time::Duration;
use warren::adapter::{AdapterOptions, QueueAdapter};
use warren::amqp::ConnectionConfig;
use warren::logger::EmptyLogger;

/// The broker used by the tests that need one: an out-of-the-box local RabbitMq.
pub fn get_connection_config() -> ConnectionConfig {
    ConnectionConfig::default()
}

/// A configuration pointing to a port nobody listens on.
pub fn get_unreachable_config() -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".into(),
        port: 1,
        connection_timeout_seconds: Some(2),
        ..ConnectionConfig::default()
    }
}

pub fn temp_queue_name() -> String {
    format!("warren-test-{}", uuid::Uuid::new_v4())
}

/// An adapter with an open channel on the local broker.
pub async fn get_open_adapter<C>(
    context: C,
    options: AdapterOptions,
    max_concurrency: Option<u16>,
) -> QueueAdapter<C>
where
    C: Send + Sync + 'static,
{
    let mut adapter = QueueAdapter::new(context)
        .with_logger(EmptyLogger)
        .with_options(options);
    adapter.connect(&get_connection_config()).await.unwrap();
    adapter.init_channel(max_concurrency).await.unwrap();
    adapter
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("The condition did not hold in time");
}
