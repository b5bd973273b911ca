use crate::helpers::{eventually, get_open_adapter, get_unreachable_config, temp_queue_name};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use warren::adapter::{AdapterError, AdapterOptions, AdapterState, QueueAdapter};
use warren::consumers::{ByBody, ClosureHandler, HandlerError, Incoming};
use warren::logger::EmptyLogger;

#[tokio::test]
async fn connecting_to_an_unreachable_broker_fails() {
    // Arrange
    let mut adapter = QueueAdapter::new(()).with_logger(EmptyLogger);

    // Act
    let outcome = adapter.connect(&get_unreachable_config()).await;

    // Assert
    assert!(matches!(outcome, Err(AdapterError::Connection(_))));
    assert_eq!(adapter.state(), AdapterState::Unconnected);
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn a_published_message_reaches_the_bound_handler() {
    // Arrange
    let queue_name = temp_queue_name();
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let mut adapter = get_open_adapter(sender, AdapterOptions::default(), None).await;
    adapter
        .set_queue_handler(
            &queue_name,
            ClosureHandler(
                |incoming: Incoming<mpsc::UnboundedSender<String>>| async move {
                    incoming.context.send(incoming.body.clone()).unwrap();
                    Ok::<(), HandlerError>(())
                },
            ),
            false,
        )
        .await
        .unwrap();
    assert_eq!(adapter.state(), AdapterState::Consuming);

    // Act
    adapter.publish_message(&queue_name, "hello").await.unwrap();

    // Assert
    let body = tokio::time::timeout(Duration::from_secs(10), receiver.recv())
        .await
        .unwrap();
    assert_eq!(body.as_deref(), Some("hello"));

    adapter.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn an_always_failing_message_is_handled_max_tries_times() {
    // Arrange
    let queue_name = temp_queue_name();
    let invocations = Arc::new(AtomicU32::new(0));
    let options = AdapterOptions::default().max_tries(3).retry_key(ByBody);
    let mut adapter = get_open_adapter(Arc::clone(&invocations), options, None).await;
    adapter
        .set_queue_handler(
            &queue_name,
            ClosureHandler(|incoming: Incoming<Arc<AtomicU32>>| async move {
                incoming.context.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(HandlerError::msg("always failing"))
            }),
            true,
        )
        .await
        .unwrap();

    // Act
    adapter.publish_message(&queue_name, "X").await.unwrap();

    // Assert
    eventually(|| {
        let invocations = Arc::clone(&invocations);
        async move { invocations.load(Ordering::SeqCst) >= 3 }
    })
    .await;
    // give a hypothetical fourth delivery the time to show up
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(adapter.retry_policy().unwrap().attempts("X"), 0);

    adapter.close().await.unwrap();
}

#[derive(Default)]
struct InFlight {
    current: AtomicU32,
    peak: AtomicU32,
    done: AtomicU32,
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn a_concurrency_of_one_processes_a_single_message_at_a_time() {
    // Arrange
    let queue_name = temp_queue_name();
    let in_flight = Arc::new(InFlight::default());
    let mut adapter =
        get_open_adapter(Arc::clone(&in_flight), AdapterOptions::default(), Some(1)).await;
    adapter
        .set_queue_handler(
            &queue_name,
            ClosureHandler(|incoming: Incoming<Arc<InFlight>>| async move {
                let stats = &incoming.context;
                let current = stats.current.fetch_add(1, Ordering::SeqCst) + 1;
                stats.peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                stats.current.fetch_sub(1, Ordering::SeqCst);
                stats.done.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }),
            false,
        )
        .await
        .unwrap();

    // Act
    for i in 0..5 {
        adapter
            .publish_message(&queue_name, format!("message {i}"))
            .await
            .unwrap();
    }

    // Assert
    eventually(|| {
        let in_flight = Arc::clone(&in_flight);
        async move { in_flight.done.load(Ordering::SeqCst) == 5 }
    })
    .await;
    assert_eq!(in_flight.peak.load(Ordering::SeqCst), 1);

    adapter.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn a_queue_cannot_be_bound_twice() {
    let queue_name = temp_queue_name();
    let mut adapter = get_open_adapter((), AdapterOptions::default(), None).await;
    let handler = || ClosureHandler(|_: Incoming<()>| async { Ok::<(), HandlerError>(()) });
    adapter
        .set_queue_handler(&queue_name, handler(), false)
        .await
        .unwrap();

    let outcome = adapter.set_queue_handler(&queue_name, handler(), true).await;

    assert!(matches!(outcome, Err(AdapterError::DuplicateBinding(q)) if q == queue_name));
    adapter.close().await.unwrap();
}
