//! Connection supervisor behavior tests
//!
//! Tests focus on BEHAVIOR under concurrent callers and broker failures,
//! running on the paused tokio clock.

mod test_helpers;

use door_sensor_agent::agent::{
    ConnectOutcome, ConnectionState, ConnectionSupervisor, PublishOutcome, ReconnectPolicy,
};
use door_sensor_agent::protocol::{EventClock, EventKind};
use door_sensor_agent::testing::MockBroker;
use door_sensor_agent::transport::BrokerClient;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_connect() {
    let broker = Arc::new(MockBroker::new().with_connect_delay(Duration::from_secs(2)));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = Arc::new(ConnectionSupervisor::new(
        broker.clone(),
        ReconnectPolicy::default(),
        shutdown_rx,
    ));

    let start = Instant::now();
    let callers = (0..8).map(|_| {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            let outcome = supervisor.ensure_connected().await;
            (outcome, start.elapsed())
        })
    });
    let results = join_all(callers).await;

    assert_eq!(broker.connect_calls(), 1);
    for result in results {
        let (outcome, waited) = result.unwrap();
        assert_eq!(outcome, ConnectOutcome::Connected);
        assert!(waited >= Duration::from_secs(2), "caller returned after {waited:?}");
    }
    assert_eq!(supervisor.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_retries_until_broker_accepts() {
    let broker = Arc::new(MockBroker::new());
    broker.fail_next_connects(2);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = ConnectionSupervisor::new(
        broker.clone(),
        ReconnectPolicy::fixed(Duration::from_secs(5)),
        shutdown_rx,
    );

    let start = Instant::now();
    assert_eq!(supervisor.ensure_connected().await, ConnectOutcome::Connected);

    assert_eq!(broker.connect_calls(), 3);
    assert_eq!(supervisor.attempts(), 3);
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert!(broker.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_state_changes_are_observable() {
    let broker = Arc::new(MockBroker::new());
    broker.fail_next_connects(1);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = ConnectionSupervisor::new(
        broker,
        ReconnectPolicy::fixed(Duration::from_secs(5)),
        shutdown_rx,
    );
    let states = supervisor.subscribe();

    assert_eq!(*states.borrow(), ConnectionState::Disconnected);
    supervisor.ensure_connected().await;
    assert_eq!(*states.borrow(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_each_failed_publish_reconnects_once() {
    let broker = Arc::new(MockBroker::connected());
    broker.fail_next_publishes(3);
    let (publisher, _shutdown_tx) =
        test_helpers::mock_publisher(broker.clone(), Duration::from_secs(5));
    let clock = EventClock::from_offset_hours(0);

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        let event = clock.event(EventKind::Heartbeat);
        outcomes.push(publisher.publish(test_helpers::HEARTBEAT_TOPIC, &event).await);
    }

    assert_eq!(
        outcomes,
        vec![
            PublishOutcome::Dropped,
            PublishOutcome::Dropped,
            PublishOutcome::Dropped,
            PublishOutcome::Delivered,
            PublishOutcome::Delivered,
        ]
    );
    assert_eq!(broker.connect_calls(), 3);
    assert_eq!(broker.published_on(test_helpers::HEARTBEAT_TOPIC).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_endless_retries() {
    let broker = Arc::new(MockBroker::new());
    broker.fail_next_connects(u32::MAX);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = Arc::new(ConnectionSupervisor::new(
        broker.clone(),
        ReconnectPolicy::fixed(Duration::from_secs(5)),
        shutdown_rx,
    ));

    let handle = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.ensure_connected().await })
    };

    tokio::time::sleep(Duration::from_secs(32)).await;
    shutdown_tx.send(true).unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(100), handle)
        .await
        .expect("supervisor ignored shutdown")
        .unwrap();
    assert_eq!(outcome, ConnectOutcome::ShutdownRequested);
    assert_eq!(broker.connect_calls(), 7);
}
