//! End-to-end arbitration scenarios against the scripted mock link
//!
//! Timings are shrunk to a few milliseconds so each scenario runs in real time.

use std::future::Future;
use std::sync::Arc;

use blegate_core::testing::{LinkOp, MockLink, RecordingSink};
use blegate_core::{
    ConnectError, GatewayConfig, GatewayError, GatewayEvent, GatewayMode, PeripheralAddress,
    PeripheralRole, RetryConfig, RouteConfig, TimingConfig, WriteError, WriteMode,
};
use blegate_runtime::{GatewayBuilder, GatewayHandle};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

const LISTENER: &str = "50:F1:4A:4D:DC:E9";
const TARGET: &str = "AA:BB:CC:DD:EE:FF";

fn listener() -> PeripheralAddress {
    LISTENER.parse().unwrap()
}

fn target() -> PeripheralAddress {
    TARGET.parse().unwrap()
}

fn fast_config() -> GatewayConfig {
    GatewayConfig::new()
        .with_listener(listener())
        .with_timing(TimingConfig {
            connect_timeout_ms: 500,
            write_timeout_ms: 200,
            suspend_grace_ms: 5,
            inter_op_delay_ms: 2,
            settle_delay_ms: 5,
        })
        .with_retry(RetryConfig {
            listener_delay_ms: 10,
            sender_extra_attempts: 1,
            sender_delay_ms: 5,
        })
}

fn start(config: GatewayConfig, link: &MockLink) -> (GatewayHandle, RecordingSink, JoinHandle<()>) {
    let sink = RecordingSink::new();
    let (handle, task) = GatewayBuilder::new(config)
        .with_sink(Arc::new(sink.clone()))
        .spawn(Arc::new(link.clone()))
        .expect("gateway should build");
    (handle, sink, task)
}

async fn within<F: Future>(future: F) -> F::Output {
    timeout(Duration::from_secs(5), future)
        .await
        .expect("scenario step timed out")
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
}

fn with_connect_timeout(mut config: GatewayConfig, ms: u64) -> GatewayConfig {
    config.timing.connect_timeout_ms = ms;
    config
}

fn count_ops(link: &MockLink, predicate: impl Fn(&LinkOp) -> bool) -> usize {
    link.ops().iter().filter(|op| predicate(*op)).count()
}

fn count_events(sink: &RecordingSink, predicate: impl Fn(&GatewayEvent) -> bool) -> usize {
    sink.events().iter().filter(|e| predicate(*e)).count()
}

// ----------------------------------------------------------------------------
// Listener Bring-up
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_listener_retries_until_reachable() {
    let link = MockLink::new();
    link.fail_next_connects(listener(), 3);
    let (handle, sink, _task) = start(fast_config(), &link);

    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    let retries = count_events(&sink, |e| {
        matches!(e, GatewayEvent::RetryScheduled { role: PeripheralRole::Listener, .. })
    });
    let connects = count_events(&sink, |e| {
        matches!(e, GatewayEvent::Connected { role: PeripheralRole::Listener, .. })
    });
    assert_eq!(retries, 3);
    assert_eq!(connects, 1);
    assert!(link.is_subscribed(listener()));

    let stats = handle.stats();
    assert_eq!(stats.listener_connect_failures, 3);
    assert_eq!(stats.listener_connects, 1);
}

#[tokio::test]
async fn test_listener_lost_then_reconnected() {
    let link = MockLink::new();
    let (handle, sink, _task) = start(fast_config(), &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    assert!(link.drop_peripheral(listener()).await);

    eventually(|| link.connect_count(listener()) == 2).await;
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    assert_eq!(count_events(&sink, |e| matches!(e, GatewayEvent::ListenerLost { .. })), 1);
    assert!(sink
        .mode_changes()
        .contains(&(GatewayMode::Listening, GatewayMode::Idle)));
    assert_eq!(handle.stats().listener_lost, 1);
    assert_eq!(link.max_active(), 1);

    // The dead connection was closed, only the new listener remains
    assert_eq!(
        count_ops(&link, |op| *op == LinkOp::Disconnect { address: listener() }),
        1
    );
    assert_eq!(link.open_connections(), 1);
}

#[tokio::test]
async fn test_lost_listener_waits_out_retry_delay() {
    let link = MockLink::new();
    let config = fast_config().with_retry(RetryConfig {
        listener_delay_ms: 300,
        sender_extra_attempts: 1,
        sender_delay_ms: 5,
    });
    let (handle, _sink, _task) = start(config, &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    assert!(link.drop_peripheral(listener()).await);
    within(handle.wait_for_mode(GatewayMode::Idle)).await.unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(link.connect_count(listener()), 1);
    assert_eq!(handle.mode(), GatewayMode::Idle);

    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();
    assert_eq!(link.connect_count(listener()), 2);
}

#[tokio::test]
async fn test_hung_listener_connect_is_aborted_and_retried() {
    let link = MockLink::new();
    link.hang_next_connects(listener(), 2);
    let (handle, sink, _task) = start(with_connect_timeout(fast_config(), 50), &link);

    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    let timeouts = count_events(&sink, |e| {
        matches!(
            e,
            GatewayEvent::ConnectFailed { role: PeripheralRole::Listener, .. }
        )
    });
    assert_eq!(timeouts, 2);
    assert_eq!(
        count_ops(&link, |op| *op == LinkOp::Abort { address: listener() }),
        2
    );
    assert_eq!(handle.stats().listener_connect_failures, 2);
    assert_eq!(link.active(), 1);
    assert_eq!(link.max_active(), 1);
}

// ----------------------------------------------------------------------------
// Send Cycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_send_walks_full_cycle() {
    let link = MockLink::new();
    let (handle, sink, _task) = start(fast_config(), &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    let receipt = within(handle.submit_send(TARGET, "|OFF@")).await.unwrap();
    assert_eq!(receipt.target, target());
    assert_eq!(receipt.bytes_written, 5);
    assert_eq!(receipt.attempts, 1);

    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    assert_eq!(
        sink.mode_changes(),
        vec![
            (GatewayMode::Idle, GatewayMode::Listening),
            (GatewayMode::Listening, GatewayMode::Suspending),
            (GatewayMode::Suspending, GatewayMode::Sending),
            (GatewayMode::Sending, GatewayMode::Resuming),
            (GatewayMode::Resuming, GatewayMode::Listening),
        ]
    );
    assert_eq!(link.writes_to(target()), vec![b"|OFF@".to_vec()]);
    assert_eq!(link.connect_count(listener()), 2);
    assert_eq!(link.max_active(), 1);
    assert_eq!(handle.queue_depth(), 0);
}

#[tokio::test]
async fn test_listener_torn_down_before_sender_connects() {
    let link = MockLink::new();
    let (handle, _sink, _task) = start(fast_config(), &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    within(handle.submit_send(TARGET, "|ON@")).await.unwrap();

    let ops = link.ops();
    let listener_down = ops
        .iter()
        .position(|op| *op == LinkOp::Disconnect { address: listener() })
        .expect("listener disconnected");
    let sender_up = ops
        .iter()
        .position(|op| matches!(op, LinkOp::Connect { role: PeripheralRole::Sender, .. }))
        .expect("sender connected");
    let sender_down = ops
        .iter()
        .position(|op| *op == LinkOp::Disconnect { address: target() })
        .expect("sender disconnected");

    assert!(listener_down < sender_up);
    assert!(sender_up < sender_down);
    assert_eq!(
        ops[listener_down - 1],
        LinkOp::Unsubscribe { address: listener() }
    );
}

#[tokio::test]
async fn test_back_to_back_sends_are_serialized() {
    let link = MockLink::new().with_connect_delay(Duration::from_millis(15));
    let (handle, sink, _task) = start(fast_config(), &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    let first = handle.enqueue(target(), b"|ON@".to_vec()).unwrap();
    let second = handle.enqueue(target(), b"|OFF@".to_vec()).unwrap();

    let first = within(first).await.unwrap();
    let second = within(second).await.unwrap();
    assert!(first.completed_at <= second.completed_at);

    assert_eq!(
        link.writes_to(target()),
        vec![b"|ON@".to_vec(), b"|OFF@".to_vec()]
    );
    assert!(link.max_active() <= 1);
    assert_eq!(handle.stats().sends_succeeded, 2);

    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();
    let cycle = [
        (GatewayMode::Listening, GatewayMode::Suspending),
        (GatewayMode::Suspending, GatewayMode::Sending),
        (GatewayMode::Sending, GatewayMode::Resuming),
        (GatewayMode::Resuming, GatewayMode::Listening),
    ];
    let mut expected = vec![(GatewayMode::Idle, GatewayMode::Listening)];
    expected.extend(cycle);
    expected.extend(cycle);
    assert_eq!(sink.mode_changes(), expected);

    // The second sender only connects once the first one is gone
    let ops = link.ops();
    let sender_connects: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| matches!(op, LinkOp::Connect { role: PeripheralRole::Sender, .. }))
        .map(|(index, _)| index)
        .collect();
    let first_sender_down = ops
        .iter()
        .position(|op| *op == LinkOp::Disconnect { address: target() })
        .expect("first sender disconnected");
    assert_eq!(sender_connects.len(), 2);
    assert!(sender_connects[0] < first_sender_down);
    assert!(first_sender_down < sender_connects[1]);
}

#[tokio::test]
async fn test_hung_sender_connect_times_out_and_listener_returns() {
    let link = MockLink::new();
    link.hang_next_connects(target(), 2);
    let (handle, _sink, _task) = start(with_connect_timeout(fast_config(), 50), &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    let err = within(handle.submit_send(TARGET, "|ON@")).await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Connect {
            attempts: 2,
            source: ConnectError::Timeout { duration_ms: 50 },
        }
    );

    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();
    assert_eq!(
        count_ops(&link, |op| *op == LinkOp::Abort { address: target() }),
        2
    );
    assert!(link.writes_to(target()).is_empty());
    assert!(link.max_active() <= 1);
    assert_eq!(link.active(), 1);
}

#[tokio::test]
async fn test_hung_write_times_out_and_listener_returns() {
    let link = MockLink::new();
    link.hang_writes(target());
    let config = fast_config().with_retry(RetryConfig {
        listener_delay_ms: 10,
        sender_extra_attempts: 0,
        sender_delay_ms: 5,
    });
    let (handle, sink, _task) = start(config, &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    let err = within(handle.submit_send(TARGET, "|ON@")).await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Write {
            attempts: 1,
            source: WriteError::Timeout { duration_ms: 200 },
        }
    );

    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();
    assert_eq!(count_events(&sink, |e| matches!(e, GatewayEvent::SendFailed { .. })), 1);
    assert_eq!(handle.stats().sends_failed, 1);
    assert!(link.max_active() <= 1);
}

#[tokio::test]
async fn test_failed_write_is_retried() {
    let link = MockLink::new();
    link.fail_next_writes(target(), 1);
    let (handle, sink, _task) = start(fast_config(), &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    let receipt = within(handle.submit_send(TARGET, "|ON@")).await.unwrap();
    assert_eq!(receipt.attempts, 2);
    assert_eq!(link.writes_to(target()), vec![b"|ON@".to_vec()]);
    assert_eq!(count_events(&sink, |e| matches!(e, GatewayEvent::WriteFailed { .. })), 1);
    assert_eq!(
        count_events(&sink, |e| {
            matches!(e, GatewayEvent::RetryScheduled { role: PeripheralRole::Sender, .. })
        }),
        1
    );
}

#[tokio::test]
async fn test_unreachable_target_exhausts_attempts() {
    let link = MockLink::new();
    link.fail_next_connects(target(), 5);
    let (handle, _sink, _task) = start(fast_config(), &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    let err = within(handle.submit_send(TARGET, "|ON@")).await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Connect {
            attempts: 2,
            source: ConnectError::Unreachable(TARGET.to_string()),
        }
    );
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();
    assert!(link.writes_to(target()).is_empty());
}

#[tokio::test]
async fn test_per_character_write_mode() {
    let link = MockLink::new();
    let config = fast_config().with_write_mode(WriteMode::PerCharacter { delay_ms: 1 });
    let (handle, _sink, _task) = start(config, &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    let receipt = within(handle.submit_send(TARGET, "|ON@")).await.unwrap();
    assert_eq!(receipt.bytes_written, 4);
    assert_eq!(
        link.writes_to(target()),
        vec![b"|".to_vec(), b"O".to_vec(), b"N".to_vec(), b"@".to_vec()]
    );
}

#[tokio::test]
async fn test_send_served_while_listener_unreachable() {
    let link = MockLink::new();
    link.fail_next_connects(listener(), u32::MAX);
    let config = fast_config().with_retry(RetryConfig {
        listener_delay_ms: 50,
        sender_extra_attempts: 1,
        sender_delay_ms: 5,
    });
    let (handle, sink, _task) = start(config, &link);

    eventually(|| handle.stats().listener_connect_failures >= 1).await;
    let receipt = within(handle.submit_send(TARGET, "|ON@")).await.unwrap();
    assert_eq!(receipt.attempts, 1);

    assert!(sink
        .mode_changes()
        .contains(&(GatewayMode::Idle, GatewayMode::Sending)));
    eventually(|| handle.mode() == GatewayMode::Idle).await;
}

// ----------------------------------------------------------------------------
// Notification Routing
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_notification_routes_command() {
    let link = MockLink::new();
    let config = fast_config()
        .with_route(RouteConfig::new("on", target(), "|ON@"))
        .with_route(RouteConfig::new("off", target(), "|OFF@"));
    let (handle, sink, _task) = start(config, &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    assert!(link.notify(listener(), b"TEST1@\n").await);

    eventually(|| handle.stats().sends_succeeded == 1).await;
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    assert_eq!(link.writes_to(target()), vec![b"|ON@".to_vec()]);
    assert!(sink.events().contains(&GatewayEvent::NotificationReceived {
        origin: listener(),
        text: "TEST1@".to_string(),
        classification: Some("on".to_string()),
    }));

    let stats = handle.stats();
    assert_eq!(stats.notifications_received, 1);
    assert_eq!(stats.messages_classified, 1);
    assert_eq!(stats.requests_routed, 1);
}

#[tokio::test]
async fn test_unclassified_notification_is_only_logged() {
    let link = MockLink::new();
    let config = fast_config().with_route(RouteConfig::new("on", target(), "|ON@"));
    let (handle, sink, _task) = start(config, &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    assert!(link.notify(listener(), b"hello").await);
    eventually(|| handle.stats().notifications_received == 1).await;

    assert_eq!(handle.stats().requests_routed, 0);
    assert!(link.writes_to(target()).is_empty());
    assert!(sink.lines().iter().any(|line| line.contains("hello")));
    assert_eq!(handle.mode(), GatewayMode::Listening);
}

// ----------------------------------------------------------------------------
// Intake and Shutdown
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_bounded_queue_reports_full() {
    let link = MockLink::new();
    link.hang_writes(target());
    let config = fast_config().with_queue_capacity(1);
    let (handle, _sink, _task) = start(config, &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    let _in_flight = handle.enqueue(target(), b"a".to_vec()).unwrap();
    within(handle.wait_for_mode(GatewayMode::Sending)).await.unwrap();

    let _queued = handle.enqueue(target(), b"b".to_vec()).unwrap();
    assert_eq!(
        handle.enqueue(target(), b"c".to_vec()).unwrap_err(),
        GatewayError::QueueFull { capacity: 1 }
    );
}

#[tokio::test]
async fn test_shutdown_fails_queued_requests() {
    let link = MockLink::new();
    link.hang_writes(target());
    let config = fast_config().with_retry(RetryConfig {
        listener_delay_ms: 10,
        sender_extra_attempts: 0,
        sender_delay_ms: 5,
    });
    let (handle, _sink, task) = start(config, &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    let in_flight = handle.enqueue(target(), b"a".to_vec()).unwrap();
    within(handle.wait_for_mode(GatewayMode::Sending)).await.unwrap();
    let queued = handle.enqueue(target(), b"b".to_vec()).unwrap();

    handle.shutdown();
    within(task).await.unwrap();

    assert!(matches!(
        within(in_flight).await,
        Err(GatewayError::Write { .. })
    ));
    assert_eq!(within(queued).await.unwrap_err(), GatewayError::Shutdown);
    assert_eq!(
        handle.enqueue(target(), b"c".to_vec()).unwrap_err(),
        GatewayError::Shutdown
    );
    assert_eq!(handle.mode(), GatewayMode::Idle);
    assert_eq!(link.active(), 0);
}

#[tokio::test]
async fn test_dropping_handles_stops_gateway() {
    let link = MockLink::new();
    let (handle, _sink, task) = start(fast_config(), &link);
    within(handle.wait_for_mode(GatewayMode::Listening)).await.unwrap();

    drop(handle);
    within(task).await.unwrap();
    assert_eq!(link.active(), 0);
    assert!(!link.is_subscribed(listener()));
}
