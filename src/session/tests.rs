//! Session scenarios driven through fake transports.
//!
//! Timer-dependent tests run on a paused tokio clock; `settle` lets every
//! spawned task drain before assertions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use super::*;

use crate::clock::ManualClock;
use crate::transport::{
    DuplexLink, EventStream, LinkCommand, LinkEndpoint, LinkEvent, StreamFault, TransportEvent,
};

// ============================================================================
// Fakes
// ============================================================================

/// Pull connector whose streams are fed by the test.
struct FakePull {
    opened: mpsc::UnboundedSender<mpsc::UnboundedSender<TransportEvent>>,
    refuse: AtomicBool,
}

#[async_trait]
impl PullConnector for FakePull {
    async fn open(&self) -> Result<EventStream> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::connection("refused"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.opened.send(tx);
        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(events.boxed())
    }
}

/// Duplex connector handing link endpoints to the test.
struct FakeDuplex {
    links: mpsc::UnboundedSender<LinkEndpoint>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

impl FakeDuplex {
    fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DuplexConnector for FakeDuplex {
    async fn connect(&self) -> Result<DuplexLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::connection("refused"));
        }

        let (link, endpoint) = DuplexLink::pair();
        let _ = self.links.send(endpoint);
        Ok(link)
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    manager: SessionManager,
    clock: ManualClock,
    pull: Arc<FakePull>,
    duplex: Arc<FakeDuplex>,
    pulls: mpsc::UnboundedReceiver<mpsc::UnboundedSender<TransportEvent>>,
    links: mpsc::UnboundedReceiver<LinkEndpoint>,
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn harness() -> Harness {
    harness_with(SessionConfig::builder().build().unwrap(), false)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness_with(config: SessionConfig, refuse: bool) -> Harness {
    init_tracing();

    let (opened_tx, pulls) = mpsc::unbounded_channel();
    let (links_tx, links) = mpsc::unbounded_channel();
    let clock = ManualClock::new(start_time());

    let pull = Arc::new(FakePull {
        opened: opened_tx,
        refuse: AtomicBool::new(false),
    });
    let duplex = Arc::new(FakeDuplex {
        links: links_tx,
        refuse: AtomicBool::new(refuse),
        attempts: AtomicUsize::new(0),
    });

    let manager = SessionManager::with_connectors(
        &config,
        pull.clone(),
        duplex.clone(),
        Arc::new(clock.clone()),
    );

    Harness {
        manager,
        clock,
        pull,
        duplex,
        pulls,
        links,
    }
}

async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

fn stream_data(text: &str) -> LinkEvent {
    LinkEvent::Event {
        name: "streamData".into(),
        payload: json!({ "text": text }),
    }
}

fn start_command() -> Option<LinkCommand> {
    Some(LinkCommand::Emit {
        name: "startStream".into(),
        args: vec![],
    })
}

fn stop_command() -> Option<LinkCommand> {
    Some(LinkCommand::Emit {
        name: "stopStream".into(),
        args: vec![],
    })
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(TryRecvError::Lagged(_)) => {}
            Err(_) => return drained,
        }
    }
}

impl Harness {
    /// Accepts the next link and completes its namespace handshake.
    async fn connect(&mut self) -> LinkEndpoint {
        let endpoint = self.links.recv().await.unwrap();
        endpoint.events.send(LinkEvent::Connected).unwrap();
        settle().await;
        endpoint
    }

    /// Starts the SSE stream and returns the feed of its handle.
    async fn open_sse(&mut self) -> mpsc::UnboundedSender<TransportEvent> {
        self.manager.start_stream(StreamKind::Sse).await.unwrap();
        self.pulls.recv().await.unwrap()
    }

    /// Starts the Socket stream on a connected link.
    async fn open_socket(&mut self, endpoint: &mut LinkEndpoint) {
        self.manager.start_stream(StreamKind::Socket).await.unwrap();
        assert_eq!(endpoint.commands.recv().await, start_command());
    }
}

// ============================================================================
// Stream Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sse_chunks_then_done() {
    let mut h = harness();
    let _link = h.connect().await;
    let feed = h.open_sse().await;

    assert_eq!(h.manager.state(StreamKind::Sse), TransportState::Connecting);
    assert_eq!(h.manager.status(StreamKind::Sse), "Connecting...");

    for (text, size) in [("a", 10), ("b", 20), ("c", 30)] {
        feed.send(TransportEvent::data(text, size)).unwrap();
    }
    settle().await;
    assert_eq!(h.manager.state(StreamKind::Sse), TransportState::Active);

    feed.send(TransportEvent::Closed).unwrap();
    settle().await;

    let stats = h.manager.stats(StreamKind::Sse);
    assert_eq!(stats.message_count, 3);
    assert_eq!(stats.bytes_sent, 60);
    assert_eq!(stats.average_message_size, 20);
    assert_eq!(h.manager.state(StreamKind::Sse), TransportState::Idle);
    assert_eq!(h.manager.message_count(), 3);
    assert_eq!(h.manager.content(StreamKind::Sse), "abc");
    assert_eq!(h.manager.last_message(StreamKind::Sse).as_deref(), Some("c"));
    assert_eq!(h.manager.last_error(), None);
    assert_eq!(h.manager.ledger().read().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_elapsed_time() {
    let mut h = harness();
    let _link = h.connect().await;
    let feed = h.open_sse().await;

    feed.send(TransportEvent::data("x", 5)).unwrap();
    settle().await;
    h.clock.advance(Duration::from_millis(12_400));

    assert_eq!(h.manager.status(StreamKind::Sse), "Active (12s, 1 msgs)");
    assert_eq!(h.manager.status(StreamKind::Socket), "Inactive");
}

#[tokio::test(start_paused = true)]
async fn test_restart_resets_stats_and_ignores_old_handle() {
    let mut h = harness();
    let _link = h.connect().await;
    let old = h.open_sse().await;
    old.send(TransportEvent::data("first", 7)).unwrap();
    settle().await;

    let new = h.open_sse().await;
    assert_eq!(h.manager.stats(StreamKind::Sse).message_count, 0);
    assert_eq!(h.manager.content(StreamKind::Sse), "");

    let _ = old.send(TransportEvent::data("stale", 5));
    new.send(TransportEvent::data("fresh", 5)).unwrap();
    settle().await;

    let stats = h.manager.stats(StreamKind::Sse);
    assert_eq!(stats.message_count, 1);
    assert_eq!(h.manager.content(StreamKind::Sse), "fresh");
}

#[tokio::test(start_paused = true)]
async fn test_socket_restart_stops_previous_server_stream() {
    let mut h = harness();
    let mut link = h.connect().await;
    h.open_socket(&mut link).await;
    link.events.send(stream_data("old")).unwrap();
    settle().await;

    h.manager.start_stream(StreamKind::Socket).await.unwrap();

    assert_eq!(link.commands.recv().await, stop_command());
    assert_eq!(link.commands.recv().await, start_command());
    assert_eq!(h.manager.state(StreamKind::Socket), TransportState::Connecting);
    assert_eq!(h.manager.stats(StreamKind::Socket).message_count, 0);
    assert_eq!(h.manager.content(StreamKind::Socket), "");
}

#[tokio::test(start_paused = true)]
async fn test_first_start_sends_no_stop() {
    let mut h = harness();
    let mut link = h.connect().await;

    h.open_socket(&mut link).await;

    assert!(link.commands.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_stop_idle_stream_is_noop() {
    let h = harness();

    h.manager.stop_stream(StreamKind::Sse).await.unwrap();
    h.manager.stop_stream(StreamKind::Socket).await.unwrap();

    assert_eq!(h.manager.state(StreamKind::Sse), TransportState::Idle);
    assert_eq!(h.manager.state(StreamKind::Socket), TransportState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_stopped_socket_ignores_late_events() {
    let mut h = harness();
    let mut link = h.connect().await;
    h.open_socket(&mut link).await;

    link.events.send(stream_data("one")).unwrap();
    settle().await;
    assert_eq!(h.manager.state(StreamKind::Socket), TransportState::Active);

    h.manager.stop_stream(StreamKind::Socket).await.unwrap();
    assert_eq!(link.commands.recv().await, stop_command());

    link.events.send(stream_data("late")).unwrap();
    settle().await;

    assert_eq!(h.manager.state(StreamKind::Socket), TransportState::Idle);
    assert_eq!(h.manager.stats(StreamKind::Socket).message_count, 1);
    assert_eq!(h.manager.message_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_socket_stream_end_is_not_an_error() {
    let mut h = harness();
    let mut link = h.connect().await;
    h.open_socket(&mut link).await;

    link.events.send(stream_data("x")).unwrap();
    link.events
        .send(LinkEvent::Event {
            name: "streamEnd".into(),
            payload: serde_json::Value::Null,
        })
        .unwrap();
    settle().await;

    assert_eq!(h.manager.state(StreamKind::Socket), TransportState::Idle);
    assert_eq!(h.manager.last_error(), None);
    assert!(!h.manager.snapshot().socket.desired);
}

#[tokio::test(start_paused = true)]
async fn test_socket_start_waits_for_link() {
    let mut h = harness();
    let mut link = h.links.recv().await.unwrap();

    h.manager.start_stream(StreamKind::Socket).await.unwrap();
    settle().await;
    assert!(link.commands.try_recv().is_err());

    link.events.send(LinkEvent::Connected).unwrap();
    settle().await;
    assert_eq!(link.commands.recv().await, start_command());
}

#[tokio::test(start_paused = true)]
async fn test_state_changes_are_broadcast() {
    let mut h = harness();
    let _link = h.connect().await;
    let mut events = h.manager.subscribe();

    let feed = h.open_sse().await;
    feed.send(TransportEvent::data("x", 3)).unwrap();
    settle().await;

    let events = drain(&mut events);
    assert!(events.contains(&SessionEvent::StateChanged {
        kind: StreamKind::Sse,
        from: TransportState::Idle,
        to: TransportState::Connecting,
    }));
    assert!(events.contains(&SessionEvent::MessageReceived {
        kind: StreamKind::Sse,
        content: "x".into(),
        size: 3,
    }));
}

// ============================================================================
// Faults
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_parse_failure_keeps_stream_running() {
    let mut h = harness();
    let _link = h.connect().await;
    let feed = h.open_sse().await;

    feed.send(TransportEvent::data("ok", 4)).unwrap();
    feed.send(TransportEvent::Error(StreamFault::Parse("parse failure: eof".into())))
        .unwrap();
    settle().await;

    let snapshot = h.manager.snapshot();
    assert_eq!(snapshot.sse.state, TransportState::Active);
    assert_eq!(snapshot.parse_failures, 1);
    assert_eq!(snapshot.connectivity.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn test_sse_remote_error_releases_stream() {
    let mut h = harness();
    let _link = h.connect().await;
    let feed = h.open_sse().await;

    feed.send(TransportEvent::Error(StreamFault::Remote("boom".into())))
        .unwrap();
    settle().await;

    assert_eq!(h.manager.state(StreamKind::Sse), TransportState::Idle);
    assert!(h.manager.last_error().unwrap().contains("boom"));
    // Connected link: nothing to recover.
    assert_eq!(h.manager.connection_status().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_sse_error_while_disconnected_schedules_duplex_reconnect() {
    let mut h = harness_with(SessionConfig::builder().build().unwrap(), true);
    settle().await;
    assert!(h.manager.last_error().unwrap().starts_with("Connection error:"));

    let mut events = h.manager.subscribe();
    let feed = h.open_sse().await;
    feed.send(TransportEvent::Error(StreamFault::Transport("reset".into())))
        .unwrap();
    settle().await;

    assert_eq!(h.manager.state(StreamKind::Sse), TransportState::Idle);
    assert!(drain(&mut events).contains(&SessionEvent::ReconnectScheduled {
        attempt: 1,
        delay: Duration::from_millis(1000),
    }));
}

#[tokio::test(start_paused = true)]
async fn test_sse_open_failure_releases_stream() {
    let mut h = harness();
    let _link = h.connect().await;
    h.pull.refuse.store(true, Ordering::SeqCst);

    h.manager.start_stream(StreamKind::Sse).await.unwrap();
    settle().await;

    assert_eq!(h.manager.state(StreamKind::Sse), TransportState::Idle);
    assert_eq!(
        h.manager.last_error().as_deref(),
        Some("SSE stream error: Connection failed: refused")
    );
    assert!(!h.manager.snapshot().sse.desired);
}

#[tokio::test(start_paused = true)]
async fn test_clear_error_keeps_stream_state() {
    let mut h = harness();
    let link = h.connect().await;
    let feed = h.open_sse().await;
    feed.send(TransportEvent::data("x", 1)).unwrap();
    link.events
        .send(LinkEvent::Error {
            message: "transport error".into(),
        })
        .unwrap();
    settle().await;

    assert_eq!(
        h.manager.last_error().as_deref(),
        Some("Socket connection error occurred: transport error")
    );

    h.manager.clear_error().await.unwrap();

    assert_eq!(h.manager.last_error(), None);
    assert!(h.manager.is_connected());
    assert_eq!(h.manager.state(StreamKind::Sse), TransportState::Active);
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_max_retries_stops_both_streams() {
    let mut h = harness();
    let mut link = h.connect().await;
    assert!(h.manager.is_connected());

    let _sse = h.open_sse().await;
    h.open_socket(&mut link).await;
    link.events.send(stream_data("hello")).unwrap();
    settle().await;
    assert_eq!(h.manager.state(StreamKind::Socket), TransportState::Active);

    let mut events = h.manager.subscribe();
    h.duplex.refuse(true);
    link.events
        .send(LinkEvent::Disconnected {
            reason: "transport close".into(),
        })
        .unwrap();
    settle().await;

    assert!(!h.manager.is_connected());
    assert_eq!(h.manager.state(StreamKind::Socket), TransportState::Erroring);
    assert_eq!(
        h.manager.last_error().as_deref(),
        Some("Connection lost. Attempting to reconnect...")
    );

    sleep(Duration::from_millis(990)).await;
    assert_eq!(h.duplex.attempts(), 1);

    sleep(Duration::from_millis(6_100)).await;
    assert_eq!(h.duplex.attempts(), 4);
    assert_eq!(h.manager.state(StreamKind::Sse), TransportState::Idle);
    assert_eq!(h.manager.state(StreamKind::Socket), TransportState::Idle);
    assert_eq!(
        h.manager.last_error().as_deref(),
        Some("Maximum reconnection attempts reached (3)")
    );

    let events = drain(&mut events);
    let delays: Vec<u128> = events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::ReconnectScheduled { delay, .. } => Some(delay.as_millis()),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![1000, 2000, 4000]);
    assert!(events.contains(&SessionEvent::RetriesExhausted { attempts: 3 }));

    // Nothing left to recover.
    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.duplex.attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resubscribes_socket() {
    let mut h = harness();
    let mut link = h.connect().await;
    h.open_socket(&mut link).await;
    link.events.send(stream_data("before")).unwrap();
    settle().await;

    link.events
        .send(LinkEvent::Disconnected {
            reason: "ping timeout".into(),
        })
        .unwrap();
    settle().await;
    assert_eq!(h.manager.connection_status().reconnect_attempts, 1);

    sleep(Duration::from_millis(1000)).await;
    let mut link = h.connect().await;

    assert_eq!(link.commands.recv().await, start_command());
    assert!(h.manager.is_connected());
    assert_eq!(h.manager.last_error(), None);
    assert_eq!(h.manager.connection_status().reconnect_attempts, 0);
    assert_eq!(h.manager.state(StreamKind::Socket), TransportState::Connecting);
    // The logical session continues across the reconnect.
    assert_eq!(h.manager.stats(StreamKind::Socket).message_count, 1);

    link.events.send(stream_data("after")).unwrap();
    settle().await;
    assert_eq!(h.manager.state(StreamKind::Socket), TransportState::Active);
    assert_eq!(h.manager.content(StreamKind::Socket), "beforeafter");
}

#[tokio::test(start_paused = true)]
async fn test_lost_link_without_streams_is_not_retried() {
    let mut h = harness();
    let link = h.connect().await;

    link.events
        .send(LinkEvent::Disconnected {
            reason: "io server disconnect".into(),
        })
        .unwrap();
    settle().await;
    sleep(Duration::from_secs(30)).await;

    assert!(!h.manager.is_connected());
    assert_eq!(h.duplex.attempts(), 1);
    assert_eq!(h.manager.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_while_connected_is_noop() {
    let mut h = harness();
    let _link = h.connect().await;
    let before = h.manager.snapshot();

    h.manager.manual_reconnect().await.unwrap();
    settle().await;

    assert_eq!(h.manager.snapshot(), before);
    assert_eq!(h.duplex.attempts(), 1);
    assert!(h.links.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_bypasses_backoff() {
    let mut h = harness();
    let mut link = h.connect().await;
    h.open_socket(&mut link).await;

    link.events
        .send(LinkEvent::Disconnected {
            reason: "transport close".into(),
        })
        .unwrap();
    settle().await;

    h.manager.manual_reconnect().await.unwrap();
    let _link = h.connect().await;
    assert_eq!(h.duplex.attempts(), 2);
    assert!(h.manager.is_connected());

    // The pending backoff timer was cancelled.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.duplex.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_start_stream_rearms_exhausted_budget() {
    let config = SessionConfig::builder().max_retries(1).build().unwrap();
    let mut h = harness_with(config, false);
    let mut link = h.connect().await;
    h.open_socket(&mut link).await;

    h.duplex.refuse(true);
    link.events
        .send(LinkEvent::Disconnected {
            reason: "transport close".into(),
        })
        .unwrap();
    sleep(Duration::from_millis(1_100)).await;
    assert_eq!(
        h.manager.last_error().as_deref(),
        Some("Maximum reconnection attempts reached (1)")
    );

    h.duplex.refuse(false);
    h.manager.start_stream(StreamKind::Socket).await.unwrap();
    assert_eq!(h.manager.connection_status().reconnect_attempts, 0);
    assert_eq!(h.manager.last_error(), None);

    let mut link = h.connect().await;
    assert_eq!(link.commands.recv().await, start_command());
}

// ============================================================================
// Data Management
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_duplicate_content_is_stored_once() {
    let mut h = harness();
    let mut link = h.connect().await;
    h.open_socket(&mut link).await;

    link.events.send(stream_data("A")).unwrap();
    link.events.send(stream_data("A")).unwrap();
    settle().await;

    assert_eq!(h.manager.ledger().read().len(), 1);
    assert_eq!(h.manager.message_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_message_rate_follows_window() {
    let mut h = harness();
    let _link = h.connect().await;
    let feed = h.open_sse().await;

    for i in 0..10 {
        feed.send(TransportEvent::data(format!("m{i}"), 1)).unwrap();
    }
    sleep(Duration::from_millis(1_001)).await;
    assert_eq!(h.manager.message_rate(), 2);

    h.clock.advance(Duration::from_secs(6));
    sleep(Duration::from_millis(1_001)).await;
    assert_eq!(h.manager.message_rate(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_clear_all_data() {
    let mut h = harness();
    let _link = h.connect().await;
    let feed = h.open_sse().await;
    feed.send(TransportEvent::data("keep me", 9)).unwrap();
    settle().await;

    h.manager.clear_all_data().await.unwrap();

    let snapshot = h.manager.snapshot();
    assert_eq!(snapshot.message_count, 0);
    assert_eq!(snapshot.message_rate, 0);
    assert_eq!(snapshot.sse.state, TransportState::Idle);
    assert_eq!(snapshot.sse.stats, StreamStats::default());
    assert_eq!(snapshot.sse.content, "");
    assert_eq!(snapshot.sse.last_message, None);
    assert_eq!(h.manager.ledger().read().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_everything() {
    let mut h = harness();
    let mut link = h.connect().await;
    let _feed = h.open_sse().await;
    h.open_socket(&mut link).await;

    h.manager.disconnect().await.unwrap();

    assert_eq!(link.commands.recv().await, stop_command());
    assert_eq!(link.commands.recv().await, Some(LinkCommand::Close));
    assert!(!h.manager.is_connected());
    assert_eq!(h.manager.state(StreamKind::Sse), TransportState::Idle);
    assert_eq!(h.manager.state(StreamKind::Socket), TransportState::Idle);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.duplex.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_export_through_manager() {
    let mut h = harness();
    let _link = h.connect().await;
    let feed = h.open_sse().await;
    feed.send(TransportEvent::data("hello", 5)).unwrap();
    settle().await;
    h.clock.advance(Duration::from_secs(61));

    let export = h.manager.export(&MessageFilter::default());
    assert_eq!(export.session_info.total_messages, 1);
    assert_eq!(export.session_info.duration, "0h 1m 1s");
    assert_eq!(export.messages[0].content, "hello");

    let groups = h
        .manager
        .grouped_messages(&MessageFilter::default(), GroupMode::ByKind);
    assert_eq!(groups[0].label, "SSE");

    h.manager.clear_messages();
    assert!(h.manager.messages(&MessageFilter::default()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_session() {
    let h = harness();
    let watch = h.manager.watch();

    h.manager.shutdown().await.unwrap();

    assert!(matches!(
        h.manager.start_stream(StreamKind::Sse).await,
        Err(Error::SessionClosed)
    ));
    assert!(!watch.borrow().connectivity.connected);
}
