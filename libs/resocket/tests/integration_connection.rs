//! Integration tests for connection lifecycle management
//!
//! These tests drive the connection through an in-memory transport and
//! tokio's paused clock.

mod common;

use common::*;
use resocket::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const URL: &str = "ws://fake.test/socket";

fn fake(network: &FakeNetwork) -> ConnectionBuilder<states::HasUrl> {
    resocket::builder().url(URL).transport_factory(network.clone())
}

#[tokio::test(start_paused = true)]
async fn test_connection_full_lifecycle() {
    verbose_println!("Testing full connection lifecycle...");

    let network = FakeNetwork::new();
    let connection = fake(&network).build().unwrap();
    let events = record(&connection, &[EventType::Open, EventType::Close]);

    settle().await;
    assert_eq!(connection.state(), ConnectionState::Connecting);
    assert_eq!(network.count(), 1);
    assert_eq!(network.last().url, URL);
    assert_eq!(connection.url().as_deref(), Some(URL));
    assert_eq!(connection.ready_state(), Some(ReadyState::Connecting));
    verbose_println!("  State: Connecting");

    network.last().open();
    settle().await;
    assert_eq!(connection.state(), ConnectionState::Open);
    assert!(connection.is_open());
    assert!(connection.last_connection().is_some());
    verbose_println!("  State: Open");

    connection.close(None, None);
    settle().await;
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(connection.is_closed_by_user());
    assert_eq!(network.last().closes(), vec![(None, None)]);
    verbose_println!("  State: Closed");

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], Event::Open);
    match &events[1] {
        Event::Close(detail) => {
            assert_eq!(detail.code, CLOSE_NORMAL);
            assert!(detail.was_clean);
        }
        other => panic!("expected close, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent() {
    let network = FakeNetwork::new();
    let connection = fake(&network).build().unwrap();
    let closes = record(&connection, &[EventType::Close]);

    settle().await;
    network.last().open();
    settle().await;

    connection.close(Some(4100), Some("done"));
    connection.close(Some(4200), Some("again"));
    settle().await;
    connection.close(None, None);
    settle().await;

    assert_eq!(
        network.last().closes(),
        vec![(Some(4100), Some("done".to_string()))]
    );
    assert_eq!(closes.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_while_resolving_url_dispatches_close() {
    let network = FakeNetwork::new();
    let connection = resocket::builder()
        .url_provider(FnUrlProvider::new(|| std::future::pending::<Result<String>>()))
        .transport_factory(network.clone())
        .build()
        .unwrap();
    let closes = record(&connection, &[EventType::Close]);

    settle().await;
    assert_eq!(network.count(), 0);

    connection.close(Some(4100), Some("never mind"));
    settle().await;

    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(network.count(), 0);
    let closes = closes.lock();
    assert_eq!(closes.len(), 1);
    assert!(matches!(
        &closes[0],
        Event::Close(detail) if detail.code == 4100 && detail.reason == "never mind"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_send_writes_frame_when_open() {
    let network = FakeNetwork::new();
    let connection = fake(&network).build().unwrap();
    settle().await;
    network.last().open();
    settle().await;

    connection.send(WsMessage::from("hello")).unwrap();
    connection.send(WsMessage::Binary(vec![1, 2, 3])).unwrap();
    settle().await;

    assert_eq!(
        network.last().sent(),
        vec![WsMessage::from("hello"), WsMessage::Binary(vec![1, 2, 3])]
    );
}

#[tokio::test(start_paused = true)]
async fn test_send_after_close_is_ignored() {
    let network = FakeNetwork::new();
    let connection = fake(&network).buffer(ArrayQueue::new()).build().unwrap();
    settle().await;
    network.last().open();
    settle().await;

    connection.close(None, None);
    assert!(connection.send(WsMessage::from("late")).is_ok());
    settle().await;

    assert!(network.last().sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_incoming_frames_reach_message_listeners() {
    let network = FakeNetwork::new();
    let connection = fake(&network).build().unwrap();
    let messages = record(&connection, &[EventType::Message]);

    settle().await;
    let socket = network.last();
    socket.open();
    socket.receive("one");
    socket.receive(WsMessage::Binary(vec![9]));
    settle().await;

    assert_eq!(
        *messages.lock(),
        vec![
            Event::Message(WsMessage::from("one")),
            Event::Message(WsMessage::Binary(vec![9])),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_bypasses_backoff() {
    let network = FakeNetwork::new();
    let connection = fake(&network)
        .backoff(ConstantBackoff::new(Duration::from_secs(10)))
        .build()
        .unwrap();
    let retries = record(&connection, &[EventType::Retry]);

    settle().await;
    let first = network.last();
    first.open();
    settle().await;

    connection.reconnect();
    settle().await;

    assert_eq!(network.count(), 2);
    assert!(first.is_detached());
    assert_eq!(first.closes(), vec![(None, None)]);
    assert_eq!(connection.state(), ConnectionState::Connecting);
    assert!(retries.lock().is_empty());

    network.last().open();
    settle().await;
    assert!(connection.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_user_close() {
    let network = FakeNetwork::new();
    let connection = fake(&network).build().unwrap();
    settle().await;
    network.last().open();
    settle().await;

    connection.close(None, None);
    settle().await;
    assert!(connection.is_closed_by_user());

    connection.reconnect();
    assert!(!connection.is_closed_by_user());
    settle().await;

    assert_eq!(network.count(), 2);
    network.last().open();
    settle().await;
    assert!(connection.is_open());

    connection.send(WsMessage::from("back")).unwrap();
    settle().await;
    assert_eq!(network.last().sent(), vec![WsMessage::from("back")]);
}

#[tokio::test(start_paused = true)]
async fn test_once_listener_fires_once() {
    let network = FakeNetwork::new();
    let connection = fake(&network).build().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    connection.add_event_listener(
        EventType::Message,
        events::listener::<WsMessage, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        ListenerOptions::once(),
    );

    settle().await;
    let socket = network.last();
    socket.open();
    socket.receive("a");
    socket.receive("b");
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_removed_listener_is_not_called() {
    let network = FakeNetwork::new();
    let connection = fake(&network).build().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let listener = connection.on(EventType::Message, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    settle().await;
    let socket = network.last();
    socket.open();
    socket.receive("a");
    settle().await;

    // Options must match for removal
    assert!(!connection.remove_event_listener(EventType::Message, &listener, ListenerOptions::once()));
    assert!(connection.remove_event_listener(EventType::Message, &listener, ListenerOptions::default()));

    socket.receive("b");
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_builder_listeners_see_first_open() {
    let network = FakeNetwork::new();
    let opened = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&opened);
    let _connection = fake(&network)
        .on_open(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    settle().await;
    network.last().open();
    settle().await;

    assert_eq!(opened.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_url_provider_called_per_attempt() {
    let network = FakeNetwork::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let connection = resocket::builder()
        .url_provider(FnUrlProvider::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, ResocketError>(format!("ws://fake.test/socket?token={}", n)) }
        }))
        .backoff(ConstantBackoff::new(Duration::from_millis(10)))
        .transport_factory(network.clone())
        .build()
        .unwrap();

    settle().await;
    network.last().open();
    settle().await;
    network.last().drop_connection();
    settle().await;
    advance(10).await;

    assert_eq!(
        network.urls(),
        vec![
            "ws://fake.test/socket?token=1".to_string(),
            "ws://fake.test/socket?token=2".to_string(),
        ]
    );
    assert_eq!(connection.url().as_deref(), Some("ws://fake.test/socket?token=2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_url_resolution_failure_is_retried() {
    let network = FakeNetwork::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let connection = resocket::builder()
        .url_provider(FnUrlProvider::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ResocketError::UrlResolution("token service down".into()))
                } else {
                    Ok::<_, ResocketError>(URL.to_string())
                }
            }
        }))
        .backoff(ConstantBackoff::new(Duration::from_millis(20)))
        .transport_factory(network.clone())
        .build()
        .unwrap();
    let events = record(&connection, &[EventType::Error, EventType::Close, EventType::Retry]);

    settle().await;
    assert_eq!(network.count(), 0);
    {
        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), EventType::Error);
        assert!(matches!(&events[1], Event::Close(detail) if detail.code == CLOSE_ABNORMAL));
    }

    advance(20).await;
    assert_eq!(network.count(), 1);
    assert_eq!(events.lock().last().map(Event::event_type), Some(EventType::Retry));
}

#[tokio::test(start_paused = true)]
async fn test_empty_provider_url_is_an_error() {
    let network = FakeNetwork::new();
    let connection = resocket::builder()
        .url_provider(FnUrlProvider::new(|| async { Ok::<_, ResocketError>(String::new()) }))
        .transport_factory(network.clone())
        .build()
        .unwrap();
    let errors = record(&connection, &[EventType::Error]);

    settle().await;
    assert_eq!(network.count(), 0);
    assert_eq!(errors.lock().len(), 1);
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_json_deserialize_failure_becomes_error_event() {
    let network = FakeNetwork::new();
    let connection = fake(&network)
        .with_serializer(JsonSerializer::<serde_json::Value, serde_json::Value>::new())
        .build()
        .unwrap();
    let events = record(&connection, &[EventType::Message, EventType::Error]);

    settle().await;
    let socket = network.last();
    socket.open();
    socket.receive("{not json");
    socket.receive(r#"{"op":"edit","rev":3}"#);
    settle().await;

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type(), EventType::Error);
    assert_eq!(
        events[1],
        Event::Message(serde_json::json!({"op": "edit", "rev": 3}))
    );
}

#[tokio::test(start_paused = true)]
async fn test_json_serialize_failure_returned_from_send() {
    let network = FakeNetwork::new();
    let connection = fake(&network)
        .with_serializer(JsonSerializer::<BTreeMap<Vec<u8>, u8>, serde_json::Value>::new())
        .build()
        .unwrap();
    settle().await;
    network.last().open();
    settle().await;

    let mut payload = BTreeMap::new();
    payload.insert(vec![1u8], 1u8);
    let result = connection.send(payload);
    assert!(matches!(result, Err(ResocketError::Serialization(_))));

    settle().await;
    assert!(network.last().sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transport_options_are_applied() {
    let network = FakeNetwork::new();
    let connection = fake(&network)
        .protocols(["v2.collab", "v1.collab"])
        .binary_type(BinaryType::ArrayBuffer)
        .build()
        .unwrap();
    settle().await;

    let socket = network.last();
    assert_eq!(socket.protocols, vec!["v2.collab".to_string(), "v1.collab".to_string()]);
    assert_eq!(socket.binary_type(), BinaryType::ArrayBuffer);
    assert_eq!(connection.binary_type(), Some(BinaryType::ArrayBuffer));
    assert_eq!(connection.protocols(), &["v2.collab".to_string(), "v1.collab".to_string()]);
    assert_eq!(connection.protocol().as_deref(), Some("v2.collab"));
    assert_eq!(connection.buffered_amount(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_forwards_events() {
    let network = FakeNetwork::new();
    let connection = fake(&network).build().unwrap();
    let rx = connection.subscribe(&[EventType::Open, EventType::Message]);

    settle().await;
    let socket = network.last();
    socket.open();
    socket.receive("hi");
    settle().await;

    assert_eq!(rx.try_recv().unwrap(), Event::Open);
    assert_eq!(rx.try_recv().unwrap(), Event::Message(WsMessage::from("hi")));
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_every_handle_detaches_transport() {
    let network = FakeNetwork::new();
    let connection = fake(&network).build().unwrap();
    let clone = connection.clone();
    settle().await;
    network.last().open();
    settle().await;

    drop(connection);
    settle().await;
    assert!(!network.last().is_detached());

    drop(clone);
    settle().await;
    assert!(network.last().is_detached());
    assert_eq!(network.last().ready_state(), ReadyState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_listeners_survive_serializer_swap() {
    let network = FakeNetwork::new();
    let opens = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&opens);
    let connection = fake(&network)
        .on_open(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .with_serializer(JsonSerializer::<serde_json::Value, serde_json::Value>::new())
        .build()
        .unwrap();

    settle().await;
    network.last().open();
    settle().await;

    assert!(connection.is_open());
    assert_eq!(opens.load(Ordering::SeqCst), 1);
}
