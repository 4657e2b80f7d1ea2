//! # Resocket
//!
//! A resilient WebSocket connection: a wrapper around an unreliable
//! bidirectional transport that adds automatic reconnection with pluggable
//! backoff, heartbeat liveness detection, outbound buffering while
//! disconnected, pluggable serialization and a typed event-listener API.
//!
//! ## Features
//!
//! - **Single-writer state machine**: One task owns the connection state and
//!   funnels transport, timer and caller events through one handler
//! - **Type-state builder**: The URL must be set before `build()` compiles
//! - **Pluggable seams**: Backoff, buffer, serializer, transport factory, URL provider
//! - **Deterministic testing**: Transports are injected and timers run on tokio's clock

pub mod traits;
pub mod core;

// Re-export all traits
pub use traits::*;

// Re-export core connection functionality
pub use self::core::{
    builder, config, connection, connection_state, events, heartbeat, socket,
    builder::{states, ConnectionBuilder},
    config::{BackoffSettings, ConnectionSettings, HeartbeatSettings, RetryOptions},
    connection::Connection,
    connection_state::{AtomicConnectionState, ConnectionState},
    events::{
        CloseEventDetail, ErrorEventDetail, Event, EventType, HeartbeatEventDetail,
        HeartbeatMissedEventDetail, Listener, ListenerOptions, ReconnectEventDetail,
        RetryEventDetail,
    },
    heartbeat::{HeartbeatOptions, CLOSE_HEARTBEAT_TIMEOUT},
    socket::TungsteniteFactory,
};
