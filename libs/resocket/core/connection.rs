use crate::core::config::{ConnectionConfig, RetryOptions};
use crate::core::connection_state::{AtomicConnectionState, ConnectionState};
use crate::core::events::*;
use crate::core::heartbeat::{HeartbeatMonitor, HeartbeatSignal, CLOSE_HEARTBEAT_TIMEOUT};
use crate::traits::*;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

/// Internal command messages for connection control
enum Command<T> {
    /// Deliver or stage a payload; `frame` is its serialized form
    Send { payload: T, frame: WsMessage },
    /// Close permanently
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
    /// Drop the current transport and connect again right away
    Reconnect,
}

/// State shared between connection handles and the connection task
struct Shared<S>
where
    S: Serializer,
{
    serializer: S,
    listeners: ListenerRegistry<S::Inbound>,
    state: AtomicConnectionState,
    /// The single transport currently owned by the connection
    transport: Mutex<Option<Box<dyn Transport>>>,
    url: Mutex<Option<String>>,
    last_connection: Mutex<Option<DateTime<Utc>>>,
    closed_by_user: AtomicBool,
    protocols: Vec<String>,
}

/// Resilient WebSocket connection
///
/// A cheap, cloneable handle to a connection task that:
/// - Owns exactly one transport at a time and funnels all of its events
///   through a single handler
/// - Schedules retries through a pluggable backoff
/// - Buffers outbound payloads while not open
/// - Probes liveness with heartbeats while open
///
/// `send`, `close` and `reconnect` never wait: they enqueue work for the
/// connection task and return. Network failures are never returned from
/// these calls; they show up as `error` and `close` events.
///
/// # Type Parameters
/// - `S`: Serializer converting payloads to and from frames
pub struct Connection<S = Identity>
where
    S: Serializer,
{
    shared: Arc<Shared<S>>,
    commands: UnboundedSender<Command<S::Outbound>>,
}

impl<S> Clone for Connection<S>
where
    S: Serializer,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            commands: self.commands.clone(),
        }
    }
}

impl<S> Connection<S>
where
    S: Serializer,
{
    /// Start the connection task
    ///
    /// This is called by the builder's `build()` method.
    /// Use `resocket::builder()` to create a connection.
    pub(crate) fn spawn(config: ConnectionConfig<S>) -> Self {
        let ConnectionConfig {
            url,
            protocols,
            retry,
            backoff,
            buffer,
            heartbeat,
            serializer,
            binary_type,
            transport_factory,
            listeners,
        } = config;

        let binary_type = binary_type.or_else(|| serializer.binary_type());
        let shared = Arc::new(Shared {
            serializer,
            listeners: ListenerRegistry::new(),
            state: AtomicConnectionState::new(ConnectionState::Connecting),
            transport: Mutex::new(None),
            url: Mutex::new(None),
            last_connection: Mutex::new(None),
            closed_by_user: AtomicBool::new(false),
            protocols,
        });
        for (event_type, listener, options) in listeners {
            shared.listeners.add(event_type, listener, options);
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = ConnectionTask {
            shared: Arc::clone(&shared),
            url_source: url,
            factory: transport_factory,
            binary_type,
            retry,
            backoff,
            buffer,
            heartbeat: heartbeat.map(HeartbeatMonitor::new),
            commands: command_rx,
            events: None,
            resolving: None,
            retry_timer: None,
            closed_by_user: false,
            retried_since_open: false,
        };
        tokio::spawn(task.run());

        Self {
            shared,
            commands: command_tx,
        }
    }

    /// Send a payload
    ///
    /// The payload is serialized immediately, so serializer failures are
    /// returned here. If the connection is open the frame is written;
    /// otherwise the payload is staged in the buffer, or dropped when no
    /// buffer is configured. No-op after [`close`](Self::close).
    pub fn send(&self, payload: S::Outbound) -> Result<()> {
        if self.shared.closed_by_user.load(Ordering::Acquire) {
            debug!("Send ignored, connection was closed by user");
            return Ok(());
        }
        let frame = self.shared.serializer.serialize(&payload)?;
        self.commands
            .send(Command::Send { payload, frame })
            .map_err(|e| ResocketError::ChannelSend(e.to_string()))
    }

    /// Close the connection permanently
    ///
    /// Cancels any scheduled retry, stops heartbeats and closes the
    /// transport. Idempotent.
    pub fn close(&self, code: Option<u16>, reason: Option<&str>) {
        if self.shared.closed_by_user.swap(true, Ordering::AcqRel) {
            debug!("Close ignored, connection already closed by user");
            return;
        }
        if let Err(e) = self.commands.send(Command::Close {
            code,
            reason: reason.map(str::to_string),
        }) {
            debug!("Failed to send close command (task exited): {}", e);
        }
    }

    /// Drop the current transport and connect again immediately,
    /// bypassing any backoff delay
    pub fn reconnect(&self) {
        self.shared.closed_by_user.store(false, Ordering::Release);
        if let Err(e) = self.commands.send(Command::Reconnect) {
            debug!("Failed to send reconnect command (task exited): {}", e);
        }
    }

    /// Register a listener for an event type
    pub fn add_event_listener(
        &self,
        event_type: EventType,
        listener: Listener<S::Inbound>,
        options: ListenerOptions,
    ) {
        self.shared.listeners.add(event_type, listener, options);
    }

    /// Unregister a listener previously added with the same options
    pub fn remove_event_listener(
        &self,
        event_type: EventType,
        listener: &Listener<S::Inbound>,
        options: ListenerOptions,
    ) -> bool {
        self.shared.listeners.remove(event_type, listener, options)
    }

    /// Register a closure with default options, returning the listener
    /// handle needed to remove it later
    pub fn on<F>(&self, event_type: EventType, f: F) -> Listener<S::Inbound>
    where
        F: Fn(&Event<S::Inbound>) + Send + Sync + 'static,
    {
        let listener: Listener<S::Inbound> = Arc::new(f);
        self.add_event_listener(event_type, Arc::clone(&listener), ListenerOptions::default());
        listener
    }

    /// Forward events of the given types into a channel
    pub fn subscribe(&self, event_types: &[EventType]) -> crossbeam_channel::Receiver<Event<S::Inbound>>
    where
        S::Inbound: Clone,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        for &event_type in event_types {
            let tx = tx.clone();
            self.add_event_listener(
                event_type,
                Arc::new(move |event: &Event<S::Inbound>| {
                    let _ = tx.send(event.clone());
                }),
                ListenerOptions::default(),
            );
        }
        rx
    }

    /// Get current connection state
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Check if open
    #[inline]
    pub fn is_open(&self) -> bool {
        self.shared.state.is_open()
    }

    /// Whether `close()` has been called (and not undone by `reconnect()`)
    pub fn is_closed_by_user(&self) -> bool {
        self.shared.closed_by_user.load(Ordering::Acquire)
    }

    /// URL used by the most recent attempt
    pub fn url(&self) -> Option<String> {
        self.shared.url.lock().clone()
    }

    /// When the connection last reached the open state
    pub fn last_connection(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_connection.lock()
    }

    /// Bytes queued on the transport but not yet written
    pub fn buffered_amount(&self) -> usize {
        self.shared
            .transport
            .lock()
            .as_ref()
            .map_or(0, |transport| transport.buffered_amount())
    }

    /// Ready state of the current transport, if one exists
    pub fn ready_state(&self) -> Option<ReadyState> {
        self.shared
            .transport
            .lock()
            .as_ref()
            .map(|transport| transport.ready_state())
    }

    /// Binary type of the current transport, if one exists
    pub fn binary_type(&self) -> Option<BinaryType> {
        self.shared
            .transport
            .lock()
            .as_ref()
            .map(|transport| transport.binary_type())
    }

    /// Subprotocols requested on every attempt
    pub fn protocols(&self) -> &[String] {
        &self.shared.protocols
    }

    /// Subprotocol selected by the server on the current transport
    pub fn protocol(&self) -> Option<String> {
        self.shared
            .transport
            .lock()
            .as_ref()
            .and_then(|transport| transport.protocol())
    }
}

impl<S> std::fmt::Debug for Connection<S>
where
    S: Serializer,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("url", &self.url())
            .field("closed_by_user", &self.is_closed_by_user())
            .finish()
    }
}

/// A retry waiting for its delay to elapse
struct ScheduledRetry {
    sleep: Pin<Box<Sleep>>,
    detail: RetryEventDetail,
}

/// One iteration's worth of work for the connection task
enum Step<T> {
    Command(Option<Command<T>>),
    Transport(Option<TransportEvent>),
    Resolved(Result<String>),
    Heartbeat(HeartbeatSignal),
    RetryDue,
}

/// The single writer of all connection state
struct ConnectionTask<S>
where
    S: Serializer,
{
    shared: Arc<Shared<S>>,
    url_source: UrlSource,
    factory: Arc<dyn TransportFactory>,
    binary_type: Option<BinaryType>,
    retry: RetryOptions,
    backoff: Option<Box<dyn Backoff>>,
    buffer: Option<Box<dyn Buffer<S::Outbound>>>,
    heartbeat: Option<HeartbeatMonitor>,
    commands: UnboundedReceiver<Command<S::Outbound>>,
    /// Events of the current transport; replaced (detached) per attempt
    events: Option<UnboundedReceiver<TransportEvent>>,
    resolving: Option<BoxFuture<'static, Result<String>>>,
    /// At most one retry is ever outstanding
    retry_timer: Option<ScheduledRetry>,
    closed_by_user: bool,
    retried_since_open: bool,
}

impl<S> ConnectionTask<S>
where
    S: Serializer,
{
    /// Main connection task loop
    async fn run(mut self) {
        self.begin_attempt();

        loop {
            let step = tokio::select! {
                biased;
                command = self.commands.recv() => Step::Command(command),
                event = next_transport_event(&mut self.events) => Step::Transport(event),
                url = next_resolved_url(&mut self.resolving) => Step::Resolved(url),
                signal = next_heartbeat(&mut self.heartbeat) => Step::Heartbeat(signal),
                _ = retry_due(&mut self.retry_timer) => Step::RetryDue,
            };

            match step {
                Step::Command(Some(command)) => self.handle_command(command),
                Step::Command(None) => {
                    debug!("All connection handles dropped, shutting down");
                    self.shutdown();
                    break;
                }
                Step::Transport(Some(event)) => self.handle_event(event),
                Step::Transport(None) => {
                    debug!("Transport event stream ended");
                    self.events = None;
                }
                Step::Resolved(url) => {
                    self.resolving = None;
                    self.url_resolved(url);
                }
                Step::Heartbeat(signal) => self.handle_heartbeat(signal),
                Step::RetryDue => self.handle_retry(),
            }
        }

        info!("Connection task exiting");
    }

    fn dispatch(&self, event: Event<S::Inbound>) {
        self.shared.listeners.dispatch(&event);
    }

    fn current_url(&self) -> Option<String> {
        self.shared.url.lock().clone()
    }

    fn last_connection(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_connection.lock()
    }

    /// Detach from the old transport and start resolving the URL
    fn begin_attempt(&mut self) {
        self.detach_transport();
        self.resolving = Some(self.url_source.resolve());
    }

    /// Stop listening to the current transport and close it
    fn detach_transport(&mut self) {
        self.events = None;
        let transport = self.shared.transport.lock().take();
        if let Some(mut transport) = transport {
            if matches!(
                transport.ready_state(),
                ReadyState::Connecting | ReadyState::Open
            ) {
                transport.close(None, None);
            }
        }
    }

    fn url_resolved(&mut self, url: Result<String>) {
        match url {
            Ok(url) => {
                debug!("Creating transport for {}", url);
                *self.shared.url.lock() = Some(url.clone());

                let (sink, events) = EventSink::channel();
                let mut transport = self.factory.connect(&url, &self.shared.protocols, sink);
                if let Some(binary_type) = self.binary_type {
                    transport.set_binary_type(binary_type);
                }
                *self.shared.transport.lock() = Some(transport);
                self.events = Some(events);
            }
            Err(e) => {
                warn!("Failed to resolve connection URL: {}", e);
                self.handle_event(TransportEvent::Error(e.to_string()));
                self.handle_event(TransportEvent::Close {
                    code: CLOSE_ABNORMAL,
                    reason: e.to_string(),
                    was_clean: false,
                });
            }
        }
    }

    /// Central handler for transport-origin and synthesized events
    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Close {
                code,
                reason,
                was_clean,
            } => self.on_close(CloseEventDetail {
                code,
                reason,
                was_clean,
            }),
            TransportEvent::Error(message) => self.on_error(message),
            TransportEvent::Message(frame) => self.on_message(frame),
        }
    }

    fn on_open(&mut self) {
        let url = self.current_url();
        let last_connection = self.last_connection();

        let reconnect = match (self.backoff.as_mut(), last_connection) {
            (Some(backoff), Some(_)) => {
                let detail = ReconnectEventDetail {
                    retries: backoff.retries(),
                    last_connection,
                    url: url.clone(),
                };
                backoff.reset();
                Some(detail)
            }
            _ => None,
        };

        match reconnect {
            Some(detail) => {
                info!(
                    "Reconnected to {} after {} retries",
                    url.as_deref().unwrap_or("?"),
                    detail.retries
                );
                self.dispatch(Event::Reconnect(detail));
            }
            None => info!("Connected to {}", url.as_deref().unwrap_or("?")),
        }

        self.shared.state.set(ConnectionState::Open);
        *self.shared.last_connection.lock() = Some(Utc::now());
        self.retried_since_open = false;
        self.dispatch(Event::Open);

        self.drain_buffer();

        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.start();
        }
    }

    fn on_close(&mut self, detail: CloseEventDetail) {
        info!(
            "Connection closed (code {}, reason {:?}, clean {})",
            detail.code, detail.reason, detail.was_clean
        );
        self.shared.state.set(ConnectionState::Closed);
        self.dispatch(Event::Close(detail));
        self.schedule_retry_if_needed();
        self.stop_heartbeat();
    }

    fn on_error(&mut self, message: String) {
        error!("Transport error: {}", message);
        self.shared.state.set(ConnectionState::Closing);
        self.dispatch(Event::Error(ErrorEventDetail { message }));
        self.stop_heartbeat();
    }

    fn on_message(&mut self, frame: WsMessage) {
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            if heartbeat.is_pong(&frame) {
                heartbeat.pong_received();
                debug!("Heartbeat pong received");
                self.dispatch(Event::HeartbeatReceived(HeartbeatEventDetail {
                    message: frame,
                    timestamp_ms: Utc::now().timestamp_millis(),
                }));
                return;
            }
        }

        match self.shared.serializer.deserialize(frame) {
            Ok(message) => self.dispatch(Event::Message(message)),
            Err(e) => {
                error!("Failed to deserialize message: {}", e);
                self.dispatch(Event::Error(ErrorEventDetail {
                    message: e.to_string(),
                }));
            }
        }
    }

    fn handle_command(&mut self, command: Command<S::Outbound>) {
        match command {
            Command::Send { payload, frame } => self.send(payload, frame),
            Command::Close { code, reason } => self.close(code, reason),
            Command::Reconnect => {
                info!("Reconnect requested");
                self.closed_by_user = false;
                self.retry_timer = None;
                self.stop_heartbeat();
                self.shared.state.set(ConnectionState::Connecting);
                self.begin_attempt();
            }
        }
    }

    /// Write the frame if open, otherwise stage the payload or drop it
    fn send(&mut self, payload: S::Outbound, frame: WsMessage) {
        if self.closed_by_user {
            debug!("Dropping message, connection was closed by user");
            return;
        }

        // Open is only set right before the buffer drains, so a transport
        // that is already open but not yet reported still buffers
        if self.shared.state.get() == ConnectionState::Open {
            let mut transport = self.shared.transport.lock();
            if let Some(transport) = transport
                .as_mut()
                .filter(|transport| transport.ready_state() == ReadyState::Open)
            {
                if let Err(e) = transport.send(frame) {
                    warn!("Transport rejected message: {}", e);
                }
                return;
            }
        }

        match self.buffer.as_mut() {
            Some(buffer) => {
                buffer.add(payload);
                debug!("Buffered message while not open ({} pending)", buffer.len());
            }
            None => debug!("Dropping message, not open and no buffer configured"),
        }
    }

    /// Flush every staged payload, in `read()` order
    fn drain_buffer(&mut self) {
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };
        let mut staged = Vec::with_capacity(buffer.len());
        while let Some(payload) = buffer.read() {
            staged.push(payload);
        }
        if staged.is_empty() {
            return;
        }

        debug!("Flushing {} buffered messages", staged.len());
        for payload in staged {
            match self.shared.serializer.serialize(&payload) {
                Ok(frame) => self.send(payload, frame),
                Err(e) => error!("Dropping buffered message that failed to serialize: {}", e),
            }
        }
    }

    fn close(&mut self, code: Option<u16>, reason: Option<String>) {
        if self.closed_by_user {
            debug!("Connection already closed by user");
            return;
        }
        info!("Closing connection on user request");
        self.closed_by_user = true;
        self.retry_timer = None;
        self.stop_heartbeat();

        if self.resolving.take().is_some() {
            // No transport exists yet, so no close event would ever arrive
            self.on_close(CloseEventDetail {
                code: code.unwrap_or(CLOSE_NORMAL),
                reason: reason.unwrap_or_default(),
                was_clean: true,
            });
            return;
        }

        if let Some(transport) = self.shared.transport.lock().as_mut() {
            transport.close(code, reason);
        }
    }

    fn schedule_retry_if_needed(&mut self) {
        if self.closed_by_user {
            return;
        }
        if self.retry_timer.is_some() {
            debug!("Retry already scheduled");
            return;
        }
        let Some(backoff) = self.backoff.as_mut() else {
            debug!("No backoff configured, not retrying");
            return;
        };
        if let Some(max_retries) = self.retry.max_retries {
            if backoff.retries() > max_retries {
                warn!("Retry limit reached ({} retries), giving up", max_retries);
                return;
            }
        }

        let delay = if self.retry.instant_reconnect && !self.retried_since_open {
            Duration::ZERO
        } else {
            backoff.next()
        };
        self.retried_since_open = true;

        let detail = RetryEventDetail {
            retries: backoff.retries(),
            backoff_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            last_connection: self.last_connection(),
            url: self.current_url(),
        };
        info!("Reconnecting in {:?} (retry {})", delay, detail.retries);
        self.retry_timer = Some(ScheduledRetry {
            sleep: Box::pin(tokio::time::sleep(delay)),
            detail,
        });
    }

    fn handle_retry(&mut self) {
        let Some(scheduled) = self.retry_timer.take() else {
            return;
        };
        if self.closed_by_user {
            debug!("Retry suppressed, connection was closed by user");
            return;
        }

        self.shared.state.set(ConnectionState::Reconnecting);
        self.dispatch(Event::Retry(scheduled.detail));
        self.begin_attempt();
    }

    fn handle_heartbeat(&mut self, signal: HeartbeatSignal) {
        match signal {
            HeartbeatSignal::Tick => {
                if self.shared.state.get() != ConnectionState::Open {
                    return;
                }
                let Some(heartbeat) = self.heartbeat.as_mut() else {
                    return;
                };
                let ping = heartbeat.config().ping_message.clone();
                if !heartbeat.arm_timeout() {
                    debug!("Previous heartbeat still awaiting pong, keeping its timeout");
                }

                if let Some(transport) = self.shared.transport.lock().as_mut() {
                    if let Err(e) = transport.send(ping.clone()) {
                        warn!("Failed to send heartbeat: {}", e);
                    }
                }
                debug!("Heartbeat ping sent");
                self.dispatch(Event::HeartbeatSent(HeartbeatEventDetail {
                    message: ping,
                    timestamp_ms: Utc::now().timestamp_millis(),
                }));
            }
            HeartbeatSignal::TimedOut => {
                let Some(heartbeat) = self.heartbeat.as_mut() else {
                    return;
                };
                let (missed_count, will_reconnect) = heartbeat.record_miss();
                warn!(
                    "Missed heartbeat ({}/{})",
                    missed_count,
                    heartbeat.config().max_missed_heartbeats
                );
                self.dispatch(Event::HeartbeatMissed(HeartbeatMissedEventDetail {
                    missed_count,
                    will_reconnect,
                }));

                if will_reconnect {
                    warn!("Too many missed heartbeats, closing transport");
                    self.stop_heartbeat();
                    if let Some(transport) = self.shared.transport.lock().as_mut() {
                        transport.close(
                            Some(CLOSE_HEARTBEAT_TIMEOUT),
                            Some("heartbeat timeout".to_string()),
                        );
                    }
                }
            }
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.stop();
        }
    }

    fn shutdown(&mut self) {
        self.retry_timer = None;
        self.resolving = None;
        self.stop_heartbeat();
        self.detach_transport();
        self.shared.state.set(ConnectionState::Closed);
    }
}

async fn next_transport_event(
    events: &mut Option<UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_resolved_url(resolving: &mut Option<BoxFuture<'static, Result<String>>>) -> Result<String> {
    match resolving {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_heartbeat(heartbeat: &mut Option<HeartbeatMonitor>) -> HeartbeatSignal {
    match heartbeat {
        Some(heartbeat) => heartbeat.next_signal().await,
        None => std::future::pending().await,
    }
}

async fn retry_due(retry: &mut Option<ScheduledRetry>) {
    match retry {
        Some(retry) => retry.sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
