pub mod states;

use crate::core::config::{ConnectionConfig, ConnectionSettings, RetryOptions};
use crate::core::connection::Connection;
use crate::core::events::{Event, EventType, Listener, ListenerOptions};
use crate::core::heartbeat::HeartbeatOptions;
use crate::core::socket::TungsteniteFactory;
use crate::traits::*;
use states::*;
use std::sync::Arc;
use tracing::debug;

/// Type-state builder for [`Connection`]
///
/// The URL (or a URL provider) must be set before `build()` becomes
/// available. Every other option is optional; configuration calls consume
/// and return the builder for chaining.
///
/// `S` is the serializer. Swapping it with [`with_serializer`](Self::with_serializer)
/// produces a builder over the new serializer's payload types.
pub struct ConnectionBuilder<U, S = Identity>
where
    U: UrlState,
    S: Serializer,
{
    _state: TypeState<U>,
    url: Option<UrlSource>,
    protocols: Vec<String>,
    retry: RetryOptions,
    backoff: Option<Box<dyn Backoff>>,
    buffer: Option<Box<dyn Buffer<S::Outbound>>>,
    heartbeat: Option<HeartbeatOptions>,
    serializer: S,
    binary_type: Option<BinaryType>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    listeners: Vec<(EventType, Listener<S::Inbound>, ListenerOptions)>,
}

impl ConnectionBuilder<NoUrl, Identity> {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self {
            _state: TypeState::new(),
            url: None,
            protocols: Vec::new(),
            retry: RetryOptions::default(),
            backoff: None,
            buffer: None,
            heartbeat: None,
            serializer: Identity,
            binary_type: None,
            transport_factory: None,
            listeners: Vec::new(),
        }
    }

    /// Start from loaded settings. The settings must contain a URL.
    pub fn from_settings(settings: ConnectionSettings) -> Result<ConnectionBuilder<HasUrl, Identity>> {
        let url = settings.url.clone().ok_or_else(|| {
            ResocketError::Configuration("settings do not contain a url".into())
        })?;
        Ok(Self::new().url(url).settings(settings))
    }
}

impl Default for ConnectionBuilder<NoUrl, Identity> {
    fn default() -> Self {
        Self::new()
    }
}

// URL setting
impl<S> ConnectionBuilder<NoUrl, S>
where
    S: Serializer,
{
    /// Connect to a fixed URL
    pub fn url(self, url: impl Into<String>) -> ConnectionBuilder<HasUrl, S> {
        self.url_source(UrlSource::Static(url.into()))
    }

    /// Resolve the URL before every attempt
    pub fn url_provider(self, provider: impl UrlProvider + 'static) -> ConnectionBuilder<HasUrl, S> {
        self.url_source(UrlSource::Dynamic(Arc::new(provider)))
    }

    pub fn url_source(self, source: UrlSource) -> ConnectionBuilder<HasUrl, S> {
        ConnectionBuilder {
            _state: TypeState::new(),
            url: Some(source),
            protocols: self.protocols,
            retry: self.retry,
            backoff: self.backoff,
            buffer: self.buffer,
            heartbeat: self.heartbeat,
            serializer: self.serializer,
            binary_type: self.binary_type,
            transport_factory: self.transport_factory,
            listeners: self.listeners,
        }
    }
}

// Optional configuration methods
impl<U, S> ConnectionBuilder<U, S>
where
    U: UrlState,
    S: Serializer,
{
    /// Replace the requested subprotocols
    pub fn protocols<I, P>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Request one more subprotocol
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Retry failed or dropped connections using this backoff.
    /// Without a backoff the connection never retries.
    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Some(Box::new(backoff));
        self
    }

    /// Stop retrying once the backoff has counted more than `max_retries`
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.retry.max_retries = Some(max_retries);
        self
    }

    /// Retry immediately the first time after a successful connection
    pub fn instant_reconnect(mut self, instant: bool) -> Self {
        self.retry.instant_reconnect = instant;
        self
    }

    pub fn retry_options(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    /// Stage payloads sent while not open
    pub fn buffer(mut self, buffer: impl Buffer<S::Outbound> + 'static) -> Self {
        self.buffer = Some(Box::new(buffer));
        self
    }

    /// Probe liveness while open. All options must be set, otherwise a
    /// warning is logged at build time and heartbeats stay off.
    pub fn heartbeat(mut self, options: HeartbeatOptions) -> Self {
        self.heartbeat = Some(options);
        self
    }

    /// Binary type applied to every transport, overriding the serializer's
    pub fn binary_type(mut self, binary_type: BinaryType) -> Self {
        self.binary_type = Some(binary_type);
        self
    }

    /// Use a custom transport factory instead of tokio-tungstenite
    pub fn transport_factory(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.transport_factory = Some(Arc::new(factory));
        self
    }

    /// Apply protocols, retry, backoff and heartbeat from loaded settings.
    /// The settings' URL is only used by [`ConnectionBuilder::from_settings`].
    pub fn settings(mut self, settings: ConnectionSettings) -> Self {
        if !settings.protocols.is_empty() {
            self.protocols = settings.protocols;
        }
        self.retry = settings.retry;
        if let Some(backoff) = settings.backoff {
            self.backoff = Some(backoff.into_backoff());
        }
        if let Some(heartbeat) = settings.heartbeat {
            self.heartbeat = Some(heartbeat.into());
        }
        self
    }

    /// Register a listener with explicit options
    pub fn on_with_options(
        mut self,
        event_type: EventType,
        listener: Listener<S::Inbound>,
        options: ListenerOptions,
    ) -> Self {
        self.listeners.push((event_type, listener, options));
        self
    }

    /// Register a closure for an event type
    pub fn on<F>(self, event_type: EventType, f: F) -> Self
    where
        F: Fn(&Event<S::Inbound>) + Send + Sync + 'static,
    {
        self.on_with_options(event_type, Arc::new(f), ListenerOptions::default())
    }

    pub fn on_open<F>(self, f: F) -> Self
    where
        F: Fn(&Event<S::Inbound>) + Send + Sync + 'static,
    {
        self.on(EventType::Open, f)
    }

    pub fn on_close<F>(self, f: F) -> Self
    where
        F: Fn(&Event<S::Inbound>) + Send + Sync + 'static,
    {
        self.on(EventType::Close, f)
    }

    pub fn on_error<F>(self, f: F) -> Self
    where
        F: Fn(&Event<S::Inbound>) + Send + Sync + 'static,
    {
        self.on(EventType::Error, f)
    }

    pub fn on_message<F>(self, f: F) -> Self
    where
        F: Fn(&Event<S::Inbound>) + Send + Sync + 'static,
    {
        self.on(EventType::Message, f)
    }

    pub fn on_retry<F>(self, f: F) -> Self
    where
        F: Fn(&Event<S::Inbound>) + Send + Sync + 'static,
    {
        self.on(EventType::Retry, f)
    }

    pub fn on_reconnect<F>(self, f: F) -> Self
    where
        F: Fn(&Event<S::Inbound>) + Send + Sync + 'static,
    {
        self.on(EventType::Reconnect, f)
    }

    /// Swap the serializer
    ///
    /// URL, protocols, retry options, backoff, heartbeat, transport factory
    /// and listeners carry over. `message` listeners take the old inbound
    /// type and are dropped, as are the buffer (typed over the old outbound
    /// payload) and the binary type.
    pub fn with_serializer<S2>(self, serializer: S2) -> ConnectionBuilder<U, S2>
    where
        S2: Serializer,
    {
        let (messages, listeners): (Vec<_>, Vec<_>) = self
            .listeners
            .into_iter()
            .partition(|(event_type, _, _)| *event_type == EventType::Message);
        if !messages.is_empty() || self.buffer.is_some() {
            debug!(
                "Serializer swapped, discarding {} message listeners and buffer (set: {})",
                messages.len(),
                self.buffer.is_some()
            );
        }

        let listeners = listeners
            .into_iter()
            .map(|(event_type, callback, options)| {
                let carried: Listener<S2::Inbound> = Arc::new(move |event: &Event<S2::Inbound>| {
                    if let Some(event) = event.without_payload::<S::Inbound>() {
                        callback(&event);
                    }
                });
                (event_type, carried, options)
            })
            .collect();

        ConnectionBuilder {
            _state: TypeState::new(),
            url: self.url,
            protocols: self.protocols,
            retry: self.retry,
            backoff: self.backoff,
            buffer: None,
            heartbeat: self.heartbeat,
            serializer,
            binary_type: None,
            transport_factory: self.transport_factory,
            listeners,
        }
    }
}

// Build method - only available once the URL is set
impl<S> ConnectionBuilder<HasUrl, S>
where
    S: Serializer,
{
    /// Start the connection. Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Connection<S>> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ResocketError::Configuration(
                "build() must be called from within a tokio runtime".into(),
            ));
        }

        let url = self
            .url
            .ok_or_else(|| ResocketError::Configuration("URL must be set".into()))?;
        let heartbeat = self.heartbeat.as_ref().and_then(HeartbeatOptions::validate);
        let transport_factory = self
            .transport_factory
            .unwrap_or_else(|| Arc::new(TungsteniteFactory::new()));

        let config = ConnectionConfig {
            url,
            protocols: self.protocols,
            retry: self.retry,
            backoff: self.backoff,
            buffer: self.buffer,
            heartbeat,
            serializer: self.serializer,
            binary_type: self.binary_type,
            transport_factory,
            listeners: self.listeners,
        };

        debug!(
            "Building connection (backoff: {}, buffer: {}, heartbeat: {}, listeners: {})",
            config.has_backoff(),
            config.has_buffer(),
            config.has_heartbeat(),
            config.listener_count()
        );

        Ok(Connection::spawn(config))
    }
}
