use crate::core::events::{EventType, Listener, ListenerOptions};
use crate::core::heartbeat::{HeartbeatConfig, HeartbeatOptions};
use crate::traits::*;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Retry policy applied on top of the backoff strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Stop scheduling retries once the backoff's retry count exceeds this
    /// (None = retry forever)
    pub max_retries: Option<usize>,

    /// Retry without delay the first time after a successful connection
    pub instant_reconnect: bool,
}

/// Serializable description of a backoff strategy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffSettings {
    Constant {
        delay_ms: u64,
    },
    Linear {
        initial_ms: u64,
        increment_ms: u64,
        #[serde(default)]
        max_ms: Option<u64>,
    },
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        #[serde(default)]
        max_exponent: Option<u32>,
    },
}

impl BackoffSettings {
    pub fn into_backoff(self) -> Box<dyn Backoff> {
        match self {
            BackoffSettings::Constant { delay_ms } => {
                Box::new(ConstantBackoff::new(Duration::from_millis(delay_ms)))
            }
            BackoffSettings::Linear {
                initial_ms,
                increment_ms,
                max_ms,
            } => Box::new(LinearBackoff::new(
                Duration::from_millis(initial_ms),
                Duration::from_millis(increment_ms),
                max_ms.map(Duration::from_millis),
            )),
            BackoffSettings::Exponential {
                initial_ms,
                max_ms,
                max_exponent,
            } => {
                let backoff = ExponentialBackoff::new(
                    Duration::from_millis(initial_ms),
                    Duration::from_millis(max_ms),
                );
                match max_exponent {
                    Some(exponent) => Box::new(backoff.with_max_exponent(exponent)),
                    None => Box::new(backoff),
                }
            }
        }
    }
}

/// Serializable heartbeat options with text ping/pong sentinels
///
/// Fields left out stay unset, which disables heartbeats with a warning
/// when the connection is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub ping: Option<String>,
    pub pong: Option<String>,
    pub max_missed_heartbeats: Option<u32>,
}

impl From<HeartbeatSettings> for HeartbeatOptions {
    fn from(settings: HeartbeatSettings) -> Self {
        HeartbeatOptions {
            interval: settings.interval_ms.map(Duration::from_millis),
            timeout: settings.timeout_ms.map(Duration::from_millis),
            ping_message: settings.ping.map(WsMessage::Text),
            pong_message: settings.pong.map(WsMessage::Text),
            max_missed_heartbeats: settings.max_missed_heartbeats,
        }
    }
}

/// Connection settings loadable from YAML or JSON
///
/// ```yaml
/// url: wss://collab.example.com/socket
/// protocols: [v2.collab]
/// retry:
///   max_retries: 10
///   instant_reconnect: true
/// backoff:
///   kind: exponential
///   initial_ms: 250
///   max_ms: 30000
/// heartbeat:
///   interval_ms: 15000
///   timeout_ms: 5000
///   ping: ping
///   pong: pong
///   max_missed_heartbeats: 2
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub url: Option<String>,
    pub protocols: Vec<String>,
    pub retry: RetryOptions,
    pub backoff: Option<BackoffSettings>,
    pub heartbeat: Option<HeartbeatSettings>,
}

impl ConnectionSettings {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ResocketError::Configuration(e.to_string()))
    }

    /// Load settings from a `.yaml`/`.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ResocketError::Configuration(format!("reading {}: {}", path.display(), e))
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            other => Err(ResocketError::Configuration(format!(
                "unsupported settings format: {:?}",
                other
            ))),
        }
    }
}

/// Fully assembled configuration handed to the connection task
///
/// Built by [`ConnectionBuilder::build`](crate::core::builder::ConnectionBuilder).
pub struct ConnectionConfig<S>
where
    S: Serializer,
{
    /// Where each attempt's URL comes from
    pub(crate) url: UrlSource,

    /// Subprotocols requested on every attempt
    pub(crate) protocols: Vec<String>,

    /// Retry limits
    pub(crate) retry: RetryOptions,

    /// Optional backoff; without one the connection never retries
    pub(crate) backoff: Option<Box<dyn Backoff>>,

    /// Optional outbound buffer used while not open
    pub(crate) buffer: Option<Box<dyn Buffer<S::Outbound>>>,

    /// Validated heartbeat configuration
    pub(crate) heartbeat: Option<HeartbeatConfig>,

    /// Wire format conversion
    pub(crate) serializer: S,

    /// Binary type applied to every transport
    pub(crate) binary_type: Option<BinaryType>,

    /// Constructs a transport per attempt
    pub(crate) transport_factory: Arc<dyn TransportFactory>,

    /// Listeners registered before the connection starts
    pub(crate) listeners: Vec<(EventType, Listener<S::Inbound>, ListenerOptions)>,
}

impl<S> ConnectionConfig<S>
where
    S: Serializer,
{
    pub fn url(&self) -> &UrlSource {
        &self.url
    }

    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    pub fn retry(&self) -> RetryOptions {
        self.retry
    }

    /// Check if a backoff strategy is configured
    pub fn has_backoff(&self) -> bool {
        self.backoff.is_some()
    }

    /// Check if an outbound buffer is configured
    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Check if heartbeat is configured
    pub fn has_heartbeat(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Get the number of listeners registered up front
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
