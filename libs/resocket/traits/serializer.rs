//! Wire-format serialization
//!
//! A serializer converts the logical payloads an application sends and
//! receives to and from [`WsMessage`] frames. Without one, the connection
//! uses [`Identity`] and frames pass through untouched.

use crate::error::{ResocketError, Result};
use crate::message::WsMessage;
use crate::transport::BinaryType;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Trait for converting logical payloads to and from wire frames
///
/// # Example
///
/// ```rust,ignore
/// use resocket::traits::{Serializer, WsMessage, Result};
///
/// struct Upper;
///
/// impl Serializer for Upper {
///     type Outbound = String;
///     type Inbound = String;
///
///     fn serialize(&self, payload: &String) -> Result<WsMessage> {
///         Ok(WsMessage::Text(payload.to_uppercase()))
///     }
///
///     fn deserialize(&self, frame: WsMessage) -> Result<String> {
///         Ok(frame.as_text().unwrap_or_default().to_string())
///     }
/// }
/// ```
pub trait Serializer: Send + Sync + 'static {
    /// Logical payload accepted by `send`
    type Outbound: Send + 'static;

    /// Logical payload delivered to `message` listeners
    type Inbound: Send + 'static;

    fn serialize(&self, payload: &Self::Outbound) -> Result<WsMessage>;

    fn deserialize(&self, frame: WsMessage) -> Result<Self::Inbound>;

    /// Binary type to apply to every transport, if the serializer needs one
    fn binary_type(&self) -> Option<BinaryType> {
        None
    }
}

/// Pass-through serializer: the wire format is the logical type
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Serializer for Identity {
    type Outbound = WsMessage;
    type Inbound = WsMessage;

    fn serialize(&self, payload: &WsMessage) -> Result<WsMessage> {
        Ok(payload.clone())
    }

    fn deserialize(&self, frame: WsMessage) -> Result<WsMessage> {
        Ok(frame)
    }
}

/// JSON serializer backed by serde_json
///
/// Outbound payloads are written as text frames. Inbound frames may be
/// text or binary as long as they hold valid JSON for `I`.
pub struct JsonSerializer<O, I> {
    _types: PhantomData<fn() -> (O, I)>,
}

impl<O, I> JsonSerializer<O, I> {
    pub fn new() -> Self {
        Self {
            _types: PhantomData,
        }
    }
}

impl<O, I> Default for JsonSerializer<O, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O, I> Clone for JsonSerializer<O, I> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<O, I> std::fmt::Debug for JsonSerializer<O, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonSerializer")
    }
}

impl<O, I> Serializer for JsonSerializer<O, I>
where
    O: Serialize + Send + 'static,
    I: DeserializeOwned + Send + 'static,
{
    type Outbound = O;
    type Inbound = I;

    fn serialize(&self, payload: &O) -> Result<WsMessage> {
        Ok(WsMessage::Text(serde_json::to_string(payload)?))
    }

    fn deserialize(&self, frame: WsMessage) -> Result<I> {
        match frame {
            WsMessage::Text(text) => Ok(serde_json::from_str(&text)?),
            WsMessage::Binary(data) => serde_json::from_slice(&data)
                .map_err(|e| ResocketError::Serialization(format!("binary frame: {}", e))),
        }
    }
}
