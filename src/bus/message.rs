//! Message envelope and wire codec.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Name of the type discriminator on the wire.
pub const TYPE_FIELD: &str = "_type";

/// A domain message that can travel through the broker.
///
/// `TYPE` is written to the envelope's `_type` discriminator so a consumer
/// can tell payload types apart without a shared schema registry.
///
/// ```
/// use msgrelay::bus::Payload;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: String,
/// }
///
/// impl Payload for OrderPlaced {
///     const TYPE: &'static str = "order.placed";
/// }
/// ```
pub trait Payload: Serialize + DeserializeOwned {
    const TYPE: &'static str;
}

/// Encoding of the payload bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// JSON text.
    #[default]
    Json,
    /// Compact binary (bitcode).
    Binary,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary codec: {0}")]
    Binary(#[from] bitcode::Error),
    #[error("expected payload type {expected}, found {found:?}")]
    TypeMismatch {
        expected: &'static str,
        found: Option<String>,
    },
    #[error("message has no payload")]
    Empty,
}

/// A message as the broker stores it.
///
/// The broker owns the delivery-attempt counter; it lives on
/// [`Delivery`](super::Delivery), never here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message
    pub id: String,
    /// Type discriminator (`None` for untyped frames)
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub format: WireFormat,
    #[serde(with = "payload_serde")]
    pub payload: Vec<u8>,
    /// Whether the broker must keep the message across a restart
    #[serde(default = "persistent_by_default")]
    pub persistent: bool,
    /// Broker and application headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

fn persistent_by_default() -> bool {
    true
}

mod payload_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(payload: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(payload).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

impl Message {
    /// Create a persistent message with a fresh id.
    pub fn new(message_type: Option<String>, format: WireFormat, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            message_type,
            format,
            payload,
            persistent: true,
            headers: Vec::new(),
        }
    }

    /// Serialize a typed payload, stamping its `_type`.
    pub fn encode<T: Payload>(payload: &T, format: WireFormat) -> Result<Self, CodecError> {
        let bytes = match format {
            WireFormat::Json => serde_json::to_vec(payload)?,
            WireFormat::Binary => bitcode::serialize(payload)?,
        };
        Ok(Self::new(Some(T::TYPE.to_string()), format, bytes))
    }

    /// Create an untyped frame carrying arbitrary bytes.
    pub fn raw(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(None, WireFormat::Json, payload.into())
    }

    /// Create a frame with no payload at all.
    pub fn empty() -> Self {
        Self::new(None, WireFormat::Json, Vec::new())
    }

    /// Decode the payload, checking the `_type` discriminator first.
    pub fn decode<T: Payload>(&self) -> Result<T, CodecError> {
        if self.payload.is_empty() {
            return Err(CodecError::Empty);
        }
        if self.message_type.as_deref() != Some(T::TYPE) {
            return Err(CodecError::TypeMismatch {
                expected: T::TYPE,
                found: self.message_type.clone(),
            });
        }
        match self.format {
            WireFormat::Json => Ok(serde_json::from_slice(&self.payload)?),
            WireFormat::Binary => Ok(bitcode::deserialize(&self.payload)?),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_persistence(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Add a header, replacing any existing value for the key.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((key, value)),
        }
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
