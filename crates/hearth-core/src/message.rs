//! Message envelope and typed routing keys
//!
//! A [`Message`] is an application payload (bincode-encoded) plus the
//! optional reply back-pointer. The outgoing router binds it to concrete
//! source, destination and routing key, producing an [`AddressedMessage`]
//! that is immutable from then on.
//!
//! Routing keys are hierarchical slash paths (`/master/door/unlatch`)
//! paired with the static payload type they carry. Matching is exact string
//! comparison with no wildcards, and two keys with the same path dispatch
//! identically regardless of where they were constructed.

use core::fmt;
use core::marker::PhantomData;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::types::{DeviceId, Timestamp};
use crate::{HearthError, Result};

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// An application payload not yet bound to an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    payload: Vec<u8>,
    references: Option<u64>,
}

impl Message {
    /// Create a message carrying a serialized payload
    pub fn new<T: Serialize>(payload: &T) -> Result<Self> {
        Ok(Self {
            payload: bincode::serialize(payload)?,
            references: None,
        })
    }

    /// Mark this message as a reply to the message with `sequence_nr`
    pub fn replying_to(mut self, sequence_nr: u64) -> Self {
        self.references = Some(sequence_nr);
        self
    }

    /// The raw payload bytes
    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// The sequence number this message replies to, if any
    pub fn references(&self) -> Option<u64> {
        self.references
    }
}

// ----------------------------------------------------------------------------
// Message Header
// ----------------------------------------------------------------------------

/// Required envelope headers of an addressed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Destination device
    pub destination: DeviceId,
    /// Originating device
    pub from: DeviceId,
    /// Hierarchical routing key path
    pub routing_key: String,
    /// Monotonically increasing per-sender sequence number
    pub sequence_nr: u64,
    /// Creation time, epoch millis
    pub timestamp: Timestamp,
    /// Back-pointer for reply correlation
    pub references: Option<u64>,
}

// ----------------------------------------------------------------------------
// Addressed Message
// ----------------------------------------------------------------------------

/// A message bound to concrete source, destination and routing key
///
/// Immutable once addressed: there are accessors but no mutators, and the
/// dispatcher hands out clones, never shared mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressedMessage {
    header: MessageHeader,
    payload: Vec<u8>,
}

impl AddressedMessage {
    /// Bind a message to an address. Called by the outgoing router, which
    /// owns sequence-number assignment.
    pub fn address(
        message: Message,
        from: DeviceId,
        destination: DeviceId,
        routing_key: impl Into<String>,
        sequence_nr: u64,
    ) -> Self {
        Self {
            header: MessageHeader {
                destination,
                from,
                routing_key: routing_key.into(),
                sequence_nr,
                timestamp: Timestamp::now(),
                references: message.references,
            },
            payload: message.payload,
        }
    }

    /// The envelope headers
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// The routing key path
    pub fn routing_key(&self) -> &str {
        &self.header.routing_key
    }

    /// The originating device
    pub fn from(&self) -> DeviceId {
        self.header.from
    }

    /// The destination device
    pub fn destination(&self) -> DeviceId {
        self.header.destination
    }

    /// The sender-assigned sequence number
    pub fn sequence_nr(&self) -> u64 {
        self.header.sequence_nr
    }

    /// The raw payload bytes
    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize the whole envelope for the crypto pipeline
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize an envelope recovered from the crypto pipeline
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ----------------------------------------------------------------------------
// Routing Keys
// ----------------------------------------------------------------------------

/// A typed, path-shaped address used to match messages to handlers
pub struct RoutingKey<T> {
    path: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> RoutingKey<T> {
    /// Create a routing key for a slash-delimited path
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        validate_routing_path(&path)?;
        Ok(Self {
            path,
            _payload: PhantomData,
        })
    }

    /// The key's path string
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether a message is addressed to this key (exact path match)
    pub fn matches(&self, message: &AddressedMessage) -> bool {
        self.path == message.routing_key()
    }
}

impl<T: DeserializeOwned> RoutingKey<T> {
    /// Extract the typed payload from a matching message
    ///
    /// Fails if the message is addressed to a different path or the payload
    /// does not decode as `T`.
    pub fn extract(&self, message: &AddressedMessage) -> Result<T> {
        if !self.matches(message) {
            return Err(HearthError::invalid_value(format!(
                "message for {} does not match key {}",
                message.routing_key(),
                self.path
            )));
        }
        Ok(bincode::deserialize(message.payload_bytes())?)
    }
}

impl<T> Clone for RoutingKey<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> fmt::Debug for RoutingKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RoutingKey").field(&self.path).finish()
    }
}

impl<T, U> PartialEq<RoutingKey<U>> for RoutingKey<T> {
    /// Keys with the same path are equal for dispatch purposes
    fn eq(&self, other: &RoutingKey<U>) -> bool {
        self.path == other.path
    }
}

impl<T> Eq for RoutingKey<T> {}

/// Validate a routing key path: absolute, slash-delimited, no empty segments
pub fn validate_routing_path(path: &str) -> Result<()> {
    let valid = path.starts_with('/')
        && path.len() > 1
        && !path.ends_with('/')
        && path[1..].split('/').all(|segment| !segment.is_empty());
    if valid {
        Ok(())
    } else {
        Err(HearthError::invalid_value(format!(
            "invalid routing key path {path:?}"
        )))
    }
}

// ----------------------------------------------------------------------------
// Error Payload
// ----------------------------------------------------------------------------

/// Standard payload for reporting a handler failure back to the sender
///
/// Driver and hardware errors raised inside handlers travel as ordinary
/// reply messages carrying this payload, never as channel-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable failure description
    pub message: String,
    /// Routing key of the request that failed
    pub failed_key: String,
}

impl ErrorPayload {
    /// Describe a failure of the given request message
    pub fn for_request(request: &AddressedMessage, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failed_key: request.routing_key().to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
