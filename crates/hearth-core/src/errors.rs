//! Error types for the Hearth protocol
//!
//! This module contains all error types used throughout the core, grouped by
//! concern: container wiring errors, key-store provider errors, cryptographic
//! errors, handshake/trust errors, naming-resolution errors and transport
//! errors, unified under the main [`HearthError`] type.
//!
//! The taxonomy is deliberate: wiring errors indicate a programming defect
//! and are never retried; cryptographic and trust errors are fatal to the
//! connection that raised them; naming errors are typed so callers can retry
//! once more identity information is available.

use crate::container::ComponentKey;
use crate::types::DeviceId;

// ----------------------------------------------------------------------------
// Container Errors
// ----------------------------------------------------------------------------

/// Component-lifecycle kernel errors
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("component already registered under {key}")]
    DuplicateRegistration { key: ComponentKey },
    #[error("required component missing: {key}")]
    MissingDependency { key: ComponentKey },
    #[error("component {key} failed to initialize: {reason}")]
    InitFailed { key: ComponentKey, reason: String },
    #[error("component registered under {key} has a different type")]
    TypeMismatch { key: ComponentKey },
}

// ----------------------------------------------------------------------------
// Key Store Errors
// ----------------------------------------------------------------------------

/// Key-store provider errors
///
/// These are fatal: a corrupted backing store or unavailable algorithm
/// invalidates every downstream trust decision, so there is no fallback.
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("key store I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("key store entry {alias} is corrupted: {reason}")]
    CorruptedEntry { alias: String, reason: String },
    #[error("own identity entry is missing or incomplete")]
    MissingOwnIdentity,
    #[error("invalid key material: {reason}")]
    InvalidKeyMaterial { reason: String },
}

// ----------------------------------------------------------------------------
// Cryptographic Errors
// ----------------------------------------------------------------------------

/// Pipeline-stage cryptographic errors, fatal for the raising connection
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("signature verification failed")]
    SignatureVerificationFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: String },
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("invalid key format")]
    InvalidKeyFormat,
}

// ----------------------------------------------------------------------------
// Handshake / Trust Errors
// ----------------------------------------------------------------------------

/// Trust-establishment errors raised by the handshake and channel state
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("message received before handshake bound a peer identity")]
    UnauthenticatedPeer,
    #[error("claimed source {claimed} does not match bound peer {bound}")]
    SpoofedSource { claimed: DeviceId, bound: DeviceId },
    #[error("peer certificate failed self-verification")]
    InvalidPeerCertificate,
    #[error("handshake already completed on this channel")]
    AlreadyEstablished,
    #[error("unexpected handshake payload: {reason}")]
    UnexpectedPayload { reason: String },
}

// ----------------------------------------------------------------------------
// Naming Errors
// ----------------------------------------------------------------------------

/// Identity-resolution errors
#[derive(Debug, thiserror::Error)]
pub enum NamingError {
    /// The backing entry could not be retrieved. This is an I/O or crypto
    /// layer failure, distinct from the soft "master not yet known" case.
    #[error("cannot resolve device {id}: {reason}")]
    Unresolvable { id: DeviceId, reason: String },
    /// No master identity has been discovered yet. Callers may retry after
    /// a handshake or provisioning step supplies one.
    #[error("master device is not yet known")]
    MasterUnknown,
}

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Channel and connection errors raised by the runtime transport layer
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no open channel to device {id}")]
    NoChannel { id: DeviceId },
    #[error("connection to {peer} failed: {reason}")]
    ConnectionFailed { peer: String, reason: String },
    #[error("channel closed before the send completed")]
    ChannelClosed,
    #[error("send was cancelled")]
    Cancelled,
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Hearth protocol
#[derive(Debug, thiserror::Error)]
pub enum HearthError {
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("naming error: {0}")]
    Naming(#[from] NamingError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl HearthError {
    /// Create an invalid-value error with a reason
    pub fn invalid_value<T: Into<String>>(reason: T) -> Self {
        HearthError::InvalidValue {
            reason: reason.into(),
        }
    }

    /// Create a malformed-frame error with a reason
    pub fn malformed_frame<T: Into<String>>(reason: T) -> Self {
        HearthError::Crypto(CryptoError::MalformedFrame {
            reason: reason.into(),
        })
    }

    /// Create a signature verification error
    pub fn signature_error() -> Self {
        HearthError::Crypto(CryptoError::SignatureVerificationFailed)
    }

    /// Create an unresolvable-naming error
    pub fn unresolvable<T: Into<String>>(id: DeviceId, reason: T) -> Self {
        HearthError::Naming(NamingError::Unresolvable {
            id,
            reason: reason.into(),
        })
    }

    /// Whether this error must close the connection that raised it
    ///
    /// Cryptographic and trust failures cannot be distinguished from active
    /// tampering, so they are never retried on the same channel.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, HearthError::Crypto(_) | HearthError::Handshake(_))
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, HearthError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let crypto: HearthError = CryptoError::DecryptionFailed.into();
        assert!(crypto.is_connection_fatal());

        let spoofed: HearthError = HandshakeError::SpoofedSource {
            claimed: DeviceId::new([1; 32]),
            bound: DeviceId::new([2; 32]),
        }
        .into();
        assert!(spoofed.is_connection_fatal());

        let naming: HearthError = NamingError::MasterUnknown.into();
        assert!(!naming.is_connection_fatal());
    }

    #[test]
    fn test_constructor_helpers() {
        let err = HearthError::malformed_frame("truncated length prefix");
        assert!(matches!(
            err,
            HearthError::Crypto(CryptoError::MalformedFrame { .. })
        ));
    }
}
