//! Trust-establishing handshake
//!
//! Before any application routing key is processed, the two ends of a
//! connection exchange certificates and build metadata: the connecting
//! client sends a [`ClientHello`] (its certificate, the certificate it
//! believes is the master's, build info), the server answers with a
//! [`ServerHello`]. Exactly one handshake happens per connection; its
//! outcome binds a verified peer [`DeviceId`] to the channel for the rest
//! of its life.
//!
//! Build metadata is an explicitly injected struct used for diagnostics
//! only; it never participates in a trust decision.

use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::errors::HandshakeError;
use crate::message::AddressedMessage;
use crate::types::DeviceId;
use crate::Result;

// ----------------------------------------------------------------------------
// Build Metadata
// ----------------------------------------------------------------------------

/// Application identity and version strings, injected at construction time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMetadata {
    pub app_name: String,
    pub version: String,
    pub protocol_version: u32,
}

impl BuildMetadata {
    pub fn new(
        app_name: impl Into<String>,
        version: impl Into<String>,
        protocol_version: u32,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            version: version.into(),
            protocol_version,
        }
    }
}

// ----------------------------------------------------------------------------
// Hello Payloads
// ----------------------------------------------------------------------------

/// First handshake frame, sent by the connecting device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    /// The client's own certificate
    pub certificate: Certificate,
    /// The certificate the client believes belongs to the master, if any
    pub believed_master: Option<Certificate>,
    /// Diagnostic build information
    pub build: BuildMetadata,
}

/// Second handshake frame, sent by the accepting device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHello {
    /// The server's own certificate
    pub certificate: Certificate,
    /// Diagnostic build information
    pub build: BuildMetadata,
}

impl ClientHello {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl ServerHello {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ----------------------------------------------------------------------------
// Established Peer
// ----------------------------------------------------------------------------

/// The verified identity a completed handshake binds to a channel
#[derive(Debug, Clone)]
pub struct EstablishedPeer {
    pub device_id: DeviceId,
    pub certificate: Certificate,
}

/// Validate a received peer certificate and derive its identity
pub fn establish_peer(certificate: Certificate) -> Result<EstablishedPeer> {
    certificate.verify()?;
    let device_id = certificate.device_id();
    Ok(EstablishedPeer {
        device_id,
        certificate,
    })
}

// ----------------------------------------------------------------------------
// Channel State
// ----------------------------------------------------------------------------

/// Per-connection trust state
///
/// Starts unbound; [`ChannelState::bind`] is called exactly once when the
/// handshake completes. Every inbound message is authorized against this
/// state before a handler can see it.
#[derive(Debug)]
pub enum ChannelState {
    /// No handshake has completed on this channel
    AwaitingHello,
    /// Handshake complete, peer identity bound
    Established(EstablishedPeer),
}

impl ChannelState {
    pub fn new() -> Self {
        ChannelState::AwaitingHello
    }

    /// Bind the verified peer; fails if a handshake already completed
    pub fn bind(&mut self, peer: EstablishedPeer) -> Result<()> {
        match self {
            ChannelState::AwaitingHello => {
                tracing::debug!(peer = %peer.device_id.short(), "channel peer bound");
                *self = ChannelState::Established(peer);
                Ok(())
            }
            ChannelState::Established(_) => Err(HandshakeError::AlreadyEstablished.into()),
        }
    }

    /// The bound peer, if the handshake completed
    pub fn peer(&self) -> Option<&EstablishedPeer> {
        match self {
            ChannelState::AwaitingHello => None,
            ChannelState::Established(peer) => Some(peer),
        }
    }

    /// Authorize an inbound message against the bound peer identity
    ///
    /// A message on an unbound channel is an unauthenticated-peer error; a
    /// message whose claimed source differs from the bound peer is treated
    /// as spoofing. Neither may ever reach an application handler.
    pub fn authorize_inbound(&self, message: &AddressedMessage) -> Result<()> {
        let peer = match self.peer() {
            Some(peer) => peer,
            None => return Err(HandshakeError::UnauthenticatedPeer.into()),
        };
        if message.from() != peer.device_id {
            return Err(HandshakeError::SpoofedSource {
                claimed: message.from(),
                bound: peer.device_id,
            }
            .into());
        }
        Ok(())
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::{KeyStore, MemoryBackend};
    use crate::message::Message;

    fn certificate() -> Certificate {
        KeyStore::open(Box::new(MemoryBackend::new()))
            .unwrap()
            .own_certificate()
            .clone()
    }

    fn message_from(id: DeviceId) -> AddressedMessage {
        AddressedMessage::address(
            Message::new(&"ping".to_string()).unwrap(),
            id,
            DeviceId::new([0; 32]),
            "/test1",
            1,
        )
    }

    #[test]
    fn test_hello_round_trip() {
        let hello = ClientHello {
            certificate: certificate(),
            believed_master: Some(certificate()),
            build: BuildMetadata::new("hearth", "0.1.0", 1),
        };
        let decoded = ClientHello::from_bytes(&hello.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.certificate, hello.certificate);
        assert_eq!(decoded.build, hello.build);
    }

    #[test]
    fn test_establish_rejects_invalid_certificate() {
        let mut cert = certificate();
        cert.seal_key[3] ^= 0xFF;
        assert!(establish_peer(cert).is_err());
    }

    #[test]
    fn test_bind_exactly_once() {
        let mut state = ChannelState::new();
        let peer = establish_peer(certificate()).unwrap();
        state.bind(peer.clone()).unwrap();
        assert!(state.bind(peer).is_err());
    }

    #[test]
    fn test_unauthenticated_peer_rejected() {
        let state = ChannelState::new();
        let err = state
            .authorize_inbound(&message_from(DeviceId::new([5; 32])))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::HearthError::Handshake(HandshakeError::UnauthenticatedPeer)
        ));
    }

    #[test]
    fn test_spoofed_source_rejected() {
        let mut state = ChannelState::new();
        let peer = establish_peer(certificate()).unwrap();
        let bound_id = peer.device_id;
        state.bind(peer).unwrap();

        state.authorize_inbound(&message_from(bound_id)).unwrap();

        let err = state
            .authorize_inbound(&message_from(DeviceId::new([8; 32])))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::HearthError::Handshake(HandshakeError::SpoofedSource { .. })
        ));
    }
}
