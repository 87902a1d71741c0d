//! Hearth Core Protocol Substrate
//!
//! Foundational types, cryptography and lifecycle management for the Hearth
//! home-automation control plane: device certificates and stable identifiers,
//! the signed-then-encrypted channel pipeline, the trust-establishing
//! handshake, the typed message envelope with hierarchical routing keys, and
//! the component container that owns it all.
//!
//! This crate contains no network I/O; the runtime crate drives these pieces
//! over real connections.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod certificate;
pub mod config;
pub mod container;
pub mod errors;
pub mod handshake;
pub mod keystore;
pub mod message;
pub mod naming;
pub mod pipeline;
pub mod token;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use certificate::Certificate;
pub use container::{Component, ComponentKey, Container};
pub use errors::{
    ContainerError, CryptoError, HandshakeError, HearthError, KeyStoreError, NamingError, Result,
    TransportError,
};
pub use handshake::{BuildMetadata, ChannelState, ClientHello, EstablishedPeer, ServerHello};
pub use keystore::{FileBackend, KeyStore, KeyStoreBackend, MemoryBackend};
pub use message::{AddressedMessage, ErrorPayload, Message, MessageHeader, RoutingKey};
pub use naming::NamingResolver;
pub use token::DeviceConnectToken;
pub use types::{DeviceId, DeviceRole, Timestamp};
