//! Naming resolution: DeviceId ↔ certificate
//!
//! The resolver derives stable device identifiers from certificates (cached,
//! no I/O on the hot path), tracks which identifier belongs to the master,
//! and resolves identifiers back to certificates and public keys through the
//! key store.
//!
//! Master tracking is deliberately soft: a freshly provisioned device
//! legitimately does not know its master yet, so [`NamingResolver::master_id`]
//! returns `None` until discovery instead of failing. Certificate resolution
//! failures are hard, typed errors.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use ed25519_dalek::VerifyingKey;

use crate::certificate::Certificate;
use crate::errors::NamingError;
use crate::keystore::KeyStore;
use crate::types::DeviceId;
use crate::Result;

// ----------------------------------------------------------------------------
// Naming Resolver
// ----------------------------------------------------------------------------

/// Resolves device identifiers to certificates and back
pub struct NamingResolver {
    keystore: Arc<KeyStore>,
    own_id: DeviceId,
    is_master: bool,
    master_id: RwLock<Option<DeviceId>>,
    /// Cache from certificate signature bytes to the derived identifier
    id_cache: DashMap<[u8; 64], DeviceId>,
}

impl NamingResolver {
    /// Create a resolver for this device
    ///
    /// `configured_master` seeds the master identifier from persisted
    /// configuration; it stays `None` on a device that has not been
    /// provisioned yet.
    pub fn new(
        keystore: Arc<KeyStore>,
        is_master: bool,
        configured_master: Option<DeviceId>,
    ) -> Self {
        let own_id = keystore.own_certificate().device_id();
        Self {
            keystore,
            own_id,
            is_master,
            master_id: RwLock::new(configured_master),
            id_cache: DashMap::new(),
        }
    }

    /// Derive the stable identifier for a certificate
    ///
    /// Pure and deterministic: byte-identical certificates always yield
    /// equal identifiers. Results are cached per signature.
    pub fn device_id(&self, certificate: &Certificate) -> DeviceId {
        let signature = *certificate.signature_bytes();
        if let Some(cached) = self.id_cache.get(&signature) {
            return *cached;
        }
        let id = certificate.device_id();
        self.id_cache.insert(signature, id);
        id
    }

    /// This device's own identifier
    pub fn own_id(&self) -> DeviceId {
        self.own_id
    }

    /// The master's identifier
    ///
    /// Returns the local identifier when this device is the master, the
    /// cached identifier once discovered, and `None` before discovery.
    pub fn master_id(&self) -> Option<DeviceId> {
        if self.is_master {
            return Some(self.own_id);
        }
        *self.master_id.read().expect("master lock poisoned")
    }

    /// Record the master identifier learned from provisioning or handshake
    pub fn set_master_id(&self, id: DeviceId) {
        *self.master_id.write().expect("master lock poisoned") = Some(id);
    }

    /// Whether this device is the master of the installation
    pub fn is_master(&self) -> bool {
        self.is_master
    }

    /// Resolve an identifier to its certificate through the key store
    pub fn certificate(&self, id: &DeviceId) -> Result<Certificate> {
        if *id == self.own_id {
            return Ok(self.keystore.own_certificate().clone());
        }
        match self.keystore.certificate(&id.to_string()) {
            Ok(Some(cert)) => Ok(cert),
            Ok(None) => Err(NamingError::Unresolvable {
                id: *id,
                reason: "no certificate stored for this device".to_string(),
            }
            .into()),
            Err(e) => Err(NamingError::Unresolvable {
                id: *id,
                reason: e.to_string(),
            }
            .into()),
        }
    }

    /// Resolve an identifier to its Ed25519 verification key
    pub fn public_key(&self, id: &DeviceId) -> Result<VerifyingKey> {
        self.certificate(id)?.verifying_key()
    }

    /// Resolve an identifier to its X25519 sealing key
    pub fn sealing_key(&self, id: &DeviceId) -> Result<[u8; 32]> {
        Ok(self.certificate(id)?.seal_key)
    }
}

impl crate::container::Component for NamingResolver {}

impl std::fmt::Debug for NamingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamingResolver")
            .field("own_id", &self.own_id)
            .field("is_master", &self.is_master)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryBackend;

    fn resolver(is_master: bool) -> NamingResolver {
        let keystore = Arc::new(KeyStore::open(Box::new(MemoryBackend::new())).unwrap());
        NamingResolver::new(keystore, is_master, None)
    }

    #[test]
    fn test_device_id_cached_and_deterministic() {
        let resolver = resolver(false);
        let peer = KeyStore::open(Box::new(MemoryBackend::new())).unwrap();
        let cert = peer.own_certificate().clone();

        let first = resolver.device_id(&cert);
        let second = resolver.device_id(&cert);
        assert_eq!(first, second);
        assert_eq!(first, cert.device_id());
    }

    #[test]
    fn test_master_id_soft_before_discovery() {
        let resolver = resolver(false);
        assert_eq!(resolver.master_id(), None);

        let master = DeviceId::new([9u8; 32]);
        resolver.set_master_id(master);
        assert_eq!(resolver.master_id(), Some(master));
    }

    #[test]
    fn test_master_id_is_own_on_master() {
        let resolver = resolver(true);
        assert_eq!(resolver.master_id(), Some(resolver.own_id()));
    }

    #[test]
    fn test_unknown_id_is_unresolvable() {
        let resolver = resolver(false);
        let unknown = DeviceId::new([3u8; 32]);
        let err = resolver.certificate(&unknown).unwrap_err();
        assert!(matches!(
            err,
            crate::HearthError::Naming(NamingError::Unresolvable { .. })
        ));
    }

    #[test]
    fn test_resolves_stored_peer() {
        let keystore = Arc::new(KeyStore::open(Box::new(MemoryBackend::new())).unwrap());
        let resolver = NamingResolver::new(keystore.clone(), false, None);

        let peer = KeyStore::open(Box::new(MemoryBackend::new())).unwrap();
        let cert = peer.own_certificate().clone();
        let id = cert.device_id();
        keystore.save_certificate(&cert, &id.to_string()).unwrap();

        assert_eq!(resolver.certificate(&id).unwrap(), cert);
        assert_eq!(resolver.sealing_key(&id).unwrap(), cert.seal_key);
        resolver.public_key(&id).unwrap();
    }
}
