//! Key and identity store
//!
//! Owns the device's asymmetric key material and every peer certificate it
//! has learned. The device's own identity (Ed25519 signing key, X25519
//! sealing secret and the self-signed certificate) lives under a reserved
//! alias; peer certificates are stored under their `DeviceId` rendered as
//! hex.
//!
//! Storage is abstracted behind [`KeyStoreBackend`] so tests run against an
//! in-memory map while production uses the file-backed store. Backend
//! failures are fatal: a corrupted entry or unreadable store invalidates
//! every downstream trust decision, so there is no silent fallback.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chacha20poly1305::{aead::KeyInit, ChaCha20Poly1305};
use ed25519_dalek::SigningKey;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::certificate::Certificate;
use crate::errors::KeyStoreError;
use crate::types::Timestamp;
use crate::Result;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Reserved alias for the device's own identity entry
pub const OWN_ALIAS: &str = "own";

// ----------------------------------------------------------------------------
// Storage Backend
// ----------------------------------------------------------------------------

/// Alias-addressed blob storage behind the key store
pub trait KeyStoreBackend: Send + Sync {
    /// Store a blob under an alias, replacing any previous value
    fn store(&self, alias: &str, data: &[u8]) -> Result<()>;

    /// Retrieve the blob for an alias, `None` if absent
    fn retrieve(&self, alias: &str) -> Result<Option<Vec<u8>>>;

    /// Delete the entry for an alias; absent alias is a no-op
    fn delete(&self, alias: &str) -> Result<()>;

    /// List all stored aliases
    fn list(&self) -> Result<Vec<String>>;
}

/// In-memory backend for tests and ephemeral nodes
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStoreBackend for MemoryBackend {
    fn store(&self, alias: &str, data: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .expect("key store lock poisoned")
            .insert(alias.to_string(), data.to_vec());
        Ok(())
    }

    fn retrieve(&self, alias: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .expect("key store lock poisoned")
            .get(alias)
            .cloned())
    }

    fn delete(&self, alias: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("key store lock poisoned")
            .remove(alias);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .expect("key store lock poisoned")
            .keys()
            .cloned()
            .collect())
    }
}

/// File-backed backend: one file per alias inside a directory
#[derive(Debug)]
pub struct FileBackend {
    directory: PathBuf,
}

impl FileBackend {
    /// Open (creating if needed) a file-backed store at `directory`
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(KeyStoreError::Io)?;
        Ok(Self { directory })
    }

    fn path_for(&self, alias: &str) -> Result<PathBuf> {
        validate_alias(alias)?;
        Ok(self.directory.join(alias))
    }
}

impl KeyStoreBackend for FileBackend {
    fn store(&self, alias: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(alias)?;
        std::fs::write(path, data).map_err(KeyStoreError::Io)?;
        Ok(())
    }

    fn retrieve(&self, alias: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(alias)?;
        match std::fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KeyStoreError::Io(e).into()),
        }
    }

    fn delete(&self, alias: &str) -> Result<()> {
        let path = self.path_for(alias)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeyStoreError::Io(e).into()),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut aliases = Vec::new();
        for entry in std::fs::read_dir(&self.directory).map_err(KeyStoreError::Io)? {
            let entry = entry.map_err(KeyStoreError::Io)?;
            if let Some(name) = entry.file_name().to_str() {
                aliases.push(name.to_string());
            }
        }
        aliases.sort();
        Ok(aliases)
    }
}

/// Aliases are the reserved own alias or DeviceId hex; anything else risks
/// path traversal on the file backend.
fn validate_alias(alias: &str) -> Result<()> {
    let valid = !alias.is_empty()
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(KeyStoreError::InvalidKeyMaterial {
            reason: format!("invalid alias {alias:?}"),
        }
        .into())
    }
}

// ----------------------------------------------------------------------------
// Own Identity Record
// ----------------------------------------------------------------------------

/// Persisted form of the device's own key material
#[derive(Serialize, Deserialize)]
struct OwnIdentityRecord {
    signing_secret: [u8; 32],
    sealing_secret: [u8; 32],
    certificate: Certificate,
}

// ----------------------------------------------------------------------------
// Key Store
// ----------------------------------------------------------------------------

/// The device key store
///
/// The first open against an empty backend generates fresh key material and
/// a long-lived self-signed certificate; every later open loads the
/// persisted identity unchanged.
pub struct KeyStore {
    backend: Box<dyn KeyStoreBackend>,
    signing_key: SigningKey,
    sealing_secret: StaticSecret,
    certificate: Certificate,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("device_id", &self.certificate.device_id())
            .finish_non_exhaustive()
    }
}

impl crate::container::Component for KeyStore {}

impl KeyStore {
    /// Open the key store, generating the own identity on first use
    pub fn open(backend: Box<dyn KeyStoreBackend>) -> Result<Self> {
        let record = match backend.retrieve(OWN_ALIAS)? {
            Some(bytes) => {
                bincode::deserialize::<OwnIdentityRecord>(&bytes).map_err(|e| {
                    KeyStoreError::CorruptedEntry {
                        alias: OWN_ALIAS.to_string(),
                        reason: e.to_string(),
                    }
                })?
            }
            None => {
                let record = Self::generate_identity();
                let bytes = bincode::serialize(&record)?;
                backend.store(OWN_ALIAS, &bytes)?;
                tracing::info!(
                    device_id = %record.certificate.device_id(),
                    "generated new device identity"
                );
                record
            }
        };

        let signing_key = SigningKey::from_bytes(&record.signing_secret);
        let sealing_secret = StaticSecret::from(record.sealing_secret);

        // The persisted certificate must still match the persisted keys,
        // otherwise the store has been corrupted.
        let expected_seal = PublicKey::from(&sealing_secret).to_bytes();
        if record.certificate.sign_key != signing_key.verifying_key().to_bytes()
            || record.certificate.seal_key != expected_seal
        {
            return Err(KeyStoreError::CorruptedEntry {
                alias: OWN_ALIAS.to_string(),
                reason: "certificate does not match stored key material".to_string(),
            }
            .into());
        }
        record.certificate.verify()?;

        Ok(Self {
            backend,
            signing_key,
            sealing_secret,
            certificate: record.certificate,
        })
    }

    fn generate_identity() -> OwnIdentityRecord {
        let mut signing_secret = [0u8; 32];
        OsRng.fill_bytes(&mut signing_secret);
        let signing_key = SigningKey::from_bytes(&signing_secret);

        let sealing_secret = StaticSecret::random_from_rng(OsRng);
        let seal_key = PublicKey::from(&sealing_secret).to_bytes();

        let certificate = Certificate::issue(&signing_key, seal_key, Timestamp::now());

        OwnIdentityRecord {
            signing_secret,
            sealing_secret: sealing_secret.to_bytes(),
            certificate,
        }
    }

    /// The device's own certificate
    pub fn own_certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// The device's Ed25519 signing key
    pub fn own_signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// The device's X25519 sealing secret
    pub fn own_sealing_secret(&self) -> &StaticSecret {
        &self.sealing_secret
    }

    /// Persist a peer certificate under an alias
    pub fn save_certificate(&self, certificate: &Certificate, alias: &str) -> Result<()> {
        if alias == OWN_ALIAS {
            return Err(KeyStoreError::InvalidKeyMaterial {
                reason: "own alias is reserved".to_string(),
            }
            .into());
        }
        self.backend.store(alias, &certificate.to_bytes()?)
    }

    /// Load the certificate stored under an alias
    ///
    /// Returns `None` for an unknown alias; callers must check. A present
    /// but undecodable entry is a fatal corruption error.
    pub fn certificate(&self, alias: &str) -> Result<Option<Certificate>> {
        if alias == OWN_ALIAS {
            return Ok(Some(self.certificate.clone()));
        }
        match self.backend.retrieve(alias)? {
            None => Ok(None),
            Some(bytes) => {
                let cert = Certificate::from_bytes(&bytes).map_err(|e| {
                    KeyStoreError::CorruptedEntry {
                        alias: alias.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(cert))
            }
        }
    }

    /// List every alias currently stored
    pub fn list_entries(&self) -> Result<Vec<String>> {
        self.backend.list()
    }

    /// Delete the entry stored under an alias; unknown alias is a no-op
    pub fn delete_entry(&self, alias: &str) -> Result<()> {
        if alias == OWN_ALIAS {
            return Err(KeyStoreError::InvalidKeyMaterial {
                reason: "own alias cannot be deleted".to_string(),
            }
            .into());
        }
        self.backend.delete(alias)
    }

    /// Generate a fresh 32-byte symmetric key for ad-hoc session use
    pub fn generate_symmetric_key(&self) -> [u8; 32] {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        let mut out = [0u8; 32];
        out.copy_from_slice(&key);
        out
    }

    /// SHA-256 fingerprint of a public key, lower-case hex
    pub fn public_key_fingerprint(&self, public_key: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(public_key);
        hex::encode(hasher.finalize())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
