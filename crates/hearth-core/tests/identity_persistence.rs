//! Identity persistence across key-store reopens
//!
//! The device identity must survive a process restart: reopening the same
//! file-backed store yields the same certificate, and the derived DeviceId
//! is equal for byte-identical certificates.

use hearth_core::keystore::{FileBackend, KeyStore};
use hearth_core::naming::NamingResolver;
use std::sync::Arc;

#[test]
fn identity_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let (first_cert, first_id) = {
        let store = KeyStore::open(Box::new(FileBackend::open(dir.path()).unwrap())).unwrap();
        let cert = store.own_certificate().clone();
        (cert.clone(), cert.device_id())
    };

    // "Process restart": open the same directory again
    let store = KeyStore::open(Box::new(FileBackend::open(dir.path()).unwrap())).unwrap();
    let reopened_cert = store.own_certificate().clone();

    assert_eq!(reopened_cert, first_cert);
    assert_eq!(reopened_cert.device_id(), first_id);
}

#[test]
fn peer_certificates_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let peer_dir = tempfile::tempdir().unwrap();

    let peer = KeyStore::open(Box::new(FileBackend::open(peer_dir.path()).unwrap())).unwrap();
    let peer_cert = peer.own_certificate().clone();
    let peer_id = peer_cert.device_id();

    {
        let store = KeyStore::open(Box::new(FileBackend::open(dir.path()).unwrap())).unwrap();
        store
            .save_certificate(&peer_cert, &peer_id.to_string())
            .unwrap();
    }

    let store = Arc::new(KeyStore::open(Box::new(FileBackend::open(dir.path()).unwrap())).unwrap());
    let resolver = NamingResolver::new(store, false, None);

    assert_eq!(resolver.certificate(&peer_id).unwrap(), peer_cert);
    assert_eq!(resolver.device_id(&peer_cert), peer_id);
}

#[test]
fn listing_reflects_saved_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = KeyStore::open(Box::new(FileBackend::open(dir.path()).unwrap())).unwrap();

    let peer_dir = tempfile::tempdir().unwrap();
    let peer = KeyStore::open(Box::new(FileBackend::open(peer_dir.path()).unwrap())).unwrap();
    let alias = peer.own_certificate().device_id().to_string();
    store
        .save_certificate(peer.own_certificate(), &alias)
        .unwrap();

    let entries = store.list_entries().unwrap();
    assert!(entries.contains(&"own".to_string()));
    assert!(entries.contains(&alias));

    store.delete_entry(&alias).unwrap();
    assert!(!store.list_entries().unwrap().contains(&alias));
}
