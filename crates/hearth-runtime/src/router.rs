//! Outgoing message routing
//!
//! The send-side counterpart of the dispatcher: stamps outgoing messages
//! with a fresh monotonically increasing sequence number, binds them to
//! source, destination and routing key, and resolves the transport: direct
//! local delivery when the destination is this device, otherwise a handoff
//! to the channel layer. Every send returns a [`SendHandle`] exposing the
//! completion as an awaitable, cancellable future.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use hearth_core::errors::{NamingError, TransportError};
use hearth_core::{AddressedMessage, Component, DeviceId, Message, NamingResolver, Result};

use crate::dispatcher::{DispatchOutcome, IncomingDispatcher};

// ----------------------------------------------------------------------------
// Transport Abstraction
// ----------------------------------------------------------------------------

/// Network-facing delivery of an addressed message
///
/// Implemented by the channel registry; tests substitute their own.
#[async_trait]
pub trait MessageTransport: Send + Sync + 'static {
    async fn send(&self, message: AddressedMessage) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Send Handle
// ----------------------------------------------------------------------------

/// Awaitable, cancellable completion of one send
pub struct SendHandle {
    completion: oneshot::Receiver<Result<()>>,
    abort: tokio::task::AbortHandle,
}

impl SendHandle {
    /// Await the underlying send completion
    pub async fn completed(self) -> Result<()> {
        match self.completion.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Cancelled.into()),
        }
    }

    /// Cancel the send if it has not completed yet; idempotent
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

impl std::fmt::Debug for SendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendHandle").finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Outgoing Router
// ----------------------------------------------------------------------------

/// Addresses and sends application messages
pub struct OutgoingRouter {
    own_id: DeviceId,
    naming: Arc<NamingResolver>,
    dispatcher: Arc<IncomingDispatcher>,
    transport: Arc<dyn MessageTransport>,
    /// Per-sender sequence counter; messages are never reused across sends
    sequence: AtomicU64,
}

impl OutgoingRouter {
    pub fn new(
        naming: Arc<NamingResolver>,
        dispatcher: Arc<IncomingDispatcher>,
        transport: Arc<dyn MessageTransport>,
    ) -> Self {
        Self {
            own_id: naming.own_id(),
            naming,
            dispatcher,
            transport,
            sequence: AtomicU64::new(1),
        }
    }

    /// Address `message` to `to` under `routing_key` and send it
    pub fn send_message(
        &self,
        to: DeviceId,
        routing_key: &str,
        message: Message,
    ) -> SendHandle {
        let sequence_nr = self.sequence.fetch_add(1, Ordering::Relaxed);
        let addressed =
            AddressedMessage::address(message, self.own_id, to, routing_key, sequence_nr);

        let (done, completion) = oneshot::channel();
        let task = if to == self.own_id {
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                if let DispatchOutcome::Unhandled(msg) = dispatcher.deliver(addressed) {
                    dispatcher.discard_unhandled(msg);
                }
                let _ = done.send(Ok(()));
            })
        } else {
            let transport = self.transport.clone();
            tokio::spawn(async move {
                let result = transport.send(addressed).await;
                let _ = done.send(result);
            })
        };

        SendHandle {
            completion,
            abort: task.abort_handle(),
        }
    }

    /// Send to the master, resolving its identity through the naming layer
    ///
    /// Fails softly-typed before the master is known; callers may retry
    /// after provisioning or a completed handshake supplies the identity.
    pub fn send_to_master(&self, routing_key: &str, message: Message) -> Result<SendHandle> {
        let master = self
            .naming
            .master_id()
            .ok_or(NamingError::MasterUnknown)?;
        Ok(self.send_message(master, routing_key, message))
    }

    /// Deliver locally to this device's own dispatcher
    pub fn send_local(&self, routing_key: &str, message: Message) -> SendHandle {
        self.send_message(self.own_id, routing_key, message)
    }

    /// Send a reply correlated to `request` back to its sender
    ///
    /// Handler failures travel this way as [`hearth_core::ErrorPayload`]
    /// replies: ordinary messages, never channel-level failures.
    pub fn reply(
        &self,
        request: &AddressedMessage,
        routing_key: &str,
        message: Message,
    ) -> SendHandle {
        self.send_message(
            request.from(),
            routing_key,
            message.replying_to(request.sequence_nr()),
        )
    }

    /// This device's identifier
    pub fn own_id(&self) -> DeviceId {
        self.own_id
    }
}

impl Component for OutgoingRouter {}

impl std::fmt::Debug for OutgoingRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingRouter")
            .field("own_id", &self.own_id)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::keystore::{KeyStore, MemoryBackend};
    use std::sync::Mutex;

    struct RecordingTransport {
        sent: Mutex<Vec<AddressedMessage>>,
    }

    #[async_trait]
    impl MessageTransport for RecordingTransport {
        async fn send(&self, message: AddressedMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn router() -> (OutgoingRouter, Arc<RecordingTransport>) {
        let keystore = Arc::new(KeyStore::open(Box::new(MemoryBackend::new())).unwrap());
        let naming = Arc::new(NamingResolver::new(keystore, false, None));
        let dispatcher = Arc::new(IncomingDispatcher::new());
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
        });
        (
            OutgoingRouter::new(naming, dispatcher, transport.clone()),
            transport,
        )
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_monotonic() {
        let (router, transport) = router();
        let to = DeviceId::new([9; 32]);

        for _ in 0..3 {
            router
                .send_message(to, "/master/light/set", Message::new(&true).unwrap())
                .completed()
                .await
                .unwrap();
        }

        let sent = transport.sent.lock().unwrap();
        let sequences: Vec<u64> = sent.iter().map(|m| m.sequence_nr()).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(sent.iter().all(|m| m.from() == router.own_id()));
    }

    #[tokio::test]
    async fn test_send_to_master_unknown_is_typed() {
        let (router, _) = router();
        let err = router
            .send_to_master("/master/ping", Message::new(&()).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            hearth_core::HearthError::Naming(NamingError::MasterUnknown)
        ));
    }

    #[tokio::test]
    async fn test_reply_carries_reference() {
        let (router, transport) = router();
        let request = AddressedMessage::address(
            Message::new(&"do it".to_string()).unwrap(),
            DeviceId::new([5; 32]),
            router.own_id(),
            "/slave/relay/set",
            41,
        );

        router
            .reply(&request, "/slave/relay/set", Message::new(&"done".to_string()).unwrap())
            .completed()
            .await
            .unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination(), request.from());
        assert_eq!(sent[0].header().references, Some(41));
    }
}
