//! Incoming message dispatch
//!
//! The dispatcher maintains a multimap from routing-key path to the ordered
//! set of registered handlers. On receipt of a validated message it submits
//! one independent task per handler onto the shared runtime: handlers
//! registered for the same key execute concurrently and never wait on one
//! another, so a slow or blocking handler cannot delay its siblings.
//!
//! Delivery is fire-and-forget: no handler return value flows back through
//! the channel. A message with no registered handler is not dropped here;
//! it is handed back to the caller so the terminal unhandled stage can log
//! and discard it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use hearth_core::message::validate_routing_path;
use hearth_core::{AddressedMessage, Component, Result};

// ----------------------------------------------------------------------------
// Message Handler Trait
// ----------------------------------------------------------------------------

/// Capability interface for application message handlers
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one delivered message
    async fn handle(&self, message: AddressedMessage);

    /// Called when the handler is registered for a key
    fn handler_added(&self, routing_key: &str) {
        let _ = routing_key;
    }

    /// Called once the handler is registered for no keys at all
    fn handler_removed(&self) {}
}

// ----------------------------------------------------------------------------
// Dispatch Outcome
// ----------------------------------------------------------------------------

/// Result of one delivery attempt
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The message was fanned out to this many handler tasks
    Delivered { handler_count: usize },
    /// No handler is registered for the routing key; the message is handed
    /// back for the terminal stage
    Unhandled(AddressedMessage),
}

// ----------------------------------------------------------------------------
// Incoming Dispatcher
// ----------------------------------------------------------------------------

/// Routes validated messages to registered handlers by routing key
pub struct IncomingDispatcher {
    handlers: DashMap<String, Vec<Arc<dyn MessageHandler>>>,
    /// Serializes register/unregister; delivery reads are lock-free
    registration: Mutex<()>,
}

impl IncomingDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            registration: Mutex::new(()),
        }
    }

    /// Register a handler for one or more routing keys
    ///
    /// Invokes the handler's `handler_added` callback once per key.
    pub fn register_handler(
        &self,
        handler: Arc<dyn MessageHandler>,
        routing_keys: &[&str],
    ) -> Result<()> {
        for key in routing_keys {
            validate_routing_path(key)?;
        }

        let _guard = self.lock_registration();
        for key in routing_keys {
            let mut entry = self.handlers.entry((*key).to_string()).or_default();
            let already = entry
                .iter()
                .any(|existing| same_handler(existing, &handler));
            if !already {
                entry.push(handler.clone());
                handler.handler_added(key);
            }
        }
        Ok(())
    }

    /// Remove a handler from the given keys
    ///
    /// Invokes `handler_removed` once the handler holds no keys anymore;
    /// removing it from only some of its keys does not.
    pub fn unregister_handler_from(
        &self,
        handler: &Arc<dyn MessageHandler>,
        routing_keys: &[&str],
    ) {
        let _guard = self.lock_registration();
        for key in routing_keys {
            if let Some(mut entry) = self.handlers.get_mut(*key) {
                entry.retain(|existing| !same_handler(existing, handler));
            }
        }
        self.handlers.retain(|_, list| !list.is_empty());

        if !self.is_registered(handler) {
            handler.handler_removed();
        }
    }

    /// Remove a handler from every key it is registered for
    pub fn unregister_handler(&self, handler: &Arc<dyn MessageHandler>) {
        let _guard = self.lock_registration();
        let mut removed_any = false;

        let keys: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some(mut entry) = self.handlers.get_mut(&key) {
                let before = entry.len();
                entry.retain(|existing| !same_handler(existing, handler));
                removed_any |= entry.len() != before;
            }
        }
        self.handlers.retain(|_, list| !list.is_empty());

        if removed_any {
            handler.handler_removed();
        }
    }

    fn is_registered(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        self.handlers
            .iter()
            .any(|entry| entry.value().iter().any(|h| same_handler(h, handler)))
    }

    /// Fan a validated message out to every handler of its routing key
    pub fn deliver(&self, message: AddressedMessage) -> DispatchOutcome {
        let targets: Vec<Arc<dyn MessageHandler>> = match self.handlers.get(message.routing_key())
        {
            Some(entry) if !entry.is_empty() => entry.value().clone(),
            _ => return DispatchOutcome::Unhandled(message),
        };

        let handler_count = targets.len();
        tracing::debug!(
            key = message.routing_key(),
            handlers = handler_count,
            seq = message.sequence_nr(),
            "dispatching message"
        );

        // One independent task per handler; the only shared state between
        // them is the immutable message.
        for handler in targets {
            let message = message.clone();
            tokio::spawn(async move {
                handler.handle(message).await;
            });
        }

        DispatchOutcome::Delivered { handler_count }
    }

    /// Terminal stage for unroutable messages: log and discard
    pub fn discard_unhandled(&self, message: AddressedMessage) {
        tracing::warn!(
            key = message.routing_key(),
            from = %message.from().short(),
            seq = message.sequence_nr(),
            "no handler registered, discarding message"
        );
    }

    /// Number of handlers currently registered for a key
    pub fn handler_count(&self, routing_key: &str) -> usize {
        self.handlers
            .get(routing_key)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    fn lock_registration(&self) -> std::sync::MutexGuard<'_, ()> {
        self.registration
            .lock()
            .expect("dispatcher registration lock poisoned")
    }
}

fn same_handler(a: &Arc<dyn MessageHandler>, b: &Arc<dyn MessageHandler>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl Default for IncomingDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for IncomingDispatcher {
    fn destroy(&self) {
        // Stop accepting deliveries before the executor underneath goes away
        let _guard = self.lock_registration();
        self.handlers.clear();
        tracing::debug!("dispatcher cleared on destroy");
    }
}

impl std::fmt::Debug for IncomingDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingDispatcher")
            .field("keys", &self.handlers.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::{DeviceId, Message};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        calls: AtomicUsize,
        added: AtomicUsize,
        removed: AtomicUsize,
    }

    impl Counter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                added: AtomicUsize::new(0),
                removed: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MessageHandler for Counter {
        async fn handle(&self, _message: AddressedMessage) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        fn handler_added(&self, _routing_key: &str) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }

        fn handler_removed(&self) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn message(key: &str) -> AddressedMessage {
        AddressedMessage::address(
            Message::new(&1u32).unwrap(),
            DeviceId::new([1; 32]),
            DeviceId::new([2; 32]),
            key,
            1,
        )
    }

    #[tokio::test]
    async fn test_register_callbacks() {
        let dispatcher = IncomingDispatcher::new();
        let counter = Counter::new();
        let handler: Arc<dyn MessageHandler> = counter.clone();

        dispatcher
            .register_handler(handler.clone(), &["/test1", "/test2"])
            .unwrap();
        assert_eq!(counter.added.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.handler_count("/test1"), 1);

        // Double registration on the same key is a no-op
        dispatcher.register_handler(handler.clone(), &["/test1"]).unwrap();
        assert_eq!(dispatcher.handler_count("/test1"), 1);

        dispatcher.unregister_handler(&handler);
        assert_eq!(counter.removed.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.handler_count("/test1"), 0);
    }

    #[tokio::test]
    async fn test_partial_unregister_keeps_handler_alive() {
        let dispatcher = IncomingDispatcher::new();
        let counter = Counter::new();
        let handler: Arc<dyn MessageHandler> = counter.clone();

        dispatcher
            .register_handler(handler.clone(), &["/test1", "/test2"])
            .unwrap();

        dispatcher.unregister_handler_from(&handler, &["/test1"]);
        assert_eq!(counter.removed.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.handler_count("/test1"), 0);
        assert_eq!(dispatcher.handler_count("/test2"), 1);

        dispatcher.unregister_handler_from(&handler, &["/test2"]);
        assert_eq!(counter.removed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unhandled_is_returned_not_dropped() {
        let dispatcher = IncomingDispatcher::new();
        match dispatcher.deliver(message("/nobody/home")) {
            DispatchOutcome::Unhandled(msg) => {
                assert_eq!(msg.routing_key(), "/nobody/home");
                dispatcher.discard_unhandled(msg);
            }
            DispatchOutcome::Delivered { .. } => panic!("expected unhandled"),
        }
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let dispatcher = IncomingDispatcher::new();
        let handler: Arc<dyn MessageHandler> = Counter::new();
        assert!(dispatcher.register_handler(handler, &["missing-slash"]).is_err());
    }

    #[tokio::test]
    async fn test_destroy_stops_delivery() {
        let dispatcher = IncomingDispatcher::new();
        let counter = Counter::new();
        dispatcher
            .register_handler(counter.clone(), &["/test1"])
            .unwrap();

        dispatcher.destroy();
        assert!(matches!(
            dispatcher.deliver(message("/test1")),
            DispatchOutcome::Unhandled(_)
        ));
    }
}
