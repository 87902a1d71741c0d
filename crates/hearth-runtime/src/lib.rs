//! Hearth Runtime Engine
//!
//! Tokio orchestration on top of `hearth-core`: the incoming dispatcher that
//! fans validated messages out to concurrent handlers, the outgoing router
//! that addresses and sends them, the shared execution service, and the TCP
//! secure-channel layer that carries the handshake and the encrypted frame
//! stream.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod dispatcher;
pub mod execution;
pub mod router;
pub mod runtime;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{ChannelContext, ChannelRegistry, SecureChannel};
pub use dispatcher::{DispatchOutcome, IncomingDispatcher, MessageHandler};
pub use execution::{ExecutionService, RepeatingTaskHandle};
pub use router::{MessageTransport, OutgoingRouter, SendHandle};
pub use runtime::HearthRuntime;
