//! Secure channels over TCP
//!
//! Per connection: one plaintext hello exchange (certificates are public),
//! then 0..n application frames, each signed-then-encrypted by the crypto
//! pipeline. The handshake outcome binds a verified peer identity to the
//! connection; every inbound frame is authorized against that binding
//! before the dispatcher sees it.
//!
//! Cryptographic failures close the connection. Retrying cannot tell
//! corruption from active tampering, so no partial or garbled message is
//! ever delivered, and the channel is not resumed. Reconnection with
//! backoff is the transport owner's business, outside this crate.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use uuid::Uuid;

use hearth_core::config::ChannelConfig;
use hearth_core::errors::TransportError;
use hearth_core::handshake::establish_peer;
use hearth_core::pipeline::{InboundPipeline, OutboundPipeline, MAX_FRAME_BYTES};
use hearth_core::{
    AddressedMessage, BuildMetadata, ChannelState, ClientHello, Component, DeviceId,
    EstablishedPeer, KeyStore, NamingResolver, Result, ServerHello,
};

use crate::dispatcher::{DispatchOutcome, IncomingDispatcher};
use crate::router::MessageTransport;

/// Upper bound on one wire frame: pipeline chunk plus envelope overhead
const MAX_WIRE_FRAME: usize = MAX_FRAME_BYTES + 4096;

// ----------------------------------------------------------------------------
// Channel Context
// ----------------------------------------------------------------------------

/// Shared collaborators every channel needs
pub struct ChannelContext {
    pub keystore: Arc<KeyStore>,
    pub naming: Arc<NamingResolver>,
    pub dispatcher: Arc<IncomingDispatcher>,
    pub registry: Arc<ChannelRegistry>,
    pub build: BuildMetadata,
    pub config: ChannelConfig,
}

// ----------------------------------------------------------------------------
// Channel Registry
// ----------------------------------------------------------------------------

struct OutboundItem {
    message: AddressedMessage,
    done: oneshot::Sender<Result<()>>,
}

#[derive(Clone)]
struct ChannelHandle {
    outbound: mpsc::Sender<OutboundItem>,
    connection_id: Uuid,
}

/// Open channels by peer identity; the send side of the transport
pub struct ChannelRegistry {
    channels: DashMap<DeviceId, ChannelHandle>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Whether a channel to `peer` is currently open
    pub fn is_connected(&self, peer: &DeviceId) -> bool {
        self.channels.contains_key(peer)
    }

    fn insert(&self, peer: DeviceId, handle: ChannelHandle) {
        if let Some(previous) = self.channels.insert(peer, handle) {
            tracing::info!(
                peer = %peer.short(),
                old_connection = %previous.connection_id,
                "replaced existing channel to peer"
            );
        }
    }

    fn remove_connection(&self, peer: &DeviceId, connection_id: Uuid) {
        // Only drop the mapping if it still belongs to this connection; a
        // newer channel to the same peer must survive.
        self.channels
            .remove_if(peer, |_, handle| handle.connection_id == connection_id);
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageTransport for ChannelRegistry {
    async fn send(&self, message: AddressedMessage) -> Result<()> {
        let destination = message.destination();
        let handle = self
            .channels
            .get(&destination)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::NoChannel { id: destination })?;

        let (done, completion) = oneshot::channel();
        handle
            .outbound
            .send(OutboundItem { message, done })
            .await
            .map_err(|_| TransportError::ChannelClosed)?;
        completion
            .await
            .map_err(|_| TransportError::ChannelClosed)?
    }
}

impl Component for ChannelRegistry {
    fn destroy(&self) {
        // Dropping the senders ends every writer task
        self.channels.clear();
        tracing::debug!("channel registry closed all channels");
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("open", &self.channels.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Wire Framing
// ----------------------------------------------------------------------------

async fn write_wire_frame(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_WIRE_FRAME {
        return Err(hearth_core::CryptoError::FrameTooLarge {
            size: bytes.len(),
            limit: MAX_WIRE_FRAME,
        }
        .into());
    }
    writer
        .write_all(&(bytes.len() as u32).to_be_bytes())
        .await
        .map_err(TransportError::Io)?;
    writer.write_all(bytes).await.map_err(TransportError::Io)?;
    writer.flush().await.map_err(TransportError::Io)?;
    Ok(())
}

async fn read_wire_frame(reader: &mut OwnedReadHalf) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TransportError::Io(e).into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_WIRE_FRAME {
        return Err(hearth_core::CryptoError::FrameTooLarge {
            size: len,
            limit: MAX_WIRE_FRAME,
        }
        .into());
    }

    let mut frame = vec![0u8; len];
    reader
        .read_exact(&mut frame)
        .await
        .map_err(TransportError::Io)?;
    Ok(Some(frame))
}

// ----------------------------------------------------------------------------
// Secure Channel
// ----------------------------------------------------------------------------

/// A handshaken connection, ready to pump frames
pub struct SecureChannel {
    ctx: Arc<ChannelContext>,
    state: ChannelState,
    peer: EstablishedPeer,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl SecureChannel {
    /// Server side: accept one connection and run the handshake
    pub async fn accept(ctx: Arc<ChannelContext>, stream: TcpStream) -> Result<Self> {
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();

        let hello_bytes = timeout(ctx.config.handshake_timeout, read_wire_frame(&mut reader))
            .await
            .map_err(|_| TransportError::ConnectionFailed {
                peer: "unknown".to_string(),
                reason: "handshake timed out".to_string(),
            })??
            .ok_or(TransportError::ChannelClosed)?;

        let hello = ClientHello::from_bytes(&hello_bytes)?;
        let peer = establish_peer(hello.certificate)?;
        log_build(&hello.build, &ctx.build);

        // Remember who connected so the naming layer can resolve them later
        ctx.keystore
            .save_certificate(&peer.certificate, &peer.device_id.to_string())?;

        let server_hello = ServerHello {
            certificate: ctx.keystore.own_certificate().clone(),
            build: ctx.build.clone(),
        };
        write_wire_frame(&mut writer, &server_hello.to_bytes()?).await?;

        let mut state = ChannelState::new();
        state.bind(peer.clone())?;
        tracing::info!(peer = %peer.device_id.short(), "accepted secure channel");

        Ok(Self {
            ctx,
            state,
            peer,
            reader,
            writer,
        })
    }

    /// Client side: connect and run the handshake
    pub async fn connect(ctx: Arc<ChannelContext>, address: &str) -> Result<Self> {
        let stream =
            TcpStream::connect(address)
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    peer: address.to_string(),
                    reason: e.to_string(),
                })?;
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();

        let believed_master = ctx
            .naming
            .master_id()
            .and_then(|id| ctx.naming.certificate(&id).ok());
        let hello = ClientHello {
            certificate: ctx.keystore.own_certificate().clone(),
            believed_master,
            build: ctx.build.clone(),
        };
        write_wire_frame(&mut writer, &hello.to_bytes()?).await?;

        let reply_bytes = timeout(ctx.config.handshake_timeout, read_wire_frame(&mut reader))
            .await
            .map_err(|_| TransportError::ConnectionFailed {
                peer: address.to_string(),
                reason: "handshake timed out".to_string(),
            })??
            .ok_or(TransportError::ChannelClosed)?;

        let server_hello = ServerHello::from_bytes(&reply_bytes)?;
        let peer = establish_peer(server_hello.certificate)?;
        log_build(&server_hello.build, &ctx.build);

        ctx.keystore
            .save_certificate(&peer.certificate, &peer.device_id.to_string())?;

        // First contact on a freshly provisioned device: the dialed address
        // came from configuration or a connect token, so record its identity
        // as the master.
        if ctx.naming.master_id().is_none() {
            ctx.naming.set_master_id(peer.device_id);
        }

        let mut state = ChannelState::new();
        state.bind(peer.clone())?;
        tracing::info!(peer = %peer.device_id.short(), address, "opened secure channel");

        Ok(Self {
            ctx,
            state,
            peer,
            reader,
            writer,
        })
    }

    /// The peer bound to this channel
    pub fn peer_id(&self) -> DeviceId {
        self.peer.device_id
    }

    /// Register the channel and spawn its reader and writer tasks
    ///
    /// Returns the bound peer identity; the pumps run until the connection
    /// closes or a fatal error ends it.
    pub fn spawn(self) -> Result<DeviceId> {
        let Self {
            ctx,
            state,
            peer,
            mut reader,
            mut writer,
        } = self;

        let peer_id = peer.device_id;
        let connection_id = Uuid::new_v4();

        let outbound_pipeline = OutboundPipeline::new(
            ctx.keystore.own_signing_key().clone(),
            peer.certificate.seal_key,
        );
        let inbound_pipeline = InboundPipeline::new(
            ctx.keystore.own_sealing_secret().clone(),
            peer.certificate.verifying_key()?,
        );

        let (sender, mut outbound_rx) = mpsc::channel::<OutboundItem>(ctx.config.outbound_buffer_size);
        ctx.registry.insert(
            peer_id,
            ChannelHandle {
                outbound: sender,
                connection_id,
            },
        );

        // Writer: drain the outbound queue through the crypto pipeline
        let writer_task = tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                let result = async {
                    let envelope = item.message.to_bytes()?;
                    let frame = outbound_pipeline.process(&envelope)?;
                    write_wire_frame(&mut writer, &frame).await
                }
                .await;

                let fatal = result.is_err();
                let _ = item.done.send(result);
                if fatal {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        // Reader: decrypt, verify, authorize, dispatch
        let reader_ctx = ctx.clone();
        tokio::spawn(async move {
            let own_id = reader_ctx.naming.own_id();
            loop {
                let frame = match read_wire_frame(&mut reader).await {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        tracing::debug!(peer = %peer_id.short(), "channel closed by peer");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(peer = %peer_id.short(), error = %e, "channel read failed");
                        break;
                    }
                };

                match decode_inbound(&inbound_pipeline, &state, &frame) {
                    Ok(message) => {
                        if message.destination() != own_id {
                            tracing::warn!(
                                peer = %peer_id.short(),
                                destination = %message.destination().short(),
                                "discarding message addressed to another device"
                            );
                            continue;
                        }
                        if let DispatchOutcome::Unhandled(msg) =
                            reader_ctx.dispatcher.deliver(message)
                        {
                            reader_ctx.dispatcher.discard_unhandled(msg);
                        }
                    }
                    Err(e) => {
                        // Corruption and spoofing are indistinguishable;
                        // close instead of resuming.
                        tracing::error!(
                            peer = %peer_id.short(),
                            error = %e,
                            "fatal channel error, closing connection"
                        );
                        break;
                    }
                }
            }

            reader_ctx.registry.remove_connection(&peer_id, connection_id);
            writer_task.abort();
        });

        Ok(peer_id)
    }
}

/// Inbound frame processing: decrypt outermost, verify signature, decode the
/// envelope, then authorize it against the bound peer. Nothing reaches a
/// handler unless every step passed.
fn decode_inbound(
    pipeline: &InboundPipeline,
    state: &ChannelState,
    frame: &[u8],
) -> Result<AddressedMessage> {
    let envelope = pipeline.process(frame)?;
    let message = AddressedMessage::from_bytes(&envelope)?;
    state.authorize_inbound(&message)?;
    Ok(message)
}

fn log_build(peer_build: &BuildMetadata, own_build: &BuildMetadata) {
    // Diagnostics only; build metadata never enters a trust decision
    if peer_build.protocol_version != own_build.protocol_version {
        tracing::warn!(
            peer_protocol = peer_build.protocol_version,
            own_protocol = own_build.protocol_version,
            peer_app = %peer_build.app_name,
            peer_version = %peer_build.version,
            "peer runs a different protocol version"
        );
    } else {
        tracing::debug!(
            peer_app = %peer_build.app_name,
            peer_version = %peer_build.version,
            "peer build metadata"
        );
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::keystore::MemoryBackend;
    use hearth_core::Message;

    fn context() -> Arc<ChannelContext> {
        let keystore = Arc::new(KeyStore::open(Box::new(MemoryBackend::new())).unwrap());
        let naming = Arc::new(NamingResolver::new(keystore.clone(), true, None));
        Arc::new(ChannelContext {
            keystore,
            naming,
            dispatcher: Arc::new(IncomingDispatcher::new()),
            registry: Arc::new(ChannelRegistry::new()),
            build: BuildMetadata::new("hearth", "0.1.0", 1),
            config: ChannelConfig::default(),
        })
    }

    #[tokio::test]
    async fn test_handshake_binds_both_ends() {
        let server_ctx = context();
        let client_ctx = context();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = {
            let ctx = server_ctx.clone();
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                SecureChannel::accept(ctx, stream).await.unwrap()
            })
        };

        let client = SecureChannel::connect(client_ctx.clone(), &address)
            .await
            .unwrap();
        let server = server.await.unwrap();

        assert_eq!(
            server.peer_id(),
            client_ctx.keystore.own_certificate().device_id()
        );
        assert_eq!(
            client.peer_id(),
            server_ctx.keystore.own_certificate().device_id()
        );

        // Both sides learned the peer certificate
        assert!(server_ctx
            .keystore
            .certificate(&server.peer_id().to_string())
            .unwrap()
            .is_some());
        assert!(client_ctx
            .keystore
            .certificate(&client.peer_id().to_string())
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_registry_send_without_channel_fails() {
        let registry = ChannelRegistry::new();
        let message = AddressedMessage::address(
            Message::new(&()).unwrap(),
            DeviceId::new([1; 32]),
            DeviceId::new([2; 32]),
            "/test1",
            1,
        );
        let err = registry.send(message).await.unwrap_err();
        assert!(matches!(
            err,
            hearth_core::HearthError::Transport(TransportError::NoChannel { .. })
        ));
    }
}
