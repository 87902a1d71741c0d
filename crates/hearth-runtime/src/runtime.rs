//! Runtime assembly
//!
//! Wires the substrate into a running node: opens the key store, builds the
//! naming resolver, dispatcher, router and channel registry, registers them
//! all in one [`Container`], and drives the TCP listener. Shutdown reverses
//! registration order, so the router and dispatcher stop accepting work
//! before the execution pool underneath them is torn down.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use hearth_core::config::{ChannelConfig, NodeConfig};
use hearth_core::errors::TransportError;
use hearth_core::{
    BuildMetadata, Container, DeviceId, FileBackend, KeyStore, NamingResolver, Result,
};

use crate::channel::{ChannelContext, ChannelRegistry, SecureChannel};
use crate::dispatcher::IncomingDispatcher;
use crate::execution::ExecutionService;
use crate::router::OutgoingRouter;

// ----------------------------------------------------------------------------
// Hearth Runtime
// ----------------------------------------------------------------------------

/// One running Hearth node
pub struct HearthRuntime {
    node: NodeConfig,
    container: Arc<Container>,
    ctx: Arc<ChannelContext>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: SocketAddr,
}

impl HearthRuntime {
    /// Start a node: open the identity, register the component stack and
    /// begin listening
    pub async fn start(
        node: NodeConfig,
        channel_config: ChannelConfig,
        build: BuildMetadata,
    ) -> Result<Self> {
        let container = Arc::new(Container::new());

        // Registration order is teardown order reversed: the execution pool
        // goes in first so it is destroyed last.
        let execution = Arc::new(ExecutionService::new());
        container.register(execution.clone())?;

        let keystore = Arc::new(KeyStore::open(Box::new(FileBackend::open(
            &node.keystore_path,
        )?))?);
        container.register(keystore.clone())?;

        let naming = Arc::new(NamingResolver::new(
            keystore.clone(),
            node.role.is_master(),
            node.master_id,
        ));
        container.register(naming.clone())?;

        let registry = Arc::new(ChannelRegistry::new());
        container.register(registry.clone())?;

        let dispatcher = Arc::new(IncomingDispatcher::new());
        container.register(dispatcher.clone())?;

        let router = Arc::new(OutgoingRouter::new(
            naming.clone(),
            dispatcher.clone(),
            registry.clone(),
        ));
        container.register(router)?;

        let ctx = Arc::new(ChannelContext {
            keystore,
            naming,
            dispatcher,
            registry,
            build,
            config: channel_config,
        });

        let listener = TcpListener::bind((node.listen_address.as_str(), node.listen_port))
            .await
            .map_err(TransportError::Io)?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;
        tracing::info!(
            role = %node.role,
            device_id = %ctx.naming.own_id().short(),
            %local_addr,
            "hearth node listening"
        );

        let accept_ctx = ctx.clone();
        let accept_task = execution.spawn(async move {
            loop {
                let (stream, remote) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let ctx = accept_ctx.clone();
                tokio::spawn(async move {
                    match SecureChannel::accept(ctx, stream).await {
                        Ok(channel) => {
                            if let Err(e) = channel.spawn() {
                                tracing::warn!(%remote, error = %e, "channel start failed");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(%remote, error = %e, "handshake failed");
                        }
                    }
                });
            }
        });

        Ok(Self {
            node,
            container,
            ctx,
            accept_task: Mutex::new(Some(accept_task)),
            local_addr,
        })
    }

    /// Connect to a peer by address; returns the verified peer identity
    pub async fn connect(&self, address: &str) -> Result<DeviceId> {
        let channel = SecureChannel::connect(self.ctx.clone(), address).await?;
        channel.spawn()
    }

    /// Connect to the configured master address
    pub async fn connect_to_master(&self) -> Result<DeviceId> {
        let address = self.node.master_address.clone().ok_or_else(|| {
            hearth_core::HearthError::invalid_value("no master address configured")
        })?;
        self.connect(&address).await
    }

    /// The component container of this node
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// This node's identifier
    pub fn own_id(&self) -> DeviceId {
        self.ctx.naming.own_id()
    }

    /// The incoming dispatcher, for handler registration
    pub fn dispatcher(&self) -> Result<Arc<IncomingDispatcher>> {
        self.container.require()
    }

    /// The outgoing router
    pub fn router(&self) -> Result<Arc<OutgoingRouter>> {
        self.container.require()
    }

    /// The naming resolver
    pub fn naming(&self) -> Result<Arc<NamingResolver>> {
        self.container.require()
    }

    /// The bound listen address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Issue a one-shot provisioning token for QR display
    ///
    /// The scanned device connects to the embedded address and checks that
    /// the identity it handshakes with matches the embedded one.
    pub fn issue_connect_token(&self) -> hearth_core::DeviceConnectToken {
        hearth_core::DeviceConnectToken::issue(
            self.local_addr.ip().to_string(),
            self.local_addr.port(),
            self.own_id(),
        )
    }

    /// Stop accepting connections and destroy every component, in reverse
    /// registration order; blocks until the last destroy returned
    pub fn shutdown(&self) {
        if let Some(task) = self
            .accept_task
            .lock()
            .expect("accept task lock poisoned")
            .take()
        {
            task.abort();
        }
        self.container.shutdown();
        tracing::info!(device_id = %self.own_id().short(), "hearth node stopped");
    }
}

impl std::fmt::Debug for HearthRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HearthRuntime")
            .field("role", &self.node.role)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}
