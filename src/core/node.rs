use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::core::{Config, LogicalClock, PeerIdentity, PeerRegistry};
use crate::network::{ConnectionServer, DiscoveryClient};
use crate::storage::FileManager;
use crate::transfer::FileExchange;
use crate::utils::{NodeUtils, P2PError, Result};

/// One running peer: the shared clock and registry plus the components that
/// act on them.
pub struct Node {
    pub config: Config,
    identity: PeerIdentity,
    local_addr: SocketAddr,
    clock: Arc<LogicalClock>,
    registry: Arc<Mutex<PeerRegistry>>,
    files: Arc<FileManager>,
    discovery: DiscoveryClient,
    exchange: FileExchange,
    listener: Option<TcpListener>,
    server_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl Node {
    /// Validate `config`, seed the registry from the neighbors file and bind
    /// the listening socket. Nothing is accepted until `start`.
    pub async fn new(config: Config) -> Result<Self> {
        let mut identity = config.validate()?;

        let registry = PeerRegistry::from_neighbors_file(&config.neighbors_file).await?;
        info!("Loaded {} neighbors", registry.len());

        let files = Arc::new(FileManager::new(config.shared_dir.clone(), config.download_dir()).await?);

        let bind_addr = NodeUtils::resolve(&identity).await?;
        let listener = NodeUtils::create_reusable_tcp_listener(bind_addr)?;
        let local_addr = listener.local_addr()?;
        // Port 0 asks the OS for one; announce the port actually bound.
        identity.port = local_addr.port();

        let clock = Arc::new(LogicalClock::new());
        let registry = Arc::new(Mutex::new(registry));

        let discovery = DiscoveryClient::new(
            identity.clone(),
            clock.clone(),
            registry.clone(),
            config.request_timeout,
            config.max_message_size,
        );
        let exchange = FileExchange::new(
            identity.clone(),
            clock.clone(),
            registry.clone(),
            files.clone(),
            config.request_timeout,
            config.max_message_size,
        );

        Ok(Self {
            config,
            identity,
            local_addr,
            clock,
            registry,
            files,
            discovery,
            exchange,
            listener: Some(listener),
            server_handle: None,
            shutdown_tx: None,
        })
    }

    /// Start serving inbound connections in the background.
    pub fn start(&mut self) -> Result<()> {
        let listener = self.listener.take().ok_or_else(|| {
            P2PError::ConfigError(format!("Node {} already started", self.identity))
        })?;

        let server = Arc::new(ConnectionServer::new(
            self.identity.clone(),
            self.clock.clone(),
            self.registry.clone(),
            self.files.clone(),
            self.config.max_message_size,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);
        self.server_handle = Some(tokio::spawn(server.run(listener, shutdown_rx)));

        info!("Starting node {}", self.identity);
        Ok(())
    }

    /// Say `BYE` to every known peer, then stop the listener.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down node {}", self.identity);
        self.discovery.leave().await;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.server_handle.take() {
            if let Err(e) = handle.await {
                warn!("Listener task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn clock(&self) -> &Arc<LogicalClock> {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<Mutex<PeerRegistry>> {
        &self.registry
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    pub fn discovery(&self) -> &DiscoveryClient {
        &self.discovery
    }

    pub fn exchange(&self) -> &FileExchange {
        &self.exchange
    }
}
