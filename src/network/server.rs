use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio::time::{Duration, sleep};

use crate::core::{LogicalClock, Message, MessageType, PeerIdentity, PeerRegistry, PeerState};
use crate::network::Transport;
use crate::storage::FileManager;
use crate::utils::{P2PError, Result};

/// Inbound side of the node: one task per accepted connection, each reads
/// a single message, optionally replies and closes.
pub struct ConnectionServer {
    identity: PeerIdentity,
    clock: Arc<LogicalClock>,
    registry: Arc<Mutex<PeerRegistry>>,
    files: Arc<FileManager>,
    max_message_size: usize,
}

impl ConnectionServer {
    pub fn new(
        identity: PeerIdentity,
        clock: Arc<LogicalClock>,
        registry: Arc<Mutex<PeerRegistry>>,
        files: Arc<FileManager>,
        max_message_size: usize,
    ) -> Self {
        Self {
            identity,
            clock,
            registry,
            files,
            max_message_size,
        }
    }

    /// Accept until `shutdown` flips to true. Handlers still running when
    /// the loop ends are aborted with the `JoinSet`.
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        info!("Peer listening on {}", self.identity);
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("New connection from: {}", addr);
                        let server = self.clone();
                        handlers.spawn(async move {
                            match server.handle_connection(stream, addr).await {
                                Err(e) if e.is_decode_error() => {
                                    debug!("Dropped connection from {}: {}", addr, e)
                                }
                                Err(e) => warn!("Connection from {} aborted: {}", addr, e),
                                Ok(()) => {}
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Connection handler panicked: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        handlers.shutdown().await;
        info!("Listener on {} closed", self.identity);
    }

    async fn handle_connection(&self, mut stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let Some(line) = Transport::receive_line(&mut stream, self.max_message_size).await? else {
            debug!("{} closed without sending anything", addr);
            return Ok(());
        };

        let message = match Message::decode(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed message from {}: '{}'", addr, line.trim_end());
                return Err(e);
            }
        };

        if let Some(reply) = self.handle_message(message).await? {
            Transport::send_message(&mut stream, &reply).await?;
            debug!("Replied {} to {}", reply.msg_type, addr);
        }
        Ok(())
    }

    /// Apply one received message to local state and build the reply, if
    /// the message type calls for one.
    pub async fn handle_message(&self, message: Message) -> Result<Option<Message>> {
        info!("Message received: {}", message);
        self.clock.merge(message.clock).await;

        let sender_state = match message.msg_type {
            MessageType::Bye => PeerState::Offline,
            _ => PeerState::Online,
        };
        self.registry
            .lock()
            .await
            .observe(message.origin.clone(), sender_state, message.clock);

        match message.msg_type {
            MessageType::Hello | MessageType::Bye => Ok(None),
            MessageType::GetPeers => {
                let records = self.registry.lock().await.list();
                let clock = self.clock.tick().await;
                Ok(Some(Message::peer_list(self.identity.clone(), clock, &records)))
            }
            MessageType::ListFiles => {
                let files = self.files.list_entries().await?;
                let clock = self.clock.tick().await;
                Ok(Some(Message::file_list(self.identity.clone(), clock, &files)))
            }
            MessageType::Ls => {
                let files = self.files.list_entries().await?;
                let clock = self.clock.tick().await;
                Ok(Some(Message::ls_list(self.identity.clone(), clock, &files)))
            }
            MessageType::Dl => {
                let name = message.requested_file()?;
                match self.files.read_file(name).await? {
                    Some(data) => {
                        let clock = self.clock.tick().await;
                        info!("Sending {} ({} bytes) to {}", name, data.len(), message.origin);
                        Ok(Some(Message::file(self.identity.clone(), clock, name, &data)))
                    }
                    None => {
                        // No NOT_FOUND message exists in the protocol; the
                        // requester sees the connection close without a reply.
                        Err(P2PError::FileNotFound(name.to_string()))
                    }
                }
            }
            MessageType::PeerList
            | MessageType::FileList
            | MessageType::LsList
            | MessageType::File => {
                warn!(
                    "Ignoring unsolicited {} from {}",
                    message.msg_type, message.origin
                );
                Ok(None)
            }
        }
    }
}
