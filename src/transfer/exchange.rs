use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::{LogicalClock, Message, MessageType, PeerIdentity, PeerRegistry, PeerState};
use crate::network::Transport;
use crate::storage::FileManager;
use crate::utils::{P2PError, Result};

/// A file offered by a remote peer, as seen during a search round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    pub size_bytes: u64,
    pub owner: PeerIdentity,
}

/// Client side of file sharing: remote listings, search and download.
#[derive(Clone)]
pub struct FileExchange {
    identity: PeerIdentity,
    clock: Arc<LogicalClock>,
    registry: Arc<Mutex<PeerRegistry>>,
    files: Arc<FileManager>,
    request_timeout: Duration,
    max_message_size: usize,
}

impl FileExchange {
    pub fn new(
        identity: PeerIdentity,
        clock: Arc<LogicalClock>,
        registry: Arc<Mutex<PeerRegistry>>,
        files: Arc<FileManager>,
        request_timeout: Duration,
        max_message_size: usize,
    ) -> Self {
        Self {
            identity,
            clock,
            registry,
            files,
            request_timeout,
            max_message_size,
        }
    }

    /// Send `LS` to every ONLINE peer, one after the other, and collect what
    /// they share. Results keep the order in which peers were asked.
    pub async fn search(&self) -> Vec<FileRecord> {
        let targets = self.registry.lock().await.online();
        let mut found = Vec::new();

        for target in targets {
            let clock = self.clock.tick().await;
            let request = Message::ls(self.identity.clone(), clock);
            info!("Forwarding message '{}' to {}", request, target);

            match self.call(&target, &request).await {
                Ok(Some(reply)) => match reply.ls_entries() {
                    Ok(entries) => {
                        found.extend(entries.into_iter().map(|entry| FileRecord {
                            name: entry.name,
                            size_bytes: entry.size,
                            owner: target.clone(),
                        }));
                    }
                    Err(e) => warn!("Discarding file list from {}: {}", target, e),
                },
                Ok(None) => warn!("{} closed the connection without a file list", target),
                Err(e) => warn!("Could not reach {}: {}", target, e),
            }
        }

        info!("Search finished with {} files", found.len());
        found
    }

    /// Names shared by one peer (`LIST_FILES`).
    pub async fn list_remote_files(&self, peer: &PeerIdentity) -> Result<Vec<String>> {
        let clock = self.clock.tick().await;
        let request = Message::list_files(self.identity.clone(), clock);
        info!("Forwarding message '{}' to {}", request, peer);

        match self.call(peer, &request).await? {
            Some(reply) => reply.file_names(),
            None => Err(P2PError::InvalidPayload(format!(
                "{} closed the connection without a file list",
                peer
            ))),
        }
    }

    /// Fetch `file_name` from `peer` in one `DL`/`FILE` exchange and store it
    /// in the download directory.
    pub async fn download(&self, peer: &PeerIdentity, file_name: &str) -> Result<PathBuf> {
        let clock = self.clock.tick().await;
        let request = Message::dl(self.identity.clone(), clock, file_name);
        info!("Forwarding message '{}' to {}", request, peer);

        let reply = match self.call(peer, &request).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                return Err(P2PError::DownloadError(format!(
                    "{} sent no reply for '{}'",
                    peer, file_name
                )));
            }
            Err(e) => return Err(P2PError::DownloadError(e.to_string())),
        };

        if reply.msg_type != MessageType::File {
            return Err(P2PError::DownloadError(format!(
                "expected FILE from {}, got {}",
                peer, reply.msg_type
            )));
        }

        let payload = reply
            .file_payload()
            .map_err(|e| P2PError::DownloadError(e.to_string()))?;
        if payload.name != file_name {
            return Err(P2PError::DownloadError(format!(
                "{} answered '{}' with file '{}'",
                peer, file_name, payload.name
            )));
        }
        let path = self.files.store_download(file_name, &payload.data).await?;

        info!("Download of file {} finished", file_name);
        Ok(path)
    }

    /// One request/reply round that keeps the clock and the registry in step
    /// with the outcome: a reply merges its clock and marks the peer ONLINE,
    /// any failed exchange (connect, reset, timeout, garbled reply) marks it
    /// OFFLINE.
    async fn call(&self, peer: &PeerIdentity, request: &Message) -> Result<Option<Message>> {
        match Transport::request(peer, request, self.request_timeout, self.max_message_size).await
        {
            Ok(Some(reply)) => {
                info!("Reply received: {} {} {}", reply.origin, reply.clock, reply.msg_type);
                self.clock.merge(reply.clock).await;
                self.registry
                    .lock()
                    .await
                    .observe(peer.clone(), PeerState::Online, reply.clock);
                Ok(Some(reply))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.registry.lock().await.mark(peer, PeerState::Offline);
                Err(e)
            }
        }
    }
}
