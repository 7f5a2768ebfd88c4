use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::{
    LogicalClock, Message, MessageType, PeerIdentity, PeerRegistry, PeerState, UpsertOutcome,
};
use crate::network::Transport;
use crate::utils::Result;

/// Outcome of one `pull_peers` round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub reachable: usize,
    pub unreachable: usize,
    /// Advertised records that were inserted or replaced a staler one.
    pub updated: usize,
}

/// Outbound membership operations: greet, pull peers and leave.
#[derive(Clone)]
pub struct DiscoveryClient {
    identity: PeerIdentity,
    clock: Arc<LogicalClock>,
    registry: Arc<Mutex<PeerRegistry>>,
    request_timeout: Duration,
    max_message_size: usize,
}

impl DiscoveryClient {
    pub fn new(
        identity: PeerIdentity,
        clock: Arc<LogicalClock>,
        registry: Arc<Mutex<PeerRegistry>>,
        request_timeout: Duration,
        max_message_size: usize,
    ) -> Self {
        Self {
            identity,
            clock,
            registry,
            request_timeout,
            max_message_size,
        }
    }

    /// Send `HELLO` to one peer and record whether it answered the connection.
    pub async fn greet(&self, target: &PeerIdentity) -> Result<()> {
        let clock = self.clock.tick().await;
        let message = Message::hello(self.identity.clone(), clock);
        info!("Forwarding message '{}' to {}", message, target);

        let result = Transport::notify(target, &message, self.request_timeout).await;
        let state = match &result {
            Ok(()) => PeerState::Online,
            Err(e) => {
                warn!("Failed to greet {}: {}", target, e);
                PeerState::Offline
            }
        };
        self.registry.lock().await.mark(target, state);
        result
    }

    /// Ask every known peer for its peer list and merge the answers. The
    /// target set is fixed before the first request goes out.
    pub async fn pull_peers(&self) -> PullSummary {
        let targets = self.registry.lock().await.identities();
        let mut summary = PullSummary::default();

        for target in targets {
            let clock = self.clock.tick().await;
            let request = Message::get_peers(self.identity.clone(), clock);
            info!("Forwarding message '{}' to {}", request, target);

            match Transport::request(&target, &request, self.request_timeout, self.max_message_size)
                .await
            {
                Ok(Some(reply)) => {
                    summary.reachable += 1;
                    summary.updated += self.absorb_peer_list(&target, reply).await;
                }
                Ok(None) => {
                    warn!("{} closed the connection without a peer list", target);
                    summary.reachable += 1;
                    self.registry.lock().await.mark(&target, PeerState::Online);
                }
                Err(e) => {
                    warn!("Could not reach {}: {}", target, e);
                    summary.unreachable += 1;
                    self.registry.lock().await.mark(&target, PeerState::Offline);
                }
            }
        }

        info!(
            "Peer pull finished: {} reachable, {} unreachable, {} records updated",
            summary.reachable, summary.unreachable, summary.updated
        );
        summary
    }

    async fn absorb_peer_list(&self, target: &PeerIdentity, reply: Message) -> usize {
        info!("Reply received: '{}'", reply);
        self.clock.merge(reply.clock).await;

        let entries = match reply.msg_type {
            MessageType::PeerList => reply.peer_entries(),
            other => {
                warn!("Expected PEER_LIST from {}, got {}", target, other);
                Ok(Vec::new())
            }
        };

        let mut registry = self.registry.lock().await;
        registry.observe(target.clone(), PeerState::Online, reply.clock);

        match entries {
            Ok(entries) => entries
                .into_iter()
                .filter(|entry| entry.identity != self.identity)
                .map(|entry| registry.upsert(entry.identity, entry.state, entry.clock))
                .filter(|outcome| *outcome != UpsertOutcome::Ignored)
                .count(),
            Err(e) => {
                warn!("Discarding peer list from {}: {}", target, e);
                0
            }
        }
    }

    /// Best-effort `BYE` to every known peer, whatever its state.
    pub async fn leave(&self) {
        let targets = self.registry.lock().await.identities();

        for target in targets {
            let clock = self.clock.tick().await;
            let message = Message::bye(self.identity.clone(), clock);
            info!("Forwarding message '{}' to {}", message, target);

            if let Err(e) = Transport::notify(&target, &message, self.request_timeout).await {
                warn!("Failed to notify {}: {}", target, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn me() -> PeerIdentity {
        PeerIdentity::new("127.0.0.1", 7000)
    }

    fn client(registry: PeerRegistry) -> (DiscoveryClient, Arc<Mutex<PeerRegistry>>) {
        let registry = Arc::new(Mutex::new(registry));
        let client = DiscoveryClient::new(
            me(),
            Arc::new(LogicalClock::new()),
            registry.clone(),
            TIMEOUT,
            64 * 1024,
        );
        (client, registry)
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Accept one connection, capture the request and answer with whatever
    /// `reply` builds from the peer's own identity.
    async fn scripted_peer<F>(reply: F) -> (PeerIdentity, tokio::task::JoinHandle<Message>)
    where
        F: FnOnce(&PeerIdentity) -> Option<String> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let identity = PeerIdentity::new("127.0.0.1", listener.local_addr().unwrap().port());
        let reply = reply(&identity);
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let line = Transport::receive_line(&mut stream, 1024).await.unwrap().unwrap();
            if let Some(reply) = reply {
                stream.write_all(reply.as_bytes()).await.unwrap();
            }
            Message::decode(&line).unwrap()
        });
        (identity, handle)
    }

    #[tokio::test]
    async fn test_greet_marks_online() {
        let (peer, handle) = scripted_peer(|_| None).await;
        let mut registry = PeerRegistry::new();
        registry.seed(peer.clone());
        let (client, registry) = client(registry);

        client.greet(&peer).await.unwrap();
        let received = handle.await.unwrap();
        assert_eq!(received.msg_type, MessageType::Hello);
        assert_eq!(received.origin, me());
        assert_eq!(received.clock, 1);
        assert!(received.args.is_empty());

        assert_eq!(
            registry.lock().await.find(&peer).unwrap().state,
            PeerState::Online
        );
    }

    #[tokio::test]
    async fn test_greet_unreachable_marks_offline() {
        let peer = PeerIdentity::new("127.0.0.1", closed_port().await);
        let mut registry = PeerRegistry::new();
        registry.upsert(peer.clone(), PeerState::Online, 3);
        let (client, registry) = client(registry);

        assert!(client.greet(&peer).await.is_err());
        let registry = registry.lock().await;
        let record = registry.find(&peer).unwrap();
        assert_eq!(record.state, PeerState::Offline);
        assert_eq!(record.last_known_clock, 3);
    }

    #[tokio::test]
    async fn test_pull_peers_merges_by_clock() {
        let stale = PeerIdentity::new("127.0.0.1", closed_port().await);
        let fresh = PeerIdentity::new("10.0.0.8", 8);

        let advertised = format!("{}:{}:ONLINE:3", stale.host, stale.port);
        let (peer, handle) = scripted_peer(move |_| {
            Some(format!(
                "127.0.0.1:1 20 PEER_LIST 3 {} 10.0.0.8:8:ONLINE:1 127.0.0.1:7000:ONLINE:19\n",
                advertised
            ))
        })
        .await;

        let mut registry = PeerRegistry::new();
        registry.seed(peer.clone());
        registry.upsert(stale.clone(), PeerState::Online, 5);
        let (client, registry) = client(registry);

        let summary = client.pull_peers().await;
        let request = handle.await.unwrap();
        assert_eq!(request.msg_type, MessageType::GetPeers);

        assert_eq!(
            summary,
            PullSummary {
                reachable: 1,
                unreachable: 1,
                updated: 1,
            }
        );

        let registry = registry.lock().await;
        let record = registry.find(&peer).unwrap();
        assert_eq!(record.state, PeerState::Online);
        assert_eq!(record.last_known_clock, 20);

        // Stale advert ignored; the failed contact afterwards marks it OFFLINE.
        let record = registry.find(&stale).unwrap();
        assert_eq!(record.state, PeerState::Offline);
        assert_eq!(record.last_known_clock, 5);

        let record = registry.find(&fresh).unwrap();
        assert_eq!(record.state, PeerState::Online);
        assert_eq!(record.last_known_clock, 1);

        assert!(registry.find(&me()).is_none());
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_pull_peers_survives_count_mismatch() {
        let (peer, handle) =
            scripted_peer(|_| Some("127.0.0.1:1 4 PEER_LIST 3 10.0.0.8:8:ONLINE:1\n".to_string()))
                .await;
        let mut registry = PeerRegistry::new();
        registry.seed(peer.clone());
        let (client, registry) = client(registry);

        let summary = client.pull_peers().await;
        handle.await.unwrap();

        assert_eq!(summary.reachable, 1);
        assert_eq!(summary.updated, 0);
        let registry = registry.lock().await;
        assert_eq!(registry.find(&peer).unwrap().state, PeerState::Online);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_leave_notifies_every_known_peer() {
        let (first, first_handle) = scripted_peer(|_| None).await;
        let offline = PeerIdentity::new("127.0.0.1", closed_port().await);
        let (second, second_handle) = scripted_peer(|_| None).await;

        let mut registry = PeerRegistry::new();
        registry.upsert(first.clone(), PeerState::Online, 1);
        registry.seed(offline);
        registry.seed(second.clone());
        let (client, _registry) = client(registry);

        client.leave().await;

        let first_bye = first_handle.await.unwrap();
        let second_bye = second_handle.await.unwrap();
        assert_eq!(first_bye.msg_type, MessageType::Bye);
        assert_eq!(second_bye.msg_type, MessageType::Bye);
        // One tick per peer, the failed one included.
        assert_eq!(first_bye.clock, 1);
        assert_eq!(second_bye.clock, 3);
    }
}
