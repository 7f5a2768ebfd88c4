use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::{TcpListener, lookup_host};

use crate::core::PeerIdentity;
use crate::utils::{P2PError, Result};

const LISTEN_BACKLOG: i32 = 128;

pub struct NodeUtils;

impl NodeUtils {
    /// Resolve a peer identity to the first socket address its host maps to.
    pub async fn resolve(identity: &PeerIdentity) -> Result<SocketAddr> {
        let mut addrs = lookup_host(identity.address()).await.map_err(|e| {
            P2PError::ConnectionFailed(format!("Failed to resolve {}: {}", identity, e))
        })?;

        addrs.next().ok_or_else(|| {
            P2PError::ConnectionFailed(format!("No address found for {}", identity))
        })
    }

    /// Create a TCP listener with SO_REUSEADDR so a restarted node can rebind
    /// its port while old connections linger in TIME_WAIT.
    pub fn create_reusable_tcp_listener(addr: SocketAddr) -> Result<TcpListener> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| P2PError::ConfigError(format!("Failed to create socket: {}", e)))?;

        if let Err(e) = socket.set_reuse_address(true) {
            warn!("Could not set SO_REUSEADDR on {}: {}", addr, e);
        }

        socket
            .bind(&addr.into())
            .map_err(|e| P2PError::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| P2PError::ConfigError(format!("Failed to listen on {}: {}", addr, e)))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| P2PError::ConfigError(format!("Failed to set nonblocking: {}", e)))?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener).map_err(|e| {
            P2PError::ConfigError(format!("Failed to convert to tokio listener: {}", e))
        })?;

        debug!("Bound reusable listener on {}", addr);
        Ok(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_loopback() {
        let identity = PeerIdentity::new("127.0.0.1", 4000);
        let addr = NodeUtils::resolve(&identity).await.unwrap();
        assert_eq!(addr, "127.0.0.1:4000".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_reusable_listener_binds_ephemeral_port() {
        let listener =
            NodeUtils::create_reusable_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let local = listener.local_addr().unwrap();
        assert_ne!(local.port(), 0);

        let client = tokio::net::TcpStream::connect(local).await;
        assert!(client.is_ok());
    }
}
