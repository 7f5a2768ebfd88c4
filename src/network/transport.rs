use log::debug;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::core::{Message, PeerIdentity};
use crate::utils::{P2PError, Result};

/// Short-lived request connections: one line out, at most one line back.
pub struct Transport;

impl Transport {
    pub async fn connect(peer: &PeerIdentity, limit: Duration) -> Result<TcpStream> {
        let stream = timeout(limit, TcpStream::connect(peer.address()))
            .await
            .map_err(|_| P2PError::ConnectionFailed(format!("Connection to {} timed out", peer)))?
            .map_err(|e| {
                P2PError::ConnectionFailed(format!("Failed to connect to {}: {}", peer, e))
            })?;

        debug!("Connected to {}", peer);
        Ok(stream)
    }

    pub async fn send_message<W>(writer: &mut W, message: &Message) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(message.encode().as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one newline-terminated line of at most `max_size` bytes.
    /// `None` means the peer closed the connection without sending anything.
    pub async fn receive_line<R>(reader: R, max_size: usize) -> Result<Option<String>>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = Vec::new();
        let mut limited = BufReader::new(reader).take(max_size as u64 + 1);
        limited.read_until(b'\n', &mut buffer).await?;

        if buffer.is_empty() {
            return Ok(None);
        }
        if buffer.len() > max_size {
            return Err(P2PError::MessageTooLarge(max_size));
        }

        String::from_utf8(buffer)
            .map(Some)
            .map_err(|_| P2PError::MalformedMessage("line is not valid UTF-8".to_string()))
    }

    /// Fire-and-forget: connect, send, close.
    pub async fn notify(peer: &PeerIdentity, message: &Message, limit: Duration) -> Result<()> {
        let mut stream = Self::connect(peer, limit).await?;
        timeout(limit, Self::send_message(&mut stream, message))
            .await
            .map_err(|_| P2PError::ConnectionFailed(format!("Send to {} timed out", peer)))??;
        Ok(())
    }

    /// Send `message` and wait for a single reply line. `Ok(None)` means the
    /// peer closed the connection without replying.
    pub async fn request(
        peer: &PeerIdentity,
        message: &Message,
        limit: Duration,
        max_size: usize,
    ) -> Result<Option<Message>> {
        let mut stream = Self::connect(peer, limit).await?;

        let exchange = async {
            Self::send_message(&mut stream, message).await?;
            Self::receive_line(&mut stream, max_size).await
        };

        let line = timeout(limit, exchange)
            .await
            .map_err(|_| P2PError::ConnectionFailed(format!("No reply from {} in time", peer)))??;

        match line {
            Some(line) => {
                let reply = Message::decode(&line)?;
                debug!("Reply from {}: {}", peer, reply.msg_type);
                Ok(Some(reply))
            }
            None => Ok(None),
        }
    }
}
