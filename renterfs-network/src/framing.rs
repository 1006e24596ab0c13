//! Length-delimited bincode framing over TCP

use crate::protocol::MAX_FRAME_SIZE;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use renterfs_core::error::{RenterError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::trace;

/// A TCP connection exchanging one bincode message per frame
pub struct FramedConnection {
    inner: Framed<TcpStream, LengthDelimitedCodec>,
    peer: String,
}

impl FramedConnection {
    /// Wrap an accepted or connected stream
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_SIZE)
            .new_codec();
        Self {
            inner: Framed::new(stream, codec),
            peer,
        }
    }

    /// Connect to `addr`, failing with `ConnectionTimeout` after `timeout`
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RenterError::ConnectionTimeout {
                peer: addr.to_string(),
            })?
            .map_err(|e| RenterError::Network(format!("Connection failed to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.get_ref().peer_addr().ok()
    }

    /// Send one message
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<()> {
        let payload = bincode::serialize(msg)?;
        trace!(peer = %self.peer, size = payload.len(), "send frame");
        self.inner
            .send(Bytes::from(payload))
            .await
            .map_err(|e| RenterError::Network(format!("Send to {} failed: {}", self.peer, e)))
    }

    /// Receive one message; a closed connection is a network error
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T> {
        match self.inner.next().await {
            Some(Ok(frame)) => {
                trace!(peer = %self.peer, size = frame.len(), "recv frame");
                bincode::deserialize(&frame).map_err(|e| {
                    RenterError::Protocol(format!("Malformed message from {}: {}", self.peer, e))
                })
            }
            Some(Err(e)) => Err(RenterError::Network(format!(
                "Receive from {} failed: {}",
                self.peer, e
            ))),
            None => Err(RenterError::Network(format!(
                "Connection closed by {}",
                self.peer
            ))),
        }
    }

    /// Receive one message, or `None` if the peer closed the connection cleanly
    pub async fn recv_opt<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.inner.next().await {
            Some(Ok(frame)) => bincode::deserialize(&frame).map(Some).map_err(|e| {
                RenterError::Protocol(format!("Malformed message from {}: {}", self.peer, e))
            }),
            Some(Err(e)) => Err(RenterError::Network(format!(
                "Receive from {} failed: {}",
                self.peer, e
            ))),
            None => Ok(None),
        }
    }

    /// Flush and shut down the write half
    pub async fn close(mut self) -> Result<()> {
        SinkExt::<Bytes>::close(&mut self.inner)
            .await
            .map_err(|e| RenterError::Network(format!("Close of {} failed: {}", self.peer, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frames_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = FramedConnection::new(stream);
            let msg: Vec<String> = conn.recv().await.unwrap();
            conn.send(&msg.len()).await.unwrap();
            assert!(conn.recv_opt::<u8>().await.unwrap().is_none());
        });

        let mut client = FramedConnection::connect(&addr, Duration::from_secs(1))
            .await
            .unwrap();
        client
            .send(&vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let n: usize = client.recv().await.unwrap();
        assert_eq!(n, 2);
        client.close().await.unwrap();

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port with nothing listening
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let err = FramedConnection::connect(&addr, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(err.is_transient());
    }
}
