//! TCP transport to the agent daemon

use crate::transport::traits::{TransportConnector, TransportStream};
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

#[async_trait]
impl TransportStream for TcpStream {
    async fn close_write(&mut self) -> Result<()> {
        // shutdown() on a TcpStream only closes the write direction; the
        // response is still readable.
        AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}

/// TCP connector for a `host:port` agent daemon address
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    /// Create a connector with no connect timeout
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: None,
        }
    }

    /// Bound each connection attempt by `limit` (`None` waits indefinitely)
    pub fn with_connect_timeout(mut self, limit: Option<Duration>) -> Self {
        self.connect_timeout = limit;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> Result<Self::Stream> {
        let stream = match self.connect_timeout {
            Some(limit) => timeout(limit, TcpStream::connect(&self.address))
                .await
                .map_err(|_| anyhow!("connect timed out after {}ms", limit.as_millis()))??,
            None => TcpStream::connect(&self.address).await?,
        };

        // Requests are written in one go; no reason to wait for coalescing.
        stream
            .set_nodelay(true)
            .context("failed to set TCP_NODELAY")?;

        debug!("Connected to {}", self.address);
        Ok(stream)
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_tcp_connector_endpoint() {
        let connector = TcpConnector::new("127.0.0.1:7777");
        assert_eq!(connector.endpoint(), "tcp://127.0.0.1:7777");
        assert_eq!(connector.address(), "127.0.0.1:7777");
    }

    #[tokio::test]
    async fn test_close_write_keeps_read_side_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            // Only returns once the client has half-closed
            socket.read_to_end(&mut request).await.unwrap();
            socket.write_all(b"pong").await.unwrap();
            request
        });

        let connector = TcpConnector::new(addr.to_string());
        let mut stream = connector.connect().await.expect("connect failed");
        stream.write_all(b"ping").await.unwrap();
        stream.close_write().await.unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();

        assert_eq!(reply, b"pong");
        assert_eq!(server.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to find a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let connector =
            TcpConnector::new(addr.to_string()).with_connect_timeout(Some(Duration::from_secs(2)));
        assert!(connector.connect().await.is_err());
    }
}
