//! Protocol client - one request/response exchange per call

use crate::config::ControllerConfig;
use crate::transport::{TcpConnector, TransportConnector, TransportStream};
use northstar_shared::{
    encode_request, protocol, CodecError, Command, Response, ResponseAccumulator,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Ways an exchange can fail before a response is decoded
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Failed to encode request: {0}")]
    Encode(#[from] CodecError),

    #[error("Connection to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("Read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("Connection closed before any response was received")]
    EmptyResponse,

    #[error("Exchange timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}

/// A response as received from the agent
#[derive(Debug, Clone)]
pub struct Reply {
    /// Decoded fields
    pub response: Response,
    /// Raw response text
    pub text: String,
}

/// Terminal result of one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    pub success: bool,
    /// Raw response text on success; the agent's error text, the raw
    /// response, or a transport diagnostic on failure
    pub message: String,
}

impl ExchangeOutcome {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<Reply> for ExchangeOutcome {
    fn from(reply: Reply) -> Self {
        if reply.response.ok {
            return Self::succeeded(reply.text);
        }
        match reply.response.error {
            Some(error) if !error.is_empty() => Self::failed(error),
            _ => Self::failed(reply.text),
        }
    }
}

/// Executes request/response exchanges against an agent daemon
pub struct ProtocolClient<C: TransportConnector = TcpConnector> {
    connector: C,
    exchange_timeout: Option<Duration>,
}

impl ProtocolClient<TcpConnector> {
    /// TCP client for the configured host and port
    pub fn from_config(config: &ControllerConfig) -> Self {
        let connector =
            TcpConnector::new(config.address()).with_connect_timeout(config.connect_timeout());
        Self::new(connector).with_exchange_timeout(config.exchange_timeout())
    }
}

impl<C: TransportConnector> ProtocolClient<C> {
    /// Create a client with no overall exchange timeout
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            exchange_timeout: None,
        }
    }

    /// Bound a whole exchange (connect, write and read) by `limit`
    pub fn with_exchange_timeout(mut self, limit: Option<Duration>) -> Self {
        self.exchange_timeout = limit;
        self
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Run one exchange and report it as an outcome. Never fails.
    pub async fn exchange(&self, command: &Command) -> ExchangeOutcome {
        let started = Instant::now();

        let result = match self.exchange_timeout {
            Some(limit) => timeout(limit, self.try_exchange(command))
                .await
                .unwrap_or(Err(ExchangeError::TimedOut(limit))),
            None => self.try_exchange(command).await,
        };

        match result {
            Ok(reply) => {
                debug!(
                    "{} answered in {}ms: {}",
                    command.action(),
                    started.elapsed().as_millis(),
                    reply.text
                );
                reply.into()
            }
            Err(e) => {
                warn!("{} exchange with {} failed: {}", command.action(), self.endpoint(), e);
                ExchangeOutcome::failed(e.to_string())
            }
        }
    }

    /// Run one exchange, surfacing transport failures as errors.
    ///
    /// The connection is owned by this call and released on every exit path,
    /// including cancellation by the exchange timeout.
    pub async fn try_exchange(&self, command: &Command) -> Result<Reply, ExchangeError> {
        let request = encode_request(command)?;

        let mut stream = self
            .connector
            .connect()
            .await
            .map_err(|e| ExchangeError::Connect {
                endpoint: self.connector.endpoint(),
                reason: format!("{:#}", e),
            })?;

        debug!("-> {}", String::from_utf8_lossy(&request));
        stream.write_all(&request).await.map_err(ExchangeError::Write)?;
        stream.flush().await.map_err(ExchangeError::Write)?;

        // The request is complete either way; a peer that already closed
        // will show up as a read error or an empty response.
        if let Err(e) = stream.close_write().await {
            debug!("Half-close failed: {:#}", e);
        }

        let mut accumulator = ResponseAccumulator::new();
        let mut read_buf = vec![0u8; protocol::READ_CHUNK_SIZE];

        loop {
            let n = stream.read(&mut read_buf).await.map_err(ExchangeError::Read)?;
            if n == 0 {
                break;
            }
            accumulator.extend(&read_buf[..n])?;
        }

        if accumulator.is_empty() {
            return Err(ExchangeError::EmptyResponse);
        }

        Ok(Reply {
            response: accumulator.decode(),
            text: accumulator.text().into_owned(),
        })
    }
}
