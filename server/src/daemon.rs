//! Accept loop: one task per connection, one request per connection

use crate::fleet::Fleet;
use crate::request::RequestHandler;
use anyhow::Result;
use northstar_shared::{codec::MAX_MESSAGE_SIZE, encode_response, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Serve requests until a `shutdown` request arrives. Connections still in
/// progress are allowed to finish.
pub async fn serve(listener: TcpListener, fleet: Arc<Fleet>) -> Result<()> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let handler = Arc::new(RequestHandler::new(fleet, shutdown_tx));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, addr) = accepted?;
                debug!("Connection from: {}", addr);
                let handler = handler.clone();
                connections.spawn(async move {
                    if let Err(e) = handle_connection(socket, addr, &handler).await {
                        warn!("Connection {} failed: {:#}", addr, e);
                    }
                });
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!("Connection task panicked: {}", e);
                }
            }
        }
    }

    info!("Stopping; waiting for {} open connections", connections.len());
    while connections.join_next().await.is_some() {}
    Ok(())
}

/// Read the request until the client half-closes, answer, then close
async fn handle_connection(mut socket: TcpStream, addr: SocketAddr, handler: &RequestHandler) -> Result<()> {
    let mut request = Vec::new();
    let read = (&mut socket)
        .take(MAX_MESSAGE_SIZE as u64 + 1)
        .read_to_end(&mut request)
        .await?;

    let response = if read > MAX_MESSAGE_SIZE {
        Response::failure(format!("Request exceeds {} bytes", MAX_MESSAGE_SIZE))
    } else {
        handler.handle(&request).await
    };

    let encoded = encode_response(&response)?;
    socket.write_all(&encoded).await?;
    socket.shutdown().await?;
    debug!("Answered {} with {} bytes", addr, encoded.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn start() -> (SocketAddr, tokio::task::JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, Arc::new(Fleet::new())));
        (addr, server)
    }

    async fn exchange(addr: SocketAddr, request: &[u8]) -> Value {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        serde_json::from_slice(&response).unwrap()
    }

    #[tokio::test]
    async fn test_request_per_connection() {
        let (addr, _server) = start().await;

        let linked = exchange(addr, br#"{"action":"link","ids":["72"]}"#).await;
        assert_eq!(linked, json!({"ok": true}));

        let armed = exchange(addr, br#"{"action":"arm","id":"72","setcmd":false}"#).await;
        assert_eq!(armed, json!({"ok": true}));

        let status = exchange(addr, br#"{"action":"status","ids":["72","9"]}"#).await;
        assert_eq!(status["ok"], json!(true));
        assert_eq!(status["status"]["72"]["armed"], json!(true));
        assert_eq!(status["status"]["9"]["error"], "Not connected");
    }

    #[tokio::test]
    async fn test_garbage_gets_an_answer() {
        let (addr, _server) = start().await;
        let response = exchange(addr, b"not json").await;
        assert_eq!(response["ok"], json!(false));
        assert!(response["error"].is_string());
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (addr, server) = start().await;

        let response = exchange(addr, br#"{"action":"shutdown"}"#).await;
        assert_eq!(response, json!({"ok": true}));

        timeout(Duration::from_secs(5), server)
            .await
            .expect("daemon did not stop")
            .unwrap()
            .unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
