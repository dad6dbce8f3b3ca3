//! In-process mock agent daemon for tests

use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the mock agent observed, in order
#[derive(Debug, Clone, PartialEq)]
pub enum AgentLog {
    Accepted(usize),
    Request(usize, String),
    Closed(usize),
}

pub struct MockBehavior {
    /// Builds the response text for a parsed request
    pub respond: fn(&Value) -> String,
    /// Delay between reading the request and answering
    pub hold: Option<Duration>,
    /// Write the response in chunks of this many bytes
    pub chunk: Option<usize>,
    /// Serve one connection at a time instead of one task per connection
    pub sequential: bool,
}

fn always_ok(_: &Value) -> String {
    r#"{"ok":true}"#.to_string()
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            respond: always_ok,
            hold: None,
            chunk: None,
            sequential: false,
        }
    }
}

#[derive(Default)]
struct Observed {
    requests: Mutex<Vec<Value>>,
    log: Mutex<Vec<AgentLog>>,
    connections: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

pub struct MockAgent {
    addr: SocketAddr,
    observed: Arc<Observed>,
}

impl MockAgent {
    pub async fn spawn(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let observed = Arc::new(Observed::default());
        let behavior = Arc::new(behavior);

        let state = observed.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let state = state.clone();
                let behavior = behavior.clone();
                if behavior.sequential {
                    serve(socket, &behavior, &state).await;
                } else {
                    tokio::spawn(async move { serve(socket, &behavior, &state).await });
                }
            }
        });

        Self { addr, observed }
    }

    /// A local port with nothing listening on it
    pub async fn unused_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn requests(&self) -> Vec<Value> {
        self.observed.requests.lock().unwrap().clone()
    }

    pub fn log(&self) -> Vec<AgentLog> {
        self.observed.log.lock().unwrap().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.observed.max_active.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.observed.connections.load(Ordering::SeqCst)
    }
}

async fn serve(mut socket: TcpStream, behavior: &MockBehavior, state: &Observed) {
    let index = state.connections.fetch_add(1, Ordering::SeqCst);
    let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_active.fetch_max(active, Ordering::SeqCst);
    state.log.lock().unwrap().push(AgentLog::Accepted(index));

    let mut request = Vec::new();
    let _ = socket.read_to_end(&mut request).await;
    let parsed: Value = serde_json::from_slice(&request).unwrap_or(Value::Null);
    let action = parsed["action"].as_str().unwrap_or_default().to_string();
    state.requests.lock().unwrap().push(parsed.clone());
    state.log.lock().unwrap().push(AgentLog::Request(index, action));

    if let Some(hold) = behavior.hold {
        tokio::time::sleep(hold).await;
    }

    let reply = (behavior.respond)(&parsed);
    let chunk = behavior.chunk.unwrap_or(reply.len().max(1));
    for part in reply.as_bytes().chunks(chunk) {
        if socket.write_all(part).await.is_err() {
            break;
        }
        let _ = socket.flush().await;
    }

    state.active.fetch_sub(1, Ordering::SeqCst);
    state.log.lock().unwrap().push(AgentLog::Closed(index));
    drop(socket);
}
