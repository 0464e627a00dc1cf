//! Mock realtime gateway for websocket tests
//!
//! Provides a [`MockRealtimeGateway`] that accepts websocket connections on
//! a local port, records every frame clients send, and lets tests push
//! frames to clients or cut connections to exercise reconnects.
//!
//! # Lock Poisoning Recovery
//!
//! Like the other mocks in this crate, locks are taken with
//! `unwrap_or_else(|e| e.into_inner())` so a panicking test does not cascade
//! into `PoisonError`s in later assertions.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

/// Poll interval used by the `wait_for_*` helpers
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Snapshot of one accepted connection
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    /// Accept order, starting at 0
    pub id: usize,
    /// Request URI of the upgrade request, including the query string
    pub request_uri: String,
    /// JSON frames received from the client, in order
    pub frames: Vec<Value>,
    /// Whether the socket is still open
    pub open: bool,
}

impl ConnectionRecord {
    /// Frames with the given event name
    pub fn frames_with_event(&self, event: &str) -> Vec<Value> {
        self.frames
            .iter()
            .filter(|frame| frame["event"] == event)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
enum GatewayCommand {
    Send(String),
    DropAll,
}

#[derive(Default)]
struct GatewayState {
    connections: Vec<ConnectionRecord>,
}

/// Mock realtime gateway speaking websocket on 127.0.0.1
///
/// # Example
///
/// ```rust,ignore
/// use tandem_test_utils::MockRealtimeGateway;
///
/// #[tokio::test]
/// async fn test_join() {
///     let gateway = MockRealtimeGateway::start().await;
///     // Point the client at gateway.url()
///     let join = gateway.wait_for_event(0, "phx_join", Duration::from_secs(2)).await;
/// }
/// ```
pub struct MockRealtimeGateway {
    addr: SocketAddr,
    state: Arc<Mutex<GatewayState>>,
    commands: broadcast::Sender<GatewayCommand>,
    accept_task: JoinHandle<()>,
}

impl MockRealtimeGateway {
    /// Start listening on an ephemeral local port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock gateway listener");
        let addr = listener.local_addr().expect("mock gateway local addr");
        let state = Arc::new(Mutex::new(GatewayState::default()));
        let (commands, _) = broadcast::channel(64);

        let accept_state = state.clone();
        let accept_commands = commands.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                let commands = accept_commands.subscribe();
                tokio::spawn(serve_connection(stream, state, commands));
            }
        });

        Self {
            addr,
            state,
            commands,
            accept_task,
        }
    }

    /// HTTP base URL clients should be configured with
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of connections still open
    pub fn open_connection_count(&self) -> usize {
        self.lock().connections.iter().filter(|c| c.open).count()
    }

    /// Snapshot of one connection
    pub fn connection(&self, id: usize) -> Option<ConnectionRecord> {
        self.lock().connections.get(id).cloned()
    }

    /// Snapshot of all connections
    pub fn connections(&self) -> Vec<ConnectionRecord> {
        self.lock().connections.clone()
    }

    /// Send a JSON frame to every open connection
    pub fn send_json(&self, frame: &Value) {
        let _ = self.commands.send(GatewayCommand::Send(frame.to_string()));
    }

    /// Send raw text to every open connection
    pub fn send_text(&self, text: &str) {
        let _ = self.commands.send(GatewayCommand::Send(text.to_string()));
    }

    /// Abruptly drop every open connection without a close handshake
    pub fn drop_connections(&self) {
        let _ = self.commands.send(GatewayCommand::DropAll);
    }

    /// Wait until at least `count` connections were accepted
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state.connections.len() >= count)
            .await
    }

    /// Wait until exactly `count` connections are open
    pub async fn wait_for_open_connections(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| {
            state.connections.iter().filter(|c| c.open).count() == count
        })
        .await
    }

    /// Wait for the first frame with `event` on connection `id`
    pub async fn wait_for_event(&self, id: usize, event: &str, timeout: Duration) -> Option<Value> {
        self.wait_for_events(id, event, 1, timeout)
            .await
            .and_then(|frames| frames.into_iter().next())
    }

    /// Wait until connection `id` has sent `count` frames with `event`
    pub async fn wait_for_events(
        &self,
        id: usize,
        event: &str,
        count: usize,
        timeout: Duration,
    ) -> Option<Vec<Value>> {
        let found = self
            .wait_until(timeout, |state| {
                state
                    .connections
                    .get(id)
                    .map(|c| c.frames_with_event(event).len() >= count)
                    .unwrap_or(false)
            })
            .await;

        if found {
            self.connection(id).map(|c| c.frames_with_event(event))
        } else {
            None
        }
    }

    async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&GatewayState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.lock()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for MockRealtimeGateway {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.commands.send(GatewayCommand::DropAll);
    }
}

async fn serve_connection(
    stream: TcpStream,
    state: Arc<Mutex<GatewayState>>,
    mut commands: broadcast::Receiver<GatewayCommand>,
) {
    let mut request_uri = String::new();
    let capture_uri =
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            request_uri = request.uri().to_string();
            Ok(response)
        };
    let socket = match accept_hdr_async(stream, capture_uri).await {
        Ok(socket) => socket,
        Err(_) => return,
    };

    let id = {
        let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
        let id = guard.connections.len();
        guard.connections.push(ConnectionRecord {
            id,
            request_uri,
            frames: Vec::new(),
            open: true,
        });
        id
    };

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(frame) = serde_json::from_str::<Value>(&text) {
                        let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
                        guard.connections[id].frames.push(frame);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            command = commands.recv() => match command {
                Ok(GatewayCommand::Send(text)) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(GatewayCommand::DropAll) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }

    let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
    guard.connections[id].open = false;
}
