//! Realtime channel client: connection lifecycle, join, receive loop and delivery

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tandem_shared_config::{GatewayConfig, RealtimeConfig};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{RealtimeError, RealtimeResult};
use crate::heartbeat::HeartbeatScheduler;
use crate::models::{ChangeEvent, ConnectionState, Frame};
use crate::payload;
use crate::reconnect::ReconnectPolicy;
use crate::scheduler::ScheduledTask;
use crate::socket::{self, FrameSender, WsStream};

/// Ordered stream of delivered events for one `connect` call
///
/// The stream survives reconnects and ends when the client disconnects or
/// a later `connect` replaces the configuration.
pub type ChangeEventStream = UnboundedReceiverStream<ChangeEvent>;

/// Parameters of one connection, supplied by the host application
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// HTTPS base endpoint of the gateway
    pub endpoint: String,
    pub api_key: String,
    pub access_token: String,
    /// Partition key events are scoped to
    pub couple_key: String,
    /// Sender id of this device's user, used to drop its own writes
    pub local_user_id: String,
}

impl ConnectionConfig {
    pub fn new(
        gateway: &GatewayConfig,
        access_token: impl Into<String>,
        couple_key: impl Into<String>,
        local_user_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: gateway.url.clone(),
            api_key: gateway.api_key.clone(),
            access_token: access_token.into(),
            couple_key: couple_key.into(),
            local_user_id: local_user_id.into(),
        }
    }

    /// Delivery filter: same partition and not self-originated
    pub fn should_deliver(&self, event: &ChangeEvent) -> bool {
        event.couple_key == self.couple_key && !event.is_from(&self.local_user_id)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .field("couple_key", &self.couple_key)
            .field("local_user_id", &self.local_user_id)
            .finish()
    }
}

/// How long a close frame may take to be sent and acknowledged
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Config of the current connection together with its delivery sink
struct Session {
    config: ConnectionConfig,
    url: Url,
    events: mpsc::UnboundedSender<ChangeEvent>,
}

/// What the connection task needs to join the channel
struct JoinPlan {
    frame: Frame,
    settle_delay: Duration,
}

struct ClientState {
    /// Bumped on every connect and disconnect; tasks from older generations
    /// can no longer change state or deliver events
    generation: u64,
    session: Option<Arc<Session>>,
    connection: Option<ScheduledTask>,
    /// Send half of the joined socket, kept so teardown can close it
    sender: Option<FrameSender>,
    heartbeat: HeartbeatScheduler,
    reconnect: ReconnectPolicy,
    description: String,
}

impl ClientState {
    /// Detach the connection, heartbeat and pending reconnect
    ///
    /// Bumps the generation, so nothing detached can change state or
    /// deliver events afterwards.
    fn detach(&mut self) -> Teardown {
        self.generation += 1;
        Teardown {
            sender: self.sender.take(),
            connection: self.connection.take(),
            heartbeat: self.heartbeat.detach(),
            reconnect: self.reconnect.detach(),
        }
    }
}

/// What is left of a replaced or disconnected connection
///
/// Dropping it aborts every task without waiting. `close` sends a close
/// frame and returns once the socket has been released.
#[must_use]
struct Teardown {
    sender: Option<FrameSender>,
    connection: Option<ScheduledTask>,
    heartbeat: Option<ScheduledTask>,
    reconnect: Option<ScheduledTask>,
}

impl Teardown {
    async fn close(self) {
        let Self {
            sender,
            connection,
            heartbeat,
            reconnect,
        } = self;

        // The heartbeat may hold the sink lock mid-send
        for task in [heartbeat, reconnect].into_iter().flatten() {
            task.shutdown().await;
        }

        let close_sent = match sender {
            Some(sender) => match tokio::time::timeout(CLOSE_GRACE, sender.close()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    debug!(error = %e, "Close frame not sent");
                    false
                }
                Err(_) => {
                    debug!("Timed out sending close frame");
                    false
                }
            },
            None => false,
        };

        if let Some(connection) = connection {
            if close_sent {
                // The receive loop ends when the gateway answers the close
                connection.shutdown_within(CLOSE_GRACE).await;
            } else {
                connection.shutdown().await;
            }
        }
    }
}

struct Inner {
    settings: RealtimeConfig,
    state: Mutex<ClientState>,
    status: watch::Sender<ConnectionState>,
}

/// Client for the gateway's realtime channel
///
/// Owns at most one socket. `connect` replaces any existing connection,
/// receive failures schedule a reconnect with the last configuration, and
/// `disconnect` stops everything. Independent instances share nothing.
///
/// Must be used from within a tokio runtime.
pub struct RealtimeChannelClient {
    inner: Arc<Inner>,
}

impl RealtimeChannelClient {
    pub fn new(settings: RealtimeConfig) -> Self {
        let (status, _) = watch::channel(ConnectionState::Idle);
        let state = ClientState {
            generation: 0,
            session: None,
            connection: None,
            sender: None,
            heartbeat: HeartbeatScheduler::new(settings.heartbeat_interval()),
            reconnect: ReconnectPolicy::new(settings.reconnect_delay()),
            description: "idle".to_string(),
        };

        Self {
            inner: Arc::new(Inner {
                settings,
                state: Mutex::new(state),
                status,
            }),
        }
    }

    /// Connect with a new configuration, tearing down any existing connection
    ///
    /// The previous socket is closed before the new one is opened. Returns
    /// the stream the events of this configuration are delivered to; joining
    /// happens in the background. Fails only when the endpoint cannot be
    /// turned into a socket URL.
    pub async fn connect(&self, config: ConnectionConfig) -> RealtimeResult<ChangeEventStream> {
        let url = socket::build_socket_url(
            &config.endpoint,
            &config.api_key,
            &config.access_token,
            &self.inner.settings.protocol_version,
        )?;

        info!(
            couple_key = %config.couple_key,
            host = ?url.host_str(),
            "Connecting to realtime gateway"
        );

        let previous = self.inner.state.lock().detach();
        previous.close().await;

        let (events, receiver) = mpsc::unbounded_channel();
        self.inner.start(Arc::new(Session {
            config,
            url,
            events,
        }));

        Ok(UnboundedReceiverStream::new(receiver))
    }

    /// Tear down the connection, heartbeat and any pending reconnect
    ///
    /// Valid in any state. The state switches to `Disconnected` at once;
    /// by the time the future resolves the socket is closed and no task of
    /// the old connection is left running.
    pub async fn disconnect(&self) {
        let teardown = {
            let mut state = self.inner.state.lock();
            let teardown = state.detach();
            state.session = None;
            state.description = "disconnected".to_string();
            self.inner.status.send_replace(ConnectionState::Disconnected);
            teardown
        };

        teardown.close().await;
        info!("Realtime client disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.status.borrow()
    }

    /// Receiver notified on every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status.subscribe()
    }

    /// Best-effort human readable status, including the last failure
    pub fn status_description(&self) -> String {
        self.inner.state.lock().description.clone()
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.inner.state.lock().heartbeat.is_running()
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.inner.state.lock().reconnect.is_pending()
    }
}

impl fmt::Debug for RealtimeChannelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannelClient")
            .field("state", &self.state())
            .field("topic", &self.inner.settings.topic)
            .finish()
    }
}

impl Inner {
    /// Replace the current connection with a new one for `session`
    fn start(self: &Arc<Self>, session: Arc<Session>) {
        let mut state = self.state.lock();
        self.start_locked(&mut state, session);
    }

    /// Restart after a failure unless a connect or disconnect came first
    fn reconnect(self: &Arc<Self>, generation: u64, session: Arc<Session>) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        info!("Reconnecting to realtime gateway");
        self.start_locked(&mut state, session);
    }

    fn start_locked(self: &Arc<Self>, state: &mut ClientState, session: Arc<Session>) {
        // Whatever is still attached is aborted when dropped
        drop(state.detach());
        let generation = state.generation;

        let plan = JoinPlan {
            frame: Frame::join(
                &self.settings.topic,
                &self.settings.table,
                &self.settings.filter_for(&session.config.couple_key),
            ),
            settle_delay: self.settings.join_delay(),
        };

        state.session = Some(session.clone());
        state.description = "connecting".to_string();
        self.status.send_replace(ConnectionState::Connecting);

        state.connection = Some(ScheduledTask::spawn(run_connection(
            Arc::downgrade(self),
            session,
            plan,
            generation,
        )));
    }

    /// Record a successful join and arm the heartbeat
    fn mark_joined(&self, generation: u64, sender: FrameSender) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }

        state.sender = Some(sender.clone());
        state.heartbeat.start(move || {
            let sender = sender.clone();
            async move { sender.send(Frame::heartbeat()).await.map(|_| ()) }
        });
        state.description = format!("joined {}", self.settings.topic);
        self.status.send_replace(ConnectionState::Joined);
        true
    }

    fn deliver(&self, generation: u64, session: &Session, event: ChangeEvent) {
        let state = self.state.lock();
        if state.generation != generation {
            return;
        }

        if !session.config.should_deliver(&event) {
            debug!(
                event_id = %event.id,
                sender_id = %event.sender_id,
                "Dropping event for another partition or from this user"
            );
            return;
        }

        debug!(event_id = %event.id, "Delivering change event");
        if session.events.send(event).is_err() {
            debug!("Event stream dropped by consumer");
        }
    }

    /// Stop the heartbeat and schedule a reconnect with the same session
    fn handle_failure(self: &Arc<Self>, generation: u64, error: RealtimeError) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        let Some(session) = state.session.clone() else {
            return;
        };

        warn!(
            error = %error,
            couple_key = %session.config.couple_key,
            retry_in_ms = state.reconnect.delay().as_millis() as u64,
            "Realtime connection lost"
        );

        state.heartbeat.stop();
        state.sender = None;
        state.description = format!("connection lost: {}", error);
        self.status.send_replace(ConnectionState::ReconnectPending);

        let weak = Arc::downgrade(self);
        state.reconnect.schedule(async move {
            if let Some(inner) = weak.upgrade() {
                inner.reconnect(generation, session);
            }
        });
    }
}

/// Open, join, then listen until the connection fails
async fn run_connection(
    inner: Weak<Inner>,
    session: Arc<Session>,
    plan: JoinPlan,
    generation: u64,
) {
    let failure = match establish(&inner, &session, plan, generation).await {
        Ok(stream) => receive_loop(&inner, &session, generation, stream).await,
        Err(e) => e,
    };

    if let Some(inner) = inner.upgrade() {
        inner.handle_failure(generation, failure);
    }
}

async fn establish(
    inner: &Weak<Inner>,
    session: &Session,
    plan: JoinPlan,
    generation: u64,
) -> RealtimeResult<WsStream> {
    let (sender, stream) = socket::open(&session.url).await?;

    // Give the transport handshake time to settle before joining
    tokio::time::sleep(plan.settle_delay).await;

    let reference = sender.send(plan.frame).await?;
    info!(
        couple_key = %session.config.couple_key,
        reference,
        "Joined realtime channel"
    );

    let inner = inner.upgrade().ok_or(RealtimeError::ConnectionClosed)?;
    if !inner.mark_joined(generation, sender) {
        return Err(RealtimeError::ConnectionClosed);
    }
    Ok(stream)
}

/// Listen for frames until the socket fails; never returns on success
async fn receive_loop(
    inner: &Weak<Inner>,
    session: &Session,
    generation: u64,
    mut stream: WsStream,
) -> RealtimeError {
    loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return e.into(),
            None => return RealtimeError::ConnectionClosed,
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Ignoring non UTF-8 binary frame");
                    continue;
                }
            },
            Message::Close(frame) => {
                debug!(frame = ?frame, "Gateway sent close frame");
                return RealtimeError::ConnectionClosed;
            }
            _ => continue,
        };

        match payload::decode_change_frame(&text) {
            Ok(Some(event)) => {
                let Some(inner) = inner.upgrade() else {
                    return RealtimeError::ConnectionClosed;
                };
                inner.deliver(generation, session, event);
            }
            Ok(None) => trace!("Ignoring frame without change record"),
            Err(e) => debug!(error = %e, "Dropping malformed frame"),
        }
    }
}
