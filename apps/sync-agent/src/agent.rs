//! Detached sync and optional realtime listening

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tandem_http_client::{
    probe_target, ConnectivityFlag, ConnectivityMonitor, CredentialStore, FileCredentialStore,
    HttpRetryClient, LatestEventFetcher, SessionCredentials, SessionRefresher,
};
use tandem_realtime_client::{ConnectionConfig, ConnectionState, RealtimeChannelClient};
use tracing::{info, warn};

use crate::config::Config;

/// Wires the HTTP and realtime clients for one couple
pub struct SyncAgent {
    config: Config,
    store: Arc<FileCredentialStore>,
    fetcher: LatestEventFetcher,
    _monitor: Option<ConnectivityMonitor>,
}

impl SyncAgent {
    /// Build the clients, starting the connectivity monitor when `monitor` is set
    pub fn new(config: Config, monitor: bool) -> Result<Self> {
        let flag = ConnectivityFlag::default();
        let connectivity = if monitor {
            let target = probe_target(config.gateway().base_url())
                .context("Cannot derive connectivity probe target")?;
            Some(ConnectivityMonitor::spawn(
                flag.clone(),
                target,
                config.connectivity_interval(),
                config.http().request_timeout(),
            ))
        } else {
            None
        };

        let client = HttpRetryClient::new(config.http())
            .context("Failed to build HTTP client")?
            .with_connectivity(Arc::new(flag));
        let store = Arc::new(FileCredentialStore::new(config.credentials_path.clone()));
        let refresher = SessionRefresher::new(client, config.gateway().clone(), store.clone());
        let fetcher = LatestEventFetcher::new(refresher, config.realtime());

        Ok(Self {
            config,
            store,
            fetcher,
            _monitor: connectivity,
        })
    }

    /// Fetch the newest change once; true when one was found
    pub async fn sync_once(&self) -> bool {
        info!(couple_key = %self.config.couple_key, "Running detached sync");
        self.fetcher.sync_latest(&self.config.couple_key).await
    }

    /// Stored session, required for listening
    async fn session(&self) -> Result<SessionCredentials> {
        self.store
            .load()
            .await
            .context("Failed to read credentials")?
            .context("No stored session; sign in first")
    }

    /// Refresh `session` when its access token has expired
    async fn fresh_session(&self, session: SessionCredentials) -> Result<SessionCredentials> {
        if !session.is_expired() {
            return Ok(session);
        }

        info!("Access token expired, refreshing session");
        self.fetcher
            .refresher()
            .refresh(&session)
            .await
            .context("Failed to refresh expired session")
    }

    fn connection_config(
        &self,
        session: &SessionCredentials,
        local_user_id: &str,
    ) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(
            self.config.gateway(),
            session.access_token.as_str(),
            self.config.couple_key.as_str(),
            local_user_id,
        );
        if let Some(endpoint) = &self.config.realtime_url {
            config.endpoint = endpoint.clone();
        }
        config
    }

    /// Log partner changes until `shutdown` completes; returns how many arrived
    ///
    /// If the socket drops after the access token has expired, the session
    /// is refreshed and the channel rejoined with the new token.
    pub async fn listen<S>(&self, shutdown: S) -> Result<usize>
    where
        S: Future<Output = ()>,
    {
        let session = self.fresh_session(self.session().await?).await?;

        let local_user_id = self
            .config
            .local_user_id
            .clone()
            .or_else(|| session.user_id.clone())
            .context("LOCAL_USER_ID not set and the session has no user id")?;

        let client = RealtimeChannelClient::new(self.config.realtime().clone());
        let result = self
            .receive_until(&client, session, &local_user_id, shutdown)
            .await;

        client.disconnect().await;
        result
    }

    async fn receive_until<S>(
        &self,
        client: &RealtimeChannelClient,
        mut session: SessionCredentials,
        local_user_id: &str,
        shutdown: S,
    ) -> Result<usize>
    where
        S: Future<Output = ()>,
    {
        let mut events = client
            .connect(self.connection_config(&session, local_user_id))
            .await
            .context("Failed to start realtime connection")?;
        let mut states = client.watch_state();

        tokio::pin!(shutdown);
        let mut received = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *states.borrow_and_update();
                    if state == ConnectionState::ReconnectPending && session.is_expired() {
                        session = self.fresh_session(session).await?;
                        events = client
                            .connect(self.connection_config(&session, local_user_id))
                            .await
                            .context("Failed to reconnect with refreshed session")?;
                        info!("Rejoined realtime channel with refreshed session");
                    }
                }
                event = events.next() => match event {
                    Some(event) => {
                        received += 1;
                        let size = event.decode_content().map(|bytes| bytes.len()).unwrap_or(0);
                        info!(
                            id = %event.id,
                            sender_id = %event.sender_id,
                            sender_name = ?event.sender_name,
                            created_at = %event.created_at,
                            bytes = size,
                            "Partner change received"
                        );
                    }
                    None => {
                        warn!(status = %client.status_description(), "Event stream ended");
                        break;
                    }
                },
            }
        }

        Ok(received)
    }
}
