//! Detached fetch of the newest change for a couple

use serde_json::Value;
use tandem_realtime_client::payload::decode_record;
use tandem_realtime_client::ChangeEvent;
use tandem_shared_config::RealtimeConfig;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{HttpError, HttpResult};
use crate::session::SessionRefresher;
use crate::transport::HttpRequest;

/// Fetches the most recent row of the change table for one partition key
///
/// Used when no realtime connection is open, e.g. from a background
/// refresh, to catch up on the latest partner change.
#[derive(Debug)]
pub struct LatestEventFetcher {
    refresher: SessionRefresher,
    table: String,
    partition_column: String,
}

impl LatestEventFetcher {
    pub fn new(refresher: SessionRefresher, realtime: &RealtimeConfig) -> Self {
        Self {
            refresher,
            table: realtime.table.clone(),
            partition_column: realtime.partition_column.clone(),
        }
    }

    pub fn refresher(&self) -> &SessionRefresher {
        &self.refresher
    }

    /// URL selecting the newest row for `couple_key`
    pub fn latest_url(&self, couple_key: &str) -> HttpResult<Url> {
        let base = self.refresher.gateway().rest_url(&self.table);
        Url::parse_with_params(
            &base,
            &[
                (self.partition_column.as_str(), format!("eq.{}", couple_key).as_str()),
                ("order", "created_at.desc"),
                ("limit", "1"),
            ],
        )
        .map_err(|e| HttpError::InvalidRequest(format!("{}: {}", base, e)))
    }

    /// Newest change for `couple_key`, or `None` if the table has none
    pub async fn fetch_latest(&self, couple_key: &str) -> HttpResult<Option<ChangeEvent>> {
        let url = self.latest_url(couple_key)?;
        let api_key = self.refresher.gateway().api_key.clone();

        let response = self
            .refresher
            .execute_authorized(|token| {
                HttpRequest::get(url.as_str())
                    .header("apikey", api_key.as_str())
                    .header("Accept", "application/json")
                    .bearer(token)
            })
            .await?;

        let rows: Vec<Value> = response.json()?;
        let event = rows.first().map(decode_record).transpose()?;

        debug!(
            couple_key = %couple_key,
            found = event.is_some(),
            "Fetched latest change"
        );
        Ok(event)
    }

    /// Fetch the latest change and report whether one was found
    ///
    /// Failures are logged, not returned.
    pub async fn sync_latest(&self, couple_key: &str) -> bool {
        match self.fetch_latest(couple_key).await {
            Ok(Some(event)) => {
                info!(id = %event.id, sender_id = %event.sender_id, "Synced latest change");
                true
            }
            Ok(None) => {
                debug!(couple_key = %couple_key, "No changes to sync");
                false
            }
            Err(e) if e.is_authorization() => {
                warn!(error = %e, "Sync needs re-authentication");
                false
            }
            Err(e) => {
                warn!(error = %e, "Sync failed");
                false
            }
        }
    }
}
