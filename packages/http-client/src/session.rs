//! Authorized requests with one refresh-and-retry on rejection

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tandem_shared_config::GatewayConfig;
use tracing::{info, warn};

use crate::credentials::{CredentialStore, SessionCredentials};
use crate::error::{HttpError, HttpResult};
use crate::retry::HttpRetryClient;
use crate::transport::{HttpRequest, HttpResponse};

/// Token endpoint response
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub user: Option<TokenUser>,
}

#[derive(Debug, Deserialize)]
pub struct TokenUser {
    pub id: String,
}

/// Runs requests with the stored access token, refreshing it once on 401
pub struct SessionRefresher {
    client: HttpRetryClient,
    gateway: GatewayConfig,
    store: Arc<dyn CredentialStore>,
}

impl SessionRefresher {
    pub fn new(
        client: HttpRetryClient,
        gateway: GatewayConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            client,
            gateway,
            store,
        }
    }

    pub fn gateway(&self) -> &GatewayConfig {
        &self.gateway
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Exchange the refresh token for a new pair and persist it
    pub async fn refresh(&self, current: &SessionCredentials) -> HttpResult<SessionCredentials> {
        if !current.has_refresh_token() {
            warn!("Refresh requested without a refresh token");
            return Err(HttpError::MissingRefreshToken);
        }

        let request = HttpRequest::post(format!(
            "{}?grant_type=refresh_token",
            self.gateway.token_url()
        ))
        .header("apikey", self.gateway.api_key.as_str())
        .bearer(&self.gateway.api_key)
        .json(&json!({ "refresh_token": current.refresh_token }))?;

        let response = self.client.perform_request(&request).await?;
        if !response.is_success() {
            warn!(status = response.status.as_u16(), "Refresh token rejected");
            return Err(HttpError::Authorization(format!(
                "refresh rejected with status {}",
                response.status.as_u16()
            )));
        }

        let token: TokenResponse = response.json()?;
        let user_id = token
            .user
            .map(|user| user.id)
            .or_else(|| current.user_id.clone());
        let refreshed = SessionCredentials::expiring_in(
            token.access_token,
            token.refresh_token,
            user_id,
            Utc::now(),
            token.expires_in,
        );

        self.store.save(&refreshed).await?;
        info!(expires_at = %refreshed.expires_at, "Session refreshed");

        Ok(refreshed)
    }

    /// Run the request built by `build` with the stored access token
    ///
    /// A 401 triggers one refresh and one retry with the new token; a
    /// second 401 or 400 is returned as [`HttpError::Authorization`]. A 400
    /// on the first attempt is returned as an authorization error without
    /// refreshing.
    pub async fn execute_authorized<F>(&self, build: F) -> HttpResult<HttpResponse>
    where
        F: Fn(&str) -> HttpRequest,
    {
        let credentials = self.store.load().await?.ok_or(HttpError::NotAuthenticated)?;

        let response = self
            .client
            .perform_request(&build(&credentials.access_token))
            .await?;

        match response.status.as_u16() {
            401 => {}
            400 => {
                return Err(HttpError::Authorization(format!(
                    "request rejected with status 400: {}",
                    response.error_body()
                )))
            }
            _ => return Ok(response),
        }

        info!("Access token rejected, refreshing session");
        let refreshed = self.refresh(&credentials).await?;

        let retried = self
            .client
            .perform_request(&build(&refreshed.access_token))
            .await?;

        match retried.status.as_u16() {
            400 | 401 => Err(HttpError::Authorization(format!(
                "request rejected with status {} after refresh",
                retried.status.as_u16()
            ))),
            _ => Ok(retried),
        }
    }
}

impl fmt::Debug for SessionRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRefresher")
            .field("gateway", &self.gateway)
            .field("client", &self.client)
            .finish()
    }
}
