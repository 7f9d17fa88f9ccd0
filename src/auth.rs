//! OAuth2 client-credentials authentication with per-tenant token caching.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{SyncError, SyncResult};

/// Immutable per-tenant credentials, sourced from the worklist.
#[derive(Debug, Clone)]
pub struct TenantCredential {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

/// A cached access token for one tenant.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub tenant_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Returns true if the token is expired or will expire within the
    /// safety margin.
    fn is_expired(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}

/// OAuth2 token response from the login endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Per-tenant token cache.
///
/// Locking is striped by tenant: a short-lived map lock hands out the
/// tenant's slot, and the check-then-refresh sequence runs under that slot's
/// own lock. Concurrent same-tenant callers trigger exactly one exchange and
/// all observe the fresh token; distinct tenants never contend.
#[derive(Debug)]
pub struct TokenCache {
    login_base_url: String,
    scope: String,
    http_client: reqwest::Client,
    slots: Mutex<HashMap<String, Arc<Mutex<Option<AccessToken>>>>>,
    /// Remaining validity below this margin counts as expired.
    margin: Duration,
}

impl TokenCache {
    /// Creates a new token cache with a 60 second expiry margin.
    pub fn new(login_base_url: String, scope: String, http_client: reqwest::Client) -> Self {
        Self {
            login_base_url,
            scope,
            http_client,
            slots: Mutex::new(HashMap::new()),
            margin: Duration::seconds(60),
        }
    }

    async fn slot(&self, tenant_id: &str) -> Arc<Mutex<Option<AccessToken>>> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Gets a valid access token for the tenant, exchanging credentials if
    /// no cached token has enough validity left.
    #[instrument(skip(self, credential), fields(tenant_id = %credential.tenant_id))]
    pub async fn get_token(&self, credential: &TenantCredential) -> SyncResult<AccessToken> {
        let slot = self.slot(&credential.tenant_id).await;
        let mut cached = slot.lock().await;

        if let Some(ref token) = *cached {
            if !token.is_expired(self.margin) {
                debug!("using cached token");
                return Ok(token.clone());
            }
        }

        debug!("refreshing access token");
        let token = self.exchange(credential).await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drops the tenant's cached token, forcing an exchange on next use.
    pub async fn invalidate(&self, tenant_id: &str) {
        let slot = self.slot(tenant_id).await;
        *slot.lock().await = None;
    }

    async fn exchange(&self, credential: &TenantCredential) -> SyncResult<AccessToken> {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_base_url, credential.tenant_id
        );

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.expose_secret()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http_client
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| SyncError::Auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!(
                "token request failed with status {status}: {body}"
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("failed to parse token response: {e}")))?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        debug!("acquired new token, expires at {expires_at}");

        Ok(AccessToken {
            tenant_id: credential.tenant_id.clone(),
            token: token_response.access_token,
            expires_at,
        })
    }
}
