//! Directory-service HTTP client with pagination and bounded retries.
//!
//! All reads are idempotent GETs authenticated with a bearer token from the
//! shared [`TokenCache`]. Throttling (429) and transient upstream failures
//! are retried with backoff; a 401 invalidates the cached token and retries
//! exactly once with a fresh one.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::auth::{TenantCredential, TokenCache};
use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;

/// OData type tag marking a membership entry as a directory role.
const DIRECTORY_ROLE_TYPE: &str = "#microsoft.graph.directoryRole";

/// A role definition within one tenant's directory.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleDefinition {
    #[serde(rename = "id")]
    pub role_id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// A user profile as returned by the directory.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub display_name: String,
}

/// Response wrapper for paginated listings.
#[derive(Debug, Deserialize)]
struct Page<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// One entry of a user's membership listing.
#[derive(Debug, Deserialize)]
struct MemberItem {
    id: String,
    #[serde(rename = "@odata.type", default)]
    odata_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
}

/// Per-tenant directory API client.
#[derive(Debug)]
pub struct DirectoryClient {
    http_client: reqwest::Client,
    token_cache: Arc<TokenCache>,
    credential: TenantCredential,
    base_url: String,
    retry: RetryPolicy,
}

impl DirectoryClient {
    /// Creates a client scoped to one tenant.
    pub fn new(
        http_client: reqwest::Client,
        token_cache: Arc<TokenCache>,
        credential: TenantCredential,
        base_url: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http_client,
            token_cache,
            credential,
            base_url,
            retry,
        }
    }

    /// The tenant this client is scoped to.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.credential.tenant_id
    }

    /// Lists all role definitions in the tenant, merged across pages and
    /// keyed by role id.
    #[instrument(skip(self), fields(tenant_id = %self.credential.tenant_id))]
    pub async fn list_all_roles(&self) -> SyncResult<HashMap<String, RoleDefinition>> {
        let url = format!("{}/directoryRoles", self.base_url);
        let roles: Vec<RoleDefinition> = self.get_paginated(&url).await?;
        info!("found {} directory roles", roles.len());
        Ok(roles
            .into_iter()
            .map(|role| (role.role_id.clone(), role))
            .collect())
    }

    /// Lists the role ids assigned to a user, in listing order. A user with
    /// no assignments yields an empty vector, not an error.
    #[instrument(skip(self), fields(tenant_id = %self.credential.tenant_id))]
    pub async fn list_user_roles(&self, user_id: &str) -> SyncResult<Vec<String>> {
        let url = format!("{}/users/{}/memberOf", self.base_url, user_id);
        let memberships: Vec<MemberItem> = self.get_paginated(&url).await?;
        Ok(memberships
            .into_iter()
            .filter(|m| m.odata_type.as_deref() == Some(DIRECTORY_ROLE_TYPE))
            .map(|m| m.id)
            .collect())
    }

    /// Fetches a user's profile. Fails with [`SyncError::NotFound`] if the
    /// user no longer exists in the directory.
    #[instrument(skip(self), fields(tenant_id = %self.credential.tenant_id))]
    pub async fn get_user_profile(&self, user_id: &str) -> SyncResult<UserProfile> {
        let url = format!("{}/users/{}", self.base_url, user_id);
        let raw: RawProfile = self.get_json(&url).await?;
        Ok(UserProfile {
            display_name: raw.display_name.unwrap_or_else(|| "Unknown".to_string()),
        })
    }

    /// Fetches all pages of a paginated listing into one vector.
    async fn get_paginated<T: DeserializeOwned>(&self, initial_url: &str) -> SyncResult<Vec<T>> {
        let mut url = initial_url.to_string();
        let mut items = Vec::new();

        loop {
            debug!("fetching page: {url}");
            let page: Page<T> = self.get_json(&url).await?;
            items.extend(page.value);

            match page.next_link {
                Some(next) => url = next,
                None => return Ok(items),
            }
        }
    }

    /// Performs a GET with token injection and transient-failure retries.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> SyncResult<T> {
        self.retry.execute(|| self.send_once(url)).await
    }

    /// Single authenticated attempt, with one internal refresh-and-retry on
    /// a rejected token.
    async fn send_once<T: DeserializeOwned>(&self, url: &str) -> SyncResult<T> {
        let mut refreshed = false;

        loop {
            let token = self.token_cache.get_token(&self.credential).await?;

            let response = self
                .http_client
                .get(url)
                .bearer_auth(&token.token)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() || e.is_connect() {
                        SyncError::Transient(format!("request to {url} failed: {e}"))
                    } else {
                        SyncError::Http(e)
                    }
                })?;

            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                warn!(
                    tenant_id = %self.credential.tenant_id,
                    "token rejected, refreshing and retrying once"
                );
                self.token_cache.invalidate(&self.credential.tenant_id).await;
                refreshed = true;
                continue;
            }

            return Self::decode(response, url).await;
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response, url: &str) -> SyncResult<T> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(RetryPolicy::parse_retry_after);
            return Err(SyncError::RateLimited { retry_after_secs });
        }

        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Err(SyncError::Transient(format!("upstream returned {status}")));
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(SyncError::Auth("token rejected after refresh".into()));
        }

        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(url.to_string()));
        }

        if status.is_success() {
            return response.json().await.map_err(SyncError::from);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Api {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_parsing() {
        let json = r#"{
            "value": [
                {"id": "role-1", "displayName": "Global Administrator"},
                {"id": "role-2", "displayName": "User Administrator"}
            ],
            "@odata.nextLink": "https://directory.example.com/v1.0/directoryRoles?$skiptoken=xxx"
        }"#;

        let page: Page<RoleDefinition> = serde_json::from_str(json).unwrap();
        assert_eq!(page.value.len(), 2);
        assert_eq!(page.value[0].role_id, "role-1");
        assert!(page.next_link.is_some());
    }

    #[test]
    fn test_page_last_page_has_no_next_link() {
        let json = r#"{"value": []}"#;
        let page: Page<RoleDefinition> = serde_json::from_str(json).unwrap();
        assert!(page.value.is_empty());
        assert!(page.next_link.is_none());
    }

    #[test]
    fn test_member_item_type_tag() {
        let json = r##"{"id": "role-1", "@odata.type": "#microsoft.graph.directoryRole"}"##;
        let item: MemberItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.odata_type.as_deref(), Some(DIRECTORY_ROLE_TYPE));

        let json = r#"{"id": "group-1"}"#;
        let item: MemberItem = serde_json::from_str(json).unwrap();
        assert!(item.odata_type.is_none());
    }
}
