//! Common test utilities for rolesync integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use rolesync::{AppConfig, RetryConfig, TenantCredential, TokenCache};

/// Builds an [`AppConfig`] pointing every external service at one mock
/// server, with test-speed retries and serialized user processing for
/// deterministic insert bodies.
pub fn test_config(server: &MockServer) -> AppConfig {
    AppConfig {
        login_base_url: server.uri(),
        directory_base_url: format!("{}/v1.0", server.uri()),
        warehouse_base_url: format!("{}/warehouse", server.uri()),
        project: "analytics".into(),
        dataset: "identity".into(),
        table: "user_role_assignments".into(),
        worklist_table: "user_worklist".into(),
        warehouse_token: None,
        tenant_workers: 4,
        user_workers: 1,
        request_timeout_secs: 5,
        retry: RetryConfig::for_testing(),
    }
}

/// A credential for a test tenant.
pub fn credential(tenant_id: &str) -> TenantCredential {
    TenantCredential {
        tenant_id: tenant_id.to_string(),
        client_id: format!("client-{tenant_id}"),
        client_secret: format!("secret-{tenant_id}").into(),
    }
}

/// A token cache wired to the mock server's login endpoint.
pub fn token_cache(server: &MockServer) -> TokenCache {
    TokenCache::new(
        server.uri(),
        "https://directory.example.com/.default".into(),
        reqwest::Client::new(),
    )
}

/// OAuth2 token response body.
pub fn token_response(token: &str) -> Value {
    json!({
        "access_token": token,
        "expires_in": 3600,
        "token_type": "Bearer"
    })
}

/// Mounts a successful token endpoint for one tenant.
pub async fn mount_token_endpoint(server: &MockServer, tenant_id: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/{tenant_id}/oauth2/v2.0/token")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_response(&format!("tok-{tenant_id}"))),
        )
        .mount(server)
        .await;
}

/// A role definition entry.
pub fn role(id: &str, name: &str) -> Value {
    json!({ "id": id, "displayName": name })
}

/// A membership entry tagged as a directory role.
pub fn role_membership(id: &str) -> Value {
    json!({ "id": id, "@odata.type": "#microsoft.graph.directoryRole" })
}

/// A membership entry that is a plain group, not a role.
pub fn group_membership(id: &str) -> Value {
    json!({ "id": id, "@odata.type": "#microsoft.graph.group" })
}

/// Wraps items in a paginated listing body.
pub fn page(items: Vec<Value>, next_link: Option<&str>) -> Value {
    let mut body = json!({ "value": items });
    if let Some(link) = next_link {
        body["@odata.nextLink"] = json!(link);
    }
    body
}

/// A user profile body.
pub fn user_profile(id: &str, display_name: &str) -> Value {
    json!({ "id": id, "displayName": display_name })
}

/// One worklist row grouping a tenant's users.
pub fn worklist_row(tenant_id: &str, user_ids: &[&str]) -> Value {
    json!({
        "tenant_id": tenant_id,
        "client_id": format!("client-{tenant_id}"),
        "client_secret": format!("secret-{tenant_id}"),
        "user_ids": user_ids
    })
}

/// Worklist query response body.
pub fn worklist_response(rows: Vec<Value>) -> Value {
    json!({ "rows": rows })
}

/// Mounts the warehouse worklist query endpoint.
pub async fn mount_worklist(server: &MockServer, rows: Vec<Value>) {
    Mock::given(method("POST"))
        .and(path("/warehouse/projects/analytics/queries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(worklist_response(rows)))
        .mount(server)
        .await;
}

/// Mounts a fully successful bulk insert endpoint.
pub async fn mount_insert_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(
            "/warehouse/projects/analytics/datasets/identity/tables/user_role_assignments/insertAll",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

/// Collects the row payloads of every bulk insert the server received.
pub async fn received_insert_rows(server: &MockServer) -> Vec<Value> {
    let requests = server.received_requests().await.unwrap_or_default();
    let mut rows = Vec::new();
    for request in requests {
        if !request.url.path().ends_with("/insertAll") {
            continue;
        }
        let body: Value = serde_json::from_slice(&request.body).expect("insert body is JSON");
        for entry in body["rows"].as_array().into_iter().flatten() {
            rows.push(entry["json"].clone());
        }
    }
    rows
}

/// Responds with a fixed sequence of templates, one per request, repeating
/// the final template once the sequence is exhausted.
pub struct SequenceResponder {
    responses: Vec<ResponseTemplate>,
    position: Arc<AtomicU32>,
}

impl SequenceResponder {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        Self {
            responses,
            position: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let index = (self.position.fetch_add(1, Ordering::SeqCst) as usize)
            .min(self.responses.len() - 1);
        self.responses[index].clone()
    }
}
