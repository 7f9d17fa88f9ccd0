//! Warehouse gateway: worklist query and bulk row insert.
//!
//! The warehouse is treated as a black-box HTTP service with a query
//! endpoint and an append-only `insertAll`-style bulk insert. Inserts are
//! not upserts; re-running the pipeline appends duplicate rows.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{SyncError, SyncResult};

/// One tenant's slice of the worklist: credentials plus the users to refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantWorklist {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    #[serde(default)]
    pub user_ids: Vec<String>,
}

/// One synced user, ready for bulk insert.
#[derive(Debug, Clone, Serialize)]
pub struct OutputRow {
    pub tenant_id: String,
    pub user_id: String,
    pub display_name: String,
    /// Resolved role display names, in assignment-listing order.
    pub roles: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

/// A per-row rejection reported by the bulk insert.
#[derive(Debug, Clone, Deserialize)]
pub struct RowInsertError {
    pub index: usize,
    #[serde(default)]
    pub errors: Vec<RowErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowErrorDetail {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl RowInsertError {
    /// Joins the rejection messages for logging.
    #[must_use]
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<TenantWorklist>,
}

#[derive(Debug, Serialize)]
struct InsertRequest<'a> {
    rows: Vec<InsertRow<'a>>,
}

#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    json: &'a OutputRow,
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    #[serde(rename = "insertErrors", default)]
    insert_errors: Vec<RowInsertError>,
}

/// Client for the warehouse's query and bulk-insert endpoints.
#[derive(Debug)]
pub struct WarehouseGateway {
    http_client: reqwest::Client,
    base_url: String,
    project: String,
    worklist_table: String,
    bearer_token: Option<String>,
}

impl WarehouseGateway {
    pub fn new(
        http_client: reqwest::Client,
        base_url: String,
        project: String,
        worklist_table: String,
        bearer_token: Option<String>,
    ) -> Self {
        Self {
            http_client,
            base_url,
            project,
            worklist_table,
            bearer_token,
        }
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.http_client.post(url);
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }
        request
    }

    /// Fetches the tenant/user worklist with one grouping query. User order
    /// within a tenant carries no meaning.
    #[instrument(skip(self))]
    pub async fn fetch_worklist(&self) -> SyncResult<Vec<TenantWorklist>> {
        let url = format!("{}/projects/{}/queries", self.base_url, self.project);
        let sql = format!(
            "SELECT tenant_id, client_id, client_secret, \
             ARRAY_AGG(user_id) AS user_ids FROM `{}` \
             GROUP BY tenant_id, client_id, client_secret",
            self.worklist_table
        );

        let response = self
            .post(&url)
            .json(&QueryRequest { query: &sql })
            .send()
            .await
            .map_err(|e| SyncError::Warehouse(format!("worklist query failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Warehouse(format!(
                "worklist query failed with status {status}: {body}"
            )));
        }

        let query: QueryResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Warehouse(format!("failed to parse worklist: {e}")))?;

        info!("worklist contains {} tenants", query.rows.len());
        Ok(query.rows)
    }

    /// Appends rows to the destination table. Returns per-row rejections;
    /// an empty vector means every row was accepted. Rejected rows are never
    /// retried. A call with zero rows is a no-op.
    #[instrument(skip(self, rows), fields(row_count = rows.len()))]
    pub async fn bulk_insert(
        &self,
        dataset: &str,
        table: &str,
        rows: &[OutputRow],
    ) -> SyncResult<Vec<RowInsertError>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}/insertAll",
            self.base_url, self.project, dataset, table
        );
        let body = InsertRequest {
            rows: rows.iter().map(|row| InsertRow { json: row }).collect(),
        };

        let response = self
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Warehouse(format!("bulk insert failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Warehouse(format!(
                "bulk insert failed with status {status}: {body}"
            )));
        }

        let insert: InsertResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Warehouse(format!("failed to parse insert response: {e}")))?;

        Ok(insert.insert_errors)
    }
}
