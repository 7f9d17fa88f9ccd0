//! Per-user and per-tenant processing.
//!
//! A user failure is always contained: it is logged and the user skipped,
//! never aborting the tenant's batch. Token or role-listing failures abort
//! the whole tenant before any per-user work starts, because both are
//! prerequisites shared by every user.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::{TenantCredential, TokenCache};
use crate::config::AppConfig;
use crate::directory::{DirectoryClient, RoleDefinition};
use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use crate::warehouse::{OutputRow, TenantWorklist, WarehouseGateway};

/// Outcome counts for one tenant's batch.
#[derive(Debug, Clone, Default)]
pub struct TenantReport {
    pub tenant_id: String,
    pub rows_inserted: usize,
    pub users_skipped: usize,
    pub rows_rejected: usize,
}

/// Resolves assigned role ids to display names against the tenant's role
/// map, preserving listing order. Ids with no match are dropped with a
/// warning; the role may have been deleted between listing and resolution.
fn resolve_role_names(
    assigned: &[String],
    all_roles: &HashMap<String, RoleDefinition>,
    tenant_id: &str,
    user_id: &str,
) -> Vec<String> {
    let mut names = Vec::with_capacity(assigned.len());
    for role_id in assigned {
        match all_roles.get(role_id) {
            Some(role) => names.push(role.display_name.clone()),
            None => warn!(
                %tenant_id,
                %user_id,
                %role_id,
                "assigned role missing from tenant role listing, dropping"
            ),
        }
    }
    names
}

/// Builds one output row for a user, or `None` if the user is skipped.
#[instrument(skip(client, all_roles))]
pub async fn process_user(
    client: &DirectoryClient,
    tenant_id: &str,
    user_id: &str,
    all_roles: &HashMap<String, RoleDefinition>,
) -> Option<OutputRow> {
    let assigned = match client.list_user_roles(user_id).await {
        Ok(ids) => ids,
        Err(e) => {
            error!(%tenant_id, %user_id, error = %e, "failed to list role assignments, skipping user");
            return None;
        }
    };

    let roles = resolve_role_names(&assigned, all_roles, tenant_id, user_id);

    let profile = match client.get_user_profile(user_id).await {
        Ok(profile) => profile,
        Err(SyncError::NotFound(_)) => {
            warn!(%tenant_id, %user_id, "user not found in directory, skipping");
            return None;
        }
        Err(e) => {
            error!(%tenant_id, %user_id, error = %e, "failed to fetch user profile, skipping user");
            return None;
        }
    };

    Some(OutputRow {
        tenant_id: tenant_id.to_string(),
        user_id: user_id.to_string(),
        display_name: profile.display_name,
        roles,
        fetched_at: Utc::now(),
    })
}

/// Processes one tenant: authenticate, list roles once, fan out the tenant's
/// users over a bounded pool, and bulk-insert the collected rows.
#[instrument(skip_all, fields(tenant_id = %entry.tenant_id))]
pub async fn process_tenant(
    entry: TenantWorklist,
    cfg: &AppConfig,
    token_cache: Arc<TokenCache>,
    warehouse: Arc<WarehouseGateway>,
    http_client: reqwest::Client,
) -> SyncResult<TenantReport> {
    let tenant_id = entry.tenant_id.clone();
    info!(users = entry.user_ids.len(), "processing tenant");

    let credential = TenantCredential {
        tenant_id: tenant_id.clone(),
        client_id: entry.client_id.clone(),
        client_secret: entry.client_secret.clone(),
    };

    // Auth and the role listing are shared prerequisites; fail the tenant
    // before any per-user work if either is broken.
    token_cache.get_token(&credential).await?;

    let client = Arc::new(DirectoryClient::new(
        http_client,
        token_cache,
        credential,
        cfg.directory_base_url.clone(),
        RetryPolicy::new(cfg.retry.clone()),
    ));
    let all_roles = Arc::new(client.list_all_roles().await?);

    let semaphore = Arc::new(Semaphore::new(cfg.user_workers));
    let mut tasks = JoinSet::new();

    for user_id in entry.user_ids {
        let client = Arc::clone(&client);
        let all_roles = Arc::clone(&all_roles);
        let semaphore = Arc::clone(&semaphore);
        let tenant_id = tenant_id.clone();

        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return None,
            };
            process_user(&client, &tenant_id, &user_id, &all_roles).await
        });
    }

    let mut rows = Vec::new();
    let mut users_skipped = 0usize;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(row)) => {
                debug!(user_id = %row.user_id, "processed user");
                rows.push(row);
            }
            Ok(None) => users_skipped += 1,
            Err(e) => {
                error!(error = %e, "user task failed");
                users_skipped += 1;
            }
        }
    }

    let mut rows_rejected = 0usize;
    if rows.is_empty() {
        info!("no rows to insert");
    } else {
        info!(rows = rows.len(), "inserting rows");
        let insert_errors = warehouse
            .bulk_insert(&cfg.dataset, &cfg.table, &rows)
            .await?;
        for insert_error in &insert_errors {
            let user_id = rows
                .get(insert_error.index)
                .map_or("<unknown>", |row| row.user_id.as_str());
            error!(
                %user_id,
                reason = %insert_error.summary(),
                "row rejected by warehouse, dropped"
            );
        }
        rows_rejected = insert_errors.len();
    }

    Ok(TenantReport {
        tenant_id,
        rows_inserted: rows.len().saturating_sub(rows_rejected),
        users_skipped,
        rows_rejected,
    })
}
