//! Run coordination: worklist fetch, tenant fan-out, summary aggregation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::auth::TokenCache;
use crate::config::AppConfig;
use crate::error::{SyncError, SyncResult};
use crate::pipeline::{process_tenant, TenantReport};
use crate::warehouse::WarehouseGateway;

/// Aggregated outcome of one sync run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub tenants_succeeded: usize,
    pub tenants_failed: usize,
    pub rows_inserted: usize,
    pub users_skipped: usize,
    pub rows_rejected: usize,
}

impl RunSummary {
    /// True if one or more tenants failed entirely. Per-user skips and
    /// per-row rejections do not count.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.tenants_failed > 0
    }

    fn absorb(&mut self, report: &TenantReport) {
        self.tenants_succeeded += 1;
        self.rows_inserted += report.rows_inserted;
        self.users_skipped += report.users_skipped;
        self.rows_rejected += report.rows_rejected;
    }
}

/// Runs one sync pass over every tenant in the worklist.
///
/// Only a worklist fetch failure is returned as an error; individual tenant
/// failures are counted in the summary.
pub async fn run(cfg: Arc<AppConfig>) -> SyncResult<RunSummary> {
    cfg.validate()?;

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.request_timeout_secs))
        .build()?;

    let warehouse = Arc::new(WarehouseGateway::new(
        http_client.clone(),
        cfg.warehouse_base_url.clone(),
        cfg.project.clone(),
        cfg.worklist_table.clone(),
        cfg.warehouse_token.clone(),
    ));
    let token_cache = Arc::new(TokenCache::new(
        cfg.login_base_url.clone(),
        cfg.token_scope(),
        http_client.clone(),
    ));

    // The only whole-process fatal error: the worklist is unreachable.
    let worklist = warehouse.fetch_worklist().await?;
    if worklist.is_empty() {
        warn!("worklist is empty, nothing to do");
        return Ok(RunSummary::default());
    }

    info!(tenants = worklist.len(), "starting sync for all tenants");

    let semaphore = Arc::new(Semaphore::new(cfg.tenant_workers));
    let mut tasks = JoinSet::new();

    for entry in worklist {
        let cfg = Arc::clone(&cfg);
        let token_cache = Arc::clone(&token_cache);
        let warehouse = Arc::clone(&warehouse);
        let semaphore = Arc::clone(&semaphore);
        let http_client = http_client.clone();

        tasks.spawn(async move {
            let tenant_id = entry.tenant_id.clone();
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return (
                        tenant_id,
                        Err(SyncError::Config("tenant pool closed".into())),
                    )
                }
            };
            let result = process_tenant(entry, &cfg, token_cache, warehouse, http_client).await;
            (tenant_id, result)
        });
    }

    let mut summary = RunSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((tenant_id, Ok(report))) => {
                info!(
                    %tenant_id,
                    rows_inserted = report.rows_inserted,
                    users_skipped = report.users_skipped,
                    rows_rejected = report.rows_rejected,
                    "tenant completed"
                );
                summary.absorb(&report);
            }
            Ok((tenant_id, Err(e))) => {
                error!(%tenant_id, error = %e, "tenant failed");
                summary.tenants_failed += 1;
            }
            Err(e) => {
                error!(error = %e, "tenant task failed");
                summary.tenants_failed += 1;
            }
        }
    }

    info!(
        tenants_succeeded = summary.tenants_succeeded,
        tenants_failed = summary.tenants_failed,
        rows_inserted = summary.rows_inserted,
        users_skipped = summary.users_skipped,
        rows_rejected = summary.rows_rejected,
        "sync run complete"
    );

    Ok(summary)
}
