use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use rolesync::{AppConfig, RetryConfig};

#[derive(Debug, Parser)]
#[command(
    name = "rolesync",
    version,
    about = "Sync per-user directory role assignments into the warehouse"
)]
struct Cli {
    /// OAuth2 login endpoint base URL (client-credentials token exchange).
    #[arg(
        long,
        env = "ROLESYNC_LOGIN_URL",
        default_value = "https://login.microsoftonline.com"
    )]
    login_url: String,

    /// Directory-service API base URL, including the API version segment.
    #[arg(
        long,
        env = "ROLESYNC_DIRECTORY_URL",
        default_value = "https://graph.microsoft.com/v1.0"
    )]
    directory_url: String,

    /// Warehouse API base URL.
    #[arg(long, env = "ROLESYNC_WAREHOUSE_URL")]
    warehouse_url: String,

    /// Warehouse project.
    #[arg(long, env = "ROLESYNC_PROJECT")]
    project: String,

    /// Destination dataset (shared by all tenants).
    #[arg(long, env = "ROLESYNC_DATASET")]
    dataset: String,

    /// Destination table (shared by all tenants).
    #[arg(long, env = "ROLESYNC_TABLE", default_value = "user_role_assignments")]
    table: String,

    /// Source table holding the (tenant, user) worklist.
    #[arg(long, env = "ROLESYNC_WORKLIST_TABLE", default_value = "user_worklist")]
    worklist_table: String,

    /// Static bearer token for the warehouse API.
    #[arg(long, env = "ROLESYNC_WAREHOUSE_TOKEN")]
    warehouse_token: Option<String>,

    /// Concurrent tenants processed at once.
    #[arg(long, default_value = "5")]
    tenant_workers: usize,

    /// Concurrent user lookups within one tenant.
    #[arg(long, default_value = "64")]
    user_workers: usize,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, default_value = "30")]
    request_timeout_secs: u64,

    /// Maximum retries for a single throttled or transient call.
    #[arg(long, default_value = "5")]
    max_retries: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig {
        login_base_url: cli.login_url,
        directory_base_url: cli.directory_url,
        warehouse_base_url: cli.warehouse_url,
        project: cli.project,
        dataset: cli.dataset,
        table: cli.table,
        worklist_table: cli.worklist_table,
        warehouse_token: cli.warehouse_token,
        tenant_workers: cli.tenant_workers,
        user_workers: cli.user_workers,
        request_timeout_secs: cli.request_timeout_secs,
        retry: RetryConfig {
            max_retries: cli.max_retries,
            ..RetryConfig::default()
        },
    };

    match rolesync::run(Arc::new(cfg)).await {
        Ok(summary) if summary.has_failures() => ExitCode::from(1),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "sync run aborted");
            ExitCode::from(2)
        }
    }
}
