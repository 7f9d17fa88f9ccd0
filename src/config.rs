//! Runtime configuration for the sync pipeline.

use serde::Deserialize;

use crate::error::{SyncError, SyncResult};

/// Configuration for bounded retry with exponential backoff.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts for a single transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on any single delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay, in `[0.0, 1.0]`.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_factor() -> f64 {
    0.25
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// Creates a configuration with short delays, suitable for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 5,
            max_delay_ms: 20,
            jitter_factor: 0.0,
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.base_delay_ms == 0 {
            return Err(SyncError::Config("base_delay_ms must be > 0".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(SyncError::Config(
                "max_delay_ms must be >= base_delay_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(SyncError::Config(
                "jitter_factor must be in range [0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration for one sync run.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// OAuth2 login endpoint base URL (client-credentials token exchange).
    pub login_base_url: String,
    /// Directory-service API base URL, including the API version segment.
    pub directory_base_url: String,
    /// Warehouse API base URL.
    pub warehouse_base_url: String,
    /// Warehouse project.
    pub project: String,
    /// Destination dataset, shared by all tenants.
    pub dataset: String,
    /// Destination table, shared by all tenants.
    pub table: String,
    /// Source table holding the (tenant, user) worklist.
    #[serde(default = "default_worklist_table")]
    pub worklist_table: String,
    /// Static bearer token for the warehouse API, if it requires one.
    #[serde(default)]
    pub warehouse_token: Option<String>,
    /// Concurrent tenants processed at once.
    #[serde(default = "default_tenant_workers")]
    pub tenant_workers: usize,
    /// Concurrent user lookups within one tenant.
    #[serde(default = "default_user_workers")]
    pub user_workers: usize,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_worklist_table() -> String {
    "user_worklist".to_string()
}

fn default_tenant_workers() -> usize {
    5
}

fn default_user_workers() -> usize {
    64
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        for (name, value) in [
            ("login_base_url", &self.login_base_url),
            ("directory_base_url", &self.directory_base_url),
            ("warehouse_base_url", &self.warehouse_base_url),
            ("project", &self.project),
            ("dataset", &self.dataset),
            ("table", &self.table),
        ] {
            if value.is_empty() {
                return Err(SyncError::Config(format!("{name} must not be empty")));
            }
        }
        if self.tenant_workers == 0 {
            return Err(SyncError::Config("tenant_workers must be > 0".into()));
        }
        if self.user_workers == 0 {
            return Err(SyncError::Config("user_workers must be > 0".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(SyncError::Config("request_timeout_secs must be > 0".into()));
        }
        self.retry.validate()
    }

    /// The OAuth2 scope requested during token exchange.
    #[must_use]
    pub fn token_scope(&self) -> String {
        format!("{}/.default", self.directory_base_url)
    }
}
