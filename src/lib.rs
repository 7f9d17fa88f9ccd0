//! Multi-tenant sync of directory role assignments into an analytical
//! warehouse.
//!
//! For every (tenant, user) pair in the warehouse worklist this crate
//! fetches the user's assigned directory roles and profile, resolves role
//! ids to display names against the tenant's role listing, and bulk-inserts
//! the resulting rows. Tenants are processed concurrently over a bounded
//! pool, with a second bounded pool over users inside each tenant.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rolesync::{AppConfig, RetryConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = AppConfig {
//!     login_base_url: "https://login.microsoftonline.com".into(),
//!     directory_base_url: "https://graph.microsoft.com/v1.0".into(),
//!     warehouse_base_url: "https://warehouse.example.com".into(),
//!     project: "analytics".into(),
//!     dataset: "identity".into(),
//!     table: "user_role_assignments".into(),
//!     worklist_table: "user_worklist".into(),
//!     warehouse_token: None,
//!     tenant_workers: 5,
//!     user_workers: 64,
//!     request_timeout_secs: 30,
//!     retry: RetryConfig::default(),
//! };
//!
//! let summary = rolesync::run(Arc::new(cfg)).await?;
//! println!("{} tenants failed", summary.tenants_failed);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod warehouse;

// Re-exports
pub use auth::{AccessToken, TenantCredential, TokenCache};
pub use config::{AppConfig, RetryConfig};
pub use directory::{DirectoryClient, RoleDefinition, UserProfile};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{run, RunSummary};
pub use pipeline::{process_tenant, process_user, TenantReport};
pub use retry::RetryPolicy;
pub use warehouse::{OutputRow, RowInsertError, TenantWorklist, WarehouseGateway};
