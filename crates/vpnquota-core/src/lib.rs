//! # vpnquota-core
//!
//! Usage accounting and quota enforcement for a metered VPN client.
//!
//! This crate provides:
//! - Configuration (`config` module)
//! - Database operations (`db` module)
//! - The usage ledger, enforcer, scheduler and session (`services::usage`)
//! - Unified error handling (`error` module)

pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod utils;

// Re-export utils for convenience
pub use utils::create_command;

// Re-exports for convenience
pub use config::AppConfig;
pub use db::Database;
pub use error::{Error, Result};

// Re-export commonly used types from services
pub use services::usage::{
    ActionType, HttpUsageClient, QuotaEnforcer, RemoteUsageClient, RewardsService,
    SchedulerConfig, ServerUsage, StopReason, SyncRequest, SyncScheduler, TunnelSession,
    UsageContext, UsageEvent, UsageLedger, UsageState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}
