//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod config;
pub mod device;
pub mod history;
pub mod reward;
pub mod status;
pub mod sync;
pub mod watch;

use std::sync::Arc;

use anyhow::Result;

use crate::output::OutputFormat;
use vpnquota_core::services::usage::{
    device_id, ByteCounterSource, EventSink, HttpUsageClient, KvUsageStateStore, LogEventSink,
    ProcNetDevCounter, SqliteKvStore, StopReason, SyncHistoryStore, SystemClock, TunnelControl,
};
use vpnquota_core::{AppConfig, Database, SchedulerConfig, SyncScheduler, UsageContext};

/// Shared context for all commands
pub struct Context {
    pub config: AppConfig,
    pub db: Database,
    pub format: OutputFormat,
    pub quiet: bool,
}

impl Context {
    pub fn kv(&self) -> Arc<SqliteKvStore> {
        Arc::new(SqliteKvStore::new(self.db.pool.clone()))
    }

    pub fn state_store(&self) -> Arc<KvUsageStateStore> {
        Arc::new(KvUsageStateStore::new(self.kv()))
    }

    pub fn history(&self) -> SyncHistoryStore {
        SyncHistoryStore::new(self.db.pool.clone())
    }

    pub async fn device_id(&self) -> Result<String> {
        Ok(device_id(self.kv().as_ref()).await?)
    }

    /// Accounting client; fails when no server is configured
    pub fn client(&self) -> Result<Arc<HttpUsageClient>> {
        self.config.require_remote()?;
        Ok(Arc::new(HttpUsageClient::from_config(&self.config)?))
    }

    /// Wire a scheduler against the configured server and this database
    pub async fn scheduler(
        &self,
        events: Arc<dyn EventSink>,
        tunnel: Arc<dyn TunnelControl>,
        counters: Arc<dyn ByteCounterSource>,
    ) -> Result<SyncScheduler> {
        let ctx = UsageContext {
            device_id: self.device_id().await?,
            client: self.client()?,
            store: self.state_store(),
            history: Some(self.history()),
            events,
            tunnel,
            counters,
            clock: Arc::new(SystemClock),
        };
        Ok(SyncScheduler::new(ctx, SchedulerConfig::from(&self.config)))
    }

    /// Scheduler for one-shot commands that never run a tunnel
    pub async fn detached_scheduler(&self) -> Result<SyncScheduler> {
        self.scheduler(
            Arc::new(LogEventSink),
            Arc::new(NoTunnel),
            Arc::new(ProcNetDevCounter::new()),
        )
        .await
    }
}

/// Tunnel control for commands with no tunnel to stop
struct NoTunnel;

impl TunnelControl for NoTunnel {
    fn stop_tunnel(&self, reason: StopReason) {
        log::debug!("[cli] No tunnel to stop ({})", reason);
    }
}
