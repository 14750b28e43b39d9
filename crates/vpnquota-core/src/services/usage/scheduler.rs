//! Sync scheduler
//!
//! Two background loops drive the ledger.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          SyncScheduler                            │
//! │                                                                  │
//! │  ┌─────────────────────────┐      ┌───────────────────────────┐  │
//! │  │ Ledger loop (5 s)       │      │ Refresh loop (10 s)       │  │
//! │  │ tunnel active only      │      │ always                    │  │
//! │  │ 1. day rollover         │      │ sync(add_mb = 0)          │  │
//! │  │ 2. server reset         │      │ publish to watch channel  │  │
//! │  │ 3. limit increase       │      │ reconcile active ledger   │  │
//! │  │ 4. sample counters      │      └───────────────────────────┘  │
//! │  │ 5. enforce              │                                     │
//! │  │ 6. spawn pending sync   │                                     │
//! │  └─────────────────────────┘                                     │
//! └──────────────────────────────────────────────────────────────────┘
//!           │                 │                  │
//!           ▼                 ▼                  ▼
//!    ┌────────────┐    ┌─────────────┐    ┌──────────────┐
//!    │ UsageLedger│    │ StateStore  │    │ Events/Tunnel│
//!    └────────────┘    └─────────────┘    └──────────────┘
//! ```
//!
//! Both loops race their interval sleep against a [`CancellationToken`], so
//! cancellation is seen at the top of every iteration. An RPC already in
//! flight is never aborted; its result is dropped by the ledger if the epoch
//! moved on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use chrono::NaiveDate;

use super::client::{RemoteUsageClient, UsageClientError};
use super::clock::Clock;
use super::counter::{ByteCounterSource, CounterSampler};
use super::enforcer::{EnforcerConfig, QuotaEnforcer};
use super::events::{EventSink, TunnelControl, UsageEvent};
use super::history::{SyncHistoryStore, SyncRecord};
use super::ledger::{PendingSync, SharedLedger, SyncApplied, UsageLedger};
use super::store::UsageStateStore;
use super::types::{RolloverResult, ServerUsage, StopReason, SyncRequest};
use crate::config::AppConfig;

/// Sync history older than this is pruned by the refresh loop
pub const HISTORY_RETENTION_DAYS: u32 = 30;

// ============================================================================
// Configuration
// ============================================================================

/// Timing and threshold configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub ledger_interval: Duration,
    pub refresh_interval: Duration,
    /// Hard cap on the sync made while a session stops
    pub disconnect_sync_timeout: Duration,
    pub enforcer: EnforcerConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SchedulerConfig {
    fn from(config: &AppConfig) -> Self {
        let config = config.validate();
        Self {
            ledger_interval: config.ledger_interval(),
            refresh_interval: config.refresh_interval(),
            disconnect_sync_timeout: config.disconnect_sync_timeout(),
            enforcer: EnforcerConfig::from(&config),
        }
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Everything the loops talk to
#[derive(Clone)]
pub struct UsageContext {
    pub device_id: String,
    pub client: Arc<dyn RemoteUsageClient>,
    pub store: Arc<dyn UsageStateStore>,
    pub history: Option<SyncHistoryStore>,
    pub events: Arc<dyn EventSink>,
    pub tunnel: Arc<dyn TunnelControl>,
    pub counters: Arc<dyn ByteCounterSource>,
    pub clock: Arc<dyn Clock>,
}

impl UsageContext {
    /// Run one RPC and record it in the history (if any)
    pub async fn call(&self, request: &SyncRequest) -> Option<ServerUsage> {
        let result = self.client.sync(request).await;
        self.record(request, result.as_ref()).await;
        log_failure(request, result)
    }

    /// Append one round trip to the history (if any)
    pub async fn record(
        &self,
        request: &SyncRequest,
        outcome: std::result::Result<&ServerUsage, &UsageClientError>,
    ) {
        let Some(history) = &self.history else {
            return;
        };
        let record = SyncRecord::from_outcome(request, outcome);
        if let Err(e) = history.save(&record).await {
            log::warn!("[usage:scheduler] Failed to record sync history: {}", e);
        }
    }

    /// Persist the ledger when it changed since the last save
    pub async fn persist_if_dirty(&self, ledger: &SharedLedger) {
        let snapshot = {
            let mut guard = ledger.write().await;
            if !guard.take_dirty() {
                return;
            }
            guard.snapshot()
        };
        if let Err(e) = self.store.save(&snapshot).await {
            log::warn!("[usage:scheduler] Failed to persist usage state: {}", e);
            ledger.write().await.mark_dirty();
        }
    }
}

fn log_failure(
    request: &SyncRequest,
    result: std::result::Result<ServerUsage, UsageClientError>,
) -> Option<ServerUsage> {
    match result {
        Ok(usage) => Some(usage),
        Err(e) => {
            log::warn!(
                "[usage:scheduler] {} call failed: {}",
                request.action_type,
                e
            );
            None
        }
    }
}

// ============================================================================
// Tick Results
// ============================================================================

/// Result of one ledger tick
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// The tunnel was asked to stop; the loop must exit
    pub stop: Option<StopReason>,
    /// Sync task spawned during this tick
    pub sync_task: Option<JoinHandle<()>>,
}

/// How the ledger loop ended
#[derive(Debug, Default)]
pub struct LedgerLoopExit {
    /// Stop reason when enforcement or a reset ended the loop
    pub reason: Option<StopReason>,
    /// Sync still running when the loop ended
    pub in_flight: Option<JoinHandle<()>>,
}

// ============================================================================
// SyncScheduler
// ============================================================================

/// Ledger currently attached to a running tunnel
pub type ActiveLedger = Arc<RwLock<Option<SharedLedger>>>;

#[derive(Clone)]
pub struct SyncScheduler {
    ctx: UsageContext,
    config: SchedulerConfig,
    enforcer: QuotaEnforcer,
    active: ActiveLedger,
    usage_tx: Arc<watch::Sender<Option<ServerUsage>>>,
}

impl SyncScheduler {
    pub fn new(ctx: UsageContext, config: SchedulerConfig) -> Self {
        let (usage_tx, _) = watch::channel(None);
        Self {
            enforcer: QuotaEnforcer::new(config.enforcer),
            ctx,
            config,
            active: Arc::new(RwLock::new(None)),
            usage_tx: Arc::new(usage_tx),
        }
    }

    pub fn context(&self) -> &UsageContext {
        &self.ctx
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Feed of the latest server answer
    pub fn subscribe(&self) -> watch::Receiver<Option<ServerUsage>> {
        self.usage_tx.subscribe()
    }

    /// Latest server answer seen by any loop or action
    pub fn latest_usage(&self) -> Option<ServerUsage> {
        self.usage_tx.borrow().clone()
    }

    // ========================================================================
    // Active Ledger
    // ========================================================================

    pub async fn attach(&self, ledger: SharedLedger) {
        *self.active.write().await = Some(ledger);
    }

    /// Detach `ledger` if it is the one attached
    pub async fn detach(&self, ledger: &SharedLedger) {
        let mut active = self.active.write().await;
        if active.as_ref().is_some_and(|l| Arc::ptr_eq(l, ledger)) {
            *active = None;
        }
    }

    pub async fn active_ledger(&self) -> Option<SharedLedger> {
        self.active.read().await.clone()
    }

    /// Publish a server answer and fold it into the active ledger, or into
    /// the persisted state when no tunnel is up
    pub async fn publish(&self, usage: &ServerUsage) {
        self.usage_tx.send_replace(Some(usage.clone()));

        let Some(ledger) = self.active_ledger().await else {
            self.reconcile_stored(usage).await;
            return;
        };
        let outcome = ledger.write().await.reconcile_with_server(usage);
        if outcome.limit_increased {
            log::info!(
                "[usage:scheduler] Limit raised to {} MB, disconnect flags cleared",
                usage.total_limit_mb
            );
        }
        self.ctx.persist_if_dirty(&ledger).await;
    }

    async fn reconcile_stored(&self, usage: &ServerUsage) {
        let today = self.ctx.clock.today();
        let state = match self.ctx.store.load(today, true).await {
            Ok(state) => state,
            Err(e) => {
                log::warn!("[usage:scheduler] Failed to load usage state: {}", e);
                return;
            }
        };

        let mut ledger = UsageLedger::from_state(state);
        ledger.check_day_rollover(today);
        ledger.reconcile_with_server(usage);
        if !ledger.take_dirty() {
            return;
        }
        if let Err(e) = self.ctx.store.save(ledger.state()).await {
            log::warn!("[usage:scheduler] Failed to persist usage state: {}", e);
        }
    }

    // ========================================================================
    // Refresh Loop
    // ========================================================================

    /// One refresh round trip (`add_mb = 0`).
    ///
    /// Only failures and answers that differ from the last one are recorded
    /// in the history.
    pub async fn refresh_once(&self) -> Option<ServerUsage> {
        let request = SyncRequest::usage(&self.ctx.device_id, 0, self.ctx.clock.today());
        let result = self.ctx.client.sync(&request).await;

        let unchanged = match (&result, self.latest_usage()) {
            (Ok(usage), Some(previous)) => *usage == previous,
            _ => false,
        };
        if !unchanged {
            self.ctx.record(&request, result.as_ref()).await;
        }

        let usage = log_failure(&request, result)?;
        self.publish(&usage).await;
        Some(usage)
    }

    /// Spawn the refresh loop; it runs until `cancel` fires
    pub fn spawn_refresh_loop(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            log::info!(
                "[usage:scheduler] Refresh loop started ({:?})",
                scheduler.config.refresh_interval
            );
            let mut pruned_on: Option<NaiveDate> = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(scheduler.config.refresh_interval) => {}
                }
                scheduler.refresh_once().await;
                pruned_on = Some(scheduler.prune_history(pruned_on).await);
            }
            log::info!("[usage:scheduler] Refresh loop stopped");
        })
    }

    /// Prune old history once per day; returns the day last pruned
    pub async fn prune_history(&self, pruned_on: Option<NaiveDate>) -> NaiveDate {
        let today = self.ctx.clock.today();
        if pruned_on == Some(today) {
            return today;
        }
        if let Some(history) = &self.ctx.history {
            match history.cleanup(HISTORY_RETENTION_DAYS).await {
                Ok(removed) if removed > 0 => {
                    log::info!("[usage:scheduler] Pruned {} history records", removed)
                }
                Ok(_) => {}
                Err(e) => log::warn!("[usage:scheduler] Failed to prune history: {}", e),
            }
        }
        today
    }

    // ========================================================================
    // Ledger Loop
    // ========================================================================

    /// Spawn the ledger loop for `ledger`.
    ///
    /// The loop ends when `cancel` fires or when a tick asks the tunnel to stop.
    pub fn spawn_ledger_loop(
        &self,
        ledger: SharedLedger,
        cancel: CancellationToken,
    ) -> JoinHandle<LedgerLoopExit> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut sampler = CounterSampler::new();
            // Baseline now so the first interval is counted
            sampler.sample(scheduler.ctx.counters.as_ref());

            let mut exit = LedgerLoopExit::default();
            log::info!(
                "[usage:scheduler] Ledger loop started ({:?})",
                scheduler.config.ledger_interval
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(scheduler.config.ledger_interval) => {}
                }

                let outcome = scheduler.run_ledger_tick(&ledger, &mut sampler).await;
                if let Some(task) = outcome.sync_task {
                    exit.in_flight = Some(task);
                }
                if let Some(reason) = outcome.stop {
                    exit.reason = Some(reason);
                    break;
                }
            }

            log::info!(
                "[usage:scheduler] Ledger loop stopped{}",
                exit.reason
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default()
            );
            exit
        })
    }

    /// One ledger tick
    pub async fn run_ledger_tick(
        &self,
        ledger: &SharedLedger,
        sampler: &mut CounterSampler,
    ) -> TickOutcome {
        let today = self.ctx.clock.today();

        // 1. Day rollover
        let rolled = ledger.write().await.check_day_rollover(today);
        if rolled == RolloverResult::RolledOver {
            self.ctx.persist_if_dirty(ledger).await;
            return self.stop(UsageEvent::DailyReset { date: today }, StopReason::DailyRollover);
        }

        // 2. Server-side reset seen by a previous reconciliation
        let server_reset = ledger.write().await.take_server_reset();
        if server_reset {
            self.ctx.persist_if_dirty(ledger).await;
            return self.stop(UsageEvent::ServerReset, StopReason::ServerReset);
        }

        // 3. Limit increase since the previous tick
        if ledger.write().await.take_limit_increase() {
            log::debug!("[usage:scheduler] Limit increase observed");
        }

        // 4. Sample counters
        let (rx, tx) = sampler.sample(self.ctx.counters.as_ref());

        // 5. Enforce
        let enforcement = {
            let mut guard = ledger.write().await;
            guard.observe_byte_delta(rx, tx);
            let enforcement = self
                .enforcer
                .evaluate(guard.state(), guard.projected_used_mb());
            guard.set_flags(enforcement.flags);
            enforcement
        };

        if let Some(event) = enforcement.event {
            self.ctx.events.emit(event);
        }
        if let Some(reason) = enforcement.stop {
            self.ctx.persist_if_dirty(ledger).await;
            self.ctx.tunnel.stop_tunnel(reason);
            return TickOutcome {
                stop: Some(reason),
                sync_task: None,
            };
        }

        // 6. Report pending MB off the sampling path
        let pending = ledger.write().await.begin_sync();
        let sync_task = pending.map(|pending| {
            let scheduler = self.clone();
            let ledger = ledger.clone();
            tokio::spawn(async move {
                scheduler.sync_batch(&ledger, pending).await;
            })
        });

        self.ctx.persist_if_dirty(ledger).await;

        TickOutcome {
            stop: None,
            sync_task,
        }
    }

    fn stop(&self, event: UsageEvent, reason: StopReason) -> TickOutcome {
        self.ctx.events.emit(event);
        self.ctx.tunnel.stop_tunnel(reason);
        TickOutcome {
            stop: Some(reason),
            sync_task: None,
        }
    }

    /// Report a reserved batch and apply the answer
    pub async fn sync_batch(&self, ledger: &SharedLedger, pending: PendingSync) -> SyncApplied {
        let request =
            SyncRequest::usage(&self.ctx.device_id, pending.mb, self.ctx.clock.today());
        let usage = self.ctx.call(&request).await;

        let applied = ledger
            .write()
            .await
            .apply_sync_result(pending, usage.as_ref());

        match applied {
            SyncApplied::Reconciled(_) => {
                if let Some(usage) = &usage {
                    self.usage_tx.send_replace(Some(usage.clone()));
                }
                log::debug!("[usage:scheduler] Reported {} MB", pending.mb);
            }
            SyncApplied::Retained => {
                log::debug!("[usage:scheduler] Keeping {} MB for retry", pending.mb);
            }
            SyncApplied::Stale => {}
        }

        self.ctx.persist_if_dirty(ledger).await;
        applied
    }

    /// Report whatever is pending right now (disconnect path)
    pub async fn flush(&self, ledger: &SharedLedger) -> Option<SyncApplied> {
        let pending = ledger.write().await.begin_sync()?;
        Some(self.sync_batch(ledger, pending).await)
    }
}
