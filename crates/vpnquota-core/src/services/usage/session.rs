//! Tunnel session
//!
//! Owns one ledger from tunnel start to tunnel stop. There is no global
//! ledger; whoever starts a tunnel holds its [`TunnelSession`].

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::{RemoteUsageClient, UsageClientError};
use super::ledger::{SharedLedger, UsageLedger};
use super::scheduler::{LedgerLoopExit, SyncScheduler};
use super::types::{RolloverResult, ServerUsage, StopReason, SyncRequest, UsageState};

#[derive(Error, Debug)]
pub enum SessionError {
    /// The account is blocked by the server
    #[error("Account is blocked")]
    Blocked,

    #[error(transparent)]
    Client(#[from] UsageClientError),
}

/// A running tunnel's accounting session
pub struct TunnelSession {
    scheduler: SyncScheduler,
    ledger: SharedLedger,
    cancel: CancellationToken,
    loop_handle: Option<JoinHandle<LedgerLoopExit>>,
    exit: Option<LedgerLoopExit>,
}

impl TunnelSession {
    /// Ask the server whether this device may connect.
    ///
    /// A blocked account is refused. When the server cannot be reached the
    /// connection is allowed and `Ok(None)` is returned.
    pub async fn preflight(
        client: &dyn RemoteUsageClient,
        request: &SyncRequest,
    ) -> Result<Option<ServerUsage>, SessionError> {
        match client.sync(request).await {
            Ok(usage) if usage.blocked => {
                log::warn!("[usage:session] Preflight refused: account blocked");
                Err(SessionError::Blocked)
            }
            Ok(usage) => Ok(Some(usage)),
            Err(e) if e.is_network() => {
                log::info!("[usage:session] Preflight offline, connecting anyway: {}", e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Restore state, roll the day over if needed and start the ledger loop
    pub async fn start(scheduler: &SyncScheduler, is_official_server: bool) -> Self {
        let ctx = scheduler.context();
        let today = ctx.clock.today();

        let state = match ctx.store.load(today, is_official_server).await {
            Ok(state) => state,
            Err(e) => {
                log::warn!("[usage:session] Failed to load usage state, starting fresh: {}", e);
                UsageState::new(today, is_official_server)
            }
        };

        let mut ledger = UsageLedger::from_state(state);
        ledger.set_official(is_official_server);
        // At start a new day only resets; there is nothing to disconnect yet
        if ledger.check_day_rollover(today) == RolloverResult::RolledOver {
            log::info!("[usage:session] New day since last session, counters reset");
        }
        let ledger = ledger.into_shared();
        ctx.persist_if_dirty(&ledger).await;

        scheduler.attach(ledger.clone()).await;

        let cancel = CancellationToken::new();
        let loop_handle = scheduler.spawn_ledger_loop(ledger.clone(), cancel.clone());

        log::info!(
            "[usage:session] Started ({})",
            if is_official_server { "official" } else { "manual" }
        );

        Self {
            scheduler: scheduler.clone(),
            ledger,
            cancel,
            loop_handle: Some(loop_handle),
            exit: None,
        }
    }

    pub fn ledger(&self) -> SharedLedger {
        self.ledger.clone()
    }

    pub async fn snapshot(&self) -> UsageState {
        self.ledger.read().await.snapshot()
    }

    /// Wait until the ledger loop ends on its own (enforcement or reset).
    ///
    /// Cancel-safe: dropping this future leaves the session intact.
    pub async fn wait(&mut self) -> Option<StopReason> {
        if let Some(handle) = self.loop_handle.as_mut() {
            let exit = handle.await.unwrap_or_else(|e| {
                log::error!("[usage:session] Ledger loop panicked: {}", e);
                LedgerLoopExit::default()
            });
            self.loop_handle = None;
            self.exit = Some(exit);
        }
        self.exit.as_ref().and_then(|e| e.reason)
    }

    /// Tear the session down.
    ///
    /// Pending MB are reported within the disconnect timeout; whatever does
    /// not make it is dropped. Never hangs and never fails.
    pub async fn stop(mut self) -> UsageState {
        self.cancel.cancel();
        self.wait().await;

        let in_flight = self.exit.take().and_then(|e| e.in_flight);
        let timeout = self.scheduler.config().disconnect_sync_timeout;
        let scheduler = self.scheduler.clone();
        let ledger = self.ledger.clone();

        let flush = async move {
            if let Some(task) = in_flight {
                let _ = task.await;
            }
            scheduler.flush(&ledger).await
        };

        match tokio::time::timeout(timeout, flush).await {
            Ok(Some(applied)) => log::debug!("[usage:session] Final sync: {:?}", applied),
            Ok(None) => log::debug!("[usage:session] Nothing pending at stop"),
            Err(_) => log::warn!(
                "[usage:session] Final sync exceeded {:?}, dropping pending usage",
                timeout
            ),
        }

        let snapshot = {
            let mut ledger = self.ledger.write().await;
            ledger.invalidate();
            ledger.mark_dirty();
            ledger.snapshot()
        };
        self.scheduler
            .context()
            .persist_if_dirty(&self.ledger)
            .await;
        self.scheduler.detach(&self.ledger).await;

        log::info!(
            "[usage:session] Stopped at {} / {} MB",
            snapshot.used_mb,
            snapshot.total_limit_mb
        );
        snapshot
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
