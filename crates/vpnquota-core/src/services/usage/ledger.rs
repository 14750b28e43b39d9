//! Usage ledger
//!
//! Owns the device's optimistic view of today's quota and folds it into the
//! server's authoritative numbers.
//!
//! ```text
//!   byte deltas ──► accumulated_unsynced_bytes ──begin_sync()──► PendingSync
//!                                                                    │
//!                                                         RemoteUsageClient
//!                                                                    │
//!   used_mb / total_limit_mb ◄──reconcile_with_server()◄──apply_sync_result()
//! ```
//!
//! The ledger is plain synchronous state. Background loops share it through
//! [`SharedLedger`] and never hold the lock across an await point.
//!
//! Every reset (day rollover, server reset, teardown) bumps the ledger
//! *epoch*. A sync started under an older epoch is discarded when its result
//! arrives, so a late answer can never resurrect yesterday's numbers.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::RwLock;

use super::types::{
    RolloverResult, ServerUsage, ThresholdFlags, UsageState, BYTES_PER_MB,
    SERVER_RESET_PREVIOUS_MIN_MB, SERVER_RESET_REPORTED_MAX_MB,
};

/// A batch of megabytes reserved for one sync call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSync {
    pub mb: u64,
    pub epoch: u64,
}

/// What a reconciliation changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// The server reset its counters; the ledger was reset like a rollover
    pub server_reset: bool,
    /// The limit went up and the disconnect flags were cleared
    pub limit_increased: bool,
}

/// Result of applying a finished sync call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncApplied {
    /// Server answer folded in
    Reconciled(ReconcileOutcome),
    /// Call failed; accumulated bytes kept for the next attempt
    Retained,
    /// Ledger moved to a new epoch while the call was in flight
    Stale,
}

// ============================================================================
// UsageLedger
// ============================================================================

#[derive(Debug)]
pub struct UsageLedger {
    state: UsageState,
    epoch: u64,
    in_flight: Option<PendingSync>,
    /// Whether a server limit has been accepted for the current day
    limit_confirmed: bool,
    pending_server_reset: bool,
    limit_increased: bool,
    dirty: bool,
}

/// Shared ledger handle
pub type SharedLedger = Arc<RwLock<UsageLedger>>;

impl UsageLedger {
    /// Fresh ledger for `today`
    pub fn new(today: NaiveDate, is_official_server: bool) -> Self {
        Self::from_state(UsageState::new(today, is_official_server))
    }

    /// Ledger restored from persisted state
    pub fn from_state(mut state: UsageState) -> Self {
        state.accumulated_unsynced_bytes = 0;
        Self {
            state,
            epoch: 0,
            in_flight: None,
            limit_confirmed: false,
            pending_server_reset: false,
            limit_increased: false,
            dirty: false,
        }
    }

    pub fn into_shared(self) -> SharedLedger {
        Arc::new(RwLock::new(self))
    }

    pub fn state(&self) -> &UsageState {
        &self.state
    }

    pub fn snapshot(&self) -> UsageState {
        self.state.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_official(&self) -> bool {
        self.state.is_official_server
    }

    pub fn has_sync_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    // ========================================================================
    // Sampling
    // ========================================================================

    /// Add measured traffic. Bytes seen on a manual server are discarded.
    pub fn observe_byte_delta(&mut self, rx: u64, tx: u64) {
        if !self.state.is_official_server {
            return;
        }
        let delta = rx.saturating_add(tx);
        self.state.accumulated_unsynced_bytes =
            self.state.accumulated_unsynced_bytes.saturating_add(delta);
    }

    /// Local optimistic usage: reconciled MB plus whole unsynced MB
    pub fn projected_used_mb(&self) -> u64 {
        self.state
            .used_mb
            .saturating_add(self.state.accumulated_unsynced_bytes / BYTES_PER_MB)
    }

    /// Whole MB worth reporting, capped at the remaining quota
    pub fn pending_sync_amount_mb(&self) -> u64 {
        let accumulated_mb = self.state.accumulated_unsynced_bytes / BYTES_PER_MB;
        accumulated_mb.min(self.state.remaining_mb())
    }

    // ========================================================================
    // Day Boundary
    // ========================================================================

    /// Reset the day's counters and flags when `today` differs from the
    /// stored date. Idempotent within a day.
    pub fn check_day_rollover(&mut self, today: NaiveDate) -> RolloverResult {
        if today == self.state.last_synced_date {
            return RolloverResult::None;
        }

        log::info!(
            "[usage:ledger] Day rollover {} -> {}",
            self.state.last_synced_date,
            today
        );
        self.reset_day();
        self.state.last_synced_date = today;
        self.limit_confirmed = false;
        RolloverResult::RolledOver
    }

    fn reset_day(&mut self) {
        self.state.used_mb = 0;
        self.state.accumulated_unsynced_bytes = 0;
        self.state.flags.reset();
        self.bump_epoch();
        self.dirty = true;
    }

    fn bump_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.in_flight = None;
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Overwrite local usage with the server's numbers.
    ///
    /// A higher limit always clears the day's disconnect flags. A lower one
    /// is only taken from the first answer of a session (or of a new day).
    pub fn reconcile_with_server(&mut self, server: &ServerUsage) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let previous = self.state.used_mb;
        let reported = server.display_used_mb;

        if previous > SERVER_RESET_PREVIOUS_MIN_MB && reported < SERVER_RESET_REPORTED_MAX_MB {
            log::info!(
                "[usage:ledger] Server reset detected (local {} MB, server {} MB)",
                previous,
                reported
            );
            self.reset_day();
            self.pending_server_reset = true;
            self.limit_confirmed = false;
            outcome.server_reset = true;
        }

        if self.state.used_mb != reported {
            self.state.used_mb = reported;
            self.dirty = true;
        }

        let current_limit = self.state.total_limit_mb;
        let new_limit = server.total_limit_mb;
        if new_limit > current_limit {
            log::info!(
                "[usage:ledger] Limit increased {} -> {} MB",
                current_limit,
                new_limit
            );
            self.state.total_limit_mb = new_limit;
            self.state.flags.clear_disconnects();
            self.limit_increased = true;
            self.dirty = true;
            outcome.limit_increased = true;
        } else if new_limit < current_limit {
            if self.limit_confirmed {
                log::debug!(
                    "[usage:ledger] Ignoring same-day limit decrease {} -> {} MB",
                    current_limit,
                    new_limit
                );
            } else {
                self.state.total_limit_mb = new_limit;
                self.dirty = true;
            }
        }
        self.limit_confirmed = true;

        outcome
    }

    // ========================================================================
    // Sync Batches
    // ========================================================================

    /// Reserve the pending amount for one sync call.
    ///
    /// Returns `None` when nothing is pending or a batch is already in flight.
    pub fn begin_sync(&mut self) -> Option<PendingSync> {
        if self.in_flight.is_some() {
            return None;
        }
        let mb = self.pending_sync_amount_mb();
        if mb == 0 {
            return None;
        }
        let pending = PendingSync { mb, epoch: self.epoch };
        self.in_flight = Some(pending);
        Some(pending)
    }

    /// Fold in the result of the call started with `pending`.
    ///
    /// On success the reported bytes leave the accumulator and the server's
    /// numbers are reconciled. On failure nothing changes except that the
    /// reservation is released.
    pub fn apply_sync_result(
        &mut self,
        pending: PendingSync,
        result: Option<&ServerUsage>,
    ) -> SyncApplied {
        if pending.epoch != self.epoch {
            log::debug!(
                "[usage:ledger] Discarding sync of {} MB from epoch {} (now {})",
                pending.mb,
                pending.epoch,
                self.epoch
            );
            return SyncApplied::Stale;
        }
        self.in_flight = None;

        match result {
            Some(server) => {
                let reported_bytes = pending.mb.saturating_mul(BYTES_PER_MB);
                self.state.accumulated_unsynced_bytes = self
                    .state
                    .accumulated_unsynced_bytes
                    .saturating_sub(reported_bytes);
                SyncApplied::Reconciled(self.reconcile_with_server(server))
            }
            None => SyncApplied::Retained,
        }
    }

    /// Bump the epoch so no in-flight result can land on this ledger
    pub fn invalidate(&mut self) {
        self.bump_epoch();
    }

    // ========================================================================
    // Flags and Transition Signals
    // ========================================================================

    /// Replace the threshold flags
    pub fn set_flags(&mut self, flags: ThresholdFlags) {
        if self.state.flags != flags {
            self.state.flags = flags;
            self.dirty = true;
        }
    }

    /// Switch between official (metered) and manual (unmetered) servers
    pub fn set_official(&mut self, official: bool) {
        self.state.is_official_server = official;
        if !official {
            self.state.accumulated_unsynced_bytes = 0;
        }
    }

    /// Consume the "server reset detected" signal
    pub fn take_server_reset(&mut self) -> bool {
        std::mem::take(&mut self.pending_server_reset)
    }

    /// Consume the "limit increased" signal
    pub fn take_limit_increase(&mut self) -> bool {
        std::mem::take(&mut self.limit_increased)
    }

    /// Consume the "needs persisting" signal
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Re-arm persistence after a failed save
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::usage::types::DEFAULT_TOTAL_LIMIT_MB;

    const MB: u64 = BYTES_PER_MB;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    fn server(display_used: u64, limit: u64) -> ServerUsage {
        ServerUsage {
            used_mb: display_used,
            display_used_mb: display_used,
            extra_mb: 0,
            coins_extra_mb: 0,
            ads_extra_mb: 0,
            total_limit_mb: limit,
            ads_watched: 0,
            daily_claimed: false,
            blocked: false,
            coins: 0,
            last_login_date: "2026-05-01".to_string(),
        }
    }

    fn ledger_with(used: u64, limit: u64) -> UsageLedger {
        let mut ledger = UsageLedger::new(day(1), true);
        ledger.reconcile_with_server(&server(used, limit));
        ledger.take_dirty();
        ledger.take_limit_increase();
        ledger
    }

    #[test]
    fn test_new_ledger_defaults() {
        let ledger = UsageLedger::new(day(1), true);
        assert_eq!(ledger.state().total_limit_mb, DEFAULT_TOTAL_LIMIT_MB);
        assert_eq!(ledger.state().used_mb, 0);
        assert_eq!(ledger.projected_used_mb(), 0);
    }

    #[test]
    fn test_from_state_drops_accumulated() {
        let mut state = UsageState::new(day(1), true);
        state.accumulated_unsynced_bytes = 10 * MB;
        let ledger = UsageLedger::from_state(state);
        assert_eq!(ledger.state().accumulated_unsynced_bytes, 0);
    }

    #[test]
    fn test_observe_accumulates_and_projects() {
        let mut ledger = ledger_with(100, 1000);
        ledger.observe_byte_delta(3 * MB, 2 * MB + 10);
        assert_eq!(ledger.state().accumulated_unsynced_bytes, 5 * MB + 10);
        assert_eq!(ledger.projected_used_mb(), 105);
        assert_eq!(ledger.pending_sync_amount_mb(), 5);
    }

    #[test]
    fn test_observe_saturates() {
        let mut ledger = ledger_with(0, 1000);
        ledger.observe_byte_delta(u64::MAX, 1);
        ledger.observe_byte_delta(5, 5);
        assert_eq!(ledger.state().accumulated_unsynced_bytes, u64::MAX);
    }

    #[test]
    fn test_manual_server_discards_bytes() {
        let mut ledger = UsageLedger::new(day(1), false);
        ledger.observe_byte_delta(50 * MB, 50 * MB);
        assert_eq!(ledger.state().accumulated_unsynced_bytes, 0);
        assert!(ledger.begin_sync().is_none());
    }

    #[test]
    fn test_pending_amount_capped_at_remaining() {
        let mut ledger = ledger_with(990, 1000);
        ledger.observe_byte_delta(25 * MB, 0);
        assert_eq!(ledger.pending_sync_amount_mb(), 10);

        let mut over = ledger_with(1200, 1000);
        over.observe_byte_delta(25 * MB, 0);
        assert_eq!(over.pending_sync_amount_mb(), 0);
    }

    #[test]
    fn test_rollover_resets_once() {
        let mut ledger = ledger_with(500, 1000);
        ledger.observe_byte_delta(7 * MB, 0);
        ledger.set_flags(ThresholdFlags {
            warning_80_shown: true,
            disconnected_95: true,
            disconnected_100: false,
        });

        assert_eq!(ledger.check_day_rollover(day(2)), RolloverResult::RolledOver);
        assert_eq!(ledger.state().used_mb, 0);
        assert_eq!(ledger.state().accumulated_unsynced_bytes, 0);
        assert_eq!(ledger.state().flags, ThresholdFlags::default());
        assert_eq!(ledger.state().last_synced_date, day(2));
        assert!(ledger.take_dirty());

        // Idempotent within the day
        ledger.set_flags(ThresholdFlags {
            warning_80_shown: true,
            ..Default::default()
        });
        assert_eq!(ledger.check_day_rollover(day(2)), RolloverResult::None);
        assert!(ledger.state().flags.warning_80_shown);
    }

    #[test]
    fn test_rollover_keeps_limit_but_accepts_next_answer() {
        let mut ledger = ledger_with(500, 3500);
        ledger.check_day_rollover(day(2));
        assert_eq!(ledger.state().total_limit_mb, 3500);

        // New day: a lower limit from the server is taken as is
        ledger.reconcile_with_server(&server(0, 3072));
        assert_eq!(ledger.state().total_limit_mb, 3072);
    }

    #[test]
    fn test_reconcile_overwrites_used() {
        let mut ledger = ledger_with(100, 1000);
        ledger.reconcile_with_server(&server(250, 1000));
        assert_eq!(ledger.state().used_mb, 250);
        assert!(ledger.take_dirty());
    }

    #[test]
    fn test_first_answer_accepted_wholesale() {
        let mut ledger = UsageLedger::new(day(1), true);
        ledger.reconcile_with_server(&server(10, 2048));
        assert_eq!(ledger.state().total_limit_mb, 2048);
    }

    #[test]
    fn test_limit_never_decreases_within_day() {
        let mut ledger = ledger_with(100, 1200);
        let outcome = ledger.reconcile_with_server(&server(120, 1000));
        assert_eq!(ledger.state().total_limit_mb, 1200);
        assert!(!outcome.limit_increased);
    }

    #[test]
    fn test_limit_increase_clears_disconnect_flags_only() {
        let mut ledger = ledger_with(960, 1000);
        ledger.set_flags(ThresholdFlags {
            warning_80_shown: true,
            disconnected_95: true,
            disconnected_100: true,
        });

        let outcome = ledger.reconcile_with_server(&server(960, 1150));
        assert!(outcome.limit_increased);
        assert_eq!(ledger.state().total_limit_mb, 1150);
        assert!(ledger.state().flags.warning_80_shown);
        assert!(!ledger.state().flags.disconnected_95);
        assert!(!ledger.state().flags.disconnected_100);
        assert!(ledger.take_limit_increase());
        assert!(!ledger.take_limit_increase());
    }

    #[test]
    fn test_first_answer_with_higher_limit_clears_disconnect_flags() {
        let mut state = UsageState::new(day(1), true);
        state.used_mb = 1000;
        state.total_limit_mb = 1000;
        state.flags = ThresholdFlags {
            warning_80_shown: true,
            disconnected_95: true,
            disconnected_100: true,
        };
        let mut ledger = UsageLedger::from_state(state);

        let outcome = ledger.reconcile_with_server(&server(1000, 1150));
        assert!(outcome.limit_increased);
        assert_eq!(ledger.state().total_limit_mb, 1150);
        assert!(ledger.state().flags.warning_80_shown);
        assert!(!ledger.state().flags.disconnected_95);
        assert!(!ledger.state().flags.disconnected_100);
        assert!(ledger.take_limit_increase());
    }

    #[test]
    fn test_server_reset_detected() {
        let mut ledger = ledger_with(1500, 3072);
        ledger.observe_byte_delta(4 * MB, 0);
        ledger.set_flags(ThresholdFlags {
            warning_80_shown: true,
            ..Default::default()
        });
        let epoch = ledger.epoch();

        let outcome = ledger.reconcile_with_server(&server(3, 3072));
        assert!(outcome.server_reset);
        assert_eq!(ledger.state().used_mb, 3);
        assert_eq!(ledger.state().accumulated_unsynced_bytes, 0);
        assert_eq!(ledger.state().flags, ThresholdFlags::default());
        assert_eq!(ledger.state().last_synced_date, day(1));
        assert!(ledger.epoch() > epoch);
        assert!(ledger.take_server_reset());
        assert!(!ledger.take_server_reset());
    }

    #[test]
    fn test_no_server_reset_below_heuristic() {
        let mut ledger = ledger_with(100, 3072);
        assert!(!ledger.reconcile_with_server(&server(2, 3072)).server_reset);

        let mut ledger = ledger_with(500, 3072);
        assert!(!ledger.reconcile_with_server(&server(10, 3072)).server_reset);
    }

    #[test]
    fn test_begin_sync_single_flight() {
        let mut ledger = ledger_with(0, 1000);
        assert!(ledger.begin_sync().is_none());

        ledger.observe_byte_delta(3 * MB, 0);
        let pending = ledger.begin_sync().unwrap();
        assert_eq!(pending.mb, 3);
        assert!(ledger.has_sync_in_flight());

        ledger.observe_byte_delta(3 * MB, 0);
        assert!(ledger.begin_sync().is_none());
    }

    #[test]
    fn test_successful_sync_subtracts_reported_bytes() {
        let mut ledger = ledger_with(100, 1000);
        ledger.observe_byte_delta(3 * MB + 500, 0);
        let pending = ledger.begin_sync().unwrap();

        // More traffic while the call is in flight
        ledger.observe_byte_delta(2 * MB, 0);

        let applied = ledger.apply_sync_result(pending, Some(&server(103, 1000)));
        assert!(matches!(applied, SyncApplied::Reconciled(_)));
        assert_eq!(ledger.state().used_mb, 103);
        assert_eq!(ledger.state().accumulated_unsynced_bytes, 2 * MB + 500);
        assert_eq!(ledger.projected_used_mb(), 105);
        assert!(!ledger.has_sync_in_flight());
    }

    #[test]
    fn test_failed_sync_keeps_bytes() {
        let mut ledger = ledger_with(100, 1000);
        ledger.observe_byte_delta(3 * MB, 0);
        let pending = ledger.begin_sync().unwrap();

        assert_eq!(ledger.apply_sync_result(pending, None), SyncApplied::Retained);
        assert_eq!(ledger.state().used_mb, 100);
        assert_eq!(ledger.state().accumulated_unsynced_bytes, 3 * MB);

        // Retried on the next tick
        assert_eq!(ledger.begin_sync().map(|p| p.mb), Some(3));
    }

    #[test]
    fn test_stale_sync_discarded_after_rollover() {
        let mut ledger = ledger_with(100, 1000);
        ledger.observe_byte_delta(3 * MB, 0);
        let pending = ledger.begin_sync().unwrap();

        ledger.check_day_rollover(day(2));
        let applied = ledger.apply_sync_result(pending, Some(&server(103, 1000)));
        assert_eq!(applied, SyncApplied::Stale);
        assert_eq!(ledger.state().used_mb, 0);
        assert!(!ledger.has_sync_in_flight());
    }

    #[test]
    fn test_stale_sync_discarded_after_invalidate() {
        let mut ledger = ledger_with(100, 1000);
        ledger.observe_byte_delta(3 * MB, 0);
        let pending = ledger.begin_sync().unwrap();
        ledger.invalidate();
        assert_eq!(
            ledger.apply_sync_result(pending, Some(&server(103, 1000))),
            SyncApplied::Stale
        );
        assert_eq!(ledger.state().used_mb, 100);
    }

    #[test]
    fn test_set_flags_marks_dirty_only_on_change() {
        let mut ledger = ledger_with(0, 1000);
        ledger.set_flags(ThresholdFlags::default());
        assert!(!ledger.take_dirty());
        ledger.set_flags(ThresholdFlags {
            warning_80_shown: true,
            ..Default::default()
        });
        assert!(ledger.take_dirty());
    }

    #[test]
    fn test_set_official_false_drops_accumulated() {
        let mut ledger = ledger_with(0, 1000);
        ledger.observe_byte_delta(5 * MB, 0);
        ledger.set_official(false);
        assert_eq!(ledger.state().accumulated_unsynced_bytes, 0);
    }

    #[tokio::test]
    async fn test_shared_ledger_access() {
        let shared = UsageLedger::new(day(1), true).into_shared();
        {
            let mut ledger = shared.write().await;
            ledger.observe_byte_delta(MB, 0);
        }
        assert_eq!(shared.read().await.state().accumulated_unsynced_bytes, MB);
    }
}
