//! Usage accounting and quota enforcement
//!
//! Meters a daily data quota for a tunnel against a remote accounting server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ ByteCounterSource│───►│ UsageLedger  │───►│ QuotaEnforcer│
//! │ (/proc/net/dev)  │    │ (local state)│    │ 80/95/100 %  │
//! └──────────────────┘    └──────────────┘    └──────────────┘
//!                            ▲        │               │
//!               reconcile    │        │ PendingSync   │ events / stop
//!                            │        ▼               ▼
//!                     ┌──────────────────┐    ┌──────────────┐
//!                     │ RemoteUsageClient│    │ EventSink    │
//!                     │ POST /usage/ping │    │ TunnelControl│
//!                     └──────────────────┘    └──────────────┘
//! ```
//!
//! [`SyncScheduler`] runs the loops, [`TunnelSession`] owns one ledger per
//! tunnel, [`RewardsService`] performs reward actions, and
//! [`UsageStateStore`] is the only place state is persisted.
//!
//! # Usage
//!
//! ```ignore
//! use vpnquota_core::services::usage::*;
//!
//! let scheduler = SyncScheduler::new(ctx, SchedulerConfig::default());
//! let refresh = scheduler.spawn_refresh_loop(cancel.clone());
//!
//! TunnelSession::preflight(ctx.client.as_ref(), &request).await?;
//! let mut session = TunnelSession::start(&scheduler, true).await;
//! let reason = session.wait().await;
//! let final_state = session.stop().await;
//! ```

pub mod client;
pub mod clock;
pub mod counter;
pub mod device;
pub mod enforcer;
pub mod events;
pub mod history;
pub mod ledger;
pub mod rewards;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod types;

pub use client::{HttpUsageClient, RemoteUsageClient, UsageClientError};
pub use clock::{Clock, FixedClock, SystemClock};
pub use counter::{ByteCounterSource, ByteCounters, CounterSampler, ProcNetDevCounter};
pub use device::device_id;
pub use enforcer::{EnforcerConfig, Enforcement, QuotaEnforcer};
pub use events::{
    ChannelEventSink, ChannelTunnelControl, EventSink, LogEventSink, TunnelControl, UsageEvent,
};
pub use history::{SyncHistoryStore, SyncRecord};
pub use ledger::{PendingSync, ReconcileOutcome, SharedLedger, SyncApplied, UsageLedger};
pub use rewards::{ExchangeOption, RewardError, RewardsService, EXCHANGE_OPTIONS};
pub use scheduler::{
    ActiveLedger, LedgerLoopExit, SchedulerConfig, SyncScheduler, TickOutcome, UsageContext,
};
pub use session::{SessionError, TunnelSession};
pub use store::{
    KeyValueStore, KvUsageStateStore, MemoryKvStore, SqliteKvStore, UsageStateStore,
};
pub use types::{
    ActionType, RolloverResult, ServerUsage, StopReason, SyncRequest, ThresholdFlags,
    UsageState, BYTES_PER_MB, DEFAULT_TOTAL_LIMIT_MB,
};
