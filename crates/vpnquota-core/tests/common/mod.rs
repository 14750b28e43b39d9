//! Shared fakes for the usage integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use vpnquota_core::db::Database;
use vpnquota_core::services::usage::{
    ActionType, ByteCounterSource, ByteCounters, ChannelEventSink, ChannelTunnelControl,
    EnforcerConfig, FixedClock, KvUsageStateStore, RemoteUsageClient, SchedulerConfig,
    ServerUsage, SqliteKvStore, StopReason, SyncHistoryStore, SyncRequest, SyncScheduler,
    UsageClientError, UsageContext, UsageEvent, UsageStateStore, BYTES_PER_MB,
};

pub const MB: u64 = BYTES_PER_MB;

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
}

// ============================================================================
// Fake accounting server
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Network,
    Api,
}

#[derive(Debug)]
pub struct ServerState {
    pub used_mb: u64,
    pub limit_mb: u64,
    pub coins: u64,
    pub ads_watched: u32,
    pub daily_claimed: bool,
    pub blocked: bool,
    pub failure: Option<Failure>,
    pub delay: Duration,
    pub requests: Vec<SyncRequest>,
}

pub struct FakeServer {
    pub state: Mutex<ServerState>,
}

impl FakeServer {
    pub fn new(used_mb: u64, limit_mb: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState {
                used_mb,
                limit_mb,
                coins: 0,
                ads_watched: 0,
                daily_claimed: false,
                blocked: false,
                failure: None,
                delay: Duration::ZERO,
                requests: Vec::new(),
            }),
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.with(|s| s.requests.clone())
    }

    /// Sum of add_mb over plain sync requests
    pub fn reported_mb(&self) -> u64 {
        self.with(|s| {
            s.requests
                .iter()
                .filter(|r| r.action_type == ActionType::Sync)
                .map(|r| r.add_mb)
                .sum()
        })
    }

    fn usage(s: &ServerState, last_login: &str) -> ServerUsage {
        ServerUsage {
            used_mb: s.used_mb,
            display_used_mb: s.used_mb,
            extra_mb: 0,
            coins_extra_mb: 0,
            ads_extra_mb: 0,
            total_limit_mb: s.limit_mb,
            ads_watched: s.ads_watched,
            daily_claimed: s.daily_claimed,
            blocked: s.blocked,
            coins: s.coins,
            last_login_date: last_login.to_string(),
        }
    }
}

#[async_trait]
impl RemoteUsageClient for FakeServer {
    async fn sync(&self, request: &SyncRequest) -> Result<ServerUsage, UsageClientError> {
        let delay = self.with(|s| s.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.with(|s| {
            s.requests.push(request.clone());
            match s.failure {
                Some(Failure::Network) => return Err(UsageClientError::ConnectFailed),
                Some(Failure::Api) => return Err(UsageClientError::ApiError("HTTP 500".into())),
                None => {}
            }

            match request.action_type {
                ActionType::Sync => s.used_mb += request.add_mb,
                ActionType::AdWatch => {
                    s.limit_mb += request.add_mb;
                    s.ads_watched += 1;
                }
                ActionType::DailyClaim => {
                    s.coins += 20;
                    s.daily_claimed = true;
                }
                ActionType::Exchange => {
                    s.coins -= request.cost;
                    s.limit_mb += request.exchange_mb;
                }
            }
            Ok(Self::usage(s, &request.last_login))
        })
    }
}

// ============================================================================
// Fake counters
// ============================================================================

#[derive(Default)]
pub struct FakeCounter {
    counters: Mutex<ByteCounters>,
}

impl FakeCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, bytes: u64) {
        self.counters.lock().unwrap().rx += bytes;
    }

    /// Simulate an interface reset
    pub fn reset(&self) {
        *self.counters.lock().unwrap() = ByteCounters::default();
    }
}

impl ByteCounterSource for FakeCounter {
    fn read(&self) -> Option<ByteCounters> {
        Some(*self.counters.lock().unwrap())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub scheduler: SyncScheduler,
    pub server: Arc<FakeServer>,
    pub counter: Arc<FakeCounter>,
    pub clock: FixedClock,
    pub store: Arc<KvUsageStateStore>,
    pub history: SyncHistoryStore,
    pub events: UnboundedReceiver<UsageEvent>,
    pub stops: UnboundedReceiver<StopReason>,
    pub db: Database,
    _dir: TempDir,
}

/// Config whose loops never tick on their own; tests drive ticks directly
pub fn manual_config() -> SchedulerConfig {
    SchedulerConfig {
        ledger_interval: Duration::from_secs(3600),
        refresh_interval: Duration::from_secs(3600),
        disconnect_sync_timeout: Duration::from_millis(300),
        enforcer: EnforcerConfig::default(),
    }
}

/// Config with fast loops for end-to-end runs
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        ledger_interval: Duration::from_millis(20),
        refresh_interval: Duration::from_millis(30),
        ..manual_config()
    }
}

impl Harness {
    pub async fn new(server: Arc<FakeServer>, config: SchedulerConfig) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::open(dir.path().join("usage.db"))
            .await
            .expect("database");

        let store = Arc::new(KvUsageStateStore::new(Arc::new(SqliteKvStore::new(
            db.pool.clone(),
        ))));
        let history = SyncHistoryStore::new(db.pool.clone());
        let counter = FakeCounter::new();
        let clock = FixedClock::new(day(1));
        let (events_sink, events) = ChannelEventSink::new();
        let (tunnel, stops) = ChannelTunnelControl::new();

        let ctx = UsageContext {
            device_id: "test-device".to_string(),
            client: server.clone(),
            store: store.clone(),
            history: Some(history.clone()),
            events: Arc::new(events_sink),
            tunnel: Arc::new(tunnel),
            counters: counter.clone(),
            clock: Arc::new(clock.clone()),
        };

        Self {
            scheduler: SyncScheduler::new(ctx, config),
            server,
            counter,
            clock,
            store,
            history,
            events,
            stops,
            db,
            _dir: dir,
        }
    }

    pub fn drain_events(&mut self) -> Vec<UsageEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn drain_stops(&mut self) -> Vec<StopReason> {
        let mut out = Vec::new();
        while let Ok(reason) = self.stops.try_recv() {
            out.push(reason);
        }
        out
    }

    pub async fn persisted(&self) -> vpnquota_core::UsageState {
        self.store
            .load(self.clock_today(), true)
            .await
            .expect("load state")
    }

    fn clock_today(&self) -> NaiveDate {
        use vpnquota_core::services::usage::Clock;
        self.clock.today()
    }
}
