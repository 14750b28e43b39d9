//! Usage accounting types
//!
//! Types shared by the ledger, the enforcer, the scheduler and the
//! accounting client.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::utils::format_date;

// ============================================================================
// Constants
// ============================================================================

/// Bytes per accounted megabyte
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Daily quota assumed until the server has told us otherwise
pub const DEFAULT_TOTAL_LIMIT_MB: u64 = 3072;

/// Local usage above this is "materially high" for server-reset detection
pub const SERVER_RESET_PREVIOUS_MIN_MB: u64 = 100;

/// Server usage below this after a high local value means the server's day rolled
pub const SERVER_RESET_REPORTED_MAX_MB: u64 = 10;

// ============================================================================
// Threshold Flags
// ============================================================================

/// Once-per-day threshold flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdFlags {
    /// The 80% warning was shown today
    pub warning_80_shown: bool,
    /// The tunnel was force-disconnected at 95% today
    pub disconnected_95: bool,
    /// The tunnel was force-disconnected at 100% today
    pub disconnected_100: bool,
}

impl ThresholdFlags {
    /// Reset all flags (day rollover)
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Clear the disconnect flags (quota top-up re-enables reconnection)
    pub fn clear_disconnects(&mut self) {
        self.disconnected_95 = false;
        self.disconnected_100 = false;
    }
}

// ============================================================================
// Usage State
// ============================================================================

/// The ledger's snapshot of today's quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageState {
    /// Daily quota ceiling, last value received from the server (or the default)
    pub total_limit_mb: u64,
    /// Quota consumed today as last reconciled with the server
    pub used_mb: u64,
    /// Bytes measured since the last successful sync (process lifetime only)
    #[serde(skip)]
    pub accumulated_unsynced_bytes: u64,
    /// Day for which `used_mb` and `total_limit_mb` are valid
    pub last_synced_date: NaiveDate,
    /// Once-per-day threshold flags
    pub flags: ThresholdFlags,
    /// Whether quota enforcement applies at all
    pub is_official_server: bool,
}

impl UsageState {
    /// Fresh state for `today` with the default limit
    pub fn new(today: NaiveDate, is_official_server: bool) -> Self {
        Self {
            total_limit_mb: DEFAULT_TOTAL_LIMIT_MB,
            used_mb: 0,
            accumulated_unsynced_bytes: 0,
            last_synced_date: today,
            flags: ThresholdFlags::default(),
            is_official_server,
        }
    }

    /// Used percentage of the limit (0 when unlimited or no limit known)
    pub fn used_percent(&self) -> f64 {
        if !self.is_official_server || self.total_limit_mb == 0 {
            return 0.0;
        }
        self.used_mb as f64 * 100.0 / self.total_limit_mb as f64
    }

    /// Remaining quota in MB, never negative
    pub fn remaining_mb(&self) -> u64 {
        self.total_limit_mb.saturating_sub(self.used_mb)
    }
}

// ============================================================================
// Server Usage
// ============================================================================

/// Authoritative usage figures returned by the accounting server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerUsage {
    pub used_mb: u64,
    pub display_used_mb: u64,
    pub extra_mb: u64,
    pub coins_extra_mb: u64,
    pub ads_extra_mb: u64,
    pub total_limit_mb: u64,
    pub ads_watched: u32,
    pub daily_claimed: bool,
    pub blocked: bool,
    pub coins: u64,
    pub last_login_date: String,
}

/// Wire shape of the accounting response; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ServerUsageWire {
    used_mb: Option<i64>,
    display_used_mb: Option<i64>,
    coins: Option<i64>,
    extra_mb: Option<i64>,
    coins_extra_mb: Option<i64>,
    ads_extra_mb: Option<i64>,
    total_limit_mb: Option<i64>,
    ads_watched: Option<i64>,
    daily_claimed: Option<i64>,
    blocked: Option<i64>,
    last_login_date: Option<String>,
}

fn non_negative(value: Option<i64>) -> u64 {
    value.unwrap_or(0).max(0) as u64
}

impl ServerUsageWire {
    /// Apply the wire defaults and clamp negatives
    pub(crate) fn into_usage(self, today: NaiveDate) -> ServerUsage {
        let used_mb = non_negative(self.used_mb);
        ServerUsage {
            used_mb,
            display_used_mb: self
                .display_used_mb
                .map(|v| v.max(0) as u64)
                .unwrap_or(used_mb),
            extra_mb: non_negative(self.extra_mb),
            coins_extra_mb: non_negative(self.coins_extra_mb),
            ads_extra_mb: non_negative(self.ads_extra_mb),
            total_limit_mb: self
                .total_limit_mb
                .map(|v| v.max(0) as u64)
                .unwrap_or(DEFAULT_TOTAL_LIMIT_MB),
            ads_watched: non_negative(self.ads_watched).min(u32::MAX as u64) as u32,
            daily_claimed: self.daily_claimed.unwrap_or(0) == 1,
            blocked: self.blocked.unwrap_or(0) == 1,
            coins: non_negative(self.coins),
            last_login_date: self
                .last_login_date
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format_date(today)),
        }
    }
}

impl ServerUsage {
    /// Parse an accounting response body.
    ///
    /// The whole body must decode; a malformed body yields an error and
    /// nothing from it is applied.
    pub fn from_json(body: &str, today: NaiveDate) -> Result<Self, serde_json::Error> {
        let wire: ServerUsageWire = serde_json::from_str(body)?;
        Ok(wire.into_usage(today))
    }
}

// ============================================================================
// Sync Request
// ============================================================================

/// Kind of accounting call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Periodic usage report (possibly with `add_mb = 0`)
    Sync,
    /// Rewarded ad finished
    AdWatch,
    /// Daily login bonus
    DailyClaim,
    /// Coins exchanged for data
    Exchange,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Sync => write!(f, "sync"),
            ActionType::AdWatch => write!(f, "ad_watch"),
            ActionType::DailyClaim => write!(f, "daily_claim"),
            ActionType::Exchange => write!(f, "exchange"),
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sync" => Ok(ActionType::Sync),
            "ad_watch" | "ad" => Ok(ActionType::AdWatch),
            "daily_claim" | "claim" => Ok(ActionType::DailyClaim),
            "exchange" => Ok(ActionType::Exchange),
            _ => Err(format!("Unknown action type: {}", s)),
        }
    }
}

/// Body of an accounting call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRequest {
    pub device_id: String,
    pub action_type: ActionType,
    pub add_mb: u64,
    pub exchange_mb: u64,
    pub cost: u64,
    /// Device-local date, `yyyy-MM-dd`
    pub last_login: String,
}

impl SyncRequest {
    /// Plain usage report
    pub fn usage(device_id: impl Into<String>, add_mb: u64, today: NaiveDate) -> Self {
        Self {
            device_id: device_id.into(),
            action_type: ActionType::Sync,
            add_mb,
            exchange_mb: 0,
            cost: 0,
            last_login: format_date(today),
        }
    }

    /// Request of another kind, amounts zeroed
    pub fn action(device_id: impl Into<String>, action_type: ActionType, today: NaiveDate) -> Self {
        Self {
            action_type,
            ..Self::usage(device_id, 0, today)
        }
    }

    pub fn with_add_mb(mut self, add_mb: u64) -> Self {
        self.add_mb = add_mb;
        self
    }

    pub fn with_exchange(mut self, exchange_mb: u64, cost: u64) -> Self {
        self.exchange_mb = exchange_mb;
        self.cost = cost;
        self
    }
}

// ============================================================================
// Transition Results
// ============================================================================

/// Outcome of a day-boundary check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloverResult {
    None,
    RolledOver,
}

/// Why the core asked the tunnel to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Device date changed while the tunnel was up
    DailyRollover,
    /// The server reset its counters before the device saw a new day
    ServerReset,
    /// First crossing of the disconnect threshold today
    DisconnectThreshold,
    /// Daily limit reached
    LimitReached,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::DailyRollover => write!(f, "daily rollover"),
            StopReason::ServerReset => write!(f, "server daily reset"),
            StopReason::DisconnectThreshold => write!(f, "usage threshold reached"),
            StopReason::LimitReached => write!(f, "daily limit reached"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
