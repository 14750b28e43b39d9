//! Reward actions
//!
//! Ad watching, the daily claim and coin exchanges. Each action is one
//! accounting call; the answer is published and reconciled into the active
//! ledger, so a top-up lifts the day's disconnect flags right away.

use serde::Serialize;
use thiserror::Error;

use super::client::UsageClientError;
use super::scheduler::SyncScheduler;
use super::types::{ActionType, ServerUsage, SyncRequest};
use crate::utils::format_date;

/// MB granted per rewarded ad
pub const AD_REWARD_MB: u64 = 150;

/// Rewarded ads allowed per day
pub const MAX_ADS_PER_DAY: u32 = 4;

/// Coins granted by the daily claim
pub const DAILY_CLAIM_COINS: u64 = 20;

// ============================================================================
// Exchange Options
// ============================================================================

/// A coin-for-data offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExchangeOption {
    pub mb: u64,
    pub cost: u64,
}

pub const EXCHANGE_OPTIONS: [ExchangeOption; 4] = [
    ExchangeOption { mb: 450, cost: 60 },
    ExchangeOption { mb: 1050, cost: 100 },
    ExchangeOption { mb: 1650, cost: 160 },
    ExchangeOption { mb: 2350, cost: 200 },
];

impl ExchangeOption {
    /// Look up the offer granting `mb`
    pub fn for_mb(mb: u64) -> Option<Self> {
        EXCHANGE_OPTIONS.iter().copied().find(|o| o.mb == mb)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum RewardError {
    #[error("Daily ad limit reached ({0} of {MAX_ADS_PER_DAY})")]
    AdLimitReached(u32),

    #[error("Daily reward already claimed")]
    AlreadyClaimed,

    #[error("Not enough coins: have {have}, need {need}")]
    InsufficientCoins { have: u64, need: u64 },

    #[error("No exchange option for {0} MB")]
    UnknownExchange(u64),

    #[error("Account is blocked")]
    Blocked,

    #[error("Server did not answer")]
    Unavailable,

    #[error(transparent)]
    Client(#[from] UsageClientError),
}

// ============================================================================
// RewardsService
// ============================================================================

pub struct RewardsService {
    scheduler: SyncScheduler,
}

impl RewardsService {
    pub fn new(scheduler: SyncScheduler) -> Self {
        Self { scheduler }
    }

    /// Current server view, fetching one when none has been seen today
    async fn current(&self) -> Result<ServerUsage, RewardError> {
        let today = format_date(self.scheduler.context().clock.today());
        if let Some(usage) = self.scheduler.latest_usage() {
            if usage.last_login_date == today {
                return Ok(usage);
            }
            log::debug!(
                "[usage:rewards] Cached answer is from {}, refreshing",
                usage.last_login_date
            );
        }
        self.scheduler
            .refresh_once()
            .await
            .ok_or(RewardError::Unavailable)
    }

    async fn perform(&self, request: SyncRequest) -> Result<ServerUsage, RewardError> {
        let ctx = self.scheduler.context();
        let usage = ctx.client.sync(&request).await;
        ctx.record(&request, usage.as_ref()).await;

        let usage = usage?;
        self.scheduler.publish(&usage).await;
        log::info!(
            "[usage:rewards] {} done: limit {} MB, coins {}",
            request.action_type,
            usage.total_limit_mb,
            usage.coins
        );
        Ok(usage)
    }

    fn request(&self, action: ActionType) -> SyncRequest {
        let ctx = self.scheduler.context();
        SyncRequest::action(&ctx.device_id, action, ctx.clock.today())
    }

    /// Grant [`AD_REWARD_MB`] after a finished ad
    pub async fn watch_ad(&self) -> Result<ServerUsage, RewardError> {
        let current = self.current().await?;
        if current.blocked {
            return Err(RewardError::Blocked);
        }
        if current.ads_watched >= MAX_ADS_PER_DAY {
            return Err(RewardError::AdLimitReached(current.ads_watched));
        }
        self.perform(self.request(ActionType::AdWatch).with_add_mb(AD_REWARD_MB))
            .await
    }

    /// Claim the daily coin bonus
    pub async fn claim_daily(&self) -> Result<ServerUsage, RewardError> {
        let current = self.current().await?;
        if current.blocked {
            return Err(RewardError::Blocked);
        }
        if current.daily_claimed {
            return Err(RewardError::AlreadyClaimed);
        }
        self.perform(self.request(ActionType::DailyClaim)).await
    }

    /// Spend coins on extra data
    pub async fn exchange(&self, option: ExchangeOption) -> Result<ServerUsage, RewardError> {
        if !EXCHANGE_OPTIONS.contains(&option) {
            return Err(RewardError::UnknownExchange(option.mb));
        }
        let current = self.current().await?;
        if current.blocked {
            return Err(RewardError::Blocked);
        }
        if current.coins < option.cost {
            return Err(RewardError::InsufficientCoins {
                have: current.coins,
                need: option.cost,
            });
        }
        self.perform(
            self.request(ActionType::Exchange)
                .with_exchange(option.mb, option.cost),
        )
        .await
    }
}
