//! Reward commands
//!
//! Rewarded ads, the daily coin claim and coin-for-data exchanges.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use vpnquota_core::services::usage::{ExchangeOption, RewardError, EXCHANGE_OPTIONS};
use vpnquota_core::RewardsService;

use crate::output::{print_output, print_single, print_success};
use super::sync::UsageRow;
use super::Context;

#[derive(Subcommand)]
pub enum RewardAction {
    /// Record a finished rewarded ad (+150 MB, 4 per day)
    Ad,

    /// Claim the daily coin bonus
    Claim,

    /// Spend coins on extra data
    Exchange {
        /// MB to buy; one of the listed options
        mb: u64,
    },

    /// List exchange options
    Options,
}

#[derive(Debug, Serialize, Tabled)]
pub struct OptionRow {
    #[tabled(rename = "MB")]
    pub mb: u64,
    #[tabled(rename = "Coins")]
    pub cost: u64,
}

pub async fn execute(ctx: &Context, action: RewardAction) -> Result<()> {
    match action {
        RewardAction::Options => list_options(ctx),
        RewardAction::Exchange { mb } => {
            let option = ExchangeOption::for_mb(mb).ok_or(RewardError::UnknownExchange(mb))?;
            let rewards = rewards(ctx).await?;
            let usage = rewards.exchange(option).await?;
            let message = format!("Exchanged {} coins for {} MB", option.cost, option.mb);
            finish(ctx, usage, &message)
        }
        RewardAction::Ad => {
            let rewards = rewards(ctx).await?;
            finish(ctx, rewards.watch_ad().await?, "Ad reward granted")
        }
        RewardAction::Claim => {
            let rewards = rewards(ctx).await?;
            finish(ctx, rewards.claim_daily().await?, "Daily reward claimed")
        }
    }
}

async fn rewards(ctx: &Context) -> Result<RewardsService> {
    Ok(RewardsService::new(ctx.detached_scheduler().await?))
}

fn finish(ctx: &Context, usage: vpnquota_core::ServerUsage, message: &str) -> Result<()> {
    print_success(message, ctx.quiet);
    print_single(&UsageRow::from(&usage), ctx.format)
}

fn list_options(ctx: &Context) -> Result<()> {
    let rows: Vec<OptionRow> = EXCHANGE_OPTIONS
        .iter()
        .map(|o| OptionRow { mb: o.mb, cost: o.cost })
        .collect();
    print_output(&rows, ctx.format)
}
