//! Sync command
//!
//! One accounting round trip with nothing to report, which is how the
//! refresh loop learns about limit changes made elsewhere.

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use vpnquota_core::services::usage::{Clock, SyncRecord, SystemClock};
use vpnquota_core::{RemoteUsageClient, ServerUsage, SyncRequest};

use crate::output::print_single;
use super::Context;

/// Server answer row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct UsageRow {
    #[tabled(rename = "Used (MB)")]
    pub used_mb: u64,
    #[tabled(rename = "Limit (MB)")]
    pub total_limit_mb: u64,
    #[tabled(rename = "Extra (MB)")]
    pub extra_mb: u64,
    #[tabled(rename = "Ads")]
    pub ads_watched: u32,
    #[tabled(rename = "Claimed")]
    pub daily_claimed: bool,
    #[tabled(rename = "Coins")]
    pub coins: u64,
    #[tabled(rename = "Blocked")]
    pub blocked: bool,
}

impl From<&ServerUsage> for UsageRow {
    fn from(usage: &ServerUsage) -> Self {
        Self {
            used_mb: usage.display_used_mb,
            total_limit_mb: usage.total_limit_mb,
            extra_mb: usage.extra_mb,
            ads_watched: usage.ads_watched,
            daily_claimed: usage.daily_claimed,
            coins: usage.coins,
            blocked: usage.blocked,
        }
    }
}

pub async fn execute(ctx: &Context) -> Result<()> {
    let client = ctx.client()?;
    let request = SyncRequest::usage(ctx.device_id().await?, 0, SystemClock.today());

    let result = client.sync(&request).await;

    let record = SyncRecord::from_outcome(&request, result.as_ref());
    if let Err(e) = ctx.history().save(&record).await {
        log::warn!("[cli] Failed to record history: {}", e);
    }

    let usage = result?;
    print_single(&UsageRow::from(&usage), ctx.format)?;
    Ok(())
}
