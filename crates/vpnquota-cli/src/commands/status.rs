//! Status command
//!
//! Shows the usage state as it was last persisted.

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use vpnquota_core::services::usage::{Clock, SystemClock, UsageStateStore};
use vpnquota_core::utils::format_date;
use vpnquota_core::UsageState;

use crate::output::{print_info, print_single};
use super::Context;

/// Usage state row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct StatusRow {
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "Used (MB)")]
    pub used_mb: u64,
    #[tabled(rename = "Limit (MB)")]
    pub total_limit_mb: u64,
    #[tabled(rename = "Used")]
    pub used_percent: String,
    #[tabled(rename = "Remaining (MB)")]
    pub remaining_mb: u64,
    #[tabled(rename = "80% Warned")]
    pub warning_80_shown: bool,
    #[tabled(rename = "95% Cut")]
    pub disconnected_95: bool,
    #[tabled(rename = "100% Cut")]
    pub disconnected_100: bool,
}

impl From<&UsageState> for StatusRow {
    fn from(state: &UsageState) -> Self {
        Self {
            date: format_date(state.last_synced_date),
            used_mb: state.used_mb,
            total_limit_mb: state.total_limit_mb,
            used_percent: format!("{:.1}%", state.used_percent()),
            remaining_mb: state.remaining_mb(),
            warning_80_shown: state.flags.warning_80_shown,
            disconnected_95: state.flags.disconnected_95,
            disconnected_100: state.flags.disconnected_100,
        }
    }
}

pub async fn execute(ctx: &Context) -> Result<()> {
    let today = SystemClock.today();
    let state = ctx.state_store().load(today, true).await?;

    print_single(&StatusRow::from(&state), ctx.format)?;

    if state.last_synced_date < today {
        print_info(
            "Counters are from an earlier day and reset when the next session starts.",
            ctx.quiet,
        );
    }
    Ok(())
}
