//! History command
//!
//! Lists recorded accounting round trips, newest first.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use vpnquota_core::services::usage::SyncRecord;

use crate::output::{or_dash, print_output, print_success};
use super::Context;

#[derive(Args)]
pub struct HistoryArgs {
    /// Number of entries to show
    #[arg(long, short, default_value = "20")]
    limit: u32,

    /// Delete entries older than this many days before listing
    #[arg(long)]
    prune: Option<u32>,
}

/// History row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct HistoryRow {
    #[tabled(rename = "Time")]
    pub created_at: String,
    #[tabled(rename = "Action")]
    pub action: String,
    #[tabled(rename = "Add (MB)")]
    pub add_mb: i64,
    #[tabled(rename = "Exchange")]
    pub exchange: String,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "Used (MB)")]
    pub used_mb: String,
    #[tabled(rename = "Limit (MB)")]
    pub total_limit_mb: String,
}

impl From<SyncRecord> for HistoryRow {
    fn from(r: SyncRecord) -> Self {
        let exchange = if r.exchange_mb > 0 {
            format!("{} MB / {} coins", r.exchange_mb, r.cost)
        } else {
            "-".to_string()
        };
        let result = if r.success {
            "ok".to_string()
        } else {
            r.error_message.unwrap_or_else(|| "failed".to_string())
        };
        Self {
            created_at: r.created_at,
            action: r.action_type,
            add_mb: r.add_mb,
            exchange,
            result,
            used_mb: or_dash(r.used_mb),
            total_limit_mb: or_dash(r.total_limit_mb),
        }
    }
}

pub async fn execute(ctx: &Context, args: HistoryArgs) -> Result<()> {
    let history = ctx.history();

    if let Some(days) = args.prune {
        let removed = history.cleanup(days).await?;
        print_success(&format!("Removed {} entries older than {} days", removed, days), ctx.quiet);
    }

    let rows: Vec<HistoryRow> = history
        .recent(args.limit)
        .await?
        .into_iter()
        .map(HistoryRow::from)
        .collect();
    print_output(&rows, ctx.format)
}
