//! Config commands
//!
//! Shows the effective configuration after file, environment and flag layers.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use vpnquota_core::config::config_file_path;

use crate::output::print_output;
use super::Context;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
}

/// Config row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl ConfigRow {
    fn new(key: &str, value: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

pub async fn execute(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(ctx),
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    let c = &ctx.config;
    let file = config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "-".to_string());
    let db = c
        .resolved_db_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "-".to_string());

    let rows = vec![
        ConfigRow::new("config_file", file),
        ConfigRow::new("db_path", db),
        ConfigRow::new("base_url", if c.base_url.is_empty() { "(not set)" } else { c.base_url.as_str() }),
        ConfigRow::new("api_key", mask(&c.api_key)),
        ConfigRow::new("ledger_interval_secs", c.ledger_interval_secs),
        ConfigRow::new("refresh_interval_secs", c.refresh_interval_secs),
        ConfigRow::new("disconnect_sync_timeout_secs", c.disconnect_sync_timeout_secs),
        ConfigRow::new("connect_timeout_secs", c.connect_timeout_secs),
        ConfigRow::new("request_timeout_secs", c.request_timeout_secs),
        ConfigRow::new("warning_threshold", c.warning_threshold),
        ConfigRow::new("disconnect_threshold", c.disconnect_threshold),
    ];
    print_output(&rows, ctx.format)
}

fn mask(key: &str) -> String {
    match key.chars().count() {
        0 => "(not set)".to_string(),
        n if n <= 4 => "****".to_string(),
        _ => {
            let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("****{}", tail)
        }
    }
}
