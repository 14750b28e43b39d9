//! Device command

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use crate::output::print_single;
use super::Context;

#[derive(Debug, Serialize, Tabled)]
pub struct DeviceRow {
    #[tabled(rename = "Device ID")]
    pub device_id: String,
}

pub async fn execute(ctx: &Context) -> Result<()> {
    let row = DeviceRow {
        device_id: ctx.device_id().await?,
    };
    print_single(&row, ctx.format)?;
    Ok(())
}
