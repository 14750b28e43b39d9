//! Watch command
//!
//! Meters device traffic from `/proc/net/dev` as if a tunnel were running.
//! The session ends when the quota enforcer stops it or on Ctrl-C; an
//! optional `--on-stop` command tears down the real tunnel.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use vpnquota_core::create_command;
use vpnquota_core::services::usage::{
    ChannelEventSink, ChannelTunnelControl, Clock, ProcNetDevCounter, SessionError,
};
use vpnquota_core::{StopReason, SyncRequest, TunnelSession, UsageEvent};

use crate::output::{print_event, print_info, print_single, print_warning, OutputFormat};
use super::status::StatusRow;
use super::Context;

/// Environment variable carrying the stop reason to the `--on-stop` command
const ENV_STOP_REASON: &str = "VPNQUOTA_STOP_REASON";

const PRINTER_DRAIN: Duration = Duration::from_secs(1);

#[derive(Args)]
pub struct WatchArgs {
    /// Treat the server as manual: traffic is not metered
    #[arg(long)]
    manual: bool,

    /// Shell command to run when the quota stops the tunnel
    #[arg(long, value_name = "CMD")]
    on_stop: Option<String>,
}

pub async fn execute(ctx: &Context, args: WatchArgs) -> Result<()> {
    let (events, event_rx) = ChannelEventSink::new();
    let (tunnel, _stops) = ChannelTunnelControl::new();
    let scheduler = ctx
        .scheduler(
            Arc::new(events),
            Arc::new(tunnel),
            Arc::new(ProcNetDevCounter::new()),
        )
        .await?;

    let usage_ctx = scheduler.context();
    let request = SyncRequest::usage(&usage_ctx.device_id, 0, usage_ctx.clock.today());
    match TunnelSession::preflight(usage_ctx.client.as_ref(), &request).await {
        Ok(Some(usage)) => scheduler.publish(&usage).await,
        Ok(None) => print_warning("Accounting server unreachable, metering offline", ctx.quiet),
        Err(SessionError::Blocked) => anyhow::bail!("Account is blocked, refusing to connect"),
        Err(e) => return Err(e.into()),
    }

    let printer = tokio::spawn(print_events(event_rx, ctx.format, ctx.quiet));
    let cancel = CancellationToken::new();
    let refresh = scheduler.spawn_refresh_loop(cancel.clone());

    let mut session = TunnelSession::start(&scheduler, !args.manual).await;
    print_info("Metering traffic. Press Ctrl-C to stop.", ctx.quiet);

    let reason = tokio::select! {
        reason = session.wait() => reason,
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                log::warn!("[cli] Failed to listen for Ctrl-C: {}", e);
            }
            None
        }
    };

    let final_state = session.stop().await;
    cancel.cancel();
    if let Err(e) = refresh.await {
        log::warn!("[cli] Refresh loop ended abnormally: {}", e);
    }

    // Dropping the scheduler closes the event channel unless an abandoned
    // sync still holds a sender
    drop(scheduler);
    if tokio::time::timeout(PRINTER_DRAIN, printer).await.is_err() {
        log::debug!("[cli] Event printer still busy, leaving it behind");
    }

    match reason {
        Some(reason) => {
            print_warning(&format!("Tunnel stopped: {}", reason), ctx.quiet);
            if let Some(cmd) = args.on_stop {
                run_on_stop(&cmd, reason).await?;
            }
        }
        None => print_info("Stopped.", ctx.quiet),
    }

    print_single(&StatusRow::from(&final_state), ctx.format)
}

async fn print_events(mut rx: UnboundedReceiver<UsageEvent>, format: OutputFormat, quiet: bool) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = print_event(&event, format, quiet) {
            log::warn!("[cli] Failed to print event: {}", e);
        }
    }
}

async fn run_on_stop(cmd: &str, reason: StopReason) -> Result<()> {
    let mut command = shell(cmd);
    command.env(ENV_STOP_REASON, reason.to_string());
    log::info!("[cli] Running on-stop command: {}", cmd);

    let status = tokio::task::spawn_blocking(move || command.status()).await??;
    if !status.success() {
        anyhow::bail!("On-stop command failed: {}", status);
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn shell(cmd: &str) -> Command {
    let mut command = create_command("cmd");
    command.args(["/C", cmd]);
    command
}

#[cfg(not(target_os = "windows"))]
fn shell(cmd: &str) -> Command {
    let mut command = create_command("sh");
    command.args(["-c", cmd]);
    command
}
