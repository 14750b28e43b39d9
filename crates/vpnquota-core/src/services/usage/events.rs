//! Usage events and tunnel control
//!
//! The core never talks to a UI or a tunnel directly. It emits
//! [`UsageEvent`]s to an [`EventSink`] and asks a [`TunnelControl`] to stop.

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::mpsc;

use super::types::StopReason;

// ============================================================================
// Events
// ============================================================================

/// Something the user should be told about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsageEvent {
    /// Threshold warning (80) or pre-disconnect warning (95)
    UsageWarning { percent: u8, used_mb: u64, limit_mb: u64 },
    /// Daily limit reached; shown at most once per day
    LimitReachedAlert { used_mb: u64, limit_mb: u64 },
    /// Device date changed while the tunnel was running
    DailyReset { date: NaiveDate },
    /// The server reset its counters before the device saw a new day
    ServerReset,
}

impl UsageEvent {
    /// Short human-readable message
    pub fn message(&self) -> String {
        match self {
            UsageEvent::UsageWarning { percent, used_mb, limit_mb } => format!(
                "You have used {}% of your daily data ({} / {} MB)",
                percent, used_mb, limit_mb
            ),
            UsageEvent::LimitReachedAlert { used_mb, limit_mb } => format!(
                "Daily data limit reached ({} / {} MB). Watch ads or exchange coins for more.",
                used_mb, limit_mb
            ),
            UsageEvent::DailyReset { date } => {
                format!("Daily quota reset for {}. Please reconnect.", date)
            }
            UsageEvent::ServerReset => {
                "Daily quota was reset by the server. Please reconnect.".to_string()
            }
        }
    }
}

// ============================================================================
// Event Sinks
// ============================================================================

/// Receiver of usage events (notifications, dialogs, tests)
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UsageEvent);
}

/// Sink that only logs
#[derive(Debug, Default, Clone)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: UsageEvent) {
        log::info!("[usage:event] {}", event.message());
    }
}

/// Sink that forwards events to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<UsageEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UsageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: UsageEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("[usage:event] Event receiver dropped");
        }
    }
}

// ============================================================================
// Tunnel Control
// ============================================================================

/// The one capability the core needs from the tunnel implementation
pub trait TunnelControl: Send + Sync {
    fn stop_tunnel(&self, reason: StopReason);
}

/// Tunnel control that forwards stop requests to a channel
#[derive(Debug, Clone)]
pub struct ChannelTunnelControl {
    tx: mpsc::UnboundedSender<StopReason>,
}

impl ChannelTunnelControl {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StopReason>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TunnelControl for ChannelTunnelControl {
    fn stop_tunnel(&self, reason: StopReason) {
        log::info!("[usage:tunnel] Stop requested: {}", reason);
        if self.tx.send(reason).is_err() {
            log::debug!("[usage:tunnel] Stop receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_messages() {
        let warning = UsageEvent::UsageWarning { percent: 80, used_mb: 800, limit_mb: 1000 };
        assert!(warning.message().contains("80%"));

        let alert = UsageEvent::LimitReachedAlert { used_mb: 1000, limit_mb: 1000 };
        assert!(alert.message().contains("limit reached"));

        let reset = UsageEvent::DailyReset {
            date: NaiveDate::from_ymd_opt(2026, 5, 2).unwrap(),
        };
        assert!(reset.message().contains("2026-05-02"));
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(UsageEvent::ServerReset).unwrap();
        assert_eq!(json["kind"], "server_reset");
    }

    #[tokio::test]
    async fn test_channel_event_sink() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.emit(UsageEvent::ServerReset);
        assert_eq!(rx.recv().await, Some(UsageEvent::ServerReset));
    }

    #[tokio::test]
    async fn test_channel_tunnel_control() {
        let (tunnel, mut rx) = ChannelTunnelControl::new();
        tunnel.stop_tunnel(StopReason::LimitReached);
        assert_eq!(rx.recv().await, Some(StopReason::LimitReached));
    }

    #[test]
    fn test_sinks_tolerate_dropped_receivers() {
        let (sink, rx) = ChannelEventSink::new();
        drop(rx);
        sink.emit(UsageEvent::ServerReset);

        let (tunnel, rx) = ChannelTunnelControl::new();
        drop(rx);
        tunnel.stop_tunnel(StopReason::DailyRollover);
    }
}
