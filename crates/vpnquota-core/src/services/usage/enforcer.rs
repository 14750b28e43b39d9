//! Quota enforcer
//!
//! Maps the ledger's projection to at most one action per tick. Thresholds
//! are evaluated top-down and each fires at most once per day.
//!
//! | Projection          | Action                                            |
//! |---------------------|---------------------------------------------------|
//! | >= limit            | alert (once), stop tunnel (every time)            |
//! | >= disconnect %     | warn + stop once; later ticks ride on to 100%     |
//! | >= warning %        | warn once                                         |
//! | below               | nothing                                           |

use serde::{Deserialize, Serialize};

use super::events::UsageEvent;
use super::types::{StopReason, ThresholdFlags, UsageState};
use crate::config::{AppConfig, DEFAULT_DISCONNECT_THRESHOLD, DEFAULT_WARNING_THRESHOLD};

// ============================================================================
// Configuration
// ============================================================================

/// Threshold percentages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcerConfig {
    /// One-per-day warning (0-100)
    pub warning_threshold: u8,
    /// First forced disconnect of the day (warning..=100)
    pub disconnect_threshold: u8,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            disconnect_threshold: DEFAULT_DISCONNECT_THRESHOLD,
        }
    }
}

impl EnforcerConfig {
    /// Validate and normalize the configuration
    pub fn validate(&self) -> Self {
        let warning = self.warning_threshold.min(100);
        Self {
            warning_threshold: warning,
            disconnect_threshold: self.disconnect_threshold.clamp(warning, 100),
        }
    }
}

impl From<&AppConfig> for EnforcerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            warning_threshold: config.warning_threshold,
            disconnect_threshold: config.disconnect_threshold,
        }
        .validate()
    }
}

// ============================================================================
// Enforcement
// ============================================================================

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enforcement {
    /// Event to show, if any
    pub event: Option<UsageEvent>,
    /// Stop request, if any
    pub stop: Option<StopReason>,
    /// Flags to store after this tick
    pub flags: ThresholdFlags,
}

impl Enforcement {
    fn idle(flags: ThresholdFlags) -> Self {
        Self {
            event: None,
            stop: None,
            flags,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuotaEnforcer {
    config: EnforcerConfig,
}

impl QuotaEnforcer {
    pub fn new(config: EnforcerConfig) -> Self {
        Self {
            config: config.validate(),
        }
    }

    pub fn config(&self) -> &EnforcerConfig {
        &self.config
    }

    /// Evaluate `projected_mb` against the state's limit and flags
    pub fn evaluate(&self, state: &UsageState, projected_mb: u64) -> Enforcement {
        let mut flags = state.flags;
        let limit = state.total_limit_mb;

        if !state.is_official_server || limit == 0 {
            return Enforcement::idle(flags);
        }

        if projected_mb >= limit {
            let event = (!flags.disconnected_100).then_some(UsageEvent::LimitReachedAlert {
                used_mb: projected_mb,
                limit_mb: limit,
            });
            flags.disconnected_100 = true;
            return Enforcement {
                event,
                stop: Some(StopReason::LimitReached),
                flags,
            };
        }

        if reached(projected_mb, limit, self.config.disconnect_threshold) {
            if flags.disconnected_95 {
                return Enforcement::idle(flags);
            }
            flags.disconnected_95 = true;
            flags.warning_80_shown = true;
            return Enforcement {
                event: Some(UsageEvent::UsageWarning {
                    percent: self.config.disconnect_threshold,
                    used_mb: projected_mb,
                    limit_mb: limit,
                }),
                stop: Some(StopReason::DisconnectThreshold),
                flags,
            };
        }

        if reached(projected_mb, limit, self.config.warning_threshold) {
            if flags.warning_80_shown {
                return Enforcement::idle(flags);
            }
            flags.warning_80_shown = true;
            return Enforcement {
                event: Some(UsageEvent::UsageWarning {
                    percent: self.config.warning_threshold,
                    used_mb: projected_mb,
                    limit_mb: limit,
                }),
                stop: None,
                flags,
            };
        }

        Enforcement::idle(flags)
    }
}

/// `used / limit >= percent / 100` without floating point
fn reached(used: u64, limit: u64, percent: u8) -> bool {
    (used as u128) * 100 >= (limit as u128) * (percent as u128)
}
