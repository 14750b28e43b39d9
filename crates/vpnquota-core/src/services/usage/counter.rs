//! Byte counter sampling
//!
//! A [`ByteCounterSource`] exposes cumulative device-wide rx/tx counters.
//! [`CounterSampler`] turns successive readings into deltas and survives
//! counter resets.

use std::path::{Path, PathBuf};

/// Cumulative counter reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteCounters {
    pub rx: u64,
    pub tx: u64,
}

/// Source of cumulative byte counters
///
/// Returns `None` when counters are unavailable on this platform or right now.
pub trait ByteCounterSource: Send + Sync {
    fn read(&self) -> Option<ByteCounters>;
}

// ============================================================================
// Sampler
// ============================================================================

/// Converts cumulative readings into per-tick deltas
#[derive(Debug, Default)]
pub struct CounterSampler {
    baseline: Option<ByteCounters>,
}

impl CounterSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reading and return the `(rx, tx)` delta since the previous one.
    ///
    /// The first reading only sets the baseline. A counter that went backwards
    /// yields 0 for that direction and becomes the new baseline. An unavailable
    /// source yields `(0, 0)` and keeps the old baseline.
    pub fn sample(&mut self, source: &dyn ByteCounterSource) -> (u64, u64) {
        let Some(current) = source.read() else {
            return (0, 0);
        };

        let delta = match self.baseline {
            Some(prev) => {
                if current.rx < prev.rx || current.tx < prev.tx {
                    log::debug!(
                        "[usage:counter] Counter regression ({:?} -> {:?}), rebasing",
                        prev,
                        current
                    );
                }
                (
                    current.rx.saturating_sub(prev.rx),
                    current.tx.saturating_sub(prev.tx),
                )
            }
            None => (0, 0),
        };

        self.baseline = Some(current);
        delta
    }
}

// ============================================================================
// /proc/net/dev
// ============================================================================

/// Linux counter source reading `/proc/net/dev`, loopback excluded
#[derive(Debug, Clone)]
pub struct ProcNetDevCounter {
    path: PathBuf,
}

impl Default for ProcNetDevCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcNetDevCounter {
    pub fn new() -> Self {
        Self::with_path("/proc/net/dev")
    }

    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ByteCounterSource for ProcNetDevCounter {
    fn read(&self) -> Option<ByteCounters> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => parse_proc_net_dev(&content),
            Err(e) => {
                log::debug!("[usage:counter] Cannot read {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

/// Sum rx/tx bytes over all non-loopback interfaces
pub fn parse_proc_net_dev(content: &str) -> Option<ByteCounters> {
    let mut total = ByteCounters::default();
    let mut seen = false;

    for line in content.lines() {
        let Some((iface, stats)) = line.split_once(':') else {
            continue;
        };
        let iface = iface.trim();
        if iface.is_empty() || iface == "lo" {
            continue;
        }

        let fields: Vec<u64> = stats
            .split_whitespace()
            .filter_map(|f| f.parse().ok())
            .collect();
        // rx_bytes is field 0, tx_bytes is field 8
        if fields.len() < 9 {
            continue;
        }

        total.rx = total.rx.saturating_add(fields[0]);
        total.tx = total.tx.saturating_add(fields[8]);
        seen = true;
    }

    seen.then_some(total)
}
