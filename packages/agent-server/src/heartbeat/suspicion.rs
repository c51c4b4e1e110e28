//! Optional phi-accrual suspicion scoring (§4.5), layered as an
//! observability refinement over the spec's own deadline-based
//! beating/stale verdict -- `PeerTracker` (in `peer.rs`) is what actually
//! decides beating vs. stale; this module only scores *how* suspicious a
//! silence is, for dashboards and tie-breaking among equally-stale peers.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Phi-accrual tuning. `phi_threshold` has no bearing on the spec's own
/// beating/stale verdict -- that's governed purely by `timeout` (§4.5) --
/// it only marks where this score crosses into "worth surfacing".
#[derive(Debug, Clone)]
pub struct PhiAccrualConfig {
    pub phi_threshold: f64,
    pub max_sample_size: usize,
    pub min_std_dev_ms: u64,
    pub max_no_heartbeat_ms: u64,
}

impl Default for PhiAccrualConfig {
    fn default() -> Self {
        Self { phi_threshold: 8.0, max_sample_size: 200, min_std_dev_ms: 100, max_no_heartbeat_ms: 15_000 }
    }
}

struct PeerHistory {
    last_heartbeat_ms: u64,
    intervals: Vec<u64>,
}

/// Tracks heartbeat interval history per peer and scores current silence
/// against it.
pub struct SuspicionTracker {
    config: PhiAccrualConfig,
    history: RwLock<HashMap<String, PeerHistory>>,
}

impl SuspicionTracker {
    #[must_use]
    pub fn new(config: PhiAccrualConfig) -> Self {
        Self { config, history: RwLock::new(HashMap::new()) }
    }

    pub fn record_heartbeat(&self, peer: &str, timestamp_ms: u64) {
        let mut history = self.history.write();
        let max_samples = self.config.max_sample_size;
        match history.get_mut(peer) {
            Some(state) => {
                let interval = timestamp_ms.saturating_sub(state.last_heartbeat_ms);
                state.last_heartbeat_ms = timestamp_ms;
                if state.intervals.len() >= max_samples {
                    state.intervals.remove(0);
                }
                state.intervals.push(interval);
            }
            None => {
                history.insert(peer.to_string(), PeerHistory { last_heartbeat_ms: timestamp_ms, intervals: Vec::new() });
            }
        }
    }

    pub fn remove(&self, peer: &str) {
        self.history.write().remove(peer);
    }

    /// Phi suspicion score for `peer` at `now_ms`; `0.0` for a peer with no
    /// recorded history.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn suspicion_level(&self, peer: &str, now_ms: u64) -> f64 {
        let history = self.history.read();
        let Some(state) = history.get(peer) else {
            return 0.0;
        };
        let elapsed = now_ms.saturating_sub(state.last_heartbeat_ms) as f64;

        if state.intervals.len() < 3 {
            return elapsed / self.config.max_no_heartbeat_ms as f64 * self.config.phi_threshold;
        }

        let n = state.intervals.len() as f64;
        let sum: u64 = state.intervals.iter().sum();
        let mean = sum as f64 / n;
        let variance = state.intervals.iter().map(|&iv| { let diff = iv as f64 - mean; diff * diff }).sum::<f64>() / n;
        let std_dev = variance.sqrt().max(self.config.min_std_dev_ms as f64);

        let y = -(elapsed - mean) / (std_dev * std::f64::consts::SQRT_2);
        let cdf = 0.5 * erfc(y);
        let one_minus_cdf = (1.0 - cdf).max(f64::MIN_POSITIVE);
        (-(one_minus_cdf.log10())).max(0.0)
    }
}

/// Abramowitz & Stegun 7.1.26 rational approximation, |error| < 1.5e-7.
fn erfc(x: f64) -> f64 {
    let (z, negate) = if x < 0.0 { (-x, true) } else { (x, false) };
    let t = 1.0 / (1.0 + 0.327_591_1 * z);
    let poly = t * (0.254_829_592 + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    let result = poly * (-z * z).exp();
    if negate { 2.0 - result } else { result }
}
