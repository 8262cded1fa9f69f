//! Online tuning of the entropy threshold from observed outcomes.
//!
//! Successful acts pull the threshold toward the entropy that was observed
//! at decision time (permitting bolder future acts); failed acts decay it
//! toward the floor (demanding more certainty); clarifications apply a
//! gentle quarter-rate decay so the agent does not get stuck asking.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::debug;

const OUTCOME_RING_CAPACITY: usize = 64;

/// Tuning constants. `eta` must be in (0, 0.5].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    pub initial_threshold_bits: f64,
    pub min_threshold_bits: f64,
    pub max_threshold_bits: f64,
    pub eta: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            initial_threshold_bits: 1.5,
            min_threshold_bits: 0.3,
            max_threshold_bits: 3.0,
            eta: 0.1,
        }
    }
}

impl AdaptiveConfig {
    fn validate(&self) -> Result<(), String> {
        if !(self.eta > 0.0 && self.eta <= 0.5) {
            return Err(format!("eta must be in (0, 0.5], got {}", self.eta));
        }
        if self.min_threshold_bits >= self.max_threshold_bits {
            return Err("min_threshold_bits must be below max_threshold_bits".into());
        }
        Ok(())
    }
}

/// Summary reported by `stats()` and the `threshold-stats` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdStats {
    pub threshold_bits: f64,
    pub win_rate: f64,
    pub sample_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedState {
    threshold_bits: f64,
    successes: u64,
    failures: u64,
    #[serde(default)]
    recent: Vec<bool>,
}

/// The online-tuned decision threshold.
pub struct AdaptiveThreshold {
    config: AdaptiveConfig,
    threshold_bits: f64,
    successes: u64,
    failures: u64,
    recent: VecDeque<bool>,
    path: Option<PathBuf>,
}

impl AdaptiveThreshold {
    pub fn new(config: AdaptiveConfig) -> Result<Self, String> {
        config.validate()?;
        let threshold_bits = config
            .initial_threshold_bits
            .clamp(config.min_threshold_bits, config.max_threshold_bits);
        Ok(Self {
            config,
            threshold_bits,
            successes: 0,
            failures: 0,
            recent: VecDeque::with_capacity(OUTCOME_RING_CAPACITY),
            path: None,
        })
    }

    /// Attach a persistence path and load any saved state from it.
    /// A missing or corrupt file leaves the initial state in place.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Ok(raw) = std::fs::read_to_string(&path) {
            match serde_json::from_str::<PersistedState>(&raw) {
                Ok(state) => {
                    self.threshold_bits = state
                        .threshold_bits
                        .clamp(self.config.min_threshold_bits, self.config.max_threshold_bits);
                    self.successes = state.successes;
                    self.failures = state.failures;
                    self.recent = state
                        .recent
                        .into_iter()
                        .take(OUTCOME_RING_CAPACITY)
                        .collect();
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt threshold state");
                }
            }
        }
        self.path = Some(path);
        self
    }

    /// The current threshold, in bits.
    pub fn current(&self) -> f64 {
        self.threshold_bits
    }

    /// Feed one observed outcome into the tuner and return the new
    /// threshold. Always clamped to [min, max].
    pub fn observe(&mut self, acted: bool, success: bool, entropy_at_decision: f64) -> f64 {
        let eta = self.config.eta;
        let floor = self.config.min_threshold_bits;
        let tau = self.threshold_bits;

        self.threshold_bits = if acted && success {
            tau + eta * (entropy_at_decision - tau)
        } else if acted {
            tau - eta * (tau - floor)
        } else {
            tau - (eta / 4.0) * (tau - floor)
        };
        self.threshold_bits = self
            .threshold_bits
            .clamp(self.config.min_threshold_bits, self.config.max_threshold_bits);

        if acted {
            if success {
                self.successes += 1;
            } else {
                self.failures += 1;
            }
            if self.recent.len() == OUTCOME_RING_CAPACITY {
                self.recent.pop_front();
            }
            self.recent.push_back(success);
        }

        debug!(
            threshold_bits = self.threshold_bits,
            acted, success, entropy_at_decision, "Adaptive threshold updated"
        );
        self.persist();
        self.threshold_bits
    }

    pub fn stats(&self) -> ThresholdStats {
        let win_rate = if self.recent.is_empty() {
            0.0
        } else {
            self.recent.iter().filter(|s| **s).count() as f64 / self.recent.len() as f64
        };
        ThresholdStats {
            threshold_bits: self.threshold_bits,
            win_rate,
            sample_count: self.successes + self.failures,
        }
    }

    /// Write state as typed JSON via write-then-rename. Best effort; a
    /// failed write leaves the previous file intact.
    fn persist(&self) {
        let Some(path) = &self.path else { return };
        let state = PersistedState {
            threshold_bits: self.threshold_bits,
            successes: self.successes,
            failures: self.failures,
            recent: self.recent.iter().copied().collect(),
        };
        if let Err(e) = atomic_write_json(path, &state) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to persist threshold state");
        }
    }
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, payload)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuner() -> AdaptiveThreshold {
        AdaptiveThreshold::new(AdaptiveConfig::default()).unwrap()
    }

    #[test]
    fn success_pulls_threshold_toward_observed_entropy() {
        let mut t = tuner();
        // Acting successfully at higher entropy than τ raises τ
        let after = t.observe(true, true, 2.5);
        assert!(after > 1.5);
        assert!((after - (1.5 + 0.1 * (2.5 - 1.5))).abs() < 1e-12);
    }

    #[test]
    fn failure_decays_threshold_toward_floor() {
        let mut t = tuner();
        let after = t.observe(true, false, 1.0);
        assert!(after < 1.5);
        assert!((after - (1.5 - 0.1 * (1.5 - 0.3))).abs() < 1e-12);
    }

    #[test]
    fn clarify_applies_quarter_rate_decay() {
        let mut t = tuner();
        let after = t.observe(false, true, 0.0);
        assert!((after - (1.5 - 0.025 * (1.5 - 0.3))).abs() < 1e-12);
    }

    #[test]
    fn threshold_stays_clamped_under_any_sequence() {
        let mut t = tuner();
        for i in 0..500 {
            let acted = i % 3 != 0;
            let success = i % 2 == 0;
            let entropy = (i as f64 * 0.37) % 4.0;
            let tau = t.observe(acted, success, entropy);
            assert!((0.3..=3.0).contains(&tau), "tau escaped clamp: {tau}");
        }
    }

    #[test]
    fn invalid_eta_rejected() {
        let config = AdaptiveConfig { eta: 0.0, ..AdaptiveConfig::default() };
        assert!(AdaptiveThreshold::new(config).is_err());
        let config = AdaptiveConfig { eta: 0.6, ..AdaptiveConfig::default() };
        assert!(AdaptiveThreshold::new(config).is_err());
    }

    #[test]
    fn stats_track_outcomes() {
        let mut t = tuner();
        t.observe(true, true, 1.0);
        t.observe(true, true, 1.0);
        t.observe(true, false, 1.0);
        t.observe(false, true, 1.0); // clarify — not a sample
        let stats = t.stats();
        assert_eq!(stats.sample_count, 3);
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn state_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threshold.json");

        let mut t = AdaptiveThreshold::new(AdaptiveConfig::default())
            .unwrap()
            .with_persistence(&path);
        let tau = t.observe(true, false, 1.0);

        let reloaded = AdaptiveThreshold::new(AdaptiveConfig::default())
            .unwrap()
            .with_persistence(&path);
        assert!((reloaded.current() - tau).abs() < 1e-12);
        assert_eq!(reloaded.stats().sample_count, 1);
    }

    #[test]
    fn corrupt_state_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threshold.json");
        std::fs::write(&path, "not json").unwrap();

        let t = AdaptiveThreshold::new(AdaptiveConfig::default())
            .unwrap()
            .with_persistence(&path);
        assert!((t.current() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn loaded_threshold_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threshold.json");
        std::fs::write(
            &path,
            r#"{"threshold_bits": 99.0, "successes": 0, "failures": 0}"#,
        )
        .unwrap();

        let t = AdaptiveThreshold::new(AdaptiveConfig::default())
            .unwrap()
            .with_persistence(&path);
        assert!((t.current() - 3.0).abs() < 1e-12);
    }
}
