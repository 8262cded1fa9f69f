//! Shannon-entropy gating over tool-score distributions.
//!
//! Low entropy means one tool dominates, which is the necessary condition
//! to act; high entropy means the distribution is too flat to commit, so
//! the agent asks for clarification instead.

use picoagent_core::provider::ToolScores;
use picoagent_core::Decision;

/// Entropy contribution of p·log₂(p) with the 0·log 0 = 0 convention.
fn plogp(p: f64) -> f64 {
    if p <= 0.0 {
        0.0
    } else {
        p * p.log2()
    }
}

/// Shannon entropy of a probability distribution, in bits.
pub fn shannon_entropy_bits(probabilities: &[f64]) -> f64 {
    -probabilities.iter().copied().map(plogp).sum::<f64>()
}

/// Normalize raw non-negative scores into a distribution (p_i = s_i / Σ s).
/// Returns `None` when every score is zero.
pub fn normalize_scores(scores: &ToolScores) -> Option<Vec<(String, f64)>> {
    let total = scores.total();
    if total <= 0.0 {
        return None;
    }
    Some(
        scores
            .iter()
            .map(|(name, score)| (name.to_string(), score / total))
            .collect(),
    )
}

/// Decides act-vs-clarify from a score distribution and a threshold.
///
/// `decide` is a pure function of its inputs: equal scores and threshold
/// always yield the same decision.
#[derive(Debug, Clone)]
pub struct EntropyScheduler {
    default_threshold_bits: f64,
}

impl EntropyScheduler {
    pub fn new(default_threshold_bits: f64) -> Self {
        Self {
            default_threshold_bits: default_threshold_bits.max(0.0),
        }
    }

    pub fn default_threshold_bits(&self) -> f64 {
        self.default_threshold_bits
    }

    /// Gate the distribution at the scheduler's default threshold.
    pub fn decide_default(&self, scores: &ToolScores) -> Decision {
        self.decide(scores, self.default_threshold_bits)
    }

    /// Gate the distribution at `threshold_bits`:
    ///
    /// 1. No tools → clarify ("no-tools").
    /// 2. All scores zero → clarify ("no-signal").
    /// 3. A single candidate acts iff its score is positive, confidence 1.
    /// 4. Otherwise H ≥ threshold clarifies; H < threshold acts on the
    ///    argmax with confidence 1 − H/log₂(n).
    pub fn decide(&self, scores: &ToolScores, threshold_bits: f64) -> Decision {
        if scores.is_empty() {
            return Decision::Clarify {
                reason: "no-tools".into(),
                entropy_bits: 0.0,
            };
        }

        let Some(probabilities) = normalize_scores(scores) else {
            return Decision::Clarify {
                reason: "no-signal".into(),
                entropy_bits: 0.0,
            };
        };

        if probabilities.len() == 1 {
            return Decision::Act {
                tool: probabilities[0].0.clone(),
                confidence: 1.0,
                entropy_bits: 0.0,
            };
        }

        let entropy_bits =
            shannon_entropy_bits(&probabilities.iter().map(|(_, p)| *p).collect::<Vec<_>>());

        if entropy_bits >= threshold_bits {
            return Decision::Clarify {
                reason: "entropy-above-threshold".into(),
                entropy_bits,
            };
        }

        // Argmax with deterministic tie-breaking: ToolScores iterates in
        // name order and only a strictly greater probability wins.
        let (top_name, _) = probabilities
            .iter()
            .map(|(name, p)| (name.as_str(), *p))
            .fold(None::<(&str, f64)>, |best, (name, p)| match best {
                Some((_, bp)) if p <= bp => best,
                _ => Some((name, p)),
            })
            .expect("non-empty distribution");

        let h_max = (probabilities.len() as f64).log2();
        Decision::Act {
            tool: top_name.to_string(),
            confidence: (1.0 - entropy_bits / h_max).clamp(0.0, 1.0),
            entropy_bits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f64)]) -> ToolScores {
        pairs
            .iter()
            .map(|(n, s)| (n.to_string(), *s))
            .collect()
    }

    #[test]
    fn uniform_three_way_clarifies_at_default_threshold() {
        // H = log2(3) ≈ 1.585 ≥ 1.5
        let scheduler = EntropyScheduler::new(1.5);
        let decision = scheduler.decide_default(&scores(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]));
        match decision {
            Decision::Clarify { reason, entropy_bits } => {
                assert_eq!(reason, "entropy-above-threshold");
                assert!((entropy_bits - 3f64.log2()).abs() < 1e-9);
            }
            other => panic!("expected Clarify, got {other:?}"),
        }
    }

    #[test]
    fn dominant_tool_acts() {
        // p = {0.9, 0.1}, H ≈ 0.469 bits
        let scheduler = EntropyScheduler::new(1.5);
        let decision = scheduler.decide_default(&scores(&[("a", 9.0), ("b", 1.0)]));
        match decision {
            Decision::Act { tool, confidence, entropy_bits } => {
                assert_eq!(tool, "a");
                assert!((entropy_bits - 0.469).abs() < 0.001);
                assert!((confidence - (1.0 - 0.469)).abs() < 0.001);
            }
            other => panic!("expected Act, got {other:?}"),
        }
    }

    #[test]
    fn all_zero_scores_clarify_with_no_signal() {
        let scheduler = EntropyScheduler::new(1.5);
        let decision = scheduler.decide_default(&scores(&[("a", 0.0), ("b", 0.0)]));
        assert_eq!(
            decision,
            Decision::Clarify { reason: "no-signal".into(), entropy_bits: 0.0 }
        );
    }

    #[test]
    fn empty_scores_clarify() {
        let scheduler = EntropyScheduler::new(1.5);
        let decision = scheduler.decide_default(&ToolScores::new());
        assert!(matches!(decision, Decision::Clarify { reason, .. } if reason == "no-tools"));
    }

    #[test]
    fn single_positive_candidate_acts_with_full_confidence() {
        let scheduler = EntropyScheduler::new(1.5);
        let decision = scheduler.decide_default(&scores(&[("only", 0.3)]));
        assert_eq!(
            decision,
            Decision::Act { tool: "only".into(), confidence: 1.0, entropy_bits: 0.0 }
        );
    }

    #[test]
    fn single_zero_candidate_clarifies() {
        let scheduler = EntropyScheduler::new(1.5);
        let decision = scheduler.decide_default(&scores(&[("only", 0.0)]));
        assert!(matches!(decision, Decision::Clarify { reason, .. } if reason == "no-signal"));
    }

    #[test]
    fn entropy_at_threshold_clarifies() {
        // Uniform over two → H = 1.0 exactly; τ = 1.0 must clarify (H ≥ τ)
        let scheduler = EntropyScheduler::new(1.0);
        let decision = scheduler.decide_default(&scores(&[("a", 1.0), ("b", 1.0)]));
        assert!(matches!(decision, Decision::Clarify { .. }));
    }

    #[test]
    fn decide_is_deterministic() {
        let scheduler = EntropyScheduler::new(1.5);
        let input = scores(&[("a", 2.0), ("b", 5.0), ("c", 0.5)]);
        let first = scheduler.decide(&input, 1.2);
        for _ in 0..10 {
            assert_eq!(scheduler.decide(&input, 1.2), first);
        }
    }

    #[test]
    fn concentrating_mass_never_increases_entropy() {
        // Move mass onto the top candidate step by step; H must be
        // non-increasing at every step.
        let mut top = 1.0;
        let mut last_h = f64::INFINITY;
        for _ in 0..20 {
            let s = scores(&[("top", top), ("other", 1.0), ("third", 1.0)]);
            let probabilities = normalize_scores(&s).unwrap();
            let h = shannon_entropy_bits(
                &probabilities.iter().map(|(_, p)| *p).collect::<Vec<_>>(),
            );
            assert!(h <= last_h + 1e-12, "entropy increased: {h} > {last_h}");
            last_h = h;
            top += 0.5;
        }
    }

    #[test]
    fn entropy_of_certainty_is_zero() {
        assert_eq!(shannon_entropy_bits(&[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn entropy_of_uniform_is_log2_n() {
        let h = shannon_entropy_bits(&[0.25; 4]);
        assert!((h - 2.0).abs() < 1e-12);
    }
}
