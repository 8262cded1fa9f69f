//! The act-or-clarify decision produced by the entropy gate.

use serde::{Deserialize, Serialize};

/// Outcome of gating a tool-score distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// One tool dominates enough to act on it.
    Act {
        tool: String,
        /// 1 − H/H_max, in [0, 1]
        confidence: f64,
        entropy_bits: f64,
    },

    /// The distribution is too uncertain; ask the user instead.
    Clarify {
        reason: String,
        entropy_bits: f64,
    },
}

impl Decision {
    pub fn is_act(&self) -> bool {
        matches!(self, Decision::Act { .. })
    }

    pub fn tool(&self) -> Option<&str> {
        match self {
            Decision::Act { tool, .. } => Some(tool),
            Decision::Clarify { .. } => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Decision::Act { confidence, .. } => *confidence,
            Decision::Clarify { .. } => 0.0,
        }
    }

    pub fn entropy_bits(&self) -> f64 {
        match self {
            Decision::Act { entropy_bits, .. } | Decision::Clarify { entropy_bits, .. } => {
                *entropy_bits
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let act = Decision::Act {
            tool: "shell".into(),
            confidence: 0.8,
            entropy_bits: 0.4,
        };
        assert!(act.is_act());
        assert_eq!(act.tool(), Some("shell"));
        assert!((act.confidence() - 0.8).abs() < f64::EPSILON);

        let clarify = Decision::Clarify {
            reason: "no-signal".into(),
            entropy_bits: 0.0,
        };
        assert!(!clarify.is_act());
        assert_eq!(clarify.tool(), None);
        assert_eq!(clarify.confidence(), 0.0);
    }

    #[test]
    fn serde_tagging() {
        let act = Decision::Act {
            tool: "file".into(),
            confidence: 1.0,
            entropy_bits: 0.0,
        };
        let json = serde_json::to_string(&act).unwrap();
        assert!(json.contains("\"kind\":\"act\""));
    }
}
