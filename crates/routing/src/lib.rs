//! Decision primitives for the picoagent turn engine.
//!
//! The scheduler turns raw tool scores into a normalized distribution,
//! measures its Shannon entropy, and decides whether to act or clarify.
//! The adaptive threshold tunes the entropy gate online from observed
//! outcomes.

pub mod adaptive;
pub mod entropy;

pub use adaptive::{AdaptiveConfig, AdaptiveThreshold, ThresholdStats};
pub use entropy::{normalize_scores, shannon_entropy_bits, EntropyScheduler};
