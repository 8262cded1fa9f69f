//! LLM provider implementations for picoagent.
//!
//! All clients implement `picoagent_core::ProviderClient`. The registry
//! builds the configured client and always wraps it in the fallback so a
//! provider outage degrades to the offline heuristic instead of failing
//! the turn.

pub mod anthropic;
pub mod fallback;
pub mod heuristic;
pub mod openai_compat;
mod prompts;
pub mod router;

pub use anthropic::AnthropicClient;
pub use fallback::FallbackClient;
pub use heuristic::LocalHeuristicClient;
pub use openai_compat::OpenAiCompatClient;
pub use router::{ProviderRegistry, ProviderSpec};
