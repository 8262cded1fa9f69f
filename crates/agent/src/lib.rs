//! The picoagent turn engine.
//!
//! One turn walks a fixed state machine: receive → recall → skills →
//! context → score → entropy gate → (clarify | plan → validate → execute →
//! chain) → synthesize → remember → observe → consolidate → persist, with
//! lifecycle hooks at turn start, after each tool result, and at turn end.
//! Turns are serialized per session and bounded by a deadline; every turn
//! produces some response.

pub mod context;
pub mod loop_runner;
pub mod sessions;
pub mod subagent;

pub use context::ContextBuilder;
pub use loop_runner::{AgentLoop, ExecutedTool, TurnOutcome};
pub use sessions::SessionManager;
pub use subagent::SubagentCoordinator;
