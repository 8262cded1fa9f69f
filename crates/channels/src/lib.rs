//! Channel adapters for picoagent.
//!
//! Adapters implement `picoagent_core::Channel`: poll inbound messages,
//! send replies, honor per-sender allowlists. Only the CLI adapter ships
//! in-tree; platform adapters plug in behind the same contract.

pub mod cli;

pub use cli::CliChannel;
