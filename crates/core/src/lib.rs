//! # picoagent Core
//!
//! Domain types, traits, and error definitions for the picoagent runtime.
//! Every subsystem is defined as a trait here; implementations live in their
//! respective crates. This keeps the dependency graph clean (all crates
//! depend inward on core) and makes subsystems easy to stub in tests.

pub mod channel;
pub mod decision;
pub mod error;
pub mod hook;
pub mod provider;
pub mod schema;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use channel::{Channel, Inbound};
pub use decision::Decision;
pub use error::{Error, Result};
pub use hook::{HookContext, HookEvent, HookRegistry};
pub use provider::{ChatMessage, ChatOptions, ProviderClient, ToolScores};
pub use session::{Role, SessionMessage, SessionState};
pub use tool::{Tool, ToolContext, ToolDescriptor, ToolRegistry, ToolResult};
