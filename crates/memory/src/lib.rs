//! Memory subsystems for picoagent.
//!
//! Two stores with different lifetimes:
//! - [`vector::VectorMemory`] — embedding store ranked by cosine similarity
//!   with exponential time decay, persisted as a typed binary matrix plus a
//!   JSON sidecar.
//! - [`dual::DualMemoryStore`] — background consolidation of long sessions
//!   into `HISTORY.md` (chronological log) and `MEMORY.md` (semantic notes).

pub mod dual;
pub mod vector;

pub use dual::{ConsolidationRequest, DualMemoryStore};
pub use vector::{cosine_similarity, decay_weight, MemoryRecord, PruneCriteria, VectorMemory};
