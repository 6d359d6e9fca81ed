//! # Graph reconstruction
//!
//! The observed application's dataflow graph exists only implicitly, as
//! upstream references between operators. This module recovers it:
//!
//! - **[`GraphBuilder`]**: iterative depth-first traversal from a named set
//!   of outputs
//! - **[`Graph`]**: the reconstructed snapshot — nodes, edges, dynamic
//!   expansion points, and the zap registry for live traces
//! - **[`diff`]**: minimal add/remove patch between two snapshots
//!
//! ## Key design points
//!
//! 1. **Identity-keyed nodes** — the same live operator maps to the same id
//!    across rebuilds, so diffs stay minimal
//! 2. **Idempotent registration** — fan-out revisits collapse to no-ops
//! 3. **Frozen once built** — a snapshot never mutates; topology changes
//!    produce a sibling graph and a patch
//!
//! ## Example
//!
//! ```rust,ignore
//! use streamscope_core::graph::{diff, GraphBuilder};
//!
//! let builder = GraphBuilder::new(identity, zap_data);
//! let first = builder.build(&outputs);
//! // ... a dynamic expansion point fires ...
//! let second = builder.build(&outputs);
//! let patch = diff(&second, &first);
//! ```

pub mod builder;
pub mod diff;
mod section;
pub mod topology;

#[cfg(test)]
mod tests;

// Re-export key types
pub use builder::GraphBuilder;
pub use diff::{diff, Patch, PatchElement, PatchOp, PatchOperation};
pub use topology::{Edge, EdgeId, EdgeKind, Graph, LinkKind, Node, NodeId, NodeKind};
