//! # Streamscope Core
//!
//! The core engine for observing a running reactive dataflow application:
//! reconstructs the implicit operator graph, keeps it in sync through
//! minimal patches, and replays live event traffic at a watchable rate.
//!
//! This crate provides:
//! - **Probe layer**: typed instrumentation handles over the observed
//!   operators and streams
//! - **Identity registry**: process-lifetime-stable ids for opaque operators
//! - **Graph**: traversal-based reconstruction, snapshot store, and
//!   structural diff
//! - **Zap**: non-interfering live taps producing depth-tagged trace events
//! - **Pace**: adaptive rate limiting of bursty trace replay
//!
//! ## Design principles
//!
//! 1. **Never disturb the observed program** — taps are broadcast
//!    subscriptions that cannot block or back-pressure the host
//! 2. **Identity before structure** — the same live operator keeps one id
//!    across rebuilds, so diffs stay minimal
//! 3. **Snapshots are frozen** — topology changes produce a sibling graph
//!    and a patch, never in-place mutation
//! 4. **Nothing here is fatal** — failures degrade to placeholder graph
//!    elements or error trace events
//!
//! ## Example
//!
//! ```rust,ignore
//! use streamscope_core::{GraphBuilder, IdentityRegistry, ZapDataStore};
//!
//! let builder = GraphBuilder::new(IdentityRegistry::new(), ZapDataStore::new());
//! let graph = builder.build(&outputs);
//! let zaps = graph.zaps(speed_stream)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod graph;
pub mod identity;
pub mod pace;
pub mod probe;
pub mod zap;

// Re-export key types
pub use graph::{diff, Graph, GraphBuilder, Patch};
pub use identity::IdentityRegistry;
pub use pace::{pace, Paced};
pub use probe::{Inspectable, OperatorRef, ScopeTag, StreamEvent, StreamHandle, StreamMeta};
pub use zap::{Zap, ZapDataStore, ZapError, ZapKind, ZapSelector};
