//! Traversal sections.
//!
//! A [`Section`] is one discovered upstream-to-downstream arc: source
//! operator (or placeholder), connecting stream, sink operator (or named
//! output). Sections are transient artifacts of one builder run — they are
//! registered into the graph and discarded, never stored.

use smallvec::SmallVec;

use crate::probe::{OperatorRef, ScopeTag, StreamHandle};

use super::topology::LinkKind;

/// Ordered list of scope boundaries a section has crossed since the nearest
/// named output, outermost first.
pub(crate) type ScopeChain = SmallVec<[ScopeTag; 2]>;

/// Upstream end of a section.
#[derive(Debug, Clone)]
pub(crate) enum SectionSource {
    /// A live operator to keep expanding from.
    Operator(OperatorRef),
    /// Traversal terminator: a true source or a tagged cycle-breaking
    /// source. The string is the tag label (empty when the upstream is
    /// simply absent or malformed).
    Placeholder(String),
}

impl SectionSource {
    /// Base label of the upstream end.
    pub(crate) fn label(&self) -> String {
        match self {
            Self::Operator(op) => op.kind(),
            Self::Placeholder(tag) => tag.clone(),
        }
    }
}

/// Downstream end of a section.
#[derive(Debug, Clone)]
pub(crate) enum SectionSink {
    /// An operator consuming the stream.
    Operator(OperatorRef),
    /// One of the named outputs supplied to the builder.
    Output(String),
}

impl SectionSink {
    /// Label of the downstream end.
    pub(crate) fn label(&self) -> String {
        match self {
            Self::Operator(op) => op.kind(),
            Self::Output(name) => name.clone(),
        }
    }
}

/// One discovered arc of the operator web.
#[derive(Debug, Clone)]
pub(crate) struct Section {
    /// How the sink reaches this upstream.
    pub kind: LinkKind,
    /// Distance from the named output that seeded this chain.
    pub depth: u32,
    /// Lane index; parallel branches are offset so siblings do not collide.
    pub breadth: u32,
    /// No further upstream exists: true source or tagged cycle breaker.
    pub is_initial: bool,
    /// The sink is one of the caller's named outputs.
    pub is_final: bool,
    /// Scope boundaries crossed since the named output.
    pub scope_chain: ScopeChain,
    /// Upstream end.
    pub source: SectionSource,
    /// Downstream end.
    pub sink: SectionSink,
    /// The stream connecting source to sink.
    pub stream: StreamHandle,
}
