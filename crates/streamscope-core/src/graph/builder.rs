//! Graph construction by traversal of the live operator web.
//!
//! The observed program has no graph object to read; the builder recovers
//! one by walking upstream references from a named set of outputs. The walk
//! uses an explicit stack rather than recursion so arbitrarily long operator
//! chains cannot exhaust the call stack, and it is fully synchronous: the
//! returned [`Graph`] is internally consistent the moment `build` returns.
//!
//! Traversal revisits operators through every fan-out path; the graph's
//! idempotent registration collapses the duplicates. There is no structural
//! cycle detection — termination relies on upstreams ending in true sources
//! or streams tagged as cycle-breaking sources. An untagged reference cycle
//! will not terminate; the tag contract is the callers' declaration of
//! intentional feedback wiring, and this module does not second-guess it.

use smallvec::smallvec;

use crate::identity::IdentityRegistry;
use crate::probe::{OperatorRef, StreamHandle};
use crate::zap::ZapDataStore;

use super::section::{ScopeChain, Section, SectionSink, SectionSource};
use super::topology::{Graph, LinkKind};

/// Builds graph snapshots from a named output mapping.
///
/// Holds the two session-wide registries — operator identity and the zap
/// payload store — and threads them into every graph it produces, so node
/// ids stay stable across rebuilds and trace payloads accumulate in one
/// place.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    identity: IdentityRegistry,
    zap_data: ZapDataStore,
}

impl GraphBuilder {
    /// Creates a builder around the session registries.
    #[must_use]
    pub fn new(identity: IdentityRegistry, zap_data: ZapDataStore) -> Self {
        Self { identity, zap_data }
    }

    /// Builds a fresh snapshot of the web reachable from `outputs`.
    ///
    /// Output order matters: each output's position seeds the breadth of its
    /// traversal chain, keeping parallel chains in separate lanes.
    #[must_use]
    pub fn build(&self, outputs: &[(String, StreamHandle)]) -> Graph {
        let mut graph = Graph::new(self.identity.clone(), self.zap_data.clone());
        let mut stack: Vec<Section> = Vec::with_capacity(outputs.len());

        for (ordinal, (name, stream)) in outputs.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let breadth = ordinal as u32;
            stack.push(final_section(name, stream, breadth));
        }

        while let Some(section) = stack.pop() {
            graph.register(&section);

            if !section.is_initial {
                if let SectionSource::Operator(operator) = &section.source {
                    expand(operator, &section, &mut stack);
                }
            }
        }

        graph.rebase_depths();

        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            expansion_points = graph.expansion_point_count(),
            "graph build complete"
        );

        graph
    }
}

/// Pushes one section per upstream of `operator`.
///
/// Expanded sections inherit depth + 1; array and nested expansions offset
/// breadth by their sibling index so parallel branches do not collide.
fn expand(operator: &OperatorRef, parent: &Section, stack: &mut Vec<Section>) {
    if let Some(stream) = operator.upstream() {
        stack.push(upstream_section(LinkKind::Direct, stream, operator, parent, 0));
    }

    for (index, stream) in operator.upstream_list().into_iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let offset = index as u32;
        stack.push(upstream_section(
            LinkKind::ArrayElement,
            stream,
            operator,
            parent,
            offset,
        ));
    }

    if let Some(stream) = operator.inner_upstream() {
        stack.push(upstream_section(LinkKind::Nested, stream, operator, parent, 1));
    }
}

/// Builds the section for one upstream stream of `sink`.
fn upstream_section(
    kind: LinkKind,
    stream: StreamHandle,
    sink: &OperatorRef,
    parent: &Section,
    breadth_offset: u32,
) -> Section {
    let source = resolve_source(&stream);
    let mut scope_chain = parent.scope_chain.clone();
    if let Some(scope) = stream.scope() {
        scope_chain.push(scope.clone());
    }

    Section {
        kind,
        depth: parent.depth + 1,
        breadth: parent.breadth + breadth_offset,
        is_initial: matches!(source, SectionSource::Placeholder(_)),
        is_final: false,
        scope_chain,
        source,
        sink: SectionSink::Operator(sink.clone()),
        stream,
    }
}

/// Builds the seed section for one named output.
fn final_section(name: &str, stream: &StreamHandle, breadth: u32) -> Section {
    let source = resolve_source(stream);
    let scope_chain: ScopeChain = match stream.scope() {
        Some(scope) => smallvec![scope.clone()],
        None => smallvec![],
    };

    Section {
        kind: LinkKind::Direct,
        depth: 0,
        breadth,
        is_initial: matches!(source, SectionSource::Placeholder(_)),
        is_final: true,
        scope_chain,
        source,
        sink: SectionSink::Output(name.to_string()),
        stream: stream.clone(),
    }
}

/// Resolves a stream's upstream end.
///
/// A cycle-source tag terminates the traversal at intentional feedback
/// wiring; a missing producer is either a true source or malformed upstream
/// metadata, degraded to an empty-labelled placeholder rather than failing
/// the build.
fn resolve_source(stream: &StreamHandle) -> SectionSource {
    match (stream.cycle_source(), stream.producer()) {
        (Some(tag), _) => SectionSource::Placeholder(tag.to_string()),
        (None, Some(producer)) => SectionSource::Operator(producer),
        (None, None) => SectionSource::Placeholder(String::new()),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
