//! Graph topology data structures.
//!
//! Defines [`Node`], [`Edge`], and [`Graph`] — the reconstructed snapshot of
//! the observed operator web. A `Graph` is populated by exactly one builder
//! run, normalized once via the depth/breadth rebase, and read-only
//! afterwards; the next builder run produces a sibling graph for diffing.
//!
//! Registration is idempotent throughout: traversal revisits operators
//! through every fan-out path, and re-registering an existing node or edge
//! is a no-op.

use std::fmt;
use std::time::Duration;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use crate::identity::IdentityRegistry;
use crate::pace::Paced;
use crate::probe::{StreamHandle, StreamKey};
use crate::zap::{ZapDataEntry, ZapDataStore, ZapError, ZapRegistry, ZapSelector, ZapStream};

use super::section::{Section, SectionSink, SectionSource};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for a node.
///
/// Operator nodes use the identity-registry id; placeholder sources, named
/// outputs, and scope groups use structured string forms so they stay stable
/// without a live object to key on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Id of an operator node, from the identity registry.
    #[must_use]
    pub(crate) fn registry(id: u64) -> Self {
        Self(id.to_string())
    }

    /// Id of a placeholder source node, keyed by its tag label.
    #[must_use]
    pub(crate) fn source(tag: &str) -> Self {
        Self(format!("source.{tag}"))
    }

    /// Id of a named-output sink node.
    #[must_use]
    pub(crate) fn sink(name: &str) -> Self {
        Self(format!("sink.{name}"))
    }

    /// Id of a scope-group node, from the scope's own identifier.
    #[must_use]
    pub(crate) fn scope(scope_id: &str) -> Self {
        Self(scope_id.to_string())
    }

    /// Synthetic parent id grouping all source nodes.
    #[must_use]
    pub(crate) fn sources_group() -> Self {
        Self("sources".to_string())
    }

    /// Synthetic parent id grouping all sink nodes.
    #[must_use]
    pub(crate) fn sinks_group() -> Self {
        Self("sinks".to_string())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for an edge: `"{source}.{target}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(String);

impl EdgeId {
    /// Key of the edge from `source` to `target`.
    #[must_use]
    pub fn between(source: &NodeId, target: &NodeId) -> Self {
        Self(format!("{source}.{target}"))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Classification of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    /// Traversal terminator: true source or tagged cycle breaker.
    Source,
    /// One of the caller's named outputs.
    Sink,
    /// An interior operator of the observed web.
    Operator,
    /// Synthesized grouping node for a scope boundary.
    ScopeGroup,
}

/// How a sink operator reaches an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Single direct upstream.
    Direct,
    /// One element of an array-style multi-input combinator.
    ArrayElement,
    /// Inner upstream of a dynamic (flatten-style) combinator.
    Nested,
}

/// Classification of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeKind {
    /// Single direct upstream.
    Direct,
    /// One element of an array-style multi-input combinator.
    ArrayElement,
    /// Inner upstream of a dynamic combinator.
    Nested,
    /// Scope-group nesting.
    Containment,
}

impl From<LinkKind> for EdgeKind {
    fn from(kind: LinkKind) -> Self {
        match kind {
            LinkKind::Direct => Self::Direct,
            LinkKind::ArrayElement => Self::ArrayElement,
            LinkKind::Nested => Self::Nested,
        }
    }
}

// ---------------------------------------------------------------------------
// Node / Edge
// ---------------------------------------------------------------------------

/// A node of the reconstructed graph.
///
/// `depth` is measured from the named outputs during traversal and flipped
/// by the rebase pass so data flows left to right; interior operators that
/// end a chain without an initial section can land one column past the
/// deepest section, hence the signed type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node id.
    pub id: NodeId,
    /// Node classification.
    pub kind: NodeKind,
    /// Display label.
    pub label: String,
    /// Grouping parent: a scope-group id, or a synthetic sources/sinks
    /// group for initial/final nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    /// Column index (normalized by the rebase pass).
    pub depth: i64,
    /// Lane index within the column (densely packed by the rebase pass).
    pub breadth: u32,
}

/// An edge of the reconstructed graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Unique edge id, `"{source}.{target}"`.
    pub id: EdgeId,
    /// Upstream node.
    pub source_id: NodeId,
    /// Downstream node.
    pub target_id: NodeId,
    /// Display label, from the stream's tags.
    pub label: String,
    /// Edge classification.
    pub kind: EdgeKind,
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// Resolved ids and labels for one section's graph elements.
struct SectionConfig {
    source_id: NodeId,
    source_label: String,
    sink_id: NodeId,
    sink_label: String,
    stream_label: String,
}

/// One reconstructed snapshot of the observed operator web.
pub struct Graph {
    nodes: FxHashMap<NodeId, Node>,
    edges: FxHashMap<EdgeId, Edge>,
    /// Nested upstreams that may swap producers at runtime; handles are
    /// retained so the keys stay valid.
    expansion_points: FxHashMap<StreamKey, StreamHandle>,
    zap_registry: ZapRegistry,
    identity: IdentityRegistry,
    max_section_depth: u32,
    rebased: bool,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("node_count", &self.nodes.len())
            .field("edge_count", &self.edges.len())
            .field("expansion_points", &self.expansion_points.len())
            .field("rebased", &self.rebased)
            .finish_non_exhaustive()
    }
}

impl Graph {
    /// Creates an empty graph wired to the shared registries.
    pub(crate) fn new(identity: IdentityRegistry, zap_data: ZapDataStore) -> Self {
        Self {
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
            expansion_points: FxHashMap::default(),
            zap_registry: ZapRegistry::new(zap_data),
            identity,
            max_section_depth: 0,
            rebased: false,
        }
    }

    /// Registers one traversal section: source node, sink node, connecting
    /// edge, scope group, expansion point, and zap record, all idempotently.
    pub(crate) fn register(&mut self, section: &Section) {
        let config = self.resolve(section);

        self.max_section_depth = self.max_section_depth.max(section.depth);

        self.register_scope_group(section);
        self.register_expansion_point(section);
        self.register_elements(section, &config);
        self.zap_registry.register(
            config.source_id,
            section.stream.clone(),
            i64::from(section.depth),
        );
    }

    /// Resolves node ids and labels for a section.
    fn resolve(&self, section: &Section) -> SectionConfig {
        let source_id = match &section.source {
            SectionSource::Placeholder(tag) => NodeId::source(tag),
            SectionSource::Operator(op) => NodeId::registry(self.identity.id_of(op)),
        };
        let sink_id = match &section.sink {
            SectionSink::Output(name) => NodeId::sink(name),
            SectionSink::Operator(op) => NodeId::registry(self.identity.id_of(op)),
        };

        let sink_key = section.stream.sink_key();
        let base = section.source.label();
        let source_label = match sink_key {
            Some(key) => format!("{base}: {key}"),
            None => base,
        };
        let stream_label = section
            .stream
            .cycle_source()
            .filter(|tag| !tag.is_empty())
            .or(sink_key)
            .unwrap_or("")
            .to_string();

        SectionConfig {
            source_id,
            source_label,
            sink_id,
            sink_label: section.sink.label(),
            stream_label,
        }
    }

    /// Synthesizes the scope-group node and containment edge implied by the
    /// section's scope chain, if any.
    fn register_scope_group(&mut self, section: &Section) {
        let Some(scope) = section.scope_chain.last() else {
            return;
        };

        self.set_node(Node {
            id: NodeId::scope(&scope.id),
            kind: NodeKind::ScopeGroup,
            label: scope.name.clone(),
            parent: section
                .scope_chain
                .len()
                .checked_sub(2)
                .and_then(|i| section.scope_chain.get(i))
                .map(|outer| NodeId::scope(&outer.id)),
            depth: i64::from(section.depth) + 1,
            breadth: section.breadth,
        });

        if let Some(outer) = section
            .scope_chain
            .len()
            .checked_sub(2)
            .and_then(|i| section.scope_chain.get(i))
        {
            let outer_id = NodeId::scope(&outer.id);
            let inner_id = NodeId::scope(&scope.id);
            self.set_edge(Edge {
                id: EdgeId::between(&outer_id, &inner_id),
                source_id: outer_id,
                target_id: inner_id,
                label: String::new(),
                kind: EdgeKind::Containment,
            });
        }
    }

    /// Records a nested upstream as a dynamic expansion point.
    fn register_expansion_point(&mut self, section: &Section) {
        if section.kind == LinkKind::Nested {
            self.expansion_points
                .entry(section.stream.key())
                .or_insert_with(|| section.stream.clone());
        }
    }

    /// Creates the source node, sink node, and connecting edge.
    fn register_elements(&mut self, section: &Section, config: &SectionConfig) {
        let scope_parent = section
            .scope_chain
            .last()
            .map(|scope| NodeId::scope(&scope.id));

        self.set_node(Node {
            id: config.source_id.clone(),
            kind: if section.is_initial {
                NodeKind::Source
            } else {
                NodeKind::Operator
            },
            label: if section.is_initial {
                config.stream_label.clone()
            } else {
                config.source_label.clone()
            },
            parent: if section.is_initial {
                Some(NodeId::sources_group())
            } else {
                scope_parent.clone()
            },
            depth: i64::from(section.depth) + 1,
            breadth: section.breadth,
        });

        self.set_node(Node {
            id: config.sink_id.clone(),
            kind: if section.is_final {
                NodeKind::Sink
            } else {
                NodeKind::Operator
            },
            label: config.sink_label.clone(),
            parent: if section.is_final {
                Some(NodeId::sinks_group())
            } else {
                scope_parent
            },
            depth: i64::from(section.depth),
            breadth: section.breadth,
        });

        self.set_edge(Edge {
            id: EdgeId::between(&config.source_id, &config.sink_id),
            source_id: config.source_id.clone(),
            target_id: config.sink_id.clone(),
            label: config.stream_label.clone(),
            kind: section.kind.into(),
        });
    }

    /// Inserts a node unless one with the same id already exists.
    pub(crate) fn set_node(&mut self, node: Node) {
        self.nodes.entry(node.id.clone()).or_insert(node);
    }

    /// Inserts an edge unless one with the same id already exists.
    pub(crate) fn set_edge(&mut self, edge: Edge) {
        self.edges.entry(edge.id.clone()).or_insert(edge);
    }

    /// Normalizes depths and breadths after the traversal completes.
    ///
    /// Depths enter with 0 at the named outputs and grow upstream. This pass
    /// (a) collapses every source node onto the deepest column, (b) flips
    /// depths so sources sit at column 0 and named outputs at the maximum
    /// column, (c) densely re-packs breadths per column, and (d) propagates
    /// the maximum depth into the zap registry. Runs once per graph.
    pub(crate) fn rebase_depths(&mut self) {
        if self.rebased {
            return;
        }
        self.rebased = true;

        let max_depth = i64::from(self.max_section_depth);

        for node in self.nodes.values_mut() {
            if node.kind == NodeKind::Source {
                node.depth = max_depth;
            }
            node.depth = max_depth - node.depth;
        }

        // Dense breadth re-pack, column by column. Ordering within a column
        // follows ascending original breadth, ties broken by id so packing
        // is deterministic.
        let mut columns: FxHashMap<i64, Vec<(u32, NodeId)>> = FxHashMap::default();
        for node in self.nodes.values() {
            columns
                .entry(node.depth)
                .or_default()
                .push((node.breadth, node.id.clone()));
        }
        for column in columns.values_mut() {
            column.sort();
            for (lane, (_, id)) in column.iter().enumerate() {
                if let Some(node) = self.nodes.get_mut(id) {
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        node.breadth = lane as u32;
                    }
                }
            }
        }

        self.zap_registry.rebase_depths(max_depth);
    }

    // ---- Accessors ----

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Looks up an edge by id.
    #[must_use]
    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    /// All nodes, keyed by id.
    #[must_use]
    pub fn nodes(&self) -> &FxHashMap<NodeId, Node> {
        &self.nodes
    }

    /// All edges, keyed by id.
    #[must_use]
    pub fn edges(&self) -> &FxHashMap<EdgeId, Edge> {
        &self.edges
    }

    /// Streams behind dynamic combinators that may swap producers; when one
    /// fires, this graph is stale and should be rebuilt.
    pub fn expansion_points(&self) -> impl Iterator<Item = &StreamHandle> {
        self.expansion_points.values()
    }

    /// Number of dynamic expansion points.
    #[must_use]
    pub fn expansion_point_count(&self) -> usize {
        self.expansion_points.len()
    }

    /// Returns `true` if the stream is recorded as a dynamic expansion point.
    #[must_use]
    pub fn has_expansion_point(&self, key: StreamKey) -> bool {
        self.expansion_points.contains_key(&key)
    }

    /// Maximum section depth seen during the build; the named outputs sit at
    /// this column after the rebase.
    #[must_use]
    pub fn max_depth(&self) -> i64 {
        i64::from(self.max_section_depth)
    }

    /// The graph's zap registry.
    #[must_use]
    pub fn zap_registry(&self) -> &ZapRegistry {
        &self.zap_registry
    }

    /// Taps every discovered node and returns the combined trace stream,
    /// paced by the live `speed` control stream.
    ///
    /// # Errors
    ///
    /// Returns [`ZapError::AlreadyTapped`] if taps were already installed
    /// for this graph.
    pub fn zaps<P>(&self, speed: P) -> Result<Paced<ZapStream, P>, ZapError>
    where
        P: Stream<Item = Duration> + Unpin,
    {
        Ok(Paced::new(self.zap_registry.zap_stream()?, speed))
    }

    /// Resolves a stored trace payload by allocation index or most recent
    /// entry for a node.
    #[must_use]
    pub fn zap_data(&self, selector: &ZapSelector) -> Option<ZapDataEntry> {
        self.zap_registry.data().select(selector)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
