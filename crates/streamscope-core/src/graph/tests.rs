//! Integration tests for graph reconstruction, diffing, rebase
//! normalization, and the zap pipeline, built around the four-output
//! scenario: a folded counter (`STATE`), a flattened inner stream
//! (`FLATTENED`), a merge of the two (`MERGED`), and a formatted label
//! (`DOM`).

#![allow(clippy::similar_names)]
#![allow(clippy::cast_possible_truncation)]

use std::sync::{Arc, RwLock};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::identity::IdentityRegistry;
use crate::probe::{payload, Inspectable, OperatorRef, StreamEvent, StreamHandle};
use crate::zap::{ZapDataEntry, ZapDataKind, ZapDataStore, ZapError, ZapKind, ZapSelector};

use super::builder::GraphBuilder;
use super::diff::{diff, PatchElement, PatchOp};
use super::topology::{Graph, Node, NodeId, NodeKind};

// ---- Mock observed application ----

/// A scriptable observed operator.
struct MockOperator {
    kind: &'static str,
    upstream: Option<StreamHandle>,
    upstream_list: Vec<StreamHandle>,
    inner: RwLock<Option<StreamHandle>>,
}

impl MockOperator {
    fn producer(kind: &'static str) -> Self {
        Self {
            kind,
            upstream: None,
            upstream_list: Vec::new(),
            inner: RwLock::new(None),
        }
    }

    fn map(kind: &'static str, upstream: StreamHandle) -> Self {
        Self {
            upstream: Some(upstream),
            ..Self::producer(kind)
        }
    }

    fn combine(kind: &'static str, upstream_list: Vec<StreamHandle>) -> Self {
        Self {
            upstream_list,
            ..Self::producer(kind)
        }
    }
}

impl Inspectable for MockOperator {
    fn kind(&self) -> String {
        self.kind.to_string()
    }

    fn upstream(&self) -> Option<StreamHandle> {
        self.upstream.clone()
    }

    fn upstream_list(&self) -> Vec<StreamHandle> {
        self.upstream_list.clone()
    }

    fn inner_upstream(&self) -> Option<StreamHandle> {
        self.inner.read().unwrap().clone()
    }
}

/// The wired-up observed application.
struct Scenario {
    outputs: Vec<(String, StreamHandle)>,
    state_stream: StreamHandle,
    inner_stream: StreamHandle,
    /// The flatten operator, kept concrete so tests can swap its inner
    /// upstream the way a dynamic combinator would at runtime.
    flatten: Arc<MockOperator>,
}

/// periodic -> map -> fold = STATE
/// STATE -> map -> flatten(inner periodic) = FLATTENED
/// merge(STATE, FLATTENED) = MERGED
/// STATE -> map = DOM
fn scenario() -> Scenario {
    let periodic = OperatorRef::new(MockOperator::producer("periodic"));
    let ticks = StreamHandle::new(Some(periodic));
    let map_reducer = OperatorRef::new(MockOperator::map("map", ticks));
    let reducers = StreamHandle::new(Some(map_reducer));
    let fold = OperatorRef::new(MockOperator::map("fold", reducers));
    let state = StreamHandle::new(Some(fold));

    let map_inner = OperatorRef::new(MockOperator::map("map", state.clone()));
    let mapped = StreamHandle::new(Some(map_inner));
    let inner_producer = OperatorRef::new(MockOperator::producer("inner periodic"));
    let inner = StreamHandle::new(Some(inner_producer));
    let flatten = Arc::new(MockOperator {
        kind: "flatten",
        upstream: Some(mapped),
        upstream_list: Vec::new(),
        inner: RwLock::new(Some(inner.clone())),
    });
    let flattened = StreamHandle::new(Some(OperatorRef::from_arc(flatten.clone())));

    let merge = OperatorRef::new(MockOperator::combine(
        "merge",
        vec![state.clone(), flattened.clone()],
    ));
    let merged = StreamHandle::new(Some(merge));

    let map_dom = OperatorRef::new(MockOperator::map("map", state.clone()));
    let dom = StreamHandle::new(Some(map_dom));

    Scenario {
        outputs: vec![
            ("STATE".to_string(), state.clone()),
            ("FLATTENED".to_string(), flattened),
            ("MERGED".to_string(), merged),
            ("DOM".to_string(), dom),
        ],
        state_stream: state,
        inner_stream: inner,
        flatten,
    }
}

fn builder() -> GraphBuilder {
    GraphBuilder::new(IdentityRegistry::new(), ZapDataStore::new())
}

fn node_by_label<'a>(graph: &'a Graph, label: &str) -> &'a Node {
    graph
        .nodes()
        .values()
        .find(|node| node.label == label)
        .unwrap_or_else(|| panic!("no node labelled {label:?}"))
}

// ---- Graph construction ----

#[test]
fn test_scenario_node_and_edge_counts() {
    let app = scenario();
    let graph = builder().build(&app.outputs);

    // 8 operators plus 4 named-output sinks.
    assert_eq!(graph.node_count(), 12);
    assert_eq!(graph.edge_count(), 12);
}

#[test]
fn test_scenario_sink_nodes() {
    let app = scenario();
    let graph = builder().build(&app.outputs);

    for name in ["STATE", "FLATTENED", "MERGED", "DOM"] {
        let node = graph.node(&NodeId::sink(name)).unwrap();
        assert_eq!(node.kind, NodeKind::Sink);
        assert_eq!(node.label, name);
    }
}

#[test]
fn test_scenario_explores_inner_stream() {
    let app = scenario();
    let graph = builder().build(&app.outputs);

    let inner = node_by_label(&graph, "inner periodic");
    assert_eq!(inner.kind, NodeKind::Operator);
}

#[test]
fn test_scenario_single_expansion_point() {
    let app = scenario();
    let graph = builder().build(&app.outputs);

    assert_eq!(graph.expansion_point_count(), 1);
    assert!(graph.has_expansion_point(app.inner_stream.key()));
}

#[test]
fn test_fan_out_registers_once() {
    let app = scenario();
    let graph = builder().build(&app.outputs);

    // STATE feeds four downstream paths but yields one fold node and one
    // zap record.
    let fold = node_by_label(&graph, "fold");
    assert!(graph.zap_registry().has(&fold.id));
    assert_eq!(
        graph
            .zap_registry()
            .records()
            .iter()
            .filter(|record| record.node_id == fold.id)
            .count(),
        1
    );
    assert_eq!(graph.zap_registry().records().len(), 8);
}

// ---- Rebase normalization ----

#[test]
fn test_rebase_places_outputs_on_final_column() {
    let app = scenario();
    let graph = builder().build(&app.outputs);

    let max_depth = graph.max_depth();
    assert!(max_depth > 0);
    for name in ["STATE", "FLATTENED", "MERGED", "DOM"] {
        assert_eq!(graph.node(&NodeId::sink(name)).unwrap().depth, max_depth);
    }
}

#[test]
fn test_rebase_packs_every_column_densely() {
    let app = scenario();
    let graph = builder().build(&app.outputs);

    let mut columns: std::collections::BTreeMap<i64, Vec<u32>> = std::collections::BTreeMap::new();
    for node in graph.nodes().values() {
        columns.entry(node.depth).or_default().push(node.breadth);
    }
    for (depth, mut breadths) in columns {
        breadths.sort_unstable();
        let expected: Vec<u32> = (0..breadths.len() as u32).collect();
        assert_eq!(breadths, expected, "column {depth} is not densely packed");
    }
}

// ---- Diffing across rebuilds ----

#[test]
fn test_unchanged_rebuild_diffs_empty() {
    let app = scenario();
    let builder = builder();

    let first = builder.build(&app.outputs);
    let second = builder.build(&app.outputs);

    assert!(diff(&second, &first).is_empty());
}

#[test]
fn test_first_build_diffs_as_all_adds_against_empty() {
    let app = scenario();
    let builder = builder();

    let graph = builder.build(&app.outputs);
    let empty = builder.build(&[]);

    let patch = diff(&graph, &empty);
    assert_eq!(patch.len(), graph.node_count() + graph.edge_count());
    assert!(patch.iter().all(|operation| operation.op == PatchOp::Add));
}

#[test]
fn test_inner_swap_patches_minimally() {
    let app = scenario();
    let builder = builder();
    let first = builder.build(&app.outputs);

    // The dynamic combinator swaps its inner upstream, as flatten does when
    // a new inner stream arrives.
    let replacement_producer = OperatorRef::new(MockOperator::producer("replacement periodic"));
    let replacement = StreamHandle::new(Some(replacement_producer));
    *app.flatten.inner.write().unwrap() = Some(replacement);

    let second = builder.build(&app.outputs);
    let patch = diff(&second, &first);

    // One node and one edge in, one node and one edge out; everything else
    // keeps its identity.
    assert_eq!(patch.len(), 4);
    let added_labels: Vec<&str> = patch
        .iter()
        .filter(|operation| operation.op == PatchOp::Add)
        .filter_map(|operation| match &operation.element {
            PatchElement::Node(node) => Some(node.label.as_str()),
            PatchElement::Edge(_) => None,
        })
        .collect();
    assert_eq!(added_labels, vec!["replacement periodic"]);
    let removed_labels: Vec<&str> = patch
        .iter()
        .filter(|operation| operation.op == PatchOp::Remove)
        .filter_map(|operation| match &operation.element {
            PatchElement::Node(node) => Some(node.label.as_str()),
            PatchElement::Edge(_) => None,
        })
        .collect();
    assert_eq!(removed_labels, vec!["inner periodic"]);
}

// ---- Zap pipeline ----

#[tokio::test(start_paused = true)]
async fn test_zaps_flow_through_pacing() {
    let app = scenario();
    let graph = builder().build(&app.outputs);

    let (_speed_tx, speed_rx) = watch::channel(Duration::from_millis(1));
    let mut zaps = graph.zaps(WatchStream::new(speed_rx)).unwrap();

    app.state_stream.emit(StreamEvent::Next(payload(3_i64)));

    let batch = zaps.next().await.unwrap();
    assert_eq!(batch.len(), 1);
    let zap = &batch[0];

    let fold = node_by_label(&graph, "fold");
    assert_eq!(zap.id, fold.id);
    assert_eq!(zap.kind, ZapKind::Next);

    // Trace depth uses the same normalized scale as the graph.
    let record_depth = graph
        .zap_registry()
        .records()
        .iter()
        .find(|record| record.node_id == zap.id)
        .unwrap()
        .depth;
    assert_eq!(zap.depth, record_depth);

    // Payloads are retrievable by allocation index and by node.
    let by_index = graph
        .zap_data(&ZapSelector::ByIndex(zap.zap_data_id.unwrap()))
        .unwrap();
    assert_eq!(by_index.payload.downcast_ref::<i64>(), Some(&3));
    let by_node = graph
        .zap_data(&ZapSelector::LastForNode(zap.id.clone()))
        .unwrap();
    assert_eq!(by_node.payload.downcast_ref::<i64>(), Some(&3));
}

#[tokio::test(start_paused = true)]
async fn test_zap_burst_is_paced_into_singleton_batches() {
    let app = scenario();
    let graph = builder().build(&app.outputs);

    let (_speed_tx, speed_rx) = watch::channel(Duration::from_millis(30));
    let mut zaps = graph.zaps(WatchStream::new(speed_rx)).unwrap();

    for i in 0..5_i64 {
        app.state_stream.emit(StreamEvent::Next(payload(i)));
    }

    let mut total = 0;
    while total < 5 {
        let batch = zaps.next().await.unwrap();
        assert_eq!(batch.len(), 1);
        total += batch.len();
    }
}

#[tokio::test]
async fn test_taps_install_once_per_graph() {
    let app = scenario();
    let graph = builder().build(&app.outputs);

    let (_speed_tx, speed_rx) = watch::channel(Duration::from_millis(1));
    let first = graph.zaps(WatchStream::new(speed_rx.clone()));
    assert!(first.is_ok());

    let second = graph.zaps(WatchStream::new(speed_rx));
    assert!(matches!(second, Err(ZapError::AlreadyTapped)));
}

#[test]
fn test_payload_store_is_shared_across_graphs() {
    let app = scenario();
    let zap_data = ZapDataStore::new();
    let builder = GraphBuilder::new(IdentityRegistry::new(), zap_data.clone());

    let first = builder.build(&app.outputs);
    let second = builder.build(&app.outputs);

    let fold = node_by_label(&first, "fold");
    first.zap_registry().data().append(ZapDataEntry {
        node_id: fold.id.clone(),
        payload: payload(1_i64),
        kind: ZapDataKind::Next,
    });

    // Both graphs and the session handle see the same appended entry.
    assert_eq!(second.zap_registry().data().len(), 1);
    assert_eq!(zap_data.len(), 1);
}
