//! Structural diff between two graph snapshots.
//!
//! Compares node-id and edge-id sets only. An id present in both graphs is
//! never emitted, even if its attributes changed — an operator occupying the
//! same identity is assumed visually equivalent across rebuilds. Adds
//! (nodes, then edges) precede removes (nodes, then edges); the rendering
//! collaborator relies on that ordering to avoid referencing elements that
//! do not exist yet.

use serde::{Deserialize, Serialize};

use super::topology::{Edge, Graph, Node};

/// Patch operation verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchOp {
    /// The element exists in the new graph only.
    Add,
    /// The element existed in the old graph only.
    Remove,
    /// Reserved for attribute-level updates; the diff engine never emits it.
    Replace,
}

/// The element a patch operation carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "target", content = "element")]
pub enum PatchElement {
    /// A node add/remove.
    Node(Node),
    /// An edge add/remove.
    Edge(Edge),
}

/// One patch instruction for the rendering collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOperation {
    /// Operation verb.
    pub op: PatchOp,
    /// The element to apply it to.
    #[serde(flatten)]
    pub element: PatchElement,
}

/// Minimal update sequence turning one rendered graph into another.
pub type Patch = Vec<PatchOperation>;

/// Diffs two snapshots into a patch.
///
/// Within each group, operations are sorted by element id so patches are
/// deterministic across runs.
#[must_use]
pub fn diff(new_graph: &Graph, old_graph: &Graph) -> Patch {
    let mut patch = Patch::new();

    let mut added_nodes: Vec<&Node> = new_graph
        .nodes()
        .iter()
        .filter(|(id, _)| !old_graph.nodes().contains_key(id))
        .map(|(_, node)| node)
        .collect();
    added_nodes.sort_by(|a, b| a.id.cmp(&b.id));

    let mut added_edges: Vec<&Edge> = new_graph
        .edges()
        .iter()
        .filter(|(id, _)| !old_graph.edges().contains_key(id))
        .map(|(_, edge)| edge)
        .collect();
    added_edges.sort_by(|a, b| a.id.cmp(&b.id));

    let mut removed_nodes: Vec<&Node> = old_graph
        .nodes()
        .iter()
        .filter(|(id, _)| !new_graph.nodes().contains_key(id))
        .map(|(_, node)| node)
        .collect();
    removed_nodes.sort_by(|a, b| a.id.cmp(&b.id));

    let mut removed_edges: Vec<&Edge> = old_graph
        .edges()
        .iter()
        .filter(|(id, _)| !new_graph.edges().contains_key(id))
        .map(|(_, edge)| edge)
        .collect();
    removed_edges.sort_by(|a, b| a.id.cmp(&b.id));

    patch.extend(added_nodes.into_iter().map(|node| PatchOperation {
        op: PatchOp::Add,
        element: PatchElement::Node(node.clone()),
    }));
    patch.extend(added_edges.into_iter().map(|edge| PatchOperation {
        op: PatchOp::Add,
        element: PatchElement::Edge(edge.clone()),
    }));
    patch.extend(removed_nodes.into_iter().map(|node| PatchOperation {
        op: PatchOp::Remove,
        element: PatchElement::Node(node.clone()),
    }));
    patch.extend(removed_edges.into_iter().map(|edge| PatchOperation {
        op: PatchOp::Remove,
        element: PatchElement::Edge(edge.clone()),
    }));

    patch
}

// ===========================================================================
// Tests
// ===========================================================================
