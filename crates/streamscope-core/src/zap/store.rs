//! Append-only trace payload store.
//!
//! Zap events crossing the transport boundary carry only an allocation
//! index; the payload itself stays in this process-wide store until the
//! control panel asks for it. The store is shared across every graph in the
//! session and never shrinks — an accepted trade-off for a diagnostic tool,
//! not a leak to fix.

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::graph::NodeId;
use crate::probe::Payload;

// ---------------------------------------------------------------------------
// ZapDataEntry
// ---------------------------------------------------------------------------

/// Classification of a stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZapDataKind {
    /// Captured from a value notification.
    Next,
    /// Captured from an error notification.
    Error,
}

/// One stored trace payload.
#[derive(Clone)]
pub struct ZapDataEntry {
    /// Node the payload was captured at.
    pub node_id: NodeId,
    /// The captured payload.
    pub payload: Payload,
    /// Whether this was a value or an error.
    pub kind: ZapDataKind,
}

impl fmt::Debug for ZapDataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZapDataEntry")
            .field("node_id", &self.node_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ZapSelector
// ---------------------------------------------------------------------------

/// How to resolve a stored payload.
#[derive(Debug, Clone)]
pub enum ZapSelector {
    /// By the allocation index carried in a zap event.
    ByIndex(u64),
    /// Most recent entry captured at the given node.
    LastForNode(NodeId),
}

// ---------------------------------------------------------------------------
// ZapDataStore
// ---------------------------------------------------------------------------

/// Shared, append-only store of captured payloads.
///
/// Injected once per session and cloned into every graph's zap registry.
#[derive(Clone, Default)]
pub struct ZapDataStore {
    entries: Arc<RwLock<Vec<ZapDataEntry>>>,
}

impl ZapDataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns its allocation index.
    pub fn append(&self, entry: ZapDataEntry) -> u64 {
        let mut entries = self.entries.write().unwrap();
        entries.push(entry);
        entries.len() as u64 - 1
    }

    /// Looks up an entry by allocation index.
    #[must_use]
    pub fn get(&self, index: u64) -> Option<ZapDataEntry> {
        let entries = self.entries.read().unwrap();
        entries.get(usize::try_from(index).ok()?).cloned()
    }

    /// Most recent entry for a node. Linear scan from the end: lookups are
    /// rare and the store favors plain append semantics over indexing.
    #[must_use]
    pub fn last_for_node(&self, node_id: &NodeId) -> Option<ZapDataEntry> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .rev()
            .find(|entry| entry.node_id == *node_id)
            .cloned()
    }

    /// Resolves a selector against the store.
    #[must_use]
    pub fn select(&self, selector: &ZapSelector) -> Option<ZapDataEntry> {
        match selector {
            ZapSelector::ByIndex(index) => self.get(*index),
            ZapSelector::LastForNode(node_id) => self.last_for_node(node_id),
        }
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Returns `true` if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ZapDataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZapDataStore")
            .field("entries", &self.len())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::payload;

    fn entry(node: &NodeId, value: i64, kind: ZapDataKind) -> ZapDataEntry {
        ZapDataEntry {
            node_id: node.clone(),
            payload: payload(value),
            kind,
        }
    }

    fn node(n: u64) -> NodeId {
        NodeId::registry(n)
    }

    #[test]
    fn test_append_returns_sequential_indices() {
        let store = ZapDataStore::new();
        let a = node(1);

        assert_eq!(store.append(entry(&a, 10, ZapDataKind::Next)), 0);
        assert_eq!(store.append(entry(&a, 11, ZapDataKind::Next)), 1);
        assert_eq!(store.append(entry(&a, 12, ZapDataKind::Error)), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_get_by_index() {
        let store = ZapDataStore::new();
        let a = node(1);
        store.append(entry(&a, 10, ZapDataKind::Next));
        store.append(entry(&a, 11, ZapDataKind::Next));

        let found = store.get(1).unwrap();
        assert_eq!(found.payload.downcast_ref::<i64>(), Some(&11));
        assert!(store.get(2).is_none());
    }

    #[test]
    fn test_last_for_node_scans_from_end() {
        let store = ZapDataStore::new();
        let a = node(1);
        let b = node(2);
        store.append(entry(&a, 10, ZapDataKind::Next));
        store.append(entry(&b, 20, ZapDataKind::Next));
        store.append(entry(&a, 11, ZapDataKind::Next));

        let found = store.select(&ZapSelector::LastForNode(a.clone())).unwrap();
        assert_eq!(found.payload.downcast_ref::<i64>(), Some(&11));

        assert!(store.select(&ZapSelector::LastForNode(node(3))).is_none());
    }

    #[test]
    fn test_store_shared_across_clones() {
        let store = ZapDataStore::new();
        let other = store.clone();
        store.append(entry(&node(1), 10, ZapDataKind::Next));

        assert_eq!(other.len(), 1);
    }
}
