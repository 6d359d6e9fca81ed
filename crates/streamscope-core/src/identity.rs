//! Process-wide stable identity for observed operators.
//!
//! Repeated graph builds must map the same live operator to the same id, or
//! the diff engine would see every rebuild as a full replacement. The
//! registry assigns ids lazily on first sight, keyed by object identity
//! (allocation address), and holds only [`Weak`] references so it never
//! keeps an observed operator alive.
//!
//! An address whose previous occupant has been dropped may be reused by a
//! later allocation; each entry therefore carries a liveness check, and a
//! dead entry under a reused address is replaced by a fresh id. Ids are
//! unique across all distinct operators ever seen.
//!
//! The registry is a shared singleton by explicit injection: one handle is
//! created at session start and cloned into every
//! [`GraphBuilder`](crate::graph::GraphBuilder).

use std::sync::{Arc, Mutex, Weak};

use fxhash::FxHashMap;

use crate::probe::{Inspectable, OperatorRef};

struct IdentityEntry {
    id: u64,
    live: Weak<dyn Inspectable>,
}

#[derive(Default)]
struct IdentityTable {
    entries: FxHashMap<usize, IdentityEntry>,
    next_id: u64,
}

/// Reference-keyed id registry, shared across graph rebuilds.
#[derive(Clone, Default)]
pub struct IdentityRegistry {
    inner: Arc<Mutex<IdentityTable>>,
}

impl IdentityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stable id for an operator, assigning one on first sight.
    ///
    /// Total: never fails, never re-assigns while the operator is alive.
    #[must_use]
    pub fn id_of(&self, operator: &OperatorRef) -> u64 {
        let addr = operator.addr();
        let mut table = self.inner.lock().unwrap();

        if let Some(entry) = table.entries.get(&addr) {
            if entry.live.strong_count() > 0 {
                return entry.id;
            }
            // Dead occupant under a reused address: fall through and replace.
        }

        table.next_id += 1;
        let id = table.next_id;
        table.entries.insert(
            addr,
            IdentityEntry {
                id,
                live: operator.downgrade(),
            },
        );
        id
    }

    /// Evicts entries whose operators have been dropped.
    ///
    /// The detach path for long sessions; ids of live operators are
    /// unaffected.
    pub fn prune(&self) {
        self.inner
            .lock()
            .unwrap()
            .entries
            .retain(|_, entry| entry.live.strong_count() > 0);
    }

    /// Number of entries currently in the table, including not-yet-pruned
    /// dead ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Returns `true` if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
