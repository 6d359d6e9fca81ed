//! Live trace registry — one tap per discovered node.
//!
//! During a graph build every registered section records its source node
//! here. Once the graph is frozen, [`ZapRegistry::zap_stream`] attaches one
//! tap to each recorded stream and merges them into a single
//! [`Stream`](tokio_stream::Stream) of [`Zap`] events. Payloads are parked
//! in the shared [`ZapDataStore`]; the events themselves carry only the
//! allocation index, so they stay cheap to ship across the transport
//! boundary.
//!
//! # Tap discipline
//!
//! Taps must be installed exactly once per stream per graph lifetime:
//!
//! - duplicate *registrations* are dropped by a node-id presence set;
//! - a stream reachable under two node ids is tapped only once, via a
//!   tapped-stream mark;
//! - a second [`zap_stream`](ZapRegistry::zap_stream) call is refused with
//!   [`ZapError::AlreadyTapped`].
//!
//! A tap that falls behind lags and skips (logged at debug level); it never
//! slows the observed application down.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll};

use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamMap};

use crate::graph::NodeId;
use crate::probe::{StreamEvent, StreamHandle, StreamKey};

use super::error::ZapError;
use super::store::{ZapDataEntry, ZapDataKind, ZapDataStore};

// ---------------------------------------------------------------------------
// Zap
// ---------------------------------------------------------------------------

/// Classification of a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZapKind {
    /// A value flowed through the node.
    Next,
    /// The node's stream raised an error.
    Error,
    /// The node's stream completed.
    Complete,
}

/// One live trace event: something happened at a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zap {
    /// Node the event was observed at.
    pub id: NodeId,
    /// The node's normalized depth, for display placement.
    pub depth: i64,
    /// Allocation index of the stored payload; absent for completions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zap_data_id: Option<u64>,
    /// Event classification.
    pub kind: ZapKind,
}

// ---------------------------------------------------------------------------
// ZapRecord / ZapRegistry
// ---------------------------------------------------------------------------

/// One node's tap registration.
#[derive(Debug, Clone)]
pub struct ZapRecord {
    /// Node to attribute trace events to.
    pub node_id: NodeId,
    /// Depth the node was discovered at; rebased with the graph.
    pub depth: i64,
    /// The stream to tap.
    pub(crate) stream: StreamHandle,
}

/// Per-graph registry of tap records.
pub struct ZapRegistry {
    records: Vec<ZapRecord>,
    presence: FxHashSet<NodeId>,
    /// Streams already carrying a tap from this graph.
    tapped: Mutex<FxHashSet<StreamKey>>,
    taps_installed: AtomicBool,
    data: ZapDataStore,
}

impl ZapRegistry {
    /// Creates an empty registry sharing the session payload store.
    pub(crate) fn new(data: ZapDataStore) -> Self {
        Self {
            records: Vec::new(),
            presence: FxHashSet::default(),
            tapped: Mutex::new(FxHashSet::default()),
            taps_installed: AtomicBool::new(false),
            data,
        }
    }

    /// Records one tap registration for a node. A node revisited through
    /// fan-out is recorded only once.
    pub(crate) fn register(&mut self, node_id: NodeId, stream: StreamHandle, depth: i64) {
        if !self.presence.insert(node_id.clone()) {
            return;
        }
        self.records.push(ZapRecord {
            node_id,
            depth,
            stream,
        });
    }

    /// Returns `true` if the node has a tap registration.
    #[must_use]
    pub fn has(&self, node_id: &NodeId) -> bool {
        self.presence.contains(node_id)
    }

    /// All tap registrations, in discovery order.
    #[must_use]
    pub fn records(&self) -> &[ZapRecord] {
        &self.records
    }

    /// The shared payload store.
    #[must_use]
    pub fn data(&self) -> &ZapDataStore {
        &self.data
    }

    /// Mirrors the graph's depth flip onto trace depths so zap events use
    /// the same normalized scale.
    pub(crate) fn rebase_depths(&mut self, max_depth: i64) {
        for record in &mut self.records {
            record.depth = max_depth - record.depth;
        }
    }

    /// Installs one tap per recorded stream and returns the combined trace
    /// stream.
    ///
    /// # Errors
    ///
    /// Returns [`ZapError::AlreadyTapped`] if taps were already installed
    /// for this registry.
    pub fn zap_stream(&self) -> Result<ZapStream, ZapError> {
        if self.taps_installed.swap(true, Ordering::SeqCst) {
            return Err(ZapError::AlreadyTapped);
        }

        let mut taps = StreamMap::new();
        let mut routes = Vec::new();
        let mut tapped = self.tapped.lock().unwrap();
        for record in &self.records {
            if !tapped.insert(record.stream.key()) {
                tracing::debug!(node = %record.node_id, "stream already tapped, skipping");
                continue;
            }
            taps.insert(routes.len(), BroadcastStream::new(record.stream.tap()));
            routes.push((record.node_id.clone(), record.depth));
        }

        Ok(ZapStream {
            taps,
            routes,
            data: self.data.clone(),
        })
    }
}

impl std::fmt::Debug for ZapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZapRegistry")
            .field("records", &self.records.len())
            .field("taps_installed", &self.taps_installed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ZapStream
// ---------------------------------------------------------------------------

/// Combined trace stream over every tapped node.
///
/// Ends when every tapped stream has closed (all probe handles dropped).
/// Lagged taps skip missed events rather than back-pressuring the observed
/// application.
pub struct ZapStream {
    taps: StreamMap<usize, BroadcastStream<StreamEvent>>,
    /// `(node_id, depth)` per tap, index-aligned with the map keys.
    routes: Vec<(NodeId, i64)>,
    data: ZapDataStore,
}

impl ZapStream {
    /// Number of installed taps.
    #[must_use]
    pub fn tap_count(&self) -> usize {
        self.routes.len()
    }

    /// Converts one intercepted notification into a zap event, parking the
    /// payload in the store.
    fn convert(&self, tap: usize, event: StreamEvent) -> Zap {
        let (node_id, depth) = &self.routes[tap];
        let (kind, zap_data_id) = match event {
            StreamEvent::Next(payload) => {
                let index = self.data.append(ZapDataEntry {
                    node_id: node_id.clone(),
                    payload,
                    kind: ZapDataKind::Next,
                });
                (ZapKind::Next, Some(index))
            }
            StreamEvent::Error(payload) => {
                let index = self.data.append(ZapDataEntry {
                    node_id: node_id.clone(),
                    payload,
                    kind: ZapDataKind::Error,
                });
                (ZapKind::Error, Some(index))
            }
            StreamEvent::Complete => (ZapKind::Complete, None),
        };

        Zap {
            id: node_id.clone(),
            depth: *depth,
            zap_data_id,
            kind,
        }
    }
}

impl Stream for ZapStream {
    type Item = Zap;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match Pin::new(&mut this.taps).poll_next(cx) {
                Poll::Ready(Some((tap, Ok(event)))) => {
                    return Poll::Ready(Some(this.convert(tap, event)));
                }
                Poll::Ready(Some((tap, Err(BroadcastStreamRecvError::Lagged(missed))))) => {
                    tracing::debug!(
                        node = %this.routes[tap].0,
                        missed,
                        "zap tap lagged, skipping missed events"
                    );
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl std::fmt::Debug for ZapStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZapStream")
            .field("taps", &self.routes.len())
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
