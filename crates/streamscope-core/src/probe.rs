//! Instrumentation probes over the observed application.
//!
//! The observed dataflow program has no explicit graph; its topology exists
//! only in the web of upstream references connecting operators. The probe
//! layer is the typed surface the introspection collaborator wires onto that
//! web so the rest of this crate can traverse and tap it:
//!
//! - [`Inspectable`] — implemented per observed operator; exposes the
//!   operator's label and its upstream stream handles.
//! - [`OperatorRef`] — cloneable, identity-comparable operator handle.
//! - [`StreamHandle`] — handle to one observed stream: its producer, its
//!   externally supplied tags ([`StreamMeta`]), and a multicast tap point.
//!
//! # Non-interfering taps
//!
//! Every stream carries a `tokio::sync::broadcast` sender through which the
//! observed application mirrors its notifications via
//! [`emit()`](StreamHandle::emit). Taps are independent receivers: they never
//! block the emitter and never affect each other. A tap that falls behind
//! lags and skips — backpressure is never propagated into the observed
//! program.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Payload / StreamEvent
// ---------------------------------------------------------------------------

/// Opaque event payload captured from the observed application.
///
/// Payloads are stored and forwarded by reference only; cycle-safe encoding
/// for the transport boundary is the transport collaborator's concern.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Wraps a value into a [`Payload`].
pub fn payload<T: Any + Send + Sync>(value: T) -> Payload {
    Arc::new(value)
}

/// One notification mirrored from an observed stream.
#[derive(Clone)]
pub enum StreamEvent {
    /// A value was delivered to the stream's consumer.
    Next(Payload),
    /// The stream raised an error notification.
    Error(Payload),
    /// The stream completed.
    Complete,
}

impl fmt::Debug for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next(_) => f.write_str("Next(..)"),
            Self::Error(_) => f.write_str("Error(..)"),
            Self::Complete => f.write_str("Complete"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// A named nesting boundary tagged onto a stream by the introspection
/// collaborator (e.g. a component boundary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeTag {
    /// Stable identifier of the scope.
    pub id: String,
    /// Human-readable scope name.
    pub name: String,
}

impl ScopeTag {
    /// Creates a scope tag.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Externally supplied, read-only metadata carried by an observed stream.
#[derive(Debug, Clone, Default)]
pub struct StreamMeta {
    /// Scope boundary this stream crosses, if any.
    pub scope: Option<ScopeTag>,
    /// Output key this stream feeds, used to enrich labels.
    pub sink_key: Option<String>,
    /// Cycle-breaking source tag. Marks intentional feedback wiring; the
    /// traversal terminates here instead of following the producer.
    pub cycle_source: Option<String>,
}

// ---------------------------------------------------------------------------
// TapConfig
// ---------------------------------------------------------------------------

/// Configuration for a stream's tap point.
#[derive(Debug, Clone)]
pub struct TapConfig {
    /// Broadcast channel capacity per stream. A tap that falls more than
    /// this many events behind lags and skips.
    pub buffer_size: usize,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self { buffer_size: 1024 }
    }
}

// ---------------------------------------------------------------------------
// Inspectable / OperatorRef
// ---------------------------------------------------------------------------

/// Introspection surface of one observed operator.
///
/// Implemented by the introspection collaborator. The default method bodies
/// describe a producer with no upstreams; operators override whichever
/// upstream shape they actually have.
pub trait Inspectable: Send + Sync {
    /// Operator label, e.g. `"map"`, `"fold"`, `"merge"`.
    fn kind(&self) -> String;

    /// Direct upstream, for single-input operators.
    fn upstream(&self) -> Option<StreamHandle> {
        None
    }

    /// Upstreams of an array-style multi-input combinator.
    fn upstream_list(&self) -> Vec<StreamHandle> {
        Vec::new()
    }

    /// Current inner upstream of a dynamic (flatten-style) combinator.
    ///
    /// Dynamic combinators may swap this stream at runtime; the graph built
    /// from a snapshot records it as a dynamic expansion point.
    fn inner_upstream(&self) -> Option<StreamHandle> {
        None
    }
}

/// Opaque, identity-comparable handle to a runtime operator.
///
/// Never serialized; identity is the referenced allocation, compared via
/// [`same()`](OperatorRef::same) and mapped to a stable id by the
/// [`IdentityRegistry`](crate::identity::IdentityRegistry).
#[derive(Clone)]
pub struct OperatorRef {
    inner: Arc<dyn Inspectable>,
}

impl OperatorRef {
    /// Wraps an operator into a new handle.
    pub fn new<T: Inspectable + 'static>(operator: T) -> Self {
        Self {
            inner: Arc::new(operator),
        }
    }

    /// Wraps an already-shared operator.
    #[must_use]
    pub fn from_arc(operator: Arc<dyn Inspectable>) -> Self {
        Self { inner: operator }
    }

    /// Operator label.
    #[must_use]
    pub fn kind(&self) -> String {
        self.inner.kind()
    }

    /// Direct upstream stream, if any.
    #[must_use]
    pub fn upstream(&self) -> Option<StreamHandle> {
        self.inner.upstream()
    }

    /// Array-combinator upstream streams.
    #[must_use]
    pub fn upstream_list(&self) -> Vec<StreamHandle> {
        self.inner.upstream_list()
    }

    /// Inner upstream of a dynamic combinator, if any.
    #[must_use]
    pub fn inner_upstream(&self) -> Option<StreamHandle> {
        self.inner.inner_upstream()
    }

    /// Returns `true` if both handles refer to the same operator.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }

    /// Address of the referenced allocation. Identity key for the registry;
    /// only meaningful while the operator is alive.
    #[must_use]
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner).cast::<()>() as usize
    }

    /// Downgrades to a weak reference for liveness tracking.
    pub(crate) fn downgrade(&self) -> Weak<dyn Inspectable> {
        Arc::downgrade(&self.inner)
    }
}

impl fmt::Debug for OperatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRef")
            .field("kind", &self.inner.kind())
            .field("addr", &self.addr())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// Identity key of a stream handle.
///
/// Valid for comparisons only while some handle to the stream is retained;
/// holders of keys (expansion-point sets, tapped-stream marks) retain the
/// handle alongside the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey(usize);

struct StreamProbe {
    producer: Option<OperatorRef>,
    meta: StreamMeta,
    events: broadcast::Sender<StreamEvent>,
}

/// Cloneable handle to one observed stream.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<StreamProbe>,
}

impl StreamHandle {
    /// Creates a handle with default metadata and tap configuration.
    #[must_use]
    pub fn new(producer: Option<OperatorRef>) -> Self {
        Self::with_meta(producer, StreamMeta::default())
    }

    /// Creates a handle carrying externally supplied tags.
    #[must_use]
    pub fn with_meta(producer: Option<OperatorRef>, meta: StreamMeta) -> Self {
        Self::with_config(producer, meta, &TapConfig::default())
    }

    /// Creates a handle with an explicit tap configuration.
    #[must_use]
    pub fn with_config(
        producer: Option<OperatorRef>,
        meta: StreamMeta,
        config: &TapConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.buffer_size.max(1));
        Self {
            inner: Arc::new(StreamProbe {
                producer,
                meta,
                events,
            }),
        }
    }

    /// The operator producing this stream. Absent for a true source.
    #[must_use]
    pub fn producer(&self) -> Option<OperatorRef> {
        self.inner.producer.clone()
    }

    /// The stream's externally supplied tags.
    #[must_use]
    pub fn meta(&self) -> &StreamMeta {
        &self.inner.meta
    }

    /// Scope tag, if the stream crosses a naming boundary.
    #[must_use]
    pub fn scope(&self) -> Option<&ScopeTag> {
        self.inner.meta.scope.as_ref()
    }

    /// Output key this stream feeds, if tagged.
    #[must_use]
    pub fn sink_key(&self) -> Option<&str> {
        self.inner.meta.sink_key.as_deref()
    }

    /// Cycle-breaking source tag, if tagged.
    #[must_use]
    pub fn cycle_source(&self) -> Option<&str> {
        self.inner.meta.cycle_source.as_deref()
    }

    /// Identity key for this stream.
    #[must_use]
    pub fn key(&self) -> StreamKey {
        StreamKey(Arc::as_ptr(&self.inner) as usize)
    }

    /// Mirrors one notification into the tap point.
    ///
    /// Called by the observed application's instrumentation. Never blocks;
    /// delivery to zero taps is not an error.
    pub fn emit(&self, event: StreamEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Attaches an independent tap to this stream.
    ///
    /// The receiver observes every event emitted after this call. It does
    /// not affect [`emit()`](Self::emit) or any other tap.
    #[must_use]
    pub fn tap(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("key", &self.key())
            .field("producer", &self.inner.producer.as_ref().map(OperatorRef::kind))
            .field("meta", &self.inner.meta)
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Producer(&'static str);

    impl Inspectable for Producer {
        fn kind(&self) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn test_operator_identity() {
        let a = OperatorRef::new(Producer("periodic"));
        let b = a.clone();
        let c = OperatorRef::new(Producer("periodic"));

        assert!(a.same(&b));
        assert!(!a.same(&c));
        assert_eq!(a.addr(), b.addr());
        assert_ne!(a.addr(), c.addr());
    }

    #[test]
    fn test_stream_key_stable_across_clones() {
        let stream = StreamHandle::new(None);
        let other = stream.clone();
        assert_eq!(stream.key(), other.key());

        let unrelated = StreamHandle::new(None);
        assert_ne!(stream.key(), unrelated.key());
    }

    #[test]
    fn test_meta_accessors() {
        let meta = StreamMeta {
            scope: Some(ScopeTag::new("scope-1", "Counter")),
            sink_key: Some("DOM".into()),
            cycle_source: Some("FEEDBACK".into()),
        };
        let stream = StreamHandle::with_meta(None, meta);

        assert_eq!(stream.scope().map(|s| s.name.as_str()), Some("Counter"));
        assert_eq!(stream.sink_key(), Some("DOM"));
        assert_eq!(stream.cycle_source(), Some("FEEDBACK"));
    }

    #[test]
    fn test_emit_without_taps_is_silent() {
        let stream = StreamHandle::new(None);
        stream.emit(StreamEvent::Next(payload(1_i64)));
        stream.emit(StreamEvent::Complete);
    }

    #[tokio::test]
    async fn test_taps_are_independent() {
        let stream = StreamHandle::new(None);
        let mut tap_a = stream.tap();
        let mut tap_b = stream.tap();

        stream.emit(StreamEvent::Next(payload(7_i64)));

        let a = tap_a.recv().await.unwrap();
        let b = tap_b.recv().await.unwrap();
        for event in [a, b] {
            match event {
                StreamEvent::Next(value) => {
                    assert_eq!(value.downcast_ref::<i64>(), Some(&7));
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_tap_only_sees_later_events() {
        let stream = StreamHandle::new(None);
        stream.emit(StreamEvent::Next(payload(1_i64)));

        let mut tap = stream.tap();
        stream.emit(StreamEvent::Next(payload(2_i64)));

        match tap.recv().await.unwrap() {
            StreamEvent::Next(value) => {
                assert_eq!(value.downcast_ref::<i64>(), Some(&2));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
