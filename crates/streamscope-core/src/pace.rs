//! Adaptive pacing of bursty trace replay.
//!
//! Zap traffic arrives in bursts (a single upstream tick can light up an
//! entire operator chain at once); replaying it raw would overwhelm the
//! display. [`Paced`] re-emits queued events as singleton batches spaced
//! approximately one period apart, where the period is the *latest* value of
//! an independent control stream and can be retuned between any two
//! emissions without restarting the queue.
//!
//! # Model
//!
//! One unbounded FIFO queue plus a single active timer. Each arrival while
//! idle (re)arms a short coalescing window; when it fires, a lone queued
//! event is emitted immediately, while a backlog enters a steady drain loop
//! that pops one event per period until the queue empties. No timer runs
//! while the queue is empty.
//!
//! # Failure semantics
//!
//! Nothing here panics. Input completion passes through immediately; events
//! still queued at that point are dropped (documented loss). Dropping the
//! stream releases the timer and the period-control subscription, after
//! which nothing is emitted.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::{sleep_until, Instant, Sleep};
use tokio_stream::Stream;

/// Inter-emission period used until the control stream produces a value.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(20);

/// Coalescing window armed on arrival, roughly one display frame.
const COALESCE_WINDOW: Duration = Duration::from_millis(16);

/// Drain-loop state. `Coalescing` and `Draining` own the single timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaceState {
    Idle,
    Coalescing,
    Draining,
}

/// Rate-limiting stream adapter with a live period control.
///
/// Emits singleton `Vec` batches; see the module docs for the timing model.
pub struct Paced<S, P>
where
    S: Stream,
{
    input: S,
    speed: P,
    period: Duration,
    speed_done: bool,
    queue: VecDeque<S::Item>,
    timer: Pin<Box<Sleep>>,
    state: PaceState,
    done: bool,
}

impl<S, P> Paced<S, P>
where
    S: Stream + Unpin,
    P: Stream<Item = Duration> + Unpin,
{
    /// Wraps `input`, pacing it by the latest value of `speed`.
    pub fn new(input: S, speed: P) -> Self {
        Self {
            input,
            speed,
            period: DEFAULT_PERIOD,
            speed_done: false,
            queue: VecDeque::new(),
            timer: Box::pin(sleep_until(Instant::now())),
            state: PaceState::Idle,
            done: false,
        }
    }

    /// Number of queued, not-yet-emitted events.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// The period currently in effect.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Paces `input` by the latest value of `speed`.
///
/// Free-function form of [`Paced::new`].
pub fn pace<S, P>(input: S, speed: P) -> Paced<S, P>
where
    S: Stream + Unpin,
    P: Stream<Item = Duration> + Unpin,
{
    Paced::new(input, speed)
}

impl<S, P> Stream for Paced<S, P>
where
    S: Stream + Unpin,
    S::Item: Unpin,
    P: Stream<Item = Duration> + Unpin,
{
    type Item = Vec<S::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        // Latest period value wins; the control stream ending keeps the
        // last value in effect.
        while !this.speed_done {
            match Pin::new(&mut this.speed).poll_next(cx) {
                Poll::Ready(Some(period)) => this.period = period,
                Poll::Ready(None) => this.speed_done = true,
                Poll::Pending => break,
            }
        }

        // Enqueue everything the input has ready. Arrivals (re)arm the
        // coalescing window unless a drain loop already owns the timer.
        loop {
            match Pin::new(&mut this.input).poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    this.queue.push_back(item);
                    if this.state != PaceState::Draining {
                        this.timer
                            .as_mut()
                            .reset(Instant::now() + COALESCE_WINDOW);
                        this.state = PaceState::Coalescing;
                    }
                }
                Poll::Ready(None) => {
                    // Completion passes straight through; queued events are
                    // dropped, not flushed.
                    this.done = true;
                    this.queue.clear();
                    this.state = PaceState::Idle;
                    return Poll::Ready(None);
                }
                Poll::Pending => break,
            }
        }

        match this.state {
            PaceState::Idle => Poll::Pending,
            PaceState::Coalescing => {
                if this.timer.as_mut().poll(cx).is_pending() {
                    return Poll::Pending;
                }
                if this.queue.len() > 1 {
                    // Backlog: emit the head now and start the drain loop.
                    let Some(item) = this.queue.pop_front() else {
                        this.state = PaceState::Idle;
                        return Poll::Pending;
                    };
                    this.timer.as_mut().reset(Instant::now() + this.period);
                    this.state = PaceState::Draining;
                    Poll::Ready(Some(vec![item]))
                } else {
                    this.state = PaceState::Idle;
                    match this.queue.pop_front() {
                        Some(item) => Poll::Ready(Some(vec![item])),
                        None => Poll::Pending,
                    }
                }
            }
            PaceState::Draining => {
                if this.timer.as_mut().poll(cx).is_pending() {
                    return Poll::Pending;
                }
                match this.queue.pop_front() {
                    Some(item) => {
                        if this.queue.is_empty() {
                            // Drained: no idle timer keeps running.
                            this.state = PaceState::Idle;
                        } else {
                            this.timer.as_mut().reset(Instant::now() + this.period);
                        }
                        Poll::Ready(Some(vec![item]))
                    }
                    None => {
                        this.state = PaceState::Idle;
                        Poll::Pending
                    }
                }
            }
        }
    }
}

impl<S, P> std::fmt::Debug for Paced<S, P>
where
    S: Stream,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paced")
            .field("period", &self.period)
            .field("queued", &self.queue.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
