//! The tail client.
//!
//! [`tail_cycle`] performs one bounded-wait read and classifies its outcome;
//! [`TailLoop`] repeats cycles, reconnecting and resuming from the last
//! delivered position until it is told to stop or hits a fatal error.
//!
//! # Example
//!
//! ```ignore
//! let config = TailConfig::new("/data/rs/a,/data/rs/b")
//!     .with_namespace_filter(NamespaceFilter::from_names(["app.users"])?)
//!     .with_fast_stop(true);
//!
//! let mut tail = TailLoop::new(config, ReplicaSetConnector::new())?;
//! let stats = tail.run(&mut |event: ChangeEvent| -> oplog_tail::Result<()> {
//!     println!("new op log: {event}");
//!     Ok(())
//! })?;
//! ```

mod cycle;
mod handle;
mod tail_loop;

pub use cycle::{tail_cycle, StreamOutcome};
pub use handle::TailHandle;
pub use tail_loop::{LoopState, TailLoop};

use crate::error::{Result, TailError};
use crate::types::{ChangeEvent, Position};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Consumer of delivered events. An error ends the run.
pub trait EventSink {
    fn deliver(&mut self, event: ChangeEvent) -> Result<()>;
}

impl<F> EventSink for F
where
    F: FnMut(ChangeEvent) -> Result<()>,
{
    fn deliver(&mut self, event: ChangeEvent) -> Result<()> {
        self(event)
    }
}

impl EventSink for Vec<ChangeEvent> {
    fn deliver(&mut self, event: ChangeEvent) -> Result<()> {
        self.push(event);
        Ok(())
    }
}

impl EventSink for crossbeam_channel::Sender<ChangeEvent> {
    /// Blocks while the channel is full.
    fn deliver(&mut self, event: ChangeEvent) -> Result<()> {
        self.send(event)
            .map_err(|_| TailError::Sink("event receiver disconnected".into()))
    }
}

/// External cancellation token, honored between cycles.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tracks the resume position of one stream.
///
/// Only moves forward: an out-of-order timestamp below the current position
/// is counted but does not move it back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PositionTracker {
    current: Option<Position>,
    delivered: u64,
    out_of_order: u64,
}

impl PositionTracker {
    pub fn new(initial: Option<Position>) -> Self {
        Self {
            current: initial,
            ..Default::default()
        }
    }

    pub fn current(&self) -> Option<Position> {
        self.current
    }

    /// Events delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Timestamps seen below the current position.
    pub fn out_of_order(&self) -> u64 {
        self.out_of_order
    }

    /// Adopt `position` as the resume point when none is set yet.
    pub fn seed(&mut self, position: Position) {
        if self.current.is_none() {
            self.current = Some(position);
        }
    }

    /// Record a delivered event. Returns the position after the update.
    pub fn advance(&mut self, ts: Position) -> Position {
        self.delivered += 1;
        match self.current {
            Some(current) if ts < current => {
                self.out_of_order += 1;
                tracing::warn!(%ts, %current, "out-of-order timestamp, keeping current position");
                current
            }
            _ => {
                self.current = Some(ts);
                ts
            }
        }
    }
}

/// Counters for one tail run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TailStats {
    pub events_delivered: u64,
    /// Bounded reads issued.
    pub cycles: u64,
    /// Reads that waited out the idle timeout with no data.
    pub idle_cycles: u64,
    /// Successful connects, including the first.
    pub connects: u64,
    pub connect_failures: u64,
    pub connection_losses: u64,
    pub out_of_order: u64,
    /// Resume position at the time of the snapshot.
    pub position: Option<Position>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Document;

    fn event(ts: u64) -> ChangeEvent {
        ChangeEvent::decode(Document::new().with("ts", Position(ts))).unwrap()
    }

    #[test]
    fn test_tracker_moves_forward() {
        let mut tracker = PositionTracker::new(None);
        assert_eq!(tracker.advance(Position(100)), Position(100));
        assert_eq!(tracker.advance(Position(105)), Position(105));
        assert_eq!(tracker.current(), Some(Position(105)));
        assert_eq!(tracker.delivered(), 2);
    }

    #[test]
    fn test_tracker_never_regresses() {
        let mut tracker = PositionTracker::new(Some(Position(110)));
        assert_eq!(tracker.advance(Position(90)), Position(110));
        assert_eq!(tracker.current(), Some(Position(110)));
        assert_eq!(tracker.out_of_order(), 1);

        // equal boundary timestamp is a re-delivery, not out of order
        tracker.advance(Position(110));
        assert_eq!(tracker.out_of_order(), 1);
    }

    #[test]
    fn test_seed_only_fills_an_empty_position() {
        let mut tracker = PositionTracker::new(None);
        tracker.seed(Position(50));
        assert_eq!(tracker.current(), Some(Position(50)));
        assert_eq!(tracker.delivered(), 0);

        tracker.seed(Position(10));
        tracker.seed(Position(90));
        assert_eq!(tracker.current(), Some(Position(50)));
    }

    #[test]
    fn test_closure_and_vec_sinks() {
        let mut seen = Vec::new();
        let mut sink = |e: ChangeEvent| -> Result<()> {
            seen.push(e.ts());
            Ok(())
        };
        sink.deliver(event(1)).unwrap();
        assert_eq!(seen, vec![Position(1)]);

        let mut events: Vec<ChangeEvent> = Vec::new();
        events.deliver(event(2)).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_channel_sink_disconnected() {
        let (mut sender, receiver) = crossbeam_channel::bounded::<ChangeEvent>(1);
        sender.deliver(event(1)).unwrap();
        assert_eq!(receiver.recv().unwrap().ts(), Position(1));

        drop(receiver);
        assert!(matches!(sender.deliver(event(2)), Err(TailError::Sink(_))));
    }

    #[test]
    fn test_stop_handle_is_shared() {
        let stop = StopHandle::new();
        let clone = stop.clone();
        assert!(!clone.is_stopped());
        stop.stop();
        assert!(clone.is_stopped());
    }
}
