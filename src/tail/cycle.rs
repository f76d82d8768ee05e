//! One bounded tail read.

use super::{EventSink, PositionTracker};
use crate::error::{ReadError, Result};
use crate::filter::QueryFilter;
use crate::source::{CursorStep, Session, TailCursor};
use crate::types::ChangeEvent;
use std::time::Duration;

/// How a tail cycle ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Delivered `n` events, then the read went quiet.
    GotEvents(usize),
    /// The bounded wait elapsed with no new events.
    Idle,
    /// The source closed the stream for good.
    Exhausted(String),
    /// Transport or topology failure; the session must be replaced.
    ConnectionLost(ReadError),
}

impl StreamOutcome {
    fn from_read_error(err: ReadError) -> Self {
        if err.is_end_of_stream() {
            StreamOutcome::Exhausted(err.to_string())
        } else {
            StreamOutcome::ConnectionLost(err)
        }
    }
}

/// Run one tailable read against `session`.
///
/// Drains every available entry in log order, delivering each to `sink`
/// and then advancing `tracker`. A cursor opened from now seeds an empty
/// `tracker` with the log head it skipped, so a later reconnect resumes
/// after that head instead of from now again. Returns once the cursor
/// waits out `idle_timeout` or fails. Events delivered before a failure
/// stay delivered and keep their position.
///
/// # Errors
///
/// An entry without a valid `ts` and a failing sink are fatal and returned
/// as errors. Read failures are not errors; they are classified into
/// [`StreamOutcome::ConnectionLost`] or [`StreamOutcome::Exhausted`].
pub fn tail_cycle<S, K>(
    session: &mut S,
    filter: &QueryFilter,
    idle_timeout: Duration,
    tracker: &mut PositionTracker,
    sink: &mut K,
) -> Result<StreamOutcome>
where
    S: Session,
    K: EventSink + ?Sized,
{
    let mut cursor = match session.open_tail(filter, idle_timeout) {
        Ok(cursor) => cursor,
        Err(err) => return Ok(StreamOutcome::from_read_error(err)),
    };
    if let Some(head) = cursor.start_position() {
        tracker.seed(head);
    }

    let mut delivered = 0usize;
    loop {
        let doc = match cursor.next_step() {
            Ok(CursorStep::Entry(doc)) => doc,
            Ok(CursorStep::TimedOut) => {
                cursor.close();
                return Ok(match delivered {
                    0 => StreamOutcome::Idle,
                    n => StreamOutcome::GotEvents(n),
                });
            }
            Err(err) => {
                cursor.close();
                return Ok(StreamOutcome::from_read_error(err));
            }
        };

        let event = match ChangeEvent::decode(doc) {
            Ok(event) => event,
            Err(err) => {
                cursor.close();
                return Err(err);
            }
        };

        let ts = event.ts();
        tracing::trace!(%ts, ns = event.namespace().unwrap_or_default(), "delivering event");
        if let Err(err) = sink.deliver(event) {
            cursor.close();
            return Err(err);
        }
        tracker.advance(ts);
        delivered += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TailError;
    use crate::filter::NamespaceFilter;
    use crate::types::{Document, Position};
    use std::collections::VecDeque;

    /// Cursor that replays a fixed script, then times out.
    struct ScriptCursor<'a> {
        steps: &'a mut VecDeque<std::result::Result<CursorStep, ReadError>>,
        head: Option<Position>,
    }

    impl TailCursor for ScriptCursor<'_> {
        fn next_step(&mut self) -> std::result::Result<CursorStep, ReadError> {
            self.steps.pop_front().unwrap_or(Ok(CursorStep::TimedOut))
        }

        fn start_position(&self) -> Option<Position> {
            self.head
        }
    }

    #[derive(Default)]
    struct ScriptSession {
        steps: VecDeque<std::result::Result<CursorStep, ReadError>>,
        open_error: Option<ReadError>,
        head: Option<Position>,
        filters: Vec<QueryFilter>,
    }

    impl Session for ScriptSession {
        type Cursor<'a> = ScriptCursor<'a>
        where
            Self: 'a;

        fn open_tail(
            &mut self,
            filter: &QueryFilter,
            _idle_timeout: Duration,
        ) -> std::result::Result<ScriptCursor<'_>, ReadError> {
            self.filters.push(filter.clone());
            if let Some(err) = self.open_error.take() {
                return Err(err);
            }
            Ok(ScriptCursor {
                steps: &mut self.steps,
                head: self.head,
            })
        }

        fn member_name(&self) -> &str {
            "script"
        }
    }

    fn entry(ts: u64) -> std::result::Result<CursorStep, ReadError> {
        Ok(CursorStep::Entry(
            Document::new().with("ts", Position(ts)).with("ns", "app.users"),
        ))
    }

    fn run(session: &mut ScriptSession, tracker: &mut PositionTracker) -> (Result<StreamOutcome>, Vec<u64>) {
        let filter = QueryFilter::build(tracker.current(), &NamespaceFilter::All);
        let mut events: Vec<ChangeEvent> = Vec::new();
        let outcome = tail_cycle(session, &filter, Duration::from_millis(1), tracker, &mut events);
        (outcome, events.iter().map(|e| e.ts().packed()).collect())
    }

    #[test]
    fn test_drains_in_order_and_advances() {
        let mut session = ScriptSession {
            steps: VecDeque::from(vec![entry(100), entry(105), entry(110)]),
            ..Default::default()
        };
        let mut tracker = PositionTracker::new(Some(Position::MIN));

        let (outcome, seen) = run(&mut session, &mut tracker);
        assert_eq!(outcome.unwrap(), StreamOutcome::GotEvents(3));
        assert_eq!(seen, vec![100, 105, 110]);
        assert_eq!(tracker.current(), Some(Position(110)));
        assert_eq!(session.filters[0].position, Some(Position::MIN));
    }

    #[test]
    fn test_idle() {
        let mut session = ScriptSession::default();
        let mut tracker = PositionTracker::new(Some(Position(7)));

        let (outcome, seen) = run(&mut session, &mut tracker);
        assert_eq!(outcome.unwrap(), StreamOutcome::Idle);
        assert!(seen.is_empty());
        assert_eq!(tracker.current(), Some(Position(7)));
    }

    #[test]
    fn test_idle_from_now_keeps_the_skipped_head() {
        let mut session = ScriptSession {
            head: Some(Position(120)),
            ..Default::default()
        };
        let mut tracker = PositionTracker::new(None);

        let (outcome, seen) = run(&mut session, &mut tracker);
        assert_eq!(outcome.unwrap(), StreamOutcome::Idle);
        assert!(seen.is_empty());
        assert_eq!(tracker.current(), Some(Position(120)));
        assert_eq!(tracker.delivered(), 0);

        // the next cycle resumes after the head rather than from now
        session.head = None;
        session.steps.push_back(entry(130));
        let (outcome, seen) = run(&mut session, &mut tracker);
        assert_eq!(outcome.unwrap(), StreamOutcome::GotEvents(1));
        assert_eq!(seen, vec![130]);
        assert_eq!(session.filters[1].position, Some(Position(120)));
    }

    #[test]
    fn test_missing_ts_is_fatal() {
        let mut session = ScriptSession {
            steps: VecDeque::from(vec![
                entry(100),
                Ok(CursorStep::Entry(Document::new().with("ns", "app.users"))),
                entry(110),
            ]),
            ..Default::default()
        };
        let mut tracker = PositionTracker::new(None);

        let (outcome, seen) = run(&mut session, &mut tracker);
        assert!(matches!(outcome, Err(TailError::ContractViolation { .. })));
        assert_eq!(seen, vec![100]);
        assert_eq!(tracker.current(), Some(Position(100)));
    }

    #[test]
    fn test_read_error_after_events_is_connection_lost() {
        let mut session = ScriptSession {
            steps: VecDeque::from(vec![
                entry(100),
                Err(ReadError::NotPrimary("a".into())),
                entry(105),
            ]),
            ..Default::default()
        };
        let mut tracker = PositionTracker::new(None);

        let (outcome, seen) = run(&mut session, &mut tracker);
        assert_eq!(
            outcome.unwrap(),
            StreamOutcome::ConnectionLost(ReadError::NotPrimary("a".into()))
        );
        assert_eq!(seen, vec![100]);
        assert_eq!(tracker.current(), Some(Position(100)));
    }

    #[test]
    fn test_stream_closed_is_exhausted() {
        let mut session = ScriptSession {
            steps: VecDeque::from(vec![Err(ReadError::StreamClosed("sealed".into()))]),
            ..Default::default()
        };
        let mut tracker = PositionTracker::new(None);

        let (outcome, _) = run(&mut session, &mut tracker);
        assert!(matches!(outcome.unwrap(), StreamOutcome::Exhausted(_)));
    }

    #[test]
    fn test_open_failure_is_connection_lost() {
        let mut session = ScriptSession {
            open_error: Some(ReadError::Disconnected("gone".into())),
            ..Default::default()
        };
        let mut tracker = PositionTracker::new(None);

        let (outcome, _) = run(&mut session, &mut tracker);
        assert!(matches!(outcome.unwrap(), StreamOutcome::ConnectionLost(_)));
    }

    #[test]
    fn test_sink_failure_does_not_advance() {
        let mut session = ScriptSession {
            steps: VecDeque::from(vec![entry(100), entry(105)]),
            ..Default::default()
        };
        let mut tracker = PositionTracker::new(None);
        let filter = QueryFilter::build(None, &NamespaceFilter::All);

        let mut calls = 0;
        let mut sink = |_e: ChangeEvent| -> Result<()> {
            calls += 1;
            if calls == 2 {
                return Err(TailError::Sink("full".into()));
            }
            Ok(())
        };

        let outcome = tail_cycle(&mut session, &filter, Duration::from_millis(1), &mut tracker, &mut sink);
        assert!(matches!(outcome, Err(TailError::Sink(_))));
        assert_eq!(tracker.current(), Some(Position(100)));
    }
}
