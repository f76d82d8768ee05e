//! The reconnecting tail loop.

use super::cycle::{tail_cycle, StreamOutcome};
use super::{EventSink, PositionTracker, StopHandle, TailStats};
use crate::config::{Endpoint, TailConfig};
use crate::error::{Result, TailError};
use crate::filter::QueryFilter;
use crate::source::{Connector, Session};
use crate::types::Position;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep while backing off; the stop handle is
/// re-checked at this granularity.
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// State of a [`TailLoop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// Establishing a session (initial state).
    Connecting,
    /// Issuing bounded reads.
    Streaming,
    /// The last read waited out its timeout with no data.
    Idling,
    /// Releasing the session before returning.
    Stopping,
    /// Done; `run` returns.
    Terminated,
}

/// Repeats tail cycles, reconnecting on connection loss and resuming from
/// the last delivered position.
///
/// Owns the resume position for the lifetime of the stream. A loop that has
/// terminated stays terminated; build a new one (seeded from
/// [`position`](Self::position)) to resume.
pub struct TailLoop<C: Connector> {
    config: TailConfig,
    endpoint: Endpoint,
    connector: C,
    state: LoopState,
    tracker: PositionTracker,
    stats: TailStats,
    stop: StopHandle,
}

impl<C: Connector> TailLoop<C> {
    /// Validate `config` and prepare a loop in the `Connecting` state.
    pub fn new(config: TailConfig, connector: C) -> Result<Self> {
        let endpoint = config.validate()?;
        let tracker = PositionTracker::new(config.initial_position());

        Ok(Self {
            config,
            endpoint,
            connector,
            state: LoopState::Connecting,
            tracker,
            stats: TailStats::default(),
            stop: StopHandle::new(),
        })
    }

    /// Use an externally owned stop handle.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Position of the most recently delivered event (or the start position).
    pub fn position(&self) -> Option<Position> {
        self.tracker.current()
    }

    pub fn stats(&self) -> TailStats {
        TailStats {
            events_delivered: self.tracker.delivered(),
            out_of_order: self.tracker.out_of_order(),
            position: self.tracker.current(),
            ..self.stats.clone()
        }
    }

    /// Drive the loop until a clean stop or a fatal error.
    ///
    /// Returns normally only through fast-stop on an idle read or the stop
    /// handle. Connect failures and connection losses are retried; an
    /// exhausted stream, a contract violation, a sink failure, or an
    /// exhausted reconnect budget end the run with an error. Losses that
    /// repeat without a delivered event or an idle read back off and spend
    /// the reconnect budget like connect failures do.
    pub fn run<K: EventSink + ?Sized>(&mut self, sink: &mut K) -> Result<TailStats> {
        let mut session: Option<C::Session> = None;
        let mut failures: u32 = 0;
        // connections lost in a row without delivering anything
        let mut stalled: u32 = 0;

        loop {
            let next = match self.state {
                LoopState::Connecting => {
                    if self.stop.is_stopped() {
                        LoopState::Stopping
                    } else {
                        match self.connector.connect(&self.endpoint, self.config.read_preference) {
                            Ok(connected) => {
                                failures = 0;
                                self.stats.connects += 1;
                                tracing::info!(
                                    member = connected.member_name(),
                                    position = ?self.tracker.current(),
                                    "tailing operation log"
                                );
                                session = Some(connected);
                                LoopState::Streaming
                            }
                            Err(err) => {
                                failures += 1;
                                self.stats.connect_failures += 1;
                                if self.config.reconnect.exhausted(failures) {
                                    return Err(self.fail(err.into()));
                                }
                                let delay = self.config.reconnect.delay_for(failures);
                                tracing::warn!(error = %err, attempt = failures, ?delay, "connect failed, retrying");
                                self.backoff(delay);
                                LoopState::Connecting
                            }
                        }
                    }
                }
                LoopState::Streaming => {
                    let Some(active) = session.as_mut() else {
                        self.state = LoopState::Connecting;
                        continue;
                    };

                    let filter =
                        QueryFilter::build(self.tracker.current(), &self.config.namespace_filter);
                    self.stats.cycles += 1;
                    let delivered_before = self.tracker.delivered();

                    let outcome = match tail_cycle(
                        active,
                        &filter,
                        self.config.idle_timeout,
                        &mut self.tracker,
                        sink,
                    ) {
                        Ok(outcome) => outcome,
                        Err(err) => return Err(self.fail(err)),
                    };

                    match outcome {
                        StreamOutcome::GotEvents(n) => {
                            stalled = 0;
                            tracing::debug!(events = n, position = ?self.tracker.current(), "cycle delivered events");
                            if self.stop.is_stopped() {
                                LoopState::Stopping
                            } else {
                                LoopState::Streaming
                            }
                        }
                        StreamOutcome::Idle => {
                            stalled = 0;
                            self.stats.idle_cycles += 1;
                            tracing::debug!(%filter, "cycle idle");
                            LoopState::Idling
                        }
                        StreamOutcome::Exhausted(reason) => {
                            return Err(self.fail(TailError::Exhausted(reason)));
                        }
                        StreamOutcome::ConnectionLost(err) => {
                            self.stats.connection_losses += 1;
                            session = None;
                            if self.tracker.delivered() > delivered_before {
                                stalled = 0;
                            }
                            stalled += 1;
                            if self.config.reconnect.exhausted(stalled) {
                                return Err(self.fail(TailError::Read(err)));
                            }
                            tracing::warn!(
                                error = %err,
                                position = ?self.tracker.current(),
                                attempt = stalled,
                                "connection lost, reconnecting"
                            );
                            // first loss reconnects at once; repeats back off
                            if stalled > 1 {
                                self.backoff(self.config.reconnect.delay_for(stalled - 1));
                            }
                            LoopState::Connecting
                        }
                    }
                }
                LoopState::Idling => {
                    if self.config.fast_stop || self.stop.is_stopped() {
                        LoopState::Stopping
                    } else {
                        LoopState::Streaming
                    }
                }
                LoopState::Stopping => {
                    session = None;
                    tracing::info!(position = ?self.tracker.current(), "tail stopped");
                    LoopState::Terminated
                }
                LoopState::Terminated => return Ok(self.stats()),
            };
            self.state = next;
        }
    }

    fn fail(&mut self, err: TailError) -> TailError {
        self.state = LoopState::Terminated;
        tracing::error!(error = %err, position = ?self.tracker.current(), "tail terminated");
        err
    }

    /// Sleep for `delay`, waking early when stopped.
    fn backoff(&self, delay: Duration) {
        // a deadline past the clock's range waits for the stop handle alone
        let until = Instant::now().checked_add(delay);
        loop {
            let remaining = match until {
                Some(until) => until.saturating_duration_since(Instant::now()),
                None => BACKOFF_SLICE,
            };
            if remaining.is_zero() || self.stop.is_stopped() {
                return;
            }
            std::thread::sleep(remaining.min(BACKOFF_SLICE));
        }
    }
}
