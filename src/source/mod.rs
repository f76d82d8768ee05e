//! Seams between the tail client and a log store.
//!
//! - [`Connector`] establishes a session against an endpoint
//! - [`Session`] opens tailable cursors over the replication log
//! - [`TailCursor`] is one bounded-wait streaming read
//!
//! The file-backed replica set in [`crate::oplog`] implements all three;
//! tests substitute scripted implementations.

use crate::config::Endpoint;
use crate::error::{ConnectError, ReadError};
use crate::filter::QueryFilter;
use crate::types::{Document, Position, ReadPreference};
use std::time::Duration;

/// Result of one cursor step.
#[derive(Clone, Debug, PartialEq)]
pub enum CursorStep {
    /// The next matching entry, in log order.
    Entry(Document),
    /// The bounded wait elapsed without a new matching entry.
    TimedOut,
}

/// A tailable, awaiting-data read.
pub trait TailCursor {
    /// Block until the next matching entry, the idle timeout, or a failure.
    fn next_step(&mut self) -> Result<CursorStep, ReadError>;

    /// Release the cursor. Dropping has the same effect.
    fn close(&mut self) {}

    /// For a cursor opened without a lower bound: the newest timestamp
    /// already in the log when it opened. Resuming after it loses nothing
    /// the cursor could have returned.
    fn start_position(&self) -> Option<Position> {
        None
    }
}

/// A live session bound to the replication log of one member.
pub trait Session {
    type Cursor<'a>: TailCursor
    where
        Self: 'a;

    /// Open a tailable read with the given filter, waiting up to
    /// `idle_timeout` for new data on each step.
    fn open_tail(
        &mut self,
        filter: &QueryFilter,
        idle_timeout: Duration,
    ) -> Result<Self::Cursor<'_>, ReadError>;

    /// Human-readable name of the member serving the session.
    fn member_name(&self) -> &str;
}

/// Connection provider.
pub trait Connector {
    type Session: Session;

    fn connect(
        &self,
        endpoint: &Endpoint,
        read_preference: ReadPreference,
    ) -> Result<Self::Session, ConnectError>;
}

impl<C: Connector + ?Sized> Connector for &C {
    type Session = C::Session;

    fn connect(
        &self,
        endpoint: &Endpoint,
        read_preference: ReadPreference,
    ) -> Result<Self::Session, ConnectError> {
        (**self).connect(endpoint, read_preference)
    }
}
