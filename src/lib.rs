//! # Oplog Tail
//!
//! A change-data-capture client that tails the operation log of a
//! replica set and delivers every operation after a start position, in log
//! order, at least once.
//!
//! ## Core Concepts
//!
//! - **Position**: packed `(seconds, ordinal)` timestamp; the stream resumes
//!   strictly after the last delivered one
//! - **Tail cycle**: one bounded-wait read that drains what is available and
//!   reports whether it got events, went idle, or lost the connection
//! - **Tail loop**: repeats cycles, reconnecting to the current primary after
//!   failover, until stopped or hit by a fatal error
//! - **Replica set**: file-backed members, each with a descriptor and an
//!   append-only operation log
//!
//! ## Example
//!
//! ```ignore
//! use oplog_tail::{ChangeEvent, Position, ReplicaSetConnector, TailConfig, TailLoop};
//!
//! let config = TailConfig::new("/data/rs/a,/data/rs/b")
//!     .with_start_position(Position::new(1_700_000_000, 0))
//!     .with_fast_stop(true);
//!
//! let mut tail = TailLoop::new(config, ReplicaSetConnector::new())?;
//! tail.run(&mut |event: ChangeEvent| -> oplog_tail::Result<()> {
//!     println!("new op log: {event}");
//!     Ok(())
//! })?;
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod oplog;
pub mod source;
pub mod tail;
pub mod types;

// Re-exports
pub use config::{Credentials, Endpoint, ReconnectPolicy, TailConfig};
pub use error::{ConnectError, ReadError, Result, TailError};
pub use filter::{NamespaceFilter, NamespacePredicate, QueryFilter};
pub use oplog::{
    LogEntry, MemberInfo, MemberRole, OplogCursor, OplogFile, OplogReader, ReplicaMember,
    ReplicaSession, ReplicaSetConnector, DESCRIPTOR_FILE, LOG_FILE,
};
pub use source::{Connector, CursorStep, Session, TailCursor};
pub use tail::{
    tail_cycle, EventSink, LoopState, PositionTracker, StopHandle, StreamOutcome, TailHandle,
    TailLoop, TailStats,
};
pub use types::*;
