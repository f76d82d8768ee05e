//! File-backed replicated operation log.
//!
//! Store side:
//! - [`OplogFile`]: append-only entry file with per-entry CRC
//! - [`ReplicaMember`]: member directory (descriptor + log + writer lock)
//!
//! Client side:
//! - [`ReplicaSetConnector`]: picks a member by read preference
//! - [`ReplicaSession`] / [`OplogCursor`]: bounded-wait tailable reads

mod log;
mod member;
mod replica;

pub use log::{LogEntry, OplogFile, OplogReader};
pub use member::{MemberInfo, MemberRole, ReplicaMember, DESCRIPTOR_FILE, LOG_FILE};
pub use replica::{OplogCursor, ReplicaSession, ReplicaSetConnector};
