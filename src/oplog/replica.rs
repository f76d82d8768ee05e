//! Client-side read path over a file-backed replica set.

use super::log::{LogEntry, OplogReader};
use super::member::{MemberInfo, MemberRole, LOG_FILE};
use crate::config::Endpoint;
use crate::error::{ConnectError, ReadError};
use crate::filter::QueryFilter;
use crate::source::{Connector, CursorStep, Session, TailCursor};
use crate::types::{Position, ReadPreference, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Connects to the member selected by the read preference.
#[derive(Clone, Debug)]
pub struct ReplicaSetConnector {
    /// How often a waiting cursor re-checks the log and the member descriptor.
    /// Default: 10ms
    pub poll_interval: Duration,
}

impl Default for ReplicaSetConnector {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl ReplicaSetConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Connector for ReplicaSetConnector {
    type Session = ReplicaSession;

    fn connect(
        &self,
        endpoint: &Endpoint,
        read_preference: ReadPreference,
    ) -> Result<ReplicaSession, ConnectError> {
        let mut reachable: Vec<(&PathBuf, MemberInfo)> = Vec::new();
        let mut last_error = None;
        let mut auth_failure = None;

        for dir in &endpoint.members {
            let info = match MemberInfo::load(dir) {
                Ok(info) => info,
                Err(e) => {
                    tracing::debug!(member = %dir.display(), error = %e, "member unreachable");
                    last_error = Some(format!("{}: {e}", dir.display()));
                    continue;
                }
            };

            if info.requires_auth() {
                let user = match &endpoint.credentials {
                    Some(c) if info.verify_password(&c.username, &c.password) => None,
                    Some(c) => Some(c.username.clone()),
                    None => Some(String::new()),
                };
                if let Some(user) = user {
                    tracing::debug!(member = %info.name, %user, "member rejected credentials");
                    auth_failure = Some(ConnectError::AuthenticationFailed { user });
                    continue;
                }
            }

            reachable.push((dir, info));
        }

        if reachable.is_empty() {
            return Err(auth_failure.unwrap_or_else(|| {
                ConnectError::Unreachable(
                    last_error.unwrap_or_else(|| "no members configured".to_string()),
                )
            }));
        }

        let with_role = |role: MemberRole| reachable.iter().find(|(_, info)| info.role == role);
        let members = endpoint.members.len();
        let selected = match read_preference {
            ReadPreference::StrictPrimary => {
                with_role(MemberRole::Primary).ok_or(ConnectError::NoPrimary { members })
            }
            ReadPreference::SecondaryPreferred => with_role(MemberRole::Secondary)
                .or_else(|| with_role(MemberRole::Primary))
                .ok_or(ConnectError::NoEligibleMember { members }),
        };
        // a member that would have served but refused us explains the miss
        let (dir, info) = selected.map_err(|e| auth_failure.unwrap_or(e))?;

        let log_path = dir.join(LOG_FILE);
        if let Err(e) = OplogReader::open(&log_path) {
            return Err(ConnectError::InvalidMember {
                path: log_path.display().to_string(),
                reason: e.to_string(),
            });
        }

        tracing::info!(
            member = %info.name,
            role = ?info.role,
            read_preference = %read_preference,
            "connected to replica member"
        );

        Ok(ReplicaSession {
            dir: dir.to_path_buf(),
            name: info.name.clone(),
            read_preference,
            poll_interval: self.poll_interval,
            hint: None,
        })
    }
}

/// Where the previous cursor of a session stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ResumeHint {
    position: Option<Position>,
    offset: u64,
}

/// Session bound to one member's operation log.
pub struct ReplicaSession {
    dir: PathBuf,
    name: String,
    read_preference: ReadPreference,
    poll_interval: Duration,
    hint: Option<ResumeHint>,
}

impl ReplicaSession {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn read_preference(&self) -> ReadPreference {
        self.read_preference
    }

    /// Fail when the member no longer serves this session's read preference.
    fn check_member(&self) -> Result<(), ReadError> {
        let info = MemberInfo::load(&self.dir)
            .map_err(|e| ReadError::Disconnected(format!("{}: {e}", self.name)))?;

        match (self.read_preference, info.role) {
            (_, MemberRole::Down) => Err(ReadError::Disconnected(format!("{} is down", self.name))),
            (ReadPreference::StrictPrimary, MemberRole::Secondary) => {
                Err(ReadError::NotPrimary(self.name.clone()))
            }
            _ => Ok(()),
        }
    }
}

impl Session for ReplicaSession {
    type Cursor<'a> = OplogCursor<'a>
    where
        Self: 'a;

    fn open_tail(
        &mut self,
        filter: &QueryFilter,
        idle_timeout: Duration,
    ) -> Result<OplogCursor<'_>, ReadError> {
        self.check_member()?;

        let mut reader = OplogReader::open(self.dir.join(LOG_FILE))?;
        let len = reader.len()?;

        let mut head = None;
        match self.hint {
            Some(hint) if hint.position == filter.position && hint.offset <= len => {
                reader.set_offset(hint.offset);
            }
            _ if filter.position.is_none() => head = Some(reader.seek_to_end()?),
            _ => {}
        }

        tracing::debug!(member = %self.name, %filter, offset = reader.offset(), ?head, "opened tailable cursor");

        Ok(OplogCursor {
            high_water: filter.position.or(head),
            head,
            filter: filter.clone(),
            idle_timeout,
            deadline: Instant::now() + idle_timeout,
            reader,
            session: self,
        })
    }

    fn member_name(&self) -> &str {
        &self.name
    }
}

/// Tailable, awaiting-data cursor over one member's log.
pub struct OplogCursor<'a> {
    session: &'a mut ReplicaSession,
    reader: OplogReader,
    filter: QueryFilter,
    idle_timeout: Duration,
    deadline: Instant,
    /// Highest timestamp handed out, seeded with the filter's lower bound.
    high_water: Option<Position>,
    /// Log head skipped when opened from now.
    head: Option<Position>,
}

impl OplogCursor<'_> {
    fn save_hint(&mut self) {
        self.session.hint = Some(ResumeHint {
            position: self.high_water,
            offset: self.reader.offset(),
        });
    }
}

impl TailCursor for OplogCursor<'_> {
    fn next_step(&mut self) -> Result<CursorStep, ReadError> {
        loop {
            match self.reader.read_next()? {
                Some(LogEntry::Op(doc)) => {
                    if !self.filter.matches(&doc) {
                        continue;
                    }
                    if let Some(Value::Timestamp(ts)) = doc.get("ts") {
                        self.high_water = self.high_water.max(Some(*ts));
                    }
                    self.deadline = Instant::now() + self.idle_timeout;
                    self.save_hint();
                    return Ok(CursorStep::Entry(doc));
                }
                Some(LogEntry::Seal) => {
                    return Err(ReadError::StreamClosed(format!(
                        "operation log of {} is sealed",
                        self.session.name
                    )));
                }
                None => {}
            }

            if self.reader.len()? < self.reader.offset() {
                return Err(ReadError::CursorInvalidated(format!(
                    "operation log of {} shrank below offset {}",
                    self.session.name,
                    self.reader.offset()
                )));
            }
            self.session.check_member()?;

            let now = Instant::now();
            if now >= self.deadline {
                self.deadline = now + self.idle_timeout;
                self.save_hint();
                return Ok(CursorStep::TimedOut);
            }
            std::thread::sleep(self.session.poll_interval.min(self.deadline - now));
        }
    }

    fn start_position(&self) -> Option<Position> {
        self.head
    }

    fn close(&mut self) {
        self.save_hint();
        tracing::trace!(member = %self.session.name, offset = self.reader.offset(), "closed cursor");
    }
}
