//! Run configuration.

use crate::error::{Result, TailError};
use crate::filter::NamespaceFilter;
use crate::types::{Position, ReadPreference, StartPosition};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Scheme prefix accepted on endpoint strings.
const ENDPOINT_SCHEME: &str = "oplog://";

/// Username and password presented to every member.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A parsed endpoint: the seed list of replica-set member directories.
///
/// Accepted forms:
/// - `/data/rs/a,/data/rs/b`
/// - `oplog:///data/rs/a,/data/rs/b`
/// - `oplog://user:password@/data/rs/a,/data/rs/b`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub members: Vec<PathBuf>,
    pub credentials: Option<Credentials>,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TailError::Config("endpoint is required".into()));
        }

        let (credentials, hosts) = match raw.strip_prefix(ENDPOINT_SCHEME) {
            Some(rest) => match rest.split_once('@') {
                Some((userinfo, hosts)) => (Some(parse_userinfo(userinfo)?), hosts),
                None => (None, rest),
            },
            None => (None, raw),
        };

        let members: Vec<PathBuf> = hosts
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();

        if members.is_empty() {
            return Err(TailError::Config(format!("endpoint {raw:?} names no members")));
        }

        Ok(Self { members, credentials })
    }
}

fn parse_userinfo(userinfo: &str) -> Result<Credentials> {
    match userinfo.split_once(':') {
        Some((user, password)) if !user.is_empty() => Ok(Credentials {
            username: user.to_string(),
            password: password.to_string(),
        }),
        _ => Err(TailError::Config("endpoint credentials must be user:password".into())),
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<String> = self.members.iter().map(|p| p.display().to_string()).collect();
        match &self.credentials {
            Some(c) => write!(f, "{ENDPOINT_SCHEME}{}:***@{}", c.username, members.join(",")),
            None => write!(f, "{}", members.join(",")),
        }
    }
}

/// Delay between failed connect attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay after the first failure.
    /// Default: 100ms
    pub initial_delay: Duration,

    /// Upper bound for the delay.
    /// Default: 5s
    pub max_delay: Duration,

    /// Growth factor per consecutive failure.
    /// Default: 2.0
    pub multiplier: f64,

    /// Give up after this many consecutive failures (None = never).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Retry at once, forever.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1.0).powi(failures.saturating_sub(1).min(32) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::try_from_secs_f64(delay)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        matches!(self.max_attempts, Some(max) if failures >= max)
    }
}

/// Immutable configuration for one tail run.
#[derive(Clone, Debug)]
pub struct TailConfig {
    /// Raw endpoint string.
    pub endpoint: String,

    /// Namespaces to observe.
    pub namespace_filter: NamespaceFilter,

    /// Where to resume (None = from now).
    pub start_position: Option<StartPosition>,

    /// Stop cleanly the first time a read waits out its timeout with no data.
    pub fast_stop: bool,

    /// Bounded wait of one tailable read.
    /// Default: 1s
    pub idle_timeout: Duration,

    /// Default: StrictPrimary
    pub read_preference: ReadPreference,

    pub reconnect: ReconnectPolicy,
}

impl TailConfig {
    /// Default bounded wait of a tailable read.
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace_filter: NamespaceFilter::All,
            start_position: None,
            fast_stop: false,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
            read_preference: ReadPreference::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_namespace_filter(mut self, filter: NamespaceFilter) -> Self {
        self.namespace_filter = filter;
        self
    }

    pub fn with_start_position(mut self, start: impl Into<StartPosition>) -> Self {
        self.start_position = Some(start.into());
        self
    }

    pub fn with_fast_stop(mut self, fast_stop: bool) -> Self {
        self.fast_stop = fast_stop;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_read_preference(mut self, preference: ReadPreference) -> Self {
        self.read_preference = preference;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Starting resume position, if any.
    pub fn initial_position(&self) -> Option<Position> {
        self.start_position.map(|s| s.position())
    }

    /// Check the configuration and parse the endpoint.
    pub fn validate(&self) -> Result<Endpoint> {
        let endpoint = Endpoint::parse(&self.endpoint)?;

        if let NamespaceFilter::Single(name) = &self.namespace_filter {
            crate::filter::validate_namespace(name)?;
        }
        if let NamespaceFilter::Set(names) = &self.namespace_filter {
            if names.is_empty() {
                return Err(TailError::Config("namespace set is empty".into()));
            }
            for name in names {
                crate::filter::validate_namespace(name)?;
            }
        }

        if self.idle_timeout.is_zero() {
            return Err(TailError::Config("idle timeout must be greater than zero".into()));
        }
        if self.reconnect.initial_delay > self.reconnect.max_delay {
            return Err(TailError::Config(
                "reconnect initial delay exceeds max delay".into(),
            ));
        }

        Ok(endpoint)
    }
}
