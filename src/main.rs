//! oplog-tail - stream replica-set operations to stdout
//!
//! # Usage
//!
//! ```bash
//! # Everything from now on
//! oplog-tail --url /data/rs/a,/data/rs/b
//!
//! # One collection since a timestamp, stop once caught up
//! oplog-tail --url oplog://reader:pw@/data/rs/a --only app.users --since 1700000000 --fast-stop
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use oplog_tail::{
    ChangeEvent, NamespaceFilter, ReadPreference, ReplicaSetConnector, StartPosition, TailConfig,
    TailLoop,
};
use std::io::Write;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Stream replica-set operation log entries
#[derive(Parser, Debug)]
#[command(name = "oplog-tail")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Replica set endpoint: comma-separated member directories, optionally
    /// as oplog://user:password@/a,/b
    #[arg(long, env = "OPLOG_TAIL_URL")]
    url: String,

    /// Only deliver these namespaces (db.collection); repeatable or comma-separated
    #[arg(long, value_delimiter = ',')]
    only: Vec<String>,

    /// Start after this timestamp (seconds); omit to start from now
    #[arg(long)]
    since: Option<u32>,

    /// Ordinal within the --since second
    #[arg(long, requires = "since")]
    ordinal: Option<u32>,

    /// Exit once a read finds no new entries
    #[arg(long)]
    fast_stop: bool,

    /// Bounded wait per read, in milliseconds
    #[arg(long, default_value_t = 1000)]
    idle_timeout_ms: u64,

    /// primary or secondary-preferred
    #[arg(long, default_value = "primary")]
    read_preference: ReadPreference,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = build_config(&cli)?;
    let mut tail =
        TailLoop::new(config, ReplicaSetConnector::new()).context("invalid configuration")?;

    let format = cli.format;
    let mut stdout = std::io::stdout().lock();
    let mut sink = |event: ChangeEvent| -> oplog_tail::Result<()> {
        match format {
            Format::Text => writeln!(stdout, "new op log: {event}")?,
            Format::Json => writeln!(stdout, "{}", event.to_json())?,
        }
        stdout.flush()?;
        Ok(())
    };

    let stats = tail.run(&mut sink)?;
    tracing::info!(
        events = stats.events_delivered,
        cycles = stats.cycles,
        reconnects = stats.connection_losses,
        position = ?stats.position,
        "done"
    );
    Ok(())
}

fn build_config(cli: &Cli) -> Result<TailConfig> {
    if cli.idle_timeout_ms == 0 {
        bail!("--idle-timeout-ms must be greater than zero");
    }

    let mut config = TailConfig::new(cli.url.clone())
        .with_fast_stop(cli.fast_stop)
        .with_idle_timeout(Duration::from_millis(cli.idle_timeout_ms))
        .with_read_preference(cli.read_preference);

    if !cli.only.is_empty() {
        config = config.with_namespace_filter(NamespaceFilter::from_names(&cli.only)?);
    }

    match (cli.since, cli.ordinal) {
        (Some(seconds), ordinal) => {
            config = config.with_start_position(StartPosition::new(seconds, ordinal));
        }
        (None, Some(_)) => bail!("--ordinal requires --since"),
        (None, None) => {}
    }

    Ok(config)
}

/// Initialize the tracing subscriber; logs go to stderr so stdout carries only events
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    Ok(())
}
