use clap::{Args, Parser, Subcommand};
use graphsync::{
    MemorySession,
    config::{ConfigError, load_config},
    core::{
        ID_FIELD,
        batch::BatchReport,
        obs::{EventReport, metrics_report},
        snapshot::SnapshotReport,
        store::{FetchRequest, ObjectSnapshot, SortDescriptor},
    },
    open_memory_session,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error as ThisError;
use tracing::info;

///
/// Cli
///

#[derive(Debug, Parser)]
#[command(name = "graphsync")]
#[command(about = "Apply remote record payloads to an in-memory object store")]
pub struct Cli {
    /// Schema and mapper configuration (TOML)
    #[arg(short, long, value_name = "PATH", env = "GRAPHSYNC_SCHEMA")]
    pub schema: PathBuf,

    /// Entity types to print after applying, sorted by id
    #[arg(long, value_name = "ENTITY")]
    pub dump: Vec<String>,

    /// Include the metrics report in the output
    #[arg(long)]
    pub metrics: bool,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply a combined `{ "entities": { ... } }` snapshot
    Snapshot(SnapshotArgs),

    /// Apply a single-type `{ "data": [ ... ] }` payload
    Batch(BatchArgs),
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Payload file (JSON)
    #[arg(short, long, value_name = "PATH")]
    pub data: PathBuf,

    /// Processing order; defaults to `mapper.snapshot_order`
    #[arg(short, long, value_name = "ENTITY", value_delimiter = ',')]
    pub types: Vec<String>,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Payload file (JSON)
    #[arg(short, long, value_name = "PATH")]
    pub data: PathBuf,

    #[arg(short, long)]
    pub entity: String,

    /// Delete known objects the payload no longer lists
    #[arg(long)]
    pub delete_missing: bool,
}

///
/// CliError
///

#[derive(Debug, ThisError)]
pub enum CliError {
    #[error("failed to read payload '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("payload '{}' is not JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no snapshot types given and the configuration declares no snapshot order")]
    NoSnapshotTypes,

    #[error(transparent)]
    Graphsync(#[from] graphsync::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Graphsync(err.into())
    }
}

impl From<graphsync::core::error::InternalError> for CliError {
    fn from(err: graphsync::core::error::InternalError) -> Self {
        Self::Graphsync(err.into())
    }
}

///
/// Output
///

#[derive(Debug, Serialize)]
pub struct Output {
    pub report: ApplyReport,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dump: Vec<ObjectSnapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EventReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyReport {
    Snapshot(SnapshotReport),
    /// `None` when the payload was not a `data` array.
    Batch(Option<BatchReport>),
}

/// Load the configuration, apply the payload, and collect the output.
pub fn run(cli: &Cli) -> Result<Output, CliError> {
    let config = load_config(&cli.schema)?;
    let mut session = open_memory_session(&config)?;

    let report = match &cli.command {
        Command::Snapshot(args) => {
            let payload = read_payload(&args.data)?;
            let types = if args.types.is_empty() {
                config.snapshot_order()
            } else {
                args.types.as_slice()
            };
            if types.is_empty() {
                return Err(CliError::NoSnapshotTypes);
            }

            ApplyReport::Snapshot(session.apply_snapshot(&payload, types)?)
        }
        Command::Batch(args) => {
            let payload = read_payload(&args.data)?;

            ApplyReport::Batch(session.apply_data(&args.entity, &payload, args.delete_missing)?)
        }
    };

    let dump = dump(&session, &cli.dump)?;
    info!(dumped = dump.len(), "payload applied");

    Ok(Output {
        report,
        dump,
        metrics: cli.metrics.then(|| metrics_report(None)),
    })
}

fn read_payload(path: &Path) -> Result<JsonValue, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn dump(session: &MemorySession, entities: &[String]) -> Result<Vec<ObjectSnapshot>, CliError> {
    let view = session.store().view();
    let mut objects = Vec::new();

    for entity in entities {
        let request = FetchRequest::new(entity).sort_by(SortDescriptor::asc(ID_FIELD));
        objects.extend(
            view.fetch(&request)?
                .into_iter()
                .filter_map(|key| view.snapshot(key)),
        );
    }

    Ok(objects)
}

///
/// TESTS
///
