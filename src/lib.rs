//! Hivelog: a coordination kernel for many agents sharing one workspace.
//!
//! There is no central scheduler. Agents register, exchange mail, reserve
//! files, report progress and checkpoint their work; every mutating call
//! appends one event to a durable, per-project ordered log and updates the
//! read-side projections in the same SQLite transaction.
//!
//! # Architecture
//!
//! ## Event log + projections
//!
//! - **Event log** (`events` table): append-only, gapless sequence per
//!   `project_key`, the single source of truth.
//! - **Projections** (agents, mailbox, reservations, checkpoints): derived
//!   by reducers in [`core::projections`]; [`core::projections::rebuild_projections`]
//!   replays them from sequence 0.
//!
//! ## The Thin Waist
//!
//! All state access routes through `DbBroker` for:
//! - Transactions (IMMEDIATE, commit on `Ok`, roll back on `Err`)
//! - Serialization (per-database in-process lock)
//! - Audit logging (`broker.events.jsonl`)
//!
//! ## Subsystems (Plugins)
//!
//! - `agents`: registry and activity
//! - `mail`: per-recipient read/ack mailbox with threads
//! - `reservations`: glob reservations with TTL and all-or-nothing grants
//! - `tasks`: bead lifecycle, milestone auto-checkpoints
//! - `checkpoint`: dual-write save and recovery
//! - `mandates`: decay-weighted voting on shared knowledge
//! - `patterns`: decay-weighted pattern maturity
//!
//! # Examples
//!
//! ```bash
//! hivelog agent register --name BlueLake --program opencode --model sonnet
//! hivelog reserve take --agent BlueLake --path 'src/auth/**' --reason "auth refactor"
//! hivelog mail send --from BlueLake --to GreenCastle --subject "auth is mine" --importance high
//! hivelog checkpoint load --epic E1 --bead B1 --agent BlueLake
//! ```
//!
//! Every command prints one JSON envelope on stdout.

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{Cli, Command, EventsCli};
use crate::core::error::HivelogError;
use crate::core::event_log::{self, EventFilter};
use crate::core::events::EVENT_TYPES;
use crate::core::store::Store;
use crate::core::{broker, projections, time};
use crate::plugins::{agents, checkpoint, mail, mandates, patterns, reservations, tasks};

use clap::Parser;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::PathBuf;

/// Parse the process arguments, run the command and print its envelope.
pub fn run() -> Result<(), HivelogError> {
    let cli = Cli::parse();
    let cmd = cli.command.name();
    let result = dispatch(cli)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&time::command_envelope(cmd, "ok", result))?
    );
    Ok(())
}

/// Run one command from explicit arguments (the first is the binary name)
/// and return its result payload.
pub fn run_args<I, T>(args: I) -> Result<JsonValue, HivelogError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::try_parse_from(args).map_err(|e| HivelogError::ValidationError(e.to_string()))?;
    dispatch(cli)
}

/// JSON envelope for a failed command.
pub fn error_envelope(err: &HivelogError) -> JsonValue {
    time::command_envelope(
        "error",
        "error",
        serde_json::json!({
            "kind": err.kind(),
            "message": err.to_string(),
            "retryable_after_fix": err.is_retryable_after_fix(),
        }),
    )
}

fn resolve_project(cli: &Cli) -> Result<(PathBuf, String), HivelogError> {
    let dir = match &cli.dir {
        Some(d) => d.clone(),
        None => std::env::current_dir()?,
    };
    let project_key = match &cli.project {
        Some(p) => p.clone(),
        None => fs::canonicalize(&dir)
            .unwrap_or_else(|_| dir.clone())
            .to_string_lossy()
            .to_string(),
    };
    Ok((dir, project_key))
}

fn dispatch(cli: Cli) -> Result<JsonValue, HivelogError> {
    if let Command::Schema = cli.command {
        return Ok(serde_json::json!({ "subsystems": plugins::schemas() }));
    }

    let (dir, project_key) = resolve_project(&cli)?;
    let store = Store::open(&dir)?;
    let project = project_key.as_str();
    tracing::debug!(project_key = project, cmd = cli.command.name(), "dispatch");

    match cli.command {
        Command::Agent(c) => agents::run_agent_cli(&store, project, c),
        Command::Mail(c) => mail::run_mail_cli(&store, project, c),
        Command::Reserve(c) => reservations::run_reserve_cli(&store, project, c),
        Command::Task(c) => tasks::run_task_cli(&store, project, c),
        Command::Checkpoint(c) => checkpoint::run_checkpoint_cli(&store, project, c),
        Command::Mandate(c) => mandates::run_mandate_cli(&store, project, c),
        Command::Pattern(c) => patterns::run_pattern_cli(&store, project, c),
        Command::Events(c) => run_events(&store, project, c),
        Command::Rebuild => {
            let replayed = projections::rebuild_projections(&store, project)?;
            Ok(serde_json::json!({ "project_key": project, "replayed": replayed }))
        }
        Command::Audit { tail } => {
            let mut entries = broker::audit_log(&store)?;
            if let Some(n) = tail {
                let skip = entries.len().saturating_sub(n);
                entries.drain(..skip);
            }
            Ok(serde_json::json!({ "entries": entries }))
        }
        Command::Schema => Ok(serde_json::json!({ "subsystems": plugins::schemas() })),
    }
}

fn run_events(store: &Store, project: &str, c: EventsCli) -> Result<JsonValue, HivelogError> {
    let scope = if c.all_projects { None } else { Some(project) };
    if c.latest {
        let seq = event_log::latest_sequence(store, scope)?;
        return Ok(serde_json::json!({ "project_key": scope, "latest_sequence": seq }));
    }
    if let Some(unknown) = c.types.iter().find(|t| !EVENT_TYPES.contains(&t.as_str())) {
        return Err(HivelogError::ValidationError(format!(
            "Unknown event type '{}'. Known types: {}",
            unknown,
            EVENT_TYPES.join(", ")
        )));
    }
    let filter = EventFilter {
        project_key: scope.map(str::to_string),
        types: Some(c.types).filter(|t| !t.is_empty()),
        since: c.since,
        until: c.until,
        after_sequence: c.after,
        limit: c.limit,
    };
    let events = event_log::read(store, &filter)?;
    Ok(serde_json::json!({ "events": events }))
}
