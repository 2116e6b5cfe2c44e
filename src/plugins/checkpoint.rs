//! Checkpoint / recovery for swarm work.
//!
//! A save appends `checkpoint_created` carrying the full context and upserts
//! the `swarm_contexts` row in the same transaction. A load reads the row
//! and records the outcome as `checkpoint_recovered`.
//!
//! recovery_state: `none -> pending` (save) `-> recovered | failed` (load).

use crate::core::broker::DbBroker;
use crate::core::error::HivelogError;
use crate::core::event_log::{self, EventFilter};
use crate::core::events::{CheckpointCreated, CheckpointRecovered, EventKind};
use crate::core::models::{Milestone, RecoveryState, SwarmBeadContext};
use crate::core::projections::sqlite::{CONTEXT_COLUMNS, RawContextRow};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::agents::validate_agent_name;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Parser, Debug)]
#[clap(name = "checkpoint", about = "Save and recover swarm progress")]
pub struct CheckpointCli {
    #[clap(subcommand)]
    pub command: CheckpointCommand,
}

#[derive(Subcommand, Debug)]
pub enum CheckpointCommand {
    /// Save a checkpoint for (epic, bead, agent).
    Save {
        #[clap(long)]
        epic: String,
        #[clap(long)]
        bead: String,
        #[clap(long)]
        agent: String,
        #[clap(long)]
        progress: u8,
        #[clap(long = "file")]
        files: Vec<String>,
        #[clap(long, default_value = "")]
        strategy: String,
        #[clap(long = "directive")]
        directives: Vec<String>,
    },
    /// Load the newest checkpoint for (epic, bead[, agent]).
    Load {
        #[clap(long)]
        epic: String,
        #[clap(long)]
        bead: String,
        #[clap(long)]
        agent: Option<String>,
    },
    /// List checkpoints of an epic, newest first.
    List {
        #[clap(long)]
        epic: String,
    },
    /// Every checkpoint ever saved for a bead, from the event log.
    History {
        #[clap(long)]
        epic: String,
        #[clap(long)]
        bead: String,
    },
}

pub fn run_checkpoint_cli(
    store: &Store,
    project_key: &str,
    cli: CheckpointCli,
) -> Result<JsonValue, HivelogError> {
    match cli.command {
        CheckpointCommand::Save {
            epic,
            bead,
            agent,
            progress,
            files,
            strategy,
            directives,
        } => {
            let context = save_checkpoint(
                store,
                SaveCheckpointParams {
                    project_key,
                    epic_id: &epic,
                    bead_id: &bead,
                    agent_name: &agent,
                    files,
                    strategy: &strategy,
                    directives,
                    progress_percent: progress,
                },
            )?;
            Ok(serde_json::json!({ "context": context }))
        }
        CheckpointCommand::Load { epic, bead, agent } => {
            let loaded = load_checkpoint(store, project_key, &epic, &bead, agent.as_deref())?;
            Ok(serde_json::to_value(loaded)?)
        }
        CheckpointCommand::List { epic } => {
            let contexts = list_checkpoints(store, project_key, &epic)?;
            Ok(serde_json::json!({ "epic_id": epic, "checkpoints": contexts }))
        }
        CheckpointCommand::History { epic, bead } => {
            let history = checkpoint_history(store, project_key, &epic, &bead)?;
            Ok(serde_json::json!({ "epic_id": epic, "bead_id": bead, "history": history }))
        }
    }
}

pub fn milestone(percent: u8) -> Milestone {
    match percent {
        p if p >= 100 => Milestone::Complete,
        p if p >= 75 => Milestone::ThreeQuarters,
        p if p >= 50 => Milestone::Half,
        p if p >= 25 => Milestone::Quarter,
        _ => Milestone::Started,
    }
}

/// True when progress moved forward into the quarter, half or
/// three-quarters bucket.
pub fn should_auto_checkpoint(current: u8, previous: u8) -> bool {
    if current < previous {
        return false;
    }
    let now = milestone(current);
    now != milestone(previous)
        && matches!(
            now,
            Milestone::Quarter | Milestone::Half | Milestone::ThreeQuarters
        )
}

pub struct SaveCheckpointParams<'a> {
    pub project_key: &'a str,
    pub epic_id: &'a str,
    pub bead_id: &'a str,
    pub agent_name: &'a str,
    pub files: Vec<String>,
    pub strategy: &'a str,
    pub directives: Vec<String>,
    pub progress_percent: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadResult {
    pub success: bool,
    /// Nothing was ever saved for the key.
    pub fresh_start: bool,
    pub context: Option<SwarmBeadContext>,
}

pub(crate) fn build_context(
    p: SaveCheckpointParams<'_>,
    now: i64,
) -> Result<SwarmBeadContext, HivelogError> {
    validate_agent_name(p.agent_name)?;
    if p.epic_id.trim().is_empty() || p.bead_id.trim().is_empty() {
        return Err(HivelogError::ValidationError(
            "epic_id and bead_id are required".to_string(),
        ));
    }
    if p.progress_percent > 100 {
        return Err(HivelogError::ValidationError(format!(
            "progress_percent must be within [0, 100], got {}",
            p.progress_percent
        )));
    }
    Ok(SwarmBeadContext {
        project_key: p.project_key.to_string(),
        epic_id: p.epic_id.to_string(),
        bead_id: p.bead_id.to_string(),
        agent_name: p.agent_name.to_string(),
        files: p.files,
        strategy: p.strategy.to_string(),
        directives: p.directives,
        progress_percent: p.progress_percent,
        last_milestone: milestone(p.progress_percent),
        recovery_state: RecoveryState::Pending,
        checkpointed_at: now,
    })
}

/// Append + upsert on an open write transaction.
pub(crate) fn write_checkpoint(
    conn: &Connection,
    context: &SwarmBeadContext,
) -> Result<(), HivelogError> {
    event_log::append_and_project(
        conn,
        &context.project_key,
        EventKind::CheckpointCreated(CheckpointCreated {
            context: context.clone(),
        }),
        context.checkpointed_at,
    )?;
    Ok(())
}

pub fn save_checkpoint(
    store: &Store,
    p: SaveCheckpointParams<'_>,
) -> Result<SwarmBeadContext, HivelogError> {
    let context = build_context(p, time::now_ms())?;
    let actor = context.agent_name.clone();

    DbBroker::new(store)
        .with_tx(&actor, "checkpoint.save", |conn| {
            write_checkpoint(conn, &context)?;
            Ok(context.clone())
        })
        .map_err(|e| match e {
            HivelogError::ValidationError(_) => e,
            other => HivelogError::StoreUnavailable(format!(
                "checkpoint {}/{}/{} not saved: {}",
                context.epic_id, context.bead_id, context.agent_name, other
            )),
        })
}

fn newest_row(
    conn: &Connection,
    project_key: &str,
    epic_id: &str,
    bead_id: &str,
    agent: Option<&str>,
) -> Result<Option<RawContextRow>, HivelogError> {
    let sql = format!(
        "SELECT {} FROM swarm_contexts
         WHERE project_key = ?1 AND epic_id = ?2 AND bead_id = ?3
           AND (?4 IS NULL OR agent_name = ?4)
         ORDER BY checkpointed_at DESC, agent_name ASC
         LIMIT 1",
        CONTEXT_COLUMNS
    );
    Ok(conn
        .query_row(
            &sql,
            params![project_key, epic_id, bead_id, agent],
            RawContextRow::from_row,
        )
        .optional()?)
}

enum LoadOutcome {
    Fresh,
    Recovered(SwarmBeadContext),
    Corrupt(HivelogError),
}

/// Load the newest checkpoint. A missing checkpoint is a fresh start, not an
/// error. A corrupt row records a failed recovery event and then returns
/// [`HivelogError::CorruptCheckpoint`].
pub fn load_checkpoint(
    store: &Store,
    project_key: &str,
    epic_id: &str,
    bead_id: &str,
    agent: Option<&str>,
) -> Result<LoadResult, HivelogError> {
    if let Some(a) = agent {
        validate_agent_name(a)?;
    }
    let actor = agent.unwrap_or("hivelog");

    let outcome = DbBroker::new(store).with_tx(actor, "checkpoint.load", |conn| {
        let Some(raw) = newest_row(conn, project_key, epic_id, bead_id, agent)? else {
            return Ok(LoadOutcome::Fresh);
        };
        let agent_name = raw.agent_name.clone();

        match raw.parse() {
            Ok(mut context) => {
                event_log::append_and_project(
                    conn,
                    project_key,
                    EventKind::CheckpointRecovered(CheckpointRecovered {
                        epic_id: epic_id.to_string(),
                        bead_id: bead_id.to_string(),
                        agent_name,
                        success: true,
                        error: None,
                    }),
                    time::now_ms(),
                )?;
                context.recovery_state = RecoveryState::Recovered;
                Ok(LoadOutcome::Recovered(context))
            }
            Err(err) => {
                event_log::append_and_project(
                    conn,
                    project_key,
                    EventKind::CheckpointRecovered(CheckpointRecovered {
                        epic_id: epic_id.to_string(),
                        bead_id: bead_id.to_string(),
                        agent_name,
                        success: false,
                        error: Some(err.to_string()),
                    }),
                    time::now_ms(),
                )?;
                Ok(LoadOutcome::Corrupt(err))
            }
        }
    })?;

    match outcome {
        LoadOutcome::Fresh => Ok(LoadResult {
            success: true,
            fresh_start: true,
            context: None,
        }),
        LoadOutcome::Recovered(context) => Ok(LoadResult {
            success: true,
            fresh_start: false,
            context: Some(context),
        }),
        LoadOutcome::Corrupt(err) => {
            tracing::warn!(project_key, epic_id, bead_id, error = %err, "checkpoint recovery failed");
            Err(err)
        }
    }
}

/// Checkpoints of an epic, newest first. Rows that fail to parse are skipped.
pub fn list_checkpoints(
    store: &Store,
    project_key: &str,
    epic_id: &str,
) -> Result<Vec<SwarmBeadContext>, HivelogError> {
    let raw = DbBroker::new(store).with_conn("hivelog", "checkpoint.list", |conn| {
        let sql = format!(
            "SELECT {} FROM swarm_contexts WHERE project_key = ?1 AND epic_id = ?2
             ORDER BY checkpointed_at DESC, bead_id ASC, agent_name ASC",
            CONTEXT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_key, epic_id], RawContextRow::from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })?;

    Ok(raw
        .into_iter()
        .filter_map(|row| match row.parse() {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                tracing::warn!(project_key, epic_id, error = %e, "skipping unreadable checkpoint");
                None
            }
        })
        .collect())
}

/// Every `checkpoint_created` snapshot for a bead, oldest first.
pub fn checkpoint_history(
    store: &Store,
    project_key: &str,
    epic_id: &str,
    bead_id: &str,
) -> Result<Vec<SwarmBeadContext>, HivelogError> {
    let filter = EventFilter {
        types: Some(vec!["checkpoint_created".to_string()]),
        ..EventFilter::for_project(project_key)
    };
    Ok(event_log::read(store, &filter)?
        .into_iter()
        .filter_map(|ev| match ev.kind {
            EventKind::CheckpointCreated(p)
                if p.context.epic_id == epic_id && p.context.bead_id == bead_id =>
            {
                Some(p.context)
            }
            _ => None,
        })
        .collect())
}

pub fn schema() -> JsonValue {
    serde_json::json!({
        "name": "checkpoint",
        "version": "0.1.0",
        "description": "Dual-write checkpoints (event log + swarm_contexts) with recovery",
        "commands": [
            { "name": "save", "parameters": ["epic", "bead", "agent", "progress", "file", "strategy", "directive"] },
            { "name": "load", "parameters": ["epic", "bead", "agent"] },
            { "name": "list", "parameters": ["epic"] },
            { "name": "history", "parameters": ["epic", "bead"] }
        ],
        "storage": ["hivelog.db:swarm_contexts", "hivelog.db:events"]
    })
}
