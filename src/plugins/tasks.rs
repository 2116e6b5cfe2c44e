use crate::core::broker::DbBroker;
use crate::core::error::HivelogError;
use crate::core::event_log;
use crate::core::events::{
    Event, EventKind, TaskBlocked, TaskCompleted, TaskProgress, TaskStarted,
};
use crate::core::models::SwarmBeadContext;
use crate::core::projections::sqlite::{CONTEXT_COLUMNS, RawContextRow};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::agents::validate_agent_name;
use crate::plugins::checkpoint::{self, SaveCheckpointParams};
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Parser, Debug)]
#[clap(name = "task", about = "Report bead lifecycle and progress")]
pub struct TaskCli {
    #[clap(subcommand)]
    pub command: TaskCommand,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    Start {
        #[clap(long)]
        agent: String,
        #[clap(long)]
        bead: String,
        #[clap(long)]
        epic: Option<String>,
    },
    /// Report progress; crossing a quarter milestone writes a checkpoint.
    Progress {
        #[clap(long)]
        agent: String,
        #[clap(long)]
        bead: String,
        #[clap(long)]
        epic: Option<String>,
        #[clap(long)]
        percent: u8,
        #[clap(long)]
        previous: Option<u8>,
        #[clap(long)]
        message: Option<String>,
        #[clap(long = "file")]
        files: Vec<String>,
    },
    Complete {
        #[clap(long)]
        agent: String,
        #[clap(long)]
        bead: String,
        #[clap(long)]
        summary: Option<String>,
    },
    Block {
        #[clap(long)]
        agent: String,
        #[clap(long)]
        bead: String,
        #[clap(long)]
        reason: String,
    },
}

pub fn run_task_cli(
    store: &Store,
    project_key: &str,
    cli: TaskCli,
) -> Result<JsonValue, HivelogError> {
    match cli.command {
        TaskCommand::Start { agent, bead, epic } => {
            let ev = start_task(store, project_key, &agent, &bead, epic.as_deref())?;
            Ok(serde_json::json!({ "event": ev }))
        }
        TaskCommand::Progress {
            agent,
            bead,
            epic,
            percent,
            previous,
            message,
            files,
        } => {
            let result = report_progress(
                store,
                ReportProgressParams {
                    project_key,
                    agent_name: &agent,
                    bead_id: &bead,
                    epic_id: epic.as_deref(),
                    progress_percent: percent,
                    previous_percent: previous,
                    message: message.as_deref(),
                    files,
                },
            )?;
            Ok(serde_json::to_value(result)?)
        }
        TaskCommand::Complete {
            agent,
            bead,
            summary,
        } => {
            let ev = complete_task(store, project_key, &agent, &bead, summary.as_deref())?;
            Ok(serde_json::json!({ "event": ev }))
        }
        TaskCommand::Block {
            agent,
            bead,
            reason,
        } => {
            let ev = block_task(store, project_key, &agent, &bead, &reason)?;
            Ok(serde_json::json!({ "event": ev }))
        }
    }
}

fn validate_bead(agent: &str, bead_id: &str) -> Result<(), HivelogError> {
    validate_agent_name(agent)?;
    if bead_id.trim().is_empty() {
        return Err(HivelogError::ValidationError(
            "bead_id must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn append_one(
    store: &Store,
    project_key: &str,
    op: &str,
    kind: EventKind,
) -> Result<Event, HivelogError> {
    let actor = kind.actor().to_string();
    DbBroker::new(store).with_tx(&actor, op, |conn| {
        event_log::append_and_project(conn, project_key, kind, time::now_ms())
    })
}

pub fn start_task(
    store: &Store,
    project_key: &str,
    agent: &str,
    bead_id: &str,
    epic_id: Option<&str>,
) -> Result<Event, HivelogError> {
    validate_bead(agent, bead_id)?;
    append_one(
        store,
        project_key,
        "tasks.start",
        EventKind::TaskStarted(TaskStarted {
            agent_name: agent.to_string(),
            bead_id: bead_id.to_string(),
            epic_id: epic_id.map(str::to_string),
        }),
    )
}

pub fn complete_task(
    store: &Store,
    project_key: &str,
    agent: &str,
    bead_id: &str,
    summary: Option<&str>,
) -> Result<Event, HivelogError> {
    validate_bead(agent, bead_id)?;
    append_one(
        store,
        project_key,
        "tasks.complete",
        EventKind::TaskCompleted(TaskCompleted {
            agent_name: agent.to_string(),
            bead_id: bead_id.to_string(),
            summary: summary.map(str::to_string),
        }),
    )
}

pub fn block_task(
    store: &Store,
    project_key: &str,
    agent: &str,
    bead_id: &str,
    reason: &str,
) -> Result<Event, HivelogError> {
    validate_bead(agent, bead_id)?;
    if reason.trim().is_empty() {
        return Err(HivelogError::ValidationError(
            "a blocked task needs a reason".to_string(),
        ));
    }
    append_one(
        store,
        project_key,
        "tasks.block",
        EventKind::TaskBlocked(TaskBlocked {
            agent_name: agent.to_string(),
            bead_id: bead_id.to_string(),
            reason: reason.to_string(),
        }),
    )
}

pub struct ReportProgressParams<'a> {
    pub project_key: &'a str,
    pub agent_name: &'a str,
    pub bead_id: &'a str,
    /// Required for auto-checkpointing.
    pub epic_id: Option<&'a str>,
    pub progress_percent: u8,
    /// Defaults to the progress of the stored checkpoint, or 0.
    pub previous_percent: Option<u8>,
    pub message: Option<&'a str>,
    /// Replaces the checkpointed file list when non-empty.
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressResult {
    pub event: Event,
    /// Present when this report crossed a milestone.
    pub checkpoint: Option<SwarmBeadContext>,
}

fn stored_context(
    conn: &Connection,
    project_key: &str,
    epic_id: &str,
    bead_id: &str,
    agent: &str,
) -> Result<Option<SwarmBeadContext>, HivelogError> {
    let sql = format!(
        "SELECT {} FROM swarm_contexts
         WHERE project_key = ?1 AND epic_id = ?2 AND bead_id = ?3 AND agent_name = ?4",
        CONTEXT_COLUMNS
    );
    let raw = conn
        .query_row(
            &sql,
            params![project_key, epic_id, bead_id, agent],
            RawContextRow::from_row,
        )
        .optional()?;
    // An unreadable row is replaced by the next checkpoint rather than blocking progress.
    Ok(raw.and_then(|r| r.parse().ok()))
}

/// Append `task_progress`; when the report crosses into the quarter, half or
/// three-quarters milestone, also write a checkpoint in the same transaction.
pub fn report_progress(
    store: &Store,
    p: ReportProgressParams<'_>,
) -> Result<ProgressResult, HivelogError> {
    validate_bead(p.agent_name, p.bead_id)?;
    if p.progress_percent > 100 {
        return Err(HivelogError::ValidationError(format!(
            "progress_percent must be within [0, 100], got {}",
            p.progress_percent
        )));
    }

    DbBroker::new(store).with_tx(p.agent_name, "tasks.progress", |conn| {
        let now = time::now_ms();
        let event = event_log::append_and_project(
            conn,
            p.project_key,
            EventKind::TaskProgress(TaskProgress {
                agent_name: p.agent_name.to_string(),
                bead_id: p.bead_id.to_string(),
                progress_percent: p.progress_percent,
                message: p.message.map(str::to_string),
            }),
            now,
        )?;

        let Some(epic_id) = p.epic_id else {
            return Ok(ProgressResult {
                event,
                checkpoint: None,
            });
        };

        let existing = stored_context(conn, p.project_key, epic_id, p.bead_id, p.agent_name)?;
        let previous = p
            .previous_percent
            .or_else(|| existing.as_ref().map(|c| c.progress_percent))
            .unwrap_or(0);
        if !checkpoint::should_auto_checkpoint(p.progress_percent, previous) {
            return Ok(ProgressResult {
                event,
                checkpoint: None,
            });
        }

        let (files, strategy, directives) = match existing {
            Some(c) => (c.files, c.strategy, c.directives),
            None => (Vec::new(), String::new(), Vec::new()),
        };
        let context = checkpoint::build_context(
            SaveCheckpointParams {
                project_key: p.project_key,
                epic_id,
                bead_id: p.bead_id,
                agent_name: p.agent_name,
                files: if p.files.is_empty() {
                    files
                } else {
                    p.files.clone()
                },
                strategy: &strategy,
                directives,
                progress_percent: p.progress_percent,
            },
            now,
        )?;
        checkpoint::write_checkpoint(conn, &context)?;
        tracing::debug!(
            project_key = p.project_key,
            epic_id,
            bead_id = p.bead_id,
            milestone = context.last_milestone.as_str(),
            "auto-checkpoint written"
        );

        Ok(ProgressResult {
            event,
            checkpoint: Some(context),
        })
    })
}

pub fn schema() -> JsonValue {
    serde_json::json!({
        "name": "task",
        "version": "0.1.0",
        "description": "Bead lifecycle events with milestone auto-checkpointing",
        "commands": [
            { "name": "start", "parameters": ["agent", "bead", "epic"] },
            { "name": "progress", "parameters": ["agent", "bead", "epic", "percent", "previous", "message", "file"] },
            { "name": "complete", "parameters": ["agent", "bead", "summary"] },
            { "name": "block", "parameters": ["agent", "bead", "reason"] }
        ],
        "storage": ["hivelog.db:events", "hivelog.db:swarm_contexts"]
    })
}
