use crate::core::broker::DbBroker;
use crate::core::error::HivelogError;
use crate::core::event_log;
use crate::core::events::{AgentActive, AgentRegistered, EventKind};
use crate::core::models::Agent;
use crate::core::projections::{ProjectionStore, SqliteProjections};
use crate::core::projections::sqlite::{AGENT_COLUMNS, agent_from_row};
use crate::core::store::Store;
use crate::core::time;
use clap::{Parser, Subcommand};
use regex::Regex;
use rusqlite::params;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

#[derive(Parser, Debug)]
#[clap(name = "agent", about = "Register agents and inspect the registry")]
pub struct AgentCli {
    #[clap(subcommand)]
    pub command: AgentCommand,
}

#[derive(Subcommand, Debug)]
pub enum AgentCommand {
    /// Register an agent (or refresh its metadata).
    Register {
        #[clap(long)]
        name: String,
        #[clap(long)]
        program: String,
        #[clap(long)]
        model: String,
        #[clap(long)]
        task: Option<String>,
    },
    /// Record activity for an agent.
    Touch {
        #[clap(long)]
        name: String,
    },
    /// Show one agent.
    Get {
        #[clap(long)]
        name: String,
    },
    /// List registered agents, most recently active first.
    List,
}

pub fn run_agent_cli(
    store: &Store,
    project_key: &str,
    cli: AgentCli,
) -> Result<JsonValue, HivelogError> {
    match cli.command {
        AgentCommand::Register {
            name,
            program,
            model,
            task,
        } => {
            let agent = register_agent(
                store,
                RegisterAgentParams {
                    project_key,
                    name: &name,
                    program: &program,
                    model: &model,
                    task_description: task.as_deref(),
                },
            )?;
            Ok(serde_json::json!({ "agent": agent }))
        }
        AgentCommand::Touch { name } => {
            let agent = touch_agent(store, project_key, &name)?;
            Ok(serde_json::json!({ "agent": agent }))
        }
        AgentCommand::Get { name } => {
            let agent = get_agent(store, project_key, &name)?
                .ok_or_else(|| HivelogError::NotFound(format!("agent '{}'", name)))?;
            Ok(serde_json::json!({ "agent": agent }))
        }
        AgentCommand::List => {
            let agents = list_agents(store, project_key)?;
            Ok(serde_json::json!({ "agents": agents }))
        }
    }
}

static AGENT_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,63}$"));

/// Agent names are short identifiers: letters, digits, `_`, `-`, `.`.
pub fn validate_agent_name(name: &str) -> Result<(), HivelogError> {
    let re = AGENT_NAME
        .as_ref()
        .map_err(|e| HivelogError::ValidationError(e.to_string()))?;
    if !re.is_match(name) {
        return Err(HivelogError::ValidationError(format!(
            "Invalid agent name '{}'. Use 1-64 letters, digits, '_', '-' or '.'",
            name
        )));
    }
    Ok(())
}

pub struct RegisterAgentParams<'a> {
    pub project_key: &'a str,
    pub name: &'a str,
    pub program: &'a str,
    pub model: &'a str,
    pub task_description: Option<&'a str>,
}

/// Register an agent. Registering an existing name updates its metadata.
pub fn register_agent(store: &Store, p: RegisterAgentParams<'_>) -> Result<Agent, HivelogError> {
    validate_agent_name(p.name)?;
    if p.program.trim().is_empty() || p.model.trim().is_empty() {
        return Err(HivelogError::ValidationError(
            "program and model are required".to_string(),
        ));
    }

    let kind = EventKind::AgentRegistered(AgentRegistered {
        agent_name: p.name.to_string(),
        program: p.program.to_string(),
        model: p.model.to_string(),
        task_description: p
            .task_description
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    });

    DbBroker::new(store).with_tx(p.name, "agents.register", |conn| {
        event_log::append_and_project(conn, p.project_key, kind, time::now_ms())?;
        SqliteProjections::new(conn)
            .get_agent(p.project_key, p.name)?
            .ok_or_else(|| HivelogError::StoreUnavailable("agent row missing after register".into()))
    })
}

/// Append `agent_active`. Returns the agent row, or `None` when the name was
/// never registered (the event is still logged).
pub fn touch_agent(
    store: &Store,
    project_key: &str,
    name: &str,
) -> Result<Option<Agent>, HivelogError> {
    validate_agent_name(name)?;
    let kind = EventKind::AgentActive(AgentActive {
        agent_name: name.to_string(),
    });
    DbBroker::new(store).with_tx(name, "agents.touch", |conn| {
        event_log::append_and_project(conn, project_key, kind, time::now_ms())?;
        SqliteProjections::new(conn).get_agent(project_key, name)
    })
}

pub fn get_agent(
    store: &Store,
    project_key: &str,
    name: &str,
) -> Result<Option<Agent>, HivelogError> {
    DbBroker::new(store).with_conn("hivelog", "agents.get", |conn| {
        SqliteProjections::new(conn).get_agent(project_key, name)
    })
}

pub fn list_agents(store: &Store, project_key: &str) -> Result<Vec<Agent>, HivelogError> {
    DbBroker::new(store).with_conn("hivelog", "agents.list", |conn| {
        let sql = format!(
            "SELECT {} FROM agents WHERE project_key = ?1 ORDER BY last_active_at DESC, name ASC",
            AGENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_key], agent_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

pub fn schema() -> JsonValue {
    serde_json::json!({
        "name": "agent",
        "version": "0.1.0",
        "description": "Agent registry projected from agent_registered/agent_active events",
        "commands": [
            { "name": "register", "parameters": ["name", "program", "model", "task"] },
            { "name": "touch", "parameters": ["name"] },
            { "name": "get", "parameters": ["name"] },
            { "name": "list", "parameters": [] }
        ],
        "storage": ["hivelog.db:agents"]
    })
}
