//! Pattern maturity: candidate → established → proven, or deprecated.
//!
//! State is a pure function of the current decayed observations, unless an
//! operator pinned it with an override.

use crate::core::broker::DbBroker;
use crate::core::config::PatternConfig;
use crate::core::decay::{self, DecayedTotals, MaturityState, MaturityThresholds, Observation, Signal};
use crate::core::error::HivelogError;
use crate::core::projections::sqlite::enum_column;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::agents::validate_agent_name;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[clap(name = "pattern", about = "Track pattern maturity from agent feedback")]
pub struct PatternCli {
    #[clap(subcommand)]
    pub command: PatternCommand,
}

#[derive(Subcommand, Debug)]
pub enum PatternCommand {
    Record {
        #[clap(long)]
        content: String,
    },
    Observe {
        #[clap(long)]
        id: String,
        #[clap(long)]
        rater: String,
        /// `helpful` or `harmful`.
        #[clap(long)]
        outcome: String,
        #[clap(long, default_value = "1.0")]
        weight: f64,
    },
    Evaluate {
        #[clap(long)]
        id: String,
    },
    /// Pin a pattern to a state regardless of feedback.
    Override {
        #[clap(long)]
        id: String,
        #[clap(long)]
        state: String,
    },
    ClearOverride {
        #[clap(long)]
        id: String,
    },
    List {
        #[clap(long)]
        state: Option<String>,
    },
}

pub fn run_pattern_cli(
    store: &Store,
    project_key: &str,
    cli: PatternCli,
) -> Result<JsonValue, HivelogError> {
    match cli.command {
        PatternCommand::Record { content } => {
            let pattern = record_pattern(store, project_key, &content)?;
            Ok(serde_json::json!({ "pattern": pattern }))
        }
        PatternCommand::Observe {
            id,
            rater,
            outcome,
            weight,
        } => {
            let eval = record_observation(
                store,
                project_key,
                &id,
                &rater,
                outcome.parse::<ObservationType>()?,
                weight,
            )?;
            Ok(serde_json::json!({ "evaluation": eval }))
        }
        PatternCommand::Evaluate { id } => {
            let eval = evaluate_pattern(store, project_key, &id)?;
            Ok(serde_json::json!({ "evaluation": eval }))
        }
        PatternCommand::Override { id, state } => {
            let pattern =
                override_pattern_state(store, project_key, &id, state.parse::<MaturityState>()?)?;
            Ok(serde_json::json!({ "pattern": pattern }))
        }
        PatternCommand::ClearOverride { id } => {
            let pattern = clear_override(store, project_key, &id)?;
            Ok(serde_json::json!({ "pattern": pattern }))
        }
        PatternCommand::List { state } => {
            let state = state.map(|s| s.parse::<MaturityState>()).transpose()?;
            let patterns = list_patterns(store, project_key, state)?;
            Ok(serde_json::json!({ "patterns": patterns }))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    Helpful,
    Harmful,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::Helpful => "helpful",
            ObservationType::Harmful => "harmful",
        }
    }
}

impl FromStr for ObservationType {
    type Err = HivelogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "helpful" => Ok(ObservationType::Helpful),
            "harmful" => Ok(ObservationType::Harmful),
            _ => Err(HivelogError::ValidationError(format!(
                "Invalid observation type: {}. Must be helpful or harmful",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub project_key: String,
    pub content: String,
    /// Last computed state.
    pub state: MaturityState,
    pub override_state: Option<MaturityState>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Pattern {
    pub fn effective_state(&self) -> MaturityState {
        self.override_state.unwrap_or(self.state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEvaluation {
    pub pattern_id: String,
    pub totals: DecayedTotals,
    pub computed_state: MaturityState,
    pub effective_state: MaturityState,
    pub overridden: bool,
    pub evaluated_at: i64,
}

pub fn thresholds(cfg: &PatternConfig) -> MaturityThresholds {
    MaturityThresholds {
        min_observations: cfg.min_observations,
        min_positive: cfg.min_helpful,
        max_negative_ratio: cfg.max_harmful_ratio,
        deprecation_ratio: cfg.deprecation_ratio,
    }
}

const PATTERN_COLUMNS: &str =
    "id, project_key, content, state, override_state, created_at, updated_at";

fn pattern_from_row(row: &Row) -> Result<Pattern, rusqlite::Error> {
    let state: String = row.get(3)?;
    let override_state: Option<String> = row.get(4)?;
    Ok(Pattern {
        id: row.get(0)?,
        project_key: row.get(1)?,
        content: row.get(2)?,
        state: enum_column(3, &state)?,
        override_state: override_state
            .map(|s| enum_column(4, &s))
            .transpose()?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn load_pattern(
    conn: &Connection,
    project_key: &str,
    id: &str,
) -> Result<Pattern, HivelogError> {
    let sql = format!(
        "SELECT {} FROM patterns WHERE project_key = ?1 AND id = ?2",
        PATTERN_COLUMNS
    );
    conn.query_row(&sql, params![project_key, id], pattern_from_row)
        .optional()?
        .ok_or_else(|| HivelogError::NotFound(format!("pattern '{}'", id)))
}

fn load_observations(conn: &Connection, pattern_id: &str) -> Result<Vec<Observation>, HivelogError> {
    let mut stmt = conn.prepare(
        "SELECT observation_type, weight, ts FROM pattern_observations WHERE pattern_id = ?1",
    )?;
    let rows = stmt.query_map(params![pattern_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    let mut out = Vec::new();
    for r in rows {
        let (kind, weight, ts) = r?;
        let signal = match kind.parse::<ObservationType>()? {
            ObservationType::Helpful => Signal::Positive,
            ObservationType::Harmful => Signal::Negative,
        };
        out.push(Observation {
            signal,
            timestamp: ts,
            weight,
        });
    }
    Ok(out)
}

/// Recompute and store the state; the override column is left alone.
fn evaluate_on(
    conn: &Connection,
    pattern: &Pattern,
    cfg: &PatternConfig,
    now: i64,
) -> Result<PatternEvaluation, HivelogError> {
    let observations = load_observations(conn, &pattern.id)?;
    let totals = decay::aggregate(&observations, cfg.half_life_days, now);
    let computed = decay::classify(&totals, &thresholds(cfg));

    if computed != pattern.state {
        conn.execute(
            "UPDATE patterns SET state = ?2, updated_at = ?3 WHERE id = ?1",
            params![pattern.id, computed.as_str(), now],
        )?;
        tracing::info!(
            pattern_id = %pattern.id,
            from = pattern.state.as_str(),
            to = computed.as_str(),
            "pattern maturity changed"
        );
    }

    Ok(PatternEvaluation {
        pattern_id: pattern.id.clone(),
        totals,
        computed_state: computed,
        effective_state: pattern.override_state.unwrap_or(computed),
        overridden: pattern.override_state.is_some(),
        evaluated_at: now,
    })
}

pub fn record_pattern(
    store: &Store,
    project_key: &str,
    content: &str,
) -> Result<Pattern, HivelogError> {
    if project_key.trim().is_empty() || content.trim().is_empty() {
        return Err(HivelogError::ValidationError(
            "project_key and content are required".to_string(),
        ));
    }
    let now = time::now_ms();
    let pattern = Pattern {
        id: time::new_event_id(),
        project_key: project_key.to_string(),
        content: content.to_string(),
        state: MaturityState::Candidate,
        override_state: None,
        created_at: now,
        updated_at: now,
    };
    DbBroker::new(store).with_tx("hivelog", "patterns.record", |conn| {
        conn.execute(
            "INSERT INTO patterns(id, project_key, content, state, override_state, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, NULL, ?5, ?6)",
            params![
                pattern.id,
                pattern.project_key,
                pattern.content,
                pattern.state.as_str(),
                pattern.created_at,
                pattern.updated_at
            ],
        )?;
        Ok(())
    })?;
    Ok(pattern)
}

/// One observation per rater per pattern; re-evaluates after recording.
pub fn record_observation(
    store: &Store,
    project_key: &str,
    pattern_id: &str,
    rater: &str,
    outcome: ObservationType,
    weight: f64,
) -> Result<PatternEvaluation, HivelogError> {
    validate_agent_name(rater)?;
    if !weight.is_finite() || weight < 0.0 {
        return Err(HivelogError::ValidationError(format!(
            "observation weight must be a finite number >= 0, got {}",
            weight
        )));
    }
    let cfg = &store.config.patterns;

    DbBroker::new(store).with_tx(rater, "patterns.observe", |conn| {
        let pattern = load_pattern(conn, project_key, pattern_id)?;
        let seen: Option<String> = conn
            .query_row(
                "SELECT id FROM pattern_observations WHERE pattern_id = ?1 AND rater = ?2",
                params![pattern_id, rater],
                |row| row.get(0),
            )
            .optional()?;
        if seen.is_some() {
            return Err(HivelogError::DuplicateAction(format!(
                "'{}' already rated pattern '{}'",
                rater, pattern_id
            )));
        }

        let now = time::now_ms();
        conn.execute(
            "INSERT INTO pattern_observations(id, pattern_id, rater, observation_type, weight, ts)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                time::new_event_id(),
                pattern_id,
                rater,
                outcome.as_str(),
                weight,
                now
            ],
        )?;
        evaluate_on(conn, &pattern, cfg, now)
    })
}

pub fn evaluate_pattern(
    store: &Store,
    project_key: &str,
    pattern_id: &str,
) -> Result<PatternEvaluation, HivelogError> {
    evaluate_pattern_at(store, project_key, pattern_id, time::now_ms())
}

/// Evaluate as of `now` (epoch ms) and store the computed state.
pub fn evaluate_pattern_at(
    store: &Store,
    project_key: &str,
    pattern_id: &str,
    now: i64,
) -> Result<PatternEvaluation, HivelogError> {
    let cfg = &store.config.patterns;
    DbBroker::new(store).with_tx("hivelog", "patterns.evaluate", |conn| {
        let pattern = load_pattern(conn, project_key, pattern_id)?;
        evaluate_on(conn, &pattern, cfg, now)
    })
}

fn set_override(
    store: &Store,
    project_key: &str,
    pattern_id: &str,
    state: Option<MaturityState>,
) -> Result<Pattern, HivelogError> {
    let op = if state.is_some() {
        "patterns.override"
    } else {
        "patterns.clear_override"
    };
    DbBroker::new(store).with_tx("operator", op, |conn| {
        load_pattern(conn, project_key, pattern_id)?;
        conn.execute(
            "UPDATE patterns SET override_state = ?2, updated_at = ?3 WHERE id = ?1",
            params![pattern_id, state.map(|s| s.as_str()), time::now_ms()],
        )?;
        load_pattern(conn, project_key, pattern_id)
    })
}

pub fn override_pattern_state(
    store: &Store,
    project_key: &str,
    pattern_id: &str,
    state: MaturityState,
) -> Result<Pattern, HivelogError> {
    set_override(store, project_key, pattern_id, Some(state))
}

pub fn clear_override(
    store: &Store,
    project_key: &str,
    pattern_id: &str,
) -> Result<Pattern, HivelogError> {
    set_override(store, project_key, pattern_id, None)
}

/// Patterns newest first, optionally filtered by effective state.
pub fn list_patterns(
    store: &Store,
    project_key: &str,
    state: Option<MaturityState>,
) -> Result<Vec<Pattern>, HivelogError> {
    let all = DbBroker::new(store).with_conn("hivelog", "patterns.list", |conn| {
        let sql = format!(
            "SELECT {} FROM patterns WHERE project_key = ?1 ORDER BY created_at DESC, id DESC",
            PATTERN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_key], pattern_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })?;
    Ok(all
        .into_iter()
        .filter(|p| state.is_none_or(|s| p.effective_state() == s))
        .collect())
}

pub fn schema() -> JsonValue {
    serde_json::json!({
        "name": "pattern",
        "version": "0.1.0",
        "description": "Decay-weighted pattern maturity with operator overrides",
        "commands": [
            { "name": "record", "parameters": ["content"] },
            { "name": "observe", "parameters": ["id", "rater", "outcome", "weight"] },
            { "name": "evaluate", "parameters": ["id"] },
            { "name": "override", "parameters": ["id", "state"] },
            { "name": "clear-override", "parameters": ["id"] },
            { "name": "list", "parameters": ["state"] }
        ],
        "storage": ["hivelog.db:patterns", "hivelog.db:pattern_observations"]
    })
}
