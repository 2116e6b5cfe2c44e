//! Mandates: shared knowledge promoted by decayed agent votes.
//!
//! Votes are stored, not event-sourced. A mandate's status is recomputed
//! from its votes with [`decay::aggregate`] whenever a vote lands or the
//! project is refreshed.

use crate::core::broker::DbBroker;
use crate::core::config::MandateConfig;
use crate::core::decay::{self, DecayedTotals, Observation, Signal};
use crate::core::error::HivelogError;
use crate::core::projections::sqlite::{enum_column, json_column};
use crate::core::semantic::{Embedder, SemanticHit, SemanticStore};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::agents::validate_agent_name;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

pub const SEMANTIC_KIND: &str = "mandate";
pub const CONTENT_TYPES: &[&str] = &["idea", "tip", "lore", "snippet", "feature_request"];

#[derive(Parser, Debug)]
#[clap(name = "mandate", about = "Propose and vote on shared mandates")]
pub struct MandateCli {
    #[clap(subcommand)]
    pub command: MandateCommand,
}

#[derive(Subcommand, Debug)]
pub enum MandateCommand {
    Propose {
        #[clap(long)]
        author: String,
        #[clap(long)]
        content: String,
        #[clap(long, default_value = "idea")]
        content_type: String,
        #[clap(long = "tag")]
        tags: Vec<String>,
    },
    Vote {
        #[clap(long)]
        id: String,
        #[clap(long)]
        voter: String,
        /// `upvote` or `downvote`.
        #[clap(long)]
        vote: String,
        #[clap(long, default_value = "1.0")]
        weight: f64,
    },
    Score {
        #[clap(long)]
        id: String,
    },
    Get {
        #[clap(long)]
        id: String,
    },
    List {
        #[clap(long)]
        status: Option<String>,
    },
    /// Recompute every mandate's status at the current time.
    Refresh,
}

pub fn run_mandate_cli(
    store: &Store,
    project_key: &str,
    cli: MandateCli,
) -> Result<JsonValue, HivelogError> {
    match cli.command {
        MandateCommand::Propose {
            author,
            content,
            content_type,
            tags,
        } => {
            let mandate = propose_mandate(
                store,
                ProposeMandateParams {
                    project_key,
                    author: &author,
                    content: &content,
                    content_type: &content_type,
                    tags,
                },
            )?;
            Ok(serde_json::json!({ "mandate": mandate }))
        }
        MandateCommand::Vote {
            id,
            voter,
            vote,
            weight,
        } => {
            let score = cast_vote(store, project_key, &id, &voter, vote.parse::<VoteType>()?, weight)?;
            Ok(serde_json::json!({ "score": score }))
        }
        MandateCommand::Score { id } => {
            let score = score_mandate(store, project_key, &id)?;
            Ok(serde_json::json!({ "score": score }))
        }
        MandateCommand::Get { id } => {
            let mandate = get_mandate(store, project_key, &id)?
                .ok_or_else(|| HivelogError::NotFound(format!("mandate '{}'", id)))?;
            Ok(serde_json::json!({ "mandate": mandate }))
        }
        MandateCommand::List { status } => {
            let status = status.map(|s| s.parse::<MandateStatus>()).transpose()?;
            let mandates = list_mandates(store, project_key, status)?;
            Ok(serde_json::json!({ "mandates": mandates }))
        }
        MandateCommand::Refresh => {
            let scores = refresh_mandates(store, project_key)?;
            Ok(serde_json::json!({ "scores": scores }))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateStatus {
    Candidate,
    Established,
    Mandate,
    Rejected,
}

impl MandateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MandateStatus::Candidate => "candidate",
            MandateStatus::Established => "established",
            MandateStatus::Mandate => "mandate",
            MandateStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for MandateStatus {
    type Err = HivelogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candidate" => Ok(MandateStatus::Candidate),
            "established" => Ok(MandateStatus::Established),
            "mandate" => Ok(MandateStatus::Mandate),
            "rejected" => Ok(MandateStatus::Rejected),
            _ => Err(HivelogError::ValidationError(format!(
                "Invalid mandate status: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for MandateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    Upvote,
    Downvote,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Upvote => "upvote",
            VoteType::Downvote => "downvote",
        }
    }

    fn signal(&self) -> Signal {
        match self {
            VoteType::Upvote => Signal::Positive,
            VoteType::Downvote => Signal::Negative,
        }
    }
}

impl FromStr for VoteType {
    type Err = HivelogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upvote" | "up" => Ok(VoteType::Upvote),
            "downvote" | "down" => Ok(VoteType::Downvote),
            _ => Err(HivelogError::ValidationError(format!(
                "Invalid vote type: {}. Must be upvote or downvote",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mandate {
    pub id: String,
    pub project_key: String,
    pub content: String,
    pub content_type: String,
    pub author: String,
    pub tags: Vec<String>,
    pub status: MandateStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MandateScore {
    pub mandate_id: String,
    pub totals: DecayedTotals,
    pub net: f64,
    pub ratio: f64,
    pub status: MandateStatus,
    pub scored_at: i64,
}

/// Rejection is checked first, then promotion from the top down.
pub fn classify_mandate(totals: &DecayedTotals, cfg: &MandateConfig) -> MandateStatus {
    let net = totals.net();
    if net <= cfg.rejected_net {
        MandateStatus::Rejected
    } else if net >= cfg.mandate_net && totals.ratio() >= cfg.mandate_ratio {
        MandateStatus::Mandate
    } else if net >= cfg.established_net {
        MandateStatus::Established
    } else {
        MandateStatus::Candidate
    }
}

const MANDATE_COLUMNS: &str =
    "id, project_key, content, content_type, author, tags, status, created_at, updated_at";

fn mandate_from_row(row: &Row) -> Result<Mandate, rusqlite::Error> {
    let tags: String = row.get(5)?;
    let status: String = row.get(6)?;
    Ok(Mandate {
        id: row.get(0)?,
        project_key: row.get(1)?,
        content: row.get(2)?,
        content_type: row.get(3)?,
        author: row.get(4)?,
        tags: json_column(5, &tags)?,
        status: enum_column(6, &status)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn load_mandate(
    conn: &Connection,
    project_key: &str,
    id: &str,
) -> Result<Option<Mandate>, HivelogError> {
    let sql = format!(
        "SELECT {} FROM mandates WHERE project_key = ?1 AND id = ?2",
        MANDATE_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![project_key, id], mandate_from_row)
        .optional()?)
}

fn load_votes(conn: &Connection, mandate_id: &str) -> Result<Vec<Observation>, HivelogError> {
    let mut stmt =
        conn.prepare("SELECT vote_type, weight, ts FROM mandate_votes WHERE mandate_id = ?1")?;
    let rows = stmt.query_map(params![mandate_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    let mut out = Vec::new();
    for r in rows {
        let (vote_type, weight, ts) = r?;
        let vote: VoteType = vote_type.parse()?;
        out.push(Observation {
            signal: vote.signal(),
            timestamp: ts,
            weight,
        });
    }
    Ok(out)
}

fn score_on(
    conn: &Connection,
    mandate_id: &str,
    cfg: &MandateConfig,
    now: i64,
) -> Result<MandateScore, HivelogError> {
    let votes = load_votes(conn, mandate_id)?;
    let totals = decay::aggregate(&votes, cfg.half_life_days, now);
    Ok(MandateScore {
        mandate_id: mandate_id.to_string(),
        net: totals.net(),
        ratio: totals.ratio(),
        status: classify_mandate(&totals, cfg),
        totals,
        scored_at: now,
    })
}

fn persist_status(
    conn: &Connection,
    mandate: &Mandate,
    score: &MandateScore,
) -> Result<(), HivelogError> {
    if mandate.status != score.status {
        conn.execute(
            "UPDATE mandates SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![mandate.id, score.status.as_str(), score.scored_at],
        )?;
        tracing::info!(
            mandate_id = %mandate.id,
            from = mandate.status.as_str(),
            to = score.status.as_str(),
            "mandate status changed"
        );
    }
    Ok(())
}

pub struct ProposeMandateParams<'a> {
    pub project_key: &'a str,
    pub author: &'a str,
    pub content: &'a str,
    pub content_type: &'a str,
    pub tags: Vec<String>,
}

pub fn propose_mandate(
    store: &Store,
    p: ProposeMandateParams<'_>,
) -> Result<Mandate, HivelogError> {
    validate_agent_name(p.author)?;
    if p.project_key.trim().is_empty() {
        return Err(HivelogError::ValidationError(
            "project_key must not be empty".to_string(),
        ));
    }
    if p.content.trim().is_empty() {
        return Err(HivelogError::ValidationError(
            "mandate content must not be empty".to_string(),
        ));
    }
    if !CONTENT_TYPES.contains(&p.content_type) {
        return Err(HivelogError::ValidationError(format!(
            "Invalid content_type: {}. Must be one of: {}",
            p.content_type,
            CONTENT_TYPES.join(", ")
        )));
    }

    let now = time::now_ms();
    let mandate = Mandate {
        id: time::new_event_id(),
        project_key: p.project_key.to_string(),
        content: p.content.to_string(),
        content_type: p.content_type.to_string(),
        author: p.author.to_string(),
        tags: p.tags,
        status: MandateStatus::Candidate,
        created_at: now,
        updated_at: now,
    };

    DbBroker::new(store).with_tx(p.author, "mandates.propose", |conn| {
        conn.execute(
            "INSERT INTO mandates(id, project_key, content, content_type, author, tags, status, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                mandate.id,
                mandate.project_key,
                mandate.content,
                mandate.content_type,
                mandate.author,
                serde_json::to_string(&mandate.tags)?,
                mandate.status.as_str(),
                mandate.created_at,
                mandate.updated_at
            ],
        )?;
        Ok(())
    })?;
    Ok(mandate)
}

/// Record one vote and return the rescored mandate. A voter gets one vote
/// per mandate; a second is rejected before anything is written.
pub fn cast_vote(
    store: &Store,
    project_key: &str,
    mandate_id: &str,
    voter: &str,
    vote: VoteType,
    weight: f64,
) -> Result<MandateScore, HivelogError> {
    validate_agent_name(voter)?;
    if !weight.is_finite() || weight < 0.0 {
        return Err(HivelogError::ValidationError(format!(
            "vote weight must be a finite number >= 0, got {}",
            weight
        )));
    }
    let cfg = store.config.mandates.clone();

    DbBroker::new(store).with_tx(voter, "mandates.vote", |conn| {
        let mandate = load_mandate(conn, project_key, mandate_id)?
            .ok_or_else(|| HivelogError::NotFound(format!("mandate '{}'", mandate_id)))?;

        let already: Option<String> = conn
            .query_row(
                "SELECT id FROM mandate_votes WHERE mandate_id = ?1 AND voter = ?2",
                params![mandate_id, voter],
                |row| row.get(0),
            )
            .optional()?;
        if already.is_some() {
            return Err(HivelogError::DuplicateAction(format!(
                "'{}' already voted on mandate '{}'",
                voter, mandate_id
            )));
        }

        let now = time::now_ms();
        conn.execute(
            "INSERT INTO mandate_votes(id, mandate_id, voter, vote_type, weight, ts)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                time::new_event_id(),
                mandate_id,
                voter,
                vote.as_str(),
                weight,
                now
            ],
        )?;

        let score = score_on(conn, mandate_id, &cfg, now)?;
        persist_status(conn, &mandate, &score)?;
        Ok(score)
    })
}

pub fn score_mandate(
    store: &Store,
    project_key: &str,
    mandate_id: &str,
) -> Result<MandateScore, HivelogError> {
    score_mandate_at(store, project_key, mandate_id, time::now_ms())
}

/// Score as of `now` (epoch ms). Read-only; the stored status is untouched.
pub fn score_mandate_at(
    store: &Store,
    project_key: &str,
    mandate_id: &str,
    now: i64,
) -> Result<MandateScore, HivelogError> {
    let cfg = &store.config.mandates;
    DbBroker::new(store).with_conn("hivelog", "mandates.score", |conn| {
        if load_mandate(conn, project_key, mandate_id)?.is_none() {
            return Err(HivelogError::NotFound(format!("mandate '{}'", mandate_id)));
        }
        score_on(conn, mandate_id, cfg, now)
    })
}

/// Rescore every mandate of the project and persist status changes.
pub fn refresh_mandates(store: &Store, project_key: &str) -> Result<Vec<MandateScore>, HivelogError> {
    let cfg = &store.config.mandates;
    DbBroker::new(store).with_tx("hivelog", "mandates.refresh", |conn| {
        let now = time::now_ms();
        let mut scores = Vec::new();
        for mandate in query_mandates(conn, project_key, None)? {
            let score = score_on(conn, &mandate.id, cfg, now)?;
            persist_status(conn, &mandate, &score)?;
            scores.push(score);
        }
        Ok(scores)
    })
}

pub fn get_mandate(
    store: &Store,
    project_key: &str,
    mandate_id: &str,
) -> Result<Option<Mandate>, HivelogError> {
    DbBroker::new(store).with_conn("hivelog", "mandates.get", |conn| {
        load_mandate(conn, project_key, mandate_id)
    })
}

fn query_mandates(
    conn: &Connection,
    project_key: &str,
    status: Option<MandateStatus>,
) -> Result<Vec<Mandate>, HivelogError> {
    let sql = format!(
        "SELECT {} FROM mandates WHERE project_key = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY created_at DESC, id DESC",
        MANDATE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![project_key, status.map(|s| s.as_str())],
        mandate_from_row,
    )?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Mandates newest first, optionally limited to one stored status.
pub fn list_mandates(
    store: &Store,
    project_key: &str,
    status: Option<MandateStatus>,
) -> Result<Vec<Mandate>, HivelogError> {
    DbBroker::new(store).with_conn("hivelog", "mandates.list", |conn| {
        query_mandates(conn, project_key, status)
    })
}

/// Push a mandate into the semantic store under [`SEMANTIC_KIND`].
pub fn index_mandate<E, S>(embedder: &E, semantic: &mut S, mandate: &Mandate) -> Result<(), HivelogError>
where
    E: Embedder + ?Sized,
    S: SemanticStore + ?Sized,
{
    let embedding = embedder.embed(&mandate.content)?;
    semantic.store(
        SEMANTIC_KIND,
        &mandate.id,
        &mandate.content,
        &embedding,
        serde_json::json!({
            "project_key": mandate.project_key,
            "content_type": mandate.content_type,
            "status": mandate.status.as_str(),
            "tags": mandate.tags,
        }),
    )
}

/// Nearest indexed mandates to `text`; hits of other kinds are dropped.
pub fn find_similar_mandates<E, S>(
    embedder: &E,
    semantic: &S,
    text: &str,
    k: usize,
) -> Result<Vec<SemanticHit>, HivelogError>
where
    E: Embedder + ?Sized,
    S: SemanticStore + ?Sized,
{
    let query = embedder.embed(text)?;
    Ok(semantic
        .nearest_neighbors(&query, k)?
        .into_iter()
        .filter(|hit| hit.record.kind == SEMANTIC_KIND)
        .collect())
}

pub fn schema() -> JsonValue {
    serde_json::json!({
        "name": "mandate",
        "version": "0.1.0",
        "description": "Decay-weighted voting on shared knowledge",
        "commands": [
            { "name": "propose", "parameters": ["author", "content", "content_type", "tag"] },
            { "name": "vote", "parameters": ["id", "voter", "vote", "weight"] },
            { "name": "score", "parameters": ["id"] },
            { "name": "get", "parameters": ["id"] },
            { "name": "list", "parameters": ["status"] },
            { "name": "refresh", "parameters": [] }
        ],
        "storage": ["hivelog.db:mandates", "hivelog.db:mandate_votes"]
    })
}
