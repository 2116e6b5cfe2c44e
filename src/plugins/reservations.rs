//! Advisory file reservations with glob conflict detection.
//!
//! A reservation is active while `released_at IS NULL AND expires_at > now`.
//! Expiry is evaluated at query time; expired rows stay in the table. The
//! conflict check and the grant run inside the same write transaction.

use crate::core::broker::DbBroker;
use crate::core::error::HivelogError;
use crate::core::event_log;
use crate::core::events::{
    EventKind, FileReleased, FileRenewed, FileReserved, RenewedReservation, ReservedPath,
};
use crate::core::models::Reservation;
use crate::core::projections::sqlite::{RESERVATION_COLUMNS, reservation_from_row};
use crate::core::store::Store;
use crate::core::time::{self, MS_PER_SEC};
use crate::plugins::agents::validate_agent_name;
use clap::{Parser, Subcommand};
use globset::{Glob, GlobBuilder};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Parser, Debug)]
#[clap(name = "reserve", about = "Reserve files and check for conflicts")]
pub struct ReserveCli {
    #[clap(subcommand)]
    pub command: ReserveCommand,
}

#[derive(Subcommand, Debug)]
pub enum ReserveCommand {
    /// Reserve paths or glob patterns for an agent.
    Take {
        #[clap(long)]
        agent: String,
        /// Path or glob (repeatable).
        #[clap(long = "path", required = true)]
        paths: Vec<String>,
        /// Take a shared (non-exclusive) reservation.
        #[clap(long)]
        shared: bool,
        #[clap(long)]
        reason: Option<String>,
        #[clap(long)]
        ttl: Option<i64>,
    },
    /// Release an agent's reservations (by id, by path, or all).
    Release {
        #[clap(long)]
        agent: String,
        #[clap(long = "id")]
        ids: Vec<String>,
        #[clap(long = "path")]
        paths: Vec<String>,
    },
    /// Extend an agent's active reservations.
    Renew {
        #[clap(long)]
        agent: String,
        #[clap(long)]
        extend: i64,
        #[clap(long = "id")]
        ids: Vec<String>,
        #[clap(long = "path")]
        paths: Vec<String>,
    },
    /// Report which requested paths are held by someone else.
    Check {
        #[clap(long = "path", required = true)]
        paths: Vec<String>,
        #[clap(long)]
        agent: Option<String>,
    },
    /// List active reservations.
    List {
        #[clap(long)]
        agent: Option<String>,
    },
}

pub fn run_reserve_cli(
    store: &Store,
    project_key: &str,
    cli: ReserveCli,
) -> Result<JsonValue, HivelogError> {
    match cli.command {
        ReserveCommand::Take {
            agent,
            paths,
            shared,
            reason,
            ttl,
        } => {
            let opts = ReserveOptions {
                exclusive: !shared,
                reason,
                ttl_seconds: ttl,
            };
            let result = reserve_files(store, project_key, &agent, &paths, &opts)?;
            Ok(serde_json::to_value(result)?)
        }
        ReserveCommand::Release { agent, ids, paths } => {
            let selector = ReservationSelector::new(ids, paths);
            let released = release_files(store, project_key, &agent, &selector)?;
            Ok(serde_json::json!({ "released": released }))
        }
        ReserveCommand::Renew {
            agent,
            extend,
            ids,
            paths,
        } => {
            let selector = ReservationSelector::new(ids, paths);
            let renewed = renew_reservations(store, project_key, &agent, extend, &selector)?;
            Ok(serde_json::json!({ "renewed": renewed }))
        }
        ReserveCommand::Check { paths, agent } => {
            let conflicts = check_conflicts(store, project_key, &paths, agent.as_deref())?;
            Ok(serde_json::json!({ "conflicts": conflicts }))
        }
        ReserveCommand::List { agent } => {
            let reservations = get_active_reservations(store, project_key, agent.as_deref())?;
            Ok(serde_json::json!({ "reservations": reservations }))
        }
    }
}

fn compile(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

/// Canonical spelling of a workspace-relative path or pattern: trimmed,
/// `/`-separated, with leading `./` and `/` removed.
pub fn normalize_path(raw: &str) -> String {
    let mut p = raw.trim().replace('\\', "/");
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    p.trim_start_matches('/').to_string()
}

/// Glob match of a concrete path against a reservation pattern. `*` stays
/// within one path segment; `**` crosses segments. An invalid pattern only
/// matches itself. Both sides are normalized first.
pub fn matches(path: &str, pattern: &str) -> bool {
    let path = normalize_path(path);
    let pattern = normalize_path(pattern);
    if path == pattern {
        return true;
    }
    match compile(&pattern) {
        Ok(glob) => glob.compile_matcher().is_match(&path),
        Err(_) => false,
    }
}

/// Two reservation patterns overlap when either one matches the other.
pub fn patterns_overlap(a: &str, b: &str) -> bool {
    matches(a, b) || matches(b, a)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The requested path.
    pub path: String,
    pub held_by: String,
    pub path_pattern: String,
    pub reservation_id: String,
    pub exclusive: bool,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveOptions {
    pub exclusive: bool,
    pub reason: Option<String>,
    /// Falls back to `reservations.default_ttl_seconds`.
    pub ttl_seconds: Option<i64>,
}

impl Default for ReserveOptions {
    fn default() -> Self {
        Self {
            exclusive: true,
            reason: None,
            ttl_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReserveResult {
    pub granted: Vec<Reservation>,
    pub conflicts: Vec<Conflict>,
}

/// Which of an agent's reservations to act on: ids win over paths; neither
/// selects everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReservationSelector {
    pub ids: Option<Vec<String>>,
    pub paths: Option<Vec<String>>,
}

impl ReservationSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn ids(ids: &[&str]) -> Self {
        Self {
            ids: Some(ids.iter().map(|s| s.to_string()).collect()),
            paths: None,
        }
    }

    pub fn paths(paths: &[&str]) -> Self {
        Self {
            ids: None,
            paths: Some(paths.iter().map(|s| s.to_string()).collect()),
        }
    }

    fn new(ids: Vec<String>, paths: Vec<String>) -> Self {
        Self {
            ids: Some(ids).filter(|v| !v.is_empty()),
            paths: Some(paths).filter(|v| !v.is_empty()),
        }
    }

    fn normalized(&self) -> Self {
        Self {
            ids: self.ids.clone(),
            paths: self
                .paths
                .as_ref()
                .map(|v| v.iter().map(|p| normalize_path(p)).collect()),
        }
    }

    fn selects(&self, r: &Reservation) -> bool {
        let ids = self.ids.as_ref().filter(|v| !v.is_empty());
        let paths = self.paths.as_ref().filter(|v| !v.is_empty());
        match (ids, paths) {
            (Some(ids), _) => ids.contains(&r.id),
            (None, Some(paths)) => paths.contains(&r.path_pattern),
            (None, None) => true,
        }
    }
}

fn validate_paths(paths: &[String]) -> Result<Vec<String>, HivelogError> {
    let mut out: Vec<String> = Vec::with_capacity(paths.len());
    for raw in paths {
        let p = normalize_path(raw);
        if p.is_empty() {
            return Err(HivelogError::ValidationError(format!(
                "reservation path '{}' is empty after normalization",
                raw
            )));
        }
        compile(&p).map_err(|e| {
            HivelogError::ValidationError(format!("Invalid path pattern '{}': {}", p, e))
        })?;
        if !out.contains(&p) {
            out.push(p);
        }
    }
    if out.is_empty() {
        return Err(HivelogError::ValidationError(
            "at least one path is required".to_string(),
        ));
    }
    Ok(out)
}

fn expiry_after(from: i64, seconds: i64) -> Result<i64, HivelogError> {
    seconds
        .checked_mul(MS_PER_SEC)
        .and_then(|ms| from.checked_add(ms))
        .ok_or_else(|| {
            HivelogError::ValidationError(format!("{} seconds overflows the clock", seconds))
        })
}

fn active_rows(
    conn: &Connection,
    project_key: &str,
    agent: Option<&str>,
    now: i64,
) -> Result<Vec<Reservation>, HivelogError> {
    let sql = format!(
        "SELECT {} FROM reservations
         WHERE project_key = ?1 AND released_at IS NULL AND expires_at > ?2
           AND (?3 IS NULL OR agent_name = ?3)
         ORDER BY created_at ASC, id ASC",
        RESERVATION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![project_key, now, agent], reservation_from_row)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn find_conflicts(
    conn: &Connection,
    project_key: &str,
    paths: &[String],
    excluding_agent: Option<&str>,
    now: i64,
) -> Result<Vec<Conflict>, HivelogError> {
    let held: Vec<Reservation> = active_rows(conn, project_key, None, now)?
        .into_iter()
        .filter(|r| r.exclusive && Some(r.agent_name.as_str()) != excluding_agent)
        .collect();

    let mut conflicts = Vec::new();
    for path in paths {
        for r in held.iter().filter(|r| patterns_overlap(path, &r.path_pattern)) {
            conflicts.push(Conflict {
                path: path.clone(),
                held_by: r.agent_name.clone(),
                path_pattern: r.path_pattern.clone(),
                reservation_id: r.id.clone(),
                exclusive: r.exclusive,
                expires_at: r.expires_at,
            });
        }
    }
    Ok(conflicts)
}

pub fn check_conflicts(
    store: &Store,
    project_key: &str,
    paths: &[String],
    excluding_agent: Option<&str>,
) -> Result<Vec<Conflict>, HivelogError> {
    check_conflicts_at(store, project_key, paths, excluding_agent, time::now_ms())
}

/// [`check_conflicts`] evaluated at an explicit instant.
pub fn check_conflicts_at(
    store: &Store,
    project_key: &str,
    paths: &[String],
    excluding_agent: Option<&str>,
    now: i64,
) -> Result<Vec<Conflict>, HivelogError> {
    let paths = validate_paths(paths)?;
    DbBroker::new(store).with_conn("hivelog", "reservations.check", |conn| {
        find_conflicts(conn, project_key, &paths, excluding_agent, now)
    })
}

/// Grant every requested path or none of them.
pub fn reserve_files(
    store: &Store,
    project_key: &str,
    agent: &str,
    paths: &[String],
    opts: &ReserveOptions,
) -> Result<ReserveResult, HivelogError> {
    validate_agent_name(agent)?;
    let paths = validate_paths(paths)?;
    let cfg = &store.config.reservations;
    let ttl = opts.ttl_seconds.unwrap_or(cfg.default_ttl_seconds);
    if ttl < cfg.min_ttl_seconds {
        return Err(HivelogError::ValidationError(format!(
            "ttl_seconds must be at least {} (got {})",
            cfg.min_ttl_seconds, ttl
        )));
    }
    if ttl > cfg.max_ttl_seconds {
        return Err(HivelogError::ValidationError(format!(
            "ttl_seconds must be at most {} (got {})",
            cfg.max_ttl_seconds, ttl
        )));
    }

    DbBroker::new(store).with_tx(agent, "reservations.reserve", |conn| {
        let now = time::now_ms();
        let expires_at = expiry_after(now, ttl)?;
        let conflicts = find_conflicts(conn, project_key, &paths, Some(agent), now)?;
        if !conflicts.is_empty() {
            tracing::warn!(
                project_key,
                agent,
                conflicts = conflicts.len(),
                "reservation refused"
            );
            return Ok(ReserveResult {
                granted: Vec::new(),
                conflicts,
            });
        }

        let reserved: Vec<ReservedPath> = paths
            .iter()
            .map(|p| ReservedPath {
                reservation_id: time::new_event_id(),
                path_pattern: p.clone(),
            })
            .collect();
        let ids: Vec<String> = reserved.iter().map(|r| r.reservation_id.clone()).collect();

        event_log::append_and_project(
            conn,
            project_key,
            EventKind::FileReserved(FileReserved {
                agent_name: agent.to_string(),
                paths: reserved,
                exclusive: opts.exclusive,
                reason: opts.reason.clone(),
                expires_at,
            }),
            now,
        )?;

        let granted = active_rows(conn, project_key, Some(agent), now)?
            .into_iter()
            .filter(|r| ids.contains(&r.id))
            .collect();
        Ok(ReserveResult {
            granted,
            conflicts: Vec::new(),
        })
    })
}

/// Release matching active reservations. Returns how many were released;
/// releasing nothing appends nothing.
pub fn release_files(
    store: &Store,
    project_key: &str,
    agent: &str,
    selector: &ReservationSelector,
) -> Result<usize, HivelogError> {
    validate_agent_name(agent)?;
    let selector = selector.normalized();
    DbBroker::new(store).with_tx(agent, "reservations.release", |conn| {
        let now = time::now_ms();
        let released = active_rows(conn, project_key, Some(agent), now)?
            .iter()
            .filter(|r| selector.selects(r))
            .count();
        if released == 0 {
            return Ok(0);
        }
        event_log::append_and_project(
            conn,
            project_key,
            EventKind::FileReleased(FileReleased {
                agent_name: agent.to_string(),
                reservation_ids: selector.ids.clone().filter(|v| !v.is_empty()),
                paths: selector.paths.clone().filter(|v| !v.is_empty()),
            }),
            now,
        )?;
        Ok(released)
    })
}

/// Push the expiry of matching active reservations `extend_seconds` past
/// `max(expires_at, now)`. Expired reservations are not revived.
pub fn renew_reservations(
    store: &Store,
    project_key: &str,
    agent: &str,
    extend_seconds: i64,
    selector: &ReservationSelector,
) -> Result<Vec<Reservation>, HivelogError> {
    validate_agent_name(agent)?;
    let max = store.config.reservations.max_ttl_seconds;
    if extend_seconds <= 0 || extend_seconds > max {
        return Err(HivelogError::ValidationError(format!(
            "extend_seconds must be between 1 and {} (got {})",
            max, extend_seconds
        )));
    }
    let selector = selector.normalized();

    DbBroker::new(store).with_tx(agent, "reservations.renew", |conn| {
        let now = time::now_ms();
        let renewals = active_rows(conn, project_key, Some(agent), now)?
            .iter()
            .filter(|r| selector.selects(r))
            .map(|r| {
                Ok(RenewedReservation {
                    reservation_id: r.id.clone(),
                    expires_at: expiry_after(r.expires_at.max(now), extend_seconds)?,
                })
            })
            .collect::<Result<Vec<_>, HivelogError>>()?;
        if renewals.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = renewals.iter().map(|r| r.reservation_id.clone()).collect();

        event_log::append_and_project(
            conn,
            project_key,
            EventKind::FileRenewed(FileRenewed {
                agent_name: agent.to_string(),
                renewals,
            }),
            now,
        )?;

        Ok(active_rows(conn, project_key, Some(agent), now)?
            .into_iter()
            .filter(|r| ids.contains(&r.id))
            .collect())
    })
}

pub fn get_active_reservations(
    store: &Store,
    project_key: &str,
    agent: Option<&str>,
) -> Result<Vec<Reservation>, HivelogError> {
    get_active_reservations_at(store, project_key, agent, time::now_ms())
}

/// Active reservations as of `now` (epoch ms).
pub fn get_active_reservations_at(
    store: &Store,
    project_key: &str,
    agent: Option<&str>,
    now: i64,
) -> Result<Vec<Reservation>, HivelogError> {
    DbBroker::new(store).with_conn("hivelog", "reservations.active", |conn| {
        active_rows(conn, project_key, agent, now)
    })
}

pub fn schema() -> JsonValue {
    serde_json::json!({
        "name": "reserve",
        "version": "0.1.0",
        "description": "Advisory glob reservations with TTL and all-or-nothing grants",
        "commands": [
            { "name": "take", "parameters": ["agent", "path", "shared", "reason", "ttl"] },
            { "name": "release", "parameters": ["agent", "id", "path"] },
            { "name": "renew", "parameters": ["agent", "extend", "id", "path"] },
            { "name": "check", "parameters": ["path", "agent"] },
            { "name": "list", "parameters": ["agent"] }
        ],
        "storage": ["hivelog.db:reservations"]
    })
}
