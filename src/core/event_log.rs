//! Append-only event log.
//!
//! Sequences are assigned per `project_key` inside the append transaction as
//! `MAX(sequence) + 1`, so they are gapless within a project and the
//! `(project_key, sequence)` primary key rejects any reuse. Every append goes
//! through [`append_and_project`], which applies the projection reducers on
//! the same connection: a reducer error rolls the append back with it.

use crate::core::broker::DbBroker;
use crate::core::error::HivelogError;
use crate::core::events::{Event, EventKind};
use crate::core::projections::{self, SqliteProjections};
use crate::core::store::Store;
use crate::core::time;
use rusqlite::{Connection, ToSql, params};
use serde::{Deserialize, Serialize};

/// Filter for [`read_events`]. Every field is optional; results ascend by sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub project_key: Option<String>,
    pub types: Option<Vec<String>>,
    /// Inclusive lower bound on the event timestamp (epoch ms).
    pub since: Option<i64>,
    /// Inclusive upper bound on the event timestamp (epoch ms).
    pub until: Option<i64>,
    pub after_sequence: Option<i64>,
    pub limit: Option<u32>,
}

impl EventFilter {
    pub fn for_project(project_key: &str) -> Self {
        Self {
            project_key: Some(project_key.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppendResult {
    pub event: Event,
    pub sequence: i64,
}

fn validate_project_key(project_key: &str) -> Result<(), HivelogError> {
    if project_key.trim().is_empty() {
        return Err(HivelogError::ValidationError(
            "project_key must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Insert one event row. Callers must already hold a write transaction.
pub fn append_event(
    conn: &Connection,
    project_key: &str,
    kind: EventKind,
    timestamp: i64,
) -> Result<Event, HivelogError> {
    validate_project_key(project_key)?;

    let sequence: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence), 0) + 1 FROM events WHERE project_key = ?1",
        params![project_key],
        |row| row.get(0),
    )?;
    let id = time::new_event_id();
    let (event_type, payload) = kind.to_columns()?;

    conn.execute(
        "INSERT INTO events(project_key, sequence, id, event_type, ts, payload)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        params![project_key, sequence, id, event_type, timestamp, payload],
    )?;

    tracing::debug!(project_key, sequence, event_type, "event appended");

    Ok(Event {
        sequence,
        id,
        project_key: project_key.to_string(),
        timestamp,
        kind,
    })
}

/// Append and apply to the SQLite projections on the same connection.
pub fn append_and_project(
    conn: &Connection,
    project_key: &str,
    kind: EventKind,
    timestamp: i64,
) -> Result<Event, HivelogError> {
    let event = append_event(conn, project_key, kind, timestamp)?;
    projections::apply_event(&mut SqliteProjections::new(conn), &event)?;
    Ok(event)
}

/// Append one event (and its projection update) as its own transaction.
pub fn append(
    store: &Store,
    project_key: &str,
    kind: EventKind,
) -> Result<AppendResult, HivelogError> {
    let op = format!("event_log.append.{}", kind.event_type());
    let actor = kind.actor().to_string();
    let event = DbBroker::new(store).with_tx(&actor, &op, |conn| {
        append_and_project(conn, project_key, kind, time::now_ms())
    })?;
    Ok(AppendResult {
        sequence: event.sequence,
        event,
    })
}

/// Read events matching `filter` on an existing connection.
pub fn read_events(conn: &Connection, filter: &EventFilter) -> Result<Vec<Event>, HivelogError> {
    let mut sql = String::from(
        "SELECT project_key, sequence, id, event_type, ts, payload FROM events WHERE 1=1",
    );
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(p) = &filter.project_key {
        args.push(Box::new(p.clone()));
        sql.push_str(&format!(" AND project_key = ?{}", args.len()));
    }
    if let Some(types) = filter.types.as_ref().filter(|t| !t.is_empty()) {
        let mut marks = Vec::with_capacity(types.len());
        for t in types {
            args.push(Box::new(t.clone()));
            marks.push(format!("?{}", args.len()));
        }
        sql.push_str(&format!(" AND event_type IN ({})", marks.join(", ")));
    }
    if let Some(since) = filter.since {
        args.push(Box::new(since));
        sql.push_str(&format!(" AND ts >= ?{}", args.len()));
    }
    if let Some(until) = filter.until {
        args.push(Box::new(until));
        sql.push_str(&format!(" AND ts <= ?{}", args.len()));
    }
    if let Some(after) = filter.after_sequence {
        args.push(Box::new(after));
        sql.push_str(&format!(" AND sequence > ?{}", args.len()));
    }

    // Without a project the only total order is insertion order.
    if filter.project_key.is_some() {
        sql.push_str(" ORDER BY sequence ASC");
    } else {
        sql.push_str(" ORDER BY rowid ASC");
    }
    if let Some(limit) = filter.limit {
        args.push(Box::new(limit as i64));
        sql.push_str(&format!(" LIMIT ?{}", args.len()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let arg_refs: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let rows = stmt.query_map(arg_refs.as_slice(), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut events = Vec::new();
    for r in rows {
        let (project_key, sequence, id, event_type, timestamp, payload) = r?;
        events.push(Event {
            sequence,
            id,
            project_key,
            timestamp,
            kind: EventKind::from_columns(&event_type, &payload)?,
        });
    }
    Ok(events)
}

pub fn read(store: &Store, filter: &EventFilter) -> Result<Vec<Event>, HivelogError> {
    DbBroker::new(store).with_conn("hivelog", "event_log.read", |conn| {
        read_events(conn, filter)
    })
}

/// Highest sequence for a project, or across all projects; 0 when empty.
pub fn latest_sequence(store: &Store, project_key: Option<&str>) -> Result<i64, HivelogError> {
    DbBroker::new(store).with_conn("hivelog", "event_log.latest_sequence", |conn| {
        let seq = match project_key {
            Some(p) => conn.query_row(
                "SELECT COALESCE(MAX(sequence), 0) FROM events WHERE project_key = ?1",
                params![p],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COALESCE(MAX(sequence), 0) FROM events", [], |row| {
                row.get(0)
            })?,
        };
        Ok(seq)
    })
}
