//! Projections: read-optimized views derived from the event log.
//!
//! Every event type maps to exactly one reducer below. Reducers are written
//! against [`ProjectionStore`], so the durable SQLite tables and the in-memory
//! double go through identical logic. Each store keeps a per-project cursor
//! of the last applied sequence; an event at or below the cursor is skipped,
//! which makes replay of an already-applied event a no-op.

mod memory;
pub(crate) mod sqlite;

pub use memory::MemoryProjections;
pub use sqlite::SqliteProjections;

use crate::core::broker::DbBroker;
use crate::core::error::HivelogError;
use crate::core::event_log::{self, EventFilter};
use crate::core::events::{
    AgentRegistered, CheckpointRecovered, Event, EventKind, FileReleased, FileRenewed,
    FileReserved, MessageReceipt, MessageSent,
};
use crate::core::models::{
    Agent, Message, RecipientRecord, RecoveryState, Reservation, SwarmBeadContext,
};
use crate::core::schemas;
use crate::core::store::Store;
use serde::Serialize;

/// Storage seam for projection state.
///
/// Implementations only store and fetch rows; all merge rules live in the
/// reducers of this module.
pub trait ProjectionStore {
    fn last_applied(&self, project_key: &str) -> Result<i64, HivelogError>;
    fn set_last_applied(&mut self, project_key: &str, sequence: i64) -> Result<(), HivelogError>;

    fn get_agent(&self, project_key: &str, name: &str) -> Result<Option<Agent>, HivelogError>;
    fn put_agent(&mut self, agent: &Agent) -> Result<(), HivelogError>;

    fn insert_message_if_absent(&mut self, message: &Message) -> Result<(), HivelogError>;
    fn get_recipient(
        &self,
        message_id: &str,
        agent_name: &str,
    ) -> Result<Option<RecipientRecord>, HivelogError>;
    fn insert_recipient_if_absent(&mut self, record: &RecipientRecord) -> Result<(), HivelogError>;
    fn put_recipient(&mut self, record: &RecipientRecord) -> Result<(), HivelogError>;

    /// Every reservation row the agent has ever held in the project.
    fn agent_reservations(
        &self,
        project_key: &str,
        agent_name: &str,
    ) -> Result<Vec<Reservation>, HivelogError>;
    fn put_reservation(&mut self, reservation: &Reservation) -> Result<(), HivelogError>;
    fn delete_reservation(&mut self, id: &str) -> Result<(), HivelogError>;

    fn put_context(&mut self, context: &SwarmBeadContext) -> Result<(), HivelogError>;
    fn set_recovery_state(
        &mut self,
        project_key: &str,
        epic_id: &str,
        bead_id: &str,
        agent_name: &str,
        state: RecoveryState,
    ) -> Result<(), HivelogError>;

    /// Full, deterministically ordered dump of one project's projection rows.
    fn snapshot(&self, project_key: &str) -> Result<ProjectionSnapshot, HivelogError>;
}

/// Comparable dump of projection state. Rows are sorted by primary key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectionSnapshot {
    pub last_sequence: i64,
    pub agents: Vec<Agent>,
    pub messages: Vec<Message>,
    pub recipients: Vec<RecipientRecord>,
    pub reservations: Vec<Reservation>,
    pub contexts: Vec<SwarmBeadContext>,
}

/// Apply one event. Returns `false` when the event was already applied.
pub fn apply_event<S: ProjectionStore + ?Sized>(
    store: &mut S,
    event: &Event,
) -> Result<bool, HivelogError> {
    if event.sequence <= store.last_applied(&event.project_key)? {
        return Ok(false);
    }

    let project = event.project_key.as_str();
    let ts = event.timestamp;

    match &event.kind {
        EventKind::AgentRegistered(p) => apply_agent_registered(store, project, ts, p)?,
        EventKind::AgentActive(p) => touch_agent(store, project, &p.agent_name, ts)?,
        EventKind::MessageSent(p) => apply_message_sent(store, project, ts, p)?,
        EventKind::MessageRead(p) => apply_message_read(store, ts, p)?,
        EventKind::MessageAcked(p) => apply_message_acked(store, ts, p)?,
        EventKind::FileReserved(p) => apply_file_reserved(store, project, ts, p)?,
        EventKind::FileReleased(p) => apply_file_released(store, project, ts, p)?,
        EventKind::FileRenewed(p) => apply_file_renewed(store, project, ts, p)?,
        EventKind::TaskStarted(p) => touch_agent(store, project, &p.agent_name, ts)?,
        EventKind::TaskProgress(p) => touch_agent(store, project, &p.agent_name, ts)?,
        EventKind::TaskCompleted(p) => touch_agent(store, project, &p.agent_name, ts)?,
        EventKind::TaskBlocked(p) => touch_agent(store, project, &p.agent_name, ts)?,
        EventKind::CheckpointCreated(p) => {
            store.put_context(&p.context)?;
            touch_agent(store, project, &p.context.agent_name, ts)?;
        }
        EventKind::CheckpointRecovered(p) => apply_checkpoint_recovered(store, project, p)?,
    }

    store.set_last_applied(project, event.sequence)?;
    Ok(true)
}

/// Re-registration merges: identity fields are replaced, an omitted task
/// description keeps the old one, `registered_at` never moves.
fn apply_agent_registered<S: ProjectionStore + ?Sized>(
    store: &mut S,
    project: &str,
    ts: i64,
    p: &AgentRegistered,
) -> Result<(), HivelogError> {
    let agent = match store.get_agent(project, &p.agent_name)? {
        Some(existing) => Agent {
            program: p.program.clone(),
            model: p.model.clone(),
            task_description: p
                .task_description
                .clone()
                .or(existing.task_description),
            last_active_at: existing.last_active_at.max(ts),
            ..existing
        },
        None => Agent {
            project_key: project.to_string(),
            name: p.agent_name.clone(),
            program: p.program.clone(),
            model: p.model.clone(),
            task_description: p.task_description.clone(),
            registered_at: ts,
            last_active_at: ts,
        },
    };
    store.put_agent(&agent)
}

/// Activity for an unregistered agent is recorded in the log but has no row to touch.
fn touch_agent<S: ProjectionStore + ?Sized>(
    store: &mut S,
    project: &str,
    name: &str,
    ts: i64,
) -> Result<(), HivelogError> {
    if let Some(mut agent) = store.get_agent(project, name)? {
        if ts > agent.last_active_at {
            agent.last_active_at = ts;
            store.put_agent(&agent)?;
        }
    }
    Ok(())
}

fn apply_message_sent<S: ProjectionStore + ?Sized>(
    store: &mut S,
    project: &str,
    ts: i64,
    p: &MessageSent,
) -> Result<(), HivelogError> {
    store.insert_message_if_absent(&Message {
        id: p.message_id.clone(),
        project_key: project.to_string(),
        from_agent: p.from_agent.clone(),
        subject: p.subject.clone(),
        body: p.body.clone(),
        thread_id: p.thread_id.clone(),
        importance: p.importance,
        ack_required: p.ack_required,
        created_at: ts,
    })?;
    for to in &p.to {
        store.insert_recipient_if_absent(&RecipientRecord {
            message_id: p.message_id.clone(),
            agent_name: to.clone(),
            read_at: None,
            acked_at: None,
        })?;
    }
    touch_agent(store, project, &p.from_agent, ts)
}

/// First read wins; later reads keep the original timestamp.
fn apply_message_read<S: ProjectionStore + ?Sized>(
    store: &mut S,
    ts: i64,
    p: &MessageReceipt,
) -> Result<(), HivelogError> {
    if let Some(mut rec) = store.get_recipient(&p.message_id, &p.agent_name)? {
        if rec.read_at.is_none() {
            rec.read_at = Some(ts);
            store.put_recipient(&rec)?;
        }
    }
    Ok(())
}

/// Acknowledging implies reading.
fn apply_message_acked<S: ProjectionStore + ?Sized>(
    store: &mut S,
    ts: i64,
    p: &MessageReceipt,
) -> Result<(), HivelogError> {
    if let Some(mut rec) = store.get_recipient(&p.message_id, &p.agent_name)? {
        let before = rec.clone();
        rec.read_at = rec.read_at.or(Some(ts));
        rec.acked_at = rec.acked_at.or(Some(ts));
        if rec != before {
            store.put_recipient(&rec)?;
        }
    }
    Ok(())
}

/// Re-reserving a pattern replaces the agent's active row for it.
fn apply_file_reserved<S: ProjectionStore + ?Sized>(
    store: &mut S,
    project: &str,
    ts: i64,
    p: &FileReserved,
) -> Result<(), HivelogError> {
    let held = store.agent_reservations(project, &p.agent_name)?;
    for path in &p.paths {
        for r in held
            .iter()
            .filter(|r| r.is_active(ts) && r.path_pattern == path.path_pattern)
        {
            store.delete_reservation(&r.id)?;
        }
        store.put_reservation(&Reservation {
            id: path.reservation_id.clone(),
            project_key: project.to_string(),
            agent_name: p.agent_name.clone(),
            path_pattern: path.path_pattern.clone(),
            exclusive: p.exclusive,
            reason: p.reason.clone(),
            created_at: ts,
            expires_at: p.expires_at,
            released_at: None,
        })?;
    }
    Ok(())
}

fn apply_file_released<S: ProjectionStore + ?Sized>(
    store: &mut S,
    project: &str,
    ts: i64,
    p: &FileReleased,
) -> Result<(), HivelogError> {
    let active = store
        .agent_reservations(project, &p.agent_name)?
        .into_iter()
        .filter(|r| r.is_active(ts));

    let ids = p.reservation_ids.as_ref().filter(|v| !v.is_empty());
    let paths = p.paths.as_ref().filter(|v| !v.is_empty());

    for mut r in active {
        let selected = match (ids, paths) {
            (Some(ids), _) => ids.contains(&r.id),
            (None, Some(paths)) => paths.contains(&r.path_pattern),
            (None, None) => true,
        };
        if selected {
            r.released_at = Some(ts);
            store.put_reservation(&r)?;
        }
    }
    Ok(())
}

fn apply_file_renewed<S: ProjectionStore + ?Sized>(
    store: &mut S,
    project: &str,
    ts: i64,
    p: &FileRenewed,
) -> Result<(), HivelogError> {
    let held = store.agent_reservations(project, &p.agent_name)?;
    for renewal in &p.renewals {
        if let Some(r) = held
            .iter()
            .find(|r| r.id == renewal.reservation_id && r.is_active(ts))
        {
            let mut r = r.clone();
            r.expires_at = r.expires_at.max(renewal.expires_at);
            store.put_reservation(&r)?;
        }
    }
    Ok(())
}

fn apply_checkpoint_recovered<S: ProjectionStore + ?Sized>(
    store: &mut S,
    project: &str,
    p: &CheckpointRecovered,
) -> Result<(), HivelogError> {
    let state = if p.success {
        RecoveryState::Recovered
    } else {
        RecoveryState::Failed
    };
    store.set_recovery_state(project, &p.epic_id, &p.bead_id, &p.agent_name, state)
}

/// Drop a project's projection rows and replay its whole log through the reducers.
/// Returns the number of events replayed.
pub fn rebuild_projections(store: &Store, project_key: &str) -> Result<u64, HivelogError> {
    let broker = DbBroker::new(store);
    let count = broker.with_tx("hivelog", "projections.rebuild", |conn| {
        for table in schemas::PROJECTION_TABLES {
            let sql = if *table == "message_recipients" {
                "DELETE FROM message_recipients WHERE message_id IN
                 (SELECT id FROM messages WHERE project_key = ?1)"
                    .to_string()
            } else {
                format!("DELETE FROM {} WHERE project_key = ?1", table)
            };
            conn.execute(&sql, [project_key])?;
        }

        let events = event_log::read_events(conn, &EventFilter::for_project(project_key))?;
        let mut projections = SqliteProjections::new(conn);
        let mut count = 0u64;
        for ev in &events {
            if apply_event(&mut projections, ev)? {
                count += 1;
            }
        }
        Ok(count)
    })?;

    tracing::info!(project_key, events = count, "projections rebuilt from event log");
    Ok(count)
}

/// Current SQLite projection state for a project.
pub fn snapshot(store: &Store, project_key: &str) -> Result<ProjectionSnapshot, HivelogError> {
    DbBroker::new(store).with_conn("hivelog", "projections.snapshot", |conn| {
        SqliteProjections::new(conn).snapshot(project_key)
    })
}
