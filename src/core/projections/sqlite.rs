use super::{ProjectionSnapshot, ProjectionStore};
use crate::core::error::HivelogError;
use crate::core::models::{
    Agent, Message, RecipientRecord, RecoveryState, Reservation, SwarmBeadContext,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;
use std::str::FromStr;

pub(crate) const AGENT_COLUMNS: &str =
    "project_key, name, program, model, task_description, registered_at, last_active_at";
pub(crate) const MESSAGE_COLUMNS: &str =
    "id, project_key, from_agent, subject, body, thread_id, importance, ack_required, created_at";
pub(crate) const RESERVATION_COLUMNS: &str = "id, project_key, agent_name, path_pattern, exclusive, reason, created_at, expires_at, released_at";
pub(crate) const CONTEXT_COLUMNS: &str = "project_key, epic_id, bead_id, agent_name, files, strategy, directives, progress_percent, last_milestone, recovery_state, checkpointed_at";

/// Projection store over the kernel tables. Borrow a connection that is
/// already inside the caller's transaction.
pub struct SqliteProjections<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteProjections<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

/// Parse a text column into one of the kernel's string enums. A value outside
/// the enum surfaces as a conversion failure on that column.
pub(crate) fn enum_column<T>(idx: usize, raw: &str) -> Result<T, rusqlite::Error>
where
    T: FromStr<Err = HivelogError>,
{
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decode a JSON text column.
pub(crate) fn json_column<T: DeserializeOwned>(idx: usize, raw: &str) -> Result<T, rusqlite::Error> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn agent_from_row(row: &Row) -> Result<Agent, rusqlite::Error> {
    Ok(Agent {
        project_key: row.get(0)?,
        name: row.get(1)?,
        program: row.get(2)?,
        model: row.get(3)?,
        task_description: row.get(4)?,
        registered_at: row.get(5)?,
        last_active_at: row.get(6)?,
    })
}

pub(crate) fn message_from_row(row: &Row) -> Result<Message, rusqlite::Error> {
    let importance: String = row.get(6)?;
    Ok(Message {
        id: row.get(0)?,
        project_key: row.get(1)?,
        from_agent: row.get(2)?,
        subject: row.get(3)?,
        body: row.get(4)?,
        thread_id: row.get(5)?,
        importance: enum_column(6, &importance)?,
        ack_required: row.get::<_, i64>(7)? != 0,
        created_at: row.get(8)?,
    })
}

pub(crate) fn reservation_from_row(row: &Row) -> Result<Reservation, rusqlite::Error> {
    Ok(Reservation {
        id: row.get(0)?,
        project_key: row.get(1)?,
        agent_name: row.get(2)?,
        path_pattern: row.get(3)?,
        exclusive: row.get::<_, i64>(4)? != 0,
        reason: row.get(5)?,
        created_at: row.get(6)?,
        expires_at: row.get(7)?,
        released_at: row.get(8)?,
    })
}

/// Checkpoint row as stored; JSON columns are parsed separately so a corrupt
/// row can be reported instead of failing the whole query.
#[derive(Debug, Clone)]
pub(crate) struct RawContextRow {
    pub project_key: String,
    pub epic_id: String,
    pub bead_id: String,
    pub agent_name: String,
    pub files: String,
    pub strategy: String,
    pub directives: String,
    pub progress_percent: i64,
    pub last_milestone: String,
    pub recovery_state: String,
    pub checkpointed_at: i64,
}

impl RawContextRow {
    pub fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            project_key: row.get(0)?,
            epic_id: row.get(1)?,
            bead_id: row.get(2)?,
            agent_name: row.get(3)?,
            files: row.get(4)?,
            strategy: row.get(5)?,
            directives: row.get(6)?,
            progress_percent: row.get(7)?,
            last_milestone: row.get(8)?,
            recovery_state: row.get(9)?,
            checkpointed_at: row.get(10)?,
        })
    }

    pub fn parse(self) -> Result<SwarmBeadContext, HivelogError> {
        let key = format!("{}/{}/{}", self.epic_id, self.bead_id, self.agent_name);
        let corrupt =
            |what: &str, detail: String| HivelogError::CorruptCheckpoint(format!("{}: {} ({})", key, what, detail));

        let files: Vec<String> =
            serde_json::from_str(&self.files).map_err(|e| corrupt("files", e.to_string()))?;
        let directives: Vec<String> = serde_json::from_str(&self.directives)
            .map_err(|e| corrupt("directives", e.to_string()))?;
        let progress_percent = u8::try_from(self.progress_percent)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| corrupt("progress_percent", self.progress_percent.to_string()))?;
        let last_milestone = self
            .last_milestone
            .parse()
            .map_err(|e: HivelogError| corrupt("last_milestone", e.to_string()))?;
        let recovery_state = self
            .recovery_state
            .parse()
            .map_err(|e: HivelogError| corrupt("recovery_state", e.to_string()))?;

        Ok(SwarmBeadContext {
            project_key: self.project_key,
            epic_id: self.epic_id,
            bead_id: self.bead_id,
            agent_name: self.agent_name,
            files,
            strategy: self.strategy,
            directives,
            progress_percent,
            last_milestone,
            recovery_state,
            checkpointed_at: self.checkpointed_at,
        })
    }
}

impl ProjectionStore for SqliteProjections<'_> {
    fn last_applied(&self, project_key: &str) -> Result<i64, HivelogError> {
        let seq: Option<i64> = self
            .conn
            .query_row(
                "SELECT last_sequence FROM projection_cursor WHERE project_key = ?1",
                params![project_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq.unwrap_or(0))
    }

    fn set_last_applied(&mut self, project_key: &str, sequence: i64) -> Result<(), HivelogError> {
        self.conn.execute(
            "INSERT INTO projection_cursor(project_key, last_sequence) VALUES(?1, ?2)
             ON CONFLICT(project_key) DO UPDATE SET last_sequence = excluded.last_sequence",
            params![project_key, sequence],
        )?;
        Ok(())
    }

    fn get_agent(&self, project_key: &str, name: &str) -> Result<Option<Agent>, HivelogError> {
        let sql = format!(
            "SELECT {} FROM agents WHERE project_key = ?1 AND name = ?2",
            AGENT_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![project_key, name], agent_from_row)
            .optional()?)
    }

    fn put_agent(&mut self, agent: &Agent) -> Result<(), HivelogError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO agents(project_key, name, program, model, task_description, registered_at, last_active_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                agent.project_key,
                agent.name,
                agent.program,
                agent.model,
                agent.task_description,
                agent.registered_at,
                agent.last_active_at
            ],
        )?;
        Ok(())
    }

    fn insert_message_if_absent(&mut self, message: &Message) -> Result<(), HivelogError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO messages(id, project_key, from_agent, subject, body, thread_id, importance, ack_required, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id,
                message.project_key,
                message.from_agent,
                message.subject,
                message.body,
                message.thread_id,
                message.importance.as_str(),
                message.ack_required as i64,
                message.created_at
            ],
        )?;
        Ok(())
    }

    fn get_recipient(
        &self,
        message_id: &str,
        agent_name: &str,
    ) -> Result<Option<RecipientRecord>, HivelogError> {
        Ok(self
            .conn
            .query_row(
                "SELECT message_id, agent_name, read_at, acked_at FROM message_recipients
                 WHERE message_id = ?1 AND agent_name = ?2",
                params![message_id, agent_name],
                |row| {
                    Ok(RecipientRecord {
                        message_id: row.get(0)?,
                        agent_name: row.get(1)?,
                        read_at: row.get(2)?,
                        acked_at: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    fn insert_recipient_if_absent(&mut self, record: &RecipientRecord) -> Result<(), HivelogError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO message_recipients(message_id, agent_name, read_at, acked_at)
             VALUES(?1, ?2, ?3, ?4)",
            params![
                record.message_id,
                record.agent_name,
                record.read_at,
                record.acked_at
            ],
        )?;
        Ok(())
    }

    fn put_recipient(&mut self, record: &RecipientRecord) -> Result<(), HivelogError> {
        self.conn.execute(
            "UPDATE message_recipients SET read_at = ?3, acked_at = ?4
             WHERE message_id = ?1 AND agent_name = ?2",
            params![
                record.message_id,
                record.agent_name,
                record.read_at,
                record.acked_at
            ],
        )?;
        Ok(())
    }

    fn agent_reservations(
        &self,
        project_key: &str,
        agent_name: &str,
    ) -> Result<Vec<Reservation>, HivelogError> {
        let sql = format!(
            "SELECT {} FROM reservations WHERE project_key = ?1 AND agent_name = ?2 ORDER BY id",
            RESERVATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_key, agent_name], reservation_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn put_reservation(&mut self, r: &Reservation) -> Result<(), HivelogError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO reservations(id, project_key, agent_name, path_pattern, exclusive, reason, created_at, expires_at, released_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                r.id,
                r.project_key,
                r.agent_name,
                r.path_pattern,
                r.exclusive as i64,
                r.reason,
                r.created_at,
                r.expires_at,
                r.released_at
            ],
        )?;
        Ok(())
    }

    fn delete_reservation(&mut self, id: &str) -> Result<(), HivelogError> {
        self.conn
            .execute("DELETE FROM reservations WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn put_context(&mut self, c: &SwarmBeadContext) -> Result<(), HivelogError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO swarm_contexts(project_key, epic_id, bead_id, agent_name, files, strategy, directives, progress_percent, last_milestone, recovery_state, checkpointed_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                c.project_key,
                c.epic_id,
                c.bead_id,
                c.agent_name,
                serde_json::to_string(&c.files)?,
                c.strategy,
                serde_json::to_string(&c.directives)?,
                c.progress_percent as i64,
                c.last_milestone.as_str(),
                c.recovery_state.as_str(),
                c.checkpointed_at
            ],
        )?;
        Ok(())
    }

    fn set_recovery_state(
        &mut self,
        project_key: &str,
        epic_id: &str,
        bead_id: &str,
        agent_name: &str,
        state: RecoveryState,
    ) -> Result<(), HivelogError> {
        self.conn.execute(
            "UPDATE swarm_contexts SET recovery_state = ?5
             WHERE project_key = ?1 AND epic_id = ?2 AND bead_id = ?3 AND agent_name = ?4",
            params![project_key, epic_id, bead_id, agent_name, state.as_str()],
        )?;
        Ok(())
    }

    fn snapshot(&self, project_key: &str) -> Result<ProjectionSnapshot, HivelogError> {
        let agents = collect(
            self.conn,
            &format!(
                "SELECT {} FROM agents WHERE project_key = ?1 ORDER BY name",
                AGENT_COLUMNS
            ),
            project_key,
            agent_from_row,
        )?;
        let messages = collect(
            self.conn,
            &format!(
                "SELECT {} FROM messages WHERE project_key = ?1 ORDER BY id",
                MESSAGE_COLUMNS
            ),
            project_key,
            message_from_row,
        )?;
        let recipients = collect(
            self.conn,
            "SELECT r.message_id, r.agent_name, r.read_at, r.acked_at
             FROM message_recipients r JOIN messages m ON m.id = r.message_id
             WHERE m.project_key = ?1 ORDER BY r.message_id, r.agent_name",
            project_key,
            |row| {
                Ok(RecipientRecord {
                    message_id: row.get(0)?,
                    agent_name: row.get(1)?,
                    read_at: row.get(2)?,
                    acked_at: row.get(3)?,
                })
            },
        )?;
        let reservations = collect(
            self.conn,
            &format!(
                "SELECT {} FROM reservations WHERE project_key = ?1 ORDER BY id",
                RESERVATION_COLUMNS
            ),
            project_key,
            reservation_from_row,
        )?;
        let contexts = collect(
            self.conn,
            &format!(
                "SELECT {} FROM swarm_contexts WHERE project_key = ?1
                 ORDER BY epic_id, bead_id, agent_name",
                CONTEXT_COLUMNS
            ),
            project_key,
            RawContextRow::from_row,
        )?
        .into_iter()
        .map(RawContextRow::parse)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(ProjectionSnapshot {
            last_sequence: self.last_applied(project_key)?,
            agents,
            messages,
            recipients,
            reservations,
            contexts,
        })
    }
}

fn collect<T, F>(
    conn: &Connection,
    sql: &str,
    project_key: &str,
    map: F,
) -> Result<Vec<T>, HivelogError>
where
    F: FnMut(&Row) -> Result<T, rusqlite::Error>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![project_key], map)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}
