//! Project-scoped mailbox.
//!
//! Messages are immutable; each recipient has its own read/ack state. All
//! reads go through the `messages` / `message_recipients` projections.

use crate::core::broker::DbBroker;
use crate::core::error::HivelogError;
use crate::core::event_log;
use crate::core::events::{EventKind, MessageReceipt, MessageSent};
use crate::core::models::{Importance, InboxEntry, Message, RecipientRecord};
use crate::core::projections::sqlite::{MESSAGE_COLUMNS, enum_column, message_from_row};
use crate::core::projections::{ProjectionStore, SqliteProjections};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::agents::validate_agent_name;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Parser, Debug)]
#[clap(name = "mail", about = "Send and read agent mail")]
pub struct MailCli {
    #[clap(subcommand)]
    pub command: MailCommand,
}

#[derive(Subcommand, Debug)]
pub enum MailCommand {
    /// Send a message to one or more agents.
    Send {
        #[clap(long)]
        from: String,
        /// Recipient (repeatable).
        #[clap(long = "to", required = true)]
        to: Vec<String>,
        #[clap(long)]
        subject: String,
        #[clap(long, default_value = "")]
        body: String,
        #[clap(long)]
        thread: Option<String>,
        #[clap(long, default_value = "normal")]
        importance: String,
        #[clap(long)]
        ack_required: bool,
    },
    /// List an agent's inbox, newest first.
    Inbox {
        #[clap(long)]
        agent: String,
        #[clap(long, default_value = "20")]
        limit: u32,
        #[clap(long)]
        urgent_only: bool,
        #[clap(long)]
        unread_only: bool,
        #[clap(long)]
        include_bodies: bool,
    },
    /// Show one message.
    Get {
        #[clap(long)]
        id: String,
    },
    /// Show every message in a thread, oldest first.
    Thread {
        #[clap(long)]
        id: String,
    },
    /// Mark a message read for an agent.
    Read {
        #[clap(long)]
        agent: String,
        #[clap(long)]
        id: String,
    },
    /// Acknowledge a message for an agent.
    Ack {
        #[clap(long)]
        agent: String,
        #[clap(long)]
        id: String,
    },
}

pub fn run_mail_cli(
    store: &Store,
    project_key: &str,
    cli: MailCli,
) -> Result<JsonValue, HivelogError> {
    match cli.command {
        MailCommand::Send {
            from,
            to,
            subject,
            body,
            thread,
            importance,
            ack_required,
        } => {
            let message = send_message(
                store,
                SendMessageParams {
                    project_key,
                    from_agent: &from,
                    to: &to,
                    subject: &subject,
                    body: &body,
                    thread_id: thread.as_deref(),
                    importance: importance.parse::<Importance>()?,
                    ack_required,
                },
            )?;
            Ok(serde_json::json!({ "message": message, "recipients": to }))
        }
        MailCommand::Inbox {
            agent,
            limit,
            urgent_only,
            unread_only,
            include_bodies,
        } => {
            let opts = InboxOptions {
                limit: Some(limit),
                urgent_only,
                unread_only,
                include_bodies,
            };
            let entries = get_inbox(store, project_key, &agent, &opts)?;
            Ok(serde_json::json!({ "agent": agent, "messages": entries }))
        }
        MailCommand::Get { id } => {
            let message = get_message(store, project_key, &id)?
                .ok_or_else(|| HivelogError::NotFound(format!("message '{}'", id)))?;
            Ok(serde_json::json!({ "message": message }))
        }
        MailCommand::Thread { id } => {
            let messages = get_thread(store, project_key, &id)?;
            Ok(serde_json::json!({ "thread_id": id, "messages": messages }))
        }
        MailCommand::Read { agent, id } => {
            let receipt = mark_read(store, project_key, &agent, &id)?;
            Ok(serde_json::json!({ "receipt": receipt }))
        }
        MailCommand::Ack { agent, id } => {
            let receipt = acknowledge(store, project_key, &agent, &id)?;
            Ok(serde_json::json!({ "receipt": receipt }))
        }
    }
}

pub struct SendMessageParams<'a> {
    pub project_key: &'a str,
    pub from_agent: &'a str,
    pub to: &'a [String],
    pub subject: &'a str,
    pub body: &'a str,
    pub thread_id: Option<&'a str>,
    pub importance: Importance,
    pub ack_required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboxOptions {
    /// `None` means no limit.
    pub limit: Option<u32>,
    pub urgent_only: bool,
    pub unread_only: bool,
    pub include_bodies: bool,
}

pub fn send_message(store: &Store, p: SendMessageParams<'_>) -> Result<Message, HivelogError> {
    validate_agent_name(p.from_agent)?;
    if p.subject.trim().is_empty() {
        return Err(HivelogError::ValidationError(
            "subject must not be empty".to_string(),
        ));
    }
    let mut to: Vec<String> = Vec::with_capacity(p.to.len());
    for name in p.to {
        validate_agent_name(name)?;
        if !to.contains(name) {
            to.push(name.clone());
        }
    }
    if to.is_empty() {
        return Err(HivelogError::ValidationError(
            "at least one recipient is required".to_string(),
        ));
    }

    let message_id = time::new_event_id();
    let kind = EventKind::MessageSent(MessageSent {
        message_id: message_id.clone(),
        from_agent: p.from_agent.to_string(),
        to,
        subject: p.subject.to_string(),
        body: p.body.to_string(),
        thread_id: p.thread_id.map(str::to_string),
        importance: p.importance,
        ack_required: p.ack_required,
    });

    DbBroker::new(store).with_tx(p.from_agent, "mail.send", |conn| {
        event_log::append_and_project(conn, p.project_key, kind, time::now_ms())?;
        load_message(conn, p.project_key, &message_id)?
            .ok_or_else(|| HivelogError::StoreUnavailable("message row missing after send".into()))
    })
}

/// Record that `agent` read the message. The first read timestamp sticks.
pub fn mark_read(
    store: &Store,
    project_key: &str,
    agent: &str,
    message_id: &str,
) -> Result<RecipientRecord, HivelogError> {
    record_receipt(store, project_key, agent, message_id, false)
}

/// Acknowledge; also marks the message read if it was not.
pub fn acknowledge(
    store: &Store,
    project_key: &str,
    agent: &str,
    message_id: &str,
) -> Result<RecipientRecord, HivelogError> {
    record_receipt(store, project_key, agent, message_id, true)
}

fn record_receipt(
    store: &Store,
    project_key: &str,
    agent: &str,
    message_id: &str,
    ack: bool,
) -> Result<RecipientRecord, HivelogError> {
    validate_agent_name(agent)?;
    let op = if ack { "mail.ack" } else { "mail.read" };

    DbBroker::new(store).with_tx(agent, op, |conn| {
        if load_message(conn, project_key, message_id)?.is_none() {
            return Err(HivelogError::NotFound(format!("message '{}'", message_id)));
        }
        let projections = SqliteProjections::new(conn);
        if projections.get_recipient(message_id, agent)?.is_none() {
            return Err(HivelogError::NotFound(format!(
                "agent '{}' is not a recipient of message '{}'",
                agent, message_id
            )));
        }

        let receipt = MessageReceipt {
            message_id: message_id.to_string(),
            agent_name: agent.to_string(),
        };
        let kind = if ack {
            EventKind::MessageAcked(receipt)
        } else {
            EventKind::MessageRead(receipt)
        };
        event_log::append_and_project(conn, project_key, kind, time::now_ms())?;

        SqliteProjections::new(conn)
            .get_recipient(message_id, agent)?
            .ok_or_else(|| HivelogError::StoreUnavailable("recipient row vanished".into()))
    })
}

pub fn get_inbox(
    store: &Store,
    project_key: &str,
    agent: &str,
    opts: &InboxOptions,
) -> Result<Vec<InboxEntry>, HivelogError> {
    DbBroker::new(store).with_conn("hivelog", "mail.inbox", |conn| {
        let mut sql = String::from(
            "SELECT m.id, m.from_agent, m.subject, m.body, m.thread_id, m.importance,
                    m.ack_required, m.created_at, r.read_at, r.acked_at
             FROM message_recipients r JOIN messages m ON m.id = r.message_id
             WHERE m.project_key = ?1 AND r.agent_name = ?2",
        );
        if opts.urgent_only {
            sql.push_str(" AND m.importance = 'urgent'");
        }
        if opts.unread_only {
            sql.push_str(" AND r.read_at IS NULL");
        }
        sql.push_str(" ORDER BY m.created_at DESC, m.id DESC");
        // SQLite treats a negative LIMIT as unbounded.
        sql.push_str(" LIMIT ?3");
        let limit = opts.limit.map(i64::from).unwrap_or(-1);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_key, agent, limit], |row| {
            let importance: String = row.get(5)?;
            Ok(InboxEntry {
                message_id: row.get(0)?,
                from_agent: row.get(1)?,
                subject: row.get(2)?,
                body: if opts.include_bodies {
                    Some(row.get(3)?)
                } else {
                    None
                },
                thread_id: row.get(4)?,
                importance: enum_column(5, &importance)?,
                ack_required: row.get::<_, i64>(6)? != 0,
                created_at: row.get(7)?,
                read_at: row.get(8)?,
                acked_at: row.get(9)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

pub fn get_message(
    store: &Store,
    project_key: &str,
    message_id: &str,
) -> Result<Option<Message>, HivelogError> {
    DbBroker::new(store).with_conn("hivelog", "mail.get", |conn| {
        load_message(conn, project_key, message_id)
    })
}

pub fn get_thread(
    store: &Store,
    project_key: &str,
    thread_id: &str,
) -> Result<Vec<Message>, HivelogError> {
    DbBroker::new(store).with_conn("hivelog", "mail.thread", |conn| {
        let sql = format!(
            "SELECT {} FROM messages WHERE project_key = ?1 AND thread_id = ?2
             ORDER BY created_at ASC, id ASC",
            MESSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_key, thread_id], message_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

fn load_message(
    conn: &Connection,
    project_key: &str,
    message_id: &str,
) -> Result<Option<Message>, HivelogError> {
    let sql = format!(
        "SELECT {} FROM messages WHERE project_key = ?1 AND id = ?2",
        MESSAGE_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![project_key, message_id], message_from_row)
        .optional()?)
}

pub fn schema() -> JsonValue {
    serde_json::json!({
        "name": "mail",
        "version": "0.1.0",
        "description": "Per-project agent mailbox with per-recipient read/ack state",
        "commands": [
            { "name": "send", "parameters": ["from", "to", "subject", "body", "thread", "importance", "ack_required"] },
            { "name": "inbox", "parameters": ["agent", "limit", "urgent_only", "unread_only", "include_bodies"] },
            { "name": "get", "parameters": ["id"] },
            { "name": "thread", "parameters": ["id"] },
            { "name": "read", "parameters": ["agent", "id"] },
            { "name": "ack", "parameters": ["agent", "id"] }
        ],
        "storage": ["hivelog.db:messages", "hivelog.db:message_recipients"]
    })
}
