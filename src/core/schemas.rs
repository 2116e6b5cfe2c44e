//! Centralized database schema definitions for the kernel database.
//!
//! Hivelog keeps every table in one SQLite file so an event append and its
//! projection updates commit in one transaction:
//! 1. `events`: the append-only log (source of truth).
//! 2. `projection_cursor`, `agents`, `messages`, `message_recipients`,
//!    `reservations`, `swarm_contexts`: projections rebuilt from the log.
//! 3. `mandates`, `mandate_votes`, `patterns`, `pattern_observations`:
//!    consensus subsystems (not event-sourced).

pub const KERNEL_DB_NAME: &str = "hivelog.db";
pub const KERNEL_SCHEMA_VERSION: u32 = 1;

pub const KERNEL_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS events (
        project_key TEXT NOT NULL,
        sequence INTEGER NOT NULL,
        id TEXT NOT NULL UNIQUE,
        event_type TEXT NOT NULL,
        ts INTEGER NOT NULL,
        payload TEXT NOT NULL,
        PRIMARY KEY(project_key, sequence)
    );
    CREATE INDEX IF NOT EXISTS idx_events_type ON events(project_key, event_type);
    CREATE INDEX IF NOT EXISTS idx_events_ts ON events(project_key, ts);

    CREATE TABLE IF NOT EXISTS projection_cursor (
        project_key TEXT PRIMARY KEY,
        last_sequence INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS agents (
        project_key TEXT NOT NULL,
        name TEXT NOT NULL,
        program TEXT NOT NULL,
        model TEXT NOT NULL,
        task_description TEXT,
        registered_at INTEGER NOT NULL,
        last_active_at INTEGER NOT NULL,
        PRIMARY KEY(project_key, name)
    );

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        project_key TEXT NOT NULL,
        from_agent TEXT NOT NULL,
        subject TEXT NOT NULL,
        body TEXT NOT NULL,
        thread_id TEXT,
        importance TEXT NOT NULL DEFAULT 'normal',
        ack_required INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(project_key, thread_id);

    CREATE TABLE IF NOT EXISTS message_recipients (
        message_id TEXT NOT NULL,
        agent_name TEXT NOT NULL,
        read_at INTEGER,
        acked_at INTEGER,
        PRIMARY KEY(message_id, agent_name),
        FOREIGN KEY(message_id) REFERENCES messages(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_recipients_agent ON message_recipients(agent_name);

    CREATE TABLE IF NOT EXISTS reservations (
        id TEXT PRIMARY KEY,
        project_key TEXT NOT NULL,
        agent_name TEXT NOT NULL,
        path_pattern TEXT NOT NULL,
        exclusive INTEGER NOT NULL DEFAULT 1,
        reason TEXT,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        released_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_reservations_active
        ON reservations(project_key, released_at, expires_at);
    CREATE INDEX IF NOT EXISTS idx_reservations_agent ON reservations(project_key, agent_name);

    CREATE TABLE IF NOT EXISTS swarm_contexts (
        project_key TEXT NOT NULL,
        epic_id TEXT NOT NULL,
        bead_id TEXT NOT NULL,
        agent_name TEXT NOT NULL,
        files TEXT NOT NULL,
        strategy TEXT NOT NULL,
        directives TEXT NOT NULL,
        progress_percent INTEGER NOT NULL,
        last_milestone TEXT NOT NULL,
        recovery_state TEXT NOT NULL,
        checkpointed_at INTEGER NOT NULL,
        PRIMARY KEY(project_key, epic_id, bead_id, agent_name)
    );
    CREATE INDEX IF NOT EXISTS idx_swarm_contexts_epic
        ON swarm_contexts(project_key, epic_id, checkpointed_at);

    CREATE TABLE IF NOT EXISTS mandates (
        id TEXT PRIMARY KEY,
        project_key TEXT NOT NULL,
        content TEXT NOT NULL,
        content_type TEXT NOT NULL,
        author TEXT NOT NULL,
        tags TEXT NOT NULL DEFAULT '[]',
        status TEXT NOT NULL DEFAULT 'candidate',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS mandate_votes (
        id TEXT PRIMARY KEY,
        mandate_id TEXT NOT NULL,
        voter TEXT NOT NULL,
        vote_type TEXT NOT NULL,
        weight REAL NOT NULL,
        ts INTEGER NOT NULL,
        UNIQUE(mandate_id, voter),
        FOREIGN KEY(mandate_id) REFERENCES mandates(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS patterns (
        id TEXT PRIMARY KEY,
        project_key TEXT NOT NULL,
        content TEXT NOT NULL,
        state TEXT NOT NULL DEFAULT 'candidate',
        override_state TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pattern_observations (
        id TEXT PRIMARY KEY,
        pattern_id TEXT NOT NULL,
        rater TEXT NOT NULL,
        observation_type TEXT NOT NULL,
        weight REAL NOT NULL,
        ts INTEGER NOT NULL,
        UNIQUE(pattern_id, rater),
        FOREIGN KEY(pattern_id) REFERENCES patterns(id) ON DELETE CASCADE
    );
";

/// Projection tables cleared by a rebuild, in dependency order.
pub const PROJECTION_TABLES: &[&str] = &[
    "message_recipients",
    "messages",
    "reservations",
    "swarm_contexts",
    "agents",
    "projection_cursor",
];
