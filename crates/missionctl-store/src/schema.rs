//! Table definitions for the mission root database (spec §6 "Persisted
//! state layout"). One SQLite file per mission root directory; applied
//! idempotently on every connect.

pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS missions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    definition_json TEXT NOT NULL,
    inputs_json TEXT NOT NULL,
    started_at TEXT,
    ended_at TEXT
);

CREATE TABLE IF NOT EXISTS tasks (
    mission_id TEXT NOT NULL,
    name TEXT NOT NULL,
    idx INTEGER,
    status TEXT NOT NULL,
    output_json TEXT,
    summary TEXT,
    error TEXT,
    attempt INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    ended_at TEXT,
    PRIMARY KEY (mission_id, name, idx),
    FOREIGN KEY (mission_id) REFERENCES missions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    mission_id TEXT NOT NULL,
    owner_kind TEXT NOT NULL,
    owner_ref TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (mission_id) REFERENCES missions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(mission_id, owner_kind, owner_ref);

CREATE TABLE IF NOT EXISTS messages (
    session_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    message_type_json TEXT,
    tool_call_id TEXT,
    tool_name TEXT,
    PRIMARY KEY (session_id, seq),
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS datasets (
    mission_id TEXT NOT NULL,
    name TEXT NOT NULL,
    populated INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (mission_id, name),
    FOREIGN KEY (mission_id) REFERENCES missions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS dataset_items (
    mission_id TEXT NOT NULL,
    name TEXT NOT NULL,
    idx INTEGER NOT NULL,
    item_json TEXT NOT NULL,
    PRIMARY KEY (mission_id, name, idx),
    FOREIGN KEY (mission_id, name) REFERENCES datasets(mission_id, name) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS qa_cache (
    mission_id TEXT NOT NULL,
    asker TEXT NOT NULL,
    target TEXT NOT NULL,
    idx INTEGER,
    question_hash TEXT NOT NULL,
    question TEXT NOT NULL,
    answer TEXT NOT NULL,
    PRIMARY KEY (mission_id, asker, target, idx, question_hash)
);

CREATE TABLE IF NOT EXISTS results (
    mission_id TEXT NOT NULL,
    result_id TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    sample_json TEXT NOT NULL,
    PRIMARY KEY (mission_id, result_id)
);

CREATE TABLE IF NOT EXISTS events (
    mission_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    event_json TEXT NOT NULL,
    PRIMARY KEY (mission_id, seq)
);
"#;
