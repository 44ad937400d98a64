//! The Persistence Store (spec §4.4): one SQLite file per mission root
//! directory, a connection pool shared across the process, and every
//! write the runtime cares about wrapped so the ordering guarantees in
//! spec §4.4/§5 hold -- a message is written before its content reaches
//! a caller, a tool call before dispatch, a task status transition as
//! the final write of a lifecycle step.

use std::path::Path;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use missionctl_types::{Event, Mission, MissionId, MissionStatus};

use crate::error::StoreError;
use crate::models::{MessageRecord, ResultRecord, SessionRecord, TaskRow};
use crate::schema::SCHEMA;

/// A durable store backed by an embedded relational engine (spec §4.4).
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Opens (creating if necessary) the SQLite file at `path` and
    /// applies the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<Store, StoreError> {
            let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
                conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
            });
            let pool = Pool::builder().max_size(8).build(manager)?;
            {
                let conn = pool.get()?;
                conn.execute_batch(SCHEMA)?;
            }
            Ok(Store { pool })
        })
        .await?
    }

    /// An in-memory store with identical semantics, used for tests (spec
    /// §4.4: "An in-memory implementation with identical semantics exists
    /// for testing").
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        tokio::task::spawn_blocking(|| -> Result<Store, StoreError> {
            let manager = SqliteConnectionManager::memory();
            let pool = Pool::builder().max_size(1).build(manager)?;
            {
                let conn = pool.get()?;
                conn.execute_batch(SCHEMA)?;
            }
            Ok(Store { pool })
        })
        .await?
    }

    async fn run<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }

    // ---- missions -----------------------------------------------------

    pub async fn create_mission(&self, mission: &Mission) -> Result<(), StoreError> {
        let mission = mission.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO missions (id, name, status, definition_json, inputs_json, started_at, ended_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
                params![
                    mission.id.0,
                    mission.name,
                    status_str(mission.status),
                    serde_json::to_string(&mission)?,
                    serde_json::to_string(&mission.inputs)?,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_mission_status(
        &self,
        mission_id: &MissionId,
        status: MissionStatus,
    ) -> Result<(), StoreError> {
        let id = mission_id.0.clone();
        self.run(move |conn| {
            let ended_at = if matches!(
                status,
                MissionStatus::Completed | MissionStatus::Failed | MissionStatus::Cancelled
            ) {
                Some(Utc::now().to_rfc3339())
            } else {
                None
            };
            conn.execute(
                "UPDATE missions SET status = ?1, ended_at = COALESCE(?2, ended_at) WHERE id = ?3",
                params![status_str(status), ended_at, id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_mission_status(
        &self,
        mission_id: &MissionId,
    ) -> Result<Option<MissionStatus>, StoreError> {
        let id = mission_id.0.clone();
        self.run(move |conn| {
            let status: Option<String> = conn
                .query_row("SELECT status FROM missions WHERE id = ?1", params![id], |r| r.get(0))
                .optional()?;
            Ok(status.map(|s| parse_status(&s)))
        })
        .await
    }

    /// Every mission ever created in this store, newest first -- for a
    /// presenter listing what's available to `resume` (spec §6's
    /// `missions` table has no dedicated "list" accessor beyond per-id
    /// status lookups; this is that accessor).
    pub async fn list_missions(&self) -> Result<Vec<(String, String, MissionStatus)>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, status FROM missions ORDER BY started_at DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let name: String = row.get(1)?;
                    let status: String = row.get(2)?;
                    Ok((id, name, status))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows
                .into_iter()
                .map(|(id, name, status)| (id, name, parse_status(&status)))
                .collect())
        })
        .await
    }

    // ---- tasks ----------------------------------------------------------

    pub async fn upsert_task(
        &self,
        mission_id: &str,
        name: &str,
        index: Option<u32>,
        status: &str,
        output: Option<Value>,
        summary: Option<String>,
        error: Option<String>,
        attempt: u32,
    ) -> Result<(), StoreError> {
        let (mission_id, name, status) = (mission_id.to_string(), name.to_string(), status.to_string());
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO tasks (mission_id, name, idx, status, output_json, summary, error, attempt, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(mission_id, name, idx) DO UPDATE SET
                   status = excluded.status,
                   output_json = excluded.output_json,
                   summary = excluded.summary,
                   error = excluded.error,
                   attempt = excluded.attempt,
                   ended_at = CASE WHEN excluded.status IN ('completed','failed','skipped')
                              THEN ?10 ELSE tasks.ended_at END",
                params![
                    mission_id,
                    name,
                    index.map(|i| i as i64),
                    status,
                    output.map(|v| v.to_string()),
                    summary,
                    error,
                    attempt as i64,
                    Utc::now().to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_task(
        &self,
        mission_id: &str,
        name: &str,
        index: Option<u32>,
    ) -> Result<Option<TaskRow>, StoreError> {
        let (mission_id, name) = (mission_id.to_string(), name.to_string());
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT mission_id, name, idx, status, output_json, summary, error, attempt
                     FROM tasks WHERE mission_id = ?1 AND name = ?2 AND idx IS ?3",
                    params![mission_id, name, index.map(|i| i as i64)],
                    task_row_from,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// All persisted rows for `name` (every iteration index, or the
    /// single non-iterated row), ordered by index.
    pub async fn list_task_instances(
        &self,
        mission_id: &str,
        name: &str,
    ) -> Result<Vec<TaskRow>, StoreError> {
        let (mission_id, name) = (mission_id.to_string(), name.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT mission_id, name, idx, status, output_json, summary, error, attempt
                 FROM tasks WHERE mission_id = ?1 AND name = ?2 ORDER BY idx ASC",
            )?;
            let rows = stmt
                .query_map(params![mission_id, name], task_row_from)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn list_all_tasks(&self, mission_id: &str) -> Result<Vec<TaskRow>, StoreError> {
        let mission_id = mission_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT mission_id, name, idx, status, output_json, summary, error, attempt
                 FROM tasks WHERE mission_id = ?1 ORDER BY name ASC, idx ASC",
            )?;
            let rows = stmt
                .query_map(params![mission_id], task_row_from)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // ---- sessions & messages --------------------------------------------

    pub async fn create_session(
        &self,
        id: &str,
        mission_id: &str,
        owner_kind: &str,
        owner_ref: &str,
    ) -> Result<(), StoreError> {
        let (id, mission_id, owner_kind, owner_ref) = (
            id.to_string(),
            mission_id.to_string(),
            owner_kind.to_string(),
            owner_ref.to_string(),
        );
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sessions (id, mission_id, owner_kind, owner_ref, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, mission_id, owner_kind, owner_ref, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session_by_owner(
        &self,
        mission_id: &str,
        owner_kind: &str,
        owner_ref: &str,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let (mission_id, owner_kind, owner_ref) =
            (mission_id.to_string(), owner_kind.to_string(), owner_ref.to_string());
        self.run(move |conn| {
            conn.query_row(
                "SELECT id, mission_id, owner_kind, owner_ref, created_at FROM sessions
                 WHERE mission_id = ?1 AND owner_kind = ?2 AND owner_ref = ?3",
                params![mission_id, owner_kind, owner_ref],
                |row| {
                    Ok(SessionRecord {
                        id: row.get(0)?,
                        mission_id: row.get(1)?,
                        owner_kind: row.get(2)?,
                        owner_ref: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    /// Appends a message at the next sequence number for `session_id`.
    /// Every `(session_id, seq)` pair is unique and monotonically
    /// increasing (spec §6).
    pub async fn append_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        message_type_json: Option<&str>,
        tool_call_id: Option<&str>,
        tool_name: Option<&str>,
    ) -> Result<i64, StoreError> {
        let (session_id, role, content, message_type_json, tool_call_id, tool_name) = (
            session_id.to_string(),
            role.to_string(),
            content.to_string(),
            message_type_json.map(String::from),
            tool_call_id.map(String::from),
            tool_name.map(String::from),
        );
        self.run(move |conn| {
            let next_seq: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(seq), -1) + 1 FROM messages WHERE session_id = ?1",
                    params![session_id],
                    |r| r.get(0),
                )?;
            conn.execute(
                "INSERT INTO messages (session_id, seq, role, content, message_type_json, tool_call_id, tool_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![session_id, next_seq, role, content, message_type_json, tool_call_id, tool_name],
            )?;
            Ok(next_seq)
        })
        .await
    }

    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let session_id = session_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, seq, role, content, message_type_json, tool_call_id, tool_name
                 FROM messages WHERE session_id = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt
                .query_map(params![session_id], |row| {
                    Ok(MessageRecord {
                        session_id: row.get(0)?,
                        seq: row.get(1)?,
                        role: row.get(2)?,
                        content: row.get(3)?,
                        message_type_json: row.get(4)?,
                        tool_call_id: row.get(5)?,
                        tool_name: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Lists every session owned inside this mission, for Resaturation
    /// (§4.9) to walk on resume.
    pub async fn list_sessions(&self, mission_id: &str) -> Result<Vec<SessionRecord>, StoreError> {
        let mission_id = mission_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, mission_id, owner_kind, owner_ref, created_at FROM sessions WHERE mission_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![mission_id], |row| {
                    Ok(SessionRecord {
                        id: row.get(0)?,
                        mission_id: row.get(1)?,
                        owner_kind: row.get(2)?,
                        owner_ref: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // ---- datasets ---------------------------------------------------------

    pub async fn ensure_dataset(&self, mission_id: &str, name: &str) -> Result<(), StoreError> {
        let (mission_id, name) = (mission_id.to_string(), name.to_string());
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO datasets (mission_id, name, populated) VALUES (?1, ?2, 0)",
                params![mission_id, name],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn append_dataset_items(
        &self,
        mission_id: &str,
        name: &str,
        items: Vec<Value>,
    ) -> Result<(), StoreError> {
        let (mission_id, name) = (mission_id.to_string(), name.to_string());
        self.run(move |conn| {
            let start: i64 = conn.query_row(
                "SELECT COALESCE(MAX(idx), -1) + 1 FROM dataset_items WHERE mission_id = ?1 AND name = ?2",
                params![mission_id, name],
                |r| r.get(0),
            )?;
            for (offset, item) in items.into_iter().enumerate() {
                conn.execute(
                    "INSERT INTO dataset_items (mission_id, name, idx, item_json) VALUES (?1, ?2, ?3, ?4)",
                    params![mission_id, name, start + offset as i64, item.to_string()],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn mark_dataset_populated(&self, mission_id: &str, name: &str) -> Result<(), StoreError> {
        let (mission_id, name) = (mission_id.to_string(), name.to_string());
        self.run(move |conn| {
            conn.execute(
                "UPDATE datasets SET populated = 1 WHERE mission_id = ?1 AND name = ?2",
                params![mission_id, name],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn dataset_populated(&self, mission_id: &str, name: &str) -> Result<bool, StoreError> {
        let (mission_id, name) = (mission_id.to_string(), name.to_string());
        self.run(move |conn| {
            let populated: Option<bool> = conn
                .query_row(
                    "SELECT populated FROM datasets WHERE mission_id = ?1 AND name = ?2",
                    params![mission_id, name],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(populated.unwrap_or(false))
        })
        .await
    }

    pub async fn list_dataset_items(&self, mission_id: &str, name: &str) -> Result<Vec<Value>, StoreError> {
        let (mission_id, name) = (mission_id.to_string(), name.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT item_json FROM dataset_items WHERE mission_id = ?1 AND name = ?2 ORDER BY idx ASC",
            )?;
            let rows = stmt
                .query_map(params![mission_id, name], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|s| serde_json::from_str(&s).map_err(StoreError::from))
                .collect()
        })
        .await
    }

    // ---- Q&A cache ----------------------------------------------------

    pub async fn qa_lookup(
        &self,
        mission_id: &str,
        asker: &str,
        target: &str,
        index: Option<u32>,
        question_hash: &str,
    ) -> Result<Option<String>, StoreError> {
        let (mission_id, asker, target, question_hash) =
            (mission_id.to_string(), asker.to_string(), target.to_string(), question_hash.to_string());
        self.run(move |conn| {
            conn.query_row(
                "SELECT answer FROM qa_cache WHERE mission_id = ?1 AND asker = ?2 AND target = ?3
                 AND idx IS ?4 AND question_hash = ?5",
                params![mission_id, asker, target, index.map(|i| i as i64), question_hash],
                |r| r.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn qa_insert(
        &self,
        mission_id: &str,
        asker: &str,
        target: &str,
        index: Option<u32>,
        question: &str,
        question_hash: &str,
        answer: &str,
    ) -> Result<(), StoreError> {
        let (mission_id, asker, target, question, question_hash, answer) = (
            mission_id.to_string(),
            asker.to_string(),
            target.to_string(),
            question.to_string(),
            question_hash.to_string(),
            answer.to_string(),
        );
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO qa_cache (mission_id, asker, target, idx, question_hash, question, answer)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![mission_id, asker, target, index.map(|i| i as i64), question_hash, question, answer],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn qa_list_for_target(
        &self,
        mission_id: &str,
        target: &str,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let (mission_id, target) = (mission_id.to_string(), target.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT question_hash, answer FROM qa_cache WHERE mission_id = ?1 AND target = ?2",
            )?;
            let rows = stmt
                .query_map(params![mission_id, target], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Questions a specific asker has already put to a specific target,
    /// as `(target_index, question_hash, question)` triples -- the pairs
    /// `list_commander_questions` (spec §4.7) hands back to a Commander so
    /// it can dedup before asking the same thing twice. `target_index`
    /// rides along so `get_commander_answer` can rebuild the exact cache
    /// key from the opaque id it was given.
    pub async fn qa_list_for_asker_target(
        &self,
        mission_id: &str,
        asker: &str,
        target: &str,
    ) -> Result<Vec<(Option<i64>, String, String)>, StoreError> {
        let (mission_id, asker, target) = (mission_id.to_string(), asker.to_string(), target.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT idx, question_hash, question FROM qa_cache
                 WHERE mission_id = ?1 AND asker = ?2 AND target = ?3",
            )?;
            let rows = stmt
                .query_map(params![mission_id, asker, target], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // ---- oversized-result records --------------------------------------

    pub async fn store_result(&self, record: &ResultRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO results (mission_id, result_id, tool_name, payload_json, sample_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.mission_id,
                    record.result_id,
                    record.tool_name,
                    record.payload.to_string(),
                    record.sample.to_string(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn load_result(
        &self,
        mission_id: &str,
        result_id: &str,
    ) -> Result<Option<ResultRecord>, StoreError> {
        let (mission_id, result_id) = (mission_id.to_string(), result_id.to_string());
        self.run(move |conn| {
            conn.query_row(
                "SELECT mission_id, result_id, tool_name, payload_json, sample_json FROM results
                 WHERE mission_id = ?1 AND result_id = ?2",
                params![mission_id, result_id],
                |row| {
                    let payload: String = row.get(3)?;
                    let sample: String = row.get(4)?;
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?, payload, sample))
                },
            )
            .optional()?
            .map(|(mission_id, result_id, tool_name, payload, sample)| {
                Ok(ResultRecord {
                    mission_id,
                    result_id,
                    tool_name,
                    payload: serde_json::from_str(&payload)?,
                    sample: serde_json::from_str(&sample)?,
                })
            })
            .transpose()
        })
        .await
    }

    /// Discards every result stored for `mission_id` (spec §4.2: "The
    /// Result Store is mission-scoped and discarded at mission end").
    pub async fn clear_results(&self, mission_id: &str) -> Result<(), StoreError> {
        let mission_id = mission_id.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM results WHERE mission_id = ?1", params![mission_id])?;
            Ok(())
        })
        .await
    }

    // ---- event stream ---------------------------------------------------

    pub async fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        let event = event.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO events (mission_id, seq, event_json) VALUES (?1, ?2, ?3)",
                params![event.mission_id, event.seq as i64, serde_json::to_string(&event)?],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_events(&self, mission_id: &str) -> Result<Vec<Event>, StoreError> {
        let mission_id = mission_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT event_json FROM events WHERE mission_id = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt
                .query_map(params![mission_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|s| serde_json::from_str(&s).map_err(StoreError::from))
                .collect()
        })
        .await
    }
}

fn task_row_from(row: &rusqlite::Row) -> rusqlite::Result<TaskRow> {
    let output_json: Option<String> = row.get(4)?;
    Ok(TaskRow {
        mission_id: row.get(0)?,
        name: row.get(1)?,
        index: row.get(2)?,
        status: row.get(3)?,
        output: output_json.and_then(|s| serde_json::from_str(&s).ok()),
        summary: row.get(5)?,
        error: row.get(6)?,
        attempt: row.get(7)?,
    })
}

fn status_str(status: MissionStatus) -> &'static str {
    match status {
        MissionStatus::Pending => "pending",
        MissionStatus::Running => "running",
        MissionStatus::Completed => "completed",
        MissionStatus::Failed => "failed",
        MissionStatus::Cancelled => "cancelled",
    }
}

fn parse_status(s: &str) -> MissionStatus {
    match s {
        "running" => MissionStatus::Running,
        "completed" => MissionStatus::Completed,
        "failed" => MissionStatus::Failed,
        "cancelled" => MissionStatus::Cancelled,
        _ => MissionStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missionctl_types::Mission;

    async fn store() -> Store {
        Store::open_in_memory().await.expect("open in-memory store")
    }

    #[tokio::test]
    async fn roundtrips_mission_status() {
        let store = store().await;
        let mission = Mission::new("demo", "gpt-4o");
        store.create_mission(&mission).await.unwrap();

        assert_eq!(
            store.get_mission_status(&mission.id).await.unwrap(),
            Some(MissionStatus::Pending)
        );

        store
            .set_mission_status(&mission.id, MissionStatus::Running)
            .await
            .unwrap();
        assert_eq!(
            store.get_mission_status(&mission.id).await.unwrap(),
            Some(MissionStatus::Running)
        );
    }

    #[tokio::test]
    async fn upserts_task_instances_independently() {
        let store = store().await;
        let mission = Mission::new("demo", "gpt-4o");
        store.create_mission(&mission).await.unwrap();
        let mid = mission.id.0.as_str();

        store
            .upsert_task(mid, "fanout", Some(0), "completed", Some(serde_json::json!({"n": 1})), None, None, 0)
            .await
            .unwrap();
        store
            .upsert_task(mid, "fanout", Some(1), "running", None, None, None, 0)
            .await
            .unwrap();

        let rows = store.list_task_instances(mid, "fanout").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, Some(0));
        assert_eq!(rows[0].status, "completed");
        assert_eq!(rows[1].status, "running");
    }

    #[tokio::test]
    async fn messages_get_strictly_increasing_sequence_numbers() {
        let store = store().await;
        let mission = Mission::new("demo", "gpt-4o");
        store.create_mission(&mission).await.unwrap();
        let mid = mission.id.0.as_str();
        store.create_session("sess-1", mid, "agent", "writer").await.unwrap();

        let seq0 = store.append_message("sess-1", "user", "hello", None, None, None).await.unwrap();
        let seq1 = store.append_message("sess-1", "assistant", "hi", None, None, None).await.unwrap();
        assert_eq!(seq0, 0);
        assert_eq!(seq1, 1);

        let messages = store.list_messages("sess-1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].seq, 1);
    }

    #[tokio::test]
    async fn dataset_items_append_and_track_populated_flag() {
        let store = store().await;
        let mission = Mission::new("demo", "gpt-4o");
        store.create_mission(&mission).await.unwrap();
        let mid = mission.id.0.as_str();

        store.ensure_dataset(mid, "rows").await.unwrap();
        assert!(!store.dataset_populated(mid, "rows").await.unwrap());

        store
            .append_dataset_items(mid, "rows", vec![serde_json::json!({"a": 1}), serde_json::json!({"a": 2})])
            .await
            .unwrap();
        store.mark_dataset_populated(mid, "rows").await.unwrap();

        assert!(store.dataset_populated(mid, "rows").await.unwrap());
        let items = store.list_dataset_items(mid, "rows").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["a"], 1);
    }

    #[tokio::test]
    async fn qa_cache_is_idempotent_on_insert() {
        let store = store().await;
        let mission = Mission::new("demo", "gpt-4o");
        store.create_mission(&mission).await.unwrap();
        let mid = mission.id.0.as_str();

        store
            .qa_insert(mid, "a1", "a2", None, "what is x?", "hash123", "x is 1")
            .await
            .unwrap();
        // A second insert with the same key must not override or error.
        store
            .qa_insert(mid, "a1", "a2", None, "what is x?", "hash123", "different answer")
            .await
            .unwrap();

        let answer = store.qa_lookup(mid, "a1", "a2", None, "hash123").await.unwrap();
        assert_eq!(answer, Some("x is 1".to_string()));
    }

    #[tokio::test]
    async fn result_records_roundtrip_and_clear_by_mission() {
        let store = store().await;
        let mission = Mission::new("demo", "gpt-4o");
        store.create_mission(&mission).await.unwrap();
        let mid = mission.id.0.clone();

        let record = ResultRecord {
            mission_id: mid.clone(),
            result_id: "res-1".to_string(),
            tool_name: "search".to_string(),
            payload: serde_json::json!([1, 2, 3]),
            sample: serde_json::json!([1, 2]),
        };
        store.store_result(&record).await.unwrap();

        let loaded = store.load_result(&mid, "res-1").await.unwrap().expect("result present");
        assert_eq!(loaded.tool_name, "search");

        store.clear_results(&mid).await.unwrap();
        assert!(store.load_result(&mid, "res-1").await.unwrap().is_none());
    }
}
