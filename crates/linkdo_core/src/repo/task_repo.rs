//! Task repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist canonical task records keyed by `(workspace_id, id)`.
//! - Provide the conditional LWW upsert used by sync and local edits.
//! - Provide derived-data writes (positions, embeddings) and cascade delete.
//!
//! # Invariants
//! - Write paths call `Task::validate()` before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Derived-data writes never advance `updated_at`.

use super::edge_repo::tombstone_edges_touching_in;
use super::{
    bool_to_int, classify_write_error, ensure_table, not_found, parse_bool, RepoError, RepoResult,
    WriteOutcome,
};
use crate::model::task::{Position, Priority, TagSet, Task, TaskId, TaskStatus};
use crate::model::ValidationError;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rusqlite::{Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

const TASK_SELECT_SQL: &str = "SELECT
    workspace_id,
    id,
    title,
    description,
    priority,
    status,
    category,
    tags,
    embedding,
    pos_x,
    pos_y,
    due_date,
    updated_at,
    deleted
FROM tasks";

/// Inserts a row or replaces it only when the incoming `updated_at` is strictly
/// newer. Embedding: explicit value wins, otherwise kept when the text fields are
/// unchanged and cleared when they changed. Position: kept when none is given.
const TASK_UPSERT_SQL: &str = "INSERT INTO tasks (
    workspace_id,
    id,
    title,
    description,
    priority,
    status,
    category,
    tags,
    embedding,
    pos_x,
    pos_y,
    due_date,
    updated_at,
    deleted
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
ON CONFLICT (workspace_id, id) DO UPDATE SET
    title = excluded.title,
    description = excluded.description,
    priority = excluded.priority,
    status = excluded.status,
    category = excluded.category,
    tags = excluded.tags,
    embedding = CASE
        WHEN excluded.embedding IS NOT NULL THEN excluded.embedding
        WHEN tasks.title IS excluded.title
            AND tasks.description IS excluded.description
            AND tasks.tags IS excluded.tags THEN tasks.embedding
        ELSE NULL
    END,
    pos_x = CASE WHEN excluded.pos_x IS NULL THEN tasks.pos_x ELSE excluded.pos_x END,
    pos_y = CASE WHEN excluded.pos_x IS NULL THEN tasks.pos_y ELSE excluded.pos_y END,
    due_date = excluded.due_date,
    updated_at = excluded.updated_at,
    deleted = excluded.deleted
WHERE excluded.updated_at > tasks.updated_at;";

/// Query options for listing tasks of one workspace.
#[derive(Debug, Clone, Default)]
pub struct TaskListQuery {
    pub workspace_id: String,
    /// Only tasks carrying this (normalized) tag.
    pub tag: Option<String>,
    pub include_deleted: bool,
    /// Only tasks with `updated_at` strictly greater than this value.
    pub updated_after: Option<i64>,
}

impl TaskListQuery {
    /// Live tasks of `workspace_id`.
    pub fn live(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            ..Self::default()
        }
    }
}

/// Summary of a cascade delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeDelete {
    /// `updated_at` carried by the task tombstone.
    pub task_updated_at: i64,
    /// Number of live edges tombstoned alongside the task.
    pub edges_tombstoned: usize,
}

/// Result of merging one replicated task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskMerge {
    pub outcome: WriteOutcome,
    /// Edges superseded by an applied task tombstone.
    pub edges_tombstoned: usize,
}

/// Repository interface for task persistence.
pub trait TaskRepository {
    /// Inserts a new task. Fails with `Conflict` when the key exists.
    fn insert_task(&self, task: &Task) -> RepoResult<()>;
    fn get_task(&self, workspace_id: &str, id: &str, include_deleted: bool)
        -> RepoResult<Option<Task>>;
    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<Task>>;
    /// Conditional LWW write keyed by `(workspace_id, id)`.
    fn upsert_task_if_newer(&self, task: &Task) -> RepoResult<WriteOutcome>;
    /// LWW write plus, for an applied tombstone, the endpoint cascade onto
    /// incident edges, in one transaction.
    fn merge_task_if_newer(&self, task: &Task) -> RepoResult<TaskMerge>;
    /// Writes positions of live tasks. Returns the number of rows touched.
    fn set_positions(
        &self,
        workspace_id: &str,
        positions: &BTreeMap<TaskId, Position>,
    ) -> RepoResult<usize>;
    /// Stores an embedding if the task is still live at `seen_updated_at`.
    fn set_embedding(
        &self,
        workspace_id: &str,
        id: &str,
        embedding: &[f32],
        seen_updated_at: i64,
    ) -> RepoResult<bool>;
    /// Tombstones one live task without touching edges. Returns its new `updated_at`.
    fn tombstone_task(&self, workspace_id: &str, id: &str, at: i64) -> RepoResult<i64>;
    /// Tombstones a task and every live edge touching it in one transaction.
    fn cascade_delete_task(&self, workspace_id: &str, id: &str, at: i64)
        -> RepoResult<CascadeDelete>;
    /// Distinct tags of live tasks, sorted.
    fn list_tags(&self, workspace_id: &str) -> RepoResult<Vec<String>>;
}

/// SQLite-backed task repository.
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    /// Creates a repository after verifying the migrated schema.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_table(
            conn,
            "tasks",
            &[
                "workspace_id",
                "id",
                "title",
                "tags",
                "embedding",
                "pos_x",
                "pos_y",
                "updated_at",
                "deleted",
            ],
        )?;
        ensure_table(conn, "edges", &["source", "target", "updated_at", "deleted"])?;
        Ok(Self { conn })
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn insert_task(&self, task: &Task) -> RepoResult<()> {
        task.validate()?;
        let values = TaskRow::encode(task)?.values(task);

        self.conn
            .execute(
                "INSERT INTO tasks (
                    workspace_id,
                    id,
                    title,
                    description,
                    priority,
                    status,
                    category,
                    tags,
                    embedding,
                    pos_x,
                    pos_y,
                    due_date,
                    updated_at,
                    deleted
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14);",
                params_from_iter(values),
            )
            .map_err(|err| classify_write_error(err, "task", &task.workspace_id, &task.id))?;
        Ok(())
    }

    fn get_task(
        &self,
        workspace_id: &str,
        id: &str,
        include_deleted: bool,
    ) -> RepoResult<Option<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TASK_SELECT_SQL}
             WHERE workspace_id = ?1
               AND id = ?2
               AND (?3 = 1 OR deleted = 0);"
        ))?;

        let mut rows = stmt.query(params![workspace_id, id, bool_to_int(include_deleted)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_task_row(row)?));
        }
        Ok(None)
    }

    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<Task>> {
        let mut sql = format!("{TASK_SELECT_SQL} WHERE workspace_id = ?");
        let mut bind_values: Vec<Value> = vec![Value::Text(query.workspace_id.clone())];

        if !query.include_deleted {
            sql.push_str(" AND deleted = 0");
        }
        if let Some(tag) = query.tag.as_ref() {
            sql.push_str(" AND EXISTS (SELECT 1 FROM json_each(tasks.tags) WHERE json_each.value = ?)");
            bind_values.push(Value::Text(tag.clone()));
        }
        if let Some(after) = query.updated_after {
            sql.push_str(" AND updated_at > ?");
            bind_values.push(Value::Integer(after));
        }
        sql.push_str(" ORDER BY updated_at DESC, id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(parse_task_row(row)?);
        }
        Ok(tasks)
    }

    fn upsert_task_if_newer(&self, task: &Task) -> RepoResult<WriteOutcome> {
        task.validate()?;
        let values = TaskRow::encode(task)?.values(task);

        let changed = self
            .conn
            .execute(TASK_UPSERT_SQL, params_from_iter(values))
            .map_err(|err| classify_write_error(err, "task", &task.workspace_id, &task.id))?;
        Ok(WriteOutcome::from_changes(changed))
    }

    fn merge_task_if_newer(&self, task: &Task) -> RepoResult<TaskMerge> {
        task.validate()?;
        let values = TaskRow::encode(task)?.values(task);
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let changed = tx
            .execute(TASK_UPSERT_SQL, params_from_iter(values))
            .map_err(|err| classify_write_error(err, "task", &task.workspace_id, &task.id))?;
        let outcome = WriteOutcome::from_changes(changed);
        let edges_tombstoned = if outcome == WriteOutcome::Applied && task.deleted {
            tombstone_edges_touching_in(&tx, &task.workspace_id, &task.id, task.updated_at)?
        } else {
            0
        };

        tx.commit()?;
        Ok(TaskMerge {
            outcome,
            edges_tombstoned,
        })
    }

    fn set_positions(
        &self,
        workspace_id: &str,
        positions: &BTreeMap<TaskId, Position>,
    ) -> RepoResult<usize> {
        if positions.values().any(|position| !position.is_finite()) {
            return Err(ValidationError::NonFinitePosition.into());
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut touched = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE tasks
                 SET pos_x = ?3,
                     pos_y = ?4
                 WHERE workspace_id = ?1
                   AND id = ?2
                   AND deleted = 0;",
            )?;
            for (id, position) in positions {
                touched += stmt.execute(params![workspace_id, id, position.x, position.y])?;
            }
        }
        tx.commit()?;
        Ok(touched)
    }

    fn set_embedding(
        &self,
        workspace_id: &str,
        id: &str,
        embedding: &[f32],
        seen_updated_at: i64,
    ) -> RepoResult<bool> {
        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(ValidationError::NonFiniteEmbedding.into());
        }
        let encoded = encode_json(&embedding, "tasks.embedding")?;
        let changed = self.conn.execute(
            "UPDATE tasks
             SET embedding = ?4
             WHERE workspace_id = ?1
               AND id = ?2
               AND updated_at = ?3
               AND deleted = 0;",
            params![workspace_id, id, seen_updated_at, encoded],
        )?;
        Ok(changed > 0)
    }

    fn tombstone_task(&self, workspace_id: &str, id: &str, at: i64) -> RepoResult<i64> {
        self.conn
            .query_row(
                "UPDATE tasks
                 SET deleted = 1,
                     updated_at = MAX(updated_at + 1, ?3)
                 WHERE workspace_id = ?1
                   AND id = ?2
                   AND deleted = 0
                 RETURNING updated_at;",
                params![workspace_id, id, at],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| not_found("task", workspace_id, id))
    }

    fn cascade_delete_task(
        &self,
        workspace_id: &str,
        id: &str,
        at: i64,
    ) -> RepoResult<CascadeDelete> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let task_updated_at: i64 = tx
            .query_row(
                "UPDATE tasks
                 SET updated_at = CASE WHEN deleted = 0 THEN MAX(updated_at + 1, ?3) ELSE updated_at END,
                     deleted = 1
                 WHERE workspace_id = ?1
                   AND id = ?2
                 RETURNING updated_at;",
                params![workspace_id, id, at],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| not_found("task", workspace_id, id))?;

        let edges_tombstoned = tx.execute(
            "UPDATE edges
             SET deleted = 1,
                 updated_at = MAX(updated_at + 1, ?3)
             WHERE workspace_id = ?1
               AND (source = ?2 OR target = ?2)
               AND deleted = 0;",
            params![workspace_id, id, at],
        )?;

        tx.commit()?;
        Ok(CascadeDelete {
            task_updated_at,
            edges_tombstoned,
        })
    }

    fn list_tags(&self, workspace_id: &str) -> RepoResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT json_each.value
             FROM tasks, json_each(tasks.tags)
             WHERE tasks.workspace_id = ?1
               AND tasks.deleted = 0
             ORDER BY json_each.value ASC;",
        )?;
        let mut rows = stmt.query([workspace_id])?;
        let mut tags = Vec::new();
        while let Some(row) = rows.next()? {
            tags.push(row.get::<_, String>(0)?);
        }
        Ok(tags)
    }
}

/// Encoded column values that are not stored verbatim.
struct TaskRow {
    tags: String,
    embedding: Option<String>,
}

impl TaskRow {
    fn encode(task: &Task) -> RepoResult<Self> {
        Ok(Self {
            tags: encode_json(&task.tags, "tasks.tags")?,
            embedding: task
                .embedding
                .as_ref()
                .map(|embedding| encode_json(embedding, "tasks.embedding"))
                .transpose()?,
        })
    }

    fn values(self, task: &Task) -> Vec<Value> {
        vec![
            Value::Text(task.workspace_id.clone()),
            Value::Text(task.id.clone()),
            Value::Text(task.title.clone()),
            optional_text(task.description.clone()),
            Value::Text(priority_to_db(task.priority).to_string()),
            Value::Text(status_to_db(task.status).to_string()),
            Value::Text(task.category.clone()),
            Value::Text(self.tags),
            optional_text(self.embedding),
            task.position.map_or(Value::Null, |position| Value::Real(position.x)),
            task.position.map_or(Value::Null, |position| Value::Real(position.y)),
            task.due_date.map_or(Value::Null, Value::Integer),
            Value::Integer(task.updated_at),
            Value::Integer(bool_to_int(task.deleted)),
        ]
    }
}

fn optional_text(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::Text)
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<Task> {
    let priority_text: String = row.get("priority")?;
    let priority = parse_priority(&priority_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid priority `{priority_text}` in tasks.priority"))
    })?;

    let status_text: String = row.get("status")?;
    let status = parse_status(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{status_text}` in tasks.status"))
    })?;

    let tags: TagSet = decode_json(&row.get::<_, String>("tags")?, "tasks.tags")?;
    let embedding = match row.get::<_, Option<String>>("embedding")? {
        Some(raw) => Some(decode_json::<Vec<f32>>(&raw, "tasks.embedding")?),
        None => None,
    };
    let position = match (
        row.get::<_, Option<f64>>("pos_x")?,
        row.get::<_, Option<f64>>("pos_y")?,
    ) {
        (Some(x), Some(y)) => Some(Position::new(x, y)),
        (None, None) => None,
        _ => {
            return Err(RepoError::InvalidData(
                "tasks.pos_x and tasks.pos_y must be both set or both null".to_string(),
            ))
        }
    };

    let task = Task {
        workspace_id: row.get("workspace_id")?,
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        priority,
        status,
        category: row.get("category")?,
        tags,
        embedding,
        position,
        due_date: row.get("due_date")?,
        updated_at: row.get("updated_at")?,
        deleted: parse_bool(row.get("deleted")?, "tasks.deleted")?,
    };
    task.validate()?;
    Ok(task)
}

fn encode_json<T: Serialize + ?Sized>(value: &T, column: &str) -> RepoResult<String> {
    serde_json::to_string(value)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode {column}: {err}")))
}

fn decode_json<T: DeserializeOwned>(raw: &str, column: &str) -> RepoResult<T> {
    serde_json::from_str(raw)
        .map_err(|err| RepoError::InvalidData(format!("invalid json in {column}: {err}")))
}

fn priority_to_db(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
        Priority::Critical => "critical",
    }
}

fn parse_priority(value: &str) -> Option<Priority> {
    match value {
        "low" => Some(Priority::Low),
        "medium" => Some(Priority::Medium),
        "high" => Some(Priority::High),
        "critical" => Some(Priority::Critical),
        _ => None,
    }
}

fn status_to_db(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "todo",
        TaskStatus::InProgress => "in-progress",
        TaskStatus::Done => "done",
    }
}

fn parse_status(value: &str) -> Option<TaskStatus> {
    match value {
        "todo" => Some(TaskStatus::Todo),
        "in-progress" => Some(TaskStatus::InProgress),
        "done" => Some(TaskStatus::Done),
        _ => None,
    }
}
