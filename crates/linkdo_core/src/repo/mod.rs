//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for tasks and edges.
//! - Isolate SQLite query details from service orchestration.
//! - Own the conditional (last-write-wins) write primitive.
//!
//! # Invariants
//! - Writes call `validate()` on the record before any SQL mutation.
//! - LWW writes are one atomic statement; there is no read-then-write window.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`,
//!   `MissingReference`) in addition to DB transport errors.

pub mod edge_repo;
pub mod task_repo;

use crate::db::{constraint_kind, ConstraintKind, DbError};
use crate::model::ValidationError;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by task and edge persistence.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    /// Record does not exist (or is tombstoned where a live row is required).
    NotFound {
        entity: &'static str,
        workspace_id: String,
        id: String,
    },
    /// Primary key or pair uniqueness collision.
    Conflict {
        entity: &'static str,
        workspace_id: String,
        id: String,
    },
    /// A referenced task does not exist in the record's workspace.
    MissingReference {
        entity: &'static str,
        workspace_id: String,
        id: String,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound {
                entity,
                workspace_id,
                id,
            } => write!(f, "{entity} not found: {workspace_id}/{id}"),
            Self::Conflict {
                entity,
                workspace_id,
                id,
            } => write!(f, "{entity} already exists: {workspace_id}/{id}"),
            Self::MissingReference {
                entity,
                workspace_id,
                id,
            } => write!(
                f,
                "{entity} {workspace_id}/{id} references a task that does not exist"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "repository requires column `{column}` in table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound { .. }
            | Self::Conflict { .. }
            | Self::MissingReference { .. }
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. }
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Result of a conditional last-write-wins write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Row was inserted or replaced.
    Applied,
    /// Stored row has an equal or newer `updated_at`; nothing changed.
    Stale,
}

impl WriteOutcome {
    pub(crate) fn from_changes(changed: usize) -> Self {
        if changed == 0 {
            Self::Stale
        } else {
            Self::Applied
        }
    }
}

/// Maps constraint failures of a write on `(workspace_id, id)` to semantic errors.
pub(crate) fn classify_write_error(
    err: rusqlite::Error,
    entity: &'static str,
    workspace_id: &str,
    id: &str,
) -> RepoError {
    match constraint_kind(&err) {
        Some(ConstraintKind::Unique) => RepoError::Conflict {
            entity,
            workspace_id: workspace_id.to_string(),
            id: id.to_string(),
        },
        Some(ConstraintKind::ForeignKey) => RepoError::MissingReference {
            entity,
            workspace_id: workspace_id.to_string(),
            id: id.to_string(),
        },
        Some(ConstraintKind::Check) | None => err.into(),
    }
}

pub(crate) fn not_found(entity: &'static str, workspace_id: &str, id: &str) -> RepoError {
    RepoError::NotFound {
        entity,
        workspace_id: workspace_id.to_string(),
        id: id.to_string(),
    }
}

pub(crate) fn ensure_table(
    conn: &Connection,
    table: &'static str,
    columns: &[&'static str],
) -> RepoResult<()> {
    if !table_exists(conn, table)? {
        return Err(RepoError::MissingRequiredTable(table));
    }
    for &column in columns {
        if !table_has_column(conn, table, column)? {
            return Err(RepoError::MissingRequiredColumn { table, column });
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn parse_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}
