//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Register task-graph schema migrations in strictly increasing order.
//! - Apply pending migrations atomically.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - A database stamped with a newer version than this binary knows is refused.
//! - A migration run only commits when every edge row still references tasks
//!   of its own workspace.

use crate::db::{DbError, DbResult};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "tasks",
        sql: include_str!("0001_tasks.sql"),
    },
    Migration {
        version: 2,
        name: "edges",
        sql: include_str!("0002_edges.sql"),
    },
];

/// Summary of one migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    /// Names of the migrations applied by this run, in order.
    pub applied: Vec<&'static str>,
}

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies all pending migrations on the provided connection.
///
/// # Errors
/// - `UnsupportedSchemaVersion` for a database newer than this binary.
/// - `DanglingEdges` when migrated data holds edges whose endpoints are not
///   tasks of the same workspace; nothing is committed then.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<MigrationReport> {
    let current_version = current_user_version(conn)?;
    let latest = latest_version();

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    let mut report = MigrationReport {
        from_version: current_version,
        to_version: current_version,
        applied: Vec::new(),
    };
    if current_version == latest {
        return Ok(report);
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
        report.to_version = migration.version;
        report.applied.push(migration.name);
    }

    let dangling = dangling_edge_count(&tx)?;
    if dangling > 0 {
        return Err(DbError::DanglingEdges { count: dangling });
    }
    tx.commit()?;

    Ok(report)
}

/// Edge rows whose `(workspace_id, source|target)` has no task row.
fn dangling_edge_count(conn: &Connection) -> DbResult<usize> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check(edges);")?;
    let mut rows = stmt.query([])?;
    let mut count = 0;
    while rows.next()?.is_some() {
        count += 1;
    }
    Ok(count)
}

fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
