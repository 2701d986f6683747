//! Edge repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist weighted task relations keyed by `(workspace_id, id)`.
//! - Enforce one row per unordered endpoint pair.
//!
//! # Invariants
//! - Endpoints reference tasks of the same workspace (foreign keys).
//! - `endpoint_lo`/`endpoint_hi` always mirror the ordered `source`/`target`.
//! - Tombstoning is LWW-guarded; a newer stored edge is never overwritten.
//! - An endpoint tombstone at `T` acts as an edge tombstone at `T`: it
//!   supersedes edge versions at or before `T`, whichever arrives first.

use super::{
    bool_to_int, classify_write_error, ensure_table, parse_bool, RepoError, RepoResult,
    WriteOutcome,
};
use crate::model::edge::{ordered_pair, Edge, EdgeOrigin};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use rusqlite::{Transaction, TransactionBehavior};

const EDGE_SELECT_SQL: &str = "SELECT
    workspace_id,
    id,
    source,
    target,
    weight,
    origin,
    updated_at,
    deleted
FROM edges";

/// Query options for listing edges of one workspace.
#[derive(Debug, Clone, Default)]
pub struct EdgeListQuery {
    pub workspace_id: String,
    /// Only edges touching this task.
    pub touching: Option<String>,
    pub include_deleted: bool,
    /// Only edges with `updated_at` strictly greater than this value.
    pub updated_after: Option<i64>,
}

impl EdgeListQuery {
    /// Live edges of `workspace_id`.
    pub fn live(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            ..Self::default()
        }
    }
}

/// Repository interface for edge persistence.
pub trait EdgeRepository {
    fn get_edge(&self, workspace_id: &str, id: &str) -> RepoResult<Option<Edge>>;
    /// Stored edge (live or tombstoned) for the unordered pair `a`/`b`.
    fn find_edge_between(&self, workspace_id: &str, a: &str, b: &str)
        -> RepoResult<Option<Edge>>;
    fn list_edges(&self, query: &EdgeListQuery) -> RepoResult<Vec<Edge>>;
    /// Conditional LWW write keyed by `(workspace_id, id)`.
    ///
    /// # Errors
    /// - `Conflict` when another id already holds the endpoint pair.
    /// - `MissingReference` when an endpoint task does not exist.
    fn upsert_edge_if_newer(&self, edge: &Edge) -> RepoResult<WriteOutcome>;
    /// LWW write that honours endpoint tombstones already stored.
    ///
    /// When an endpoint task is tombstoned at `T >= edge.updated_at`, the edge
    /// is written as a tombstone stamped `T` instead.
    fn merge_edge_if_newer(&self, edge: &Edge) -> RepoResult<WriteOutcome>;
}

/// SQLite-backed edge repository.
pub struct SqliteEdgeRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEdgeRepository<'conn> {
    /// Creates a repository after verifying the migrated schema.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_table(
            conn,
            "edges",
            &[
                "workspace_id",
                "id",
                "source",
                "target",
                "endpoint_lo",
                "endpoint_hi",
                "weight",
                "origin",
                "updated_at",
                "deleted",
            ],
        )?;
        ensure_table(conn, "tasks", &["workspace_id", "id", "updated_at", "deleted"])?;
        Ok(Self { conn })
    }
}

impl EdgeRepository for SqliteEdgeRepository<'_> {
    fn get_edge(&self, workspace_id: &str, id: &str) -> RepoResult<Option<Edge>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EDGE_SELECT_SQL}
             WHERE workspace_id = ?1
               AND id = ?2;"
        ))?;
        let mut rows = stmt.query(params![workspace_id, id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_edge_row(row)?));
        }
        Ok(None)
    }

    fn find_edge_between(
        &self,
        workspace_id: &str,
        a: &str,
        b: &str,
    ) -> RepoResult<Option<Edge>> {
        let (lo, hi) = ordered_pair(a, b);
        let mut stmt = self.conn.prepare(&format!(
            "{EDGE_SELECT_SQL}
             WHERE workspace_id = ?1
               AND endpoint_lo = ?2
               AND endpoint_hi = ?3;"
        ))?;
        let mut rows = stmt.query(params![workspace_id, lo, hi])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_edge_row(row)?));
        }
        Ok(None)
    }

    fn list_edges(&self, query: &EdgeListQuery) -> RepoResult<Vec<Edge>> {
        let mut sql = format!("{EDGE_SELECT_SQL} WHERE workspace_id = ?");
        let mut bind_values: Vec<Value> = vec![Value::Text(query.workspace_id.clone())];

        if !query.include_deleted {
            sql.push_str(" AND deleted = 0");
        }
        if let Some(task_id) = query.touching.as_ref() {
            sql.push_str(" AND (source = ? OR target = ?)");
            bind_values.push(Value::Text(task_id.clone()));
            bind_values.push(Value::Text(task_id.clone()));
        }
        if let Some(after) = query.updated_after {
            sql.push_str(" AND updated_at > ?");
            bind_values.push(Value::Integer(after));
        }
        sql.push_str(" ORDER BY endpoint_lo ASC, endpoint_hi ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut edges = Vec::new();
        while let Some(row) = rows.next()? {
            edges.push(parse_edge_row(row)?);
        }
        Ok(edges)
    }

    fn upsert_edge_if_newer(&self, edge: &Edge) -> RepoResult<WriteOutcome> {
        upsert_edge_in(self.conn, edge)
    }

    fn merge_edge_if_newer(&self, edge: &Edge) -> RepoResult<WriteOutcome> {
        edge.validate()?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let endpoint_tombstone: Option<i64> = tx.query_row(
            "SELECT MAX(updated_at)
             FROM tasks
             WHERE workspace_id = ?1
               AND id IN (?2, ?3)
               AND deleted = 1;",
            params![edge.workspace_id.as_str(), edge.source.as_str(), edge.target.as_str()],
            |row| row.get(0),
        )?;

        let outcome = match endpoint_tombstone {
            Some(at) if at >= edge.updated_at => {
                let mut superseded = edge.clone();
                superseded.deleted = true;
                superseded.updated_at = at;
                upsert_edge_in(&tx, &superseded)?
            }
            _ => upsert_edge_in(&tx, edge)?,
        };

        tx.commit()?;
        Ok(outcome)
    }
}

fn upsert_edge_in(conn: &Connection, edge: &Edge) -> RepoResult<WriteOutcome> {
    edge.validate()?;
    let (lo, hi) = edge.ordered_endpoints();

    let changed = conn
        .execute(
            "INSERT INTO edges (
                workspace_id,
                id,
                source,
                target,
                endpoint_lo,
                endpoint_hi,
                weight,
                origin,
                updated_at,
                deleted
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (workspace_id, id) DO UPDATE SET
                source = excluded.source,
                target = excluded.target,
                endpoint_lo = excluded.endpoint_lo,
                endpoint_hi = excluded.endpoint_hi,
                weight = excluded.weight,
                origin = excluded.origin,
                updated_at = excluded.updated_at,
                deleted = excluded.deleted
            WHERE excluded.updated_at > edges.updated_at;",
            params![
                edge.workspace_id.as_str(),
                edge.id.as_str(),
                edge.source.as_str(),
                edge.target.as_str(),
                lo,
                hi,
                edge.weight,
                origin_to_db(edge.origin),
                edge.updated_at,
                bool_to_int(edge.deleted),
            ],
        )
        .map_err(|err| classify_write_error(err, "edge", &edge.workspace_id, &edge.id))?;
    Ok(WriteOutcome::from_changes(changed))
}

/// Applies an endpoint tombstone at `at` to edges touching `task_id`.
///
/// Edges older than `at`, and live edges stamped exactly `at`, become
/// tombstones stamped `at`. Returns the number of rows changed.
pub(crate) fn tombstone_edges_touching_in(
    conn: &Connection,
    workspace_id: &str,
    task_id: &str,
    at: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE edges
         SET deleted = 1,
             updated_at = ?3
         WHERE workspace_id = ?1
           AND (source = ?2 OR target = ?2)
           AND (updated_at < ?3 OR (updated_at = ?3 AND deleted = 0));",
        params![workspace_id, task_id, at],
    )
}

fn parse_edge_row(row: &Row<'_>) -> RepoResult<Edge> {
    let origin_text: String = row.get("origin")?;
    let origin = parse_origin(&origin_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid origin `{origin_text}` in edges.origin"))
    })?;

    let edge = Edge {
        workspace_id: row.get("workspace_id")?,
        id: row.get("id")?,
        source: row.get("source")?,
        target: row.get("target")?,
        weight: row.get("weight")?,
        origin,
        updated_at: row.get("updated_at")?,
        deleted: parse_bool(row.get("deleted")?, "edges.deleted")?,
    };
    edge.validate()?;
    Ok(edge)
}

fn origin_to_db(origin: EdgeOrigin) -> &'static str {
    match origin {
        EdgeOrigin::Inferred => "inferred",
        EdgeOrigin::Manual => "manual",
    }
}

fn parse_origin(value: &str) -> Option<EdgeOrigin> {
    match value {
        "inferred" => Some(EdgeOrigin::Inferred),
        "manual" => Some(EdgeOrigin::Manual),
        _ => None,
    }
}
