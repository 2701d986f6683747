//! Offline batch reconciliation.
//!
//! # Responsibility
//! - Merge client task/edge batches into the store with per-record
//!   last-write-wins.
//! - Report a per-record outcome and the server-side changes since the
//!   client's last sync.
//!
//! # Invariants
//! - A record replaces the stored one only when its `updated_at` is strictly
//!   greater; ties keep the stored record.
//! - Records merge independently; one rejected record never blocks another.
//! - Tasks merge before edges, so an edge may reference a task of the same batch.
//! - Replaying a batch is a no-op; batch order does not change the final state.
//! - A task tombstone at `T` supersedes every version of its incident edges at
//!   or before `T`, whether the edge arrives before or after the tombstone.
//! - An applied live task whose tags changed gets its inferred edges re-planned.

use crate::config::CoreConfig;
use crate::model::edge::Edge;
use crate::model::task::{normalize_tags, Task};
use crate::model::{now_epoch_ms, ValidationError};
use crate::repo::edge_repo::{EdgeListQuery, EdgeRepository};
use crate::repo::task_repo::{TaskListQuery, TaskRepository};
use crate::repo::{RepoError, WriteOutcome};
use crate::service::task_service::relink_inferred_edges;
use crate::service::{ServiceError, ServiceResult};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Batch of offline edits for one workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncRequest {
    pub tasks: Vec<Task>,
    pub edges: Vec<Edge>,
    /// When set, the report carries every record changed after this instant.
    pub last_sync_at: Option<i64>,
}

/// Outcome of merging one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum SyncOutcome {
    Applied,
    /// Stored record is as new or newer; incoming record discarded.
    Stale,
    Rejected(String),
}

/// Per-record merge result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordResult {
    pub id: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub tasks_applied: usize,
    pub tasks_stale: usize,
    pub tasks_rejected: usize,
    pub edges_applied: usize,
    pub edges_stale: usize,
    pub edges_rejected: usize,
    /// Edges superseded because an endpoint tombstone was applied.
    pub edges_cascaded: usize,
    /// Inferred edge writes planned for applied tasks whose tags changed.
    pub edges_relinked: usize,
}

/// Response of one sync call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub tasks: Vec<RecordResult>,
    pub edges: Vec<RecordResult>,
    pub stats: SyncStats,
    /// Tasks (tombstones included) updated after `last_sync_at`.
    pub changed_tasks: Vec<Task>,
    /// Edges (tombstones included) updated after `last_sync_at`.
    pub changed_edges: Vec<Edge>,
    pub synced_at: i64,
}

/// Sync service facade.
pub struct SyncService<T: TaskRepository, E: EdgeRepository> {
    tasks: T,
    edges: E,
    embedding_dimensions: Option<usize>,
}

impl<T: TaskRepository, E: EdgeRepository> SyncService<T, E> {
    pub fn new(tasks: T, edges: E, config: &CoreConfig) -> Self {
        Self {
            tasks,
            edges,
            embedding_dimensions: config.embedding_dimensions,
        }
    }

    /// Merges `request` into `workspace_id`.
    ///
    /// # Errors
    /// - `Validation` when `workspace_id` is empty.
    /// - `Repo` on storage transport failure; per-record problems are reported
    ///   as `Rejected` instead.
    pub fn sync(&self, workspace_id: &str, request: SyncRequest) -> ServiceResult<SyncReport> {
        if workspace_id.trim().is_empty() {
            return Err(ValidationError::EmptyWorkspaceId.into());
        }

        let mut report = SyncReport::default();

        for task in request.tasks {
            let id = task.id.clone();
            let outcome = self.merge_task(workspace_id, task, &mut report.stats)?;
            match &outcome {
                SyncOutcome::Applied => report.stats.tasks_applied += 1,
                SyncOutcome::Stale => report.stats.tasks_stale += 1,
                SyncOutcome::Rejected(_) => report.stats.tasks_rejected += 1,
            }
            report.tasks.push(RecordResult { id, outcome });
        }

        for edge in request.edges {
            let id = edge.id.clone();
            let outcome = self.merge_edge(workspace_id, edge)?;
            match &outcome {
                SyncOutcome::Applied => report.stats.edges_applied += 1,
                SyncOutcome::Stale => report.stats.edges_stale += 1,
                SyncOutcome::Rejected(_) => report.stats.edges_rejected += 1,
            }
            report.edges.push(RecordResult { id, outcome });
        }

        if let Some(since) = request.last_sync_at {
            report.changed_tasks = self.tasks.list_tasks(&TaskListQuery {
                workspace_id: workspace_id.to_string(),
                tag: None,
                include_deleted: true,
                updated_after: Some(since),
            })?;
            report.changed_edges = self.edges.list_edges(&EdgeListQuery {
                workspace_id: workspace_id.to_string(),
                touching: None,
                include_deleted: true,
                updated_after: Some(since),
            })?;
        }
        report.synced_at = now_epoch_ms();

        let stats = report.stats;
        info!(
            "event=sync_batch module=service status=ok workspace_id={} tasks_applied={} tasks_stale={} tasks_rejected={} edges_applied={} edges_stale={} edges_rejected={} edges_cascaded={} edges_relinked={}",
            workspace_id,
            stats.tasks_applied,
            stats.tasks_stale,
            stats.tasks_rejected,
            stats.edges_applied,
            stats.edges_stale,
            stats.edges_rejected,
            stats.edges_cascaded,
            stats.edges_relinked
        );
        Ok(report)
    }

    fn merge_task(
        &self,
        workspace_id: &str,
        mut task: Task,
        stats: &mut SyncStats,
    ) -> ServiceResult<SyncOutcome> {
        if let Some(reason) = claim_workspace(&mut task.workspace_id, workspace_id) {
            return Ok(reject("task", &task.id, reason));
        }
        task.tags = match normalize_tags(&task.tags) {
            Ok(tags) => tags,
            Err(err) => return Ok(reject("task", &task.id, err.to_string())),
        };
        if let (Some(expected), Some(embedding)) = (self.embedding_dimensions, &task.embedding) {
            if embedding.len() != expected {
                let err = ValidationError::EmbeddingDimension {
                    expected,
                    actual: embedding.len(),
                };
                return Ok(reject("task", &task.id, err.to_string()));
            }
        }

        let previous_tags = self
            .tasks
            .get_task(workspace_id, &task.id, true)?
            .map(|stored| stored.tags);

        let merged = match self.tasks.merge_task_if_newer(&task) {
            Ok(merged) => merged,
            Err(err) => return rejection("task", &task.id, err),
        };
        if merged.outcome == WriteOutcome::Stale {
            return Ok(SyncOutcome::Stale);
        }
        stats.edges_cascaded += merged.edges_tombstoned;

        let tags_changed = match &previous_tags {
            Some(previous) => previous != &task.tags,
            None => !task.tags.is_empty(),
        };
        if !task.deleted && tags_changed {
            let siblings = self.tasks.list_tasks(&TaskListQuery::live(workspace_id))?;
            let plan = relink_inferred_edges(&self.edges, &task, &siblings)?;
            stats.edges_relinked += plan.upserts.len() + plan.retired.len();
        }
        Ok(SyncOutcome::Applied)
    }

    fn merge_edge(&self, workspace_id: &str, mut edge: Edge) -> ServiceResult<SyncOutcome> {
        if let Some(reason) = claim_workspace(&mut edge.workspace_id, workspace_id) {
            return Ok(reject("edge", &edge.id, reason));
        }
        match self.edges.merge_edge_if_newer(&edge) {
            Ok(WriteOutcome::Applied) => Ok(SyncOutcome::Applied),
            Ok(WriteOutcome::Stale) => Ok(SyncOutcome::Stale),
            Err(err) => rejection("edge", &edge.id, err),
        }
    }
}

fn rejection(entity: &'static str, id: &str, err: RepoError) -> ServiceResult<SyncOutcome> {
    match err {
        RepoError::Validation(_) | RepoError::Conflict { .. } | RepoError::MissingReference { .. } => {
            Ok(reject(entity, id, err.to_string()))
        }
        other => Err(ServiceError::from(other)),
    }
}

fn reject(entity: &'static str, id: &str, reason: String) -> SyncOutcome {
    warn!(
        "event=sync_record module=service status=error entity={} id={} reason={}",
        entity, id, reason
    );
    SyncOutcome::Rejected(reason)
}

/// Fills an omitted workspace id; returns a rejection reason on mismatch.
fn claim_workspace(record_workspace: &mut String, workspace_id: &str) -> Option<String> {
    if record_workspace.is_empty() {
        *record_workspace = workspace_id.to_string();
        return None;
    }
    (record_workspace.as_str() != workspace_id).then(|| {
        format!("record belongs to workspace `{record_workspace}`, not `{workspace_id}`")
    })
}
