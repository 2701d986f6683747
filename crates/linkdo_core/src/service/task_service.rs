//! Task use-case service.
//!
//! # Responsibility
//! - Create tasks end to end: embed, place, persist, link.
//! - Provide task/edge CRUD, graph snapshots and embedding backfill.
//!
//! # Invariants
//! - The embedding call is the only suspension point and is timeout-bounded.
//! - Provider failure never fails a create/update; the embedding is deferred.
//! - Local writes advance `updated_at` past the stored value so they win LWW.
//! - Inferred edges always reflect the current tag sets of live tasks.

use crate::config::CoreConfig;
use crate::embedding::{embed_with_timeout, EmbeddingProvider};
use crate::layout::placement::{incremental_placement, Anchor};
use crate::linker::{plan_links, LinkPlan};
use crate::model::edge::{Edge, EdgeOrigin};
use crate::model::task::{normalize_tag, normalize_tags, Priority, Task, TaskId, TaskStatus};
use crate::model::{now_epoch_ms, ValidationError};
use crate::repo::edge_repo::{EdgeListQuery, EdgeRepository};
use crate::repo::task_repo::{CascadeDelete, TaskListQuery, TaskRepository};
use crate::repo::WriteOutcome;
use crate::service::{ServiceError, ServiceResult};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Input for creating one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDraft {
    /// Client-assigned id. A random UUID is generated when absent.
    pub id: Option<TaskId>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub category: Option<String>,
    /// Raw tags; trimmed, lowercased and deduplicated on create.
    pub tags: Vec<String>,
    pub due_date: Option<i64>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Partial update of one task. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    pub title: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` clears the due date.
    pub due_date: Option<Option<i64>>,
}

/// Render snapshot of one workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskGraph {
    pub tasks: Vec<Task>,
    /// Live edges whose endpoints are both live.
    pub edges: Vec<Edge>,
}

/// Result of one embedding backfill pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Deferred tasks that now carry an embedding.
    pub embedded: usize,
    /// Provider calls that failed again.
    pub failed: usize,
    /// Tasks changed concurrently; left for the next pass.
    pub skipped: usize,
}

/// Task-graph service over injected repositories and embedding provider.
pub struct TaskService<T: TaskRepository, E: EdgeRepository> {
    tasks: T,
    edges: E,
    provider: Arc<dyn EmbeddingProvider>,
    config: CoreConfig,
}

impl<T: TaskRepository, E: EdgeRepository> TaskService<T, E> {
    pub fn new(
        tasks: T,
        edges: E,
        provider: Arc<dyn EmbeddingProvider>,
        config: CoreConfig,
    ) -> Self {
        Self {
            tasks,
            edges,
            provider,
            config,
        }
    }

    /// Creates a task: embeds its text, places it, persists it and links it
    /// to live siblings that share a tag.
    ///
    /// # Errors
    /// - `Validation` for empty title/workspace or blank tags.
    /// - `Conflict` when the id already exists in the workspace (even as a tombstone).
    pub async fn create_task(&self, workspace_id: &str, draft: TaskDraft) -> ServiceResult<Task> {
        let task_id = draft
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut task = Task::new(workspace_id, task_id, draft.title.trim());
        task.description = draft.description.filter(|value| !value.trim().is_empty());
        task.priority = draft.priority.unwrap_or_default();
        task.status = draft.status.unwrap_or_default();
        if let Some(category) = draft.category.filter(|value| !value.trim().is_empty()) {
            task.category = category.trim().to_string();
        }
        task.tags = normalize_tags(&draft.tags)?;
        task.due_date = draft.due_date;
        task.validate()?;

        if self.tasks.get_task(workspace_id, &task.id, true)?.is_some() {
            return Err(ServiceError::Conflict {
                entity: "task",
                id: task.id,
            });
        }

        task.embedding = self.embed_or_defer(&task).await;

        let siblings = self.tasks.list_tasks(&TaskListQuery::live(workspace_id))?;
        let anchors: Vec<Anchor<'_>> = siblings
            .iter()
            .filter_map(|sibling| {
                sibling.position.map(|position| Anchor {
                    position,
                    embedding: sibling.embedding.as_deref(),
                })
            })
            .collect();
        task.position = Some(incremental_placement(
            task.embedding.as_deref(),
            &anchors,
            self.config.placement_neighbors,
        ));
        task.updated_at = now_epoch_ms();

        self.tasks.insert_task(&task)?;
        let linked = self.relink(&task, &siblings)?;

        info!(
            "event=task_create module=service status=ok workspace_id={} task_id={} embedding={} edges={}",
            workspace_id,
            task.id,
            embedding_state(&task),
            linked.upserts.len()
        );
        Ok(task)
    }

    /// Applies a partial update. Re-embeds when text fields change and relinks
    /// when tags change.
    pub async fn update_task(
        &self,
        workspace_id: &str,
        id: &str,
        patch: TaskPatch,
    ) -> ServiceResult<Task> {
        let stored = self.require_live_task(workspace_id, id)?;
        let mut task = stored.clone();

        if let Some(title) = patch.title {
            task.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            task.description = description.filter(|value| !value.trim().is_empty());
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(category) = patch.category {
            task.category = category.trim().to_string();
        }
        if let Some(tags) = patch.tags {
            task.tags = normalize_tags(&tags)?;
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }
        task.validate()?;

        if task.embedding_text() != stored.embedding_text() {
            task.embedding = self.embed_or_defer(&task).await;
        }
        task.updated_at = now_epoch_ms().max(stored.updated_at + 1);

        if self.tasks.upsert_task_if_newer(&task)? == WriteOutcome::Stale {
            return Err(ServiceError::Conflict {
                entity: "task",
                id: task.id,
            });
        }

        if task.tags != stored.tags {
            let siblings = self.tasks.list_tasks(&TaskListQuery::live(workspace_id))?;
            let plan = self.relink(&task, &siblings)?;
            info!(
                "event=task_relink module=service status=ok workspace_id={} task_id={} upserts={} retired={}",
                workspace_id,
                task.id,
                plan.upserts.len(),
                plan.retired.len()
            );
        }
        Ok(task)
    }

    pub fn get_task(&self, workspace_id: &str, id: &str) -> ServiceResult<Task> {
        self.require_live_task(workspace_id, id)
    }

    /// Lists live tasks, optionally restricted to one tag.
    pub fn list_tasks(&self, workspace_id: &str, tag: Option<&str>) -> ServiceResult<Vec<Task>> {
        let mut query = TaskListQuery::live(workspace_id);
        if let Some(raw) = tag {
            query.tag =
                Some(normalize_tag(raw).ok_or_else(|| ValidationError::InvalidTag(raw.into()))?);
        }
        Ok(self.tasks.list_tasks(&query)?)
    }

    /// Tombstones a task without touching its edges.
    pub fn delete_task(&self, workspace_id: &str, id: &str) -> ServiceResult<()> {
        let updated_at = self.tasks.tombstone_task(workspace_id, id, now_epoch_ms())?;
        info!(
            "event=task_delete module=service status=ok workspace_id={} task_id={} updated_at={}",
            workspace_id, id, updated_at
        );
        Ok(())
    }

    /// Tombstones a task and every edge referencing it, atomically.
    pub fn cascade_delete(&self, workspace_id: &str, id: &str) -> ServiceResult<CascadeDelete> {
        let outcome = self
            .tasks
            .cascade_delete_task(workspace_id, id, now_epoch_ms())?;
        info!(
            "event=task_cascade_delete module=service status=ok workspace_id={} task_id={} edges={}",
            workspace_id, id, outcome.edges_tombstoned
        );
        Ok(outcome)
    }

    /// Creates an explicit manual edge between two live tasks.
    ///
    /// # Errors
    /// - `Conflict` when a live edge already joins the pair.
    /// - `NotFound` when an endpoint is missing or tombstoned.
    pub fn create_edge(
        &self,
        workspace_id: &str,
        source: &str,
        target: &str,
        weight: f64,
    ) -> ServiceResult<Edge> {
        let mut edge = Edge::between(
            workspace_id,
            source,
            target,
            weight,
            EdgeOrigin::Manual,
            now_epoch_ms(),
        );
        edge.validate()?;
        self.require_live_task(workspace_id, source)?;
        self.require_live_task(workspace_id, target)?;

        if let Some(existing) = self.edges.find_edge_between(workspace_id, source, target)? {
            if existing.is_active() {
                return Err(ServiceError::Conflict {
                    entity: "edge",
                    id: existing.id,
                });
            }
            edge.id = existing.id;
            edge.updated_at = edge.updated_at.max(existing.updated_at + 1);
        }

        if self.edges.upsert_edge_if_newer(&edge)? == WriteOutcome::Stale {
            return Err(ServiceError::Conflict {
                entity: "edge",
                id: edge.id,
            });
        }
        Ok(edge)
    }

    /// Tombstones the live edge joining `source` and `target`.
    pub fn delete_edge(&self, workspace_id: &str, source: &str, target: &str) -> ServiceResult<()> {
        let existing = self
            .edges
            .find_edge_between(workspace_id, source, target)?
            .filter(Edge::is_active)
            .ok_or_else(|| ServiceError::NotFound {
                entity: "edge",
                id: format!("{source}-{target}"),
            })?;

        let mut edge = existing.clone();
        edge.deleted = true;
        edge.updated_at = now_epoch_ms().max(existing.updated_at + 1);
        self.edges.upsert_edge_if_newer(&edge)?;
        Ok(())
    }

    pub fn list_edges(&self, workspace_id: &str) -> ServiceResult<Vec<Edge>> {
        Ok(self.edges.list_edges(&EdgeListQuery::live(workspace_id))?)
    }

    pub fn list_tags(&self, workspace_id: &str) -> ServiceResult<Vec<String>> {
        Ok(self.tasks.list_tags(workspace_id)?)
    }

    /// Live tasks and the live edges between them.
    pub fn graph(&self, workspace_id: &str) -> ServiceResult<TaskGraph> {
        let tasks = self.tasks.list_tasks(&TaskListQuery::live(workspace_id))?;
        let live: HashSet<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
        let edges = self
            .edges
            .list_edges(&EdgeListQuery::live(workspace_id))?
            .into_iter()
            .filter(|edge| {
                live.contains(edge.source.as_str()) && live.contains(edge.target.as_str())
            })
            .collect();
        Ok(TaskGraph { tasks, edges })
    }

    /// Retries the embedding of every live task whose embedding is deferred.
    ///
    /// The stored row is only updated if it did not change meanwhile.
    pub async fn backfill_embeddings(&self, workspace_id: &str) -> ServiceResult<BackfillReport> {
        let mut report = BackfillReport::default();
        let pending: Vec<Task> = self
            .tasks
            .list_tasks(&TaskListQuery::live(workspace_id))?
            .into_iter()
            .filter(|task| task.embedding.is_none())
            .collect();

        for task in pending {
            let Some(embedding) = self.embed_or_defer(&task).await else {
                report.failed += 1;
                continue;
            };
            if self
                .tasks
                .set_embedding(workspace_id, &task.id, &embedding, task.updated_at)?
            {
                report.embedded += 1;
            } else {
                report.skipped += 1;
            }
        }

        info!(
            "event=embedding_backfill module=service status=ok workspace_id={} embedded={} failed={} skipped={}",
            workspace_id, report.embedded, report.failed, report.skipped
        );
        Ok(report)
    }

    fn require_live_task(&self, workspace_id: &str, id: &str) -> ServiceResult<Task> {
        self.tasks
            .get_task(workspace_id, id, false)?
            .ok_or_else(|| ServiceError::NotFound {
                entity: "task",
                id: id.to_string(),
            })
    }

    async fn embed_or_defer(&self, task: &Task) -> Option<Vec<f32>> {
        match embed_with_timeout(
            self.provider.as_ref(),
            &task.embedding_text(),
            self.config.embedding_timeout(),
            self.config.embedding_dimensions,
        )
        .await
        {
            Ok(embedding) => Some(embedding),
            Err(err) => {
                warn!(
                    "event=task_embed module=service status=degraded workspace_id={} task_id={} error={}",
                    task.workspace_id, task.id, err
                );
                None
            }
        }
    }

    fn relink(&self, task: &Task, siblings: &[Task]) -> ServiceResult<LinkPlan> {
        relink_inferred_edges(&self.edges, task, siblings)
    }
}

/// Brings the inferred edges of `task` in line with its current tags.
pub(crate) fn relink_inferred_edges<E: EdgeRepository>(
    edges: &E,
    task: &Task,
    siblings: &[Task],
) -> ServiceResult<LinkPlan> {
    let incident = edges.list_edges(&EdgeListQuery {
        workspace_id: task.workspace_id.clone(),
        touching: Some(task.id.clone()),
        include_deleted: true,
        updated_after: None,
    })?;
    let plan = plan_links(task, siblings, &incident, now_epoch_ms());
    for edge in plan.upserts.iter().chain(&plan.retired) {
        edges.upsert_edge_if_newer(edge)?;
    }
    Ok(plan)
}

fn embedding_state(task: &Task) -> &'static str {
    if task.embedding.is_some() {
        "ready"
    } else {
        "deferred"
    }
}
