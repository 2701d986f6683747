//! Workspace layout use-case service.
//!
//! # Responsibility
//! - Run a full PCA layout over a workspace snapshot and persist positions.
//!
//! # Invariants
//! - Positions are derived data: writing them never advances `updated_at`.
//! - Only rows still live at write time receive a position; tasks created
//!   after the snapshot keep their incremental placement.

use crate::config::CoreConfig;
use crate::layout::pca::recompute_positions;
use crate::layout::LayoutPoint;
use crate::model::task::{Position, TaskId};
use crate::repo::task_repo::{TaskListQuery, TaskRepository};
use crate::service::ServiceResult;
use log::info;
use std::collections::BTreeMap;
use std::time::Instant;

/// Layout service facade.
pub struct LayoutService<T: TaskRepository> {
    tasks: T,
    spread: f64,
}

impl<T: TaskRepository> LayoutService<T> {
    pub fn new(tasks: T, config: &CoreConfig) -> Self {
        Self {
            tasks,
            spread: config.layout_spread,
        }
    }

    /// Recomputes ("arranges") positions of every live task in the workspace.
    ///
    /// Returns the computed mapping, including tasks whose row was deleted
    /// before the write and therefore kept no position.
    pub fn recompute_layout(&self, workspace_id: &str) -> ServiceResult<BTreeMap<TaskId, Position>> {
        let started_at = Instant::now();
        let snapshot = self.tasks.list_tasks(&TaskListQuery::live(workspace_id))?;
        let points: Vec<LayoutPoint<'_>> = snapshot
            .iter()
            .map(|task| LayoutPoint {
                id: &task.id,
                embedding: task.embedding.as_deref(),
            })
            .collect();

        let positions = recompute_positions(&points, self.spread);
        let written = self.tasks.set_positions(workspace_id, &positions)?;

        info!(
            "event=layout_recompute module=service status=ok workspace_id={} tasks={} embedded={} written={} duration_ms={}",
            workspace_id,
            points.len(),
            points.iter().filter(|point| point.embedding.is_some()).count(),
            written,
            started_at.elapsed().as_millis()
        );
        Ok(positions)
    }
}
