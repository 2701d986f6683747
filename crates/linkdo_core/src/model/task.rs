//! Task domain model.
//!
//! # Responsibility
//! - Define the canonical task record rendered as a graph node.
//! - Provide tag normalization and soft-delete lifecycle helpers.
//!
//! # Invariants
//! - `(workspace_id, id)` is stable and never reused for another task.
//! - `tags` holds trimmed, lowercased, unique values.
//! - `deleted` is the source of truth for tombstone state.
//! - `title` may only be empty on tombstones.

use super::{now_epoch_ms, validate_key, ValidationError, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Client-assigned task identifier, unique within one workspace.
pub type TaskId = String;

/// Normalized tag set. Ordered so persisted JSON compares byte-for-byte.
pub type TagSet = BTreeSet<String>;

/// Category assigned when the caller does not provide one.
pub const DEFAULT_CATEGORY: &str = "general";

/// Task urgency, ordered `low < medium < high < critical`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Created but not started.
    #[default]
    Todo,
    /// Work is in progress.
    InProgress,
    /// Completed.
    Done,
}

/// 2D plot coordinate of a task node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Canonical task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Filled from the calling workspace when omitted on the wire.
    #[serde(default)]
    pub workspace_id: WorkspaceId,
    pub id: TaskId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: TagSet,
    /// `None` while the embedding is deferred (provider unavailable or text changed by sync).
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// `None` until placed.
    #[serde(default)]
    pub position: Option<Position>,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub due_date: Option<i64>,
    /// Unix epoch milliseconds. LWW ordering key.
    pub updated_at: i64,
    /// Soft delete tombstone to preserve sync convergence.
    #[serde(default)]
    pub deleted: bool,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl Task {
    /// Creates a live task with default metadata and `updated_at = now`.
    pub fn new(
        workspace_id: impl Into<WorkspaceId>,
        id: impl Into<TaskId>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            id: id.into(),
            title: title.into(),
            description: None,
            priority: Priority::default(),
            status: TaskStatus::default(),
            category: default_category(),
            tags: TagSet::new(),
            embedding: None,
            position: None,
            due_date: None,
            updated_at: now_epoch_ms(),
            deleted: false,
        }
    }

    /// Validates record-level invariants before persistence.
    ///
    /// Tombstones are allowed to carry an empty title.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_key(&self.workspace_id, &self.id)?;
        if !self.deleted && self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        for tag in &self.tags {
            if normalize_tag(tag).as_deref() != Some(tag.as_str()) {
                return Err(ValidationError::InvalidTag(tag.clone()));
            }
        }
        if let Some(embedding) = self.embedding.as_ref() {
            if embedding.iter().any(|value| !value.is_finite()) {
                return Err(ValidationError::NonFiniteEmbedding);
            }
        }
        if let Some(position) = self.position.as_ref() {
            if !position.is_finite() {
                return Err(ValidationError::NonFinitePosition);
            }
        }
        Ok(())
    }

    /// Text fed to the embedding provider.
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, self.description.as_deref(), &self.tags)
    }

    /// Marks this task as tombstoned at `at` (epoch ms).
    pub fn soft_delete(&mut self, at: i64) {
        self.deleted = true;
        self.updated_at = at;
    }

    /// Returns whether this task should be considered visible.
    pub fn is_active(&self) -> bool {
        !self.deleted
    }
}

/// Builds the embedding input from the text-bearing fields: title, description, tags.
pub fn embedding_text(title: &str, description: Option<&str>, tags: &TagSet) -> String {
    let tags = tags.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
    format!("{} {} {}", title, description.unwrap_or(""), tags)
}

/// Normalizes one tag value: trimmed and lowercased, `None` when empty.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes and deduplicates raw tag input.
///
/// # Errors
/// - Returns `InvalidTag` for any tag that is empty after trimming.
pub fn normalize_tags<I, S>(tags: I) -> Result<TagSet, ValidationError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut unique = TagSet::new();
    for tag in tags {
        let raw = tag.as_ref();
        match normalize_tag(raw) {
            Some(value) => {
                unique.insert(value);
            }
            None => return Err(ValidationError::InvalidTag(raw.to_string())),
        }
    }
    Ok(unique)
}
