//! Domain model for the task graph.
//!
//! # Responsibility
//! - Define canonical task/edge records shared by layout, linking and sync.
//! - Own field-level validation and tag normalization.
//!
//! # Invariants
//! - Every record is keyed by `(workspace_id, id)` and never crosses workspaces.
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod edge;
pub mod task;

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Workspace isolation key. Every task and edge belongs to exactly one.
pub type WorkspaceId = String;

/// Field-level validation failure for task/edge records.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyWorkspaceId,
    EmptyId,
    EmptyTitle,
    /// A tag is empty after trimming.
    InvalidTag(String),
    /// Edge weight outside `(0, 1]` or not finite.
    WeightOutOfRange(f64),
    /// Edge endpoints are missing or identical.
    InvalidEndpoints { source: String, target: String },
    /// Embedding length differs from the configured dimension.
    EmbeddingDimension { expected: usize, actual: usize },
    /// Embedding contains NaN or infinite components.
    NonFiniteEmbedding,
    /// Position contains NaN or infinite components.
    NonFinitePosition,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyWorkspaceId => write!(f, "workspace_id cannot be empty"),
            Self::EmptyId => write!(f, "id cannot be empty"),
            Self::EmptyTitle => write!(f, "title cannot be empty"),
            Self::InvalidTag(tag) => write!(f, "invalid tag: `{tag}`"),
            Self::WeightOutOfRange(weight) => {
                write!(f, "edge weight {weight} is outside (0, 1]")
            }
            Self::InvalidEndpoints { source, target } => {
                write!(f, "invalid edge endpoints `{source}` -> `{target}`")
            }
            Self::EmbeddingDimension { expected, actual } => write!(
                f,
                "embedding dimension mismatch: expected {expected}, got {actual}"
            ),
            Self::NonFiniteEmbedding => write!(f, "embedding contains non-finite values"),
            Self::NonFinitePosition => write!(f, "position contains non-finite values"),
        }
    }
}

impl Error for ValidationError {}

/// Returns current wall-clock time as Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

pub(crate) fn validate_key(workspace_id: &str, id: &str) -> Result<(), ValidationError> {
    if workspace_id.trim().is_empty() {
        return Err(ValidationError::EmptyWorkspaceId);
    }
    if id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    Ok(())
}
