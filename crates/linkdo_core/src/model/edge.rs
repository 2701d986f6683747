//! Edge domain model.
//!
//! # Responsibility
//! - Define the weighted, undirected relation between two tasks.
//! - Derive the stable per-pair edge id.
//!
//! # Invariants
//! - `0 < weight <= 1`.
//! - `source != target`, both in the edge's workspace.
//! - One edge id per unordered endpoint pair, independent of endpoint order.

use super::task::TaskId;
use super::{validate_key, ValidationError, WorkspaceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Edge identifier, unique within one workspace.
pub type EdgeId = String;

/// How an edge came to exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeOrigin {
    /// Derived from tag overlap; maintained by the linker.
    Inferred,
    /// Created explicitly by a user or received through sync.
    #[default]
    Manual,
}

/// Canonical edge record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub workspace_id: WorkspaceId,
    pub id: EdgeId,
    pub source: TaskId,
    pub target: TaskId,
    pub weight: f64,
    #[serde(default)]
    pub origin: EdgeOrigin,
    /// Unix epoch milliseconds. LWW ordering key.
    pub updated_at: i64,
    #[serde(default)]
    pub deleted: bool,
}

impl Edge {
    /// Creates a live edge keyed by the pair-derived id.
    pub fn between(
        workspace_id: impl Into<WorkspaceId>,
        source: impl Into<TaskId>,
        target: impl Into<TaskId>,
        weight: f64,
        origin: EdgeOrigin,
        updated_at: i64,
    ) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            workspace_id: workspace_id.into(),
            id: pair_edge_id(&source, &target),
            source,
            target,
            weight,
            origin,
            updated_at,
            deleted: false,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_key(&self.workspace_id, &self.id)?;
        if self.source.trim().is_empty()
            || self.target.trim().is_empty()
            || self.source == self.target
        {
            return Err(ValidationError::InvalidEndpoints {
                source: self.source.clone(),
                target: self.target.clone(),
            });
        }
        validate_weight(self.weight)
    }

    /// Returns whether `task_id` is one of the endpoints.
    pub fn touches(&self, task_id: &str) -> bool {
        self.source == task_id || self.target == task_id
    }

    /// Endpoint ids ordered lexicographically.
    pub fn ordered_endpoints(&self) -> (&str, &str) {
        ordered_pair(&self.source, &self.target)
    }

    /// Returns the endpoint opposite to `task_id`.
    pub fn other_endpoint(&self, task_id: &str) -> Option<&str> {
        if self.source == task_id {
            Some(self.target.as_str())
        } else if self.target == task_id {
            Some(self.source.as_str())
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }
}

/// Checks that `weight` lies in `(0, 1]`.
pub fn validate_weight(weight: f64) -> Result<(), ValidationError> {
    if weight.is_finite() && weight > 0.0 && weight <= 1.0 {
        Ok(())
    } else {
        Err(ValidationError::WeightOutOfRange(weight))
    }
}

/// Deterministic edge id for an unordered task pair.
///
/// Two clients that link the same pair offline produce the same key, so their
/// writes meet in one LWW register instead of creating duplicate edges.
pub fn pair_edge_id(a: &str, b: &str) -> EdgeId {
    let (lo, hi) = ordered_pair(a, b);
    let name = format!("{lo}\u{1f}{hi}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

pub(crate) fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
