//! Graph layout engine.
//!
//! # Responsibility
//! - Project task embeddings onto 2D plot coordinates (`pca`).
//! - Place single new tasks cheaply between full recomputes (`placement`).
//!
//! # Invariants
//! - Layout functions are pure and never fail; degenerate input yields finite
//!   fallback coordinates instead of errors.
//! - Axis sign/order of `pca` output is not stable across recomputes.

pub mod pca;
pub mod placement;

use crate::model::task::TaskId;

/// Spread constant applied after per-axis standardization.
pub const DEFAULT_LAYOUT_SPREAD: f64 = 40.0;

/// One layout input row: a task id and its (possibly deferred) embedding.
#[derive(Debug, Clone, Copy)]
pub struct LayoutPoint<'a> {
    pub id: &'a TaskId,
    pub embedding: Option<&'a [f32]>,
}
