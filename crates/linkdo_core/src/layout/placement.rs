//! Incremental placement of newly created tasks.
//!
//! # Responsibility
//! - Give a new task a plausible position without refitting the workspace.
//!
//! # Invariants
//! - Placement is deterministic for identical input.
//! - Output is always finite.
//! - This is an approximation; only `pca::recompute_positions` is authoritative.
//!
//! Policy: the new node lands on the similarity-weighted centroid of its most
//! cosine-similar, already positioned neighbors, nudged by a small spiral offset
//! so it does not sit on top of a near-duplicate. Without usable neighbors
//! (deferred embedding, empty workspace, no positive similarity) it takes the
//! next slot of a golden-angle spiral around the origin.

use crate::model::task::Position;

/// Default number of neighbors blended into the centroid.
pub const DEFAULT_PLACEMENT_NEIGHBORS: usize = 5;

const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;
const SPIRAL_STEP: f64 = 10.0;
const NEIGHBOR_JITTER: f64 = 4.0;

/// One already positioned task considered as a placement anchor.
#[derive(Debug, Clone, Copy)]
pub struct Anchor<'a> {
    pub position: Position,
    pub embedding: Option<&'a [f32]>,
}

/// Places a new task relative to existing positioned tasks.
///
/// `anchors` should contain every positioned live task of the workspace; its
/// length also selects the spiral slot.
pub fn incremental_placement(
    new_embedding: Option<&[f32]>,
    anchors: &[Anchor<'_>],
    neighbors: usize,
) -> Position {
    let slot = anchors.len();
    let Some(embedding) = new_embedding else {
        return spiral_slot(slot, SPIRAL_STEP);
    };

    let mut scored: Vec<(f64, Position)> = anchors
        .iter()
        .filter(|anchor| anchor.position.is_finite())
        .filter_map(|anchor| {
            let other = anchor.embedding?;
            let similarity = cosine_similarity(embedding, other)?;
            (similarity > 0.0).then_some((similarity, anchor.position))
        })
        .collect();
    if scored.is_empty() {
        return spiral_slot(slot, SPIRAL_STEP);
    }

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(neighbors.max(1));

    let total: f64 = scored.iter().map(|(weight, _)| weight).sum();
    let x = scored.iter().map(|(w, p)| w * p.x).sum::<f64>() / total;
    let y = scored.iter().map(|(w, p)| w * p.y).sum::<f64>() / total;
    let (sin, cos) = ((slot + 1) as f64 * GOLDEN_ANGLE).sin_cos();
    let placed = Position::new(x + cos * NEIGHBOR_JITTER, y + sin * NEIGHBOR_JITTER);

    if placed.is_finite() {
        placed
    } else {
        spiral_slot(slot, SPIRAL_STEP)
    }
}

/// Cosine similarity, `None` for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON || !denom.is_finite() {
        return None;
    }
    Some(dot / denom)
}

/// Slot `n` on a Vogel spiral; slot 0 is the origin.
fn spiral_slot(slot: usize, step: f64) -> Position {
    let n = slot as f64;
    let radius = step * n.sqrt();
    let angle = n * GOLDEN_ANGLE;
    Position::new(radius * angle.cos(), radius * angle.sin())
}
