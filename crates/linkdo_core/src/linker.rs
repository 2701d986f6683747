//! Tag-overlap similarity linker.
//!
//! # Responsibility
//! - Score task pairs by tag overlap.
//! - Plan edge upserts/retirements for one task against its workspace siblings.
//!
//! # Invariants
//! - `weight = |S(T) ∩ S(C)| / max(|S(T)|, |S(C)|)`, always in `(0, 1]`.
//! - Empty tag sets never link; tasks never link to themselves.
//! - Siblings from another workspace and tombstoned siblings are ignored.
//! - An existing edge for a pair is reused (same id), never duplicated.
//! - Manual edges are never modified by the linker.

use crate::model::edge::{Edge, EdgeOrigin};
use crate::model::task::{TagSet, Task, TaskId};
use std::collections::BTreeMap;

/// Edge writes derived for one task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkPlan {
    /// New, re-weighted or revived inferred edges.
    pub upserts: Vec<Edge>,
    /// Inferred edges whose pair no longer shares a tag, as tombstones.
    pub retired: Vec<Edge>,
}

impl LinkPlan {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.retired.is_empty()
    }
}

/// Tag-overlap weight between two tag sets, `None` when they share nothing.
pub fn tag_overlap_weight(a: &TagSet, b: &TagSet) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let shared = a.intersection(b).count();
    if shared == 0 {
        return None;
    }
    Some(shared as f64 / a.len().max(b.len()) as f64)
}

/// Computes qualifying neighbors of `task` and their weights.
pub fn qualifying_neighbors<'a>(task: &Task, siblings: &'a [Task]) -> BTreeMap<&'a TaskId, f64> {
    siblings
        .iter()
        .filter(|sibling| {
            sibling.workspace_id == task.workspace_id && sibling.id != task.id && sibling.is_active()
        })
        .filter_map(|sibling| {
            tag_overlap_weight(&task.tags, &sibling.tags).map(|weight| (&sibling.id, weight))
        })
        .collect()
}

/// Plans edge writes that bring `task`'s inferred edges in line with its tags.
///
/// `incident` holds every stored edge (live or tombstoned) touching `task`.
/// Written edges carry `updated_at = max(now, stored + 1)` so they win LWW
/// against the row they replace.
pub fn plan_links(task: &Task, siblings: &[Task], incident: &[Edge], now: i64) -> LinkPlan {
    let mut plan = LinkPlan::default();
    if !task.is_active() {
        return plan;
    }

    let neighbors = qualifying_neighbors(task, siblings);
    let mut by_neighbor: BTreeMap<&str, &Edge> = BTreeMap::new();
    for edge in incident
        .iter()
        .filter(|edge| edge.workspace_id == task.workspace_id)
    {
        if let Some(other) = edge.other_endpoint(&task.id) {
            by_neighbor.insert(other, edge);
        }
    }

    for (neighbor, weight) in &neighbors {
        match by_neighbor.get(neighbor.as_str()) {
            Some(existing) if existing.is_active() && existing.origin == EdgeOrigin::Manual => {}
            Some(existing)
                if existing.is_active()
                    && existing.origin == EdgeOrigin::Inferred
                    && existing.weight == *weight => {}
            Some(existing) => {
                let mut edge = (*existing).clone();
                edge.weight = *weight;
                edge.origin = EdgeOrigin::Inferred;
                edge.deleted = false;
                edge.updated_at = now.max(existing.updated_at + 1);
                plan.upserts.push(edge);
            }
            None => {
                plan.upserts.push(Edge::between(
                    task.workspace_id.clone(),
                    task.id.clone(),
                    (*neighbor).clone(),
                    *weight,
                    EdgeOrigin::Inferred,
                    now,
                ));
            }
        }
    }

    for (neighbor, existing) in by_neighbor {
        let still_linked = neighbors.keys().any(|id| id.as_str() == neighbor);
        if !still_linked && existing.is_active() && existing.origin == EdgeOrigin::Inferred {
            let mut edge = existing.clone();
            edge.deleted = true;
            edge.updated_at = now.max(existing.updated_at + 1);
            plan.retired.push(edge);
        }
    }

    plan
}
