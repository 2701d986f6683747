//! Two-component PCA projection of task embeddings.
//!
//! # Responsibility
//! - Fit the two directions of maximal variance for one workspace snapshot.
//! - Standardize each projected axis and scale by the spread constant.
//!
//! # Invariants
//! - Output always contains one finite coordinate per input id.
//! - Fewer than two usable embeddings yield the origin for every id.
//! - A zero-variance axis yields 0 on that axis, never NaN/Inf.
//! - Axis 0 carries at least as much variance as axis 1 before standardization.
//!
//! The two leading eigenvectors of the covariance operator are found by block
//! power iteration on `Xᵀ(X·V)`, which never materializes the D×D covariance
//! matrix, followed by a 2×2 Rayleigh–Ritz rotation that orders the axes.

use super::LayoutPoint;
use crate::model::task::{Position, TaskId};
use ndarray::{array, Array2, Axis};
use std::collections::BTreeMap;

const COMPONENTS: usize = 2;
const MAX_ITERATIONS: usize = 300;
const CONVERGENCE_TOLERANCE: f64 = 1e-10;
/// Variance below this fraction of the data magnitude counts as zero.
const RELATIVE_VARIANCE_FLOOR: f64 = 1e-9;
/// Basis columns whose power-step norm falls below this fraction of total variance collapse.
const RELATIVE_COLLAPSE_FLOOR: f64 = 1e-12;

/// Recomputes 2D positions for every input id.
///
/// Points without an embedding, or whose embedding length differs from the
/// most common length in the snapshot, are excluded from the fit and placed at
/// the origin.
pub fn recompute_positions(points: &[LayoutPoint<'_>], spread: f64) -> BTreeMap<TaskId, Position> {
    let mut positions: BTreeMap<TaskId, Position> = points
        .iter()
        .map(|point| (point.id.clone(), Position::ORIGIN))
        .collect();

    let Some(dimension) = dominant_dimension(points) else {
        return positions;
    };
    let rows: Vec<(&TaskId, &[f32])> = points
        .iter()
        .filter_map(|point| {
            point
                .embedding
                .filter(|embedding| embedding.len() == dimension)
                .map(|embedding| (point.id, embedding))
        })
        .collect();
    if rows.len() < COMPONENTS {
        return positions;
    }

    let data = Array2::from_shape_fn((rows.len(), dimension), |(row, col)| {
        f64::from(rows[row].1[col])
    });
    let coords = project_2d(&data, spread);
    for ((id, _), coord) in rows.iter().zip(coords.outer_iter()) {
        positions.insert((*id).clone(), Position::new(coord[0], coord[1]));
    }
    positions
}

/// Projects the rows of `data` (N×D) to standardized, scaled 2D coordinates (N×2).
pub fn project_2d(data: &Array2<f64>, spread: f64) -> Array2<f64> {
    let rows = data.nrows();
    let mut coords = Array2::<f64>::zeros((rows, COMPONENTS));
    if rows < COMPONENTS || data.ncols() == 0 {
        return coords;
    }
    let Some(mean) = data.mean_axis(Axis(0)) else {
        return coords;
    };

    let magnitude = data
        .iter()
        .fold(0.0_f64, |acc, value| acc.max(value.abs()))
        .max(1.0);
    let floor = RELATIVE_VARIANCE_FLOOR * magnitude;

    let centered = data - &mean;
    let total_variance: f64 = centered.iter().map(|value| value * value).sum();
    if !total_variance.is_finite() || total_variance <= floor * floor {
        return coords;
    }

    let axes = principal_axes(&centered, total_variance);
    coords = centered.dot(&axes);
    standardize(&mut coords, spread, floor);
    coords
}

fn principal_axes(centered: &Array2<f64>, total_variance: f64) -> Array2<f64> {
    let collapse = total_variance * RELATIVE_COLLAPSE_FLOOR;
    let mut basis = initial_basis(centered, collapse);

    for _ in 0..MAX_ITERATIONS {
        let scores = centered.dot(&basis);
        let mut next = centered.t().dot(&scores);
        orthonormalize(&mut next, collapse);

        let delta = (&next - &basis)
            .iter()
            .fold(0.0_f64, |acc, value| acc.max(value.abs()));
        basis = next;
        if delta < CONVERGENCE_TOLERANCE {
            break;
        }
    }

    order_axes(centered, basis)
}

/// Seeds the basis from the data itself: the longest row, then the row with the
/// largest residual against it. Both lie in the row space, so the iteration
/// cannot start orthogonal to the leading components.
fn initial_basis(centered: &Array2<f64>, collapse: f64) -> Array2<f64> {
    let dimension = centered.ncols();
    let mut basis = Array2::<f64>::zeros((dimension, COMPONENTS));

    let first = centered
        .outer_iter()
        .max_by(|a, b| a.dot(a).total_cmp(&b.dot(b)));
    if let Some(row) = first {
        basis.column_mut(0).assign(&row);
    }
    orthonormalize(&mut basis, collapse);

    let anchor = basis.column(0).to_owned();
    let second = centered
        .outer_iter()
        .map(|row| {
            let along = row.dot(&anchor);
            &row - &(&anchor * along)
        })
        .max_by(|a, b| a.dot(a).total_cmp(&b.dot(b)));
    if let Some(residual) = second {
        basis.column_mut(1).assign(&residual);
    }
    orthonormalize(&mut basis, collapse);
    basis
}

/// Modified Gram–Schmidt over columns; collapsed columns become zero.
fn orthonormalize(basis: &mut Array2<f64>, collapse: f64) {
    for col in 0..basis.ncols() {
        for prev in 0..col {
            let prev_column = basis.column(prev).to_owned();
            let along = basis.column(col).dot(&prev_column);
            basis
                .column_mut(col)
                .scaled_add(-along, &prev_column);
        }
        let norm = basis.column(col).dot(&basis.column(col)).sqrt();
        if !norm.is_finite() || norm <= collapse {
            basis.column_mut(col).fill(0.0);
        } else {
            basis.column_mut(col).mapv_inplace(|value| value / norm);
        }
    }
}

/// Rotates the converged 2D subspace onto the eigenvectors of its projected
/// scatter matrix, so column 0 carries the larger variance.
fn order_axes(centered: &Array2<f64>, basis: Array2<f64>) -> Array2<f64> {
    let scores = centered.dot(&basis);
    let scatter = scores.t().dot(&scores);
    let (a, b, c) = (scatter[[0, 0]], scatter[[0, 1]], scatter[[1, 1]]);
    let theta = 0.5 * (2.0 * b).atan2(a - c);
    let (sin, cos) = theta.sin_cos();
    let rotation = array![[cos, -sin], [sin, cos]];
    basis.dot(&rotation)
}

fn standardize(coords: &mut Array2<f64>, spread: f64, floor: f64) {
    for mut column in coords.columns_mut() {
        let count = column.len() as f64;
        let mean = column.sum() / count;
        let variance = column
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / count;
        let std_dev = variance.sqrt();
        if !std_dev.is_finite() || std_dev <= floor {
            column.fill(0.0);
        } else {
            column.mapv_inplace(|value| (value - mean) / std_dev * spread);
        }
    }
    coords.mapv_inplace(|value| if value.is_finite() { value } else { 0.0 });
}

/// Most common non-zero embedding length; ties resolve to the smaller length.
fn dominant_dimension(points: &[LayoutPoint<'_>]) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for embedding in points.iter().filter_map(|point| point.embedding) {
        if !embedding.is_empty() {
            *counts.entry(embedding.len()).or_default() += 1;
        }
    }
    let mut best: Option<(usize, usize)> = None;
    for (dimension, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((dimension, count));
        }
    }
    best.map(|(dimension, _)| dimension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::DEFAULT_LAYOUT_SPREAD;

    fn ids(count: usize) -> Vec<TaskId> {
        (0..count).map(|idx| format!("t{idx}")).collect()
    }

    fn layout(ids: &[TaskId], embeddings: &[Vec<f32>]) -> BTreeMap<TaskId, Position> {
        let points: Vec<LayoutPoint<'_>> = ids
            .iter()
            .zip(embeddings)
            .map(|(id, embedding)| LayoutPoint {
                id,
                embedding: Some(embedding.as_slice()),
            })
            .collect();
        recompute_positions(&points, DEFAULT_LAYOUT_SPREAD)
    }

    /// Embeds 2D points into 8 dimensions through two orthonormal directions plus an offset.
    fn lift(points: &[(f32, f32)]) -> Vec<Vec<f32>> {
        let inv = std::f32::consts::FRAC_1_SQRT_2;
        points
            .iter()
            .map(|(u, v)| {
                vec![
                    0.3 + u * inv,
                    -0.1 + u * inv,
                    0.7 + v * inv,
                    0.2 - v * inv,
                    0.5,
                    0.0,
                    -0.4,
                    1.0,
                ]
            })
            .collect()
    }

    #[test]
    fn fewer_than_two_points_map_to_origin() {
        assert!(recompute_positions(&[], DEFAULT_LAYOUT_SPREAD).is_empty());

        let ids = ids(1);
        let positions = layout(&ids, &[vec![1.0, 2.0, 3.0]]);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions["t0"], Position::ORIGIN);
    }

    #[test]
    fn identical_embeddings_yield_finite_zero_coordinates() {
        let ids = ids(4);
        let embeddings = vec![vec![0.1_f32, 0.2, 0.3]; 4];
        let positions = layout(&ids, &embeddings);
        assert_eq!(positions.len(), 4);
        for position in positions.values() {
            assert!(position.is_finite());
            assert_eq!(*position, Position::ORIGIN);
        }
    }

    #[test]
    fn collinear_embeddings_keep_second_axis_at_zero() {
        let ids = ids(3);
        let embeddings = vec![vec![0.0_f32, 0.0], vec![1.0, 1.0], vec![2.0, 2.0]];
        let positions = layout(&ids, &embeddings);
        for position in positions.values() {
            assert!(position.is_finite());
            assert!(position.y.abs() < 1e-6);
        }
        let spread = (positions["t0"].x - positions["t2"].x).abs();
        assert!(spread > 1.0);
    }

    #[test]
    fn output_is_standardized_and_scaled() {
        let ids = ids(5);
        let embeddings = lift(&[(0.0, 0.0), (3.0, 1.0), (-2.0, 0.5), (1.0, -2.0), (-1.0, 2.0)]);
        let positions = layout(&ids, &embeddings);
        for axis in 0..2 {
            let values: Vec<f64> = positions
                .values()
                .map(|p| if axis == 0 { p.x } else { p.y })
                .collect();
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
            assert!(mean.abs() < 1e-6);
            assert!((variance.sqrt() - DEFAULT_LAYOUT_SPREAD).abs() < 1e-6);
        }
    }

    #[test]
    fn isotropic_grid_preserves_relative_distances() {
        let mut grid = Vec::new();
        for u in -2..=2 {
            for v in -2..=2 {
                grid.push((u as f32, v as f32));
            }
        }
        let ids = ids(grid.len());
        let positions = layout(&ids, &lift(&grid));

        let reference = grid[0];
        let reference_out = positions["t0"];
        let far = grid.len() - 1;
        let scale = reference_out.distance(&positions[&ids[far]])
            / planar_distance(reference, grid[far]);
        assert!(scale > 0.0);

        for i in 0..grid.len() {
            for j in (i + 1)..grid.len() {
                let expected = planar_distance(grid[i], grid[j]) * scale;
                let actual = positions[&ids[i]].distance(&positions[&ids[j]]);
                assert!(
                    (expected - actual).abs() < 1e-4 * expected.max(1.0),
                    "pair ({i},{j}) expected {expected}, got {actual}"
                );
            }
        }
    }

    #[test]
    fn symmetric_cloud_preserves_distance_rank_order() {
        let base = [(1.0_f32, 0.2_f32), (2.5, 0.7), (0.4, 1.9)];
        let mut cloud = Vec::new();
        for (u, v) in base {
            cloud.extend([(u, v), (-v, u), (-u, -v), (v, -u)]);
        }
        let ids = ids(cloud.len());
        let positions = layout(&ids, &lift(&cloud));

        let mut pairs = Vec::new();
        for i in 0..cloud.len() {
            for j in (i + 1)..cloud.len() {
                let input = planar_distance(cloud[i], cloud[j]);
                let output = positions[&ids[i]].distance(&positions[&ids[j]]);
                pairs.push((input, output));
            }
        }
        for (in_a, out_a) in &pairs {
            for (in_b, out_b) in &pairs {
                if in_a + 1e-3 < *in_b {
                    assert!(out_a < out_b, "rank inverted: {in_a}<{in_b} but {out_a}>={out_b}");
                }
            }
        }
    }

    #[test]
    fn deferred_and_mismatched_embeddings_are_excluded_from_fit() {
        let ids = ids(5);
        let good = lift(&[(0.0, 0.0), (1.0, 2.0), (-2.0, 1.0)]);
        let odd = vec![1.0_f32, 2.0];
        let points = vec![
            LayoutPoint { id: &ids[0], embedding: Some(good[0].as_slice()) },
            LayoutPoint { id: &ids[1], embedding: Some(good[1].as_slice()) },
            LayoutPoint { id: &ids[2], embedding: Some(good[2].as_slice()) },
            LayoutPoint { id: &ids[3], embedding: None },
            LayoutPoint { id: &ids[4], embedding: Some(odd.as_slice()) },
        ];
        let positions = recompute_positions(&points, DEFAULT_LAYOUT_SPREAD);
        assert_eq!(positions.len(), 5);
        assert_eq!(positions["t3"], Position::ORIGIN);
        assert_eq!(positions["t4"], Position::ORIGIN);
        assert_ne!(positions["t1"], Position::ORIGIN);
        assert!(positions.values().all(Position::is_finite));
    }

    #[test]
    fn high_dimensional_input_with_few_rows_stays_finite() {
        let ids = ids(3);
        let embeddings: Vec<Vec<f32>> = (0..3)
            .map(|row| {
                (0..768)
                    .map(|col| (((row * 31 + col * 7) % 17) as f32 - 8.0) / 8.0)
                    .collect()
            })
            .collect();
        let positions = layout(&ids, &embeddings);
        assert_eq!(positions.len(), 3);
        assert!(positions.values().all(Position::is_finite));
    }

    fn planar_distance(a: (f32, f32), b: (f32, f32)) -> f64 {
        let dx = f64::from(a.0 - b.0);
        let dy = f64::from(a.1 - b.1);
        (dx * dx + dy * dy).sqrt()
    }

    /// Spearman correlation with ordinal ranks.
    fn spearman(pairs: &[(f64, f64)]) -> f64 {
        fn ranks(values: Vec<f64>) -> Vec<f64> {
            let mut order: Vec<usize> = (0..values.len()).collect();
            order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
            let mut ranks = vec![0.0; values.len()];
            for (rank, idx) in order.into_iter().enumerate() {
                ranks[idx] = rank as f64;
            }
            ranks
        }
        let xs = ranks(pairs.iter().map(|pair| pair.0).collect());
        let ys = ranks(pairs.iter().map(|pair| pair.1).collect());
        let mean = (xs.len() as f64 - 1.0) / 2.0;
        let cov: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mean) * (y - mean)).sum();
        let var: f64 = xs.iter().map(|x| (x - mean).powi(2)).sum();
        cov / var
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Base points of a 4-fold rotationally symmetric planar cloud, each
        /// with small off-plane noise.
        fn arb_planar_cloud() -> impl Strategy<Value = Vec<((f32, f32), [f32; 4])>> {
            proptest::collection::vec(
                (
                    (-5.0_f32..5.0, -5.0_f32..5.0),
                    proptest::array::uniform4(-0.01_f32..0.01),
                ),
                2..7,
            )
        }

        fn lift_noisy(cloud: &[((f32, f32), [f32; 4])]) -> (Vec<(f32, f32)>, Vec<Vec<f32>>) {
            let mut planar = Vec::new();
            let mut noise = Vec::new();
            for ((u, v), jitter) in cloud {
                for (idx, point) in [(*u, *v), (-*v, *u), (-*u, -*v), (*v, -*u)]
                    .into_iter()
                    .enumerate()
                {
                    planar.push(point);
                    let mut rotated = *jitter;
                    rotated.rotate_left(idx);
                    noise.push(rotated);
                }
            }
            let embeddings = lift(&planar)
                .into_iter()
                .zip(noise)
                .map(|(mut embedding, jitter)| {
                    for (slot, value) in embedding[4..].iter_mut().zip(jitter) {
                        *slot += value;
                    }
                    embedding
                })
                .collect();
            (planar, embeddings)
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn planar_clouds_keep_distance_rank_order(cloud in arb_planar_cloud()) {
                prop_assume!(cloud.iter().all(|((u, v), _)| u.hypot(*v) >= 0.5));
                let (planar, embeddings) = lift_noisy(&cloud);
                let ids = ids(planar.len());
                let positions = layout(&ids, &embeddings);

                prop_assert_eq!(positions.len(), planar.len());
                prop_assert!(positions.values().all(Position::is_finite));

                let mut pairs = Vec::new();
                for i in 0..planar.len() {
                    for j in (i + 1)..planar.len() {
                        pairs.push((
                            planar_distance(planar[i], planar[j]),
                            positions[&ids[i]].distance(&positions[&ids[j]]),
                        ));
                    }
                }
                let rho = spearman(&pairs);
                prop_assert!(rho > 0.95, "rank correlation {} too low", rho);
            }

            #[test]
            fn arbitrary_clouds_yield_one_finite_position_per_id(
                dimension in 1_usize..12,
                rows in proptest::collection::vec(
                    proptest::collection::vec(-100.0_f32..100.0, 12),
                    0..20,
                ),
            ) {
                let embeddings: Vec<Vec<f32>> =
                    rows.into_iter().map(|row| row[..dimension].to_vec()).collect();
                let ids = ids(embeddings.len());
                let positions = layout(&ids, &embeddings);
                prop_assert_eq!(positions.len(), embeddings.len());
                prop_assert!(positions.values().all(Position::is_finite));
            }

            #[test]
            fn repeated_vectors_collapse_to_origin(
                vector in proptest::collection::vec(-50.0_f32..50.0, 1..16),
                count in 0_usize..8,
            ) {
                let ids = ids(count);
                let positions = layout(&ids, &vec![vector; count]);
                prop_assert_eq!(positions.len(), count);
                prop_assert!(positions.values().all(|p| *p == Position::ORIGIN));
            }
        }
    }
}
