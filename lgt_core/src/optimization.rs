//! Two-phase cross-entropy optimisation: a global rigid/affine warp of the
//! whole constellation, then per-patch local refinement under a geometric
//! constraint graph.
//!
//! Grounded on `crossentropy.cpp`'s global-affine and local-refine loops:
//! draw samples from a Gaussian proposal, score by a multiplicative
//! exp-cost, keep the elite set, refit the Gaussian, repeat until the
//! covariance determinant collapses or the iteration/sample budget runs out.

use nalgebra::{Matrix2, Matrix3, Vector3};

use crate::config::TrackerConfig;
use crate::geometry::{NeighborGraph, Point2f, Triangulator};
use crate::image::Image;
use crate::observer::OptimizationStatus;
use crate::patchset::Patches;
use crate::prng::Prng;

/// Applies a `[tx, ty, theta, sx, sy]` (or `[tx, ty]` when not affine)
/// parameter vector to `positions`, pivoting scale/rotation around `center`.
pub fn apply_transform(positions: &[Point2f], center: Point2f, params: &[f32]) -> Vec<Point2f> {
    let (tx, ty, theta, sx, sy) = match params.len() {
        2 => (params[0], params[1], 0.0, 1.0, 1.0),
        5 => (params[0], params[1], params[2], params[3], params[4]),
        n => panic!("unsupported transform parameter count: {n}"),
    };
    let (cos_t, sin_t) = (theta.cos(), theta.sin());
    positions
        .iter()
        .map(|p| {
            let d = p - center;
            let sx_d = d.x * sx;
            let sy_d = d.y * sy;
            let rx = cos_t * sx_d - sin_t * sy_d;
            let ry = sin_t * sx_d + cos_t * sy_d;
            Point2f::new(center.x + rx + tx, center.y + ry + ty)
        })
        .collect()
}

fn weighted_stats(samples: &[Vec<f32>], costs: &[f32], dim: usize) -> (Vec<f32>, Vec<f32>) {
    let total: f32 = costs.iter().sum();
    if total <= 0.0 {
        return (vec![0.0; dim], vec![1.0; dim]);
    }
    let mut mean = vec![0.0f32; dim];
    for (s, &c) in samples.iter().zip(costs) {
        for k in 0..dim {
            mean[k] += s[k] * c;
        }
    }
    for m in &mut mean {
        *m /= total;
    }
    let mut var = vec![0.0f32; dim];
    for (s, &c) in samples.iter().zip(costs) {
        for k in 0..dim {
            let d = s[k] - mean[k];
            var[k] += d * d * c;
        }
    }
    for v in &mut var {
        *v = (*v / total).max(1e-8);
    }
    (mean, var)
}

fn det_diag(diag: &[f32]) -> f32 {
    diag.iter().product()
}

/// Global 2-D translation or 5-D affine alignment of the whole constellation.
pub fn global_optimize(
    patches: &Patches,
    indices: &[usize],
    image: &Image,
    centroid: Point2f,
    affine: bool,
    region_side: f32,
    cfg: &TrackerConfig,
    prng: &mut Prng,
) -> (Vec<f32>, OptimizationStatus) {
    let dim = if affine { 5 } else { 2 };
    let base_positions = patches.positions(indices);
    let weights = patches.weights(indices);

    let mut mu = if affine {
        vec![0.0, 0.0, 0.0, 1.0, 1.0]
    } else {
        vec![0.0, 0.0]
    };
    let mut sigma = if affine {
        vec![
            cfg.optimization_global_move,
            cfg.optimization_global_move,
            cfg.optimization_global_rotate,
            cfg.optimization_global_scale,
            cfg.optimization_global_scale,
        ]
    } else {
        vec![cfg.optimization_global_move, cfg.optimization_global_move]
    };

    let min_side = cfg.size.min_width.unwrap_or(0.0).max(cfg.size.min_height.unwrap_or(0.0));
    let max_side = cfg
        .size
        .max_width
        .unwrap_or(f32::MAX)
        .min(cfg.size.max_height.unwrap_or(f32::MAX));
    let clamp_scale = affine && cfg.optimization_global_clamp_scale && region_side > 0.0;

    let mut iterations_run = 0;
    let mut converged = false;

    for _iter in 0..cfg.optimization_global_iterations {
        iterations_run += 1;
        let mut sample_count = cfg.optimization_global_min_samples;
        let mut prev_elite_cost = f32::MIN;
        let (samples, costs) = loop {
            let mut samples = Vec::with_capacity(sample_count);
            for _ in 0..sample_count {
                let mut s = vec![0.0f32; dim];
                for k in 0..dim {
                    s[k] = mu[k] + sigma[k].sqrt() * normal_sample(prng);
                }
                if clamp_scale {
                    s[3] = s[3].clamp(min_side / region_side, max_side / region_side);
                    s[4] = s[4].clamp(min_side / region_side, max_side / region_side);
                }
                samples.push(s);
            }
            let mut costs: Vec<f32> = samples
                .iter()
                .map(|s| {
                    let transformed = apply_transform(&base_positions, centroid, s);
                    transformed
                        .iter()
                        .zip(indices)
                        .zip(&weights)
                        .map(|((p, &idx), &w)| {
                            let resp = patches.get(idx).map(|patch| patch.response(image, *p)).unwrap_or(0.0);
                            w * (-resp).exp()
                        })
                        .sum()
                })
                .collect();

            let mut order: Vec<usize> = (0..samples.len()).collect();
            order.sort_by(|&a, &b| costs[b].partial_cmp(&costs[a]).unwrap_or(std::cmp::Ordering::Equal));
            let elite_n = cfg.optimization_global_elite_samples.min(order.len()).max(1);
            let elite_cost = costs[order[elite_n - 1]];

            if elite_cost > prev_elite_cost || sample_count >= cfg.optimization_global_max_samples {
                let sorted_samples: Vec<Vec<f32>> = order.iter().map(|&i| samples[i].clone()).collect();
                let sorted_costs: Vec<f32> = order.iter().map(|&i| costs[i]).collect();
                samples.clear();
                costs.clear();
                break (sorted_samples, sorted_costs);
            }
            prev_elite_cost = elite_cost;
            sample_count = (sample_count + cfg.optimization_global_add_samples).min(cfg.optimization_global_max_samples);
        };

        let elite_n = cfg.optimization_global_elite_samples.min(samples.len()).max(1);
        let (new_mu, new_sigma) = weighted_stats(&samples[..elite_n], &costs[..elite_n], dim);
        mu = new_mu;
        sigma = new_sigma;

        if det_diag(&sigma) < cfg.optimization_global_terminate {
            converged = true;
            break;
        }
    }

    (
        mu,
        OptimizationStatus {
            iterations_run,
            final_determinant: det_diag(&sigma),
            converged,
        },
    )
}

fn normal_sample(prng: &mut Prng) -> f32 {
    // Box-Muller via two uniforms, so this module doesn't need direct
    // access to `rand_distr` - `Prng` already owns the seeded source.
    let u1 = prng.uniform_f32(1e-7, 1.0);
    let u2 = prng.uniform_f32(0.0, 1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

/// Weighted affine fit (6 DOF: `x' = a*x + b*y + tx`, `y' = c*x + d*y + ty`)
/// from `src` to `dst`, least squares with per-point `weights`. Falls back to
/// identity if fewer than 3 points or the normal matrix is singular.
fn weighted_affine_fit(src: &[Point2f], dst: &[Point2f], weights: &[f32]) -> Matrix3<f32> {
    if src.len() < 3 {
        return Matrix3::identity();
    }
    let mut ata = Matrix3::zeros();
    let mut atb_x = Vector3::zeros();
    let mut atb_y = Vector3::zeros();
    for ((s, d), &w) in src.iter().zip(dst).zip(weights) {
        let row = Vector3::new(s.x, s.y, 1.0);
        ata += row * row.transpose() * w;
        atb_x += row * d.x * w;
        atb_y += row * d.y * w;
    }
    let Some(inv) = ata.try_inverse() else {
        return Matrix3::identity();
    };
    let px = inv * atb_x;
    let py = inv * atb_y;
    Matrix3::new(px[0], px[1], px[2], py[0], py[1], py[2], 0.0, 0.0, 1.0)
}

fn apply_affine_matrix(m: &Matrix3<f32>, p: Point2f) -> Point2f {
    Point2f::new(m[(0, 0)] * p.x + m[(0, 1)] * p.y + m[(0, 2)], m[(1, 0)] * p.x + m[(1, 1)] * p.y + m[(1, 2)])
}

/// Per-patch refinement against a Delaunay-neighbour geometric prior.
pub fn local_optimize(
    patches: &mut Patches,
    indices: &[usize],
    image: &Image,
    triangulator: &dyn Triangulator,
    cfg: &TrackerConfig,
    prng: &mut Prng,
) -> Vec<OptimizationStatus> {
    if indices.is_empty() {
        return Vec::new();
    }
    let current_positions = patches.positions(indices);
    let previous_positions: Vec<Point2f> = indices
        .iter()
        .map(|&i| patches.get(i).and_then(|p| p.position_at(1)).unwrap_or(p_or_zero(patches, i)))
        .collect();

    let edges = triangulator.triangulate(&current_positions);
    let graph = NeighborGraph::from_triangulation(&current_positions, &edges);

    let mut mu: Vec<Point2f> = current_positions.clone();
    let mut sigma: Vec<Matrix2<f32>> = vec![Matrix2::identity() * cfg.optimization_local_move; indices.len()];
    let mut done = vec![false; indices.len()];
    let mut statuses = vec![
        OptimizationStatus {
            iterations_run: 0,
            final_determinant: f32::MAX,
            converged: false,
        };
        indices.len()
    ];

    for _iter in 0..cfg.optimization_local_iterations {
        let working_positions = mu.clone();
        for (local_i, &global_i) in indices.iter().enumerate() {
            if done[local_i] {
                continue;
            }
            statuses[local_i].iterations_run += 1;

            let neighbours = &graph.edges[local_i];
            let suggest = if neighbours.len() >= 3 {
                let weight_i = patches.get(global_i).map(|p| p.weight()).unwrap_or(1.0);
                let src: Vec<Point2f> = neighbours.iter().map(|&n| previous_positions[n]).collect();
                let dst: Vec<Point2f> = neighbours.iter().map(|&n| working_positions[n]).collect();
                let w: Vec<f32> = neighbours
                    .iter()
                    .map(|&n| patches.get(indices[n]).map(|p| p.weight()).unwrap_or(1.0) * weight_i)
                    .collect();
                let transform = weighted_affine_fit(&src, &dst, &w);
                apply_affine_matrix(&transform, previous_positions[local_i])
            } else {
                working_positions[local_i]
            };

            let mut samples = Vec::with_capacity(cfg.optimization_local_samples);
            let mut costs = Vec::with_capacity(cfg.optimization_local_samples);
            for _ in 0..cfg.optimization_local_samples {
                let candidate = prng.gaussian_2d(mu[local_i], sigma[local_i]);
                let resp = patches
                    .get(global_i)
                    .map(|p| p.response(image, candidate))
                    .unwrap_or(0.0);
                let geom_dist = (candidate - suggest).norm();
                let cost = (-resp * cfg.optimization_visual).exp() * (-geom_dist * cfg.optimization_geometry).exp();
                samples.push(candidate);
                costs.push(cost);
            }

            let mut order: Vec<usize> = (0..samples.len()).collect();
            order.sort_by(|&a, &b| costs[b].partial_cmp(&costs[a]).unwrap_or(std::cmp::Ordering::Equal));
            let elite_n = cfg.optimization_local_elite_samples.min(order.len()).max(1);

            let total: f32 = order[..elite_n].iter().map(|&i| costs[i]).sum();
            let new_mean = if total > 0.0 {
                let mut acc = nalgebra::Vector2::zeros();
                for &i in &order[..elite_n] {
                    acc += samples[i].coords * costs[i];
                }
                Point2f::from(acc / total)
            } else {
                mu[local_i]
            };
            let mut new_cov = Matrix2::zeros();
            if total > 0.0 {
                for &i in &order[..elite_n] {
                    let d = samples[i].coords - new_mean.coords;
                    new_cov += Matrix2::new(d.x * d.x, d.x * d.y, d.x * d.y, d.y * d.y) * costs[i];
                }
                new_cov /= total;
            }
            if !new_cov.iter().all(|v| v.is_finite()) {
                new_cov = Matrix2::identity() * cfg.optimization_local_move;
            }

            mu[local_i] = new_mean;
            sigma[local_i] = new_cov;
            let det = new_cov.determinant();
            statuses[local_i].final_determinant = det;
            if det < cfg.optimization_global_terminate {
                done[local_i] = true;
                statuses[local_i].converged = true;
            }
        }
        if done.iter().all(|&d| d) {
            break;
        }
    }

    for (local_i, &global_i) in indices.iter().enumerate() {
        if let Some(patch) = patches.get_mut(global_i) {
            patch.set_position(mu[local_i]);
        }
    }

    statuses
}

fn p_or_zero(patches: &Patches, i: usize) -> Point2f {
    patches.get(i).map(|p| p.position()).unwrap_or(Point2f::origin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_transform_leaves_positions_unchanged() {
        let positions = vec![Point2f::new(10.0, 10.0), Point2f::new(20.0, 5.0)];
        let out = apply_transform(&positions, Point2f::new(15.0, 7.5), &[0.0, 0.0]);
        for (a, b) in positions.iter().zip(out.iter()) {
            assert!((a.x - b.x).abs() < 1e-5);
            assert!((a.y - b.y).abs() < 1e-5);
        }
    }

    #[test]
    fn translation_shifts_every_point() {
        let positions = vec![Point2f::new(0.0, 0.0), Point2f::new(1.0, 1.0)];
        let out = apply_transform(&positions, Point2f::new(0.0, 0.0), &[3.0, -2.0]);
        assert_eq!(out[0], Point2f::new(3.0, -2.0));
        assert_eq!(out[1], Point2f::new(4.0, -1.0));
    }

    #[test]
    fn affine_fit_recovers_pure_translation() {
        let src = vec![Point2f::new(0.0, 0.0), Point2f::new(1.0, 0.0), Point2f::new(0.0, 1.0)];
        let dst: Vec<Point2f> = src.iter().map(|p| Point2f::new(p.x + 2.0, p.y + 3.0)).collect();
        let m = weighted_affine_fit(&src, &dst, &[1.0, 1.0, 1.0]);
        let out = apply_affine_matrix(&m, Point2f::new(5.0, 5.0));
        assert!((out.x - 7.0).abs() < 1e-3);
        assert!((out.y - 8.0).abs() < 1e-3);
    }
}
