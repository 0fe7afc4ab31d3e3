use std::collections::HashMap;

use evcal_types::{GridFinderConfig, GridKind, GridPattern, Vec2};
use nalgebra::geometry::{Isometry2, Point2};
use nalgebra::{SMatrix, SVector};
use parry2d_f64::query::PointQuery;
use parry2d_f64::shape::ConvexPolygon;

use crate::errors::Singular;
use crate::geom::solve_normal_equations;

/// Recovers a `rows x cols` [`GridPattern`] from an unordered set of detected
/// circle centers (C5), mirroring OpenCV's `CirclesGridFinder` in spirit:
/// density-filter the input, discover the pattern's two lattice basis
/// vectors, assign integer lattice coordinates, pick the best fully- (or
/// near-fully-) covered `rows x cols` window, and rectify it through a fitted
/// homography.
#[derive(Debug, Clone)]
pub struct GridFinder {
    cfg: GridFinderConfig,
    rows: usize,
    cols: usize,
}

impl GridFinder {
    pub fn new(cfg: GridFinderConfig, rows: usize, cols: usize) -> crate::errors::Result<Self> {
        cfg.validate().map_err(evcal_types::Error::from)?;
        if rows == 0 || cols == 0 {
            return Err(evcal_types::Error::ConfigInvalid(format!(
                "grid dimensions must be positive, got {rows}x{cols}"
            ))
            .into());
        }
        Ok(Self { cfg, rows, cols })
    }

    /// Attempt to find the configured `rows x cols` pattern among
    /// `points`. Returns `None` if too few points survive density
    /// filtering, no consistent lattice is found, the best window's
    /// confidence falls below `min_graph_confidence`, or the rectified
    /// result fails its convex-hull sanity check.
    pub fn find(&self, points: &[Vec2]) -> Option<GridPattern> {
        let dense = density_filter(points, self.cfg.density_nbh, self.cfg.min_density);
        if dense.len() < self.rows * self.cols {
            return None;
        }

        let (basis_a, basis_b) = discover_basis(&dense, self.cfg.kmeans_attempts)?;
        let lattice = assign_lattice(&dense, basis_a, basis_b, self.cfg.min_rng_edge_switch_dist);

        let (window, confidence) = match self.cfg.grid_type {
            GridKind::Symmetric => best_window(&lattice, self.rows, self.cols, &self.cfg)?,
            GridKind::Asymmetric => asymmetric_best_window(&lattice, self.rows, self.cols, &self.cfg)?,
        };
        if confidence < self.cfg.min_graph_confidence {
            return None;
        }

        let homography = fit_homography(&window, self.cfg.square_size)?;
        let centers = rectify_window(
            &window,
            &homography,
            &dense,
            self.rows,
            self.cols,
            self.cfg.square_size,
            self.cfg.max_rectified_distance,
            self.cfg.min_distance_to_add_keypoint,
        )?;

        if !passes_convex_hull(&dense, &centers, self.cfg.convex_hull_factor) {
            return None;
        }

        Some(GridPattern::new(self.rows, self.cols, self.cfg.grid_type, centers))
    }
}

/// Drop points with fewer than `min_density` neighbors within `density_nbh`,
/// removing isolated noise detections before basis discovery.
fn density_filter(points: &[Vec2], density_nbh: f64, min_density: usize) -> Vec<Vec2> {
    points
        .iter()
        .filter(|&&p| {
            points
                .iter()
                .filter(|&&q| q != p && (q - p).norm() <= density_nbh)
                .count()
                >= min_density
        })
        .copied()
        .collect()
}

/// Discover the two dominant lattice basis vectors by clustering the
/// nearest-neighbor displacement vectors between points into 4 groups
/// (expected to be `+b1, -b1, +b2, -b2`) and pairing each cluster with its
/// near-opposite.
///
/// Centroid initialization is deterministic (farthest-point seeding) rather
/// than randomized, since `evcal-core` carries no runtime dependency on a
/// random number generator; `kmeans_attempts` is used as the number of Lloyd
/// refinement passes rather than independent random restarts.
fn discover_basis(points: &[Vec2], kmeans_attempts: usize) -> Option<(Vec2, Vec2)> {
    let mut deltas = Vec::new();
    for &p in points {
        let mut by_dist: Vec<Vec2> = points.iter().map(|&q| q - p).filter(|d| d.norm() > 1.0e-6).collect();
        by_dist.sort_by(|a, b| a.norm().total_cmp(&b.norm()));
        deltas.extend(by_dist.into_iter().take(4));
    }
    if deltas.len() < 4 {
        return None;
    }

    let mut centroids = farthest_point_seed(&deltas, 4);
    for _ in 0..kmeans_attempts.max(1) {
        let mut sums = vec![Vec2::zeros(); 4];
        let mut counts = vec![0usize; 4];
        for &d in &deltas {
            let idx = nearest_index(&centroids, d);
            sums[idx] += d;
            counts[idx] += 1;
        }
        for i in 0..4 {
            if counts[i] > 0 {
                centroids[i] = sums[i] / counts[i] as f64;
            }
        }
    }

    // Pair each centroid with the other whose direction is closest to
    // opposite; the two surviving pairs are the two basis directions.
    let mut best_pair = (0usize, 1usize);
    let mut best_cos = f64::INFINITY;
    for i in 0..4 {
        for j in (i + 1)..4 {
            if centroids[i].norm() < 1.0e-9 || centroids[j].norm() < 1.0e-9 {
                continue;
            }
            let cos = centroids[i].normalize().dot(&centroids[j].normalize());
            if cos < best_cos {
                best_cos = cos;
                best_pair = (i, j);
            }
        }
    }
    let remaining: Vec<usize> = (0..4).filter(|k| *k != best_pair.0 && *k != best_pair.1).collect();
    if remaining.len() != 2 {
        return None;
    }
    let basis_a = (centroids[best_pair.0] - centroids[best_pair.1]) / 2.0;
    let basis_b = (centroids[remaining[0]] - centroids[remaining[1]]) / 2.0;
    if basis_a.norm() < 1.0e-6 || basis_b.norm() < 1.0e-6 {
        return None;
    }
    Some((basis_a, basis_b))
}

fn farthest_point_seed(points: &[Vec2], k: usize) -> Vec<Vec2> {
    let mut chosen = vec![points[0]];
    while chosen.len() < k {
        let next = points
            .iter()
            .max_by(|a, b| {
                let da = chosen.iter().map(|c| (*a - c).norm()).fold(f64::INFINITY, f64::min);
                let db = chosen.iter().map(|c| (*b - c).norm()).fold(f64::INFINITY, f64::min);
                da.total_cmp(&db)
            })
            .copied()
            .unwrap();
        chosen.push(next);
    }
    chosen
}

fn nearest_index(centroids: &[Vec2], d: Vec2) -> usize {
    (0..centroids.len())
        .min_by(|&a, &b| (d - centroids[a]).norm().total_cmp(&(d - centroids[b]).norm()))
        .unwrap()
}

/// Assign each surviving point an integer lattice coordinate `(p, q)` such
/// that `point ~= origin + p*basis_a + q*basis_b`, by solving the exactly
/// determined 2x2 system for each point relative to an arbitrary origin and
/// rounding to the nearest integer. `tolerance` bounds how far a point may
/// sit from its rounded lattice position before it is dropped as
/// inconsistent with the discovered basis.
fn assign_lattice(points: &[Vec2], basis_a: Vec2, basis_b: Vec2, tolerance: f64) -> HashMap<(i64, i64), Vec2> {
    let origin = points[0];
    let det = basis_a.x * basis_b.y - basis_a.y * basis_b.x;
    let mut out = HashMap::new();
    if det.abs() < 1.0e-9 {
        return out;
    }
    for &point in points {
        let d = point - origin;
        let p = (d.x * basis_b.y - d.y * basis_b.x) / det;
        let q = (basis_a.x * d.y - basis_a.y * d.x) / det;
        let (pr, qr) = (p.round(), q.round());
        let predicted = origin + basis_a * pr + basis_b * qr;
        if (predicted - point).norm() <= tolerance {
            out.entry((pr as i64, qr as i64)).or_insert(point);
        }
    }
    out
}

/// Slide a `rows x cols` window over the assigned lattice coordinates,
/// scoring each placement per `cfg`'s vertex/edge gain and penalty terms, and
/// return the highest-scoring window together with its confidence.
fn best_window(
    lattice: &HashMap<(i64, i64), Vec2>,
    rows: usize,
    cols: usize,
    cfg: &GridFinderConfig,
) -> Option<(HashMap<(usize, usize), Vec2>, f64)> {
    if lattice.is_empty() {
        return None;
    }
    let (min_p, max_p) = lattice.keys().map(|&(p, _)| p).fold((i64::MAX, i64::MIN), |(lo, hi), p| {
        (lo.min(p), hi.max(p))
    });
    let (min_q, max_q) = lattice.keys().map(|&(_, q)| q).fold((i64::MAX, i64::MIN), |(lo, hi), q| {
        (lo.min(q), hi.max(q))
    });

    let mut best: Option<(HashMap<(usize, usize), Vec2>, f64)> = None;
    for p0 in min_p..=(max_p - rows as i64 + 1).max(min_p) {
        for q0 in min_q..=(max_q - cols as i64 + 1).max(min_q) {
            if p0 + rows as i64 - 1 > max_p || q0 + cols as i64 - 1 > max_q {
                continue;
            }
            let mut window = HashMap::new();
            let mut score = 0.0;
            for r in 0..rows {
                for c in 0..cols {
                    let key = (p0 + r as i64, q0 + c as i64);
                    if let Some(&pt) = lattice.get(&key) {
                        window.insert((r, c), pt);
                        score += cfg.vertex_gain + cfg.existing_vertex_gain;
                    } else {
                        score += cfg.vertex_penalty;
                    }
                }
            }
            for r in 0..rows {
                for c in 0..cols {
                    let here = window.contains_key(&(r, c));
                    if c + 1 < cols {
                        let right = window.contains_key(&(r, c + 1));
                        score += if here && right { cfg.edge_gain } else { cfg.edge_penalty };
                    }
                    if r + 1 < rows {
                        let down = window.contains_key(&(r + 1, c));
                        score += if here && down { cfg.edge_gain } else { cfg.edge_penalty };
                    }
                }
            }
            let is_better = match &best {
                Some((_, best_score)) => score > *best_score,
                None => true,
            };
            if is_better {
                best = Some((window, score));
            }
        }
    }
    best
}

/// As [`best_window`], but for an OpenCV-convention asymmetric grid: odd
/// rows are offset by half the column spacing from even rows, so the two
/// physical row/column indices do not line up with `discover_basis`'s raw
/// `(p, q)` lattice coordinates the way they do for a symmetric grid.
///
/// The asymmetric layout is nonetheless a single 2D Bravais lattice under
/// the *diagonal* basis `W = (sx/2, sy)`, `W' = (sx/2, -sy)` (since the
/// naive row/column steps are `V_col = W + W'` and `V_row2 = W - W'`), and
/// physical `(row, col)` recovers from the lattice coordinates `(P, Q)` of
/// that diagonal basis by `row = P - Q`, `col = (P + Q).div_euclid(2)`.
/// `discover_basis` has no way to know which of its two discovered vectors
/// is `W` versus `W'`, nor their sign, so this tries all 8 sign/swap
/// variants mapping its `(p, q)` to `(P, Q)` and keeps whichever re-keyed
/// lattice lets [`best_window`] find the highest-confidence placement.
fn asymmetric_best_window(
    lattice: &HashMap<(i64, i64), Vec2>,
    rows: usize,
    cols: usize,
    cfg: &GridFinderConfig,
) -> Option<(HashMap<(usize, usize), Vec2>, f64)> {
    const VARIANTS: [fn(i64, i64) -> (i64, i64); 8] = [
        |p, q| (p, q),
        |p, q| (p, -q),
        |p, q| (-p, q),
        |p, q| (-p, -q),
        |p, q| (q, p),
        |p, q| (q, -p),
        |p, q| (-q, p),
        |p, q| (-q, -p),
    ];

    let mut best: Option<(HashMap<(usize, usize), Vec2>, f64)> = None;
    for variant in VARIANTS {
        let mut remapped: HashMap<(i64, i64), Vec2> = HashMap::new();
        for (&(p, q), &pt) in lattice {
            let (big_p, big_q) = variant(p, q);
            let row = big_p - big_q;
            let col = (big_p + big_q).div_euclid(2);
            remapped.entry((row, col)).or_insert(pt);
        }
        let Some((window, score)) = best_window(&remapped, rows, cols, cfg) else {
            continue;
        };
        let is_better = match &best {
            Some((_, best_score)) => score > *best_score,
            None => true,
        };
        if is_better {
            best = Some((window, score));
        }
    }
    best
}

/// Fit a homography mapping ideal lattice coordinates `(c, r) * square_size`
/// to the matched pixel positions in `window`, via direct linear transform
/// normal equations (8 unknowns `h0..h7`, with `h8` fixed to 1).
fn fit_homography(window: &HashMap<(usize, usize), Vec2>, square_size: f64) -> Option<[f64; 8]> {
    if window.len() < 4 {
        return None;
    }
    let mut ata = SMatrix::<f64, 8, 8>::zeros();
    let mut atb = SVector::<f64, 8>::zeros();
    for (&(r, c), &pt) in window {
        let (x_ideal, y_ideal) = (c as f64 * square_size, r as f64 * square_size);
        let row_x = SVector::<f64, 8>::from_row_slice(&[
            x_ideal,
            y_ideal,
            1.0,
            0.0,
            0.0,
            0.0,
            -pt.x * x_ideal,
            -pt.x * y_ideal,
        ]);
        let row_y = SVector::<f64, 8>::from_row_slice(&[
            0.0,
            0.0,
            0.0,
            x_ideal,
            y_ideal,
            1.0,
            -pt.y * x_ideal,
            -pt.y * y_ideal,
        ]);
        ata += row_x * row_x.transpose() + row_y * row_y.transpose();
        atb += row_x * pt.x + row_y * pt.y;
    }
    let solved: Result<_, Singular> = solve_normal_equations(ata, atb);
    let solved = solved.ok()?;
    let mut h = [0.0; 8];
    h.copy_from_slice(solved.as_slice());
    Some(h)
}

fn apply_homography(h: &[f64; 8], x_ideal: f64, y_ideal: f64) -> Vec2 {
    let denom = h[6] * x_ideal + h[7] * y_ideal + 1.0;
    Vec2::new(
        (h[0] * x_ideal + h[1] * y_ideal + h[2]) / denom,
        (h[3] * x_ideal + h[4] * y_ideal + h[5]) / denom,
    )
}

/// Produce the final `rows * cols` center list in row-major order.
///
/// For a cell the lattice assignment already matched, use its observed
/// position (rejecting the whole grid if it strays more than
/// `max_rectified_distance` from the homography's prediction). For a hole,
/// first try "growing" it: search `all_points` for an unclaimed detection
/// within `min_distance_to_add_keypoint` of the predicted position, per
/// OpenCV's `CirclesGridFinderParameters::minDistanceToAddKeypoint`; only
/// if none exists does the cell fall back to the homography's own
/// prediction.
fn rectify_window(
    window: &HashMap<(usize, usize), Vec2>,
    h: &[f64; 8],
    all_points: &[Vec2],
    rows: usize,
    cols: usize,
    square_size: f64,
    max_rectified_distance: f64,
    min_distance_to_add_keypoint: f64,
) -> Option<Vec<Vec2>> {
    let mut claimed: Vec<Vec2> = window.values().copied().collect();
    let mut centers = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            let predicted = apply_homography(h, c as f64 * square_size, r as f64 * square_size);
            let center = match window.get(&(r, c)) {
                Some(&observed) => {
                    if (observed - predicted).norm() > max_rectified_distance {
                        return None;
                    }
                    observed
                }
                None => all_points
                    .iter()
                    .filter(|p| !claimed.iter().any(|kept| (*kept - **p).norm() < 1.0e-9))
                    .copied()
                    .min_by(|a, b| (*a - predicted).norm().total_cmp(&(*b - predicted).norm()))
                    .filter(|p| (*p - predicted).norm() <= min_distance_to_add_keypoint)
                    .map(|p| {
                        claimed.push(p);
                        p
                    })
                    .unwrap_or(predicted),
            };
            centers.push(center);
        }
    }
    Some(centers)
}

/// Reject a result whose corners fall outside the convex hull of the
/// originally detected points, expanded by `factor` about its centroid --
/// guards against a lattice that is internally consistent but detached from
/// where circles were actually observed.
fn passes_convex_hull(detected: &[Vec2], centers: &[Vec2], factor: f64) -> bool {
    if detected.len() < 3 {
        return true;
    }
    let centroid = detected.iter().fold(Vec2::zeros(), |a, b| a + b) / detected.len() as f64;
    let hull_points: Vec<Point2<f64>> = detected
        .iter()
        .map(|p| {
            let scaled = centroid + (p - centroid) * factor;
            Point2::new(scaled.x, scaled.y)
        })
        .collect();
    let Some(hull) = ConvexPolygon::from_convex_hull(&hull_points) else {
        return true;
    };
    let iso = Isometry2::identity();
    centers.iter().all(|c| {
        let q = Point2::new(c.x, c.y);
        hull.distance_to_point(&iso, &q, true) <= 1.0e-6
    })
}
