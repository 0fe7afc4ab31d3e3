use std::collections::VecDeque;

use evcal_types::{CircleExtractorConfig, Vec2};

use crate::normflow::NormFlowPack;

/// One spatio-temporally connected group of same-polarity normal-flow
/// pixels: a candidate moving edge of a circle silhouette.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub polarity: bool,
    pub pixels: Vec<(u16, u16)>,
    pub centroid: Vec2,
    /// Mean of the member pixels' unit `nf_dir` vectors, renormalized. Zero
    /// if the members' directions cancel out.
    pub mean_nf_dir: Vec2,
    pub t_start: f64,
    pub t_end: f64,
}

impl Cluster {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }
}

/// Which side of a circle's silhouette a [`Cluster`] appears to be, per the
/// single-cluster raycast test in [`classify_clusters`]. Final run/chase
/// pairing (matching each `Run` to the `Chase` it belongs with) happens one
/// stage later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircleClusterType {
    /// Forward raycast along the cluster's mean flow direction reached an
    /// opposite-polarity pixel; this edge is advancing into the circle's
    /// interior ahead of it.
    Run,
    /// Backward raycast (against the mean flow direction) reached an
    /// opposite-polarity pixel; this edge is being overtaken from behind.
    Chase,
    /// Neither direction resolved unambiguously: both raycasts hit (tie) or
    /// neither did within the step budget.
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircleClusterInfo {
    pub cluster: Cluster,
    pub kind: CircleClusterType,
}

/// Maximum raycast steps (`step = 1px` each) before giving up, per this
/// crate's resolved raycast rule.
const RAYCAST_MAX_STEPS: usize = 50;

/// Group a [`NormFlowPack`]'s active pixels into same-polarity,
/// spatio-temporally connected [`Cluster`]s (8-connected in space, broken
/// wherever the timestamp jump between neighbors exceeds `tau_break`), and
/// drop clusters smaller than `cfg.cluster_area_thd`.
pub fn extract_clusters(pack: &NormFlowPack, cfg: &CircleExtractorConfig, fallback_tau: f64) -> Vec<Cluster> {
    let tau_break = cfg.temporal_break_tau.unwrap_or(fallback_tau);
    let width = pack.polarity_mat.width();
    let height = pack.polarity_mat.height();

    let mut visited = vec![false; width * height];
    let mut clusters = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if visited[idx] {
                continue;
            }
            let Some(polarity) = *pack.polarity_mat.get(x, y) else {
                visited[idx] = true;
                continue;
            };
            visited[idx] = true;

            let mut pixels = Vec::new();
            let mut queue = VecDeque::new();
            queue.push_back((x, y));

            while let Some((cx, cy)) = queue.pop_front() {
                let ct = *pack.t_mat.get(cx, cy);
                pixels.push((cx as u16, cy as u16));
                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let (nx, ny) = (cx as i32 + dx, cy as i32 + dy);
                        if nx < 0 || ny < 0 || nx as usize >= width || ny as usize >= height {
                            continue;
                        }
                        let (nx, ny) = (nx as usize, ny as usize);
                        let nidx = ny * width + nx;
                        if visited[nidx] {
                            continue;
                        }
                        if *pack.polarity_mat.get(nx, ny) != Some(polarity) {
                            continue;
                        }
                        let nt = *pack.t_mat.get(nx, ny);
                        if (nt - ct).abs() > tau_break {
                            continue;
                        }
                        visited[nidx] = true;
                        queue.push_back((nx, ny));
                    }
                }
            }

            if (pixels.len() as f64) < cfg.cluster_area_thd {
                continue;
            }
            clusters.push(finish_cluster(polarity, pixels, pack));
        }
    }
    clusters
}

fn finish_cluster(polarity: bool, pixels: Vec<(u16, u16)>, pack: &NormFlowPack) -> Cluster {
    let n = pixels.len() as f64;
    let mut centroid = Vec2::zeros();
    let mut dir_sum = Vec2::zeros();
    let mut t_start = f64::INFINITY;
    let mut t_end = f64::NEG_INFINITY;
    for &(x, y) in &pixels {
        centroid += Vec2::new(x as f64, y as f64);
        let t = *pack.t_mat.get(x as usize, y as usize);
        t_start = t_start.min(t);
        t_end = t_end.max(t);
        if let Some(flow) = pack.flows.get(&(x, y)) {
            dir_sum += flow.nf_dir;
        }
    }
    centroid /= n;
    let mean_nf_dir = if dir_sum.norm() > 1.0e-9 {
        dir_sum / dir_sum.norm()
    } else {
        Vec2::zeros()
    };
    Cluster {
        polarity,
        pixels,
        centroid,
        mean_nf_dir,
        t_start,
        t_end,
    }
}

/// Classify each cluster as [`CircleClusterType::Run`],
/// [`CircleClusterType::Chase`], or [`CircleClusterType::Other`] by
/// raycasting from its centroid along (and against) its mean flow direction,
/// one pixel step at a time, up to [`RAYCAST_MAX_STEPS`], looking for an
/// opposite-polarity active pixel.
pub fn classify_clusters(clusters: Vec<Cluster>, pack: &NormFlowPack) -> Vec<CircleClusterInfo> {
    clusters
        .into_iter()
        .map(|cluster| {
            let kind = classify_one(&cluster, pack);
            CircleClusterInfo { cluster, kind }
        })
        .collect()
}

fn classify_one(cluster: &Cluster, pack: &NormFlowPack) -> CircleClusterType {
    if cluster.mean_nf_dir.norm() < 1.0e-9 {
        return CircleClusterType::Other;
    }
    let opposite = !cluster.polarity;
    let forward = raycast_hits(pack, cluster.centroid, cluster.mean_nf_dir, opposite);
    let backward = raycast_hits(pack, cluster.centroid, -cluster.mean_nf_dir, opposite);
    match (forward, backward) {
        (true, false) => CircleClusterType::Run,
        (false, true) => CircleClusterType::Chase,
        _ => CircleClusterType::Other,
    }
}

fn raycast_hits(pack: &NormFlowPack, start: Vec2, dir: Vec2, polarity_needed: bool) -> bool {
    let unit = dir / dir.norm();
    for step in 1..=RAYCAST_MAX_STEPS {
        let p = start + unit * step as f64;
        if p.x < 0.0 || p.y < 0.0 {
            continue;
        }
        let (x, y) = (p.x.round() as usize, p.y.round() as usize);
        if !pack.polarity_mat.in_bounds(x, y) {
            continue;
        }
        if *pack.polarity_mat.get(x, y) == Some(polarity_needed) {
            return true;
        }
    }
    false
}
