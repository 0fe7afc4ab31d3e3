use std::collections::{HashMap, HashSet};

use evcal_types::{CircleExtractorConfig, Vec2};
use itertools::iproduct;

use crate::cluster::{Cluster, CircleClusterInfo, CircleClusterType};

/// A resolved run/chase cluster pair: the two moving edges of one circle
/// silhouette, ready to feed the time-varying circle fit.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair {
    pub run: Cluster,
    pub chase: Cluster,
    /// Score the pair was matched on, per `SPEC_FULL.md` §4.3.3 (lower is
    /// better): inter-centroid distance scaled by how nearly antiparallel
    /// the two clusters' flow directions are.
    pub score: f64,
}

/// Pairs up run/chase clusters, per `CircleExtractorConfig::dir_diff_deg_thd`.
///
/// Three phases, in order:
/// 1. Direct `Run`-`Chase` candidates, scored by how well the vector between
///    centroids lines up with the run's flow direction.
/// 2. A re-search phase that also considers `Other` clusters as a stand-in
///    for the missing side of a pair (an edge the raycast classifier
///    couldn't resolve but which geometrically completes a circle).
/// 3. Greedy lowest-score-first assignment, followed by a pass that throws
///    out any match whose score is not clearly better than a competing
///    candidate for either of its two clusters -- an ambiguous match is
///    worse than no match.
pub fn match_clusters(infos: Vec<CircleClusterInfo>, cfg: &CircleExtractorConfig) -> Vec<MatchedPair> {
    let mut clusters: HashMap<usize, Cluster> = HashMap::new();
    let mut runs = Vec::new();
    let mut chases = Vec::new();
    let mut others = Vec::new();
    for (id, info) in infos.into_iter().enumerate() {
        match info.kind {
            CircleClusterType::Run => runs.push(id),
            CircleClusterType::Chase => chases.push(id),
            CircleClusterType::Other => others.push(id),
        }
        clusters.insert(id, info.cluster);
    }

    let run_side: Vec<usize> = runs.iter().chain(others.iter()).copied().collect();
    let chase_side: Vec<usize> = chases.iter().chain(others.iter()).copied().collect();
    let mut candidates: Vec<(usize, usize, f64)> = iproduct!(run_side, chase_side)
        .filter(|&(ri, ci)| ri != ci)
        .filter_map(|(ri, ci)| candidate_score(&clusters[&ri], &clusters[&ci], cfg).map(|score| (ri, ci, score)))
        .collect();
    candidates.sort_by(|a, b| a.2.total_cmp(&b.2));

    let mut used = HashSet::new();
    let mut chosen = Vec::new();
    for &(ri, ci, score) in &candidates {
        if used.contains(&ri) || used.contains(&ci) {
            continue;
        }
        used.insert(ri);
        used.insert(ci);
        chosen.push((ri, ci, score));
    }

    // A match is ambiguous if either of its clusters had a near-equally-good
    // alternative; drop it rather than guess.
    const AMBIGUITY_MARGIN: f64 = 1.0;
    let resolved: Vec<(usize, usize, f64)> = chosen
        .into_iter()
        .filter(|&(ri, ci, score)| {
            !candidates.iter().any(|&(rj, cj, other_score)| {
                (rj == ri || cj == ci) && (rj, cj) != (ri, ci) && (other_score - score).abs() <= AMBIGUITY_MARGIN
            })
        })
        .collect();

    resolved
        .into_iter()
        .map(|(ri, ci, score)| MatchedPair {
            run: clusters[&ri].clone(),
            chase: clusters[&ci].clone(),
            score,
        })
        .collect()
}

/// Score a candidate run/chase pair per `SPEC_FULL.md` §4.3.3, or `None` if
/// it fails either gate:
///
/// - `dir(R)·dir(C) <= -cos(θ_dir)`: the two clusters' mean flow directions
///   must be roughly *opposite* (a leading and trailing edge of the same
///   moving disk point away from each other).
/// - the vector from `center(R)` to `center(C)` must align with `dir(C)`
///   within `cos(θ_dir)`.
///
/// Surviving candidates are scored by `‖center(R) - center(C)‖ * (1 -
/// dir(R)·(-dir(C)))` -- smaller is better: closer centroids and more nearly
/// antiparallel directions both pull the score toward zero.
fn candidate_score(run: &Cluster, chase: &Cluster, cfg: &CircleExtractorConfig) -> Option<f64> {
    if run.mean_nf_dir.norm() < 1.0e-9 || chase.mean_nf_dir.norm() < 1.0e-9 {
        return None;
    }
    let cos_thd = cfg.dir_diff_deg_thd.to_radians().cos();

    let opposite = run.mean_nf_dir.dot(&chase.mean_nf_dir);
    if opposite > -cos_thd {
        return None;
    }

    let delta = chase.centroid - run.centroid;
    if delta.norm() < 1.0e-9 {
        return None;
    }
    let collinearity = (delta / delta.norm()).dot(&chase.mean_nf_dir);
    if collinearity < cos_thd {
        return None;
    }

    Some(delta.norm() * (1.0 - run.mean_nf_dir.dot(&-chase.mean_nf_dir)))
}
