use evcal_types::{Circle, CircleExtractorConfig, GridFinderConfig, GridPattern, Vec2};
use tracing::debug;

use crate::circle::TimeVaryingCircle;
use crate::cluster::{classify_clusters, extract_clusters};
use crate::errors::Result;
use crate::grid::GridFinder;
use crate::matching::{match_clusters, MatchedPair};
use crate::normflow::NormFlowPack;
use crate::viewer::{ExtractorEvent, NullSink, Sink};

/// Orchestrates cluster extraction, run/chase matching, and the
/// time-varying circle fit over one [`NormFlowPack`] (C4).
pub struct CircleExtractor {
    cfg: CircleExtractorConfig,
    sink: Box<dyn Sink>,
}

impl CircleExtractor {
    pub fn new(cfg: CircleExtractorConfig) -> Result<Self> {
        cfg.validate().map_err(evcal_types::Error::from)?;
        Ok(Self {
            cfg,
            sink: Box::new(NullSink),
        })
    }

    /// As [`Self::new`], but forwarding `ExtractorEvent`s to `sink` when
    /// `cfg.visualization` is set.
    pub fn with_sink(cfg: CircleExtractorConfig, sink: Box<dyn Sink>) -> Result<Self> {
        cfg.validate().map_err(evcal_types::Error::from)?;
        Ok(Self { cfg, sink })
    }

    /// Extract every circle currently resolvable from `pack`.
    ///
    /// `fallback_tau` is used as the cluster temporal-break threshold when
    /// `cfg.circle_extractor.temporal_break_tau` is unset, and should
    /// ordinarily be the originating `Sae`'s own `decay_tau`.
    ///
    /// Returns `pack.t_eval()` (the middle of the pack's temporal window)
    /// alongside the circles, each evaluated at that same common instant.
    pub fn extract_circles(&self, pack: &NormFlowPack, fallback_tau: f64) -> (f64, Vec<Circle>) {
        let clusters = extract_clusters(pack, &self.cfg, fallback_tau);
        if self.cfg.visualization {
            for cluster in &clusters {
                self.sink.notify(ExtractorEvent::ClusterFormed {
                    polarity: cluster.polarity,
                    area: cluster.area(),
                });
            }
        }

        let infos = classify_clusters(clusters, pack);
        let pairs = match_clusters(infos, &self.cfg);

        let t_eval = pack.t_eval();
        let mut circles = Vec::new();
        for pair in &pairs {
            if self.cfg.visualization {
                self.sink.notify(ExtractorEvent::PairMatched { score: pair.score });
            }
            if let Some(circle) = self.fit_pair(pair, pack, t_eval) {
                if self.cfg.visualization {
                    self.sink.notify(ExtractorEvent::CircleAccepted {
                        center: circle.center,
                        radius: circle.radius,
                    });
                }
                circles.push(circle);
            }
        }
        debug!(n = circles.len(), "circles extracted");
        (t_eval, circles)
    }

    /// Extract circles from `pack` and hand the resulting centers off to a
    /// fresh [`GridFinder`] for the requested `rows x cols` pattern.
    pub fn extract_circles_grid(
        &self,
        pack: &NormFlowPack,
        fallback_tau: f64,
        grid_cfg: &GridFinderConfig,
        rows: usize,
        cols: usize,
    ) -> Option<GridPattern> {
        let (_, circles) = self.extract_circles(pack, fallback_tau);
        let centers: Vec<Vec2> = circles.iter().map(Circle::center_vec).collect();
        let finder = GridFinder::new(grid_cfg.clone(), rows, cols).ok()?;
        finder.find(&centers)
    }

    /// Fit the time-varying circle for one matched pair and evaluate it at
    /// `t_eval`, the pack's common reference time.
    ///
    /// Per `SPEC_FULL.md` §4.3.4 step 1, the fit's point set `E1 ∪ E2` is the
    /// union of `raw_inliers` across every `NormFlow` record belonging to
    /// either cluster -- the neighborhood support each pixel's plane fit drew
    /// on, not just the cluster's own active pixels.
    fn fit_pair(&self, pair: &MatchedPair, pack: &NormFlowPack, t_eval: f64) -> Option<Circle> {
        let mut seen = std::collections::HashSet::new();
        let mut points: Vec<(f64, f64, f64)> = Vec::new();
        for &(x, y) in pair.run.pixels.iter().chain(pair.chase.pixels.iter()) {
            let Some(flow) = pack.flows.get(&(x, y)) else {
                continue;
            };
            for &(ix, iy, it) in &flow.raw_inliers {
                if seen.insert((ix, iy)) {
                    points.push((ix as f64, iy as f64, it));
                }
            }
        }

        let circle = TimeVaryingCircle::fit(&points).ok()?;
        let t_start = pair.run.t_start.min(pair.chase.t_start);
        let t_end = pair.run.t_end.max(pair.chase.t_end);
        if !circle.positive_radius_over(t_start, t_end, 5) {
            return None;
        }

        let avg_dist = points
            .iter()
            .map(|&(x, y, t)| circle.point_to_circle_distance(x, y, t))
            .sum::<f64>()
            / points.len() as f64;
        if avg_dist > self.cfg.point_to_circle_avg_thd {
            return None;
        }

        circle.circle_at(t_eval)
    }
}
