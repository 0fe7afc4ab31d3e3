use evcal_types::{NormFlowEstimatorConfig, Vec2};
use tracing::trace;

use crate::geom::solve_sym2;
use crate::sae::Sae;

/// Normal-flow estimate at one active pixel (C3).
///
/// `nf` is the normal-flow vector itself: the local-plane-fit gradient
/// direction, scaled to `1 / |∇t|` so that its magnitude is a speed (pixels
/// per second) along the direction of brightness-change motion rather than
/// an arbitrary gradient magnitude. `nf_dir`/`nf_norm` are its polar
/// decomposition, kept alongside for callers that only need direction.
#[derive(Debug, Clone, PartialEq)]
pub struct NormFlow {
    pub x: u16,
    pub y: u16,
    pub t: f64,
    pub polarity: bool,
    pub nf: Vec2,
    pub nf_dir: Vec2,
    pub nf_norm: f64,
    /// The `(x, y, t)` of every neighbor that contributed to this pixel's
    /// plane fit, for downstream diagnostics and the viewer sink.
    pub raw_inliers: Vec<(u16, u16, f64)>,
}

/// The full set of [`NormFlow`] estimates computed from one [`Sae`] snapshot,
/// plus the supporting per-pixel images the circle extractor (C4) and the
/// viewer sink read alongside them.
#[derive(Debug, Clone)]
pub struct NormFlowPack {
    pub t_cur: f64,
    /// The temporal activity window (`recency_factor * decay_tau`) this pack
    /// was built with. The circle extractor uses this to derive a single
    /// `t_eval = t_cur - window / 2` reference time for the whole pack.
    pub window: f64,
    /// Per-pixel "was this pixel active, and under which polarity" map.
    /// `None` where the pixel was not recently active.
    pub polarity_mat: evcal_types::Image<Option<bool>>,
    /// Fused timestamp of the winning polarity at each active pixel;
    /// `f64::NEG_INFINITY` elsewhere.
    pub t_mat: evcal_types::Image<f64>,
    /// One entry per pixel that both passed the activity test and yielded an
    /// accepted plane fit, keyed by `(x, y)`.
    pub flows: std::collections::HashMap<(u16, u16), NormFlow>,
}

impl NormFlowPack {
    fn empty(width: usize, height: usize, t_cur: f64) -> Self {
        Self {
            t_cur,
            window: 0.0,
            polarity_mat: evcal_types::Image::filled(width, height, None),
            t_mat: evcal_types::Image::filled(width, height, f64::NEG_INFINITY),
            flows: std::collections::HashMap::new(),
        }
    }

    /// The pack's reference evaluation time: the middle of its temporal
    /// activity window.
    pub fn t_eval(&self) -> f64 {
        self.t_cur - self.window / 2.0
    }
}

/// Computes [`NormFlowPack`]s from a [`Sae`] snapshot (C3).
///
/// Stateless between calls: every call re-derives activity and plane fits
/// from scratch off the `Sae` passed in.
#[derive(Debug, Clone)]
pub struct NormFlowEstimator {
    cfg: NormFlowEstimatorConfig,
}

impl NormFlowEstimator {
    pub fn new(cfg: NormFlowEstimatorConfig) -> crate::errors::Result<Self> {
        cfg.validate().map_err(evcal_types::Error::from)?;
        Ok(Self { cfg })
    }

    /// Estimate normal flow for every currently-active pixel of `sae`.
    ///
    /// `decay_tau` is the same `τ` the SAE was configured with; the
    /// estimator's own `recency_factor` scales it into the activity window
    /// `K·τ`.
    pub fn estimate(&self, sae: &Sae) -> NormFlowPack {
        let (width, height) = (sae.width(), sae.height());
        let t_cur = sae.time_latest();
        if t_cur == f64::NEG_INFINITY {
            return NormFlowPack::empty(width, height, t_cur);
        }
        let window = self.cfg.recency_factor * sae.decay_tau();

        let mut pack = NormFlowPack::empty(width, height, t_cur);
        pack.window = window;
        for y in 0..height {
            for x in 0..width {
                let (t, polarity) = sae.latest_polarity_at(x, y);
                if t == f64::NEG_INFINITY || t_cur - t > window {
                    continue;
                }
                *pack.polarity_mat.get_mut(x, y) = Some(polarity);
                *pack.t_mat.get_mut(x, y) = t;
            }
        }

        let half = self.cfg.half_window as i32;
        for y in 0..height {
            for x in 0..width {
                let Some(polarity) = *pack.polarity_mat.get(x, y) else {
                    continue;
                };
                let center_t = *pack.t_mat.get(x, y);
                let mut neighbors = Vec::new();
                for dy in -half..=half {
                    for dx in -half..=half {
                        let (nx, ny) = (x as i32 + dx, y as i32 + dy);
                        if nx < 0 || ny < 0 || nx as usize >= width || ny as usize >= height {
                            continue;
                        }
                        let (nx, ny) = (nx as usize, ny as usize);
                        if pack.polarity_mat.get(nx, ny) != &Some(polarity) {
                            continue;
                        }
                        neighbors.push((nx, ny, *pack.t_mat.get(nx, ny)));
                    }
                }
                if neighbors.len() < self.cfg.min_neighbors {
                    continue;
                }
                let Some(flow) = fit_flow(x, y, center_t, polarity, &neighbors, self.cfg.residual_bound)
                else {
                    continue;
                };
                pack.flows.insert((x as u16, y as u16), flow);
            }
        }
        trace!(active = pack.flows.len(), "normal flow estimated");
        pack
    }
}

/// Fit the local plane `t(dx, dy) = a*dx + b*dy + c` (coordinates centered on
/// `(x, y)`) by least squares, and turn it into a [`NormFlow`] if the fit's
/// RMS residual is within `residual_bound` and the gradient is non-degenerate.
fn fit_flow(
    x: usize,
    y: usize,
    center_t: f64,
    polarity: bool,
    neighbors: &[(usize, usize, f64)],
    residual_bound: f64,
) -> Option<NormFlow> {
    let n = neighbors.len() as f64;
    let (mut sxx, mut syy, mut sxy, mut sx, mut sy, mut sxt, mut syt, mut st) =
        (0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    for &(nx, ny, nt) in neighbors {
        let dx = nx as f64 - x as f64;
        let dy = ny as f64 - y as f64;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
        sx += dx;
        sy += dy;
        sxt += dx * nt;
        syt += dy * nt;
        st += nt;
    }
    // Eliminate `c` from the 3x3 normal equations, leaving a centered 2x2
    // system in `(a, b)`.
    let a_coef = sxx - sx * sx / n;
    let b_coef = sxy - sx * sy / n;
    let c_coef = syy - sy * sy / n;
    let d = sxt - sx * st / n;
    let e = syt - sy * st / n;
    let (a, b) = solve_sym2(a_coef, b_coef, c_coef, d, e).ok()?;
    let c = (st - a * sx - b * sy) / n;

    let grad_sq = a * a + b * b;
    if grad_sq < 1.0e-12 {
        // No measurable temporal gradient: not a moving edge.
        return None;
    }

    let mut sq_err = 0.0;
    for &(nx, ny, nt) in neighbors {
        let dx = nx as f64 - x as f64;
        let dy = ny as f64 - y as f64;
        let resid = a * dx + b * dy + c - nt;
        sq_err += resid * resid;
    }
    let rms = (sq_err / n).sqrt();
    if rms > residual_bound {
        return None;
    }

    let nf = Vec2::new(-a, -b) / grad_sq;
    let nf_norm = nf.norm();
    let nf_dir = nf / nf_norm;
    Some(NormFlow {
        x: x as u16,
        y: y as u16,
        t: center_t,
        polarity,
        nf,
        nf_dir,
        nf_norm,
        raw_inliers: neighbors
            .iter()
            .map(|&(nx, ny, nt)| (nx as u16, ny as u16, nt))
            .collect(),
    })
}
