use evcal_types::{Circle, Vec2};
use nalgebra::{SMatrix, SVector};

use crate::errors::Singular;
use crate::geom::solve_normal_equations;

/// A circle whose center drifts linearly and whose squared radius varies
/// quadratically over the short time window of one extraction call.
///
/// Fit algebraically (Kåsa-style) from the identity `x^2 + y^2 = A(t)*x +
/// B(t)*y + C(t)` where `A(t) = a0 + a1*t = 2*cx(t)`, `B(t) = b0 + b1*t =
/// 2*cy(t)`, and `C(t) = c0 + c1*t + c2*t^2`. Every term on the right is
/// linear in the seven unknowns `(a0, a1, b0, b1, c0, c1, c2)` for a known
/// `(x, y, t)`, so all seven are recovered by one linear least-squares solve
/// rather than a nonlinear circle fit. `cx`, `cy`, and `r^2` are then
/// algebraic combinations of those seven coefficients, derived on demand in
/// [`Self::pos_at`] and [`Self::radius_at`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeVaryingCircle {
    coeffs: [f64; 7],
}

impl TimeVaryingCircle {
    /// Fit from a set of inlier `(x, y, t)` events belonging to one matched
    /// run/chase pair. Requires at least 7 points to avoid the system being
    /// rank-deficient by construction; callers should additionally bound
    /// this from above by `POINT_TO_CIRCLE_AVG_THD`-style acceptance checks.
    pub fn fit(points: &[(f64, f64, f64)]) -> Result<Self, Singular> {
        if points.len() < 7 {
            return Err(Singular);
        }
        let mut ata = SMatrix::<f64, 7, 7>::zeros();
        let mut atb = SVector::<f64, 7>::zeros();
        for &(x, y, t) in points {
            let row = SVector::<f64, 7>::from_row_slice(&[x, x * t, y, y * t, 1.0, t, t * t]);
            let target = x * x + y * y;
            ata += row * row.transpose();
            atb += row * target;
        }
        let solved = solve_normal_equations(ata, atb)?;
        let mut coeffs = [0.0; 7];
        coeffs.copy_from_slice(solved.as_slice());
        Ok(Self { coeffs })
    }

    /// Center position at time `t`.
    pub fn pos_at(&self, t: f64) -> Vec2 {
        let [a0, a1, b0, b1, ..] = self.coeffs;
        Vec2::new((a0 + a1 * t) / 2.0, (b0 + b1 * t) / 2.0)
    }

    /// Squared radius at time `t`, derived from the fitted `C(t)` term and
    /// the center position. Can be negative for a degenerate fit or far
    /// outside the fitted time window; callers must check this before
    /// taking a square root (see [`Self::radius_at`]).
    pub fn radius_sq_at(&self, t: f64) -> f64 {
        let [.., c0, c1, c2] = self.coeffs;
        let center = self.pos_at(t);
        c0 + c1 * t + c2 * t * t + center.norm_squared()
    }

    /// Radius at time `t`, or `None` if the fitted squared radius is
    /// non-positive there (the accepted-window positivity check named in
    /// the fit's acceptance criteria).
    pub fn radius_at(&self, t: f64) -> Option<f64> {
        let r2 = self.radius_sq_at(t);
        if r2 > 0.0 {
            Some(r2.sqrt())
        } else {
            None
        }
    }

    /// Unsigned distance from `(x, y)` to this circle's boundary at time `t`:
    /// `| |p - center(t)| - radius(t) |`. Returns `f64::INFINITY` if the
    /// circle is degenerate at `t` (see [`Self::radius_at`]).
    pub fn point_to_circle_distance(&self, x: f64, y: f64, t: f64) -> f64 {
        match self.radius_at(t) {
            Some(r) => ((Vec2::new(x, y) - self.pos_at(t)).norm() - r).abs(),
            None => f64::INFINITY,
        }
    }

    /// The static [`Circle`] this time-varying fit reduces to at `t`, or
    /// `None` if the fitted squared radius is non-positive there.
    pub fn circle_at(&self, t: f64) -> Option<Circle> {
        self.radius_at(t).map(|radius| Circle::new(self.pos_at(t), radius))
    }

    /// Whether `radius_sq_at` stays positive across every sample in
    /// `[start_t, end_t]`, checked at `samples` evenly spaced points
    /// (including both ends).
    pub fn positive_radius_over(&self, start_t: f64, end_t: f64, samples: usize) -> bool {
        debug_assert!(samples >= 2);
        (0..samples).all(|i| {
            let frac = i as f64 / (samples - 1) as f64;
            let t = start_t + frac * (end_t - start_t);
            self.radius_sq_at(t) > 0.0
        })
    }
}
