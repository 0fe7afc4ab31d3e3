use nalgebra::{Cholesky, SMatrix, SVector};

use crate::errors::Singular;

/// Solve the symmetric 2x2 system `[[a, b], [b, c]] * [x, y]^T = [d, e]^T` by
/// Cramer's rule.
///
/// This is the same closed-form idiom already used elsewhere in this
/// workspace for small fixed-size linear systems (compare
/// `flydra-feature-detector`'s `eigen_2x2_real`), applied here to the
/// centered 2x2 reduction of the normal-flow plane fit's 3x3 normal
/// equations.
pub(crate) fn solve_sym2(a: f64, b: f64, c: f64, d: f64, e: f64) -> Result<(f64, f64), Singular> {
    let det = a * c - b * b;
    if det.abs() < 1.0e-12 {
        return Err(Singular);
    }
    let x = (d * c - e * b) / det;
    let y = (a * e - b * d) / det;
    Ok((x, y))
}

/// Solve a symmetric positive-(semi)definite `N x N` normal-equations system
/// `ata * x = atb` via Cholesky decomposition.
///
/// Used for the circle extractor's 7-parameter time-varying circle fit and
/// the grid finder's rectifying homography: both accumulate `A^T A` and
/// `A^T b` incrementally over a variable number of observations, so the
/// solved system is always a small fixed-size one regardless of how many
/// events or keypoints contributed to it.
pub(crate) fn solve_normal_equations<const N: usize>(
    ata: SMatrix<f64, N, N>,
    atb: SVector<f64, N>,
) -> Result<SVector<f64, N>, Singular> {
    Cholesky::new(ata)
        .map(|chol| chol.solve(&atb))
        .ok_or(Singular)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn solve_sym2_matches_hand_solution() {
        // [[4, 1], [1, 3]] * [x, y] = [1, 2]
        let (x, y) = solve_sym2(4.0, 1.0, 3.0, 1.0, 2.0).unwrap();
        assert_relative_eq!(4.0 * x + 1.0 * y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(1.0 * x + 3.0 * y, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn solve_sym2_rejects_singular() {
        assert!(solve_sym2(1.0, 2.0, 4.0, 1.0, 2.0).is_err());
    }
}
