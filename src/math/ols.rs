//! Weighted least squares solvers.
//!
//! Every fit in this crate reduces to a linear problem once the nonlinear
//! LOSVD parameters are fixed:
//!
//! ```text
//! minimize Σ ((y_i - x_i^T β) / σ_i)^2
//! ```
//!
//! Callers scale rows by `1/σ_i` before calling in here.
//!
//! Implementation choices:
//! - SVD solve, so tall design matrices (thousands of pixels, tens of columns)
//!   are handled without forming normal equations.
//! - Template weights must be non-negative. We enforce that with the
//!   Lawson-Hanson active-set method.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.ncols() == 0 {
        return Some(DVector::zeros(0));
    }
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Least squares with non-negativity on the columns flagged in `nonneg`.
///
/// Lawson-Hanson active set. Unflagged columns are always free; a flagged
/// column enters the passive set when the residual gradient favours it and
/// leaves it when an interpolation step drives its weight to zero. Columns
/// outside the passive set get a weight of exactly zero.
pub fn solve_nonneg_least_squares(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    nonneg: &[bool],
) -> Option<DVector<f64>> {
    debug_assert_eq!(x.ncols(), nonneg.len());
    let (m, p) = x.shape();
    let anorm = (0..p)
        .map(|c| x.column(c).iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max);
    let tol = 10.0 * f64::EPSILON * anorm * m.max(p) as f64;

    let mut passive: Vec<bool> = nonneg.iter().map(|c| !c).collect();
    let mut beta = solve_on(x, y, &passive)?;
    let max_iter = 3 * p + 10;

    for _ in 0..max_iter {
        let grad = x.transpose() * (y - x * &beta);
        let entering = (0..p)
            .filter(|&c| !passive[c] && grad[c] > tol)
            .max_by(|&a, &b| grad[a].total_cmp(&grad[b]));
        let Some(j) = entering else {
            return Some(beta);
        };
        passive[j] = true;

        let mut first = true;
        loop {
            let z = solve_on(x, y, &passive)?;
            let blocking = (0..p)
                .filter(|&c| passive[c] && nonneg[c] && z[c] <= 0.0)
                .map(|c| (c, beta[c] / (beta[c] - z[c])))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            let Some((q, alpha)) = blocking else {
                beta = z;
                break;
            };
            if first && q == j {
                // The entering gradient was rounding noise.
                passive[j] = false;
                return Some(beta);
            }
            first = false;

            beta += (z - &beta) * alpha;
            passive[q] = false;
            beta[q] = 0.0;
            for c in 0..p {
                if passive[c] && nonneg[c] && beta[c] <= tol {
                    passive[c] = false;
                    beta[c] = 0.0;
                }
            }
        }
    }
    Some(beta)
}

/// Unconstrained solve on the columns flagged in `cols`, zero elsewhere.
fn solve_on(x: &DMatrix<f64>, y: &DVector<f64>, cols: &[bool]) -> Option<DVector<f64>> {
    let idx: Vec<usize> = (0..cols.len()).filter(|&c| cols[c]).collect();
    let mut full = DVector::zeros(cols.len());
    if idx.is_empty() {
        return Some(full);
    }
    let sub = solve_least_squares(&x.select_columns(idx.iter()), y)?;
    for (k, &c) in idx.iter().enumerate() {
        full[c] = sub[k];
    }
    Some(full)
}
