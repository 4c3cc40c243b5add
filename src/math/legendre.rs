//! Legendre polynomials on a pixel grid.
//!
//! Both the additive continuum and the multiplicative polynomial are Legendre
//! series in `x = linspace(-1, 1, n)` over the full galaxy pixel range.
//! Values come from the three-term recurrence:
//!
//! `(k + 1) P_{k+1}(x) = (2k + 1) x P_k(x) - k P_{k-1}(x)`

use nalgebra::DMatrix;

/// `n` evenly spaced points on `[-1, 1]` (inclusive).
pub fn unit_grid(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![-1.0],
        _ => (0..n)
            .map(|i| -1.0 + 2.0 * i as f64 / (n as f64 - 1.0))
            .collect(),
    }
}

/// Basis matrix with columns `P_0 .. P_degree` evaluated on `unit_grid(n)`.
pub fn legendre_basis(n: usize, degree: usize) -> DMatrix<f64> {
    let x = unit_grid(n);
    let mut out = DMatrix::zeros(n, degree + 1);
    for (i, &xi) in x.iter().enumerate() {
        let mut p_prev = 1.0;
        out[(i, 0)] = p_prev;
        if degree == 0 {
            continue;
        }
        let mut p = xi;
        out[(i, 1)] = p;
        for k in 1..degree {
            let kf = k as f64;
            let next = ((2.0 * kf + 1.0) * xi * p - kf * p_prev) / (kf + 1.0);
            p_prev = p;
            p = next;
            out[(i, k + 1)] = p;
        }
    }
    out
}

/// Evaluate the Legendre series `Σ c_k P_k(x)` on `unit_grid(n)`.
pub fn legval(n: usize, coeffs: &[f64]) -> Vec<f64> {
    if coeffs.is_empty() {
        return vec![0.0; n];
    }
    let basis = legendre_basis(n, coeffs.len() - 1);
    (0..n)
        .map(|i| {
            coeffs
                .iter()
                .enumerate()
                .map(|(k, c)| c * basis[(i, k)])
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_grid_spans_interval() {
        let x = unit_grid(5);
        assert_eq!(x, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn basis_matches_closed_forms() {
        let b = legendre_basis(5, 3);
        let x = unit_grid(5);
        for (i, &xi) in x.iter().enumerate() {
            assert!((b[(i, 0)] - 1.0).abs() < 1e-14);
            assert!((b[(i, 1)] - xi).abs() < 1e-14);
            assert!((b[(i, 2)] - 0.5 * (3.0 * xi * xi - 1.0)).abs() < 1e-14);
            assert!((b[(i, 3)] - 0.5 * (5.0 * xi.powi(3) - 3.0 * xi)).abs() < 1e-14);
        }
    }

    #[test]
    fn legval_with_unit_leading_coefficient_is_flat() {
        let v = legval(7, &[1.0]);
        assert!(v.iter().all(|&y| (y - 1.0).abs() < 1e-14));
    }
}
