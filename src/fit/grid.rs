//! Parameter grids for the LOSVD search.
//!
//! `GridFitter` searches these grids coarse to fine. Each candidate only
//! needs a linear solve for the template weights.
//!
//! Velocity and Gauss-Hermite axes are linear. Dispersion is searched in `ln σ`
//! so that the relative resolution is the same for narrow and broad lines.

use crate::error::AppError;

/// Generate `steps` linearly spaced points between `min` and `max` (inclusive).
pub fn lin_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, AppError> {
    if !(min.is_finite() && max.is_finite() && max > min) {
        return Err(AppError::config(format!(
            "Invalid grid range: min={min}, max={max} (must be finite and max>min)."
        )));
    }
    if steps < 2 {
        return Err(AppError::config("Grid steps must be >= 2."));
    }
    let step = (max - min) / (steps as f64 - 1.0);
    Ok((0..steps).map(|i| min + step * i as f64).collect())
}

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, AppError> {
    if !(min > 0.0 && max > 0.0) {
        return Err(AppError::config(format!(
            "Invalid log grid range: min={min}, max={max} (must be >0)."
        )));
    }
    Ok(lin_space(min.ln(), max.ln(), steps)?
        .into_iter()
        .map(f64::exp)
        .collect())
}

/// One searched parameter, in internal (possibly log) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Axis {
    pub lo: f64,
    pub hi: f64,
    /// Hard limits the axis may never leave when zooming.
    pub min: f64,
    pub max: f64,
    pub log: bool,
}

impl Axis {
    /// Axis spanning the physical bounds `(lo, hi)`.
    pub fn new(bounds: (f64, f64), log: bool) -> Self {
        let (lo, hi) = if log {
            (bounds.0.ln(), bounds.1.ln())
        } else {
            bounds
        };
        Self { lo, hi, min: lo, max: hi, log }
    }

    pub fn to_physical(&self, x: f64) -> f64 {
        if self.log { x.exp() } else { x }
    }

    pub fn to_internal(&self, p: f64) -> f64 {
        if self.log { p.ln() } else { p }
    }

    /// Grid of `steps` points in internal coordinates.
    pub fn points(&self, steps: usize) -> Vec<f64> {
        if steps < 2 || self.hi <= self.lo {
            return vec![0.5 * (self.lo + self.hi)];
        }
        let step = (self.hi - self.lo) / (steps as f64 - 1.0);
        (0..steps).map(|i| self.lo + step * i as f64).collect()
    }

    pub fn step(&self, steps: usize) -> f64 {
        if steps < 2 {
            0.0
        } else {
            (self.hi - self.lo) / (steps as f64 - 1.0)
        }
    }

    /// Narrow the axis to `±half_width` around `center`, clamped to its hard limits.
    pub fn zoom(&self, center: f64, half_width: f64) -> Axis {
        let lo = (center - half_width).max(self.min);
        let hi = (center + half_width).min(self.max);
        Axis { lo, hi, ..*self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_space_includes_endpoints() {
        let v = log_space(3.0, 800.0, 5).unwrap();
        assert!((v[0] - 3.0).abs() < 1e-12);
        assert!((v[v.len() - 1] - 800.0).abs() < 1e-9);
    }

    #[test]
    fn lin_space_rejects_bad_ranges() {
        assert!(lin_space(1.0, 1.0, 5).is_err());
        assert!(lin_space(0.0, 1.0, 1).is_err());
    }

    #[test]
    fn zoom_stays_inside_hard_limits() {
        let axis = Axis::new((-100.0, 100.0), false);
        let z = axis.zoom(95.0, 20.0);
        assert_eq!((z.lo, z.hi), (75.0, 100.0));
        let z2 = z.zoom(80.0, 1.0);
        assert_eq!((z2.min, z2.max), (-100.0, 100.0));
    }

    #[test]
    fn log_axis_roundtrips_physical_values() {
        let axis = Axis::new((3.0, 800.0), true);
        let x = axis.to_internal(80.0);
        assert!((axis.to_physical(x) - 80.0).abs() < 1e-12);
        assert!((axis.to_physical(axis.lo) - 3.0).abs() < 1e-12);
    }
}
