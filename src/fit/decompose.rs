//! Split a fit back into physical components and estimate its S/N.
//!
//! The fitter returns one weight per design-matrix column. Slicing both by
//! the [`DesignLayout`] groups gives:
//!
//! ```text
//! bestfit = apoly + mpoly · extinction · (stars + gas) + sky
//! ```

use nalgebra::DMatrix;

use crate::fit::design::DesignLayout;
use crate::math::{legval, nan_median, nan_std, sigma_clip};
use crate::models::reddening_cal00;

const SN_CLIP_SIGMA: f64 = 5.0;
const SN_CLIP_ITERS: usize = 5;

/// Component spectra of one fit, each on the galaxy pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Components {
    pub apoly: Vec<f64>,
    pub mpoly: Vec<f64>,
    pub extinction: Vec<f64>,
    pub stars: Vec<f64>,
    pub gas: Vec<f64>,
    pub sky: Vec<f64>,
}

impl Components {
    /// Decompose `matrix · [poly_weights, weights]` into its column groups.
    pub fn from_fit(
        layout: &DesignLayout,
        matrix: &DMatrix<f64>,
        poly_weights: &[f64],
        weights: &[f64],
        mpoly_weights: Option<&[f64]>,
        reddening: Option<f64>,
        lam: &[f64],
    ) -> Self {
        let npix = matrix.nrows();
        let slice_dot = |cols: std::ops::Range<usize>, w: &[f64]| -> Vec<f64> {
            (0..npix)
                .map(|i| cols.clone().zip(w).map(|(c, wc)| matrix[(i, c)] * wc).sum::<f64>())
                .collect()
        };

        let apoly = slice_dot(layout.poly_range(), poly_weights);
        let mpoly = match mpoly_weights {
            Some(m) => {
                let mut coeffs = Vec::with_capacity(m.len() + 1);
                coeffs.push(1.0);
                coeffs.extend_from_slice(m);
                legval(npix, &coeffs)
            }
            None => vec![1.0; npix],
        };
        let extinction = match reddening {
            Some(ebv) => reddening_cal00(lam, ebv),
            None => vec![1.0; npix],
        };

        Self {
            apoly,
            mpoly,
            extinction,
            stars: slice_dot(layout.stars_range(), &weights[layout.stars_weight_range()]),
            gas: slice_dot(layout.gas_range(), &weights[layout.gas_weight_range()]),
            sky: slice_dot(layout.sky_range(), &weights[layout.sky_weight_range()]),
        }
    }
}

/// Recombine the components into the model spectrum.
pub fn reconstruct(c: &Components) -> Vec<f64> {
    (0..c.apoly.len())
        .map(|i| c.apoly[i] + c.mpoly[i] * c.extinction[i] * (c.stars[i] + c.gas[i]) + c.sky[i])
        .collect()
}

/// Median signal and clipped residual noise over the fitted pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalToNoise {
    pub signal: f64,
    pub noise: f64,
}

impl SignalToNoise {
    pub fn sn(&self) -> f64 {
        signal_to_noise(self.signal, self.noise)
    }
}

/// `signal / noise`, with `+∞` for zero (or negative) noise.
pub fn signal_to_noise(signal: f64, noise: f64) -> f64 {
    if noise > 0.0 {
        signal / noise
    } else {
        f64::INFINITY
    }
}

pub fn estimate_sn(galaxy: &[f64], bestfit: &[f64], goodpixels: &[usize]) -> SignalToNoise {
    let flux: Vec<f64> = goodpixels.iter().map(|&i| galaxy[i]).collect();
    let resid: Vec<f64> = goodpixels.iter().map(|&i| galaxy[i] - bestfit[i]).collect();
    let clipped = sigma_clip(&resid, SN_CLIP_SIGMA, SN_CLIP_ITERS);
    SignalToNoise {
        signal: nan_median(&flux).unwrap_or(f64::NAN),
        noise: nan_std(&clipped).unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> DesignLayout {
        DesignLayout { degree: 1, n_stars: 2, n_gas: 1, n_sky: 1 }
    }

    fn matrix(npix: usize) -> DMatrix<f64> {
        DMatrix::from_fn(npix, layout().n_columns(), |i, c| {
            let x = i as f64 / npix as f64;
            match c {
                0 => 1.0,
                1 => 2.0 * x - 1.0,
                2 => 1.0 - 0.3 * (-(x - 0.3).powi(2) * 200.0).exp(),
                3 => 1.0 - 0.5 * (-(x - 0.6).powi(2) * 300.0).exp(),
                4 => (-(x - 0.5).powi(2) * 5000.0).exp(),
                _ => 0.1 * (x * 40.0).sin().abs(),
            }
        })
    }

    #[test]
    fn components_reconstruct_bestfit() {
        let npix = 200;
        let m = matrix(npix);
        let lam: Vec<f64> = (0..npix).map(|i| 5000.0 + i as f64).collect();
        let poly = [0.2, -0.05];
        let weights = [0.6, 0.3, 2.0, 0.7];
        let mp = [0.1, -0.02];
        let ebv = 0.15;

        let c = Components::from_fit(&layout(), &m, &poly, &weights, Some(&mp[..]), Some(ebv), &lam);

        // Independent model: same formula written against the raw matrix.
        let mpoly = legval(npix, &[1.0, 0.1, -0.02]);
        let ext = reddening_cal00(&lam, ebv);
        let expected: Vec<f64> = (0..npix)
            .map(|i| {
                let a = m[(i, 0)] * 0.2 + m[(i, 1)] * -0.05;
                let t = m[(i, 2)] * 0.6 + m[(i, 3)] * 0.3 + m[(i, 4)] * 2.0;
                a + mpoly[i] * ext[i] * t + m[(i, 5)] * 0.7
            })
            .collect();

        for (got, want) in reconstruct(&c).iter().zip(&expected) {
            assert!((got - want).abs() <= 1e-6 * want.abs().max(1e-12), "{got} vs {want}");
        }
        assert!(c.gas.iter().any(|g| *g > 1.0));
    }

    #[test]
    fn absent_mpoly_and_reddening_are_ones() {
        let m = matrix(50);
        let lam = vec![6000.0; 50];
        let c = Components::from_fit(&layout(), &m, &[0.0, 0.0], &[1.0, 0.0, 0.0, 0.0], None, None, &lam);
        assert!(c.mpoly.iter().all(|v| *v == 1.0));
        assert!(c.extinction.iter().all(|v| *v == 1.0));
        assert!(c.sky.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn zero_variance_residual_gives_infinite_sn() {
        let galaxy = vec![2.0; 100];
        let good: Vec<usize> = (0..100).collect();
        let sn = estimate_sn(&galaxy, &galaxy, &good);
        assert_eq!(sn.signal, 2.0);
        assert_eq!(sn.noise, 0.0);
        assert_eq!(sn.sn(), f64::INFINITY);
    }

    #[test]
    fn sn_ignores_outlier_residuals() {
        let galaxy: Vec<f64> = (0..200).map(|i| 10.0 + if i % 2 == 0 { 0.1 } else { -0.1 }).collect();
        let mut model = vec![10.0; 200];
        model[7] = -1000.0;
        let good: Vec<usize> = (0..200).collect();
        let sn = estimate_sn(&galaxy, &model, &good);
        assert!((sn.noise - 0.1).abs() < 1e-4, "noise {}", sn.noise);
        assert!((sn.sn() - 100.0).abs() < 0.1);
    }
}
