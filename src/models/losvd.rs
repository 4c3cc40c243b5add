//! Line-of-sight velocity distribution kernels.
//!
//! On a log-λ grid a Doppler shift is a constant pixel offset, so broadening
//! a template is a 1-D convolution with the LOSVD sampled in pixel units:
//!
//! ```text
//! L(y) ∝ exp(-y²/2) · (1 + h3 H3(y) + h4 H4(y)),   y = (u - (V + vsyst)/Δv) / (σ/Δv)
//! ```
//!
//! where `Δv` is the velocity scale. `H3`/`H4` are the normalized
//! Gauss-Hermite polynomials. The kernel is normalized by the integral of the
//! Gaussian part, so the Hermite terms change its shape but not the flux.
//!
//! Numerical notes:
//! - each pixel weight is averaged over sub-pixel samples, so dispersions below
//!   one pixel still give a properly shifted kernel
//! - only `±(5σ + 1)` pixels around the centre are kept; the kernel is stored
//!   with its starting offset instead of being padded out to the velocity bounds

use crate::domain::Kinematics;

const SUBSAMPLES: usize = 16;
const HALF_WIDTH_SIGMAS: f64 = 5.0;

/// Sampled LOSVD. `values[i]` is the weight at pixel offset `start + i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    pub start: isize,
    pub values: Vec<f64>,
}

/// Normalized Gauss-Hermite `H3`.
pub fn hermite3(y: f64) -> f64 {
    y * (2.0 * y * y - 3.0) / 3f64.sqrt()
}

/// Normalized Gauss-Hermite `H4`.
pub fn hermite4(y: f64) -> f64 {
    let y2 = y * y;
    (4.0 * y2 * y2 - 12.0 * y2 + 3.0) / 24f64.sqrt()
}

/// Build the LOSVD kernel for `k`, including the template/data offset `vsyst`.
pub fn losvd_kernel(k: &Kinematics, vsyst: f64, velscale: f64) -> Kernel {
    let center = (k.v + vsyst) / velscale;
    let s = (k.sigma / velscale).max(1e-3);
    let half = HALF_WIDTH_SIGMAS * s + 1.0;
    let start = (center - half).floor() as isize;
    let end = (center + half).ceil() as isize;

    let mut values = Vec::with_capacity((end - start + 1) as usize);
    let mut gauss_total = 0.0;
    for u in start..=end {
        let mut g_sum = 0.0;
        let mut w_sum = 0.0;
        for q in 0..SUBSAMPLES {
            let t = u as f64 - 0.5 + (q as f64 + 0.5) / SUBSAMPLES as f64;
            let y = (t - center) / s;
            let g = (-0.5 * y * y).exp();
            g_sum += g;
            w_sum += g * (1.0 + k.h3 * hermite3(y) + k.h4 * hermite4(y));
        }
        gauss_total += g_sum;
        values.push(w_sum);
    }

    if gauss_total > 0.0 {
        for v in values.iter_mut() {
            *v /= gauss_total;
        }
    } else {
        // Narrower than the sub-pixel sampling: a pure shift to the nearest pixel.
        values.iter_mut().for_each(|v| *v = 0.0);
        let nearest = (center.round() as isize - start) as usize;
        values[nearest] = 1.0;
    }

    Kernel { start, values }
}

/// Resample `template` onto data pixels `j -> j + offset` by linear interpolation.
///
/// Used for templates that follow the data grid but are not broadened (sky).
pub fn shift(template: &[f64], offset: f64, npix: usize) -> Vec<f64> {
    let nt = template.len();
    (0..npix)
        .map(|j| {
            let x = j as f64 + offset;
            if x < 0.0 || x > (nt as f64 - 1.0) {
                return 0.0;
            }
            let i0 = x.floor() as usize;
            let frac = x - i0 as f64;
            if i0 + 1 >= nt {
                template[nt - 1]
            } else {
                template[i0] * (1.0 - frac) + template[i0 + 1] * frac
            }
        })
        .collect()
}

/// Convolve `template` with `kernel`, producing `npix` output pixels.
///
/// Output pixel `j` sees template pixel `j - u` for every kernel offset `u`;
/// template samples outside the array contribute zero.
pub fn convolve(template: &[f64], kernel: &Kernel, npix: usize) -> Vec<f64> {
    let nt = template.len() as isize;
    let mut out = vec![0.0; npix];
    for (j, o) in out.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (i, &w) in kernel.values.iter().enumerate() {
            let idx = j as isize - (kernel.start + i as isize);
            if idx >= 0 && idx < nt {
                acc += w * template[idx as usize];
            }
        }
        *o = acc;
    }
    out
}
