//! Dust attenuation curves.

/// Total-to-selective extinction ratio of the Calzetti (2000) law.
pub const CALZETTI_RV: f64 = 4.05;

/// Calzetti et al. (2000) attenuation factor `10^(-0.4 E(B-V) k(λ))`.
///
/// `lam` is in angstrom. The curve is applied as a multiplicative factor to
/// the template spectra.
pub fn reddening_cal00(lam: &[f64], ebv: f64) -> Vec<f64> {
    lam.iter()
        .map(|&l| {
            let x = 1.0e4 / l; // inverse micrometer
            let k = if l / 1.0e4 < 0.63 {
                2.659 * (-2.156 + 1.509 * x - 0.198 * x * x + 0.011 * x * x * x) + CALZETTI_RV
            } else {
                2.659 * (-1.857 + 1.040 * x) + CALZETTI_RV
            };
            10f64.powf(-0.4 * ebv * k)
        })
        .collect()
}
