//! Good-pixel selection.
//!
//! A pixel enters the fit unless it falls inside a sky-emission window or its
//! flux is NaN. Windows are closed intervals `[line - half, line + half]`.

/// Bright sky/telluric emission lines (Å) excluded from every fit.
pub const SKY_LINES: [f64; 5] = [4785.0, 5577.0, 5889.0, 6300.0, 6863.0];

/// Half-width (Å) of the exclusion window around each sky line.
pub const SKY_HALF_WIDTH: f64 = 15.0;

/// Sorted indices of pixels to include, using the default sky-line list.
pub fn good_pixels(lam: &[f64], flux: &[f64]) -> Vec<usize> {
    good_pixels_with(lam, flux, &SKY_LINES, SKY_HALF_WIDTH)
}

/// Sorted indices of pixels outside every `lines` window whose flux is not NaN.
pub fn good_pixels_with(lam: &[f64], flux: &[f64], lines: &[f64], half_width: f64) -> Vec<usize> {
    lam.iter()
        .zip(flux)
        .enumerate()
        .filter(|(_, (l, f))| {
            !f.is_nan() && !lines.iter().any(|line| (**l - line).abs() <= half_width)
        })
        .map(|(i, _)| i)
        .collect()
}

/// Boolean mask (1 = used) of length `n` from a sorted index list.
pub fn mask_from_indices(n: usize, indices: &[usize]) -> Vec<bool> {
    let mut mask = vec![false; n];
    for &i in indices {
        if i < n {
            mask[i] = true;
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 4000.0 + 3000.0 * i as f64 / (n as f64 - 1.0))
            .collect()
    }

    #[test]
    fn single_sky_line_window_is_excluded() {
        let lam = grid(3000);
        let flux = vec![1.0; lam.len()];
        let good = good_pixels_with(&lam, &flux, &[5577.0], 15.0);

        for (i, &l) in lam.iter().enumerate() {
            let inside = (5562.0..=5592.0).contains(&l);
            assert_eq!(good.binary_search(&i).is_ok(), !inside, "pixel {i} at {l}");
        }
    }

    #[test]
    fn nan_flux_is_excluded_and_output_is_sorted() {
        let lam = grid(3000);
        let mut flux = vec![1.0; lam.len()];
        flux[10] = f64::NAN;
        flux[2999] = f64::NAN;
        let good = good_pixels(&lam, &flux);
        assert!(!good.contains(&10));
        assert!(!good.contains(&2999));
        assert!(good.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn line_order_does_not_matter() {
        let lam = grid(3000);
        let flux = vec![1.0; lam.len()];
        let mut reversed = SKY_LINES;
        reversed.reverse();
        assert_eq!(
            good_pixels(&lam, &flux),
            good_pixels_with(&lam, &flux, &reversed, SKY_HALF_WIDTH)
        );
    }

    #[test]
    fn boolean_mask_roundtrips_indices() {
        let mask = mask_from_indices(5, &[0, 3]);
        assert_eq!(mask, vec![true, false, false, true, false]);
    }
}
