//! Template matrix and design-matrix layout.
//!
//! The fitter solves for one weight per column of
//!
//! ```text
//! [ additive Legendre P_0..P_degree | stars | gas | sky ]
//! ```
//!
//! in that fixed order. [`DesignLayout`] records the group sizes so that the
//! result decomposer can slice the matrix and weight vector back into
//! physical components.

use std::ops::Range;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::ComponentCount;
use crate::error::AppError;
use crate::io::templates::TemplateBank;

/// Column group sizes of the design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignLayout {
    pub degree: usize,
    pub n_stars: usize,
    pub n_gas: usize,
    pub n_sky: usize,
}

impl DesignLayout {
    pub fn n_poly(&self) -> usize {
        self.degree + 1
    }

    /// Templates that are convolved with an LOSVD (stars + gas).
    pub fn n_kinematic(&self) -> usize {
        self.n_stars + self.n_gas
    }

    pub fn n_weights(&self) -> usize {
        self.n_stars + self.n_gas + self.n_sky
    }

    pub fn n_columns(&self) -> usize {
        self.n_poly() + self.n_weights()
    }

    pub fn poly_range(&self) -> Range<usize> {
        0..self.n_poly()
    }

    pub fn stars_range(&self) -> Range<usize> {
        let s = self.n_poly();
        s..s + self.n_stars
    }

    pub fn gas_range(&self) -> Range<usize> {
        let s = self.n_poly() + self.n_stars;
        s..s + self.n_gas
    }

    pub fn sky_range(&self) -> Range<usize> {
        let s = self.n_poly() + self.n_kinematic();
        s..s + self.n_sky
    }

    /// Stellar slice of the template weight vector (which excludes polynomials).
    pub fn stars_weight_range(&self) -> Range<usize> {
        0..self.n_stars
    }

    pub fn gas_weight_range(&self) -> Range<usize> {
        self.n_stars..self.n_kinematic()
    }

    pub fn sky_weight_range(&self) -> Range<usize> {
        self.n_kinematic()..self.n_weights()
    }
}

/// Templates of one batch, on the bank's log-wavelength grid.
#[derive(Debug, Clone)]
pub struct TemplateMatrix {
    pub log_wave: Vec<f64>,
    /// Stars then gas, one flux vector per template.
    pub templates: Vec<Vec<f64>>,
    /// Kinematic component of each entry in `templates` (0 = stars, 1 = gas).
    pub component: Vec<usize>,
    /// Sky templates; shifted onto the data grid but never broadened.
    pub sky: Vec<Vec<f64>>,
    pub n_stars: usize,
    pub n_gas: usize,
    /// Original bank index of each stellar template.
    pub star_index: Vec<usize>,
}

impl TemplateMatrix {
    pub fn layout(&self, degree: usize) -> DesignLayout {
        DesignLayout {
            degree,
            n_stars: self.n_stars,
            n_gas: self.n_gas,
            n_sky: self.sky.len(),
        }
    }

    pub fn n_components(&self) -> usize {
        self.component.iter().copied().max().map_or(0, |m| m + 1)
    }

    /// Stacked `n_pix x (stars + gas)` matrix on the template grid.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.log_wave.len(), self.templates.len(), |i, j| self.templates[j][i])
    }
}

/// Stack the bank's templates for the requested number of kinematic components.
pub fn build_template_matrix(bank: &TemplateBank, ncomp: ComponentCount) -> Result<TemplateMatrix, AppError> {
    bank.validate()?;

    let n_stars = bank.stars.len();
    let mut templates = bank.stars.clone();
    let mut component = vec![0usize; n_stars];

    let n_gas = match ncomp {
        ComponentCount::One => 0,
        ComponentCount::Two => {
            if bank.gas.is_empty() {
                return Err(AppError::config(
                    "Two kinematic components requested but the template bank has no gas templates.",
                ));
            }
            templates.extend(bank.gas.iter().cloned());
            component.extend(std::iter::repeat(1).take(bank.gas.len()));
            bank.gas.len()
        }
    };

    Ok(TemplateMatrix {
        log_wave: bank.log_wave.clone(),
        templates,
        component,
        sky: bank.sky.clone(),
        n_stars,
        n_gas,
        star_index: bank.params.iter().map(|p| p.index).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::templates::TemplateParams;

    fn bank() -> TemplateBank {
        TemplateBank {
            log_wave: vec![8.0, 8.001, 8.002],
            stars: vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
            gas: vec![vec![0.0, 1.0, 0.0]],
            sky: vec![vec![0.1, 0.1, 0.1]],
            params: vec![
                TemplateParams { index: 4, values: Default::default() },
                TemplateParams { index: 9, values: Default::default() },
            ],
        }
    }

    #[test]
    fn layout_column_count_and_ranges() {
        let layout = DesignLayout { degree: 4, n_stars: 10, n_gas: 3, n_sky: 2 };
        assert_eq!(layout.n_columns(), 5 + 10 + 3 + 2);
        assert_eq!(layout.stars_range(), 5..15);
        assert_eq!(layout.gas_range(), 15..18);
        assert_eq!(layout.sky_range(), 18..20);
        assert_eq!(layout.gas_weight_range(), 10..13);
    }

    #[test]
    fn one_component_uses_stars_only() {
        let tm = build_template_matrix(&bank(), ComponentCount::One).unwrap();
        assert_eq!(tm.templates.len(), 2);
        assert_eq!(tm.component, vec![0, 0]);
        assert_eq!(tm.n_components(), 1);
        assert_eq!(tm.star_index, vec![4, 9]);
        assert_eq!(tm.layout(2).n_columns(), 3 + 2 + 1);
    }

    #[test]
    fn two_components_append_gas_with_label_one() {
        let tm = build_template_matrix(&bank(), ComponentCount::Two).unwrap();
        assert_eq!(tm.component, vec![0, 0, 1]);
        assert_eq!(tm.n_gas, 1);
        let m = tm.to_matrix();
        assert_eq!(m.shape(), (3, 3));
        assert_eq!(m[(1, 2)], 1.0);
        assert_eq!(m[(2, 1)], 6.0);
    }

    #[test]
    fn two_components_without_gas_is_config_error() {
        let mut b = bank();
        b.gas.clear();
        let err = build_template_matrix(&b, ComponentCount::Two).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
