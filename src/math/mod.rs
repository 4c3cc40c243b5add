//! Mathematical utilities: Legendre bases, (non-negative) least squares, robust stats.

pub mod legendre;
pub mod ols;
pub mod stats;

pub use legendre::*;
pub use ols::*;
pub use stats::*;
