//! Per-spectrum preparation: log rebinning and good-pixel masks.

pub mod mask;
pub mod rebin;

pub use mask::*;
pub use rebin::*;
