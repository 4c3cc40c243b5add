//! Physical model pieces shared by the fitter and the result decomposer.
//!
//! Kept as small, pure functions so that fitting code can stay generic.

pub mod extinction;
pub mod losvd;

pub use extinction::*;
pub use losvd::*;
