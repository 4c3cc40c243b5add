//! Kinematic fitting.
//!
//! Responsibilities:
//!
//! - stack templates and describe the design-matrix layout (`design`)
//! - search LOSVD parameters behind the `KinematicFitter` seam (`fitter`, `grid`)
//! - fit one prepared spectrum end to end (`orchestrator`)
//! - split the best fit into physical components and estimate S/N (`decompose`)

pub mod decompose;
pub mod design;
pub mod fitter;
pub mod grid;
pub mod orchestrator;
pub mod result;

pub use decompose::*;
pub use design::*;
pub use fitter::*;
pub use grid::*;
pub use orchestrator::*;
pub use result::*;
