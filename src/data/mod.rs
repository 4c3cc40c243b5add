//! Synthetic data for dry runs and tests.

pub mod sample;

pub use sample::*;
