//! Input/output helpers.
//!
//! - spectrum CSV ingest + cleaning (`ingest`)
//! - template bank files and subsampling (`templates`)
//! - per-spectrum fit outputs (`results`)
//! - batch summary export (`export`)
//! - atomic file replacement used by all writers (`atomic`)

pub mod atomic;
pub mod export;
pub mod ingest;
pub mod results;
pub mod templates;

pub use export::*;
pub use ingest::*;
pub use results::*;
pub use templates::*;
