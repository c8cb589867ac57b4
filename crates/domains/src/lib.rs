//! crates/domains/src/lib.rs
//!
//! Models, errors and port definitions for the admission pipeline.
//! No I/O lives here.

pub mod errors;
pub mod models;
pub mod ports;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exporting for easier access in other crates
pub use errors::*;
pub use models::*;
pub use ports::*;
