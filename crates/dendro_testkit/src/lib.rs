//! # dendro Testkit
//!
//! Test utilities for dendro.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Property-based test generators using proptest
//! - Cross-crate scenario tests for the engine's core guarantees
//!
//! ## Usage
//!
//! ```rust
//! use dendro_testkit::prelude::*;
//!
//! let db = TestDatabase::memory();
//! let resource = xml_resource(&db, "sample", dendro_core::HashStrategy::Rolling);
//! let tree = build_sample_tree(&resource);
//! assert_eq!(tree.revision.as_u64(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod scenarios;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
