//! # LUKS2 Testkit
//!
//! Test utilities for the LUKS2 header crates.
//!
//! This crate provides:
//! - A storage wrapper that simulates crashes and failed syncs
//! - A harness that interrupts header commits at every byte boundary
//! - Fixtures for formatted volumes and damaged slots
//! - Property-based generators for segments and segment collections
//!
//! ## Usage
//!
//! ```rust,ignore
//! use luks2_testkit::prelude::*;
//!
//! #[test]
//! fn survives_torn_commit() {
//!     let mut harness = CrashRecoveryHarness::new();
//!     harness.run_all_tests();
//!     assert!(harness.all_passed(), "{}", harness.summary());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
