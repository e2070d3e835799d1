//! Test support utilities for the key file workspace.
//!
//! This crate provides testing infrastructure including:
//! - Temporary key files that clean up after themselves
//! - Record builders and stock key definitions
//! - Property-based test generators for key words and operation sequences
//! - Assertion helpers that walk and verify whole indexes
//!
//! # Example Usage
//!
//! ```no_run
//! use testsupport::prelude::*;
//!
//! let mut fixture = TestKeyFile::new(vec![numeric_key("by_id", true, &small_pages())]);
//! for n in 1..=10 {
//!     fixture.file.insert(0, &numeric_record(n, 6), RecordPointer(n)).unwrap();
//! }
//! assert_walk(&mut fixture.file, 0, &(1..=10).map(RecordPointer).collect::<Vec<_>>());
//! ```

pub mod assertions;
pub mod fixtures;
pub mod proptest_generators;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::fixtures::*;
    pub use btree::{Direction, KeyFile, KeyLength, ReadMode};
    pub use common::{Config, IndexError, RecordPointer};
}
