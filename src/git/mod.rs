//! Git operations using git2-rs.

pub mod staged;

pub use staged::{StagedDiff, open_repository, read_diff_from, read_staged_diff};
