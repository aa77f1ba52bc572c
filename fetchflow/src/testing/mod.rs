//! Testing utilities for fetchflow pipelines.
//!
//! This module provides:
//! - A scriptable in-memory [`RemoteSource`](crate::source::RemoteSource)
//! - Forum-shaped record fixtures
//! - Assertions over batch results

mod assertions;
pub mod fixtures;
mod mocks;

pub use assertions::{assert_dropped, assert_no_drops, assert_rows_for};
pub use fixtures::{int_ids, listing, topic_record, topic_record_with};
pub use mocks::StubSource;
