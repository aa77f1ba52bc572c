//! The remote service the pipeline reads from.
//!
//! The orchestrator only sees the [`RemoteSource`] trait. Implementations
//! classify every failure into a [`StageError`] so the retry evaluator can
//! decide what to do with it.

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpSource;

use async_trait::async_trait;

use crate::core::{Identifier, RawRecord};
use crate::errors::StageError;

/// A remote service exposing a listing and per-identifier records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Returns identifiers in the order the service lists them.
    async fn list_identifiers(&self) -> Result<Vec<Identifier>, StageError>;

    /// Fetches the raw record for one identifier.
    async fn fetch_record(&self, identifier: &Identifier) -> Result<RawRecord, StageError>;
}
