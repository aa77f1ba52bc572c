//! Pipeline-level cancellation.
//!
//! A run observes its [`CancellationToken`] at every suspension point: each
//! in-flight remote call and each backoff wait.

mod token;

pub use token::CancellationToken;
