//! Assertions over batch results and failure summaries.

use crate::core::{BatchResult, Identifier};
use crate::errors::ErrorClass;
use crate::pipeline::FailureSummary;

/// Asserts that the result holds rows for exactly these identifiers, in order.
pub fn assert_rows_for(result: &BatchResult, expected: &[Identifier]) {
    let actual: Vec<&Identifier> = result.identifiers();
    let expected: Vec<&Identifier> = expected.iter().collect();
    assert_eq!(
        actual, expected,
        "Expected rows for {expected:?}, got {actual:?}"
    );
}

/// Asserts that `identifier` was dropped with the given classification.
pub fn assert_dropped(summary: &FailureSummary, identifier: &Identifier, class: ErrorClass) {
    let record = summary
        .failures
        .iter()
        .find(|f| &f.identifier == identifier);
    match record {
        Some(record) => assert_eq!(
            record.classification, class,
            "Identifier {identifier} dropped as {:?}, expected {class:?}",
            record.classification
        ),
        None => panic!(
            "Expected {identifier} to be dropped; dropped were {:?}",
            summary.dropped_identifiers()
        ),
    }
}

/// Asserts that nothing was dropped.
pub fn assert_no_drops(summary: &FailureSummary) {
    assert!(
        !summary.has_failures(),
        "Expected no dropped identifiers, got {:?}",
        summary.dropped_identifiers()
    );
}
