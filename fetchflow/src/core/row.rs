//! Projected rows and the ordered batch result.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::Identifier;

/// A fixed-shape row projected from a valid raw record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectedRow {
    identifier: Identifier,
    values: Vec<String>,
}

impl ProjectedRow {
    /// Creates a row for the given identifier.
    #[must_use]
    pub const fn new(identifier: Identifier, values: Vec<String>) -> Self {
        Self { identifier, values }
    }

    /// The identifier this row was fetched for.
    #[must_use]
    pub const fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Column values in projection order.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Ordered rows produced by the fetch stage.
///
/// Row order is identifier processing order. Failed identifiers are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    columns: Vec<String>,
    rows: Vec<ProjectedRow>,
}

impl BatchResult {
    /// Creates an empty result with the given column names.
    #[must_use]
    pub const fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Creates a result from previously produced rows.
    #[must_use]
    pub const fn from_rows(columns: Vec<String>, rows: Vec<ProjectedRow>) -> Self {
        Self { columns, rows }
    }

    pub(crate) fn push(&mut self, row: ProjectedRow) {
        self.rows.push(row);
    }

    /// Column names in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in processing order.
    #[must_use]
    pub fn rows(&self) -> &[ProjectedRow] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no rows were produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Identifiers of the rows, in order.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&Identifier> {
        self.rows.iter().map(ProjectedRow::identifier).collect()
    }

    /// Position of a column by name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of `column` in `row`.
    #[must_use]
    pub fn value<'a>(&self, row: &'a ProjectedRow, column: &str) -> Option<&'a str> {
        self.column_index(column)
            .and_then(|i| row.values.get(i))
            .map(String::as_str)
    }

    /// Returns a ranked copy holding at most `limit` rows.
    ///
    /// Rows are ordered by `column` parsed as a number, descending. Ties keep
    /// processing order. Unparsable and non-finite values sort last. The
    /// receiver is not modified.
    #[must_use]
    pub fn top_by(&self, column: &str, limit: usize) -> Self {
        let Some(index) = self.column_index(column) else {
            return Self::from_rows(
                self.columns.clone(),
                self.rows.iter().take(limit).cloned().collect(),
            );
        };

        let mut ranked: Vec<(Option<f64>, &ProjectedRow)> = self
            .rows
            .iter()
            .map(|row| {
                let key = row
                    .values
                    .get(index)
                    .and_then(|v| v.trim().parse::<f64>().ok())
                    .filter(|v| v.is_finite());
                (key, row)
            })
            .collect();

        ranked.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) => b.total_cmp(a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        Self::from_rows(
            self.columns.clone(),
            ranked.into_iter().take(limit).map(|(_, row)| row.clone()).collect(),
        )
    }
}
