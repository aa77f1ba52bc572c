//! Projection of raw records into fixed-shape rows.
//!
//! A [`Projection`] is the required-field contract of the fetch stage: a raw
//! record that cannot fill every column is a `MalformedResponse` and never
//! produces a row.

use serde::{Deserialize, Serialize};

use crate::core::{Identifier, ProjectedRow, RawRecord};
use crate::errors::{ConfigError, StageError};

mod template;

pub use template::LinkTemplate;

/// Where a column's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSource {
    /// Dotted path into the raw record.
    Field(String),
    /// Link built from the identifier and other record fields.
    Template(String),
}

/// One output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name in the result.
    pub name: String,
    /// Value source.
    #[serde(flatten)]
    pub source: ColumnSource,
}

impl Column {
    /// Column read from a record field.
    pub fn field(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ColumnSource::Field(path.into()),
        }
    }

    /// Column rendered from a link template.
    pub fn template(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ColumnSource::Template(pattern.into()),
        }
    }
}

#[derive(Debug, Clone)]
enum CompiledSource {
    Field(String),
    Template(LinkTemplate),
}

/// The fixed set of columns every row must fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<Column>", into = "Vec<Column>")]
pub struct Projection {
    columns: Vec<Column>,
    compiled: Vec<CompiledSource>,
}

impl PartialEq for Projection {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Projection {
    /// Validates and compiles a list of columns.
    pub fn new(columns: Vec<Column>) -> Result<Self, ConfigError> {
        if columns.is_empty() {
            return Err(ConfigError::invalid("projection", "at least one column is required"));
        }

        let mut compiled = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            if column.name.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("projection[{i}].name"),
                    "column name must not be empty",
                ));
            }
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(ConfigError::invalid(
                    format!("projection[{i}].name"),
                    format!("duplicate column '{}'", column.name),
                ));
            }
            compiled.push(match &column.source {
                ColumnSource::Field(path) => {
                    if path.is_empty() || path.split('.').any(str::is_empty) {
                        return Err(ConfigError::invalid(
                            format!("projection[{i}].field"),
                            format!("'{path}' is not a valid field path"),
                        ));
                    }
                    CompiledSource::Field(path.clone())
                }
                ColumnSource::Template(pattern) => CompiledSource::Template(
                    LinkTemplate::parse(pattern)
                        .map_err(|reason| ConfigError::invalid(format!("projection[{i}].template"), reason))?,
                ),
            });
        }

        Ok(Self { columns, compiled })
    }

    /// Title, attribution and link of a community forum topic.
    #[must_use]
    pub fn community_posts() -> Self {
        Self::from_trusted(vec![
            Column::field("title", "title"),
            Column::field("attribution", "details.created_by.username"),
            Column::template("link", "https://community.temporal.io/t/{slug}/{id}"),
        ])
    }

    /// [`Projection::community_posts`] plus the topic view count.
    #[must_use]
    pub fn community_posts_with_views() -> Self {
        let mut columns = Self::community_posts().columns;
        columns.push(Column::field("views", "views"));
        Self::from_trusted(columns)
    }

    fn from_trusted(columns: Vec<Column>) -> Self {
        let compiled = columns
            .iter()
            .map(|c| match &c.source {
                ColumnSource::Field(path) => CompiledSource::Field(path.clone()),
                ColumnSource::Template(pattern) => CompiledSource::Template(
                    LinkTemplate::parse(pattern).unwrap_or_else(|_| LinkTemplate::literal(pattern)),
                ),
            })
            .collect();
        Self { columns, compiled }
    }

    /// Columns in output order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in output order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Projects a raw record, or reports which required field is unusable.
    pub fn project(
        &self,
        identifier: &Identifier,
        record: &RawRecord,
    ) -> Result<ProjectedRow, StageError> {
        let mut values = Vec::with_capacity(self.compiled.len());
        for (column, source) in self.columns.iter().zip(&self.compiled) {
            let value = match source {
                CompiledSource::Field(path) => field_text(record, path),
                CompiledSource::Template(template) => {
                    template.render(identifier, |path| field_text(record, path))
                }
            };
            match value {
                Ok(text) => values.push(text),
                Err(path) => {
                    return Err(StageError::malformed(format!(
                        "record {identifier} missing required field '{path}' for column '{}'",
                        column.name
                    )));
                }
            }
        }
        Ok(ProjectedRow::new(identifier.clone(), values))
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self::community_posts()
    }
}

impl TryFrom<Vec<Column>> for Projection {
    type Error = ConfigError;

    fn try_from(columns: Vec<Column>) -> Result<Self, Self::Error> {
        Self::new(columns)
    }
}

impl From<Projection> for Vec<Column> {
    fn from(projection: Projection) -> Self {
        projection.columns
    }
}

/// Renders a scalar field as text; on failure returns the offending path.
fn field_text(record: &RawRecord, path: &str) -> Result<String, String> {
    match record.get_path(path) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Ok(b.to_string()),
        _ => Err(path.to_string()),
    }
}
