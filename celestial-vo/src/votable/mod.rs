//! Tabular query results and the VOTable interchange format.
//!
//! Registry, cone search and TAP services all answer with VOTable documents.
//! Only the `TABLEDATA` serialization is handled; services are asked for it
//! explicitly where the protocol allows.
//!
//! - [`reader`]: [`parse_votable`] into a [`ResultTable`]
//! - [`writer`]: [`write_votable`] for TAP uploads

pub mod reader;
pub mod writer;

pub use reader::parse_votable;
pub use writer::write_votable;

use serde::Serialize;
use std::fmt;

use crate::errors::{VoError, VoResult};
use crate::schema::{ColumnDescriptor, TableSchema};

/// A single typed cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Whether the service delivered every matching row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    #[default]
    Ok,
    /// The result was truncated (row limit or timeout on the service side).
    Overflow,
}

/// Rows of typed values aligned with a column list.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResultTable {
    pub name: Option<String>,
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<Value>>,
    pub status: QueryStatus,
}

impl ResultTable {
    /// Builds a table, checking every row has one value per column.
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<Value>>) -> VoResult<Self> {
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(VoError::votable(format!(
                "row {} has {} values, expected {}",
                index,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self {
            name: None,
            columns,
            rows,
            status: QueryStatus::Ok,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// False when the service reported an overflow.
    pub fn is_complete(&self) -> bool {
        self.status == QueryStatus::Ok
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// All values of one column, or `None` for an unknown column.
    pub fn column_values(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[index]))
    }

    /// Column metadata as a schema, carrying whatever UCDs the service propagated.
    pub fn schema(&self, service_id: &str) -> VoResult<TableSchema> {
        TableSchema::new(
            service_id,
            self.name.clone().unwrap_or_default(),
            self.columns.clone(),
        )
    }
}
