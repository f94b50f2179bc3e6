//! Column, table and service metadata.
//!
//! These are read-only snapshots of what a registry or a TAP service reported.
//! A column's UCD is optional: publishers are not required to tag columns, and
//! every consumer must branch on its presence.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::{VoError, VoResult};

/// Metadata for one column of a table or query result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name, unique within its table.
    pub name: String,
    /// Unified Content Descriptor, e.g. `pos.eq.ra;meta.main`.
    pub ucd: Option<String>,
    pub description: Option<String>,
    /// VOTable datatype (`double`, `char`, ...), when known.
    pub datatype: Option<String>,
    pub arraysize: Option<String>,
    pub unit: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_ucd(mut self, ucd: impl Into<String>) -> Self {
        self.ucd = Some(ucd.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_datatype(mut self, datatype: impl Into<String>) -> Self {
        self.datatype = Some(datatype.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Ordered column metadata of one table on one service.
///
/// Deserialization goes through [`TableSchema::new`], so duplicate column
/// names are rejected there too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TableSchemaRecord")]
pub struct TableSchema {
    /// Identifier of the owning service (its IVOID or access URL).
    pub service_id: String,
    /// Qualified table name, e.g. `ivoa.obscore`.
    pub table_name: String,
    pub description: Option<String>,
    columns: Vec<ColumnDescriptor>,
}

#[derive(Deserialize)]
struct TableSchemaRecord {
    service_id: String,
    table_name: String,
    #[serde(default)]
    description: Option<String>,
    columns: Vec<ColumnDescriptor>,
}

impl TryFrom<TableSchemaRecord> for TableSchema {
    type Error = VoError;

    fn try_from(record: TableSchemaRecord) -> VoResult<Self> {
        let schema = TableSchema::new(record.service_id, record.table_name, record.columns)?;
        Ok(match record.description {
            Some(description) => schema.with_description(description),
            None => schema,
        })
    }
}

impl TableSchema {
    /// Builds a schema, rejecting duplicate column names.
    pub fn new(
        service_id: impl Into<String>,
        table_name: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
    ) -> VoResult<Self> {
        let table_name = table_name.into();
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(VoError::InvalidSchema {
                    table: table_name,
                    message: format!("duplicate column '{}'", column.name),
                });
            }
        }

        Ok(Self {
            service_id: service_id.into(),
            table_name,
            description: None,
            columns,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Service protocol, identified in the registry by its IVOA standard id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    ConeSearch,
    TableAccess,
    Image,
    Spectral,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::ConeSearch,
        ServiceKind::TableAccess,
        ServiceKind::Image,
        ServiceKind::Spectral,
    ];

    /// Lower-cased IVOA standard id of the capability.
    pub fn standard_id(self) -> &'static str {
        match self {
            ServiceKind::ConeSearch => "ivo://ivoa.net/std/conesearch",
            ServiceKind::TableAccess => "ivo://ivoa.net/std/tap",
            ServiceKind::Image => "ivo://ivoa.net/std/sia",
            ServiceKind::Spectral => "ivo://ivoa.net/std/ssa",
        }
    }

    /// Maps a registry `standard_id` (possibly versioned or `#aux`) back to a kind.
    pub fn from_standard_id(standard_id: &str) -> Option<Self> {
        let lowered = standard_id.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| lowered.starts_with(kind.standard_id()))
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::ConeSearch => "cone-search",
            ServiceKind::TableAccess => "table-access",
            ServiceKind::Image => "image",
            ServiceKind::Spectral => "spectral",
        };
        f.write_str(name)
    }
}

impl FromStr for ServiceKind {
    type Err = VoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cone-search" | "conesearch" | "scs" | "cone" => Ok(ServiceKind::ConeSearch),
            "table-access" | "tap" => Ok(ServiceKind::TableAccess),
            "image" | "sia" => Ok(ServiceKind::Image),
            "spectral" | "ssa" => Ok(ServiceKind::Spectral),
            other => Err(VoError::invalid_argument(format!(
                "unknown service kind '{}'",
                other
            ))),
        }
    }
}

/// A data service as described by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub ivoid: String,
    pub title: String,
    pub description: Option<String>,
    pub kind: ServiceKind,
    /// Base URL: the cone search endpoint, or the TAP root (without `/sync`).
    pub access_url: String,
}

impl ServiceDescriptor {
    pub fn new(
        ivoid: impl Into<String>,
        title: impl Into<String>,
        kind: ServiceKind,
        access_url: impl Into<String>,
    ) -> Self {
        Self {
            ivoid: ivoid.into(),
            title: title.into(),
            description: None,
            kind,
            access_url: access_url.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_column_names_rejected() {
        let result = TableSchema::new(
            "ivo://example/tap",
            "cat.main",
            vec![ColumnDescriptor::new("ra"), ColumnDescriptor::new("ra")],
        );
        match result {
            Err(VoError::InvalidSchema { table, message }) => {
                assert_eq!(table, "cat.main");
                assert!(message.contains("'ra'"));
            }
            other => panic!("expected InvalidSchema, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_rejects_duplicate_columns() {
        let json = r#"{
            "service_id": "ivo://example/tap",
            "table_name": "cat.main",
            "description": null,
            "columns": [{"name": "ra"}, {"name": "ra"}]
        }"#;
        let err = serde_json::from_str::<TableSchema>(json).unwrap_err();
        assert!(err.to_string().contains("duplicate column 'ra'"));
    }

    #[test]
    fn test_json_round_trip_keeps_columns() {
        let schema = TableSchema::new(
            "ivo://example/tap",
            "cat.main",
            vec![
                ColumnDescriptor::new("ra").with_ucd("pos.eq.ra"),
                ColumnDescriptor::new("dec").with_ucd("pos.eq.dec"),
            ],
        )
        .unwrap()
        .with_description("Main catalogue");
        let json = serde_json::to_string(&schema).unwrap();
        let back: TableSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn test_column_lookup_by_name() {
        let schema = TableSchema::new(
            "svc",
            "t",
            vec![
                ColumnDescriptor::new("ra").with_ucd("pos.eq.ra"),
                ColumnDescriptor::new("dec"),
            ],
        )
        .unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(
            schema.column("ra").and_then(|c| c.ucd.as_deref()),
            Some("pos.eq.ra")
        );
        assert!(schema.column("dec").unwrap().ucd.is_none());
        assert!(schema.column("mag").is_none());
    }

    #[test]
    fn test_service_kind_from_standard_id() {
        assert_eq!(
            ServiceKind::from_standard_id("ivo://ivoa.net/std/TAP"),
            Some(ServiceKind::TableAccess)
        );
        assert_eq!(
            ServiceKind::from_standard_id("ivo://ivoa.net/std/tap#aux"),
            Some(ServiceKind::TableAccess)
        );
        assert_eq!(
            ServiceKind::from_standard_id("ivo://ivoa.net/std/ConeSearch"),
            Some(ServiceKind::ConeSearch)
        );
        assert_eq!(ServiceKind::from_standard_id("ivo://ivoa.net/std/vosi#tables"), None);
    }

    #[test]
    fn test_service_kind_parse_and_display() {
        for kind in ServiceKind::ALL {
            assert_eq!(kind.to_string().parse::<ServiceKind>().unwrap(), kind);
        }
        assert_eq!("tap".parse::<ServiceKind>().unwrap(), ServiceKind::TableAccess);
        assert!("radio".parse::<ServiceKind>().is_err());
    }
}
