//! Virtual Observatory client with UCD-based column resolution.
//!
//! Finds services in a VO registry, inspects the tables they publish, and
//! runs one generic query across many heterogeneous tables by locating
//! columns through their Unified Content Descriptors rather than their names.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`schema`] | [`ColumnDescriptor`], [`TableSchema`], [`ServiceDescriptor`], [`ServiceKind`] |
//! | [`ucd`] | Tag resolution: [`resolve_by_tag`](ucd::resolve_by_tag), [`resolve_first_by_tag`](ucd::resolve_first_by_tag), [`resolve_required_set`](ucd::resolve_required_set), [`audit_tags`](ucd::audit_tags) |
//! | [`votable`] | TABLEDATA VOTable reader/writer and [`ResultTable`] |
//! | [`adql`] | Literal/identifier quoting and query templates |
//! | [`service`] | Registry, cone search and TAP clients |
//! | [`batch`] | Schema snapshot and bounded-pool execution over many tables |
//! | [`config`] | [`ClientConfig`] from JSON and environment |
//! | [`errors`] | [`VoError`], [`TargetFailure`] |
//!
//! # Quick Start
//!
//! ```ignore
//! use celestial_vo::batch::{BatchRunner, SchemaSnapshot};
//! use celestial_vo::service::{HttpClient, RegistryClient, TapClient};
//! use celestial_vo::ucd::POSITION_INTERVAL_TAGS;
//! use celestial_vo::{adql, ClientConfig, ServiceKind};
//!
//! let http = HttpClient::new(ClientConfig::default())?;
//! let services = RegistryClient::new(http.clone())
//!     .search(ServiceKind::TableAccess, &["heasarc".to_string()], false)?;
//!
//! let tap = TapClient::new(http);
//! let snapshot = SchemaSnapshot::fetch(&tap, &services, 4)?;
//! let outcome = BatchRunner::new(tap, 4)?.run(&snapshot, &POSITION_INTERVAL_TAGS, |target, columns| {
//!     adql::positional_interval_query(target.table_name(), columns, 83.63, 22.01, 0.1, 51544.0, 60000.0, None)
//! });
//!
//! let combined = outcome.uniform_table(&POSITION_INTERVAL_TAGS)?;
//! ```
//!
//! # Features
//!
//! - **`cli`**: Enables the `vo` binary.

pub mod adql;
pub mod batch;
pub mod config;
pub mod errors;
pub mod schema;
pub mod service;
pub mod ucd;
pub mod votable;

pub use config::ClientConfig;
pub use errors::{TargetFailure, VoError, VoResult};
pub use schema::{ColumnDescriptor, ServiceDescriptor, ServiceKind, TableSchema};
pub use votable::{ResultTable, Value};
