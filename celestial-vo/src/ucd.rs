//! Resolve columns by their Unified Content Descriptor.
//!
//! Tables from different publishers name the same quantity differently
//! (`ra`, `RAJ2000`, `s_ra`, ...) but usually tag it with the same UCD. The
//! functions here map a requested UCD to concrete column names so one query
//! template can be applied across heterogeneous tables.
//!
//! # Matching rules
//!
//! - A column matches when its UCD is present and contains the requested tag
//!   as a case-sensitive substring. Untagged columns never match.
//! - Matching is not hierarchy aware: `pos.eq.ra` also matches a column
//!   tagged `pos.eq.ra.err`. This imprecision is a known limitation and is
//!   left visible to callers rather than special-cased.
//! - Several columns may carry the same tag. [`first_match`] picks the first
//!   in schema order; nothing makes that column semantically "best".
//!
//! All functions are pure over an in-memory [`TableSchema`].

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::schema::TableSchema;

/// Requested tag mapped to the chosen column name.
pub type ColumnMapping = BTreeMap<String, String>;

/// Tags needed for the positional time-interval sweep.
pub const POSITION_INTERVAL_TAGS: [&str; 4] = ["pos.eq.ra", "pos.eq.dec", "time.start", "time.end"];

/// Names of all columns whose UCD contains `tag`, in schema order.
pub fn resolve_by_tag<'a>(schema: &'a TableSchema, tag: &str) -> Vec<&'a str> {
    schema
        .columns()
        .iter()
        .filter(|column| column.ucd.as_deref().is_some_and(|ucd| ucd.contains(tag)))
        .map(|column| column.name.as_str())
        .collect()
}

/// Tie-break policy for a tag shared by several columns: the first candidate wins.
pub fn first_match<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    candidates.first().copied()
}

/// The single column chosen for `tag`, or `None` when no column carries it.
pub fn resolve_first_by_tag<'a>(schema: &'a TableSchema, tag: &str) -> Option<&'a str> {
    let candidates = resolve_by_tag(schema, tag);
    let chosen = first_match(&candidates);
    if candidates.len() > 1 {
        debug!(
            service = %schema.service_id,
            table = %schema.table_name,
            tag,
            candidates = ?candidates,
            chosen = ?chosen,
            "UCD matches several columns, taking the first"
        );
    }
    chosen
}

/// Resolves every tag or nothing.
///
/// Returns `None` as soon as one tag has no matching column; a table missing
/// any required tag is not usable for a generic query.
pub fn resolve_required_set<S: AsRef<str>>(schema: &TableSchema, tags: &[S]) -> Option<ColumnMapping> {
    let mut mapping = ColumnMapping::new();
    for tag in tags {
        let tag = tag.as_ref();
        let column = resolve_first_by_tag(schema, tag)?;
        mapping.insert(tag.to_string(), column.to_string());
    }
    Some(mapping)
}

/// Tags from `tags` that no column of `schema` carries.
pub fn missing_tags<S: AsRef<str>>(schema: &TableSchema, tags: &[S]) -> Vec<String> {
    tags.iter()
        .map(|tag| tag.as_ref())
        .filter(|tag| resolve_by_tag(schema, tag).is_empty())
        .map(str::to_string)
        .collect()
}

/// How a single tag resolved against a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TagResolution {
    Absent,
    Unique { column: String },
    Ambiguous { chosen: String, others: Vec<String> },
}

/// Per-tag resolution report, in request order.
pub fn audit_tags<S: AsRef<str>>(schema: &TableSchema, tags: &[S]) -> Vec<(String, TagResolution)> {
    tags.iter()
        .map(|tag| {
            let tag = tag.as_ref();
            let candidates = resolve_by_tag(schema, tag);
            let resolution = match (first_match(&candidates), candidates.len()) {
                (None, _) => TagResolution::Absent,
                (Some(column), 1) => TagResolution::Unique {
                    column: column.to_string(),
                },
                (Some(chosen), _) => TagResolution::Ambiguous {
                    chosen: chosen.to_string(),
                    others: candidates[1..].iter().map(|c| c.to_string()).collect(),
                },
            };
            (tag.to_string(), resolution)
        })
        .collect()
}
