//! ADQL text construction.
//!
//! Queries are plain string templates. Column names resolved from UCDs and
//! table names from `TAP_SCHEMA` pass through [`quote_identifier`]; string
//! values through [`string_literal`]. Numbers must be finite.

use crate::errors::{VoError, VoResult};
use crate::ucd::ColumnMapping;

/// ADQL string literal: single-quoted, embedded quotes doubled.
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// True for `[A-Za-z][A-Za-z0-9_]*`.
pub fn is_regular_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Emits each dot-separated part as-is when regular, otherwise as a
/// delimited identifier.
///
/// Schema-qualified names such as `ivoa.obscore` stay unquoted; a column
/// named `RA(J2000)` becomes `"RA(J2000)"`.
pub fn quote_identifier(name: &str) -> String {
    if name.starts_with('"') && name.ends_with('"') && name.len() >= 2 {
        return name.to_string();
    }
    if name.split('.').all(is_regular_identifier) {
        return name.to_string();
    }
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn number(value: f64, what: &str) -> VoResult<String> {
    if !value.is_finite() {
        return Err(VoError::invalid_argument(format!(
            "{} must be finite, got {}",
            what, value
        )));
    }
    Ok(format!("{}", value))
}

fn top_clause(top: Option<u64>) -> String {
    top.map(|n| format!("TOP {} ", n)).unwrap_or_default()
}

fn mapped<'a>(mapping: &'a ColumnMapping, tag: &str) -> VoResult<&'a str> {
    mapping
        .get(tag)
        .map(String::as_str)
        .ok_or_else(|| VoError::invalid_argument(format!("no column resolved for '{}'", tag)))
}

/// Rows of `table` whose position lies within `radius` degrees of (`ra`, `dec`).
pub fn cone_query(
    table: &str,
    ra_column: &str,
    dec_column: &str,
    ra: f64,
    dec: f64,
    radius: f64,
    top: Option<u64>,
) -> VoResult<String> {
    Ok(format!(
        "SELECT {}* FROM {} WHERE 1=CONTAINS(POINT('ICRS', {}, {}), CIRCLE('ICRS', {}, {}, {}))",
        top_clause(top),
        quote_identifier(table),
        quote_identifier(ra_column),
        quote_identifier(dec_column),
        number(ra, "ra")?,
        number(dec, "dec")?,
        number(radius, "radius")?,
    ))
}

/// Rows inside the cone whose `[time.start, time.end]` interval overlaps
/// `[t_min, t_max]`.
///
/// `mapping` must hold the four [`POSITION_INTERVAL_TAGS`](crate::ucd::POSITION_INTERVAL_TAGS).
#[allow(clippy::too_many_arguments)]
pub fn positional_interval_query(
    table: &str,
    mapping: &ColumnMapping,
    ra: f64,
    dec: f64,
    radius: f64,
    t_min: f64,
    t_max: f64,
    top: Option<u64>,
) -> VoResult<String> {
    if t_min > t_max {
        return Err(VoError::invalid_argument(format!(
            "empty time interval [{}, {}]",
            t_min, t_max
        )));
    }

    Ok(format!(
        "SELECT {}* FROM {} WHERE 1=CONTAINS(POINT('ICRS', {}, {}), CIRCLE('ICRS', {}, {}, {})) AND {} <= {} AND {} >= {}",
        top_clause(top),
        quote_identifier(table),
        quote_identifier(mapped(mapping, "pos.eq.ra")?),
        quote_identifier(mapped(mapping, "pos.eq.dec")?),
        number(ra, "ra")?,
        number(dec, "dec")?,
        number(radius, "radius")?,
        quote_identifier(mapped(mapping, "time.start")?),
        number(t_max, "t_max")?,
        quote_identifier(mapped(mapping, "time.end")?),
        number(t_min, "t_min")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_literal_doubles_quotes() {
        assert_eq!(string_literal("Barnard's star"), "'Barnard''s star'");
        assert_eq!(string_literal(""), "''");
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_regular_identifier("s_ra"));
        assert!(is_regular_identifier("RAJ2000"));
        assert!(!is_regular_identifier("_ra"));
        assert!(!is_regular_identifier("2mass"));
        assert!(!is_regular_identifier("RA(J2000)"));
        assert!(!is_regular_identifier(""));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("ivoa.obscore"), "ivoa.obscore");
        assert_eq!(quote_identifier("RA(J2000)"), "\"RA(J2000)\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_identifier("\"already\""), "\"already\"");
    }

    #[test]
    fn test_cone_query() {
        let q = cone_query("gaia.dr3", "ra", "dec", 83.633, -5.375, 0.5, Some(100)).unwrap();
        assert_eq!(
            q,
            "SELECT TOP 100 * FROM gaia.dr3 WHERE 1=CONTAINS(POINT('ICRS', ra, dec), CIRCLE('ICRS', 83.633, -5.375, 0.5))"
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(cone_query("t", "ra", "dec", f64::NAN, 0.0, 1.0, None).is_err());
        assert!(cone_query("t", "ra", "dec", 0.0, 0.0, f64::INFINITY, None).is_err());
    }

    #[test]
    fn test_positional_interval_query() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("pos.eq.ra".into(), "s_ra".into());
        mapping.insert("pos.eq.dec".into(), "s_dec".into());
        mapping.insert("time.start".into(), "t_min".into());
        mapping.insert("time.end".into(), "t_max".into());

        let q = positional_interval_query("ivoa.obscore", &mapping, 10.68, 41.27, 0.1, 55000.0, 56000.0, None)
            .unwrap();
        assert_eq!(
            q,
            "SELECT * FROM ivoa.obscore WHERE 1=CONTAINS(POINT('ICRS', s_ra, s_dec), CIRCLE('ICRS', 10.68, 41.27, 0.1)) AND t_min <= 56000 AND t_max >= 55000"
        );
    }

    #[test]
    fn test_interval_query_needs_all_tags() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("pos.eq.ra".into(), "ra".into());
        let err = positional_interval_query("t", &mapping, 0.0, 0.0, 1.0, 0.0, 1.0, None).unwrap_err();
        assert!(err.to_string().contains("pos.eq.dec"));
    }

    #[test]
    fn test_inverted_interval_rejected() {
        let mapping = ColumnMapping::new();
        assert!(positional_interval_query("t", &mapping, 0.0, 0.0, 1.0, 2.0, 1.0, None).is_err());
    }
}
