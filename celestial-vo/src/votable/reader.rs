//! Pull parser for VOTable `TABLEDATA` documents.
//!
//! Reads the first `TABLE` of the document. Element names are compared by
//! local name, so both default-namespace and prefixed (`vot:TABLE`) documents
//! are accepted. Query status is taken from `INFO name="QUERY_STATUS"`;
//! cone search services report errors through an `INFO` or `PARAM` named
//! `Error` instead.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{QueryStatus, ResultTable, Value};
use crate::errors::{VoError, VoResult};
use crate::schema::ColumnDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    None,
    Description,
    Info,
    Cell,
}

#[derive(Default)]
struct TableState {
    name: Option<String>,
    columns: Vec<ColumnDescriptor>,
    nulls: Vec<Option<String>>,
    rows: Vec<Vec<Value>>,
    row: Option<Vec<Option<String>>>,
}

/// Parses a VOTable document into a [`ResultTable`].
///
/// # Errors
/// - [`VoError::Query`] when the service reported `QUERY_STATUS=ERROR`
/// - [`VoError::Unsupported`] for `BINARY`, `BINARY2` or `FITS` data
/// - [`VoError::VoTable`] for malformed XML, ragged rows or unparsable cells
pub fn parse_votable(xml: &str) -> VoResult<ResultTable> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut table = TableState::default();
    let mut in_table = false;
    let mut table_done = false;
    let mut current_field: Option<usize> = None;
    let mut capture = Capture::None;
    let mut text = String::new();

    let mut status = QueryStatus::Ok;
    let mut service_error: Option<String> = None;
    let mut info_fallback = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| VoError::votable(format!("XML parse error: {}", e)))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.local_name().as_ref() {
                    b"TABLE" if !in_table && !table_done => {
                        table.name = attribute(e, b"name")?;
                        if is_empty {
                            table_done = true;
                        } else {
                            in_table = true;
                        }
                    }
                    b"FIELD" if in_table => {
                        table.columns.push(parse_field(e)?);
                        table.nulls.push(None);
                        if !is_empty {
                            current_field = Some(table.columns.len() - 1);
                        }
                    }
                    b"DESCRIPTION" if current_field.is_some() && !is_empty => {
                        capture = Capture::Description;
                        text.clear();
                    }
                    b"VALUES" => {
                        if let Some(index) = current_field {
                            table.nulls[index] = attribute(e, b"null")?;
                        }
                    }
                    b"BINARY" | b"BINARY2" | b"FITS" if in_table => {
                        return Err(VoError::unsupported(format!(
                            "VOTable {} serialization",
                            String::from_utf8_lossy(e.local_name().as_ref())
                        )));
                    }
                    b"TR" if in_table => {
                        table.row = Some(Vec::with_capacity(table.columns.len()));
                        if is_empty {
                            finish_row(&mut table)?;
                        }
                    }
                    b"TD" => {
                        if let Some(row) = table.row.as_mut() {
                            if is_empty {
                                row.push(None);
                            } else {
                                capture = Capture::Cell;
                                text.clear();
                            }
                        }
                    }
                    b"INFO" => {
                        let name = attribute(e, b"name")?.unwrap_or_default();
                        let value = attribute(e, b"value")?.unwrap_or_default();
                        if name == "QUERY_STATUS" {
                            match value.to_ascii_uppercase().as_str() {
                                "OVERFLOW" => status = QueryStatus::Overflow,
                                "ERROR" => {
                                    info_fallback = value;
                                    service_error = Some(String::new());
                                    if !is_empty {
                                        capture = Capture::Info;
                                        text.clear();
                                    }
                                }
                                _ => {}
                            }
                        } else if name.eq_ignore_ascii_case("error") {
                            service_error = Some(value);
                        }
                    }
                    b"PARAM" => {
                        let name = attribute(e, b"name")?.unwrap_or_default();
                        if name.eq_ignore_ascii_case("error") {
                            service_error = Some(attribute(e, b"value")?.unwrap_or_default());
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if capture != Capture::None {
                    let unescaped = t
                        .unescape()
                        .map_err(|e| VoError::votable(format!("bad text content: {}", e)))?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(ref c) => {
                if capture != Capture::None {
                    text.push_str(&String::from_utf8_lossy(c));
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"TD" if capture == Capture::Cell => {
                    if let Some(row) = table.row.as_mut() {
                        row.push(Some(std::mem::take(&mut text)));
                    }
                    capture = Capture::None;
                }
                b"TR" if table.row.is_some() => finish_row(&mut table)?,
                b"DESCRIPTION" if capture == Capture::Description => {
                    if let Some(index) = current_field {
                        table.columns[index].description = Some(text.trim().to_string());
                    }
                    capture = Capture::None;
                }
                b"FIELD" => current_field = None,
                b"INFO" if capture == Capture::Info => {
                    service_error = Some(text.trim().to_string());
                    capture = Capture::None;
                }
                b"TABLE" if in_table => {
                    in_table = false;
                    table_done = true;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(message) = service_error {
        let message = if message.is_empty() {
            info_fallback
        } else {
            message
        };
        return Err(VoError::query(message));
    }

    let mut result = ResultTable::new(table.columns, table.rows)?;
    result.name = table.name;
    result.status = status;
    Ok(result)
}

fn attribute(element: &BytesStart, key: &[u8]) -> VoResult<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| VoError::votable(format!("bad attribute: {}", e)))?;
        if attr.key.local_name().as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|e| VoError::votable(format!("bad attribute value: {}", e)))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_field(element: &BytesStart) -> VoResult<ColumnDescriptor> {
    let name = match attribute(element, b"name")? {
        Some(name) => name,
        None => attribute(element, b"ID")?
            .ok_or_else(|| VoError::votable("FIELD without name or ID"))?,
    };

    Ok(ColumnDescriptor {
        name,
        ucd: attribute(element, b"ucd")?,
        description: None,
        datatype: attribute(element, b"datatype")?,
        arraysize: attribute(element, b"arraysize")?,
        unit: attribute(element, b"unit")?,
    })
}

fn finish_row(table: &mut TableState) -> VoResult<()> {
    let Some(raw) = table.row.take() else {
        return Ok(());
    };

    if raw.len() != table.columns.len() {
        return Err(VoError::votable(format!(
            "row {} has {} cells, expected {}",
            table.rows.len(),
            raw.len(),
            table.columns.len()
        )));
    }

    let row = raw
        .iter()
        .zip(table.columns.iter().zip(&table.nulls))
        .map(|(cell, (column, null))| convert_cell(cell.as_deref(), column, null.as_deref()))
        .collect::<VoResult<Vec<_>>>()?;
    table.rows.push(row);
    Ok(())
}

fn is_scalar(column: &ColumnDescriptor) -> bool {
    matches!(column.arraysize.as_deref(), None | Some("1"))
}

fn convert_cell(raw: Option<&str>, column: &ColumnDescriptor, null: Option<&str>) -> VoResult<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    if raw.is_empty() || null == Some(raw) {
        return Ok(Value::Null);
    }

    let invalid = || {
        VoError::votable(format!(
            "column '{}': cannot parse '{}' as {}",
            column.name,
            raw,
            column.datatype.as_deref().unwrap_or("?")
        ))
    };

    if !is_scalar(column) {
        return Ok(Value::Text(raw.to_string()));
    }

    match column.datatype.as_deref() {
        Some("boolean") => match raw.trim() {
            "T" | "t" | "true" | "TRUE" | "1" => Ok(Value::Boolean(true)),
            "F" | "f" | "false" | "FALSE" | "0" => Ok(Value::Boolean(false)),
            "?" | " " => Ok(Value::Null),
            _ => Err(invalid()),
        },
        Some("short" | "int" | "long" | "unsignedByte") => raw
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| invalid()),
        Some("float" | "double") => {
            let parsed = raw.trim().parse::<f64>().map_err(|_| invalid())?;
            Ok(if parsed.is_nan() {
                Value::Null
            } else {
                Value::Double(parsed)
            })
        }
        _ => Ok(Value::Text(raw.to_string())),
    }
}
