//! VOTable 1.4 `TABLEDATA` writer, used to encode TAP upload tables.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use super::{ResultTable, Value};
use crate::errors::{VoError, VoResult};
use crate::schema::ColumnDescriptor;

const VOTABLE_NS: &str = "http://www.ivoa.net/xml/VOTable/v1.3";

/// Serializes `table` as a single-table VOTable document.
pub fn write_votable(table: &ResultTable) -> VoResult<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    write(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("VOTABLE");
    root.push_attribute(("version", "1.4"));
    root.push_attribute(("xmlns", VOTABLE_NS));
    write(&mut writer, Event::Start(root))?;

    let mut resource = BytesStart::new("RESOURCE");
    resource.push_attribute(("type", "results"));
    write(&mut writer, Event::Start(resource))?;

    let mut table_start = BytesStart::new("TABLE");
    if let Some(name) = &table.name {
        table_start.push_attribute(("name", name.as_str()));
    }
    write(&mut writer, Event::Start(table_start))?;

    for (index, column) in table.columns().iter().enumerate() {
        write_field(&mut writer, column, infer_datatype(table, index, column))?;
    }

    write(&mut writer, Event::Start(BytesStart::new("DATA")))?;
    write(&mut writer, Event::Start(BytesStart::new("TABLEDATA")))?;
    for row in table.rows() {
        write(&mut writer, Event::Start(BytesStart::new("TR")))?;
        for value in row {
            match value {
                Value::Null => write(&mut writer, Event::Empty(BytesStart::new("TD")))?,
                other => {
                    write(&mut writer, Event::Start(BytesStart::new("TD")))?;
                    let text = match other {
                        Value::Boolean(true) => "T".to_string(),
                        Value::Boolean(false) => "F".to_string(),
                        v => v.to_string(),
                    };
                    write(&mut writer, Event::Text(BytesText::new(&text)))?;
                    write(&mut writer, Event::End(BytesEnd::new("TD")))?;
                }
            }
        }
        write(&mut writer, Event::End(BytesEnd::new("TR")))?;
    }
    write(&mut writer, Event::End(BytesEnd::new("TABLEDATA")))?;
    write(&mut writer, Event::End(BytesEnd::new("DATA")))?;

    write(&mut writer, Event::End(BytesEnd::new("TABLE")))?;
    write(&mut writer, Event::End(BytesEnd::new("RESOURCE")))?;
    write(&mut writer, Event::End(BytesEnd::new("VOTABLE")))?;

    Ok(writer.into_inner().into_inner())
}

fn write(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> VoResult<()> {
    writer
        .write_event(event)
        .map_err(|e| VoError::votable(format!("XML write error: {}", e)))
}

fn write_field(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    column: &ColumnDescriptor,
    datatype: &str,
) -> VoResult<()> {
    let mut field = BytesStart::new("FIELD");
    field.push_attribute(("name", column.name.as_str()));
    field.push_attribute(("datatype", datatype));

    let arraysize = match (&column.arraysize, datatype) {
        (Some(size), _) => Some(size.as_str()),
        (None, "char" | "unicodeChar") => Some("*"),
        _ => None,
    };
    if let Some(size) = arraysize {
        field.push_attribute(("arraysize", size));
    }
    if let Some(unit) = &column.unit {
        field.push_attribute(("unit", unit.as_str()));
    }
    if let Some(ucd) = &column.ucd {
        field.push_attribute(("ucd", ucd.as_str()));
    }

    match &column.description {
        Some(description) => {
            write(writer, Event::Start(field))?;
            write(writer, Event::Start(BytesStart::new("DESCRIPTION")))?;
            write(writer, Event::Text(BytesText::new(description)))?;
            write(writer, Event::End(BytesEnd::new("DESCRIPTION")))?;
            write(writer, Event::End(BytesEnd::new("FIELD")))
        }
        None => write(writer, Event::Empty(field)),
    }
}

/// Declared datatype, else the narrowest type that holds every non-null value.
///
/// Integers widen to `double` when mixed with doubles; any other mix, or a
/// column of nulls, is written as `char`.
fn infer_datatype<'a>(table: &ResultTable, index: usize, column: &'a ColumnDescriptor) -> &'a str {
    if let Some(datatype) = column.datatype.as_deref() {
        return datatype;
    }
    let mut inferred: Option<&'static str> = None;
    for value in table.rows().iter().map(|row| &row[index]) {
        let kind = match value {
            Value::Null => continue,
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "long",
            Value::Double(_) => "double",
            Value::Text(_) => return "char",
        };
        inferred = match (inferred, kind) {
            (None, kind) => Some(kind),
            (Some(current), kind) if current == kind => Some(current),
            (Some("long"), "double") | (Some("double"), "long") => Some("double"),
            _ => return "char",
        };
    }
    inferred.unwrap_or("char")
}
