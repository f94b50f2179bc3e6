//! Table Access Protocol client.
//!
//! Synchronous queries block on a single `POST {base}/sync`. Asynchronous
//! queries create a UWS job at `{base}/async` (with `PHASE=RUN`), poll its
//! phase, fetch `results/result`, then delete the job. Async is slower for
//! small queries but survives longer execution times and larger results.
//!
//! Schema introspection reads `TAP_SCHEMA.columns` through ordinary ADQL,
//! ordered by `column_index` where the service has it.

use reqwest::blocking::multipart::{Form, Part};
use std::collections::{BTreeMap, HashSet};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::uws::{parse_job_document, JobPhase};
use super::{join_url, read_text, HttpClient};
use crate::adql::{is_regular_identifier, string_literal};
use crate::errors::{VoError, VoResult};
use crate::schema::{ColumnDescriptor, ServiceDescriptor, TableSchema};
use crate::votable::{parse_votable, write_votable, ResultTable, Value};

/// Requested result serialization; only `TABLEDATA` is decoded.
const RESPONSE_FORMAT: &str = "votable/td";
const VOTABLE_MIME: &str = "application/x-votable+xml";

const SCHEMA_SELECT: &str = "c.table_name, c.column_name, c.ucd, c.description, c.datatype, c.unit, \
                             t.description AS table_description";
const SCHEMA_FROM: &str = "FROM TAP_SCHEMA.columns AS c \
                           JOIN TAP_SCHEMA.tables AS t ON c.table_name = t.table_name";

/// How a TAP query is executed remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Sync,
    Async,
}

/// A client-side table sent with a query and visible as `TAP_UPLOAD.<name>`.
#[derive(Debug, Clone)]
pub struct Upload {
    name: String,
    votable: Vec<u8>,
}

impl Upload {
    pub fn from_table(name: impl Into<String>, table: &ResultTable) -> VoResult<Self> {
        Self::from_votable_bytes(name, write_votable(table)?)
    }

    pub fn from_votable_bytes(name: impl Into<String>, votable: Vec<u8>) -> VoResult<Self> {
        let name = name.into();
        if !is_regular_identifier(&name) {
            return Err(VoError::invalid_argument(format!(
                "upload name '{}' is not a valid ADQL identifier",
                name
            )));
        }
        Ok(Self { name, votable })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
pub struct TapClient {
    http: HttpClient,
}

impl TapClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn search(
        &self,
        service: &ServiceDescriptor,
        query: &str,
        uploads: &[Upload],
        mode: ExecutionMode,
    ) -> VoResult<ResultTable> {
        match mode {
            ExecutionMode::Sync => self.search_sync(service, query, uploads),
            ExecutionMode::Async => self.search_async(service, query, uploads),
        }
    }

    /// Runs `query` on `{base}/sync` and decodes the VOTable response.
    ///
    /// A truncated result is returned with [`ResultTable::is_complete`] false.
    pub fn search_sync(
        &self,
        service: &ServiceDescriptor,
        query: &str,
        uploads: &[Upload],
    ) -> VoResult<ResultTable> {
        let url = join_url(&service.access_url, "sync");
        debug!(service = %service.ivoid, query, "sync TAP query");

        let response = self.submit(&url, self.query_params(query, None), uploads)?;
        let body = read_text(&url, response)?;
        let table = parse_votable(&body)?;
        warn_if_truncated(service, &table);
        Ok(table)
    }

    /// Runs `query` as a UWS job, polling until it finishes or the configured
    /// wait budget runs out.
    pub fn search_async(
        &self,
        service: &ServiceDescriptor,
        query: &str,
        uploads: &[Upload],
    ) -> VoResult<ResultTable> {
        let create_url = join_url(&service.access_url, "async");
        debug!(service = %service.ivoid, query, "async TAP query");

        let response = self.submit(&create_url, self.query_params(query, Some("RUN")), uploads)?;
        let final_url = response.url().to_string();
        let job_url = if final_url.trim_end_matches('/') != create_url.trim_end_matches('/') {
            final_url
        } else {
            let body = read_text(&create_url, response)?;
            let job_id = parse_job_document(&body)?.job_id.ok_or_else(|| {
                VoError::votable(format!("{} did not redirect to a job", create_url))
            })?;
            join_url(&create_url, &job_id)
        };
        info!(job = %job_url, "TAP job created");

        let outcome = self.wait_and_fetch(&job_url);
        if let Err(e) = self.http.delete(&job_url) {
            warn!(job = %job_url, error = %e, "failed to delete TAP job");
        }
        let table = outcome?;
        warn_if_truncated(service, &table);
        Ok(table)
    }

    fn wait_and_fetch(&self, job_url: &str) -> VoResult<ResultTable> {
        let config = self.http.config();
        let started = Instant::now();
        let mut rerun_sent = false;

        loop {
            let phase = self.job_phase(job_url)?;
            debug!(job = %job_url, %phase, "polled TAP job");

            match phase {
                JobPhase::Completed => break,
                JobPhase::Error => {
                    return Err(VoError::JobFailed {
                        job_url: job_url.to_string(),
                        phase: phase.to_string(),
                        message: self.job_error(job_url),
                    });
                }
                JobPhase::Aborted | JobPhase::Archived => {
                    return Err(VoError::JobFailed {
                        job_url: job_url.to_string(),
                        phase: phase.to_string(),
                        message: "job was stopped before completing".to_string(),
                    });
                }
                JobPhase::Pending | JobPhase::Held if !rerun_sent => {
                    self.http.post_form(
                        &join_url(job_url, "phase"),
                        &[("PHASE", "RUN".to_string())],
                    )?;
                    rerun_sent = true;
                }
                _ => {}
            }

            if started.elapsed() >= config.max_wait() {
                if let Err(e) = self
                    .http
                    .post_form(&join_url(job_url, "phase"), &[("PHASE", "ABORT".to_string())])
                {
                    warn!(job = %job_url, error = %e, "failed to abort TAP job");
                }
                return Err(VoError::Timeout {
                    job_url: job_url.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            thread::sleep(config.poll_interval());
        }

        let result_url = join_url(job_url, "results/result");
        let body = self.http.get_text(&result_url, &[])?;
        parse_votable(&body)
    }

    fn job_phase(&self, job_url: &str) -> VoResult<JobPhase> {
        self.http
            .get_text(&join_url(job_url, "phase"), &[])?
            .parse()
    }

    /// Best-effort error summary; the error resource may be a VOTable or plain text.
    fn job_error(&self, job_url: &str) -> String {
        match self.http.get_text(&join_url(job_url, "error"), &[]) {
            Ok(body) => match parse_votable(&body) {
                Err(VoError::Query { message }) => message,
                _ => body.trim().to_string(),
            },
            Err(e) => format!("no error document: {}", e),
        }
    }

    fn query_params(&self, query: &str, phase: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("REQUEST", "doQuery".to_string()),
            ("LANG", "ADQL".to_string()),
            ("QUERY", query.to_string()),
            ("RESPONSEFORMAT", RESPONSE_FORMAT.to_string()),
        ];
        if let Some(maxrec) = self.http.config().max_records {
            params.push(("MAXREC", maxrec.to_string()));
        }
        if let Some(phase) = phase {
            params.push(("PHASE", phase.to_string()));
        }
        params
    }

    fn submit(
        &self,
        url: &str,
        mut params: Vec<(&'static str, String)>,
        uploads: &[Upload],
    ) -> VoResult<reqwest::blocking::Response> {
        if uploads.is_empty() {
            return self.http.post_form(url, &params);
        }

        params.push(("UPLOAD", upload_param(uploads)));
        let mut form = Form::new();
        for (key, value) in params {
            form = form.text(key, value);
        }
        for upload in uploads {
            let part = Part::bytes(upload.votable.clone())
                .file_name(format!("{}.xml", upload.name))
                .mime_str(VOTABLE_MIME)
                .map_err(|e| VoError::http(url, e))?;
            form = form.part(upload.name.clone(), part);
        }
        self.http.post_multipart(url, form)
    }

    /// Every table on the service with its columns, keyed by qualified table name.
    ///
    /// Columns keep the service's declared order (`column_index`). A listing
    /// cut short by the row limit is an error, never a partial schema.
    pub fn list_tables(&self, service: &ServiceDescriptor) -> VoResult<BTreeMap<String, TableSchema>> {
        let result = self.schema_rows(service, None)?;

        let mut tables = BTreeMap::new();
        for (table_name, (description, columns)) in group_schema_rows(&result)? {
            let mut schema = TableSchema::new(&service.ivoid, table_name.clone(), columns)?;
            schema.description = description;
            tables.insert(table_name, schema);
        }
        info!(service = %service.ivoid, tables = tables.len(), "listed TAP tables");
        Ok(tables)
    }

    pub fn list_columns(&self, service: &ServiceDescriptor, table: &str) -> VoResult<Vec<ColumnDescriptor>> {
        Ok(self.table_schema(service, table)?.columns().to_vec())
    }

    /// Columns of one table; an unknown table yields an empty schema.
    pub fn table_schema(&self, service: &ServiceDescriptor, table: &str) -> VoResult<TableSchema> {
        let result = self.schema_rows(service, Some(table))?;
        let (description, columns) = group_schema_rows(&result)?
            .remove(table)
            .unwrap_or_default();
        let mut schema = TableSchema::new(&service.ivoid, table, columns)?;
        schema.description = description;
        Ok(schema)
    }

    /// Reads `TAP_SCHEMA` ordered by table and `column_index`.
    ///
    /// `column_index` only exists since TAP 1.1; when the service rejects it
    /// the listing is repeated ordered by column name.
    fn schema_rows(&self, service: &ServiceDescriptor, table: Option<&str>) -> VoResult<ResultTable> {
        let filter = table
            .map(|t| format!(" WHERE c.table_name = {}", string_literal(t)))
            .unwrap_or_default();
        let indexed = format!(
            "SELECT {}, c.column_index {}{} ORDER BY c.table_name, c.column_index",
            SCHEMA_SELECT, SCHEMA_FROM, filter
        );

        let result = match self.search_sync(service, &indexed, &[]) {
            Err(e) if is_rejected_query(&e) => {
                debug!(service = %service.ivoid, error = %e, "no column_index in TAP_SCHEMA, ordering by name");
                let named = format!(
                    "SELECT {} {}{} ORDER BY c.table_name, c.column_name",
                    SCHEMA_SELECT, SCHEMA_FROM, filter
                );
                self.search_sync(service, &named, &[])?
            }
            other => other?,
        };

        if !result.is_complete() {
            return Err(VoError::Truncated {
                message: format!(
                    "TAP_SCHEMA of {} stopped at the row limit after {} columns",
                    service.ivoid,
                    result.len()
                ),
            });
        }
        Ok(result)
    }
}

/// Services answer an unknown column with a `QUERY_STATUS=ERROR` document,
/// sometimes under HTTP 400.
fn is_rejected_query(error: &VoError) -> bool {
    matches!(
        error,
        VoError::Query { .. } | VoError::Status { status: 400, .. }
    )
}

type GroupedColumns = BTreeMap<String, (Option<String>, Vec<ColumnDescriptor>)>;

/// Groups `TAP_SCHEMA` rows by table, each table's columns sorted by
/// `column_index` (rows without one keep their response order, last).
fn group_schema_rows(result: &ResultTable) -> VoResult<GroupedColumns> {
    let mut positioned: BTreeMap<String, (Option<String>, Vec<(i64, ColumnDescriptor)>)> = BTreeMap::new();
    for row in result.rows() {
        let Some(table_name) = text(result, row, "table_name") else {
            continue;
        };
        let entry = positioned
            .entry(table_name)
            .or_insert_with(|| (text(result, row, "table_description"), Vec::new()));
        let position = declared_position(result, row).unwrap_or(i64::MAX);
        entry.1.push((position, column_from_row(result, row)?));
    }

    Ok(positioned
        .into_iter()
        .map(|(table_name, (description, mut columns))| {
            columns.sort_by_key(|(position, _)| *position);
            let columns = columns.into_iter().map(|(_, column)| column).collect();
            let columns = dedup_columns(&table_name, columns);
            (table_name, (description, columns))
        })
        .collect())
}

fn declared_position(table: &ResultTable, row: &[Value]) -> Option<i64> {
    let index = table.column_index("column_index")?;
    match &row[index] {
        Value::Integer(i) => Some(*i),
        Value::Double(d) if d.is_finite() => Some(*d as i64),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn warn_if_truncated(service: &ServiceDescriptor, table: &ResultTable) {
    if !table.is_complete() {
        warn!(service = %service.ivoid, rows = table.len(), "TAP result truncated (overflow)");
    }
}

fn upload_param(uploads: &[Upload]) -> String {
    uploads
        .iter()
        .map(|u| format!("{},param:{}", u.name, u.name))
        .collect::<Vec<_>>()
        .join(";")
}

fn text(table: &ResultTable, row: &[Value], column: &str) -> Option<String> {
    let index = table.column_index(column)?;
    match &row[index] {
        Value::Null => None,
        Value::Text(s) if s.trim().is_empty() => None,
        other => Some(other.to_string().trim().to_string()),
    }
}

fn column_from_row(table: &ResultTable, row: &[Value]) -> VoResult<ColumnDescriptor> {
    let name = text(table, row, "column_name")
        .ok_or_else(|| VoError::votable("TAP_SCHEMA row without column_name"))?;
    Ok(ColumnDescriptor {
        name,
        ucd: text(table, row, "ucd"),
        description: text(table, row, "description"),
        datatype: text(table, row, "datatype"),
        arraysize: None,
        unit: text(table, row, "unit"),
    })
}

/// Keeps the first of each duplicated column name.
fn dedup_columns(table: &str, columns: Vec<ColumnDescriptor>) -> Vec<ColumnDescriptor> {
    let mut seen = HashSet::new();
    columns
        .into_iter()
        .filter(|column| {
            let fresh = seen.insert(column.name.clone());
            if !fresh {
                warn!(table, column = %column.name, "TAP_SCHEMA lists column twice, keeping the first");
            }
            fresh
        })
        .collect()
}
