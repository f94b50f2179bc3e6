//! Apply one query template across many tables.
//!
//! The work runs in two phases:
//!
//! 1. [`SchemaSnapshot::fetch`] pulls `TAP_SCHEMA` from every service once.
//!    Resolution afterwards is purely in memory.
//! 2. [`BatchRunner::run`] resolves the required tags per table, skips tables
//!    that lack any of them, and executes one query per remaining table on a
//!    bounded thread pool.
//!
//! A failing service never aborts the batch. Its error is recorded as a
//! [`TargetFailure`] and the other targets carry on.

use std::collections::HashSet;

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{TargetFailure, VoError, VoResult};
use crate::schema::{ColumnDescriptor, ServiceDescriptor, TableSchema};
use crate::service::{ExecutionMode, TapClient};
use crate::ucd::{missing_tags, resolve_required_set, ColumnMapping};
use crate::votable::{ResultTable, Value};

/// One table on one service.
#[derive(Debug, Clone)]
pub struct TableTarget {
    pub service: ServiceDescriptor,
    pub schema: TableSchema,
}

impl TableTarget {
    pub fn new(service: ServiceDescriptor, schema: TableSchema) -> Self {
        Self { service, schema }
    }

    pub fn table_name(&self) -> &str {
        &self.schema.table_name
    }
}

/// Schemas of every table on a set of services, fetched once.
#[derive(Debug, Default)]
pub struct SchemaSnapshot {
    tables: Vec<TableTarget>,
    failures: Vec<TargetFailure>,
}

impl SchemaSnapshot {
    /// Lists the tables of every service, `workers` services at a time.
    ///
    /// Services whose schema cannot be read end up in [`failures`](Self::failures).
    pub fn fetch(tap: &TapClient, services: &[ServiceDescriptor], workers: usize) -> VoResult<Self> {
        let pool = build_pool(workers)?;
        info!(services = services.len(), workers, "fetching table schemas");

        let listed: Vec<_> = pool.install(|| {
            services
                .par_iter()
                .map(|service| (service, tap.list_tables(service)))
                .collect()
        });

        let mut snapshot = SchemaSnapshot::default();
        for (service, outcome) in listed {
            match outcome {
                Ok(tables) => {
                    debug!(service = %service.ivoid, tables = tables.len(), "schema fetched");
                    snapshot.tables.extend(
                        tables
                            .into_values()
                            .map(|schema| TableTarget::new(service.clone(), schema)),
                    );
                }
                Err(error) => {
                    warn!(service = %service.ivoid, %error, "schema fetch failed");
                    snapshot.failures.push(TargetFailure {
                        service_id: service.ivoid.clone(),
                        table: "TAP_SCHEMA".to_string(),
                        error,
                    });
                }
            }
        }
        Ok(snapshot)
    }

    pub fn from_tables(tables: Vec<TableTarget>) -> Self {
        Self {
            tables,
            failures: Vec::new(),
        }
    }

    pub fn tables(&self) -> &[TableTarget] {
        &self.tables
    }

    pub fn failures(&self) -> &[TargetFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Tables that resolve every tag, and the ones that do not.
    pub fn plan<S: AsRef<str>>(&self, tags: &[S]) -> BatchPlan<'_> {
        let mut plan = BatchPlan {
            ready: Vec::new(),
            skipped: Vec::new(),
        };

        for target in &self.tables {
            match resolve_required_set(&target.schema, tags) {
                Some(mapping) => plan.ready.push((target, mapping)),
                None => {
                    let missing = missing_tags(&target.schema, tags);
                    debug!(
                        service = %target.service.ivoid,
                        table = target.table_name(),
                        ?missing,
                        "table skipped"
                    );
                    plan.skipped.push(SkippedTable {
                        service_id: target.service.ivoid.clone(),
                        table: target.table_name().to_string(),
                        missing,
                    });
                }
            }
        }

        info!(
            ready = plan.ready.len(),
            skipped = plan.skipped.len(),
            "batch planned"
        );
        plan
    }
}

/// A table left out because it does not carry every required tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTable {
    pub service_id: String,
    pub table: String,
    pub missing: Vec<String>,
}

#[derive(Debug)]
pub struct BatchPlan<'a> {
    pub ready: Vec<(&'a TableTarget, ColumnMapping)>,
    pub skipped: Vec<SkippedTable>,
}

/// Executes a query against a service.
pub trait QueryRunner: Sync {
    fn run(&self, service: &ServiceDescriptor, query: &str) -> VoResult<ResultTable>;
}

impl QueryRunner for TapClient {
    fn run(&self, service: &ServiceDescriptor, query: &str) -> VoResult<ResultTable> {
        self.search_sync(service, query, &[])
    }
}

/// [`TapClient`] with an explicit execution mode.
#[derive(Debug, Clone)]
pub struct TapRunner {
    tap: TapClient,
    mode: ExecutionMode,
}

impl TapRunner {
    pub fn new(tap: TapClient, mode: ExecutionMode) -> Self {
        Self { tap, mode }
    }
}

impl QueryRunner for TapRunner {
    fn run(&self, service: &ServiceDescriptor, query: &str) -> VoResult<ResultTable> {
        self.tap.search(service, query, &[], self.mode)
    }
}

/// Rows returned by one table, with the columns the tags resolved to.
#[derive(Debug, Clone)]
pub struct TargetResult {
    pub service_id: String,
    pub table: String,
    pub columns: ColumnMapping,
    pub result: ResultTable,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: Vec<TargetResult>,
    pub skipped: Vec<SkippedTable>,
    pub failures: Vec<TargetFailure>,
}

impl BatchOutcome {
    pub fn total_rows(&self) -> usize {
        self.results.iter().map(|r| r.result.len()).sum()
    }

    /// All results as one table with a column per tag.
    ///
    /// Columns are `service_id`, `table_name`, then each distinct tag in the
    /// order given (named after the tag and carrying it as UCD). A tag that
    /// was not resolved for a target, or whose column the service left out
    /// of the result, yields nulls.
    pub fn uniform_table<S: AsRef<str>>(&self, tags: &[S]) -> VoResult<ResultTable> {
        let mut seen = HashSet::new();
        let tags: Vec<&str> = tags
            .iter()
            .map(|tag| tag.as_ref())
            .filter(|tag| seen.insert(*tag))
            .collect();

        let mut columns = vec![
            ColumnDescriptor::new("service_id")
                .with_datatype("char")
                .with_ucd("meta.ref.ivoid"),
            ColumnDescriptor::new("table_name")
                .with_datatype("char")
                .with_ucd("meta.id;meta.table"),
        ];
        columns.extend(tags.iter().map(|tag| ColumnDescriptor::new(*tag).with_ucd(*tag)));

        let mut rows = Vec::with_capacity(self.total_rows());
        for target in &self.results {
            let indices: Vec<Option<usize>> = tags
                .iter()
                .map(|tag| {
                    target
                        .columns
                        .get(*tag)
                        .and_then(|column| result_column(&target.result, column))
                })
                .collect();

            for row in target.result.rows() {
                let mut out = Vec::with_capacity(indices.len() + 2);
                out.push(Value::Text(target.service_id.clone()));
                out.push(Value::Text(target.table.clone()));
                out.extend(
                    indices
                        .iter()
                        .map(|index| index.map_or(Value::Null, |i| row[i].clone())),
                );
                rows.push(out);
            }
        }

        Ok(ResultTable::new(columns, rows)?.with_name("uniform"))
    }
}

/// Services do not always echo column names with the case used in TAP_SCHEMA.
fn result_column(result: &ResultTable, name: &str) -> Option<usize> {
    result.column_index(name).or_else(|| {
        result
            .columns()
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    })
}

/// Runs a query per table on a bounded pool.
pub struct BatchRunner<R> {
    runner: R,
    pool: ThreadPool,
}

impl<R: QueryRunner> BatchRunner<R> {
    pub fn new(runner: R, workers: usize) -> VoResult<Self> {
        Ok(Self {
            runner,
            pool: build_pool(workers)?,
        })
    }

    /// Resolves `tags` on every table of `snapshot` and runs `build_query`'s
    /// query where they all resolve.
    ///
    /// Results keep snapshot order. A query that cannot be built or fails
    /// remotely becomes a [`TargetFailure`].
    pub fn run<S, F>(&self, snapshot: &SchemaSnapshot, tags: &[S], build_query: F) -> BatchOutcome
    where
        S: AsRef<str>,
        F: Fn(&TableTarget, &ColumnMapping) -> VoResult<String> + Sync,
    {
        let BatchPlan { ready, skipped } = snapshot.plan(tags);
        for table in &skipped {
            warn!(
                service = %table.service_id,
                table = %table.table,
                missing = ?table.missing,
                "skipping table without required tags"
            );
        }

        let outcomes: Vec<Result<TargetResult, TargetFailure>> = self.pool.install(|| {
            ready
                .par_iter()
                .map(|(target, mapping)| self.run_target(target, mapping, &build_query))
                .collect()
        });

        let mut outcome = BatchOutcome {
            skipped,
            ..BatchOutcome::default()
        };
        for result in outcomes {
            match result {
                Ok(result) => outcome.results.push(result),
                Err(failure) => {
                    warn!(%failure, "batch target failed");
                    outcome.failures.push(failure);
                }
            }
        }

        info!(
            succeeded = outcome.results.len(),
            failed = outcome.failures.len(),
            skipped = outcome.skipped.len(),
            rows = outcome.total_rows(),
            "batch finished"
        );
        outcome
    }

    fn run_target<F>(
        &self,
        target: &TableTarget,
        mapping: &ColumnMapping,
        build_query: &F,
    ) -> Result<TargetResult, TargetFailure>
    where
        F: Fn(&TableTarget, &ColumnMapping) -> VoResult<String>,
    {
        let failure = |error: VoError| TargetFailure {
            service_id: target.service.ivoid.clone(),
            table: target.table_name().to_string(),
            error,
        };

        let query = build_query(target, mapping).map_err(failure)?;
        debug!(service = %target.service.ivoid, table = target.table_name(), query = %query, "running target");
        let result = self.runner.run(&target.service, &query).map_err(failure)?;
        if !result.is_complete() {
            warn!(
                service = %target.service.ivoid,
                table = target.table_name(),
                rows = result.len(),
                "result truncated"
            );
        }

        Ok(TargetResult {
            service_id: target.service.ivoid.clone(),
            table: target.table_name().to_string(),
            columns: mapping.clone(),
            result,
        })
    }
}

fn build_pool(workers: usize) -> VoResult<ThreadPool> {
    if workers == 0 {
        return Err(VoError::config("workers must be at least 1"));
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| VoError::config(format!("Failed to build thread pool: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ServiceKind;
    use crate::ucd::POSITION_INTERVAL_TAGS;

    fn service(id: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(
            format!("ivo://test/{}", id),
            id,
            ServiceKind::TableAccess,
            format!("http://{}.test/tap", id),
        )
    }

    fn interval_table(service_id: &str, name: &str, ra: &str, dec: &str) -> TableSchema {
        TableSchema::new(
            service_id,
            name,
            vec![
                ColumnDescriptor::new(ra).with_ucd("pos.eq.ra;meta.main"),
                ColumnDescriptor::new(dec).with_ucd("pos.eq.dec;meta.main"),
                ColumnDescriptor::new("t_min").with_ucd("time.start;obs.exposure"),
                ColumnDescriptor::new("t_max").with_ucd("time.end;obs.exposure"),
            ],
        )
        .unwrap()
    }

    /// Answers with one row per query, except for tables named in `fail`.
    struct FakeRunner {
        fail: Vec<&'static str>,
    }

    impl QueryRunner for FakeRunner {
        fn run(&self, service: &ServiceDescriptor, query: &str) -> VoResult<ResultTable> {
            if self.fail.iter().any(|table| query.contains(table)) {
                return Err(VoError::Status {
                    url: format!("{}/sync", service.access_url),
                    status: 500,
                    message: None,
                });
            }
            let columns = ["obs_ra", "obs_dec", "t_min", "t_max", "name"]
                .into_iter()
                .map(ColumnDescriptor::new)
                .collect();
            ResultTable::new(
                columns,
                vec![vec![
                    Value::Double(10.5),
                    Value::Double(-3.25),
                    Value::Double(59000.0),
                    Value::Double(59001.0),
                    Value::Text("obs-1".to_string()),
                ]],
            )
        }
    }

    fn two_table_snapshot() -> SchemaSnapshot {
        let a = service("a");
        let b = service("b");
        SchemaSnapshot::from_tables(vec![
            TableTarget::new(a.clone(), interval_table(&a.ivoid, "obs.a", "obs_ra", "obs_dec")),
            TableTarget::new(b.clone(), interval_table(&b.ivoid, "obs.b", "obs_ra", "obs_dec")),
        ])
    }

    fn simple_query(target: &TableTarget, mapping: &ColumnMapping) -> VoResult<String> {
        Ok(format!(
            "SELECT {} FROM {}",
            mapping["pos.eq.ra"],
            target.table_name()
        ))
    }

    #[test]
    fn test_failure_in_one_target_keeps_the_other() {
        let runner = BatchRunner::new(FakeRunner { fail: vec!["obs.b"] }, 2).unwrap();
        let outcome = runner.run(&two_table_snapshot(), &POSITION_INTERVAL_TAGS, simple_query);

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].service_id, "ivo://test/a");
        assert_eq!(outcome.results[0].result.len(), 1);
        assert_eq!(outcome.results[0].columns["pos.eq.ra"], "obs_ra");

        assert_eq!(outcome.failures.len(), 1);
        let failure = &outcome.failures[0];
        assert_eq!(failure.service_id, "ivo://test/b");
        assert_eq!(failure.table, "obs.b");
        assert!(matches!(failure.error, VoError::Status { status: 500, .. }));
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn test_incomplete_table_is_skipped_with_missing_tags() {
        let s = service("c");
        let partial = TableSchema::new(
            &s.ivoid,
            "obs.partial",
            vec![
                ColumnDescriptor::new("ra").with_ucd("pos.eq.ra"),
                ColumnDescriptor::new("dec").with_ucd("pos.eq.dec"),
                ColumnDescriptor::new("start").with_ucd("time.start"),
            ],
        )
        .unwrap();
        let mut tables = two_table_snapshot().tables;
        tables.push(TableTarget::new(s, partial));
        let snapshot = SchemaSnapshot::from_tables(tables);

        let plan = snapshot.plan(&POSITION_INTERVAL_TAGS);
        assert_eq!(plan.ready.len(), 2);
        assert_eq!(
            plan.skipped,
            vec![SkippedTable {
                service_id: "ivo://test/c".to_string(),
                table: "obs.partial".to_string(),
                missing: vec!["time.end".to_string()],
            }]
        );

        let runner = BatchRunner::new(FakeRunner { fail: vec![] }, 3).unwrap();
        let outcome = runner.run(&snapshot, &POSITION_INTERVAL_TAGS, simple_query);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_query_build_error_is_a_target_failure() {
        let runner = BatchRunner::new(FakeRunner { fail: vec![] }, 1).unwrap();
        let outcome = runner.run(&two_table_snapshot(), &["pos.eq.ra"], |target, _| {
            if target.table_name() == "obs.a" {
                Err(VoError::invalid_argument("bad radius"))
            } else {
                Ok(format!("SELECT * FROM {}", target.table_name()))
            }
        });
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].table, "obs.b");
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(outcome.failures[0].error, VoError::InvalidArgument { .. }));
    }

    #[test]
    fn test_results_keep_snapshot_order() {
        let tables = (0..12)
            .map(|i| {
                let s = service(&format!("s{:02}", i));
                let schema = interval_table(&s.ivoid, &format!("t{:02}", i), "obs_ra", "obs_dec");
                TableTarget::new(s, schema)
            })
            .collect();
        let runner = BatchRunner::new(FakeRunner { fail: vec![] }, 4).unwrap();
        let outcome = runner.run(
            &SchemaSnapshot::from_tables(tables),
            &POSITION_INTERVAL_TAGS,
            simple_query,
        );
        let order: Vec<_> = outcome.results.iter().map(|r| r.table.as_str()).collect();
        let expected: Vec<String> = (0..12).map(|i| format!("t{:02}", i)).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_uniform_table_uses_tags_as_columns() {
        let runner = BatchRunner::new(FakeRunner { fail: vec!["obs.b"] }, 2).unwrap();
        let outcome = runner.run(&two_table_snapshot(), &POSITION_INTERVAL_TAGS, simple_query);

        let tags = ["pos.eq.ra", "time.end", "pos.eq.ra", "phot.mag"];
        let uniform = outcome.uniform_table(&tags).unwrap();
        let names: Vec<_> = uniform.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["service_id", "table_name", "pos.eq.ra", "time.end", "phot.mag"]
        );
        assert_eq!(uniform.len(), 1);
        let row = &uniform.rows()[0];
        assert_eq!(row[0], Value::Text("ivo://test/a".to_string()));
        assert_eq!(row[1], Value::Text("obs.a".to_string()));
        assert_eq!(row[2], Value::Double(10.5));
        assert_eq!(row[3], Value::Double(59001.0));
        assert_eq!(row[4], Value::Null);
    }

    #[test]
    fn test_result_columns_match_case_insensitively() {
        let result = ResultTable::new(vec![ColumnDescriptor::new("RAJ2000")], vec![]).unwrap();
        assert_eq!(result_column(&result, "raj2000"), Some(0));
        assert_eq!(result_column(&result, "DEJ2000"), None);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            BatchRunner::new(FakeRunner { fail: vec![] }, 0),
            Err(VoError::Config { .. })
        ));
    }
}
