use celestial_vo::adql::positional_interval_query;
use celestial_vo::batch::{BatchRunner, SchemaSnapshot, TapRunner};
use celestial_vo::service::{ExecutionMode, HttpClient, TapClient};
use celestial_vo::ucd::POSITION_INTERVAL_TAGS;
use celestial_vo::{ClientConfig, ServiceDescriptor, ServiceKind, Value, VoError};
use mockito::{Matcher, Server, ServerGuard};

fn schema_votable(table: &str, ra: &str, with_end: bool) -> String {
    let mut rows = vec![
        format!("<TR><TD>{table}</TD><TD>{ra}</TD><TD>pos.eq.ra;meta.main</TD></TR>"),
        format!("<TR><TD>{table}</TD><TD>dec</TD><TD>pos.eq.dec;meta.main</TD></TR>"),
        format!("<TR><TD>{table}</TD><TD>t_start</TD><TD>time.start</TD></TR>"),
    ];
    if with_end {
        rows.push(format!("<TR><TD>{table}</TD><TD>t_stop</TD><TD>time.end</TD></TR>"));
    }
    format!(
        r#"<VOTABLE><RESOURCE type="results"><TABLE>
          <FIELD name="table_name" datatype="char" arraysize="*"/>
          <FIELD name="column_name" datatype="char" arraysize="*"/>
          <FIELD name="ucd" datatype="char" arraysize="*"/>
          <DATA><TABLEDATA>{}</TABLEDATA></DATA></TABLE></RESOURCE></VOTABLE>"#,
        rows.join("")
    )
}

fn result_votable(ra: &str) -> String {
    format!(
        r#"<VOTABLE><RESOURCE type="results"><TABLE>
          <FIELD name="{ra}" datatype="double"/>
          <FIELD name="dec" datatype="double"/>
          <FIELD name="t_start" datatype="double"/>
          <FIELD name="t_stop" datatype="double"/>
          <DATA><TABLEDATA>
            <TR><TD>83.63</TD><TD>22.01</TD><TD>55000.5</TD><TD>55001.5</TD></TR>
            <TR><TD>83.64</TD><TD>22.02</TD><TD>56000.5</TD><TD>56001.5</TD></TR>
          </TABLEDATA></DATA></TABLE></RESOURCE></VOTABLE>"#
    )
}

fn service(server: &ServerGuard, id: &str) -> ServiceDescriptor {
    ServiceDescriptor::new(
        format!("ivo://test/{}", id),
        id,
        ServiceKind::TableAccess,
        format!("{}/tap", server.url()),
    )
}

fn tap() -> TapClient {
    let config = ClientConfig {
        timeout_secs: 5,
        ..ClientConfig::default()
    };
    TapClient::new(HttpClient::new(config).unwrap())
}

fn mock_schema(server: &mut ServerGuard, body: String) -> mockito::Mock {
    server
        .mock("POST", "/tap/sync")
        .match_body(Matcher::Regex("TAP_SCHEMA".into()))
        .with_body(body)
        .create()
}

#[test]
fn test_sweep_records_failure_and_keeps_other_rows() {
    let mut a = Server::new();
    let mut b = Server::new();
    mock_schema(&mut a, schema_votable("obs.a", "ra_a", true));
    mock_schema(&mut b, schema_votable("obs.b", "ra_b", true));

    let query_a = a
        .mock("POST", "/tap/sync")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("CONTAINS".into()),
            Matcher::Regex("ra_a".into()),
        ]))
        .with_body(result_votable("ra_a"))
        .create();
    let query_b = b
        .mock("POST", "/tap/sync")
        .match_body(Matcher::Regex("CONTAINS".into()))
        .with_status(500)
        .create();

    let tap = tap();
    let services = vec![service(&a, "a"), service(&b, "b")];
    let snapshot = SchemaSnapshot::fetch(&tap, &services, 2).unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.failures().is_empty());

    let runner = BatchRunner::new(TapRunner::new(tap, ExecutionMode::Sync), 2).unwrap();
    let outcome = runner.run(&snapshot, &POSITION_INTERVAL_TAGS, |target, columns| {
        positional_interval_query(
            target.table_name(),
            columns,
            83.63,
            22.01,
            0.1,
            54000.0,
            60000.0,
            None,
        )
    });

    query_a.assert();
    query_b.assert();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].service_id, "ivo://test/a");
    assert_eq!(outcome.results[0].columns["pos.eq.ra"], "ra_a");
    assert_eq!(outcome.results[0].result.len(), 2);

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].service_id, "ivo://test/b");
    assert_eq!(outcome.failures[0].table, "obs.b");
    assert!(matches!(
        outcome.failures[0].error,
        VoError::Status { status: 500, .. }
    ));

    let uniform = outcome.uniform_table(&POSITION_INTERVAL_TAGS).unwrap();
    assert_eq!(uniform.len(), 2);
    assert_eq!(uniform.columns()[2].name, "pos.eq.ra");
    assert_eq!(uniform.rows()[1][2], Value::Double(83.64));
    assert_eq!(uniform.rows()[1][5], Value::Double(56001.5));
}

#[test]
fn test_sweep_skips_table_without_time_end() {
    let mut a = Server::new();
    let mut b = Server::new();
    mock_schema(&mut a, schema_votable("obs.a", "ra", true));
    mock_schema(&mut b, schema_votable("obs.partial", "ra", false));

    a.mock("POST", "/tap/sync")
        .match_body(Matcher::Regex("CONTAINS".into()))
        .with_body(result_votable("ra"))
        .create();
    let never = b
        .mock("POST", "/tap/sync")
        .match_body(Matcher::Regex("CONTAINS".into()))
        .expect(0)
        .create();

    let tap = tap();
    let services = vec![service(&a, "a"), service(&b, "b")];
    let snapshot = SchemaSnapshot::fetch(&tap, &services, 2).unwrap();

    let runner = BatchRunner::new(tap, 2).unwrap();
    let outcome = runner.run(&snapshot, &POSITION_INTERVAL_TAGS, |target, columns| {
        positional_interval_query(target.table_name(), columns, 83.63, 22.01, 0.1, 0.0, 1e5, Some(10))
    });

    never.assert();
    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].table, "obs.partial");
    assert_eq!(outcome.skipped[0].missing, vec!["time.end".to_string()]);
}

#[test]
fn test_unreachable_schema_is_a_snapshot_failure() {
    let mut a = Server::new();
    let mut b = Server::new();
    mock_schema(&mut a, schema_votable("obs.a", "ra", true));
    b.mock("POST", "/tap/sync").with_status(404).create();

    let services = vec![service(&a, "a"), service(&b, "b")];
    let snapshot = SchemaSnapshot::fetch(&tap(), &services, 1).unwrap();

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.failures().len(), 1);
    assert_eq!(snapshot.failures()[0].service_id, "ivo://test/b");
}

#[test]
fn test_truncated_schema_is_a_snapshot_failure() {
    let mut a = Server::new();
    let mut b = Server::new();
    mock_schema(&mut a, schema_votable("obs.a", "ra", true));
    let overflow = schema_votable("obs.b", "ra", true).replace(
        r#"<RESOURCE type="results">"#,
        r#"<RESOURCE type="results"><INFO name="QUERY_STATUS" value="OVERFLOW"/>"#,
    );
    mock_schema(&mut b, overflow);

    let services = vec![service(&a, "a"), service(&b, "b")];
    let snapshot = SchemaSnapshot::fetch(&tap(), &services, 2).unwrap();

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.tables()[0].table_name(), "obs.a");
    assert_eq!(snapshot.failures().len(), 1);
    assert_eq!(snapshot.failures()[0].service_id, "ivo://test/b");
    assert_eq!(snapshot.failures()[0].table, "TAP_SCHEMA");
    assert!(matches!(
        snapshot.failures()[0].error,
        VoError::Truncated { .. }
    ));
}
