use anyhow::{bail, Context};
use celestial_vo::batch::{BatchOutcome, BatchRunner, SchemaSnapshot, TapRunner};
use celestial_vo::service::{
    ConeSearchClient, ConeSearchParams, ExecutionMode, HttpClient, RegistryClient, TapClient,
    Upload,
};
use celestial_vo::ucd::{audit_tags, TagResolution, POSITION_INTERVAL_TAGS};
use celestial_vo::{adql, ClientConfig, ResultTable, ServiceDescriptor, ServiceKind};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Parser)]
#[command(name = "vo")]
#[command(about = "Query Virtual Observatory registries, cone search and TAP services")]
struct Cli {
    /// JSON client configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads for batch work (overrides config)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// HTTP timeout in seconds (overrides config)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the registry for services
    Registry {
        /// Words matched against service titles and descriptions (any of them)
        keywords: Vec<String>,
        /// Service kind: cone-search, table-access, image, spectral
        #[arg(long, default_value = "table-access")]
        kind: ServiceKind,
        /// Include services that only declare the capability as auxiliary
        #[arg(long)]
        aux: bool,
    },
    /// List the tables published by a TAP service
    Tables {
        /// TAP base URL
        url: String,
    },
    /// List the columns of one table
    Columns {
        /// TAP base URL
        url: String,
        /// Qualified table name
        table: String,
    },
    /// Show how UCD tags resolve against a table
    Resolve {
        /// TAP base URL
        url: String,
        /// Qualified table name
        table: String,
        /// UCD tags (defaults to the position/time-interval set)
        tags: Vec<String>,
    },
    /// Run a Simple Cone Search
    Cone {
        /// Cone search endpoint URL
        url: String,
        /// Right ascension in degrees
        ra: f64,
        /// Declination in degrees
        #[arg(allow_negative_numbers = true)]
        dec: f64,
        /// Search radius in degrees
        #[arg(long, default_value = "0.1")]
        radius: f64,
        /// Verbosity requested from the service (1-3)
        #[arg(long)]
        verb: Option<u8>,
    },
    /// Run an ADQL query on a TAP service
    Tap {
        /// TAP base URL
        url: String,
        /// ADQL query text
        query: String,
        /// Run as an asynchronous UWS job
        #[arg(long = "async")]
        run_async: bool,
        /// Upload a VOTable as TAP_UPLOAD.<name> (name=file.xml)
        #[arg(long, value_name = "NAME=FILE")]
        upload: Vec<String>,
        /// Maximum number of records to return
        #[arg(long)]
        maxrec: Option<u64>,
    },
    /// Positional time-interval query across every matching TAP table
    Sweep {
        /// Right ascension in degrees
        #[arg(long)]
        ra: f64,
        /// Declination in degrees
        #[arg(long, allow_negative_numbers = true)]
        dec: f64,
        /// Search radius in degrees
        #[arg(long, default_value = "0.1")]
        radius: f64,
        /// Interval start (MJD)
        #[arg(long)]
        t_min: f64,
        /// Interval end (MJD)
        #[arg(long)]
        t_max: f64,
        /// Registry keywords selecting TAP services
        #[arg(long = "keyword")]
        keywords: Vec<String>,
        /// TAP base URLs to query instead of a registry search
        #[arg(long = "service")]
        services: Vec<String>,
        /// Include auxiliary TAP capabilities in the registry search
        #[arg(long)]
        aux: bool,
        /// Row limit per table
        #[arg(long)]
        top: Option<u64>,
        /// Run each query as an asynchronous UWS job
        #[arg(long = "async")]
        run_async: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;
    let format = cli.format;

    match cli.command {
        Commands::Registry { keywords, kind, aux } => {
            let http = HttpClient::new(config)?;
            let services = RegistryClient::new(http)
                .search(kind, &keywords, aux)
                .context("Registry search failed")?;
            print_services(&services, format)?;
        }
        Commands::Tables { url } => {
            let tap = TapClient::new(HttpClient::new(config)?);
            let service = ad_hoc_service(&url, ServiceKind::TableAccess);
            let tables = tap
                .list_tables(&service)
                .with_context(|| format!("Failed to list tables of {}", url))?;
            let rows: Vec<Vec<String>> = tables
                .values()
                .map(|schema| {
                    vec![
                        schema.table_name.clone(),
                        schema.len().to_string(),
                        schema.description.clone().unwrap_or_default(),
                    ]
                })
                .collect();
            print_rows(&["table_name", "columns", "description"], &rows, format)?;
        }
        Commands::Columns { url, table } => {
            let tap = TapClient::new(HttpClient::new(config)?);
            let service = ad_hoc_service(&url, ServiceKind::TableAccess);
            let columns = tap
                .list_columns(&service, &table)
                .with_context(|| format!("Failed to list columns of {}", table))?;
            let rows: Vec<Vec<String>> = columns
                .into_iter()
                .map(|c| {
                    vec![
                        c.name,
                        c.ucd.unwrap_or_default(),
                        c.datatype.unwrap_or_default(),
                        c.unit.unwrap_or_default(),
                        c.description.unwrap_or_default(),
                    ]
                })
                .collect();
            print_rows(&["name", "ucd", "datatype", "unit", "description"], &rows, format)?;
        }
        Commands::Resolve { url, table, tags } => {
            let tap = TapClient::new(HttpClient::new(config)?);
            let service = ad_hoc_service(&url, ServiceKind::TableAccess);
            let schema = tap
                .table_schema(&service, &table)
                .with_context(|| format!("Failed to read schema of {}", table))?;
            let tags = if tags.is_empty() {
                POSITION_INTERVAL_TAGS.iter().map(|t| t.to_string()).collect()
            } else {
                tags
            };
            print_audit(&audit_tags(&schema, &tags), format)?;
        }
        Commands::Cone { url, ra, dec, radius, verb } => {
            let client = ConeSearchClient::new(HttpClient::new(config)?);
            let service = ad_hoc_service(&url, ServiceKind::ConeSearch);
            let params = ConeSearchParams {
                verbosity: verb,
                ..ConeSearchParams::new(ra, dec, radius)
            };
            let start = Instant::now();
            let result = client
                .search(&service, &params)
                .with_context(|| format!("Cone search on {} failed", url))?;
            eprintln!("{} rows in {:.2} s", result.len(), start.elapsed().as_secs_f64());
            print_result(&result, format)?;
        }
        Commands::Tap { url, query, run_async, upload, maxrec } => {
            let config = ClientConfig {
                max_records: maxrec.or(config.max_records),
                ..config
            };
            let tap = TapClient::new(HttpClient::new(config)?);
            let service = ad_hoc_service(&url, ServiceKind::TableAccess);
            let uploads = upload
                .iter()
                .map(|spec| parse_upload(spec))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let result = tap
                .search(&service, &query, &uploads, execution_mode(run_async))
                .with_context(|| format!("TAP query on {} failed", url))?;
            if !result.is_complete() {
                eprintln!("Warning: result truncated by the service");
            }
            print_result(&result, format)?;
        }
        Commands::Sweep {
            ra,
            dec,
            radius,
            t_min,
            t_max,
            keywords,
            services,
            aux,
            top,
            run_async,
        } => {
            let workers = config.workers;
            let http = HttpClient::new(config)?;
            let services = if services.is_empty() {
                RegistryClient::new(http.clone())
                    .search(ServiceKind::TableAccess, &keywords, aux)
                    .context("Registry search failed")?
            } else {
                services
                    .iter()
                    .map(|url| ad_hoc_service(url, ServiceKind::TableAccess))
                    .collect()
            };
            if services.is_empty() {
                bail!("No TAP services to query");
            }

            let tap = TapClient::new(http);
            let progress = spinner(format!("Reading schemas of {} services", services.len()));
            let snapshot = SchemaSnapshot::fetch(&tap, &services, workers)?;
            progress.finish_and_clear();
            eprintln!(
                "{} tables on {} services ({} unreadable)",
                snapshot.len(),
                services.len(),
                snapshot.failures().len()
            );

            let runner = BatchRunner::new(TapRunner::new(tap, execution_mode(run_async)), workers)?;
            let progress = spinner(format!("Querying {} tables", snapshot.len()));
            let outcome = runner.run(&snapshot, &POSITION_INTERVAL_TAGS, |target, columns| {
                adql::positional_interval_query(
                    target.table_name(),
                    columns,
                    ra,
                    dec,
                    radius,
                    t_min,
                    t_max,
                    top,
                )
            });
            progress.finish_and_clear();

            print_result(&outcome.uniform_table(&POSITION_INTERVAL_TAGS)?, format)?;
            print_sweep_summary(&snapshot, &outcome);
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("celestial_vo={level},vo={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => ClientConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    config.validate()?;
    Ok(config)
}

fn ad_hoc_service(url: &str, kind: ServiceKind) -> ServiceDescriptor {
    ServiceDescriptor::new(url, url, kind, url)
}

fn execution_mode(run_async: bool) -> ExecutionMode {
    if run_async {
        ExecutionMode::Async
    } else {
        ExecutionMode::Sync
    }
}

fn parse_upload(spec: &str) -> anyhow::Result<Upload> {
    let Some((name, path)) = spec.split_once('=') else {
        bail!("Upload '{}' is not of the form name=file.xml", spec);
    };
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read upload {}", path))?;
    Ok(Upload::from_votable_bytes(name, bytes)?)
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message);
    pb
}

fn print_services(services: &[ServiceDescriptor], format: OutputFormat) -> anyhow::Result<()> {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(services)?);
        return Ok(());
    }
    let rows: Vec<Vec<String>> = services
        .iter()
        .map(|s| {
            vec![
                s.ivoid.clone(),
                s.kind.to_string(),
                s.title.clone(),
                s.access_url.clone(),
            ]
        })
        .collect();
    print_rows(&["ivoid", "kind", "title", "access_url"], &rows, format)
}

fn print_audit(audit: &[(String, TagResolution)], format: OutputFormat) -> anyhow::Result<()> {
    if let OutputFormat::Json = format {
        let entries: Vec<_> = audit
            .iter()
            .map(|(tag, resolution)| serde_json::json!({ "tag": tag, "resolution": resolution }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    let rows: Vec<Vec<String>> = audit
        .iter()
        .map(|(tag, resolution)| match resolution {
            TagResolution::Absent => vec![tag.clone(), "absent".into(), String::new(), String::new()],
            TagResolution::Unique { column } => {
                vec![tag.clone(), "unique".into(), column.clone(), String::new()]
            }
            TagResolution::Ambiguous { chosen, others } => vec![
                tag.clone(),
                "ambiguous".into(),
                chosen.clone(),
                others.join(" "),
            ],
        })
        .collect();
    print_rows(&["tag", "outcome", "column", "also_matching"], &rows, format)
}

fn print_result(result: &ResultTable, format: OutputFormat) -> anyhow::Result<()> {
    let headers: Vec<&str> = result.columns().iter().map(|c| c.name.as_str()).collect();
    if let OutputFormat::Json = format {
        let records: Vec<serde_json::Map<String, serde_json::Value>> = result
            .rows()
            .iter()
            .map(|row| {
                headers
                    .iter()
                    .zip(row)
                    .map(|(name, value)| Ok((name.to_string(), serde_json::to_value(value)?)))
                    .collect::<serde_json::Result<_>>()
            })
            .collect::<serde_json::Result<_>>()?;
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    let rows: Vec<Vec<String>> = result
        .rows()
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect();
    print_rows(&headers, &rows, format)
}

fn print_rows(headers: &[&str], rows: &[Vec<String>], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => print_table(headers, rows),
        OutputFormat::Csv => print_csv(headers, rows),
        OutputFormat::Json => {
            let records: Vec<serde_json::Map<String, serde_json::Value>> = rows
                .iter()
                .map(|row| {
                    headers
                        .iter()
                        .zip(row)
                        .map(|(h, v)| (h.to_string(), serde_json::Value::String(v.clone())))
                        .collect()
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }
    Ok(())
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    println!("{}", format_line(headers, &widths));
    println!(
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  ")
    );
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        println!("{}", format_line(&cells, &widths));
    }

    if rows.is_empty() {
        println!("No rows.");
    } else {
        println!("\nTotal rows: {}", rows.len());
    }
}

fn format_line(cells: &[&str], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

fn print_csv(headers: &[&str], rows: &[Vec<String>]) {
    println!("{}", headers.iter().map(|h| csv_field(h)).collect::<Vec<_>>().join(","));
    for row in rows {
        println!("{}", row.iter().map(|c| csv_field(c)).collect::<Vec<_>>().join(","));
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn print_sweep_summary(snapshot: &SchemaSnapshot, outcome: &BatchOutcome) {
    eprintln!("\n=== Summary ===");
    eprintln!("Tables queried: {}", outcome.results.len());
    eprintln!("Rows: {}", outcome.total_rows());
    eprintln!("Skipped (missing tags): {}", outcome.skipped.len());
    for skipped in &outcome.skipped {
        eprintln!(
            "  {} {} missing {}",
            skipped.service_id,
            skipped.table,
            skipped.missing.join(", ")
        );
    }
    let failures = snapshot.failures().iter().chain(&outcome.failures);
    eprintln!(
        "Failed: {}",
        snapshot.failures().len() + outcome.failures.len()
    );
    for failure in failures {
        eprintln!("  FAILED {}", failure);
    }
}
