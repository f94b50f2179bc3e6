//! Finds TAP services by keyword and reports which of their tables can serve
//! a positional time-interval query, without running the query itself.
//!
//! Usage: ucd_sweep [keyword ...]

use celestial_vo::batch::SchemaSnapshot;
use celestial_vo::service::{HttpClient, RegistryClient, TapClient};
use celestial_vo::ucd::POSITION_INTERVAL_TAGS;
use celestial_vo::{ClientConfig, ServiceKind};

fn main() -> anyhow::Result<()> {
    let mut keywords: Vec<String> = std::env::args().skip(1).collect();
    if keywords.is_empty() {
        keywords.push("heasarc".to_string());
    }

    let config = ClientConfig::default().with_env_overrides()?;
    let workers = config.workers;
    let http = HttpClient::new(config)?;

    let services = RegistryClient::new(http.clone()).search(ServiceKind::TableAccess, &keywords, false)?;
    println!("{} TAP services match {:?}", services.len(), keywords);

    let snapshot = SchemaSnapshot::fetch(&TapClient::new(http), &services, workers)?;
    let plan = snapshot.plan(&POSITION_INTERVAL_TAGS);

    println!("\nUsable tables ({}):", plan.ready.len());
    for (target, columns) in &plan.ready {
        println!(
            "  {:<40} ra={} dec={} start={} end={}",
            target.table_name(),
            columns["pos.eq.ra"],
            columns["pos.eq.dec"],
            columns["time.start"],
            columns["time.end"],
        );
    }

    println!("\nSkipped tables ({}):", plan.skipped.len());
    for skipped in plan.skipped.iter().take(20) {
        println!("  {:<40} missing {}", skipped.table, skipped.missing.join(", "));
    }

    for failure in snapshot.failures() {
        eprintln!("FAILED {}", failure);
    }

    Ok(())
}
