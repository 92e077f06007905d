//! Offline audit of stored partitions
//! Usage: cargo run --bin verify_partitions [instrument...]
use std::process::ExitCode;

use tracing::{info, warn};

use tickfetch::config::load_from_env;
use tickfetch::data::{audit_instrument, PartitionLayout};
use tickfetch::utils::{format_epoch, init_tracing};
use tickfetch::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let config = load_from_env()?;
    init_tracing(&config.log_level, config.log_format);

    let requested: Vec<String> = std::env::args().skip(1).collect();
    let instruments = if requested.is_empty() {
        config.instruments.clone()
    } else {
        requested
            .into_iter()
            .map(Instrument::new)
            .collect::<Result<Vec<_>, _>>()
            .map_err(anyhow::Error::msg)?
    };

    let layout = PartitionLayout::new(config.data_dir.clone(), config.partition_timezone);
    info!("🔍 Auditing {} instruments under {}", instruments.len(), layout.root().display());

    let mut total_issues = 0;
    for instrument in &instruments {
        let report = audit_instrument(&layout, instrument).await?;

        info!(
            "{}: {} partitions, {} rows",
            instrument,
            report.partitions.len(),
            report.total_rows
        );
        for partition in &report.partitions {
            info!(
                "   {}  rows={}  first={}  last={}",
                partition.date,
                partition.rows,
                partition.first_epoch.map(format_epoch).unwrap_or_else(|| "-".into()),
                partition.last_epoch.map(format_epoch).unwrap_or_else(|| "-".into()),
            );
        }
        for issue in &report.issues {
            warn!("   ⚠️  {}", issue);
        }

        total_issues += report.issues.len();
    }

    if total_issues == 0 {
        info!("✅ No issues found");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("❌ {} issue(s) found", total_issues);
        Ok(ExitCode::FAILURE)
    }
}
