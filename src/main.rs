//! Main entry point: run one fetch cycle and exit
use std::process::ExitCode;

use tracing::{error, info};

use tickfetch::{
    config::load_from_env,
    cycle::FetchCycle,
    error::{Result, TickError},
    utils::init_tracing,
    Credential,
};

async fn run() -> Result<()> {
    let config = load_from_env()?;
    init_tracing(&config.log_level, config.log_format);

    info!("🚀 tickfetch starting");
    info!(
        "   {} instruments -> {} (partition timezone {})",
        config.instruments.len(),
        config.data_dir.display(),
        config.partition_timezone
    );

    let credential = Credential::from_env(&config.credential_env)?;
    info!("🔑 Using credential {}", credential.masked());

    let cycle = FetchCycle::from_config(&config, Some(credential));
    cycle.provision().await?;

    let report = cycle.run().await?;
    if !report.all_succeeded() {
        info!(
            "{} instrument(s) will be retried next cycle",
            report.failed_instruments().len()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be up yet if the config itself was bad
            if matches!(e, TickError::Config(_)) {
                eprintln!("[{}] {}", e.error_code(), e);
            }
            error!("❌ Fatal [{}]: {}", e.error_code(), e);
            ExitCode::FAILURE
        }
    }
}
