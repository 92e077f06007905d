//! tracing subscriber setup shared by all binaries
use tracing_subscriber::EnvFilter;

use crate::types::LogFormat;

/// `RUST_LOG` wins over the configured level
pub fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }
}
