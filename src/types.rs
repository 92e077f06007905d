//! Core type definitions for the tick fetcher
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConnectionError, FetchError};
use crate::utils::time::PartitionTimezone;

/// Seconds since the Unix epoch, as reported by the remote service
pub type Epoch = i64;

/// Hard cap on ticks per history request imposed by the remote service
pub const MAX_TICKS_PER_FETCH: u32 = 5000;

/// Upper bound on `requests_per_second`
pub const MAX_REQUESTS_PER_SECOND: u32 = 1000;

pub const DEFAULT_API_URL: &str = "wss://ws.binaryws.com/websockets/v3?app_id=1089";

/// Opaque instrument identifier (e.g. `R_100`).
///
/// Doubles as a directory name under the storage root, so it is restricted to
/// a single, non-special path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Instrument(String);

impl Instrument {
    pub fn new(symbol: impl Into<String>) -> std::result::Result<Self, String> {
        let symbol = symbol.into();
        if symbol.is_empty() {
            return Err("instrument identifier is empty".to_string());
        }
        if symbol == "." || symbol == ".." {
            return Err(format!("instrument identifier {:?} is reserved", symbol));
        }
        if symbol
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control())
        {
            return Err(format!(
                "instrument identifier {:?} must be a single path component without whitespace",
                symbol
            ));
        }
        Ok(Instrument(symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Instrument {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Instrument::new(value)
    }
}

impl From<Instrument> for String {
    fn from(value: Instrument) -> Self {
        value.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One recorded price observation
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub epoch: Epoch,
    pub instrument: Instrument,
    pub price: f64,
}

/// Ticks returned by a single history request, in the order the remote sent them
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    instrument: Instrument,
    ticks: Vec<Tick>,
}

impl Batch {
    pub fn new(instrument: Instrument, ticks: Vec<Tick>) -> Self {
        Batch { instrument, ticks }
    }

    /// Zip the parallel `times`/`prices` arrays of a history response
    pub fn from_history(
        instrument: &Instrument,
        times: Vec<Epoch>,
        prices: Vec<f64>,
    ) -> std::result::Result<Self, FetchError> {
        if times.len() != prices.len() {
            return Err(FetchError::MismatchedLengths {
                times: times.len(),
                prices: prices.len(),
            });
        }

        let ticks = times
            .into_iter()
            .zip(prices)
            .map(|(epoch, price)| Tick {
                epoch,
                instrument: instrument.clone(),
                price,
            })
            .collect();

        Ok(Batch::new(instrument.clone(), ticks))
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn first_epoch(&self) -> Option<Epoch> {
        self.ticks.first().map(|t| t.epoch)
    }

    pub fn last_epoch(&self) -> Option<Epoch> {
        self.ticks.last().map(|t| t.epoch)
    }
}

/// API token. Never printed in full.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    /// Empty or whitespace-only tokens count as missing
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            None
        } else {
            Some(Credential(token))
        }
    }

    pub fn from_env(var: &str) -> std::result::Result<Self, ConnectionError> {
        std::env::var(var)
            .ok()
            .and_then(Credential::new)
            .ok_or_else(|| ConnectionError::MissingCredential(format!("${} is unset or blank", var)))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First and last four characters, for diagnostics
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Configuration for the tick fetcher
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // Remote service
    pub api_url: String,
    pub credential_env: String,

    // Fetch
    pub instruments: Vec<Instrument>,
    pub ticks_per_fetch: u32,
    pub requests_per_second: u32,
    pub max_retries: u32,
    pub retry_delay_sec: u64,

    // Timeouts
    pub connect_timeout_sec: u64,
    pub request_timeout_sec: u64,

    // Storage
    pub data_dir: PathBuf,
    pub partition_timezone: PartitionTimezone,
    pub report_dir: Option<PathBuf>,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: DEFAULT_API_URL.to_string(),
            credential_env: "DERIV_API_TOKEN".to_string(),
            instruments: ["R_10", "R_75", "R_100"]
                .iter()
                .map(|s| Instrument(s.to_string()))
                .collect(),
            ticks_per_fetch: MAX_TICKS_PER_FETCH,
            requests_per_second: 1,
            max_retries: 3,
            retry_delay_sec: 5,
            connect_timeout_sec: 30,
            request_timeout_sec: 30,
            data_dir: PathBuf::from("data"),
            partition_timezone: PartitionTimezone::Local,
            report_dir: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_sec)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_sec)
    }

    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retry_delay_sec)
    }
}
