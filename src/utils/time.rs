//! Calendar helpers for partition dating
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::types::Epoch;

/// Zone whose calendar day names a partition.
///
/// Writer and cursor resolver must agree on this, otherwise "today" and the
/// date of a freshly written tick drift apart around midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum PartitionTimezone {
    /// Process-local zone
    #[default]
    Local,
    Utc,
    Named(Tz),
}

impl PartitionTimezone {
    /// Calendar date of an instant in this zone
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            PartitionTimezone::Local => instant.with_timezone(&Local).date_naive(),
            PartitionTimezone::Utc => instant.date_naive(),
            PartitionTimezone::Named(tz) => instant.with_timezone(tz).date_naive(),
        }
    }

    /// Calendar date of an epoch, `None` if the epoch is outside chrono's range
    pub fn date_of_epoch(&self, epoch: Epoch) -> Option<NaiveDate> {
        epoch_to_utc(epoch).map(|instant| self.date_of(instant))
    }
}

impl FromStr for PartitionTimezone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "local" | "Local" | "LOCAL" => Ok(PartitionTimezone::Local),
            "utc" | "UTC" | "Utc" => Ok(PartitionTimezone::Utc),
            other => other
                .parse::<Tz>()
                .map(PartitionTimezone::Named)
                .map_err(|_| format!("unknown timezone {:?}", other)),
        }
    }
}

impl TryFrom<String> for PartitionTimezone {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for PartitionTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionTimezone::Local => f.write_str("local"),
            PartitionTimezone::Utc => f.write_str("UTC"),
            PartitionTimezone::Named(tz) => write!(f, "{}", tz.name()),
        }
    }
}

pub fn epoch_to_utc(epoch: Epoch) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(epoch, 0).single()
}

/// RFC 3339 rendering for log lines; falls back to the raw number
pub fn format_epoch(epoch: Epoch) -> String {
    epoch_to_utc(epoch)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| epoch.to_string())
}
