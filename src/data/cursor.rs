//! Resume-point derivation from persisted partitions
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::data::partition::{read_last_line, PartitionLayout, PartitionRow, PARTITION_HEADER};
use crate::error::ResolutionAnomaly;
use crate::types::{Epoch, Instrument};

/// Source of "now"; injectable so day-boundary behaviour can be tested
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Finds the last recorded epoch for an instrument.
///
/// Nothing is cached: every call reads storage, so the cursor can never
/// disagree with what is on disk.
#[derive(Clone)]
pub struct CursorResolver {
    layout: PartitionLayout,
    clock: Clock,
}

impl CursorResolver {
    pub fn new(layout: PartitionLayout) -> Self {
        CursorResolver {
            layout,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Today's partition, else yesterday's, else no cursor.
    ///
    /// A partition holding only a header is skipped in favour of the previous
    /// day, since no tick was ever written to it. An unreadable or corrupt tail
    /// is treated differently: it yields no cursor and a warning, and does not
    /// fall back to yesterday, whose last tick may predate what today holds.
    /// The writer still trims overlap against the last parsable row.
    pub async fn resolve(&self, instrument: &Instrument) -> Option<Epoch> {
        let today = self.layout.timezone().date_of((self.clock)());
        let candidates = [Some(today), today.pred_opt()];

        for date in candidates.into_iter().flatten() {
            let path = self.layout.path_for(instrument, date);
            match last_recorded_epoch(&path).await {
                Ok(Some(epoch)) => {
                    debug!("Cursor for {} is {} (from {})", instrument, epoch, path.display());
                    return Some(epoch);
                }
                Ok(None) => continue,
                Err(anomaly @ ResolutionAnomaly::EmptyPartition(_)) => {
                    warn!("⚠️  {}: {}", instrument, anomaly);
                    continue;
                }
                Err(anomaly) => {
                    warn!("⚠️  {}: {} - fetching without a cursor", instrument, anomaly);
                    return None;
                }
            }
        }

        debug!("No prior data for {}", instrument);
        None
    }
}

/// Epoch of the strictly last row of `path`; `Ok(None)` when the file does not exist.
pub async fn last_recorded_epoch(path: &Path) -> Result<Option<Epoch>, ResolutionAnomaly> {
    let io_anomaly = |source| ResolutionAnomaly::Io {
        path: path.to_path_buf(),
        source,
    };

    if !tokio::fs::try_exists(path).await.map_err(io_anomaly)? {
        return Ok(None);
    }

    let line = read_last_line(path)
        .await
        .map_err(io_anomaly)?
        .ok_or_else(|| ResolutionAnomaly::EmptyPartition(path.to_path_buf()))?;

    if line.trim() == PARTITION_HEADER.join(",") {
        return Err(ResolutionAnomaly::EmptyPartition(path.to_path_buf()));
    }

    match PartitionRow::parse_line(&line) {
        Some(row) => Ok(Some(row.epoch)),
        None => Err(ResolutionAnomaly::UnparsableRecord {
            path: path.to_path_buf(),
            line,
        }),
    }
}
