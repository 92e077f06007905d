//! Append-only persistence of fetched batches
use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::data::partition::{
    read_last_valid_row, tail_state, PartitionLayout, PartitionRow, PARTITION_HEADER,
};
use crate::error::WriteError;
use crate::types::{Batch, Epoch, Instrument, Tick};
use crate::utils::format_epoch;

/// Result of one successful `write`
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    /// Partition that was appended to, `None` when every tick was already stored
    pub path: Option<PathBuf>,
    pub rows_written: usize,
    /// Leading ticks dropped because storage already had them
    pub skipped_overlap: usize,
    /// Last epoch now on disk for the instrument
    pub cursor: Epoch,
    /// The partition file did not exist before this write
    pub created: bool,
}

pub struct PartitionWriter {
    layout: PartitionLayout,
}

impl PartitionWriter {
    pub fn new(layout: PartitionLayout) -> Self {
        PartitionWriter { layout }
    }

    /// Append `batch` to the partition named by the date of its first new tick.
    ///
    /// The header is written only when the file is empty. Ticks at or below the
    /// instrument's last stored epoch are dropped first, so replaying a batch
    /// is harmless.
    pub async fn write(&self, instrument: &Instrument, batch: &Batch) -> Result<WriteOutcome, WriteError> {
        if batch.is_empty() {
            return Err(WriteError::EmptyBatch);
        }
        if batch.instrument() != instrument {
            return Err(WriteError::InstrumentMismatch {
                expected: instrument.to_string(),
                found: batch.instrument().to_string(),
            });
        }
        check_ordering(instrument, batch.ticks())?;

        let stored = self.stored_last_epoch(instrument).await?;
        let skip = match stored {
            Some(last) => batch.ticks().iter().take_while(|t| t.epoch <= last).count(),
            None => 0,
        };
        let fresh = &batch.ticks()[skip..];

        if skip > 0 {
            info!("{}: dropped {} tick(s) already on disk", instrument, skip);
        }

        let Some(first) = fresh.first() else {
            // All overlap; `stored` is Some whenever skip > 0
            let cursor = stored.unwrap_or_default();
            return Ok(WriteOutcome {
                path: None,
                rows_written: 0,
                skipped_overlap: skip,
                cursor,
                created: false,
            });
        };

        let date = self
            .layout
            .date_for_epoch(first.epoch)
            .ok_or(WriteError::EpochOutOfRange(first.epoch))?;
        let path = self.layout.path_for(instrument, date);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (len, ends_with_newline) = match tail_state(&path).await {
            Ok(state) => state,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (0, true),
            Err(e) => return Err(e.into()),
        };
        let created = len == 0;

        // The target may be older than the newest partition; never append below its tail
        if !created {
            if let Some(row) = read_last_valid_row(&path).await? {
                if first.epoch < row.epoch {
                    return Err(WriteError::OutOfOrder {
                        index: skip,
                        previous: row.epoch,
                        epoch: first.epoch,
                    });
                }
            }
        }

        let mut buffer = Vec::new();
        if !ends_with_newline {
            warn!("⚠️  {} ends in a torn line; starting a new line", path.display());
            buffer.push(b'\n');
        }
        buffer.extend(encode_rows(fresh, created)?);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&buffer).await?;
        file.sync_all().await?;

        let cursor = fresh[fresh.len() - 1].epoch;
        debug!(
            "Appended {} rows to {} (cursor {} = {})",
            fresh.len(),
            path.display(),
            cursor,
            format_epoch(cursor)
        );

        Ok(WriteOutcome {
            path: Some(path),
            rows_written: fresh.len(),
            skipped_overlap: skip,
            cursor,
            created,
        })
    }

    /// Last parsable epoch of the newest partition that has one. Partition
    /// dates never go backwards, so this is the last tick stored for the
    /// instrument. A torn tail is skipped rather than disabling the check.
    async fn stored_last_epoch(&self, instrument: &Instrument) -> Result<Option<Epoch>, WriteError> {
        let partitions = self.layout.list_partitions(instrument).await?;

        for (_, path) in partitions.iter().rev() {
            if let Some(row) = read_last_valid_row(path).await? {
                return Ok(Some(row.epoch));
            }
            warn!("⚠️  {} has no readable rows", path.display());
        }
        Ok(None)
    }
}

/// Decreasing epochs are rejected; equal neighbours are kept but reported
fn check_ordering(instrument: &Instrument, ticks: &[Tick]) -> Result<(), WriteError> {
    for (index, pair) in ticks.windows(2).enumerate() {
        let (previous, epoch) = (pair[0].epoch, pair[1].epoch);
        if epoch < previous {
            return Err(WriteError::OutOfOrder {
                index: index + 1,
                previous,
                epoch,
            });
        }
        if epoch == previous {
            warn!("⚠️  {}: two ticks share epoch {}", instrument, epoch);
        }
    }
    Ok(())
}

fn encode_rows(ticks: &[Tick], with_header: bool) -> Result<Vec<u8>, WriteError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    if with_header {
        wtr.write_record(PARTITION_HEADER)?;
    }
    for tick in ticks {
        wtr.serialize(PartitionRow::from(tick))?;
    }

    wtr.into_inner().map_err(|e| WriteError::Io(e.into_error()))
}
