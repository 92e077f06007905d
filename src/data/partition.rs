//! Partition addressing: one CSV file per (instrument, calendar date)
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::types::{Epoch, Instrument, Tick};
use crate::utils::time::PartitionTimezone;

/// Literal first row of every partition
pub const PARTITION_HEADER: [&str; 3] = ["epoch", "symbol", "price"];

const DATE_FORMAT: &str = "%Y-%m-%d";
const TAIL_CHUNK: u64 = 4096;

/// One data row as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRow {
    pub epoch: Epoch,
    pub symbol: String,
    pub price: f64,
}

impl From<&Tick> for PartitionRow {
    fn from(tick: &Tick) -> Self {
        PartitionRow {
            epoch: tick.epoch,
            symbol: tick.instrument.as_str().to_string(),
            price: tick.price,
        }
    }
}

impl PartitionRow {
    /// Parse a single CSV line; `None` for headers, torn lines and garbage
    pub fn parse_line(line: &str) -> Option<PartitionRow> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(line.trim().as_bytes());

        let record = reader.records().next()?.ok()?;
        if record.len() != PARTITION_HEADER.len() {
            return None;
        }
        record.deserialize(None).ok()
    }
}

/// Maps instruments and dates onto paths under the storage root
#[derive(Debug, Clone)]
pub struct PartitionLayout {
    root: PathBuf,
    timezone: PartitionTimezone,
}

impl PartitionLayout {
    pub fn new(root: impl Into<PathBuf>, timezone: PartitionTimezone) -> Self {
        PartitionLayout {
            root: root.into(),
            timezone,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timezone(&self) -> PartitionTimezone {
        self.timezone
    }

    pub fn instrument_dir(&self, instrument: &Instrument) -> PathBuf {
        self.root.join(instrument.as_str())
    }

    pub fn path_for(&self, instrument: &Instrument, date: NaiveDate) -> PathBuf {
        self.instrument_dir(instrument)
            .join(format!("{}.csv", date.format(DATE_FORMAT)))
    }

    pub fn date_for_epoch(&self, epoch: Epoch) -> Option<NaiveDate> {
        self.timezone.date_of_epoch(epoch)
    }

    /// Create the per-instrument directories (idempotent)
    pub async fn provision(&self, instruments: &[Instrument]) -> std::io::Result<()> {
        for instrument in instruments {
            let dir = self.instrument_dir(instrument);
            tokio::fs::create_dir_all(&dir).await?;
            debug!("Partition directory ready: {}", dir.display());
        }
        Ok(())
    }

    /// All partitions of an instrument, oldest first. Unrelated files are ignored.
    pub async fn list_partitions(
        &self,
        instrument: &Instrument,
    ) -> std::io::Result<Vec<(NaiveDate, PathBuf)>> {
        let dir = self.instrument_dir(instrument);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut partitions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let date = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok());
            if let Some(date) = date {
                partitions.push((date, path));
            }
        }

        partitions.sort_by_key(|(date, _)| *date);
        Ok(partitions)
    }
}

/// Last non-blank line of a file, read backwards in fixed-size chunks so the
/// cost does not grow with the partition.
pub async fn read_last_line(path: &Path) -> std::io::Result<Option<String>> {
    let mut file = File::open(path).await?;
    let mut pos = file.metadata().await?.len();
    let mut buf: Vec<u8> = Vec::new();

    while pos > 0 {
        let start = pos.saturating_sub(TAIL_CHUNK);
        let mut chunk = vec![0u8; (pos - start) as usize];
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(&mut chunk).await?;
        chunk.extend_from_slice(&buf);
        buf = chunk;
        pos = start;

        let Some(end) = buf.iter().rposition(|b| !b.is_ascii_whitespace()).map(|i| i + 1) else {
            continue;
        };
        if let Some(newline) = buf[..end].iter().rposition(|b| *b == b'\n') {
            return Ok(Some(String::from_utf8_lossy(&buf[newline + 1..end]).into_owned()));
        }
        if pos == 0 {
            return Ok(Some(String::from_utf8_lossy(&buf[..end]).into_owned()));
        }
    }

    Ok(None)
}

/// Last row that parses, skipping a torn tail or other trailing garbage.
/// `None` when no data row exists.
pub async fn read_last_valid_row(path: &Path) -> std::io::Result<Option<PartitionRow>> {
    let mut file = File::open(path).await?;
    let mut pos = file.metadata().await?.len();
    // Start of the earliest line read so far; may be incomplete
    let mut carry: Vec<u8> = Vec::new();

    while pos > 0 {
        let start = pos.saturating_sub(TAIL_CHUNK);
        let mut chunk = vec![0u8; (pos - start) as usize];
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(&mut chunk).await?;
        chunk.extend_from_slice(&carry);
        pos = start;

        let boundary = if pos == 0 {
            0
        } else {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(i) => i + 1,
                None => chunk.len(),
            }
        };

        for line in chunk[boundary..].split(|b| *b == b'\n').rev() {
            if let Some(row) = PartitionRow::parse_line(&String::from_utf8_lossy(line)) {
                return Ok(Some(row));
            }
        }
        carry = chunk[..boundary].to_vec();
    }

    Ok(None)
}

/// Length of the file and whether its last byte is a newline
pub async fn tail_state(path: &Path) -> std::io::Result<(u64, bool)> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok((0, true));
    }

    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok((len, last[0] == b'\n'))
}
