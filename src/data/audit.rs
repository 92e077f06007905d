//! Offline consistency check over every partition of an instrument
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Serialize;

use crate::data::partition::{PartitionLayout, PartitionRow, PARTITION_HEADER};
use crate::types::{Epoch, Instrument};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionSummary {
    pub date: NaiveDate,
    pub path: PathBuf,
    pub rows: usize,
    pub first_epoch: Option<Epoch>,
    pub last_epoch: Option<Epoch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditIssue {
    MissingHeader { path: PathBuf },
    ExtraHeader { path: PathBuf, line: u64 },
    Unparsable { path: PathBuf, line: u64 },
    Duplicate { path: PathBuf, line: u64, epoch: Epoch },
    Regression { path: PathBuf, line: u64, previous: Epoch, epoch: Epoch },
}

impl fmt::Display for AuditIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditIssue::MissingHeader { path } => write!(f, "{}: missing header", path.display()),
            AuditIssue::ExtraHeader { path, line } => {
                write!(f, "{}:{}: repeated header", path.display(), line)
            }
            AuditIssue::Unparsable { path, line } => {
                write!(f, "{}:{}: unparsable row", path.display(), line)
            }
            AuditIssue::Duplicate { path, line, epoch } => {
                write!(f, "{}:{}: duplicate epoch {}", path.display(), line, epoch)
            }
            AuditIssue::Regression { path, line, previous, epoch } => write!(
                f,
                "{}:{}: epoch {} goes back from {}",
                path.display(),
                line,
                epoch,
                previous
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub instrument: Instrument,
    pub partitions: Vec<PartitionSummary>,
    pub total_rows: usize,
    pub issues: Vec<AuditIssue>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn epoch_range(&self) -> Option<(Epoch, Epoch)> {
        let first = self.partitions.iter().find_map(|p| p.first_epoch)?;
        let last = self.partitions.iter().rev().find_map(|p| p.last_epoch)?;
        Some((first, last))
    }
}

/// Walk the instrument's partitions in date order, checking the header rule
/// and that epochs strictly increase across the whole concatenation.
pub async fn audit_instrument(
    layout: &PartitionLayout,
    instrument: &Instrument,
) -> std::io::Result<AuditReport> {
    let mut report = AuditReport {
        instrument: instrument.clone(),
        partitions: Vec::new(),
        total_rows: 0,
        issues: Vec::new(),
    };
    let mut previous: Option<Epoch> = None;

    for (date, path) in layout.list_partitions(instrument).await? {
        let content = tokio::fs::read(&path).await?;
        let mut summary = PartitionSummary {
            date,
            path: path.clone(),
            rows: 0,
            first_epoch: None,
            last_epoch: None,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_slice());

        let mut seen_any = false;
        for (index, record) in reader.records().enumerate() {
            let line = record
                .as_ref()
                .ok()
                .and_then(|r| r.position())
                .map(|p| p.line())
                .unwrap_or(index as u64 + 1);

            let record = match record {
                Ok(record) => record,
                Err(_) => {
                    report.issues.push(AuditIssue::Unparsable { path: path.clone(), line });
                    continue;
                }
            };

            let is_header = record.iter().eq(PARTITION_HEADER.iter().copied());
            if !seen_any {
                seen_any = true;
                if !is_header {
                    report.issues.push(AuditIssue::MissingHeader { path: path.clone() });
                } else {
                    continue;
                }
            } else if is_header {
                report.issues.push(AuditIssue::ExtraHeader { path: path.clone(), line });
                continue;
            }

            let row: PartitionRow = match (record.len(), record.deserialize(None)) {
                (3, Ok(row)) => row,
                _ => {
                    report.issues.push(AuditIssue::Unparsable { path: path.clone(), line });
                    continue;
                }
            };

            match previous {
                Some(prev) if row.epoch == prev => report.issues.push(AuditIssue::Duplicate {
                    path: path.clone(),
                    line,
                    epoch: row.epoch,
                }),
                Some(prev) if row.epoch < prev => report.issues.push(AuditIssue::Regression {
                    path: path.clone(),
                    line,
                    previous: prev,
                    epoch: row.epoch,
                }),
                _ => {}
            }
            previous = Some(row.epoch);

            summary.rows += 1;
            if summary.first_epoch.is_none() {
                summary.first_epoch = Some(row.epoch);
            }
            summary.last_epoch = Some(row.epoch);
        }

        if !seen_any {
            report.issues.push(AuditIssue::MissingHeader { path: path.clone() });
        }

        report.total_rows += summary.rows;
        report.partitions.push(summary);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::PartitionTimezone;

    async fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, AuditReport) {
        let dir = tempfile::tempdir().unwrap();
        let layout = PartitionLayout::new(dir.path(), PartitionTimezone::Utc);
        let x = Instrument::new("X").unwrap();
        layout.provision(&[x.clone()]).await.unwrap();
        for (name, content) in files {
            tokio::fs::write(layout.instrument_dir(&x).join(name), content).await.unwrap();
        }
        let report = audit_instrument(&layout, &x).await.unwrap();
        (dir, report)
    }

    #[tokio::test]
    async fn test_clean_storage() {
        let (_dir, report) = setup(&[
            ("2024-01-01.csv", "epoch,symbol,price\n100,X,1.0\n101,X,1.1\n"),
            ("2024-01-02.csv", "epoch,symbol,price\n200,X,2.0\n"),
        ])
        .await;

        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.partitions.len(), 2);
        assert_eq!(report.epoch_range(), Some((100, 200)));
    }

    #[tokio::test]
    async fn test_detects_header_problems() {
        let (_dir, report) = setup(&[
            ("2024-01-01.csv", "100,X,1.0\n"),
            ("2024-01-02.csv", "epoch,symbol,price\n200,X,2.0\nepoch,symbol,price\n201,X,2.1\n"),
        ])
        .await;

        assert!(matches!(report.issues[0], AuditIssue::MissingHeader { .. }));
        assert!(matches!(report.issues[1], AuditIssue::ExtraHeader { line: 3, .. }));
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.total_rows, 3);
    }

    #[tokio::test]
    async fn test_detects_duplicates_and_regressions_across_partitions() {
        let (_dir, report) = setup(&[
            ("2024-01-01.csv", "epoch,symbol,price\n100,X,1.0\n150,X,1.5\n"),
            ("2024-01-02.csv", "epoch,symbol,price\n150,X,1.5\n120,X,1.2\n1x0,X,oops\n"),
        ])
        .await;

        assert_eq!(report.issues.len(), 3);
        assert!(matches!(report.issues[0], AuditIssue::Duplicate { epoch: 150, line: 2, .. }));
        assert!(matches!(
            report.issues[1],
            AuditIssue::Regression { previous: 150, epoch: 120, .. }
        ));
        assert!(matches!(report.issues[2], AuditIssue::Unparsable { line: 4, .. }));
    }
}
