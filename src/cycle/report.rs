//! Per-cycle outcome record
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Result, TickError};
use crate::types::{Epoch, Instrument};

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Connecting,
    Processing,
    Disconnecting,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstrumentStatus {
    Appended {
        rows: usize,
        skipped_overlap: usize,
        cursor: Epoch,
        partition: PathBuf,
    },
    UpToDate {
        cursor: Option<Epoch>,
    },
    Failed {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct InstrumentReport {
    pub instrument: Instrument,
    #[serde(flatten)]
    pub status: InstrumentStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phase: CyclePhase,
    /// Set when the cycle was aborted
    pub fatal: Option<String>,
    pub instruments: Vec<InstrumentReport>,
}

impl CycleReport {
    pub fn new() -> Self {
        CycleReport {
            cycle_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            phase: CyclePhase::Idle,
            fatal: None,
            instruments: Vec::new(),
        }
    }

    pub fn record(&mut self, instrument: &Instrument, status: InstrumentStatus) {
        self.instruments.push(InstrumentReport {
            instrument: instrument.clone(),
            status,
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn abort(&mut self, err: &TickError) {
        self.fatal = Some(format!("[{}] {}", err.error_code(), err));
        self.finish();
    }

    pub fn status_of(&self, instrument: &Instrument) -> Option<&InstrumentStatus> {
        self.instruments
            .iter()
            .find(|r| &r.instrument == instrument)
            .map(|r| &r.status)
    }

    pub fn all_succeeded(&self) -> bool {
        self.fatal.is_none()
            && self
                .instruments
                .iter()
                .all(|r| !matches!(r.status, InstrumentStatus::Failed { .. }))
    }

    pub fn failed_instruments(&self) -> Vec<&Instrument> {
        self.instruments
            .iter()
            .filter(|r| matches!(r.status, InstrumentStatus::Failed { .. }))
            .map(|r| &r.instrument)
            .collect()
    }

    pub fn rows_appended(&self) -> usize {
        self.instruments
            .iter()
            .map(|r| match r.status {
                InstrumentStatus::Appended { rows, .. } => rows,
                _ => 0,
            })
            .sum()
    }

    pub fn log_summary(&self) {
        if let Some(fatal) = &self.fatal {
            error!("❌ Cycle {} aborted during {:?}: {}", self.cycle_id, self.phase, fatal);
            return;
        }

        info!("✅ Cycle {} complete:", self.cycle_id);
        for report in &self.instruments {
            match &report.status {
                InstrumentStatus::Appended { rows, cursor, .. } => {
                    info!("   {}: +{} rows (cursor {})", report.instrument, rows, cursor)
                }
                InstrumentStatus::UpToDate { .. } => info!("   {}: up to date", report.instrument),
                InstrumentStatus::Failed { code, .. } => {
                    warn!("   {}: failed [{}]", report.instrument, code)
                }
            }
        }
        info!("   Total rows appended: {}", self.rows_appended());
    }

    /// Write the report as pretty JSON into `dir`
    pub async fn save(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;

        let filename = dir.join(format!(
            "cycle_report_{}_{}.json",
            self.started_at.format("%Y%m%d_%H%M%S"),
            &self.cycle_id.simple().to_string()[..8]
        ));
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&filename, json).await?;

        info!("💾 Saved cycle report to {}", filename.display());
        Ok(filename)
    }
}

impl Default for CycleReport {
    fn default() -> Self {
        CycleReport::new()
    }
}
