//! One fetch cycle: connect, resolve/fetch/write per instrument, disconnect
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use futures_util::FutureExt;
use tracing::{debug, error, info};

use crate::api::{BatchFetcher, Connector, Session};
use crate::cycle::report::{CyclePhase, CycleReport, InstrumentStatus};
use crate::data::{Clock, CursorResolver, PartitionLayout, PartitionWriter};
use crate::error::{Result, TickError};
use crate::types::{Config, Credential, Instrument};

pub struct FetchCycle {
    connector: Connector,
    instruments: Vec<Instrument>,
    max_count: u32,
    fetcher: BatchFetcher,
    resolver: CursorResolver,
    writer: PartitionWriter,
    layout: PartitionLayout,
    report_dir: Option<PathBuf>,
}

impl FetchCycle {
    pub fn new(config: &Config, connector: Connector) -> Self {
        let layout = PartitionLayout::new(config.data_dir.clone(), config.partition_timezone);

        FetchCycle {
            connector,
            instruments: config.instruments.clone(),
            max_count: config.ticks_per_fetch,
            fetcher: BatchFetcher::from_config(config),
            resolver: CursorResolver::new(layout.clone()),
            writer: PartitionWriter::new(layout.clone()),
            layout,
            report_dir: config.report_dir.clone(),
        }
    }

    /// Cycle against the real service
    pub fn from_config(config: &Config, credential: Option<Credential>) -> Self {
        FetchCycle::new(config, Connector::websocket(config, credential))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.resolver = self.resolver.with_clock(clock);
        self
    }

    /// Create `data_dir/<instrument>/` for every configured instrument
    pub async fn provision(&self) -> Result<()> {
        self.layout.provision(&self.instruments).await?;
        Ok(())
    }

    /// Run exactly one cycle.
    ///
    /// Only a failed connection or a panic ends the cycle early; both come
    /// back as `Err`. Per-instrument failures are recorded in the report.
    pub async fn run(&self) -> Result<CycleReport> {
        let mut report = CycleReport::new();
        info!(
            "🔄 Starting cycle {} for {} instruments",
            report.cycle_id,
            self.instruments.len()
        );

        let outcome = self.drive(&mut report).await;
        match &outcome {
            Ok(()) => report.finish(),
            Err(e) => report.abort(e),
        }
        report.log_summary();

        if let Some(dir) = &self.report_dir {
            if let Err(e) = report.save(dir).await {
                error!("Failed to save cycle report: {}", e);
            }
        }

        outcome.map(|()| report)
    }

    async fn drive(&self, report: &mut CycleReport) -> Result<()> {
        enter(report, CyclePhase::Connecting);
        let mut session = self.connector.connect().await?;

        enter(report, CyclePhase::Processing);
        let processed = AssertUnwindSafe(self.process_all(&mut session, report))
            .catch_unwind()
            .await;

        enter(report, CyclePhase::Disconnecting);
        session.close().await;

        match processed {
            Ok(()) => {
                enter(report, CyclePhase::Done);
                Ok(())
            }
            Err(payload) => Err(TickError::Internal(format!(
                "panic while processing instruments: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    async fn process_all(&self, session: &mut Session, report: &mut CycleReport) {
        for instrument in &self.instruments {
            let status = match self.process_instrument(session, instrument).await {
                Ok(status) => status,
                Err(e) => {
                    error!("❌ {} failed [{}]: {}", instrument, e.error_code(), e);
                    InstrumentStatus::Failed {
                        code: e.error_code().to_string(),
                        message: e.to_string(),
                    }
                }
            };
            report.record(instrument, status);
        }
    }

    async fn process_instrument(
        &self,
        session: &mut Session,
        instrument: &Instrument,
    ) -> Result<InstrumentStatus> {
        let cursor = self.resolver.resolve(instrument).await;

        let batch = self
            .fetcher
            .fetch(session, instrument, self.max_count, cursor)
            .await?;
        if batch.is_empty() {
            info!("{} is up to date", instrument);
            return Ok(InstrumentStatus::UpToDate { cursor });
        }

        let outcome = self.writer.write(instrument, &batch).await?;
        match outcome.path {
            Some(partition) => {
                info!(
                    "📊 {}: appended {} ticks to {}",
                    instrument,
                    outcome.rows_written,
                    partition.display()
                );
                Ok(InstrumentStatus::Appended {
                    rows: outcome.rows_written,
                    skipped_overlap: outcome.skipped_overlap,
                    cursor: outcome.cursor,
                    partition,
                })
            }
            None => Ok(InstrumentStatus::UpToDate {
                cursor: Some(outcome.cursor),
            }),
        }
    }
}

fn enter(report: &mut CycleReport, phase: CyclePhase) {
    debug!("Cycle {}: {:?} -> {:?}", report.cycle_id, report.phase, phase);
    report.phase = phase;
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use crate::api::mock::{Fault, MockRemote};
    use crate::data::audit_instrument;
    use crate::types::Epoch;
    use crate::utils::time::PartitionTimezone;

    const JAN_1: Epoch = 1_704_067_200;
    const JAN_2: Epoch = 1_704_153_600;

    struct Harness {
        _dir: tempfile::TempDir,
        remote: MockRemote,
        config: Config,
        layout: PartitionLayout,
    }

    impl Harness {
        fn new(instruments: &[&str]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = Config {
                instruments: instruments.iter().map(|s| Instrument::new(*s).unwrap()).collect(),
                data_dir: dir.path().to_path_buf(),
                partition_timezone: PartitionTimezone::Utc,
                retry_delay_sec: 0,
                requests_per_second: 1000,
                ..Config::default()
            };
            let layout = PartitionLayout::new(dir.path(), PartitionTimezone::Utc);
            Harness {
                _dir: dir,
                remote: MockRemote::new(),
                config,
                layout,
            }
        }

        fn cycle_at(&self, now: Epoch) -> FetchCycle {
            let connector = Connector::new(
                "ws://mock",
                Credential::new("test-token"),
                Box::new(self.remote.clone()),
            )
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(200));

            let now = Utc.timestamp_opt(now, 0).unwrap();
            FetchCycle::new(&self.config, connector).with_clock(Arc::new(move || now))
        }

        async fn run_at(&self, now: Epoch) -> CycleReport {
            self.cycle_at(now).run().await.unwrap()
        }

        fn instrument(&self, symbol: &str) -> Instrument {
            Instrument::new(symbol).unwrap()
        }

        async fn stored_epochs(&self, symbol: &str) -> Vec<Epoch> {
            let x = self.instrument(symbol);
            let mut epochs = Vec::new();
            for (_, path) in self.layout.list_partitions(&x).await.unwrap() {
                let content = tokio::fs::read_to_string(path).await.unwrap();
                for line in content.lines().skip(1) {
                    epochs.push(line.split(',').next().unwrap().parse().unwrap());
                }
            }
            epochs
        }
    }

    #[tokio::test]
    async fn test_three_ticks_then_caught_up() {
        let h = Harness::new(&["X"]);
        h.remote.push_ticks("X", &[(1000, 1.0), (1001, 1.1), (1002, 1.2)]);
        let x = h.instrument("X");

        let first = h.run_at(1100).await;
        assert_eq!(first.phase, CyclePhase::Done);
        assert!(matches!(
            first.status_of(&x),
            Some(InstrumentStatus::Appended { rows: 3, cursor: 1002, .. })
        ));

        let date = h.layout.date_for_epoch(1000).unwrap();
        let path = h.layout.path_for(&x, date);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "epoch,symbol,price\n1000,X,1.0\n1001,X,1.1\n1002,X,1.2\n");

        let second = h.run_at(1200).await;
        assert!(matches!(
            second.status_of(&x),
            Some(InstrumentStatus::UpToDate { cursor: Some(1002) })
        ));
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), content);

        let starts: Vec<Option<i64>> = h
            .remote
            .history_requests("X")
            .iter()
            .map(|r| r.get("start").and_then(serde_json::Value::as_i64))
            .collect();
        assert_eq!(starts, vec![None, Some(1003)]);
        assert_eq!(h.remote.closes(), 2);
    }

    #[tokio::test]
    async fn test_repeated_cycles_are_idempotent() {
        let h = Harness::new(&["X", "Y"]);
        h.remote.push_ticks("X", &[(JAN_1 + 10, 1.0), (JAN_1 + 11, 1.1)]);
        h.remote.push_ticks("Y", &[(JAN_1 + 20, 2.0)]);

        h.run_at(JAN_1 + 100).await;
        let before = (h.stored_epochs("X").await, h.stored_epochs("Y").await);

        for _ in 0..3 {
            let report = h.run_at(JAN_1 + 200).await;
            assert_eq!(report.rows_appended(), 0);
        }
        assert_eq!((h.stored_epochs("X").await, h.stored_epochs("Y").await), before);
    }

    #[tokio::test]
    async fn test_no_gap_or_duplicate_across_day_boundary() {
        let h = Harness::new(&["X"]);
        let x = h.instrument("X");

        h.remote.push_ticks("X", &[(JAN_2 - 30, 1.0), (JAN_2 - 20, 1.1)]);
        h.run_at(JAN_2 - 10).await;

        // After midnight: today's partition is absent, cursor comes from yesterday
        h.remote.push_ticks("X", &[(JAN_2 - 5, 1.2), (JAN_2 + 5, 1.3)]);
        h.run_at(JAN_2 + 10).await;

        h.remote.push_ticks("X", &[(JAN_2 + 15, 1.4), (JAN_2 + 25, 1.5)]);
        h.run_at(JAN_2 + 30).await;
        h.run_at(JAN_2 + 40).await;

        assert_eq!(
            h.stored_epochs("X").await,
            vec![JAN_2 - 30, JAN_2 - 20, JAN_2 - 5, JAN_2 + 5, JAN_2 + 15, JAN_2 + 25]
        );

        let audit = audit_instrument(&h.layout, &x).await.unwrap();
        assert!(audit.is_clean(), "{:?}", audit.issues);
        assert_eq!(audit.partitions.len(), 2);
        assert_eq!(audit.partitions[0].date.to_string(), "2024-01-01");
        assert_eq!(audit.partitions[1].first_epoch, Some(JAN_2 + 15));
    }

    #[tokio::test]
    async fn test_cursor_from_storage_sets_start() {
        let h = Harness::new(&["X"]);
        let x = h.instrument("X");
        h.layout.provision(&[x.clone()]).await.unwrap();
        let path = h.layout.path_for(&x, h.layout.date_for_epoch(JAN_1).unwrap());
        tokio::fs::write(&path, format!("epoch,symbol,price\n{},X,9.0\n", JAN_1 + 50))
            .await
            .unwrap();

        h.run_at(JAN_1 + 100).await;

        let sent = h.remote.history_requests("X");
        assert_eq!(sent[0]["start"], JAN_1 + 51);
    }

    #[tokio::test]
    async fn test_torn_tail_without_cursor_adds_no_duplicates() {
        let h = Harness::new(&["X"]);
        let x = h.instrument("X");
        h.layout.provision(&[x.clone()]).await.unwrap();
        let path = h.layout.path_for(&x, h.layout.date_for_epoch(JAN_1).unwrap());
        tokio::fs::write(
            &path,
            format!("epoch,symbol,price\n{},X,1.0\n{},X,1.1\n{},X", JAN_1, JAN_1 + 1, JAN_1 + 2),
        )
        .await
        .unwrap();
        h.remote.push_ticks(
            "X",
            &[(JAN_1, 1.0), (JAN_1 + 1, 1.1), (JAN_1 + 2, 1.2), (JAN_1 + 3, 1.3)],
        );

        let report = h.run_at(JAN_1 + 60).await;

        // Torn tail gives no cursor, so the whole history comes back
        let start = h.remote.history_requests("X")[0].get("start").cloned();
        assert_eq!(start, None);
        assert!(matches!(
            report.status_of(&x),
            Some(InstrumentStatus::Appended { rows: 2, skipped_overlap: 2, cursor, .. }) if *cursor == JAN_1 + 3
        ));

        let audit = audit_instrument(&h.layout, &x).await.unwrap();
        assert_eq!(audit.issues.len(), 1, "{:?}", audit.issues);
        assert!(matches!(audit.issues[0], crate::data::AuditIssue::Unparsable { line: 4, .. }));
        assert_eq!(audit.epoch_range(), Some((JAN_1, JAN_1 + 3)));
    }

    #[tokio::test]
    async fn test_one_failing_instrument_does_not_stop_others() {
        let h = Harness::new(&["A", "B", "C"]);
        h.remote.push_ticks("A", &[(JAN_1, 1.0)]);
        h.remote.push_ticks("B", &[(JAN_1, 2.0)]);
        h.remote.push_ticks("C", &[(JAN_1, 3.0)]);
        h.remote.set_fault(
            "B",
            Fault::ApiError {
                code: "MarketIsClosed".into(),
                message: "closed".into(),
            },
        );

        let report = h.run_at(JAN_1 + 60).await;

        assert_eq!(report.phase, CyclePhase::Done);
        assert_eq!(report.failed_instruments(), vec![&h.instrument("B")]);
        assert!(matches!(
            report.status_of(&h.instrument("B")),
            Some(InstrumentStatus::Failed { code, .. }) if code == "FETCH_001"
        ));
        assert_eq!(h.stored_epochs("A").await, vec![JAN_1]);
        assert!(h.stored_epochs("B").await.is_empty());
        assert_eq!(h.stored_epochs("C").await, vec![JAN_1]);
        assert_eq!(h.remote.closes(), 1);
    }

    #[tokio::test]
    async fn test_missing_history_leaves_partition_unchanged() {
        let h = Harness::new(&["X", "Y"]);
        h.remote.push_ticks("X", &[(JAN_1, 1.0)]);
        h.remote.push_ticks("Y", &[(JAN_1, 2.0)]);
        h.run_at(JAN_1 + 60).await;

        h.remote.push_ticks("X", &[(JAN_1 + 1, 1.1)]);
        h.remote.push_ticks("Y", &[(JAN_1 + 1, 2.1)]);
        h.remote.set_fault("X", Fault::MissingHistory);
        let report = h.run_at(JAN_1 + 120).await;

        assert!(matches!(
            report.status_of(&h.instrument("X")),
            Some(InstrumentStatus::Failed { code, .. }) if code == "FETCH_002"
        ));
        assert_eq!(h.stored_epochs("X").await, vec![JAN_1]);
        assert_eq!(h.stored_epochs("Y").await, vec![JAN_1, JAN_1 + 1]);
    }

    #[tokio::test]
    async fn test_reversed_batch_is_rejected() {
        let h = Harness::new(&["X"]);
        h.remote.push_ticks("X", &[(JAN_1, 1.0), (JAN_1 + 1, 1.1), (JAN_1 + 2, 1.2)]);
        h.remote.set_fault("X", Fault::Reversed);

        let report = h.run_at(JAN_1 + 60).await;

        assert!(matches!(
            report.status_of(&h.instrument("X")),
            Some(InstrumentStatus::Failed { code, .. }) if code == "WRITE_005"
        ));
        assert!(h.stored_epochs("X").await.is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_is_fatal() {
        let h = Harness::new(&["X"]);
        h.remote.reject_auth();

        let err = h.cycle_at(JAN_1).run().await.unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(err.error_code(), "CONN_003");
        assert_eq!(h.remote.dials(), 1);
        assert_eq!(h.remote.closes(), 1);
        assert!(h.remote.history_requests("X").is_empty());
    }

    #[tokio::test]
    async fn test_report_is_saved_when_configured() {
        let mut h = Harness::new(&["X"]);
        let reports = tempfile::tempdir().unwrap();
        h.config.report_dir = Some(reports.path().to_path_buf());
        h.remote.push_ticks("X", &[(JAN_1, 1.0)]);

        h.run_at(JAN_1 + 60).await;

        let mut entries = tokio::fs::read_dir(reports.path()).await.unwrap();
        let entry = entries.next_entry().await.unwrap().unwrap();
        assert!(entry.file_name().to_string_lossy().starts_with("cycle_report_"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
