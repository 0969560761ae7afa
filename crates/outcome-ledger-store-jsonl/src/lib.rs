//! Append-only JSON-lines storage for outcome records.
//!
//! A ledger is two files, usually `metrics.jsonl` and `failures.jsonl` in one
//! directory. Writers only ever append whole lines. Readers take the file
//! length at open time, read up to it and skip lines that fail to decode,
//! reporting how many they skipped.

#![allow(clippy::missing_errors_doc)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use outcome_ledger_core::{
    build_dashboard, build_trend, extract_patterns, select_attempts, validate_outcome_pair,
    validate_pattern, DashboardOptions, DashboardView, DateWindow, FailureRecord, MetricRecord,
    OutcomeError, PatternOptions, PatternSummary, PatternValidation, RootCause, Status,
    TrendBucket, WorkItemId,
};
use serde::Serialize;
use time::Date;
use tracing::{debug, warn};

pub const METRICS_FILE_NAME: &str = "metrics.jsonl";
pub const FAILURES_FILE_NAME: &str = "failures.jsonl";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] OutcomeError),
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "partial write: outcome appended to {} but failure append to {} failed: {source}",
        metrics_path.display(),
        failures_path.display()
    )]
    PartialWrite {
        metrics_path: PathBuf,
        failures_path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode {kind} record: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct LedgerPaths {
    pub metrics: PathBuf,
    pub failures: PathBuf,
}

impl LedgerPaths {
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            metrics: dir.join(METRICS_FILE_NAME),
            failures: dir.join(FAILURES_FILE_NAME),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct MalformedLine {
    pub line_number: usize,
    pub reason: String,
}

/// Records decoded from one log plus the lines that had to be skipped.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct LogScan<T> {
    pub records: Vec<T>,
    pub skipped_lines: usize,
    pub malformed_lines: Vec<MalformedLine>,
}

impl<T> LogScan<T> {
    fn empty() -> Self {
        Self {
            records: Vec::new(),
            skipped_lines: 0,
            malformed_lines: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RecordReceipt {
    pub identifier: WorkItemId,
    pub status: Status,
    pub metrics_path: PathBuf,
    pub failures_path: Option<PathBuf>,
    pub lines_written: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct PatternReport {
    pub total_failures: usize,
    pub counted_failures: usize,
    pub unique_causes: usize,
    pub skipped_lines: usize,
    pub patterns: Vec<PatternSummary>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct LedgerDashboard {
    #[serde(flatten)]
    pub view: DashboardView,
    pub skipped_metric_lines: usize,
    pub skipped_failure_lines: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct LedgerValidation {
    #[serde(flatten)]
    pub validation: PatternValidation,
    pub skipped_metric_lines: usize,
    pub skipped_failure_lines: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct LedgerTrend {
    pub window: DateWindow,
    pub bucket_days: u32,
    pub buckets: Vec<TrendBucket>,
    pub skipped_metric_lines: usize,
}

/// Handle on a pair of outcome logs. Holds no open files between calls.
#[derive(Debug, Clone)]
pub struct JsonlLedger {
    paths: LedgerPaths,
}

impl JsonlLedger {
    #[must_use]
    pub fn open(paths: LedgerPaths) -> Self {
        Self { paths }
    }

    #[must_use]
    pub fn open_dir(dir: &Path) -> Self {
        Self::open(LedgerPaths::in_dir(dir))
    }

    #[must_use]
    pub fn paths(&self) -> &LedgerPaths {
        &self.paths
    }

    /// Appends one outcome line and, for blocked outcomes, one failure line.
    ///
    /// Both records are validated and encoded before anything is written. A
    /// failure-log error after a successful metrics append is reported as
    /// [`LedgerError::PartialWrite`].
    pub fn record(
        &self,
        outcome: &MetricRecord,
        failure: Option<&FailureRecord>,
    ) -> Result<RecordReceipt, LedgerError> {
        validate_outcome_pair(outcome, failure)?;

        let metric_line = encode_line("metric", outcome)?;
        let failure_line = failure
            .map(|record| encode_line("failure", record))
            .transpose()?;

        append_line(&self.paths.metrics, &metric_line).map_err(|source| LedgerError::Io {
            action: "append to",
            path: self.paths.metrics.clone(),
            source,
        })?;
        debug!(
            identifier = %outcome.identifier,
            status = outcome.status.as_str(),
            path = %self.paths.metrics.display(),
            "appended outcome record"
        );

        let mut lines_written = 1;
        if let Some(line) = failure_line {
            append_line(&self.paths.failures, &line).map_err(|source| {
                LedgerError::PartialWrite {
                    metrics_path: self.paths.metrics.clone(),
                    failures_path: self.paths.failures.clone(),
                    source,
                }
            })?;
            lines_written += 1;
            debug!(
                identifier = %outcome.identifier,
                path = %self.paths.failures.display(),
                "appended failure record"
            );
        }

        Ok(RecordReceipt {
            identifier: outcome.identifier.clone(),
            status: outcome.status,
            metrics_path: self.paths.metrics.clone(),
            failures_path: failure.map(|_| self.paths.failures.clone()),
            lines_written,
        })
    }

    /// Reads the metrics log. Lines that fail to decode or violate the
    /// status/root-cause pairing are skipped.
    pub fn read_metrics(&self) -> Result<LogScan<MetricRecord>, LedgerError> {
        scan_log(&self.paths.metrics, |line| {
            let record: MetricRecord =
                serde_json::from_slice(line).map_err(|err| err.to_string())?;
            record.validate().map_err(|err| err.to_string())?;
            Ok(record)
        })
    }

    pub fn read_failures(&self) -> Result<LogScan<FailureRecord>, LedgerError> {
        scan_log(&self.paths.failures, |line| {
            serde_json::from_slice(line).map_err(|err| err.to_string())
        })
    }

    pub fn extract(&self, options: &PatternOptions) -> Result<PatternReport, LedgerError> {
        let scan = self.read_failures()?;
        let patterns = extract_patterns(&scan.records, options);

        Ok(PatternReport {
            total_failures: scan.records.len(),
            counted_failures: select_attempts(&scan.records, options.counting).len(),
            unique_causes: patterns.len(),
            skipped_lines: scan.skipped_lines,
            patterns,
        })
    }

    pub fn render(
        &self,
        window: &DateWindow,
        options: &DashboardOptions,
    ) -> Result<LedgerDashboard, LedgerError> {
        let metrics = self.read_metrics()?;
        let failures = self.read_failures()?;

        Ok(LedgerDashboard {
            view: build_dashboard(&metrics.records, &failures.records, window, options),
            skipped_metric_lines: metrics.skipped_lines,
            skipped_failure_lines: failures.skipped_lines,
        })
    }

    pub fn trend(&self, window: &DateWindow, bucket_days: u32) -> Result<LedgerTrend, LedgerError> {
        let metrics = self.read_metrics()?;

        Ok(LedgerTrend {
            window: *window,
            bucket_days,
            buckets: build_trend(&metrics.records, window, bucket_days)?,
            skipped_metric_lines: metrics.skipped_lines,
        })
    }

    pub fn validate_pattern(
        &self,
        root_cause: RootCause,
        before_date: Date,
        min_samples: usize,
    ) -> Result<LedgerValidation, LedgerError> {
        let metrics = self.read_metrics()?;
        let failures = self.read_failures()?;

        Ok(LedgerValidation {
            validation: validate_pattern(
                &metrics.records,
                &failures.records,
                root_cause,
                before_date,
                min_samples,
            ),
            skipped_metric_lines: metrics.skipped_lines,
            skipped_failure_lines: failures.skipped_lines,
        })
    }
}

fn encode_line<T: Serialize>(kind: &'static str, record: &T) -> Result<String, LedgerError> {
    serde_json::to_string(record).map_err(|source| LedgerError::Encode { kind, source })
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new()
        .read(true)
        .create(true)
        .append(true)
        .open(path)?;

    let mut payload = String::with_capacity(line.len() + 2);
    // A torn final line from an interrupted writer must not swallow this record.
    if !ends_with_newline(&mut file)? {
        payload.push('\n');
    }
    payload.push_str(line);
    payload.push('\n');

    file.write_all(payload.as_bytes())?;
    file.flush()
}

fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    let length = file.metadata()?.len();
    if length == 0 {
        return Ok(true);
    }

    file.seek(SeekFrom::Start(length - 1))?;
    let mut last = [0_u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn scan_log<T>(
    path: &Path,
    decode: impl Fn(&[u8]) -> Result<T, String>,
) -> Result<LogScan<T>, LedgerError> {
    let io_error = |action: &'static str| {
        move |source: io::Error| LedgerError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    };

    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(LogScan::empty()),
        Err(err) => return Err(io_error("open")(err)),
    };
    let length = file.metadata().map_err(io_error("stat"))?.len();
    let mut reader = BufReader::new(file.take(length));

    let mut scan = LogScan::empty();
    let mut buffer = Vec::new();
    let mut line_number = 0_usize;
    loop {
        buffer.clear();
        let read = reader
            .read_until(b'\n', &mut buffer)
            .map_err(io_error("read"))?;
        if read == 0 {
            break;
        }
        line_number += 1;

        let line = buffer.strip_suffix(b"\n").unwrap_or(&buffer[..]);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match decode(line) {
            Ok(record) => scan.records.push(record),
            Err(reason) => {
                warn!(
                    path = %path.display(),
                    line_number,
                    reason = %reason,
                    "skipping malformed ledger line"
                );
                scan.malformed_lines.push(MalformedLine {
                    line_number,
                    reason,
                });
            }
        }
    }

    scan.skipped_lines = scan.malformed_lines.len();
    Ok(scan)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp, clippy::too_many_lines)]

    use super::*;
    use outcome_ledger_core::{parse_date, Classification, Domain};
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use ulid::Ulid;

    fn must<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn fixture_dir() -> PathBuf {
        std::env::temp_dir().join(format!("outcome-ledger-store-{}", Ulid::new()))
    }

    fn must_date(value: &str) -> Date {
        must(parse_date(value))
    }

    fn fixture_pass(identifier: &str, date: &str) -> MetricRecord {
        MetricRecord {
            identifier: WorkItemId::from(identifier),
            timestamp: must_date(date),
            status: Status::Pass,
            classification: Classification::Simple,
            domain: Domain::Backend,
            stages_run: vec![
                "investigate".to_string(),
                "plan".to_string(),
                "implement".to_string(),
                "verify".to_string(),
            ],
            stage_versions: BTreeMap::from([("verify".to_string(), "2.1".to_string())]),
            root_cause: None,
            blocking_stage: None,
        }
    }

    fn fixture_blocked(
        identifier: &str,
        date: &str,
        root_cause: RootCause,
    ) -> (MetricRecord, FailureRecord) {
        let mut outcome = fixture_pass(identifier, date);
        outcome.status = Status::Blocked;
        outcome.root_cause = Some(root_cause);
        outcome.blocking_stage = Some("verify".to_string());

        let failure = FailureRecord {
            identifier: WorkItemId::from(identifier),
            timestamp: outcome.timestamp,
            stage: "verify".to_string(),
            root_cause,
            details: format!("{root_cause} in {identifier}"),
            remediation: "patched".to_string(),
            prevention: format!("check for {root_cause}"),
            affected_paths: vec!["src/lib.rs".to_string()],
        };
        (outcome, failure)
    }

    fn read_bytes(path: &Path) -> Vec<u8> {
        match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => panic!("failed to read {}: {err}", path.display()),
        }
    }

    fn line_count(path: &Path) -> usize {
        String::from_utf8_lossy(&read_bytes(path)).lines().count()
    }

    #[test]
    fn record_creates_missing_logs() {
        let dir = fixture_dir().join("nested").join(".claude").join("memory");
        let ledger = JsonlLedger::open_dir(&dir);

        let receipt = must(ledger.record(&fixture_pass("1", "2026-02-01"), None));
        assert_eq!(receipt.lines_written, 1);
        assert_eq!(receipt.failures_path, None);
        assert_eq!(line_count(&ledger.paths().metrics), 1);
        assert!(!ledger.paths().failures.exists());

        let (outcome, failure) = fixture_blocked("2", "2026-02-01", RootCause::MissingTest);
        let receipt = must(ledger.record(&outcome, Some(&failure)));
        assert_eq!(receipt.lines_written, 2);
        assert_eq!(line_count(&ledger.paths().metrics), 2);
        assert_eq!(line_count(&ledger.paths().failures), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn invalid_outcome_writes_nothing() {
        let dir = fixture_dir();
        let ledger = JsonlLedger::open_dir(&dir);

        let mut outcome = fixture_pass("1", "2026-02-01");
        outcome.root_cause = Some(RootCause::ValueMismatch);
        let result = ledger.record(&outcome, None);
        assert!(matches!(result, Err(LedgerError::Validation(_))));

        let (blocked, _) = fixture_blocked("2", "2026-02-01", RootCause::ValueMismatch);
        let result = ledger.record(&blocked, None);
        assert!(matches!(result, Err(LedgerError::Validation(_))));

        assert!(!ledger.paths().metrics.exists());
        assert!(!ledger.paths().failures.exists());
    }

    #[test]
    fn unwritable_metrics_log_is_an_io_error() {
        let dir = fixture_dir();
        let ledger = JsonlLedger::open_dir(&dir);
        must(fs::create_dir_all(&ledger.paths().metrics));

        let (outcome, failure) = fixture_blocked("1", "2026-02-01", RootCause::MissingTest);
        let result = ledger.record(&outcome, Some(&failure));
        assert!(matches!(result, Err(LedgerError::Io { .. })));
        assert!(!ledger.paths().failures.exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn failure_log_error_after_metrics_append_is_partial_write() {
        let dir = fixture_dir();
        let ledger = JsonlLedger::open_dir(&dir);
        must(fs::create_dir_all(&ledger.paths().failures));

        let (outcome, failure) = fixture_blocked("1", "2026-02-01", RootCause::MissingTest);
        let result = ledger.record(&outcome, Some(&failure));
        match result {
            Err(LedgerError::PartialWrite { .. }) => {}
            other => panic!("expected partial write, got {other:?}"),
        }
        assert_eq!(line_count(&ledger.paths().metrics), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_logs_read_as_empty() {
        let ledger = JsonlLedger::open_dir(&fixture_dir());

        let report = must(ledger.extract(&PatternOptions::default()));
        assert_eq!(report.total_failures, 0);
        assert_eq!(report.skipped_lines, 0);
        assert!(report.patterns.is_empty());

        let dashboard = must(ledger.render(&DateWindow::all(), &DashboardOptions::default()));
        assert_eq!(dashboard.view.total, 0);
        assert_eq!(dashboard.skipped_metric_lines, 0);
    }

    #[test]
    fn malformed_failure_lines_are_counted_and_skipped() {
        let dir = fixture_dir();
        let ledger = JsonlLedger::open_dir(&dir);

        let mut body = String::new();
        for index in 0..8 {
            let (_, failure) = fixture_blocked(
                &index.to_string(),
                "2026-02-01",
                if index < 6 {
                    RootCause::ValueMismatch
                } else {
                    RootCause::ScopeViolation
                },
            );
            body.push_str(&must(serde_json::to_string(&failure)));
            body.push('\n');
            if index == 3 {
                body.push_str("{\"identifier\": \"broken\", \n");
                body.push('\n');
            }
        }
        body.push_str(concat!(
            "{\"identifier\":\"x\",\"timestamp\":\"2026-02-01\",",
            "\"root_cause\":\"gremlins\"}\n"
        ));
        must(fs::create_dir_all(&dir));
        must(fs::write(&ledger.paths().failures, body));

        let report = must(ledger.extract(&PatternOptions::default()));
        assert_eq!(report.total_failures, 8);
        assert_eq!(report.skipped_lines, 2);
        assert_eq!(report.patterns[0].occurrence_count, 6);
        assert!((report.patterns[0].percentage_of_total - 75.0).abs() < 1e-9);

        let scan = must(ledger.read_failures());
        let skipped = scan
            .malformed_lines
            .iter()
            .map(|item| item.line_number)
            .collect::<Vec<_>>();
        assert_eq!(skipped, vec![5, 11]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn metric_lines_breaking_status_pairing_are_skipped() {
        let dir = fixture_dir();
        let ledger = JsonlLedger::open_dir(&dir);
        must(ledger.record(&fixture_pass("1", "2026-02-01"), None));

        let mut file = must(OpenOptions::new().append(true).open(&ledger.paths().metrics));
        let pass_with_cause = concat!(
            "{\"identifier\":\"2\",\"timestamp\":\"2026-02-01\",\"status\":\"PASS\",",
            "\"classification\":\"SIMPLE\",\"domain\":\"backend\",\"root_cause\":\"other\"}\n"
        );
        must(file.write_all(pass_with_cause.as_bytes()));

        let scan = must(ledger.read_metrics());
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.skipped_lines, 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn append_after_torn_line_starts_a_new_line() {
        let dir = fixture_dir();
        let ledger = JsonlLedger::open_dir(&dir);
        must(fs::create_dir_all(&dir));
        must(fs::write(&ledger.paths().metrics, b"{\"identifier\":\"torn"));

        must(ledger.record(&fixture_pass("1", "2026-02-01"), None));

        let scan = must(ledger.read_metrics());
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.skipped_lines, 1);
        assert_eq!(scan.malformed_lines[0].line_number, 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn legacy_lines_are_read() {
        let dir = fixture_dir();
        let ledger = JsonlLedger::open_dir(&dir);
        must(fs::create_dir_all(&dir));
        must(fs::write(
            &ledger.paths().metrics,
            concat!(
                "{\"issue\":12,\"date\":\"2026-01-10\",\"status\":\"BLOCKED\",",
                "\"complexity\":\"COMPLEX\",\"stack\":\"A\",\"root_cause\":\"missing-test\",",
                "\"blocking_stage\":\"verify\"}\n"
            ),
        ));

        let scan = must(ledger.read_metrics());
        assert_eq!(scan.skipped_lines, 0);
        assert_eq!(scan.records[0].identifier, WorkItemId::from("12"));
        assert_eq!(scan.records[0].domain, Domain::Backend);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn end_to_end_record_render_extract() {
        let dir = fixture_dir();
        let ledger = JsonlLedger::open_dir(&dir);

        for identifier in ["101", "102", "103"] {
            must(ledger.record(&fixture_pass(identifier, "2026-02-02"), None));
        }
        for identifier in ["104", "105"] {
            let (outcome, failure) =
                fixture_blocked(identifier, "2026-02-03", RootCause::ValueMismatch);
            must(ledger.record(&outcome, Some(&failure)));
        }
        let (outcome, failure) =
            fixture_blocked("106", "2026-03-10", RootCause::InterfaceMismatch);
        must(ledger.record(&outcome, Some(&failure)));

        let window = must(DateWindow::new(
            Some(must_date("2026-02-01")),
            Some(must_date("2026-03-01")),
        ));
        let dashboard = must(ledger.render(&window, &DashboardOptions::default()));
        assert_eq!(dashboard.view.total, 5);
        assert!((dashboard.view.pass_rate - 0.6).abs() < 1e-9);
        assert_eq!(dashboard.view.top_root_causes.len(), 1);

        let report = must(ledger.extract(&PatternOptions::default()));
        assert_eq!(report.total_failures, 3);
        assert_eq!(report.patterns.len(), 2);
        assert_eq!(report.patterns[0].root_cause, RootCause::ValueMismatch);
        assert_eq!(report.patterns[0].occurrence_count, 2);
        assert!((report.patterns[0].percentage_of_total - 66.666_666).abs() < 1e-3);
        assert_eq!(report.patterns[1].root_cause, RootCause::InterfaceMismatch);
        assert!((report.patterns[1].percentage_of_total - 33.333_333).abs() < 1e-3);

        let again = must(ledger.extract(&PatternOptions::default()));
        assert_eq!(report, again);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn validate_pattern_reads_both_logs() {
        let dir = fixture_dir();
        let ledger = JsonlLedger::open_dir(&dir);

        let (outcome, failure) = fixture_blocked("1", "2026-01-05", RootCause::MissingTest);
        must(ledger.record(&outcome, Some(&failure)));
        must(ledger.record(&fixture_pass("2", "2026-01-06"), None));
        must(ledger.record(&fixture_pass("3", "2026-02-05"), None));

        let before = must_date("2026-02-01");
        let report = must(ledger.validate_pattern(RootCause::MissingTest, before, 1));
        assert_eq!(report.validation.sample_before, 2);
        assert_eq!(report.validation.sample_after, 1);
        assert_eq!(report.validation.rate_before, Some(0.5));
        assert_eq!(report.validation.rate_after, Some(1.0));
        assert_eq!(
            report.validation.verdict,
            outcome_ledger_core::ValidationVerdict::Effective
        );

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn trend_reports_buckets_from_metrics_log() {
        let dir = fixture_dir();
        let ledger = JsonlLedger::open_dir(&dir);
        must(ledger.record(&fixture_pass("1", "2026-02-01"), None));
        must(ledger.record(&fixture_pass("2", "2026-02-09"), None));

        let trend = must(ledger.trend(&DateWindow::all(), 7));
        assert_eq!(trend.buckets.len(), 2);
        assert_eq!(trend.buckets[0].total, 1);
        assert_eq!(trend.buckets[1].total, 1);

        assert!(matches!(
            ledger.trend(&DateWindow::all(), 0),
            Err(LedgerError::Validation(_))
        ));

        let _ = fs::remove_dir_all(&dir);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_record_only_ever_appends(outcomes in prop::collection::vec(0u8..3, 1..24)) {
            let dir = fixture_dir();
            let ledger = JsonlLedger::open_dir(&dir);
            let mut previous_metrics = Vec::new();
            let mut previous_failures = Vec::new();

            for (index, code) in outcomes.iter().copied().enumerate() {
                let identifier = index.to_string();
                match code {
                    0 => {
                        must(ledger.record(&fixture_pass(&identifier, "2026-02-01"), None));
                    }
                    1 => {
                        let (outcome, failure) =
                            fixture_blocked(&identifier, "2026-02-01", RootCause::ValueMismatch);
                        must(ledger.record(&outcome, Some(&failure)));
                    }
                    _ => {
                        let mut invalid = fixture_pass(&identifier, "2026-02-01");
                        invalid.blocking_stage = Some("verify".to_string());
                        prop_assert!(ledger.record(&invalid, None).is_err());
                    }
                }

                let metrics = read_bytes(&ledger.paths().metrics);
                let failures = read_bytes(&ledger.paths().failures);
                prop_assert!(metrics.len() >= previous_metrics.len());
                prop_assert!(metrics.starts_with(&previous_metrics));
                prop_assert!(failures.len() >= previous_failures.len());
                prop_assert!(failures.starts_with(&previous_failures));
                previous_metrics = metrics;
                previous_failures = failures;
            }

            let expected = outcomes.iter().filter(|code| **code < 2).count();
            let scan = must(ledger.read_metrics());
            prop_assert_eq!(scan.records.len(), expected);
            prop_assert_eq!(scan.skipped_lines, 0);

            let _ = fs::remove_dir_all(&dir);
        }
    }
}
