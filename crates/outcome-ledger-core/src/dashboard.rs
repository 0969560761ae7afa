use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::{Date, Duration};

use crate::{
    extract_patterns, format_date, ratio, select_attempts, AttemptCounting, DateWindow,
    FailureRecord, MetricRecord, OutcomeError, PatternOptions, PatternSummary, Status,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardOptions {
    pub top_root_causes: usize,
    pub counting: AttemptCounting,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            top_root_causes: 5,
            counting: AttemptCounting::EveryAttempt,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakdownRow {
    pub key: String,
    pub total: usize,
    pub passed: usize,
    pub blocked: usize,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageBlockingRate {
    pub stage: String,
    pub runs: usize,
    pub blocked: usize,
    pub blocking_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardView {
    pub window: DateWindow,
    pub total: usize,
    pub passed: usize,
    pub blocked: usize,
    pub pass_rate: f64,
    pub by_classification: Vec<BreakdownRow>,
    pub by_domain: Vec<BreakdownRow>,
    pub top_root_causes: Vec<PatternSummary>,
    pub stage_blocking: Vec<StageBlockingRate>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    total: usize,
    passed: usize,
}

impl Tally {
    fn add(&mut self, status: Status) {
        self.total += 1;
        if status == Status::Pass {
            self.passed += 1;
        }
    }

    fn into_row(self, key: &str) -> BreakdownRow {
        BreakdownRow {
            key: key.to_string(),
            total: self.total,
            passed: self.passed,
            blocked: self.total - self.passed,
            pass_rate: ratio(self.passed, self.total),
        }
    }
}

/// Aggregates the metric records inside `window`.
///
/// The top root causes come from the failure records inside the same
/// window. An empty window produces zero counts and empty lists.
#[must_use]
pub fn build_dashboard(
    metrics: &[MetricRecord],
    failures: &[FailureRecord],
    window: &DateWindow,
    options: &DashboardOptions,
) -> DashboardView {
    let records = select_attempts(
        metrics.iter().filter(|record| window.contains(record.timestamp)),
        options.counting,
    );

    let mut overall = Tally::default();
    let mut by_classification = BTreeMap::new();
    let mut by_domain = BTreeMap::new();
    let mut stage_runs: BTreeMap<&str, usize> = BTreeMap::new();
    let mut stage_blocks: BTreeMap<&str, usize> = BTreeMap::new();

    for record in &records {
        overall.add(record.status);
        by_classification
            .entry(record.classification)
            .or_insert_with(Tally::default)
            .add(record.status);
        by_domain
            .entry(record.domain)
            .or_insert_with(Tally::default)
            .add(record.status);

        // A blocking stage ran, whether or not the caller listed it.
        let mut distinct_stages = record
            .stages_run
            .iter()
            .map(String::as_str)
            .collect::<BTreeSet<_>>();
        if let Some(stage) = record.blocking_stage.as_deref() {
            distinct_stages.insert(stage);
            *stage_blocks.entry(stage).or_default() += 1;
        }
        for stage in distinct_stages {
            *stage_runs.entry(stage).or_default() += 1;
        }
    }

    let stage_names = stage_runs
        .keys()
        .chain(stage_blocks.keys())
        .copied()
        .collect::<BTreeSet<_>>();
    let stage_blocking = stage_names
        .into_iter()
        .map(|stage| {
            let runs = stage_runs.get(stage).copied().unwrap_or_default();
            let blocked = stage_blocks.get(stage).copied().unwrap_or_default();
            StageBlockingRate {
                stage: stage.to_string(),
                runs,
                blocked,
                blocking_rate: ratio(blocked, runs),
            }
        })
        .collect();

    let pattern_options = PatternOptions {
        counting: options.counting,
        ..PatternOptions::default()
    };
    let failures_in_window = failures
        .iter()
        .filter(|record| window.contains(record.timestamp));
    let mut top_root_causes = match options.counting {
        AttemptCounting::EveryAttempt => extract_patterns(failures_in_window, &pattern_options),
        AttemptCounting::LatestPerIdentifier => {
            // Only failures backing a selected blocked outcome still count.
            let blocked_attempts = records
                .iter()
                .filter(|record| record.status == Status::Blocked)
                .map(|record| (&record.identifier, record.timestamp))
                .collect::<BTreeSet<_>>();
            extract_patterns(
                failures_in_window.filter(|failure| {
                    blocked_attempts.contains(&(&failure.identifier, failure.timestamp))
                }),
                &pattern_options,
            )
        }
    };
    top_root_causes.truncate(options.top_root_causes);

    DashboardView {
        window: *window,
        total: overall.total,
        passed: overall.passed,
        blocked: overall.total - overall.passed,
        pass_rate: ratio(overall.passed, overall.total),
        by_classification: by_classification
            .into_iter()
            .map(|(key, tally)| tally.into_row(key.as_str()))
            .collect(),
        by_domain: by_domain
            .into_iter()
            .map(|(key, tally)| tally.into_row(key.as_str()))
            .collect(),
        top_root_causes,
        stage_blocking,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendBucket {
    pub window: DateWindow,
    pub total: usize,
    pub passed: usize,
    pub pass_rate: f64,
}

/// Upper bound on the number of buckets a single trend may produce.
pub const MAX_TREND_BUCKETS: usize = 1_000;

/// Splits `window` into consecutive buckets of `bucket_days` days.
///
/// Unbounded ends are closed with the earliest and latest record dates in
/// the window; the final bucket is clipped to the window end.
///
/// # Errors
/// Returns [`OutcomeError::Validation`] when `bucket_days` is zero or the
/// window would need more than [`MAX_TREND_BUCKETS`] buckets.
pub fn build_trend(
    metrics: &[MetricRecord],
    window: &DateWindow,
    bucket_days: u32,
) -> Result<Vec<TrendBucket>, OutcomeError> {
    if bucket_days == 0 {
        return Err(OutcomeError::Validation(
            "bucket_days MUST be >= 1".to_string(),
        ));
    }

    let records = metrics
        .iter()
        .filter(|record| window.contains(record.timestamp))
        .collect::<Vec<_>>();

    let since = window
        .since
        .or_else(|| records.iter().map(|record| record.timestamp).min());
    let until = window.until.or_else(|| {
        records
            .iter()
            .map(|record| record.timestamp)
            .max()
            .and_then(Date::next_day)
    });
    let (Some(since), Some(until)) = (since, until) else {
        return Ok(Vec::new());
    };

    let span_days = (until - since).whole_days();
    if span_days <= 0 {
        return Ok(Vec::new());
    }
    let step_days = i64::from(bucket_days);
    let bucket_count = usize::try_from((span_days + step_days - 1) / step_days)
        .unwrap_or(usize::MAX);
    if bucket_count > MAX_TREND_BUCKETS {
        return Err(OutcomeError::Validation(format!(
            "trend from {} to {} needs {bucket_count} buckets of {bucket_days}d; \
             MUST be <= {MAX_TREND_BUCKETS}, use a wider bucket or a narrower window",
            format_date(since),
            format_date(until)
        )));
    }

    let mut tallies = vec![Tally::default(); bucket_count];
    for record in &records {
        let offset = (record.timestamp - since).whole_days();
        if !(0..span_days).contains(&offset) {
            continue;
        }
        let tally = usize::try_from(offset / step_days)
            .ok()
            .and_then(|index| tallies.get_mut(index));
        if let Some(tally) = tally {
            tally.add(record.status);
        }
    }

    let step = Duration::days(step_days);
    let mut buckets = Vec::with_capacity(bucket_count);
    let mut start = since;
    for tally in tallies {
        let end = start
            .checked_add(step)
            .map_or(until, |candidate| candidate.min(until));
        buckets.push(TrendBucket {
            window: DateWindow {
                since: Some(start),
                until: Some(end),
            },
            total: tally.total,
            passed: tally.passed,
            pass_rate: ratio(tally.passed, tally.total),
        });
        start = end;
    }

    Ok(buckets)
}
