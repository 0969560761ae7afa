use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    ratio, select_attempts, AttemptCounting, FailureRecord, MetricRecord, RootCause, Status,
    WorkItemId,
};

pub const DEFAULT_MIN_VALIDATION_SAMPLES: usize = 5;

/// Longest `details` excerpt carried by a [`PatternExample`], in characters.
pub const EXAMPLE_DETAILS_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternOptions {
    pub min_occurrences: usize,
    pub max_examples: usize,
    pub max_preventions: usize,
    pub max_common_paths: usize,
    pub counting: AttemptCounting,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            min_occurrences: 1,
            max_examples: 3,
            max_preventions: 3,
            max_common_paths: 5,
            counting: AttemptCounting::EveryAttempt,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathCount {
    pub path: String,
    pub count: usize,
}

/// One recent failure of a pattern, with its details cut to
/// [`EXAMPLE_DETAILS_CHARS`] characters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternExample {
    pub identifier: WorkItemId,
    #[serde(with = "crate::date_serde")]
    pub timestamp: Date,
    pub details: String,
    pub prevention: String,
}

impl PatternExample {
    fn from_record(record: &FailureRecord) -> Self {
        Self {
            identifier: record.identifier.clone(),
            timestamp: record.timestamp,
            details: record.details.chars().take(EXAMPLE_DETAILS_CHARS).collect(),
            prevention: record.prevention.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternSummary {
    pub root_cause: RootCause,
    pub occurrence_count: usize,
    /// Share of all counted failure records, in percent.
    pub percentage_of_total: f64,
    pub example_identifiers: Vec<WorkItemId>,
    pub recent_examples: Vec<PatternExample>,
    pub suggested_prevention: Vec<String>,
    pub common_paths: Vec<PathCount>,
    #[serde(with = "crate::date_serde")]
    pub last_seen: Date,
}

/// Groups failure records by root cause and ranks the groups.
///
/// Groups are ordered by occurrence count (descending), ties by the root
/// cause string. Examples and preventions are taken newest first, where
/// newer means a later timestamp or, on equal timestamps, a later log line.
#[must_use]
pub fn extract_patterns<'a, I>(records: I, options: &PatternOptions) -> Vec<PatternSummary>
where
    I: IntoIterator<Item = &'a FailureRecord>,
{
    let selected = select_attempts(records, options.counting);
    let total = selected.len();
    if total == 0 {
        return Vec::new();
    }

    let mut groups: BTreeMap<RootCause, Vec<(usize, &FailureRecord)>> = BTreeMap::new();
    for (position, record) in selected.into_iter().enumerate() {
        groups
            .entry(record.root_cause)
            .or_default()
            .push((position, record));
    }

    let mut summaries = groups
        .into_iter()
        .filter(|(_, members)| members.len() >= options.min_occurrences)
        .map(|(root_cause, members)| summarize_group(root_cause, members, total, options))
        .collect::<Vec<_>>();

    summaries.sort_by(|lhs, rhs| {
        rhs.occurrence_count
            .cmp(&lhs.occurrence_count)
            .then_with(|| lhs.root_cause.as_str().cmp(rhs.root_cause.as_str()))
    });
    summaries
}

fn summarize_group(
    root_cause: RootCause,
    mut members: Vec<(usize, &FailureRecord)>,
    total: usize,
    options: &PatternOptions,
) -> PatternSummary {
    members.sort_by(|(lhs_pos, lhs), (rhs_pos, rhs)| {
        rhs.timestamp
            .cmp(&lhs.timestamp)
            .then_with(|| rhs_pos.cmp(lhs_pos))
    });

    let occurrence_count = members.len();
    let last_seen = members
        .first()
        .map_or(Date::MIN, |(_, record)| record.timestamp);

    let example_identifiers = newest_distinct(
        members.iter().map(|(_, record)| record.identifier.clone()),
        options.max_examples,
    );
    let recent_examples = members
        .iter()
        .take(options.max_examples)
        .map(|(_, record)| PatternExample::from_record(record))
        .collect();
    let suggested_prevention = newest_distinct(
        members
            .iter()
            .map(|(_, record)| record.prevention.as_str())
            .filter(|prevention| !prevention.trim().is_empty())
            .map(str::to_string),
        options.max_preventions,
    );

    let mut path_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, record) in &members {
        for path in &record.affected_paths {
            *path_counts.entry(path.as_str()).or_default() += 1;
        }
    }
    let mut common_paths = path_counts
        .into_iter()
        .map(|(path, count)| PathCount {
            path: path.to_string(),
            count,
        })
        .collect::<Vec<_>>();
    // Stable sort keeps the path order from the map for equal counts.
    common_paths.sort_by(|lhs, rhs| rhs.count.cmp(&lhs.count));
    common_paths.truncate(options.max_common_paths);

    PatternSummary {
        root_cause,
        occurrence_count,
        percentage_of_total: ratio(occurrence_count, total) * 100.0,
        example_identifiers,
        recent_examples,
        suggested_prevention,
        common_paths,
        last_seen,
    }
}

fn newest_distinct<T: PartialEq>(values: impl Iterator<Item = T>, limit: usize) -> Vec<T> {
    let mut picked = Vec::new();
    for value in values {
        if picked.len() >= limit {
            break;
        }
        if !picked.contains(&value) {
            picked.push(value);
        }
    }
    picked
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationVerdict {
    Effective,
    NotEffective,
    InsufficientData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternValidation {
    pub root_cause: RootCause,
    #[serde(with = "crate::date_serde")]
    pub before_date: Date,
    pub associated_stages: Vec<String>,
    pub min_samples: usize,
    pub sample_before: usize,
    pub sample_after: usize,
    pub passed_before: usize,
    pub passed_after: usize,
    pub rate_before: Option<f64>,
    pub rate_after: Option<f64>,
    pub delta: Option<f64>,
    pub verdict: ValidationVerdict,
}

/// Compares PASS rates before and after `before_date` for the records a
/// prevention rule targets.
///
/// A metric record is relevant when it was blocked by `root_cause`, or when
/// it ran any stage that failure records attribute to `root_cause`.
#[must_use]
pub fn validate_pattern(
    metrics: &[MetricRecord],
    failures: &[FailureRecord],
    root_cause: RootCause,
    before_date: Date,
    min_samples: usize,
) -> PatternValidation {
    let associated_stages = failures
        .iter()
        .filter(|failure| failure.root_cause == root_cause)
        .map(|failure| failure.stage.trim())
        .filter(|stage| !stage.is_empty())
        .collect::<BTreeSet<_>>();

    let relevant = metrics.iter().filter(|record| {
        (record.status == Status::Blocked && record.root_cause == Some(root_cause))
            || record
                .stages_run
                .iter()
                .any(|stage| associated_stages.contains(stage.as_str()))
    });

    let (mut sample_before, mut sample_after, mut passed_before, mut passed_after) =
        (0_usize, 0_usize, 0_usize, 0_usize);
    for record in relevant {
        let passed = usize::from(record.status == Status::Pass);
        if record.timestamp < before_date {
            sample_before += 1;
            passed_before += passed;
        } else {
            sample_after += 1;
            passed_after += passed;
        }
    }

    let rate_before = (sample_before > 0).then(|| ratio(passed_before, sample_before));
    let rate_after = (sample_after > 0).then(|| ratio(passed_after, sample_after));
    let delta = match (rate_before, rate_after) {
        (Some(before), Some(after)) => Some(after - before),
        _ => None,
    };

    let enough = sample_before >= min_samples.max(1) && sample_after >= min_samples.max(1);
    let verdict = match delta {
        Some(delta) if enough && delta > 0.0 => ValidationVerdict::Effective,
        Some(_) if enough => ValidationVerdict::NotEffective,
        _ => ValidationVerdict::InsufficientData,
    };

    PatternValidation {
        root_cause,
        before_date,
        associated_stages: associated_stages.into_iter().map(str::to_string).collect(),
        min_samples,
        sample_before,
        sample_after,
        passed_before,
        passed_after,
        rate_before,
        rate_after,
        delta,
        verdict,
    }
}
