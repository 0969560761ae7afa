use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, UtcOffset};

mod dashboard;
mod patterns;

pub use dashboard::{
    build_dashboard, build_trend, BreakdownRow, DashboardOptions, DashboardView,
    StageBlockingRate, TrendBucket, MAX_TREND_BUCKETS,
};
pub use patterns::{
    extract_patterns, validate_pattern, PathCount, PatternExample, PatternOptions,
    PatternSummary, PatternValidation, ValidationVerdict, DEFAULT_MIN_VALIDATION_SAMPLES,
    EXAMPLE_DETAILS_CHARS,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum OutcomeError {
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Blocked,
}

impl Status {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Blocked => "BLOCKED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PASS" => Some(Self::Pass),
            "BLOCKED" => Some(Self::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Trivial,
    Simple,
    Complex,
}

impl Classification {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trivial => "TRIVIAL",
            Self::Simple => "SIMPLE",
            Self::Complex => "COMPLEX",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TRIVIAL" => Some(Self::Trivial),
            "SIMPLE" => Some(Self::Simple),
            "COMPLEX" => Some(Self::Complex),
            _ => None,
        }
    }
}

/// Scope tag of a work item. Older logs use the short `A`/`B`/`AB` codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    #[serde(alias = "A")]
    Backend,
    #[serde(alias = "B")]
    Frontend,
    #[serde(alias = "AB")]
    Fullstack,
}

impl Domain {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Frontend => "frontend",
            Self::Fullstack => "fullstack",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "backend" | "A" => Some(Self::Backend),
            "frontend" | "B" => Some(Self::Frontend),
            "fullstack" | "AB" => Some(Self::Fullstack),
            _ => None,
        }
    }
}

/// Closed set of failure categories shared by metric and failure records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RootCause {
    ValueMismatch,
    InterfaceMismatch,
    MissingCoordination,
    AccessControlGap,
    MissingTest,
    EnvironmentIncompatibility,
    StructuralViolation,
    ScopeViolation,
    VerificationGap,
    Other,
}

impl RootCause {
    pub const ALL: [Self; 10] = [
        Self::ValueMismatch,
        Self::InterfaceMismatch,
        Self::MissingCoordination,
        Self::AccessControlGap,
        Self::MissingTest,
        Self::EnvironmentIncompatibility,
        Self::StructuralViolation,
        Self::ScopeViolation,
        Self::VerificationGap,
        Self::Other,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValueMismatch => "value-mismatch",
            Self::InterfaceMismatch => "interface-mismatch",
            Self::MissingCoordination => "missing-coordination",
            Self::AccessControlGap => "access-control-gap",
            Self::MissingTest => "missing-test",
            Self::EnvironmentIncompatibility => "environment-incompatibility",
            Self::StructuralViolation => "structural-violation",
            Self::ScopeViolation => "scope-violation",
            Self::VerificationGap => "verification-gap",
            Self::Other => "other",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cause| cause.as_str() == value)
    }
}

impl Display for RootCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Opaque work-item key. Accepts JSON integers on read since issue numbers
/// are commonly logged as numbers.
#[derive(Debug, Clone, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct WorkItemId(pub String);

impl WorkItemId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WorkItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for WorkItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for WorkItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(value) => Self(value),
            RawId::Unsigned(value) => Self(value.to_string()),
            RawId::Signed(value) => Self(value.to_string()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricRecord {
    #[serde(alias = "issue")]
    pub identifier: WorkItemId,
    #[serde(alias = "date", with = "date_serde")]
    pub timestamp: Date,
    pub status: Status,
    #[serde(alias = "complexity")]
    pub classification: Classification,
    #[serde(alias = "stack")]
    pub domain: Domain,
    #[serde(default)]
    pub stages_run: Vec<String>,
    #[serde(default)]
    pub stage_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub root_cause: Option<RootCause>,
    #[serde(default)]
    pub blocking_stage: Option<String>,
}

impl MetricRecord {
    /// Checks the status/root-cause pairing before a record is appended.
    ///
    /// # Errors
    /// Returns [`OutcomeError::Validation`] when `root_cause` or
    /// `blocking_stage` disagree with `status`, or when identifiers or stage
    /// names are blank.
    pub fn validate(&self) -> Result<(), OutcomeError> {
        if self.identifier.as_str().trim().is_empty() {
            return Err(OutcomeError::Validation(
                "identifier MUST be provided".to_string(),
            ));
        }

        if self.stages_run.iter().any(|stage| stage.trim().is_empty()) {
            return Err(OutcomeError::Validation(
                "stages_run MUST NOT contain blank stage names".to_string(),
            ));
        }

        match self.status {
            Status::Pass => {
                if self.root_cause.is_some() {
                    return Err(OutcomeError::Validation(
                        "root_cause MUST be null when status=PASS".to_string(),
                    ));
                }
                if self.blocking_stage.is_some() {
                    return Err(OutcomeError::Validation(
                        "blocking_stage MUST be null when status=PASS".to_string(),
                    ));
                }
            }
            Status::Blocked => {
                if self.root_cause.is_none() {
                    return Err(OutcomeError::Validation(
                        "root_cause is required when status=BLOCKED".to_string(),
                    ));
                }
                match self.blocking_stage.as_deref() {
                    Some(stage) if !stage.trim().is_empty() => {}
                    _ => {
                        return Err(OutcomeError::Validation(
                            "blocking_stage is required when status=BLOCKED".to_string(),
                        ))
                    }
                }
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn ran_stage(&self, stage: &str) -> bool {
        self.stages_run.iter().any(|item| item == stage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureRecord {
    #[serde(alias = "issue")]
    pub identifier: WorkItemId,
    #[serde(alias = "date", with = "date_serde")]
    pub timestamp: Date,
    #[serde(default)]
    pub stage: String,
    pub root_cause: RootCause,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub remediation: String,
    #[serde(default)]
    pub prevention: String,
    #[serde(default, alias = "files")]
    pub affected_paths: Vec<String>,
}

impl FailureRecord {
    /// # Errors
    /// Returns [`OutcomeError::Validation`] when the identifier or stage is blank.
    pub fn validate(&self) -> Result<(), OutcomeError> {
        if self.identifier.as_str().trim().is_empty() {
            return Err(OutcomeError::Validation(
                "identifier MUST be provided".to_string(),
            ));
        }

        if self.stage.trim().is_empty() {
            return Err(OutcomeError::Validation(
                "failure stage MUST be provided".to_string(),
            ));
        }

        Ok(())
    }
}

/// Validates an outcome together with its optional failure diagnostic.
///
/// # Errors
/// Returns [`OutcomeError::Validation`] when the outcome is invalid, a
/// blocked outcome has no failure record, a passing outcome carries one, or
/// the pair disagrees on identifier, timestamp or root cause.
pub fn validate_outcome_pair(
    outcome: &MetricRecord,
    failure: Option<&FailureRecord>,
) -> Result<(), OutcomeError> {
    outcome.validate()?;

    match (outcome.status, failure) {
        (Status::Pass, None) => Ok(()),
        (Status::Pass, Some(_)) => Err(OutcomeError::Validation(
            "failure record MUST be omitted when status=PASS".to_string(),
        )),
        (Status::Blocked, None) => Err(OutcomeError::Validation(
            "failure record is required when status=BLOCKED".to_string(),
        )),
        (Status::Blocked, Some(failure)) => {
            failure.validate()?;

            if failure.identifier != outcome.identifier {
                return Err(OutcomeError::Validation(format!(
                    "failure identifier {} does not match outcome identifier {}",
                    failure.identifier, outcome.identifier
                )));
            }

            if failure.timestamp != outcome.timestamp {
                return Err(OutcomeError::Validation(format!(
                    "failure timestamp {} does not match outcome timestamp {}",
                    format_date(failure.timestamp),
                    format_date(outcome.timestamp)
                )));
            }

            if outcome.root_cause != Some(failure.root_cause) {
                return Err(OutcomeError::Validation(format!(
                    "failure root_cause {} does not match outcome root_cause",
                    failure.root_cause
                )));
            }

            Ok(())
        }
    }
}

/// Common accessors for both log record kinds.
pub trait LedgerEntry {
    fn identifier(&self) -> &WorkItemId;
    fn timestamp(&self) -> Date;
}

impl LedgerEntry for MetricRecord {
    fn identifier(&self) -> &WorkItemId {
        &self.identifier
    }

    fn timestamp(&self) -> Date {
        self.timestamp
    }
}

impl LedgerEntry for FailureRecord {
    fn identifier(&self) -> &WorkItemId {
        &self.identifier
    }

    fn timestamp(&self) -> Date {
        self.timestamp
    }
}

/// How retried work items contribute to aggregates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttemptCounting {
    #[default]
    EveryAttempt,
    LatestPerIdentifier,
}

/// Applies [`AttemptCounting`] to a record stream, preserving log order.
///
/// With [`AttemptCounting::LatestPerIdentifier`] the newest record per
/// identifier wins; equal timestamps resolve to the later log line.
pub fn select_attempts<'a, T, I>(records: I, counting: AttemptCounting) -> Vec<&'a T>
where
    T: LedgerEntry + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let records: Vec<&'a T> = records.into_iter().collect();
    match counting {
        AttemptCounting::EveryAttempt => records,
        AttemptCounting::LatestPerIdentifier => {
            let mut latest: BTreeMap<&WorkItemId, usize> = BTreeMap::new();
            for (index, record) in records.iter().enumerate() {
                match latest.get(record.identifier()) {
                    Some(&current) if records[current].timestamp() > record.timestamp() => {}
                    _ => {
                        latest.insert(record.identifier(), index);
                    }
                }
            }

            let mut keep = latest.into_values().collect::<Vec<_>>();
            keep.sort_unstable();
            keep.into_iter().map(|index| records[index]).collect()
        }
    }
}

/// Half-open date range `[since, until)`. A missing bound is unbounded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateWindow {
    #[serde(with = "option_date_serde")]
    pub since: Option<Date>,
    #[serde(with = "option_date_serde")]
    pub until: Option<Date>,
}

impl DateWindow {
    /// # Errors
    /// Returns [`OutcomeError::Validation`] when `since` is after `until`.
    pub fn new(since: Option<Date>, until: Option<Date>) -> Result<Self, OutcomeError> {
        if let (Some(since), Some(until)) = (since, until) {
            if since > until {
                return Err(OutcomeError::Validation(format!(
                    "window since {} is after until {}",
                    format_date(since),
                    format_date(until)
                )));
            }
        }
        Ok(Self { since, until })
    }

    #[must_use]
    pub fn all() -> Self {
        Self {
            since: None,
            until: None,
        }
    }

    /// Window covering the last `days` days up to and including `today`.
    ///
    /// # Errors
    /// Returns [`OutcomeError::Validation`] when the start date underflows.
    pub fn trailing_days(days: u32, today: Date) -> Result<Self, OutcomeError> {
        let since = today
            .checked_sub(Duration::days(i64::from(days)))
            .ok_or_else(|| OutcomeError::Validation(format!("period of {days}d is out of range")))?;
        Ok(Self {
            since: Some(since),
            until: None,
        })
    }

    #[must_use]
    pub fn contains(&self, date: Date) -> bool {
        self.since.map_or(true, |since| date >= since)
            && self.until.map_or(true, |until| date < until)
    }
}

/// Parses a reporting period such as `7d`, `30d`, `90d` or `all`.
///
/// # Errors
/// Returns [`OutcomeError::Validation`] for any other shape.
pub fn parse_period(value: &str, today: Date) -> Result<DateWindow, OutcomeError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("all") {
        return Ok(DateWindow::all());
    }

    let days = trimmed
        .strip_suffix('d')
        .and_then(|raw| raw.parse::<u32>().ok())
        .ok_or_else(|| {
            OutcomeError::Validation(format!(
                "period MUST look like <days>d or all, got {value:?}"
            ))
        })?;
    DateWindow::trailing_days(days, today)
}

/// Parses a `YYYY-MM-DD` date. RFC3339 timestamps are reduced to their UTC date.
///
/// # Errors
/// Returns [`OutcomeError::Validation`] when the value is neither form.
pub fn parse_date(value: &str) -> Result<Date, OutcomeError> {
    let trimmed = value.trim();
    if trimmed.len() > 10 {
        let parsed = OffsetDateTime::parse(trimmed, &Rfc3339).map_err(|err| {
            OutcomeError::Validation(format!("invalid RFC3339 timestamp {value:?}: {err}"))
        })?;
        return Ok(parsed.to_offset(UtcOffset::UTC).date());
    }

    Date::parse(trimmed, format_description!("[year]-[month]-[day]")).map_err(|err| {
        OutcomeError::Validation(format!("invalid date {value:?}, expected YYYY-MM-DD: {err}"))
    })
}

#[must_use]
pub fn format_date(value: Date) -> String {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| value.to_string())
}

#[must_use]
pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC).date()
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

pub(crate) mod date_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(value: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_date(&raw).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod option_date_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<Date>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => serializer.serialize_str(&super::format_date(*date)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Date>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|value| super::parse_date(&value).map_err(serde::de::Error::custom))
            .transpose()
    }
}
