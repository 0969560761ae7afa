//! Command surface for the outcome ledger.
//!
//! Hosts can embed the CLI through [`run_cli`] for a fully parsed command line,
//! or [`run_ledger_command`] against an already opened [`JsonlLedger`].

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use outcome_ledger_core::{
    format_date, parse_date, parse_period, today_utc, AttemptCounting, BreakdownRow,
    Classification, DashboardOptions, DateWindow, Domain, FailureRecord, MetricRecord,
    PatternOptions, RootCause, Status, WorkItemId, DEFAULT_MIN_VALIDATION_SAMPLES,
};
use outcome_ledger_store_jsonl::{
    JsonlLedger, LedgerDashboard, LedgerTrend, LedgerValidation, PatternReport,
};
use time::Date;

pub const PROJECT_DIR_ENV: &str = "CLAUDE_PROJECT_DIR";
const MEMORY_SUBDIR: [&str; 2] = [".claude", "memory"];

#[derive(Debug, Parser)]
#[command(name = "outcomes")]
#[command(about = "Outcome ledger and failure pattern CLI")]
pub struct Cli {
    /// Directory holding metrics.jsonl and failures.jsonl.
    #[arg(long, global = true)]
    memory_dir: Option<PathBuf>,

    /// Project root; logs live under <project>/.claude/memory.
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: LedgerCommand,
}

#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    /// Append one outcome, plus its failure diagnostic when blocked.
    Record(RecordArgs),
    /// Group failure records by root cause.
    Patterns(PatternsArgs),
    /// Summarize outcomes over a time window.
    Dashboard(DashboardArgs),
    /// Pass rate per fixed-size time bucket.
    Trend(TrendArgs),
    /// Compare pass rates before and after a prevention rule was adopted.
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    #[arg(long = "id")]
    identifier: String,
    /// YYYY-MM-DD; defaults to today (UTC).
    #[arg(long)]
    date: Option<String>,
    #[arg(long, value_enum, ignore_case = true)]
    status: StatusArg,
    #[arg(long, value_enum, ignore_case = true)]
    classification: ClassificationArg,
    #[arg(long, value_enum, ignore_case = true)]
    domain: DomainArg,
    #[arg(long = "stage")]
    stages: Vec<String>,
    /// Repeatable `stage=version` pair.
    #[arg(long = "stage-version")]
    stage_versions: Vec<String>,
    #[arg(long, value_parser = parse_root_cause_arg)]
    root_cause: Option<RootCause>,
    #[arg(long)]
    blocking_stage: Option<String>,
    /// Stage that surfaced the failure; defaults to --blocking-stage.
    #[arg(long)]
    failure_stage: Option<String>,
    #[arg(long, default_value = "")]
    details: String,
    #[arg(long, default_value = "")]
    remediation: String,
    #[arg(long, default_value = "")]
    prevention: String,
    #[arg(long = "affected-path")]
    affected_paths: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PatternsArgs {
    #[arg(long, default_value_t = 1)]
    min_occurrences: usize,
    #[arg(long, default_value_t = 3)]
    max_examples: usize,
    /// Count only the newest attempt per work item.
    #[arg(long)]
    latest_only: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct WindowArgs {
    /// 7d, 30d, 90d or all.
    #[arg(long, conflicts_with_all = ["since", "until"])]
    period: Option<String>,
    /// Inclusive start date.
    #[arg(long)]
    since: Option<String>,
    /// Exclusive end date.
    #[arg(long)]
    until: Option<String>,
}

#[derive(Debug, Args)]
pub struct DashboardArgs {
    #[command(flatten)]
    window: WindowArgs,
    #[arg(long, default_value_t = 5)]
    top: usize,
    #[arg(long)]
    latest_only: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct TrendArgs {
    #[command(flatten)]
    window: WindowArgs,
    #[arg(long, default_value_t = 7)]
    bucket_days: u32,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[arg(long, value_parser = parse_root_cause_arg)]
    root_cause: RootCause,
    /// Adoption date of the prevention rule.
    #[arg(long)]
    before: String,
    #[arg(long, default_value_t = DEFAULT_MIN_VALIDATION_SAMPLES)]
    min_samples: usize,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Pass,
    Blocked,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ClassificationArg {
    Trivial,
    Simple,
    Complex,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DomainArg {
    #[value(alias = "a")]
    Backend,
    #[value(alias = "b")]
    Frontend,
    #[value(alias = "ab")]
    Fullstack,
}

const DEFAULT_DASHBOARD_PERIOD: &str = "30d";
const DEFAULT_TREND_PERIOD: &str = "90d";

/// Executes the parsed top-level command line.
///
/// # Errors
/// Returns an error when arguments fail validation or the ledger cannot be
/// read or appended.
pub fn run_cli(cli: Cli) -> Result<()> {
    let memory_dir = resolve_memory_dir(
        cli.memory_dir.as_deref(),
        cli.project.as_deref(),
        std::env::var_os(PROJECT_DIR_ENV),
    );
    let ledger = JsonlLedger::open_dir(&memory_dir);
    run_ledger_command(cli.command, &ledger)
}

/// Executes one ledger command against an opened ledger.
///
/// # Errors
/// Returns an error when arguments fail validation or the ledger cannot be
/// read or appended.
pub fn run_ledger_command(command: LedgerCommand, ledger: &JsonlLedger) -> Result<()> {
    execute(command, ledger, today_utc())
}

/// Picks the log directory: explicit `--memory-dir`, then `--project`, then
/// the project env var, then the working directory.
#[must_use]
pub fn resolve_memory_dir(
    memory_dir: Option<&Path>,
    project: Option<&Path>,
    env_project: Option<OsString>,
) -> PathBuf {
    if let Some(dir) = memory_dir {
        return dir.to_path_buf();
    }

    let root = project
        .map(Path::to_path_buf)
        .or_else(|| {
            env_project
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from("."));
    MEMORY_SUBDIR.iter().fold(root, |path, part| path.join(part))
}

fn execute(command: LedgerCommand, ledger: &JsonlLedger, today: Date) -> Result<()> {
    match command {
        LedgerCommand::Record(args) => {
            let (outcome, failure) = build_outcome(args, today)?;
            let receipt = ledger
                .record(&outcome, failure.as_ref())
                .with_context(|| format!("failed to record outcome {}", outcome.identifier))?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
            Ok(())
        }
        LedgerCommand::Patterns(args) => {
            let options = PatternOptions {
                min_occurrences: args.min_occurrences,
                max_examples: args.max_examples,
                counting: counting(args.latest_only),
                ..PatternOptions::default()
            };
            let report = ledger
                .extract(&options)
                .context("failed to extract failure patterns")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_pattern_report(&report);
            }
            Ok(())
        }
        LedgerCommand::Dashboard(args) => {
            let window = resolve_window(&args.window, DEFAULT_DASHBOARD_PERIOD, today)?;
            let options = DashboardOptions {
                top_root_causes: args.top,
                counting: counting(args.latest_only),
            };
            let dashboard = ledger
                .render(&window, &options)
                .context("failed to render dashboard")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&dashboard)?);
            } else {
                print_dashboard(&dashboard);
            }
            Ok(())
        }
        LedgerCommand::Trend(args) => {
            let window = resolve_window(&args.window, DEFAULT_TREND_PERIOD, today)?;
            let trend = ledger
                .trend(&window, args.bucket_days)
                .context("failed to build trend")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&trend)?);
            } else {
                print_trend(&trend);
            }
            Ok(())
        }
        LedgerCommand::Validate(args) => {
            let before = parse_date(&args.before)?;
            let report = ledger
                .validate_pattern(args.root_cause, before, args.min_samples)
                .context("failed to validate pattern")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_validation(&report);
            }
            Ok(())
        }
    }
}

fn build_outcome(args: RecordArgs, today: Date) -> Result<(MetricRecord, Option<FailureRecord>)> {
    let timestamp = match args.date.as_deref() {
        Some(raw) => parse_date(raw)?,
        None => today,
    };
    let identifier = WorkItemId::from(args.identifier);
    let status = match args.status {
        StatusArg::Pass => Status::Pass,
        StatusArg::Blocked => Status::Blocked,
    };

    let failure = match (status, args.root_cause) {
        (Status::Blocked, Some(root_cause)) => Some(FailureRecord {
            identifier: identifier.clone(),
            timestamp,
            stage: args
                .failure_stage
                .or_else(|| args.blocking_stage.clone())
                .unwrap_or_default(),
            root_cause,
            details: args.details,
            remediation: args.remediation,
            prevention: args.prevention,
            affected_paths: args.affected_paths,
        }),
        _ => None,
    };

    let outcome = MetricRecord {
        identifier,
        timestamp,
        status,
        classification: map_classification(args.classification),
        domain: map_domain(args.domain),
        stages_run: args.stages,
        stage_versions: parse_stage_versions(&args.stage_versions)?,
        root_cause: args.root_cause,
        blocking_stage: args.blocking_stage,
    };

    Ok((outcome, failure))
}

fn parse_stage_versions(raw: &[String]) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|item| {
            let (stage, version) = item.split_once('=').ok_or_else(|| {
                anyhow!("invalid --stage-version {item:?}, expected stage=version")
            })?;
            let (stage, version) = (stage.trim(), version.trim());
            if stage.is_empty() || version.is_empty() {
                return Err(anyhow!(
                    "invalid --stage-version {item:?}, expected stage=version"
                ));
            }
            Ok((stage.to_string(), version.to_string()))
        })
        .collect()
}

fn parse_root_cause_arg(raw: &str) -> std::result::Result<RootCause, String> {
    RootCause::parse(raw.trim()).ok_or_else(|| {
        let allowed = RootCause::ALL
            .iter()
            .map(|cause| cause.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("unknown root cause {raw:?}; expected one of: {allowed}")
    })
}

fn resolve_window(args: &WindowArgs, default_period: &str, today: Date) -> Result<DateWindow> {
    if args.since.is_none() && args.until.is_none() {
        let period = args.period.as_deref().unwrap_or(default_period);
        return Ok(parse_period(period, today)?);
    }

    let since = args.since.as_deref().map(parse_date).transpose()?;
    let until = args.until.as_deref().map(parse_date).transpose()?;
    Ok(DateWindow::new(since, until)?)
}

fn counting(latest_only: bool) -> AttemptCounting {
    if latest_only {
        AttemptCounting::LatestPerIdentifier
    } else {
        AttemptCounting::EveryAttempt
    }
}

fn map_classification(value: ClassificationArg) -> Classification {
    match value {
        ClassificationArg::Trivial => Classification::Trivial,
        ClassificationArg::Simple => Classification::Simple,
        ClassificationArg::Complex => Classification::Complex,
    }
}

fn map_domain(value: DomainArg) -> Domain {
    match value {
        DomainArg::Backend => Domain::Backend,
        DomainArg::Frontend => Domain::Frontend,
        DomainArg::Fullstack => Domain::Fullstack,
    }
}

fn format_window(window: &DateWindow) -> String {
    format!(
        "{}..{}",
        window.since.map_or_else(|| "start".to_string(), format_date),
        window.until.map_or_else(|| "now".to_string(), format_date)
    )
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

fn print_skipped(metric_lines: usize, failure_lines: usize) {
    let total = metric_lines + failure_lines;
    if total > 0 {
        println!("skipped_lines={total} metrics={metric_lines} failures={failure_lines}");
    }
}

fn print_pattern_report(report: &PatternReport) {
    println!(
        "total_failures={} counted={} unique_causes={}",
        report.total_failures, report.counted_failures, report.unique_causes
    );
    println!(
        "{:<28} {:<6} {:<8} {:<11} examples",
        "root_cause", "count", "share", "last_seen"
    );
    println!("{}", "-".repeat(80));

    for pattern in &report.patterns {
        println!(
            "{:<28} {:<6} {:<8} {:<11} {}",
            pattern.root_cause,
            pattern.occurrence_count,
            format!("{:.1}%", pattern.percentage_of_total),
            format_date(pattern.last_seen),
            pattern
                .example_identifiers
                .iter()
                .map(WorkItemId::as_str)
                .collect::<Vec<_>>()
                .join(",")
        );
        for prevention in &pattern.suggested_prevention {
            println!("  prevention: {prevention}");
        }
        for example in &pattern.recent_examples {
            println!(
                "  example {} {}: {}",
                example.identifier,
                format_date(example.timestamp),
                example.details
            );
        }
    }

    if report.skipped_lines > 0 {
        println!("skipped_lines={}", report.skipped_lines);
    }
}

fn print_breakdown(title: &str, rows: &[BreakdownRow]) {
    println!("{title}");
    println!(
        "{:<14} {:<6} {:<7} {:<8} pass_rate",
        "key", "total", "passed", "blocked"
    );
    for row in rows {
        println!(
            "{:<14} {:<6} {:<7} {:<8} {}",
            row.key,
            row.total,
            row.passed,
            row.blocked,
            percent(row.pass_rate)
        );
    }
}

fn print_dashboard(dashboard: &LedgerDashboard) {
    let view = &dashboard.view;
    println!("window={}", format_window(&view.window));
    println!(
        "total={} passed={} blocked={} pass_rate={}",
        view.total,
        view.passed,
        view.blocked,
        percent(view.pass_rate)
    );
    println!("{}", "-".repeat(60));

    if view.total == 0 {
        println!("no outcomes recorded in window");
    } else {
        print_breakdown("by classification", &view.by_classification);
        print_breakdown("by domain", &view.by_domain);

        println!("stage blocking");
        println!("{:<20} {:<6} {:<8} rate", "stage", "runs", "blocked");
        for stage in &view.stage_blocking {
            println!(
                "{:<20} {:<6} {:<8} {}",
                stage.stage,
                stage.runs,
                stage.blocked,
                percent(stage.blocking_rate)
            );
        }

        println!("top root causes");
        for pattern in &view.top_root_causes {
            println!(
                "{:<28} {:<6} {:.1}%",
                pattern.root_cause, pattern.occurrence_count, pattern.percentage_of_total
            );
        }
    }

    print_skipped(dashboard.skipped_metric_lines, dashboard.skipped_failure_lines);
}

fn print_trend(trend: &LedgerTrend) {
    println!(
        "window={} bucket_days={}",
        format_window(&trend.window),
        trend.bucket_days
    );
    println!("{:<24} {:<6} {:<7} pass_rate", "bucket", "total", "passed");
    println!("{}", "-".repeat(50));
    for bucket in &trend.buckets {
        println!(
            "{:<24} {:<6} {:<7} {}",
            format_window(&bucket.window),
            bucket.total,
            bucket.passed,
            percent(bucket.pass_rate)
        );
    }
    print_skipped(trend.skipped_metric_lines, 0);
}

fn print_validation(report: &LedgerValidation) {
    let validation = &report.validation;
    let rate = |value: Option<f64>| value.map_or_else(|| "n/a".to_string(), percent);

    println!(
        "root_cause={} before={} associated_stages={}",
        validation.root_cause,
        format_date(validation.before_date),
        if validation.associated_stages.is_empty() {
            "none".to_string()
        } else {
            validation.associated_stages.join(",")
        }
    );
    println!(
        "before: samples={} passed={} rate={}",
        validation.sample_before,
        validation.passed_before,
        rate(validation.rate_before)
    );
    println!(
        "after: samples={} passed={} rate={}",
        validation.sample_after,
        validation.passed_after,
        rate(validation.rate_after)
    );
    println!(
        "delta={} min_samples={} verdict={:?}",
        validation
            .delta
            .map_or_else(|| "n/a".to_string(), |delta| format!("{:+.1}pp", delta * 100.0)),
        validation.min_samples,
        validation.verdict
    );
    print_skipped(report.skipped_metric_lines, report.skipped_failure_lines);
}
