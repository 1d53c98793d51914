use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{info, Level};

use transitfeed_core::{
    Aborted, FeedEngine, FeedWriter, LoadOptions, LoadStatus, Problem, ProblemAccumulator,
    ProblemSink, ProgressHandler, Severity, StopTimeStorage, StrictSink, ValidationOptions,
    ValidationOutcome,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "feedvalidator")]
#[command(about = "Validate a transit schedule feed and optionally write it back out")]
struct Args {
    /// Feed zip archive or directory.
    feed: PathBuf,

    /// Reference date for expiration checks (YYYY-MM-DD or YYYYMMDD).
    #[arg(short = 'd', long = "date")]
    date: Option<String>,

    /// Report runs of at least this many days without departures.
    #[arg(long = "service-gap-interval")]
    service_gap_interval: Option<u32>,

    #[arg(long = "check-duplicate-trips")]
    check_duplicate_trips: bool,

    #[arg(long = "require-station-usage")]
    require_station_usage: bool,

    /// Keep stop times in an SQLite file inside this directory.
    #[arg(long = "spill-dir")]
    spill_dir: Option<PathBuf>,

    #[arg(long = "skip-stop-times")]
    skip_stop_times: bool,

    /// Stop at the first error.
    #[arg(long = "strict")]
    strict: bool,

    /// With --strict, stop at the first warning too.
    #[arg(long = "raise-warnings", requires = "strict")]
    raise_warnings: bool,

    /// Write the loaded feed to this zip file or directory.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Print the report as JSON on stdout.
    #[arg(long = "json")]
    json: bool,

    /// Problems listed per kind.
    #[arg(long = "limit", default_value_t = 10)]
    limit: usize,

    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    #[arg(long = "no-progress")]
    no_progress: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let validation_options = validation_options(&args)?;
    let load_options = load_options(&args);
    let mut engine = FeedEngine::new(load_options, validation_options);
    let progress = (!args.no_progress && !args.json).then(|| Arc::new(IndicatifHandler::new()));
    if let Some(progress) = &progress {
        engine = engine.with_progress(Arc::clone(progress) as Arc<dyn ProgressHandler>);
    }

    let started_at = Instant::now();
    let mut report = if args.strict {
        let mut sink = StrictReport::new(args.raise_warnings);
        let outcome = engine
            .validate_path(&args.feed, &mut sink)
            .with_context(|| format!("validate {}", args.feed.display()))?;
        Report::from_strict(outcome, sink)
    } else {
        let mut sink = ProblemAccumulator::with_rank_limit(args.limit);
        let outcome = engine
            .validate_path(&args.feed, &mut sink)
            .with_context(|| format!("validate {}", args.feed.display()))?;
        Report::from_accumulator(outcome, sink)
    };
    if let Some(progress) = &progress {
        progress.finish();
    }
    info!(elapsed = ?started_at.elapsed(), "feed checked");

    if let Some(output) = &args.output {
        if report.outcome.status == LoadStatus::Complete {
            FeedWriter::new(&report.outcome.schedule)
                .write_to_path(output)
                .with_context(|| format!("write {}", output.display()))?;
            report.written = Some(output.clone());
        } else {
            info!("feed did not load completely, nothing written");
        }
    }

    if args.json {
        let json = serde_json::to_string_pretty(&report.to_json(&args))
            .context("serialize report")?;
        println!("{json}");
    } else {
        print!("{}", report.to_text(&args));
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn validation_options(args: &Args) -> anyhow::Result<ValidationOptions> {
    let today = args.date.as_deref().map(parse_date).transpose()?;
    Ok(ValidationOptions {
        today,
        service_gap_interval: args.service_gap_interval,
        check_duplicate_trips: args.check_duplicate_trips,
        require_station_usage: args.require_station_usage,
        problem_rank_limit: args.limit,
    })
}

fn load_options(args: &Args) -> LoadOptions {
    let stop_time_storage = match &args.spill_dir {
        Some(dir) => StopTimeStorage::Spill { dir: dir.clone() },
        None => StopTimeStorage::Memory,
    };
    LoadOptions {
        stop_time_storage,
        load_stop_times: !args.skip_stop_times,
    }
}

fn parse_date(value: &str) -> anyhow::Result<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("--date cannot be empty");
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .with_context(|| format!("invalid --date {value}"))
}

fn status_label(status: LoadStatus) -> String {
    match status {
        LoadStatus::Complete => "complete".to_string(),
        LoadStatus::Fatal(kind) => format!("fatal: {kind}"),
        LoadStatus::Aborted(kind) => format!("aborted: {kind}"),
    }
}

/// Strict sink that keeps the problem it stopped on.
struct StrictReport {
    strict: StrictSink,
    stopped_on: Option<Problem>,
}

impl StrictReport {
    fn new(raise_warnings: bool) -> Self {
        Self {
            strict: StrictSink::new(raise_warnings),
            stopped_on: None,
        }
    }
}

impl ProblemSink for StrictReport {
    fn report(&mut self, problem: Problem) -> Result<(), Aborted> {
        self.strict.report(problem).map_err(|aborted| {
            self.stopped_on = Some(aborted.problem.as_ref().clone());
            aborted
        })
    }
}

/// One kind of problem with its count and the problems worth showing.
struct KindSummary {
    code: String,
    count: usize,
    errors: usize,
    shown: Vec<Problem>,
}

struct Report {
    outcome: ValidationOutcome,
    errors: usize,
    warnings: usize,
    kinds: Vec<KindSummary>,
    stopped_on: Option<Problem>,
    written: Option<PathBuf>,
}

impl Report {
    fn from_accumulator(outcome: ValidationOutcome, sink: ProblemAccumulator) -> Self {
        let kinds = sink
            .kinds()
            .map(|(kind, count)| KindSummary {
                code: kind.code().to_string(),
                count,
                errors: sink.of_kind(kind).filter(|problem| problem.is_error()).count(),
                shown: sink.top(kind).into_iter().cloned().collect(),
            })
            .collect();
        Self {
            outcome,
            errors: sink.error_count(),
            warnings: sink.warning_count(),
            kinds,
            stopped_on: None,
            written: None,
        }
    }

    fn from_strict(outcome: ValidationOutcome, sink: StrictReport) -> Self {
        let warnings = sink.strict.warnings().to_vec();
        let mut kinds: Vec<KindSummary> = Vec::new();
        for problem in warnings.iter().chain(sink.stopped_on.iter()) {
            let code = problem.kind.code();
            let index = match kinds.iter().position(|summary| summary.code == code) {
                Some(index) => index,
                None => {
                    kinds.push(KindSummary {
                        code: code.to_string(),
                        count: 0,
                        errors: 0,
                        shown: Vec::new(),
                    });
                    kinds.len() - 1
                }
            };
            let summary = &mut kinds[index];
            summary.count += 1;
            if problem.is_error() {
                summary.errors += 1;
            }
            summary.shown.push(problem.clone());
        }
        let errors = usize::from(
            sink.stopped_on
                .as_ref()
                .is_some_and(|problem| problem.severity == Severity::Error),
        );
        Self {
            outcome,
            errors,
            warnings: warnings.len() + usize::from(sink.stopped_on.is_some()) - errors,
            kinds,
            stopped_on: sink.stopped_on,
            written: None,
        }
    }

    fn passed(&self) -> bool {
        self.outcome.status == LoadStatus::Complete && self.errors == 0 && self.stopped_on.is_none()
    }

    fn to_text(&self, args: &Args) -> String {
        let mut out = String::new();
        out.push_str(&format!("Feed: {}\n", args.feed.display()));
        out.push_str(&format!("Load: {}\n", status_label(self.outcome.status)));
        if let Some((start, end)) = self.outcome.schedule.date_range() {
            out.push_str(&format!(
                "Service: {} to {}\n",
                start.long_form(),
                end.long_form()
            ));
        }
        out.push_str(&format!(
            "{} error(s), {} warning(s)\n",
            self.errors, self.warnings
        ));
        if let Some(problem) = &self.stopped_on {
            out.push_str(&format!("Stopped on {}: {}\n", problem.kind, first_line(&problem.message)));
        }
        for summary in &self.kinds {
            out.push_str(&format!(
                "\n{} ({} total, {} error(s))\n",
                summary.code, summary.count, summary.errors
            ));
            for problem in summary.shown.iter().take(args.limit) {
                out.push_str(&format!("  {}{}\n", location(problem), first_line(&problem.message)));
            }
            if summary.count > summary.shown.len().min(args.limit) {
                out.push_str(&format!(
                    "  ... and {} more\n",
                    summary.count - summary.shown.len().min(args.limit)
                ));
            }
        }
        if let Some(written) = &self.written {
            out.push_str(&format!("\nWrote {}\n", written.display()));
        }
        out
    }

    fn to_json(&self, args: &Args) -> serde_json::Value {
        let kinds: Vec<serde_json::Value> = self
            .kinds
            .iter()
            .map(|summary| {
                let shown: Vec<&Problem> = summary.shown.iter().take(args.limit).collect();
                serde_json::json!({
                    "code": summary.code,
                    "count": summary.count,
                    "errors": summary.errors,
                    "problems": shown,
                })
            })
            .collect();
        serde_json::json!({
            "feed": args.feed.display().to_string(),
            "status": status_label(self.outcome.status),
            "validated": self.outcome.is_validated(),
            "errors": self.errors,
            "warnings": self.warnings,
            "stopped_on": self.stopped_on,
            "kinds": kinds,
            "written": self.written.as_ref().map(|path| path.display().to_string()),
        })
    }
}

fn location(problem: &Problem) -> String {
    match (&problem.file, problem.row) {
        (Some(file), Some(row)) => format!("{file}:{row}: "),
        (Some(file), None) => format!("{file}: "),
        _ => String::new(),
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or_default()
}

struct IndicatifHandler {
    _multi: MultiProgress,
    loading_pb: ProgressBar,
    validation_pb: ProgressBar,
}

impl IndicatifHandler {
    fn new() -> Self {
        let multi = MultiProgress::new();
        let loading_pb = multi.add(ProgressBar::new(0));
        loading_pb.set_style(bar_style(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
        ));
        loading_pb.set_message("Waiting to load tables...");

        let validation_pb = multi.add(ProgressBar::new(0));
        validation_pb.set_style(bar_style(
            "{spinner:.green} [{elapsed_precise}] {bar:40.magenta/magenta} {pos}/{len} {msg}",
        ));
        validation_pb.set_message("Waiting to validate...");

        Self {
            _multi: multi,
            loading_pb,
            validation_pb,
        }
    }

    fn finish(&self) {
        self.loading_pb.finish_with_message("Loading complete");
        self.validation_pb.finish_with_message("Validation complete");
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

impl ProgressHandler for IndicatifHandler {
    fn on_start_table(&self, file: &str) {
        self.loading_pb.set_message(format!("Loading {file}"));
    }

    fn on_finish_table(&self, _file: &str, _rows: usize) {
        self.loading_pb.inc(1);
    }

    fn on_start_pass(&self, pass: &str) {
        self.validation_pb.set_message(format!("Running {pass}"));
    }

    fn on_finish_pass(&self, _pass: &str) {
        self.validation_pb.inc(1);
    }

    fn set_total_tables(&self, count: usize) {
        self.loading_pb.set_length(count as u64);
    }

    fn set_total_passes(&self, count: usize) {
        self.validation_pb.set_length(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transitfeed_core::ProblemKind;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["feedvalidator", "feed.zip"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).expect("args")
    }

    #[test]
    fn parses_both_date_forms() {
        let expected = NaiveDate::from_ymd_opt(2007, 6, 1).unwrap();
        assert_eq!(parse_date("2007-06-01").unwrap(), expected);
        assert_eq!(parse_date("20070601").unwrap(), expected);
        assert!(parse_date("").is_err());
        assert!(parse_date("June 1").is_err());
    }

    #[test]
    fn maps_flags_onto_options() {
        let args = args(&[
            "--date",
            "20070601",
            "--service-gap-interval",
            "7",
            "--check-duplicate-trips",
            "--spill-dir",
            "/tmp/spill",
            "--limit",
            "3",
        ]);
        let validation = validation_options(&args).unwrap();
        assert_eq!(validation.today, NaiveDate::from_ymd_opt(2007, 6, 1));
        assert_eq!(validation.service_gap_interval, Some(7));
        assert!(validation.check_duplicate_trips);
        assert_eq!(validation.problem_rank_limit, 3);
        let load = load_options(&args);
        assert_eq!(
            load.stop_time_storage,
            StopTimeStorage::Spill {
                dir: PathBuf::from("/tmp/spill")
            }
        );
        assert!(load.load_stop_times);
    }

    #[test]
    fn raise_warnings_needs_strict() {
        assert!(Args::try_parse_from(["feedvalidator", "feed.zip", "--raise-warnings"]).is_err());
        assert!(args(&["--strict", "--raise-warnings"]).raise_warnings);
    }

    #[test]
    fn strict_report_keeps_the_stopping_problem() {
        let mut sink = StrictReport::new(false);
        sink.report(Problem::other("just a note").warning()).unwrap();
        assert!(sink.report(Problem::missing_file("agency.txt")).is_err());
        assert_eq!(
            sink.stopped_on.as_ref().map(|problem| problem.kind),
            Some(ProblemKind::MissingFile)
        );
        assert_eq!(sink.strict.warnings().len(), 1);
    }

    #[test]
    fn labels_load_status() {
        assert_eq!(status_label(LoadStatus::Complete), "complete");
        assert_eq!(
            status_label(LoadStatus::Fatal(ProblemKind::MissingFile)),
            "fatal: missing_file"
        );
    }
}
