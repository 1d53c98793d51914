use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use transitfeed_model::GtfsDate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    FeedNotFound,
    UnknownFormat,
    FileFormat,
    MissingFile,
    EmptyFile,
    UnknownFile,
    MissingColumn,
    UnrecognizedColumn,
    CsvSyntax,
    DuplicateColumn,
    MissingValue,
    InvalidValue,
    DuplicateId,
    UnusedStop,
    UsedStation,
    StopTooFarFromParentStation,
    StopsTooClose,
    StationsTooClose,
    DifferentStationTooClose,
    StopTooFarFromShapeWithDistTraveled,
    ExpirationDate,
    FutureService,
    InvalidLineEnd,
    TooFastTravel,
    StopWithMultipleRouteTypes,
    DuplicateTrip,
    TooManyDaysWithoutService,
    OtherProblem,
}

/// How problems of one kind are ordered when only the most significant are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ranking {
    NearestFirst,
    FarthestFirst,
    Insertion,
}

impl ProblemKind {
    pub fn code(&self) -> &'static str {
        match self {
            ProblemKind::FeedNotFound => "feed_not_found",
            ProblemKind::UnknownFormat => "unknown_format",
            ProblemKind::FileFormat => "file_format",
            ProblemKind::MissingFile => "missing_file",
            ProblemKind::EmptyFile => "empty_file",
            ProblemKind::UnknownFile => "unknown_file",
            ProblemKind::MissingColumn => "missing_column",
            ProblemKind::UnrecognizedColumn => "unrecognized_column",
            ProblemKind::CsvSyntax => "csv_syntax",
            ProblemKind::DuplicateColumn => "duplicate_column",
            ProblemKind::MissingValue => "missing_value",
            ProblemKind::InvalidValue => "invalid_value",
            ProblemKind::DuplicateId => "duplicate_id",
            ProblemKind::UnusedStop => "unused_stop",
            ProblemKind::UsedStation => "used_station",
            ProblemKind::StopTooFarFromParentStation => "stop_too_far_from_parent_station",
            ProblemKind::StopsTooClose => "stops_too_close",
            ProblemKind::StationsTooClose => "stations_too_close",
            ProblemKind::DifferentStationTooClose => "different_station_too_close",
            ProblemKind::StopTooFarFromShapeWithDistTraveled => {
                "stop_too_far_from_shape_with_dist_traveled"
            }
            ProblemKind::ExpirationDate => "expiration_date",
            ProblemKind::FutureService => "future_service",
            ProblemKind::InvalidLineEnd => "invalid_line_end",
            ProblemKind::TooFastTravel => "too_fast_travel",
            ProblemKind::StopWithMultipleRouteTypes => "stop_with_multiple_route_types",
            ProblemKind::DuplicateTrip => "duplicate_trip",
            ProblemKind::TooManyDaysWithoutService => "too_many_days_without_service",
            ProblemKind::OtherProblem => "other_problem",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            ProblemKind::UnknownFile
            | ProblemKind::UnrecognizedColumn
            | ProblemKind::UnusedStop
            | ProblemKind::StopTooFarFromParentStation
            | ProblemKind::StopsTooClose
            | ProblemKind::StationsTooClose
            | ProblemKind::DifferentStationTooClose
            | ProblemKind::StopTooFarFromShapeWithDistTraveled
            | ProblemKind::ExpirationDate
            | ProblemKind::FutureService
            | ProblemKind::InvalidLineEnd
            | ProblemKind::StopWithMultipleRouteTypes
            | ProblemKind::DuplicateTrip
            | ProblemKind::TooManyDaysWithoutService => Severity::Warning,
            _ => Severity::Error,
        }
    }

    fn ranking(&self) -> Ranking {
        match self {
            ProblemKind::StopsTooClose
            | ProblemKind::StationsTooClose
            | ProblemKind::DifferentStationTooClose => Ranking::NearestFirst,
            ProblemKind::StopTooFarFromParentStation
            | ProblemKind::StopTooFarFromShapeWithDistTraveled
            | ProblemKind::TooFastTravel => Ranking::FarthestFirst,
            _ => Ranking::Insertion,
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub kind: ProblemKind,
    pub severity: Severity,
    pub message: String,
    pub file: Option<String>,
    pub row: Option<u64>,
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_order: Vec<String>,
}

impl Problem {
    pub fn new(kind: ProblemKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            file: None,
            row: None,
            field: None,
            context: BTreeMap::new(),
            field_order: Vec::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn warning(self) -> Self {
        self.with_severity(Severity::Warning)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn insert_context_field<V: Serialize>(&mut self, name: impl Into<String>, value: V) {
        let key = name.into();
        let serialized = serde_json::to_value(value).unwrap_or(Value::Null);
        if !self.field_order.iter().any(|item| item == &key) {
            self.field_order.push(key.clone());
        }
        self.context.insert(key, serialized);
    }

    pub fn with_context_field<V: Serialize>(mut self, name: impl Into<String>, value: V) -> Self {
        self.insert_context_field(name, value);
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_row(mut self, row: u64) -> Self {
        self.row = Some(row);
        self
    }

    pub fn context_str(&self, name: &str) -> Option<&str> {
        self.context.get(name).and_then(Value::as_str)
    }

    pub fn context_f64(&self, name: &str) -> Option<f64> {
        self.context.get(name).and_then(Value::as_f64)
    }

    fn with_column(mut self, column: &str) -> Self {
        self.field = Some(column.to_string());
        self.with_context_field("column_name", column)
    }

    fn with_reason(mut self, reason: Option<&str>) -> Self {
        if let Some(reason) = reason {
            self.message = format!("{}\n{}", self.message, reason);
            self.insert_context_field("reason", reason);
        }
        self
    }

    pub fn feed_not_found(feed_name: &str) -> Self {
        Problem::new(
            ProblemKind::FeedNotFound,
            format!("Couldn't find a feed named {feed_name}"),
        )
        .with_context_field("feed_name", feed_name)
    }

    pub fn unknown_format(feed_name: &str) -> Self {
        Problem::new(
            ProblemKind::UnknownFormat,
            format!(
                "The feed named {feed_name} had an unknown format:\n\
                 feeds should be either .zip files or directories."
            ),
        )
        .with_context_field("feed_name", feed_name)
    }

    pub fn file_format(file_name: &str, problem: &str) -> Self {
        Problem::new(
            ProblemKind::FileFormat,
            format!(
                "Files must be encoded in utf-8 and may not contain any null bytes \
                 (0x00). {file_name} {problem}."
            ),
        )
        .with_file(file_name)
        .with_context_field("file_name", file_name)
        .with_context_field("problem", problem)
    }

    pub fn missing_file(file_name: &str) -> Self {
        Problem::new(
            ProblemKind::MissingFile,
            format!("File {file_name} is not found"),
        )
        .with_file(file_name)
        .with_context_field("file_name", file_name)
    }

    pub fn empty_file(file_name: &str) -> Self {
        Problem::new(ProblemKind::EmptyFile, format!("File {file_name} is empty"))
            .with_file(file_name)
            .with_context_field("file_name", file_name)
    }

    pub fn unknown_file(file_name: &str) -> Self {
        Problem::new(
            ProblemKind::UnknownFile,
            format!(
                "The file named {file_name} was not expected.\n\
                 This may be a misspelled file name or the file may be included in a \
                 subdirectory. Please check spellings and make sure that there are no \
                 subdirectories within the feed"
            ),
        )
        .with_file(file_name)
        .with_context_field("file_name", file_name)
    }

    pub fn missing_column(file_name: &str, column: &str) -> Self {
        Problem::new(
            ProblemKind::MissingColumn,
            format!("Missing column {column} in file {file_name}"),
        )
        .with_file(file_name)
        .with_row(1)
        .with_context_field("file_name", file_name)
        .with_column(column)
    }

    pub fn unrecognized_column(file_name: &str, column: &str) -> Self {
        Problem::new(
            ProblemKind::UnrecognizedColumn,
            format!(
                "Unrecognized column {column} in file {file_name}. This might be a \
                 misspelled column name (capitalization matters!). Or it could be extra \
                 information (such as a proposed feed extension) that the validator \
                 doesn't know about yet. Extra information is fine; this warning is here \
                 to catch misspelled optional column names."
            ),
        )
        .with_file(file_name)
        .with_row(1)
        .with_context_field("file_name", file_name)
        .with_column(column)
    }

    pub fn csv_syntax(description: &str, severity: Severity) -> Self {
        Problem::new(ProblemKind::CsvSyntax, description)
            .with_severity(severity)
            .with_context_field("description", description)
    }

    pub fn duplicate_column(file_name: &str, header: &str, count: usize) -> Self {
        Problem::new(
            ProblemKind::DuplicateColumn,
            format!("Column {header} appears {count} times in file {file_name}"),
        )
        .with_file(file_name)
        .with_row(1)
        .with_context_field("file_name", file_name)
        .with_context_field("header", header)
        .with_context_field("count", count)
    }

    pub fn missing_value(column: &str, reason: Option<&str>) -> Self {
        Problem::new(
            ProblemKind::MissingValue,
            format!("Missing value for column {column}"),
        )
        .with_column(column)
        .with_reason(reason)
    }

    pub fn invalid_value(column: &str, value: impl fmt::Display, reason: Option<&str>) -> Self {
        let value = value.to_string();
        Problem::new(
            ProblemKind::InvalidValue,
            format!("Invalid value {value} in field {column}"),
        )
        .with_column(column)
        .with_context_field("value", value)
        .with_reason(reason)
    }

    /// Multi-column keys are rendered as `(a, b)`.
    pub fn duplicate_id(columns: &[&str], values: &[&str]) -> Self {
        let join = |parts: &[&str]| {
            if parts.len() == 1 {
                parts[0].to_string()
            } else {
                format!("({})", parts.join(", "))
            }
        };
        let column = join(columns);
        let value = join(values);
        Problem::new(
            ProblemKind::DuplicateId,
            format!("Duplicate ID {value} in column {column}"),
        )
        .with_column(&column)
        .with_context_field("value", value)
    }

    pub fn unused_stop(stop_id: &str, stop_name: &str) -> Self {
        Problem::new(
            ProblemKind::UnusedStop,
            format!("{stop_name} (ID {stop_id}) isn't used in any trips"),
        )
        .with_context_field("stop_id", stop_id)
        .with_context_field("stop_name", stop_name)
    }

    pub fn used_station(stop_id: &str, stop_name: &str) -> Self {
        Problem::new(
            ProblemKind::UsedStation,
            format!(
                "{stop_name} (ID {stop_id}) has location_type=1 (station) so it should \
                 not appear in stop_times"
            ),
        )
        .with_context_field("stop_id", stop_id)
        .with_context_field("stop_name", stop_name)
    }

    pub fn stop_too_far_from_parent_station(
        stop_id: &str,
        stop_name: &str,
        parent_id: &str,
        parent_name: &str,
        distance: f64,
        severity: Severity,
    ) -> Self {
        Problem::new(
            ProblemKind::StopTooFarFromParentStation,
            format!(
                "{stop_name} (ID {stop_id}) is too far from its parent station \
                 {parent_name} (ID {parent_id}) : {distance:.2} meters."
            ),
        )
        .with_severity(severity)
        .with_context_field("stop_id", stop_id)
        .with_context_field("stop_name", stop_name)
        .with_context_field("parent_stop_id", parent_id)
        .with_context_field("parent_stop_name", parent_name)
        .with_context_field("distance", distance)
    }

    pub fn stops_too_close(
        name_a: &str,
        id_a: &str,
        name_b: &str,
        id_b: &str,
        distance: f64,
    ) -> Self {
        Self::too_close(ProblemKind::StopsTooClose, "stops", name_a, id_a, name_b, id_b, distance)
    }

    pub fn stations_too_close(
        name_a: &str,
        id_a: &str,
        name_b: &str,
        id_b: &str,
        distance: f64,
    ) -> Self {
        Self::too_close(
            ProblemKind::StationsTooClose,
            "stations",
            name_a,
            id_a,
            name_b,
            id_b,
            distance,
        )
    }

    fn too_close(
        kind: ProblemKind,
        noun: &str,
        name_a: &str,
        id_a: &str,
        name_b: &str,
        id_b: &str,
        distance: f64,
    ) -> Self {
        Problem::new(
            kind,
            format!(
                "The {noun} \"{name_a}\" (ID {id_a}) and \"{name_b}\" (ID {id_b}) are \
                 {distance:.2}m apart and probably represent the same location."
            ),
        )
        .with_context_field("stop_name_a", name_a)
        .with_context_field("stop_id_a", id_a)
        .with_context_field("stop_name_b", name_b)
        .with_context_field("stop_id_b", id_b)
        .with_context_field("distance", distance)
    }

    pub fn different_station_too_close(
        stop_name: &str,
        stop_id: &str,
        station_name: &str,
        station_id: &str,
        distance: f64,
    ) -> Self {
        Problem::new(
            ProblemKind::DifferentStationTooClose,
            format!(
                "The parent_station of stop \"{stop_name}\" (ID {stop_id}) is not station \
                 \"{station_name}\" (ID {station_id}) but they are only {distance:.2}m apart."
            ),
        )
        .with_context_field("stop_name", stop_name)
        .with_context_field("stop_id", stop_id)
        .with_context_field("station_stop_name", station_name)
        .with_context_field("station_stop_id", station_id)
        .with_context_field("distance", distance)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn stop_too_far_from_shape(
        trip_id: &str,
        stop_name: &str,
        stop_id: &str,
        shape_dist_traveled: f64,
        shape_id: &str,
        distance: f64,
        max_distance: f64,
    ) -> Self {
        Problem::new(
            ProblemKind::StopTooFarFromShapeWithDistTraveled,
            format!(
                "For trip {trip_id} the stop \"{stop_name}\" (ID {stop_id}) is {distance:.0} \
                 meters away from the corresponding point (shape_dist_traveled: \
                 {shape_dist_traveled:.6}) on shape {shape_id}. It should be closer than \
                 {max_distance:.0} meters."
            ),
        )
        .with_context_field("trip_id", trip_id)
        .with_context_field("stop_name", stop_name)
        .with_context_field("stop_id", stop_id)
        .with_context_field("shape_dist_traveled", shape_dist_traveled)
        .with_context_field("shape_id", shape_id)
        .with_context_field("distance", distance)
        .with_context_field("max_distance", max_distance)
    }

    pub fn expiration_date(expiration: GtfsDate, today: GtfsDate) -> Self {
        let message = if expiration < today {
            format!("This feed expired on {}", expiration.long_form())
        } else {
            format!("This feed will soon expire, on {}", expiration.long_form())
        };
        Problem::new(ProblemKind::ExpirationDate, message)
            .with_context_field("expiration", expiration)
    }

    pub fn future_service(start_date: GtfsDate) -> Self {
        Problem::new(
            ProblemKind::FutureService,
            format!(
                "The earliest service date in this feed is in the future, on {}. \
                 Published feeds must always include the current date.",
                start_date.long_form()
            ),
        )
        .with_context_field("start_date", start_date)
    }

    pub fn invalid_line_end(bad_line_end: &str) -> Self {
        Problem::new(
            ProblemKind::InvalidLineEnd,
            format!(
                "Each line must end with CR LF or LF except for the last line of the file. \
                 This line ends with \"{bad_line_end}\"."
            ),
        )
        .with_context_field("bad_line_end", bad_line_end)
    }

    pub fn too_fast_travel(
        trip_id: &str,
        prev_stop: &str,
        next_stop: &str,
        distance: f64,
        seconds: i32,
        speed_kph: Option<f64>,
    ) -> Self {
        let mut message = format!(
            "High speed travel detected in trip {trip_id}: {prev_stop} to {next_stop}. \
             {distance:.0} meters in {seconds} seconds."
        );
        if let Some(speed) = speed_kph {
            message.push_str(&format!(" ({speed:.0} km/h)."));
        }
        Problem::new(ProblemKind::TooFastTravel, message)
            .with_context_field("trip_id", trip_id)
            .with_context_field("prev_stop", prev_stop)
            .with_context_field("next_stop", next_stop)
            .with_context_field("distance", distance)
            .with_context_field("time", seconds)
            .with_context_field("speed", speed_kph)
    }

    pub fn stop_with_multiple_route_types(
        stop_name: &str,
        stop_id: &str,
        subway_route_id: &str,
        bus_route_id: &str,
    ) -> Self {
        Problem::new(
            ProblemKind::StopWithMultipleRouteTypes,
            format!(
                "Stop {stop_name} (ID={stop_id}) belongs to both subway \
                 (ID={subway_route_id}) and bus line (ID={bus_route_id})."
            ),
        )
        .with_context_field("stop_name", stop_name)
        .with_context_field("stop_id", stop_id)
        .with_context_field("route_id1", subway_route_id)
        .with_context_field("route_id2", bus_route_id)
    }

    pub fn duplicate_trip(trip_id1: &str, route_id1: &str, trip_id2: &str, route_id2: &str) -> Self {
        Problem::new(
            ProblemKind::DuplicateTrip,
            format!(
                "Trip {trip_id1} of route {route_id1} might be duplicated with trip \
                 {trip_id2} of route {route_id2}. They go through the same stops with same \
                 service."
            ),
        )
        .with_context_field("trip_id1", trip_id1)
        .with_context_field("route_id1", route_id1)
        .with_context_field("trip_id2", trip_id2)
        .with_context_field("route_id2", route_id2)
    }

    pub fn too_many_days_without_service(first: GtfsDate, last: GtfsDate, days: u32) -> Self {
        Problem::new(
            ProblemKind::TooManyDaysWithoutService,
            format!(
                "There are {days} consecutive days, from {} to {}, without any scheduled \
                 service. Please ensure this is intentional.",
                first.naive(),
                last.naive()
            ),
        )
        .with_context_field("first_day_without_service", first)
        .with_context_field("last_day_without_service", last)
        .with_context_field("consecutive_days_without_service", days)
    }

    pub fn other(description: impl Into<String>) -> Self {
        let description = description.into();
        Problem::new(ProblemKind::OtherProblem, description.clone())
            .with_context_field("description", description)
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "[{severity}] {}", self.kind)?;
        if let Some(file) = &self.file {
            write!(f, " {file}")?;
            if let Some(row) = self.row {
                write!(f, ":{row}")?;
            }
        }
        if let Some(field) = &self.field {
            write!(f, " column {field}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Returned by a sink to stop the running load or validation.
#[derive(Debug, thiserror::Error)]
#[error("stopped on {}: {}", .problem.kind, .problem.message)]
pub struct Aborted {
    pub problem: Box<Problem>,
}

pub trait ProblemSink {
    fn report(&mut self, problem: Problem) -> Result<(), Aborted>;
}

#[derive(Debug)]
struct RankedEntry {
    score: f64,
    problem: Problem,
}

/// Keeps at most `limit` problems of one kind, most significant first.
#[derive(Debug)]
struct RankedProblems {
    ranking: Ranking,
    limit: usize,
    entries: Vec<RankedEntry>,
}

impl RankedProblems {
    fn new(kind: ProblemKind, limit: usize) -> Self {
        Self {
            ranking: kind.ranking(),
            limit,
            entries: Vec::new(),
        }
    }

    fn offer(&mut self, problem: &Problem) {
        let distance = problem.context_f64("distance").unwrap_or(0.0);
        let score = match self.ranking {
            Ranking::NearestFirst => distance,
            Ranking::FarthestFirst => -distance,
            Ranking::Insertion => {
                if self.entries.len() < self.limit {
                    self.entries.push(RankedEntry {
                        score: 0.0,
                        problem: problem.clone(),
                    });
                }
                return;
            }
        };
        // Ties keep arrival order.
        let position = self
            .entries
            .iter()
            .position(|entry| entry.score.total_cmp(&score).is_gt())
            .unwrap_or(self.entries.len());
        if position >= self.limit {
            return;
        }
        self.entries.insert(
            position,
            RankedEntry {
                score,
                problem: problem.clone(),
            },
        );
        self.entries.truncate(self.limit);
    }
}

/// Lenient sink: records everything and never aborts.
#[derive(Debug)]
pub struct ProblemAccumulator {
    problems: Vec<Problem>,
    counts: BTreeMap<ProblemKind, usize>,
    ranked: BTreeMap<ProblemKind, RankedProblems>,
    rank_limit: usize,
    errors: usize,
    warnings: usize,
}

impl Default for ProblemAccumulator {
    fn default() -> Self {
        Self::with_rank_limit(10)
    }
}

impl ProblemAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rank_limit(rank_limit: usize) -> Self {
        Self {
            problems: Vec::new(),
            counts: BTreeMap::new(),
            ranked: BTreeMap::new(),
            rank_limit,
            errors: 0,
            warnings: 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter()
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    pub fn into_problems(self) -> Vec<Problem> {
        self.problems
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn count_of(&self, kind: ProblemKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn of_kind(&self, kind: ProblemKind) -> impl Iterator<Item = &Problem> {
        self.problems.iter().filter(move |problem| problem.kind == kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = (ProblemKind, usize)> + '_ {
        self.counts.iter().map(|(kind, count)| (*kind, *count))
    }

    /// The most significant problems of `kind`, bounded by the rank limit.
    pub fn top(&self, kind: ProblemKind) -> Vec<&Problem> {
        self.ranked
            .get(&kind)
            .map(|ranked| ranked.entries.iter().map(|entry| &entry.problem).collect())
            .unwrap_or_default()
    }
}

impl ProblemSink for ProblemAccumulator {
    fn report(&mut self, problem: Problem) -> Result<(), Aborted> {
        debug!(kind = problem.kind.code(), "{}", problem.message);
        match problem.severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
        }
        *self.counts.entry(problem.kind).or_insert(0) += 1;
        let limit = self.rank_limit;
        self.ranked
            .entry(problem.kind)
            .or_insert_with(|| RankedProblems::new(problem.kind, limit))
            .offer(&problem);
        self.problems.push(problem);
        Ok(())
    }
}

/// Strict sink: aborts on the first error, or on any problem with `raise_warnings`.
#[derive(Debug, Default)]
pub struct StrictSink {
    raise_warnings: bool,
    warnings: Vec<Problem>,
}

impl StrictSink {
    pub fn new(raise_warnings: bool) -> Self {
        Self {
            raise_warnings,
            warnings: Vec::new(),
        }
    }

    pub fn warnings(&self) -> &[Problem] {
        &self.warnings
    }
}

impl ProblemSink for StrictSink {
    fn report(&mut self, problem: Problem) -> Result<(), Aborted> {
        if problem.is_error() || self.raise_warnings {
            return Err(Aborted {
                problem: Box::new(problem),
            });
        }
        debug!(kind = problem.kind.code(), "{}", problem.message);
        self.warnings.push(problem);
        Ok(())
    }
}

/// Forwards to another sink, stamping file and row context on problems that
/// lack it and counting errors that pass through.
pub struct ScopedSink<'a> {
    inner: &'a mut dyn ProblemSink,
    file: Option<&'a str>,
    row: Option<u64>,
    errors: usize,
}

impl<'a> ScopedSink<'a> {
    pub fn new(inner: &'a mut dyn ProblemSink) -> Self {
        Self {
            inner,
            file: None,
            row: None,
            errors: 0,
        }
    }

    pub fn in_file(mut self, file: &'a str) -> Self {
        self.file = Some(file);
        self
    }

    pub fn at_row(mut self, row: u64) -> Self {
        self.row = Some(row);
        self
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

impl ProblemSink for ScopedSink<'_> {
    fn report(&mut self, mut problem: Problem) -> Result<(), Aborted> {
        if problem.file.is_none() {
            problem.file = self.file.map(str::to_string);
        }
        if problem.row.is_none() {
            problem.row = self.row;
        }
        if problem.is_error() {
            self.errors += 1;
        }
        self.inner.report(problem)
    }
}
