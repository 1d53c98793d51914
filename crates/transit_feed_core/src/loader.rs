//! Reads the tables of a feed container into a [`Schedule`].
//!
//! Tables are read in a fixed order so that every reference points at a
//! table that has already been loaded. A missing required table, or a table
//! that is present but cannot be read, stops the load; the schedule built so
//! far is still returned, marked as incomplete.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use transitfeed_model::{parse_non_negative_int, ExceptionType, FeedId, GtfsDate};

use crate::config::LoadOptions;
use crate::csv_reader::{TableReader, TableRow, TableSchema};
use crate::entity::{
    Agency, Fare, FareRule, FeedRecord, Headway, Route, ServicePeriod, Shape, Stop, StopTime,
    Transfer, Trip,
};
use crate::input::FeedInput;
use crate::problems::{Aborted, Problem, ProblemKind, ProblemSink, ScopedSink};
use crate::progress::{NoOpProgressHandler, ProgressHandler};
use crate::schedule::Schedule;
use crate::stop_time_store::StoreError;

pub const AGENCY_FILE: &str = "agency.txt";
pub const STOPS_FILE: &str = "stops.txt";
pub const ROUTES_FILE: &str = "routes.txt";
pub const CALENDAR_FILE: &str = "calendar.txt";
pub const CALENDAR_DATES_FILE: &str = "calendar_dates.txt";
pub const SHAPES_FILE: &str = "shapes.txt";
pub const TRIPS_FILE: &str = "trips.txt";
pub const FREQUENCIES_FILE: &str = "frequencies.txt";
pub const STOP_TIMES_FILE: &str = "stop_times.txt";
pub const FARE_ATTRIBUTES_FILE: &str = "fare_attributes.txt";
pub const FARE_RULES_FILE: &str = "fare_rules.txt";
pub const TRANSFERS_FILE: &str = "transfers.txt";

/// Every table the engine understands, in load order.
pub const FEED_FILE_NAMES: &[&str] = &[
    AGENCY_FILE,
    STOPS_FILE,
    ROUTES_FILE,
    CALENDAR_FILE,
    CALENDAR_DATES_FILE,
    SHAPES_FILE,
    TRIPS_FILE,
    FREQUENCIES_FILE,
    STOP_TIMES_FILE,
    FARE_ATTRIBUTES_FILE,
    FARE_RULES_FILE,
    TRANSFERS_FILE,
];

const STOP_TIME_BATCH: usize = 10_000;

/// How a load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Complete,
    /// A fatal problem of this kind stopped the load.
    Fatal(ProblemKind),
    /// The sink asked to stop after a problem of this kind.
    Aborted(ProblemKind),
}

#[derive(Debug)]
pub struct LoadedFeed {
    pub schedule: Schedule,
    pub status: LoadStatus,
}

impl LoadedFeed {
    pub fn is_complete(&self) -> bool {
        self.status == LoadStatus::Complete
    }
}

/// Why a load step stopped early.
enum Halt {
    Fatal(ProblemKind),
    Aborted(Aborted),
    Store(StoreError),
}

impl From<Aborted> for Halt {
    fn from(aborted: Aborted) -> Self {
        Halt::Aborted(aborted)
    }
}

impl From<StoreError> for Halt {
    fn from(err: StoreError) -> Self {
        Halt::Store(err)
    }
}

/// Forwards problems and remembers the kind of the last error.
struct LastError<'a> {
    inner: &'a mut dyn ProblemSink,
    kind: Option<ProblemKind>,
}

impl ProblemSink for LastError<'_> {
    fn report(&mut self, problem: Problem) -> Result<(), Aborted> {
        if problem.is_error() {
            self.kind = Some(problem.kind);
        }
        self.inner.report(problem)
    }
}

pub struct FeedLoader {
    input: FeedInput,
    options: LoadOptions,
    progress: Arc<dyn ProgressHandler>,
}

impl FeedLoader {
    pub fn new(input: FeedInput) -> Self {
        Self {
            input,
            options: LoadOptions::default(),
            progress: Arc::new(NoOpProgressHandler),
        }
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    /// Opens a zip file or directory and loads it. A path that cannot be
    /// opened is a fatal problem, not an error.
    pub fn load_path(
        path: impl AsRef<Path>,
        options: LoadOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<LoadedFeed, StoreError> {
        let path = path.as_ref();
        match FeedInput::open(path) {
            Ok(input) => Self::new(input).with_options(options).load(sink),
            Err(err) => {
                let problem = err.to_problem(&path.display().to_string());
                let kind = problem.kind;
                let status = match sink.report(problem) {
                    Ok(()) => LoadStatus::Fatal(kind),
                    Err(_) => LoadStatus::Aborted(kind),
                };
                warn!(feed = %path.display(), "feed could not be opened");
                Ok(LoadedFeed {
                    schedule: Schedule::new(),
                    status,
                })
            }
        }
    }

    /// Loads every table. Only a failure of the stop-time store is returned
    /// as an error; feed problems go to `sink`.
    pub fn load(mut self, sink: &mut dyn ProblemSink) -> Result<LoadedFeed, StoreError> {
        let mut schedule = Schedule::with_storage(&self.options.stop_time_storage)?;
        let feed_name = self.input.display_name();
        info!(feed = %feed_name, "loading feed");
        let status = match self.load_tables(&mut schedule, sink) {
            Ok(()) => LoadStatus::Complete,
            Err(Halt::Fatal(kind)) => {
                warn!(feed = %feed_name, kind = kind.code(), "load stopped by a fatal problem");
                LoadStatus::Fatal(kind)
            }
            Err(Halt::Aborted(aborted)) => {
                warn!(feed = %feed_name, kind = aborted.problem.kind.code(), "load aborted");
                LoadStatus::Aborted(aborted.problem.kind)
            }
            Err(Halt::Store(err)) => return Err(err),
        };
        Ok(LoadedFeed { schedule, status })
    }

    fn load_tables(&mut self, schedule: &mut Schedule, sink: &mut dyn ProblemSink) -> Result<(), Halt> {
        self.check_file_names(sink)?;
        self.progress.set_total_tables(FEED_FILE_NAMES.len());

        self.load_simple(Agency::SCHEMA, true, schedule, sink, |row, _| Ok(Agency::from_row(row)), Schedule::add_agency)?;
        self.load_simple(Stop::SCHEMA, true, schedule, sink, Stop::from_row, Schedule::add_stop)?;
        self.load_simple(Route::SCHEMA, true, schedule, sink, Route::from_row, Schedule::add_route)?;
        self.load_calendars(schedule, sink)?;
        self.load_shapes(schedule, sink)?;
        self.load_simple(Trip::SCHEMA, true, schedule, sink, Trip::from_row, Schedule::add_trip)?;
        self.load_headways(schedule, sink)?;
        if self.options.load_stop_times {
            self.load_stop_times(schedule, sink)?;
        }
        self.load_simple(Fare::SCHEMA, false, schedule, sink, Fare::from_row, Schedule::add_fare)?;
        self.load_simple(FareRule::SCHEMA, false, schedule, sink, |row, _| Ok(FareRule::from_row(row)), Schedule::add_fare_rule)?;
        self.load_simple(Transfer::SCHEMA, false, schedule, sink, Transfer::from_row, Schedule::add_transfer)?;
        Ok(())
    }

    /// Unknown entries are reported; hidden files and directories are skipped.
    fn check_file_names(&self, sink: &mut dyn ProblemSink) -> Result<(), Halt> {
        let names = match self.input.file_names() {
            Ok(names) => names,
            Err(err) => {
                let problem = err.to_problem(&self.input.display_name());
                let kind = problem.kind;
                sink.report(problem)?;
                return Err(Halt::Fatal(kind));
            }
        };
        for name in names {
            let hidden = name
                .split('/')
                .any(|component| component.starts_with('.') || component == "__MACOSX");
            if hidden || name.ends_with('/') {
                continue;
            }
            if !FEED_FILE_NAMES.contains(&name.as_str()) {
                sink.report(Problem::unknown_file(&name))?;
            }
        }
        Ok(())
    }

    /// Opens a table for reading. `Ok(None)` means an optional table is absent.
    fn open_table(
        &mut self,
        schema: TableSchema,
        required: bool,
        schedule: &mut Schedule,
        sink: &mut dyn ProblemSink,
    ) -> Result<Option<TableReader>, Halt> {
        let file_name = schema.file_name;
        let bytes = match self.input.read_file(file_name) {
            Ok(Some(bytes)) => bytes,
            Ok(None) if required => {
                sink.report(Problem::missing_file(file_name))?;
                return Err(Halt::Fatal(ProblemKind::MissingFile));
            }
            Ok(None) => return Ok(None),
            Err(err) => {
                sink.report(
                    Problem::file_format(file_name, &format!("could not be read: {err}"))
                )?;
                return Err(Halt::Fatal(ProblemKind::FileFormat));
            }
        };
        self.progress.on_start_table(file_name);
        let mut tracking = LastError { inner: sink, kind: None };
        let Some(reader) = TableReader::open(schema, &bytes, &mut tracking)? else {
            return Err(Halt::Fatal(tracking.kind.unwrap_or(ProblemKind::FileFormat)));
        };
        schedule.add_table_columns(file_name, reader.columns());
        Ok(Some(reader))
    }

    fn finish_table(&self, file_name: &str, rows: usize, kept: usize) {
        info!(file = file_name, rows, kept, "loaded table");
        self.progress.on_finish_table(file_name, kept);
    }

    /// Reads a table whose rows map one-to-one onto records.
    fn load_simple<T>(
        &mut self,
        schema: TableSchema,
        required: bool,
        schedule: &mut Schedule,
        sink: &mut dyn ProblemSink,
        parse: impl Fn(&TableRow, &mut dyn ProblemSink) -> Result<T, Aborted>,
        add: impl Fn(&mut Schedule, T, &mut dyn ProblemSink) -> Result<bool, Aborted>,
    ) -> Result<(), Halt> {
        let Some(mut reader) = self.open_table(schema, required, schedule, sink)? else {
            return Ok(());
        };
        let (mut rows, mut kept) = (0, 0);
        while let Some(row) = reader.next_row(sink)? {
            rows += 1;
            let mut scope = ScopedSink::new(sink)
                .in_file(schema.file_name)
                .at_row(row.row_number);
            let record = parse(&row, &mut scope)?;
            if scope.has_errors() {
                continue;
            }
            if add(schedule, record, &mut scope)? {
                kept += 1;
            }
        }
        self.finish_table(schema.file_name, rows, kept);
        Ok(())
    }

    /// Merges calendar.txt and calendar_dates.txt by service_id. Services
    /// that only appear in calendar_dates.txt get a period of their own.
    fn load_calendars(&mut self, schedule: &mut Schedule, sink: &mut dyn ProblemSink) -> Result<(), Halt> {
        if !self.input.has_file(CALENDAR_FILE) && !self.input.has_file(CALENDAR_DATES_FILE) {
            sink.report(Problem::missing_file(CALENDAR_FILE))?;
            return Err(Halt::Fatal(ProblemKind::MissingFile));
        }
        // Each period remembers the file and row it was first seen on.
        let mut periods: BTreeMap<FeedId, (ServicePeriod, &'static str, u64)> = BTreeMap::new();

        if let Some(mut reader) = self.open_table(ServicePeriod::SCHEMA, false, schedule, sink)? {
            let rows = read_rows(&mut reader, sink)?;
            for row in &rows {
                let mut scope = ScopedSink::new(sink).in_file(CALENDAR_FILE).at_row(row.row_number);
                let period = ServicePeriod::from_row(row, &mut scope)?;
                if scope.has_errors() {
                    continue;
                }
                if periods.contains_key(&period.service_id) {
                    scope.report(Problem::duplicate_id(&["service_id"], &[period.service_id.as_str()]))?;
                    continue;
                }
                periods.insert(period.service_id.clone(), (period, CALENDAR_FILE, row.row_number));
            }
            self.finish_table(CALENDAR_FILE, rows.len(), periods.len());
        }

        let schema = ServicePeriod::CALENDAR_DATES_SCHEMA;
        if let Some(mut reader) = self.open_table(schema, false, schedule, sink)? {
            let (mut rows, mut kept) = (0, 0);
            while let Some(row) = reader.next_row(sink)? {
                rows += 1;
                let mut scope = ScopedSink::new(sink)
                    .in_file(CALENDAR_DATES_FILE)
                    .at_row(row.row_number);
                let Some((service_id, date, exception)) = read_exception(&row, &mut scope)? else {
                    continue;
                };
                let (period, _, _) = periods.entry(service_id.clone()).or_insert_with(|| {
                    (ServicePeriod::new(&service_id), CALENDAR_DATES_FILE, row.row_number)
                });
                period.set_date_exception(
                    date,
                    exception == ExceptionType::Added,
                    row.extras(&schema),
                    &mut scope,
                )?;
                kept += 1;
            }
            self.finish_table(CALENDAR_DATES_FILE, rows, kept);
        }

        for (period, file_name, row_number) in periods.into_values() {
            let mut scope = ScopedSink::new(sink).in_file(file_name).at_row(row_number);
            schedule.add_service_period(period, &mut scope)?;
        }
        Ok(())
    }

    /// Groups shape points by shape and orders them by shape_pt_sequence
    /// before adding them.
    fn load_shapes(&mut self, schedule: &mut Schedule, sink: &mut dyn ProblemSink) -> Result<(), Halt> {
        let Some(mut reader) = self.open_table(Shape::SCHEMA, false, schedule, sink)? else {
            return Ok(());
        };
        let mut grouped: BTreeMap<FeedId, Vec<(u32, TableRow)>> = BTreeMap::new();
        let mut rows = 0;
        while let Some(row) = reader.next_row(sink)? {
            rows += 1;
            let mut scope = ScopedSink::new(sink).in_file(SHAPES_FILE).at_row(row.row_number);
            let Some(shape_id) = row.get("shape_id") else {
                scope.report(Problem::missing_value("shape_id", None))?;
                continue;
            };
            let sequence = match row.get("shape_pt_sequence") {
                None => {
                    scope.report(Problem::missing_value("shape_pt_sequence", None))?;
                    continue;
                }
                Some(value) => match parse_non_negative_int(value) {
                    Ok(sequence) => sequence,
                    Err(_) => {
                        scope.report(Problem::invalid_value(
                            "shape_pt_sequence",
                            value,
                            Some("The value should be a number between 0 and 2147483647 (inclusive)."),
                        ))?;
                        continue;
                    }
                },
            };
            grouped.entry(FeedId::from(shape_id)).or_default().push((sequence, row));
        }

        let mut kept = 0;
        for (shape_id, mut points) in grouped {
            points.sort_by_key(|(sequence, _)| *sequence);
            let mut shape = Shape::new(&shape_id);
            let mut previous = None;
            for (sequence, row) in &points {
                let mut scope = ScopedSink::new(sink).in_file(SHAPES_FILE).at_row(row.row_number);
                if previous == Some(*sequence) {
                    scope.report(Problem::invalid_value(
                        "shape_pt_sequence",
                        sequence,
                        Some(&format!(
                            "The sequence number {sequence} occurs more than once in shape {shape_id}."
                        )),
                    ))?;
                    continue;
                }
                previous = Some(*sequence);
                let (Some(lat), Some(lon)) = (row.get("shape_pt_lat"), row.get("shape_pt_lon")) else {
                    for column in ["shape_pt_lat", "shape_pt_lon"] {
                        if row.get(column).is_none() {
                            scope.report(Problem::missing_value(column, None))?;
                        }
                    }
                    continue;
                };
                let distance = row.get("shape_dist_traveled").unwrap_or_default();
                shape.add_point_text(lat, lon, distance, row.extras(&Shape::SCHEMA), &mut scope)?;
            }
            let mut scope = ScopedSink::new(sink).in_file(SHAPES_FILE);
            if schedule.add_shape(shape, &mut scope)? {
                kept += 1;
            }
        }
        self.finish_table(SHAPES_FILE, rows, kept);
        Ok(())
    }

    fn load_headways(&mut self, schedule: &mut Schedule, sink: &mut dyn ProblemSink) -> Result<(), Halt> {
        let Some(mut reader) = self.open_table(Trip::HEADWAY_SCHEMA, false, schedule, sink)? else {
            return Ok(());
        };
        let (mut rows, mut kept) = (0, 0);
        while let Some(row) = reader.next_row(sink)? {
            rows += 1;
            let mut scope = ScopedSink::new(sink).in_file(FREQUENCIES_FILE).at_row(row.row_number);
            let Some(trip_id) = row.get("trip_id") else {
                scope.report(Problem::missing_value("trip_id", None))?;
                continue;
            };
            let Some(headway) = Headway::from_row(&row, &mut scope)? else {
                continue;
            };
            let Ok(trip) = schedule.trip_mut(trip_id) else {
                scope.report(Problem::invalid_value(
                    "trip_id",
                    trip_id,
                    Some("This value wasn't defined in trips.txt"),
                ))?;
                continue;
            };
            if trip.add_headway(headway, &mut scope)? {
                kept += 1;
            }
        }
        self.finish_table(FREQUENCIES_FILE, rows, kept);
        Ok(())
    }

    /// Streams stop_times.txt into the store in batches, keeping the
    /// sequence numbers of the file.
    fn load_stop_times(&mut self, schedule: &mut Schedule, sink: &mut dyn ProblemSink) -> Result<(), Halt> {
        let Some(mut reader) = self.open_table(StopTime::SCHEMA, true, schedule, sink)? else {
            return Ok(());
        };
        let mut batch = Vec::with_capacity(STOP_TIME_BATCH);
        let (mut rows, mut kept) = (0, 0);
        while let Some(row) = reader.next_row(sink)? {
            rows += 1;
            let mut scope = ScopedSink::new(sink).in_file(STOP_TIMES_FILE).at_row(row.row_number);
            let stop_time = StopTime::from_row(&row, &mut scope)?;
            if !stop_time.trip_id.is_empty() && schedule.get_trip(&stop_time.trip_id).is_err() {
                scope.report(Problem::invalid_value(
                    "trip_id",
                    &stop_time.trip_id,
                    Some("This value wasn't defined in trips.txt"),
                ))?;
            }
            if !stop_time.stop_id.is_empty() && schedule.get_stop(&stop_time.stop_id).is_err() {
                scope.report(Problem::invalid_value(
                    "stop_id",
                    &stop_time.stop_id,
                    Some("This value wasn't defined in stops.txt"),
                ))?;
            }
            stop_time.validate(&mut scope)?;
            if scope.has_errors() {
                continue;
            }
            batch.push(stop_time);
            kept += 1;
            if batch.len() == STOP_TIME_BATCH {
                schedule.insert_stop_times(std::mem::take(&mut batch))?;
            }
        }
        schedule.insert_stop_times(batch)?;
        self.finish_table(STOP_TIMES_FILE, rows, kept);
        Ok(())
    }
}

fn read_rows(reader: &mut TableReader, sink: &mut dyn ProblemSink) -> Result<Vec<TableRow>, Aborted> {
    let mut rows = Vec::new();
    while let Some(row) = reader.next_row(sink)? {
        rows.push(row);
    }
    Ok(rows)
}

/// One row of calendar_dates.txt, `None` when it cannot be used.
fn read_exception(
    row: &TableRow,
    sink: &mut dyn ProblemSink,
) -> Result<Option<(FeedId, GtfsDate, ExceptionType)>, Aborted> {
    let mut usable = true;
    let service_id = row.get("service_id");
    if service_id.is_none() {
        sink.report(Problem::missing_value("service_id", None))?;
        usable = false;
    }
    let date = match row.get("date") {
        None => {
            sink.report(Problem::missing_value("date", None))?;
            None
        }
        Some(value) => match GtfsDate::parse(value) {
            Ok(date) => Some(date),
            Err(_) => {
                sink.report(Problem::invalid_value("date", value, None))?;
                None
            }
        },
    };
    let exception = match row.get("exception_type") {
        None => {
            sink.report(Problem::missing_value("exception_type", None))?;
            None
        }
        Some(value) => match value.parse().ok().and_then(ExceptionType::from_i32) {
            Some(exception) => Some(exception),
            None => {
                sink.report(Problem::invalid_value(
                    "exception_type",
                    value,
                    Some("exception_type must be 1 (service added) or 2 (service removed)"),
                ))?;
                None
            }
        },
    };
    match (service_id, date, exception) {
        (Some(service_id), Some(date), Some(exception)) if usable => {
            Ok(Some((FeedId::from(service_id), date, exception)))
        }
        _ => Ok(None),
    }
}
