use std::fmt;

use transitfeed_model::{DirectionId, FeedId, GtfsTime};

use super::{id, optional_id, optional_text, parse_cell, require, ExtraFields, FeedRecord};
use crate::csv_reader::{TableRow, TableSchema};
use crate::problems::{Aborted, Problem, ProblemSink};

/// A window in which a trip repeats every `headway_secs` seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headway {
    pub start: GtfsTime,
    pub end: GtfsTime,
    pub headway_secs: u32,
    pub extra: ExtraFields,
}

impl Headway {
    pub fn new(start_secs: i32, end_secs: i32, headway_secs: u32) -> Self {
        Self {
            start: GtfsTime::from_seconds(start_secs),
            end: GtfsTime::from_seconds(end_secs),
            headway_secs,
            extra: ExtraFields::default(),
        }
    }

    /// Parses the time window of a frequencies.txt row. The row's trip is
    /// resolved by the caller.
    pub fn from_row(row: &TableRow, sink: &mut dyn ProblemSink) -> Result<Option<Self>, Aborted> {
        let cell = |column| row.get(column).unwrap_or_default();
        let headway = Self::parse(cell("start_time"), cell("end_time"), cell("headway_secs"), sink)?;
        Ok(headway.map(|headway| Self {
            extra: row.extras(&Trip::HEADWAY_SCHEMA),
            ..headway
        }))
    }

    /// Parses a window given as feed text, `None` when a value is unusable.
    pub fn parse(
        start_time: &str,
        end_time: &str,
        headway_secs: &str,
        sink: &mut dyn ProblemSink,
    ) -> Result<Option<Self>, Aborted> {
        let Some(start) = parse_time_field("start_time", start_time, sink)? else {
            return Ok(None);
        };
        let Some(end) = parse_time_field("end_time", end_time, sink)? else {
            return Ok(None);
        };
        let headway_secs = headway_secs.trim();
        if headway_secs.is_empty() {
            sink.report(Problem::missing_value("headway_secs", None))?;
            return Ok(None);
        }
        let Ok(headway) = headway_secs.parse::<i64>() else {
            sink.report(Problem::invalid_value("headway_secs", headway_secs, None))?;
            return Ok(None);
        };
        let Ok(headway_secs) = u32::try_from(headway) else {
            sink.report(Problem::invalid_value("headway_secs", headway, None))?;
            return Ok(None);
        };
        Ok(Some(Self {
            start,
            end,
            headway_secs,
            extra: ExtraFields::default(),
        }))
    }

    pub fn overlaps(&self, other: &Headway) -> bool {
        other.start < self.end && other.end > self.start
    }

    /// Start time of every run in this window.
    pub fn run_start_times(&self) -> impl Iterator<Item = i32> + '_ {
        let step = self.headway_secs.max(1) as usize;
        (self.start.total_seconds()..self.end.total_seconds()).step_by(step)
    }
}

impl fmt::Display for Headway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.start, self.end, self.headway_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trip {
    pub route_id: FeedId,
    pub service_id: FeedId,
    pub trip_id: FeedId,
    pub trip_headsign: Option<String>,
    pub direction_id: Option<DirectionId>,
    pub block_id: Option<FeedId>,
    pub shape_id: Option<FeedId>,
    headways: Vec<Headway>,
    pub extra: ExtraFields,
}

impl Trip {
    pub const HEADWAY_SCHEMA: TableSchema = TableSchema {
        file_name: "frequencies.txt",
        columns: &["trip_id", "start_time", "end_time", "headway_secs"],
        required: &["trip_id", "start_time", "end_time", "headway_secs"],
    };

    pub fn new(trip_id: &str, route_id: &str, service_id: &str) -> Self {
        Self {
            trip_id: FeedId::from(trip_id),
            route_id: FeedId::from(route_id),
            service_id: FeedId::from(service_id),
            ..Self::default()
        }
    }

    pub fn from_row(row: &TableRow, sink: &mut dyn ProblemSink) -> Result<Self, Aborted> {
        let direction_id = parse_cell(
            row,
            "direction_id",
            Some("direction_id must be \"0\" or \"1\""),
            sink,
            DirectionId::parse,
        )?;
        Ok(Self {
            route_id: id(row, "route_id"),
            service_id: id(row, "service_id"),
            trip_id: id(row, "trip_id"),
            trip_headsign: optional_text(row, "trip_headsign"),
            direction_id,
            block_id: optional_id(row, "block_id"),
            shape_id: optional_id(row, "shape_id"),
            headways: Vec::new(),
            extra: row.extras(&Self::SCHEMA),
        })
    }

    pub fn headways(&self) -> &[Headway] {
        &self.headways
    }

    pub fn clear_headways(&mut self) {
        self.headways.clear();
    }

    /// Adds a headway period given as feed text. Returns whether it was kept.
    pub fn add_headway_period(
        &mut self,
        start_time: &str,
        end_time: &str,
        headway_secs: &str,
        sink: &mut dyn ProblemSink,
    ) -> Result<bool, Aborted> {
        match Headway::parse(start_time, end_time, headway_secs, sink)? {
            Some(headway) => self.add_headway(headway, sink),
            None => Ok(false),
        }
    }

    /// Adds a headway period, rejecting empty windows and overlaps with
    /// periods already on the trip.
    pub fn add_headway(&mut self, headway: Headway, sink: &mut dyn ProblemSink) -> Result<bool, Aborted> {
        if headway.headway_secs == 0 {
            sink.report(Problem::invalid_value("headway_secs", headway.headway_secs, None))?;
            return Ok(false);
        }
        if headway.end <= headway.start {
            sink.report(Problem::invalid_value(
                "end_time",
                headway.end,
                Some("should be greater than start_time"),
            ))?;
            return Ok(false);
        }
        if let Some(existing) = self.headways.iter().find(|existing| existing.overlaps(&headway)) {
            sink.report(Problem::other(format!(
                "Trip contains overlapping headway periods {existing} and {headway}"
            )))?;
            return Ok(false);
        }
        self.headways.push(headway);
        Ok(true)
    }

    /// Start time of every headway-based run, in period order.
    pub fn headway_start_times(&self) -> Vec<i32> {
        self.headways
            .iter()
            .flat_map(Headway::run_start_times)
            .collect()
    }

    /// Rows of frequencies.txt for this trip.
    pub fn headway_rows(&self) -> impl Iterator<Item = HeadwayRow<'_>> {
        self.headways.iter().map(|headway| HeadwayRow {
            trip_id: &self.trip_id,
            headway,
        })
    }
}

/// One frequencies.txt row: a headway period and the trip it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadwayRow<'a> {
    pub trip_id: &'a FeedId,
    pub headway: &'a Headway,
}

impl FeedRecord for HeadwayRow<'_> {
    const SCHEMA: TableSchema = Trip::HEADWAY_SCHEMA;

    fn field_value(&self, column: &str) -> Option<String> {
        match column {
            "trip_id" => Some(self.trip_id.to_string()),
            "start_time" => Some(self.headway.start.to_string()),
            "end_time" => Some(self.headway.end.to_string()),
            "headway_secs" => Some(self.headway.headway_secs.to_string()),
            _ => None,
        }
    }

    fn extra(&self) -> &ExtraFields {
        &self.headway.extra
    }

    fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
        require("trip_id", self.trip_id, sink)?;
        Ok(())
    }
}

fn parse_time_field(
    column: &str,
    value: &str,
    sink: &mut dyn ProblemSink,
) -> Result<Option<GtfsTime>, Aborted> {
    let value = value.trim();
    if value.is_empty() {
        sink.report(Problem::missing_value(column, None))?;
        return Ok(None);
    }
    match GtfsTime::parse(value) {
        Ok(time) => Ok(Some(time)),
        Err(_) => {
            sink.report(Problem::invalid_value(column, value, None))?;
            Ok(None)
        }
    }
}

impl FeedRecord for Trip {
    const SCHEMA: TableSchema = TableSchema {
        file_name: "trips.txt",
        columns: &[
            "route_id",
            "service_id",
            "trip_id",
            "trip_headsign",
            "direction_id",
            "block_id",
            "shape_id",
        ],
        required: &["route_id", "service_id", "trip_id"],
    };

    fn field_value(&self, column: &str) -> Option<String> {
        match column {
            "route_id" => Some(self.route_id.to_string()),
            "service_id" => Some(self.service_id.to_string()),
            "trip_id" => Some(self.trip_id.to_string()),
            "trip_headsign" => self.trip_headsign.clone(),
            "direction_id" => self.direction_id.map(|direction| direction.as_str().to_string()),
            "block_id" => self.block_id.as_ref().map(FeedId::to_string),
            "shape_id" => self.shape_id.as_ref().map(FeedId::to_string),
            _ => None,
        }
    }

    fn extra(&self) -> &ExtraFields {
        &self.extra
    }

    fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
        require("route_id", &self.route_id, sink)?;
        require("service_id", &self.service_id, sink)?;
        require("trip_id", &self.trip_id, sink)?;
        Ok(())
    }
}
