use std::collections::BTreeMap;

use transitfeed_model::{ExceptionType, FeedId, GtfsDate};

use super::{id, require, ExtraFields, FeedRecord};
use crate::csv_reader::{TableRow, TableSchema};
use crate::problems::{Aborted, Problem, ProblemSink};

pub const DAYS_OF_WEEK: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// A named set of dates on which trips operate: a weekly pattern inside a
/// date range plus per-date overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServicePeriod {
    pub service_id: FeedId,
    pub start_date: Option<GtfsDate>,
    pub end_date: Option<GtfsDate>,
    /// Monday first.
    pub day_of_week: [bool; 7],
    exceptions: BTreeMap<GtfsDate, DateOverride>,
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq)]
struct DateOverride {
    exception_type: ExceptionType,
    extra: ExtraFields,
}

impl ServicePeriod {
    pub const CALENDAR_DATES_SCHEMA: TableSchema = TableSchema {
        file_name: "calendar_dates.txt",
        columns: &["service_id", "date", "exception_type"],
        required: &["service_id", "date", "exception_type"],
    };

    pub fn new(service_id: &str) -> Self {
        Self {
            service_id: FeedId::from(service_id),
            ..Self::default()
        }
    }

    /// Reads a calendar.txt row. Blank or malformed dates and day flags are
    /// reported here because they cannot be represented afterwards.
    pub fn from_row(row: &TableRow, sink: &mut dyn ProblemSink) -> Result<Self, Aborted> {
        let start_date = read_date(row, "start_date", sink)?;
        let end_date = read_date(row, "end_date", sink)?;
        let mut day_of_week = [false; 7];
        for (index, day) in DAYS_OF_WEEK.iter().enumerate() {
            match row.get(day) {
                None => sink.report(Problem::missing_value(day, None))?,
                Some("1") => day_of_week[index] = true,
                Some("0") => {}
                Some(value) => sink.report(Problem::invalid_value(day, value, None))?,
            }
        }
        Ok(Self {
            service_id: id(row, "service_id"),
            start_date,
            end_date,
            day_of_week,
            exceptions: BTreeMap::new(),
            extra: row.extras(&Self::SCHEMA),
        })
    }

    pub fn set_start_date(&mut self, date: GtfsDate) {
        self.start_date = Some(date);
    }

    pub fn set_end_date(&mut self, date: GtfsDate) {
        self.end_date = Some(date);
    }

    /// `day` is 0 for Monday through 6 for Sunday; other values are ignored.
    pub fn set_day_of_week_has_service(&mut self, day: usize, has_service: bool) {
        if let Some(flag) = self.day_of_week.get_mut(day) {
            *flag = has_service;
        }
    }

    pub fn set_weekday_service(&mut self, has_service: bool) {
        for day in 0..5 {
            self.set_day_of_week_has_service(day, has_service);
        }
    }

    pub fn set_weekend_service(&mut self, has_service: bool) {
        self.set_day_of_week_has_service(5, has_service);
        self.set_day_of_week_has_service(6, has_service);
    }

    /// Forces service on or off for `date`. A second override for the same
    /// date replaces the first and is reported as a duplicate.
    pub fn set_date_has_service(
        &mut self,
        date: GtfsDate,
        has_service: bool,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), Aborted> {
        self.set_date_exception(date, has_service, ExtraFields::default(), sink)
    }

    /// Like [`Self::set_date_has_service`], keeping the unrecognized columns
    /// of the calendar_dates.txt row.
    pub fn set_date_exception(
        &mut self,
        date: GtfsDate,
        has_service: bool,
        extra: ExtraFields,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), Aborted> {
        if self.exceptions.contains_key(&date) {
            sink.report(
                Problem::duplicate_id(
                    &["service_id", "date"],
                    &[self.service_id.as_str(), &date.to_string()],
                )
                .warning(),
            )?;
        }
        let exception = if has_service {
            ExceptionType::Added
        } else {
            ExceptionType::Removed
        };
        self.exceptions.insert(
            date,
            DateOverride {
                exception_type: exception,
                extra,
            },
        );
        Ok(())
    }

    pub fn reset_date_to_normal_service(&mut self, date: GtfsDate) {
        self.exceptions.remove(&date);
    }

    pub fn exceptions(&self) -> impl Iterator<Item = (GtfsDate, ExceptionType)> + '_ {
        self.exceptions
            .iter()
            .map(|(date, entry)| (*date, entry.exception_type))
    }

    pub fn has_exceptions(&self) -> bool {
        !self.exceptions.is_empty()
    }

    /// Whether the row belongs in calendar.txt.
    pub fn has_calendar_range(&self) -> bool {
        self.start_date.is_some() && self.end_date.is_some()
    }

    /// First and last date the period may be active on. Added exceptions
    /// widen the range; removed ones never shrink it. A single known bound
    /// is used for both ends.
    pub fn date_range(&self) -> Option<(GtfsDate, GtfsDate)> {
        let mut start = self.start_date;
        let mut end = self.end_date;
        for (date, entry) in &self.exceptions {
            if entry.exception_type == ExceptionType::Removed {
                continue;
            }
            if start.map_or(true, |current| *date < current) {
                start = Some(*date);
            }
            if end.map_or(true, |current| *date > current) {
                end = Some(*date);
            }
        }
        match (start, end) {
            (Some(start), Some(end)) => Some((start, end)),
            (Some(only), None) | (None, Some(only)) => Some((only, only)),
            (None, None) => None,
        }
    }

    pub fn is_active_on(&self, date: GtfsDate) -> bool {
        if let Some(entry) = self.exceptions.get(&date) {
            return entry.exception_type == ExceptionType::Added;
        }
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if start <= date && date <= end => {
                self.day_of_week[date.weekday_index()]
            }
            _ => false,
        }
    }

    pub fn active_dates(&self) -> Vec<GtfsDate> {
        let Some((first, last)) = self.date_range() else {
            return Vec::new();
        };
        let mut dates = Vec::new();
        let mut date = first;
        while date <= last {
            if self.is_active_on(date) {
                dates.push(date);
            }
            date = date.succ();
        }
        dates
    }

    /// Rows of calendar_dates.txt, ordered by date.
    pub fn date_exceptions(&self) -> impl Iterator<Item = DateException<'_>> {
        self.exceptions.iter().map(|(date, entry)| DateException {
            service_id: &self.service_id,
            date: *date,
            exception_type: entry.exception_type,
            extra: &entry.extra,
        })
    }
}

/// One calendar_dates.txt row of a service period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateException<'a> {
    pub service_id: &'a FeedId,
    pub date: GtfsDate,
    pub exception_type: ExceptionType,
    pub extra: &'a ExtraFields,
}

impl FeedRecord for DateException<'_> {
    const SCHEMA: TableSchema = ServicePeriod::CALENDAR_DATES_SCHEMA;

    fn field_value(&self, column: &str) -> Option<String> {
        match column {
            "service_id" => Some(self.service_id.to_string()),
            "date" => Some(self.date.to_string()),
            "exception_type" => Some(self.exception_type.as_i32().to_string()),
            _ => None,
        }
    }

    fn extra(&self) -> &ExtraFields {
        self.extra
    }

    fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
        require("service_id", self.service_id, sink)?;
        Ok(())
    }
}

fn read_date(
    row: &TableRow,
    column: &str,
    sink: &mut dyn ProblemSink,
) -> Result<Option<GtfsDate>, Aborted> {
    let Some(value) = row.get(column) else {
        sink.report(Problem::missing_value(column, None))?;
        return Ok(None);
    };
    match GtfsDate::parse(value) {
        Ok(date) => Ok(Some(date)),
        Err(_) => {
            sink.report(Problem::invalid_value(column, value, None))?;
            Ok(None)
        }
    }
}

impl FeedRecord for ServicePeriod {
    const SCHEMA: TableSchema = TableSchema {
        file_name: "calendar.txt",
        columns: &[
            "service_id",
            "start_date",
            "end_date",
            "monday",
            "tuesday",
            "wednesday",
            "thursday",
            "friday",
            "saturday",
            "sunday",
        ],
        required: &[
            "service_id",
            "start_date",
            "end_date",
            "monday",
            "tuesday",
            "wednesday",
            "thursday",
            "friday",
            "saturday",
            "sunday",
        ],
    };

    fn field_value(&self, column: &str) -> Option<String> {
        match column {
            "service_id" => Some(self.service_id.to_string()),
            "start_date" => self.start_date.map(|date| date.to_string()),
            "end_date" => self.end_date.map(|date| date.to_string()),
            day => DAYS_OF_WEEK
                .iter()
                .position(|name| *name == day)
                .map(|index| if self.day_of_week[index] { "1" } else { "0" }.to_string()),
        }
    }

    fn extra(&self) -> &ExtraFields {
        &self.extra
    }

    fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
        require("service_id", &self.service_id, sink)?;
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                sink.report(Problem::invalid_value(
                    "end_date",
                    end,
                    Some(&format!(
                        "end_date of {end} is earlier than start_date of \"{start}\""
                    )),
                ))?;
            }
        }
        let has_added_date = self
            .exceptions
            .values()
            .any(|entry| entry.exception_type == ExceptionType::Added);
        if !self.day_of_week.contains(&true) && !has_added_date {
            sink.report(
                Problem::other(format!(
                    "Service period with service_id \"{}\" doesn't have service on any days \
                     of the week.",
                    self.service_id
                ))
                .warning(),
            )?;
        }
        Ok(())
    }
}
