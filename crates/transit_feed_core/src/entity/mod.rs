//! Feed records: one typed struct per table plus the unrecognized columns
//! that were read alongside it.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use transitfeed_model::FeedId;

use crate::csv_reader::{TableRow, TableSchema};
use crate::problems::{Aborted, Problem, ProblemSink};

mod agency;
mod fare;
mod route;
mod service_period;
mod shape;
mod stop;
mod stop_time;
mod transfer;
mod trip;

pub use agency::{is_known_timezone, Agency};
pub use fare::{Fare, FareRule};
pub use route::Route;
pub use service_period::{DateException, ServicePeriod};
pub use shape::{Shape, ShapePoint};
pub use stop::Stop;
pub use stop_time::StopTime;
pub use transfer::Transfer;
pub use trip::{Headway, HeadwayRow, Trip};

/// Columns outside a table's known set, in the order they were read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraFields {
    fields: Vec<(CompactString, String)>,
}

impl ExtraFields {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, column: &str, value: String) {
        match self.fields.iter_mut().find(|(name, _)| name == column) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((CompactString::from(column), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A record that belongs to one table of the feed.
pub trait FeedRecord {
    const SCHEMA: TableSchema;

    /// Output form of a known column, `None` when the column is unset.
    fn field_value(&self, column: &str) -> Option<String>;

    fn extra(&self) -> &ExtraFields;

    /// Single-record checks that need nothing but the record itself.
    fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted>;

    /// Cell text for the writer, known or extra.
    fn cell(&self, column: &str) -> String {
        if Self::SCHEMA.is_known_column(column) {
            self.field_value(column).unwrap_or_default()
        } else {
            self.extra().get(column).unwrap_or_default().to_string()
        }
    }
}

pub(crate) fn text(row: &TableRow, column: &str) -> String {
    row.get(column).unwrap_or_default().to_string()
}

pub(crate) fn optional_text(row: &TableRow, column: &str) -> Option<String> {
    row.get(column).map(str::to_string)
}

pub(crate) fn id(row: &TableRow, column: &str) -> FeedId {
    FeedId::from(row.get(column).unwrap_or_default())
}

pub(crate) fn optional_id(row: &TableRow, column: &str) -> Option<FeedId> {
    row.get(column).map(FeedId::from)
}

/// Parses an optional cell, reporting `InvalidValue` when `parse` rejects it.
pub(crate) fn parse_cell<T>(
    row: &TableRow,
    column: &str,
    reason: Option<&str>,
    sink: &mut dyn ProblemSink,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<Option<T>, Aborted> {
    let Some(value) = row.get(column) else {
        return Ok(None);
    };
    match parse(value) {
        Some(parsed) => Ok(Some(parsed)),
        None => {
            sink.report(Problem::invalid_value(column, value, reason))?;
            Ok(None)
        }
    }
}

/// Reports `MissingValue` for a blank required value; returns whether it was present.
pub(crate) fn require(
    column: &str,
    value: &str,
    sink: &mut dyn ProblemSink,
) -> Result<bool, Aborted> {
    if value.trim().is_empty() {
        sink.report(Problem::missing_value(column, None))?;
        return Ok(false);
    }
    Ok(true)
}

pub(crate) fn parse_int(value: &str) -> Option<i32> {
    value.parse().ok()
}

pub(crate) fn format_decimal(value: f64) -> String {
    value.to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::csv_reader::{TableReader, TableRow, TableSchema};
    use crate::problems::ProblemAccumulator;

    /// Rows of a small in-memory table; header problems are ignored.
    pub(crate) fn rows(schema: TableSchema, text: &str) -> Vec<TableRow> {
        let mut sink = ProblemAccumulator::new();
        TableReader::read_all(schema, text.as_bytes(), &mut sink)
            .expect("lenient sink")
            .map(|(_, rows)| rows)
            .unwrap_or_default()
    }

    pub(crate) fn row(schema: TableSchema, text: &str) -> TableRow {
        rows(schema, text).remove(0)
    }
}
