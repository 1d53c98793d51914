//! Serializes a [`Schedule`] back into a feed container.
//!
//! Each table keeps the columns it was loaded with, in the order they were
//! first seen, followed by any known or extra column that records carry
//! beyond that set. Stop times, headways and shape points are always
//! regenerated from the schedule rather than from the loaded text.

use std::fs::{self, File};
use std::io::{Cursor, Seek, Write};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::entity::{DateException, FeedRecord, HeadwayRow, ServicePeriod, Shape, StopTime};
use crate::loader::{
    AGENCY_FILE, CALENDAR_DATES_FILE, CALENDAR_FILE, FARE_ATTRIBUTES_FILE, FARE_RULES_FILE,
    FREQUENCIES_FILE, ROUTES_FILE, SHAPES_FILE, STOPS_FILE, STOP_TIMES_FILE, TRANSFERS_FILE,
    TRIPS_FILE,
};
use crate::schedule::Schedule;
use crate::stop_time_store::StoreError;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("stop time store error: {0}")]
    Store(#[from] StoreError),
}

/// One table ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub file_name: &'static str,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    fn new(file_name: &'static str, columns: Vec<String>) -> Self {
        Self {
            file_name,
            columns,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn write_csv<W: Write>(&self, out: W) -> Result<(), WriteError> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(out);
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, WriteError> {
        let mut bytes = Vec::new();
        self.write_csv(&mut bytes)?;
        Ok(bytes)
    }
}

pub struct FeedWriter<'a> {
    schedule: &'a Schedule,
}

impl<'a> FeedWriter<'a> {
    pub fn new(schedule: &'a Schedule) -> Self {
        Self { schedule }
    }

    /// Tables in output order; tables without rows are left out, except
    /// that at least one calendar table is always present.
    pub fn tables(&self) -> Result<Vec<Table>, WriteError> {
        let schedule = self.schedule;
        let calendar_dates = self.calendar_dates_table();
        let periods: Vec<&ServicePeriod> = schedule
            .service_periods()
            .filter(|period| period.has_calendar_range())
            .collect();
        let calendar = self.record_table(CALENDAR_FILE, &periods);

        let mut tables = vec![self.record_table(AGENCY_FILE, &collect(schedule.agencies()))];
        let write_calendar = !calendar.is_empty() || calendar_dates.is_empty();
        tables.push(calendar_dates);
        if write_calendar {
            tables.push(calendar);
        }
        tables.push(self.record_table(STOPS_FILE, &collect(schedule.stops())));
        tables.push(self.record_table(ROUTES_FILE, &collect(schedule.routes())));
        tables.push(self.record_table(TRIPS_FILE, &collect(schedule.trips())));
        tables.push(self.frequencies_table());
        tables.push(self.record_table(FARE_ATTRIBUTES_FILE, &collect(schedule.fares())));
        tables.push(self.record_table(FARE_RULES_FILE, &collect(schedule.fare_rules())));
        tables.push(self.stop_times_table()?);
        tables.push(self.shapes_table());
        tables.push(self.record_table(TRANSFERS_FILE, &collect(schedule.transfers())));

        tables.retain(|table| {
            !table.is_empty() || (table.file_name == CALENDAR_FILE && write_calendar)
        });
        Ok(tables)
    }

    /// Writes every table into a zip archive and hands the writer back.
    pub fn write_zip<W: Write + Seek>(&self, out: W) -> Result<W, WriteError> {
        let mut zip = ZipWriter::new(out);
        let options = FileOptions::default();
        for table in self.tables()? {
            zip.start_file(table.file_name, options)?;
            table.write_csv(&mut zip)?;
            debug!(file = table.file_name, rows = table.rows.len(), "wrote table");
        }
        Ok(zip.finish()?)
    }

    pub fn to_zip_bytes(&self) -> Result<Vec<u8>, WriteError> {
        Ok(self.write_zip(Cursor::new(Vec::new()))?.into_inner())
    }

    /// Writes a zip archive, or a directory of tables when `path` does not
    /// end in `.zip`.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<(), WriteError> {
        let path = path.as_ref();
        let is_zip = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if is_zip {
            self.write_zip(File::create(path)?)?;
        } else {
            fs::create_dir_all(path)?;
            for table in self.tables()? {
                table.write_csv(File::create(path.join(table.file_name))?)?;
            }
        }
        info!(feed = %path.display(), "wrote feed");
        Ok(())
    }

    fn columns<R: FeedRecord>(&self, file_name: &str, records: &[&R]) -> Vec<String> {
        let mut columns: Vec<String> = self.schedule.table_columns(file_name).to_vec();
        for known in R::SCHEMA.columns {
            if !columns.iter().any(|column| column == known)
                && records.iter().any(|record| record.field_value(known).is_some())
            {
                columns.push(known.to_string());
            }
        }
        for record in records {
            for extra in record.extra().columns() {
                if !columns.iter().any(|column| column == extra) {
                    columns.push(extra.to_string());
                }
            }
        }
        columns
    }

    fn record_table<R: FeedRecord>(&self, file_name: &'static str, records: &[&R]) -> Table {
        let mut table = Table::new(file_name, self.columns(file_name, records));
        table.rows = records
            .iter()
            .map(|record| table.columns.iter().map(|column| record.cell(column)).collect())
            .collect();
        table
    }

    fn calendar_dates_table(&self) -> Table {
        let rows: Vec<DateException<'_>> = self
            .schedule
            .service_periods()
            .flat_map(|period| period.date_exceptions())
            .collect();
        self.record_table(CALENDAR_DATES_FILE, &collect(&rows))
    }

    fn frequencies_table(&self) -> Table {
        let rows: Vec<HeadwayRow<'_>> = self
            .schedule
            .trips()
            .flat_map(|trip| trip.headway_rows())
            .collect();
        self.record_table(FREQUENCIES_FILE, &collect(&rows))
    }

    fn stop_times_table(&self) -> Result<Table, WriteError> {
        let mut stop_times: Vec<StopTime> = Vec::new();
        for trip in self.schedule.trips() {
            stop_times.extend(self.schedule.trip_stop_times(&trip.trip_id)?);
        }
        Ok(self.record_table(STOP_TIMES_FILE, &collect(&stop_times)))
    }

    fn shapes_table(&self) -> Table {
        let mut columns: Vec<String> = self.schedule.table_columns(SHAPES_FILE).to_vec();
        let points = || self.schedule.shapes().flat_map(|shape| shape.points());
        for known in Shape::SCHEMA.columns {
            let used = *known != "shape_dist_traveled" || points().any(|point| point.distance.is_some());
            if used && !columns.iter().any(|column| column == known) {
                columns.push(known.to_string());
            }
        }
        for point in points() {
            for extra in point.extra.columns() {
                if !columns.iter().any(|column| column == extra) {
                    columns.push(extra.to_string());
                }
            }
        }

        let mut table = Table::new(SHAPES_FILE, columns);
        for shape in self.schedule.shapes() {
            for index in 0..shape.points().len() {
                let row = table
                    .columns
                    .iter()
                    .map(|column| shape.point_cell(index, column))
                    .collect();
                table.rows.push(row);
            }
        }
        table
    }
}

fn collect<'r, R: 'r>(records: impl IntoIterator<Item = &'r R>) -> Vec<&'r R> {
    records.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::FeedInput;
    use crate::loader::FeedLoader;
    use crate::problems::ProblemAccumulator;

    fn load(tables: &[(&str, &str)]) -> Schedule {
        let input = FeedInput::from_tables(
            tables
                .iter()
                .map(|(name, text)| (name.to_string(), text.as_bytes().to_vec())),
        );
        let mut sink = ProblemAccumulator::new();
        let loaded = FeedLoader::new(input).load(&mut sink).unwrap();
        assert!(loaded.is_complete(), "{:?}", sink.problems());
        loaded.schedule
    }

    fn feed(calendar: Option<&str>, calendar_dates: Option<&str>) -> Vec<(&'static str, String)> {
        let mut tables = vec![
            (
                AGENCY_FILE,
                "agency_name,agency_url,agency_timezone\nDemo,http://example.com,UTC\n".to_string(),
            ),
            (
                STOPS_FILE,
                "stop_id,stop_name,stop_lat,stop_lon,platform_color\n\
                 A,Alpha,36.425288,-117.133162,red\n\
                 B,Beta,36.868446,-116.784582,\n"
                    .to_string(),
            ),
            (ROUTES_FILE, "route_id,route_short_name,route_long_name,route_type\nR,1,,3\n".to_string()),
            (TRIPS_FILE, "route_id,service_id,trip_id\nR,S,T\n".to_string()),
            (
                STOP_TIMES_FILE,
                "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                 T,8:10:00,8:10:00,B,20\n\
                 T,8:00:00,8:00:00,A,10\n"
                    .to_string(),
            ),
        ];
        if let Some(calendar) = calendar {
            tables.push((CALENDAR_FILE, calendar.to_string()));
        }
        if let Some(calendar_dates) = calendar_dates {
            tables.push((CALENDAR_DATES_FILE, calendar_dates.to_string()));
        }
        tables
    }

    fn load_owned(tables: &[(&'static str, String)]) -> Schedule {
        let borrowed: Vec<(&str, &str)> = tables.iter().map(|(name, text)| (*name, text.as_str())).collect();
        load(&borrowed)
    }

    const CALENDAR: &str = "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
                            S,1,1,1,1,1,0,0,20070101,20071231\n";

    #[test]
    fn keeps_observed_column_order_and_extras() {
        let schedule = load_owned(&feed(Some(CALENDAR), None));
        let tables = FeedWriter::new(&schedule).tables().unwrap();
        let stops = tables.iter().find(|table| table.file_name == STOPS_FILE).unwrap();
        assert_eq!(
            stops.columns,
            vec!["stop_id", "stop_name", "stop_lat", "stop_lon", "platform_color"]
        );
        assert_eq!(stops.rows[0][4], "red");
        assert_eq!(stops.rows[1][4], "");
    }

    #[test]
    fn regenerates_stop_times_in_sequence_order() {
        let schedule = load_owned(&feed(Some(CALENDAR), None));
        let tables = FeedWriter::new(&schedule).tables().unwrap();
        let stop_times = tables.iter().find(|table| table.file_name == STOP_TIMES_FILE).unwrap();
        let stop_column = stop_times.columns.iter().position(|column| column == "stop_id").unwrap();
        let stops: Vec<&str> = stop_times.rows.iter().map(|row| row[stop_column].as_str()).collect();
        assert_eq!(stops, vec!["A", "B"]);
    }

    #[test]
    fn writes_calendar_only_when_needed() {
        let dates = "service_id,date,exception_type\nS,20070704,1\n";

        let schedule = load_owned(&feed(None, Some(dates)));
        let names: Vec<&str> = FeedWriter::new(&schedule)
            .tables()
            .unwrap()
            .iter()
            .map(|table| table.file_name)
            .collect();
        assert!(names.contains(&CALENDAR_DATES_FILE));
        assert!(!names.contains(&CALENDAR_FILE));

        let schedule = load_owned(&feed(Some(CALENDAR), None));
        let names: Vec<&str> = FeedWriter::new(&schedule)
            .tables()
            .unwrap()
            .iter()
            .map(|table| table.file_name)
            .collect();
        assert!(names.contains(&CALENDAR_FILE));
        assert!(!names.contains(&CALENDAR_DATES_FILE));
        assert!(!names.contains(&FREQUENCIES_FILE));
        assert!(!names.contains(&SHAPES_FILE));
    }

    #[test]
    fn keeps_extras_of_calendar_dates_and_frequencies() {
        let mut tables = feed(
            Some(CALENDAR),
            Some(
                "service_id,date,exception_type,holiday_name\n\
                 S,20070704,2,Independence Day\n",
            ),
        );
        tables.push((
            FREQUENCIES_FILE,
            "trip_id,start_time,end_time,headway_secs,freq_note\n\
             T,06:00:00,07:00:00,600,peak\n"
                .to_string(),
        ));
        let schedule = load_owned(&tables);
        let written = FeedWriter::new(&schedule).tables().unwrap();

        let dates = written.iter().find(|table| table.file_name == CALENDAR_DATES_FILE).unwrap();
        assert_eq!(dates.columns, vec!["service_id", "date", "exception_type", "holiday_name"]);
        assert_eq!(dates.rows, vec![vec!["S", "20070704", "2", "Independence Day"]]);

        let frequencies = written.iter().find(|table| table.file_name == FREQUENCIES_FILE).unwrap();
        assert_eq!(
            frequencies.columns,
            vec!["trip_id", "start_time", "end_time", "headway_secs", "freq_note"]
        );
        assert_eq!(frequencies.rows, vec![vec!["T", "06:00:00", "07:00:00", "600", "peak"]]);
    }

    #[test]
    fn renumbers_shape_points_from_one() {
        let mut tables = feed(Some(CALENDAR), None);
        tables.push((
            SHAPES_FILE,
            "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
             S1,36.43,-117.13,7\n\
             S1,36.42,-117.13,3\n"
                .to_string(),
        ));
        let schedule = load_owned(&tables);
        let written = FeedWriter::new(&schedule).tables().unwrap();
        let shapes = written.iter().find(|table| table.file_name == SHAPES_FILE).unwrap();
        assert_eq!(
            shapes.columns,
            vec!["shape_id", "shape_pt_lat", "shape_pt_lon", "shape_pt_sequence"]
        );
        let sequences: Vec<(&str, &str)> = shapes
            .rows
            .iter()
            .map(|row| (row[1].as_str(), row[3].as_str()))
            .collect();
        assert_eq!(sequences, vec![("36.42", "1"), ("36.43", "2")]);
    }

    #[test]
    fn zip_output_reloads() {
        let schedule = load_owned(&feed(Some(CALENDAR), None));
        let bytes = FeedWriter::new(&schedule).to_zip_bytes().unwrap();
        let input = FeedInput::from_zip_bytes("written.zip", bytes).unwrap();
        let mut sink = ProblemAccumulator::new();
        let reloaded = FeedLoader::new(input).load(&mut sink).unwrap();
        assert!(reloaded.is_complete(), "{:?}", sink.problems());
        assert_eq!(
            reloaded.schedule.get_stop("A").unwrap(),
            schedule.get_stop("A").unwrap()
        );
        assert_eq!(reloaded.schedule.trip_stop_times("T").unwrap().len(), 2);
    }
}
