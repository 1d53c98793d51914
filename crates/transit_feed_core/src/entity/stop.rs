use transitfeed_model::{is_valid_url, parse_decimal, FeedId, LocationType};

use super::{
    format_decimal, id, optional_id, optional_text, parse_cell, parse_int, require, text,
    ExtraFields, FeedRecord,
};
use crate::csv_reader::{TableRow, TableSchema};
use crate::problems::{Aborted, Problem, ProblemSink};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stop {
    pub stop_id: FeedId,
    pub stop_name: String,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
    pub stop_desc: Option<String>,
    pub zone_id: Option<FeedId>,
    pub stop_url: Option<String>,
    pub stop_code: Option<String>,
    pub location_type: LocationType,
    pub parent_station: Option<FeedId>,
    pub extra: ExtraFields,
}

impl Stop {
    pub fn new(stop_id: &str, name: &str, lat: f64, lon: f64) -> Self {
        Self {
            stop_id: FeedId::from(stop_id),
            stop_name: name.to_string(),
            stop_lat: Some(lat),
            stop_lon: Some(lon),
            ..Self::default()
        }
    }

    /// Builds a stop from a row, reporting values that cannot be represented.
    pub fn from_row(row: &TableRow, sink: &mut dyn ProblemSink) -> Result<Self, Aborted> {
        let stop_lat = parse_cell(row, "stop_lat", None, sink, |value| {
            parse_decimal(value).ok()
        })?;
        let stop_lon = parse_cell(row, "stop_lon", None, sink, |value| {
            parse_decimal(value).ok()
        })?;
        let location_type = parse_cell(row, "location_type", None, sink, parse_int)?
            .map(LocationType::from_i32)
            .unwrap_or_default();
        Ok(Self {
            stop_id: id(row, "stop_id"),
            stop_name: text(row, "stop_name"),
            stop_lat,
            stop_lon,
            stop_desc: optional_text(row, "stop_desc"),
            zone_id: optional_id(row, "zone_id"),
            stop_url: optional_text(row, "stop_url"),
            stop_code: optional_text(row, "stop_code"),
            location_type,
            parent_station: optional_id(row, "parent_station"),
            extra: row.extras(&Self::SCHEMA),
        })
    }

    pub fn is_station(&self) -> bool {
        self.location_type == LocationType::Station
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.stop_lat?, self.stop_lon?))
    }

    /// Great-circle distance in meters, `None` when either stop lacks a position.
    pub fn distance_to(&self, other: &Stop) -> Option<f64> {
        let (lat1, lon1) = self.coordinates()?;
        let (lat2, lon2) = other.coordinates()?;
        Some(transitfeed_model::approximate_distance(lat1, lon1, lat2, lon2))
    }
}

impl FeedRecord for Stop {
    const SCHEMA: TableSchema = TableSchema {
        file_name: "stops.txt",
        columns: &[
            "stop_id",
            "stop_name",
            "stop_lat",
            "stop_lon",
            "stop_desc",
            "zone_id",
            "stop_url",
            "stop_code",
            "location_type",
            "parent_station",
        ],
        required: &["stop_id", "stop_name", "stop_lat", "stop_lon"],
    };

    fn field_value(&self, column: &str) -> Option<String> {
        match column {
            "stop_id" => Some(self.stop_id.to_string()),
            "stop_name" => Some(self.stop_name.clone()),
            "stop_lat" => self.stop_lat.map(format_decimal),
            "stop_lon" => self.stop_lon.map(format_decimal),
            "stop_desc" => self.stop_desc.clone(),
            "zone_id" => self.zone_id.as_ref().map(FeedId::to_string),
            "stop_url" => self.stop_url.clone(),
            "stop_code" => self.stop_code.clone(),
            "location_type" => match self.location_type {
                LocationType::Stop => None,
                other => Some(other.as_i32().to_string()),
            },
            "parent_station" => self.parent_station.as_ref().map(FeedId::to_string),
            _ => None,
        }
    }

    fn extra(&self) -> &ExtraFields {
        &self.extra
    }

    fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
        require("stop_id", &self.stop_id, sink)?;
        require("stop_name", &self.stop_name, sink)?;
        match self.stop_lat {
            None => sink.report(Problem::missing_value("stop_lat", None))?,
            Some(lat) if !(-90.0..=90.0).contains(&lat) => {
                sink.report(Problem::invalid_value("stop_lat", lat, None))?
            }
            Some(_) => {}
        }
        match self.stop_lon {
            None => sink.report(Problem::missing_value("stop_lon", None))?,
            Some(lon) if !(-180.0..=180.0).contains(&lon) => {
                sink.report(Problem::invalid_value("stop_lon", lon, None))?
            }
            Some(_) => {}
        }
        if let Some(url) = &self.stop_url {
            if !is_valid_url(url) {
                sink.report(Problem::invalid_value("stop_url", url, None))?;
            }
        }
        if let LocationType::Unknown(value) = self.location_type {
            sink.report(Problem::invalid_value("location_type", value, None).warning())?;
        }

        if let (Some(lat), Some(lon)) = (self.stop_lat, self.stop_lon) {
            if lat.abs() < 1.0 && lon.abs() < 1.0 {
                sink.report(
                    Problem::invalid_value("stop_lat", lat, Some("Stop location too close to 0, 0"))
                        .warning(),
                )?;
            }
        }
        if let Some(desc) = &self.stop_desc {
            if !self.stop_name.is_empty()
                && desc.trim().to_lowercase() == self.stop_name.trim().to_lowercase()
            {
                sink.report(Problem::invalid_value(
                    "stop_desc",
                    desc,
                    Some("stop_desc should not be the same as stop_name"),
                ))?;
            }
        }
        if let Some(parent) = &self.parent_station {
            if self.is_station() {
                sink.report(Problem::invalid_value(
                    "parent_station",
                    parent,
                    Some(
                        "Stop row with location_type=1 (a station) must not have a \
                         parent_station",
                    ),
                ))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::testing::row;
    use crate::problems::{ProblemAccumulator, ProblemKind, Severity};

    fn validate(stop: &Stop) -> ProblemAccumulator {
        let mut sink = ProblemAccumulator::new();
        stop.validate(&mut sink).unwrap();
        sink
    }

    #[test]
    fn parses_stop_row() {
        let row = row(
            Stop::SCHEMA,
            "stop_id,stop_name,stop_lat,stop_lon,location_type,parent_station,platform\n\
             FUR_CREEK_RES,Furnace Creek Resort,36.425288,-117.133162,0,STATION,2\n",
        );
        let mut sink = ProblemAccumulator::new();
        let stop = Stop::from_row(&row, &mut sink).unwrap();
        assert!(sink.is_empty());
        assert_eq!(stop.stop_id, "FUR_CREEK_RES");
        assert_eq!(stop.coordinates(), Some((36.425288, -117.133162)));
        assert_eq!(stop.parent_station.as_deref(), Some("STATION"));
        assert_eq!(stop.cell("platform"), "2");
        assert_eq!(stop.cell("stop_lat"), "36.425288");
        assert!(validate(&stop).is_empty());
    }

    #[test]
    fn rejects_unparsable_coordinates() {
        let row = row(
            Stop::SCHEMA,
            "stop_id,stop_name,stop_lat,stop_lon\nS1,Demo,1e3,abc\n",
        );
        let mut sink = ProblemAccumulator::new();
        let stop = Stop::from_row(&row, &mut sink).unwrap();
        assert_eq!(sink.count_of(ProblemKind::InvalidValue), 2);
        assert_eq!(stop.stop_lat, None);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let stop = Stop::new("S1", "Demo", 91.0, -181.0);
        let sink = validate(&stop);
        let fields: Vec<_> = sink.iter().map(|problem| problem.field.clone().unwrap()).collect();
        assert_eq!(fields, vec!["stop_lat", "stop_lon"]);
    }

    #[test]
    fn warns_about_null_island() {
        let stop = Stop::new("S1", "Demo", 0.5, -0.3);
        let sink = validate(&stop);
        let problem = &sink.problems()[0];
        assert_eq!(problem.severity, Severity::Warning);
        assert!(problem.message.ends_with("Stop location too close to 0, 0"));
    }

    #[test]
    fn flags_description_equal_to_name() {
        let mut stop = Stop::new("S1", "Main Street", 36.0, -117.0);
        stop.stop_desc = Some(" main street".to_string());
        let sink = validate(&stop);
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.problems()[0].field.as_deref(), Some("stop_desc"));
    }

    #[test]
    fn station_must_not_have_parent() {
        let mut stop = Stop::new("S1", "Central", 36.0, -117.0);
        stop.location_type = LocationType::Station;
        stop.parent_station = Some(FeedId::from("OTHER"));
        let sink = validate(&stop);
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.problems()[0].field.as_deref(), Some("parent_station"));
    }

    #[test]
    fn unknown_location_type_is_a_warning() {
        let mut stop = Stop::new("S1", "Central", 36.0, -117.0);
        stop.location_type = LocationType::from_i32(2);
        let sink = validate(&stop);
        assert_eq!(sink.warning_count(), 1);
        assert_eq!(sink.error_count(), 0);
        assert_eq!(stop.cell("location_type"), "2");
    }
}
