use serde::{Deserialize, Serialize};
use transitfeed_model::{parse_decimal, FeedId, GtfsTime, PickupDropOffType};

use super::{format_decimal, id, optional_text, parse_cell, parse_int, require, ExtraFields, FeedRecord};
use crate::csv_reader::{TableRow, TableSchema};
use crate::problems::{Aborted, Problem, ProblemSink};

const BOTH_TIMES_REASON: &str = "arrival_time and departure_time should either both be provided \
                                 or both be left blank.  It's OK to set them both to the same \
                                 value.";

/// One visit of a trip to a stop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopTime {
    pub trip_id: FeedId,
    pub stop_id: FeedId,
    pub stop_sequence: u32,
    pub arrival_time: Option<GtfsTime>,
    pub departure_time: Option<GtfsTime>,
    pub stop_headsign: Option<String>,
    #[serde(with = "pickup_drop_off")]
    pub pickup_type: Option<PickupDropOffType>,
    #[serde(with = "pickup_drop_off")]
    pub drop_off_type: Option<PickupDropOffType>,
    pub shape_dist_traveled: Option<f64>,
    pub extra: ExtraFields,
}

impl StopTime {
    pub fn new(trip_id: &str, stop_id: &str) -> Self {
        Self {
            trip_id: FeedId::from(trip_id),
            stop_id: FeedId::from(stop_id),
            ..Self::default()
        }
    }

    /// A visit whose single time serves as both arrival and departure.
    pub fn at(trip_id: &str, stop_id: &str, time: GtfsTime) -> Self {
        Self {
            arrival_time: Some(time),
            departure_time: Some(time),
            ..Self::new(trip_id, stop_id)
        }
    }

    pub fn with_times(mut self, arrival: Option<GtfsTime>, departure: Option<GtfsTime>) -> Self {
        self.arrival_time = arrival;
        self.departure_time = departure;
        self
    }

    pub fn from_row(row: &TableRow, sink: &mut dyn ProblemSink) -> Result<Self, Aborted> {
        let stop_sequence = match row.get("stop_sequence") {
            None => {
                sink.report(Problem::missing_value("stop_sequence", None))?;
                0
            }
            Some(value) => match value.parse::<i64>() {
                Err(_) => {
                    sink.report(Problem::invalid_value(
                        "stop_sequence",
                        value,
                        Some("This should be a number."),
                    ))?;
                    0
                }
                Ok(sequence) => match u32::try_from(sequence) {
                    Ok(sequence) => sequence,
                    Err(_) => {
                        sink.report(Problem::invalid_value(
                            "stop_sequence",
                            sequence,
                            Some("Sequence numbers should be 0 or higher."),
                        ))?;
                        0
                    }
                },
            },
        };
        let arrival_time = parse_cell(row, "arrival_time", None, sink, |value| {
            GtfsTime::parse(value).ok()
        })?;
        let departure_time = parse_cell(row, "departure_time", None, sink, |value| {
            GtfsTime::parse(value).ok()
        })?;
        let pickup_type = parse_cell(row, "pickup_type", None, sink, parse_pickup_drop_off)?;
        let drop_off_type = parse_cell(row, "drop_off_type", None, sink, parse_pickup_drop_off)?;
        let shape_dist_traveled = parse_cell(row, "shape_dist_traveled", None, sink, |value| {
            parse_decimal(value).ok().filter(|distance| *distance >= 0.0)
        })?;
        Ok(Self {
            trip_id: id(row, "trip_id"),
            stop_id: id(row, "stop_id"),
            stop_sequence,
            arrival_time,
            departure_time,
            stop_headsign: optional_text(row, "stop_headsign"),
            pickup_type,
            drop_off_type,
            shape_dist_traveled,
            extra: row.extras(&Self::SCHEMA),
        })
    }

    /// Arrival if set, else departure.
    pub fn time(&self) -> Option<GtfsTime> {
        self.arrival_time.or(self.departure_time)
    }

    pub fn time_secs(&self) -> Option<i32> {
        self.time().map(|time| time.total_seconds())
    }

    pub fn is_timepoint(&self) -> bool {
        self.time().is_some()
    }

    /// Copy shifted by `offset_secs`, used to materialize headway runs.
    pub fn shifted(&self, offset_secs: i32) -> Self {
        let shift = |time: GtfsTime| GtfsTime::from_seconds(time.total_seconds() + offset_secs);
        Self {
            arrival_time: self.arrival_time.map(shift),
            departure_time: self.departure_time.map(shift),
            ..self.clone()
        }
    }
}

fn parse_pickup_drop_off(value: &str) -> Option<PickupDropOffType> {
    parse_int(value).and_then(PickupDropOffType::from_i32)
}

impl FeedRecord for StopTime {
    const SCHEMA: TableSchema = TableSchema {
        file_name: "stop_times.txt",
        columns: &[
            "trip_id",
            "arrival_time",
            "departure_time",
            "stop_id",
            "stop_sequence",
            "stop_headsign",
            "pickup_type",
            "drop_off_type",
            "shape_dist_traveled",
        ],
        required: &[
            "trip_id",
            "arrival_time",
            "departure_time",
            "stop_id",
            "stop_sequence",
        ],
    };

    fn field_value(&self, column: &str) -> Option<String> {
        match column {
            "trip_id" => Some(self.trip_id.to_string()),
            "arrival_time" => self.arrival_time.map(|time| time.to_string()),
            "departure_time" => self.departure_time.map(|time| time.to_string()),
            "stop_id" => Some(self.stop_id.to_string()),
            "stop_sequence" => Some(self.stop_sequence.to_string()),
            "stop_headsign" => self.stop_headsign.clone(),
            "pickup_type" => self.pickup_type.map(|kind| kind.as_i32().to_string()),
            "drop_off_type" => self.drop_off_type.map(|kind| kind.as_i32().to_string()),
            "shape_dist_traveled" => self.shape_dist_traveled.map(format_decimal),
            _ => None,
        }
    }

    fn extra(&self) -> &ExtraFields {
        &self.extra
    }

    fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
        require("trip_id", &self.trip_id, sink)?;
        require("stop_id", &self.stop_id, sink)?;

        if self.pickup_type == Some(PickupDropOffType::NotAvailable)
            && self.drop_off_type == Some(PickupDropOffType::NotAvailable)
            && !self.is_timepoint()
        {
            sink.report(
                Problem::other(
                    "This stop time has a pickup_type and drop_off_type of 1, indicating that \
                     riders can't get on or off here.  Since it doesn't define a timepoint \
                     either, this entry serves no purpose and should be excluded from the trip.",
                )
                .warning(),
            )?;
        }

        match (self.arrival_time, self.departure_time) {
            (Some(arrival), Some(departure)) if departure < arrival => {
                sink.report(Problem::invalid_value(
                    "departure_time",
                    departure,
                    Some(&format!(
                        "The departure time at this stop ({departure}) is before the arrival \
                         time ({arrival}).  This is often caused by problems in the feed \
                         exporter's time conversion"
                    )),
                ))?;
            }
            (Some(_), None) => {
                sink.report(Problem::missing_value("departure_time", Some(BOTH_TIMES_REASON)))?;
            }
            (None, Some(_)) => {
                sink.report(Problem::missing_value("arrival_time", Some(BOTH_TIMES_REASON)))?;
            }
            _ => {}
        }
        Ok(())
    }
}

mod pickup_drop_off {
    use serde::{Deserialize, Deserializer, Serializer};
    use transitfeed_model::PickupDropOffType;

    pub fn serialize<S: Serializer>(
        value: &Option<PickupDropOffType>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(kind) => serializer.serialize_some(&kind.as_i32()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<PickupDropOffType>, D::Error> {
        Ok(Option::<i32>::deserialize(deserializer)?.and_then(PickupDropOffType::from_i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::testing::row;
    use crate::problems::{ProblemAccumulator, ProblemKind, Severity};

    const HEADER: &str = "trip_id,arrival_time,departure_time,stop_id,stop_sequence,pickup_type,\
                          drop_off_type,shape_dist_traveled\n";

    fn parse(line: &str) -> (StopTime, ProblemAccumulator) {
        let row = row(StopTime::SCHEMA, &format!("{HEADER}{line}\n"));
        let mut sink = ProblemAccumulator::new();
        let stop_time = StopTime::from_row(&row, &mut sink).unwrap();
        (stop_time, sink)
    }

    fn validate(stop_time: &StopTime) -> ProblemAccumulator {
        let mut sink = ProblemAccumulator::new();
        stop_time.validate(&mut sink).unwrap();
        sink
    }

    #[test]
    fn parses_stop_time_row() {
        let (stop_time, sink) = parse("STBA,6:00:00,6:00:00,STAGECOACH,1,0,,0.5");
        assert!(sink.is_empty());
        assert_eq!(stop_time.stop_sequence, 1);
        assert_eq!(stop_time.time_secs(), Some(21600));
        assert_eq!(stop_time.pickup_type, Some(PickupDropOffType::Regular));
        assert_eq!(stop_time.drop_off_type, None);
        assert_eq!(stop_time.cell("arrival_time"), "06:00:00");
        assert_eq!(stop_time.cell("shape_dist_traveled"), "0.5");
        assert!(validate(&stop_time).is_empty());
    }

    #[test]
    fn reports_unparsable_fields() {
        let (_, sink) = parse("STBA,6:00,25:61:00,STAGECOACH,x,4,a,-1");
        let fields: Vec<_> = sink.iter().map(|problem| problem.field.clone().unwrap()).collect();
        assert_eq!(
            fields,
            vec![
                "stop_sequence",
                "arrival_time",
                "departure_time",
                "pickup_type",
                "drop_off_type",
                "shape_dist_traveled",
            ]
        );
        assert!(sink.problems()[0].message.ends_with("This should be a number."));
    }

    #[test]
    fn rejects_negative_sequence() {
        let (_, sink) = parse("STBA,6:00:00,6:00:00,STAGECOACH,-2,,,");
        assert!(sink.problems()[0]
            .message
            .ends_with("Sequence numbers should be 0 or higher."));
    }

    #[test]
    fn departure_before_arrival() {
        let stop_time = StopTime::new("T", "S").with_times(
            Some(GtfsTime::from_seconds(3600)),
            Some(GtfsTime::from_seconds(3500)),
        );
        let sink = validate(&stop_time);
        assert_eq!(sink.count_of(ProblemKind::InvalidValue), 1);
        assert!(sink.problems()[0].message.contains("(00:58:20) is before the arrival time (01:00:00)"));
    }

    #[test]
    fn requires_both_times_or_none() {
        let only_arrival =
            StopTime::new("T", "S").with_times(Some(GtfsTime::from_seconds(60)), None);
        let sink = validate(&only_arrival);
        assert_eq!(sink.problems()[0].field.as_deref(), Some("departure_time"));

        let only_departure =
            StopTime::new("T", "S").with_times(None, Some(GtfsTime::from_seconds(60)));
        let sink = validate(&only_departure);
        assert_eq!(sink.problems()[0].field.as_deref(), Some("arrival_time"));
    }

    #[test]
    fn untimed_stop_without_boarding_is_pointless() {
        let mut stop_time = StopTime::new("T", "S");
        stop_time.pickup_type = Some(PickupDropOffType::NotAvailable);
        stop_time.drop_off_type = Some(PickupDropOffType::NotAvailable);
        let sink = validate(&stop_time);
        assert_eq!(sink.problems()[0].severity, Severity::Warning);
        assert_eq!(sink.problems()[0].kind, ProblemKind::OtherProblem);
    }

    #[test]
    fn shifts_times_for_headway_runs() {
        let stop_time = StopTime::at("T", "S", GtfsTime::from_seconds(100));
        let shifted = stop_time.shifted(50);
        assert_eq!(shifted.time_secs(), Some(150));
        assert_eq!(shifted.departure_time, Some(GtfsTime::from_seconds(150)));
    }
}
