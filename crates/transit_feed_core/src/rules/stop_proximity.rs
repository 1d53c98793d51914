use transitfeed_model::{approximate_distance, LocationType};

use crate::config::ValidationOptions;
use crate::entity::Stop;
use crate::problems::{Problem, ProblemSink, ScopedSink};
use crate::schedule::Schedule;
use crate::validator::{PassError, Validator};

/// Degrees of latitude spanning about two meters.
const TWO_METERS_LAT: f64 = 0.000018;
const TOO_CLOSE_M: f64 = 2.0;

/// Stops and stations that probably describe the same place.
///
/// Stops are sorted by latitude and each one is only compared with the stops
/// that follow it inside a two meter latitude band.
#[derive(Debug, Default)]
pub struct StopProximityValidator;

impl Validator for StopProximityValidator {
    fn name(&self) -> &'static str {
        "stop_proximity"
    }

    fn validate(
        &self,
        schedule: &Schedule,
        _options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), PassError> {
        let mut sink = ScopedSink::new(sink).in_file("stops.txt");
        let mut located: Vec<(&Stop, f64, f64)> = schedule
            .stops()
            .filter_map(|stop| stop.coordinates().map(|(lat, lon)| (stop, lat, lon)))
            .collect();
        located.sort_by(|a, b| a.1.total_cmp(&b.1));

        for (index, &(stop, lat, lon)) in located.iter().enumerate() {
            for &(other, other_lat, other_lon) in located[index + 1..]
                .iter()
                .take_while(|(_, other_lat, _)| other_lat - lat < TWO_METERS_LAT)
            {
                let distance = approximate_distance(lat, lon, other_lat, other_lon);
                if distance >= TOO_CLOSE_M {
                    continue;
                }
                if let Some(problem) = classify(stop, other, distance) {
                    sink.report(problem)?;
                }
            }
        }
        Ok(())
    }
}

fn classify(a: &Stop, b: &Stop, distance: f64) -> Option<Problem> {
    match (a.location_type, b.location_type) {
        (LocationType::Stop, LocationType::Stop) => Some(Problem::stops_too_close(
            &a.stop_name,
            &a.stop_id,
            &b.stop_name,
            &b.stop_id,
            distance,
        )),
        (LocationType::Station, LocationType::Station) => Some(Problem::stations_too_close(
            &a.stop_name,
            &a.stop_id,
            &b.stop_name,
            &b.stop_id,
            distance,
        )),
        (LocationType::Stop, LocationType::Station) => station_mismatch(a, b, distance),
        (LocationType::Station, LocationType::Stop) => station_mismatch(b, a, distance),
        _ => None,
    }
}

fn station_mismatch(stop: &Stop, station: &Stop, distance: f64) -> Option<Problem> {
    if stop.parent_station.as_ref() == Some(&station.stop_id) {
        return None;
    }
    Some(Problem::different_station_too_close(
        &stop.stop_name,
        &stop.stop_id,
        &station.stop_name,
        &station.stop_id,
        distance,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problems::{ProblemAccumulator, ProblemKind};

    fn schedule_with(stops: Vec<Stop>) -> Schedule {
        let mut schedule = Schedule::new();
        let mut sink = ProblemAccumulator::new();
        for stop in stops {
            assert!(schedule.add_stop(stop, &mut sink).unwrap());
        }
        schedule
    }

    fn run(schedule: &Schedule) -> ProblemAccumulator {
        let mut sink = ProblemAccumulator::new();
        StopProximityValidator
            .validate(schedule, &ValidationOptions::default(), &mut sink)
            .unwrap();
        sink
    }

    fn station(id: &str, lat: f64, lon: f64) -> Stop {
        let mut station = Stop::new(id, id, lat, lon);
        station.location_type = LocationType::Station;
        station
    }

    #[test]
    fn reports_stops_at_same_location() {
        let schedule = schedule_with(vec![
            Stop::new("a", "Stop A", 48.0, -122.0),
            Stop::new("b", "Stop B", 48.0, -122.0),
        ]);
        let sink = run(&schedule);
        assert_eq!(sink.len(), 1);
        let problem = &sink.problems()[0];
        assert_eq!(problem.kind, ProblemKind::StopsTooClose);
        assert!(!problem.is_error());
        assert!(problem.message.contains("0.00m apart"), "{}", problem.message);
    }

    #[test]
    fn two_meters_is_the_threshold() {
        let close = schedule_with(vec![
            Stop::new("a", "Stop A", 48.0, -122.0),
            Stop::new("b", "Stop B", 48.00001, -122.0),
        ]);
        let sink = run(&close);
        assert_eq!(sink.count_of(ProblemKind::StopsTooClose), 1);
        let distance = sink.problems()[0].context_f64("distance").unwrap();
        assert!((distance - 1.11).abs() < 0.01, "{distance}");

        let apart = schedule_with(vec![
            Stop::new("a", "Stop A", 48.0, -122.0),
            Stop::new("b", "Stop B", 48.00002, -122.0),
        ]);
        assert!(run(&apart).is_empty());
    }

    #[test]
    fn classifies_station_pairs() {
        let mut child = Stop::new("child", "Child", 48.0, -122.0);
        child.parent_station = Some("s1".into());
        let stray = Stop::new("stray", "Stray", 48.00001, -122.0);
        let schedule = schedule_with(vec![
            station("s1", 48.0, -122.0),
            station("s2", 48.000005, -122.0),
            child,
            stray,
        ]);
        let sink = run(&schedule);
        assert_eq!(sink.count_of(ProblemKind::StationsTooClose), 1);
        let mismatched: Vec<_> = sink
            .of_kind(ProblemKind::DifferentStationTooClose)
            .map(|problem| {
                (
                    problem.context_str("stop_id").unwrap(),
                    problem.context_str("station_stop_id").unwrap(),
                )
            })
            .collect();
        assert!(mismatched.contains(&("child", "s2")));
        assert!(mismatched.contains(&("stray", "s1")));
        assert!(mismatched.contains(&("stray", "s2")));
        assert!(!mismatched.contains(&("child", "s1")));
    }
}
