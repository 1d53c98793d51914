use std::collections::BTreeMap;

use transitfeed_model::RouteType;

use crate::config::ValidationOptions;
use crate::entity::{Stop, StopTime, Trip};
use crate::problems::{Problem, ProblemSink, ScopedSink, Severity};
use crate::schedule::Schedule;
use crate::validator::{PassError, PassStage, Validator};

/// Each trip checked against its own stop times and headways.
#[derive(Debug, Default)]
pub struct TripStructureValidator;

impl Validator for TripStructureValidator {
    fn name(&self) -> &'static str {
        "trip_structure"
    }

    fn stage(&self) -> PassStage {
        PassStage::Structural
    }

    fn validate(
        &self,
        schedule: &Schedule,
        _options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), PassError> {
        for trip in schedule.trips() {
            let stop_times = schedule.trip_stop_times(&trip.trip_id)?;
            match stop_times.len() {
                0 => {
                    let mut sink = ScopedSink::new(sink).in_file("trips.txt");
                    sink.report(
                        Problem::other(format!(
                            "The trip with the trip_id \"{}\" doesn't have any stop times defined.",
                            trip.trip_id
                        ))
                        .warning(),
                    )?;
                    if !trip.headways().is_empty() {
                        sink.report(Problem::other(format!(
                            "Frequencies defined, but no stop times given in trip {}",
                            trip.trip_id
                        )))?;
                    }
                }
                1 => {
                    let mut sink = ScopedSink::new(sink).in_file("trips.txt");
                    sink.report(
                        Problem::other(format!(
                            "The trip with the trip_id \"{}\" only has one stop on it; it should \
                             have at least one more stop so that the riders can leave!",
                            trip.trip_id
                        ))
                        .warning(),
                    )?;
                }
                _ => {
                    let mut sink = ScopedSink::new(sink).in_file("stop_times.txt");
                    schedule.trip_start_time(&trip.trip_id, &mut sink)?;
                    schedule.trip_end_time(&trip.trip_id, &mut sink)?;
                }
            }

            let mut sink = ScopedSink::new(sink).in_file("stop_times.txt");
            check_sequences(trip, &stop_times, &mut sink)?;
            check_distances(trip, &stop_times, &mut sink)?;
            let max_speed = schedule
                .get_route(&trip.route_id)
                .map(|route| route.max_speed_kph())
                .unwrap_or_else(|_| RouteType::Tram.max_speed_kph());
            check_times(schedule, trip, &stop_times, max_speed, &mut sink)?;

            let mut sink = ScopedSink::new(&mut sink).in_file("frequencies.txt");
            check_headways(trip, &mut sink)?;
        }
        Ok(())
    }
}

fn check_sequences(trip: &Trip, stop_times: &[StopTime], sink: &mut dyn ProblemSink) -> Result<(), PassError> {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for stop_time in stop_times {
        *counts.entry(stop_time.stop_sequence).or_default() += 1;
    }
    for (sequence, count) in counts {
        if count > 1 {
            sink.report(Problem::invalid_value(
                "stop_sequence",
                sequence,
                Some(&format!("Duplicate stop_sequence in trip_id {}", trip.trip_id)),
            ))?;
        }
    }
    Ok(())
}

/// shape_dist_traveled must grow along the trip; repeating the previous
/// value is only a warning.
fn check_distances(trip: &Trip, stop_times: &[StopTime], sink: &mut dyn ProblemSink) -> Result<(), PassError> {
    let mut previous: Option<f64> = None;
    for stop_time in stop_times {
        let Some(distance) = stop_time.shape_dist_traveled else {
            continue;
        };
        let increasing = match previous {
            Some(previous) => distance > previous,
            None => distance >= 0.0,
        };
        if increasing {
            previous = Some(distance);
            continue;
        }
        let severity = if previous == Some(distance) {
            Severity::Warning
        } else {
            Severity::Error
        };
        let previous_text = previous.map_or_else(|| "none".to_string(), |value| value.to_string());
        sink.report(
            Problem::invalid_value(
                "stoptimes.shape_dist_traveled",
                distance,
                Some(&format!(
                    "For the trip {} the stop {} has shape_dist_traveled={distance}, which should \
                     be larger than the previous ones. In this case, the previous distance was \
                     {previous_text}.",
                    trip.trip_id, stop_time.stop_id
                )),
            )
            .with_severity(severity),
        )?;
    }
    Ok(())
}

/// Arrivals must not precede the previous departure, and the implied speed
/// between timed stops must be plausible for the route type.
fn check_times(
    schedule: &Schedule,
    trip: &Trip,
    stop_times: &[StopTime],
    max_speed_kph: f64,
    sink: &mut dyn ProblemSink,
) -> Result<(), PassError> {
    let mut previous_departure = 0;
    let mut previous_stop: Option<&Stop> = None;
    for stop_time in stop_times {
        let Some(arrival) = stop_time.arrival_time.map(|time| time.total_seconds()) else {
            continue;
        };
        let stop = schedule.get_stop(&stop_time.stop_id).ok();
        if let (Some(previous), Some(stop)) = (previous_stop, stop) {
            check_speed(trip, previous, stop, previous_departure, arrival, max_speed_kph, sink)?;
        }
        if arrival >= previous_departure {
            previous_departure = stop_time
                .departure_time
                .map_or(arrival, |time| time.total_seconds());
            previous_stop = stop;
        } else {
            sink.report(Problem::other(format!(
                "Timetravel detected! Arrival time is before previous departure at sequence \
                 number {} in trip {}",
                stop_time.stop_sequence, trip.trip_id
            )))?;
        }
    }
    Ok(())
}

/// Times rounded to the same minute are common in exported feeds, so zero
/// elapsed seconds is only reported when the departure is not on a minute
/// boundary or the hop could not be covered in a minute.
fn check_speed(
    trip: &Trip,
    previous: &Stop,
    next: &Stop,
    departure: i32,
    arrival: i32,
    max_speed_kph: f64,
    sink: &mut dyn ProblemSink,
) -> Result<(), PassError> {
    let Some(distance) = previous.distance_to(next) else {
        return Ok(());
    };
    let elapsed = arrival - departure;
    if elapsed == 0 {
        if departure % 60 != 0 || distance / 1000.0 * 60.0 > max_speed_kph {
            sink.report(
                Problem::too_fast_travel(&trip.trip_id, &previous.stop_name, &next.stop_name, distance, 0, None)
                    .warning(),
            )?;
        }
        return Ok(());
    }
    let speed_kph = (distance / 1000.0) / (f64::from(elapsed) / 3600.0);
    if speed_kph > max_speed_kph {
        sink.report(
            Problem::too_fast_travel(
                &trip.trip_id,
                &previous.stop_name,
                &next.stop_name,
                distance,
                elapsed,
                Some(speed_kph),
            )
            .warning(),
        )?;
    }
    Ok(())
}

fn check_headways(trip: &Trip, sink: &mut dyn ProblemSink) -> Result<(), PassError> {
    let headways = trip.headways();
    for (index, headway) in headways.iter().enumerate() {
        for other in &headways[index + 1..] {
            if headway.overlaps(other) {
                sink.report(Problem::other(format!(
                    "Trip contains overlapping headway periods {headway} and {other}"
                )))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Headway;
    use crate::problems::{ProblemAccumulator, ProblemKind};
    use crate::rules::testing::{add_stop, add_trip, base_schedule, time};

    fn run(schedule: &Schedule) -> ProblemAccumulator {
        let mut sink = ProblemAccumulator::new();
        TripStructureValidator
            .validate(schedule, &ValidationOptions::default(), &mut sink)
            .unwrap();
        sink
    }

    fn descriptions(sink: &ProblemAccumulator) -> Vec<String> {
        sink.of_kind(ProblemKind::OtherProblem)
            .map(|problem| problem.message.clone())
            .collect()
    }

    fn schedule_with_stops() -> Schedule {
        let mut schedule = base_schedule();
        add_stop(&mut schedule, "A", 36.4250, -117.1330);
        add_stop(&mut schedule, "B", 36.4350, -117.1330);
        add_stop(&mut schedule, "C", 36.4450, -117.1330);
        schedule
    }

    #[test]
    fn counts_stop_times_per_trip() {
        let mut schedule = schedule_with_stops();
        let mut sink = ProblemAccumulator::new();
        schedule
            .add_trip(Trip::new("EMPTY", "R", "WEEK"), &mut sink)
            .unwrap();
        schedule
            .add_headway("EMPTY", Headway::new(21600, 36000, 600), &mut sink)
            .unwrap();
        add_trip(&mut schedule, "SHORT", "R", &[("A", "08:00:00")]);

        let problems = run(&schedule);
        let messages = descriptions(&problems);
        assert_eq!(
            messages,
            vec![
                "The trip with the trip_id \"EMPTY\" doesn't have any stop times defined.",
                "Frequencies defined, but no stop times given in trip EMPTY",
                "The trip with the trip_id \"SHORT\" only has one stop on it; it should have at \
                 least one more stop so that the riders can leave!",
            ]
        );
        let severities: Vec<_> = problems.iter().map(|problem| problem.is_error()).collect();
        assert_eq!(severities, vec![false, true, false]);
    }

    #[test]
    fn needs_times_at_both_ends() {
        let mut schedule = schedule_with_stops();
        add_trip(&mut schedule, "T1", "R", &[("A", ""), ("B", "08:10:00"), ("C", "")]);
        let problems = run(&schedule);
        let fields: Vec<_> = problems
            .of_kind(ProblemKind::InvalidValue)
            .map(|problem| problem.field.clone().unwrap())
            .collect();
        assert_eq!(fields, vec!["departure_time", "arrival_time"]);
    }

    #[test]
    fn flags_duplicate_sequences_and_shrinking_distances() {
        let mut schedule = schedule_with_stops();
        let mut sink = ProblemAccumulator::new();
        schedule.add_trip(Trip::new("T1", "R", "WEEK"), &mut sink).unwrap();
        let rows = [("A", 1, 0.0), ("B", 2, 5.0), ("C", 2, 5.0), ("A", 3, 4.0)];
        let stop_times = rows
            .iter()
            .enumerate()
            .map(|(index, (stop_id, sequence, distance))| {
                let at = time("08:00:00").total_seconds() + index as i32 * 600;
                let mut stop_time = StopTime::at("T1", stop_id, transitfeed_model::GtfsTime::from_seconds(at));
                stop_time.stop_sequence = *sequence;
                stop_time.shape_dist_traveled = Some(*distance);
                stop_time
            })
            .collect();
        schedule.insert_stop_times(stop_times).unwrap();

        let problems = run(&schedule);
        let invalid: Vec<_> = problems
            .of_kind(ProblemKind::InvalidValue)
            .map(|problem| (problem.field.clone().unwrap(), problem.is_error()))
            .collect();
        assert_eq!(
            invalid,
            vec![
                ("stop_sequence".to_string(), true),
                ("stoptimes.shape_dist_traveled".to_string(), false),
                ("stoptimes.shape_dist_traveled".to_string(), true),
            ]
        );
    }

    #[test]
    fn detects_timetravel_and_fast_hops() {
        let mut schedule = schedule_with_stops();
        add_stop(&mut schedule, "FAR", 37.4450, -117.1330);
        add_trip(
            &mut schedule,
            "T1",
            "R",
            &[("A", "08:00:00"), ("B", "07:50:00"), ("C", "08:10:00"), ("FAR", "08:20:00")],
        );
        let problems = run(&schedule);
        let messages = descriptions(&problems);
        assert_eq!(
            messages,
            vec!["Timetravel detected! Arrival time is before previous departure at sequence number 2 in trip T1"]
        );
        let fast: Vec<_> = problems.of_kind(ProblemKind::TooFastTravel).collect();
        assert_eq!(fast.len(), 1);
        assert_eq!(fast[0].context_str("next_stop"), Some("Stop FAR"));
        assert!(!fast[0].is_error());
        assert!(fast[0].context_f64("speed").unwrap() > 100.0);
    }

    #[test]
    fn forgives_same_minute_times_between_nearby_stops() {
        let mut schedule = schedule_with_stops();
        add_trip(
            &mut schedule,
            "ROUNDED",
            "R",
            &[("A", "08:00:00"), ("B", "08:00:00"), ("C", "08:05:30"), ("A", "08:05:30")],
        );
        let problems = run(&schedule);
        let fast: Vec<_> = problems
            .of_kind(ProblemKind::TooFastTravel)
            .map(|problem| problem.context_str("prev_stop").unwrap())
            .collect();
        assert_eq!(fast, vec!["Stop C"]);
    }
}
