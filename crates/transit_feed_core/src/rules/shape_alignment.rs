use transitfeed_model::approximate_distance;

use crate::config::ValidationOptions;
use crate::problems::{Problem, ProblemSink, ScopedSink};
use crate::schedule::Schedule;
use crate::validator::{PassError, Validator};

const MAX_STOP_TO_SHAPE_M: f64 = 1000.0;

/// Stop times of a shaped trip compared with the shape they claim to follow.
#[derive(Debug, Default)]
pub struct ShapeAlignmentValidator;

impl Validator for ShapeAlignmentValidator {
    fn name(&self) -> &'static str {
        "shape_alignment"
    }

    fn validate(
        &self,
        schedule: &Schedule,
        _options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), PassError> {
        let mut sink = ScopedSink::new(sink).in_file("stop_times.txt");
        for trip in schedule.trips() {
            let Some(shape_id) = &trip.shape_id else {
                continue;
            };
            let Ok(shape) = schedule.get_shape(shape_id) else {
                continue;
            };
            let stop_times = schedule.trip_stop_times(&trip.trip_id)?;
            let Some(last) = stop_times.last() else {
                continue;
            };
            let max_distance = shape.max_distance();
            if let Some(distance) = last.shape_dist_traveled.filter(|distance| *distance > max_distance) {
                sink.report(
                    Problem::other(format!(
                        "In stop_times.txt, the stop with trip_id={} and stop_sequence={} has \
                         shape_dist_traveled={distance:.6}, which is larger than the max \
                         shape_dist_traveled={max_distance:.6} of the corresponding shape \
                         (shape_id={shape_id})",
                        trip.trip_id, last.stop_sequence
                    ))
                    .warning(),
                )?;
            }

            if max_distance <= 0.0 {
                continue;
            }
            for stop_time in &stop_times {
                let Some(travelled) = stop_time.shape_dist_traveled else {
                    continue;
                };
                let Some(point) = shape.point_at_distance(travelled) else {
                    continue;
                };
                let Ok(stop) = schedule.get_stop(&stop_time.stop_id) else {
                    continue;
                };
                let Some((lat, lon)) = stop.coordinates() else {
                    continue;
                };
                let distance = approximate_distance(lat, lon, point.lat, point.lon);
                if distance > MAX_STOP_TO_SHAPE_M {
                    sink.report(Problem::stop_too_far_from_shape(
                        &trip.trip_id,
                        &stop.stop_name,
                        &stop.stop_id,
                        point.distance.unwrap_or(travelled),
                        shape_id,
                        distance,
                        MAX_STOP_TO_SHAPE_M,
                    ))?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Shape, ShapePoint, StopTime, Trip};
    use crate::problems::{ProblemAccumulator, ProblemKind};
    use crate::rules::testing::{add_stop, base_schedule, time};

    #[test]
    fn compares_stops_with_shape_positions() {
        let mut schedule = base_schedule();
        add_stop(&mut schedule, "A", 36.4250, -117.1330);
        add_stop(&mut schedule, "B", 36.4350, -117.1330);
        add_stop(&mut schedule, "OFF", 36.5350, -117.1330);

        let mut sink = ProblemAccumulator::new();
        let mut shape = Shape::new("S");
        shape.add_point(ShapePoint::new(36.4250, -117.1330, Some(0.0)), &mut sink).unwrap();
        shape.add_point(ShapePoint::new(36.4350, -117.1330, Some(1000.0)), &mut sink).unwrap();
        shape.add_point(ShapePoint::new(36.4450, -117.1330, Some(2000.0)), &mut sink).unwrap();
        schedule.add_shape(shape, &mut sink).unwrap();
        let mut trip = Trip::new("T1", "R", "WEEK");
        trip.shape_id = Some("S".into());
        schedule.add_trip(trip, &mut sink).unwrap();
        assert!(sink.is_empty(), "{:?}", sink.problems());

        let stop_times = [("A", 0.0), ("B", 1000.0), ("OFF", 2500.0)]
            .iter()
            .enumerate()
            .map(|(index, (stop_id, travelled))| {
                let mut stop_time = StopTime::at("T1", stop_id, time("08:00:00"));
                stop_time.stop_sequence = index as u32 + 1;
                stop_time.shape_dist_traveled = Some(*travelled);
                stop_time
            })
            .collect();
        schedule.insert_stop_times(stop_times).unwrap();

        let mut problems = ProblemAccumulator::new();
        ShapeAlignmentValidator
            .validate(&schedule, &ValidationOptions::default(), &mut problems)
            .unwrap();

        let beyond = problems.of_kind(ProblemKind::OtherProblem).next().unwrap();
        assert!(beyond.message.contains("shape_dist_traveled=2500.000000"), "{}", beyond.message);
        assert!(!beyond.is_error());

        let far: Vec<_> = problems
            .of_kind(ProblemKind::StopTooFarFromShapeWithDistTraveled)
            .map(|problem| problem.context_str("stop_id").unwrap())
            .collect();
        assert_eq!(far, vec!["OFF"]);
    }
}
