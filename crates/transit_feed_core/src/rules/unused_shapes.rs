use std::collections::BTreeSet;

use crate::config::ValidationOptions;
use crate::problems::{Problem, ProblemSink, ScopedSink};
use crate::schedule::Schedule;
use crate::validator::{PassError, Validator};

#[derive(Debug, Default)]
pub struct UnusedShapesValidator;

impl Validator for UnusedShapesValidator {
    fn name(&self) -> &'static str {
        "unused_shapes"
    }

    fn validate(
        &self,
        schedule: &Schedule,
        _options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), PassError> {
        let used: BTreeSet<&str> = schedule
            .trips()
            .filter_map(|trip| trip.shape_id.as_deref())
            .collect();
        let unused: Vec<&str> = schedule
            .shapes()
            .map(|shape| shape.shape_id.as_str())
            .filter(|shape_id| !used.contains(shape_id))
            .collect();
        if !unused.is_empty() {
            let mut sink = ScopedSink::new(sink).in_file("shapes.txt");
            sink.report(
                Problem::other(format!(
                    "The shapes with the following shape_ids aren't used by any trips: {}",
                    unused.join(", ")
                ))
                .warning(),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Shape, ShapePoint, Trip};
    use crate::problems::ProblemAccumulator;
    use crate::rules::testing::base_schedule;

    #[test]
    fn lists_shapes_without_trips() {
        let mut schedule = base_schedule();
        let mut sink = ProblemAccumulator::new();
        for shape_id in ["s1", "s2", "s3"] {
            let mut shape = Shape::new(shape_id);
            shape.add_point(ShapePoint::new(36.42, -117.13, None), &mut sink).unwrap();
            shape.add_point(ShapePoint::new(36.43, -117.13, None), &mut sink).unwrap();
            schedule.add_shape(shape, &mut sink).unwrap();
        }
        let mut trip = Trip::new("T1", "R", "WEEK");
        trip.shape_id = Some("s2".into());
        schedule.add_trip(trip, &mut sink).unwrap();

        let mut problems = ProblemAccumulator::new();
        UnusedShapesValidator
            .validate(&schedule, &ValidationOptions::default(), &mut problems)
            .unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(
            problems.problems()[0].message,
            "The shapes with the following shape_ids aren't used by any trips: s1, s3"
        );
    }
}
