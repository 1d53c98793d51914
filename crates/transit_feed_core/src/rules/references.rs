use crate::config::ValidationOptions;
use crate::problems::{Problem, ProblemSink, ScopedSink};
use crate::schedule::Schedule;
use crate::validator::{PassError, Validator};

/// Fare rule routes and zones, and transfer endpoints, must resolve.
#[derive(Debug, Default)]
pub struct ReferencesValidator;

impl Validator for ReferencesValidator {
    fn name(&self) -> &'static str {
        "references"
    }

    fn validate(
        &self,
        schedule: &Schedule,
        _options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), PassError> {
        {
            let mut sink = ScopedSink::new(sink).in_file("fare_rules.txt");
            for rule in schedule.fare_rules() {
                if let Some(route_id) = &rule.route_id {
                    if schedule.get_route(route_id).is_err() {
                        sink.report(Problem::invalid_value("route_id", route_id, None))?;
                    }
                }
                for (column, zone_id) in rule.zone_references() {
                    if !schedule.has_fare_zone(zone_id) {
                        sink.report(Problem::invalid_value(column, zone_id, None))?;
                    }
                }
            }
        }

        let mut sink = ScopedSink::new(sink).in_file("transfers.txt");
        for transfer in schedule.transfers() {
            for (column, stop_id) in [
                ("from_stop_id", &transfer.from_stop_id),
                ("to_stop_id", &transfer.to_stop_id),
            ] {
                if schedule.get_stop(stop_id).is_err() {
                    sink.report(Problem::invalid_value(column, stop_id, None))?;
                }
            }
        }
        Ok(())
    }
}
