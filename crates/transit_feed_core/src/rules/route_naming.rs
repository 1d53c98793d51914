use rustc_hash::FxHashMap;

use crate::config::ValidationOptions;
use crate::problems::{Problem, ProblemSink, ScopedSink};
use crate::schedule::Schedule;
use crate::validator::{PassError, Validator};

/// Route names shared between routes, and agency references that only
/// became checkable once every table was loaded.
#[derive(Debug, Default)]
pub struct RouteNamingValidator;

impl Validator for RouteNamingValidator {
    fn name(&self) -> &'static str {
        "route_naming"
    }

    fn validate(
        &self,
        schedule: &Schedule,
        _options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), PassError> {
        let mut sink = ScopedSink::new(sink).in_file("routes.txt");
        let mut names: FxHashMap<(String, String), &str> = FxHashMap::default();
        for route in schedule.routes() {
            let short_name = route.route_short_name.trim().to_lowercase();
            let long_name = route.route_long_name.trim().to_lowercase();
            let key = (short_name, long_name);
            if let Some(first) = names.get(&key) {
                sink.report(
                    Problem::invalid_value(
                        "route_long_name",
                        &key.1,
                        Some(&format!(
                            "The same combination of route_short_name and route_long_name \
                             shouldn't be used for more than one route, as it is for the two \
                             routes with IDs \"{}\" and \"{first}\".",
                            route.route_id
                        )),
                    )
                    .warning(),
                )?;
            } else {
                names.insert(key, route.route_id.as_str());
            }
        }

        for route in schedule.routes() {
            let Some(agency_id) = &route.agency_id else {
                continue;
            };
            if schedule.get_agency(agency_id).is_err() {
                sink.report(Problem::invalid_value(
                    "agency_id",
                    agency_id,
                    Some(&format!(
                        "The route with ID \"{}\" specifies agency_id \"{agency_id}\", which \
                         doesn't exist.",
                        route.route_id
                    )),
                ))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Agency, Route};
    use crate::problems::{ProblemAccumulator, ProblemKind};
    use transitfeed_model::RouteType;

    fn run(schedule: &Schedule) -> ProblemAccumulator {
        let mut sink = ProblemAccumulator::new();
        RouteNamingValidator
            .validate(schedule, &ValidationOptions::default(), &mut sink)
            .unwrap();
        sink
    }

    #[test]
    fn warns_about_shared_route_names() {
        let mut schedule = Schedule::new();
        let mut sink = ProblemAccumulator::new();
        schedule
            .add_agency(Agency::new("Demo", "http://example.com", "America/Los_Angeles"), &mut sink)
            .unwrap();
        for (id, short) in [("r1", "10"), ("r2", "10 "), ("r3", "11")] {
            schedule
                .add_route(Route::new(id, short, "Airport - Bullfrog", RouteType::Bus), &mut sink)
                .unwrap();
        }
        let problems = run(&schedule);
        assert_eq!(problems.len(), 1);
        let problem = &problems.problems()[0];
        assert!(!problem.is_error());
        assert_eq!(problem.field.as_deref(), Some("route_long_name"));
        assert!(problem.message.contains("IDs \"r2\" and \"r1\""), "{}", problem.message);
    }

    #[test]
    fn rechecks_agency_references() {
        // With no agencies loaded the route is accepted and checked later.
        let mut schedule = Schedule::new();
        let mut sink = ProblemAccumulator::new();
        let mut route = Route::new("r1", "10", "Airport", RouteType::Bus);
        route.agency_id = Some("ghost".into());
        assert!(schedule.add_route(route, &mut sink).unwrap());

        let problems = run(&schedule);
        let problem = problems.of_kind(ProblemKind::InvalidValue).next().unwrap();
        assert_eq!(problem.field.as_deref(), Some("agency_id"));
        assert_eq!(
            problem.context_str("reason"),
            Some("The route with ID \"r1\" specifies agency_id \"ghost\", which doesn't exist.")
        );
    }
}
