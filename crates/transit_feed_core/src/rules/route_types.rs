use rustc_hash::FxHashMap;

use transitfeed_model::{FeedId, RouteType};

use crate::config::ValidationOptions;
use crate::problems::{Problem, ProblemSink};
use crate::schedule::Schedule;
use crate::validator::{PassError, Validator};

struct FirstUse<'a> {
    route_id: &'a str,
    route_type: RouteType,
    reported: bool,
}

/// Stops served by both subway and bus routes.
#[derive(Debug, Default)]
pub struct StopRouteTypesValidator;

impl Validator for StopRouteTypesValidator {
    fn name(&self) -> &'static str {
        "stop_route_types"
    }

    fn validate(
        &self,
        schedule: &Schedule,
        _options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), PassError> {
        let mut first_use: FxHashMap<FeedId, FirstUse<'_>> = FxHashMap::default();
        for trip in schedule.trips() {
            let Ok(route) = schedule.get_route(&trip.route_id) else {
                continue;
            };
            let Some(route_type @ (RouteType::Subway | RouteType::Bus)) = route.route_type else {
                continue;
            };
            for stop_time in schedule.trip_stop_times(&trip.trip_id)? {
                let seen = first_use.entry(stop_time.stop_id.clone()).or_insert(FirstUse {
                    route_id: &route.route_id,
                    route_type,
                    reported: false,
                });
                if seen.route_type == route_type || seen.reported {
                    continue;
                }
                seen.reported = true;
                let (subway_route, bus_route) = if seen.route_type == RouteType::Subway {
                    (seen.route_id, route.route_id.as_str())
                } else {
                    (route.route_id.as_str(), seen.route_id)
                };
                let stop_name = schedule
                    .get_stop(&stop_time.stop_id)
                    .map(|stop| stop.stop_name.as_str())
                    .unwrap_or_default();
                sink.report(Problem::stop_with_multiple_route_types(
                    stop_name,
                    &stop_time.stop_id,
                    subway_route,
                    bus_route,
                ))?;
            }
        }
        Ok(())
    }
}
