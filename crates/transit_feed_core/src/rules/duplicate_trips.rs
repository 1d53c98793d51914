use rustc_hash::FxHashMap;

use transitfeed_model::FeedId;

use crate::config::ValidationOptions;
use crate::problems::{Problem, ProblemSink};
use crate::schedule::Schedule;
use crate::validator::{PassError, Validator};

/// Trips with the same service, stops and first arrival. Only runs when
/// `check_duplicate_trips` is set.
#[derive(Debug, Default)]
pub struct DuplicateTripsValidator;

impl Validator for DuplicateTripsValidator {
    fn name(&self) -> &'static str {
        "duplicate_trips"
    }

    fn validate(
        &self,
        schedule: &Schedule,
        options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), PassError> {
        if !options.check_duplicate_trips {
            return Ok(());
        }
        let mut first_seen: FxHashMap<(FeedId, i32, Vec<FeedId>), (&str, &str)> =
            FxHashMap::default();
        for trip in schedule.trips() {
            if schedule.get_route(&trip.route_id).is_err() {
                continue;
            }
            let stop_times = schedule.trip_stop_times(&trip.trip_id)?;
            let Some(earliest) = stop_times
                .iter()
                .filter_map(|stop_time| stop_time.arrival_time)
                .map(|time| time.total_seconds())
                .min()
            else {
                continue;
            };
            let stops: Vec<FeedId> = stop_times.into_iter().map(|stop_time| stop_time.stop_id).collect();
            let key = (trip.service_id.clone(), earliest, stops);
            match first_seen.get(&key) {
                Some((trip_id, route_id)) => {
                    sink.report(Problem::duplicate_trip(trip_id, route_id, &trip.trip_id, &trip.route_id))?;
                }
                None => {
                    first_seen.insert(key, (trip.trip_id.as_str(), trip.route_id.as_str()));
                }
            }
        }
        Ok(())
    }
}
