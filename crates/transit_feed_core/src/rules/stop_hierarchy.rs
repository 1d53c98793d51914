use std::collections::BTreeSet;

use transitfeed_model::LocationType;

use crate::config::ValidationOptions;
use crate::problems::{Problem, ProblemSink, ScopedSink, Severity};
use crate::schedule::Schedule;
use crate::validator::{PassError, Validator};

const PARENT_DISTANCE_WARNING_M: f64 = 100.0;
const PARENT_DISTANCE_ERROR_M: f64 = 1000.0;

/// Stop usage by trips and parent_station references.
#[derive(Debug, Default)]
pub struct StopHierarchyValidator;

impl Validator for StopHierarchyValidator {
    fn name(&self) -> &'static str {
        "stop_hierarchy"
    }

    fn validate(
        &self,
        schedule: &Schedule,
        options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), PassError> {
        let mut sink = ScopedSink::new(sink).in_file("stops.txt");
        let mut parents_in_use = BTreeSet::new();

        for stop in schedule.stops() {
            let visited = !schedule.stop_time_store().stop_visits(&stop.stop_id)?.is_empty();
            match stop.location_type {
                LocationType::Stop if !visited => {
                    sink.report(Problem::unused_stop(&stop.stop_id, &stop.stop_name))?;
                }
                LocationType::Station if visited => {
                    sink.report(Problem::used_station(&stop.stop_id, &stop.stop_name))?;
                }
                _ => {}
            }

            if stop.is_station() {
                continue;
            }
            let Some(parent_id) = &stop.parent_station else {
                continue;
            };
            parents_in_use.insert(parent_id.clone());
            let Ok(parent) = schedule.get_stop(parent_id) else {
                sink.report(Problem::invalid_value(
                    "parent_station",
                    parent_id,
                    Some(&format!(
                        "parent_station '{parent_id}' not found for stop_id '{}' in stops.txt",
                        stop.stop_id
                    )),
                ))?;
                continue;
            };
            if !parent.is_station() {
                sink.report(Problem::invalid_value(
                    "parent_station",
                    parent_id,
                    Some(&format!(
                        "parent_station '{parent_id}' of stop_id '{}' must have location_type=1 \
                         in stops.txt",
                        stop.stop_id
                    )),
                ))?;
                continue;
            }
            if let Some(grandparent) = &parent.parent_station {
                sink.report(Problem::invalid_value(
                    "parent_station",
                    parent_id,
                    Some(&format!(
                        "parent_station '{parent_id}' of stop_id '{}' is itself a child of \
                         '{grandparent}'; stations may not have a parent_station",
                        stop.stop_id
                    )),
                ))?;
                continue;
            }
            let Some(distance) = stop.distance_to(parent) else {
                continue;
            };
            let severity = if distance > PARENT_DISTANCE_ERROR_M {
                Severity::Error
            } else if distance > PARENT_DISTANCE_WARNING_M {
                Severity::Warning
            } else {
                continue;
            };
            sink.report(Problem::stop_too_far_from_parent_station(
                &stop.stop_id,
                &stop.stop_name,
                &parent.stop_id,
                &parent.stop_name,
                distance,
                severity,
            ))?;
        }

        if options.require_station_usage {
            for station in schedule.stops().filter(|stop| stop.is_station()) {
                if !parents_in_use.contains(&station.stop_id) {
                    sink.report(
                        Problem::other(format!(
                            "Station {} (ID {}) isn't the parent_station of any stop",
                            station.stop_name, station.stop_id
                        ))
                        .warning()
                        .with_context_field("stop_id", station.stop_id.as_str()),
                    )?;
                }
            }
        }
        Ok(())
    }
}
