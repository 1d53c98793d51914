//! The validation passes run over a loaded schedule.

mod duplicate_trips;
mod references;
mod route_naming;
mod route_types;
mod service_dates;
mod shape_alignment;
mod stop_hierarchy;
mod stop_proximity;
mod trip_structure;
mod unused_shapes;

pub use duplicate_trips::DuplicateTripsValidator;
pub use references::ReferencesValidator;
pub use route_naming::RouteNamingValidator;
pub use route_types::StopRouteTypesValidator;
pub use service_dates::ServiceDatesValidator;
pub use shape_alignment::ShapeAlignmentValidator;
pub use stop_hierarchy::StopHierarchyValidator;
pub use stop_proximity::StopProximityValidator;
pub use trip_structure::TripStructureValidator;
pub use unused_shapes::UnusedShapesValidator;

use crate::validator::ValidatorRunner;

/// A runner with every pass registered.
pub fn default_runner() -> ValidatorRunner {
    let mut runner = ValidatorRunner::new();
    runner.register(TripStructureValidator);
    runner.register(ServiceDatesValidator);
    runner.register(StopHierarchyValidator);
    runner.register(StopProximityValidator);
    runner.register(RouteNamingValidator);
    runner.register(StopRouteTypesValidator);
    runner.register(DuplicateTripsValidator);
    runner.register(ShapeAlignmentValidator);
    runner.register(ReferencesValidator);
    runner.register(UnusedShapesValidator);
    runner
}
