//! The schedule container: every entity of a feed keyed by id, the stop-time
//! store, and the queries built on top of them.
//!
//! Each `add_*` operation rejects duplicate keys, resolves the references
//! that can be resolved at insertion time, runs the record's own checks and
//! registers the record only when none of that produced an error.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;
use transitfeed_model::{approximate_distance, FeedId, GtfsDate, GtfsTime, RouteType};

use crate::config::StopTimeStorage;
use crate::entity::{
    Agency, Fare, FareRule, FeedRecord, Headway, Route, ServicePeriod, Shape, ShapePoint, Stop,
    StopTime, Transfer, Trip,
};
use crate::problems::{Aborted, Problem, ProblemSink, ScopedSink};
use crate::stop_time_store::{StopTimeStore, StoreError};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("no {kind} with id \"{id}\"")]
    NotFound { kind: &'static str, id: String },
    #[error("trip {trip_id} must have a time at its first and last stop")]
    MissingTimes { trip_id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Aborted(#[from] Aborted),
}

/// How far validation has progressed over the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationState {
    #[default]
    Unvalidated,
    StructurallyChecked,
    Validated,
}

/// A stop of a trip with its scheduled or estimated time.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedStop {
    pub secs: i32,
    pub stop_time: StopTime,
    /// `false` when `secs` was estimated from the surrounding timepoints.
    pub is_timepoint: bool,
}

/// Trips and departures scheduled on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyService {
    pub date: GtfsDate,
    pub trips: usize,
    pub departures: usize,
}

#[derive(Debug, Default)]
pub struct Schedule {
    agencies: BTreeMap<FeedId, Agency>,
    stops: BTreeMap<FeedId, Stop>,
    routes: BTreeMap<FeedId, Route>,
    trips: BTreeMap<FeedId, Trip>,
    service_periods: BTreeMap<FeedId, ServicePeriod>,
    shapes: BTreeMap<FeedId, Shape>,
    fares: BTreeMap<FeedId, Fare>,
    transfers: Vec<Transfer>,
    route_trips: FxHashMap<FeedId, Vec<FeedId>>,
    fare_zones: BTreeSet<FeedId>,
    stop_times: StopTimeStore,
    default_agency: Option<FeedId>,
    default_service_period: Option<FeedId>,
    table_columns: BTreeMap<String, Vec<String>>,
    state: ValidationState,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage(storage: &StopTimeStorage) -> Result<Self, StoreError> {
        let stop_times = match storage {
            StopTimeStorage::Memory => StopTimeStore::in_memory(),
            StopTimeStorage::Spill { dir } => StopTimeStore::spill_to(dir)?,
        };
        Ok(Self {
            stop_times,
            ..Self::default()
        })
    }

    pub fn validation_state(&self) -> ValidationState {
        self.state
    }

    pub(crate) fn set_validation_state(&mut self, state: ValidationState) {
        self.state = state;
    }

    pub fn add_agency(&mut self, agency: Agency, sink: &mut dyn ProblemSink) -> Result<bool, Aborted> {
        let key = agency.key();
        if self.agencies.contains_key(&key) {
            if key.is_empty() {
                sink.report(Problem::missing_value(
                    "agency_id",
                    Some("agency_id is required when the feed has more than one agency"),
                ))?;
            } else {
                sink.report(Problem::duplicate_id(&["agency_id"], &[key.as_str()]))?;
            }
            return Ok(false);
        }
        let mut scope = ScopedSink::new(sink);
        agency.validate(&mut scope)?;
        if scope.has_errors() {
            return Ok(false);
        }
        self.agencies.insert(key, agency);
        Ok(true)
    }

    pub fn add_stop(&mut self, stop: Stop, sink: &mut dyn ProblemSink) -> Result<bool, Aborted> {
        if self.stops.contains_key(&stop.stop_id) {
            sink.report(Problem::duplicate_id(&["stop_id"], &[stop.stop_id.as_str()]))?;
            return Ok(false);
        }
        let mut scope = ScopedSink::new(sink);
        stop.validate(&mut scope)?;
        if scope.has_errors() {
            return Ok(false);
        }
        if let Some(zone) = &stop.zone_id {
            self.fare_zones.insert(zone.clone());
        }
        self.stops.insert(stop.stop_id.clone(), stop);
        Ok(true)
    }

    /// With no agencies loaded yet the agency reference is left for the
    /// validation pass; with one agency a blank reference means that agency;
    /// with several the reference must be explicit.
    pub fn add_route(&mut self, route: Route, sink: &mut dyn ProblemSink) -> Result<bool, Aborted> {
        if self.routes.contains_key(&route.route_id) {
            sink.report(Problem::duplicate_id(&["route_id"], &[route.route_id.as_str()]))?;
            return Ok(false);
        }
        let mut scope = ScopedSink::new(sink);
        match &route.agency_id {
            Some(agency_id) => {
                if !self.agencies.is_empty() && !self.agencies.contains_key(agency_id) {
                    scope.report(Problem::invalid_value(
                        "agency_id",
                        agency_id,
                        Some("Route uses an unknown agency_id."),
                    ))?;
                }
            }
            None => {
                if self.agencies.len() > 1 {
                    scope.report(Problem::missing_value(
                        "agency_id",
                        Some("agency_id is required when the feed has more than one agency"),
                    ))?;
                }
            }
        }
        route.validate(&mut scope)?;
        if scope.has_errors() {
            return Ok(false);
        }
        self.routes.insert(route.route_id.clone(), route);
        Ok(true)
    }

    pub fn add_service_period(
        &mut self,
        period: ServicePeriod,
        sink: &mut dyn ProblemSink,
    ) -> Result<bool, Aborted> {
        if self.service_periods.contains_key(&period.service_id) {
            sink.report(Problem::duplicate_id(&["service_id"], &[period.service_id.as_str()]))?;
            return Ok(false);
        }
        let mut scope = ScopedSink::new(sink);
        period.validate(&mut scope)?;
        if scope.has_errors() {
            return Ok(false);
        }
        self.service_periods.insert(period.service_id.clone(), period);
        Ok(true)
    }

    pub fn add_shape(&mut self, shape: Shape, sink: &mut dyn ProblemSink) -> Result<bool, Aborted> {
        if self.shapes.contains_key(&shape.shape_id) {
            sink.report(Problem::duplicate_id(&["shape_id"], &[shape.shape_id.as_str()]))?;
            return Ok(false);
        }
        let mut scope = ScopedSink::new(sink);
        shape.validate(&mut scope)?;
        if scope.has_errors() {
            return Ok(false);
        }
        self.shapes.insert(shape.shape_id.clone(), shape);
        Ok(true)
    }

    /// Registers a trip and links it into its route's trip list.
    pub fn add_trip(&mut self, trip: Trip, sink: &mut dyn ProblemSink) -> Result<bool, Aborted> {
        if self.trips.contains_key(&trip.trip_id) {
            sink.report(Problem::duplicate_id(&["trip_id"], &[trip.trip_id.as_str()]))?;
            return Ok(false);
        }
        let mut scope = ScopedSink::new(sink);
        if !trip.route_id.is_empty() && !self.routes.contains_key(&trip.route_id) {
            scope.report(Problem::invalid_value("route_id", &trip.route_id, None))?;
        }
        if !trip.service_id.is_empty() && !self.service_periods.contains_key(&trip.service_id) {
            scope.report(Problem::invalid_value("service_id", &trip.service_id, None))?;
        }
        if let Some(shape_id) = &trip.shape_id {
            if !self.shapes.contains_key(shape_id) {
                scope.report(Problem::invalid_value("shape_id", shape_id, None))?;
            }
        }
        trip.validate(&mut scope)?;
        if scope.has_errors() {
            return Ok(false);
        }
        self.route_trips
            .entry(trip.route_id.clone())
            .or_default()
            .push(trip.trip_id.clone());
        self.trips.insert(trip.trip_id.clone(), trip);
        Ok(true)
    }

    pub fn add_fare(&mut self, fare: Fare, sink: &mut dyn ProblemSink) -> Result<bool, Aborted> {
        if self.fares.contains_key(&fare.fare_id) {
            sink.report(Problem::duplicate_id(&["fare_id"], &[fare.fare_id.as_str()]))?;
            return Ok(false);
        }
        let mut scope = ScopedSink::new(sink);
        fare.validate(&mut scope)?;
        if scope.has_errors() {
            return Ok(false);
        }
        self.fares.insert(fare.fare_id.clone(), fare);
        Ok(true)
    }

    /// Attaches a rule to its fare. Route and zone references are checked by
    /// the validation pass.
    pub fn add_fare_rule(&mut self, rule: FareRule, sink: &mut dyn ProblemSink) -> Result<bool, Aborted> {
        let mut scope = ScopedSink::new(sink);
        rule.validate(&mut scope)?;
        if scope.has_errors() {
            return Ok(false);
        }
        let Some(fare) = self.fares.get_mut(&rule.fare_id) else {
            scope.report(Problem::invalid_value(
                "fare_id",
                &rule.fare_id,
                Some("(This fare_id doesn't correspond to any of the IDs defined in the fare attributes.)"),
            ))?;
            return Ok(false);
        };
        fare.rules.push(rule);
        Ok(true)
    }

    pub fn add_transfer(&mut self, transfer: Transfer, sink: &mut dyn ProblemSink) -> Result<bool, Aborted> {
        let mut scope = ScopedSink::new(sink);
        transfer.validate(&mut scope)?;
        if scope.has_errors() {
            return Ok(false);
        }
        self.transfers.push(transfer);
        Ok(true)
    }

    /// Adds a headway period given as feed text to a trip.
    pub fn add_headway_period(
        &mut self,
        trip_id: &str,
        start_time: &str,
        end_time: &str,
        headway_secs: &str,
        sink: &mut dyn ProblemSink,
    ) -> Result<bool, Aborted> {
        let Some(trip) = self.trips.get_mut(trip_id) else {
            sink.report(Problem::invalid_value(
                "trip_id",
                trip_id,
                Some("This value wasn't defined in trips.txt"),
            ))?;
            return Ok(false);
        };
        trip.add_headway_period(start_time, end_time, headway_secs, sink)
    }

    pub fn add_headway(
        &mut self,
        trip_id: &str,
        headway: Headway,
        sink: &mut dyn ProblemSink,
    ) -> Result<bool, ScheduleError> {
        let trip = self.trip_mut(trip_id)?;
        Ok(trip.add_headway(headway, sink)?)
    }

    /// Appends a stop time after the trip's current last stop and returns
    /// the sequence number it was given, or `None` when it was rejected.
    /// The first stop of a trip needs a time, and a later stop may not be
    /// earlier than the latest time already on the trip.
    pub fn add_stop_time(
        &mut self,
        mut stop_time: StopTime,
        sink: &mut dyn ProblemSink,
    ) -> Result<Option<u32>, ScheduleError> {
        let mut scope = ScopedSink::new(sink).in_file("stop_times.txt");
        if !self.trips.contains_key(&stop_time.trip_id) {
            scope.report(Problem::invalid_value(
                "trip_id",
                &stop_time.trip_id,
                Some("This value wasn't defined in trips.txt"),
            ))?;
        }
        if !self.stops.contains_key(&stop_time.stop_id) {
            scope.report(Problem::invalid_value(
                "stop_id",
                &stop_time.stop_id,
                Some("This value wasn't defined in stops.txt"),
            ))?;
        }
        stop_time.validate(&mut scope)?;
        if scope.has_errors() {
            return Ok(None);
        }

        let new_secs = stop_time.time_secs();
        let sequence = match self.stop_times.last_stop_time(&stop_time.trip_id)? {
            Some(last) => {
                let latest = last
                    .arrival_time
                    .max(last.departure_time)
                    .map(|time| time.total_seconds());
                if let (Some(new_secs), Some(latest)) = (new_secs, latest) {
                    if new_secs < latest {
                        scope.report(Problem::other(format!(
                            "out of order stop time for stop_id={} trip_id={} {} < {}",
                            stop_time.stop_id,
                            stop_time.trip_id,
                            GtfsTime::from_seconds(new_secs),
                            GtfsTime::from_seconds(latest),
                        )))?;
                        return Ok(None);
                    }
                }
                last.stop_sequence.saturating_add(1)
            }
            None => {
                if new_secs.is_none() {
                    scope.report(Problem::other(format!(
                        "No time for first StopTime of trip_id \"{}\"",
                        stop_time.trip_id
                    )))?;
                    return Ok(None);
                }
                1
            }
        };
        stop_time.stop_sequence = sequence;
        self.stop_times.insert(stop_time)?;
        Ok(Some(sequence))
    }

    /// Bulk insert with the sequence numbers the rows already carry.
    pub fn insert_stop_times(&mut self, stop_times: Vec<StopTime>) -> Result<(), StoreError> {
        self.stop_times.insert_many(stop_times)
    }

    pub fn clear_stop_times(&mut self, trip_id: &str) -> Result<usize, StoreError> {
        self.stop_times.remove_trip(trip_id)
    }

    /// Records columns seen for a table, keeping first-seen order.
    pub fn add_table_columns<I, S>(&mut self, file_name: &str, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let known = self.table_columns.entry(file_name.to_string()).or_default();
        for column in columns {
            let column = column.as_ref();
            if !column.is_empty() && !known.iter().any(|existing| existing == column) {
                known.push(column.to_string());
            }
        }
    }

    /// Columns seen for `file_name` at load time or added since.
    pub fn table_columns(&self, file_name: &str) -> &[String] {
        self.table_columns
            .get(file_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get_agency(&self, agency_id: &str) -> Result<&Agency, ScheduleError> {
        self.agencies.get(agency_id).ok_or_else(|| not_found("agency", agency_id))
    }

    pub fn get_stop(&self, stop_id: &str) -> Result<&Stop, ScheduleError> {
        self.stops.get(stop_id).ok_or_else(|| not_found("stop", stop_id))
    }

    pub fn get_route(&self, route_id: &str) -> Result<&Route, ScheduleError> {
        self.routes.get(route_id).ok_or_else(|| not_found("route", route_id))
    }

    pub fn get_trip(&self, trip_id: &str) -> Result<&Trip, ScheduleError> {
        self.trips.get(trip_id).ok_or_else(|| not_found("trip", trip_id))
    }

    pub fn get_service_period(&self, service_id: &str) -> Result<&ServicePeriod, ScheduleError> {
        self.service_periods
            .get(service_id)
            .ok_or_else(|| not_found("service period", service_id))
    }

    pub fn get_shape(&self, shape_id: &str) -> Result<&Shape, ScheduleError> {
        self.shapes.get(shape_id).ok_or_else(|| not_found("shape", shape_id))
    }

    pub fn get_fare(&self, fare_id: &str) -> Result<&Fare, ScheduleError> {
        self.fares.get(fare_id).ok_or_else(|| not_found("fare", fare_id))
    }

    pub fn trip_mut(&mut self, trip_id: &str) -> Result<&mut Trip, ScheduleError> {
        self.trips.get_mut(trip_id).ok_or_else(|| not_found("trip", trip_id))
    }

    pub fn service_period_mut(&mut self, service_id: &str) -> Result<&mut ServicePeriod, ScheduleError> {
        self.service_periods
            .get_mut(service_id)
            .ok_or_else(|| not_found("service period", service_id))
    }

    pub fn agencies(&self) -> impl Iterator<Item = &Agency> {
        self.agencies.values()
    }

    pub fn stops(&self) -> impl Iterator<Item = &Stop> {
        self.stops.values()
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    pub fn trips(&self) -> impl Iterator<Item = &Trip> {
        self.trips.values()
    }

    pub fn service_periods(&self) -> impl Iterator<Item = &ServicePeriod> {
        self.service_periods.values()
    }

    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.values()
    }

    pub fn fares(&self) -> impl Iterator<Item = &Fare> {
        self.fares.values()
    }

    pub fn fare_rules(&self) -> impl Iterator<Item = &FareRule> {
        self.fares.values().flat_map(|fare| fare.rules.iter())
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    /// Every zone_id named by some stop.
    pub fn fare_zones(&self) -> impl Iterator<Item = &FeedId> {
        self.fare_zones.iter()
    }

    pub fn has_fare_zone(&self, zone_id: &str) -> bool {
        self.fare_zones.contains(zone_id)
    }

    /// Ids of the trips of a route, in the order they were added.
    pub fn route_trips(&self, route_id: &str) -> &[FeedId] {
        self.route_trips
            .get(route_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn stop_time_store(&self) -> &StopTimeStore {
        &self.stop_times
    }

    pub fn trip_stop_times(&self, trip_id: &str) -> Result<Vec<StopTime>, StoreError> {
        self.stop_times.trip_stop_times(trip_id)
    }

    /// Distinct trips that visit a stop, sorted by id.
    pub fn stop_trips(&self, stop_id: &str) -> Result<Vec<FeedId>, StoreError> {
        let trips: BTreeSet<FeedId> = self
            .stop_times
            .stop_visits(stop_id)?
            .into_iter()
            .map(|visit| visit.trip_id)
            .collect();
        Ok(trips.into_iter().collect())
    }

    /// Up to `n` stops closest to a coordinate, nearest first. Distances are
    /// compared in squared degrees.
    pub fn nearest_stops(&self, lat: f64, lon: f64, n: usize) -> Vec<&Stop> {
        let mut nearest: Vec<(f64, &Stop)> = Vec::with_capacity(n + 1);
        if n == 0 {
            return Vec::new();
        }
        for stop in self.stops.values() {
            let Some((stop_lat, stop_lon)) = stop.coordinates() else {
                continue;
            };
            let distance = (stop_lat - lat).powi(2) + (stop_lon - lon).powi(2);
            if nearest.len() == n && nearest[n - 1].0 <= distance {
                continue;
            }
            let position = nearest.partition_point(|(existing, _)| *existing <= distance);
            nearest.insert(position, (distance, stop));
            nearest.truncate(n);
        }
        nearest.into_iter().map(|(_, stop)| stop).collect()
    }

    /// The first `n` stops inside a box.
    pub fn stops_in_box(&self, north: f64, east: f64, south: f64, west: f64, n: usize) -> Vec<&Stop> {
        self.stops
            .values()
            .filter(|stop| match stop.coordinates() {
                Some((lat, lon)) => lat <= north && lat >= south && lon <= east && lon >= west,
                None => false,
            })
            .take(n)
            .collect()
    }

    /// `(min_lat, min_lon, max_lat, max_lon)` over all positioned stops.
    pub fn stop_bounding_box(&self) -> Option<(f64, f64, f64, f64)> {
        self.stops
            .values()
            .filter_map(Stop::coordinates)
            .fold(None, |bounds, (lat, lon)| match bounds {
                None => Some((lat, lon, lat, lon)),
                Some((min_lat, min_lon, max_lat, max_lon)) => Some((
                    min_lat.min(lat),
                    min_lon.min(lon),
                    max_lat.max(lat),
                    max_lon.max(lon),
                )),
            })
    }

    /// Union of every service period's date range.
    pub fn date_range(&self) -> Option<(GtfsDate, GtfsDate)> {
        self.service_periods
            .values()
            .filter_map(ServicePeriod::date_range)
            .reduce(|(start, end), (next_start, next_end)| (start.min(next_start), end.max(next_end)))
    }

    /// For each date in `[start, end)`, the periods active on it.
    pub fn service_periods_active_each_date(
        &self,
        start: GtfsDate,
        end: GtfsDate,
    ) -> Vec<(GtfsDate, Vec<&ServicePeriod>)> {
        let mut dates = Vec::new();
        let mut date = start;
        while date < end {
            let active = self
                .service_periods
                .values()
                .filter(|period| period.is_active_on(date))
                .collect();
            dates.push((date, active));
            date = date.succ();
        }
        dates
    }

    /// Scheduled trips and departures on each date in `[start, end)`. A trip
    /// with headways counts once per run; each run departs from every stop
    /// but the last.
    pub fn date_trips_departures(
        &self,
        start: GtfsDate,
        end: GtfsDate,
    ) -> Result<Vec<DailyService>, StoreError> {
        let mut per_service: FxHashMap<&str, (usize, usize)> = FxHashMap::default();
        for trip in self.trips.values() {
            let runs = trip.headway_start_times().len().max(1);
            let stops = self.stop_times.trip_count(&trip.trip_id)?;
            let totals = per_service.entry(trip.service_id.as_str()).or_default();
            totals.0 += runs;
            totals.1 += stops.saturating_sub(1) * runs;
        }
        Ok(self
            .service_periods_active_each_date(start, end)
            .into_iter()
            .map(|(date, periods)| {
                let (trips, departures) = periods
                    .iter()
                    .filter_map(|period| per_service.get(period.service_id.as_str()))
                    .fold((0, 0), |(trips, departures), (t, d)| (trips + t, departures + d));
                DailyService {
                    date,
                    trips,
                    departures,
                }
            })
            .collect())
    }

    /// Arrival at the first stop, or its departure when arrival is blank.
    pub fn trip_start_time(
        &self,
        trip_id: &str,
        sink: &mut dyn ProblemSink,
    ) -> Result<Option<GtfsTime>, ScheduleError> {
        let stop_times = self.stop_times.trip_stop_times(trip_id)?;
        let Some(first) = stop_times.first() else {
            return Ok(None);
        };
        let time = first.arrival_time.or(first.departure_time);
        if time.is_none() {
            sink.report(Problem::invalid_value(
                "departure_time",
                "",
                Some(&format!("The first stop_time in trip {trip_id} is missing times.")),
            ))?;
        }
        Ok(time)
    }

    /// Departure from the last stop, or its arrival when departure is blank.
    pub fn trip_end_time(
        &self,
        trip_id: &str,
        sink: &mut dyn ProblemSink,
    ) -> Result<Option<GtfsTime>, ScheduleError> {
        let stop_times = self.stop_times.trip_stop_times(trip_id)?;
        let Some(last) = stop_times.last() else {
            return Ok(None);
        };
        let time = last.departure_time.or(last.arrival_time);
        if time.is_none() {
            sink.report(Problem::invalid_value(
                "arrival_time",
                "",
                Some(&format!("The last stop_time in trip {trip_id} is missing times.")),
            ))?;
        }
        Ok(time)
    }

    /// Every stop of a trip with a time; untimed stops get a time estimated
    /// in proportion to the distance travelled between the surrounding
    /// timepoints.
    pub fn time_interpolated_stops(&self, trip_id: &str) -> Result<Vec<InterpolatedStop>, ScheduleError> {
        let stop_times = self.stop_times.trip_stop_times(trip_id)?;
        let (Some(first), Some(last)) = (stop_times.first(), stop_times.last()) else {
            return Ok(Vec::new());
        };
        if first.time_secs().is_none() || last.time_secs().is_none() {
            return Err(ScheduleError::MissingTimes {
                trip_id: trip_id.to_string(),
            });
        }

        let mut interpolated = Vec::with_capacity(stop_times.len());
        let mut current_secs = 0;
        let mut next_secs = 0;
        let mut span = 0.0;
        let mut travelled = 0.0;
        for (index, stop_time) in stop_times.iter().enumerate() {
            if let Some(secs) = stop_time.time_secs() {
                current_secs = secs;
                span = 0.0;
                travelled = 0.0;
                let mut next = index + 1;
                while next < stop_times.len() {
                    span += self.hop_distance(&stop_times[next - 1], &stop_times[next]);
                    if let Some(secs) = stop_times[next].time_secs() {
                        next_secs = secs;
                        break;
                    }
                    next += 1;
                }
                interpolated.push(InterpolatedStop {
                    secs,
                    stop_time: stop_time.clone(),
                    is_timepoint: true,
                });
            } else {
                travelled += self.hop_distance(&stop_times[index - 1], stop_time);
                let fraction = if span > 0.0 { travelled / span } else { 0.0 };
                let estimate = fraction * f64::from(next_secs - current_secs) + f64::from(current_secs);
                interpolated.push(InterpolatedStop {
                    secs: estimate.round() as i32,
                    stop_time: stop_time.clone(),
                    is_timepoint: false,
                });
            }
        }
        Ok(interpolated)
    }

    fn hop_distance(&self, from: &StopTime, to: &StopTime) -> f64 {
        let position = |stop_id: &FeedId| self.stops.get(stop_id).and_then(Stop::coordinates);
        match (position(&from.stop_id), position(&to.stop_id)) {
            (Some((lat1, lon1)), Some((lat2, lon2))) => approximate_distance(lat1, lon1, lat2, lon2),
            _ => 0.0,
        }
    }

    /// Start times of every run of a trip: one per headway run, or the trip's
    /// own start time when it has no headways.
    pub fn trip_run_start_times(&self, trip_id: &str) -> Result<Vec<i32>, ScheduleError> {
        let trip = self.get_trip(trip_id)?;
        if !trip.headways().is_empty() {
            return Ok(trip.headway_start_times());
        }
        let first = self.stop_times.trip_stop_times(trip_id)?.into_iter().next();
        Ok(first.and_then(|stop_time| stop_time.time_secs()).into_iter().collect())
    }

    /// The trip's stop times once per headway run, shifted so the first
    /// stop departs at the run's start time.
    pub fn headway_stop_times(&self, trip_id: &str) -> Result<Vec<Vec<StopTime>>, ScheduleError> {
        let trip = self.get_trip(trip_id)?;
        let stop_times = self.stop_times.trip_stop_times(trip_id)?;
        let Some(first) = stop_times.first() else {
            return Ok(Vec::new());
        };
        let first_secs = first.time_secs().ok_or_else(|| ScheduleError::MissingTimes {
            trip_id: trip_id.to_string(),
        })?;
        Ok(trip
            .headway_start_times()
            .into_iter()
            .map(|run_secs| {
                stop_times
                    .iter()
                    .map(|stop_time| stop_time.shifted(run_secs - first_secs))
                    .collect()
            })
            .collect())
    }

    /// The ordered stop ids a trip visits.
    pub fn trip_pattern(&self, trip_id: &str) -> Result<Vec<FeedId>, StoreError> {
        Ok(self
            .stop_times
            .trip_stop_times(trip_id)?
            .into_iter()
            .map(|stop_time| stop_time.stop_id)
            .collect())
    }

    /// Trips of a route grouped by the sequence of stops they visit.
    pub fn route_patterns(&self, route_id: &str) -> Result<BTreeMap<Vec<FeedId>, Vec<FeedId>>, ScheduleError> {
        self.get_route(route_id)?;
        let mut patterns: BTreeMap<Vec<FeedId>, Vec<FeedId>> = BTreeMap::new();
        for trip_id in self.route_trips(route_id) {
            patterns
                .entry(self.trip_pattern(trip_id)?)
                .or_default()
                .push(trip_id.clone());
        }
        Ok(patterns)
    }

    /// The explicit default agency, else the only agency.
    pub fn default_agency(&self) -> Option<&Agency> {
        match &self.default_agency {
            Some(key) => self.agencies.get(key),
            None if self.agencies.len() == 1 => self.agencies.values().next(),
            None => None,
        }
    }

    pub fn set_default_agency(&mut self, agency_id: &str) -> Result<(), ScheduleError> {
        self.get_agency(agency_id)?;
        self.default_agency = Some(FeedId::from(agency_id));
        Ok(())
    }

    /// Adds `agency` without validation and makes it the default. It gets a
    /// fresh id when it has none or its id is taken.
    pub fn new_default_agency(&mut self, mut agency: Agency) -> FeedId {
        if agency
            .agency_id
            .as_ref()
            .map_or(true, |id| self.agencies.contains_key(id))
        {
            agency.agency_id = Some(find_unique_id(&self.agencies));
        }
        let key = agency.key();
        debug!(agency_id = %key, "created default agency");
        self.agencies.insert(key.clone(), agency);
        self.default_agency = Some(key.clone());
        key
    }

    /// Id of the default agency, creating an empty one when there is no
    /// agency at all. `None` when several agencies exist and none was chosen.
    pub fn ensure_default_agency(&mut self) -> Option<FeedId> {
        if let Some(agency) = self.default_agency() {
            return Some(agency.key());
        }
        if self.agencies.is_empty() {
            return Some(self.new_default_agency(Agency::default()));
        }
        None
    }

    pub fn default_service_period(&self) -> Option<&ServicePeriod> {
        match &self.default_service_period {
            Some(key) => self.service_periods.get(key),
            None if self.service_periods.len() == 1 => self.service_periods.values().next(),
            None => None,
        }
    }

    pub fn set_default_service_period(&mut self, service_id: &str) -> Result<(), ScheduleError> {
        self.get_service_period(service_id)?;
        self.default_service_period = Some(FeedId::from(service_id));
        Ok(())
    }

    /// Adds an empty service period under a fresh id and makes it the default.
    pub fn new_default_service_period(&mut self) -> FeedId {
        let service_id = find_unique_id(&self.service_periods);
        self.service_periods
            .insert(service_id.clone(), ServicePeriod::new(&service_id));
        self.default_service_period = Some(service_id.clone());
        service_id
    }

    pub fn ensure_default_service_period(&mut self) -> Option<FeedId> {
        if let Some(period) = self.default_service_period() {
            return Some(period.service_id.clone());
        }
        if self.service_periods.is_empty() {
            return Some(self.new_default_service_period());
        }
        None
    }

    /// Adds a stop under a fresh id. Returns the id when the stop was kept.
    pub fn new_stop(
        &mut self,
        lat: f64,
        lon: f64,
        name: &str,
        sink: &mut dyn ProblemSink,
    ) -> Result<Option<FeedId>, Aborted> {
        let stop_id = find_unique_id(&self.stops);
        let added = self.add_stop(Stop::new(&stop_id, name, lat, lon), sink)?;
        Ok(added.then_some(stop_id))
    }

    /// Adds a route of the default agency under a fresh id.
    pub fn new_route(
        &mut self,
        short_name: &str,
        long_name: &str,
        route_type: RouteType,
        sink: &mut dyn ProblemSink,
    ) -> Result<Option<FeedId>, Aborted> {
        let route_id = find_unique_id(&self.routes);
        let mut route = Route::new(&route_id, short_name, long_name, route_type);
        route.agency_id = self.ensure_default_agency().filter(|id| !id.is_empty());
        let added = self.add_route(route, sink)?;
        Ok(added.then_some(route_id))
    }

    /// Adds a trip on `route_id` running on the default service period.
    pub fn new_trip(
        &mut self,
        route_id: &str,
        headsign: Option<&str>,
        sink: &mut dyn ProblemSink,
    ) -> Result<Option<FeedId>, Aborted> {
        let service_id = self.ensure_default_service_period().unwrap_or_default();
        let trip_id = find_unique_id(&self.trips);
        let mut trip = Trip::new(&trip_id, route_id, &service_id);
        trip.trip_headsign = headsign.map(str::to_string);
        let added = self.add_trip(trip, sink)?;
        Ok(added.then_some(trip_id))
    }

    /// Appends a point to a shape, creating the shape on first use.
    pub fn add_shape_point(
        &mut self,
        shape_id: &str,
        point: ShapePoint,
        sink: &mut dyn ProblemSink,
    ) -> Result<bool, Aborted> {
        self.shapes
            .entry(FeedId::from(shape_id))
            .or_insert_with(|| Shape::new(shape_id))
            .add_point(point, sink)
    }
}

fn not_found(kind: &'static str, id: &str) -> ScheduleError {
    ScheduleError::NotFound {
        kind,
        id: id.to_string(),
    }
}

/// Smallest decimal id, counting up from the map's size, not yet in use.
fn find_unique_id<V>(map: &BTreeMap<FeedId, V>) -> FeedId {
    let mut candidate = map.len();
    loop {
        let id = FeedId::from(candidate.to_string());
        if !map.contains_key(&id) {
            return id;
        }
        candidate += 1;
    }
}
