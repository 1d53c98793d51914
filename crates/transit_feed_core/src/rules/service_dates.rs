use transitfeed_model::GtfsDate;

use crate::config::ValidationOptions;
use crate::problems::{Problem, ProblemSink};
use crate::schedule::Schedule;
use crate::validator::{PassError, Validator};

const EXPIRATION_WARNING_DAYS: i64 = 60;
const GAP_HORIZON_DAYS: i64 = 365;

/// Expiration, future-only service and runs of days without any trips.
#[derive(Debug, Default)]
pub struct ServiceDatesValidator;

impl Validator for ServiceDatesValidator {
    fn name(&self) -> &'static str {
        "service_dates"
    }

    fn validate(
        &self,
        schedule: &Schedule,
        options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), PassError> {
        let Some((first, last)) = schedule.date_range() else {
            sink.report(Problem::other("This feed has no effective service dates!").warning())?;
            return Ok(());
        };
        let today = GtfsDate::from_naive(options.reference_date());
        if last < today.add_days(EXPIRATION_WARNING_DAYS) {
            sink.report(Problem::expiration_date(last, today))?;
        }
        if first > today {
            sink.report(Problem::future_service(first))?;
        }

        let Some(interval) = options.service_gap_interval.filter(|interval| *interval > 0) else {
            return Ok(());
        };
        // Gaps may start up to interval - 1 days before today.
        let start = first.max(today.add_days(-(i64::from(interval) - 1)));
        let end = last.min(today.add_days(GAP_HORIZON_DAYS));
        let days = schedule.date_trips_departures(start, end)?;

        let mut gap: Option<(GtfsDate, GtfsDate, u32)> = None;
        for day in days {
            if day.trips == 0 {
                gap = Some(match gap {
                    Some((gap_start, _, length)) => (gap_start, day.date, length + 1),
                    None => (day.date, day.date, 1),
                });
            } else if let Some((gap_start, gap_end, length)) = gap.take() {
                if length >= interval {
                    sink.report(Problem::too_many_days_without_service(gap_start, gap_end, length))?;
                }
            }
        }
        if let Some((gap_start, gap_end, length)) = gap {
            if length >= interval {
                sink.report(Problem::too_many_days_without_service(gap_start, gap_end, length))?;
            }
        }
        Ok(())
    }
}
