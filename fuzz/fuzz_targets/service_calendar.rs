#![no_main]
use arbitrary::Arbitrary;
use chrono::{Duration, NaiveDate};
use libfuzzer_sys::fuzz_target;
use transitfeed_core::{ProblemAccumulator, ServicePeriod};
use transitfeed_model::GtfsDate;

#[derive(Debug, Arbitrary)]
struct CalendarData {
    days: [bool; 7],
    start_offset: Option<u16>,
    end_offset: Option<u16>,
    exceptions: Vec<(u16, bool)>,
}

// Offsets are days after 2007-01-01, kept within two years.
fn date(offset: u16) -> GtfsDate {
    let base = NaiveDate::from_ymd_opt(2007, 1, 1).unwrap_or_default();
    GtfsDate::from_naive(base + Duration::days(i64::from(offset % 730)))
}

fuzz_target!(|data: CalendarData| {
    let mut period = ServicePeriod::new("S");
    let mut sink = ProblemAccumulator::new();
    for (day, has_service) in data.days.iter().enumerate() {
        period.set_day_of_week_has_service(day, *has_service);
    }
    if let Some(offset) = data.start_offset {
        period.set_start_date(date(offset));
    }
    if let Some(offset) = data.end_offset {
        period.set_end_date(date(offset));
    }
    for (offset, has_service) in &data.exceptions {
        let _ = period.set_date_has_service(date(*offset), *has_service, &mut sink);
    }

    let active = period.active_dates();
    for pair in active.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    for day in &active {
        assert!(period.is_active_on(*day));
    }
    if let Some((first, last)) = period.date_range() {
        assert!(active.iter().all(|day| *day >= first && *day <= last));
    }
});
