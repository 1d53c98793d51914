#![no_main]
use libfuzzer_sys::fuzz_target;
use transitfeed_model::{GtfsColor, GtfsDate, GtfsTime};

fuzz_target!(|data: &str| {
    if let Ok(date) = GtfsDate::parse(data) {
        assert_eq!(GtfsDate::parse(&date.to_string()).ok(), Some(date));
    }
    if let Ok(time) = GtfsTime::parse(data) {
        let reparsed = GtfsTime::parse(&time.to_string()).expect("formatted time parses");
        assert_eq!(reparsed.total_seconds(), time.total_seconds());
    }
    let _ = GtfsColor::parse(data);
});
