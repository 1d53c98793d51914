#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use transitfeed_core::{Headway, ProblemAccumulator, Trip};

#[derive(Debug, Arbitrary)]
struct Period {
    start_secs: u16,
    length_secs: i16,
    headway_secs: u16,
}

fuzz_target!(|periods: Vec<Period>| {
    let mut trip = Trip::new("T", "R", "S");
    let mut sink = ProblemAccumulator::new();
    for period in periods {
        let start = i32::from(period.start_secs);
        let end = start + i32::from(period.length_secs);
        let headway = Headway::new(start, end, u32::from(period.headway_secs));
        let _ = trip.add_headway(headway, &mut sink);
    }
    let kept = trip.headways();
    for (index, headway) in kept.iter().enumerate() {
        assert!(headway.start < headway.end);
        assert!(headway.headway_secs > 0);
        for other in &kept[index + 1..] {
            assert!(!headway.overlaps(other), "{headway} overlaps {other}");
        }
    }
});
