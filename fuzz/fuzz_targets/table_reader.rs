#![no_main]
use libfuzzer_sys::fuzz_target;
use transitfeed_core::{FeedRecord, ProblemAccumulator, Shape, Stop, StopTime, TableReader};

fuzz_target!(|data: &[u8]| {
    let mut sink = ProblemAccumulator::new();
    if let Ok(Some((_, rows))) = TableReader::read_all(Stop::SCHEMA, data, &mut sink) {
        for row in &rows {
            let _ = Stop::from_row(row, &mut sink);
        }
    }
    if let Ok(Some((_, rows))) = TableReader::read_all(StopTime::SCHEMA, data, &mut sink) {
        for row in &rows {
            let _ = StopTime::from_row(row, &mut sink);
        }
    }
    let _ = TableReader::read_all(Shape::SCHEMA, data, &mut sink);
});
