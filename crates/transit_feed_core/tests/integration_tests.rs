use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use transitfeed_core::{
    FeedEngine, FeedLoader, FeedWriter, LoadOptions, LoadStatus, ProblemAccumulator,
    ProblemKind, Schedule, StopTimeStorage, ValidationOptions,
};

const AGENCY: &str = "agency_id,agency_name,agency_url,agency_timezone,agency_lang,agency_phone,agency_motto\n\
                      DTA,Demo Transit Authority,http://google.com,America/Los_Angeles,en,555-0100,on time\n";
const STOPS: &str = "stop_id,stop_name,stop_lat,stop_lon,zone_id,location_type,parent_station,shelter\n\
                     STN,Furnace Creek Station,36.425288,-117.133162,,1,,\n\
                     FUR_CREEK_RES,Furnace Creek Resort,36.425600,-117.133000,Z1,0,STN,yes\n\
                     BEATTY_AIRPORT,Nye County Airport,36.868446,-116.784582,Z2,0,,no\n\
                     BULLFROG,Bullfrog,36.88108,-116.81797,Z2,,,\n";
const ROUTES: &str = "route_id,agency_id,route_short_name,route_long_name,route_type,route_color,route_text_color,route_note\n\
                      AB,DTA,10,Airport - Bullfrog,3,00FF00,000000,express\n\
                      CITY,DTA,40,City,3,,,\n";
const CALENDAR: &str = "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date,season\n\
                        WEEK,1,1,1,1,1,0,0,20070101,20101231,all year\n";
const CALENDAR_DATES: &str = "service_id,date,exception_type,holiday_name\n\
                              WEEK,20070704,2,Independence Day\n\
                              HOLIDAY,20071225,1,Christmas\n";
const TRIPS: &str = "route_id,service_id,trip_id,trip_headsign,direction_id,shape_id,vehicle_note\n\
                     AB,WEEK,AB1,to Bullfrog,0,SH1,low floor\n\
                     CITY,HOLIDAY,CITY1,,1,,\n";
const FREQUENCIES: &str = "trip_id,start_time,end_time,headway_secs,freq_note\n\
                           CITY1,6:00:00,8:00:00,1800,morning\n\
                           CITY1,16:00:00,18:00:00,900,\n";
const STOP_TIMES: &str = "trip_id,arrival_time,departure_time,stop_id,stop_sequence,shape_dist_traveled,platform\n\
                          AB1,8:00:00,8:00:00,BEATTY_AIRPORT,1,0,2\n\
                          AB1,8:20:00,8:20:00,BULLFROG,2,3000,\n\
                          CITY1,6:00:00,6:00:00,FUR_CREEK_RES,1,,\n\
                          CITY1,,,BEATTY_AIRPORT,2,,\n\
                          CITY1,7:00:00,7:00:00,BULLFROG,3,,\n";
const SHAPES: &str = "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence,shape_dist_traveled,surveyed\n\
                      SH1,36.868446,-116.784582,10,0,2006\n\
                      SH1,36.875,-116.80,20,1800,\n\
                      SH1,36.88108,-116.81797,30,3000,2007\n";
const FARES: &str = "fare_id,price,currency_type,payment_method,transfers,fare_class\n\
                     p,1.25,USD,0,0,regular\n\
                     a,5.25,USD,1,,\n";
const FARE_RULES: &str = "fare_id,route_id,origin_id,destination_id,rule_note\n\
                          p,AB,Z2,Z2,local\n\
                          a,CITY,Z1,,\n";
const TRANSFERS: &str = "from_stop_id,to_stop_id,transfer_type,min_transfer_time,walkway\n\
                         BEATTY_AIRPORT,BULLFROG,2,300,covered\n";

fn temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), nanos));
    fs::create_dir_all(&dir).expect("create dir");
    dir
}

fn full_feed() -> Vec<(&'static str, &'static str)> {
    vec![
        ("agency.txt", AGENCY),
        ("stops.txt", STOPS),
        ("routes.txt", ROUTES),
        ("calendar.txt", CALENDAR),
        ("calendar_dates.txt", CALENDAR_DATES),
        ("trips.txt", TRIPS),
        ("frequencies.txt", FREQUENCIES),
        ("stop_times.txt", STOP_TIMES),
        ("shapes.txt", SHAPES),
        ("fare_attributes.txt", FARES),
        ("fare_rules.txt", FARE_RULES),
        ("transfers.txt", TRANSFERS),
    ]
}

fn write_zip(path: &Path, tables: &[(&str, &str)]) {
    let file = File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    for (name, text) in tables {
        zip.start_file(*name, options).expect("start file");
        zip.write_all(text.as_bytes()).expect("write file");
    }
    zip.finish().expect("finish zip");
}

fn load(path: &Path, options: LoadOptions) -> (Schedule, ProblemAccumulator) {
    let mut sink = ProblemAccumulator::new();
    let loaded = FeedLoader::load_path(path, options, &mut sink).expect("load");
    assert_eq!(loaded.status, LoadStatus::Complete, "{:#?}", sink.problems());
    (loaded.schedule, sink)
}

fn assert_same_entities(left: &Schedule, right: &Schedule) {
    assert_eq!(left.agencies().collect::<Vec<_>>(), right.agencies().collect::<Vec<_>>());
    assert_eq!(left.stops().collect::<Vec<_>>(), right.stops().collect::<Vec<_>>());
    assert_eq!(left.routes().collect::<Vec<_>>(), right.routes().collect::<Vec<_>>());
    assert_eq!(left.trips().collect::<Vec<_>>(), right.trips().collect::<Vec<_>>());
    assert_eq!(
        left.service_periods().collect::<Vec<_>>(),
        right.service_periods().collect::<Vec<_>>()
    );
    assert_eq!(left.shapes().collect::<Vec<_>>(), right.shapes().collect::<Vec<_>>());
    assert_eq!(left.fares().collect::<Vec<_>>(), right.fares().collect::<Vec<_>>());
    assert_eq!(left.fare_rules().collect::<Vec<_>>(), right.fare_rules().collect::<Vec<_>>());
    assert_eq!(left.transfers(), right.transfers());
    for trip in left.trips() {
        assert_eq!(
            left.trip_stop_times(&trip.trip_id).unwrap(),
            right.trip_stop_times(&trip.trip_id).unwrap(),
            "stop times of {}",
            trip.trip_id
        );
    }
}

#[test]
fn round_trip_keeps_entities_and_extension_columns() {
    let dir = temp_dir("transitfeed_round_trip");
    let source = dir.join("source.zip");
    write_zip(&source, &full_feed());
    let (loaded, _) = load(&source, LoadOptions::default());

    let written = dir.join("written.zip");
    FeedWriter::new(&loaded).write_to_path(&written).expect("write feed");
    let (reloaded, _) = load(&written, LoadOptions::default());

    assert_same_entities(&loaded, &reloaded);
    let stop = reloaded.get_stop("FUR_CREEK_RES").unwrap();
    assert_eq!(stop.extra.get("shelter"), Some("yes"));
    let trip = reloaded.get_trip("AB1").unwrap();
    assert_eq!(trip.extra.get("vehicle_note"), Some("low floor"));
    let headways = reloaded.get_trip("CITY1").unwrap().headways();
    assert_eq!(headways.len(), 2);
    assert_eq!(headways[0].extra.get("freq_note"), Some("morning"));
    assert!(reloaded.get_service_period("HOLIDAY").is_ok());
    let holidays: Vec<_> = reloaded
        .service_periods()
        .flat_map(|period| period.date_exceptions())
        .map(|row| row.extra.get("holiday_name").unwrap_or_default().to_string())
        .collect();
    assert_eq!(holidays, vec!["Christmas".to_string(), "Independence Day".to_string()]);
    let shape = reloaded.get_shape("SH1").unwrap();
    assert_eq!(shape.points()[2].extra.get("surveyed"), Some("2007"));
    assert_eq!(
        reloaded.get_agency("DTA").unwrap().extra.get("agency_motto"),
        Some("on time")
    );
    assert_eq!(reloaded.get_fare("p").unwrap().extra.get("fare_class"), Some("regular"));
    assert_eq!(reloaded.transfers()[0].extra.get("walkway"), Some("covered"));

    let expected_extras = [
        ("agency.txt", "agency_motto"),
        ("stops.txt", "shelter"),
        ("routes.txt", "route_note"),
        ("calendar.txt", "season"),
        ("calendar_dates.txt", "holiday_name"),
        ("trips.txt", "vehicle_note"),
        ("frequencies.txt", "freq_note"),
        ("stop_times.txt", "platform"),
        ("shapes.txt", "surveyed"),
        ("fare_attributes.txt", "fare_class"),
        ("fare_rules.txt", "rule_note"),
        ("transfers.txt", "walkway"),
    ];
    let tables = FeedWriter::new(&reloaded).tables().expect("tables");
    for (file_name, column) in expected_extras {
        let table = tables
            .iter()
            .find(|table| table.file_name == file_name)
            .unwrap_or_else(|| panic!("{file_name} was not written"));
        assert!(
            table.columns.iter().any(|written| written == column),
            "{file_name} lost {column}: {:?}",
            table.columns
        );
    }

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn directory_output_matches_zip_output() {
    let dir = temp_dir("transitfeed_dir_output");
    let source = dir.join("source.zip");
    write_zip(&source, &full_feed());
    let (loaded, _) = load(&source, LoadOptions::default());

    let out_dir = dir.join("written");
    FeedWriter::new(&loaded).write_to_path(&out_dir).expect("write feed");
    assert!(out_dir.join("stop_times.txt").is_file());
    let (reloaded, _) = load(&out_dir, LoadOptions::default());
    assert_same_entities(&loaded, &reloaded);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn spilled_stop_times_match_memory() {
    let dir = temp_dir("transitfeed_spill");
    let source = dir.join("source.zip");
    write_zip(&source, &full_feed());
    let (memory, _) = load(&source, LoadOptions::default());
    let (spilled, _) = load(
        &source,
        LoadOptions {
            stop_time_storage: StopTimeStorage::Spill { dir: dir.clone() },
            load_stop_times: true,
        },
    );

    for trip in memory.trips() {
        assert_eq!(
            memory.trip_stop_times(&trip.trip_id).unwrap(),
            spilled.trip_stop_times(&trip.trip_id).unwrap()
        );
    }
    let visits = spilled.stop_time_store().stop_visits("BEATTY_AIRPORT").unwrap();
    assert_eq!(visits.len(), 2);

    drop(spilled);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_agency_file_is_fatal() {
    let dir = temp_dir("transitfeed_missing_agency");
    let source = dir.join("feed.zip");
    let tables: Vec<_> = full_feed()
        .into_iter()
        .filter(|(name, _)| *name != "agency.txt")
        .collect();
    write_zip(&source, &tables);

    let mut sink = ProblemAccumulator::new();
    let loaded = FeedLoader::load_path(&source, LoadOptions::default(), &mut sink).unwrap();
    assert_eq!(loaded.status, LoadStatus::Fatal(ProblemKind::MissingFile));
    let problem = sink.of_kind(ProblemKind::MissingFile).next().unwrap();
    assert_eq!(problem.context_str("file_name"), Some("agency.txt"));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn extra_comma_in_stops_is_kept_with_warning() {
    let dir = temp_dir("transitfeed_extra_comma");
    let source = dir.join("feed.zip");
    let stops = "stop_id,stop_name,stop_lat,stop_lon\n\
                 BEATTY_AIRPORT,Nye County Airport,36.868446,-116.784582,\n\
                 BULLFROG,Bullfrog,36.88108,-116.81797\n\
                 FUR_CREEK_RES,Furnace Creek Resort,36.425288,-117.133162\n";
    let tables: Vec<_> = full_feed()
        .into_iter()
        .map(|(name, text)| if name == "stops.txt" { (name, stops) } else { (name, text) })
        .filter(|(name, _)| !name.starts_with("fare") && *name != "transfers.txt")
        .collect();
    write_zip(&source, &tables);

    let (schedule, sink) = load(&source, LoadOptions::default());
    let warning = sink
        .of_kind(ProblemKind::OtherProblem)
        .find(|problem| problem.message.contains("too many cells"))
        .expect("too many cells warning");
    assert!(!warning.is_error());
    let stop = schedule.get_stop("BEATTY_AIRPORT").unwrap();
    assert_eq!(stop.stop_lon, Some(-116.784582));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn unknown_files_are_reported() {
    let dir = temp_dir("transitfeed_unknown_file");
    let source = dir.join("feed.zip");
    let mut tables = full_feed();
    tables.push(("notes.txt", "note\nhello\n"));
    write_zip(&source, &tables);

    let (_, sink) = load(&source, LoadOptions::default());
    let unknown: Vec<_> = sink
        .of_kind(ProblemKind::UnknownFile)
        .map(|problem| problem.context_str("file_name").unwrap().to_string())
        .collect();
    assert_eq!(unknown, vec!["notes.txt".to_string()]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn engine_reports_cross_entity_problems() {
    let dir = temp_dir("transitfeed_engine");
    let source = dir.join("feed.zip");
    let stops = "stop_id,stop_name,stop_lat,stop_lon\n\
                 BEATTY_AIRPORT,Nye County Airport,36.868446,-116.784582\n\
                 BEATTY_TWIN,Nye County Airport Gate,36.868446,-116.784582\n\
                 BULLFROG,Bullfrog,36.88108,-116.81797\n\
                 FUR_CREEK_RES,Furnace Creek Resort,36.425288,-117.133162\n";
    let tables: Vec<_> = full_feed()
        .into_iter()
        .map(|(name, text)| if name == "stops.txt" { (name, stops) } else { (name, text) })
        .filter(|(name, _)| !name.starts_with("fare") && *name != "transfers.txt")
        .collect();
    write_zip(&source, &tables);

    let options = ValidationOptions {
        today: chrono::NaiveDate::from_ymd_opt(2008, 6, 1),
        ..ValidationOptions::default()
    };
    let engine = FeedEngine::new(LoadOptions::default(), options);
    let mut sink = ProblemAccumulator::new();
    let outcome = engine.validate_path(&source, &mut sink).unwrap();
    assert!(outcome.is_validated());

    let close = sink.of_kind(ProblemKind::StopsTooClose).next().expect("stops too close");
    assert!(close.message.contains("0.00m apart"), "{}", close.message);
    let unused: Vec<_> = sink
        .of_kind(ProblemKind::UnusedStop)
        .map(|problem| problem.context_str("stop_id").unwrap().to_string())
        .collect();
    assert_eq!(unused, vec!["BEATTY_TWIN".to_string()]);

    fs::remove_dir_all(&dir).ok();
}
