//! Feed engine for transit schedules: reads the tables of a feed, builds a
//! cross-referenced [`Schedule`], validates it and writes it back out.
//!
//! Problems found along the way are handed to a [`ProblemSink`]; the sink
//! decides whether to keep going.

pub mod config;
pub mod csv_reader;
pub mod engine;
pub mod entity;
pub mod input;
pub mod loader;
pub mod problems;
pub mod progress;
pub mod rules;
pub mod schedule;
pub mod stop_time_store;
pub mod validator;
pub mod writer;

pub use config::{LoadOptions, StopTimeStorage, ValidationOptions};
pub use csv_reader::{TableHeader, TableReader, TableRow, TableSchema};
pub use engine::{EngineError, FeedEngine, ValidationOutcome};
pub use entity::{
    Agency, DateException, ExtraFields, Fare, FareRule, FeedRecord, Headway, HeadwayRow, Route,
    ServicePeriod, Shape, ShapePoint, Stop, StopTime, Transfer, Trip,
};
pub use input::{FeedInput, FeedInputError};
pub use loader::{FeedLoader, LoadStatus, LoadedFeed, FEED_FILE_NAMES};
pub use problems::{
    Aborted, Problem, ProblemAccumulator, ProblemKind, ProblemSink, ScopedSink, Severity,
    StrictSink,
};
pub use progress::{NoOpProgressHandler, ProgressHandler};
pub use rules::default_runner;
pub use schedule::{DailyService, InterpolatedStop, Schedule, ScheduleError, ValidationState};
pub use stop_time_store::{
    MemoryBackend, SpillBackend, StopTimeBackend, StopTimeStore, StopVisit, StoreError,
};
pub use validator::{PassError, PassStage, Validator, ValidatorRunner};
pub use writer::{FeedWriter, Table, WriteError};

pub use transitfeed_model as model;
