use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// Knobs for the validation passes that run after loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    /// Reference date for expiration checks; local today when unset.
    pub today: Option<NaiveDate>,
    /// Minimum run of consecutive days without departures that is reported.
    pub service_gap_interval: Option<u32>,
    pub check_duplicate_trips: bool,
    /// Warn about stations that no stop names as its parent.
    pub require_station_usage: bool,
    /// How many problems of each kind are kept in the ranked summary.
    pub problem_rank_limit: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            today: None,
            service_gap_interval: None,
            check_duplicate_trips: false,
            require_station_usage: false,
            problem_rank_limit: 10,
        }
    }
}

impl ValidationOptions {
    pub fn reference_date(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }
}

/// Where stop times live while the schedule is in use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTimeStorage {
    #[default]
    Memory,
    /// An SQLite file inside `dir`, removed when the schedule is dropped.
    Spill { dir: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub stop_time_storage: StopTimeStorage,
    pub load_stop_times: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            stop_time_storage: StopTimeStorage::Memory,
            load_stop_times: true,
        }
    }
}
