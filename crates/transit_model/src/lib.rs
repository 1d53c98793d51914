use std::fmt;
use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod codes;
pub mod geo;

pub use codes::{is_currency_code, is_language_code};
pub use compact_str::CompactString;
pub use geo::{approximate_distance, EARTH_RADIUS_M};

/// Identifier type used for every entity key in a feed.
pub type FeedId = CompactString;

#[derive(Debug, thiserror::Error)]
pub enum GtfsParseError {
    #[error("invalid date format: {0}")]
    InvalidDateFormat(String),
    #[error("invalid date value: {0}")]
    InvalidDateValue(String),
    #[error("invalid time format: {0}")]
    InvalidTimeFormat(String),
    #[error("invalid color format: {0}")]
    InvalidColorFormat(String),
    #[error("invalid number: {0}")]
    InvalidNumber(String),
}

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,3}):([0-5]\d):([0-5]\d)$").expect("valid time regex")
    })
}

fn float_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[+-]?\d+(\.\d+)?$").expect("valid float regex"))
}

fn non_negative_int_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(?:0|[1-9]\d*)$").expect("valid integer regex"))
}

/// Parses a plain decimal number. Exponents, `inf` and `NaN` are rejected.
pub fn parse_decimal(value: &str) -> Result<f64, GtfsParseError> {
    if !float_pattern().is_match(value) {
        return Err(GtfsParseError::InvalidNumber(value.to_string()));
    }
    value
        .parse()
        .map_err(|_| GtfsParseError::InvalidNumber(value.to_string()))
}

/// Parses an integer without sign or leading zeros.
pub fn parse_non_negative_int(value: &str) -> Result<u32, GtfsParseError> {
    if !non_negative_int_pattern().is_match(value) {
        return Err(GtfsParseError::InvalidNumber(value.to_string()));
    }
    value
        .parse()
        .map_err(|_| GtfsParseError::InvalidNumber(value.to_string()))
}

/// Accepts only absolute `http://` and `https://` URLs with a host.
pub fn is_valid_url(value: &str) -> bool {
    (value.starts_with("http://") || value.starts_with("https://"))
        && url::Url::parse(value).is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GtfsDate {
    date: NaiveDate,
}

impl GtfsDate {
    pub fn parse(value: &str) -> Result<Self, GtfsParseError> {
        if value.len() != 8 || !value.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(GtfsParseError::InvalidDateFormat(value.to_string()));
        }

        let year: i32 = value[0..4]
            .parse()
            .map_err(|_| GtfsParseError::InvalidDateFormat(value.to_string()))?;
        let month: u32 = value[4..6]
            .parse()
            .map_err(|_| GtfsParseError::InvalidDateFormat(value.to_string()))?;
        let day: u32 = value[6..8]
            .parse()
            .map_err(|_| GtfsParseError::InvalidDateFormat(value.to_string()))?;

        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self::from_naive)
            .ok_or_else(|| GtfsParseError::InvalidDateValue(value.to_string()))
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self { date }
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self::from_naive)
    }

    pub fn naive(&self) -> NaiveDate {
        self.date
    }

    pub fn weekday(&self) -> Weekday {
        self.date.weekday()
    }

    /// Index into a Monday-first week, as used by calendar.txt columns.
    pub fn weekday_index(&self) -> usize {
        self.date.weekday().num_days_from_monday() as usize
    }

    pub fn add_days(&self, days: i64) -> Self {
        Self {
            date: self.date + Duration::days(days),
        }
    }

    pub fn succ(&self) -> Self {
        self.add_days(1)
    }

    pub fn days_until(&self, other: GtfsDate) -> i64 {
        (other.date - self.date).num_days()
    }

    /// Human form used in expiration messages, e.g. `December 31, 2007`.
    pub fn long_form(&self) -> String {
        self.date.format("%B %d, %Y").to_string()
    }
}

impl fmt::Display for GtfsDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}{:02}{:02}",
            self.date.year(),
            self.date.month(),
            self.date.day()
        )
    }
}

impl From<NaiveDate> for GtfsDate {
    fn from(date: NaiveDate) -> Self {
        Self::from_naive(date)
    }
}

impl Serialize for GtfsDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for GtfsDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GtfsDateVisitor;

        impl<'de> Visitor<'de> for GtfsDateVisitor {
            type Value = GtfsDate;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a date in YYYYMMDD format")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<GtfsDate, E> {
                GtfsDate::parse(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(GtfsDateVisitor)
    }
}

/// Seconds since the start of the service day; may exceed 24 hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GtfsTime {
    total_seconds: i32,
}

impl GtfsTime {
    pub fn from_seconds(total_seconds: i32) -> Self {
        Self { total_seconds }
    }

    /// Accepts `H:MM:SS` through `HHH:MM:SS`. Surrounding whitespace is rejected.
    pub fn parse(value: &str) -> Result<Self, GtfsParseError> {
        let captures = time_pattern()
            .captures(value)
            .ok_or_else(|| GtfsParseError::InvalidTimeFormat(value.to_string()))?;
        let field = |index: usize| -> Result<i32, GtfsParseError> {
            captures[index]
                .parse()
                .map_err(|_| GtfsParseError::InvalidTimeFormat(value.to_string()))
        };
        Ok(Self {
            total_seconds: field(1)? * 3600 + field(2)? * 60 + field(3)?,
        })
    }

    pub fn total_seconds(&self) -> i32 {
        self.total_seconds
    }

    pub fn hours(&self) -> i32 {
        self.total_seconds / 3600
    }

    pub fn minutes(&self) -> i32 {
        (self.total_seconds % 3600) / 60
    }

    pub fn seconds(&self) -> i32 {
        self.total_seconds % 60
    }
}

impl fmt::Display for GtfsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hours(),
            self.minutes(),
            self.seconds()
        )
    }
}

impl Serialize for GtfsTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for GtfsTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GtfsTimeVisitor;

        impl<'de> Visitor<'de> for GtfsTimeVisitor {
            type Value = GtfsTime;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a time in HH:MM:SS format")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<GtfsTime, E> {
                GtfsTime::parse(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(GtfsTimeVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GtfsColor {
    rgb: u32,
}

impl GtfsColor {
    pub const BLACK: GtfsColor = GtfsColor { rgb: 0x000000 };
    pub const WHITE: GtfsColor = GtfsColor { rgb: 0xFFFFFF };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self {
            rgb: (r as u32) << 16 | (g as u32) << 8 | (b as u32),
        }
    }

    pub fn parse(value: &str) -> Result<Self, GtfsParseError> {
        if value.len() != 6 || !value.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(GtfsParseError::InvalidColorFormat(value.to_string()));
        }

        let rgb = u32::from_str_radix(value, 16)
            .map_err(|_| GtfsParseError::InvalidColorFormat(value.to_string()))?;
        Ok(Self { rgb })
    }

    pub fn rgb(&self) -> u32 {
        self.rgb
    }

    /// Brightness between 0.0 (black) and 255.0 (white), weighted 299/587/114.
    pub fn luminance(&self) -> f64 {
        let r = ((self.rgb >> 16) & 0xFF) as f64;
        let g = ((self.rgb >> 8) & 0xFF) as f64;
        let b = (self.rgb & 0xFF) as f64;
        (299.0 * r + 587.0 * g + 114.0 * b) / 1000.0
    }
}

impl fmt::Display for GtfsColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.rgb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LocationType {
    #[default]
    Stop,
    Station,
    Unknown(i32),
}

impl LocationType {
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => LocationType::Stop,
            1 => LocationType::Station,
            other => LocationType::Unknown(other),
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            LocationType::Stop => 0,
            LocationType::Station => 1,
            LocationType::Unknown(value) => *value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteType {
    Tram,
    Subway,
    Rail,
    Bus,
    Ferry,
    CableCar,
    Gondola,
    Funicular,
    Unknown(i32),
}

impl RouteType {
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => RouteType::Tram,
            1 => RouteType::Subway,
            2 => RouteType::Rail,
            3 => RouteType::Bus,
            4 => RouteType::Ferry,
            5 => RouteType::CableCar,
            6 => RouteType::Gondola,
            7 => RouteType::Funicular,
            other => RouteType::Unknown(other),
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            RouteType::Tram => 0,
            RouteType::Subway => 1,
            RouteType::Rail => 2,
            RouteType::Bus => 3,
            RouteType::Ferry => 4,
            RouteType::CableCar => 5,
            RouteType::Gondola => 6,
            RouteType::Funicular => 7,
            RouteType::Unknown(value) => *value,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, RouteType::Unknown(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            RouteType::Tram => "Tram",
            RouteType::Subway => "Subway",
            RouteType::Rail => "Rail",
            RouteType::Bus => "Bus",
            RouteType::Ferry => "Ferry",
            RouteType::CableCar => "Cable Car",
            RouteType::Gondola => "Gondola",
            RouteType::Funicular => "Funicular",
            RouteType::Unknown(_) => "Unknown",
        }
    }

    /// Highest plausible speed between two stops. Unknown types fall back to tram.
    pub fn max_speed_kph(&self) -> f64 {
        match self {
            RouteType::Tram | RouteType::Bus | RouteType::Unknown(_) => 100.0,
            RouteType::Subway => 150.0,
            RouteType::Rail => 300.0,
            RouteType::Ferry => 80.0,
            RouteType::CableCar | RouteType::Gondola | RouteType::Funicular => 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionType {
    Added,
    Removed,
}

impl ExceptionType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(ExceptionType::Added),
            2 => Some(ExceptionType::Removed),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            ExceptionType::Added => 1,
            ExceptionType::Removed => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectionId {
    Direction0,
    Direction1,
}

impl DirectionId {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "0" => Some(DirectionId::Direction0),
            "1" => Some(DirectionId::Direction1),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DirectionId::Direction0 => "0",
            DirectionId::Direction1 => "1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransferType {
    #[default]
    Recommended,
    Timed,
    MinimumTime,
    NotPossible,
}

impl TransferType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(TransferType::Recommended),
            1 => Some(TransferType::Timed),
            2 => Some(TransferType::MinimumTime),
            3 => Some(TransferType::NotPossible),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            TransferType::Recommended => 0,
            TransferType::Timed => 1,
            TransferType::MinimumTime => 2,
            TransferType::NotPossible => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentMethod {
    OnBoard,
    BeforeBoarding,
}

impl PaymentMethod {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(PaymentMethod::OnBoard),
            1 => Some(PaymentMethod::BeforeBoarding),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            PaymentMethod::OnBoard => 0,
            PaymentMethod::BeforeBoarding => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PickupDropOffType {
    Regular,
    NotAvailable,
    MustPhone,
    MustCoordinateWithDriver,
}

impl PickupDropOffType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(PickupDropOffType::Regular),
            1 => Some(PickupDropOffType::NotAvailable),
            2 => Some(PickupDropOffType::MustPhone),
            3 => Some(PickupDropOffType::MustCoordinateWithDriver),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            PickupDropOffType::Regular => 0,
            PickupDropOffType::NotAvailable => 1,
            PickupDropOffType::MustPhone => 2,
            PickupDropOffType::MustCoordinateWithDriver => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gtfs_date() {
        let date = GtfsDate::parse("20071226").unwrap();
        assert_eq!(date.to_string(), "20071226");
        assert_eq!(date.weekday(), Weekday::Wed);
        assert_eq!(date.weekday_index(), 2);
        assert_eq!(date.succ().to_string(), "20071227");
        assert_eq!(date.long_form(), "December 26, 2007");
    }

    #[test]
    fn rejects_invalid_date() {
        assert!(matches!(
            GtfsDate::parse("2007-12-26"),
            Err(GtfsParseError::InvalidDateFormat(_))
        ));
        assert!(matches!(
            GtfsDate::parse("20070230"),
            Err(GtfsParseError::InvalidDateValue(_))
        ));
        assert!(GtfsDate::parse(" 20071226").is_err());
    }

    #[test]
    fn parses_gtfs_time() {
        let time = GtfsTime::parse("1:02:03").unwrap();
        assert_eq!(time.total_seconds(), 3723);
        assert_eq!(time.to_string(), "01:02:03");

        let late = GtfsTime::parse("100:00:00").unwrap();
        assert_eq!(late.hours(), 100);
    }

    #[test]
    fn rejects_invalid_time() {
        assert!(GtfsTime::parse("12:60:00").is_err());
        assert!(GtfsTime::parse("12:00").is_err());
        assert!(GtfsTime::parse("1000:00:00").is_err());
        assert!(GtfsTime::parse(" 12:00:00").is_err());
    }

    #[test]
    fn computes_color_luminance() {
        let color = GtfsColor::parse("ffffff").unwrap();
        assert_eq!(color, GtfsColor::WHITE);
        assert!((color.luminance() - 255.0).abs() < 1e-9);
        assert_eq!(GtfsColor::BLACK.luminance(), 0.0);
        assert_eq!(GtfsColor::new(0x44, 0xAA, 0x06).to_string(), "44AA06");
    }

    #[test]
    fn rejects_invalid_color() {
        assert!(GtfsColor::parse("fffff").is_err());
        assert!(GtfsColor::parse("gggggg").is_err());
        assert!(GtfsColor::parse("#fffff").is_err());
    }

    #[test]
    fn parses_numbers_strictly() {
        assert_eq!(parse_decimal("-12.5").unwrap(), -12.5);
        assert!(parse_decimal("1e5").is_err());
        assert!(parse_decimal("NaN").is_err());
        assert_eq!(parse_non_negative_int("42").unwrap(), 42);
        assert!(parse_non_negative_int("042").is_err());
        assert!(parse_non_negative_int("-1").is_err());
    }

    #[test]
    fn validates_urls() {
        assert!(is_valid_url("http://example.com/route"));
        assert!(is_valid_url("https://example.com"));
        assert!(!is_valid_url("ftp://example.com"));
        assert!(!is_valid_url("HTTP://example.com"));
        assert!(!is_valid_url("example.com"));
    }

    #[test]
    fn route_type_speed_limits() {
        assert_eq!(RouteType::from_i32(2).max_speed_kph(), 300.0);
        assert_eq!(RouteType::from_i32(42).max_speed_kph(), 100.0);
        assert!(!RouteType::from_i32(42).is_known());
        assert_eq!(RouteType::from_i32(5).name(), "Cable Car");
    }

    #[test]
    fn serializes_date_as_string() {
        let date = GtfsDate::parse("20240101").unwrap();
        assert_eq!(serde_json::to_string(&date).unwrap(), "\"20240101\"");
        let back: GtfsDate = serde_json::from_str("\"20240101\"").unwrap();
        assert_eq!(back, date);
    }
}
