use std::collections::HashSet;
use std::sync::OnceLock;

use transitfeed_model::{is_language_code, is_valid_url, FeedId};

use super::{optional_id, optional_text, require, text, ExtraFields, FeedRecord};
use crate::csv_reader::{TableRow, TableSchema};
use crate::problems::{Aborted, Problem, ProblemSink};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Agency {
    pub agency_name: String,
    pub agency_url: String,
    pub agency_timezone: String,
    pub agency_id: Option<FeedId>,
    pub agency_lang: Option<String>,
    pub agency_phone: Option<String>,
    pub extra: ExtraFields,
}

impl Agency {
    pub fn new(name: &str, url: &str, timezone: &str) -> Self {
        Self {
            agency_name: name.to_string(),
            agency_url: url.to_string(),
            agency_timezone: timezone.to_string(),
            ..Self::default()
        }
    }

    pub fn from_row(row: &TableRow) -> Self {
        Self {
            agency_name: text(row, "agency_name"),
            agency_url: text(row, "agency_url"),
            agency_timezone: text(row, "agency_timezone"),
            agency_id: optional_id(row, "agency_id"),
            agency_lang: optional_text(row, "agency_lang"),
            agency_phone: optional_text(row, "agency_phone"),
            extra: row.extras(&Self::SCHEMA),
        }
    }

    /// The key agencies are stored under; agencies without an id share the empty key.
    pub fn key(&self) -> FeedId {
        self.agency_id.clone().unwrap_or_default()
    }
}

impl FeedRecord for Agency {
    const SCHEMA: TableSchema = TableSchema {
        file_name: "agency.txt",
        columns: &[
            "agency_name",
            "agency_url",
            "agency_timezone",
            "agency_id",
            "agency_lang",
            "agency_phone",
        ],
        required: &["agency_name", "agency_url", "agency_timezone"],
    };

    fn field_value(&self, column: &str) -> Option<String> {
        match column {
            "agency_name" => Some(self.agency_name.clone()),
            "agency_url" => Some(self.agency_url.clone()),
            "agency_timezone" => Some(self.agency_timezone.clone()),
            "agency_id" => self.agency_id.as_ref().map(FeedId::to_string),
            "agency_lang" => self.agency_lang.clone(),
            "agency_phone" => self.agency_phone.clone(),
            _ => None,
        }
    }

    fn extra(&self) -> &ExtraFields {
        &self.extra
    }

    fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
        require("agency_name", &self.agency_name, sink)?;
        if require("agency_url", &self.agency_url, sink)? && !is_valid_url(&self.agency_url) {
            sink.report(Problem::invalid_value("agency_url", &self.agency_url, None))?;
        }
        if require("agency_timezone", &self.agency_timezone, sink)?
            && !is_known_timezone(&self.agency_timezone)
        {
            sink.report(Problem::invalid_value(
                "agency_timezone",
                &self.agency_timezone,
                Some(
                    "This is not a known Olson time zone name. See the tz database \
                     (e.g. America/Los_Angeles) for valid values.",
                ),
            ))?;
        }
        if let Some(lang) = &self.agency_lang {
            if !is_language_code(lang) {
                sink.report(Problem::invalid_value("agency_lang", lang, None))?;
            }
        }
        Ok(())
    }
}

/// Whether `zone` names a zone in the host's tz tables. Every zone is
/// accepted when the host has no tables.
pub fn is_known_timezone(zone: &str) -> bool {
    let zones = known_timezones();
    zones.is_empty() || zones.contains(zone)
}

fn known_timezones() -> &'static HashSet<String> {
    static TIMEZONES: OnceLock<HashSet<String>> = OnceLock::new();
    TIMEZONES.get_or_init(|| {
        let mut zones = HashSet::new();
        for path in [
            "/usr/share/zoneinfo/zone1970.tab",
            "/usr/share/zoneinfo/zone.tab",
        ] {
            let Ok(contents) = std::fs::read_to_string(path) else {
                continue;
            };
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some(name) = line.split('\t').nth(2) {
                    zones.insert(name.trim().to_string());
                }
            }
            if !zones.is_empty() {
                break;
            }
        }
        if !zones.is_empty() {
            zones.insert("UTC".to_string());
        }
        zones
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::testing::row;
    use crate::problems::{ProblemAccumulator, ProblemKind};

    #[test]
    fn reads_agency_row() {
        let row = row(
            Agency::SCHEMA,
            "agency_id,agency_name,agency_url,agency_timezone,agency_lang,ticket_office\n\
             DTA,Demo Transit,http://example.com,America/Los_Angeles,EN,Main St\n",
        );
        let agency = Agency::from_row(&row);
        assert_eq!(agency.agency_id.as_deref(), Some("DTA"));
        assert_eq!(agency.extra.get("ticket_office"), Some("Main St"));

        let mut sink = ProblemAccumulator::new();
        agency.validate(&mut sink).unwrap();
        assert!(sink.is_empty(), "{:?}", sink.problems());
    }

    #[test]
    fn reports_missing_and_invalid_fields() {
        let mut agency = Agency::new("", "example.com", "America/Los_Angeles");
        agency.agency_lang = Some("xx".to_string());
        let mut sink = ProblemAccumulator::new();
        agency.validate(&mut sink).unwrap();

        let fields: Vec<_> = sink
            .iter()
            .map(|problem| (problem.kind, problem.field.clone().unwrap()))
            .collect();
        assert_eq!(
            fields,
            vec![
                (ProblemKind::MissingValue, "agency_name".to_string()),
                (ProblemKind::InvalidValue, "agency_url".to_string()),
                (ProblemKind::InvalidValue, "agency_lang".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_unknown_timezone_when_tables_exist() {
        if known_timezones().is_empty() {
            return;
        }
        let agency = Agency::new("Demo", "http://example.com", "Mars/Olympus_Mons");
        let mut sink = ProblemAccumulator::new();
        agency.validate(&mut sink).unwrap();
        assert_eq!(sink.count_of(ProblemKind::InvalidValue), 1);
        assert!(is_known_timezone("UTC"));
    }
}
