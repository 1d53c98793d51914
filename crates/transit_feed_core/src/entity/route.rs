use transitfeed_model::{is_valid_url, parse_non_negative_int, FeedId, GtfsColor, RouteType};

use super::{id, optional_id, optional_text, parse_cell, require, text, ExtraFields, FeedRecord};
use crate::csv_reader::{TableRow, TableSchema};
use crate::problems::{Aborted, Problem, ProblemSink};

const MAX_SHORT_NAME_CHARS: usize = 6;
/// Smallest luminance difference between route_color and route_text_color.
const MIN_COLOR_CONTRAST: f64 = 510.0 / 7.0;

const COLOR_FORMAT_HINT: &str = "which consists of 6 hexadecimal characters representing the \
                                 RGB values. Example: 44AA06";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Route {
    pub route_id: FeedId,
    pub route_short_name: String,
    pub route_long_name: String,
    pub route_type: Option<RouteType>,
    pub agency_id: Option<FeedId>,
    pub route_desc: Option<String>,
    pub route_url: Option<String>,
    pub route_color: Option<String>,
    pub route_text_color: Option<String>,
    pub extra: ExtraFields,
}

impl Route {
    pub fn new(route_id: &str, short_name: &str, long_name: &str, route_type: RouteType) -> Self {
        Self {
            route_id: FeedId::from(route_id),
            route_short_name: short_name.to_string(),
            route_long_name: long_name.to_string(),
            route_type: Some(route_type),
            ..Self::default()
        }
    }

    pub fn from_row(row: &TableRow, sink: &mut dyn ProblemSink) -> Result<Self, Aborted> {
        let route_type = parse_cell(row, "route_type", None, sink, |value| {
            parse_non_negative_int(value)
                .ok()
                .and_then(|value| i32::try_from(value).ok())
        })?
        .map(RouteType::from_i32);
        Ok(Self {
            route_id: id(row, "route_id"),
            route_short_name: text(row, "route_short_name"),
            route_long_name: text(row, "route_long_name"),
            route_type,
            agency_id: optional_id(row, "agency_id"),
            route_desc: optional_text(row, "route_desc"),
            route_url: optional_text(row, "route_url"),
            route_color: optional_text(row, "route_color"),
            route_text_color: optional_text(row, "route_text_color"),
            extra: row.extras(&Self::SCHEMA),
        })
    }

    /// Highest plausible speed for trips of this route; tram speed when the type is unset.
    pub fn max_speed_kph(&self) -> f64 {
        self.route_type
            .unwrap_or(RouteType::Tram)
            .max_speed_kph()
    }

    fn check_color(
        column: &str,
        value: Option<&String>,
        default: GtfsColor,
        sink: &mut dyn ProblemSink,
    ) -> Result<f64, Aborted> {
        let Some(value) = value else {
            return Ok(default.luminance());
        };
        match GtfsColor::parse(value) {
            Ok(color) => Ok(color.luminance()),
            Err(_) => {
                let separator = if column == "route_text_color" { ", " } else { " " };
                let reason =
                    format!("{column} should be a valid color description{separator}{COLOR_FORMAT_HINT}");
                sink.report(Problem::invalid_value(column, value, Some(&reason)))?;
                Ok(default.luminance())
            }
        }
    }
}

impl FeedRecord for Route {
    const SCHEMA: TableSchema = TableSchema {
        file_name: "routes.txt",
        columns: &[
            "route_id",
            "route_short_name",
            "route_long_name",
            "route_type",
            "agency_id",
            "route_desc",
            "route_url",
            "route_color",
            "route_text_color",
        ],
        required: &["route_id", "route_short_name", "route_long_name", "route_type"],
    };

    fn field_value(&self, column: &str) -> Option<String> {
        match column {
            "route_id" => Some(self.route_id.to_string()),
            "route_short_name" => Some(self.route_short_name.clone()),
            "route_long_name" => Some(self.route_long_name.clone()),
            "route_type" => self.route_type.map(|kind| kind.as_i32().to_string()),
            "agency_id" => self.agency_id.as_ref().map(FeedId::to_string),
            "route_desc" => self.route_desc.clone(),
            "route_url" => self.route_url.clone(),
            "route_color" => self.route_color.clone(),
            "route_text_color" => self.route_text_color.clone(),
            _ => None,
        }
    }

    fn extra(&self) -> &ExtraFields {
        &self.extra
    }

    fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
        require("route_id", &self.route_id, sink)?;
        if self.route_type.is_none() {
            sink.report(Problem::missing_value("route_type", None))?;
        }

        let short_name = self.route_short_name.trim();
        let long_name = self.route_long_name.trim();
        if short_name.is_empty() && long_name.is_empty() {
            sink.report(Problem::invalid_value(
                "route_short_name",
                &self.route_short_name,
                Some("Both route_short_name and route_long name are blank."),
            ))?;
        }
        if self.route_short_name.chars().count() > MAX_SHORT_NAME_CHARS {
            sink.report(
                Problem::invalid_value(
                    "route_short_name",
                    &self.route_short_name,
                    Some(
                        "This route_short_name is relatively long, which probably means \
                         that it contains a place name.  You should only use this field to \
                         hold a short code that riders use to identify a route.  If this \
                         route doesn't have such a code, it's OK to leave this field empty.",
                    ),
                )
                .warning(),
            )?;
        }
        if !short_name.is_empty() && !long_name.is_empty() {
            let short_lower = short_name.to_lowercase();
            let long_lower = long_name.to_lowercase();
            let restates_short = [' ', '(', '-'].iter().any(|separator| {
                long_lower.starts_with(&format!("{short_lower}{separator}"))
            });
            if restates_short {
                sink.report(
                    Problem::invalid_value(
                        "route_long_name",
                        &self.route_long_name,
                        Some(
                            "route_long_name shouldn't contain the route_short_name value, \
                             as both fields are often displayed side-by-side.",
                        ),
                    )
                    .warning(),
                )?;
            }
            if long_lower == short_lower {
                sink.report(
                    Problem::invalid_value(
                        "route_long_name",
                        &self.route_long_name,
                        Some(
                            "route_long_name shouldn't be the same the route_short_name \
                             value, as both fields are often displayed side-by-side.  It's OK \
                             to omit either the short or long name (but not both).",
                        ),
                    )
                    .warning(),
                )?;
            }
        }
        if let Some(desc) = &self.route_desc {
            if *desc == self.route_short_name || *desc == self.route_long_name {
                sink.report(Problem::invalid_value(
                    "route_desc",
                    desc,
                    Some("route_desc shouldn't be the same as route_short_name or route_long_name"),
                ))?;
            }
        }

        if let Some(kind) = self.route_type {
            if !kind.is_known() {
                sink.report(Problem::invalid_value("route_type", kind.as_i32(), None).warning())?;
            }
        }
        if let Some(url) = &self.route_url {
            if !is_valid_url(url) {
                sink.report(Problem::invalid_value("route_url", url, None))?;
            }
        }

        let background =
            Self::check_color("route_color", self.route_color.as_ref(), GtfsColor::WHITE, sink)?;
        let text = Self::check_color(
            "route_text_color",
            self.route_text_color.as_ref(),
            GtfsColor::BLACK,
            sink,
        )?;
        if (text - background).abs() < MIN_COLOR_CONTRAST {
            sink.report(
                Problem::invalid_value(
                    "route_color",
                    self.route_color.as_deref().unwrap_or_default(),
                    Some(
                        "The route_text_color and route_color should be set to contrasting \
                         colors, as they are used as the text and background color \
                         (respectively) for displaying route names.  When left blank, \
                         route_text_color defaults to 000000 (black) and route_color defaults \
                         to FFFFFF (white).  A common source of issues here is setting \
                         route_color to a dark color, while leaving route_text_color set to \
                         black.  In this case, route_text_color should be set to a lighter \
                         color like FFFFFF to ensure a legible contrast between the two.",
                    ),
                )
                .warning(),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::testing::row;
    use crate::problems::{ProblemAccumulator, ProblemKind, Severity};

    fn problems(route: &Route) -> Vec<(String, Severity)> {
        let mut sink = ProblemAccumulator::new();
        route.validate(&mut sink).unwrap();
        sink.iter()
            .map(|problem| (problem.field.clone().unwrap_or_default(), problem.severity))
            .collect()
    }

    #[test]
    fn parses_route_row() {
        let row = row(
            Route::SCHEMA,
            "route_id,agency_id,route_short_name,route_long_name,route_type,route_color\n\
             AB,DTA,10,Airport - Bullfrog,3,FFFFFF\n",
        );
        let mut sink = ProblemAccumulator::new();
        let route = Route::from_row(&row, &mut sink).unwrap();
        assert_eq!(route.route_type, Some(RouteType::Bus));
        assert_eq!(route.agency_id.as_deref(), Some("DTA"));
        assert!(problems(&route).is_empty());
    }

    #[test]
    fn rejects_non_integer_route_type() {
        let row = row(
            Route::SCHEMA,
            "route_id,route_short_name,route_long_name,route_type\nAB,10,Airport,bus\n",
        );
        let mut sink = ProblemAccumulator::new();
        let route = Route::from_row(&row, &mut sink).unwrap();
        assert_eq!(route.route_type, None);
        assert_eq!(sink.count_of(ProblemKind::InvalidValue), 1);
    }

    #[test]
    fn requires_some_name() {
        let route = Route::new("AB", "", " ", RouteType::Bus);
        assert_eq!(
            problems(&route),
            vec![("route_short_name".to_string(), Severity::Error)]
        );
    }

    #[test]
    fn warns_about_long_short_name_and_restated_names() {
        let route = Route::new("AB", "Bullfrog", "bullfrog (express)", RouteType::Bus);
        assert_eq!(
            problems(&route),
            vec![
                ("route_short_name".to_string(), Severity::Warning),
                ("route_long_name".to_string(), Severity::Warning),
            ]
        );
        let same = Route::new("AB", "10", "10", RouteType::Bus);
        assert_eq!(
            problems(&same),
            vec![("route_long_name".to_string(), Severity::Warning)]
        );
    }

    #[test]
    fn description_must_differ_from_names() {
        let mut route = Route::new("AB", "10", "Airport", RouteType::Bus);
        route.route_desc = Some("Airport".to_string());
        assert_eq!(problems(&route), vec![("route_desc".to_string(), Severity::Error)]);
    }

    #[test]
    fn unknown_route_type_is_a_warning() {
        let route = Route::new("AB", "10", "Airport", RouteType::from_i32(42));
        assert_eq!(problems(&route), vec![("route_type".to_string(), Severity::Warning)]);
        assert_eq!(route.max_speed_kph(), 100.0);
    }

    #[test]
    fn checks_colors_and_contrast() {
        let mut route = Route::new("AB", "10", "Airport", RouteType::Bus);
        route.route_color = Some("FFFFF".to_string());
        route.route_text_color = Some("zzzzzz".to_string());
        let found = problems(&route);
        assert_eq!(found[0], ("route_color".to_string(), Severity::Error));
        assert_eq!(found[1], ("route_text_color".to_string(), Severity::Error));

        let mut dark = Route::new("AB", "10", "Airport", RouteType::Bus);
        dark.route_color = Some("000000".to_string());
        assert_eq!(problems(&dark), vec![("route_color".to_string(), Severity::Warning)]);

        dark.route_text_color = Some("FFFFFF".to_string());
        assert!(problems(&dark).is_empty());
    }
}
