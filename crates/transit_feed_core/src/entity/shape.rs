use transitfeed_model::{parse_decimal, FeedId};

use super::{format_decimal, require, ExtraFields};
use crate::csv_reader::TableSchema;
use crate::problems::{Aborted, Problem, ProblemSink};

#[derive(Debug, Clone, PartialEq)]
pub struct ShapePoint {
    pub lat: f64,
    pub lon: f64,
    pub distance: Option<f64>,
    pub extra: ExtraFields,
}

impl ShapePoint {
    pub fn new(lat: f64, lon: f64, distance: Option<f64>) -> Self {
        Self {
            lat,
            lon,
            distance,
            extra: ExtraFields::default(),
        }
    }
}

/// A polyline traced by trips, kept in point order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shape {
    pub shape_id: FeedId,
    points: Vec<ShapePoint>,
    max_distance: f64,
}

impl Shape {
    pub const SCHEMA: TableSchema = TableSchema {
        file_name: "shapes.txt",
        columns: &[
            "shape_id",
            "shape_pt_lat",
            "shape_pt_lon",
            "shape_pt_sequence",
            "shape_dist_traveled",
        ],
        required: &["shape_id", "shape_pt_lat", "shape_pt_lon", "shape_pt_sequence"],
    };

    pub fn new(shape_id: &str) -> Self {
        Self {
            shape_id: FeedId::from(shape_id),
            ..Self::default()
        }
    }

    pub fn points(&self) -> &[ShapePoint] {
        &self.points
    }

    /// Largest shape_dist_traveled seen so far, 0 when no point carries one.
    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    pub fn clear_points(&mut self) {
        self.points.clear();
        self.max_distance = 0.0;
    }

    /// Appends a point given as feed text. Returns whether it was kept.
    pub fn add_point_text(
        &mut self,
        lat: &str,
        lon: &str,
        distance: &str,
        extra: ExtraFields,
        sink: &mut dyn ProblemSink,
    ) -> Result<bool, Aborted> {
        let Ok(lat_value) = parse_decimal(lat.trim()) else {
            sink.report(Problem::invalid_value("shape_pt_lat", lat, None))?;
            return Ok(false);
        };
        let Ok(lon_value) = parse_decimal(lon.trim()) else {
            sink.report(Problem::invalid_value("shape_pt_lon", lon, None))?;
            return Ok(false);
        };
        let distance = distance.trim();
        let distance_value = if distance.is_empty() {
            None
        } else {
            match parse_decimal(distance) {
                Ok(value) => Some(value),
                Err(_) => {
                    sink.report(Problem::invalid_value(
                        "shape_dist_traveled",
                        distance,
                        Some("This value should be a positive number."),
                    ))?;
                    return Ok(false);
                }
            }
        };
        let mut point = ShapePoint::new(lat_value, lon_value, distance_value);
        point.extra = extra;
        self.add_point(point, sink)
    }

    /// Appends a point after range, null-island and distance ordering checks.
    pub fn add_point(&mut self, point: ShapePoint, sink: &mut dyn ProblemSink) -> Result<bool, Aborted> {
        if point.lat.abs() > 90.0 {
            sink.report(Problem::invalid_value("shape_pt_lat", point.lat, None))?;
            return Ok(false);
        }
        if point.lon.abs() > 180.0 {
            sink.report(Problem::invalid_value("shape_pt_lon", point.lon, None))?;
            return Ok(false);
        }
        if point.lat.abs() < 1.0 && point.lon.abs() < 1.0 {
            sink.report(
                Problem::invalid_value(
                    "shape_pt_lat",
                    point.lat,
                    Some(
                        "Point location too close to 0, 0, which means that it's probably an \
                         incorrect location.",
                    ),
                )
                .warning(),
            )?;
            return Ok(false);
        }
        if let Some(distance) = point.distance {
            let first_at_zero = self.points.is_empty() && distance == 0.0;
            if distance < self.max_distance && !first_at_zero {
                sink.report(Problem::invalid_value(
                    "shape_dist_traveled",
                    distance,
                    Some(&format!(
                        "Each subsequent point in a shape should have a distance value that's \
                         at least as large as the previous ones.  In this case, the previous \
                         distance was {:.6}.",
                        self.max_distance
                    )),
                ))?;
                return Ok(false);
            }
            self.max_distance = distance;
        }
        self.points.push(point);
        Ok(true)
    }

    pub fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
        require("shape_id", &self.shape_id, sink)?;
        if self.points.is_empty() {
            sink.report(
                Problem::other(format!(
                    "The shape with shape_id \"{}\" contains no points.",
                    self.shape_id
                ))
                .warning(),
            )?;
        }
        Ok(())
    }

    /// Position along the polyline at `distance`, interpolated between the
    /// two bracketing points that carry a distance. Distances outside the
    /// known span clamp to the first or last such point. `None` when no point
    /// has a distance or the bracketing points share one.
    pub fn point_at_distance(&self, distance: f64) -> Option<ShapePoint> {
        let measured: Vec<&ShapePoint> = self
            .points
            .iter()
            .filter(|point| point.distance.is_some())
            .collect();
        let first = *measured.first()?;
        let last = *measured.last()?;
        if distance <= first.distance.unwrap_or_default() {
            return Some(first.clone());
        }
        if distance >= last.distance.unwrap_or_default() {
            return Some(last.clone());
        }
        let index = measured.partition_point(|point| point.distance.unwrap_or_default() <= distance);
        let before = measured[index - 1];
        let after = measured[index];
        let from_before = distance - before.distance.unwrap_or_default();
        let to_after = after.distance.unwrap_or_default() - distance;
        let span = from_before + to_after;
        if span == 0.0 {
            return None;
        }
        Some(ShapePoint::new(
            (after.lat * from_before + before.lat * to_after) / span,
            (after.lon * from_before + before.lon * to_after) / span,
            Some(distance),
        ))
    }

    /// Cell text for `column` of the point at `index`, numbering points from 1.
    pub fn point_cell(&self, index: usize, column: &str) -> String {
        let Some(point) = self.points.get(index) else {
            return String::new();
        };
        match column {
            "shape_id" => self.shape_id.to_string(),
            "shape_pt_lat" => format_decimal(point.lat),
            "shape_pt_lon" => format_decimal(point.lon),
            "shape_pt_sequence" => (index + 1).to_string(),
            "shape_dist_traveled" => point.distance.map(format_decimal).unwrap_or_default(),
            other => point.extra.get(other).unwrap_or_default().to_string(),
        }
    }
}
