use transitfeed_model::{is_currency_code, parse_decimal, FeedId, PaymentMethod};

use super::{
    format_decimal, id, optional_id, parse_cell, parse_int, require, text, ExtraFields, FeedRecord,
};
use crate::csv_reader::{TableRow, TableSchema};
use crate::problems::{Aborted, Problem, ProblemSink};

/// A fare from fare_attributes.txt together with the rules that select it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fare {
    pub fare_id: FeedId,
    pub price: Option<f64>,
    pub currency_type: String,
    pub payment_method: Option<PaymentMethod>,
    /// `None` means unlimited transfers.
    pub transfers: Option<u8>,
    pub transfer_duration: Option<u32>,
    pub rules: Vec<FareRule>,
    pub extra: ExtraFields,
}

impl Fare {
    pub fn new(fare_id: &str, price: f64, currency_type: &str, payment_method: PaymentMethod) -> Self {
        Self {
            fare_id: FeedId::from(fare_id),
            price: Some(price),
            currency_type: currency_type.to_string(),
            payment_method: Some(payment_method),
            ..Self::default()
        }
    }

    pub fn from_row(row: &TableRow, sink: &mut dyn ProblemSink) -> Result<Self, Aborted> {
        let price = parse_cell(row, "price", None, sink, |value| {
            parse_decimal(value).ok().filter(|price| *price >= 0.0)
        })?;
        let payment_method = parse_cell(row, "payment_method", None, sink, |value| {
            parse_int(value).and_then(PaymentMethod::from_i32)
        })?;
        let transfers = parse_cell(row, "transfers", None, sink, |value| {
            value.parse::<u8>().ok().filter(|transfers| *transfers <= 2)
        })?;
        let transfer_duration = parse_cell(row, "transfer_duration", None, sink, |value| {
            value.parse::<u32>().ok()
        })?;
        Ok(Self {
            fare_id: id(row, "fare_id"),
            price,
            currency_type: text(row, "currency_type"),
            payment_method,
            transfers,
            transfer_duration,
            rules: Vec::new(),
            extra: row.extras(&Self::SCHEMA),
        })
    }

    pub fn clear_rules(&mut self) {
        self.rules.clear();
    }
}

impl FeedRecord for Fare {
    const SCHEMA: TableSchema = TableSchema {
        file_name: "fare_attributes.txt",
        columns: &[
            "fare_id",
            "price",
            "currency_type",
            "payment_method",
            "transfers",
            "transfer_duration",
        ],
        required: &[
            "fare_id",
            "price",
            "currency_type",
            "payment_method",
            "transfers",
        ],
    };

    fn field_value(&self, column: &str) -> Option<String> {
        match column {
            "fare_id" => Some(self.fare_id.to_string()),
            "price" => self.price.map(format_decimal),
            "currency_type" => Some(self.currency_type.clone()),
            "payment_method" => self.payment_method.map(|method| method.as_i32().to_string()),
            "transfers" => self.transfers.map(|transfers| transfers.to_string()),
            "transfer_duration" => self.transfer_duration.map(|secs| secs.to_string()),
            _ => None,
        }
    }

    fn extra(&self) -> &ExtraFields {
        &self.extra
    }

    fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
        require("fare_id", &self.fare_id, sink)?;
        if self.price.is_none() {
            sink.report(Problem::missing_value("price", None))?;
        }
        if require("currency_type", &self.currency_type, sink)?
            && !is_currency_code(&self.currency_type)
        {
            sink.report(Problem::invalid_value("currency_type", &self.currency_type, None))?;
        }
        if self.payment_method.is_none() {
            sink.report(Problem::missing_value("payment_method", None))?;
        }
        if let Some(duration) = self.transfer_duration {
            if duration > 0 && self.transfers == Some(0) {
                sink.report(Problem::invalid_value(
                    "transfer_duration",
                    duration,
                    Some("can't have a nonzero transfer_duration for a fare that doesn't allow transfers!"),
                ))?;
            }
        }
        Ok(())
    }
}

/// A condition under which a fare applies. Blank references mean "any".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FareRule {
    pub fare_id: FeedId,
    pub route_id: Option<FeedId>,
    pub origin_id: Option<FeedId>,
    pub destination_id: Option<FeedId>,
    pub contains_id: Option<FeedId>,
    pub extra: ExtraFields,
}

impl FareRule {
    pub fn new(fare_id: &str) -> Self {
        Self {
            fare_id: FeedId::from(fare_id),
            ..Self::default()
        }
    }

    pub fn from_row(row: &TableRow) -> Self {
        Self {
            fare_id: id(row, "fare_id"),
            route_id: optional_id(row, "route_id"),
            origin_id: optional_id(row, "origin_id"),
            destination_id: optional_id(row, "destination_id"),
            contains_id: optional_id(row, "contains_id"),
            extra: row.extras(&Self::SCHEMA),
        }
    }

    /// The zone references of this rule with their column names.
    pub fn zone_references(&self) -> impl Iterator<Item = (&'static str, &FeedId)> {
        [
            ("origin_id", self.origin_id.as_ref()),
            ("destination_id", self.destination_id.as_ref()),
            ("contains_id", self.contains_id.as_ref()),
        ]
        .into_iter()
        .filter_map(|(column, zone)| zone.map(|zone| (column, zone)))
    }
}

impl FeedRecord for FareRule {
    const SCHEMA: TableSchema = TableSchema {
        file_name: "fare_rules.txt",
        columns: &[
            "fare_id",
            "route_id",
            "origin_id",
            "destination_id",
            "contains_id",
        ],
        required: &["fare_id"],
    };

    fn field_value(&self, column: &str) -> Option<String> {
        let value = match column {
            "fare_id" => Some(&self.fare_id),
            "route_id" => self.route_id.as_ref(),
            "origin_id" => self.origin_id.as_ref(),
            "destination_id" => self.destination_id.as_ref(),
            "contains_id" => self.contains_id.as_ref(),
            _ => None,
        };
        value.map(FeedId::to_string)
    }

    fn extra(&self) -> &ExtraFields {
        &self.extra
    }

    fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
        require("fare_id", &self.fare_id, sink)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::testing::row;
    use crate::problems::{ProblemAccumulator, ProblemKind};

    const HEADER: &str = "fare_id,price,currency_type,payment_method,transfers,transfer_duration\n";

    fn parse(line: &str) -> (Fare, ProblemAccumulator) {
        let row = row(Fare::SCHEMA, &format!("{HEADER}{line}\n"));
        let mut sink = ProblemAccumulator::new();
        let fare = Fare::from_row(&row, &mut sink).unwrap();
        (fare, sink)
    }

    #[test]
    fn parses_fare_row() {
        let (fare, sink) = parse("p,1.25,USD,0,,");
        assert!(sink.is_empty());
        assert_eq!(fare.price, Some(1.25));
        assert_eq!(fare.transfers, None);
        assert_eq!(fare.cell("payment_method"), "0");
        assert_eq!(fare.cell("transfers"), "");

        let mut sink = ProblemAccumulator::new();
        fare.validate(&mut sink).unwrap();
        assert!(sink.is_empty());
    }

    #[test]
    fn reports_unparsable_fare_values() {
        let (_, sink) = parse("p,-1,USD,2,3,-60");
        let fields: Vec<_> = sink.iter().map(|problem| problem.field.clone().unwrap()).collect();
        assert_eq!(
            fields,
            vec!["price", "payment_method", "transfers", "transfer_duration"]
        );
    }

    #[test]
    fn checks_currency_and_required_values() {
        let (fare, _) = parse("p,,usd,,0,60");
        let mut sink = ProblemAccumulator::new();
        fare.validate(&mut sink).unwrap();
        let found: Vec<_> = sink
            .iter()
            .map(|problem| (problem.kind, problem.field.clone().unwrap()))
            .collect();
        assert_eq!(
            found,
            vec![
                (ProblemKind::MissingValue, "price".to_string()),
                (ProblemKind::InvalidValue, "currency_type".to_string()),
                (ProblemKind::MissingValue, "payment_method".to_string()),
                (ProblemKind::InvalidValue, "transfer_duration".to_string()),
            ]
        );
        assert!(sink.problems()[3].message.contains("doesn't allow transfers"));
    }

    #[test]
    fn lists_zone_references() {
        let row = row(
            FareRule::SCHEMA,
            "fare_id,route_id,origin_id,destination_id\na,AB,zone_1,\n",
        );
        let rule = FareRule::from_row(&row);
        assert_eq!(rule.route_id.as_deref(), Some("AB"));
        let zones: Vec<_> = rule
            .zone_references()
            .map(|(column, zone)| (column, zone.to_string()))
            .collect();
        assert_eq!(zones, vec![("origin_id", "zone_1".to_string())]);
    }
}
