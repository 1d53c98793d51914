use transitfeed_model::{parse_non_negative_int, FeedId, TransferType};

use super::{id, parse_cell, require, ExtraFields, FeedRecord};
use crate::csv_reader::{TableRow, TableSchema};
use crate::problems::{Aborted, ProblemSink};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transfer {
    pub from_stop_id: FeedId,
    pub to_stop_id: FeedId,
    pub transfer_type: TransferType,
    pub min_transfer_time: Option<u32>,
    pub extra: ExtraFields,
}

impl Transfer {
    pub fn new(from_stop_id: &str, to_stop_id: &str, transfer_type: TransferType) -> Self {
        Self {
            from_stop_id: FeedId::from(from_stop_id),
            to_stop_id: FeedId::from(to_stop_id),
            transfer_type,
            ..Self::default()
        }
    }

    /// A blank transfer_type reads as 0.
    pub fn from_row(row: &TableRow, sink: &mut dyn ProblemSink) -> Result<Self, Aborted> {
        let transfer_type = parse_cell(row, "transfer_type", None, sink, |value| {
            parse_non_negative_int(value)
                .ok()
                .and_then(|value| i32::try_from(value).ok())
                .and_then(TransferType::from_i32)
        })?
        .unwrap_or_default();
        let min_transfer_time = parse_cell(row, "min_transfer_time", None, sink, |value| {
            parse_non_negative_int(value).ok()
        })?;
        Ok(Self {
            from_stop_id: id(row, "from_stop_id"),
            to_stop_id: id(row, "to_stop_id"),
            transfer_type,
            min_transfer_time,
            extra: row.extras(&Self::SCHEMA),
        })
    }
}

impl FeedRecord for Transfer {
    const SCHEMA: TableSchema = TableSchema {
        file_name: "transfers.txt",
        columns: &["from_stop_id", "to_stop_id", "transfer_type", "min_transfer_time"],
        required: &["from_stop_id", "to_stop_id", "transfer_type"],
    };

    fn field_value(&self, column: &str) -> Option<String> {
        match column {
            "from_stop_id" => Some(self.from_stop_id.to_string()),
            "to_stop_id" => Some(self.to_stop_id.to_string()),
            "transfer_type" => Some(self.transfer_type.as_i32().to_string()),
            "min_transfer_time" => self.min_transfer_time.map(|secs| secs.to_string()),
            _ => None,
        }
    }

    fn extra(&self) -> &ExtraFields {
        &self.extra
    }

    fn validate(&self, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
        require("from_stop_id", &self.from_stop_id, sink)?;
        require("to_stop_id", &self.to_stop_id, sink)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::testing::rows;
    use crate::problems::{ProblemAccumulator, ProblemKind};

    #[test]
    fn parses_transfer_rows() {
        let rows = rows(
            Transfer::SCHEMA,
            "from_stop_id,to_stop_id,transfer_type,min_transfer_time\n\
             STAGECOACH,NANAA,,\n\
             NANAA,BULLFROG,2,300\n",
        );
        let mut sink = ProblemAccumulator::new();
        let first = Transfer::from_row(&rows[0], &mut sink).unwrap();
        let second = Transfer::from_row(&rows[1], &mut sink).unwrap();
        assert!(sink.is_empty());
        assert_eq!(first.transfer_type, TransferType::Recommended);
        assert_eq!(first.cell("transfer_type"), "0");
        assert_eq!(second.transfer_type, TransferType::MinimumTime);
        assert_eq!(second.min_transfer_time, Some(300));
    }

    #[test]
    fn rejects_bad_type_and_time() {
        let rows = rows(
            Transfer::SCHEMA,
            "from_stop_id,to_stop_id,transfer_type,min_transfer_time\n\
             A,B,4,-1\n\
             ,B,x,\n",
        );
        let mut sink = ProblemAccumulator::new();
        Transfer::from_row(&rows[0], &mut sink).unwrap();
        let missing_from = Transfer::from_row(&rows[1], &mut sink).unwrap();
        missing_from.validate(&mut sink).unwrap();
        let found: Vec<_> = sink
            .iter()
            .map(|problem| (problem.kind, problem.field.clone().unwrap()))
            .collect();
        assert_eq!(
            found,
            vec![
                (ProblemKind::InvalidValue, "transfer_type".to_string()),
                (ProblemKind::InvalidValue, "min_transfer_time".to_string()),
                (ProblemKind::InvalidValue, "transfer_type".to_string()),
                (ProblemKind::MissingValue, "from_stop_id".to_string()),
            ]
        );
    }
}
