use std::collections::BTreeMap;
use std::io::Cursor;
use std::rc::Rc;

use compact_str::CompactString;
use csv::{ReaderBuilder, StringRecord, Trim};
use rustc_hash::FxHashMap;

use crate::entity::ExtraFields;
use crate::problems::{Aborted, Problem, ProblemSink, ScopedSink, Severity};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const UTF16_BOMS: [&[u8]; 2] = [b"\xFE\xFF", b"\xFF\xFE"];
const NUL_CONTEXT_BYTES: usize = 20;
const LINE_END_EXAMPLES: usize = 5;

const INVALID_LINE_SEPARATORS: &[(char, &str)] = &[
    ('\u{0C}', "ASCII Form Feed 0x0C"),
    ('\r', "ASCII Carriage Return 0x0D, \\r"),
    ('\u{2028}', "Unicode LINE SEPARATOR U+2028"),
    ('\u{2029}', "Unicode PARAGRAPH SEPARATOR U+2029"),
    ('\u{85}', "Unicode NEXT LINE SEPARATOR U+0085"),
];

/// Column layout of one feed table.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub file_name: &'static str,
    pub columns: &'static [&'static str],
    pub required: &'static [&'static str],
}

impl TableSchema {
    pub fn table_name(&self) -> &'static str {
        self.file_name.strip_suffix(".txt").unwrap_or(self.file_name)
    }

    pub fn is_known_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }
}

#[derive(Debug)]
pub struct TableHeader {
    columns: Vec<CompactString>,
    positions: Vec<usize>,
    index: FxHashMap<CompactString, usize>,
    raw_len: usize,
}

impl TableHeader {
    pub fn columns(&self) -> &[CompactString] {
        &self.columns
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }
}

/// One data record, values aligned with the table's usable header columns.
#[derive(Debug, Clone)]
pub struct TableRow {
    pub row_number: u64,
    header: Rc<TableHeader>,
    values: Vec<String>,
}

impl TableRow {
    /// Trimmed value of `column`, `None` when absent or blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        let value = self.raw(column);
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    pub fn raw(&self, column: &str) -> &str {
        self.header
            .position(column)
            .and_then(|index| self.values.get(index))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.header.position(column).is_some()
    }

    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Cells of columns the schema does not know, kept for writing back out.
    pub fn extras(&self, schema: &TableSchema) -> ExtraFields {
        let mut extra = ExtraFields::default();
        for (column, value) in self.header.columns.iter().zip(&self.values) {
            if !schema.is_known_column(column) {
                extra.set(column.as_str(), value.clone());
            }
        }
        extra
    }
}

/// Pull-based reader over one decoded table.
pub struct TableReader {
    schema: TableSchema,
    reader: csv::Reader<Cursor<Vec<u8>>>,
    header: Rc<TableHeader>,
    lossy: bool,
    record: StringRecord,
}

impl TableReader {
    /// Decodes `bytes` and checks the header row.
    ///
    /// Returns `Ok(None)` when the table cannot be read at all; the reason has
    /// already been reported to `sink`.
    pub fn open(
        schema: TableSchema,
        bytes: &[u8],
        sink: &mut dyn ProblemSink,
    ) -> Result<Option<Self>, Aborted> {
        let file_name = schema.file_name;
        let Some((text, lossy)) = decode(file_name, bytes, sink)? else {
            return Ok(None);
        };
        check_line_ends(file_name, &text, sink)?;

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::None)
            .from_reader(Cursor::new(text.into_bytes()));
        let mut raw_header = StringRecord::new();
        match reader.read_record(&mut raw_header) {
            Ok(true) => {}
            Ok(false) => {
                sink.report(Problem::empty_file(file_name))?;
                return Ok(None);
            }
            Err(err) => {
                report_csv_error(file_name, &err, sink)?;
                return Ok(None);
            }
        }

        let header = check_header(&schema, &raw_header, sink)?;
        Ok(Some(Self {
            schema,
            reader,
            header: Rc::new(header),
            lossy,
            record: StringRecord::new(),
        }))
    }

    /// Convenience for callers that want every row at once.
    pub fn read_all(
        schema: TableSchema,
        bytes: &[u8],
        sink: &mut dyn ProblemSink,
    ) -> Result<Option<(Vec<CompactString>, Vec<TableRow>)>, Aborted> {
        let Some(mut reader) = Self::open(schema, bytes, sink)? else {
            return Ok(None);
        };
        let mut rows = Vec::new();
        while let Some(row) = reader.next_row(sink)? {
            rows.push(row);
        }
        Ok(Some((reader.columns().to_vec(), rows)))
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Usable header columns in file order.
    pub fn columns(&self) -> &[CompactString] {
        &self.header.columns
    }

    /// Whether invalid UTF-8 was replaced while decoding.
    pub fn is_lossy(&self) -> bool {
        self.lossy
    }

    pub fn next_row(&mut self, sink: &mut dyn ProblemSink) -> Result<Option<TableRow>, Aborted> {
        let file_name = self.schema.file_name;
        match self.reader.read_record(&mut self.record) {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(err) => {
                report_csv_error(file_name, &err, sink)?;
                return Ok(None);
            }
        }
        let row_number = self
            .record
            .position()
            .map(|position| position.line())
            .unwrap_or(0);
        let mut scope = ScopedSink::new(sink).in_file(file_name).at_row(row_number);

        let raw_len = self.header.raw_len;
        if self.record.len() > raw_len {
            scope.report(cell_count_problem("too many", row_number, file_name))?;
        } else if self.record.len() < raw_len {
            scope.report(cell_count_problem("missing", row_number, file_name))?;
        }

        let mut values = Vec::with_capacity(self.header.positions.len());
        for &position in &self.header.positions {
            values.push(self.record.get(position).unwrap_or("").trim().to_string());
        }
        if self.lossy {
            for (column, value) in self.header.columns.iter().zip(&values) {
                if value.contains('\u{FFFD}') {
                    scope.report(Problem::invalid_value(column, value, Some("Unicode error")))?;
                }
            }
        }

        Ok(Some(TableRow {
            row_number,
            header: Rc::clone(&self.header),
            values,
        }))
    }
}

fn cell_count_problem(which: &str, row_number: u64, file_name: &str) -> Problem {
    Problem::other(format!(
        "Found {which} cells (commas) in line {row_number} of file \"{file_name}\".  Every row \
         in the file should have the same number of cells as the header (first line) does."
    ))
    .warning()
}

fn report_csv_error(
    file_name: &str,
    err: &csv::Error,
    sink: &mut dyn ProblemSink,
) -> Result<(), Aborted> {
    let mut problem = Problem::csv_syntax(&err.to_string(), Severity::Error).with_file(file_name);
    if let Some(position) = err.position() {
        problem.row = Some(position.line());
    }
    sink.report(problem)
}

fn decode(
    file_name: &str,
    bytes: &[u8],
    sink: &mut dyn ProblemSink,
) -> Result<Option<(String, bool)>, Aborted> {
    if bytes.is_empty() {
        sink.report(Problem::empty_file(file_name))?;
        return Ok(None);
    }
    if bytes.len() >= 2 && UTF16_BOMS.contains(&&bytes[..2]) {
        sink.report(Problem::file_format(file_name, "appears to be encoded in utf-16"))?;
        return Ok(None);
    }
    if let Some(index) = bytes.iter().position(|&byte| byte == 0) {
        let start = index.saturating_sub(NUL_CONTEXT_BYTES);
        let end = (index + 1 + NUL_CONTEXT_BYTES).min(bytes.len());
        let problem = format!(
            "contains a null in text \"{}\" at byte {}",
            escape_bytes(&bytes[start..end]),
            index + 1
        );
        sink.report(Problem::file_format(file_name, &problem))?;
        return Ok(None);
    }
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(Some((text.to_string(), false))),
        Err(_) => {
            sink.report(Problem::file_format(file_name, "contains invalid utf-8"))?;
            Ok(Some((String::from_utf8_lossy(bytes).into_owned(), true)))
        }
    }
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut escaped = String::with_capacity(bytes.len());
    for &byte in bytes {
        match byte {
            b'\n' => escaped.push_str("\\n"),
            b'\r' => escaped.push_str("\\r"),
            b'\t' => escaped.push_str("\\t"),
            b'\\' => escaped.push_str("\\\\"),
            b'\'' => escaped.push_str("\\'"),
            0x20..=0x7e => escaped.push(byte as char),
            _ => escaped.push_str(&format!("\\x{byte:02x}")),
        }
    }
    escaped
}

#[derive(Default)]
struct LineEndTally {
    count: usize,
    examples: Vec<u64>,
}

impl LineEndTally {
    fn record(&mut self, line_number: u64) {
        self.count += 1;
        if self.examples.len() < LINE_END_EXAMPLES {
            self.examples.push(line_number);
        }
    }

    fn describe(&self) -> (String, &'static str) {
        let mut lines = self
            .examples
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        if self.count > self.examples.len() {
            lines.push_str(", ...");
        }
        let plural = if self.count > 1 { "s" } else { "" };
        (lines, plural)
    }
}

fn check_line_ends(file_name: &str, text: &str, sink: &mut dyn ProblemSink) -> Result<(), Aborted> {
    let mut crlf = LineEndTally::default();
    let mut lf = LineEndTally::default();
    let mut line_number = 0u64;
    let mut rest = text;
    while !rest.is_empty() {
        let (line, next) = match rest.find('\n') {
            Some(index) => rest.split_at(index + 1),
            None => (rest, ""),
        };
        rest = next;
        line_number += 1;

        let content = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
        let line_end = &line[content.len()..];
        match line_end {
            "\r\n" => crlf.record(line_number),
            "\n" => lf.record(line_number),
            "" => {}
            other => {
                sink.report(
                    Problem::invalid_line_end(&other.escape_default().to_string())
                        .with_file(file_name)
                        .with_row(line_number),
                )?;
            }
        }
        for (separator, name) in INVALID_LINE_SEPARATORS {
            if content.contains(*separator) {
                sink.report(
                    Problem::other(format!("Line contains {name}"))
                        .warning()
                        .with_file(file_name)
                        .with_row(line_number),
                )?;
            }
        }
    }

    if crlf.count > 0 && lf.count > 0 {
        let (crlf_lines, crlf_plural) = crlf.describe();
        let (lf_lines, lf_plural) = lf.describe();
        sink.report(
            Problem::other(format!(
                "Found {} CR LF \"\\r\\n\" line end{crlf_plural} (line{crlf_plural} {crlf_lines}) \
                 and {} LF \"\\n\" line end{lf_plural} (line{lf_plural} {lf_lines}). A file must \
                 use a consistent line end.",
                crlf.count, lf.count
            ))
            .warning()
            .with_file(file_name),
        )?;
    }
    Ok(())
}

fn check_header(
    schema: &TableSchema,
    raw_header: &StringRecord,
    sink: &mut dyn ProblemSink,
) -> Result<TableHeader, Aborted> {
    let file_name = schema.file_name;
    let mut scope = ScopedSink::new(sink).in_file(file_name).at_row(1);
    let mut columns: Vec<CompactString> = Vec::new();
    let mut positions = Vec::new();
    let mut occurrences: BTreeMap<CompactString, usize> = BTreeMap::new();

    for (position, raw) in raw_header.iter().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            scope.report(Problem::csv_syntax(
                "The header row should not contain any blank values. The corresponding \
                 column will be skipped for the entire file.",
                Severity::Error,
            ))?;
            continue;
        }
        if trimmed != raw {
            scope.report(Problem::csv_syntax(
                "The header row should not contain any space characters.",
                Severity::Warning,
            ))?;
        }
        let column = CompactString::from(trimmed);
        *occurrences.entry(column.clone()).or_insert(0) += 1;
        columns.push(column);
        positions.push(position);
    }

    for (column, count) in &occurrences {
        if *count > 1 {
            scope.report(Problem::duplicate_column(file_name, column, *count))?;
        }
    }

    let unknown: Vec<&CompactString> = occurrences
        .keys()
        .filter(|column| !schema.is_known_column(column))
        .collect();
    if unknown.len() == occurrences.len() {
        scope.report(Problem::csv_syntax(
            "The header row did not contain any known column names. The file is most likely \
             missing the header row or not in the expected CSV format.",
            Severity::Error,
        ))?;
    } else {
        for column in unknown {
            scope.report(Problem::unrecognized_column(file_name, column))?;
        }
    }

    for required in schema.required {
        if !occurrences.contains_key(*required) {
            scope.report(Problem::missing_column(file_name, required))?;
        }
    }

    let mut index = FxHashMap::default();
    for (slot, column) in columns.iter().enumerate() {
        index.entry(column.clone()).or_insert(slot);
    }
    Ok(TableHeader {
        columns,
        positions,
        index,
        raw_len: raw_header.len(),
    })
}
