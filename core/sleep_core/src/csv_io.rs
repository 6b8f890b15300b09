//! Plain CSV export/import of sleep entries (`Date,Hours,Quality,Cycles`).

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;

use crate::{
    entry::{cycles_for_hours, format_date, parse_date, validate_hours, EntryInput, Quality, SleepEntry},
    error::ValidationError,
};

pub const HEADER: &str = "Date,Hours,Quality,Cycles";

/// Rows come out in the order given; callers sort.
pub fn export_csv(entries: &[SleepEntry]) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');

    for e in entries {
        let row = [
            csv_escape(&format_date(e.date)),
            e.hours.to_string(),
            csv_escape(e.quality.as_str()),
            e.cycles.to_string(),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }

    out
}

fn csv_escape(s: &str) -> String {
    let needs_quote = s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r');
    if !needs_quote {
        return s.to_string();
    }
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RowError {
    /// 1-based line number in the uploaded file.
    pub line: usize,
    pub error: &'static str,
}

#[derive(Debug)]
pub struct ParsedImport {
    pub rows: Vec<(usize, EntryInput)>,
    pub errors: Vec<RowError>,
}

struct Columns {
    date: usize,
    hours: usize,
    quality: Option<usize>,
    cycles: Option<usize>,
}

fn locate_columns(header: &StringRecord) -> Option<Columns> {
    let names: Vec<String> = header
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_lowercase())
        .collect();
    let find = |name: &str| names.iter().position(|h| h == name);
    Some(Columns {
        date: find("date")?,
        hours: find("hours")?,
        quality: find("quality"),
        cycles: find("cycles"),
    })
}

fn parse_row(record: &StringRecord, cols: &Columns) -> Result<EntryInput, ValidationError> {
    let field = |i: usize| record.get(i).unwrap_or("");

    let date = parse_date(field(cols.date))?;
    let hours: f64 = field(cols.hours)
        .parse()
        .map_err(|_| ValidationError::InvalidHours)?;
    let hours = validate_hours(hours)?;

    let quality = match cols.quality.map(field).filter(|q| !q.is_empty()) {
        Some(q) => q.parse()?,
        None => Quality::Good,
    };
    let cycles = match cols.cycles.map(field).filter(|c| !c.is_empty()) {
        Some(c) => c.parse::<i64>().map_err(|_| ValidationError::InvalidCycles)?,
        None => cycles_for_hours(hours) as i64,
    };

    EntryInput::new(date, hours, quality, cycles)
}

fn record_line(position: Option<&csv::Position>) -> usize {
    position.map(|p| p.line() as usize).unwrap_or(0)
}

/// `None` when the header lacks a Date or Hours column.
pub fn parse_import(body: &str) -> Option<ParsedImport> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());
    let header = reader.headers().ok()?.clone();
    let cols = locate_columns(&header)?;

    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for result in reader.records() {
        match result {
            Ok(record) => {
                if record.iter().all(str::is_empty) {
                    continue;
                }
                let line = record_line(record.position());
                match parse_row(&record, &cols) {
                    Ok(input) => rows.push((line, input)),
                    Err(e) => errors.push(RowError {
                        line,
                        error: e.code(),
                    }),
                }
            }
            Err(err) => errors.push(RowError {
                line: record_line(err.position()),
                error: "invalid_row",
            }),
        }
    }
    Some(ParsedImport { rows, errors })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_has_header_and_rows() {
        let e = SleepEntry {
            id: 1,
            date: parse_date("2024-01-02").unwrap(),
            hours: 7.5,
            quality: Quality::Good,
            cycles: 5,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let csv = export_csv(&[e]);
        assert_eq!(csv, "Date,Hours,Quality,Cycles\n2024-01-02,7.5,Good,5\n");
    }

    #[test]
    fn import_defaults_quality_and_cycles() {
        let parsed = parse_import("Date,Hours,Quality,Cycles\n2024-01-02,7.5,,\n2024-01-03,6,Light,4\n")
            .unwrap();
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.rows.len(), 2);
        let (line, first) = parsed.rows[0];
        assert_eq!(line, 2);
        assert_eq!(first.quality, Quality::Good);
        assert_eq!(first.cycles, 5);
        assert_eq!(parsed.rows[1].1.quality, Quality::Light);
    }

    #[test]
    fn import_reports_bad_rows_by_line() {
        let parsed = parse_import(
            "hours,date\n7,2024-01-01\nabc,2024-01-02\n30,2024-01-03\n8,not-a-date\n",
        )
        .unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(
            parsed.errors,
            vec![
                RowError { line: 3, error: "invalid_hours" },
                RowError { line: 4, error: "invalid_hours" },
                RowError { line: 5, error: "invalid_date" },
            ]
        );
    }

    #[test]
    fn import_requires_date_and_hours_columns() {
        assert!(parse_import("Date,Quality\n2024-01-01,Good\n").is_none());
        assert!(parse_import("").is_none());
    }

    #[test]
    fn quoted_fields_keep_line_numbers() {
        let parsed = parse_import(
            "Date,Hours,Quality\n\"2024-01-01\",\"7,5\",\"Go\nod\"\n\n2024-01-02,abc,Good\n2024-01-03, 8 ,\"Optimal\"\n",
        )
        .unwrap();
        assert_eq!(
            parsed.errors,
            vec![
                RowError { line: 2, error: "invalid_hours" },
                RowError { line: 5, error: "invalid_hours" },
            ]
        );
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].0, 6);
        assert_eq!(parsed.rows[0].1.quality, Quality::Optimal);
        assert_eq!(parsed.rows[0].1.hours, 8.0);
    }
}
