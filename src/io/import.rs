//! CSV import and export of input series.
//!
//! The layout is one row per timestep with a header. `load_kw` is required; `timestamp`, `pv_kw`
//! and `price_per_mwh` are optional columns. Column order does not matter.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use chrono::NaiveDateTime;
use thiserror::Error;

/// Accepted timestamp layouts, tried in order.
const TIMESTAMP_FORMATS: &[&str] =
    &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];

#[derive(Debug, Error)]
pub enum SeriesFileError {
    #[error("cannot read series file: {0}")]
    Io(#[from] io::Error),
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("series file has no `{0}` column")]
    MissingColumn(&'static str),
    #[error("row {row}, column `{column}`: cannot parse {value:?}")]
    InvalidCell { row: usize, column: &'static str, value: String },
}

/// Signals read from (or written to) a series CSV file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesTable {
    pub timestamps: Option<Vec<NaiveDateTime>>,
    pub load_kw: Vec<f64>,
    pub pv_kw: Option<Vec<f64>>,
    pub price_per_mwh: Option<Vec<f64>>,
}

/// Reads a series CSV file.
///
/// # Errors
///
/// Returns a [`SeriesFileError`] if the file cannot be opened or parsed.
pub fn read_series_csv(path: &Path) -> Result<SeriesTable, SeriesFileError> {
    let file = File::open(path)?;
    parse_series_csv(io::BufReader::new(file))
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS.iter().find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

/// Parses series CSV from any reader.
///
/// # Errors
///
/// Returns a [`SeriesFileError`] if `load_kw` is missing or a cell does not parse.
pub fn parse_series_csv(reader: impl Read) -> Result<SeriesTable, SeriesFileError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let load_col = column("load_kw").ok_or(SeriesFileError::MissingColumn("load_kw"))?;
    let timestamp_col = column("timestamp");
    let pv_col = column("pv_kw");
    let price_col = column("price_per_mwh");

    let mut table = SeriesTable {
        timestamps: timestamp_col.map(|_| Vec::new()),
        pv_kw: pv_col.map(|_| Vec::new()),
        price_per_mwh: price_col.map(|_| Vec::new()),
        ..SeriesTable::default()
    };

    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let cell = |index: usize| record.get(index).unwrap_or_default();
        let number = |index: usize, column: &'static str| {
            cell(index).parse::<f64>().map_err(|_| SeriesFileError::InvalidCell {
                row: row + 1,
                column,
                value: cell(index).to_owned(),
            })
        };

        table.load_kw.push(number(load_col, "load_kw")?);
        if let (Some(index), Some(pv)) = (pv_col, table.pv_kw.as_mut()) {
            pv.push(number(index, "pv_kw")?);
        }
        if let (Some(index), Some(price)) = (price_col, table.price_per_mwh.as_mut()) {
            price.push(number(index, "price_per_mwh")?);
        }
        if let (Some(index), Some(timestamps)) = (timestamp_col, table.timestamps.as_mut()) {
            let timestamp = parse_timestamp(cell(index)).ok_or_else(|| SeriesFileError::InvalidCell {
                row: row + 1,
                column: "timestamp",
                value: cell(index).to_owned(),
            })?;
            timestamps.push(timestamp);
        }
    }
    Ok(table)
}

/// Writes a series table as CSV, including only the columns it holds.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_series_csv(table: &SeriesTable, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    let mut header = Vec::with_capacity(4);
    if table.timestamps.is_some() {
        header.push("timestamp");
    }
    header.push("load_kw");
    if table.pv_kw.is_some() {
        header.push("pv_kw");
    }
    if table.price_per_mwh.is_some() {
        header.push("price_per_mwh");
    }
    wtr.write_record(&header)?;

    for (i, load) in table.load_kw.iter().enumerate() {
        let mut row = Vec::with_capacity(4);
        if let Some(timestamps) = &table.timestamps {
            row.push(timestamps[i].format("%Y-%m-%dT%H:%M:%S").to_string());
        }
        row.push(format!("{load:.4}"));
        if let Some(pv) = &table.pv_kw {
            row.push(format!("{:.4}", pv[i]));
        }
        if let Some(price) = &table.price_per_mwh {
            row.push(format!("{:.4}", price[i]));
        }
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_columns_in_any_order() {
        let csv = "price_per_mwh,timestamp,pv_kw,load_kw\n\
                   80.5,2025-01-01 00:00,0,12.5\n\
                   -3,2025-01-01T01:00:00,1.25,10\n";
        let table = parse_series_csv(csv.as_bytes()).unwrap();
        assert_eq!(table.load_kw, vec![12.5, 10.0]);
        assert_eq!(table.pv_kw, Some(vec![0.0, 1.25]));
        assert_eq!(table.price_per_mwh, Some(vec![80.5, -3.0]));
        let timestamps = table.timestamps.unwrap();
        assert_eq!((timestamps[1] - timestamps[0]).num_minutes(), 60);
    }

    #[test]
    fn load_only_file() {
        let table = parse_series_csv("load_kw\n1\n2\n".as_bytes()).unwrap();
        assert_eq!(table.load_kw, vec![1.0, 2.0]);
        assert!(table.pv_kw.is_none());
        assert!(table.timestamps.is_none());
    }

    #[test]
    fn missing_load_column() {
        let err = parse_series_csv("pv_kw\n1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SeriesFileError::MissingColumn("load_kw")));
    }

    #[test]
    fn bad_cell_reports_row_and_column() {
        let err = parse_series_csv("load_kw,pv_kw\n1,2\n3,abc\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SeriesFileError::InvalidCell { row: 2, column: "pv_kw", .. }));
        let err = parse_series_csv("timestamp,load_kw\nyesterday,1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SeriesFileError::InvalidCell { row: 1, column: "timestamp", .. }));
    }

    #[test]
    fn written_table_reads_back() {
        let table = SeriesTable {
            timestamps: None,
            load_kw: vec![1.5, 2.25],
            pv_kw: Some(vec![0.0, 3.0]),
            price_per_mwh: None,
        };
        let mut buf = Vec::new();
        write_series_csv(&table, &mut buf).unwrap();
        assert_eq!(parse_series_csv(buf.as_slice()).unwrap(), table);
    }
}
