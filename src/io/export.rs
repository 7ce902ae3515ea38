//! CSV export of per-step traces and JSON export of results.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::sim::DispatchResult;
use crate::sim::types::StepRecord;

/// Column header of the trace CSV export.
const HEADER: &str = "timestep,timestamp,load_kw,pv_kw,price_per_mwh,requested_kw,battery_kw,\
                      soc_kwh,soc_fraction,grid_import_kw,grid_export_kw,curtailment_kw,\
                      grid_import_before_kw,grid_export_before_kw";

/// Exports a run's trace to a CSV file at the given path.
///
/// Writes a header row followed by one data row per step. Produces deterministic output for
/// identical inputs.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_trace_csv(trace: &[StepRecord], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_trace_csv(trace, buf)
}

/// Writes a trace as CSV to any writer. A missing price is an empty cell.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_trace_csv(trace: &[StepRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for r in trace {
        wtr.write_record(&[
            r.timestep.to_string(),
            r.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
            format!("{:.4}", r.load_kw),
            format!("{:.4}", r.pv_kw),
            r.price_per_mwh.map(|p| format!("{p:.4}")).unwrap_or_default(),
            format!("{:.4}", r.requested_kw),
            format!("{:.4}", r.battery_kw),
            format!("{:.4}", r.soc_kwh),
            format!("{:.6}", r.soc_fraction),
            format!("{:.4}", r.grid_import_kw),
            format!("{:.4}", r.grid_export_kw),
            format!("{:.4}", r.curtailment_kw),
            format!("{:.4}", r.grid_import_before_kw),
            format!("{:.4}", r.grid_export_before_kw),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes a result as pretty-printed JSON to a file.
///
/// # Errors
///
/// Returns an `io::Error` if file creation, serialization or writing fails.
pub fn export_result_json(result: &DispatchResult, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let mut buf = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut buf, result)?;
    buf.write_all(b"\n")?;
    buf.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::default_start;

    fn make_step(t: usize, price: Option<f64>) -> StepRecord {
        StepRecord {
            timestep: t,
            timestamp: default_start() + chrono::TimeDelta::hours(t as i64),
            load_kw: 50.0,
            pv_kw: 20.0,
            price_per_mwh: price,
            requested_kw: -30.0,
            battery_kw: -30.0,
            soc_kwh: 100.0,
            soc_fraction: 0.5,
            grid_import_kw: 0.0,
            grid_export_kw: 0.0,
            curtailment_kw: 0.0,
            grid_import_before_kw: 30.0,
            grid_export_before_kw: 0.0,
            curtailment_before_kw: 0.0,
            charge_kwh: 0.0,
            discharge_kwh: 30.0,
            loss_kwh: 1.6,
        }
    }

    #[test]
    fn header_matches_schema() {
        let mut buf = Vec::new();
        write_trace_csv(&[make_step(0, None)], &mut buf).unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert_eq!(
            output.lines().next(),
            Some(
                "timestep,timestamp,load_kw,pv_kw,price_per_mwh,requested_kw,battery_kw,\
                 soc_kwh,soc_fraction,grid_import_kw,grid_export_kw,curtailment_kw,\
                 grid_import_before_kw,grid_export_before_kw"
            )
        );
    }

    #[test]
    fn row_count_matches_step_count() {
        let trace: Vec<StepRecord> = (0..24).map(|t| make_step(t, Some(80.0))).collect();
        let mut buf = Vec::new();
        write_trace_csv(&trace, &mut buf).unwrap();
        let output = String::from_utf8(buf).unwrap();
        // 1 header + 24 data rows
        assert_eq!(output.lines().count(), 25);
    }

    #[test]
    fn deterministic_output() {
        let trace: Vec<StepRecord> = (0..5).map(|t| make_step(t, None)).collect();
        let mut buf1 = Vec::new();
        let mut buf2 = Vec::new();
        write_trace_csv(&trace, &mut buf1).unwrap();
        write_trace_csv(&trace, &mut buf2).unwrap();
        assert_eq!(buf1, buf2);
    }

    #[test]
    fn missing_price_is_empty_cell() {
        let mut buf = Vec::new();
        write_trace_csv(&[make_step(3, None)], &mut buf).unwrap();
        let mut rdr = csv::ReaderBuilder::new().from_reader(buf.as_slice());
        let record = rdr.records().next().unwrap().unwrap();
        assert_eq!(&record[1], "2025-01-01T03:00:00");
        assert_eq!(&record[4], "");
        assert_eq!(record[6].parse::<f64>().ok(), Some(-30.0));
    }
}
