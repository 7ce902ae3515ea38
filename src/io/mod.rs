//! File I/O: series CSV import, trace CSV and result JSON export.

pub mod export;
pub mod import;
