//! Battery energy storage dispatch simulator.
//!
//! Runs a BESS against a load (and optionally PV and price) series under one dispatch policy and
//! reports energy, cost, peak and degradation KPIs. A run is single-threaded and deterministic;
//! [`sweep`] fans many runs out over battery sizes.

pub mod config;
pub mod devices;
pub mod error;
/// Series CSV import, trace CSV and result JSON export.
pub mod io;
pub mod request;
pub mod series;
/// Dispatch policies, engine loop, degradation and result aggregation.
pub mod sim;
pub mod sweep;

pub use error::{DispatchError, Result};
