//! Dispatch simulation: policies, engine loop, degradation and result aggregation.

/// Simulation clock with step bound and cancellation.
pub mod clock;
/// Cycle and calendar aging.
pub mod degradation;
pub mod engine;
/// Period totals, monthly records, histograms and audit metadata.
pub mod kpi;
pub mod policy;
pub mod power_balance;
pub mod types;

pub use clock::CancelToken;
pub use degradation::{DegradationBudget, DegradationStatus};
pub use engine::Engine;
pub use kpi::{DispatchResult, FixedTimer, RunTimer, SystemTimer};
pub use policy::DispatchMode;
pub use types::EngineOptions;
