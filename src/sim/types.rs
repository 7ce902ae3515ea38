//! Core simulation types: engine options, lifecycle state, and per-step records.

use std::fmt;
use std::ops::RangeInclusive;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::clock::CancelToken;
use crate::error::{DispatchError, Result};

/// Run options that are not part of the physical battery or the policy.
///
/// # Examples
///
/// ```
/// use bess_dispatch::sim::types::EngineOptions;
///
/// let options = EngineOptions::default();
/// assert_eq!(options.duration_range(), 0.25..=12.0);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOptions {
    /// Keep the full-resolution per-step trace in the result.
    pub record_trace: bool,
    /// Upper bound on timesteps; longer series are cancelled before aggregation.
    pub max_steps: Option<usize>,
    /// Grid export limit (kW). PV beyond it is curtailed.
    pub export_limit_kw: Option<f64>,
    /// Value of exported energy as a fraction of the import price.
    pub export_price_factor: f64,
    /// Shortest plausible battery duration `energy_kwh / power_kw` (h).
    pub min_duration_hours: f64,
    /// Longest plausible battery duration (h).
    pub max_duration_hours: f64,
    #[serde(skip)]
    pub cancel: Option<CancelToken>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            record_trace: false,
            max_steps: None,
            export_limit_kw: None,
            export_price_factor: 1.0,
            min_duration_hours: 0.25,
            max_duration_hours: 12.0,
            cancel: None,
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub const fn duration_range(&self) -> RangeInclusive<f64> {
        self.min_duration_hours..=self.max_duration_hours
    }

    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] naming the first offending option.
    pub fn validate(&self) -> Result<()> {
        if self.export_limit_kw.is_some_and(|kw| !(kw.is_finite() && kw >= 0.0)) {
            return Err(DispatchError::InvalidConfig {
                field: "options.export_limit_kw",
                message: "must be >= 0".to_owned(),
            });
        }
        if !(self.export_price_factor.is_finite() && self.export_price_factor >= 0.0) {
            return Err(DispatchError::InvalidConfig {
                field: "options.export_price_factor",
                message: "must be >= 0".to_owned(),
            });
        }
        if !(self.min_duration_hours > 0.0 && self.min_duration_hours <= self.max_duration_hours) {
            return Err(DispatchError::InvalidConfig {
                field: "options.min_duration_hours",
                message: format!(
                    "must be > 0 and <= max_duration_hours ({})",
                    self.max_duration_hours
                ),
            });
        }
        Ok(())
    }
}

/// Engine lifecycle: `Configured → Running → Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Configured,
    Running,
    Completed,
    Failed,
}

impl RunState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Complete record of one simulation timestep.
///
/// Battery power follows the site convention: positive charges, negative discharges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub timestep: usize,
    pub timestamp: NaiveDateTime,
    pub load_kw: f64,
    pub pv_kw: f64,
    pub price_per_mwh: Option<f64>,
    /// Policy request before clipping.
    pub requested_kw: f64,
    /// Power actually applied after clipping.
    pub battery_kw: f64,
    /// SOC after this step.
    pub soc_kwh: f64,
    pub soc_fraction: f64,
    pub grid_import_kw: f64,
    pub grid_export_kw: f64,
    pub curtailment_kw: f64,
    /// Grid import had there been no battery.
    pub grid_import_before_kw: f64,
    pub grid_export_before_kw: f64,
    pub curtailment_before_kw: f64,
    pub charge_kwh: f64,
    pub discharge_kwh: f64,
    pub loss_kwh: f64,
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>5} {} | load={:>8.2} pv={:>8.2} | req={:>8.2} bat={:>8.2} kW (SoC={:>5.1}%) | \
             import={:>8.2} export={:>8.2} curtail={:>6.2} kW",
            self.timestep,
            self.timestamp.format("%Y-%m-%d %H:%M"),
            self.load_kw,
            self.pv_kw,
            self.requested_kw,
            self.battery_kw,
            self.soc_fraction * 100.0,
            self.grid_import_kw,
            self.grid_export_kw,
            self.curtailment_kw,
        )
    }
}
