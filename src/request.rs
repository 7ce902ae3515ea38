//! Owned, serializable form of one dispatch run.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::devices::BessConfig;
use crate::error::Result;
use crate::series::{SeriesInput, TimeResolution, Topology};
use crate::sim::kpi::RunTimer;
use crate::sim::{DispatchMode, DispatchResult, Engine, EngineOptions};

/// Everything needed to run the engine once.
///
/// # Examples
///
/// ```
/// use bess_dispatch::request::DispatchRequest;
///
/// let json = r#"{
///     "topology": "load_only",
///     "time_resolution": "hourly",
///     "load_kw": [40, 40, 40, 40, 40, 40, 40, 40, 60, 70, 80, 90,
///                 80, 70, 60, 60, 60, 60, 70, 80, 70, 50, 40, 40],
///     "bess": {"power_kw": 20, "energy_kwh": 40, "roundtrip_efficiency": 0.9,
///              "soc_min": 0.1, "soc_max": 0.9, "initial_soc": 0.9},
///     "mode": {"policy": "load_only", "target_kw": 75}
/// }"#;
/// let request: DispatchRequest = serde_json::from_str(json)?;
/// let result = request.run()?;
/// assert!(result.totals.peak_import_after_kw < result.totals.peak_import_before_kw);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchRequest {
    pub topology: Topology,
    pub time_resolution: TimeResolution,
    pub load_kw: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pv_kw: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_mwh: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<NaiveDateTime>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDateTime>,
    pub bess: BessConfig,
    pub mode: DispatchMode,
    #[serde(default)]
    pub options: EngineOptions,
}

impl DispatchRequest {
    /// Borrowed view of the signals for validation.
    #[must_use]
    pub fn series_input(&self) -> SeriesInput<'_> {
        SeriesInput {
            topology: self.topology,
            resolution: self.time_resolution,
            load_kw: &self.load_kw,
            pv_kw: self.pv_kw.as_deref(),
            price_per_mwh: self.price_per_mwh.as_deref(),
            timestamps: self.timestamps.as_deref(),
            start: self.start,
        }
    }

    /// Configures an engine for this request.
    ///
    /// # Errors
    ///
    /// Any configuration error from [`Engine::configure`].
    pub fn engine(&self) -> Result<Engine<'_>> {
        Engine::configure(self.series_input(), self.bess.clone(), self.mode, self.options.clone())
    }

    /// Configures and runs the engine with the wall-clock timer.
    ///
    /// # Errors
    ///
    /// Any configuration or run error.
    pub fn run(&self) -> Result<DispatchResult> {
        self.engine()?.run()
    }

    /// Configures and runs the engine with an injected timer.
    ///
    /// # Errors
    ///
    /// Any configuration or run error.
    pub fn run_with_timer(&self, timer: impl RunTimer + 'static) -> Result<DispatchResult> {
        self.engine()?.with_timer(timer).run()
    }
}
