//! TOML-based scenario configuration and preset definitions.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::devices::{BaseLoad, BessConfig, DegradationParams, PriceCurve, SolarPv, types::sample_profile};
use crate::error::DispatchError;
use crate::io::import::read_series_csv;
use crate::request::DispatchRequest;
use crate::series::{TimeResolution, Topology};
use crate::sim::{DispatchMode, EngineOptions};

/// Offsets keep the PV and price noise streams independent of the load stream.
const SOLAR_SEED_OFFSET: u64 = 1_000;
const PRICE_SEED_OFFSET: u64 = 2_000;

/// Top-level scenario configuration parsed from TOML.
///
/// All sections have defaults matching the `self_consumption` preset. Load from TOML with
/// [`ScenarioConfig::from_toml_file`] or pick a preset with [`ScenarioConfig::from_preset`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Horizon, resolution, seed and optional series file.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Synthetic load profile.
    #[serde(default)]
    pub load: LoadConfig,
    /// Synthetic PV profile.
    #[serde(default)]
    pub solar: SolarConfig,
    /// Synthetic price profile.
    #[serde(default)]
    pub price: PriceConfig,
    /// Battery rating and SOC band.
    #[serde(default)]
    pub battery: BatteryConfig,
    /// Cycle and calendar life budget.
    #[serde(default)]
    pub degradation: DegradationParams,
    /// Dispatch policy and its parameters.
    #[serde(default = "default_dispatch")]
    pub dispatch: DispatchMode,
    /// Engine options: grid export limit, trace, duration range.
    #[serde(default)]
    pub engine: EngineOptions,
}

const fn default_dispatch() -> DispatchMode {
    DispatchMode::PvSurplus
}

/// Horizon and global parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub topology: Topology,
    pub resolution: TimeResolution,
    /// Number of days to simulate (must be > 0).
    pub days: usize,
    /// Master random seed.
    pub seed: u64,
    /// Timestamp of the first step.
    pub start: Option<NaiveDateTime>,
    /// CSV file replacing the synthetic profiles. Relative paths resolve against the scenario file.
    pub series_csv: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            topology: Topology::PvLoad,
            resolution: TimeResolution::Hourly,
            days: 7,
            seed: 42,
            start: None,
            series_csv: None,
        }
    }
}

/// Synthetic load parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    /// Mean demand (kW).
    pub base_kw: f64,
    /// Daily sinusoid amplitude (kW).
    pub amp_kw: f64,
    /// Phase offset (radians).
    pub phase_rad: f64,
    /// Winter-peaking seasonal modulation.
    pub seasonal_swing: f64,
    /// Gaussian noise standard deviation (kW).
    pub noise_std: f64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self { base_kw: 40.0, amp_kw: 15.0, phase_rad: 3.6, seasonal_swing: 0.1, noise_std: 1.5 }
    }
}

/// Synthetic PV parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolarConfig {
    /// Peak generation (kW).
    pub kw_peak: f64,
    /// Hour of sunrise (inclusive).
    pub sunrise_hour: usize,
    /// Hour of sunset (exclusive).
    pub sunset_hour: usize,
    /// Summer-peaking seasonal modulation in `[0, 1)`.
    pub seasonal_swing: f64,
    /// Relative noise standard deviation.
    pub noise_std: f64,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self { kw_peak: 80.0, sunrise_hour: 6, sunset_hour: 20, seasonal_swing: 0.3, noise_std: 0.05 }
    }
}

/// Synthetic day-ahead price parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriceConfig {
    /// Whether the run carries a price series at all.
    pub enabled: bool,
    pub base_per_mwh: f64,
    pub peak_adder_per_mwh: f64,
    pub solar_dip_per_mwh: f64,
    pub noise_std: f64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_per_mwh: 90.0,
            peak_adder_per_mwh: 60.0,
            solar_dip_per_mwh: 50.0,
            noise_std: 5.0,
        }
    }
}

/// Battery rating and SOC band.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryConfig {
    pub power_kw: f64,
    pub energy_kwh: f64,
    /// Round-trip efficiency in `(0, 1]`.
    pub roundtrip_efficiency: f64,
    pub soc_min: f64,
    pub soc_max: f64,
    /// Starting SOC fraction, `soc_min` when absent.
    pub initial_soc: Option<f64>,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            power_kw: 50.0,
            energy_kwh: 100.0,
            roundtrip_efficiency: 0.9,
            soc_min: 0.1,
            soc_max: 0.9,
            initial_soc: None,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.days"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }

    /// Places a library error under a config section.
    fn from_dispatch(section: &str, err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidConfig { field, message } => {
                let leaf = field.rsplit_once('.').map_or(field, |(_, leaf)| leaf);
                Self::new(format!("{section}.{leaf}"), message)
            }
            other => Self::new(section, other.to_string()),
        }
    }
}

impl ScenarioConfig {
    /// PV self-consumption on a commercial site.
    pub fn self_consumption() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            load: LoadConfig::default(),
            solar: SolarConfig::default(),
            price: PriceConfig::default(),
            battery: BatteryConfig::default(),
            degradation: DegradationParams::default(),
            dispatch: DispatchMode::PvSurplus,
            engine: EngineOptions::default(),
        }
    }

    /// Peak shaving with a modest PV array and a tight export limit.
    pub fn peak_shaving() -> Self {
        Self {
            load: LoadConfig { base_kw: 55.0, amp_kw: 25.0, ..LoadConfig::default() },
            solar: SolarConfig { kw_peak: 30.0, ..SolarConfig::default() },
            battery: BatteryConfig { power_kw: 30.0, energy_kwh: 90.0, initial_soc: Some(0.9), ..BatteryConfig::default() },
            dispatch: DispatchMode::PeakShaving { target_kw: 70.0, recharge_below_kw: None, recharge_rate_kw: None },
            engine: EngineOptions { export_limit_kw: Some(10.0), ..EngineOptions::default() },
            ..Self::self_consumption()
        }
    }

    /// Peak shaving stacked with PV self-consumption.
    pub fn stacked() -> Self {
        Self {
            load: LoadConfig { base_kw: 55.0, amp_kw: 25.0, ..LoadConfig::default() },
            battery: BatteryConfig { power_kw: 40.0, energy_kwh: 120.0, initial_soc: Some(0.5), ..BatteryConfig::default() },
            dispatch: DispatchMode::Stacked { peak_target_kw: 70.0, soc_reserve_frac: 0.2 },
            ..Self::self_consumption()
        }
    }

    /// Day-ahead price arbitrage on a site without PV.
    pub fn arbitrage() -> Self {
        Self {
            simulation: SimulationConfig { topology: Topology::LoadOnly, ..SimulationConfig::default() },
            price: PriceConfig { noise_std: 10.0, ..PriceConfig::default() },
            battery: BatteryConfig { power_kw: 50.0, energy_kwh: 200.0, ..BatteryConfig::default() },
            dispatch: DispatchMode::Arbitrage { charge_price_threshold: 70.0, discharge_price_threshold: 120.0 },
            ..Self::self_consumption()
        }
    }

    /// Demand-charge management on a site without PV.
    pub fn load_only() -> Self {
        Self {
            simulation: SimulationConfig { topology: Topology::LoadOnly, ..SimulationConfig::default() },
            load: LoadConfig { base_kw: 60.0, amp_kw: 25.0, ..LoadConfig::default() },
            price: PriceConfig { enabled: false, ..PriceConfig::default() },
            battery: BatteryConfig { power_kw: 25.0, energy_kwh: 100.0, initial_soc: Some(0.9), ..BatteryConfig::default() },
            dispatch: DispatchMode::LoadOnly { target_kw: 75.0, recharge_below_kw: None, recharge_rate_kw: None },
            ..Self::self_consumption()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["self_consumption", "peak_shaving", "stacked", "arbitrage", "load_only"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "self_consumption" => Ok(Self::self_consumption()),
            "peak_shaving" => Ok(Self::peak_shaving()),
            "stacked" => Ok(Self::stacked()),
            "arbitrage" => Ok(Self::arbitrage()),
            "load_only" => Ok(Self::load_only()),
            _ => Err(ConfigError::new(
                "preset",
                format!("unknown preset \"{name}\", available: {}", Self::PRESETS.join(", ")),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display())))?;
        let mut config = Self::from_toml_str(&content)?;
        if let (Some(csv), Some(dir)) = (config.simulation.series_csv.as_mut(), path.parent()) {
            if csv.is_relative() {
                *csv = dir.join(&*csv);
            }
        }
        Ok(config)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Builds the validated battery configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming the offending `battery.*` or `degradation.*` field.
    pub fn bess(&self) -> Result<BessConfig, ConfigError> {
        let b = &self.battery;
        let mut bess = BessConfig::new(b.power_kw, b.energy_kwh, b.roundtrip_efficiency, b.soc_min, b.soc_max)
            .map_err(|e| ConfigError::from_dispatch("battery", e))?;
        if let Some(initial_soc) = b.initial_soc {
            bess = bess.with_initial_soc(initial_soc).map_err(|e| ConfigError::from_dispatch("battery", e))?;
        }
        bess.with_degradation(self.degradation).map_err(|e| ConfigError::from_dispatch("degradation", e))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid. Checks that need the full series, such
    /// as signal lengths, happen when the engine is configured.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let s = &self.simulation;

        if s.days == 0 && s.series_csv.is_none() {
            errors.push(ConfigError::new("simulation.days", "must be > 0"));
        }

        let l = &self.load;
        if l.base_kw < 0.0 {
            errors.push(ConfigError::new("load.base_kw", "must be >= 0"));
        }
        if l.noise_std < 0.0 {
            errors.push(ConfigError::new("load.noise_std", "must be >= 0"));
        }

        let sol = &self.solar;
        if s.topology == Topology::PvLoad {
            if sol.sunrise_hour >= sol.sunset_hour {
                errors.push(ConfigError::new("solar.sunrise_hour", "must be < solar.sunset_hour"));
            }
            if sol.sunset_hour > 24 {
                errors.push(ConfigError::new("solar.sunset_hour", "must be <= 24"));
            }
            if !(0.0..1.0).contains(&sol.seasonal_swing) {
                errors.push(ConfigError::new("solar.seasonal_swing", "must be in [0.0, 1.0)"));
            }
        }

        if self.price.noise_std < 0.0 {
            errors.push(ConfigError::new("price.noise_std", "must be >= 0"));
        }
        if self.dispatch.requires_price() && !self.price.enabled && s.series_csv.is_none() {
            errors.push(ConfigError::new("price.enabled", format!("policy `{}` needs a price series", self.dispatch)));
        }
        if let Some(required) = self.dispatch.required_topology() {
            if required != s.topology {
                errors.push(ConfigError::new(
                    "simulation.topology",
                    format!("policy `{}` runs on `{required}` sites", self.dispatch),
                ));
            }
        }

        if let Err(e) = self.engine.validate() {
            errors.push(ConfigError::from_dispatch("engine", e));
        }

        match self.bess() {
            Ok(bess) => {
                if let Err(e) = bess.check_duration(&self.engine.duration_range()) {
                    errors.push(ConfigError::from_dispatch("battery", e));
                }
                if let Err(e) = self.dispatch.validate(&bess) {
                    errors.push(ConfigError::from_dispatch("dispatch", e));
                }
            }
            Err(e) => errors.push(e),
        }

        errors
    }

    /// Builds the dispatch request, generating synthetic profiles or reading the series file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the battery is invalid, the series file cannot be read or the
    /// PV window does not fit the resolution.
    pub fn to_request(&self) -> Result<DispatchRequest, ConfigError> {
        let s = &self.simulation;
        let bess = self.bess()?;
        let mut request = DispatchRequest {
            topology: s.topology,
            time_resolution: s.resolution,
            load_kw: Vec::new(),
            pv_kw: None,
            price_per_mwh: None,
            timestamps: None,
            start: s.start,
            bess,
            mode: self.dispatch,
            options: self.engine.clone(),
        };

        if let Some(path) = &s.series_csv {
            let table = read_series_csv(path).map_err(|e| ConfigError::new("simulation.series_csv", e.to_string()))?;
            request.load_kw = table.load_kw;
            request.pv_kw = table.pv_kw;
            request.price_per_mwh = table.price_per_mwh;
            request.timestamps = table.timestamps;
            return Ok(request);
        }

        let steps_per_day = s.resolution.steps_per_day();
        let steps = steps_per_day * s.days;
        let steps_per_hour = steps_per_day / 24;

        let l = &self.load;
        let mut load = BaseLoad::new(l.base_kw, l.amp_kw, l.phase_rad, l.seasonal_swing, l.noise_std, steps_per_day, s.seed);
        request.load_kw = sample_profile(&mut load, steps);

        if s.topology == Topology::PvLoad {
            let sol = &self.solar;
            let mut pv = SolarPv::new(
                sol.kw_peak,
                sol.sunrise_hour * steps_per_hour,
                sol.sunset_hour * steps_per_hour,
                sol.seasonal_swing,
                sol.noise_std,
                steps_per_day,
                s.seed.wrapping_add(SOLAR_SEED_OFFSET),
            )
            .map_err(|e| ConfigError::from_dispatch("solar", e))?;
            request.pv_kw = Some(sample_profile(&mut pv, steps));
        }

        if self.price.enabled {
            let p = &self.price;
            let mut price = PriceCurve::new(
                p.base_per_mwh,
                p.peak_adder_per_mwh,
                p.solar_dip_per_mwh,
                p.noise_std,
                steps_per_day,
                s.seed.wrapping_add(PRICE_SEED_OFFSET),
            );
            request.price_per_mwh = Some(sample_profile(&mut price, steps));
        }

        Ok(request)
    }
}
