use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DispatchError, Result};
use crate::series::HOURS_PER_YEAR;

/// Relative tolerance (of `energy_kwh`) within which an out-of-bounds SOC is clamped rather than
/// reported as an invariant violation.
pub const SOC_TOLERANCE: f64 = 1e-6;

/// Relative clamp (of `energy_kwh`) above which a near-boundary event is logged.
const CLAMP_LOG_EPSILON: f64 = 1e-9;

/// Name of the round-trip efficiency convention recorded in audit metadata.
pub const EFFICIENCY_CONVENTION: &str = "symmetric_sqrt_split";

/// Immutable battery configuration supplied by the caller.
///
/// Constructed through [`BessConfig::new`] (or deserialization, which runs the same checks), so an
/// instance always satisfies `power_kw > 0`, `energy_kwh > 0`, `0 < η ≤ 1`,
/// `0 ≤ soc_min < soc_max ≤ 1` and `soc_min ≤ initial_soc ≤ soc_max`.
///
/// # Efficiency convention
///
/// Round-trip losses are split symmetrically: charging stores `P·dt·√η`, discharging draws
/// `|P|·dt/√η`, so one full round trip recovers exactly `η`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BessConfigRepr", into = "BessConfigRepr")]
pub struct BessConfig {
    power_kw: f64,
    energy_kwh: f64,
    roundtrip_efficiency: f64,
    soc_min: f64,
    soc_max: f64,
    initial_soc: f64,
    degradation: DegradationParams,
}

/// Serialized form of [`BessConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BessConfigRepr {
    power_kw: f64,
    energy_kwh: f64,
    roundtrip_efficiency: f64,
    soc_min: f64,
    soc_max: f64,
    #[serde(default)]
    initial_soc: Option<f64>,
    #[serde(default)]
    degradation: Option<DegradationParams>,
}

impl TryFrom<BessConfigRepr> for BessConfig {
    type Error = DispatchError;

    fn try_from(repr: BessConfigRepr) -> Result<Self> {
        let mut config =
            Self::new(repr.power_kw, repr.energy_kwh, repr.roundtrip_efficiency, repr.soc_min, repr.soc_max)?;
        if let Some(initial_soc) = repr.initial_soc {
            config = config.with_initial_soc(initial_soc)?;
        }
        if let Some(degradation) = repr.degradation {
            config = config.with_degradation(degradation)?;
        }
        Ok(config)
    }
}

impl From<BessConfig> for BessConfigRepr {
    fn from(config: BessConfig) -> Self {
        Self {
            power_kw: config.power_kw,
            energy_kwh: config.energy_kwh,
            roundtrip_efficiency: config.roundtrip_efficiency,
            soc_min: config.soc_min,
            soc_max: config.soc_max,
            initial_soc: Some(config.initial_soc),
            degradation: Some(config.degradation),
        }
    }
}

impl fmt::Display for BessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} kW / {:.1} kWh ({:.2} h), η={:.3}, SoC {:.0}%..{:.0}%",
            self.power_kw,
            self.energy_kwh,
            self.duration_hours(),
            self.roundtrip_efficiency,
            self.soc_min * 100.0,
            self.soc_max * 100.0,
        )
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> DispatchError {
    DispatchError::InvalidConfig { field, message: message.into() }
}

impl BessConfig {
    /// Creates a configuration starting at `soc_min` with default degradation parameters.
    ///
    /// # Arguments
    ///
    /// * `power_kw` - Rated charge and discharge power (must be > 0)
    /// * `energy_kwh` - Nameplate energy capacity (must be > 0)
    /// * `roundtrip_efficiency` - Round-trip efficiency in `(0, 1]`
    /// * `soc_min` - Lower SOC bound as a fraction in `[0, 1)`
    /// * `soc_max` - Upper SOC bound as a fraction in `(soc_min, 1]`
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] naming the first offending field.
    pub fn new(
        power_kw: f64,
        energy_kwh: f64,
        roundtrip_efficiency: f64,
        soc_min: f64,
        soc_max: f64,
    ) -> Result<Self> {
        if !(power_kw.is_finite() && power_kw > 0.0) {
            return Err(invalid("power_kw", format!("must be > 0, got {power_kw}")));
        }
        if !(energy_kwh.is_finite() && energy_kwh > 0.0) {
            return Err(invalid("energy_kwh", format!("must be > 0, got {energy_kwh}")));
        }
        if !(roundtrip_efficiency > 0.0 && roundtrip_efficiency <= 1.0) {
            return Err(invalid(
                "roundtrip_efficiency",
                format!("must be in (0, 1], got {roundtrip_efficiency}"),
            ));
        }
        if !(0.0..1.0).contains(&soc_min) {
            return Err(invalid("soc_min", format!("must be in [0, 1), got {soc_min}")));
        }
        if !(soc_max > soc_min && soc_max <= 1.0) {
            return Err(invalid("soc_max", format!("must be in ({soc_min}, 1], got {soc_max}")));
        }
        Ok(Self {
            power_kw,
            energy_kwh,
            roundtrip_efficiency,
            soc_min,
            soc_max,
            initial_soc: soc_min,
            degradation: DegradationParams::default(),
        })
    }

    /// Sets the starting SOC fraction.
    ///
    /// # Errors
    ///
    /// Fails if `initial_soc` lies outside `[soc_min, soc_max]`.
    pub fn with_initial_soc(mut self, initial_soc: f64) -> Result<Self> {
        if !(self.soc_min..=self.soc_max).contains(&initial_soc) {
            return Err(invalid(
                "initial_soc",
                format!("must be in [{}, {}], got {initial_soc}", self.soc_min, self.soc_max),
            ));
        }
        self.initial_soc = initial_soc;
        Ok(self)
    }

    /// Replaces the degradation parameters.
    ///
    /// # Errors
    ///
    /// Propagates [`DegradationParams::validate`].
    pub fn with_degradation(mut self, degradation: DegradationParams) -> Result<Self> {
        degradation.validate()?;
        self.degradation = degradation;
        Ok(self)
    }

    /// Same battery with a different rating, used by sizing sweeps.
    ///
    /// # Errors
    ///
    /// Fails on non-positive ratings.
    pub fn resized(&self, power_kw: f64, energy_kwh: f64) -> Result<Self> {
        let resized = Self::new(power_kw, energy_kwh, self.roundtrip_efficiency, self.soc_min, self.soc_max)?;
        resized.with_initial_soc(self.initial_soc)?.with_degradation(self.degradation)
    }

    #[must_use]
    pub const fn power_kw(&self) -> f64 {
        self.power_kw
    }

    #[must_use]
    pub const fn energy_kwh(&self) -> f64 {
        self.energy_kwh
    }

    #[must_use]
    pub const fn roundtrip_efficiency(&self) -> f64 {
        self.roundtrip_efficiency
    }

    #[must_use]
    pub const fn soc_min(&self) -> f64 {
        self.soc_min
    }

    #[must_use]
    pub const fn soc_max(&self) -> f64 {
        self.soc_max
    }

    #[must_use]
    pub const fn initial_soc(&self) -> f64 {
        self.initial_soc
    }

    #[must_use]
    pub const fn degradation(&self) -> &DegradationParams {
        &self.degradation
    }

    /// Charge (and discharge) leg efficiency, `√η`.
    #[must_use]
    pub fn leg_efficiency(&self) -> f64 {
        self.roundtrip_efficiency.sqrt()
    }

    #[must_use]
    pub fn duration_hours(&self) -> f64 {
        self.energy_kwh / self.power_kw
    }

    #[must_use]
    pub fn min_energy_kwh(&self) -> f64 {
        self.soc_min * self.energy_kwh
    }

    #[must_use]
    pub fn max_energy_kwh(&self) -> f64 {
        self.soc_max * self.energy_kwh
    }

    /// Checks `energy_kwh / power_kw` against a plausible duration range.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] for `duration` when out of range.
    pub fn check_duration(&self, range: &RangeInclusive<f64>) -> Result<()> {
        let duration = self.duration_hours();
        if range.contains(&duration) {
            Ok(())
        } else {
            Err(invalid(
                "duration",
                format!(
                    "{duration:.3} h is outside the plausible range {:.2}..={:.2} h",
                    range.start(),
                    range.end()
                ),
            ))
        }
    }
}

/// Cycle-life and calendar-life budget of the battery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DegradationParams {
    /// Equivalent full cycles until end of life.
    pub cycle_life_efc: f64,
    /// Years until end of life by calendar aging alone.
    pub calendar_life_years: f64,
    /// Fraction of the cycle budget at which the status turns to `warning`.
    pub warning_threshold: f64,
    /// Remaining capacity fraction at end of life.
    pub end_of_life_capacity: f64,
}

impl Default for DegradationParams {
    fn default() -> Self {
        Self {
            cycle_life_efc: 6000.0,
            calendar_life_years: 15.0,
            warning_threshold: 0.8,
            end_of_life_capacity: 0.8,
        }
    }
}

impl DegradationParams {
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(self.cycle_life_efc.is_finite() && self.cycle_life_efc > 0.0) {
            return Err(invalid("degradation.cycle_life_efc", "must be > 0"));
        }
        if !(self.calendar_life_years.is_finite() && self.calendar_life_years > 0.0) {
            return Err(invalid("degradation.calendar_life_years", "must be > 0"));
        }
        if !(self.warning_threshold > 0.0 && self.warning_threshold < 1.0) {
            return Err(invalid("degradation.warning_threshold", "must be in (0, 1)"));
        }
        if !(self.end_of_life_capacity > 0.0 && self.end_of_life_capacity < 1.0) {
            return Err(invalid("degradation.end_of_life_capacity", "must be in (0, 1)"));
        }
        Ok(())
    }
}

/// Energy actually moved by one [`BatteryState::apply`] call, measured at the AC terminals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AppliedFlow {
    /// Signed power actually applied (kW; positive = charge).
    pub power_kw: f64,
    /// Energy drawn for charging (kWh, ≥ 0).
    pub charge_kwh: f64,
    /// Energy delivered by discharging (kWh, ≥ 0).
    pub discharge_kwh: f64,
    /// Energy lost to conversion (kWh, ≥ 0).
    pub loss_kwh: f64,
}

/// SOC left the allowed band by more than [`SOC_TOLERANCE`].
#[derive(Debug, Clone, PartialEq)]
pub struct InvariantBreach {
    pub detail: String,
}

impl fmt::Display for InvariantBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

/// Mutable battery state, owned exclusively by one simulation run.
///
/// # Power Flow Convention
/// - Positive power: charging (load on the site bus)
/// - Negative power: discharging (generation on the site bus)
#[derive(Debug, Clone)]
pub struct BatteryState {
    soc_kwh: f64,
    cumulative_throughput_kwh: f64,
    age_years: f64,
    min_kwh: f64,
    max_kwh: f64,
    energy_kwh: f64,
    power_kw: f64,
    leg_efficiency: f64,
}

/// Final battery state reported with a result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatterySnapshot {
    pub soc_kwh: f64,
    pub soc_fraction: f64,
    pub cumulative_throughput_kwh: f64,
    pub age_years: f64,
}

impl BatteryState {
    /// Fresh state at the configured starting SOC.
    #[must_use]
    pub fn new(config: &BessConfig) -> Self {
        Self {
            soc_kwh: config.initial_soc * config.energy_kwh,
            cumulative_throughput_kwh: 0.0,
            age_years: 0.0,
            min_kwh: config.min_energy_kwh(),
            max_kwh: config.max_energy_kwh(),
            energy_kwh: config.energy_kwh,
            power_kw: config.power_kw,
            leg_efficiency: config.leg_efficiency(),
        }
    }

    #[must_use]
    pub const fn soc_kwh(&self) -> f64 {
        self.soc_kwh
    }

    #[must_use]
    pub fn soc_fraction(&self) -> f64 {
        self.soc_kwh / self.energy_kwh
    }

    #[must_use]
    pub const fn cumulative_throughput_kwh(&self) -> f64 {
        self.cumulative_throughput_kwh
    }

    #[must_use]
    pub const fn age_years(&self) -> f64 {
        self.age_years
    }

    /// Stored energy above the SOC floor (kWh, internal side).
    #[must_use]
    pub fn stored_kwh(&self) -> f64 {
        (self.soc_kwh - self.min_kwh).max(0.0)
    }

    /// Free capacity below the SOC ceiling (kWh, internal side).
    #[must_use]
    pub fn headroom_kwh(&self) -> f64 {
        (self.max_kwh - self.soc_kwh).max(0.0)
    }

    /// Largest charging power the battery can absorb for `dt_hours`.
    #[must_use]
    pub fn available_charge_power(&self, dt_hours: f64) -> f64 {
        self.power_kw.min(self.headroom_kwh() / (dt_hours * self.leg_efficiency))
    }

    /// Largest discharging power the battery can deliver for `dt_hours`.
    #[must_use]
    pub fn available_discharge_power(&self, dt_hours: f64) -> f64 {
        self.power_kw.min(self.stored_kwh() * self.leg_efficiency / dt_hours)
    }

    /// Applies a clipped power setpoint for one timestep and advances calendar age.
    ///
    /// SOC is clamped into bounds when rounding pushes it out by less than [`SOC_TOLERANCE`]; the
    /// reported flow is corrected so that `charge·√η − discharge/√η` equals the SOC delta exactly.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantBreach`] when the setpoint exceeds the power rating or SOC would leave its
    /// band by more than the tolerance: the caller skipped clipping.
    pub fn apply(&mut self, power_kw: f64, dt_hours: f64) -> Result<AppliedFlow, InvariantBreach> {
        let tolerance = SOC_TOLERANCE * self.energy_kwh.max(1.0);
        if !power_kw.is_finite() || power_kw.abs() > self.power_kw * (1.0 + SOC_TOLERANCE) {
            return Err(InvariantBreach {
                detail: format!("setpoint {power_kw} kW exceeds rating {} kW", self.power_kw),
            });
        }

        let delta_kwh = if power_kw >= 0.0 {
            power_kw * dt_hours * self.leg_efficiency
        } else {
            power_kw * dt_hours / self.leg_efficiency
        };
        let unclamped = self.soc_kwh + delta_kwh;
        if unclamped > self.max_kwh + tolerance || unclamped < self.min_kwh - tolerance {
            return Err(InvariantBreach {
                detail: format!(
                    "SoC {unclamped:.6} kWh outside [{:.6}, {:.6}] kWh",
                    self.min_kwh, self.max_kwh
                ),
            });
        }

        let soc_kwh = unclamped.clamp(self.min_kwh, self.max_kwh);
        let clamped_kwh = (unclamped - soc_kwh).abs();
        if clamped_kwh > CLAMP_LOG_EPSILON * self.energy_kwh {
            warn!(clamped_kwh, soc_kwh, "near-boundary SoC clamp");
        }
        let realized_delta = soc_kwh - self.soc_kwh;
        self.soc_kwh = soc_kwh;
        self.age_years += dt_hours / HOURS_PER_YEAR;

        let flow = if realized_delta >= 0.0 {
            let charge_kwh = realized_delta / self.leg_efficiency;
            AppliedFlow {
                power_kw: charge_kwh / dt_hours,
                charge_kwh,
                discharge_kwh: 0.0,
                loss_kwh: charge_kwh - realized_delta,
            }
        } else {
            let discharge_kwh = -realized_delta * self.leg_efficiency;
            AppliedFlow {
                power_kw: -discharge_kwh / dt_hours,
                charge_kwh: 0.0,
                discharge_kwh,
                loss_kwh: -realized_delta - discharge_kwh,
            }
        };
        self.cumulative_throughput_kwh += flow.charge_kwh + flow.discharge_kwh;
        Ok(flow)
    }

    #[must_use]
    pub fn snapshot(&self) -> BatterySnapshot {
        BatterySnapshot {
            soc_kwh: self.soc_kwh,
            soc_fraction: self.soc_fraction(),
            cumulative_throughput_kwh: self.cumulative_throughput_kwh,
            age_years: self.age_years,
        }
    }
}
