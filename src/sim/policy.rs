//! Dispatch policies: per-timestep requested battery power.
//!
//! A policy only *requests* power. The engine validates the request and clips it against the
//! battery's available charge/discharge power afterwards, so policies never need to guard SOC
//! bounds themselves (except where a policy narrows its own operating band, as `Stacked` does).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::devices::{BatteryState, BessConfig};
use crate::error::{DispatchError, Result};
use crate::series::Topology;

/// Energy below which a battery is treated as full or empty when deciding to act (kWh).
const ENERGY_EPSILON_KWH: f64 = 1e-9;

/// The active dispatch policy of one run. Exactly one is active; required fields are checked at
/// deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DispatchMode {
    /// Charge from PV surplus, discharge to cover residual load. Never exports from the battery.
    PvSurplus,
    /// Keep grid import at or below `target_kw`.
    PeakShaving {
        target_kw: f64,
        /// Background recharge is allowed while net load is below this level (default `target_kw`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recharge_below_kw: Option<f64>,
        /// Background recharge rate (default 10% of `power_kw`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recharge_rate_kw: Option<f64>,
    },
    /// Peak shaving first, PV self-consumption inside a reserve-narrowed SOC band otherwise.
    ///
    /// Self-consumption charges up to `soc_max − soc_reserve_frac` and discharges down to
    /// `soc_min + soc_reserve_frac`, so the reserve must stay below half the SOC band
    /// (`[0, 0.4)` on a `0.1..0.9` battery). Peak shaving may use the whole band.
    Stacked { peak_target_kw: f64, soc_reserve_frac: f64 },
    /// Threshold price arbitrage at full power.
    Arbitrage { charge_price_threshold: f64, discharge_price_threshold: f64 },
    /// Peak shaving on a site without PV.
    LoadOnly {
        target_kw: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recharge_below_kw: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recharge_rate_kw: Option<f64>,
    },
}

/// A policy's requested battery action, magnitudes in kW.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PowerRequest {
    Idle,
    Charge(f64),
    Discharge(f64),
}

impl PowerRequest {
    /// Requested magnitude (kW), `0.0` when idle.
    #[must_use]
    pub const fn magnitude_kw(self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::Charge(kw) | Self::Discharge(kw) => kw,
        }
    }

    /// Signed power: positive charge, negative discharge.
    #[must_use]
    pub fn signed_kw(self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::Charge(kw) => kw,
            Self::Discharge(kw) => -kw,
        }
    }
}

/// Site signals seen by a policy at one timestep.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext {
    /// `load − pv` (kW); negative means PV surplus.
    pub net_load_kw: f64,
    pub price_per_mwh: Option<f64>,
    pub dt_hours: f64,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PvSurplus => f.write_str("pv_surplus"),
            Self::PeakShaving { target_kw, .. } => write!(f, "peak_shaving(target={target_kw} kW)"),
            Self::Stacked { peak_target_kw, soc_reserve_frac } => {
                write!(f, "stacked(target={peak_target_kw} kW, reserve={soc_reserve_frac})")
            }
            Self::Arbitrage { charge_price_threshold, discharge_price_threshold } => write!(
                f,
                "arbitrage(charge<={charge_price_threshold}, discharge>{discharge_price_threshold})"
            ),
            Self::LoadOnly { target_kw, .. } => write!(f, "load_only(target={target_kw} kW)"),
        }
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> DispatchError {
    DispatchError::InvalidConfig { field, message: message.into() }
}

impl DispatchMode {
    /// Stable policy name recorded in audit metadata.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PvSurplus => "pv_surplus",
            Self::PeakShaving { .. } => "peak_shaving",
            Self::Stacked { .. } => "stacked",
            Self::Arbitrage { .. } => "arbitrage",
            Self::LoadOnly { .. } => "load_only",
        }
    }

    /// Topology this policy is restricted to, if any.
    #[must_use]
    pub const fn required_topology(&self) -> Option<Topology> {
        match self {
            Self::PvSurplus | Self::Stacked { .. } => Some(Topology::PvLoad),
            Self::LoadOnly { .. } => Some(Topology::LoadOnly),
            Self::PeakShaving { .. } | Self::Arbitrage { .. } => None,
        }
    }

    #[must_use]
    pub const fn requires_price(&self) -> bool {
        matches!(self, Self::Arbitrage { .. })
    }

    /// Grid import target, for the peak-exceedance metrics.
    #[must_use]
    pub const fn peak_target_kw(&self) -> Option<f64> {
        match self {
            Self::PeakShaving { target_kw, .. } | Self::LoadOnly { target_kw, .. } => {
                Some(*target_kw)
            }
            Self::Stacked { peak_target_kw, .. } => Some(*peak_target_kw),
            Self::PvSurplus | Self::Arbitrage { .. } => None,
        }
    }

    /// Checks policy parameters against the battery they will drive.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] naming the offending parameter.
    pub fn validate(&self, bess: &BessConfig) -> Result<()> {
        match *self {
            Self::PvSurplus => Ok(()),
            Self::PeakShaving { target_kw, recharge_below_kw, recharge_rate_kw }
            | Self::LoadOnly { target_kw, recharge_below_kw, recharge_rate_kw } => {
                if !(target_kw.is_finite() && target_kw >= 0.0) {
                    return Err(invalid("mode.target_kw", format!("must be >= 0, got {target_kw}")));
                }
                if recharge_below_kw.is_some_and(|kw| !kw.is_finite()) {
                    return Err(invalid("mode.recharge_below_kw", "must be finite"));
                }
                if recharge_rate_kw.is_some_and(|kw| !(kw.is_finite() && kw > 0.0)) {
                    return Err(invalid("mode.recharge_rate_kw", "must be > 0"));
                }
                Ok(())
            }
            Self::Stacked { peak_target_kw, soc_reserve_frac } => {
                if !(peak_target_kw.is_finite() && peak_target_kw >= 0.0) {
                    return Err(invalid(
                        "mode.peak_target_kw",
                        format!("must be >= 0, got {peak_target_kw}"),
                    ));
                }
                let half_band = (bess.soc_max() - bess.soc_min()) / 2.0;
                if !(0.0..half_band).contains(&soc_reserve_frac) {
                    return Err(invalid(
                        "mode.soc_reserve_frac",
                        format!("must be in [0, {half_band}), got {soc_reserve_frac}"),
                    ));
                }
                Ok(())
            }
            Self::Arbitrage { charge_price_threshold, discharge_price_threshold } => {
                if !(charge_price_threshold.is_finite() && discharge_price_threshold.is_finite()) {
                    return Err(invalid("mode.charge_price_threshold", "thresholds must be finite"));
                }
                if charge_price_threshold > discharge_price_threshold {
                    return Err(invalid(
                        "mode.charge_price_threshold",
                        format!(
                            "must not exceed discharge_price_threshold ({charge_price_threshold} > {discharge_price_threshold})"
                        ),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Requested battery action for one timestep.
    #[must_use]
    pub fn request(&self, ctx: &PolicyContext, battery: &BatteryState, bess: &BessConfig) -> PowerRequest {
        match *self {
            Self::PvSurplus => pv_surplus(ctx.net_load_kw, bess.power_kw()),
            Self::PeakShaving { target_kw, recharge_below_kw, recharge_rate_kw }
            | Self::LoadOnly { target_kw, recharge_below_kw, recharge_rate_kw } => peak_shaving(
                ctx.net_load_kw,
                target_kw,
                recharge_below_kw.unwrap_or(target_kw),
                recharge_rate_kw.unwrap_or(0.1 * bess.power_kw()),
                battery,
            ),
            Self::Stacked { peak_target_kw, soc_reserve_frac } => {
                stacked(ctx, peak_target_kw, soc_reserve_frac, battery, bess)
            }
            Self::Arbitrage { charge_price_threshold, discharge_price_threshold } => arbitrage(
                ctx.price_per_mwh,
                charge_price_threshold,
                discharge_price_threshold,
                battery,
                bess.power_kw(),
            ),
        }
    }
}

fn pv_surplus(net_load_kw: f64, power_kw: f64) -> PowerRequest {
    if net_load_kw < 0.0 {
        PowerRequest::Charge(-net_load_kw)
    } else if net_load_kw > 0.0 {
        PowerRequest::Discharge(net_load_kw.min(power_kw))
    } else {
        PowerRequest::Idle
    }
}

fn peak_shaving(
    net_load_kw: f64,
    target_kw: f64,
    recharge_below_kw: f64,
    recharge_rate_kw: f64,
    battery: &BatteryState,
) -> PowerRequest {
    if net_load_kw > target_kw {
        return PowerRequest::Discharge(net_load_kw - target_kw);
    }
    if net_load_kw < recharge_below_kw && battery.headroom_kwh() > ENERGY_EPSILON_KWH {
        // recharging must not itself lift import above the target
        let charge_kw = recharge_rate_kw.min(target_kw - net_load_kw);
        if charge_kw > 0.0 {
            return PowerRequest::Charge(charge_kw);
        }
    }
    PowerRequest::Idle
}

/// Peak-shaving discharge wins over everything and may use the whole SOC range. Otherwise PV
/// surplus charges up to `(soc_max − reserve)·E` and self-consumption discharges down to
/// `(soc_min + reserve)·E`.
fn stacked(
    ctx: &PolicyContext,
    peak_target_kw: f64,
    reserve: f64,
    battery: &BatteryState,
    bess: &BessConfig,
) -> PowerRequest {
    let eta = bess.leg_efficiency();
    let net_load_kw = ctx.net_load_kw;
    let floor_kwh = (bess.soc_min() + reserve) * bess.energy_kwh();
    let above_floor_kw = (battery.soc_kwh() - floor_kwh).max(0.0) * eta / ctx.dt_hours;

    if net_load_kw > peak_target_kw {
        let peak_kw = net_load_kw - peak_target_kw;
        let self_consumption_kw = peak_target_kw.min((above_floor_kw - peak_kw).max(0.0));
        return PowerRequest::Discharge(peak_kw + self_consumption_kw);
    }

    if net_load_kw < 0.0 {
        let ceiling_kwh = (bess.soc_max() - reserve) * bess.energy_kwh();
        let room_kwh = ceiling_kwh - battery.soc_kwh();
        if room_kwh <= ENERGY_EPSILON_KWH {
            return PowerRequest::Idle;
        }
        return PowerRequest::Charge((-net_load_kw).min(room_kwh / (ctx.dt_hours * eta)));
    }

    let discharge_kw = net_load_kw.min(bess.power_kw()).min(above_floor_kw);
    if discharge_kw > 0.0 { PowerRequest::Discharge(discharge_kw) } else { PowerRequest::Idle }
}

fn arbitrage(
    price_per_mwh: Option<f64>,
    charge_threshold: f64,
    discharge_threshold: f64,
    battery: &BatteryState,
    power_kw: f64,
) -> PowerRequest {
    let Some(price) = price_per_mwh else {
        return PowerRequest::Idle;
    };
    if price <= charge_threshold && battery.headroom_kwh() > ENERGY_EPSILON_KWH {
        PowerRequest::Charge(power_kw)
    } else if price > discharge_threshold && battery.stored_kwh() > ENERGY_EPSILON_KWH {
        PowerRequest::Discharge(power_kw)
    } else {
        PowerRequest::Idle
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn bess(soc: f64) -> BessConfig {
        BessConfig::new(100.0, 200.0, 0.9, 0.1, 0.9).unwrap().with_initial_soc(soc).unwrap()
    }

    fn ctx(net_load_kw: f64, price: Option<f64>) -> PolicyContext {
        PolicyContext { net_load_kw, price_per_mwh: price, dt_hours: 1.0 }
    }

    fn request(mode: DispatchMode, soc: f64, net_load_kw: f64, price: Option<f64>) -> PowerRequest {
        let config = bess(soc);
        let battery = BatteryState::new(&config);
        mode.request(&ctx(net_load_kw, price), &battery, &config)
    }

    #[test]
    fn pv_surplus_charges_surplus_and_covers_deficit() {
        assert_eq!(request(DispatchMode::PvSurplus, 0.5, -30.0, None), PowerRequest::Charge(30.0));
        assert_eq!(request(DispatchMode::PvSurplus, 0.5, 40.0, None), PowerRequest::Discharge(40.0));
        assert_eq!(request(DispatchMode::PvSurplus, 0.5, 400.0, None), PowerRequest::Discharge(100.0));
        assert_eq!(request(DispatchMode::PvSurplus, 0.5, 0.0, None), PowerRequest::Idle);
    }

    #[test]
    fn peak_shaving_discharges_excess_and_recharges_below_target() {
        let mode = DispatchMode::PeakShaving { target_kw: 60.0, recharge_below_kw: None, recharge_rate_kw: None };
        assert_eq!(request(mode, 0.5, 90.0, None), PowerRequest::Discharge(30.0));
        // default rate is 10% of 100 kW
        assert_eq!(request(mode, 0.5, 20.0, None), PowerRequest::Charge(10.0));
        // recharge never lifts import above the target
        assert_eq!(request(mode, 0.5, 55.0, None), PowerRequest::Charge(5.0));
        assert_eq!(request(mode, 0.9, 20.0, None), PowerRequest::Idle);
        assert_eq!(request(mode, 0.5, 60.0, None), PowerRequest::Idle);
    }

    #[test]
    fn peak_shaving_respects_recharge_window() {
        let mode = DispatchMode::PeakShaving {
            target_kw: 60.0,
            recharge_below_kw: Some(30.0),
            recharge_rate_kw: Some(25.0),
        };
        assert_eq!(request(mode, 0.5, 40.0, None), PowerRequest::Idle);
        assert_eq!(request(mode, 0.5, 10.0, None), PowerRequest::Charge(25.0));
    }

    #[test]
    fn stacked_caps_pv_charging_below_reserve_ceiling() {
        let mode = DispatchMode::Stacked { peak_target_kw: 500.0, soc_reserve_frac: 0.2 };
        // ceiling (0.9 - 0.2) * 200 = 140 kWh, SOC at 130 kWh → 10 kWh room / √0.9
        let PowerRequest::Charge(kw) = request(mode, 0.65, -80.0, None) else {
            panic!("expected charge");
        };
        assert_relative_eq!(kw, 10.0 / 0.9_f64.sqrt(), epsilon = 1e-9);
        assert_eq!(request(mode, 0.7, -80.0, None), PowerRequest::Idle);
    }

    #[test]
    fn stacked_keeps_self_consumption_above_reserve_floor() {
        let mode = DispatchMode::Stacked { peak_target_kw: 500.0, soc_reserve_frac: 0.2 };
        // floor (0.1 + 0.2) * 200 = 60 kWh
        assert_eq!(request(mode, 0.3, 40.0, None), PowerRequest::Idle);
        assert_eq!(request(mode, 0.8, 40.0, None), PowerRequest::Discharge(40.0));
    }

    #[test]
    fn stacked_peak_discharge_uses_reserve() {
        let mode = DispatchMode::Stacked { peak_target_kw: 50.0, soc_reserve_frac: 0.2 };
        // at the reserve floor only the peak part is requested
        assert_eq!(request(mode, 0.3, 80.0, None), PowerRequest::Discharge(30.0));
        // with energy above the floor the residual load is covered as well
        assert_eq!(request(mode, 0.8, 80.0, None), PowerRequest::Discharge(80.0));
    }

    #[test]
    fn arbitrage_threshold_boundaries() {
        let mode = DispatchMode::Arbitrage { charge_price_threshold: 100.0, discharge_price_threshold: 300.0 };
        assert_eq!(request(mode, 0.5, 0.0, Some(100.0)), PowerRequest::Charge(100.0));
        assert_eq!(request(mode, 0.5, 0.0, Some(300.0)), PowerRequest::Idle);
        assert_eq!(request(mode, 0.5, 0.0, Some(301.0)), PowerRequest::Discharge(100.0));
        assert_eq!(request(mode, 0.5, 0.0, Some(200.0)), PowerRequest::Idle);
        assert_eq!(request(mode, 0.9, 0.0, Some(50.0)), PowerRequest::Idle);
        assert_eq!(request(mode, 0.1, 0.0, Some(500.0)), PowerRequest::Idle);
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        let config = bess(0.5);
        let reserve_too_big = DispatchMode::Stacked { peak_target_kw: 10.0, soc_reserve_frac: 0.4 };
        assert!(reserve_too_big.validate(&config).is_err());
        let crossed = DispatchMode::Arbitrage { charge_price_threshold: 200.0, discharge_price_threshold: 100.0 };
        assert!(crossed.validate(&config).is_err());
        let negative = DispatchMode::LoadOnly { target_kw: -1.0, recharge_below_kw: None, recharge_rate_kw: None };
        assert!(negative.validate(&config).is_err());
        assert!(DispatchMode::PvSurplus.validate(&config).is_ok());
    }

    #[test]
    fn stacked_reserve_limited_to_half_band() {
        let config = bess(0.5);
        let inside = DispatchMode::Stacked { peak_target_kw: 10.0, soc_reserve_frac: 0.39 };
        assert!(inside.validate(&config).is_ok());
        let outside = DispatchMode::Stacked { peak_target_kw: 10.0, soc_reserve_frac: 0.45 };
        assert!(matches!(
            outside.validate(&config),
            Err(DispatchError::InvalidConfig { field: "mode.soc_reserve_frac", .. })
        ));
    }

    #[test]
    fn deserializes_tagged_modes() {
        let mode: DispatchMode =
            serde_json::from_str(r#"{"policy": "stacked", "peak_target_kw": 80, "soc_reserve_frac": 0.2}"#)
                .unwrap();
        assert_eq!(mode, DispatchMode::Stacked { peak_target_kw: 80.0, soc_reserve_frac: 0.2 });
        let missing = serde_json::from_str::<DispatchMode>(r#"{"policy": "peak_shaving"}"#);
        assert!(missing.is_err());
        let mode: DispatchMode = serde_json::from_str(r#"{"policy": "pv_surplus"}"#).unwrap();
        assert_eq!(mode.name(), "pv_surplus");
    }

    #[test]
    fn topology_requirements() {
        assert_eq!(DispatchMode::PvSurplus.required_topology(), Some(Topology::PvLoad));
        let load_only = DispatchMode::LoadOnly { target_kw: 1.0, recharge_below_kw: None, recharge_rate_kw: None };
        assert_eq!(load_only.required_topology(), Some(Topology::LoadOnly));
        let arbitrage = DispatchMode::Arbitrage { charge_price_threshold: 0.0, discharge_price_threshold: 1.0 };
        assert!(arbitrage.requires_price());
        assert_eq!(arbitrage.required_topology(), None);
    }
}
