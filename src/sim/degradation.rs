//! Cycle and calendar aging bookkeeping.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::devices::{AppliedFlow, BessConfig, DegradationParams};
use crate::series::HOURS_PER_YEAR;

/// Budget status. Ordered so that a status can only be replaced by a greater one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationStatus {
    Ok,
    Warning,
    Exceeded,
}

impl fmt::Display for DegradationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Warning => f.write_str("warning"),
            Self::Exceeded => f.write_str("exceeded"),
        }
    }
}

/// Snapshot of the degradation budget at the end of a run. Reported only: it never feeds back
/// into dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradationBudget {
    pub efc_budget: f64,
    pub efc_used: f64,
    pub status: DegradationStatus,
    pub calendar_age_years: f64,
    pub calendar_life_fraction: f64,
    /// Estimated remaining capacity fraction, fading linearly to the end-of-life capacity at the
    /// larger of the cycle and calendar fractions.
    pub state_of_health: f64,
}

/// Converts realized AC-side throughput into equivalent full cycles and accrues calendar age.
#[derive(Debug, Clone)]
pub struct DegradationTracker {
    params: DegradationParams,
    energy_kwh: f64,
    throughput_kwh: f64,
    age_years: f64,
    status: DegradationStatus,
}

impl DegradationTracker {
    #[must_use]
    pub fn new(config: &BessConfig) -> Self {
        Self {
            params: *config.degradation(),
            energy_kwh: config.energy_kwh(),
            throughput_kwh: 0.0,
            age_years: 0.0,
            status: DegradationStatus::Ok,
        }
    }

    /// Records one timestep and returns the new status when it changed.
    pub fn record(&mut self, timestep: usize, flow: &AppliedFlow, dt_hours: f64) -> Option<DegradationStatus> {
        self.throughput_kwh += flow.charge_kwh + flow.discharge_kwh;
        self.age_years += dt_hours / HOURS_PER_YEAR;

        let status = self.status_for(self.cycle_fraction()).max(self.status);
        if status == self.status {
            return None;
        }
        warn!(
            timestep,
            efc_used = self.efc_used(),
            efc_budget = self.params.cycle_life_efc,
            %status,
            "degradation budget status changed"
        );
        self.status = status;
        Some(status)
    }

    /// One EFC per `2·E` of absolute throughput.
    #[must_use]
    pub fn efc_used(&self) -> f64 {
        self.throughput_kwh / (2.0 * self.energy_kwh)
    }

    #[must_use]
    pub const fn status(&self) -> DegradationStatus {
        self.status
    }

    fn cycle_fraction(&self) -> f64 {
        self.efc_used() / self.params.cycle_life_efc
    }

    fn status_for(&self, fraction: f64) -> DegradationStatus {
        if fraction >= 1.0 {
            DegradationStatus::Exceeded
        } else if fraction >= self.params.warning_threshold {
            DegradationStatus::Warning
        } else {
            DegradationStatus::Ok
        }
    }

    #[must_use]
    pub fn budget(&self) -> DegradationBudget {
        let calendar_life_fraction = self.age_years / self.params.calendar_life_years;
        let worn = self.cycle_fraction().max(calendar_life_fraction);
        let fade = (1.0 - self.params.end_of_life_capacity) * worn;
        DegradationBudget {
            efc_budget: self.params.cycle_life_efc,
            efc_used: self.efc_used(),
            status: self.status,
            calendar_age_years: self.age_years,
            calendar_life_fraction,
            state_of_health: (1.0 - fade).max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn tracker(cycle_life_efc: f64) -> DegradationTracker {
        let params = DegradationParams { cycle_life_efc, ..DegradationParams::default() };
        let config = BessConfig::new(10.0, 10.0, 1.0, 0.0, 1.0).unwrap().with_degradation(params).unwrap();
        DegradationTracker::new(&config)
    }

    fn flow(charge_kwh: f64, discharge_kwh: f64) -> AppliedFlow {
        AppliedFlow { power_kw: charge_kwh - discharge_kwh, charge_kwh, discharge_kwh, loss_kwh: 0.0 }
    }

    #[test]
    fn full_cycle_is_one_efc() {
        let mut t = tracker(6000.0);
        t.record(0, &flow(10.0, 0.0), 1.0);
        t.record(1, &flow(0.0, 10.0), 1.0);
        assert_relative_eq!(t.efc_used(), 1.0);
        assert_relative_eq!(t.budget().calendar_age_years, 2.0 / 8760.0);
    }

    #[test]
    fn status_moves_ok_warning_exceeded() {
        let mut t = tracker(2.0);
        assert_eq!(t.record(0, &flow(20.0, 0.0), 1.0), None); // 1 EFC = 50%
        assert_eq!(t.record(1, &flow(0.0, 12.0), 1.0), Some(DegradationStatus::Warning)); // 80%
        assert_eq!(t.record(2, &flow(8.0, 0.0), 1.0), Some(DegradationStatus::Exceeded));
        assert_eq!(t.record(3, &flow(0.0, 0.0), 1.0), None);
        assert_eq!(t.status(), DegradationStatus::Exceeded);
    }

    #[test]
    fn state_of_health_fades_to_end_of_life() {
        let mut t = tracker(1.0);
        t.record(0, &flow(10.0, 10.0), 1.0);
        assert_relative_eq!(t.budget().state_of_health, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn status_order_is_monotone() {
        assert!(DegradationStatus::Ok < DegradationStatus::Warning);
        assert!(DegradationStatus::Warning < DegradationStatus::Exceeded);
    }
}
