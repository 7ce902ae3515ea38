//! Result aggregation: period totals, monthly records, histograms and audit metadata.
//!
//! The [`Aggregator`] is fed one [`StepRecord`] per timestep and folded into a [`DispatchResult`]
//! once the loop completes, so metrics and trace are computed from the same records.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::degradation::DegradationBudget;
use super::types::StepRecord;
use crate::devices::BatterySnapshot;
use crate::devices::battery::EFFICIENCY_CONVENTION;
use crate::series::{HOURS_PER_YEAR, TimeResolution};

/// Number of bins of the SOC and power-utilization histograms.
pub const HISTOGRAM_BINS: usize = 10;

/// Power below which a step counts as idle for the utilization histogram (kW).
const IDLE_EPSILON_KW: f64 = 1e-9;

/// Source of the wall-clock run duration recorded in audit metadata.
///
/// Injected so that results are reproducible byte for byte under test.
pub trait RunTimer: Send {
    fn start(&mut self);
    fn elapsed(&self) -> Duration;
}

/// Measures real elapsed time.
#[derive(Debug, Default)]
pub struct SystemTimer {
    started: Option<Instant>,
}

impl RunTimer for SystemTimer {
    fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    fn elapsed(&self) -> Duration {
        self.started.map(|started| started.elapsed()).unwrap_or_default()
    }
}

/// Always reports the same duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTimer(pub Duration);

impl RunTimer for FixedTimer {
    fn start(&mut self) {}

    fn elapsed(&self) -> Duration {
        self.0
    }
}

/// Totals over the whole simulated period. Energies in kWh, powers in kW, costs in the price
/// series' currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodTotals {
    pub load_kwh: f64,
    pub pv_kwh: f64,
    pub charge_kwh: f64,
    pub discharge_kwh: f64,
    /// Equivalent full cycles.
    pub cycles: f64,
    pub roundtrip_losses_kwh: f64,
    pub curtailment_kwh: f64,
    pub curtailment_before_kwh: f64,
    pub grid_import_before_kwh: f64,
    pub grid_import_after_kwh: f64,
    pub grid_export_before_kwh: f64,
    pub grid_export_after_kwh: f64,
    pub peak_import_before_kw: f64,
    pub peak_import_after_kw: f64,
    /// Share of PV generation consumed on site.
    pub autoconsumption_before_pct: f64,
    pub autoconsumption_after_pct: f64,
    /// Share of load not served from the grid.
    pub self_sufficiency_before_pct: f64,
    pub self_sufficiency_after_pct: f64,
    pub energy_cost_before: Option<f64>,
    pub energy_cost_after: Option<f64>,
    pub net_savings: Option<f64>,
    /// Steps where grid import stayed above the peak target (peak modes only).
    pub peak_exceedance_steps: usize,
    pub unserved_peak_kwh: f64,
    pub period_hours: f64,
    pub period_years: f64,
}

/// One calendar month, aggregated across all years of the series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRecord {
    /// 1 = January.
    pub month: u32,
    pub hours: f64,
    pub load_kwh: f64,
    pub pv_kwh: f64,
    pub charge_kwh: f64,
    pub discharge_kwh: f64,
    pub grid_import_kwh: f64,
    pub grid_export_kwh: f64,
    pub curtailment_kwh: f64,
    pub peak_import_before_kw: f64,
    pub peak_import_after_kw: f64,
    pub mean_soc_fraction: f64,
}

/// Hours spent in each of [`HISTOGRAM_BINS`] equal-width bins over `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub hours: Vec<f64>,
}

impl Histogram {
    fn new() -> Self {
        Self { hours: vec![0.0; HISTOGRAM_BINS] }
    }

    fn add(&mut self, fraction: f64, hours: f64) {
        let bin = ((fraction * HISTOGRAM_BINS as f64).floor().max(0.0) as usize).min(HISTOGRAM_BINS - 1);
        self.hours[bin] += hours;
    }

    #[must_use]
    pub fn total_hours(&self) -> f64 {
        self.hours.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub engine_version: String,
    pub policy_used: String,
    pub run_duration: Duration,
    pub resolution: TimeResolution,
    pub timesteps: usize,
    pub efficiency_convention: String,
}

/// Structured output of one completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub totals: PeriodTotals,
    /// Always 12 records, January first.
    pub monthly: Vec<MonthlyRecord>,
    pub soc_histogram: Histogram,
    pub power_histogram: Histogram,
    pub degradation: DegradationBudget,
    pub final_state: BatterySnapshot,
    pub audit: AuditMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<StepRecord>>,
}

#[derive(Debug, Clone, Default)]
struct MonthAccumulator {
    hours: f64,
    load_kwh: f64,
    pv_kwh: f64,
    charge_kwh: f64,
    discharge_kwh: f64,
    grid_import_kwh: f64,
    grid_export_kwh: f64,
    curtailment_kwh: f64,
    peak_import_before_kw: f64,
    peak_import_after_kw: f64,
    soc_hours: f64,
}

/// Static inputs the aggregator needs besides the step records.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorSetup {
    pub dt_hours: f64,
    pub power_kw: f64,
    pub peak_target_kw: Option<f64>,
    pub export_price_factor: f64,
    pub record_trace: bool,
}

/// Streaming accumulator of per-step records.
#[derive(Debug, Clone)]
pub struct Aggregator {
    setup: AggregatorSetup,
    steps: usize,
    totals: PeriodTotals,
    priced: bool,
    months: [MonthAccumulator; 12],
    soc_histogram: Histogram,
    power_histogram: Histogram,
    trace: Option<Vec<StepRecord>>,
}

impl Aggregator {
    #[must_use]
    pub fn new(setup: AggregatorSetup, capacity: usize) -> Self {
        Self {
            setup,
            steps: 0,
            totals: PeriodTotals::default(),
            priced: false,
            months: Default::default(),
            soc_histogram: Histogram::new(),
            power_histogram: Histogram::new(),
            trace: setup.record_trace.then(|| Vec::with_capacity(capacity)),
        }
    }

    /// Folds one step into the running totals.
    pub fn record(&mut self, step: StepRecord, month_index: usize) {
        let dt = self.setup.dt_hours;
        let t = &mut self.totals;
        self.steps += 1;

        t.load_kwh += step.load_kw * dt;
        t.pv_kwh += step.pv_kw * dt;
        t.charge_kwh += step.charge_kwh;
        t.discharge_kwh += step.discharge_kwh;
        t.roundtrip_losses_kwh += step.loss_kwh;
        t.curtailment_kwh += step.curtailment_kw * dt;
        t.curtailment_before_kwh += step.curtailment_before_kw * dt;
        t.grid_import_before_kwh += step.grid_import_before_kw * dt;
        t.grid_import_after_kwh += step.grid_import_kw * dt;
        t.grid_export_before_kwh += step.grid_export_before_kw * dt;
        t.grid_export_after_kwh += step.grid_export_kw * dt;
        t.peak_import_before_kw = t.peak_import_before_kw.max(step.grid_import_before_kw);
        t.peak_import_after_kw = t.peak_import_after_kw.max(step.grid_import_kw);

        if let Some(price) = step.price_per_mwh {
            // price per MWh, energy in kWh
            let export_price = price * self.setup.export_price_factor;
            let before = (step.grid_import_before_kw * price - step.grid_export_before_kw * export_price)
                * dt
                / 1000.0;
            let after = (step.grid_import_kw * price - step.grid_export_kw * export_price) * dt / 1000.0;
            *t.energy_cost_before.get_or_insert(0.0) += before;
            *t.energy_cost_after.get_or_insert(0.0) += after;
            self.priced = true;
        }

        if let Some(target) = self.setup.peak_target_kw
            && step.grid_import_kw > target + IDLE_EPSILON_KW
        {
            t.peak_exceedance_steps += 1;
            t.unserved_peak_kwh += (step.grid_import_kw - target) * dt;
        }

        let month = &mut self.months[month_index.min(11)];
        month.hours += dt;
        month.load_kwh += step.load_kw * dt;
        month.pv_kwh += step.pv_kw * dt;
        month.charge_kwh += step.charge_kwh;
        month.discharge_kwh += step.discharge_kwh;
        month.grid_import_kwh += step.grid_import_kw * dt;
        month.grid_export_kwh += step.grid_export_kw * dt;
        month.curtailment_kwh += step.curtailment_kw * dt;
        month.peak_import_before_kw = month.peak_import_before_kw.max(step.grid_import_before_kw);
        month.peak_import_after_kw = month.peak_import_after_kw.max(step.grid_import_kw);
        month.soc_hours += step.soc_fraction * dt;

        self.soc_histogram.add(step.soc_fraction, dt);
        if step.battery_kw.abs() > IDLE_EPSILON_KW {
            self.power_histogram.add(step.battery_kw.abs() / self.setup.power_kw, dt);
        }

        if let Some(trace) = self.trace.as_mut() {
            trace.push(step);
        }
    }

    /// Completes the aggregation.
    #[must_use]
    pub fn finish(
        self,
        degradation: DegradationBudget,
        final_state: BatterySnapshot,
        audit: AuditMetadata,
    ) -> DispatchResult {
        let mut totals = self.totals;
        let pct = |part: f64, whole: f64| if whole > 0.0 { (100.0 * part / whole).clamp(0.0, 100.0) } else { 0.0 };

        totals.cycles = degradation.efc_used;
        totals.period_hours = self.steps as f64 * self.setup.dt_hours;
        totals.period_years = totals.period_hours / HOURS_PER_YEAR;
        totals.autoconsumption_before_pct = pct(
            totals.pv_kwh - totals.grid_export_before_kwh - totals.curtailment_before_kwh,
            totals.pv_kwh,
        );
        totals.autoconsumption_after_pct =
            pct(totals.pv_kwh - totals.grid_export_after_kwh - totals.curtailment_kwh, totals.pv_kwh);
        totals.self_sufficiency_before_pct =
            pct(totals.load_kwh - totals.grid_import_before_kwh, totals.load_kwh);
        totals.self_sufficiency_after_pct =
            pct(totals.load_kwh - totals.grid_import_after_kwh, totals.load_kwh);
        if self.priced {
            totals.net_savings = totals
                .energy_cost_before
                .zip(totals.energy_cost_after)
                .map(|(before, after)| before - after);
        }

        let monthly = self
            .months
            .iter()
            .zip(1..)
            .map(|(m, month)| MonthlyRecord {
                month,
                hours: m.hours,
                load_kwh: m.load_kwh,
                pv_kwh: m.pv_kwh,
                charge_kwh: m.charge_kwh,
                discharge_kwh: m.discharge_kwh,
                grid_import_kwh: m.grid_import_kwh,
                grid_export_kwh: m.grid_export_kwh,
                curtailment_kwh: m.curtailment_kwh,
                peak_import_before_kw: m.peak_import_before_kw,
                peak_import_after_kw: m.peak_import_after_kw,
                mean_soc_fraction: if m.hours > 0.0 { m.soc_hours / m.hours } else { 0.0 },
            })
            .collect();

        DispatchResult {
            totals,
            monthly,
            soc_histogram: self.soc_histogram,
            power_histogram: self.power_histogram,
            degradation,
            final_state,
            audit,
            trace: self.trace,
        }
    }
}

impl AuditMetadata {
    #[must_use]
    pub fn new(policy_used: &str, run_duration: Duration, resolution: TimeResolution, timesteps: usize) -> Self {
        Self {
            engine_version: env!("CARGO_PKG_VERSION").to_owned(),
            policy_used: policy_used.to_owned(),
            run_duration,
            resolution,
            timesteps,
            efficiency_convention: EFFICIENCY_CONVENTION.to_owned(),
        }
    }
}

impl fmt::Display for DispatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.totals;
        writeln!(f, "--- Dispatch Report ({}) ---", self.audit.policy_used)?;
        writeln!(
            f,
            "Period:                {:.0} h ({} steps, {})",
            t.period_hours, self.audit.timesteps, self.audit.resolution
        )?;
        writeln!(f, "Load / PV:             {:.1} / {:.1} kWh", t.load_kwh, t.pv_kwh)?;
        writeln!(
            f,
            "Battery charge/disch.: {:.1} / {:.1} kWh ({:.2} equiv. cycles, {:.1} kWh losses)",
            t.charge_kwh, t.discharge_kwh, t.cycles, t.roundtrip_losses_kwh
        )?;
        writeln!(
            f,
            "Grid import:           {:.1} -> {:.1} kWh",
            t.grid_import_before_kwh, t.grid_import_after_kwh
        )?;
        writeln!(
            f,
            "Grid export:           {:.1} -> {:.1} kWh",
            t.grid_export_before_kwh, t.grid_export_after_kwh
        )?;
        writeln!(
            f,
            "Peak import:           {:.2} -> {:.2} kW",
            t.peak_import_before_kw, t.peak_import_after_kw
        )?;
        writeln!(
            f,
            "Autoconsumption:       {:.1}% -> {:.1}%",
            t.autoconsumption_before_pct, t.autoconsumption_after_pct
        )?;
        writeln!(
            f,
            "Self-sufficiency:      {:.1}% -> {:.1}%",
            t.self_sufficiency_before_pct, t.self_sufficiency_after_pct
        )?;
        writeln!(f, "Curtailment:           {:.1} kWh", t.curtailment_kwh)?;
        if let (Some(before), Some(after), Some(savings)) =
            (t.energy_cost_before, t.energy_cost_after, t.net_savings)
        {
            writeln!(f, "Energy cost:           {before:.2} -> {after:.2} (savings {savings:.2})")?;
        }
        if t.peak_exceedance_steps > 0 {
            writeln!(
                f,
                "Peak target missed:    {} steps ({:.1} kWh unserved)",
                t.peak_exceedance_steps, t.unserved_peak_kwh
            )?;
        }
        write!(
            f,
            "Degradation:           {:.2}/{:.0} EFC, {:.2} y, SoH {:.1}% ({})",
            self.degradation.efc_used,
            self.degradation.efc_budget,
            self.degradation.calendar_age_years,
            self.degradation.state_of_health * 100.0,
            self.degradation.status,
        )
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::series::default_start;
    use crate::sim::degradation::DegradationStatus;

    fn setup() -> AggregatorSetup {
        AggregatorSetup {
            dt_hours: 1.0,
            power_kw: 5.0,
            peak_target_kw: Some(4.0),
            export_price_factor: 0.5,
            record_trace: true,
        }
    }

    fn step(battery_kw: f64, import_kw: f64, export_kw: f64, soc_fraction: f64, price: Option<f64>) -> StepRecord {
        StepRecord {
            timestep: 0,
            timestamp: default_start(),
            load_kw: 3.0,
            pv_kw: 1.0,
            price_per_mwh: price,
            requested_kw: battery_kw,
            battery_kw,
            soc_kwh: soc_fraction * 10.0,
            soc_fraction,
            grid_import_kw: import_kw,
            grid_export_kw: export_kw,
            curtailment_kw: 0.0,
            grid_import_before_kw: 2.0,
            grid_export_before_kw: 0.0,
            curtailment_before_kw: 0.0,
            charge_kwh: battery_kw.max(0.0),
            discharge_kwh: (-battery_kw).max(0.0),
            loss_kwh: 0.0,
        }
    }

    fn finish(aggregator: Aggregator) -> DispatchResult {
        let budget = DegradationBudget {
            efc_budget: 6000.0,
            efc_used: 0.5,
            status: DegradationStatus::Ok,
            calendar_age_years: 0.0,
            calendar_life_fraction: 0.0,
            state_of_health: 1.0,
        };
        let snapshot = BatterySnapshot { soc_kwh: 5.0, soc_fraction: 0.5, cumulative_throughput_kwh: 10.0, age_years: 0.0 };
        let audit = AuditMetadata::new("peak_shaving", Duration::ZERO, TimeResolution::Hourly, 4);
        aggregator.finish(budget, snapshot, audit)
    }

    #[test]
    fn totals_and_histograms() {
        let mut agg = Aggregator::new(setup(), 4);
        agg.record(step(2.0, 4.0, 0.0, 0.05, None), 0);
        agg.record(step(-1.0, 1.0, 0.0, 0.95, None), 0);
        agg.record(step(0.0, 6.0, 0.0, 1.0, None), 1);
        agg.record(step(-5.0, 0.0, 3.0, 0.5, None), 11);
        let result = finish(agg);

        assert_relative_eq!(result.totals.charge_kwh, 2.0);
        assert_relative_eq!(result.totals.discharge_kwh, 6.0);
        assert_relative_eq!(result.totals.grid_import_after_kwh, 11.0);
        assert_eq!(result.totals.peak_import_after_kw, 6.0);
        assert_eq!(result.totals.peak_exceedance_steps, 1);
        assert_relative_eq!(result.totals.unserved_peak_kwh, 2.0);
        assert_eq!(result.totals.cycles, 0.5);
        assert_eq!(result.totals.energy_cost_before, None);

        assert_eq!(result.soc_histogram.hours[0], 1.0);
        assert_eq!(result.soc_histogram.hours[9], 2.0);
        assert_eq!(result.soc_histogram.hours[5], 1.0);
        // idle step excluded, full power lands in the top bin
        assert_relative_eq!(result.power_histogram.total_hours(), 3.0);
        assert_eq!(result.power_histogram.hours[9], 1.0);
        assert_eq!(result.power_histogram.hours[4], 1.0);

        assert_eq!(result.monthly.len(), 12);
        assert_eq!(result.monthly[0].month, 1);
        assert_eq!(result.monthly[0].hours, 2.0);
        assert_eq!(result.monthly[11].discharge_kwh, 5.0);
        assert_eq!(result.trace.as_ref().map(Vec::len), Some(4));
    }

    #[test]
    fn costs_value_exports_at_factor() {
        let mut agg = Aggregator::new(setup(), 2);
        agg.record(step(0.0, 2.0, 0.0, 0.5, Some(100.0)), 0);
        agg.record(step(-4.0, 0.0, 2.0, 0.5, Some(200.0)), 0);
        let result = finish(agg);
        // before: 2 kWh at 100 + 2 kWh at 200 = 0.6; after: 0.2 − 2 kWh × 100 = 0.0
        assert_relative_eq!(result.totals.energy_cost_before.unwrap(), 0.6, epsilon = 1e-12);
        assert_relative_eq!(result.totals.energy_cost_after.unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(result.totals.net_savings.unwrap(), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn percentages_without_pv_are_zero() {
        let mut agg = Aggregator::new(AggregatorSetup { record_trace: false, ..setup() }, 1);
        let mut s = step(0.0, 3.0, 0.0, 0.5, None);
        s.pv_kw = 0.0;
        s.grid_import_before_kw = 3.0;
        agg.record(s, 0);
        let result = finish(agg);
        assert_eq!(result.totals.autoconsumption_before_pct, 0.0);
        assert_eq!(result.totals.self_sufficiency_after_pct, 0.0);
        assert!(result.trace.is_none());
    }

    #[test]
    fn timers() {
        let mut timer = FixedTimer(Duration::from_millis(7));
        timer.start();
        assert_eq!(timer.elapsed(), Duration::from_millis(7));
        let timer = SystemTimer::default();
        assert_eq!(timer.elapsed(), Duration::ZERO);
    }
}
