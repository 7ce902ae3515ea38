//! Dispatch engine that orchestrates the policy, battery, degradation tracker and aggregator.

use tracing::{debug, error, info_span};

use super::clock::Clock;
use super::degradation::DegradationTracker;
use super::kpi::{Aggregator, AggregatorSetup, AuditMetadata, DispatchResult, RunTimer, SystemTimer};
use super::policy::{DispatchMode, PolicyContext, PowerRequest};
use super::power_balance::GridConnection;
use super::types::{EngineOptions, RunState, StepRecord};
use crate::devices::{BatteryState, BessConfig};
use crate::error::{DispatchError, Result};
use crate::series::{self, SeriesInput, Signal, ValidatedSeries};

/// Relative tolerance of the per-step AC energy balance.
const BALANCE_TOLERANCE: f64 = 1e-6;

/// One configured dispatch run.
///
/// Configuration is frozen by [`Engine::configure`]; [`Engine::run`] may be called exactly once.
/// The engine borrows the caller's series and owns its battery configuration and state, so runs
/// never share mutable data.
pub struct Engine<'a> {
    series: ValidatedSeries<'a>,
    bess: BessConfig,
    mode: DispatchMode,
    options: EngineOptions,
    grid: GridConnection,
    timer: Box<dyn RunTimer>,
    state: RunState,
}

impl<'a> Engine<'a> {
    /// Validates the inputs and their mutual compatibility.
    ///
    /// # Errors
    ///
    /// Any configuration error: series validation failures, a policy incompatible with the
    /// topology, a missing price series for `Arbitrage`, invalid policy parameters, or a battery
    /// duration outside the plausible range.
    pub fn configure(
        input: SeriesInput<'a>,
        bess: BessConfig,
        mode: DispatchMode,
        options: EngineOptions,
    ) -> Result<Self> {
        options.validate()?;
        let series = series::validate(input)?;

        if let Some(required) = mode.required_topology()
            && required != series.topology()
        {
            return Err(DispatchError::IncompatibleTopologyAndMode {
                topology: series.topology(),
                mode: mode.name(),
                reason: format!("policy requires topology `{required}`"),
            });
        }
        if mode.requires_price() && !series.has_price() {
            return Err(DispatchError::MissingRequiredSignal {
                signal: Signal::Price,
                reason: format!("policy `{}` needs a price series", mode.name()),
            });
        }
        mode.validate(&bess)?;
        bess.check_duration(&options.duration_range())?;

        debug!(policy = mode.name(), steps = series.len(), bess = %bess, "engine configured");
        Ok(Self {
            series,
            grid: GridConnection::new(options.export_limit_kw),
            bess,
            mode,
            options,
            timer: Box::new(SystemTimer::default()),
            state: RunState::Configured,
        })
    }

    /// Replaces the wall-clock timer used for audit metadata.
    #[must_use]
    pub fn with_timer(mut self, timer: impl RunTimer + 'static) -> Self {
        self.timer = Box::new(timer);
        self
    }

    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub const fn mode(&self) -> &DispatchMode {
        &self.mode
    }

    /// Executes all timesteps and aggregates the result.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidLifecycle`] unless the engine is freshly configured; otherwise the
    /// first policy contract violation, engine invariant violation or cancellation. No partial
    /// result is produced on failure.
    pub fn run(&mut self) -> Result<DispatchResult> {
        if self.state != RunState::Configured {
            return Err(DispatchError::InvalidLifecycle { state: self.state.name() });
        }
        let span = info_span!("dispatch_run", policy = self.mode.name(), steps = self.series.len());
        let _guard = span.enter();

        self.transition(RunState::Running);
        let outcome = self.execute();
        self.transition(if outcome.is_ok() { RunState::Completed } else { RunState::Failed });
        outcome
    }

    fn transition(&mut self, to: RunState) {
        debug!(from = self.state.name(), to = to.name(), "engine state transition");
        self.state = to;
    }

    fn execute(&mut self) -> Result<DispatchResult> {
        let total = self.series.len();
        let dt = self.series.dt_hours();
        let mut battery = BatteryState::new(&self.bess);
        let mut degradation = DegradationTracker::new(&self.bess);
        let mut aggregator = Aggregator::new(
            AggregatorSetup {
                dt_hours: dt,
                power_kw: self.bess.power_kw(),
                peak_target_kw: self.mode.peak_target_kw(),
                export_price_factor: self.options.export_price_factor,
                record_trace: self.options.record_trace,
            },
            total,
        );

        self.timer.start();
        let mut clock = Clock::new(total)
            .with_max_steps(self.options.max_steps)
            .with_cancel(self.options.cancel.clone());
        clock.run(|t| {
            let record = self.step(t, &mut battery, &mut degradation)?;
            aggregator.record(record, self.series.month_index(t));
            Ok(())
        })?;

        let audit = AuditMetadata::new(self.mode.name(), self.timer.elapsed(), self.series.resolution(), total);
        let result = aggregator.finish(degradation.budget(), battery.snapshot(), audit);
        debug!(
            cycles = result.totals.cycles,
            discharge_kwh = result.totals.discharge_kwh,
            status = %result.degradation.status,
            "run completed"
        );
        Ok(result)
    }

    /// Executes one timestep: policy, contract check, clip, apply, degradation, settle.
    fn step(
        &self,
        t: usize,
        battery: &mut BatteryState,
        degradation: &mut DegradationTracker,
    ) -> Result<StepRecord> {
        let dt = self.series.dt_hours();
        let load_kw = self.series.load_kw(t);
        let pv_kw = self.series.pv_kw(t);
        let price_per_mwh = self.series.price_per_mwh(t);

        let ctx = PolicyContext { net_load_kw: load_kw - pv_kw, price_per_mwh, dt_hours: dt };
        let request = check_request(self.mode.name(), t, self.mode.request(&ctx, battery, &self.bess))?;

        let setpoint_kw = match request {
            PowerRequest::Idle => 0.0,
            PowerRequest::Charge(kw) => kw.min(battery.available_charge_power(dt)),
            PowerRequest::Discharge(kw) => -(kw
                .min(battery.available_discharge_power(dt))
                .min(self.grid.max_discharge_kw(load_kw, pv_kw))),
        };

        let flow = battery.apply(setpoint_kw, dt).map_err(|breach| {
            error!(timestep = t, %breach, "battery invariant violated");
            DispatchError::EngineInvariantViolation { timestep: t, detail: breach.detail }
        })?;
        degradation.record(t, &flow, dt);

        let after = self.grid.settle(load_kw, pv_kw, flow.power_kw);
        let before = self.grid.settle(load_kw, pv_kw, 0.0);

        let supplied_kw = pv_kw + after.import_kw + flow.discharge_kwh / dt;
        let consumed_kw = load_kw + after.export_kw + after.curtailment_kw + flow.charge_kwh / dt;
        let scale = supplied_kw.abs().max(consumed_kw.abs()).max(1.0);
        if (supplied_kw - consumed_kw).abs() > BALANCE_TOLERANCE * scale {
            error!(timestep = t, supplied_kw, consumed_kw, "energy balance violated");
            return Err(DispatchError::EngineInvariantViolation {
                timestep: t,
                detail: format!("energy balance off: supplied {supplied_kw} kW, consumed {consumed_kw} kW"),
            });
        }

        Ok(StepRecord {
            timestep: t,
            timestamp: self.series.timestamp(t),
            load_kw,
            pv_kw,
            price_per_mwh,
            requested_kw: request.signed_kw(),
            battery_kw: flow.power_kw,
            soc_kwh: battery.soc_kwh(),
            soc_fraction: battery.soc_fraction(),
            grid_import_kw: after.import_kw,
            grid_export_kw: after.export_kw,
            curtailment_kw: after.curtailment_kw,
            grid_import_before_kw: before.import_kw,
            grid_export_before_kw: before.export_kw,
            curtailment_before_kw: before.curtailment_kw,
            charge_kwh: flow.charge_kwh,
            discharge_kwh: flow.discharge_kwh,
            loss_kwh: flow.loss_kwh,
        })
    }
}

/// Rejects negative or non-finite request magnitudes.
fn check_request(policy: &'static str, timestep: usize, request: PowerRequest) -> Result<PowerRequest> {
    let requested_kw = request.magnitude_kw();
    if requested_kw.is_finite() && requested_kw >= 0.0 {
        Ok(request)
    } else {
        error!(timestep, policy, requested_kw, "policy contract violated");
        Err(DispatchError::PolicyContractViolation { policy, timestep, requested_kw })
    }
}
