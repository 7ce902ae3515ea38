//! Typed failures of a dispatch run.
//!
//! Every fatal condition aborts the run and surfaces as one [`DispatchError`] variant; a run never
//! returns a partially aggregated result. Soft conditions (degradation warning/exceeded) are not
//! errors and are reported inside the result instead.

use thiserror::Error;

use crate::series::{Signal, Topology};

pub type Result<T, E = DispatchError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// A signal does not hold a whole number of days at the declared resolution, or the signals
    /// disagree on length.
    #[error("invalid length of `{signal}` series: expected {expected}, got {actual}")]
    InvalidSeriesLength { signal: Signal, expected: String, actual: usize },

    /// Timestamps are not strictly increasing with the declared step.
    #[error(
        "invalid series spacing at index {index}: expected {expected_seconds} s step, got {actual_seconds} s"
    )]
    InvalidSeriesSpacing { index: usize, expected_seconds: i64, actual_seconds: i64 },

    #[error("missing required `{signal}` series: {reason}")]
    MissingRequiredSignal { signal: Signal, reason: String },

    #[error("dispatch mode `{mode}` is incompatible with topology `{topology}`: {reason}")]
    IncompatibleTopologyAndMode { topology: Topology, mode: &'static str, reason: String },

    #[error("invalid `{signal}` sample at index {index}: {value}")]
    InvalidSample { signal: Signal, index: usize, value: f64 },

    #[error("invalid configuration `{field}`: {message}")]
    InvalidConfig { field: &'static str, message: String },

    /// A policy requested a negative or non-finite power magnitude. Always an implementation bug.
    #[error("policy `{policy}` requested invalid power {requested_kw} kW at timestep {timestep}")]
    PolicyContractViolation { policy: &'static str, timestep: usize, requested_kw: f64 },

    /// SOC or throughput drifted outside tolerance after clipping.
    #[error("engine invariant violated at timestep {timestep}: {detail}")]
    EngineInvariantViolation { timestep: usize, detail: String },

    #[error("run cancelled after {completed_steps} of {total_steps} timesteps")]
    Cancelled { completed_steps: usize, total_steps: usize },

    #[error("engine cannot start a run from the `{state}` state")]
    InvalidLifecycle { state: &'static str },
}

impl DispatchError {
    /// Configuration errors are detected before the loop starts and are fixable by the caller.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidSeriesLength { .. }
                | Self::InvalidSeriesSpacing { .. }
                | Self::MissingRequiredSignal { .. }
                | Self::IncompatibleTopologyAndMode { .. }
                | Self::InvalidSample { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// The offending timestep, for failures raised inside the loop.
    #[must_use]
    pub const fn timestep(&self) -> Option<usize> {
        match self {
            Self::PolicyContractViolation { timestep, .. }
            | Self::EngineInvariantViolation { timestep, .. } => Some(*timestep),
            Self::InvalidSeriesSpacing { index, .. } | Self::InvalidSample { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_classified() {
        let err = DispatchError::MissingRequiredSignal {
            signal: Signal::Pv,
            reason: "topology `pv_load` needs a PV series".to_owned(),
        };
        assert!(err.is_configuration());
        assert_eq!(err.timestep(), None);

        let err = DispatchError::EngineInvariantViolation { timestep: 7, detail: "soc".to_owned() };
        assert!(!err.is_configuration());
        assert_eq!(err.timestep(), Some(7));
    }

    #[test]
    fn messages_carry_expected_and_actual() {
        let err = DispatchError::InvalidSeriesLength {
            signal: Signal::Load,
            expected: "a multiple of 24".to_owned(),
            actual: 25,
        };
        let msg = err.to_string();
        assert!(msg.contains("a multiple of 24"));
        assert!(msg.contains("25"));
    }
}
