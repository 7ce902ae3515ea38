//! Sizing sweep: evaluates one request under many battery ratings in parallel.
//!
//! Workers pull candidate indices from a shared atomic counter, each building a private
//! [`DispatchRequest`] copy. Outcomes are re-ordered by candidate index, so the output does not
//! depend on scheduling; [`best_by`] is a pure reduction over successful outcomes.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, Result};
use crate::request::DispatchRequest;
use crate::sim::{CancelToken, DispatchResult};

/// One battery rating to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizingCandidate {
    pub power_kw: f64,
    pub energy_kwh: f64,
}

impl SizingCandidate {
    #[must_use]
    pub const fn new(power_kw: f64, energy_kwh: f64) -> Self {
        Self { power_kw, energy_kwh }
    }
}

/// Result of one candidate, in candidate order.
#[derive(Debug, Clone)]
pub struct CandidateOutcome {
    pub index: usize,
    pub candidate: SizingCandidate,
    pub result: Result<DispatchResult>,
}

/// Cartesian product of power and energy ratings, power-major.
#[must_use]
pub fn candidate_grid(powers_kw: &[f64], energies_kwh: &[f64]) -> Vec<SizingCandidate> {
    powers_kw
        .iter()
        .flat_map(|&power_kw| energies_kwh.iter().map(move |&energy_kwh| SizingCandidate::new(power_kw, energy_kwh)))
        .collect()
}

/// Number of workers used when the caller does not choose.
#[must_use]
pub fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

fn evaluate(base: &DispatchRequest, candidate: SizingCandidate, cancel: &CancelToken) -> Result<DispatchResult> {
    let mut request = base.clone();
    request.bess = base.bess.resized(candidate.power_kw, candidate.energy_kwh)?;
    request.options.cancel = Some(cancel.clone());
    request.run()
}

/// Runs `base` once per candidate on at most `workers` threads.
///
/// Failed candidates keep their error in the outcome. Setting `cancel` stops in-flight runs,
/// which then report [`DispatchError::Cancelled`], and keeps pending candidates from starting.
#[must_use]
pub fn run_sweep(
    base: &DispatchRequest,
    candidates: &[SizingCandidate],
    workers: usize,
    cancel: &CancelToken,
) -> Vec<CandidateOutcome> {
    let workers = workers.clamp(1, candidates.len().max(1));
    info!(candidates = candidates.len(), workers, policy = base.mode.name(), "sizing sweep started");

    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        for worker in 0..workers {
            let tx = tx.clone();
            let next = &next;
            scope.spawn(move || {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(&candidate) = candidates.get(index) else {
                        break;
                    };
                    let result = if cancel.is_cancelled() {
                        Err(DispatchError::Cancelled { completed_steps: 0, total_steps: base.load_kw.len() })
                    } else {
                        evaluate(base, candidate, cancel)
                    };
                    debug!(worker, index, ok = result.is_ok(), "candidate evaluated");
                    if tx.send(CandidateOutcome { index, candidate, result }).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(tx);

    let mut outcomes: Vec<CandidateOutcome> = rx.into_iter().collect();
    outcomes.sort_by_key(|outcome| outcome.index);
    let failed = outcomes.iter().filter(|outcome| outcome.result.is_err()).count();
    if failed > 0 {
        warn!(failed, "sizing sweep candidates failed and are excluded from ranking");
    }
    outcomes
}

/// Picks the successful outcome with the greatest finite score; ties go to the lower index.
///
/// Pure and order-independent: the same outcomes in any order give the same pick.
pub fn best_by<F>(outcomes: &[CandidateOutcome], score: F) -> Option<&CandidateOutcome>
where
    F: Fn(&DispatchResult) -> f64,
{
    outcomes
        .iter()
        .filter_map(|outcome| {
            let result = outcome.result.as_ref().ok()?;
            let value = score(result);
            value.is_finite().then_some((value, outcome))
        })
        .fold(None::<(f64, &CandidateOutcome)>, |best, (value, outcome)| match best {
            Some((best_value, best_outcome))
                if best_value > value || (best_value == value && best_outcome.index < outcome.index) =>
            {
                Some((best_value, best_outcome))
            }
            _ => Some((value, outcome)),
        })
        .map(|(_, outcome)| outcome)
}
