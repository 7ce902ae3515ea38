use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{DispatchError, Result};

/// Shared cancellation flag. Runs only read it; the owner (e.g. a sizing sweep) sets it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A simulation clock that tracks steps over a fixed duration.
///
/// The clock also enforces the run's iteration bound and cancellation: a tick past the bound or
/// after cancellation fails with [`DispatchError::Cancelled`].
///
/// # Examples
///
/// ```
/// use bess_dispatch::sim::clock::Clock;
///
/// let mut clock = Clock::new(3);
/// let mut steps = Vec::new();
///
/// clock.run(|step| {
///     steps.push(step);
///     Ok(())
/// })?;
/// assert_eq!(steps, vec![0, 1, 2]);
/// # Ok::<(), bess_dispatch::error::DispatchError>(())
/// ```
#[derive(Debug)]
pub struct Clock {
    /// Current step of the simulation
    current: usize,
    /// Total steps to run in the simulation
    total: usize,
    max_steps: Option<usize>,
    cancel: Option<CancelToken>,
}

impl Clock {
    /// Creates a new clock with a specified total number of steps.
    pub const fn new(total: usize) -> Self {
        Self { current: 0, total, max_steps: None, cancel: None }
    }

    /// Bounds the number of steps the clock will hand out.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: Option<usize>) -> Self {
        self.max_steps = max_steps;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: Option<CancelToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Advances the clock by one step.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(step))` - The current step number (starting from 0) before advancing
    /// * `Ok(None)` - If the clock has reached its total steps
    ///
    /// # Errors
    ///
    /// [`DispatchError::Cancelled`] once the step bound is reached or the token is set.
    pub fn tick(&mut self) -> Result<Option<usize>> {
        if self.current >= self.total {
            return Ok(None);
        }
        let over_bound = self.max_steps.is_some_and(|max| self.current >= max);
        let cancelled = self.cancel.as_ref().is_some_and(CancelToken::is_cancelled);
        if over_bound || cancelled {
            return Err(DispatchError::Cancelled {
                completed_steps: self.current,
                total_steps: self.total,
            });
        }
        let step = self.current;
        self.current += 1;
        Ok(Some(step))
    }

    /// Runs a fallible function for each remaining step, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Propagates the first error of `f` or of [`Clock::tick`].
    pub fn run(&mut self, mut f: impl FnMut(usize) -> Result<()>) -> Result<()> {
        while let Some(step) = self.tick()? {
            f(step)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clock() {
        let clock = Clock::new(5);
        assert_eq!(clock.current, 0);
        assert_eq!(clock.total, 5);
    }

    #[test]
    fn test_tick() {
        let mut clock = Clock::new(2);
        assert_eq!(clock.tick(), Ok(Some(0)));
        assert_eq!(clock.tick(), Ok(Some(1)));
        assert_eq!(clock.tick(), Ok(None));
    }

    #[test]
    fn test_empty_clock() {
        let mut clock = Clock::new(0);
        assert_eq!(clock.tick(), Ok(None));

        let mut was_called = false;
        clock
            .run(|_| {
                was_called = true;
                Ok(())
            })
            .unwrap();
        assert!(!was_called);
    }

    #[test]
    fn test_step_bound_cancels() {
        let mut clock = Clock::new(10).with_max_steps(Some(4));
        let mut steps = 0;
        let err = clock
            .run(|_| {
                steps += 1;
                Ok(())
            })
            .unwrap_err();
        assert_eq!(steps, 4);
        assert_eq!(err, DispatchError::Cancelled { completed_steps: 4, total_steps: 10 });
    }

    #[test]
    fn test_bound_equal_to_total_completes() {
        let mut clock = Clock::new(3).with_max_steps(Some(3));
        assert!(clock.run(|_| Ok(())).is_ok());
    }

    #[test]
    fn test_cancel_token_stops_run() {
        let token = CancelToken::new();
        let mut clock = Clock::new(10).with_cancel(Some(token.clone()));
        let err = clock
            .run(|step| {
                if step == 2 {
                    token.cancel();
                }
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err, DispatchError::Cancelled { completed_steps: 3, total_steps: 10 });
    }
}
