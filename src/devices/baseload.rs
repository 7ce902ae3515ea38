use std::f64::consts::PI;

use rand::{SeedableRng, rngs::StdRng};

use super::types::{Device, DeviceContext, gaussian_noise, seasonal_factor};

/// Day of year (0-based) on which the winter load uplift peaks.
const WINTER_PEAK_DAY: usize = 15;

/// A synthetic site load that models daily and seasonal consumption patterns.
///
/// `BaseLoad` creates a sinusoidal power demand pattern with configurable baseline,
/// amplitude, phase, seasonal swing and random noise.
///
/// # Examples
///
/// ```
/// use bess_dispatch::devices::baseload::BaseLoad;
/// use bess_dispatch::devices::{Device, DeviceContext};
///
/// let mut load = BaseLoad::new(
///     50.0,  // base_kw - average consumption
///     15.0,  // amp_kw - daily variation
///     0.0,   // phase_rad
///     0.1,   // seasonal_swing - ±10% winter/summer
///     2.0,   // noise_std
///     24,    // steps_per_day - hourly resolution
///     42,    // seed
/// );
///
/// let demand = load.power_kw(&DeviceContext::new(12));
/// assert!(demand >= 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct BaseLoad {
    /// Baseline power consumption in kilowatts
    pub base_kw: f64,

    /// Amplitude of the sinusoidal daily variation in kilowatts
    pub amp_kw: f64,

    /// Phase offset of the sinusoidal pattern in radians
    pub phase_rad: f64,

    /// Relative winter uplift (and summer reduction) of the whole profile
    pub seasonal_swing: f64,

    /// Standard deviation of the Gaussian noise in kilowatts
    pub noise_std: f64,

    steps_per_day: usize,

    rng: StdRng,
}

impl BaseLoad {
    /// Creates a new baseload generator with the specified parameters.
    ///
    /// # Arguments
    ///
    /// * `base_kw` - The baseline power consumption in kilowatts
    /// * `amp_kw` - The amplitude of sinusoidal daily variation in kilowatts
    /// * `phase_rad` - The phase offset in radians (0 = mean at start of day, rising)
    /// * `seasonal_swing` - Relative seasonal modulation, peaking mid-January
    /// * `noise_std` - The standard deviation of Gaussian noise in kilowatts
    /// * `steps_per_day` - The number of time steps per simulated day
    /// * `seed` - Random seed for reproducible noise generation
    pub fn new(
        base_kw: f64,
        amp_kw: f64,
        phase_rad: f64,
        seasonal_swing: f64,
        noise_std: f64,
        steps_per_day: usize,
        seed: u64,
    ) -> Self {
        Self {
            base_kw,
            amp_kw,
            phase_rad,
            seasonal_swing,
            noise_std: noise_std.max(0.0),
            steps_per_day: steps_per_day.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Demand at `timestep`, guaranteed non-negative.
    pub fn demand_kw(&mut self, timestep: usize) -> f64 {
        let day = timestep / self.steps_per_day;
        let day_pos = (timestep % self.steps_per_day) as f64 / self.steps_per_day as f64; // [0,1)
        let angle = 2.0 * PI * day_pos + self.phase_rad;
        let season = seasonal_factor(day, self.seasonal_swing, WINTER_PEAK_DAY);
        let noise = gaussian_noise(&mut self.rng, self.noise_std);

        let kw = (self.base_kw + self.amp_kw * angle.sin()) * season + noise;
        kw.max(0.0) // no negative demand
    }
}

impl Device for BaseLoad {
    fn power_kw(&mut self, context: &DeviceContext) -> f64 {
        self.demand_kw(context.timestep)
    }

    fn device_type(&self) -> &'static str {
        "BaseLoad"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::types::sample_profile;

    #[test]
    fn test_flat_profile_without_variation() {
        let mut load = BaseLoad::new(50.0, 0.0, 0.0, 0.0, 0.0, 24, 1);
        assert!(sample_profile(&mut load, 48).iter().all(|&kw| (kw - 50.0).abs() < 1e-12));
    }

    #[test]
    fn test_never_negative() {
        let mut load = BaseLoad::new(1.0, 3.0, 0.0, 0.2, 1.0, 96, 7);
        assert!(sample_profile(&mut load, 96 * 3).iter().all(|&kw| kw >= 0.0));
    }

    #[test]
    fn test_deterministic_with_same_seed() {
        let mut a = BaseLoad::new(50.0, 10.0, 0.0, 0.1, 3.0, 24, 42);
        let mut b = BaseLoad::new(50.0, 10.0, 0.0, 0.1, 3.0, 24, 42);
        assert_eq!(sample_profile(&mut a, 240), sample_profile(&mut b, 240));
    }

    #[test]
    fn test_winter_above_summer() {
        let mut load = BaseLoad::new(50.0, 0.0, 0.0, 0.2, 0.0, 24, 1);
        let profile = sample_profile(&mut load, 24 * 365);
        assert!(profile[24 * WINTER_PEAK_DAY] > profile[24 * 200]);
    }
}
