use rand::{SeedableRng, rngs::StdRng};

use super::types::{Device, DeviceContext, daylight_frac, gaussian_noise, seasonal_factor};
use crate::error::{DispatchError, Result};

/// Day of year (0-based) of the summer solstice.
const SOLSTICE_DAY: usize = 171;

/// A synthetic PV generator that models output based on daylight hours and season.
///
/// `SolarPv` creates a half-cosine shaped generation profile between sunrise and sunset, scaled
/// by a seasonal factor (largest at the summer solstice) and multiplicative noise standing in for
/// cloud cover. Output is a non-negative generation magnitude.
#[derive(Debug, Clone)]
pub struct SolarPv {
    /// Maximum power output in kilowatts under ideal mid-summer conditions.
    pub kw_peak: f64,

    steps_per_day: usize,

    /// Time step index when sunrise occurs (inclusive).
    pub sunrise_idx: usize,

    /// Time step index when sunset occurs (exclusive).
    pub sunset_idx: usize,

    /// Relative seasonal swing of daily output (0 = no seasonality).
    pub seasonal_swing: f64,

    /// Standard deviation of the Gaussian noise as a fraction of output.
    pub noise_std: f64,

    rng: StdRng,
}

impl SolarPv {
    /// Creates a new PV generator.
    ///
    /// # Arguments
    ///
    /// * `kw_peak` - Maximum power output in kilowatts (negative values clamp to zero)
    /// * `sunrise_idx` - Time step index when sunrise occurs (inclusive)
    /// * `sunset_idx` - Time step index when sunset occurs (exclusive)
    /// * `seasonal_swing` - Seasonal modulation in `[0, 1)`
    /// * `noise_std` - Standard deviation of noise (e.g., 0.05 for +/-5% variation)
    /// * `steps_per_day` - Number of time steps per simulated day
    /// * `seed` - Random seed for reproducible noise generation
    ///
    /// # Errors
    ///
    /// Fails if `sunrise_idx >= sunset_idx` or `sunset_idx > steps_per_day`.
    pub fn new(
        kw_peak: f64,
        sunrise_idx: usize,
        sunset_idx: usize,
        seasonal_swing: f64,
        noise_std: f64,
        steps_per_day: usize,
        seed: u64,
    ) -> Result<Self> {
        if sunrise_idx >= sunset_idx || sunset_idx > steps_per_day {
            return Err(DispatchError::InvalidConfig {
                field: "solar.sunset_idx",
                message: format!(
                    "daylight window {sunrise_idx}..{sunset_idx} must be non-empty and within {steps_per_day} steps"
                ),
            });
        }
        Ok(Self {
            kw_peak: kw_peak.max(0.0),
            steps_per_day,
            sunrise_idx,
            sunset_idx,
            seasonal_swing: seasonal_swing.clamp(0.0, 0.99),
            noise_std: noise_std.max(0.0),
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn daylight_frac(&self, t: usize) -> f64 {
        daylight_frac(t, self.steps_per_day, self.sunrise_idx, self.sunset_idx)
    }
}

impl Device for SolarPv {
    /// Generation at a specific time step; 0.0 at night.
    fn power_kw(&mut self, context: &DeviceContext) -> f64 {
        let frac = self.daylight_frac(context.timestep);
        if frac <= 0.0 {
            return 0.0;
        }

        let day = context.timestep / self.steps_per_day;
        let season = seasonal_factor(day, self.seasonal_swing, SOLSTICE_DAY);
        let noise_mult = 1.0 + gaussian_noise(&mut self.rng, self.noise_std);
        (self.kw_peak * frac * season * noise_mult).max(0.0)
    }

    fn device_type(&self) -> &'static str {
        "SolarPV"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::types::sample_profile;

    fn ctx(t: usize) -> DeviceContext {
        DeviceContext::new(t)
    }

    #[test]
    fn test_new_solar_pv() {
        let pv = SolarPv::new(5.0, 6, 18, 0.3, 0.05, 24, 42).unwrap();
        assert_eq!(pv.kw_peak, 5.0);
        assert_eq!(pv.sunrise_idx, 6);
        assert_eq!(pv.sunset_idx, 18);
        assert_eq!(pv.noise_std, 0.05);
    }

    #[test]
    fn test_negative_kw_peak_clamped_to_zero() {
        let pv = SolarPv::new(-1.0, 6, 18, 0.0, 0.05, 24, 42).unwrap();
        assert_eq!(pv.kw_peak, 0.0);
    }

    #[test]
    fn test_invalid_daylight_window() {
        assert!(SolarPv::new(5.0, 18, 6, 0.0, 0.05, 24, 42).is_err());
        assert!(SolarPv::new(5.0, 6, 25, 0.0, 0.05, 24, 42).is_err());
    }

    #[test]
    fn test_no_generation_at_night() {
        let mut pv = SolarPv::new(5.0, 6, 18, 0.0, 0.0, 24, 42).unwrap();
        for t in [0, 5, 18, 23] {
            assert_eq!(pv.power_kw(&ctx(t)), 0.0);
        }
    }

    #[test]
    fn test_peak_generation_at_noon() {
        let mut pv = SolarPv::new(5.0, 6, 18, 0.0, 0.0, 24, 42).unwrap();
        let noon = pv.power_kw(&ctx(12));
        assert!(noon > 4.9 && noon <= 5.0);
    }

    #[test]
    fn test_summer_beats_winter() {
        let mut pv = SolarPv::new(100.0, 24, 80, 0.5, 0.0, 96, 1).unwrap();
        let profile = sample_profile(&mut pv, 96 * 365);
        let day_total = |day: usize| profile[day * 96..(day + 1) * 96].iter().sum::<f64>();
        assert!(day_total(SOLSTICE_DAY) > 2.0 * day_total(354));
    }

    #[test]
    fn test_deterministic_with_same_seed() {
        let mut pv1 = SolarPv::new(5.0, 6, 18, 0.2, 0.1, 24, 42).unwrap();
        let mut pv2 = SolarPv::new(5.0, 6, 18, 0.2, 0.1, 24, 42).unwrap();
        assert_eq!(sample_profile(&mut pv1, 72), sample_profile(&mut pv2, 72));
    }

    #[test]
    fn test_different_seeds_produce_different_results() {
        let mut pv1 = SolarPv::new(5.0, 6, 18, 0.0, 0.1, 24, 42).unwrap();
        let mut pv2 = SolarPv::new(5.0, 6, 18, 0.0, 0.1, 24, 43).unwrap();
        assert_ne!(sample_profile(&mut pv1, 24), sample_profile(&mut pv2, 24));
    }

    #[test]
    fn test_solar_never_negative() {
        let mut pv = SolarPv::new(5.0, 6, 18, 0.3, 0.5, 24, 42).unwrap();
        assert!(sample_profile(&mut pv, 48).iter().all(|&kw| kw >= 0.0));
    }
}
