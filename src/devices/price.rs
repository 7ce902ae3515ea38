use std::f64::consts::PI;

use rand::{SeedableRng, rngs::StdRng};

use super::types::{Device, DeviceContext, gaussian_noise};

/// A synthetic day-ahead price curve in currency units per MWh.
///
/// The daily shape has a morning and an evening peak (at 08:00 and 19:00) and a midday solar dip.
/// Noise is additive, so with a large enough dip or noise the price goes negative, as real
/// day-ahead prices occasionally do.
#[derive(Debug, Clone)]
pub struct PriceCurve {
    /// Mean price per MWh.
    pub base_per_mwh: f64,
    /// Height of the morning/evening peaks per MWh.
    pub peak_adder_per_mwh: f64,
    /// Depth of the midday dip per MWh.
    pub solar_dip_per_mwh: f64,
    /// Standard deviation of additive noise per MWh.
    pub noise_std: f64,
    steps_per_day: usize,
    rng: StdRng,
}

impl PriceCurve {
    pub fn new(
        base_per_mwh: f64,
        peak_adder_per_mwh: f64,
        solar_dip_per_mwh: f64,
        noise_std: f64,
        steps_per_day: usize,
        seed: u64,
    ) -> Self {
        Self {
            base_per_mwh,
            peak_adder_per_mwh,
            solar_dip_per_mwh,
            noise_std: noise_std.max(0.0),
            steps_per_day: steps_per_day.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Deterministic part of the price at hour-of-day `hour` (fractional).
    fn shape(&self, hour: f64) -> f64 {
        let bump = |center: f64, width: f64| (-((hour - center) / width).powi(2)).exp();
        let dip = if (9.0..17.0).contains(&hour) { (PI * (hour - 9.0) / 8.0).sin() } else { 0.0 };
        self.base_per_mwh + self.peak_adder_per_mwh * (bump(8.0, 1.5) + bump(19.0, 2.0))
            - self.solar_dip_per_mwh * dip
    }
}

impl Device for PriceCurve {
    fn power_kw(&mut self, context: &DeviceContext) -> f64 {
        let step_of_day = context.timestep % self.steps_per_day;
        let hour = 24.0 * step_of_day as f64 / self.steps_per_day as f64;
        self.shape(hour) + gaussian_noise(&mut self.rng, self.noise_std)
    }

    fn device_type(&self) -> &'static str {
        "PriceCurve"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::types::sample_profile;

    #[test]
    fn evening_peak_above_midday_dip() {
        let mut curve = PriceCurve::new(80.0, 60.0, 40.0, 0.0, 24, 3);
        let day = sample_profile(&mut curve, 24);
        assert!(day[19] > day[13]);
        assert!(day[8] > day[3]);
        assert!(day[13] < 80.0);
    }

    #[test]
    fn deep_dip_goes_negative() {
        let mut curve = PriceCurve::new(20.0, 0.0, 60.0, 0.0, 96, 3);
        let day = sample_profile(&mut curve, 96);
        assert!(day.iter().any(|&p| p < 0.0));
    }

    #[test]
    fn quarter_hourly_matches_hourly_on_the_hour() {
        let mut hourly = PriceCurve::new(80.0, 60.0, 40.0, 0.0, 24, 3);
        let mut quarter = PriceCurve::new(80.0, 60.0, 40.0, 0.0, 96, 3);
        let h = sample_profile(&mut hourly, 24);
        let q = sample_profile(&mut quarter, 96);
        for hour in 0..24 {
            assert!((h[hour] - q[hour * 4]).abs() < 1e-9);
        }
    }
}
