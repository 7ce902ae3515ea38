//! Common types and traits for synthetic profile generators.

use std::f64::consts::PI;

use rand::{Rng, rngs::StdRng};

/// Contextual information passed to a profile generator for one sample.
///
/// # Fields
/// * `timestep` - Index of the sample from the start of the series
pub struct DeviceContext {
    pub timestep: usize,
}

impl DeviceContext {
    pub const fn new(timestep: usize) -> Self {
        Self { timestep }
    }
}

/// A seeded source of one site signal (load, PV or price).
///
/// Implementations are deterministic for a given seed: sampling the same timesteps in the same
/// order yields identical values.
pub trait Device {
    /// Returns the signal value at the specified time step.
    ///
    /// Load and PV are non-negative kW magnitudes; prices are per MWh and may be negative.
    fn power_kw(&mut self, context: &DeviceContext) -> f64;

    /// Returns a human-readable type name for the device.
    fn device_type(&self) -> &'static str;
}

/// Samples `steps` consecutive values from `device`, starting at timestep 0.
pub fn sample_profile(device: &mut impl Device, steps: usize) -> Vec<f64> {
    (0..steps).map(|t| device.power_kw(&DeviceContext::new(t))).collect()
}

/// Utility function to generate Gaussian noise using Box-Muller transform.
///
/// # Arguments
///
/// * `rng` - Random number generator
/// * `std_dev` - Standard deviation of the noise
///
/// # Returns
///
/// Random value from a Gaussian distribution with mean 0 and specified standard deviation
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f64 = rng.random::<f64>().clamp(1e-9, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    z0 * std_dev
}

/// Half-cosine daylight shape in `[0, 1]`: zero outside `[sunrise_idx, sunset_idx)`, peaking at
/// solar noon.
pub fn daylight_frac(t: usize, steps_per_day: usize, sunrise_idx: usize, sunset_idx: usize) -> f64 {
    let step_of_day = t % steps_per_day;
    if step_of_day < sunrise_idx || step_of_day >= sunset_idx {
        return 0.0;
    }
    let window = (sunset_idx - sunrise_idx) as f64;
    let pos = (step_of_day - sunrise_idx) as f64 / window;
    (PI * pos).sin().max(0.0)
}

/// Seasonal multiplier `1 + swing · cos(2π · (day − peak_day) / 365)`.
pub fn seasonal_factor(day: usize, swing: f64, peak_day: usize) -> f64 {
    let phase = (day % 365) as f64 - peak_day as f64;
    1.0 + swing * (2.0 * PI * phase / 365.0).cos()
}
