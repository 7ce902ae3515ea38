//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::time::Duration;

use bess_dispatch::devices::BessConfig;
use bess_dispatch::request::DispatchRequest;
use bess_dispatch::series::{TimeResolution, Topology};
use bess_dispatch::sim::{DispatchMode, DispatchResult, EngineOptions, FixedTimer};

/// Reference battery (100 kW / 200 kWh, 90% round trip, SOC 10%..90%).
pub fn reference_bess() -> BessConfig {
    BessConfig::new(100.0, 200.0, 0.9, 0.1, 0.9).unwrap()
}

/// PV bell peaking at 150 kW at noon, zero outside 06:00..18:00.
pub fn reference_pv() -> Vec<f64> {
    (0..24)
        .map(|h| {
            if (6..18).contains(&h) {
                let x = (h as f64 - 12.0) / 6.0;
                150.0 * (1.0 - x * x)
            } else {
                0.0
            }
        })
        .collect()
}

/// Single hourly day: flat 50 kW load, [`reference_pv`], no price, PvSurplus.
pub fn pv_surplus_day() -> DispatchRequest {
    DispatchRequest {
        topology: Topology::PvLoad,
        time_resolution: TimeResolution::Hourly,
        load_kw: vec![50.0; 24],
        pv_kw: Some(reference_pv()),
        price_per_mwh: None,
        timestamps: None,
        start: None,
        bess: reference_bess(),
        mode: DispatchMode::PvSurplus,
        options: EngineOptions { record_trace: true, ..EngineOptions::default() },
    }
}

/// Evening-peaking load for peak-shaving scenarios (peak 140 kW at 19:00).
pub fn evening_peak_load(days: usize) -> Vec<f64> {
    (0..24 * days)
        .map(|t| {
            let h = (t % 24) as f64;
            60.0 + 80.0 * (-((h - 19.0) / 2.5).powi(2)).exp()
        })
        .collect()
}

/// Day-ahead price cycle: cheap at night, expensive in the evening.
pub fn daily_prices(days: usize) -> Vec<f64> {
    (0..24 * days)
        .map(|t| match t % 24 {
            0..=5 => 40.0,
            6..=16 => 90.0,
            _ => 180.0,
        })
        .collect()
}

/// Runs with a zero timer so results compare byte for byte.
pub fn run_fixed(request: &DispatchRequest) -> DispatchResult {
    request.run_with_timer(FixedTimer(Duration::ZERO)).unwrap()
}
