//! Time series validation.
//!
//! [`validate`] checks the caller's load/PV/price signals against the declared
//! [`TimeResolution`] and [`Topology`] and returns a borrowed, resolution-tagged
//! [`ValidatedSeries`]. Nothing is copied or mutated: the engine reads samples through the view.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// Hours in a non-leap year, used for calendar aging and annualization.
pub const HOURS_PER_YEAR: f64 = 8760.0;

/// Declared spacing of every series in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeResolution {
    #[serde(alias = "Hourly")]
    Hourly,
    #[serde(alias = "QuarterHourly")]
    QuarterHourly,
}

impl TimeResolution {
    /// Step length in minutes.
    #[must_use]
    pub const fn step_minutes(self) -> i64 {
        match self {
            Self::Hourly => 60,
            Self::QuarterHourly => 15,
        }
    }

    /// Step length in hours (`dt`).
    #[must_use]
    pub const fn dt_hours(self) -> f64 {
        match self {
            Self::Hourly => 1.0,
            Self::QuarterHourly => 0.25,
        }
    }

    #[must_use]
    pub const fn steps_per_day(self) -> usize {
        match self {
            Self::Hourly => 24,
            Self::QuarterHourly => 96,
        }
    }

    /// Points in a 365-day year: 8760 hourly, 35040 quarter-hourly.
    #[must_use]
    pub const fn steps_per_year(self) -> usize {
        self.steps_per_day() * 365
    }
}

impl fmt::Display for TimeResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hourly => f.write_str("hourly"),
            Self::QuarterHourly => f.write_str("quarter_hourly"),
        }
    }
}

/// Which signals the site provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Load with on-site PV generation.
    #[serde(alias = "PvLoad")]
    PvLoad,
    /// Load only; no PV series may be supplied.
    #[serde(alias = "LoadOnly")]
    LoadOnly,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PvLoad => f.write_str("pv_load"),
            Self::LoadOnly => f.write_str("load_only"),
        }
    }
}

/// Names a request signal in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Load,
    Pv,
    Price,
    Timestamps,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => f.write_str("load_kw"),
            Self::Pv => f.write_str("pv_kw"),
            Self::Price => f.write_str("price_per_mwh"),
            Self::Timestamps => f.write_str("timestamps"),
        }
    }
}

/// Start of the synthesized time axis when the caller provides neither timestamps nor a start.
#[must_use]
pub fn default_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, 1).and_then(|date| date.and_hms_opt(0, 0, 0)).unwrap_or_default()
}

/// Unvalidated signals as supplied by the caller.
#[derive(Debug, Clone, Copy)]
pub struct SeriesInput<'a> {
    pub topology: Topology,
    pub resolution: TimeResolution,
    pub load_kw: &'a [f64],
    pub pv_kw: Option<&'a [f64]>,
    pub price_per_mwh: Option<&'a [f64]>,
    pub timestamps: Option<&'a [NaiveDateTime]>,
    pub start: Option<NaiveDateTime>,
}

/// A validated, resolution-tagged view over the caller's signals.
///
/// Timestamps are implicit: sample `i` sits at `start + i · step`.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedSeries<'a> {
    topology: Topology,
    resolution: TimeResolution,
    start: NaiveDateTime,
    load_kw: &'a [f64],
    pv_kw: Option<&'a [f64]>,
    price_per_mwh: Option<&'a [f64]>,
}

impl ValidatedSeries<'_> {
    #[must_use]
    pub const fn len(&self) -> usize {
        self.load_kw.len()
    }

    /// Always `false`: validation rejects empty series.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.load_kw.is_empty()
    }

    #[must_use]
    pub const fn topology(&self) -> Topology {
        self.topology
    }

    #[must_use]
    pub const fn resolution(&self) -> TimeResolution {
        self.resolution
    }

    #[must_use]
    pub const fn dt_hours(&self) -> f64 {
        self.resolution.dt_hours()
    }

    #[must_use]
    pub const fn start(&self) -> NaiveDateTime {
        self.start
    }

    #[must_use]
    pub const fn has_pv(&self) -> bool {
        self.pv_kw.is_some()
    }

    #[must_use]
    pub const fn has_price(&self) -> bool {
        self.price_per_mwh.is_some()
    }

    #[must_use]
    pub fn load_kw(&self, index: usize) -> f64 {
        self.load_kw[index]
    }

    /// PV generation, `0.0` on a load-only site.
    #[must_use]
    pub fn pv_kw(&self, index: usize) -> f64 {
        self.pv_kw.map_or(0.0, |pv| pv[index])
    }

    #[must_use]
    pub fn price_per_mwh(&self, index: usize) -> Option<f64> {
        self.price_per_mwh.map(|price| price[index])
    }

    #[must_use]
    pub fn timestamp(&self, index: usize) -> NaiveDateTime {
        let minutes = index as i64 * self.resolution.step_minutes();
        self.start + TimeDelta::minutes(minutes)
    }

    /// Calendar month of sample `index`, `0` for January.
    #[must_use]
    pub fn month_index(&self, index: usize) -> usize {
        self.timestamp(index).month0() as usize
    }

    /// Period length in hours.
    #[must_use]
    pub fn total_hours(&self) -> f64 {
        self.len() as f64 * self.dt_hours()
    }
}

/// Validates the caller's signals.
///
/// # Errors
///
/// - [`DispatchError::InvalidSeriesLength`] if the load series is not a positive whole number of
///   days at the declared resolution, or another signal disagrees with its length;
/// - [`DispatchError::InvalidSeriesSpacing`] if supplied timestamps are not strictly increasing by
///   exactly one step;
/// - [`DispatchError::MissingRequiredSignal`] if a `pv_load` site has no PV series;
/// - [`DispatchError::IncompatibleTopologyAndMode`] if a `load_only` site receives one;
/// - [`DispatchError::InvalidSample`] on non-finite values or negative load/PV.
pub fn validate(input: SeriesInput<'_>) -> Result<ValidatedSeries<'_>> {
    let resolution = input.resolution;
    let len = input.load_kw.len();
    let per_day = resolution.steps_per_day();
    if len == 0 || len % per_day != 0 {
        return Err(DispatchError::InvalidSeriesLength {
            signal: Signal::Load,
            expected: format!(
                "a positive multiple of {per_day} points ({} per year at {resolution} resolution)",
                resolution.steps_per_year()
            ),
            actual: len,
        });
    }

    let pv_kw = input.pv_kw.filter(|pv| !pv.is_empty());
    match (input.topology, pv_kw) {
        (Topology::PvLoad, None) => {
            return Err(DispatchError::MissingRequiredSignal {
                signal: Signal::Pv,
                reason: "topology `pv_load` requires a PV series".to_owned(),
            });
        }
        (Topology::LoadOnly, Some(_)) => {
            return Err(DispatchError::IncompatibleTopologyAndMode {
                topology: Topology::LoadOnly,
                mode: "any",
                reason: "a load-only site must not receive a PV series".to_owned(),
            });
        }
        _ => {}
    }
    let price_per_mwh = input.price_per_mwh.filter(|price| !price.is_empty());

    check_length(Signal::Pv, pv_kw, len)?;
    check_length(Signal::Price, price_per_mwh, len)?;
    check_samples(Signal::Load, input.load_kw, true)?;
    if let Some(pv) = pv_kw {
        check_samples(Signal::Pv, pv, true)?;
    }
    if let Some(price) = price_per_mwh {
        check_samples(Signal::Price, price, false)?;
    }

    let start = match input.timestamps {
        Some(timestamps) => check_spacing(timestamps, len, resolution)?,
        None => input.start.unwrap_or_else(default_start),
    };

    Ok(ValidatedSeries {
        topology: input.topology,
        resolution,
        start,
        load_kw: input.load_kw,
        pv_kw,
        price_per_mwh,
    })
}

fn check_length(signal: Signal, series: Option<&[f64]>, expected: usize) -> Result<()> {
    match series {
        Some(series) if series.len() != expected => Err(DispatchError::InvalidSeriesLength {
            signal,
            expected: expected.to_string(),
            actual: series.len(),
        }),
        _ => Ok(()),
    }
}

fn check_samples(signal: Signal, series: &[f64], non_negative: bool) -> Result<()> {
    match series.iter().position(|value| !value.is_finite() || (non_negative && *value < 0.0)) {
        Some(index) => Err(DispatchError::InvalidSample { signal, index, value: series[index] }),
        None => Ok(()),
    }
}

fn check_spacing(
    timestamps: &[NaiveDateTime],
    expected_len: usize,
    resolution: TimeResolution,
) -> Result<NaiveDateTime> {
    if timestamps.len() != expected_len {
        return Err(DispatchError::InvalidSeriesLength {
            signal: Signal::Timestamps,
            expected: expected_len.to_string(),
            actual: timestamps.len(),
        });
    }
    let expected = TimeDelta::minutes(resolution.step_minutes());
    for (index, pair) in timestamps.windows(2).enumerate() {
        let actual = pair[1] - pair[0];
        if actual != expected {
            return Err(DispatchError::InvalidSeriesSpacing {
                index: index + 1,
                expected_seconds: expected.num_seconds(),
                actual_seconds: actual.num_seconds(),
            });
        }
    }
    Ok(timestamps[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(load: &'a [f64], pv: Option<&'a [f64]>) -> SeriesInput<'a> {
        SeriesInput {
            topology: Topology::PvLoad,
            resolution: TimeResolution::Hourly,
            load_kw: load,
            pv_kw: pv,
            price_per_mwh: None,
            timestamps: None,
            start: None,
        }
    }

    #[test]
    fn resolution_constants() {
        assert_eq!(TimeResolution::Hourly.steps_per_year(), 8760);
        assert_eq!(TimeResolution::QuarterHourly.steps_per_year(), 35040);
        assert_eq!(TimeResolution::QuarterHourly.dt_hours(), 0.25);
    }

    #[test]
    fn accepts_single_day() {
        let load = vec![1.0; 24];
        let pv = vec![0.5; 24];
        let series = validate(input(&load, Some(&pv))).unwrap();
        assert_eq!(series.len(), 24);
        assert_eq!(series.pv_kw(3), 0.5);
        assert_eq!(series.month_index(23), 0);
        assert_eq!(series.total_hours(), 24.0);
    }

    #[test]
    fn rejects_partial_day() {
        let load = vec![1.0; 25];
        let pv = vec![0.0; 25];
        let err = validate(input(&load, Some(&pv))).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidSeriesLength { signal: Signal::Load, actual: 25, .. }));
    }

    #[test]
    fn rejects_mismatched_pv_length() {
        let load = vec![1.0; 24];
        let pv = vec![0.0; 48];
        let err = validate(input(&load, Some(&pv))).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidSeriesLength { signal: Signal::Pv, actual: 48, .. }));
    }

    #[test]
    fn pv_topology_requires_pv() {
        let load = vec![1.0; 24];
        let err = validate(input(&load, None)).unwrap_err();
        assert!(matches!(err, DispatchError::MissingRequiredSignal { signal: Signal::Pv, .. }));
    }

    #[test]
    fn load_only_rejects_pv() {
        let load = vec![1.0; 24];
        let pv = vec![0.0; 24];
        let mut request = input(&load, Some(&pv));
        request.topology = Topology::LoadOnly;
        assert!(matches!(
            validate(request),
            Err(DispatchError::IncompatibleTopologyAndMode { topology: Topology::LoadOnly, .. })
        ));
    }

    #[test]
    fn rejects_negative_and_nan_samples() {
        let mut load = vec![1.0; 24];
        load[5] = -1.0;
        let pv = vec![0.0; 24];
        assert!(matches!(
            validate(input(&load, Some(&pv))),
            Err(DispatchError::InvalidSample { signal: Signal::Load, index: 5, .. })
        ));

        let load = vec![1.0; 24];
        let mut pv = vec![0.0; 24];
        pv[9] = f64::NAN;
        assert!(matches!(
            validate(input(&load, Some(&pv))),
            Err(DispatchError::InvalidSample { signal: Signal::Pv, index: 9, .. })
        ));
    }

    #[test]
    fn negative_prices_are_valid() {
        let load = vec![1.0; 24];
        let pv = vec![0.0; 24];
        let price = vec![-20.0; 24];
        let mut request = input(&load, Some(&pv));
        request.price_per_mwh = Some(&price);
        let series = validate(request).unwrap();
        assert_eq!(series.price_per_mwh(0), Some(-20.0));
    }

    #[test]
    fn rejects_irregular_spacing() {
        let load = vec![1.0; 24];
        let pv = vec![0.0; 24];
        let start = default_start();
        let mut timestamps: Vec<_> = (0..24).map(|h| start + TimeDelta::hours(h)).collect();
        timestamps[10] += TimeDelta::minutes(30);
        let mut request = input(&load, Some(&pv));
        request.timestamps = Some(&timestamps);
        assert_eq!(
            validate(request).unwrap_err(),
            DispatchError::InvalidSeriesSpacing { index: 10, expected_seconds: 3600, actual_seconds: 5400 }
        );
    }

    #[test]
    fn rejects_seconds_level_drift() {
        let load = vec![1.0; 24];
        let pv = vec![0.0; 24];
        let start = default_start();
        let timestamps: Vec<_> = (0..24).map(|h| start + TimeDelta::seconds(3640 * h)).collect();
        let mut request = input(&load, Some(&pv));
        request.timestamps = Some(&timestamps);
        assert_eq!(
            validate(request).unwrap_err(),
            DispatchError::InvalidSeriesSpacing { index: 1, expected_seconds: 3600, actual_seconds: 3640 }
        );
    }

    #[test]
    fn rejects_non_increasing_timestamps() {
        let load = vec![1.0; 96];
        let start = default_start();
        let mut timestamps: Vec<_> =
            (0..96).map(|q| start + TimeDelta::minutes(15 * q)).collect();
        timestamps.swap(3, 4);
        let request = SeriesInput {
            topology: Topology::LoadOnly,
            resolution: TimeResolution::QuarterHourly,
            load_kw: &load,
            pv_kw: None,
            price_per_mwh: None,
            timestamps: Some(&timestamps),
            start: None,
        };
        assert!(matches!(validate(request), Err(DispatchError::InvalidSeriesSpacing { index: 3, .. })));
    }

    #[test]
    fn timestamps_define_months() {
        let load = vec![1.0; 48];
        let pv = vec![0.0; 48];
        let start = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let timestamps: Vec<_> = (0..48).map(|h| start + TimeDelta::hours(h)).collect();
        let mut request = input(&load, Some(&pv));
        request.timestamps = Some(&timestamps);
        let series = validate(request).unwrap();
        assert_eq!(series.month_index(23), 0);
        assert_eq!(series.month_index(24), 1);
    }
}
