//! Site power balance at the grid connection point.

use serde::Serialize;

/// Grid exchange of one timestep, all magnitudes in kW (≥ 0).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GridFlow {
    pub import_kw: f64,
    pub export_kw: f64,
    /// PV generation that could not be exported because of the export limit.
    pub curtailment_kw: f64,
}

/// The site's grid connection, optionally export-limited.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GridConnection {
    export_limit_kw: Option<f64>,
}

impl GridConnection {
    #[must_use]
    pub const fn new(export_limit_kw: Option<f64>) -> Self {
        Self { export_limit_kw }
    }

    /// Settles one timestep.
    ///
    /// Inputs use the site convention: `load_kw` and `pv_kw` are non-negative magnitudes,
    /// `battery_kw` is positive while charging and negative while discharging.
    ///
    /// # Returns
    ///
    /// Import, export and curtailment such that
    /// `load + battery + export + curtailment = pv + import`.
    #[must_use]
    pub fn settle(&self, load_kw: f64, pv_kw: f64, battery_kw: f64) -> GridFlow {
        let net_kw = load_kw - pv_kw + battery_kw;
        if net_kw >= 0.0 {
            return GridFlow { import_kw: net_kw, ..GridFlow::default() };
        }
        let surplus_kw = -net_kw;
        match self.export_limit_kw {
            Some(limit) if surplus_kw > limit => GridFlow {
                import_kw: 0.0,
                export_kw: limit,
                curtailment_kw: surplus_kw - limit,
            },
            _ => GridFlow { export_kw: surplus_kw, ..GridFlow::default() },
        }
    }

    /// Largest battery discharge that does not push export beyond the limit, so that only PV is
    /// ever curtailed.
    #[must_use]
    pub fn max_discharge_kw(&self, load_kw: f64, pv_kw: f64) -> f64 {
        self.export_limit_kw.map_or(f64::INFINITY, |limit| (load_kw + limit - pv_kw).max(0.0))
    }
}
