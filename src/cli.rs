//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use bess_dispatch::sim::DispatchResult;

#[derive(Debug, Parser)]
#[command(name = "bess-dispatch", version, about = "Battery dispatch simulation for PV and load sites")]
#[command(
    long_about = "Simulates battery dispatch over a load/PV/price series and reports energy, cost \
    and degradation KPIs.\n\
    \nExamples:\n  \
    bess-dispatch run --preset stacked\n  \
    bess-dispatch run --scenario site.toml --trace-out trace.csv --json-out result.json\n  \
    bess-dispatch sweep --preset peak_shaving --powers 20,30,40 --energies 60,90,120"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one dispatch simulation and print the report
    Run(RunArgs),
    /// Evaluate a grid of battery sizes in parallel
    Sweep(SweepArgs),
    /// Write the input series of a scenario as CSV
    Generate(GenerateArgs),
    /// List the built-in scenario presets
    Presets,
}

/// Where the run comes from. Defaults to the `self_consumption` preset.
#[derive(Debug, Clone, Args)]
#[group(multiple = false)]
pub struct SourceArgs {
    /// Built-in scenario preset
    #[arg(long)]
    pub preset: Option<String>,

    /// TOML scenario file
    #[arg(long)]
    pub scenario: Option<PathBuf>,

    /// JSON dispatch request
    #[arg(long)]
    pub request: Option<PathBuf>,
}

/// Overrides applied to scenario presets and files.
#[derive(Debug, Clone, Args)]
pub struct OverrideArgs {
    /// Random seed for the synthetic profiles
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of simulated days
    #[arg(long)]
    pub days: Option<usize>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Write the per-step trace as CSV
    #[arg(long)]
    pub trace_out: Option<PathBuf>,

    /// Write the full result as JSON
    #[arg(long)]
    pub json_out: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Comma-separated battery power ratings (kW)
    #[arg(long, value_delimiter = ',', required = true)]
    pub powers: Vec<f64>,

    /// Comma-separated battery energy ratings (kWh)
    #[arg(long, value_delimiter = ',', required = true)]
    pub energies: Vec<f64>,

    /// Worker threads (defaults to available parallelism)
    #[arg(long, env = "BESS_DISPATCH_WORKERS")]
    pub workers: Option<usize>,

    /// Metric the best candidate maximizes
    #[arg(long, value_enum, default_value_t = Score::SelfSufficiency)]
    pub score: Score,

    /// Write the candidate table as JSON
    #[arg(long)]
    pub json_out: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Output CSV path, stdout when absent
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Sweep ranking metric. Higher is better for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Score {
    SelfSufficiency,
    Autoconsumption,
    /// Requires a price series.
    Savings,
    PeakReduction,
}

impl Score {
    pub fn value(self, result: &DispatchResult) -> f64 {
        let t = &result.totals;
        match self {
            Self::SelfSufficiency => t.self_sufficiency_after_pct,
            Self::Autoconsumption => t.autoconsumption_after_pct,
            Self::Savings => t.net_savings.unwrap_or(f64::NAN),
            Self::PeakReduction => t.peak_import_before_kw - t.peak_import_after_kw,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sweep_lists_split_on_commas() {
        let cli = Cli::try_parse_from([
            "bess-dispatch",
            "sweep",
            "--preset",
            "stacked",
            "--powers",
            "10,20",
            "--energies",
            "40",
            "--score",
            "peak-reduction",
        ])
        .unwrap();
        let Command::Sweep(args) = cli.command else { panic!("expected sweep") };
        assert_eq!(args.powers, vec![10.0, 20.0]);
        assert_eq!(args.energies, vec![40.0]);
        assert_eq!(args.score, Score::PeakReduction);
    }

    #[test]
    fn sources_are_exclusive() {
        let parsed = Cli::try_parse_from([
            "bess-dispatch",
            "run",
            "--preset",
            "stacked",
            "--scenario",
            "site.toml",
        ]);
        assert!(parsed.is_err());
    }
}
