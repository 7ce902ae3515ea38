mod cli;

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::TimeDelta;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bess_dispatch::config::ScenarioConfig;
use bess_dispatch::io::export::{export_result_json, export_trace_csv};
use bess_dispatch::io::import::{SeriesTable, write_series_csv};
use bess_dispatch::request::DispatchRequest;
use bess_dispatch::series::default_start;
use bess_dispatch::sim::CancelToken;
use bess_dispatch::sweep::{best_by, candidate_grid, default_workers, run_sweep};

use crate::cli::{Cli, Command, GenerateArgs, OverrideArgs, RunArgs, SourceArgs, SweepArgs};

/// Loads the scenario, applies overrides and validates it.
fn load_scenario(source: &SourceArgs, overrides: &OverrideArgs) -> Result<ScenarioConfig> {
    // --scenario takes priority, then --preset, then the default preset
    let mut scenario = if let Some(path) = &source.scenario {
        ScenarioConfig::from_toml_file(path)?
    } else {
        ScenarioConfig::from_preset(source.preset.as_deref().unwrap_or("self_consumption"))?
    };

    if let Some(seed) = overrides.seed {
        scenario.simulation.seed = seed;
    }
    if let Some(days) = overrides.days {
        scenario.simulation.days = days;
    }

    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        bail!("scenario has {} invalid field(s)", errors.len());
    }
    Ok(scenario)
}

fn load_request(source: &SourceArgs, overrides: &OverrideArgs) -> Result<DispatchRequest> {
    if let Some(path) = &source.request {
        if overrides.seed.is_some() || overrides.days.is_some() {
            warn!("--seed and --days only apply to scenarios; ignored for a JSON request");
        }
        let content = fs::read_to_string(path).with_context(|| format!("cannot read \"{}\"", path.display()))?;
        return serde_json::from_str(&content).with_context(|| format!("invalid request \"{}\"", path.display()));
    }
    Ok(load_scenario(source, overrides)?.to_request()?)
}

fn run(args: &RunArgs) -> Result<()> {
    let mut request = load_request(&args.source, &args.overrides)?;
    if args.trace_out.is_some() {
        request.options.record_trace = true;
    }

    let result = request.run().context("dispatch run failed")?;
    println!("{result}");

    if let Some(path) = &args.trace_out {
        let trace = result.trace.as_deref().unwrap_or_default();
        export_trace_csv(trace, path).with_context(|| format!("failed to write CSV \"{}\"", path.display()))?;
        eprintln!("Trace written to {}", path.display());
    }
    if let Some(path) = &args.json_out {
        export_result_json(&result, path).with_context(|| format!("failed to write JSON \"{}\"", path.display()))?;
        eprintln!("Result written to {}", path.display());
    }
    Ok(())
}

fn sweep(args: &SweepArgs) -> Result<()> {
    let request = load_request(&args.source, &args.overrides)?;
    let candidates = candidate_grid(&args.powers, &args.energies);
    if candidates.is_empty() {
        bail!("sweep needs at least one power and one energy rating");
    }

    let workers = args.workers.unwrap_or_else(default_workers);
    let outcomes = run_sweep(&request, &candidates, workers, &CancelToken::new());

    println!("{:>5} {:>10} {:>11} {:>12}  status", "#", "power_kw", "energy_kwh", "score");
    let mut rows = Vec::with_capacity(outcomes.len());
    for outcome in &outcomes {
        let c = outcome.candidate;
        match &outcome.result {
            Ok(result) => {
                let score = args.score.value(result);
                println!("{:>5} {:>10.1} {:>11.1} {score:>12.3}  ok", outcome.index, c.power_kw, c.energy_kwh);
                rows.push(serde_json::json!({
                    "index": outcome.index,
                    "candidate": c,
                    "score": score.is_finite().then_some(score),
                    "totals": result.totals,
                    "degradation": result.degradation,
                }));
            }
            Err(e) => {
                println!("{:>5} {:>10.1} {:>11.1} {:>12}  {e}", outcome.index, c.power_kw, c.energy_kwh, "-");
                rows.push(serde_json::json!({
                    "index": outcome.index,
                    "candidate": c,
                    "error": e.to_string(),
                }));
            }
        }
    }

    let best = best_by(&outcomes, |result| args.score.value(result));
    match best {
        Some(best) => {
            let c = best.candidate;
            println!("\nBest by {:?}: #{} ({:.1} kW / {:.1} kWh)", args.score, best.index, c.power_kw, c.energy_kwh);
        }
        None => println!("\nNo candidate produced a finite score"),
    }

    if let Some(path) = &args.json_out {
        let doc = serde_json::json!({
            "score": format!("{:?}", args.score),
            "best_index": best.map(|b| b.index),
            "candidates": rows,
        });
        let content = serde_json::to_string_pretty(&doc)?;
        fs::write(path, content + "\n").with_context(|| format!("failed to write JSON \"{}\"", path.display()))?;
        eprintln!("Sweep written to {}", path.display());
    }
    Ok(())
}

fn generate(args: &GenerateArgs) -> Result<()> {
    let request = load_request(&args.source, &args.overrides)?;
    let start = request.start.unwrap_or_else(default_start);
    let step = TimeDelta::minutes(request.time_resolution.step_minutes());
    let timestamps = request.timestamps.clone().unwrap_or_else(|| {
        (0..request.load_kw.len()).scan(start, |t, _| {
            let current = *t;
            *t += step;
            Some(current)
        }).collect()
    });
    let table = SeriesTable {
        timestamps: Some(timestamps),
        load_kw: request.load_kw,
        pv_kw: request.pv_kw,
        price_per_mwh: request.price_per_mwh,
    };

    match &args.out {
        Some(path) => write_series(&table, path)?,
        None => write_series_csv(&table, io::stdout().lock())?,
    }
    Ok(())
}

fn write_series(table: &SeriesTable, path: &Path) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("cannot create \"{}\"", path.display()))?;
    write_series_csv(table, io::BufWriter::new(file))?;
    info!(path = %path.display(), steps = table.load_kw.len(), "series written");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Run(args) => run(args),
        Command::Sweep(args) => sweep(args),
        Command::Generate(args) => generate(args),
        Command::Presets => {
            for name in ScenarioConfig::PRESETS {
                let scenario = ScenarioConfig::from_preset(name)?;
                println!("{name:<18} {:<14} {}", scenario.dispatch.to_string(), scenario.simulation.topology);
            }
            Ok(())
        }
    }
}
