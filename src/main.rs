use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use microworld::{
    engine::{EngineBuilder, EngineSettings, SummaryLogger},
    environment::Reservoir,
    scenario::ScenarioLoader,
    state::SavedState,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Forest plot microworld runner")]
struct Cli {
    /// Path to the scenario YAML file
    #[arg(long, default_value = "scenarios/default_plot.yaml")]
    scenario: PathBuf,

    /// Simulate up to this year (uses scenario default when omitted)
    #[arg(long)]
    years: Option<u32>,

    /// Override snapshot interval in years
    #[arg(long)]
    snapshot_interval: Option<u32>,

    /// Directory for snapshots
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Saved state to replay instead of the scenario's plan
    #[arg(long)]
    load: Option<PathBuf>,

    /// Where to write the final saved state
    #[arg(long)]
    save: Option<PathBuf>,
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,microworld=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let loader = ScenarioLoader::new(".");
    let scenario = loader.load(&cli.scenario)?;
    let mut simulation = scenario.build_simulation()?;
    if let Some(path) = &cli.load {
        let state = SavedState::read_from(path)
            .with_context(|| format!("Failed to read saved state {}", path.display()))?;
        simulation
            .load_state(state)
            .with_context(|| format!("Failed to apply saved state {}", path.display()))?;
    }

    let years = scenario.years(cli.years);
    let snapshot_interval = cli
        .snapshot_interval
        .unwrap_or(scenario.snapshot_interval_years);
    let snapshot_dir = cli
        .snapshot_dir
        .unwrap_or_else(|| PathBuf::from("snapshots"));

    let settings = EngineSettings {
        scenario_name: scenario.name.clone(),
        snapshot_interval_years: snapshot_interval,
        snapshot_dir,
    };
    let mut engine = EngineBuilder::new(settings)
        .with_observer(SummaryLogger::new())
        .build(simulation);

    let report = engine.run(years)?;
    let simulation = engine.simulation();
    if let Some(path) = &cli.save {
        simulation
            .save_state()
            .write_to(path)
            .with_context(|| format!("Failed to write saved state {}", path.display()))?;
    }

    println!(
        "Scenario '{}' completed for {} years. CO2: {:.2} ppm, trees: {}, funds: {}, air carbon: {} g, snapshots written: {}",
        scenario.name,
        report.final_year,
        simulation.co2_ppm(),
        simulation.land().counts().total(),
        simulation.funds().round_dp(2),
        simulation.carbon(Reservoir::Air).round_dp(0),
        report.snapshots.len()
    );
    Ok(())
}
