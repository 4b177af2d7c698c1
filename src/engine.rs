use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use crate::simulation::{Simulation, YearSummary};
use crate::snapshot::SnapshotWriter;

pub struct EngineSettings {
    pub scenario_name: String,
    pub snapshot_interval_years: u32,
    pub snapshot_dir: PathBuf,
}

/// Something that wants to see every completed year.
pub trait YearObserver {
    fn name(&self) -> &str;
    fn observe(&mut self, summary: &YearSummary) -> Result<()>;
}

/// Logs each year's headline numbers.
#[derive(Debug, Default)]
pub struct SummaryLogger;

impl SummaryLogger {
    pub fn new() -> Self {
        Self
    }
}

impl YearObserver for SummaryLogger {
    fn name(&self) -> &str {
        "summary_logger"
    }

    fn observe(&mut self, summary: &YearSummary) -> Result<()> {
        info!(
            year = summary.year,
            rotation = summary.rotation,
            co2_ppm = summary.co2_ppm,
            biodiversity = summary.biodiversity_score,
            trees = summary.tree_count,
            funds = %summary.funds,
            "year"
        );
        Ok(())
    }
}

pub struct EngineBuilder {
    settings: EngineSettings,
    observers: Vec<Box<dyn YearObserver>>,
}

impl EngineBuilder {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: impl YearObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn build(self, simulation: Simulation) -> Engine {
        Engine {
            simulation,
            observers: self.observers,
            snapshot_writer: SnapshotWriter::new(
                &self.settings.snapshot_dir,
                self.settings.snapshot_interval_years,
            ),
            settings: self.settings,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub final_year: u32,
    pub snapshots: Vec<PathBuf>,
}

pub struct Engine {
    simulation: Simulation,
    observers: Vec<Box<dyn YearObserver>>,
    snapshot_writer: SnapshotWriter,
    settings: EngineSettings,
}

impl Engine {
    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.simulation
    }

    pub fn into_simulation(self) -> Simulation {
        self.simulation
    }

    pub fn run(&mut self, to_year: u32) -> Result<RunReport> {
        self.run_with_hook(to_year, |_| {})
    }

    /// Advances one year at a time up to `to_year`, feeding observers and
    /// `hook` and writing snapshots on the configured interval. A target in
    /// the past rewinds first.
    pub fn run_with_hook<F>(&mut self, to_year: u32, mut hook: F) -> Result<RunReport>
    where
        F: FnMut(&YearSummary),
    {
        if to_year < self.simulation.time() {
            self.simulation.goto(0);
        }
        let mut report = RunReport::default();
        while self.simulation.time() < to_year {
            let next = self.simulation.time() + 1;
            let mut latest = None;
            self.simulation
                .goto_with_hook(next, |summary| latest = Some(summary.clone()));
            if let Some(summary) = latest {
                for observer in &mut self.observers {
                    observer
                        .observe(&summary)
                        .with_context(|| format!("observer '{}' failed", observer.name()))?;
                }
                hook(&summary);
            }
            let snapshot = self.simulation.snapshot();
            if let Some(path) = self
                .snapshot_writer
                .maybe_write(&snapshot, &self.settings.scenario_name)
                .with_context(|| format!("Failed to write snapshot for year {next}"))?
            {
                info!(path = %path.display(), year = next, "snapshot written");
                report.snapshots.push(path);
            }
        }
        report.final_year = self.simulation.time();
        Ok(report)
    }
}
