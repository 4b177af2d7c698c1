use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::{MicroworldConfig, Targets};
use crate::income::Resource;
use crate::planner::ActionKind;
use crate::simulation::Simulation;
use crate::tree::{LifeStage, Species};

fn default_snapshot_interval_years() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    pub seed: u64,
    #[serde(default)]
    pub years: Option<u32>,
    #[serde(default = "default_snapshot_interval_years")]
    pub snapshot_interval_years: u32,
    #[serde(default)]
    pub config: MicroworldConfig,
    #[serde(default)]
    pub plan: Vec<ScenarioAction>,
    #[serde(default)]
    pub targets: Option<Targets>,
    #[serde(default)]
    pub income_dependency: Option<BTreeMap<Resource, f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioAction {
    pub year: u32,
    pub kind: ActionKind,
    pub species: Species,
    pub count: u32,
    #[serde(default)]
    pub stage: Option<LifeStage>,
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(scenario)
    }
}

impl Scenario {
    /// A year-0 world with the scenario's settings and plan applied.
    pub fn build_simulation(&self) -> Result<Simulation> {
        let mut sim = Simulation::new(self.config.clone(), self.seed)
            .with_context(|| format!("Scenario '{}' has an invalid configuration", self.name))?;
        if let Some(targets) = &self.targets {
            sim.set_targets(targets.clone());
        }
        if let Some(dependencies) = &self.income_dependency {
            sim.set_income_dependency(dependencies)
                .with_context(|| format!("Scenario '{}' income dependencies", self.name))?;
        }
        for action in &self.plan {
            sim.add_action(
                action.year,
                action.kind,
                action.species,
                action.count,
                action.stage,
            )
            .with_context(|| {
                format!("Scenario '{}' plan entry for year {}", self.name, action.year)
            })?;
        }
        Ok(sim)
    }

    pub fn years(&self, override_years: Option<u32>) -> u32 {
        override_years.or(self.years).unwrap_or(100)
    }
}
