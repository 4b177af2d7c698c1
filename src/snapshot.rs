//! Read-only views of the world for observers, and periodic JSON dumps of
//! those views.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::config::Targets;
use crate::environment::Reservoir;
use crate::error::SimResult;
use crate::finance::{Granularity, Tally};
use crate::land::BiodiversityCategory;
use crate::planner::{Plan, TargetStatuses};
use crate::simulation::{SalesTargets, Simulation};
use crate::tree::{LifeStage, Position, Species, Tree};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellView {
    pub species: Species,
    pub stage: LifeStage,
    pub height: f64,
    pub diameter: f64,
    pub age: u32,
    pub stress: f64,
    pub stress_env: f64,
    pub stress_age: f64,
    pub air_co2_ppm: f64,
    pub carbon_absorbed: Decimal,
}

impl From<&Tree> for CellView {
    fn from(tree: &Tree) -> Self {
        Self {
            species: tree.species(),
            stage: tree.stage(),
            height: tree.height(),
            diameter: tree.diameter(),
            age: tree.age(),
            stress: tree.stress(),
            stress_env: tree.stress_env(),
            stress_age: tree.stress_age(),
            air_co2_ppm: tree.air_co2_ppm(),
            carbon_absorbed: tree.carbon_absorbed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerView {
    pub year: Tally,
    pub rotation: Tally,
    pub overall: Tally,
}

impl LedgerView {
    fn collect(tally: impl Fn(Granularity) -> Tally) -> Self {
        Self {
            year: tally(Granularity::Year),
            rotation: tally(Granularity::Rotation),
            overall: tally(Granularity::Overall),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorldSnapshot {
    pub year: u32,
    pub rotation: u32,
    /// Row-major; `None` for an empty cell.
    pub grid: Vec<Vec<Option<CellView>>>,
    pub biodiversity_score: f64,
    pub biodiversity_category: BiodiversityCategory,
    pub co2_ppm: f64,
    pub reservoirs: BTreeMap<Reservoir, Decimal>,
    pub funds: Decimal,
    pub income: LedgerView,
    pub expenses: LedgerView,
    pub sales_targets: SalesTargets,
    pub plan: Plan,
    pub targets: Targets,
    pub target_status: TargetStatuses,
    pub fossil_fuel_emission: Decimal,
}

impl WorldSnapshot {
    pub fn capture(sim: &Simulation) -> Self {
        let land = sim.land();
        let grid = (0..land.rows())
            .map(|row| {
                (0..land.cols())
                    .map(|col| {
                        land.tree_at(Position::new(row, col))
                            .map(CellView::from)
                    })
                    .collect()
            })
            .collect();
        let accounts = sim.accounts();
        Self {
            year: sim.time(),
            rotation: sim.rotation(),
            grid,
            biodiversity_score: land.biodiversity_score(),
            biodiversity_category: land.biodiversity_category(),
            co2_ppm: sim.co2_ppm(),
            reservoirs: sim.environment().carbon().masses().clone(),
            funds: sim.funds(),
            income: LedgerView::collect(|g| accounts.income(g).clone()),
            expenses: LedgerView::collect(|g| accounts.expenses(g).clone()),
            sales_targets: sim.sales_targets(),
            plan: sim.planner().plan().clone(),
            targets: sim.planner().targets().clone(),
            target_status: sim.target_status(),
            fossil_fuel_emission: sim.fossil_fuel_emission(),
        }
    }

    pub fn tree_count(&self) -> usize {
        self.grid.iter().flatten().filter(|cell| cell.is_some()).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotMetadata {
    pub scenario: String,
    pub year: u32,
    pub written_at: DateTime<Utc>,
    pub tree_count: usize,
}

#[derive(Serialize)]
struct SnapshotFile<'a> {
    metadata: SnapshotMetadata,
    world: &'a WorldSnapshot,
}

/// Writes `<dir>/<scenario>/year_NNNNNN.json` every `interval` years.
/// An interval of zero disables writing.
pub struct SnapshotWriter {
    output_dir: PathBuf,
    interval_years: u32,
}

impl SnapshotWriter {
    pub fn new(output_dir: impl AsRef<Path>, interval_years: u32) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            interval_years,
        }
    }

    pub fn should_write(&self, year: u32) -> bool {
        self.interval_years != 0 && year % self.interval_years == 0
    }

    pub fn maybe_write(
        &self,
        snapshot: &WorldSnapshot,
        scenario_name: &str,
    ) -> SimResult<Option<PathBuf>> {
        if !self.should_write(snapshot.year) {
            return Ok(None);
        }
        let dir = self.output_dir.join(scenario_name);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("year_{:06}.json", snapshot.year));
        let file = SnapshotFile {
            metadata: SnapshotMetadata {
                scenario: scenario_name.to_string(),
                year: snapshot.year,
                written_at: Utc::now(),
                tree_count: snapshot.tree_count(),
            },
            world: snapshot,
        };
        fs::write(&path, serde_json::to_string_pretty(&file)?)?;
        debug!(path = %path.display(), year = snapshot.year, "snapshot written");
        Ok(Some(path))
    }
}
