//! Replayable run state: the plan, the settings and the grid layout a run
//! was started from. Trees, funds and reservoirs are never stored; loading
//! rebuilds year 0 and replays.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{MicroworldConfig, Targets};
use crate::error::{SimError, SimResult};
use crate::income::Resource;
use crate::planner::{validate_dependencies, ActionKind, ActionStatus, Plan};
use crate::simulation::Simulation;
use crate::tree::Position;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedState {
    pub plan: Plan,
    pub target_settings: Targets,
    pub init_sow_positions: Vec<Position>,
    pub time_step_order: Vec<Position>,
    pub income_dependency: BTreeMap<Resource, f64>,
    pub rotation_period: u32,
    pub fossil_fuel_emission: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl SavedState {
    pub fn capture(sim: &Simulation) -> Self {
        let mut plan = sim.planner().plan().clone();
        for year_plan in plan.values_mut() {
            for action in year_plan.plant.iter_mut().chain(year_plan.fell.iter_mut()) {
                action.status = ActionStatus::Pending;
            }
        }
        let land = sim.land();
        Self {
            plan,
            target_settings: sim.planner().targets().clone(),
            init_sow_positions: land.sow_positions().to_vec(),
            time_step_order: land.visit_order().to_vec(),
            income_dependency: sim.planner().income_dependencies().clone(),
            rotation_period: sim.planner().rotation_period(),
            fossil_fuel_emission: sim.fossil_fuel_emission(),
            seed: Some(sim.seed()),
        }
    }

    pub fn from_json(json: &str) -> SimResult<Self> {
        serde_json::from_str(json).map_err(|err| SimError::MalformedSavedState(err.to_string()))
    }

    pub fn to_json(&self) -> SimResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn read_from(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)?;
        debug!(path = %path.display(), "reading saved state");
        Self::from_json(&data)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> SimResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        debug!(path = %path.display(), "saved state written");
        Ok(())
    }

    /// Checks the state against the grid it will be replayed on.
    pub fn validate(&self, config: &MicroworldConfig) -> SimResult<()> {
        let (rows, cols) = (config.land.rows, config.land.columns);
        let in_bounds = |pos: &Position| pos.row < rows && pos.col < cols;

        if let Some(pos) = self.init_sow_positions.iter().find(|pos| !in_bounds(*pos)) {
            return malformed(format!("sow position {pos:?} lies outside the {rows}x{cols} grid"));
        }
        let unique: BTreeSet<_> = self.init_sow_positions.iter().collect();
        if unique.len() != self.init_sow_positions.len() {
            return malformed("sow positions contain duplicates");
        }

        let visited: BTreeSet<_> = self.time_step_order.iter().filter(|pos| in_bounds(*pos)).collect();
        if self.time_step_order.len() != rows * cols || visited.len() != rows * cols {
            return malformed("time step order must visit every cell exactly once");
        }

        if self.rotation_period == 0 {
            return malformed("rotation period must be at least one year");
        }
        validate_dependencies(&self.income_dependency)
            .map_err(|err| SimError::MalformedSavedState(err.to_string()))?;
        if self.fossil_fuel_emission < Decimal::ZERO {
            return malformed("fossil fuel emission must not be negative");
        }

        for (year, year_plan) in &self.plan {
            for kind in [ActionKind::Plant, ActionKind::Fell] {
                for action in year_plan.actions(kind) {
                    if action.count == 0 {
                        return malformed(format!("year {year}: {kind:?} action with zero count"));
                    }
                    if kind == ActionKind::Fell && action.stage.is_none() {
                        return malformed(format!("year {year}: fell action without a life stage"));
                    }
                }
            }
        }
        Ok(())
    }
}

fn malformed(message: impl Into<String>) -> SimResult<()> {
    Err(SimError::MalformedSavedState(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> MicroworldConfig {
        let mut config = MicroworldConfig::default();
        config.land.rows = 3;
        config.land.columns = 3;
        config.land.warmup_years = 2;
        config
    }

    #[test]
    fn captured_state_resets_action_statuses() {
        let mut sim = Simulation::new(small_config(), 5).unwrap();
        sim.add_action(0, ActionKind::Plant, crate::tree::Species::Coniferous, 1, None)
            .unwrap();
        sim.goto(1);
        let state = sim.save_state();
        assert!(state
            .plan
            .values()
            .flat_map(|p| p.plant.iter())
            .all(|a| a.status == ActionStatus::Pending));
        assert_eq!(state.time_step_order.len(), 9);
        assert_eq!(state.seed, Some(5));
        state.validate(sim.config()).unwrap();
    }

    #[test]
    fn garbage_json_is_malformed() {
        let err = SavedState::from_json("{\"plan\": 3}").unwrap_err();
        assert!(matches!(err, SimError::MalformedSavedState(_)));
    }

    #[test]
    fn visit_order_must_cover_grid() {
        let sim = Simulation::new(small_config(), 5).unwrap();
        let mut state = sim.save_state();
        state.time_step_order.pop();
        assert!(matches!(
            state.validate(sim.config()),
            Err(SimError::MalformedSavedState(_))
        ));
    }

    #[test]
    fn out_of_bounds_sow_position_is_rejected() {
        let sim = Simulation::new(small_config(), 5).unwrap();
        let mut state = sim.save_state();
        state.init_sow_positions.push(Position::new(7, 0));
        assert!(state.validate(sim.config()).is_err());
    }
}
