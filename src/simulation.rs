//! Year-by-year orchestration of the plot, its plan and its economy.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::chemistry::to_decimal;
use crate::config::{MicroworldConfig, Targets};
use crate::environment::{CarbonLedger, Environment, Reservoir};
use crate::error::SimResult;
use crate::finance::{Accounts, Granularity, Tally};
use crate::income::{IncomeSource, LandConditions, Resource};
use crate::land::{BiodiversityCategory, Land, LandLayout};
use crate::planner::{ActionKind, ActionStatus, Planner, TargetStatuses};
use crate::rng::{RngManager, GROWTH_STREAM, NTFP_STREAM, RECREATION_STREAM};
use crate::snapshot::WorldSnapshot;
use crate::state::SavedState;
use crate::tree::{LifeStage, Species};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub kind: ActionKind,
    pub species: Species,
    pub stage: Option<LifeStage>,
    pub attempted: u32,
    pub succeeded: u32,
    pub status: ActionStatus,
}

/// Passed to observers at the end of every simulated year.
#[derive(Debug, Clone, Serialize)]
pub struct YearSummary {
    pub year: u32,
    pub rotation: u32,
    pub co2_ppm: f64,
    pub biodiversity_score: f64,
    pub biodiversity_category: BiodiversityCategory,
    pub tree_count: usize,
    pub funds: Decimal,
    pub income: Decimal,
    pub expenses: Decimal,
    pub actions: Vec<ActionOutcome>,
    pub targets: TargetStatuses,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesTargets {
    pub by_resource: BTreeMap<Resource, Decimal>,
    pub total: Decimal,
}

pub struct Simulation {
    config: MicroworldConfig,
    seed: u64,
    rng: RngManager,
    env: Environment,
    planner: Planner,
    sources: BTreeMap<Resource, IncomeSource>,
    accounts: Accounts,
    layout: LandLayout,
    time: u32,
    rotation: u32,
}

impl Simulation {
    pub fn new(config: MicroworldConfig, seed: u64) -> SimResult<Self> {
        config.validate()?;
        let planner = Planner::new(&config.planning, config.economy.default_dependencies());
        let emission = config.carbon.fossil_fuel_emission;
        Ok(Self::build(config, seed, planner, LandLayout::default(), emission))
    }

    /// A fresh world at year 0: sown, warmed up and with fresh accounts.
    fn build(
        config: MicroworldConfig,
        seed: u64,
        mut planner: Planner,
        layout: LandLayout,
        fossil_fuel_emission: Decimal,
    ) -> Self {
        let mut rng = RngManager::new(seed);
        let env = Environment::new(&config, layout, fossil_fuel_emission, &mut rng);
        let layout = env.land().layout();
        let sources = Resource::ALL
            .iter()
            .map(|resource| (*resource, IncomeSource::from_config(*resource, &config)))
            .collect();
        planner.reset_action_statuses();
        let mut sim = Self {
            accounts: Accounts::new(config.economy.funds_start),
            config,
            seed,
            rng,
            env,
            planner,
            sources,
            layout,
            time: 0,
            rotation: 0,
        };
        sim.update_sales_targets();
        for _ in 0..sim.config.land.warmup_years {
            sim.env
                .take_time_step(true, &mut sim.rng.stream(GROWTH_STREAM));
        }
        sim.check_targets();
        info!(
            seed,
            warmup_years = sim.config.land.warmup_years,
            trees = sim.env.land().counts().total(),
            co2_ppm = sim.env.air_co2_ppm(),
            "world created"
        );
        sim
    }

    fn reset(&mut self) {
        let emission = self.env.fossil_fuel_emission();
        *self = Self::build(
            self.config.clone(),
            self.seed,
            self.planner.clone(),
            self.layout.clone(),
            emission,
        );
    }

    /// Moves the world to `year`. Going back rebuilds from year 0 and replays.
    pub fn goto(&mut self, year: u32) {
        self.goto_with_hook(year, |_| {});
    }

    pub fn goto_with_hook<F>(&mut self, year: u32, mut hook: F)
    where
        F: FnMut(&YearSummary),
    {
        if year < self.time {
            info!(from = self.time, to = year, "rewinding world");
            self.reset();
        }
        while self.time < year {
            let summary = self.take_time_step();
            hook(&summary);
        }
    }

    fn take_time_step(&mut self) -> YearSummary {
        self.accounts.start_year();
        if self.update_rotation() {
            self.accounts.start_rotation();
        }
        let actions = self.execute_plans(self.time);
        self.time += 1;
        self.env
            .take_time_step(false, &mut self.rng.stream(GROWTH_STREAM));
        self.update_availability();
        self.generate_income();
        let targets = self.check_targets();

        let land = self.env.land();
        let summary = YearSummary {
            year: self.time,
            rotation: self.rotation,
            co2_ppm: self.env.air_co2_ppm(),
            biodiversity_score: land.biodiversity_score(),
            biodiversity_category: land.biodiversity_category(),
            tree_count: land.counts().total(),
            funds: self.accounts.funds(),
            income: self.accounts.income(Granularity::Year).total,
            expenses: self.accounts.expenses(Granularity::Year).total,
            actions,
            targets,
        };
        debug!(
            year = summary.year,
            rotation = summary.rotation,
            co2_ppm = summary.co2_ppm,
            biodiversity = summary.biodiversity_score,
            funds = %summary.funds,
            income = %summary.income,
            "year complete"
        );
        summary
    }

    /// The rotation of the year being entered. Returns whether it changed.
    fn update_rotation(&mut self) -> bool {
        let rotation = (self.time + 1) / self.planner.rotation_period();
        if rotation != self.rotation {
            self.rotation = rotation;
            return true;
        }
        false
    }

    fn execute_plans(&mut self, year: u32) -> Vec<ActionOutcome> {
        let Some(year_plan) = self.planner.plan().get(&year).cloned() else {
            return Vec::new();
        };
        let mut outcomes = Vec::new();
        for kind in [ActionKind::Fell, ActionKind::Plant] {
            for (index, action) in year_plan.actions(kind).iter().enumerate() {
                let mut succeeded = 0;
                for _ in 0..action.count {
                    if self.execute_action(kind, action.species, action.stage) {
                        succeeded += 1;
                    }
                }
                let status = ActionStatus::from_attempts(succeeded, action.count);
                self.planner.set_action_status(year, kind, index, status);
                debug!(year, ?kind, species = ?action.species, succeeded, attempted = action.count, "plan action executed");
                outcomes.push(ActionOutcome {
                    kind,
                    species: action.species,
                    stage: action.stage,
                    attempted: action.count,
                    succeeded,
                    status,
                });
            }
        }
        outcomes
    }

    fn execute_action(&mut self, kind: ActionKind, species: Species, stage: Option<LifeStage>) -> bool {
        match kind {
            ActionKind::Fell => stage.is_some_and(|stage| self.fell_one(species, stage)),
            ActionKind::Plant => self.plant_one(species),
        }
    }

    /// Fells the first matching tree, paying a cost proportional to its height.
    fn fell_one(&mut self, species: Species, stage: LifeStage) -> bool {
        if stage.is_premature() {
            return false;
        }
        let land = self.env.land();
        let Some(pos) = land.get_tree(species, stage) else {
            return false;
        };
        let Some(tree) = land.tree_at(pos) else {
            return false;
        };
        let height_max = self.config.trees.species(species).height_max;
        let cost = self.config.economy.fell_cost * to_decimal(tree.height() / height_max);
        if !self.accounts.try_pay(Resource::Timber, cost) {
            return false;
        }
        let Some(weight) = self.env.land_mut().fell_tree(pos, species, stage) else {
            return false;
        };
        if let Some(timber) = self.sources.get_mut(&Resource::Timber) {
            timber.add_available(weight);
        }
        true
    }

    /// Plants a seedling in the first free cell.
    fn plant_one(&mut self, species: Species) -> bool {
        let Some(pos) = self.env.land().get_free_spaces().first().copied() else {
            return false;
        };
        if !self.accounts.try_pay(Resource::Timber, self.config.economy.plant_cost) {
            return false;
        }
        self.env
            .plant_tree(species, pos, &mut self.rng.stream(GROWTH_STREAM))
    }

    fn update_availability(&mut self) {
        let land = self.env.land();
        let conditions = LandConditions {
            biodiversity_score: land.biodiversity_score(),
            dead_wood_fraction: land.dead_wood_fraction(),
        };
        for (resource, source) in self.sources.iter_mut() {
            let stream = match resource {
                Resource::Timber => continue,
                Resource::Ntfp => NTFP_STREAM,
                Resource::Recreation => RECREATION_STREAM,
            };
            source.update_availability(
                self.planner.income_dependency(*resource),
                &mut self.accounts,
                conditions,
                &mut self.rng.stream(stream),
            );
        }
    }

    fn generate_income(&mut self) {
        for (resource, source) in self.sources.iter_mut() {
            let proceeds = source.sell(&mut self.env);
            self.accounts.credit(*resource, proceeds);
        }
    }

    fn check_targets(&mut self) -> TargetStatuses {
        self.planner.check_target_met(
            self.env.air_co2_ppm(),
            self.accounts.income(Granularity::Rotation).total,
            self.accounts.funds(),
            self.time,
            self.rotation,
        )
    }

    fn update_sales_targets(&mut self) {
        let income_target = self.planner.targets().income;
        for (resource, source) in self.sources.iter_mut() {
            source.set_sales_target(income_target, self.planner.income_dependency(*resource));
        }
    }

    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn rotation(&self) -> u32 {
        self.rotation
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &MicroworldConfig {
        &self.config
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn land(&self) -> &Land {
        self.env.land()
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    pub fn funds(&self) -> Decimal {
        self.accounts.funds()
    }

    pub fn income(&self, granularity: Granularity) -> &Tally {
        self.accounts.income(granularity)
    }

    pub fn expenses(&self, granularity: Granularity) -> &Tally {
        self.accounts.expenses(granularity)
    }

    pub fn co2_ppm(&self) -> f64 {
        self.env.air_co2_ppm()
    }

    pub fn carbon(&self, reservoir: Reservoir) -> Decimal {
        self.env.carbon().mass(reservoir)
    }

    pub fn income_source(&self, resource: Resource) -> Option<&IncomeSource> {
        self.sources.get(&resource)
    }

    pub fn sales_targets(&self) -> SalesTargets {
        SalesTargets {
            by_resource: self
                .sources
                .iter()
                .map(|(resource, source)| (*resource, source.sales_target()))
                .collect(),
            total: self.planner.targets().income,
        }
    }

    pub fn target_status(&self) -> TargetStatuses {
        self.planner.status()
    }

    pub fn layout(&self) -> &LandLayout {
        &self.layout
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot::capture(self)
    }

    pub fn set_targets(&mut self, targets: Targets) {
        self.planner.set_targets(targets);
        self.update_sales_targets();
    }

    pub fn set_income_dependency(&mut self, dependencies: &BTreeMap<Resource, f64>) -> SimResult<()> {
        self.planner.set_income_dependency(dependencies)?;
        self.update_sales_targets();
        Ok(())
    }

    pub fn set_rotation_period(&mut self, period: u32) -> SimResult<()> {
        self.planner.set_rotation_period(period)
    }

    pub fn fossil_fuel_emission(&self) -> Decimal {
        self.env.fossil_fuel_emission()
    }

    pub fn set_fossil_fuel_emission(&mut self, emission: Decimal) {
        self.env.set_fossil_fuel_emission(emission);
    }

    pub fn add_action(
        &mut self,
        year: u32,
        kind: ActionKind,
        species: Species,
        count: u32,
        stage: Option<LifeStage>,
    ) -> SimResult<()> {
        self.planner.add_action(year, kind, species, count, stage)
    }

    pub fn delete_action(
        &mut self,
        year: u32,
        kind: ActionKind,
        species: Species,
        stage: Option<LifeStage>,
    ) -> bool {
        self.planner.delete_action(year, kind, species, stage)
    }

    /// Everything needed to replay this run from year 0.
    pub fn save_state(&self) -> SavedState {
        SavedState::capture(self)
    }

    /// Applies a saved state and rewinds to year 0. Invalid state leaves
    /// the simulation untouched.
    pub fn load_state(&mut self, state: SavedState) -> SimResult<()> {
        state.validate(&self.config)?;
        let mut planner = self.planner.clone();
        let mut plan = state.plan;
        for year_plan in plan.values_mut() {
            for action in year_plan.plant.iter_mut() {
                action.stage = None;
            }
        }
        planner.set_plan(plan);
        planner.set_targets(state.target_settings);
        planner.set_income_dependency(&state.income_dependency)?;
        planner.set_rotation_period(state.rotation_period)?;

        self.planner = planner;
        self.layout = LandLayout {
            sow_positions: Some(state.init_sow_positions),
            visit_order: Some(state.time_step_order),
        };
        if let Some(seed) = state.seed {
            self.seed = seed;
        }
        self.env.set_fossil_fuel_emission(state.fossil_fuel_emission);
        self.reset();
        info!(seed = self.seed, "saved state loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::TargetStatus;

    fn small_config() -> MicroworldConfig {
        let mut config = MicroworldConfig::default();
        config.land.rows = 3;
        config.land.columns = 3;
        config.land.warmup_years = 5;
        config
    }

    #[test]
    fn new_world_starts_at_year_zero() {
        let sim = Simulation::new(small_config(), 7).unwrap();
        assert_eq!(sim.time(), 0);
        assert_eq!(sim.rotation(), 0);
        assert_eq!(sim.funds(), Decimal::from(50_000));
        assert_eq!(sim.income(Granularity::Overall).total, Decimal::ZERO);
        assert_ne!(sim.target_status().co2, TargetStatus::Pending);
    }

    #[test]
    fn goto_calls_hook_once_per_year() {
        let mut sim = Simulation::new(small_config(), 7).unwrap();
        let mut years = Vec::new();
        sim.goto_with_hook(4, |summary| years.push(summary.year));
        assert_eq!(years, vec![1, 2, 3, 4]);
        assert_eq!(sim.time(), 4);
    }

    #[test]
    fn rewinding_replays_identically() {
        let mut sim = Simulation::new(small_config(), 11).unwrap();
        sim.goto(6);
        let funds = sim.funds();
        let air = sim.carbon(Reservoir::Air);
        sim.goto(2);
        assert_eq!(sim.time(), 2);
        sim.goto(6);
        assert_eq!(sim.funds(), funds);
        assert_eq!(sim.carbon(Reservoir::Air), air);
    }

    #[test]
    fn plant_action_pays_and_fills_first_free_cell() {
        let mut config = small_config();
        config.land.free_fraction_start = 1.0;
        let mut sim = Simulation::new(config, 1).unwrap();
        sim.add_action(0, ActionKind::Plant, Species::Deciduous, 2, None)
            .unwrap();
        let mut outcome = None;
        sim.goto_with_hook(1, |summary| outcome = summary.actions.first().cloned());
        let outcome = outcome.expect("plant action reported");
        assert_eq!(outcome.status, ActionStatus::Succeeded);
        assert_eq!(
            sim.expenses(Granularity::Year).get(Resource::Timber),
            Decimal::from(2 * 277)
        );
        assert!(sim.land().tree_at(crate::tree::Position::new(0, 0)).is_some());
        assert_eq!(
            sim.planner().actions_for(0)[0].status,
            ActionStatus::Succeeded
        );
    }

    #[test]
    fn seedling_fell_actions_always_fail() {
        let mut sim = Simulation::new(small_config(), 3).unwrap();
        sim.add_action(0, ActionKind::Fell, Species::Coniferous, 1, Some(LifeStage::Seedling))
            .unwrap();
        sim.goto(1);
        assert_eq!(sim.planner().actions_for(0)[0].status, ActionStatus::Failed);
    }

    #[test]
    fn sales_targets_follow_dependencies() {
        let mut sim = Simulation::new(small_config(), 3).unwrap();
        let deps = BTreeMap::from([(Resource::Timber, 0.4), (Resource::Ntfp, 0.6)]);
        sim.set_income_dependency(&deps).unwrap();
        let targets = sim.sales_targets();
        assert_eq!(targets.total, Decimal::from(30_000));
        assert_eq!(targets.by_resource[&Resource::Ntfp], Decimal::from(18_000));
        assert_eq!(targets.by_resource[&Resource::Recreation], Decimal::ZERO);
    }
}
