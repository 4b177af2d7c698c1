//! Management plan, targets and income dependencies.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{PlanningConfig, Targets};
use crate::error::{SimError, SimResult};
use crate::income::Resource;
use crate::tree::{LifeStage, Species};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Plant,
    Fell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Failed,
    Partial,
    Succeeded,
}

impl ActionStatus {
    /// Outcome of a multi-tree action from its per-tree results.
    pub fn from_attempts(succeeded: u32, attempted: u32) -> Self {
        if succeeded == 0 {
            ActionStatus::Failed
        } else if succeeded == attempted {
            ActionStatus::Succeeded
        } else {
            ActionStatus::Partial
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub species: Species,
    pub count: u32,
    /// Only fell actions target a life stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<LifeStage>,
    #[serde(default)]
    pub status: ActionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YearPlan {
    #[serde(default)]
    pub plant: Vec<PlannedAction>,
    #[serde(default)]
    pub fell: Vec<PlannedAction>,
}

impl YearPlan {
    pub fn actions(&self, kind: ActionKind) -> &[PlannedAction] {
        match kind {
            ActionKind::Plant => &self.plant,
            ActionKind::Fell => &self.fell,
        }
    }

    fn actions_mut(&mut self, kind: ActionKind) -> &mut Vec<PlannedAction> {
        match kind {
            ActionKind::Plant => &mut self.plant,
            ActionKind::Fell => &mut self.fell,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plant.is_empty() && self.fell.is_empty()
    }
}

pub type Plan = BTreeMap<u32, YearPlan>;

/// One entry of a year's plan, flattened for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionView {
    pub kind: ActionKind,
    pub species: Species,
    pub count: u32,
    pub stage: Option<LifeStage>,
    pub status: ActionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    #[default]
    Pending,
    Met,
    /// First year (or rotation, for income) in which the target was missed.
    FailedAt(u32),
}

impl TargetStatus {
    fn has_failed(self) -> bool {
        matches!(self, TargetStatus::FailedAt(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TargetStatuses {
    pub co2: TargetStatus,
    pub income: TargetStatus,
    pub funds: TargetStatus,
}

/// Two plant actions match on species; two fell actions also on stage.
fn same_key(kind: ActionKind, action: &PlannedAction, species: Species, stage: Option<LifeStage>) -> bool {
    action.species == species && (kind == ActionKind::Plant || action.stage == stage)
}

#[derive(Debug, Clone)]
pub struct Planner {
    plan: Plan,
    targets: Targets,
    rotation_period: u32,
    income_dependency: BTreeMap<Resource, f64>,
    status: TargetStatuses,
    last_year: u32,
    rotation_income_met: bool,
}

impl Planner {
    pub fn new(config: &PlanningConfig, income_dependency: BTreeMap<Resource, f64>) -> Self {
        Self {
            plan: Plan::new(),
            targets: config.targets.clone(),
            rotation_period: config.rotation_period.max(1),
            income_dependency,
            status: TargetStatuses::default(),
            last_year: 0,
            rotation_income_met: false,
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn set_plan(&mut self, plan: Plan) {
        self.plan = plan;
    }

    pub fn targets(&self) -> &Targets {
        &self.targets
    }

    pub fn set_targets(&mut self, targets: Targets) {
        self.targets = targets;
    }

    pub fn rotation_period(&self) -> u32 {
        self.rotation_period
    }

    pub fn set_rotation_period(&mut self, period: u32) -> SimResult<()> {
        if period == 0 {
            return Err(SimError::InvalidRotationPeriod(period));
        }
        self.rotation_period = period;
        Ok(())
    }

    pub fn income_dependency(&self, resource: Resource) -> f64 {
        self.income_dependency.get(&resource).copied().unwrap_or(0.0)
    }

    pub fn income_dependencies(&self) -> &BTreeMap<Resource, f64> {
        &self.income_dependency
    }

    /// Merges the given fractions into the current ones. The result must
    /// still sum to 1, otherwise nothing changes.
    pub fn set_income_dependency(&mut self, changes: &BTreeMap<Resource, f64>) -> SimResult<()> {
        let mut merged = self.income_dependency.clone();
        merged.extend(changes.iter().map(|(r, v)| (*r, *v)));
        validate_dependencies(&merged)?;
        self.income_dependency = merged;
        Ok(())
    }

    pub fn status(&self) -> TargetStatuses {
        self.status
    }

    /// Adds an action, replacing one with the same key in that year.
    pub fn add_action(
        &mut self,
        year: u32,
        kind: ActionKind,
        species: Species,
        count: u32,
        stage: Option<LifeStage>,
    ) -> SimResult<()> {
        if count == 0 {
            return Err(SimError::InvalidAction(format!(
                "{kind:?} action in year {year} must cover at least one tree"
            )));
        }
        let stage = match kind {
            ActionKind::Plant => None,
            ActionKind::Fell => Some(stage.ok_or_else(|| {
                SimError::InvalidAction(format!("fell action in year {year} needs a life stage"))
            })?),
        };
        let actions = self.plan.entry(year).or_default().actions_mut(kind);
        if let Some(index) = actions
            .iter()
            .position(|action| same_key(kind, action, species, stage))
        {
            actions.remove(index);
        }
        actions.push(PlannedAction {
            species,
            count,
            stage,
            status: ActionStatus::Pending,
        });
        Ok(())
    }

    /// Removes the action with the given key. Years left empty are dropped.
    pub fn delete_action(
        &mut self,
        year: u32,
        kind: ActionKind,
        species: Species,
        stage: Option<LifeStage>,
    ) -> bool {
        let Some(year_plan) = self.plan.get_mut(&year) else {
            return false;
        };
        let actions = year_plan.actions_mut(kind);
        let Some(index) = actions
            .iter()
            .position(|action| same_key(kind, action, species, stage))
        else {
            return false;
        };
        actions.remove(index);
        if year_plan.is_empty() {
            self.plan.remove(&year);
        }
        true
    }

    /// Plant actions first, then fell actions.
    pub fn actions_for(&self, year: u32) -> Vec<ActionView> {
        let Some(year_plan) = self.plan.get(&year) else {
            return Vec::new();
        };
        [ActionKind::Plant, ActionKind::Fell]
            .into_iter()
            .flat_map(|kind| {
                year_plan.actions(kind).iter().map(move |action| ActionView {
                    kind,
                    species: action.species,
                    count: action.count,
                    stage: action.stage,
                    status: action.status,
                })
            })
            .collect()
    }

    pub fn set_action_status(&mut self, year: u32, kind: ActionKind, index: usize, status: ActionStatus) {
        if let Some(action) = self
            .plan
            .get_mut(&year)
            .and_then(|year_plan| year_plan.actions_mut(kind).get_mut(index))
        {
            action.status = status;
        }
    }

    pub fn reset_action_statuses(&mut self) {
        for year_plan in self.plan.values_mut() {
            for action in year_plan.plant.iter_mut().chain(year_plan.fell.iter_mut()) {
                action.status = ActionStatus::Pending;
            }
        }
    }

    /// Updates target tracking for the state at the end of `year`.
    /// `income` is the current rotation's income.
    pub fn check_target_met(
        &mut self,
        co2_ppm: f64,
        income: Decimal,
        funds: Decimal,
        year: u32,
        rotation: u32,
    ) -> TargetStatuses {
        if year == 0 || year <= self.last_year {
            self.status = TargetStatuses::default();
        }
        let period = self.rotation_period;

        if !self.status.co2.has_failed() {
            self.status.co2 = if co2_ppm <= self.targets.co2 {
                TargetStatus::Met
            } else {
                TargetStatus::FailedAt(year)
            };
        }

        if !self.status.income.has_failed() {
            if year != 0 && year % period == 0 {
                if self.rotation_income_met {
                    self.status.income = TargetStatus::Pending;
                    self.rotation_income_met = false;
                } else {
                    self.status.income = failed_at(rotation.checked_sub(1));
                }
            }
            if income >= self.targets.income {
                self.status.income = TargetStatus::Met;
            }
        }
        // Last year of a rotation: remember whether it ended on target.
        if year % period == period - 1 {
            self.rotation_income_met = self.status.income == TargetStatus::Met;
        }

        if !self.status.funds.has_failed() {
            self.status.funds = if funds >= self.targets.funds {
                TargetStatus::Met
            } else {
                failed_at(year.checked_sub(1))
            };
        }

        self.last_year = year;
        self.status
    }
}

fn failed_at(when: Option<u32>) -> TargetStatus {
    when.map(TargetStatus::FailedAt)
        .unwrap_or(TargetStatus::Pending)
}

pub fn validate_dependencies(dependencies: &BTreeMap<Resource, f64>) -> SimResult<()> {
    if dependencies.values().any(|v| !(0.0..=1.0).contains(v)) {
        warn!(?dependencies, "income dependency outside [0, 1]");
        return Err(SimError::InvalidDependency(dependencies.values().sum()));
    }
    let sum: f64 = dependencies.values().sum();
    if (sum - 1.0).abs() > 1e-6 {
        warn!(sum, "income dependencies rejected");
        return Err(SimError::InvalidDependency(sum));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner(rotation_period: u32) -> Planner {
        let config = PlanningConfig {
            rotation_period,
            targets: Targets {
                co2: 450.0,
                income: Decimal::from(100),
                funds: Decimal::ONE,
            },
        };
        let deps = BTreeMap::from([
            (Resource::Timber, 1.0),
            (Resource::Ntfp, 0.0),
            (Resource::Recreation, 0.0),
        ]);
        Planner::new(&config, deps)
    }

    #[test]
    fn add_action_replaces_same_key() {
        let mut p = planner(10);
        p.add_action(3, ActionKind::Plant, Species::Deciduous, 2, None).unwrap();
        p.add_action(3, ActionKind::Plant, Species::Deciduous, 5, None).unwrap();
        p.add_action(3, ActionKind::Fell, Species::Deciduous, 1, Some(LifeStage::Mature)).unwrap();
        p.add_action(3, ActionKind::Fell, Species::Deciduous, 1, Some(LifeStage::OldGrowth)).unwrap();
        let year = &p.plan()[&3];
        assert_eq!(year.plant.len(), 1);
        assert_eq!(year.plant[0].count, 5);
        assert_eq!(year.fell.len(), 2);
    }

    #[test]
    fn invalid_actions_are_rejected() {
        let mut p = planner(10);
        assert!(p.add_action(1, ActionKind::Plant, Species::Coniferous, 0, None).is_err());
        assert!(p.add_action(1, ActionKind::Fell, Species::Coniferous, 1, None).is_err());
        assert!(p.plan().is_empty());
    }

    #[test]
    fn delete_action_matches_key_and_prunes_year() {
        let mut p = planner(10);
        p.add_action(4, ActionKind::Fell, Species::Coniferous, 1, Some(LifeStage::Mature)).unwrap();
        p.add_action(4, ActionKind::Plant, Species::Coniferous, 1, None).unwrap();
        assert!(!p.delete_action(4, ActionKind::Fell, Species::Deciduous, Some(LifeStage::Mature)));
        assert!(!p.delete_action(4, ActionKind::Fell, Species::Coniferous, Some(LifeStage::Dead)));
        assert!(p.delete_action(4, ActionKind::Fell, Species::Coniferous, Some(LifeStage::Mature)));
        assert!(p.plan().contains_key(&4));
        assert!(p.delete_action(4, ActionKind::Plant, Species::Coniferous, None));
        assert!(!p.plan().contains_key(&4));
    }

    #[test]
    fn actions_for_lists_plant_then_fell() {
        let mut p = planner(10);
        p.add_action(2, ActionKind::Fell, Species::Deciduous, 1, Some(LifeStage::Mature)).unwrap();
        p.add_action(2, ActionKind::Plant, Species::Coniferous, 3, None).unwrap();
        p.set_action_status(2, ActionKind::Fell, 0, ActionStatus::Partial);
        let views = p.actions_for(2);
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].kind, ActionKind::Plant);
        assert_eq!(views[1].status, ActionStatus::Partial);
        assert!(p.actions_for(9).is_empty());
        p.reset_action_statuses();
        assert_eq!(p.actions_for(2)[1].status, ActionStatus::Pending);
    }

    #[test]
    fn status_aggregation() {
        assert_eq!(ActionStatus::from_attempts(0, 3), ActionStatus::Failed);
        assert_eq!(ActionStatus::from_attempts(3, 3), ActionStatus::Succeeded);
        assert_eq!(ActionStatus::from_attempts(1, 3), ActionStatus::Partial);
    }

    #[test]
    fn dependencies_must_sum_to_one() {
        let mut p = planner(10);
        let bad = BTreeMap::from([(Resource::Ntfp, 0.5)]);
        assert!(matches!(
            p.set_income_dependency(&bad),
            Err(SimError::InvalidDependency(_))
        ));
        assert_eq!(p.income_dependency(Resource::Ntfp), 0.0);
        let good = BTreeMap::from([(Resource::Timber, 0.5), (Resource::Ntfp, 0.5)]);
        p.set_income_dependency(&good).unwrap();
        assert_eq!(p.income_dependency(Resource::Ntfp), 0.5);
        assert!(p.set_rotation_period(0).is_err());
    }

    #[test]
    fn co2_failure_sticks_until_reset() {
        let mut p = planner(10);
        let funds = Decimal::from(10);
        let s = p.check_target_met(500.0, Decimal::ZERO, funds, 1, 0);
        assert_eq!(s.co2, TargetStatus::FailedAt(1));
        let s = p.check_target_met(400.0, Decimal::ZERO, funds, 2, 0);
        assert_eq!(s.co2, TargetStatus::FailedAt(1));
        let s = p.check_target_met(400.0, Decimal::ZERO, funds, 0, 0);
        assert_eq!(s.co2, TargetStatus::Met);
    }

    #[test]
    fn funds_failure_records_previous_year() {
        let mut p = planner(10);
        let s = p.check_target_met(400.0, Decimal::ZERO, Decimal::ZERO, 0, 0);
        assert_eq!(s.funds, TargetStatus::Pending);
        let s = p.check_target_met(400.0, Decimal::ZERO, Decimal::ZERO, 5, 0);
        assert_eq!(s.funds, TargetStatus::FailedAt(4));
    }

    #[test]
    fn income_is_judged_at_rotation_boundaries() {
        let mut p = planner(2);
        let funds = Decimal::from(10);
        let met = Decimal::from(150);
        // Rotation 0 meets its target, so year 2 re-arms it.
        p.check_target_met(400.0, Decimal::ZERO, funds, 0, 0);
        assert_eq!(p.check_target_met(400.0, met, funds, 1, 0).income, TargetStatus::Met);
        assert_eq!(
            p.check_target_met(400.0, Decimal::ZERO, funds, 2, 1).income,
            TargetStatus::Pending
        );
        // Rotation 1 falls short and is recorded when rotation 2 starts.
        p.check_target_met(400.0, Decimal::ZERO, funds, 3, 1);
        assert_eq!(
            p.check_target_met(400.0, Decimal::ZERO, funds, 4, 2).income,
            TargetStatus::FailedAt(1)
        );
        assert_eq!(
            p.check_target_met(400.0, met, funds, 5, 2).income,
            TargetStatus::FailedAt(1)
        );
    }
}
