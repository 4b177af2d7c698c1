//! A single tree and its yearly physiology.
//!
//! Geometry (height, diameter, stress) is plain `f64`; every carbon movement
//! goes through [`Tree::process_carbon`], which converts wood volume to a
//! matched ledger transfer.

use std::f64::consts::PI;

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::chemistry::to_decimal;
use crate::config::{diameter_from_height, LifeStageAges, SpeciesParams, TreeConfig};
use crate::environment::{CarbonDelta, Reservoir};
use crate::land::Habitat;
use crate::tolerance::Tolerance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Species {
    Coniferous,
    Deciduous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeStage {
    Seedling,
    Sapling,
    Mature,
    OldGrowth,
    Senescent,
    Dead,
}

impl LifeStage {
    /// Seedlings and saplings use the premature tolerance table.
    pub fn is_premature(self) -> bool {
        matches!(self, LifeStage::Seedling | LifeStage::Sapling)
    }

    pub fn can_reproduce(self) -> bool {
        matches!(self, LifeStage::Mature | LifeStage::OldGrowth)
    }
}

/// Stage for a given age: the first stage whose upper age is not exceeded.
/// Living trees past every threshold stay senescent.
pub fn life_stage(ages: &LifeStageAges, age: u32, alive: bool) -> LifeStage {
    if !alive {
        return LifeStage::Dead;
    }
    ages.ordered()
        .into_iter()
        .find(|(_, limit)| age <= *limit)
        .map(|(stage, _)| stage)
        .unwrap_or(LifeStage::Senescent)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    pub fn offset(self, d_row: isize, d_col: isize) -> Option<Position> {
        Some(Position {
            row: self.row.checked_add_signed(d_row)?,
            col: self.col.checked_add_signed(d_col)?,
        })
    }
}

const NEIGHBOURS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];
const EXTENDED_NEIGHBOURS: [(isize, isize); 2] = [(2, 2), (-2, -2)];

pub fn volume_cylinder(height: f64, radius: f64) -> f64 {
    PI * radius * radius * height.max(0.0)
}

/// Grams of carbon in a volume of fresh wood.
pub fn carbon_in_volume(volume: f64, wood_density: f64, params: &TreeConfig) -> f64 {
    wood_density * volume * params.dry_weight_fraction * params.carbon_fraction
}

#[derive(Debug, Clone, Serialize)]
pub struct Tree {
    species: Species,
    position: Position,
    height: f64,
    diameter: f64,
    age: u32,
    stress: f64,
    stage: LifeStage,
    age_last_reproduced: u32,
    age_max: u32,
    /// Fixed yearly decay volume, set on the first dead step.
    volume_decay: Option<f64>,
    stress_env: f64,
    stress_age: f64,
    air_co2_ppm: f64,
    carbon_absorbed: Decimal,
}

impl Tree {
    /// A new tree ages once immediately so it starts with some wood.
    pub fn new(species: Species, position: Position, habitat: &mut Habitat<'_>) -> Self {
        let params = habitat.params.species(species);
        let age_max = match params.max_age_range {
            Some((low, high)) => habitat.rng.gen_range(low..=high),
            None => params.life_stages.senescent,
        };
        let mut tree = Self {
            species,
            position,
            height: 0.0,
            diameter: 0.0,
            age: 0,
            stress: 0.0,
            stage: LifeStage::Seedling,
            age_last_reproduced: 0,
            age_max,
            volume_decay: None,
            stress_env: 0.0,
            stress_age: 0.0,
            air_co2_ppm: habitat.ledger.air_co2_ppm(),
            carbon_absorbed: Decimal::ZERO,
        };
        tree.get_older(habitat);
        tree
    }

    pub fn species(&self) -> Species {
        self.species
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn diameter(&self) -> f64 {
        self.diameter
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn stress(&self) -> f64 {
        self.stress
    }

    pub fn stage(&self) -> LifeStage {
        self.stage
    }

    pub fn age_max(&self) -> u32 {
        self.age_max
    }

    pub fn stress_env(&self) -> f64 {
        self.stress_env
    }

    pub fn stress_age(&self) -> f64 {
        self.stress_age
    }

    pub fn air_co2_ppm(&self) -> f64 {
        self.air_co2_ppm
    }

    pub fn carbon_absorbed(&self) -> Decimal {
        self.carbon_absorbed
    }

    pub fn is_alive(&self) -> bool {
        self.stress < 1.0
    }

    pub fn volume(&self) -> f64 {
        volume_cylinder(self.height, self.diameter / 2.0)
    }

    /// Advances the tree by one year. Returns `false` once nothing of the
    /// tree is left and its cell should be cleared.
    pub fn get_older(&mut self, habitat: &mut Habitat<'_>) -> bool {
        self.carbon_absorbed = Decimal::ZERO;
        if self.is_alive() {
            let params = habitat.params;
            self.stress_env = self.environment_stress(habitat);
            self.stress = (self.stress + self.stress_env).min(1.0);
            self.age += 1;
            self.stress_age = self.age_stress(params);
            self.stress = (self.stress + self.stress_age).min(1.0);
            self.live(habitat);
        } else {
            self.decay(habitat);
        }
        self.height > 0.0 && self.diameter > 0.0
    }

    fn environment_stress(&mut self, habitat: &Habitat<'_>) -> f64 {
        let ppm = habitat.ledger.air_co2_ppm();
        self.air_co2_ppm = ppm;
        let table = &habitat.params.tolerance_co2;
        let steps = if self.stage.is_premature() {
            &table.premature
        } else {
            &table.mature
        };
        Tolerance::new(steps).stress(ppm)
    }

    /// Uses the stage from before this year's age increment.
    fn age_stress(&self, params: &TreeConfig) -> f64 {
        let mut stress = 0.0;
        if self.age >= self.age_max {
            stress = 1.0;
        }
        if self.stage == LifeStage::Senescent {
            stress += params.stress_aging;
        }
        stress
    }

    fn live(&mut self, habitat: &mut Habitat<'_>) {
        let params = habitat.params;
        let species = params.species(self.species);
        self.stage = life_stage(&species.life_stages, self.age, self.is_alive());
        if self.stage == LifeStage::Dead {
            trace!(row = self.position.row, col = self.position.col, age = self.age, "tree died");
            return;
        }
        self.recover(params);
        self.grow(habitat);
        if habitat.reproduction_enabled {
            self.reproduce(habitat);
        }
    }

    fn recover(&mut self, params: &TreeConfig) {
        let health = 1.0 - self.stress;
        self.stress = (self.stress - params.stress_recovery_factor * health).max(0.0);
    }

    fn grow(&mut self, habitat: &mut Habitat<'_>) {
        let params = habitat.params;
        let species = params.species(self.species);
        let volume_old = self.volume();
        let volume_maintenance = volume_old * species.maintenance_fraction;

        let reduction = params.stress_reduction(habitat.category);
        let growth_rate = 1.0 - (self.stress - reduction).max(0.0);
        let gh_max = species.height_growth_cap();
        let gd_max = species.diameter_growth_cap();
        let height_new = (self.height + growth_rate * gh_max).min(species.height_max);
        let mut diameter_new = (self.diameter + growth_rate * gd_max).min(species.diameter_max());
        let volume_new = volume_cylinder(height_new, diameter_new / 2.0);
        let mut volume_growth = (volume_new - volume_old).max(0.0);
        if volume_growth == 0.0 && self.height > 0.0 {
            // Height has plateaued: thicken instead. The yearly max volume
            // uses the diameter cap as radius.
            let gv_max = volume_cylinder(gh_max, gd_max);
            let volume_secondary = gv_max * params.secondary_growth_fraction;
            let diameter_secondary = 2.0 * (volume_secondary / (PI * self.height)).sqrt();
            diameter_new = self.diameter + diameter_secondary;
            volume_growth = volume_secondary;
        }

        if volume_maintenance > 0.0 {
            self.process_carbon(habitat, volume_maintenance, Reservoir::Air, Reservoir::Soil);
        }
        self.process_carbon(habitat, volume_growth, Reservoir::Air, Reservoir::Vegetation);
        self.height = height_new;
        self.diameter = diameter_new;
    }

    fn reproduce(&mut self, habitat: &mut Habitat<'_>) {
        let params = habitat.params;
        let species = params.species(self.species);
        if !self.stage.can_reproduce() {
            return;
        }
        if f64::from(self.age - self.age_last_reproduced) < species.reproduction_interval {
            return;
        }
        if self.stress > params.reproduction_stress_threshold {
            return;
        }
        let free = candidate_positions(self.position, species)
            .into_iter()
            .find(|pos| habitat.is_land_free(*pos));
        if let Some(pos) = free {
            if habitat.plant_tree(self.species, pos) {
                self.age_last_reproduced = self.age;
                trace!(
                    species = ?self.species,
                    row = pos.row,
                    col = pos.col,
                    "seedling established"
                );
            }
        }
    }

    fn decay(&mut self, habitat: &mut Habitat<'_>) {
        if self.height <= 0.0 || self.diameter <= 0.0 {
            return;
        }
        let params = habitat.params;
        let density = params.species(self.species).wood_density;
        let volume = self.volume();
        let volume_decay = *self.volume_decay.get_or_insert_with(|| {
            let carbon = carbon_in_volume(volume, density, params);
            let weight = params.decay_carbon_fraction * carbon / params.carbon_fraction;
            weight / density
        });

        let decayed = volume_decay.min(volume);
        let to_soil = decayed * params.decay_soil_fraction;
        let to_air = decayed - to_soil;
        self.process_carbon(habitat, to_soil, Reservoir::Vegetation, Reservoir::Soil);
        self.process_carbon(habitat, to_air, Reservoir::Vegetation, Reservoir::Air);

        let radius = self.diameter / 2.0;
        self.height = ((volume - decayed) / (PI * radius * radius)).max(0.0);
    }

    /// Moves the carbon held in `volume` of wood from one reservoir to another.
    fn process_carbon(
        &mut self,
        habitat: &mut Habitat<'_>,
        volume: f64,
        from: Reservoir,
        to: Reservoir,
    ) {
        let params = habitat.params;
        let density = params.species(self.species).wood_density;
        let carbon = carbon_in_volume(volume, density, params) * params.carbon_scale_factor;
        let amount = to_decimal(carbon);
        habitat
            .ledger
            .update_carbon(&CarbonDelta::transfer(from, to, amount));
        if to == Reservoir::Vegetation {
            self.carbon_absorbed = amount;
        }
    }

    /// Kills the tree and cuts away `harvest_fraction` of its height.
    /// Returns the fresh weight (g) of the removed wood.
    pub(crate) fn fell(&mut self, harvest_fraction: f64, params: &SpeciesParams) -> f64 {
        self.stress = 1.0;
        self.stage = LifeStage::Dead;
        let harvested_height = self.height * harvest_fraction;
        let volume = volume_cylinder(harvested_height, self.diameter / 2.0);
        self.height = (self.height - harvested_height).max(0.0);
        self.diameter = diameter_from_height(self.height);
        volume * params.wood_density
    }
}

fn candidate_positions(origin: Position, species: &SpeciesParams) -> Vec<Position> {
    let extended: &[(isize, isize)] = if species.extended_reproduction {
        &EXTENDED_NEIGHBOURS
    } else {
        &[]
    };
    NEIGHBOURS
        .iter()
        .chain(extended)
        .filter_map(|(d_row, d_col)| origin.offset(*d_row, *d_col))
        .collect()
}
