//! The plot: a fixed grid of cells, each empty or holding one tree.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::chemistry::{to_decimal, LEDGER_SCALE};
use crate::config::{LandConfig, TreeConfig};
use crate::environment::{CarbonDelta, CarbonLedger, Reservoir};
use crate::rng::{RngExt, RngManager, GROWTH_STREAM, ORDER_STREAM, SOW_STREAM};
use crate::tree::{LifeStage, Position, Species, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiodiversityCategory {
    Unforested,
    Plantation,
    Forest,
    Ecosystem,
}

#[derive(Debug, Clone)]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<Option<Tree>>,
}

impl Grid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: (0..rows * cols).map(|_| None).collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn contains(&self, pos: Position) -> bool {
        pos.row < self.rows && pos.col < self.cols
    }

    fn index(&self, pos: Position) -> Option<usize> {
        self.contains(pos).then(|| pos.row * self.cols + pos.col)
    }

    pub fn get(&self, pos: Position) -> Option<&Tree> {
        self.index(pos).and_then(|i| self.cells[i].as_ref())
    }

    pub fn get_mut(&mut self, pos: Position) -> Option<&mut Tree> {
        let i = self.index(pos)?;
        self.cells[i].as_mut()
    }

    /// Out-of-bounds positions are never free.
    pub fn is_free(&self, pos: Position) -> bool {
        self.index(pos).is_some_and(|i| self.cells[i].is_none())
    }

    pub fn take(&mut self, pos: Position) -> Option<Tree> {
        let i = self.index(pos)?;
        self.cells[i].take()
    }

    pub fn put(&mut self, pos: Position, tree: Tree) {
        if let Some(i) = self.index(pos) {
            self.cells[i] = Some(tree);
        }
    }

    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| Position::new(row, col)))
    }

    /// Occupied cells in row-major order.
    pub fn trees(&self) -> impl Iterator<Item = &Tree> + '_ {
        self.cells.iter().flatten()
    }
}

/// What a tree may see and touch while it ages: the grid around it, the
/// carbon ledger and a random stream.
pub struct Habitat<'a> {
    pub grid: &'a mut Grid,
    pub ledger: &'a mut dyn CarbonLedger,
    pub rng: &'a mut dyn RngCore,
    pub params: &'a TreeConfig,
    pub category: BiodiversityCategory,
    pub reproduction_enabled: bool,
}

impl<'a> Habitat<'a> {
    pub fn is_land_free(&self, pos: Position) -> bool {
        self.grid.is_free(pos)
    }

    pub fn plant_tree(&mut self, species: Species, pos: Position) -> bool {
        if !self.is_land_free(pos) {
            return false;
        }
        let tree = Tree::new(species, pos, self);
        self.grid.put(pos, tree);
        true
    }
}

/// Random choices that must replay identically: where the initial trees
/// were sown and the order cells are visited each year.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandLayout {
    pub sow_positions: Option<Vec<Position>>,
    pub visit_order: Option<Vec<Position>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreeCounts {
    pub by_species: BTreeMap<Species, usize>,
    pub by_stage: BTreeMap<LifeStage, usize>,
}

impl TreeCounts {
    pub fn species(&self, species: Species) -> usize {
        self.by_species.get(&species).copied().unwrap_or(0)
    }

    pub fn stage(&self, stage: LifeStage) -> usize {
        self.by_stage.get(&stage).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.by_species.values().sum()
    }
}

pub struct Land {
    grid: Grid,
    config: LandConfig,
    trees: TreeConfig,
    sow_positions: Vec<Position>,
    visit_order: Vec<Position>,
    biodiversity_score: f64,
    biodiversity_category: BiodiversityCategory,
}

impl Land {
    /// Sows the initial trees, reusing `layout` where it is present and
    /// drawing fresh random choices otherwise.
    pub fn new(
        config: &LandConfig,
        trees: &TreeConfig,
        layout: LandLayout,
        ledger: &mut dyn CarbonLedger,
        rng: &mut RngManager,
    ) -> Self {
        let grid = Grid::new(config.rows, config.columns);
        let visit_order = layout.visit_order.unwrap_or_else(|| {
            let mut order: Vec<Position> = grid.positions().collect();
            order.shuffle(&mut rng.stream(ORDER_STREAM));
            order
        });
        let first_category = config
            .biodiversity_categories
            .first()
            .map(|range| range.category)
            .unwrap_or(BiodiversityCategory::Unforested);
        let mut land = Self {
            grid,
            config: config.clone(),
            trees: trees.clone(),
            sow_positions: layout.sow_positions.unwrap_or_default(),
            visit_order,
            biodiversity_score: 0.0,
            biodiversity_category: first_category,
        };
        land.sow(ledger, rng);
        land.update_biodiversity();
        land.release_soil_carbon(ledger);
        land
    }

    fn sow(&mut self, ledger: &mut dyn CarbonLedger, rng: &mut RngManager) {
        let cells = (self.grid.rows() * self.grid.cols()) as f64;
        let spots = (cells * (1.0 - self.config.free_fraction_start)).round();
        let shares: Vec<(Species, usize)> = self
            .config
            .species_composition
            .iter()
            .map(|share| (share.species, (share.fraction * spots).round() as usize))
            .collect();

        let mut spot_index = 0;
        for (species, count) in shares {
            for _ in 0..count {
                let spot = match self.sow_positions.get(spot_index) {
                    Some(pos) => *pos,
                    None => {
                        let free = self.get_free_spaces();
                        if free.is_empty() {
                            return;
                        }
                        let pos = free[rng.stream(SOW_STREAM).index(free.len())];
                        self.sow_positions.push(pos);
                        pos
                    }
                };
                self.plant_tree(species, spot, ledger, &mut rng.stream(GROWTH_STREAM));
                spot_index += 1;
            }
        }
        debug!(
            trees = self.grid.trees().count(),
            spots = self.sow_positions.len(),
            "land sown"
        );
    }

    pub fn rows(&self) -> usize {
        self.grid.rows()
    }

    pub fn cols(&self) -> usize {
        self.grid.cols()
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn tree_at(&self, pos: Position) -> Option<&Tree> {
        self.grid.get(pos)
    }

    pub fn layout(&self) -> LandLayout {
        LandLayout {
            sow_positions: Some(self.sow_positions.clone()),
            visit_order: Some(self.visit_order.clone()),
        }
    }

    pub fn sow_positions(&self) -> &[Position] {
        &self.sow_positions
    }

    pub fn visit_order(&self) -> &[Position] {
        &self.visit_order
    }

    pub fn biodiversity_score(&self) -> f64 {
        self.biodiversity_score
    }

    pub fn biodiversity_category(&self) -> BiodiversityCategory {
        self.biodiversity_category
    }

    pub fn tree_config(&self) -> &TreeConfig {
        &self.trees
    }

    pub fn is_land_free(&self, pos: Position) -> bool {
        self.grid.is_free(pos)
    }

    /// Plants a tree on a free, in-bounds cell. `None` leaves the land as it was.
    pub fn plant_tree(
        &mut self,
        species: Species,
        pos: Position,
        ledger: &mut dyn CarbonLedger,
        rng: &mut dyn RngCore,
    ) -> Option<&Tree> {
        let mut habitat = Habitat {
            grid: &mut self.grid,
            ledger,
            rng,
            params: &self.trees,
            category: self.biodiversity_category,
            reproduction_enabled: self.config.reproduction_enabled,
        };
        if !habitat.plant_tree(species, pos) {
            return None;
        }
        self.grid.get(pos)
    }

    /// Fells the tree at `pos` if it is exactly `species` at `stage`.
    /// Returns the harvested fresh weight (g); `None` leaves the land untouched.
    pub fn fell_tree(&mut self, pos: Position, species: Species, stage: LifeStage) -> Option<f64> {
        let harvest = self.trees.harvest_height_fraction;
        let params = self.trees.species(species);
        let tree = self.grid.get_mut(pos)?;
        if tree.species() != species || tree.stage() != stage {
            return None;
        }
        let weight = tree.fell(harvest, params);
        if tree.height() <= 0.0 || tree.diameter() <= 0.0 {
            self.grid.take(pos);
        }
        Some(weight)
    }

    /// Every free in-bounds cell, row-major.
    pub fn get_free_spaces(&self) -> Vec<Position> {
        self.grid
            .positions()
            .filter(|pos| self.grid.is_free(*pos))
            .collect()
    }

    /// The first matching tree in row-major order.
    pub fn get_tree(&self, species: Species, stage: LifeStage) -> Option<Position> {
        self.grid
            .trees()
            .find(|tree| tree.species() == species && tree.stage() == stage)
            .map(Tree::position)
    }

    /// Ages every tree in the stored visitation order, releases soil carbon
    /// and rescores biodiversity.
    pub fn take_time_step(&mut self, ledger: &mut dyn CarbonLedger, rng: &mut dyn RngCore) {
        for &pos in &self.visit_order {
            let Some(mut tree) = self.grid.take(pos) else {
                continue;
            };
            let still_exists = {
                let mut habitat = Habitat {
                    grid: &mut self.grid,
                    ledger: &mut *ledger,
                    rng: &mut *rng,
                    params: &self.trees,
                    category: self.biodiversity_category,
                    reproduction_enabled: self.config.reproduction_enabled,
                };
                tree.get_older(&mut habitat)
            };
            if still_exists {
                self.grid.put(pos, tree);
            } else {
                trace!(row = pos.row, col = pos.col, species = ?tree.species(), "remains fully decayed");
            }
        }
        self.release_soil_carbon(ledger);
        self.update_biodiversity();
    }

    fn release_soil_carbon(&self, ledger: &mut dyn CarbonLedger) {
        let soil = ledger.mass(Reservoir::Soil);
        let released =
            (soil * to_decimal(self.config.soil_release_fraction)).round_dp(LEDGER_SCALE);
        if released > rust_decimal::Decimal::ZERO {
            ledger.update_carbon(&CarbonDelta::transfer(
                Reservoir::Soil,
                Reservoir::Air,
                released,
            ));
        }
    }

    pub fn counts(&self) -> TreeCounts {
        let mut counts = TreeCounts::default();
        for tree in self.grid.trees() {
            *counts.by_species.entry(tree.species()).or_insert(0) += 1;
            *counts.by_stage.entry(tree.stage()).or_insert(0) += 1;
        }
        counts
    }

    /// Share of cells holding dead wood.
    pub fn dead_wood_fraction(&self) -> f64 {
        let cells = self.grid.rows() * self.grid.cols();
        self.counts().stage(LifeStage::Dead) as f64 / cells as f64
    }

    fn update_biodiversity(&mut self) {
        self.biodiversity_score =
            biodiversity_score(&self.counts(), self.grid.rows(), self.grid.cols());
        self.biodiversity_category = self.category_for(self.biodiversity_score);
    }

    /// First `[min, max)` range holding the score. Scores outside every
    /// range fall back to the first category.
    pub fn category_for(&self, score: f64) -> BiodiversityCategory {
        let ranges = &self.config.biodiversity_categories;
        ranges
            .iter()
            .find(|range| score >= range.min && score < range.max)
            .or_else(|| ranges.first())
            .map(|range| range.category)
            .unwrap_or(BiodiversityCategory::Unforested)
    }
}

/// Species balance plus life-stage weights, normalised by the best
/// possible plot and rounded to two decimals.
pub fn biodiversity_score(counts: &TreeCounts, rows: usize, cols: usize) -> f64 {
    let coniferous = counts.species(Species::Coniferous);
    let deciduous = counts.species(Species::Deciduous);
    let more = coniferous.max(deciduous) as f64;
    let less = coniferous.min(deciduous) as f64;
    let diff = more - less;

    let mut score = 3.0 * (2.0 * less);
    if diff % 2.0 == 0.0 {
        score += 2.0 * diff;
    } else {
        score += 2.0 * (diff - 1.0) + 1.0;
    }
    score += 0.5 * counts.stage(LifeStage::Seedling) as f64
        + 0.8 * counts.stage(LifeStage::Sapling) as f64
        + 2.0 * counts.stage(LifeStage::Mature) as f64
        + 3.0 * counts.stage(LifeStage::OldGrowth) as f64
        + counts.stage(LifeStage::Dead) as f64;

    let normaliser = 2.0 * rows as f64 * cols as f64 * 3.0;
    (score / normaliser * 100.0).round() / 100.0
}
