//! Domain parameters for the forest plot, its carbon cycle and economy.
//!
//! Every section carries `#[serde(default)]`, so a scenario file only has to
//! name the values it overrides.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::environment::Reservoir;
use crate::error::{SimError, SimResult};
use crate::income::Resource;
use crate::land::BiodiversityCategory;
use crate::tolerance::{Condition, ToleranceStep};
use crate::tree::{LifeStage, Species};

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroworldConfig {
    pub land: LandConfig,
    pub trees: TreeConfig,
    pub carbon: CarbonConfig,
    pub economy: EconomyConfig,
    pub planning: PlanningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LandConfig {
    pub rows: usize,
    pub columns: usize,
    /// Fraction of cells left empty when the plot is first sown.
    pub free_fraction_start: f64,
    pub species_composition: Vec<SpeciesShare>,
    /// Years the plot grows before the visible simulation starts at year 0.
    pub warmup_years: u32,
    /// Fraction of soil carbon released to the air every year.
    pub soil_release_fraction: f64,
    /// Lets mature trees seed free neighbouring cells.
    pub reproduction_enabled: bool,
    /// Ordered `[min, max)` score ranges; the first match wins.
    pub biodiversity_categories: Vec<CategoryRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesShare {
    pub species: Species,
    pub fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRange {
    pub category: BiodiversityCategory,
    pub min: f64,
    pub max: f64,
}

impl Default for LandConfig {
    fn default() -> Self {
        Self {
            rows: 6,
            columns: 6,
            free_fraction_start: 0.5,
            species_composition: vec![
                SpeciesShare {
                    species: Species::Coniferous,
                    fraction: 0.5,
                },
                SpeciesShare {
                    species: Species::Deciduous,
                    fraction: 0.5,
                },
            ],
            warmup_years: 60,
            soil_release_fraction: 0.01,
            reproduction_enabled: true,
            biodiversity_categories: vec![
                CategoryRange {
                    category: BiodiversityCategory::Unforested,
                    min: 0.0,
                    max: 0.1,
                },
                CategoryRange {
                    category: BiodiversityCategory::Plantation,
                    min: 0.1,
                    max: 0.4,
                },
                CategoryRange {
                    category: BiodiversityCategory::Forest,
                    min: 0.4,
                    max: 0.75,
                },
                CategoryRange {
                    category: BiodiversityCategory::Ecosystem,
                    min: 0.75,
                    max: 1.01,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub coniferous: SpeciesParams,
    pub deciduous: SpeciesParams,
    /// Carbon share of dry wood.
    pub carbon_fraction: f64,
    /// Dry share of fresh wood weight.
    pub dry_weight_fraction: f64,
    /// Scale applied to every tree-driven carbon transfer.
    pub carbon_scale_factor: f64,
    /// Share of a dead tree's carbon that decays each year.
    pub decay_carbon_fraction: f64,
    /// Share of decayed carbon that goes to soil; the rest returns to air.
    pub decay_soil_fraction: f64,
    /// Secondary (thickening) growth as a share of the species' yearly max volume.
    pub secondary_growth_fraction: f64,
    /// Yearly stress added while senescent.
    pub stress_aging: f64,
    pub stress_recovery_factor: f64,
    pub reproduction_stress_threshold: f64,
    /// Share of tree height removed when felled.
    pub harvest_height_fraction: f64,
    pub biodiversity_stress_reduction: BTreeMap<BiodiversityCategory, f64>,
    pub tolerance_co2: Co2Tolerance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Co2Tolerance {
    pub premature: Vec<ToleranceStep>,
    pub mature: Vec<ToleranceStep>,
}

impl Default for Co2Tolerance {
    fn default() -> Self {
        let step = |condition, threshold, stress| ToleranceStep {
            condition,
            threshold,
            stress,
        };
        Self {
            premature: vec![
                step(Condition::Lt, 250.0, 0.2),
                step(Condition::Lt, 500.0, 0.0),
                step(Condition::Lt, 700.0, 0.05),
                step(Condition::Gte, 700.0, 0.15),
            ],
            mature: vec![
                step(Condition::Lt, 200.0, 0.1),
                step(Condition::Lt, 600.0, 0.0),
                step(Condition::Lt, 900.0, 0.03),
                step(Condition::Gte, 900.0, 0.1),
            ],
        }
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        let biodiversity_stress_reduction = BTreeMap::from([
            (BiodiversityCategory::Unforested, 0.0),
            (BiodiversityCategory::Plantation, 0.05),
            (BiodiversityCategory::Forest, 0.1),
            (BiodiversityCategory::Ecosystem, 0.2),
        ]);
        Self {
            coniferous: SpeciesParams::coniferous(),
            deciduous: SpeciesParams::deciduous(),
            carbon_fraction: 0.5,
            dry_weight_fraction: 0.5,
            carbon_scale_factor: 0.001,
            decay_carbon_fraction: 0.15,
            decay_soil_fraction: 0.5,
            secondary_growth_fraction: 0.05,
            stress_aging: 0.05,
            stress_recovery_factor: 0.1,
            reproduction_stress_threshold: 0.5,
            harvest_height_fraction: 0.9,
            biodiversity_stress_reduction,
            tolerance_co2: Co2Tolerance::default(),
        }
    }
}

impl TreeConfig {
    pub fn species(&self, species: Species) -> &SpeciesParams {
        match species {
            Species::Coniferous => &self.coniferous,
            Species::Deciduous => &self.deciduous,
        }
    }

    pub fn stress_reduction(&self, category: BiodiversityCategory) -> f64 {
        self.biodiversity_stress_reduction
            .get(&category)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Upper age (inclusive) of each living stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LifeStageAges {
    pub seedling: u32,
    pub sapling: u32,
    pub mature: u32,
    pub old_growth: u32,
    pub senescent: u32,
}

impl LifeStageAges {
    pub fn ordered(&self) -> [(LifeStage, u32); 5] {
        [
            (LifeStage::Seedling, self.seedling),
            (LifeStage::Sapling, self.sapling),
            (LifeStage::Mature, self.mature),
            (LifeStage::OldGrowth, self.old_growth),
            (LifeStage::Senescent, self.senescent),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesParams {
    pub life_stages: LifeStageAges,
    /// When set, each tree draws its max age uniformly from this range.
    #[serde(default)]
    pub max_age_range: Option<(u32, u32)>,
    pub height_max: f64,
    /// g/m³
    pub wood_density: f64,
    pub reproduction_interval: f64,
    pub maintenance_fraction: f64,
    /// Reproduce into the two extended diagonal cells as well.
    #[serde(default)]
    pub extended_reproduction: bool,
    #[serde(default)]
    pub growth_height_cap: Option<f64>,
    #[serde(default)]
    pub growth_diameter_cap: Option<f64>,
}

impl SpeciesParams {
    pub fn coniferous() -> Self {
        Self {
            life_stages: LifeStageAges {
                seedling: 4,
                sapling: 26,
                mature: 60,
                old_growth: 90,
                senescent: 100,
            },
            max_age_range: None,
            height_max: 70.0,
            wood_density: 600_000.0,
            reproduction_interval: 2.5,
            maintenance_fraction: 0.005,
            extended_reproduction: false,
            growth_height_cap: None,
            growth_diameter_cap: None,
        }
    }

    pub fn deciduous() -> Self {
        Self {
            life_stages: LifeStageAges {
                seedling: 3,
                sapling: 21,
                mature: 47,
                old_growth: 70,
                senescent: 80,
            },
            max_age_range: None,
            height_max: 40.0,
            wood_density: 700_000.0,
            reproduction_interval: 1.0,
            maintenance_fraction: 0.01,
            extended_reproduction: true,
            growth_height_cap: None,
            growth_diameter_cap: None,
        }
    }

    pub fn diameter_max(&self) -> f64 {
        diameter_from_height(self.height_max)
    }

    /// Yearly height growth cap; defaults to reaching max height by the end of maturity.
    pub fn height_growth_cap(&self) -> f64 {
        self.growth_height_cap
            .unwrap_or(self.height_max / self.life_stages.mature.max(1) as f64)
    }

    pub fn diameter_growth_cap(&self) -> f64 {
        self.growth_diameter_cap
            .unwrap_or(self.diameter_max() / self.life_stages.mature.max(1) as f64)
    }
}

pub fn diameter_from_height(height: f64) -> f64 {
    height.max(0.0).powf(1.5) / 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarbonConfig {
    /// Starting mass per reservoir, grams of carbon.
    pub initial: BTreeMap<Reservoir, Decimal>,
    /// Carbon moved from fossil fuels to air each year, grams.
    pub fossil_fuel_emission: Decimal,
    pub air_volume_m3: f64,
    pub air_temperature_k: f64,
    pub water_volume_m3: f64,
    pub water_temperature_k: f64,
    /// Ratio of air partial pressure to the water pressure at equilibrium.
    pub henry_constant: f64,
    pub transfer_rate: f64,
    pub ppm_calibration: f64,
}

impl Default for CarbonConfig {
    fn default() -> Self {
        let initial = BTreeMap::from([
            (Reservoir::Air, Decimal::from(220_000_000_i64)),
            (Reservoir::Soil, Decimal::from(10_000_000_i64)),
            (Reservoir::Vegetation, Decimal::from(1_000_000_i64)),
            (Reservoir::FossilFuels, Decimal::from(1_000_000_000_i64)),
            (Reservoir::Water, Decimal::from(28_000_000_i64)),
            (Reservoir::Lumber, Decimal::ZERO),
        ]);
        Self {
            initial,
            fossil_fuel_emission: Decimal::from(1_000_000_i64),
            air_volume_m3: 1.0e9,
            air_temperature_k: 288.15,
            water_volume_m3: 1.0e8,
            water_temperature_k: 283.15,
            henry_constant: 0.8,
            transfer_rate: 0.5,
            ppm_calibration: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub funds_start: Decimal,
    pub plant_cost: Decimal,
    /// Cost of felling a tree at max height; scaled by height / max height.
    pub fell_cost: Decimal,
    pub timber: TimberConfig,
    pub ntfp: NtfpConfig,
    pub recreation: RecreationConfig,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            funds_start: Decimal::from(50_000),
            plant_cost: Decimal::from(277),
            fell_cost: Decimal::from(3_000),
            timber: TimberConfig::default(),
            ntfp: NtfpConfig::default(),
            recreation: RecreationConfig::default(),
        }
    }
}

impl EconomyConfig {
    pub fn default_dependencies(&self) -> BTreeMap<Resource, f64> {
        BTreeMap::from([
            (Resource::Timber, self.timber.dependency),
            (Resource::Ntfp, self.ntfp.dependency),
            (Resource::Recreation, self.recreation.dependency),
        ])
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Availability {
    pub mean: f64,
    pub sd: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WoodUsage {
    pub lumber: f64,
    pub energy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimberConfig {
    pub price_per_kg: Decimal,
    pub usage: WoodUsage,
    pub dependency: f64,
}

impl Default for TimberConfig {
    fn default() -> Self {
        Self {
            price_per_kg: Decimal::new(1, 2),
            usage: WoodUsage {
                lumber: 0.5,
                energy: 0.5,
            },
            dependency: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NtfpConfig {
    pub price_per_unit: Decimal,
    pub availability: Availability,
    pub maintenance_cost: Decimal,
    pub dependency: f64,
}

impl Default for NtfpConfig {
    fn default() -> Self {
        Self {
            price_per_unit: Decimal::from(170),
            availability: Availability { mean: 14.0, sd: 2.0 },
            maintenance_cost: Decimal::from(1_620),
            dependency: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecreationConfig {
    pub price_per_unit: Decimal,
    pub availability: Availability,
    pub build_cost: Decimal,
    pub maintenance_cost: Decimal,
    pub dependency: f64,
}

impl Default for RecreationConfig {
    fn default() -> Self {
        Self {
            price_per_unit: Decimal::ONE,
            availability: Availability {
                mean: 465.0,
                sd: 40.0,
            },
            build_cost: Decimal::from(40_024),
            maintenance_cost: Decimal::from(413),
            dependency: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    pub rotation_period: u32,
    pub targets: Targets,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            rotation_period: 50,
            targets: Targets::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Targets {
    /// Atmospheric CO2 ceiling, ppm.
    pub co2: f64,
    /// Income per rotation.
    pub income: Decimal,
    pub funds: Decimal,
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            co2: 450.0,
            income: Decimal::from(30_000),
            funds: Decimal::ONE,
        }
    }
}

impl MicroworldConfig {
    pub fn validate(&self) -> SimResult<()> {
        let land = &self.land;
        if land.rows == 0 || land.columns == 0 {
            return invalid("land grid must have at least one row and one column");
        }
        check_fraction("land.free_fraction_start", land.free_fraction_start)?;
        check_fraction("land.soil_release_fraction", land.soil_release_fraction)?;
        let mut composition = 0.0;
        for share in &land.species_composition {
            check_fraction("land.species_composition", share.fraction)?;
            composition += share.fraction;
        }
        if composition > 1.0 + EPS {
            return invalid(format!(
                "species composition sums to {composition}, expected at most 1"
            ));
        }
        validate_categories(&land.biodiversity_categories)?;

        let trees = &self.trees;
        for (name, value) in [
            ("trees.carbon_fraction", trees.carbon_fraction),
            ("trees.dry_weight_fraction", trees.dry_weight_fraction),
            ("trees.decay_carbon_fraction", trees.decay_carbon_fraction),
            ("trees.decay_soil_fraction", trees.decay_soil_fraction),
            ("trees.stress_recovery_factor", trees.stress_recovery_factor),
            ("trees.harvest_height_fraction", trees.harvest_height_fraction),
        ] {
            check_fraction(name, value)?;
        }
        if trees.carbon_fraction <= 0.0 {
            return invalid("trees.carbon_fraction must be positive");
        }
        for (species, params) in [
            (Species::Coniferous, &trees.coniferous),
            (Species::Deciduous, &trees.deciduous),
        ] {
            validate_species(species, params)?;
        }
        if trees.tolerance_co2.premature.is_empty() || trees.tolerance_co2.mature.is_empty() {
            return invalid("CO2 tolerance tables must not be empty");
        }

        let carbon = &self.carbon;
        for (name, value) in [
            ("carbon.air_volume_m3", carbon.air_volume_m3),
            ("carbon.air_temperature_k", carbon.air_temperature_k),
            ("carbon.water_volume_m3", carbon.water_volume_m3),
            ("carbon.water_temperature_k", carbon.water_temperature_k),
            ("carbon.henry_constant", carbon.henry_constant),
        ] {
            if !(value > 0.0) {
                return invalid(format!("{name} must be positive (got {value})"));
            }
        }
        if carbon.fossil_fuel_emission < Decimal::ZERO {
            return invalid("carbon.fossil_fuel_emission must not be negative");
        }

        let economy = &self.economy;
        let usage = economy.timber.usage;
        if (usage.lumber + usage.energy - 1.0).abs() > 1e-6 {
            return invalid("timber usage fractions must sum to 1");
        }
        let dependency_sum: f64 = economy.default_dependencies().values().sum();
        if (dependency_sum - 1.0).abs() > 1e-6 {
            return Err(SimError::InvalidDependency(dependency_sum));
        }
        if self.planning.rotation_period == 0 {
            return Err(SimError::InvalidRotationPeriod(0));
        }
        Ok(())
    }
}

fn validate_species(species: Species, params: &SpeciesParams) -> SimResult<()> {
    let ages = params.life_stages;
    let ordered = ages.ordered();
    if ordered.windows(2).any(|pair| pair[0].1 > pair[1].1) {
        return invalid(format!("{species:?} life-stage ages must be non-decreasing"));
    }
    if let Some((low, high)) = params.max_age_range {
        if low > high || low <= ages.old_growth {
            return invalid(format!(
                "{species:?} max_age_range must be ordered and start after old growth"
            ));
        }
    }
    if !(params.height_max > 0.0) || !(params.wood_density > 0.0) {
        return invalid(format!(
            "{species:?} height_max and wood_density must be positive"
        ));
    }
    if params.reproduction_interval < 0.0 {
        return invalid(format!("{species:?} reproduction_interval must not be negative"));
    }
    check_fraction("species maintenance_fraction", params.maintenance_fraction)
}

fn validate_categories(ranges: &[CategoryRange]) -> SimResult<()> {
    let Some(first) = ranges.first() else {
        return invalid("at least one biodiversity category is required");
    };
    if first.min > 0.0 {
        return invalid("biodiversity categories must start at 0");
    }
    for pair in ranges.windows(2) {
        if (pair[0].max - pair[1].min).abs() > EPS {
            return invalid("biodiversity category ranges must be contiguous");
        }
    }
    for range in ranges {
        if range.min >= range.max {
            return invalid(format!("empty biodiversity range for {:?}", range.category));
        }
    }
    match ranges.last() {
        Some(last) if last.max > 1.0 => Ok(()),
        _ => invalid("the last biodiversity category must include a score of 1"),
    }
}

fn check_fraction(name: &str, value: f64) -> SimResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        invalid(format!("{name} must lie in [0, 1] (got {value})"))
    }
}

fn invalid<T>(msg: impl Into<String>) -> SimResult<T> {
    Err(SimError::InvalidConfig(msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        MicroworldConfig::default()
            .validate()
            .expect("default config validates");
    }

    #[test]
    fn yaml_overrides_only_named_fields() {
        let yaml = "land:\n  rows: 3\n  columns: 4\neconomy:\n  funds_start: 125.5\n";
        let config: MicroworldConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.land.rows, 3);
        assert_eq!(config.land.columns, 4);
        assert_eq!(config.land.warmup_years, 60);
        assert_eq!(config.economy.funds_start, Decimal::new(1255, 1));
        assert_eq!(config.trees.coniferous.height_max, 70.0);
    }

    #[test]
    fn rejects_gapped_categories() {
        let mut config = MicroworldConfig::default();
        config.land.biodiversity_categories[1].min = 0.2;
        assert!(matches!(
            config.validate(),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_dependencies_not_summing_to_one() {
        let mut config = MicroworldConfig::default();
        config.economy.ntfp.dependency = 0.5;
        assert!(matches!(
            config.validate(),
            Err(SimError::InvalidDependency(_))
        ));
    }

    #[test]
    fn growth_caps_default_to_reaching_max_at_maturity() {
        let params = SpeciesParams::deciduous();
        let cap = params.height_growth_cap();
        assert!((cap * params.life_stages.mature as f64 - params.height_max).abs() < 1e-9);
        assert!((diameter_from_height(100.0) - 10.0).abs() < 1e-12);
    }
}
