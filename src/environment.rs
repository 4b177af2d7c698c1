//! Carbon reservoirs, fossil-fuel emission and air-water exchange.

use std::collections::BTreeMap;

use rand::RngCore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::chemistry::{self, to_decimal, to_f64, ExchangeParams};
use crate::config::{CarbonConfig, MicroworldConfig};
use crate::land::{Land, LandLayout};
use crate::rng::RngManager;
use crate::tree::{Position, Species};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reservoir {
    Air,
    Soil,
    Vegetation,
    FossilFuels,
    Water,
    Lumber,
}

impl Reservoir {
    pub const ALL: [Reservoir; 6] = [
        Reservoir::Air,
        Reservoir::Soil,
        Reservoir::Vegetation,
        Reservoir::FossilFuels,
        Reservoir::Water,
        Reservoir::Lumber,
    ];
}

/// A set of signed per-reservoir changes applied as one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarbonDelta {
    changes: BTreeMap<Reservoir, Decimal>,
}

impl CarbonDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Debits `from` and credits `to` by the same amount.
    pub fn transfer(from: Reservoir, to: Reservoir, amount: Decimal) -> Self {
        let mut delta = Self::new();
        delta.add(from, -amount);
        delta.add(to, amount);
        delta
    }

    pub fn add(&mut self, reservoir: Reservoir, amount: Decimal) {
        *self.changes.entry(reservoir).or_insert(Decimal::ZERO) += amount;
    }

    pub fn get(&self, reservoir: Reservoir) -> Decimal {
        self.changes
            .get(&reservoir)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Reservoir, Decimal)> + '_ {
        self.changes.iter().map(|(r, amount)| (*r, *amount))
    }

    /// Sum over all reservoirs; zero for every conserving update.
    pub fn net(&self) -> Decimal {
        self.changes.values().copied().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// The only way trees and land touch carbon.
pub trait CarbonLedger {
    fn update_carbon(&mut self, delta: &CarbonDelta);
    fn mass(&self, reservoir: Reservoir) -> Decimal;
    fn air_co2_ppm(&self) -> f64;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarbonStore {
    masses: BTreeMap<Reservoir, Decimal>,
    air_volume_m3: f64,
    ppm_calibration: f64,
}

impl CarbonStore {
    pub fn from_config(config: &CarbonConfig) -> Self {
        let mut masses: BTreeMap<Reservoir, Decimal> = Reservoir::ALL
            .iter()
            .map(|r| (*r, Decimal::ZERO))
            .collect();
        masses.extend(config.initial.iter().map(|(r, mass)| (*r, *mass)));
        Self {
            masses,
            air_volume_m3: config.air_volume_m3,
            ppm_calibration: config.ppm_calibration,
        }
    }

    pub fn masses(&self) -> &BTreeMap<Reservoir, Decimal> {
        &self.masses
    }

    pub fn total(&self) -> Decimal {
        self.masses.values().copied().sum()
    }

    /// CO2 ppm for an arbitrary air carbon mass.
    pub fn co2_ppm_for(&self, air_carbon: Decimal) -> f64 {
        chemistry::co2_ppm(to_f64(air_carbon), self.air_volume_m3, self.ppm_calibration)
    }
}

impl CarbonLedger for CarbonStore {
    fn update_carbon(&mut self, delta: &CarbonDelta) {
        for (reservoir, change) in delta.iter() {
            *self.masses.entry(reservoir).or_insert(Decimal::ZERO) += change;
        }
    }

    fn mass(&self, reservoir: Reservoir) -> Decimal {
        self.masses
            .get(&reservoir)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn air_co2_ppm(&self) -> f64 {
        self.co2_ppm_for(self.mass(Reservoir::Air))
    }
}

/// The atmosphere, the ocean proxy and the land plot they exchange with.
pub struct Environment {
    store: CarbonStore,
    land: Land,
    fossil_fuel_emission: Decimal,
    exchange: ExchangeParams,
}

impl Environment {
    pub fn new(
        config: &MicroworldConfig,
        layout: LandLayout,
        fossil_fuel_emission: Decimal,
        rng: &mut RngManager,
    ) -> Self {
        let carbon = &config.carbon;
        let mut store = CarbonStore::from_config(carbon);
        let land = Land::new(&config.land, &config.trees, layout, &mut store, rng);
        Self {
            store,
            land,
            fossil_fuel_emission,
            exchange: ExchangeParams {
                air_volume_m3: carbon.air_volume_m3,
                air_temperature_k: carbon.air_temperature_k,
                water_volume_m3: carbon.water_volume_m3,
                water_temperature_k: carbon.water_temperature_k,
                henry_constant: carbon.henry_constant,
                transfer_rate: carbon.transfer_rate,
            },
        }
    }

    pub fn land(&self) -> &Land {
        &self.land
    }

    pub fn land_mut(&mut self) -> &mut Land {
        &mut self.land
    }

    pub fn carbon(&self) -> &CarbonStore {
        &self.store
    }

    pub fn update_carbon(&mut self, delta: &CarbonDelta) {
        self.store.update_carbon(delta);
    }

    pub fn air_co2_ppm(&self) -> f64 {
        self.store.air_co2_ppm()
    }

    pub fn fossil_fuel_emission(&self) -> Decimal {
        self.fossil_fuel_emission
    }

    pub fn set_fossil_fuel_emission(&mut self, emission: Decimal) {
        self.fossil_fuel_emission = emission.max(Decimal::ZERO);
    }

    pub fn plant_tree(&mut self, species: Species, position: Position, rng: &mut dyn RngCore) -> bool {
        self.land
            .plant_tree(species, position, &mut self.store, rng)
            .is_some()
    }

    /// One year: emission (skipped while warming up), air-water exchange,
    /// then the land step.
    pub fn take_time_step(&mut self, is_init: bool, rng: &mut dyn RngCore) {
        if !is_init {
            let fossil = self.store.mass(Reservoir::FossilFuels).max(Decimal::ZERO);
            let emitted = self.fossil_fuel_emission.min(fossil);
            if emitted > Decimal::ZERO {
                self.store.update_carbon(&CarbonDelta::transfer(
                    Reservoir::FossilFuels,
                    Reservoir::Air,
                    emitted,
                ));
            }
        }
        self.exchange_air_water();
        self.land.take_time_step(&mut self.store, rng);
    }

    fn exchange_air_water(&mut self) {
        let flow = chemistry::air_water_exchange(
            to_f64(self.store.mass(Reservoir::Air)),
            to_f64(self.store.mass(Reservoir::Water)),
            &self.exchange,
        );
        trace!(flow, "air-water exchange");
        let amount = to_decimal(flow.abs());
        if amount.is_zero() {
            return;
        }
        let delta = if flow > 0.0 {
            CarbonDelta::transfer(Reservoir::Air, Reservoir::Water, amount)
        } else {
            CarbonDelta::transfer(Reservoir::Water, Reservoir::Air, amount)
        };
        self.store.update_carbon(&delta);
    }
}

impl CarbonLedger for Environment {
    fn update_carbon(&mut self, delta: &CarbonDelta) {
        Environment::update_carbon(self, delta);
    }

    fn mass(&self, reservoir: Reservoir) -> Decimal {
        self.carbon().mass(reservoir)
    }

    fn air_co2_ppm(&self) -> f64 {
        Environment::air_co2_ppm(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_is_net_zero() {
        let delta = CarbonDelta::transfer(Reservoir::Air, Reservoir::Soil, Decimal::new(125, 1));
        assert_eq!(delta.net(), Decimal::ZERO);
        assert_eq!(delta.get(Reservoir::Air), Decimal::new(-125, 1));
        assert_eq!(delta.get(Reservoir::Soil), Decimal::new(125, 1));
        assert_eq!(delta.get(Reservoir::Water), Decimal::ZERO);
    }

    #[test]
    fn store_applies_updates_and_keeps_total() {
        let mut store = CarbonStore::from_config(&CarbonConfig::default());
        let total = store.total();
        store.update_carbon(&CarbonDelta::transfer(
            Reservoir::Vegetation,
            Reservoir::Lumber,
            Decimal::from(10),
        ));
        assert_eq!(store.mass(Reservoir::Lumber), Decimal::from(10));
        assert_eq!(store.total(), total);
    }

    #[test]
    fn ppm_follows_air_mass() {
        let store = CarbonStore::from_config(&CarbonConfig::default());
        let now = store.air_co2_ppm();
        let doubled = store.co2_ppm_for(store.mass(Reservoir::Air) * Decimal::TWO);
        assert!((doubled - 2.0 * now).abs() < 1e-6);
    }

    fn empty_plot() -> MicroworldConfig {
        let mut config = MicroworldConfig::default();
        config.land.free_fraction_start = 1.0;
        config
    }

    #[test]
    fn emission_is_capped_by_fossil_reserve() {
        let mut config = empty_plot();
        config
            .carbon
            .initial
            .insert(Reservoir::FossilFuels, Decimal::from(500));
        let mut rng = RngManager::new(1);
        let mut env = Environment::new(&config, LandLayout::default(), Decimal::from(1_000), &mut rng);
        let total = env.carbon().total();
        env.take_time_step(false, &mut rng.stream(crate::rng::GROWTH_STREAM));
        assert_eq!(env.carbon().mass(Reservoir::FossilFuels), Decimal::ZERO);
        assert_eq!(env.carbon().total(), total);
    }

    #[test]
    fn warmup_steps_skip_emission() {
        let config = empty_plot();
        let mut rng = RngManager::new(1);
        let mut env = Environment::new(&config, LandLayout::default(), Decimal::from(1_000), &mut rng);
        let fossil = env.carbon().mass(Reservoir::FossilFuels);
        env.take_time_step(true, &mut rng.stream(crate::rng::GROWTH_STREAM));
        assert_eq!(env.carbon().mass(Reservoir::FossilFuels), fossil);
    }
}
