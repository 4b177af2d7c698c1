use microworld::{
    chemistry::to_decimal,
    config::MicroworldConfig,
    environment::{CarbonDelta, CarbonLedger, CarbonStore, Reservoir},
    income::{IncomeSource, Resource},
    land::{Land, LandLayout},
    planner::ActionKind,
    rng::{RngManager, GROWTH_STREAM},
    simulation::Simulation,
    tree::{LifeStage, Position, Species},
};
use rust_decimal::Decimal;

/// Wraps a store and refuses any update that creates or destroys carbon.
struct RecordingLedger {
    store: CarbonStore,
    updates: usize,
}

impl RecordingLedger {
    fn new(config: &MicroworldConfig) -> Self {
        Self {
            store: CarbonStore::from_config(&config.carbon),
            updates: 0,
        }
    }
}

impl CarbonLedger for RecordingLedger {
    fn update_carbon(&mut self, delta: &CarbonDelta) {
        assert_eq!(delta.net(), Decimal::ZERO, "non-conserving update {delta:?}");
        self.updates += 1;
        self.store.update_carbon(delta);
    }

    fn mass(&self, reservoir: Reservoir) -> Decimal {
        self.store.mass(reservoir)
    }

    fn air_co2_ppm(&self) -> f64 {
        self.store.air_co2_ppm()
    }
}

fn small_plot() -> MicroworldConfig {
    let mut config = MicroworldConfig::default();
    config.land.rows = 4;
    config.land.columns = 4;
    config
}

#[test]
fn every_land_update_is_net_zero() {
    let config = small_plot();
    let mut ledger = RecordingLedger::new(&config);
    let total = ledger.store.total();
    let mut rng = RngManager::new(21);
    let mut land = Land::new(
        &config.land,
        &config.trees,
        LandLayout::default(),
        &mut ledger,
        &mut rng,
    );
    for _ in 0..120 {
        land.take_time_step(&mut ledger, &mut rng.stream(GROWTH_STREAM));
    }
    assert!(ledger.updates > 0);
    assert_eq!(ledger.store.total(), total);
}

#[test]
fn failed_land_operations_leave_ledger_untouched() {
    let mut config = small_plot();
    config.land.free_fraction_start = 0.0;
    let mut ledger = RecordingLedger::new(&config);
    let mut rng = RngManager::new(4);
    let mut land = Land::new(
        &config.land,
        &config.trees,
        LandLayout::default(),
        &mut ledger,
        &mut rng,
    );
    assert!(land.get_free_spaces().is_empty());

    let updates = ledger.updates;
    let masses = ledger.store.masses().clone();
    let occupied = Position::new(0, 0);
    assert!(land
        .plant_tree(Species::Deciduous, occupied, &mut ledger, &mut rng.stream(GROWTH_STREAM))
        .is_none());
    assert!(land
        .plant_tree(
            Species::Deciduous,
            Position::new(9, 9),
            &mut ledger,
            &mut rng.stream(GROWTH_STREAM)
        )
        .is_none());
    let species = land.tree_at(occupied).map(|tree| tree.species());
    let wrong_species = match species {
        Some(Species::Coniferous) => Species::Deciduous,
        _ => Species::Coniferous,
    };
    assert!(land
        .fell_tree(occupied, wrong_species, LifeStage::Seedling)
        .is_none());
    assert_eq!(ledger.updates, updates);
    assert_eq!(ledger.store.masses(), &masses);
}

#[test]
fn simulation_reservoir_total_is_constant_through_harvests() {
    let mut config = small_plot();
    config.land.warmup_years = 30;
    let mut sim = Simulation::new(config, 8).expect("valid config");
    for year in [2, 12, 25] {
        sim.add_action(year, ActionKind::Fell, Species::Coniferous, 2, Some(LifeStage::Mature))
            .expect("fell action");
        sim.add_action(year, ActionKind::Fell, Species::Deciduous, 2, Some(LifeStage::OldGrowth))
            .expect("fell action");
        sim.add_action(year, ActionKind::Plant, Species::Deciduous, 2, None)
            .expect("plant action");
    }
    let total = sim.environment().carbon().total();
    sim.goto_with_hook(40, |_| {});
    assert_eq!(sim.environment().carbon().total(), total);
    for reservoir in Reservoir::ALL {
        assert!(
            sim.carbon(reservoir) >= Decimal::ZERO,
            "{reservoir:?} went negative"
        );
    }
}

#[test]
fn felled_wood_leaves_vegetation_when_sold() {
    let mut config = small_plot();
    config.land.rows = 1;
    config.land.columns = 1;
    config.land.free_fraction_start = 1.0;
    let mut ledger = RecordingLedger::new(&config);
    let mut rng = RngManager::new(2);
    let mut land = Land::new(
        &config.land,
        &config.trees,
        LandLayout::default(),
        &mut ledger,
        &mut rng,
    );
    let cell = Position::new(0, 0);
    assert!(land
        .plant_tree(Species::Deciduous, cell, &mut ledger, &mut rng.stream(GROWTH_STREAM))
        .is_some());
    for _ in 0..60 {
        if land.tree_at(cell).map(|tree| tree.stage()) == Some(LifeStage::Mature) {
            break;
        }
        land.take_time_step(&mut ledger, &mut rng.stream(GROWTH_STREAM));
    }
    assert_eq!(land.tree_at(cell).map(|tree| tree.stage()), Some(LifeStage::Mature));

    let weight = land
        .fell_tree(cell, Species::Deciduous, LifeStage::Mature)
        .expect("mature tree fells");
    assert!(weight > 0.0);
    assert_eq!(land.tree_at(cell).map(|tree| tree.stage()), Some(LifeStage::Dead));

    let vegetation = ledger.mass(Reservoir::Vegetation);
    let mut timber = IncomeSource::from_config(Resource::Timber, &config);
    timber.add_available(weight);
    let proceeds = timber.sell(&mut ledger);
    assert!(proceeds > Decimal::ZERO);

    let trees = &config.trees;
    let usage = config.economy.timber.usage;
    let expected: Decimal = [usage.lumber, usage.energy]
        .iter()
        .map(|fraction| {
            to_decimal(
                weight
                    * fraction
                    * trees.dry_weight_fraction
                    * trees.carbon_fraction
                    * trees.carbon_scale_factor,
            )
        })
        .sum();
    assert_eq!(vegetation - ledger.mass(Reservoir::Vegetation), expected);
}
