use std::collections::BTreeMap;

use microworld::{
    config::MicroworldConfig,
    environment::Reservoir,
    error::SimError,
    income::Resource,
    planner::{ActionKind, ActionStatus},
    simulation::Simulation,
    state::SavedState,
    tree::{LifeStage, Species},
};
use rust_decimal::Decimal;
use tempfile::tempdir;

fn config() -> MicroworldConfig {
    let mut config = MicroworldConfig::default();
    config.land.rows = 4;
    config.land.columns = 4;
    config.land.warmup_years = 25;
    config
}

fn managed(seed: u64) -> Simulation {
    let mut sim = Simulation::new(config(), seed).expect("valid config");
    sim.add_action(1, ActionKind::Plant, Species::Coniferous, 2, None)
        .expect("plant action");
    sim.add_action(6, ActionKind::Fell, Species::Deciduous, 1, Some(LifeStage::Mature))
        .expect("fell action");
    sim.set_income_dependency(&BTreeMap::from([
        (Resource::Timber, 0.7),
        (Resource::Ntfp, 0.3),
    ]))
    .expect("dependencies sum to one");
    sim
}

#[test]
fn same_seed_gives_same_history() {
    let mut first = managed(99);
    let mut second = managed(99);
    let mut a = Vec::new();
    let mut b = Vec::new();
    first.goto_with_hook(20, |s| a.push((s.co2_ppm, s.funds, s.tree_count)));
    second.goto_with_hook(20, |s| b.push((s.co2_ppm, s.funds, s.tree_count)));
    assert_eq!(a, b);
}

#[test]
fn saved_state_replays_the_run() {
    let mut recorded = managed(31);
    recorded.goto(12);
    let state = recorded.save_state();

    let json = state.to_json().expect("serialize state");
    let restored_state = SavedState::from_json(&json).expect("parse state");
    assert_eq!(restored_state, state);

    let mut replay = Simulation::new(config(), 1).expect("valid config");
    replay.load_state(restored_state).expect("load state");
    assert_eq!(replay.time(), 0);
    assert_eq!(replay.seed(), 31);
    replay.goto(12);

    assert_eq!(replay.funds(), recorded.funds());
    assert_eq!(replay.carbon(Reservoir::Air), recorded.carbon(Reservoir::Air));
    assert_eq!(
        replay.land().counts().total(),
        recorded.land().counts().total()
    );
    assert_eq!(replay.land().visit_order(), recorded.land().visit_order());
    assert_eq!(replay.land().sow_positions(), recorded.land().sow_positions());
    for pos in recorded.land().grid().positions() {
        let cell = |sim: &Simulation| {
            sim.land()
                .tree_at(pos)
                .map(|tree| (tree.species(), tree.stage(), tree.height()))
        };
        assert_eq!(cell(&replay), cell(&recorded), "cell {pos:?}");
    }
    assert_eq!(
        replay.planner().actions_for(6)[0].status,
        recorded.planner().actions_for(6)[0].status
    );
}

#[test]
fn saved_plan_statuses_start_pending() {
    let mut sim = managed(3);
    sim.goto(8);
    assert_ne!(sim.planner().actions_for(1)[0].status, ActionStatus::Pending);
    let state = sim.save_state();
    assert!(state
        .plan
        .values()
        .flat_map(|year| year.plant.iter().chain(year.fell.iter()))
        .all(|action| action.status == ActionStatus::Pending));
}

#[test]
fn state_file_round_trips_through_disk() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("states").join("run.json");
    let mut sim = managed(4);
    sim.set_fossil_fuel_emission(Decimal::from(250_000));
    sim.save_state().write_to(&path).expect("write state");

    let loaded = SavedState::read_from(&path).expect("read state");
    assert_eq!(loaded.fossil_fuel_emission, Decimal::from(250_000));
    assert_eq!(loaded.rotation_period, 50);
    assert_eq!(loaded.income_dependency[&Resource::Ntfp], 0.3);
}

#[test]
fn malformed_state_leaves_simulation_untouched() {
    let mut sim = managed(6);
    sim.goto(5);
    let funds = sim.funds();

    let missing_key = r#"{"plan": {}, "rotation_period": 10}"#;
    let err = SavedState::from_json(missing_key).expect_err("missing keys");
    assert!(matches!(err, SimError::MalformedSavedState(_)));

    let mut state = sim.save_state();
    state.income_dependency.insert(Resource::Recreation, 0.5);
    let err = sim.load_state(state).expect_err("dependencies exceed one");
    assert!(matches!(err, SimError::MalformedSavedState(_)));

    let mut state = sim.save_state();
    state.time_step_order.swap(0, 1);
    state.time_step_order[0] = state.time_step_order[1];
    assert!(sim.load_state(state).is_err());

    assert_eq!(sim.time(), 5);
    assert_eq!(sim.funds(), funds);
}
