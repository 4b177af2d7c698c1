pub mod chemistry;
pub mod config;
pub mod engine;
pub mod environment;
pub mod error;
pub mod finance;
pub mod income;
pub mod land;
pub mod planner;
pub mod rng;
pub mod scenario;
pub mod simulation;
pub mod snapshot;
pub mod state;
pub mod tolerance;
pub mod tree;

pub use config::MicroworldConfig;
pub use engine::{Engine, EngineBuilder, EngineSettings};
pub use error::{SimError, SimResult};
pub use scenario::{Scenario, ScenarioLoader};
pub use simulation::{Simulation, YearSummary};
pub use state::SavedState;
