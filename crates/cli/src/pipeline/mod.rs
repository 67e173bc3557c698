//! Publish simulation module.

mod orchestrator;
mod sim;
mod stats;

pub use orchestrator::{Simulation, SimulationConfig};
pub use stats::SimulationStats;
