//! C6/C7/C8 — the flight runner, engine core, and control surface that
//! together turn the persistence layer and a registered flight factory into
//! a running workflow engine.

pub mod control;
pub mod engine;
pub mod runner;

pub use control::ControlSurface;
pub use engine::{EngineBuilder, EngineConfig, StairwayEngine};
pub use runner::{FlightRunner, QuiesceToken};
