//! Core domain types shared across the workflow engine: the parameter map
//! (C1), retry rules (C2), the step trait and flight context (C6's
//! vocabulary), hooks and context propagation (C9), and the crate-wide
//! error hierarchy (C10).

pub mod context;
pub mod debug;
pub mod error;
pub mod hooks;
pub mod ids;
pub mod model;
pub mod params;
pub mod retry;
pub mod step;

pub use context::StairwayContext;
pub use debug::DebugInfo;
pub use error::{EngineError, EngineResult};
pub use hooks::{CompositeHook, FlightHook};
pub use ids::{create_flight_id, create_instance_id};
pub use model::{Direction, FlightStatus, StepResult, StepResultKind};
pub use params::ParameterMap;
pub use retry::{CancellationToken, ExponentialBackoffRetry, FixedIntervalRetry, NeverCancelled, NoRetry, RetryRule};
pub use step::{FlightContext, FlightFactory, Step, StepConstructor};
