//! The step trait and the flight context it operates on (§4.6), plus the
//! flight factory that replaces the source's class-name-based reflection
//! with explicit `(string, constructor)` registration (§9).

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::debug::DebugInfo;
use crate::error::{EngineError, EngineResult};
use crate::model::{Direction, FlightStatus, StepResult};
use crate::params::ParameterMap;
use crate::retry::RetryRule;

/// One unit of forward/reverse work (§4.6, replacing the source's
/// inheritance-based `Flight` subclasses with composition: a flight is an
/// ordered list of `(Step, RetryRule)` pairs built by a `FlightFactory`).
pub trait Step: Send + Sync {
    /// Stable identifier persisted in step-log entries and used by debug
    /// fault injection's `doStepFailures`/`undoStepFailures` maps.
    fn class_name(&self) -> &str;

    fn do_step(&self, ctx: &mut FlightContext) -> StepResult;

    fn undo_step(&self, ctx: &mut FlightContext) -> StepResult;
}

/// The mutable state a runner carries for one flight (§4.6).
pub struct FlightContext {
    pub flight_id: String,
    pub application_context: Option<Arc<dyn Any + Send + Sync>>,
    pub inputs: ParameterMap,
    pub working_map: ParameterMap,
    pub step_index: i64,
    pub direction: Direction,
    pub rerun: bool,
    pub status: FlightStatus,
    pub debug_info: DebugInfo,
    pub step_class_names: Vec<String>,
}

impl FlightContext {
    pub fn new(flight_id: impl Into<String>, inputs: ParameterMap, step_class_names: Vec<String>) -> Self {
        let mut inputs = inputs;
        inputs.make_immutable();
        Self {
            flight_id: flight_id.into(),
            application_context: None,
            inputs,
            working_map: ParameterMap::new(),
            step_index: 0,
            direction: Direction::Start,
            rerun: false,
            status: FlightStatus::Running,
            debug_info: DebugInfo::default(),
            step_class_names,
        }
    }

    pub fn current_step_class_name(&self) -> Option<&str> {
        let idx = usize::try_from(self.step_index).ok()?;
        self.step_class_names.get(idx).map(|s| s.as_str())
    }
}

/// Builds a flight's step list from its `class_name` and input map.
/// Determinism requirement (§9): the same `(class_name, inputs)` pair must
/// always produce the same step list on resume.
pub type StepConstructor =
    Arc<dyn Fn(&ParameterMap) -> EngineResult<Vec<(Box<dyn Step>, Box<dyn RetryRule>)>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FlightFactory {
    constructors: HashMap<String, StepConstructor>,
}

impl FlightFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class_name: impl Into<String>, ctor: StepConstructor) {
        self.constructors.insert(class_name.into(), ctor);
    }

    pub fn build_steps(
        &self,
        class_name: &str,
        inputs: &ParameterMap,
    ) -> EngineResult<Vec<(Box<dyn Step>, Box<dyn RetryRule>)>> {
        let ctor = self
            .constructors
            .get(class_name)
            .ok_or_else(|| EngineError::BadRequest(format!("unregistered flight class: {class_name}")))?;
        ctor(inputs)
    }
}
