//! C6 — the flight runner. Drives one flight's step list to completion or
//! suspension on the calling thread, appending exactly one step-log entry
//! per executed transition (§4.6), the way the teacher's
//! `FlowEngine::run_flow_to_completion` drives `next_with` to `FlowCompleted`
//! in a loop — generalized here from a linear success-only walk to the full
//! DO/UNDO/retry state machine §4.6 specifies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stairway_core::{
    CancellationToken, CompositeHook, DebugInfo, Direction, EngineResult, FlightContext, FlightFactory, FlightStatus, ParameterMap,
    StairwayContext, StepResult,
};
use stairway_persistence::{FlightContextRecord, FlightDao};

/// Wraps the engine's quiescing flag so retry sleeps can be interrupted by
/// it, the same way a cancellation token would interrupt them.
pub struct QuiesceToken(pub Arc<AtomicBool>);

impl CancellationToken for QuiesceToken {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct FlightRunner {
    factory: Arc<FlightFactory>,
    dao: Arc<dyn FlightDao>,
    hooks: Arc<CompositeHook>,
    quiescing: Arc<AtomicBool>,
}

impl FlightRunner {
    pub fn new(factory: Arc<FlightFactory>, dao: Arc<dyn FlightDao>, hooks: Arc<CompositeHook>, quiescing: Arc<AtomicBool>) -> Self {
        Self { factory, dao, hooks, quiescing }
    }

    /// Runs `class_name`'s steps over `inputs`, starting fresh or resuming
    /// from `record` (the DAO's reconstructed context), until the flight
    /// suspends (WAITING/READY/READY_TO_RESTART) or terminates
    /// (SUCCESS/ERROR/FATAL). Returns the resulting status; the DAO has
    /// already recorded it via `step`/`exit` by the time this returns.
    pub fn run(
        &self,
        flight_id: &str,
        class_name: &str,
        inputs: ParameterMap,
        record: Option<FlightContextRecord>,
        debug_info: DebugInfo,
    ) -> EngineResult<FlightStatus> {
        let built = self.factory.build_steps(class_name, &inputs)?;
        let (steps, mut retries): (Vec<_>, Vec<_>) = built.into_iter().unzip();
        for r in retries.iter_mut() {
            r.initialize();
        }
        let step_names: Vec<String> = steps.iter().map(|s| s.class_name().to_string()).collect();
        let step_count = steps.len() as i64;

        let mut ctx = FlightContext::new(flight_id, inputs, step_names);
        ctx.debug_info = debug_info;
        if let Some(rec) = record {
            ctx.working_map = rec.working_map;
            ctx.step_index = rec.step_index;
            ctx.direction = rec.direction;
            ctx.rerun = rec.rerun;
        }
        if matches!(ctx.direction, Direction::Start) {
            ctx.direction = Direction::Do;
        }

        let stair_ctx = StairwayContext::new(flight_id).with_class_name(class_name);
        self.hooks.start_flight(&stair_ctx);

        let mut last_error: Option<String> = None;
        let cancel = QuiesceToken(self.quiescing.clone());

        let outcome = loop {
            if self.quiescing.load(Ordering::SeqCst) {
                break self.suspend(flight_id, &ctx, FlightStatus::Ready, None)?;
            }

            let idx = usize::try_from(ctx.step_index).expect("step index never negative while DO/UNDO in range");
            let class_name = steps[idx].class_name().to_string();
            let step_ctx = stair_ctx.for_step(ctx.step_index, &class_name);
            self.hooks.start_step(&step_ctx);
            let direction = ctx.direction;
            let result = invoke_step(steps[idx].as_ref(), &mut ctx, direction);
            self.hooks.end_step(&step_ctx);

            match result {
                StepResult::Success => match direction {
                    Direction::Do if ctx.step_index + 1 < step_count => {
                        self.dao.step(flight_id, ctx.step_index, direction, ctx.rerun, &ctx.working_map, None)?;
                        ctx.step_index += 1;
                        ctx.rerun = false;
                    }
                    Direction::Do => {
                        break self.terminal(flight_id, &ctx, FlightStatus::Success, None)?;
                    }
                    Direction::Undo if ctx.step_index - 1 >= 0 => {
                        self.dao.step(flight_id, ctx.step_index, direction, ctx.rerun, &ctx.working_map, None)?;
                        ctx.step_index -= 1;
                        ctx.rerun = false;
                    }
                    Direction::Undo => {
                        break self.terminal(flight_id, &ctx, FlightStatus::Error, last_error.take())?;
                    }
                    Direction::Start | Direction::Switch => unreachable!("invoke_step never runs in START/SWITCH"),
                },
                StepResult::Rerun => {
                    ctx.rerun = true;
                    self.dao.step(flight_id, ctx.step_index, direction, ctx.rerun, &ctx.working_map, None)?;
                }
                StepResult::Wait => break self.suspend(flight_id, &ctx, FlightStatus::Waiting, None)?,
                StepResult::Stop => break self.suspend(flight_id, &ctx, FlightStatus::Ready, None)?,
                StepResult::RestartFlight => break self.suspend(flight_id, &ctx, FlightStatus::ReadyToRestart, None)?,
                StepResult::FailureRetry(msg) if direction == Direction::Do && retries[idx].retry_sleep(&cancel) => {
                    last_error = Some(msg);
                }
                StepResult::FailureRetry(msg) if direction == Direction::Do => {
                    self.dao.step(flight_id, ctx.step_index, Direction::Switch, false, &ctx.working_map, Some(&msg))?;
                    last_error = Some(msg);
                    ctx.direction = Direction::Undo;
                }
                StepResult::FailureFatal(msg) if direction == Direction::Do => {
                    self.dao.step(flight_id, ctx.step_index, Direction::Switch, false, &ctx.working_map, Some(&msg))?;
                    last_error = Some(msg);
                    ctx.direction = Direction::Undo;
                }
                StepResult::FailureRetry(msg) | StepResult::FailureFatal(msg) => {
                    // A failure during UNDO is dismal: terminal FATAL is the only path out (§4.6).
                    break self.terminal(flight_id, &ctx, FlightStatus::Fatal, Some(msg))?;
                }
            }
        };

        self.hooks.state_transition(&stair_ctx, outcome);
        self.hooks.end_flight(&stair_ctx);
        Ok(outcome)
    }

    fn suspend(
        &self,
        flight_id: &str,
        ctx: &FlightContext,
        status: FlightStatus,
        serialized_exception: Option<String>,
    ) -> EngineResult<FlightStatus> {
        self.dao.exit(
            flight_id,
            ctx.step_index,
            ctx.direction,
            status,
            &ctx.working_map,
            serialized_exception.as_deref(),
            None,
        )?;
        Ok(status)
    }

    fn terminal(
        &self,
        flight_id: &str,
        ctx: &FlightContext,
        status: FlightStatus,
        serialized_exception: Option<String>,
    ) -> EngineResult<FlightStatus> {
        let output_parameters = ctx.working_map.to_json().ok();
        self.dao.exit(
            flight_id,
            ctx.step_index,
            ctx.direction,
            status,
            &ctx.working_map,
            serialized_exception.as_deref(),
            output_parameters.as_deref(),
        )?;
        Ok(status)
    }
}

/// Applies debug fault injection (§4.6) before falling back to the step's
/// real `doStep`/`undoStep`, then applies the two whole-flight overrides
/// (`restartEachStep`, `lastStepFailure`) to the real result.
fn invoke_step(step: &dyn stairway_core::Step, ctx: &mut FlightContext, direction: Direction) -> StepResult {
    if let Some(kind) = ctx.debug_info.take_fail_at_step(direction, ctx.step_index) {
        return StepResult::from_kind(kind, "failAtSteps injected");
    }
    let class_name = step.class_name().to_string();
    let injected = match direction {
        Direction::Do => ctx.debug_info.take_do_step_failure(&class_name),
        Direction::Undo => ctx.debug_info.take_undo_step_failure(&class_name),
        Direction::Start | Direction::Switch => None,
    };
    if let Some(kind) = injected {
        return StepResult::from_kind(kind, "doStepFailures/undoStepFailures injected");
    }

    let mut result = match direction {
        Direction::Do => step.do_step(ctx),
        Direction::Undo => step.undo_step(ctx),
        Direction::Start | Direction::Switch => unreachable!(),
    };

    if direction == Direction::Do && ctx.debug_info.restart_each_step && matches!(result, StepResult::Success) {
        result = StepResult::RestartFlight;
    }
    if direction == Direction::Do && ctx.debug_info.last_step_failure && matches!(result, StepResult::Success) {
        result = StepResult::FailureFatal("lastStepFailure injected".into());
    }
    result
}
