//! Debug fault injection (§4.6), used by tests to force specific step
//! outcomes deterministically rather than relying on flaky real failures.

use std::collections::HashMap;

use crate::model::{Direction, StepResultKind};

/// Per-flight debug configuration. Default is "no injected faults".
#[derive(Clone, Debug, Default)]
pub struct DebugInfo {
    /// After each successful DO step, coerce to `RestartFlight`.
    pub restart_each_step: bool,
    /// Coerce the final DO step's result to `FailureFatal`.
    pub last_step_failure: bool,
    /// Once per (direction, index), override the returned result.
    pub fail_at_steps: HashMap<(Direction, i64), StepResultKind>,
    /// Once per (class_name, direction=Do), override the returned result.
    pub do_step_failures: HashMap<String, StepResultKind>,
    /// Once per (class_name, direction=Undo), override the returned result.
    pub undo_step_failures: HashMap<String, StepResultKind>,
}

impl DebugInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume (remove) the fail-at-steps override for `(direction, index)`,
    /// if any — these fire at most once, matching the spec's "once per
    /// (direction,index)" wording.
    pub fn take_fail_at_step(&mut self, direction: Direction, index: i64) -> Option<StepResultKind> {
        self.fail_at_steps.remove(&(direction, index))
    }

    pub fn take_do_step_failure(&mut self, class_name: &str) -> Option<StepResultKind> {
        self.do_step_failures.remove(class_name)
    }

    pub fn take_undo_step_failure(&mut self, class_name: &str) -> Option<StepResultKind> {
        self.undo_step_failures.remove(class_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_at_step_fires_once() {
        let mut d = DebugInfo::new();
        d.fail_at_steps.insert((Direction::Do, 1), StepResultKind::FailureFatal);
        assert_eq!(d.take_fail_at_step(Direction::Do, 1), Some(StepResultKind::FailureFatal));
        assert_eq!(d.take_fail_at_step(Direction::Do, 1), None);
    }
}
