//! Core domain enums shared by the runner, persistence, and control
//! surface: flight status, step direction, and the step result tagged sum.

use serde::{Deserialize, Serialize};

/// A flight's lifecycle status (§3 Flight record).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlightStatus {
    Running,
    Waiting,
    Ready,
    ReadyToRestart,
    Queued,
    Success,
    Error,
    Fatal,
}

impl FlightStatus {
    /// (I1): RUNNING requires ownership; QUEUED/WAITING/READY/READY_TO_RESTART require none.
    pub fn requires_ownership(self) -> bool {
        matches!(self, FlightStatus::Running)
    }

    pub fn requires_no_ownership(self) -> bool {
        matches!(
            self,
            FlightStatus::Queued | FlightStatus::Waiting | FlightStatus::Ready | FlightStatus::ReadyToRestart
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FlightStatus::Success | FlightStatus::Error | FlightStatus::Fatal)
    }

    pub fn as_db_str(self) -> &'static str {
        match self {
            FlightStatus::Running => "RUNNING",
            FlightStatus::Waiting => "WAITING",
            FlightStatus::Ready => "READY",
            FlightStatus::ReadyToRestart => "READY_TO_RESTART",
            FlightStatus::Queued => "QUEUED",
            FlightStatus::Success => "SUCCESS",
            FlightStatus::Error => "ERROR",
            FlightStatus::Fatal => "FATAL",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "RUNNING" => FlightStatus::Running,
            "WAITING" => FlightStatus::Waiting,
            "READY" => FlightStatus::Ready,
            "READY_TO_RESTART" => FlightStatus::ReadyToRestart,
            "QUEUED" => FlightStatus::Queued,
            "SUCCESS" => FlightStatus::Success,
            "ERROR" => FlightStatus::Error,
            "FATAL" => FlightStatus::Fatal,
            _ => return None,
        })
    }
}

/// Direction of travel through the step list (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Start,
    Do,
    Switch,
    Undo,
}

impl Direction {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Direction::Start => "START",
            Direction::Do => "DO",
            Direction::Switch => "SWITCH",
            Direction::Undo => "UNDO",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "START" => Direction::Start,
            "DO" => Direction::Do,
            "SWITCH" => Direction::Switch,
            "UNDO" => Direction::Undo,
            _ => return None,
        })
    }
}

/// The outcome of invoking a step's `do`/`undo` operation (§4.6).
///
/// Unlike the source idiom's control-flow exceptions, this is a plain
/// tagged sum the runner switches over; thrown/returned application errors
/// are normalized to `FailureRetry`/`FailureFatal` at the step-invocation
/// boundary and never cross it as typed objects (§9 "Exceptions for
/// control flow").
#[derive(Debug)]
pub enum StepResult {
    Success,
    Rerun,
    Wait,
    Stop,
    RestartFlight,
    FailureRetry(String),
    FailureFatal(String),
}

/// The `StepResult` shape without its error payload; used by debug fault
/// injection (`failAtSteps`, `doStepFailures`/`undoStepFailures`) to name a
/// result to coerce to without constructing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepResultKind {
    Success,
    Rerun,
    Wait,
    Stop,
    RestartFlight,
    FailureRetry,
    FailureFatal,
}

impl StepResult {
    pub fn kind(&self) -> StepResultKind {
        match self {
            StepResult::Success => StepResultKind::Success,
            StepResult::Rerun => StepResultKind::Rerun,
            StepResult::Wait => StepResultKind::Wait,
            StepResult::Stop => StepResultKind::Stop,
            StepResult::RestartFlight => StepResultKind::RestartFlight,
            StepResult::FailureRetry(_) => StepResultKind::FailureRetry,
            StepResult::FailureFatal(_) => StepResultKind::FailureFatal,
        }
    }

    /// Build a `StepResult` from a `StepResultKind`, used when fault
    /// injection coerces a real outcome to a named kind.
    pub fn from_kind(kind: StepResultKind, message: impl Into<String>) -> Self {
        match kind {
            StepResultKind::Success => StepResult::Success,
            StepResultKind::Rerun => StepResult::Rerun,
            StepResultKind::Wait => StepResult::Wait,
            StepResultKind::Stop => StepResult::Stop,
            StepResultKind::RestartFlight => StepResult::RestartFlight,
            StepResultKind::FailureRetry => StepResult::FailureRetry(message.into()),
            StepResultKind::FailureFatal => StepResult::FailureFatal(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_db_round_trip() {
        for s in [
            FlightStatus::Running,
            FlightStatus::Waiting,
            FlightStatus::Ready,
            FlightStatus::ReadyToRestart,
            FlightStatus::Queued,
            FlightStatus::Success,
            FlightStatus::Error,
            FlightStatus::Fatal,
        ] {
            assert_eq!(FlightStatus::from_db_str(s.as_db_str()), Some(s));
        }
    }

    #[test]
    fn ownership_partition_covers_all_statuses() {
        for s in [
            FlightStatus::Running,
            FlightStatus::Waiting,
            FlightStatus::Ready,
            FlightStatus::ReadyToRestart,
            FlightStatus::Queued,
            FlightStatus::Success,
            FlightStatus::Error,
            FlightStatus::Fatal,
        ] {
            assert!(!(s.requires_ownership() && s.requires_no_ownership()));
        }
    }
}
