//! Engine-level integration tests, gated on `DATABASE_URL` like the
//! persistence crate's own (§8 Testable properties: "Retry discipline",
//! "Happy-path single-step SUCCESS").

mod test_support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use stairway_core::{DebugInfo, FlightContext, FlightFactory, FlightStatus, FixedIntervalRetry, NoRetry, ParameterMap, Step, StepResult};
use stairway_engine::{ControlSurface, EngineConfig};
use stairway_persistence::FlightDao;

use test_support::with_engine;

struct AlwaysSucceeds;
impl Step for AlwaysSucceeds {
    fn class_name(&self) -> &str {
        "AlwaysSucceeds"
    }
    fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
    fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

fn happy_path_factory() -> FlightFactory {
    let mut f = FlightFactory::new();
    f.register("HappyPath", Arc::new(|_inputs: &ParameterMap| {
        Ok(vec![(Box::new(AlwaysSucceeds) as Box<dyn Step>, Box::new(NoRetry) as Box<dyn stairway_core::RetryRule>)])
    }));
    f
}

fn poll_terminal(dao: &Arc<dyn FlightDao>, flight_id: &str, timeout: Duration) -> FlightStatus {
    let control = ControlSurface::new(dao.clone());
    let deadline = Instant::now() + timeout;
    loop {
        let record = control.get_flight(flight_id).expect("flight must exist");
        if record.status.is_terminal() {
            return record.status;
        }
        assert!(Instant::now() < deadline, "flight {flight_id} did not terminate in time");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn happy_path_single_step_reaches_success() {
    let ran = with_engine(EngineConfig::default(), happy_path_factory(), |engine| {
        let flight_id = engine.submit(None, "HappyPath", ParameterMap::new(), false).expect("submit");
        let status = poll_terminal(engine.dao(), &flight_id, Duration::from_secs(10));
        assert_eq!(status, FlightStatus::Success);
        engine.quiet_down(Duration::from_secs(5));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

struct FlakyStep {
    remaining_failures: Arc<AtomicU32>,
}
impl Step for FlakyStep {
    fn class_name(&self) -> &str {
        "FlakyStep"
    }
    fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
        let remaining = self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            if n > 0 {
                Some(n - 1)
            } else {
                None
            }
        });
        match remaining {
            Ok(_) => StepResult::FailureRetry("injected failure".into()),
            Err(_) => StepResult::Success,
        }
    }
    fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

fn flaky_factory(fail_count: u32, max_retries: u32) -> FlightFactory {
    let mut f = FlightFactory::new();
    f.register("Flaky", Arc::new(move |_inputs: &ParameterMap| {
        let step = FlakyStep { remaining_failures: Arc::new(AtomicU32::new(fail_count)) };
        let retry = FixedIntervalRetry::new(Duration::from_millis(10), max_retries);
        Ok(vec![(Box::new(step) as Box<dyn Step>, Box::new(retry) as Box<dyn stairway_core::RetryRule>)])
    }));
    f
}

#[test]
fn retry_discipline_succeeds_when_failures_under_budget() {
    let ran = with_engine(EngineConfig::default(), flaky_factory(2, 5), |engine| {
        let flight_id = engine.submit(None, "Flaky", ParameterMap::new(), false).expect("submit");
        let status = poll_terminal(engine.dao(), &flight_id, Duration::from_secs(10));
        assert_eq!(status, FlightStatus::Success);
        engine.quiet_down(Duration::from_secs(5));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

#[test]
fn retry_discipline_errors_when_failures_exceed_budget() {
    let ran = with_engine(EngineConfig::default(), flaky_factory(10, 2), |engine| {
        let flight_id = engine.submit(None, "Flaky", ParameterMap::new(), false).expect("submit");
        let status = poll_terminal(engine.dao(), &flight_id, Duration::from_secs(10));
        assert_eq!(status, FlightStatus::Error);
        engine.quiet_down(Duration::from_secs(5));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

struct BlockingStep {
    released: Arc<std::sync::atomic::AtomicBool>,
}
impl Step for BlockingStep {
    fn class_name(&self) -> &str {
        "BlockingStep"
    }
    fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
        while !self.released.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(10));
        }
        StepResult::Success
    }
    fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

fn blocking_factory(released: Arc<std::sync::atomic::AtomicBool>) -> FlightFactory {
    let mut f = FlightFactory::new();
    f.register("Blocker", Arc::new(move |_inputs: &ParameterMap| {
        let step = BlockingStep { released: released.clone() };
        Ok(vec![(Box::new(step) as Box<dyn Step>, Box::new(NoRetry) as Box<dyn stairway_core::RetryRule>)])
    }));
    f
}

/// Admission control with a one-slot pool and one-slot local backlog (§8
/// "run locally when active<maxParallel OR queued<maxQueued"): the third
/// and fourth submissions must spill to the work queue rather than
/// silently getting a second free local slot.
#[test]
fn admission_honors_both_running_and_queued_limits() {
    let released = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let config = EngineConfig { max_parallel_flights: 1, max_queued_flights: 1, ..EngineConfig::default() };
    let ran = with_engine(config, blocking_factory(released.clone()), |engine| {
        let control = ControlSurface::new(engine.dao().clone());

        let a = engine.submit(None, "Blocker", ParameterMap::new(), false).expect("submit a");
        let b = engine.submit(None, "Blocker", ParameterMap::new(), false).expect("submit b");
        let c = engine.submit(None, "Blocker", ParameterMap::new(), false).expect("submit c");
        let d = engine.submit(None, "Blocker", ParameterMap::new(), false).expect("submit d");

        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(control.get_flight(&a).unwrap().status, FlightStatus::Running);
        assert_eq!(control.get_flight(&b).unwrap().status, FlightStatus::Running, "b should be admitted locally (pool-queued)");
        assert_eq!(control.get_flight(&c).unwrap().status, FlightStatus::Queued, "c should spill to the work queue");
        assert_eq!(control.get_flight(&d).unwrap().status, FlightStatus::Queued, "d should spill to the work queue");

        released.store(true, Ordering::SeqCst);

        for flight_id in [&a, &b, &c, &d] {
            let status = poll_terminal(engine.dao(), flight_id, Duration::from_secs(10));
            assert_eq!(status, FlightStatus::Success);
        }
        engine.quiet_down(Duration::from_secs(5));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

/// `submitWithDebugInfo` (§4.6, §6): `lastStepFailure` coerces an otherwise
/// succeeding DO step to `FailureFatal`, which is only observable if the
/// engine actually threads `DebugInfo` into the runner's context.
#[test]
fn submit_with_debug_info_forces_failure_via_public_api() {
    let ran = with_engine(EngineConfig::default(), happy_path_factory(), |engine| {
        let mut debug_info = DebugInfo::new();
        debug_info.last_step_failure = true;
        let flight_id = engine
            .submit_with_debug_info(None, "HappyPath", ParameterMap::new(), false, debug_info)
            .expect("submit");
        let status = poll_terminal(engine.dao(), &flight_id, Duration::from_secs(10));
        assert_eq!(status, FlightStatus::Error, "lastStepFailure should force the flight through UNDO to ERROR");
        engine.quiet_down(Duration::from_secs(5));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

/// `waitForFlight` (§6): a bounded poll loop that times out while the
/// flight is still running and succeeds once it reaches a terminal status.
#[test]
fn wait_for_flight_times_out_then_succeeds() {
    let released = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let ran = with_engine(EngineConfig::default(), blocking_factory(released.clone()), |engine| {
        let flight_id = engine.submit(None, "Blocker", ParameterMap::new(), false).expect("submit");

        let timed_out = engine.wait_for_flight(&flight_id, Duration::from_millis(100));
        assert!(matches!(timed_out, Err(stairway_core::EngineError::FlightWaitTimedOut(_))));

        released.store(true, Ordering::SeqCst);
        let record = engine.wait_for_flight(&flight_id, Duration::from_secs(10)).expect("flight should terminate");
        assert_eq!(record.status, FlightStatus::Success);
        engine.quiet_down(Duration::from_secs(5));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

/// `listFlights(offset, limit, status?)` (§4.8): the status predicate must
/// actually narrow the result set, matching `countFlights`'s existing
/// support for the same filter.
#[test]
fn list_flights_filters_by_status() {
    let ran = with_engine(EngineConfig::default(), flaky_factory(10, 2), |engine| {
        let control = ControlSurface::new(engine.dao().clone());
        let error_flight = engine.submit(None, "Flaky", ParameterMap::new(), false).expect("submit");
        assert_eq!(poll_terminal(engine.dao(), &error_flight, Duration::from_secs(10)), FlightStatus::Error);

        let success_page = control.list_flights(0, 1000, Some(FlightStatus::Success)).expect("list success");
        assert!(success_page.items.iter().all(|r| r.status == FlightStatus::Success));
        assert!(!success_page.items.iter().any(|r| r.flight_id == error_flight));

        let error_page = control.list_flights(0, 1000, Some(FlightStatus::Error)).expect("list error");
        assert!(error_page.items.iter().all(|r| r.status == FlightStatus::Error));
        assert!(error_page.items.iter().any(|r| r.flight_id == error_flight));

        engine.quiet_down(Duration::from_secs(5));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}
