//! C7 — engine core: instance identity, admission, submission, resume,
//! recovery, the queue listener, the retention loop, and quiesce/terminate.
//!
//! The three-phase startup (`construct` → `initialize` → `recover_and_start`)
//! and the rayon-backed worker pool are grounded on the teacher's
//! `FlowEngine::builder`/`EngineBuilderInit` construction sequence
//! (`chem-core/src/engine/builder.rs`) and the crate's own `rayon`
//! dependency, generalized from a single in-process flow run to a pool of
//! concurrently admitted flights.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashSet;
use rayon::{ThreadPool, ThreadPoolBuilder};
use uuid::Uuid;

use stairway_core::{create_flight_id, CompositeHook, DebugInfo, EngineError, EngineResult, FlightFactory, ParameterMap};
use stairway_persistence::{FlightDao, FlightRecord};
use stairway_queue::{QueueMessage, WorkQueue};

use crate::runner::{FlightRunner, QuiesceToken};

/// Configuration gathered at construct time; no database access happens
/// until `initialize` (§4.7 "three-phase" init).
#[derive(Clone)]
pub struct EngineConfig {
    pub instance_name: String,
    pub cluster_name: Option<String>,
    pub max_parallel_flights: usize,
    pub max_queued_flights: usize,
    pub retention_check_interval: Option<Duration>,
    pub completed_flight_retention: Option<Duration>,
    pub queue_dispatch_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_name: "stairway".into(),
            cluster_name: None,
            max_parallel_flights: 8,
            max_queued_flights: 32,
            retention_check_interval: None,
            completed_flight_retention: None,
            queue_dispatch_batch_size: 10,
        }
    }
}

/// Phase 1, *Construct*: remembers configuration, opens no connections.
pub struct EngineBuilder {
    config: EngineConfig,
    factory: FlightFactory,
    hooks: CompositeHook,
    queue: Option<Arc<dyn WorkQueue>>,
}

impl EngineBuilder {
    pub fn construct(config: EngineConfig, factory: FlightFactory, hooks: CompositeHook, queue: Option<Arc<dyn WorkQueue>>) -> Self {
        Self { config, factory, hooks, queue }
    }

    /// Phase 2, *Initialize*: opens the DAO the caller already built (schema
    /// migration is the DAO's/pool's concern, run before this is called —
    /// see `stairway_persistence::build_pool`), allocates the worker pool,
    /// and returns the instance names already on record so the caller can
    /// decide which are stale and pass them to `recover_and_start`.
    pub fn initialize(self, dao: Arc<dyn FlightDao>) -> EngineResult<(Arc<StairwayEngine>, Vec<String>)> {
        let existing_names = dao.list_instance_names()?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.max_parallel_flights)
            .build()
            .map_err(|e| EngineError::Internal(format!("thread pool: {e}")))?;

        let engine = Arc::new(StairwayEngine {
            config: self.config,
            factory: Arc::new(self.factory),
            hooks: Arc::new(self.hooks),
            queue: self.queue,
            dao,
            pool,
            active: DashSet::new(),
            pool_queued: AtomicUsize::new(0),
            quiescing: Arc::new(AtomicBool::new(false)),
            stairway_id: RwLock::new(None),
            listener_handle: Mutex::new(None),
            retention_handle: Mutex::new(None),
        });

        Ok((engine, existing_names))
    }
}

pub struct StairwayEngine {
    config: EngineConfig,
    factory: Arc<FlightFactory>,
    hooks: Arc<CompositeHook>,
    queue: Option<Arc<dyn WorkQueue>>,
    dao: Arc<dyn FlightDao>,
    pool: ThreadPool,
    active: DashSet<String>,
    /// Flights admitted to the local pool but whose runner body has not yet
    /// started on a worker thread — the "pool-queued" backlog `maxQueuedFlights`
    /// bounds (§4.7). Decremented as the first action inside the spawned task.
    pool_queued: AtomicUsize,
    quiescing: Arc<AtomicBool>,
    stairway_id: RwLock<Option<Uuid>>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
    retention_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StairwayEngine {
    pub fn dao(&self) -> &Arc<dyn FlightDao> {
        &self.dao
    }

    pub fn stairway_id(&self) -> Option<Uuid> {
        *self.stairway_id.read().expect("stairway_id lock poisoned")
    }

    pub fn is_quiescing(&self) -> bool {
        self.quiescing.load(Ordering::SeqCst)
    }

    /// Flights admitted to the local pool, running or still pool-queued.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Flight ids currently admitted to this instance's local pool (running
    /// or pool-queued).
    pub fn active_flight_ids(&self) -> Vec<String> {
        self.active.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Flights whose runner body has actually started on a worker thread.
    fn running_count(&self) -> usize {
        self.active.len().saturating_sub(self.pool_queued.load(Ordering::SeqCst))
    }

    /// Flights admitted locally but still waiting for a free worker thread.
    fn pool_queued_count(&self) -> usize {
        self.pool_queued.load(Ordering::SeqCst)
    }

    /// Whether the local pool has room for one more flight, per the
    /// admission table (§4.7): either a worker thread is free, or the
    /// pool-queued backlog still has room.
    fn has_local_capacity(&self) -> bool {
        self.running_count() < self.config.max_parallel_flights || self.pool_queued_count() < self.config.max_queued_flights
    }

    /// Phase 3, *RecoverAndStart*: disowns obsolete peers, registers this
    /// instance, routes every unowned READY flight back into execution,
    /// then starts the queue listener.
    pub fn recover_and_start(self: &Arc<Self>, obsolete_instances: &[String]) -> EngineResult<()> {
        for name in obsolete_instances {
            if let Ok(id) = self.dao.lookup_instance_id(name) {
                self.dao.disown_recovery(id)?;
            }
        }

        let id = self.dao.register_instance(&self.config.instance_name)?;
        *self.stairway_id.write().expect("stairway_id lock poisoned") = Some(id);

        self.recover_ready()?;
        self.start_queue_listener();
        self.start_retention_loop();
        Ok(())
    }

    /// Routes every unowned READY flight back into execution: locally if no
    /// queue is configured, otherwise by publishing a READY message (§4.7).
    fn recover_ready(self: &Arc<Self>) -> EngineResult<()> {
        for flight_id in self.dao.get_ready_flights()? {
            match &self.queue {
                Some(queue) => {
                    let msg = QueueMessage::ready(&flight_id).to_text().map_err(|e| EngineError::SerializationError(e.to_string()))?;
                    queue.enqueue_message(&msg)?;
                    self.dao.queued(&flight_id)?;
                }
                None => {
                    self.resume(&flight_id)?;
                }
            }
        }
        Ok(())
    }

    /// `recoverStairway(name)`: disowns a peer's flights and re-floats them.
    pub fn recover_stairway(self: &Arc<Self>, name: &str) -> EngineResult<()> {
        let id = self.dao.lookup_instance_id(name)?;
        self.dao.disown_recovery(id)?;
        self.recover_ready()
    }

    /// Admission decision table (§4.7). `flight_id` is the caller-chosen id
    /// (§3: "opaque string, client-chosen, unique"); when `None` one is
    /// generated. Returns the flight id actually used.
    pub fn submit(
        self: &Arc<Self>,
        flight_id: Option<String>,
        class_name: &str,
        inputs: ParameterMap,
        force_queue: bool,
    ) -> EngineResult<String> {
        self.submit_with_debug_info(flight_id, class_name, inputs, force_queue, DebugInfo::default())
    }

    /// Like `submit`, but threads `debug_info` into the spawned runner's
    /// context so debug-only fault injection (§4.6 `restartEachStep`,
    /// `lastStepFailure`, `failAtSteps`, `doStepFailures`/`undoStepFailures`)
    /// is reachable outside of tests that hand-build a `FlightContext`.
    /// Ignored for flights that end up on the work queue and are later
    /// claimed via `resume` — debug info does not survive a queue hop.
    pub fn submit_with_debug_info(
        self: &Arc<Self>,
        flight_id: Option<String>,
        class_name: &str,
        inputs: ParameterMap,
        force_queue: bool,
        debug_info: DebugInfo,
    ) -> EngineResult<String> {
        if class_name.is_empty() {
            return Err(EngineError::BadRequest("flight class must not be empty".into()));
        }
        let flight_id = flight_id.unwrap_or_else(create_flight_id);

        if self.is_quiescing() {
            if self.queue.is_some() {
                self.enqueue(&flight_id, class_name, &inputs)?;
            } else {
                return Err(EngineError::BadRequest("engine is quiescing and no work queue is configured".into()));
            }
        } else if force_queue {
            self.enqueue(&flight_id, class_name, &inputs)?;
        } else if self.has_local_capacity() {
            self.run_locally(&flight_id, class_name, inputs, debug_info)?;
        } else if self.queue.is_some() {
            self.enqueue(&flight_id, class_name, &inputs)?;
        } else {
            return Err(EngineError::BadRequest("at capacity and no work queue is configured".into()));
        }

        Ok(flight_id)
    }

    fn enqueue(&self, flight_id: &str, class_name: &str, inputs: &ParameterMap) -> EngineResult<()> {
        let queue = self.queue.as_ref().ok_or_else(|| EngineError::BadRequest("no work queue configured".into()))?;
        self.dao.submit(flight_id, class_name, inputs)?;
        let msg = QueueMessage::ready(flight_id).to_text().map_err(|e| EngineError::SerializationError(e.to_string()))?;
        queue.enqueue_message(&msg)?;
        self.dao.queued(flight_id)?;
        Ok(())
    }

    fn run_locally(self: &Arc<Self>, flight_id: &str, class_name: &str, inputs: ParameterMap, debug_info: DebugInfo) -> EngineResult<()> {
        let owner = self.stairway_id().unwrap_or_else(Uuid::new_v4);
        self.dao.create(flight_id, class_name, &inputs, owner)?;
        self.spawn_runner(flight_id.to_string(), class_name.to_string(), inputs, None, debug_info);
        Ok(())
    }

    /// `resume(flightId)`: attempts to capture ownership; on success,
    /// reconstructs the flight and submits it to the local pool. Returns
    /// `true` iff this instance claimed it.
    pub fn resume(self: &Arc<Self>, flight_id: &str) -> EngineResult<bool> {
        let owner = self.stairway_id().ok_or_else(|| EngineError::Internal("resume before recover_and_start".into()))?;
        match self.dao.resume(owner, flight_id)? {
            Some(record) => {
                self.spawn_runner(record.flight_id.clone(), record.class_name.clone(), record.inputs.clone(), Some(record), DebugInfo::default());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn spawn_runner(
        self: &Arc<Self>,
        flight_id: String,
        class_name: String,
        inputs: ParameterMap,
        record: Option<stairway_persistence::FlightContextRecord>,
        debug_info: DebugInfo,
    ) {
        self.active.insert(flight_id.clone());
        self.pool_queued.fetch_add(1, Ordering::SeqCst);
        let dao = self.dao.clone();
        let factory = self.factory.clone();
        let hooks = self.hooks.clone();
        let quiescing = self.quiescing.clone();
        let active_handle = self.clone();
        self.pool.spawn(move || {
            active_handle.pool_queued.fetch_sub(1, Ordering::SeqCst);
            let runner = FlightRunner::new(factory, dao, hooks, quiescing);
            if let Err(e) = runner.run(&flight_id, &class_name, inputs, record, debug_info) {
                log::error!("flight {flight_id} runner error: {e}");
            }
            active_handle.active.remove(&flight_id);
        });
    }

    /// Bounded poll loop over `getFlightState` (§6 `waitForFlight`); no
    /// notification surface is in scope, so this polls on a short interval
    /// until the flight reaches a terminal status or `timeout` elapses.
    pub fn wait_for_flight(&self, flight_id: &str, timeout: Duration) -> EngineResult<FlightRecord> {
        let deadline = Instant::now() + timeout;
        loop {
            let record = self.dao.get_flight_state(flight_id)?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            if Instant::now() >= deadline {
                return Err(EngineError::FlightWaitTimedOut(flight_id.to_string()));
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    fn start_queue_listener(self: &Arc<Self>) {
        let Some(queue) = self.queue.clone() else { return };
        let engine = self.clone();
        let batch_size = self.config.queue_dispatch_batch_size;
        let handle = thread::spawn(move || {
            let cancel = QuiesceToken(engine.quiescing.clone());
            while !engine.is_quiescing() {
                let offered = queue
                    .dispatch_messages(batch_size, &cancel, &mut |text| match QueueMessage::from_text(text) {
                        Ok(msg) => {
                            if !engine.has_local_capacity() {
                                return false; // over capacity: leave for redelivery
                            }
                            engine.resume(&msg.flight_id).unwrap_or(false)
                        }
                        Err(e) => {
                            log::warn!("dropping malformed queue message: {e}");
                            true
                        }
                    })
                    .unwrap_or(0);
                if offered == 0 {
                    thread::sleep(Duration::from_millis(100));
                }
            }
        });
        *self.listener_handle.lock().expect("listener handle lock poisoned") = Some(handle);
    }

    fn start_retention_loop(self: &Arc<Self>) {
        let (Some(interval), Some(retention)) = (self.config.retention_check_interval, self.config.completed_flight_retention) else {
            return;
        };
        let engine = self.clone();
        let handle = thread::spawn(move || {
            while !engine.is_quiescing() {
                thread::sleep(interval);
                if engine.is_quiescing() {
                    break;
                }
                let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
                if let Err(e) = engine.dao.clean_completed(cutoff) {
                    log::warn!("retention cleanup failed: {e}");
                }
            }
        });
        *self.retention_handle.lock().expect("retention handle lock poisoned") = Some(handle);
    }

    /// Graceful shutdown: sets the quiescing flag, joins the queue listener
    /// (small reserved budget), then polls until the pool drains or
    /// `timeout` elapses. Returns `true` iff every worker finished in time.
    pub fn quiet_down(&self, timeout: Duration) -> bool {
        self.quiescing.store(true, Ordering::SeqCst);
        let listener_budget = if timeout < Duration::from_secs(30) { Duration::from_secs(1) } else { Duration::from_secs(5) };
        if let Some(handle) = self.listener_handle.lock().expect("listener handle lock poisoned").take() {
            let _ = join_with_budget(handle, listener_budget);
        }

        let deadline = Instant::now() + timeout.saturating_sub(listener_budget);
        while Instant::now() < deadline {
            if self.active_count() == 0 {
                return true;
            }
            thread::sleep(Duration::from_millis(50));
        }
        self.active_count() == 0
    }

    /// Best-effort immediate shutdown. Rust workers cannot be preemptively
    /// interrupted mid-step the way the source's thread-interrupt model
    /// allows, so this only raises the quiescing flag and detaches the
    /// listener/retention threads; already-running steps still exit through
    /// the STOP→READY path at their next step boundary (§5 "Suspension
    /// points"), which is the cooperative equivalent of the source's
    /// "treat the interrupt as STOP→READY if its DAO call can still
    /// commit" fallback.
    pub fn terminate(&self) {
        self.quiescing.store(true, Ordering::SeqCst);
    }
}

fn join_with_budget(handle: JoinHandle<()>, budget: Duration) -> Result<(), ()> {
    // `JoinHandle::join` has no timeout in std; as a best-effort budget we
    // just cap how long a caller blocks waiting by polling `is_finished`.
    let deadline = Instant::now() + budget;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(());
        }
        thread::sleep(Duration::from_millis(10));
    }
    handle.join().map_err(|_| ())
}
