//! `DATABASE_URL`-skip helper, mirroring `stairway-persistence`'s own
//! `tests/test_support.rs` (itself grounded on the teacher's
//! `tests/test_support.rs`/`tests/minimal_pool.rs`).

use std::sync::Arc;

use once_cell::sync::Lazy;

use stairway_core::{CompositeHook, FlightFactory};
use stairway_engine::{EngineBuilder, EngineConfig, StairwayEngine};
use stairway_persistence::{build_pool, DbConfig, FlightDao, PgFlightDao, PgPool, PoolProvider};
use stairway_queue::{InMemoryWorkQueue, WorkQueue};

pub static TEST_POOL: Lazy<Option<PgPool>> = Lazy::new(|| {
    if std::env::var("DATABASE_URL").is_err() {
        return None;
    }
    stairway_persistence::init_dotenv();
    let cfg = DbConfig::from_env();
    match build_pool(&cfg.url, 1, 4) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("could not build test pool: {e}");
            None
        }
    }
});

/// Builds an engine with a fresh in-memory work queue and the real
/// Postgres-backed DAO, running `f` against it. Returns `None` (and prints a
/// skip notice) when `DATABASE_URL` is unset, the same convention the
/// persistence crate's own tests use.
pub fn with_engine<F, R>(config: EngineConfig, factory: FlightFactory, f: F) -> Option<R>
where
    F: FnOnce(Arc<StairwayEngine>) -> R,
{
    let pool = TEST_POOL.as_ref()?.clone();
    let dao: Arc<dyn FlightDao> = Arc::new(PgFlightDao::new(PoolProvider { pool }));
    let queue: Arc<dyn WorkQueue> = Arc::new(InMemoryWorkQueue::new());
    let builder = EngineBuilder::construct(config, factory, CompositeHook::new(), Some(queue));
    let (engine, _existing) = builder.initialize(dao).expect("engine initialize");
    engine.recover_and_start(&[]).expect("recover_and_start");
    Some(f(engine))
}
