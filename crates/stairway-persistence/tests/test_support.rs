use once_cell::sync::Lazy;
use stairway_persistence::{build_pool, DbConfig, PgFlightDao, PgPool, PoolProvider};

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

/// Runs `f` against a fresh DAO if `DATABASE_URL` is set, otherwise no-ops.
/// Every stairway-persistence integration test follows this skip pattern so
/// the suite runs green without a live Postgres instance.
pub fn with_dao<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&PgFlightDao<PoolProvider>) -> R,
{
    let pool = TEST_POOL.as_ref()?.clone();
    let dao = PgFlightDao::new(PoolProvider { pool });
    Some(f(&dao))
}
