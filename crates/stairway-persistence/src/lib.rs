//! Postgres-backed implementation of C3/C4/C11: the transactional DAO, the
//! filter/pagination compiler, connection pooling with the classifying
//! retry wrapper, and environment-driven configuration.

mod config;
mod dao;
mod error;
mod filter;
mod migrations;
mod pool;
mod rows;
mod schema;

pub use config::{init_dotenv, DbConfig, EngineEnvConfig};
pub use dao::{FlightContextRecord, FlightDao, FlightLogRecord, FlightRecord, PgFlightDao};
pub use error::PersistenceError;
pub use filter::{
    BoundParam, CompiledQuery, FilterValue, FlightColumn, FlightEnumeration, Op, PageToken, Pagination, Predicate,
    SortDirection,
};
pub use filter::Filter;
pub use migrations::{run_pending_migrations, MIGRATIONS};
pub use pool::{build_dev_pool_from_env, build_pool, with_retry, ConnectionProvider, PgPool, PooledConn, PoolProvider, RetryBudget};
