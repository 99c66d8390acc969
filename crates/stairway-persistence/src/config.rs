//! C11 — environment-driven engine and database configuration, loaded
//! once behind a `Lazy` the way the teacher's `DbConfig` loads `.env`.

use std::env;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let min_connections = env::var("STAIRWAY_DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);
        let max_connections = env::var("STAIRWAY_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(16);
        Self { url, min_connections, max_connections }
    }
}

/// Engine builder options sourced from the environment (§6 Configuration,
/// §10.2). Fields left `None` fall back to the engine's own defaults.
#[derive(Debug, Clone, Default)]
pub struct EngineEnvConfig {
    pub max_parallel_flights: Option<usize>,
    pub max_queued_flights: Option<usize>,
    pub instance_name: Option<String>,
    pub cluster_name: Option<String>,
    pub retention_check_interval_secs: Option<u64>,
    pub completed_flight_retention_secs: Option<u64>,
}

impl EngineEnvConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        Self {
            max_parallel_flights: env::var("STAIRWAY_MAX_PARALLEL_FLIGHTS").ok().and_then(|v| v.parse().ok()),
            max_queued_flights: env::var("STAIRWAY_MAX_QUEUED_FLIGHTS").ok().and_then(|v| v.parse().ok()),
            instance_name: env::var("STAIRWAY_INSTANCE_NAME").ok(),
            cluster_name: env::var("STAIRWAY_CLUSTER_NAME").ok(),
            retention_check_interval_secs: env::var("STAIRWAY_RETENTION_CHECK_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
            completed_flight_retention_secs: env::var("STAIRWAY_COMPLETED_FLIGHT_RETENTION_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}
