//! Crate-wide error hierarchy.
//!
//! `EngineError` is the single error type crossing the boundaries between
//! `stairway-core`, `stairway-queue`, `stairway-persistence` and
//! `stairway-engine`. Persistence-specific failures have their own narrower
//! enum (`stairway_persistence::PersistenceError`) that converts into this
//! one at the DAO boundary, collapsing every retryable condition into
//! `DatabaseError` once the retry wrapper has given up on it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("flight not found: {0}")]
    FlightNotFound(String),

    #[error("duplicate flight id: {0}")]
    DuplicateFlightId(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("queue error: {0}")]
    QueueError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("migration error: {0}")]
    MigrationError(String),

    #[error("wait for flight {0} timed out")]
    FlightWaitTimedOut(String),

    #[error("interrupted")]
    Interrupted,

    #[error("engine is shutting down")]
    EngineShutdown,

    #[error("mutation attempted on immutable parameter map")]
    ImmutableMutation,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
