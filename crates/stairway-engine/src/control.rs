//! C8 — the control surface: read/administrative operations that go
//! straight to the DAO without application context (no step
//! deserialization, no flight-class instantiation), following the
//! teacher's habit of keeping introspection endpoints thin wrappers over
//! the persistence layer rather than routing them through the engine.

use std::sync::Arc;

use uuid::Uuid;

use stairway_core::{EngineResult, FlightStatus};
use stairway_persistence::{
    Filter, FlightColumn, FlightDao, FlightEnumeration, FlightLogRecord, FlightRecord, FilterValue, Op, Pagination, Predicate,
    SortDirection,
};

pub struct ControlSurface {
    dao: Arc<dyn FlightDao>,
}

impl ControlSurface {
    pub fn new(dao: Arc<dyn FlightDao>) -> Self {
        Self { dao }
    }

    pub fn count_flights(&self, status: Option<FlightStatus>) -> EngineResult<i64> {
        self.dao.count_flights(status)
    }

    pub fn count_owned(&self, stairway_id: Uuid) -> EngineResult<i64> {
        self.dao.count_owned(stairway_id)
    }

    pub fn list_flights(&self, offset: i64, limit: i64, status: Option<FlightStatus>) -> EngineResult<FlightEnumeration<FlightRecord>> {
        let pagination = Pagination::OffsetLimit { offset, limit };
        let filter = status.map(|s| {
            Filter::Predicate(Predicate::Column {
                column: FlightColumn::Status,
                op: Op::Eq,
                value: Some(FilterValue::Text(s.as_db_str().to_string())),
            })
        });
        self.dao.get_flights(filter.as_ref(), &pagination, SortDirection::Asc)
    }

    pub fn list_owned(&self, stairway_id: Uuid, offset: i64, limit: i64) -> EngineResult<Vec<FlightRecord>> {
        self.dao.list_owned(stairway_id, offset, limit)
    }

    pub fn get_flight(&self, flight_id: &str) -> EngineResult<FlightRecord> {
        self.dao.get_flight_state(flight_id)
    }

    pub fn force_ready(&self, flight_id: &str) -> EngineResult<()> {
        self.dao.force_ready(flight_id)
    }

    pub fn force_fatal(&self, flight_id: &str) -> EngineResult<()> {
        self.dao.force_fatal(flight_id)
    }

    pub fn input_query(&self, flight_id: &str) -> EngineResult<Vec<(String, String)>> {
        self.dao.input_query(flight_id)
    }

    pub fn log_query(&self, flight_id: &str) -> EngineResult<Vec<FlightLogRecord>> {
        self.dao.log_query(flight_id)
    }

    pub fn list_stairways(&self) -> EngineResult<Vec<(Uuid, String)>> {
        self.dao.list_stairways()
    }
}
