//! C3 — the transactional persistence layer. All operations run under
//! serializable isolation and through the `with_retry` wrapper in
//! `pool.rs`, following the teacher's `PgEventStore::append` shape
//! (`conn.build_transaction().run(...)` wrapped by a classifying retry loop)
//! generalized from a single-table event append to the flight/step/working
//! schema in §6.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use uuid::Uuid;

use stairway_core::{Direction, EngineError, EngineResult, FlightStatus, ParameterMap};

use crate::error::PersistenceError;
use crate::filter::{compile, compile_count, materialize, CompiledQuery, Filter, FlightEnumeration, Pagination, SortDirection};
use crate::pool::{with_retry, ConnectionProvider, RetryBudget};
use crate::rows::{
    FlightInputRow, FlightLogRow, FlightRow, FlightWorkingRow, NewFlightInputRow, NewFlightLogRow, NewFlightRow,
    NewStairwayInstanceRow, NewFlightWorkingRow, StairwayInstanceRow,
};
use crate::schema::{flight, flightinput, flightlog, flightworking, stairway_instance};

/// External, deserialization-free view of a flight row (§4.8 Control surface).
#[derive(Clone, Debug)]
pub struct FlightRecord {
    pub flight_id: String,
    pub class_name: String,
    pub status: FlightStatus,
    pub submit_time: DateTime<Utc>,
    pub completed_time: Option<DateTime<Utc>>,
    pub stairway_id: Option<Uuid>,
    pub serialized_exception: Option<String>,
    pub output_parameters: Option<String>,
}

impl TryFrom<FlightRow> for FlightRecord {
    type Error = PersistenceError;

    fn try_from(row: FlightRow) -> Result<Self, Self::Error> {
        let status = FlightStatus::from_db_str(&row.status)
            .ok_or_else(|| PersistenceError::Unknown(format!("unrecognized flight status: {}", row.status)))?;
        Ok(Self {
            flight_id: row.flight_id,
            class_name: row.class_name,
            status,
            submit_time: row.submit_time,
            completed_time: row.completed_time,
            stairway_id: row.stairway_id,
            serialized_exception: row.serialized_exception,
            output_parameters: row.output_parameters,
        })
    }
}

/// Raw materials for rebuilding a runner's `FlightContext` (§4.3
/// `makeFlightContextById`). The step list itself is rebuilt separately via
/// the flight factory, which needs `class_name` and `inputs`.
#[derive(Clone, Debug)]
pub struct FlightContextRecord {
    pub flight_id: String,
    pub class_name: String,
    pub status: FlightStatus,
    pub inputs: ParameterMap,
    pub working_map: ParameterMap,
    pub step_index: i64,
    pub direction: Direction,
    pub rerun: bool,
}

#[derive(Clone, Debug)]
pub struct FlightLogRecord {
    pub log_time: DateTime<Utc>,
    pub step_index: i64,
    pub direction: Direction,
    pub status: FlightStatus,
    pub rerun: bool,
    pub serialized_exception: Option<String>,
}

impl TryFrom<FlightLogRow> for FlightLogRecord {
    type Error = PersistenceError;

    fn try_from(row: FlightLogRow) -> Result<Self, Self::Error> {
        let direction = Direction::from_db_str(&row.direction)
            .ok_or_else(|| PersistenceError::Unknown(format!("unrecognized direction: {}", row.direction)))?;
        let status = FlightStatus::from_db_str(&row.status)
            .ok_or_else(|| PersistenceError::Unknown(format!("unrecognized flight status: {}", row.status)))?;
        Ok(Self {
            log_time: row.log_time,
            step_index: row.step_index,
            direction,
            status,
            rerun: row.rerun,
            serialized_exception: row.serialized_exception,
        })
    }
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

const ACTIVE_RESUME_STATUSES: [&str; 4] = ["READY", "QUEUED", "WAITING", "READY_TO_RESTART"];

/// The DAO contract §4.3 names. The engine and control surface depend on
/// this trait rather than the concrete Postgres type so that tests can
/// substitute a double.
pub trait FlightDao: Send + Sync {
    fn create(&self, flight_id: &str, class_name: &str, inputs: &ParameterMap, owner: Uuid) -> EngineResult<()>;
    fn submit(&self, flight_id: &str, class_name: &str, inputs: &ParameterMap) -> EngineResult<()>;
    fn step(
        &self,
        flight_id: &str,
        step_index: i64,
        direction: Direction,
        rerun: bool,
        working_map: &ParameterMap,
        serialized_exception: Option<&str>,
    ) -> EngineResult<()>;
    fn exit(
        &self,
        flight_id: &str,
        step_index: i64,
        direction: Direction,
        status: FlightStatus,
        working_map: &ParameterMap,
        serialized_exception: Option<&str>,
        output_parameters: Option<&str>,
    ) -> EngineResult<()>;
    fn queued(&self, flight_id: &str) -> EngineResult<()>;
    fn resume(&self, stairway_id: Uuid, flight_id: &str) -> EngineResult<Option<FlightContextRecord>>;
    fn disown_recovery(&self, stairway_id: Uuid) -> EngineResult<usize>;
    fn get_ready_flights(&self) -> EngineResult<Vec<String>>;
    fn make_flight_context_by_id(&self, flight_id: &str) -> EngineResult<FlightContextRecord>;
    fn get_flight_state(&self, flight_id: &str) -> EngineResult<FlightRecord>;
    fn get_flights(
        &self,
        filter: Option<&Filter>,
        pagination: &Pagination,
        sort: SortDirection,
    ) -> EngineResult<FlightEnumeration<FlightRecord>>;
    fn delete(&self, flight_id: &str, force: bool) -> EngineResult<()>;
    fn clean_completed(&self, older_than: DateTime<Utc>) -> EngineResult<usize>;

    fn register_instance(&self, stairway_name: &str) -> EngineResult<Uuid>;
    fn list_instance_names(&self) -> EngineResult<Vec<String>>;
    fn lookup_instance_id(&self, stairway_name: &str) -> EngineResult<Uuid>;
    fn list_stairways(&self) -> EngineResult<Vec<(Uuid, String)>>;

    fn count_flights(&self, status: Option<FlightStatus>) -> EngineResult<i64>;
    fn count_owned(&self, stairway_id: Uuid) -> EngineResult<i64>;
    fn list_owned(&self, stairway_id: Uuid, offset: i64, limit: i64) -> EngineResult<Vec<FlightRecord>>;
    fn force_ready(&self, flight_id: &str) -> EngineResult<()>;
    fn force_fatal(&self, flight_id: &str) -> EngineResult<()>;
    fn input_query(&self, flight_id: &str) -> EngineResult<Vec<(String, String)>>;
    fn log_query(&self, flight_id: &str) -> EngineResult<Vec<FlightLogRecord>>;
}

pub struct PgFlightDao<P: ConnectionProvider> {
    provider: P,
    retry_budget: RetryBudget,
}

impl<P: ConnectionProvider> PgFlightDao<P> {
    pub fn new(provider: P) -> Self {
        Self { provider, retry_budget: RetryBudget::default() }
    }

    pub fn with_retry_budget(provider: P, retry_budget: RetryBudget) -> Self {
        Self { provider, retry_budget }
    }

    /// Runs `f` inside a serializable transaction, retrying the whole
    /// transaction on the classified-transient errors `with_retry`
    /// recognizes. `PersistenceError` already implements
    /// `From<diesel::result::Error>`, so it can serve directly as the
    /// transaction closure's error type without an intermediate conversion.
    fn run<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: Fn(&mut diesel::pg::PgConnection) -> Result<T, PersistenceError>,
    {
        self.run_raw(f).map_err(EngineError::from)
    }

    fn run_raw<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        F: Fn(&mut diesel::pg::PgConnection) -> Result<T, PersistenceError>,
    {
        let mut conn = self.provider.connection()?;
        with_retry(self.retry_budget, || conn.build_transaction().serializable().run(|c| f(c)))
    }

    /// Reconstructs a flight context from the latest step-log entry and its
    /// working-map snapshot, falling back to an empty working map for a
    /// flight that has never executed a step (§4.3 `makeFlightContextById`).
    fn load_context(conn: &mut diesel::pg::PgConnection, flight_id: &str) -> Result<FlightContextRecord, PersistenceError> {
        let flight_row: FlightRow = flight::table.find(flight_id).first(conn)?;
        let status = FlightStatus::from_db_str(&flight_row.status)
            .ok_or_else(|| PersistenceError::Unknown(format!("unrecognized flight status: {}", flight_row.status)))?;

        let input_rows: Vec<FlightInputRow> = flightinput::table.filter(flightinput::flight_id.eq(flight_id)).load(conn)?;
        let inputs = ParameterMap::from_flight_input_list(input_rows.into_iter().map(|r| (r.key, r.value)).collect());

        let latest_log: Option<FlightLogRow> = flightlog::table
            .filter(flightlog::flight_id.eq(flight_id))
            .order(flightlog::log_time.desc())
            .first(conn)
            .optional()?;

        let (step_index, direction, rerun, working_map) = match &latest_log {
            Some(log_row) => {
                let direction = Direction::from_db_str(&log_row.direction)
                    .ok_or_else(|| PersistenceError::Unknown(format!("unrecognized direction: {}", log_row.direction)))?;
                let working_rows: Vec<FlightWorkingRow> =
                    flightworking::table.filter(flightworking::flightlog_id.eq(log_row.id)).load(conn)?;
                let working_map =
                    ParameterMap::from_flight_input_list(working_rows.into_iter().map(|r| (r.key, r.value)).collect());
                (log_row.step_index, direction, log_row.rerun, working_map)
            }
            None => (0, Direction::Start, false, ParameterMap::new()),
        };

        Ok(FlightContextRecord {
            flight_id: flight_row.flight_id,
            class_name: flight_row.class_name,
            status,
            inputs,
            working_map,
            step_index,
            direction,
            rerun,
        })
    }
}

/// `create`/`submit` are the only operations that turn a unique-key clash
/// into the crate-wide `DuplicateFlightId` kind (§4.3); every other
/// `PersistenceError` falls through to the default `DatabaseError` mapping.
fn dao_insert_error(flight_id: &str, e: PersistenceError) -> EngineError {
    match e {
        PersistenceError::UniqueViolation(_) => EngineError::DuplicateFlightId(flight_id.to_string()),
        other => EngineError::from(other),
    }
}

impl<P: ConnectionProvider> FlightDao for PgFlightDao<P> {
    fn create(&self, flight_id: &str, class_name: &str, inputs: &ParameterMap, owner: Uuid) -> EngineResult<()> {
        let pairs = inputs.make_flight_input_list();
        self.run_raw(move |conn| {
            diesel::insert_into(flight::table)
                .values(NewFlightRow { flight_id, class_name, status: FlightStatus::Running.as_db_str(), stairway_id: Some(owner) })
                .execute(conn)?;
            for (k, v) in &pairs {
                diesel::insert_into(flightinput::table)
                    .values(NewFlightInputRow { flight_id, key: k, value: v })
                    .execute(conn)?;
            }
            Ok(())
        })
        .map_err(|e| dao_insert_error(flight_id, e))
    }

    fn submit(&self, flight_id: &str, class_name: &str, inputs: &ParameterMap) -> EngineResult<()> {
        let pairs = inputs.make_flight_input_list();
        self.run_raw(move |conn| {
            diesel::insert_into(flight::table)
                .values(NewFlightRow { flight_id, class_name, status: FlightStatus::Ready.as_db_str(), stairway_id: None })
                .execute(conn)?;
            for (k, v) in &pairs {
                diesel::insert_into(flightinput::table)
                    .values(NewFlightInputRow { flight_id, key: k, value: v })
                    .execute(conn)?;
            }
            Ok(())
        })
        .map_err(|e| dao_insert_error(flight_id, e))
    }

    fn step(
        &self,
        flight_id: &str,
        step_index: i64,
        direction: Direction,
        rerun: bool,
        working_map: &ParameterMap,
        serialized_exception: Option<&str>,
    ) -> EngineResult<()> {
        let pairs = working_map.make_flight_input_list();
        self.run(move |conn| {
            let log_id = Uuid::new_v4();
            diesel::insert_into(flightlog::table)
                .values(NewFlightLogRow {
                    id: log_id,
                    flight_id,
                    step_index,
                    direction: direction.as_db_str(),
                    status: FlightStatus::Running.as_db_str(),
                    serialized_exception,
                    rerun,
                })
                .execute(conn)?;
            for (k, v) in &pairs {
                diesel::insert_into(flightworking::table)
                    .values(NewFlightWorkingRow { flightlog_id: log_id, key: k, value: v })
                    .execute(conn)?;
            }
            Ok(())
        })
    }

    fn exit(
        &self,
        flight_id: &str,
        step_index: i64,
        direction: Direction,
        status: FlightStatus,
        working_map: &ParameterMap,
        serialized_exception: Option<&str>,
        output_parameters: Option<&str>,
    ) -> EngineResult<()> {
        let pairs = working_map.make_flight_input_list();
        self.run(move |conn| {
            let log_id = Uuid::new_v4();
            diesel::insert_into(flightlog::table)
                .values(NewFlightLogRow {
                    id: log_id,
                    flight_id,
                    step_index,
                    direction: direction.as_db_str(),
                    status: status.as_db_str(),
                    serialized_exception,
                    rerun: false,
                })
                .execute(conn)?;
            for (k, v) in &pairs {
                diesel::insert_into(flightworking::table)
                    .values(NewFlightWorkingRow { flightlog_id: log_id, key: k, value: v })
                    .execute(conn)?;
            }

            let clears_ownership = status.requires_no_ownership();
            let completed_at: Option<DateTime<Utc>> = if status.is_terminal() { Some(Utc::now()) } else { None };

            diesel::update(flight::table.find(flight_id))
                .set((
                    flight::status.eq(status.as_db_str()),
                    flight::serialized_exception.eq(serialized_exception),
                    flight::output_parameters.eq(output_parameters),
                    flight::completed_time.eq(completed_at),
                ))
                .execute(conn)?;

            if clears_ownership {
                diesel::update(flight::table.find(flight_id))
                    .set(flight::stairway_id.eq(None::<Uuid>))
                    .execute(conn)?;
            }
            Ok(())
        })
    }

    fn queued(&self, flight_id: &str) -> EngineResult<()> {
        self.run(move |conn| {
            let affected = diesel::update(
                flight::table.filter(flight::flight_id.eq(flight_id)).filter(flight::status.eq(FlightStatus::Ready.as_db_str())),
            )
            .set(flight::status.eq(FlightStatus::Queued.as_db_str()))
            .execute(conn)?;
            if affected == 0 {
                return Err(PersistenceError::Unknown(format!("flight {flight_id} was not READY")));
            }
            Ok(())
        })
    }

    fn resume(&self, stairway_id: Uuid, flight_id: &str) -> EngineResult<Option<FlightContextRecord>> {
        self.run(move |conn| {
            let affected = diesel::update(
                flight::table
                    .filter(flight::flight_id.eq(flight_id))
                    .filter(flight::status.eq_any(ACTIVE_RESUME_STATUSES))
                    .filter(flight::stairway_id.is_null()),
            )
            .set((flight::status.eq(FlightStatus::Running.as_db_str()), flight::stairway_id.eq(Some(stairway_id))))
            .execute(conn)?;

            if affected == 0 {
                return Ok(None);
            }
            Self::load_context(conn, flight_id).map(Some)
        })
    }

    fn disown_recovery(&self, stairway_id: Uuid) -> EngineResult<usize> {
        self.run(move |conn| {
            let affected = diesel::update(
                flight::table
                    .filter(flight::stairway_id.eq(stairway_id))
                    .filter(flight::status.eq_any(["RUNNING", "WAITING", "READY", "READY_TO_RESTART", "QUEUED"])),
            )
            .set((flight::status.eq(FlightStatus::Ready.as_db_str()), flight::stairway_id.eq(None::<Uuid>)))
            .execute(conn)?;
            Ok(affected)
        })
    }

    fn get_ready_flights(&self) -> EngineResult<Vec<String>> {
        self.run(|conn| {
            let ids = flight::table
                .filter(flight::status.eq(FlightStatus::Ready.as_db_str()))
                .filter(flight::stairway_id.is_null())
                .select(flight::flight_id)
                .load(conn)?;
            Ok(ids)
        })
    }

    fn make_flight_context_by_id(&self, flight_id: &str) -> EngineResult<FlightContextRecord> {
        self.run(move |conn| Self::load_context(conn, flight_id))
    }

    fn get_flight_state(&self, flight_id: &str) -> EngineResult<FlightRecord> {
        self.run(move |conn| {
            let row: FlightRow = flight::table.find(flight_id).first(conn)?;
            FlightRecord::try_from(row)
        })
        .map_err(|e| match e {
            EngineError::FlightNotFound(_) => EngineError::FlightNotFound(flight_id.to_string()),
            other => other,
        })
    }

    fn get_flights(
        &self,
        filter: Option<&Filter>,
        pagination: &Pagination,
        sort: SortDirection,
    ) -> EngineResult<FlightEnumeration<FlightRecord>> {
        let compiled: CompiledQuery = compile(filter, pagination, sort)?;
        let count_query = compile_count(filter);
        let select_sql = materialize(&compiled);
        let count_sql = materialize(&count_query);

        self.run(move |conn| {
            let rows: Vec<FlightRow> = diesel::sql_query(select_sql.clone()).load(conn)?;
            let count_row: CountRow = diesel::sql_query(count_sql.clone()).get_result(conn)?;

            let items = rows
                .into_iter()
                .map(FlightRecord::try_from)
                .collect::<Result<Vec<_>, _>>()?;

            let next_page_token = items
                .last()
                .map(|last| crate::filter::PageToken::new(last.submit_time).encode())
                .transpose()
                .map_err(|e| PersistenceError::Unknown(e.to_string()))?;

            Ok(FlightEnumeration { total: count_row.count.max(0) as usize, next_page_token, items })
        })
    }

    fn delete(&self, flight_id: &str, force: bool) -> EngineResult<()> {
        self.run(move |conn| {
            let row: FlightRow = flight::table.find(flight_id).first(conn)?;
            let status = FlightStatus::from_db_str(&row.status)
                .ok_or_else(|| PersistenceError::Unknown(format!("unrecognized flight status: {}", row.status)))?;
            if status.requires_ownership() && !force {
                return Err(PersistenceError::Unknown(format!("flight {flight_id} is active; force required")));
            }
            diesel::delete(flight::table.find(flight_id)).execute(conn)?;
            Ok(())
        })
    }

    fn clean_completed(&self, older_than: DateTime<Utc>) -> EngineResult<usize> {
        self.run(move |conn| {
            let affected = diesel::delete(
                flight::table.filter(flight::completed_time.is_not_null()).filter(flight::completed_time.lt(older_than)),
            )
            .execute(conn)?;
            Ok(affected)
        })
    }

    fn register_instance(&self, stairway_name: &str) -> EngineResult<Uuid> {
        self.run(move |conn| {
            let existing: Option<StairwayInstanceRow> = stairway_instance::table
                .filter(stairway_instance::stairway_name.eq(stairway_name))
                .first(conn)
                .optional()?;
            if let Some(row) = existing {
                return Ok(row.stairway_id);
            }
            let new_id = Uuid::new_v4();
            diesel::insert_into(stairway_instance::table)
                .values(NewStairwayInstanceRow { stairway_id: new_id, stairway_name })
                .execute(conn)?;
            Ok(new_id)
        })
    }

    fn list_instance_names(&self) -> EngineResult<Vec<String>> {
        self.run(|conn| Ok(stairway_instance::table.select(stairway_instance::stairway_name).load(conn)?))
    }

    fn lookup_instance_id(&self, stairway_name: &str) -> EngineResult<Uuid> {
        self.run(move |conn| {
            let row: StairwayInstanceRow =
                stairway_instance::table.filter(stairway_instance::stairway_name.eq(stairway_name)).first(conn)?;
            Ok(row.stairway_id)
        })
    }

    fn list_stairways(&self) -> EngineResult<Vec<(Uuid, String)>> {
        self.run(|conn| {
            let rows: Vec<StairwayInstanceRow> = stairway_instance::table.load(conn)?;
            Ok(rows.into_iter().map(|r| (r.stairway_id, r.stairway_name)).collect())
        })
    }

    fn count_flights(&self, status: Option<FlightStatus>) -> EngineResult<i64> {
        self.run(move |conn| {
            let count: i64 = match status {
                Some(s) => flight::table.filter(flight::status.eq(s.as_db_str())).count().get_result(conn)?,
                None => flight::table.count().get_result(conn)?,
            };
            Ok(count)
        })
    }

    fn count_owned(&self, stairway_id: Uuid) -> EngineResult<i64> {
        self.run(move |conn| Ok(flight::table.filter(flight::stairway_id.eq(stairway_id)).count().get_result(conn)?))
    }

    fn list_owned(&self, stairway_id: Uuid, offset: i64, limit: i64) -> EngineResult<Vec<FlightRecord>> {
        self.run(move |conn| {
            let rows: Vec<FlightRow> = flight::table
                .filter(flight::stairway_id.eq(stairway_id))
                .order(flight::submit_time.asc())
                .offset(offset)
                .limit(limit)
                .load(conn)?;
            rows.into_iter().map(FlightRecord::try_from).collect::<Result<Vec<_>, _>>()
        })
    }

    fn force_ready(&self, flight_id: &str) -> EngineResult<()> {
        self.run(move |conn| {
            diesel::update(flight::table.find(flight_id))
                .set((flight::status.eq(FlightStatus::Ready.as_db_str()), flight::stairway_id.eq(None::<Uuid>)))
                .execute(conn)?;
            Ok(())
        })
    }

    fn force_fatal(&self, flight_id: &str) -> EngineResult<()> {
        self.run(move |conn| {
            diesel::update(flight::table.find(flight_id))
                .set((
                    flight::status.eq(FlightStatus::Fatal.as_db_str()),
                    flight::stairway_id.eq(None::<Uuid>),
                    flight::completed_time.eq(Some(Utc::now())),
                ))
                .execute(conn)?;
            Ok(())
        })
    }

    fn input_query(&self, flight_id: &str) -> EngineResult<Vec<(String, String)>> {
        self.run(move |conn| {
            let rows: Vec<FlightInputRow> = flightinput::table.filter(flightinput::flight_id.eq(flight_id)).load(conn)?;
            Ok(rows.into_iter().map(|r| (r.key, r.value)).collect())
        })
    }

    fn log_query(&self, flight_id: &str) -> EngineResult<Vec<FlightLogRecord>> {
        self.run(move |conn| {
            let rows: Vec<FlightLogRow> = flightlog::table
                .filter(flightlog::flight_id.eq(flight_id))
                .order(flightlog::log_time.asc())
                .load(conn)?;
            rows.into_iter().map(FlightLogRecord::try_from).collect::<Result<Vec<_>, _>>()
        })
    }
}
