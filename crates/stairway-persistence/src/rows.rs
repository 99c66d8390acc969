//! Diesel row types mirroring the schema tables in `schema.rs`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::{flight, flightinput, flightlog, flightworking, stairway_instance};

#[derive(Queryable, QueryableByName, Identifiable, Debug, Clone)]
#[diesel(table_name = flight)]
#[diesel(primary_key(flight_id))]
pub struct FlightRow {
    pub flight_id: String,
    pub class_name: String,
    pub status: String,
    pub submit_time: DateTime<Utc>,
    pub completed_time: Option<DateTime<Utc>>,
    pub stairway_id: Option<Uuid>,
    pub serialized_exception: Option<String>,
    pub output_parameters: Option<String>,
    pub output_parameters_version: Option<i32>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = flight)]
pub struct NewFlightRow<'a> {
    pub flight_id: &'a str,
    pub class_name: &'a str,
    pub status: &'a str,
    pub stairway_id: Option<Uuid>,
}

#[derive(Queryable, Identifiable, Debug, Clone)]
#[diesel(table_name = flightinput)]
#[diesel(primary_key(flight_id, key))]
pub struct FlightInputRow {
    pub flight_id: String,
    pub key: String,
    pub value: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = flightinput)]
pub struct NewFlightInputRow<'a> {
    pub flight_id: &'a str,
    pub key: &'a str,
    pub value: &'a str,
}

#[derive(Queryable, Identifiable, Debug, Clone)]
#[diesel(table_name = flightlog)]
pub struct FlightLogRow {
    pub id: Uuid,
    pub flight_id: String,
    pub log_time: DateTime<Utc>,
    pub step_index: i64,
    pub direction: String,
    pub status: String,
    pub serialized_exception: Option<String>,
    pub rerun: bool,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = flightlog)]
pub struct NewFlightLogRow<'a> {
    pub id: Uuid,
    pub flight_id: &'a str,
    pub step_index: i64,
    pub direction: &'a str,
    pub status: &'a str,
    pub serialized_exception: Option<&'a str>,
    pub rerun: bool,
}

#[derive(Queryable, Identifiable, Debug, Clone)]
#[diesel(table_name = flightworking)]
#[diesel(primary_key(flightlog_id, key))]
pub struct FlightWorkingRow {
    pub flightlog_id: Uuid,
    pub key: String,
    pub value: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = flightworking)]
pub struct NewFlightWorkingRow<'a> {
    pub flightlog_id: Uuid,
    pub key: &'a str,
    pub value: &'a str,
}

#[derive(Queryable, Identifiable, Debug, Clone)]
#[diesel(table_name = stairway_instance)]
#[diesel(primary_key(stairway_id))]
pub struct StairwayInstanceRow {
    pub stairway_id: Uuid,
    pub stairway_name: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = stairway_instance)]
pub struct NewStairwayInstanceRow<'a> {
    pub stairway_id: Uuid,
    pub stairway_name: &'a str,
}
