mod test_support;

use chrono::Utc;
use stairway_core::{Direction, FlightStatus, ParameterMap};
use stairway_persistence::FlightDao;
use test_support::with_dao;
use uuid::Uuid;

fn fresh_inputs() -> ParameterMap {
    let mut m = ParameterMap::new();
    m.put("filename", &"/tmp/stairway-test.txt".to_string()).unwrap();
    m
}

#[test]
fn create_then_get_flight_state_round_trips() {
    let ran = with_dao(|dao| {
        let flight_id = format!("flt-{}", Uuid::new_v4());
        let owner = Uuid::new_v4();
        dao.create(&flight_id, "DemoFlight", &fresh_inputs(), owner).unwrap();

        let record = dao.get_flight_state(&flight_id).unwrap();
        assert_eq!(record.class_name, "DemoFlight");
        assert_eq!(record.status, FlightStatus::Running);
        assert_eq!(record.stairway_id, Some(owner));

        let inputs = dao.input_query(&flight_id).unwrap();
        assert!(inputs.iter().any(|(k, _)| k == "filename"));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

#[test]
fn duplicate_create_is_rejected() {
    let ran = with_dao(|dao| {
        let flight_id = format!("flt-{}", Uuid::new_v4());
        dao.create(&flight_id, "DemoFlight", &fresh_inputs(), Uuid::new_v4()).unwrap();
        let err = dao.create(&flight_id, "DemoFlight", &fresh_inputs(), Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, stairway_core::EngineError::DuplicateFlightId(_)));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

#[test]
fn step_then_exit_records_log_and_clears_ownership() {
    let ran = with_dao(|dao| {
        let flight_id = format!("flt-{}", Uuid::new_v4());
        let owner = Uuid::new_v4();
        dao.create(&flight_id, "DemoFlight", &fresh_inputs(), owner).unwrap();

        let mut working = ParameterMap::new();
        working.put("partial", &1i64).unwrap();
        dao.step(&flight_id, 0, Direction::Do, false, &working, None).unwrap();

        let mut final_working = ParameterMap::new();
        final_working.put("partial", &2i64).unwrap();
        dao.exit(&flight_id, 1, Direction::Do, FlightStatus::Success, &final_working, None, Some("{}")).unwrap();

        let record = dao.get_flight_state(&flight_id).unwrap();
        assert_eq!(record.status, FlightStatus::Success);
        assert!(record.stairway_id.is_none());
        assert!(record.completed_time.is_some());

        let log = dao.log_query(&flight_id).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].step_index, 0);
        assert_eq!(log[1].step_index, 1);
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

#[test]
fn resume_is_won_by_exactly_one_caller() {
    let ran = with_dao(|dao| {
        let flight_id = format!("flt-{}", Uuid::new_v4());
        dao.submit(&flight_id, "DemoFlight", &fresh_inputs()).unwrap();

        let winner = Uuid::new_v4();
        let loser = Uuid::new_v4();
        let first = dao.resume(winner, &flight_id).unwrap();
        let second = dao.resume(loser, &flight_id).unwrap();

        assert!(first.is_some());
        assert!(second.is_none());

        let record = dao.get_flight_state(&flight_id).unwrap();
        assert_eq!(record.stairway_id, Some(winner));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

#[test]
fn disown_recovery_frees_owned_non_terminal_flights() {
    let ran = with_dao(|dao| {
        let flight_id = format!("flt-{}", Uuid::new_v4());
        let owner = Uuid::new_v4();
        dao.create(&flight_id, "DemoFlight", &fresh_inputs(), owner).unwrap();

        let affected = dao.disown_recovery(owner).unwrap();
        assert_eq!(affected, 1);

        let record = dao.get_flight_state(&flight_id).unwrap();
        assert_eq!(record.status, FlightStatus::Ready);
        assert!(record.stairway_id.is_none());

        let ready = dao.get_ready_flights().unwrap();
        assert!(ready.contains(&flight_id));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

#[test]
fn delete_refuses_active_flight_without_force() {
    let ran = with_dao(|dao| {
        let flight_id = format!("flt-{}", Uuid::new_v4());
        dao.create(&flight_id, "DemoFlight", &fresh_inputs(), Uuid::new_v4()).unwrap();

        assert!(dao.delete(&flight_id, false).is_err());
        dao.delete(&flight_id, true).unwrap();
        assert!(dao.get_flight_state(&flight_id).is_err());
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

#[test]
fn clean_completed_deletes_only_old_terminal_flights() {
    let ran = with_dao(|dao| {
        let flight_id = format!("flt-{}", Uuid::new_v4());
        dao.create(&flight_id, "DemoFlight", &fresh_inputs(), Uuid::new_v4()).unwrap();
        dao.exit(&flight_id, 0, Direction::Do, FlightStatus::Success, &ParameterMap::new(), None, Some("{}")).unwrap();

        let affected = dao.clean_completed(Utc::now() + chrono::Duration::seconds(5)).unwrap();
        assert!(affected >= 1);
        assert!(dao.get_flight_state(&flight_id).is_err());
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}
