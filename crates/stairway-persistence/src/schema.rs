//! Diesel table definitions mirroring §6's bit-exact logical schema.

diesel::table! {
    stairway_instance (stairway_id) {
        stairway_id -> Uuid,
        stairway_name -> Text,
    }
}

diesel::table! {
    flight (flight_id) {
        flight_id -> Text,
        class_name -> Text,
        status -> Text,
        submit_time -> Timestamptz,
        completed_time -> Nullable<Timestamptz>,
        stairway_id -> Nullable<Uuid>,
        serialized_exception -> Nullable<Text>,
        output_parameters -> Nullable<Text>,
        output_parameters_version -> Nullable<Integer>,
    }
}

diesel::table! {
    flightinput (flight_id, key) {
        flight_id -> Text,
        key -> Text,
        value -> Text,
    }
}

diesel::table! {
    flightlog (id) {
        id -> Uuid,
        flight_id -> Text,
        log_time -> Timestamptz,
        step_index -> BigInt,
        direction -> Text,
        status -> Text,
        serialized_exception -> Nullable<Text>,
        rerun -> Bool,
    }
}

diesel::table! {
    flightworking (flightlog_id, key) {
        flightlog_id -> Uuid,
        key -> Text,
        value -> Text,
    }
}

diesel::joinable!(flight -> stairway_instance (stairway_id));
diesel::joinable!(flightinput -> flight (flight_id));
diesel::joinable!(flightlog -> flight (flight_id));
diesel::joinable!(flightworking -> flightlog (flightlog_id));

diesel::allow_tables_to_appear_in_same_query!(
    stairway_instance,
    flight,
    flightinput,
    flightlog,
    flightworking,
);
