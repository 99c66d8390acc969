//! `createFlightId` — a 22-char base64url UUID (§6 Engine public API).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use uuid::Uuid;

/// A fresh, client-ready flight id: a random UUIDv4 encoded as 22 base64url
/// characters (no padding — 128 bits encode to exactly 22 chars).
pub fn create_flight_id() -> String {
    let uuid = Uuid::new_v4();
    URL_SAFE_NO_PAD.encode(uuid.as_bytes())
}

/// A fresh stairway instance id (UUID, used verbatim as the DB key).
pub fn create_instance_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flight_id_is_22_chars() {
        let id = create_flight_id();
        assert_eq!(id.len(), 22);
    }

    #[test]
    fn flight_ids_are_distinct() {
        assert_ne!(create_flight_id(), create_flight_id());
    }
}
