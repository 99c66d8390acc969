//! C1 — the typed key-value parameter map.
//!
//! Used both for a flight's immutable input map and for its mutable working
//! map. Values are stored internally as their JSON-string encoding so the
//! map can always be lowered to `(key, value)` text pairs for persistence
//! (`flightinput`/`flightworking`), while `get`/`put` still round-trip
//! strongly-typed values through `serde`.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};

/// An ordered-irrelevant string-keyed map of JSON-encoded values.
///
/// `BTreeMap` is used (rather than `HashMap`) so that `toJson`/iteration
/// order is deterministic, which matters for fingerprinting and for tests
/// that compare serialized snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterMap {
    entries: BTreeMap<String, String>,
    immutable: bool,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a typed value under `key`. Fails with `SerializationError` if
    /// `v` cannot be encoded to JSON, or `ImmutableMutation` if
    /// `make_immutable` has already been called.
    pub fn put<T: Serialize>(&mut self, key: impl Into<String>, v: &T) -> EngineResult<()> {
        let text = serde_json::to_string(v)
            .map_err(|e| EngineError::SerializationError(e.to_string()))?;
        self.put_raw(key, text)
    }

    /// Store the raw JSON-text encoding of a value directly.
    pub fn put_raw(&mut self, key: impl Into<String>, value: String) -> EngineResult<()> {
        if self.immutable {
            return Err(EngineError::ImmutableMutation);
        }
        self.entries.insert(key.into(), value);
        Ok(())
    }

    /// Retrieve and decode a typed value. Fails with `SerializationError` if
    /// the key is absent or the stored text does not decode as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> EngineResult<T> {
        let raw = self.get_raw(key)?;
        serde_json::from_str(&raw).map_err(|e| EngineError::SerializationError(e.to_string()))
    }

    pub fn get_raw(&self, key: &str) -> EngineResult<String> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::SerializationError(format!("no such key: {key}")))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Seal the map against further mutation. Irreversible.
    pub fn make_immutable(&mut self) {
        self.immutable = true;
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// Lower the map to the `(key, json-text)` pair list used by
    /// `flightinput`/`flightworking` rows.
    pub fn make_flight_input_list(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Rebuild a map from the list representation (the preferred
    /// persistence-layer form).
    pub fn from_flight_input_list(pairs: Vec<(String, String)>) -> Self {
        Self {
            entries: pairs.into_iter().collect(),
            immutable: false,
        }
    }

    /// Whole-map JSON serialization (legacy fallback form).
    pub fn to_json(&self) -> EngineResult<String> {
        let as_values: BTreeMap<&str, serde_json::Value> = self
            .entries
            .iter()
            .map(|(k, v)| {
                let value: serde_json::Value =
                    serde_json::from_str(v).unwrap_or(serde_json::Value::String(v.clone()));
                (k.as_str(), value)
            })
            .collect();
        serde_json::to_string(&as_values).map_err(|e| EngineError::SerializationError(e.to_string()))
    }

    /// Rebuild a map from a whole-JSON blob (legacy fallback form).
    pub fn from_json(text: &str) -> EngineResult<Self> {
        let as_values: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(text).map_err(|e| EngineError::SerializationError(e.to_string()))?;
        let entries = as_values
            .into_iter()
            .map(|(k, v)| {
                let text = serde_json::to_string(&v).unwrap_or_default();
                (k, text)
            })
            .collect();
        Ok(Self { entries, immutable: false })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_law() {
        let mut m = ParameterMap::new();
        m.put("filename", &"/tmp/x.txt".to_string()).unwrap();
        m.put("count", &3i64).unwrap();
        let got: String = m.get("filename").unwrap();
        assert_eq!(got, "/tmp/x.txt");
        let got_count: i64 = m.get("count").unwrap();
        assert_eq!(got_count, 3);
    }

    #[test]
    fn immutable_after_seal() {
        let mut m = ParameterMap::new();
        m.make_immutable();
        let err = m.put("k", &1i64).unwrap_err();
        assert!(matches!(err, EngineError::ImmutableMutation));
    }

    #[test]
    fn list_round_trip() {
        let mut m = ParameterMap::new();
        m.put("a", &1i64).unwrap();
        m.put("b", &"two".to_string()).unwrap();
        let list = m.make_flight_input_list();
        let rebuilt = ParameterMap::from_flight_input_list(list);
        let a: i64 = rebuilt.get("a").unwrap();
        let b: String = rebuilt.get("b").unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, "two");
    }

    #[test]
    fn missing_key_is_serialization_error() {
        let m = ParameterMap::new();
        let err = m.get::<i64>("missing").unwrap_err();
        assert!(matches!(err, EngineError::SerializationError(_)));
    }
}
