//! Destination wire payloads: flat string keys to string or number values.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Keys the destination reserves for its own fields.
pub mod reserved {
    pub const API_KEY: &str = "_k";
    pub const PERSON: &str = "_p";
    pub const TIMESTAMP: &str = "_t";
    pub const EVENT: &str = "_n";
    pub const DATE_FLAG: &str = "_d";
    pub const IP: &str = "_ip";
    pub const USER_AGENT: &str = "_ua";

    /// Canonical revenue property. Never prefixed.
    pub const BILLING_AMOUNT: &str = "Billing Amount";
    pub const REVENUE: &str = "revenue";
}

/// A single scalar on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Text(String),
    Integer(i64),
    Number(serde_json::Number),
}

impl PayloadValue {
    /// Numeric value from a float. Whole values render without a fraction;
    /// non-finite floats fall back to text.
    pub fn number(value: f64) -> Self {
        if value.fract() == 0.0 && value.abs() < 1e15 {
            return PayloadValue::Integer(value as i64);
        }
        match serde_json::Number::from_f64(value) {
            Some(n) => PayloadValue::Number(n),
            None => PayloadValue::Text(value.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PayloadValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PayloadValue::Integer(i) => Some(*i),
            PayloadValue::Number(n) => n.as_i64(),
            PayloadValue::Text(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PayloadValue::Integer(i) => Some(*i as f64),
            PayloadValue::Number(n) => n.as_f64(),
            PayloadValue::Text(_) => None,
        }
    }
}

impl fmt::Display for PayloadValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadValue::Text(s) => f.write_str(s),
            PayloadValue::Integer(i) => write!(f, "{i}"),
            PayloadValue::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::Text(value)
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::Text(value.to_string())
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Integer(value)
    }
}

impl PartialEq<&str> for PayloadValue {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl PartialEq<i64> for PayloadValue {
    fn eq(&self, other: &i64) -> bool {
        matches!(self, PayloadValue::Integer(i) if i == other)
    }
}

/// Flat key/value payload sent as one destination call.
///
/// Keys are kept sorted so encoded payloads are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, PayloadValue>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Insert only when the key is free. Returns whether the value was stored.
    pub fn insert_vacant(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> bool {
        match self.0.entry(key.into()) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(value.into());
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PayloadValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge `other` into `self`; keys from `other` win.
    pub fn extend(&mut self, other: Payload) {
        self.0.extend(other.0);
    }

    /// `application/x-www-form-urlencoded` form of the payload.
    pub fn to_query_string(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.0 {
            serializer.append_pair(key, &value.to_string());
        }
        serializer.finish()
    }
}

impl std::ops::Index<&str> for Payload {
    type Output = PayloadValue;

    fn index(&self, key: &str) -> &PayloadValue {
        &self.0[key]
    }
}

impl IntoIterator for Payload {
    type Item = (String, PayloadValue);
    type IntoIter = btree_map::IntoIter<String, PayloadValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(String, PayloadValue)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, PayloadValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_encoding() {
        let mut payload = Payload::new();
        payload.insert("_n", "Baked a cake");
        payload.insert("_t", 1389392200_i64);
        payload.insert(reserved::BILLING_AMOUNT, PayloadValue::number(19.95));

        assert_eq!(
            payload.to_query_string(),
            "Billing+Amount=19.95&_n=Baked+a+cake&_t=1389392200"
        );
    }

    #[test]
    fn test_insert_vacant_keeps_existing() {
        let mut payload = Payload::new();
        assert!(payload.insert_vacant("a.b", "first"));
        assert!(!payload.insert_vacant("a.b", "second"));
        assert_eq!(payload["a.b"], "first");
    }

    #[test]
    fn test_extend_overwrites() {
        let mut payload = Payload::new();
        payload.insert("_k", "user supplied");
        let mut reserved = Payload::new();
        reserved.insert("_k", "api-key");
        payload.extend(reserved);
        assert_eq!(payload["_k"], "api-key");
    }

    #[test]
    fn test_serializes_as_flat_json() {
        let mut payload = Payload::new();
        payload.insert("_d", 1_i64);
        payload.insert("plan", "pro");
        payload.insert("revenue", PayloadValue::number(9.5));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({ "_d": 1, "plan": "pro", "revenue": 9.5 }));
    }

    #[test]
    fn test_non_finite_number_becomes_text() {
        assert_eq!(PayloadValue::number(f64::NAN).as_str(), Some("NaN"));
        assert_eq!(PayloadValue::number(2.0).as_f64(), Some(2.0));
    }

    #[test]
    fn test_whole_numbers_render_without_fraction() {
        assert_eq!(PayloadValue::number(30.0), 30_i64);
        assert_eq!(PayloadValue::number(30.0).to_string(), "30");
        assert_eq!(PayloadValue::number(19.5).to_string(), "19.5");
    }
}
