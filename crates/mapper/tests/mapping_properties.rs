//! Property-based tests for the mapping rules.
//!
//! - Reserved fields: `_k`, `_p`, `_t` always reflect settings, identity and time
//! - Prefixing: with `prefix_properties`, every property is renamed except `Billing Amount`
//! - Flatten idempotence: already-flat bags only change by stringification
//! - Dedup offsets: products of one order get `base..base+N` timestamps in order
//! - Identity merge: identify emits an alias iff both identities are present

use chrono::{DateTime, Utc};
use kissmetrics_core::types::{Envelope, Identify, Properties, Track};
use kissmetrics_core::Settings;
use kissmetrics_mapper::mapper::{identify, track};
use kissmetrics_mapper::order::order_completed;
use kissmetrics_mapper::{clean, PayloadValue};
use proptest::prelude::*;
use serde_json::{json, Value};

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000, 0u32..1000)
        .prop_map(|(secs, millis)| DateTime::<Utc>::from_timestamp(secs, millis * 1_000_000).unwrap())
}

fn id_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-z0-9-]{1,16}")
}

fn event_strategy() -> impl Strategy<Value = String> {
    "[A-Z][a-z ]{0,12}".prop_filter("not an order event", |e| {
        !kissmetrics_core::types::is_order_completed(e)
    })
}

fn flat_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-z ]{0,12}".prop_map(Value::String),
        any::<i32>().prop_map(|n| json!(n)),
        any::<bool>().prop_map(Value::Bool),
    ]
}

fn flat_properties_strategy() -> impl Strategy<Value = Properties> {
    prop::collection::btree_map("[a-z]{1,8}", flat_value_strategy(), 0..8)
        .prop_map(|map| map.into_iter().collect())
}

fn envelope(user_id: Option<String>, anonymous_id: Option<String>, ts: DateTime<Utc>) -> Envelope {
    Envelope {
        user_id,
        anonymous_id,
        timestamp: Some(ts),
        ..Default::default()
    }
}

// =============================================================================
// RESERVED FIELDS
// =============================================================================

proptest! {
    #[test]
    fn reserved_fields_round_trip(
        user_id in id_strategy(),
        anonymous_id in id_strategy(),
        ts in timestamp_strategy(),
        api_key in "[a-f0-9]{8,40}",
        properties in flat_properties_strategy(),
    ) {
        let settings = Settings::new(api_key.clone(), false).unwrap();
        let message = Track {
            envelope: envelope(user_id.clone(), anonymous_id.clone(), ts),
            event: "Signed Up".into(),
            properties,
        };
        let payload = track(&message, &settings);

        prop_assert_eq!(payload["_k"].as_str(), Some(api_key.as_str()));
        prop_assert_eq!(payload["_t"].as_i64(), Some(ts.timestamp()));
        let expected_person = user_id.or(anonymous_id);
        prop_assert_eq!(
            payload.get("_p").and_then(PayloadValue::as_str),
            expected_person.as_deref()
        );
    }

    #[test]
    fn identify_aliases_iff_both_identities(
        user_id in id_strategy(),
        anonymous_id in id_strategy(),
        ts in timestamp_strategy(),
    ) {
        let settings = Settings::new("key", false).unwrap();
        let message = Identify {
            envelope: envelope(user_id.clone(), anonymous_id.clone(), ts),
            traits: Properties::new(),
        };
        let out = identify(&message, &settings);
        prop_assert_eq!(out.alias.is_some(), user_id.is_some() && anonymous_id.is_some());
        if let Some(alias) = out.alias {
            prop_assert_eq!(alias["_p"].as_str(), user_id.as_deref());
            prop_assert_eq!(alias["_n"].as_str(), anonymous_id.as_deref());
        }
    }
}

// =============================================================================
// PREFIXING
// =============================================================================

proptest! {
    #[test]
    fn prefixing_renames_every_property(
        event in event_strategy(),
        properties in flat_properties_strategy(),
        revenue in prop::option::of(1u32..100_000),
    ) {
        let settings = Settings::new("key", true).unwrap();
        let mut properties = properties;
        properties.remove("revenue");
        if let Some(cents) = revenue {
            properties.insert("revenue".into(), json!(f64::from(cents) / 100.0));
        }
        let message = Track {
            envelope: envelope(Some("u".into()), None, Utc::now()),
            event: event.clone(),
            properties: properties.clone(),
        };
        let payload = track(&message, &settings);

        for key in properties.keys() {
            let prefixed = format!("{event} - {key}");
            prop_assert!(payload.contains_key(&prefixed), "missing {}", prefixed);
            prop_assert!(!payload.contains_key(key), "bare {} present", key);
        }
        prop_assert_eq!(payload.contains_key("Billing Amount"), revenue.is_some());
        let prefixed_revenue = format!("{event} - Billing Amount");
        prop_assert!(!payload.contains_key(&prefixed_revenue));
    }
}

// =============================================================================
// CLEANING
// =============================================================================

proptest! {
    #[test]
    fn cleaning_flat_bag_only_stringifies(properties in flat_properties_strategy()) {
        let cleaned = clean(&properties);
        prop_assert_eq!(cleaned.len(), properties.len());
        for (key, value) in &properties {
            let expected = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            prop_assert_eq!(cleaned[key.as_str()].as_str(), Some(expected.as_str()));
        }
    }

    #[test]
    fn cleaned_values_are_never_nested(
        outer in "[a-z]{1,6}",
        inner in "[a-z]{1,6}",
        leaf in flat_value_strategy(),
    ) {
        let mut nested = Properties::new();
        nested.insert(inner.clone(), leaf);
        let mut bag = Properties::new();
        bag.insert(outer.clone(), Value::Object(nested));
        let cleaned = clean(&bag);
        prop_assert!(!cleaned.contains_key(&outer));
        let flattened = format!("{outer}.{inner}");
        prop_assert!(cleaned.contains_key(&flattened));
    }
}

// =============================================================================
// ORDER DEDUP OFFSETS
// =============================================================================

proptest! {
    #[test]
    fn product_timestamps_are_offset_in_order(
        count in 0usize..25,
        ts in timestamp_strategy(),
    ) {
        let settings = Settings::new("key", false).unwrap();
        let products: Vec<Value> = (0..count).map(|i| json!({ "position": i })).collect();
        let mut properties = Properties::new();
        properties.insert("products".into(), Value::Array(products));
        let message = Track {
            envelope: envelope(Some("u".into()), None, ts),
            event: "Order Completed".into(),
            properties,
        };

        let plan = order_completed(&message, &settings).unwrap();
        let base = ts.timestamp();
        prop_assert_eq!(plan.event["_t"].as_i64(), Some(base));
        prop_assert_eq!(plan.products.len(), count);
        for (i, product) in plan.products.iter().enumerate() {
            prop_assert_eq!(product["_t"].as_i64(), Some(base + i as i64));
            let position = i.to_string();
            prop_assert_eq!(product["position"].as_str(), Some(position.as_str()));
        }
    }
}
