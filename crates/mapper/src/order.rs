//! Order-completed mapping: one event payload plus one property-set payload
//! per line item.
//!
//! The destination drops events that share a timestamp for the same person,
//! so product `i` is stamped `base + i` seconds.

use kissmetrics_core::types::{Properties, Track};
use kissmetrics_core::{ForwarderError, ForwarderResult, Settings};
use serde_json::Value;

use crate::clean::unix_time;
use crate::mapper::{base_track_properties, PRODUCTS_KEY};
use crate::payload::reserved;
use crate::plan::OrderPlan;

pub fn order_completed(message: &Track, settings: &Settings) -> ForwarderResult<OrderPlan> {
    let products = line_items(&message.properties)?;

    // Resolved once so every payload of the order shares the same base.
    let timestamp = message.envelope.timestamp_or_now();
    let base = unix_time(timestamp);
    let label = settings.prefix_properties.then_some(message.event.as_str());

    let mut event = base_track_properties(
        &message.envelope,
        &message.event,
        &message.properties,
        label,
        timestamp,
        settings,
    );
    event.insert(reserved::EVENT, message.event.as_str());

    // Each product maps like a track of the same event, identity and time
    // whose properties are the product's attributes.
    let products = products
        .into_iter()
        .zip(0_i64..)
        .map(|(product, offset)| {
            let mut payload = base_track_properties(
                &message.envelope,
                &message.event,
                product,
                label,
                timestamp,
                settings,
            );
            payload.insert(reserved::TIMESTAMP, base + offset);
            payload
        })
        .collect();

    Ok(OrderPlan { event, products })
}

fn line_items(properties: &Properties) -> ForwarderResult<Vec<&Properties>> {
    match properties.get(PRODUCTS_KEY) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                item.as_object().ok_or_else(|| {
                    ForwarderError::Mapping(format!("products[{index}] must be an object"))
                })
            })
            .collect(),
        Some(other) => Err(ForwarderError::Mapping(format!(
            "products must be a list, got {}",
            json_type(other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
