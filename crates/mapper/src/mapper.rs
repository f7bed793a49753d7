//! Per-variant mapping rules.
//!
//! Every function here is a pure function of a message and the destination
//! settings. Reserved fields are merged after user properties so they always
//! win over same-named properties.

use chrono::{DateTime, Utc};
use kissmetrics_core::types::{self, Alias, Envelope, Group, Identify, Message, Page, Properties, Screen, Track};
use kissmetrics_core::{ForwarderResult, Settings};
use serde_json::Value;
use tracing::debug;

use crate::clean::{clean, unix_time};
use crate::order::order_completed;
use crate::payload::{reserved, Payload, PayloadValue};
use crate::pii;
use crate::plan::{IdentifyPayloads, MappedMessage};

/// Key that marks line items; never sent as a property.
pub(crate) const PRODUCTS_KEY: &str = "products";

/// Map any message. Settings are validated before anything is built.
pub fn map(message: &Message, settings: &Settings) -> ForwarderResult<MappedMessage> {
    settings.validate()?;

    let mapped = match message {
        Message::Identify(m) => MappedMessage::Identify(identify(m, settings)),
        Message::Group(m) => MappedMessage::Group(group(m, settings)),
        Message::Track(m) => MappedMessage::Track(track(m, settings)),
        Message::Page(m) => MappedMessage::Page(page(m, settings)),
        Message::Screen(m) => MappedMessage::Screen(screen(m, settings)),
        Message::Alias(m) => MappedMessage::Alias(alias(m, settings)),
        Message::OrderCompleted(m) => MappedMessage::OrderCompleted(order_completed(m, settings)?),
    };

    debug!(kind = %message.kind(), calls = mapped.call_count(), "message mapped");
    Ok(mapped)
}

pub fn identify(message: &Identify, settings: &Settings) -> IdentifyPayloads {
    let envelope = &message.envelope;
    let mut payload = clean(&message.traits);
    payload.extend(reserved_fields(envelope, envelope.timestamp_or_now(), settings));
    pii::attach(&mut payload, &envelope.context, None);

    let alias = match (&envelope.user_id, &envelope.anonymous_id) {
        (Some(user_id), Some(anonymous_id)) if envelope.has_both_identities() => {
            let mut alias = Payload::new();
            alias.insert(reserved::API_KEY, settings.api_key.as_str());
            alias.insert(reserved::PERSON, user_id.as_str());
            alias.insert(reserved::EVENT, anonymous_id.as_str());
            Some(alias)
        }
        _ => None,
    };

    IdentifyPayloads {
        identify: payload,
        alias,
    }
}

pub fn group(message: &Group, settings: &Settings) -> Payload {
    let envelope = &message.envelope;
    let mut payload = prefix("Group", clean(&message.traits));
    payload.insert("Group - id", message.group_id.as_str());
    payload.extend(reserved_fields(envelope, envelope.timestamp_or_now(), settings));
    pii::attach(&mut payload, &envelope.context, None);
    payload
}

pub fn track(message: &Track, settings: &Settings) -> Payload {
    let label = settings.prefix_properties.then_some(message.event.as_str());
    let mut payload = base_track_properties(
        &message.envelope,
        &message.event,
        &message.properties,
        label,
        message.envelope.timestamp_or_now(),
        settings,
    );
    payload.insert(reserved::EVENT, message.event.as_str());
    payload
}

/// Page views are sent as `Viewed <name> Page` events with every property
/// prefixed `Page - `, whatever `prefix_properties` says.
pub fn page(message: &Page, settings: &Settings) -> Payload {
    view(message, "Page", settings)
}

pub fn screen(message: &Screen, settings: &Settings) -> Payload {
    view(message, "Screen", settings)
}

fn view(message: &Page, label: &str, settings: &Settings) -> Payload {
    let event = match message.full_name() {
        Some(name) => format!("Viewed {name} {label}"),
        None => format!("Loaded a {label}"),
    };

    let mut properties = message.properties.clone();
    if let Some(name) = &message.name {
        properties.insert("name".into(), Value::String(name.clone()));
    }
    if let Some(category) = &message.category {
        properties.insert("category".into(), Value::String(category.clone()));
    }

    let mut payload = base_track_properties(
        &message.envelope,
        &event,
        &properties,
        Some(label),
        message.envelope.timestamp_or_now(),
        settings,
    );
    payload.insert(reserved::EVENT, event);
    payload
}

pub fn alias(message: &Alias, settings: &Settings) -> Payload {
    let mut payload = Payload::new();
    payload.insert(reserved::API_KEY, settings.api_key.as_str());
    payload.insert(reserved::PERSON, message.from.as_str());
    payload.insert(reserved::EVENT, message.to.as_str());
    pii::attach(&mut payload, &message.context, None);
    payload
}

/// Shared body of every track-like payload: cleaned properties without
/// `products`, revenue as both `revenue` and `Billing Amount`, optional
/// prefixing with `label`, then the reserved fields.
pub(crate) fn base_track_properties(
    envelope: &Envelope,
    event: &str,
    properties: &Properties,
    label: Option<&str>,
    timestamp: DateTime<Utc>,
    settings: &Settings,
) -> Payload {
    let mut payload = if properties.contains_key(PRODUCTS_KEY) {
        let mut without_products = properties.clone();
        without_products.remove(PRODUCTS_KEY);
        clean(&without_products)
    } else {
        clean(properties)
    };

    if let Some(revenue) = types::revenue(event, properties) {
        payload.insert(reserved::REVENUE, PayloadValue::number(revenue));
        payload.insert(reserved::BILLING_AMOUNT, PayloadValue::number(revenue));
    }

    if let Some(label) = label {
        payload = prefix(label, payload);
    }

    payload.extend(reserved_fields(envelope, timestamp, settings));
    pii::attach(&mut payload, &envelope.context, Some(event));
    payload
}

fn reserved_fields(envelope: &Envelope, timestamp: DateTime<Utc>, settings: &Settings) -> Payload {
    let mut fields = Payload::new();
    fields.insert(reserved::DATE_FLAG, 1_i64);
    fields.insert(reserved::API_KEY, settings.api_key.as_str());
    if let Some(person) = envelope.person() {
        fields.insert(reserved::PERSON, person);
    }
    fields.insert(reserved::TIMESTAMP, unix_time(timestamp));
    fields
}

/// `key -> "<label> - <key>"` for every key except `Billing Amount`.
pub fn prefix(label: &str, payload: Payload) -> Payload {
    payload
        .into_iter()
        .map(|(key, value)| {
            if key == reserved::BILLING_AMOUNT {
                (key, value)
            } else {
                (format!("{label} - {key}"), value)
            }
        })
        .collect()
}
