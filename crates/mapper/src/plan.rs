//! Mapper output: the destination calls a message turns into.

use serde::Serialize;

use crate::payload::Payload;

/// Destination API path a payload is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Endpoint {
    /// Person properties.
    #[serde(rename = "/s")]
    Set,
    /// Events.
    #[serde(rename = "/e")]
    Event,
    /// Identity links.
    #[serde(rename = "/a")]
    Alias,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Set => "/s",
            Endpoint::Event => "/e",
            Endpoint::Alias => "/a",
        }
    }
}

/// One outbound call: a payload and where it goes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Call {
    #[serde(rename = "path")]
    pub endpoint: Endpoint,
    pub payload: Payload,
}

impl Call {
    pub fn new(endpoint: Endpoint, payload: Payload) -> Self {
        Self { endpoint, payload }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifyPayloads {
    pub identify: Payload,
    /// Links the anonymous visitor to the identified user.
    pub alias: Option<Payload>,
}

/// Payloads for an order: one event, then one property set per line item in
/// source order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPlan {
    pub event: Payload,
    pub products: Vec<Payload>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MappedMessage {
    Identify(IdentifyPayloads),
    Group(Payload),
    Track(Payload),
    Page(Payload),
    Screen(Payload),
    Alias(Payload),
    OrderCompleted(OrderPlan),
}

impl MappedMessage {
    pub fn call_count(&self) -> usize {
        match self {
            MappedMessage::Identify(p) => 1 + usize::from(p.alias.is_some()),
            MappedMessage::OrderCompleted(plan) => 1 + plan.products.len(),
            _ => 1,
        }
    }

    /// Calls in the order they are dispatched.
    pub fn into_calls(self) -> Vec<Call> {
        match self {
            MappedMessage::Identify(IdentifyPayloads { identify, alias }) => {
                let mut calls = vec![Call::new(Endpoint::Set, identify)];
                calls.extend(alias.map(|alias| Call::new(Endpoint::Alias, alias)));
                calls
            }
            MappedMessage::Group(payload) => vec![Call::new(Endpoint::Set, payload)],
            MappedMessage::Track(payload)
            | MappedMessage::Page(payload)
            | MappedMessage::Screen(payload) => vec![Call::new(Endpoint::Event, payload)],
            MappedMessage::Alias(payload) => vec![Call::new(Endpoint::Alias, payload)],
            MappedMessage::OrderCompleted(OrderPlan { event, products }) => {
                std::iter::once(Call::new(Endpoint::Event, event))
                    .chain(products.into_iter().map(|p| Call::new(Endpoint::Set, p)))
                    .collect()
            }
        }
    }
}
