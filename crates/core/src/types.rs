//! Inbound customer-event messages as produced by the collection pipeline.
//!
//! Messages arrive as JSON with a `type` discriminator and camelCase fields.
//! A `track` whose event name follows the order-completed convention is
//! classified as [`Message::OrderCompleted`] during deserialization.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settings::INTEGRATION_NAME;

/// Arbitrarily nested attribute bag (traits or properties).
pub type Properties = serde_json::Map<String, Value>;

/// Side-channel data attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(flatten)]
    pub extra: Properties,
}

impl Context {
    /// Read a boolean flag from the destination's namespace, either
    /// `context.KISSmetrics.<flag>` or `context.integrations.KISSmetrics.<flag>`.
    pub fn destination_flag(&self, flag: &str) -> bool {
        let direct = self.extra.get(INTEGRATION_NAME);
        let nested = self
            .extra
            .get("integrations")
            .and_then(|integrations| integrations.get(INTEGRATION_NAME));

        [direct, nested]
            .into_iter()
            .flatten()
            .any(|namespace| namespace.get(flag).and_then(Value::as_bool).unwrap_or(false))
    }
}

/// Identity, time and context shared by every non-alias message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: Context,
}

impl Envelope {
    /// Person identifier: the user id when present, else the anonymous id.
    pub fn person(&self) -> Option<&str> {
        non_empty(self.user_id.as_deref()).or_else(|| non_empty(self.anonymous_id.as_deref()))
    }

    /// Both identities are known, so the destination should link them.
    pub fn has_both_identities(&self) -> bool {
        non_empty(self.user_id.as_deref()).is_some()
            && non_empty(self.anonymous_id.as_deref()).is_some()
    }

    pub fn timestamp_or_now(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identify {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub traits: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub group_id: String,
    #[serde(default)]
    pub traits: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub event: String,
    #[serde(default)]
    pub properties: Properties,
}

impl Track {
    pub fn is_order_completed(&self) -> bool {
        is_order_completed(&self.event)
    }
}

/// A page view. Also used for screens, which share the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub properties: Properties,
}

impl Page {
    /// Name and category joined, whichever are present.
    pub fn full_name(&self) -> Option<String> {
        match (non_empty(self.category.as_deref()), non_empty(self.name.as_deref())) {
            (Some(category), Some(name)) => Some(format!("{category} {name}")),
            (None, Some(name)) => Some(name.to_string()),
            (Some(category), None) => Some(category.to_string()),
            (None, None) => None,
        }
    }
}

pub type Screen = Page;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    #[serde(alias = "previousId")]
    pub from: String,
    #[serde(alias = "userId")]
    pub to: String,
    #[serde(default)]
    pub context: Context,
}

/// One inbound message, classified by variant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "WireMessage")]
pub enum Message {
    Identify(Identify),
    Group(Group),
    Track(Track),
    Page(Page),
    Screen(Screen),
    Alias(Alias),
    /// A track whose event name follows the order-completed convention.
    OrderCompleted(Track),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireMessage {
    Identify(Identify),
    Group(Group),
    Track(Track),
    Page(Page),
    Screen(Screen),
    Alias(Alias),
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        match wire {
            WireMessage::Identify(m) => Message::Identify(m),
            WireMessage::Group(m) => Message::Group(m),
            WireMessage::Track(m) if m.is_order_completed() => Message::OrderCompleted(m),
            WireMessage::Track(m) => Message::Track(m),
            WireMessage::Page(m) => Message::Page(m),
            WireMessage::Screen(m) => Message::Screen(m),
            WireMessage::Alias(m) => Message::Alias(m),
        }
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Identify(_) => MessageKind::Identify,
            Message::Group(_) => MessageKind::Group,
            Message::Track(_) => MessageKind::Track,
            Message::Page(_) => MessageKind::Page,
            Message::Screen(_) => MessageKind::Screen,
            Message::Alias(_) => MessageKind::Alias,
            Message::OrderCompleted(_) => MessageKind::OrderCompleted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Identify,
    Group,
    Track,
    Page,
    Screen,
    Alias,
    OrderCompleted,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Identify => "identify",
            MessageKind::Group => "group",
            MessageKind::Track => "track",
            MessageKind::Page => "page",
            MessageKind::Screen => "screen",
            MessageKind::Alias => "alias",
            MessageKind::OrderCompleted => "order_completed",
        };
        f.write_str(name)
    }
}

/// Matches "Completed Order" / "Order Completed", ignoring case, spaces and
/// underscores.
pub fn is_order_completed(event: &str) -> bool {
    let squashed: String = event
        .chars()
        .filter(|c| *c != ' ' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect();
    squashed == "completedorder" || squashed == "ordercompleted"
}

/// Revenue carried by a track's properties. Order-completed events fall back
/// to `total`. Zero counts as unset.
pub fn revenue(event: &str, properties: &Properties) -> Option<f64> {
    let explicit = properties.get("revenue").and_then(as_number);
    let amount = match explicit {
        Some(v) if v != 0.0 => Some(v),
        _ if is_order_completed(event) => properties.get("total").and_then(as_number),
        _ => None,
    };
    amount.filter(|v| *v != 0.0 && v.is_finite())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace(['$', ','], "").trim().parse().ok(),
        _ => None,
    }
}
