//! IP address and user agent attachment.
//!
//! `_ip` and `_ua` are only sent when the message's context opts in through
//! the destination's `trackIp` / `trackUserAgent` flags. The session-start
//! event always carries both.

use kissmetrics_core::types::Context;

use crate::payload::{reserved, Payload};

/// Event name that always carries IP and user agent.
pub const SESSION_START_EVENT: &str = "Session Started";

pub const TRACK_IP_FLAG: &str = "trackIp";
pub const TRACK_USER_AGENT_FLAG: &str = "trackUserAgent";

/// Attach `_ip` / `_ua` to `payload` when allowed for this context and event.
pub fn attach(payload: &mut Payload, context: &Context, event: Option<&str>) {
    let session_start = event == Some(SESSION_START_EVENT);

    if let Some(ip) = context.ip.as_deref().filter(|ip| !ip.is_empty()) {
        if session_start || context.destination_flag(TRACK_IP_FLAG) {
            payload.insert(reserved::IP, ip);
        }
    }
    if let Some(agent) = context.user_agent.as_deref().filter(|ua| !ua.is_empty()) {
        if session_start || context.destination_flag(TRACK_USER_AGENT_FLAG) {
            payload.insert(reserved::USER_AGENT, agent);
        }
    }
}
