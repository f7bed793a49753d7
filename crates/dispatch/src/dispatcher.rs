//! Dispatch choreography: maps a message and sends the resulting calls in
//! the order the destination needs them.
//!
//! Most messages are a single call. Identify sends the person's properties
//! and then, if both identities are known, the alias linking them. An order
//! sends its event first and only on success fans out one property call per
//! product concurrently. Every product call runs to completion; the order
//! fails with the lowest-indexed product failure.

use std::sync::Arc;

use futures::future::join_all;
use kissmetrics_core::types::{Message, MessageKind};
use kissmetrics_core::{DispatchStage, ForwarderError, ForwarderResult, Settings, TransportError};
use kissmetrics_mapper::{map, Call, Endpoint, IdentifyPayloads, MappedMessage, OrderPlan};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::transport::{Transport, TransportResponse};

/// A call that the destination accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallOutcome {
    pub path: &'static str,
    pub status: u16,
}

/// Summary of one delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub kind: MessageKind,
    pub calls: Vec<CallOutcome>,
}

impl DispatchReport {
    fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            calls: Vec::new(),
        }
    }

    fn record(&mut self, call: &Call, response: TransportResponse) {
        self.calls.push(CallOutcome {
            path: call.endpoint.path(),
            status: response.status,
        });
    }
}

pub struct Dispatcher {
    settings: Settings,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    /// Settings are validated here so no call is attempted with a bad key.
    pub fn new(settings: Settings, transport: Arc<dyn Transport>) -> ForwarderResult<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            transport,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Map without sending.
    pub fn plan(&self, message: &Message) -> ForwarderResult<MappedMessage> {
        map(message, &self.settings)
    }

    pub async fn dispatch(&self, message: &Message) -> ForwarderResult<DispatchReport> {
        let kind = message.kind();
        let mapped = map(message, &self.settings)?;
        metrics::counter!("kissmetrics.messages").increment(1);

        let mut report = DispatchReport::new(kind);
        let result = self.run(mapped, &mut report).await;

        match &result {
            Ok(()) => info!(%kind, calls = report.calls.len(), "message delivered"),
            Err(e) => warn!(%kind, error = %e, "message delivery failed"),
        }
        result.map(|()| report)
    }

    async fn run(&self, mapped: MappedMessage, report: &mut DispatchReport) -> ForwarderResult<()> {
        match mapped {
            MappedMessage::Identify(IdentifyPayloads { identify, alias }) => {
                self.send_stage(DispatchStage::Identify, Call::new(Endpoint::Set, identify), report)
                    .await?;
                if let Some(alias) = alias {
                    self.send_stage(DispatchStage::AliasMerge, Call::new(Endpoint::Alias, alias), report)
                        .await?;
                }
                Ok(())
            }
            MappedMessage::Group(payload) => {
                self.send_stage(DispatchStage::Group, Call::new(Endpoint::Set, payload), report)
                    .await
            }
            MappedMessage::Track(payload) => {
                self.send_stage(DispatchStage::Track, Call::new(Endpoint::Event, payload), report)
                    .await
            }
            MappedMessage::Page(payload) => {
                self.send_stage(DispatchStage::Page, Call::new(Endpoint::Event, payload), report)
                    .await
            }
            MappedMessage::Screen(payload) => {
                self.send_stage(DispatchStage::Screen, Call::new(Endpoint::Event, payload), report)
                    .await
            }
            MappedMessage::Alias(payload) => {
                self.send_stage(DispatchStage::Alias, Call::new(Endpoint::Alias, payload), report)
                    .await
            }
            MappedMessage::OrderCompleted(plan) => self.dispatch_order(plan, report).await,
        }
    }

    async fn dispatch_order(&self, plan: OrderPlan, report: &mut DispatchReport) -> ForwarderResult<()> {
        let OrderPlan { event, products } = plan;
        self.send_stage(DispatchStage::OrderEvent, Call::new(Endpoint::Event, event), report)
            .await?;

        let calls: Vec<Call> = products
            .into_iter()
            .map(|payload| Call::new(Endpoint::Set, payload))
            .collect();
        let results = join_all(calls.iter().map(|call| self.send(call))).await;

        let mut first_failure = None;
        for (index, (call, result)) in calls.iter().zip(results).enumerate() {
            match result {
                Ok(response) => report.record(call, response),
                Err(source) => {
                    warn!(index, error = %source, "order product call failed");
                    if first_failure.is_none() {
                        first_failure = Some(ForwarderError::Dispatch {
                            stage: DispatchStage::OrderProduct(index),
                            source,
                        });
                    }
                }
            }
        }

        first_failure.map_or(Ok(()), Err)
    }

    async fn send_stage(
        &self,
        stage: DispatchStage,
        call: Call,
        report: &mut DispatchReport,
    ) -> ForwarderResult<()> {
        let response = self
            .send(&call)
            .await
            .map_err(|source| ForwarderError::Dispatch { stage, source })?;
        report.record(&call, response);
        Ok(())
    }

    async fn send(&self, call: &Call) -> Result<TransportResponse, TransportError> {
        let path = call.endpoint.path();
        metrics::counter!("kissmetrics.calls", "path" => path).increment(1);

        let result = self.transport.send(call).await;
        match &result {
            Ok(response) => debug!(path, status = response.status, "destination call succeeded"),
            Err(_) => metrics::counter!("kissmetrics.call_failures", "path" => path).increment(1),
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transport::RecordingTransport;
    use serde_json::json;

    fn settings() -> Settings {
        Settings::new("key", false).unwrap()
    }

    fn message(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    fn order_message() -> Message {
        message(json!({
            "type": "track",
            "userId": "u1",
            "event": "Order Completed",
            "timestamp": "2014-01-10T22:16:40Z",
            "properties": {
                "total": 30,
                "products": [{ "sku": "a" }, { "sku": "b" }, { "sku": "c" }]
            }
        }))
    }

    fn dispatcher(transport: Arc<RecordingTransport>) -> Dispatcher {
        Dispatcher::new(settings(), transport).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_settings() {
        let settings = Settings {
            api_key: " ".into(),
            prefix_properties: false,
        };
        let result = Dispatcher::new(settings, Arc::new(RecordingTransport::new()));
        assert!(matches!(result, Err(ForwarderError::Config(_))));
    }

    #[tokio::test]
    async fn test_track_is_one_event_call() {
        let transport = Arc::new(RecordingTransport::new());
        let report = dispatcher(transport.clone())
            .dispatch(&message(json!({ "type": "track", "userId": "u1", "event": "Clicked" })))
            .await
            .unwrap();

        assert_eq!(report.kind, MessageKind::Track);
        assert_eq!(report.calls, vec![CallOutcome { path: "/e", status: 200 }]);
        assert_eq!(transport.paths(), vec!["/e"]);
    }

    #[tokio::test]
    async fn test_variant_paths() {
        let cases = [
            (json!({ "type": "group", "userId": "u1", "groupId": "g1" }), vec!["/s"]),
            (json!({ "type": "page", "userId": "u1", "name": "Home" }), vec!["/e"]),
            (json!({ "type": "screen", "userId": "u1", "name": "Home" }), vec!["/e"]),
            (json!({ "type": "alias", "previousId": "a", "userId": "b" }), vec!["/a"]),
            (json!({ "type": "identify", "userId": "u1" }), vec!["/s"]),
        ];
        for (value, expected) in cases {
            let transport = Arc::new(RecordingTransport::new());
            dispatcher(transport.clone())
                .dispatch(&message(value))
                .await
                .unwrap();
            assert_eq!(transport.paths(), expected);
        }
    }

    #[tokio::test]
    async fn test_identify_sends_alias_after_set() {
        let transport = Arc::new(RecordingTransport::new());
        let report = dispatcher(transport.clone())
            .dispatch(&message(json!({
                "type": "identify",
                "userId": "u1",
                "anonymousId": "a1"
            })))
            .await
            .unwrap();

        assert_eq!(transport.paths(), vec!["/s", "/a"]);
        assert_eq!(report.calls.len(), 2);
        let alias = &transport.calls()[1].payload;
        assert_eq!(alias["_p"], "u1");
        assert_eq!(alias["_n"], "a1");
    }

    #[tokio::test]
    async fn test_identify_failure_skips_alias() {
        let transport =
            Arc::new(RecordingTransport::new().failing_when(|c| c.endpoint == Endpoint::Set));
        let err = dispatcher(transport.clone())
            .dispatch(&message(json!({
                "type": "identify",
                "userId": "u1",
                "anonymousId": "a1"
            })))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(DispatchStage::Identify));
        assert_eq!(transport.paths(), vec!["/s"]);
    }

    #[tokio::test]
    async fn test_order_sends_event_then_every_product() {
        let transport = Arc::new(RecordingTransport::new());
        let report = dispatcher(transport.clone())
            .dispatch(&order_message())
            .await
            .unwrap();

        assert_eq!(report.kind, MessageKind::OrderCompleted);
        assert_eq!(transport.paths(), vec!["/e", "/s", "/s", "/s"]);
        assert_eq!(report.calls.len(), 4);
    }

    #[tokio::test]
    async fn test_order_event_failure_sends_no_products() {
        let transport =
            Arc::new(RecordingTransport::new().failing_when(|c| c.endpoint == Endpoint::Event));
        let err = dispatcher(transport.clone())
            .dispatch(&order_message())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(DispatchStage::OrderEvent));
        assert_eq!(transport.paths(), vec!["/e"]);
    }

    #[tokio::test]
    async fn test_order_product_failure_reports_lowest_index() {
        let transport = Arc::new(RecordingTransport::new().failing_when(|c| {
            c.endpoint == Endpoint::Set
                && matches!(c.payload.get("sku").and_then(|v| v.as_str()), Some("b" | "c"))
        }));
        let err = dispatcher(transport.clone())
            .dispatch(&order_message())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(DispatchStage::OrderProduct(1)));
        // Every product was still attempted.
        assert_eq!(transport.paths(), vec!["/e", "/s", "/s", "/s"]);
    }

    #[tokio::test]
    async fn test_mapping_error_sends_nothing() {
        let transport = Arc::new(RecordingTransport::new());
        let err = dispatcher(transport.clone())
            .dispatch(&message(json!({
                "type": "track",
                "userId": "u1",
                "event": "Order Completed",
                "properties": { "products": "not a list" }
            })))
            .await
            .unwrap_err();

        assert!(matches!(err, ForwarderError::Mapping(_)));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_plan_does_not_send() {
        let transport = Arc::new(RecordingTransport::new());
        let mapped = dispatcher(transport.clone()).plan(&order_message()).unwrap();
        assert_eq!(mapped.call_count(), 4);
        assert!(transport.calls().is_empty());
    }
}
