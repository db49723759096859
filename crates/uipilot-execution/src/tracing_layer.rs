//! Custom tracing layer for streaming session events to a live audit feed.
//!
//! Events emitted by the uipilot crates are forwarded to a tokio channel
//! together with the fields of the spans they occurred in (`session_id`,
//! `step`).

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

const TARGET_PREFIX: &str = "uipilot";

/// Event data sent to subscribers of the feed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionEvent {
    /// Event target (e.g., "uipilot_application::session::engine")
    pub target: String,
    /// Log level (INFO, DEBUG, WARN, ERROR)
    pub level: String,
    pub message: String,
    /// Structured fields from the event
    pub fields: HashMap<String, Value>,
    /// Fields of the enclosing spans, outermost first
    pub span: HashMap<String, Value>,
    pub timestamp: String,
}

impl SessionEvent {
    /// Session the event belongs to, from the event or its spans.
    pub fn session_id(&self) -> Option<&str> {
        self.fields
            .get("session_id")
            .or_else(|| self.span.get("session_id"))
            .and_then(Value::as_str)
    }
}

/// Span fields stored in the span's extensions.
struct SpanFields(HashMap<String, Value>);

/// A tracing layer that sends uipilot events to a channel.
pub struct SessionEventLayer {
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionEventLayer {
    pub fn new(sender: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { sender }
    }

    /// Creates a layer together with the receiving end of its feed.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl<S> Layer<S> for SessionEventLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if !attrs.metadata().target().starts_with(TARGET_PREFIX) {
            return;
        }
        let mut fields = HashMap::new();
        attrs.record(&mut FieldVisitor(&mut fields));
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields(fields));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !metadata.target().starts_with(TARGET_PREFIX) {
            return;
        }

        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));

        let mut span_fields = HashMap::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(stored) = span.extensions().get::<SpanFields>() {
                    span_fields.extend(stored.0.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }

        let message = fields
            .remove("message")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let session_event = SessionEvent {
            target: metadata.target().to_string(),
            level: metadata.level().to_string(),
            message,
            fields,
            span: span_fields,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        // Receiver may be gone; the feed is best effort.
        let _ = self.sender.send(session_event);
    }
}

/// Field visitor that extracts tracing fields into a HashMap
struct FieldVisitor<'a>(&'a mut HashMap<String, Value>);

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(format!("{value:?}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn forwards_uipilot_events_with_span_fields() {
        let (layer, mut rx) = SessionEventLayer::channel();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!(target: "uipilot_application::session", "step", session_id = "s-1", step = 2u32);
            let _entered = span.enter();
            tracing::warn!(target: "uipilot_application::session", attempt = 1u32, "Execution failed");
            tracing::info!(target: "hyper::client", "connection reused");
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.message, "Execution failed");
        assert_eq!(event.level, "WARN");
        assert_eq!(event.fields["attempt"], 1);
        assert_eq!(event.span["step"], 2);
        assert_eq!(event.session_id(), Some("s-1"));
        assert!(rx.try_recv().is_err());
    }
}
