//! In-memory capture of log events for test assertions
//!
//! The capture layer is installed as the global subscriber once per test
//! binary. Tests in the same binary share it, so assertions should filter on
//! something unique to the test (an op name, a version id) rather than count
//! every event.
//!
//! Span fields are captured too: an event logged inside a service call sees
//! the `request_id` of the span wrapping that call, which lets a test tie a
//! log line to the error the call returned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use lineage_core_types::schema::{
    FIELD_COMPONENT, FIELD_ERR_CODE, FIELD_EVENT, FIELD_OP, FIELD_REQUEST_ID,
};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// One captured event: its own fields plus those of its enclosing spans
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    pub level: Level,
    pub component: Option<String>,
    pub op: Option<String>,
    pub event: Option<String>,
    /// From the innermost enclosing span that sets it
    pub request_id: Option<String>,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    /// Event field value as recorded, if present
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn err_code(&self) -> Option<&str> {
        self.field(FIELD_ERR_CODE)
    }

    pub fn is(&self, op: &str, event: &str) -> bool {
        self.op.as_deref() == Some(op) && self.event.as_deref() == Some(event)
    }
}

#[derive(Default)]
struct FieldVisitor(HashMap<String, String>);

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

/// Fields recorded when a span was created, kept in its extensions
struct SpanFields(HashMap<String, String>);

type Buffer = Arc<Mutex<Vec<CapturedEvent>>>;

fn lock(buffer: &Buffer) -> MutexGuard<'_, Vec<CapturedEvent>> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct TestCaptureLayer {
    events: Buffer,
}

impl<S> Layer<S> for TestCaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields(visitor.0));
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let fields = visitor.0;

        // event_scope runs innermost first
        let request_id = ctx.event_scope(event).and_then(|scope| {
            scope
                .filter_map(|span| {
                    span.extensions()
                        .get::<SpanFields>()
                        .and_then(|f| f.0.get(FIELD_REQUEST_ID).cloned())
                })
                .next()
        });

        lock(&self.events).push(CapturedEvent {
            level: *event.metadata().level(),
            component: fields.get(FIELD_COMPONENT).cloned(),
            op: fields.get(FIELD_OP).cloned(),
            event: fields.get(FIELD_EVENT).cloned(),
            request_id,
            fields,
        });
    }
}

/// Handle for reading captured events
#[derive(Clone)]
pub struct TestCapture {
    events: Buffer,
}

impl TestCapture {
    /// Snapshot of everything captured so far
    pub fn events(&self) -> Vec<CapturedEvent> {
        lock(&self.events).clone()
    }

    /// Captured events of one operation, in emission order
    pub fn events_for_op(&self, op: &str) -> Vec<CapturedEvent> {
        lock(&self.events)
            .iter()
            .filter(|e| e.op.as_deref() == Some(op))
            .cloned()
            .collect()
    }

    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CapturedEvent) -> bool,
    {
        lock(&self.events).iter().filter(|e| predicate(e)).count()
    }

    /// # Panics
    ///
    /// When no event with this op and event name was captured.
    pub fn assert_event_exists(&self, op: &str, event: &str) {
        let events = self.events();
        assert!(
            events.iter().any(|e| e.is(op, event)),
            "Expected event op={} event={} not found in {} captured events",
            op,
            event,
            events.len()
        );
    }
}

static GLOBAL_CAPTURE: OnceLock<TestCapture> = OnceLock::new();

/// Install the capture layer (first call only) and return a handle to it
///
/// # Example
///
/// ```
/// use lineage_core::logging_facility::test_capture::init_test_capture;
/// use lineage_core::log_op_start;
///
/// let capture = init_test_capture();
/// log_op_start!("doc_capture_op");
/// capture.assert_event_exists("doc_capture_op", "start");
/// ```
pub fn init_test_capture() -> TestCapture {
    GLOBAL_CAPTURE
        .get_or_init(|| {
            let events = Buffer::default();
            let layer = TestCaptureLayer {
                events: events.clone(),
            };
            tracing_subscriber::registry().with(layer).try_init().ok();
            TestCapture { events }
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ExError, ExErrorKind};

    #[test]
    fn test_macros_emit_canonical_fields() {
        let capture = init_test_capture();

        crate::log_op_start!("capture_unit_op", version_id = "v-cap");
        crate::log_op_end!("capture_unit_op", duration_ms = 3u64);
        let err = ExError::new(ExErrorKind::NotFound);
        crate::log_op_error!("capture_unit_op", err, duration_ms = 4u64);

        let events = capture.events_for_op("capture_unit_op");
        let names: Vec<_> = events.iter().filter_map(|e| e.event.as_deref()).collect();
        assert_eq!(names, vec!["start", "end", "end_error"]);

        assert_eq!(events[0].field("version_id"), Some("v-cap"));
        assert!(events[0]
            .component
            .as_deref()
            .is_some_and(|c| c.contains("test_capture")));
        assert_eq!(events[2].err_code(), Some("ERR_NOT_FOUND"));
        assert_eq!(events[2].level, Level::ERROR);
    }

    #[test]
    fn test_request_id_comes_from_enclosing_span() {
        let capture = init_test_capture();

        {
            let span = tracing::info_span!("lineage_op", request_id = "req-capture-1");
            let _entered = span.enter();
            let inner = tracing::debug_span!("store_call", table = "dataset_versions");
            let _inner = inner.enter();
            crate::log_op_start!("capture_span_op");
        }
        crate::log_op_end!("capture_span_op", duration_ms = 1u64);

        let events = capture.events_for_op("capture_span_op");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].request_id.as_deref(), Some("req-capture-1"));
        assert_eq!(events[1].request_id, None);
    }
}
