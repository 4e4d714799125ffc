//! Event Bus
//!
//! Side-channel pub/sub decoupling pipeline internals from everything that
//! wants to observe them (modules, monitoring, tests). Events describe what
//! already happened in the frame stream; nothing in the stream waits on a
//! subscriber's verdict.

pub mod tap;

use crate::error::VoxResult;
use crate::metrics::PipelineMetrics;
use futures::future::BoxFuture;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Subscribe to every event type
pub const WILDCARD: &str = "*";

/// History ring capacity when none is configured
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

pub const EVENT_PIPELINE_STARTED: &str = "pipeline_started";
pub const EVENT_PIPELINE_ENDED: &str = "pipeline_ended";
pub const EVENT_TRANSCRIPTION_FINAL: &str = "transcription_final";
pub const EVENT_TTS_STARTED: &str = "tts_started";
pub const EVENT_TTS_STOPPED: &str = "tts_stopped";
pub const EVENT_USER_STARTED_SPEAKING: &str = "user_started_speaking";
pub const EVENT_INTERRUPTION: &str = "interruption";
pub const EVENT_METRICS_UPDATE: &str = "metrics_update";
pub const EVENT_MODULE_LOADED: &str = "module_loaded";
pub const EVENT_MODULE_UNLOADED: &str = "module_unloaded";
pub const EVENT_ERROR: &str = "error";

/// Typed event payload.
///
/// Known producers get typed variants; `Custom` carries anything modules or
/// future components emit without the bus caring about its shape.
#[derive(Debug, Clone)]
pub enum EventPayload {
    PipelineStarted,
    PipelineEnded,
    TranscriptionFinal {
        text: String,
        confidence: f64,
    },
    TtsStarted {
        expected_duration_secs: Option<f64>,
    },
    TtsStopped,
    UserStartedSpeaking,
    Interruption {
        completion_ratio: f64,
        preserve_context: bool,
        elapsed_ms: f64,
    },
    MetricsUpdate(PipelineMetrics),
    ModuleLoaded {
        name: String,
    },
    ModuleUnloaded {
        name: String,
    },
    Error {
        message: String,
    },
    Custom {
        kind: String,
        data: Value,
    },
}

impl EventPayload {
    /// Event type string on the wire
    pub fn kind(&self) -> &str {
        match self {
            EventPayload::PipelineStarted => EVENT_PIPELINE_STARTED,
            EventPayload::PipelineEnded => EVENT_PIPELINE_ENDED,
            EventPayload::TranscriptionFinal { .. } => EVENT_TRANSCRIPTION_FINAL,
            EventPayload::TtsStarted { .. } => EVENT_TTS_STARTED,
            EventPayload::TtsStopped => EVENT_TTS_STOPPED,
            EventPayload::UserStartedSpeaking => EVENT_USER_STARTED_SPEAKING,
            EventPayload::Interruption { .. } => EVENT_INTERRUPTION,
            EventPayload::MetricsUpdate(_) => EVENT_METRICS_UPDATE,
            EventPayload::ModuleLoaded { .. } => EVENT_MODULE_LOADED,
            EventPayload::ModuleUnloaded { .. } => EVENT_MODULE_UNLOADED,
            EventPayload::Error { .. } => EVENT_ERROR,
            EventPayload::Custom { kind, .. } => kind,
        }
    }

    /// Payload rendered as the wire `data` object
    pub fn data(&self) -> Value {
        match self {
            EventPayload::PipelineStarted
            | EventPayload::PipelineEnded
            | EventPayload::TtsStopped
            | EventPayload::UserStartedSpeaking => json!({}),
            EventPayload::TranscriptionFinal { text, confidence } => {
                json!({ "text": text, "confidence": confidence })
            }
            EventPayload::TtsStarted {
                expected_duration_secs,
            } => match expected_duration_secs {
                Some(secs) => json!({ "duration": secs }),
                None => json!({}),
            },
            EventPayload::Interruption {
                completion_ratio,
                preserve_context,
                elapsed_ms,
            } => json!({
                "completion_ratio": completion_ratio,
                "preserve_context": preserve_context,
                "elapsed_ms": elapsed_ms,
            }),
            EventPayload::MetricsUpdate(metrics) => {
                serde_json::to_value(metrics).unwrap_or(Value::Null)
            }
            EventPayload::ModuleLoaded { name } | EventPayload::ModuleUnloaded { name } => {
                json!({ "name": name })
            }
            EventPayload::Error { message } => json!({ "message": message }),
            EventPayload::Custom { data, .. } => data.clone(),
        }
    }
}

/// One emitted event. Immutable once on the bus; shared as `Arc<Event>`.
#[derive(Debug, Clone)]
pub struct Event {
    /// Strictly increasing per bus, starting at 0
    pub id: u64,
    /// Seconds on the bus's monotonic clock at emission
    pub timestamp: f64,
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    pub fn data(&self) -> Value {
        self.payload.data()
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Event", 4)?;
        state.serialize_field("type", self.kind())?;
        state.serialize_field("data", &self.data())?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("id", &self.id)?;
        state.end()
    }
}

/// Uniform async subscriber signature.
///
/// Synchronous callbacks are adapted once at registration via
/// [`sync_handler`]; the bus never branches on handler flavor at call time.
pub type EventHandler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, VoxResult<()>> + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`]
pub fn async_handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = VoxResult<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Wrap a synchronous closure as an [`EventHandler`]
pub fn sync_handler<F>(f: F) -> EventHandler
where
    F: Fn(&Event) -> VoxResult<()> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |event| {
        let f = f.clone();
        Box::pin(async move { f(&event) })
    })
}

/// Handle returned by [`EventBus::subscribe`]; closures are not comparable,
/// so unsubscription goes through this id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
enum EventFilter {
    Any,
    Exact(String),
}

impl EventFilter {
    fn parse(pattern: &str) -> Self {
        if pattern == WILDCARD {
            EventFilter::Any
        } else {
            EventFilter::Exact(pattern.to_string())
        }
    }

    fn matches(&self, kind: &str) -> bool {
        match self {
            EventFilter::Any => true,
            EventFilter::Exact(t) => t == kind,
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    handler: EventHandler,
}

struct BusState {
    /// One list for exact and wildcard filters, in registration order
    subscriptions: Vec<Subscription>,
    history: VecDeque<Arc<Event>>,
    next_event_id: u64,
    next_subscription_id: u64,
}

/// Pub/sub bus with a bounded history ring.
///
/// Explicitly constructed and shared by handle (`Arc<EventBus>`); there is
/// no process-wide instance. Delivery is sequential in registration order,
/// and a failing subscriber never stops the others.
pub struct EventBus {
    inner: Mutex<BusState>,
    epoch: Instant,
    buffer_size: usize,
}

impl EventBus {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            inner: Mutex::new(BusState {
                subscriptions: Vec::new(),
                history: VecDeque::with_capacity(buffer_size),
                next_event_id: 0,
                next_subscription_id: 0,
            }),
            epoch: Instant::now(),
            buffer_size,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }

    /// Seconds since this bus was created, on the same clock that stamps
    /// events
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Register a handler for an exact event type or [`WILDCARD`]
    pub fn subscribe(&self, pattern: &str, handler: EventHandler) -> VoxResult<SubscriptionId> {
        let mut state = self.inner.lock()?;
        let id = SubscriptionId(state.next_subscription_id);
        state.next_subscription_id += 1;
        state.subscriptions.push(Subscription {
            id,
            filter: EventFilter::parse(pattern),
            handler,
        });
        debug!("Subscribed {:?} to '{}'", id, pattern);
        Ok(id)
    }

    /// Remove a subscription; returns false if the id was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> VoxResult<bool> {
        let mut state = self.inner.lock()?;
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.id != id);
        Ok(state.subscriptions.len() != before)
    }

    /// Emit an event: stamp it, record it in the ring, then await every
    /// matching subscriber in registration order. Subscriber errors are
    /// logged and delivery continues.
    pub async fn emit(&self, payload: EventPayload) -> VoxResult<Arc<Event>> {
        let (event, handlers) = {
            let mut state = self.inner.lock()?;
            let event = Arc::new(Event {
                id: state.next_event_id,
                timestamp: self.epoch.elapsed().as_secs_f64(),
                payload,
            });
            state.next_event_id += 1;
            if state.history.len() == self.buffer_size {
                state.history.pop_front();
            }
            state.history.push_back(event.clone());
            let handlers: Vec<(SubscriptionId, EventHandler)> = state
                .subscriptions
                .iter()
                .filter(|s| s.filter.matches(event.kind()))
                .map(|s| (s.id, s.handler.clone()))
                .collect();
            (event, handlers)
        };

        for (id, handler) in handlers {
            if let Err(e) = handler(event.clone()).await {
                warn!(
                    "Subscriber {:?} failed on '{}' event: {}",
                    id,
                    event.kind(),
                    e
                );
            }
        }
        Ok(event)
    }

    /// Convenience for module-defined event types
    pub async fn emit_custom(&self, kind: &str, data: Value) -> VoxResult<Arc<Event>> {
        self.emit(EventPayload::Custom {
            kind: kind.to_string(),
            data,
        })
        .await
    }

    /// Snapshot of recorded events, oldest first. Filters combine: type
    /// match AND `timestamp > since_timestamp`, then the most recent
    /// `limit` entries.
    pub fn event_history(
        &self,
        type_filter: Option<&str>,
        since_timestamp: Option<f64>,
        limit: Option<usize>,
    ) -> VoxResult<Vec<Arc<Event>>> {
        let state = self.inner.lock()?;
        let mut events: Vec<Arc<Event>> = state
            .history
            .iter()
            .filter(|e| type_filter.map_or(true, |t| e.kind() == t))
            .filter(|e| since_timestamp.map_or(true, |s| e.timestamp > s))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            if events.len() > limit {
                events.drain(..events.len() - limit);
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording_handler(log: Arc<Mutex<Vec<String>>>, tag: &str) -> EventHandler {
        let tag = tag.to_string();
        sync_handler(move |event: &Event| {
            log.lock().unwrap().push(format!("{}:{}", tag, event.kind()));
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_sequence_ids_strictly_increase() {
        let bus = EventBus::with_defaults();
        let a = bus.emit(EventPayload::PipelineStarted).await.unwrap();
        let b = bus.emit(EventPayload::TtsStopped).await.unwrap();
        let c = bus.emit(EventPayload::PipelineEnded).await.unwrap();
        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
        assert_eq!(c.id, 2);
        assert!(a.timestamp <= b.timestamp && b.timestamp <= c.timestamp);
    }

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest() {
        let bus = EventBus::new(3);
        for i in 0..5u64 {
            bus.emit_custom("tick", json!({ "n": i })).await.unwrap();
        }
        let history = bus.event_history(None, None, None).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, 2);
        assert_eq!(history[2].id, 4);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let bus = EventBus::with_defaults();
        let reached = Arc::new(AtomicUsize::new(0));

        bus.subscribe(
            "tick",
            sync_handler(|_| Err(crate::error::VoxError::Event("boom".into()))),
        )
        .unwrap();
        let reached2 = reached.clone();
        bus.subscribe(
            "tick",
            sync_handler(move |_| {
                reached2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

        for _ in 0..3 {
            bus.emit_custom("tick", json!({})).await.unwrap();
        }
        assert_eq!(reached.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wildcard_and_exact_in_registration_order() {
        let bus = EventBus::with_defaults();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(WILDCARD, recording_handler(log.clone(), "any"))
            .unwrap();
        bus.subscribe(
            EVENT_TTS_STOPPED,
            recording_handler(log.clone(), "exact"),
        )
        .unwrap();

        bus.emit(EventPayload::TtsStopped).await.unwrap();
        bus.emit(EventPayload::PipelineStarted).await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "any:tts_stopped".to_string(),
                "exact:tts_stopped".to_string(),
                "any:pipeline_started".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::with_defaults();
        let log = Arc::new(Mutex::new(Vec::new()));

        let id = bus
            .subscribe(WILDCARD, recording_handler(log.clone(), "a"))
            .unwrap();
        bus.emit(EventPayload::PipelineStarted).await.unwrap();
        assert!(bus.unsubscribe(id).unwrap());
        assert!(!bus.unsubscribe(id).unwrap());
        bus.emit(EventPayload::PipelineEnded).await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_filters() {
        let bus = EventBus::with_defaults();
        bus.emit(EventPayload::PipelineStarted).await.unwrap();
        let marker = bus.emit_custom("tick", json!({})).await.unwrap();
        bus.emit_custom("tick", json!({})).await.unwrap();
        bus.emit(EventPayload::PipelineEnded).await.unwrap();

        let ticks = bus.event_history(Some("tick"), None, None).unwrap();
        assert_eq!(ticks.len(), 2);

        let after = bus
            .event_history(None, Some(marker.timestamp), None)
            .unwrap();
        assert!(after.iter().all(|e| e.timestamp > marker.timestamp));

        let last_two = bus.event_history(None, None, Some(2)).unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].kind(), EVENT_PIPELINE_ENDED);
    }

    #[tokio::test]
    async fn test_wire_shape() {
        let bus = EventBus::with_defaults();
        let event = bus
            .emit(EventPayload::Interruption {
                completion_ratio: 0.125,
                preserve_context: true,
                elapsed_ms: 500.0,
            })
            .await
            .unwrap();

        let value = serde_json::to_value(event.as_ref()).unwrap();
        assert_eq!(value["type"], "interruption");
        assert_eq!(value["data"]["completion_ratio"], 0.125);
        assert_eq!(value["data"]["preserve_context"], true);
        assert_eq!(value["id"], 0);
        assert!(value["timestamp"].is_f64());
    }

    #[tokio::test]
    async fn test_sync_and_async_handlers_share_signature() {
        let bus = EventBus::with_defaults();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        bus.subscribe(
            WILDCARD,
            async_handler(move |_event| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();
        let c = count.clone();
        bus.subscribe(
            WILDCARD,
            sync_handler(move |_event| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

        bus.emit(EventPayload::PipelineStarted).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
