//! Latency Metrics
//!
//! Tracks how long each pipeline stage takes from paired `<component>_start`
//! / `<component>_end` markers and periodically publishes a snapshot as a
//! `metrics_update` event. Latencies are point-samples of the most recent
//! completed timing, not windowed averages; an end that never arrives
//! leaves the previous sample in place.

use crate::error::VoxResult;
use crate::events::{EventBus, EventPayload};
use crate::frames::{Frame, FrameTap, COMPONENT_LLM, COMPONENT_STT, COMPONENT_TTS, MARKER_ERROR};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Aggregated pipeline metrics snapshot.
///
/// `total_latency_ms` is the sum of the three named stage latencies, an
/// explicit approximation of turn latency rather than a wall-clock span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub stt_latency_ms: f64,
    pub llm_latency_ms: f64,
    pub tts_latency_ms: f64,
    pub total_latency_ms: f64,
    pub frames_processed: u64,
    pub errors: u64,
    pub component_timings: HashMap<String, f64>,
}

/// Frame tap measuring per-component latency.
///
/// Each component is either idle or timing: a start marker opens a timing
/// (restarting any already-open one), the matching end closes it, and an
/// end with no open start is ignored. Counters are cumulative for the
/// process lifetime.
pub struct MetricsAggregator {
    bus: Arc<EventBus>,
    metrics: PipelineMetrics,
    open_starts: HashMap<String, Instant>,
    emit_interval: Duration,
    last_emit: Instant,
}

impl MetricsAggregator {
    pub fn new(bus: Arc<EventBus>, emit_interval: Duration) -> Self {
        Self {
            bus,
            metrics: PipelineMetrics::default(),
            open_starts: HashMap::new(),
            emit_interval,
            last_emit: Instant::now(),
        }
    }

    /// Open a timing for `component`; a second start before the end simply
    /// restarts the clock
    pub fn on_component_start(&mut self, component: &str) {
        if self
            .open_starts
            .insert(component.to_string(), Instant::now())
            .is_some()
        {
            debug!("Restarting open timing for '{}'", component);
        }
    }

    /// Close the open timing for `component` and record its latency;
    /// ignored when nothing is open
    pub fn on_component_end(&mut self, component: &str) {
        if let Some(start) = self.open_starts.remove(component) {
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
            self.metrics
                .component_timings
                .insert(component.to_string(), latency_ms);
            match component {
                COMPONENT_STT => self.metrics.stt_latency_ms = latency_ms,
                COMPONENT_LLM => self.metrics.llm_latency_ms = latency_ms,
                COMPONENT_TTS => self.metrics.tts_latency_ms = latency_ms,
                _ => {}
            }
            self.metrics.total_latency_ms = self.metrics.stt_latency_ms
                + self.metrics.llm_latency_ms
                + self.metrics.tts_latency_ms;
            debug!("{} completed in {:.1}ms", component, latency_ms);
        }
    }

    pub fn on_error(&mut self) {
        self.metrics.errors += 1;
    }

    /// Copy of the current metrics
    pub fn snapshot(&self) -> PipelineMetrics {
        self.metrics.clone()
    }

    /// Publish the current snapshot now and reset the emission timer
    pub async fn emit_snapshot(&mut self) -> VoxResult<()> {
        self.last_emit = Instant::now();
        self.bus
            .emit(EventPayload::MetricsUpdate(self.metrics.clone()))
            .await?;
        Ok(())
    }

    async fn maybe_emit(&mut self) -> VoxResult<()> {
        if self.last_emit.elapsed() >= self.emit_interval {
            self.emit_snapshot().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FrameTap for MetricsAggregator {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn on_start(&mut self) -> VoxResult<()> {
        self.last_emit = Instant::now();
        Ok(())
    }

    async fn process_frame(&mut self, frame: Frame) -> VoxResult<Vec<Frame>> {
        self.metrics.frames_processed += 1;

        if let Frame::Marker(marker) = &frame {
            if marker.name == MARKER_ERROR {
                self.on_error();
            } else if let Some(component) = marker.timing_start() {
                self.on_component_start(component);
            } else if let Some(component) = marker.timing_end() {
                self.on_component_end(component);
            }
        }

        self.maybe_emit().await?;
        Ok(vec![frame])
    }
}
