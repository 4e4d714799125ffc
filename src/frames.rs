//! Frame Stream Contract
//!
//! Typed rendering of the ordered signal stream the external pipeline
//! runtime delivers. The orchestration core only observes and annotates this
//! stream; it never schedules it.

use crate::error::VoxResult;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Marker names defined by the pipeline runtime contract
pub const MARKER_TTS_STARTED: &str = "tts_started";
pub const MARKER_TTS_STOPPED: &str = "tts_stopped";
pub const MARKER_USER_STARTED_SPEAKING: &str = "user_started_speaking";
pub const MARKER_ERROR: &str = "error";

/// Suffixes for component timing markers (`stt_start`, `llm_end`, ...)
pub const SUFFIX_START: &str = "_start";
pub const SUFFIX_END: &str = "_end";

/// The three named pipeline stages tracked in every metrics snapshot
pub const COMPONENT_STT: &str = "stt";
pub const COMPONENT_LLM: &str = "llm";
pub const COMPONENT_TTS: &str = "tts";

/// Out-of-band system marker travelling with the frame stream.
///
/// Names are plain strings because the runtime owns the vocabulary; the
/// constructors below cover the markers this crate interprets.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMarker {
    pub name: String,
    pub data: Value,
}

impl SystemMarker {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// TTS playback began; `expected_duration_secs` is the synthesized
    /// length when the TTS service reports one
    pub fn tts_started(expected_duration_secs: Option<f64>) -> Self {
        let data = match expected_duration_secs {
            Some(secs) => json!({ "duration": secs }),
            None => json!({}),
        };
        Self::new(MARKER_TTS_STARTED, data)
    }

    pub fn tts_stopped() -> Self {
        Self::new(MARKER_TTS_STOPPED, json!({}))
    }

    pub fn user_started_speaking() -> Self {
        Self::new(MARKER_USER_STARTED_SPEAKING, json!({}))
    }

    pub fn component_start(component: &str) -> Self {
        Self::new(format!("{}{}", component, SUFFIX_START), json!({}))
    }

    pub fn component_end(component: &str) -> Self {
        Self::new(format!("{}{}", component, SUFFIX_END), json!({}))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(MARKER_ERROR, json!({ "message": message.into() }))
    }

    /// Expected TTS duration in seconds, if the marker carries one
    pub fn expected_duration(&self) -> Option<f64> {
        self.data.get("duration").and_then(Value::as_f64)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.data.get("message").and_then(Value::as_str)
    }

    /// Component name for `<component>_start` markers
    pub fn timing_start(&self) -> Option<&str> {
        self.name.strip_suffix(SUFFIX_START)
    }

    /// Component name for `<component>_end` markers
    pub fn timing_end(&self) -> Option<&str> {
        self.name.strip_suffix(SUFFIX_END)
    }
}

/// Control signals injected back into the stream by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Stop TTS playback immediately (barge-in)
    InterruptTts,
}

/// One element of the pipeline runtime's ordered stream
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Pipeline is up
    Start,
    /// Pipeline is shutting down
    End,
    /// Out-of-band system marker
    Marker(SystemMarker),
    /// User speech from STT; `is_final` distinguishes partials
    Transcript { text: String, is_final: bool },
    /// Generated response text (streamed)
    Token { text: String },
    /// Raw audio chunk passing through
    Audio { samples: Vec<i16> },
    /// Control signal for downstream services
    Control(ControlSignal),
}

impl Frame {
    pub fn transcript(text: impl Into<String>, is_final: bool) -> Self {
        Frame::Transcript {
            text: text.into(),
            is_final,
        }
    }

    pub fn token(text: impl Into<String>) -> Self {
        Frame::Token { text: text.into() }
    }

    pub fn marker(marker: SystemMarker) -> Self {
        Frame::Marker(marker)
    }
}

/// A passive observer sitting in the frame stream.
///
/// Taps receive each frame in order and return the frames to forward
/// downstream (normally the observed frame itself, possibly followed by
/// injected ones). The stream is single-threaded, so taps own their state
/// without locks.
#[async_trait]
pub trait FrameTap: Send {
    /// Tap name used in logs
    fn name(&self) -> &str;

    /// Observe one frame and return the frames to forward downstream
    async fn process_frame(&mut self, frame: Frame) -> VoxResult<Vec<Frame>>;

    /// Called once before the first frame
    async fn on_start(&mut self) -> VoxResult<()> {
        Ok(())
    }

    /// Called once after the last frame
    async fn on_stop(&mut self) -> VoxResult<()> {
        Ok(())
    }
}

/// Ordered chain of taps.
///
/// Stand-in for the external runtime's processor list, used by the demo
/// binary and the integration tests: frame N+1 is not fed until frame N has
/// fully traversed the chain.
#[derive(Default)]
pub struct TapChain {
    taps: Vec<Box<dyn FrameTap>>,
}

impl TapChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tap: impl FrameTap + 'static) {
        self.taps.push(Box::new(tap));
    }

    pub async fn start(&mut self) -> VoxResult<()> {
        for tap in &mut self.taps {
            tap.on_start().await?;
        }
        Ok(())
    }

    pub async fn stop(&mut self) -> VoxResult<()> {
        for tap in &mut self.taps {
            tap.on_stop().await?;
        }
        Ok(())
    }

    /// Push one frame through every tap in order; returns what the sink
    /// at the end of the chain would receive
    pub async fn feed(&mut self, frame: Frame) -> VoxResult<Vec<Frame>> {
        let mut current = vec![frame];
        for tap in &mut self.taps {
            let mut next = Vec::new();
            for f in current {
                next.extend(tap.process_frame(f).await?);
            }
            current = next;
        }
        Ok(current)
    }
}
