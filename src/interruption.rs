//! Barge-In Coordination
//!
//! Tracks TTS playback and reacts when the user starts speaking over it:
//! cut playback, tell everyone it happened, and decide whether the cut-off
//! response stays in conversation context. The decision itself is a pure
//! function so the policy can be tested without a pipeline.

use crate::config::InterruptionConfig;
use crate::error::VoxResult;
use crate::events::{EventBus, EventPayload};
use crate::frames::{
    ControlSignal, Frame, FrameTap, MARKER_TTS_STARTED, MARKER_TTS_STOPPED,
    MARKER_USER_STARTED_SPEAKING,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info};

/// TTS playback as the coordinator sees it. `Interrupted` only lasts for
/// the acknowledgment pause before falling back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    TtsPlaying,
    Interrupted,
}

/// Outcome of the barge-in policy for one interruption
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptionDecision {
    /// Fraction of the expected playback that completed; 0.0 when the
    /// expected duration is unknown
    pub completion_ratio: f64,
    /// Keep the cut-off response in conversation context
    pub preserve_context: bool,
    pub elapsed_ms: f64,
}

/// Barge-in policy: an interruption early in playback (ratio strictly below
/// the threshold) means the user heard almost nothing, so the response is
/// preserved for context repair
pub fn evaluate(
    elapsed: Duration,
    expected: Option<Duration>,
    threshold: f64,
) -> InterruptionDecision {
    let completion_ratio = match expected {
        Some(total) if total > Duration::ZERO => elapsed.as_secs_f64() / total.as_secs_f64(),
        _ => 0.0,
    };
    InterruptionDecision {
        completion_ratio,
        preserve_context: completion_ratio < threshold,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
    }
}

/// Text injected into the stream so the LLM sees where its response was cut
pub fn context_marker(decision: &InterruptionDecision) -> String {
    if decision.preserve_context {
        format!(
            "[INTERRUPTED at {:.0}%]",
            decision.completion_ratio * 100.0
        )
    } else {
        "[INTERRUPTED]".to_string()
    }
}

/// Frame tap owning the playback state machine.
///
/// Single-threaded stream, single owner: no locks. On a barge-in it
/// forwards an `InterruptTts` control signal, emits an `interruption`
/// event, and injects the context marker, all without pausing, so the
/// downstream sink cuts playback right away. The acknowledgment delay is
/// applied to the next frame instead: the stream is held at the top of the
/// following `process_frame` until the pause has elapsed.
pub struct InterruptionCoordinator {
    bus: Arc<EventBus>,
    threshold: f64,
    ack_delay: Duration,
    state: PlaybackState,
    tts_started_at: Option<Instant>,
    tts_expected: Option<Duration>,
    current_response: String,
    /// Set on a barge-in; the next frame waits until this instant
    resume_at: Option<Instant>,
}

impl InterruptionCoordinator {
    pub fn new(bus: Arc<EventBus>, threshold: f64, ack_delay: Duration) -> Self {
        Self {
            bus,
            threshold,
            ack_delay,
            state: PlaybackState::Idle,
            tts_started_at: None,
            tts_expected: None,
            current_response: String::new(),
            resume_at: None,
        }
    }

    pub fn from_config(bus: Arc<EventBus>, config: &InterruptionConfig) -> Self {
        Self::new(
            bus,
            config.threshold,
            Duration::from_secs_f64(config.ack_delay_seconds),
        )
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Response text streamed since the last user turn
    pub fn current_response(&self) -> &str {
        &self.current_response
    }

    async fn handle_barge_in(&mut self, observed: Frame) -> VoxResult<Vec<Frame>> {
        let elapsed = self
            .tts_started_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let decision = evaluate(elapsed, self.tts_expected, self.threshold);
        self.state = PlaybackState::Interrupted;

        info!(
            "🛑 Barge-in at {:.0}% of playback (preserve_context={})",
            decision.completion_ratio * 100.0,
            decision.preserve_context
        );

        let forwarded = vec![
            observed,
            Frame::Control(ControlSignal::InterruptTts),
            Frame::token(context_marker(&decision)),
        ];

        self.bus
            .emit(EventPayload::Interruption {
                completion_ratio: decision.completion_ratio,
                preserve_context: decision.preserve_context,
                elapsed_ms: decision.elapsed_ms,
            })
            .await?;

        // The control signal must reach the sink now; the pause belongs to
        // whatever comes after it
        self.resume_at = Some(Instant::now() + self.ack_delay);

        self.state = PlaybackState::Idle;
        self.tts_started_at = None;
        self.tts_expected = None;
        Ok(forwarded)
    }
}

#[async_trait]
impl FrameTap for InterruptionCoordinator {
    fn name(&self) -> &str {
        "interruption"
    }

    async fn process_frame(&mut self, frame: Frame) -> VoxResult<Vec<Frame>> {
        // Give STT/LLM/TTS a beat to drop in-flight work after a barge-in
        // before anything else moves
        if let Some(deadline) = self.resume_at.take() {
            sleep_until(deadline).await;
        }

        match &frame {
            Frame::Marker(m) if m.name == MARKER_TTS_STARTED => {
                self.tts_expected = m
                    .expected_duration()
                    .filter(|secs| secs.is_finite() && *secs > 0.0)
                    .map(Duration::from_secs_f64);
                self.tts_started_at = Some(Instant::now());
                self.state = PlaybackState::TtsPlaying;
                debug!("TTS playback started (expected {:?})", self.tts_expected);
                Ok(vec![frame])
            }
            Frame::Marker(m) if m.name == MARKER_TTS_STOPPED => {
                self.state = PlaybackState::Idle;
                self.tts_started_at = None;
                self.tts_expected = None;
                debug!("TTS playback finished");
                Ok(vec![frame])
            }
            Frame::Marker(m) if m.name == MARKER_USER_STARTED_SPEAKING => {
                if self.state == PlaybackState::TtsPlaying {
                    self.handle_barge_in(frame).await
                } else {
                    // Normal turn taking, nothing to cut
                    Ok(vec![frame])
                }
            }
            Frame::Token { text } => {
                self.current_response.push_str(text);
                Ok(vec![frame])
            }
            Frame::Transcript { is_final, .. } => {
                if *is_final {
                    self.current_response.clear();
                }
                Ok(vec![frame])
            }
            _ => Ok(vec![frame]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EVENT_INTERRUPTION;
    use crate::frames::SystemMarker;
    use tokio::time::advance;

    fn coordinator(bus: Arc<EventBus>) -> InterruptionCoordinator {
        InterruptionCoordinator::new(bus, 0.2, Duration::from_millis(50))
    }

    #[test]
    fn test_evaluate_threshold_boundaries() {
        let total = Some(Duration::from_secs(10));

        let early = evaluate(Duration::from_secs(1), total, 0.2);
        assert!((early.completion_ratio - 0.1).abs() < 1e-9);
        assert!(early.preserve_context);

        let late = evaluate(Duration::from_secs(5), total, 0.2);
        assert!((late.completion_ratio - 0.5).abs() < 1e-9);
        assert!(!late.preserve_context);

        // Strictly below: landing exactly on the threshold does not preserve
        let exact = evaluate(Duration::from_secs(2), total, 0.2);
        assert_eq!(exact.completion_ratio, 0.2);
        assert!(!exact.preserve_context);
    }

    #[test]
    fn test_evaluate_unknown_duration() {
        let decision = evaluate(Duration::from_secs(3), None, 0.2);
        assert_eq!(decision.completion_ratio, 0.0);
        assert!(decision.preserve_context);

        let zero = evaluate(Duration::from_secs(3), Some(Duration::ZERO), 0.2);
        assert_eq!(zero.completion_ratio, 0.0);
    }

    #[test]
    fn test_context_marker_format() {
        let preserved = InterruptionDecision {
            completion_ratio: 0.1,
            preserve_context: true,
            elapsed_ms: 400.0,
        };
        assert_eq!(context_marker(&preserved), "[INTERRUPTED at 10%]");

        let discarded = InterruptionDecision {
            completion_ratio: 0.6,
            preserve_context: false,
            elapsed_ms: 2400.0,
        };
        assert_eq!(context_marker(&discarded), "[INTERRUPTED]");
    }

    #[tokio::test(start_paused = true)]
    async fn test_barge_in_mid_playback() {
        let bus = Arc::new(EventBus::with_defaults());
        let mut coord = coordinator(bus.clone());

        coord
            .process_frame(Frame::Marker(SystemMarker::tts_started(Some(4.0))))
            .await
            .unwrap();
        assert_eq!(coord.state(), PlaybackState::TtsPlaying);

        advance(Duration::from_millis(500)).await;
        let out = coord
            .process_frame(Frame::Marker(SystemMarker::user_started_speaking()))
            .await
            .unwrap();

        let controls: Vec<&Frame> = out
            .iter()
            .filter(|f| matches!(f, Frame::Control(ControlSignal::InterruptTts)))
            .collect();
        assert_eq!(controls.len(), 1);
        assert!(out
            .iter()
            .any(|f| matches!(f, Frame::Token { text } if text.starts_with("[INTERRUPTED at "))));

        let events = bus
            .event_history(Some(EVENT_INTERRUPTION), None, None)
            .unwrap();
        assert_eq!(events.len(), 1);
        let data = events[0].data();
        assert!((data["completion_ratio"].as_f64().unwrap() - 0.125).abs() < 1e-9);
        assert_eq!(data["preserve_context"], true);
        assert!((data["elapsed_ms"].as_f64().unwrap() - 500.0).abs() < 1e-6);

        assert_eq!(coord.state(), PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_signal_precedes_acknowledgment_pause() {
        let bus = Arc::new(EventBus::with_defaults());
        let mut coord = coordinator(bus);

        coord
            .process_frame(Frame::Marker(SystemMarker::tts_started(Some(4.0))))
            .await
            .unwrap();
        advance(Duration::from_millis(500)).await;

        // The barge-in call itself does not pause, so the forwarded
        // InterruptTts reaches the downstream sink without lag
        let before = Instant::now();
        let out = coord
            .process_frame(Frame::Marker(SystemMarker::user_started_speaking()))
            .await
            .unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert!(out
            .iter()
            .any(|f| matches!(f, Frame::Control(ControlSignal::InterruptTts))));

        // The next frame is what waits out the acknowledgment delay
        let before = Instant::now();
        coord.process_frame(Frame::token("next")).await.unwrap();
        assert!(before.elapsed() >= Duration::from_millis(50));

        // And only that one frame: the pause does not repeat
        let before = Instant::now();
        coord.process_frame(Frame::token("after")).await.unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_barge_in_discards_context() {
        let bus = Arc::new(EventBus::with_defaults());
        let mut coord = coordinator(bus.clone());

        coord
            .process_frame(Frame::Marker(SystemMarker::tts_started(Some(1.0))))
            .await
            .unwrap();
        advance(Duration::from_millis(600)).await;
        let out = coord
            .process_frame(Frame::Marker(SystemMarker::user_started_speaking()))
            .await
            .unwrap();

        assert!(out
            .iter()
            .any(|f| matches!(f, Frame::Token { text } if text == "[INTERRUPTED]")));
        let events = bus
            .event_history(Some(EVENT_INTERRUPTION), None, None)
            .unwrap();
        assert_eq!(events[0].data()["preserve_context"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_while_idle_is_not_an_interruption() {
        let bus = Arc::new(EventBus::with_defaults());
        let mut coord = coordinator(bus.clone());

        let out = coord
            .process_frame(Frame::Marker(SystemMarker::user_started_speaking()))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(bus
            .event_history(Some(EVENT_INTERRUPTION), None, None)
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_after_tts_stopped_is_normal() {
        let bus = Arc::new(EventBus::with_defaults());
        let mut coord = coordinator(bus.clone());

        coord
            .process_frame(Frame::Marker(SystemMarker::tts_started(Some(2.0))))
            .await
            .unwrap();
        coord
            .process_frame(Frame::Marker(SystemMarker::tts_stopped()))
            .await
            .unwrap();
        assert_eq!(coord.state(), PlaybackState::Idle);

        coord
            .process_frame(Frame::Marker(SystemMarker::user_started_speaking()))
            .await
            .unwrap();
        assert!(bus
            .event_history(Some(EVENT_INTERRUPTION), None, None)
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_duration_preserves_context() {
        let bus = Arc::new(EventBus::with_defaults());
        let mut coord = coordinator(bus.clone());

        coord
            .process_frame(Frame::Marker(SystemMarker::tts_started(None)))
            .await
            .unwrap();
        advance(Duration::from_secs(3)).await;
        coord
            .process_frame(Frame::Marker(SystemMarker::user_started_speaking()))
            .await
            .unwrap();

        let events = bus
            .event_history(Some(EVENT_INTERRUPTION), None, None)
            .unwrap();
        let data = events[0].data();
        assert_eq!(data["completion_ratio"], 0.0);
        assert_eq!(data["preserve_context"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_tracking_resets_per_turn() {
        let bus = Arc::new(EventBus::with_defaults());
        let mut coord = coordinator(bus);

        coord.process_frame(Frame::token("The weather ")).await.unwrap();
        coord.process_frame(Frame::token("today is")).await.unwrap();
        assert_eq!(coord.current_response(), "The weather today is");

        coord
            .process_frame(Frame::transcript("stop", true))
            .await
            .unwrap();
        assert_eq!(coord.current_response(), "");
    }
}
