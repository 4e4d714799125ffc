//! Frame-to-Event Bridge
//!
//! Mirrors pipeline lifecycle frames and system markers onto the event bus
//! so external consumers (modules, monitoring) observe the pipeline without
//! sitting in the frame stream.

use crate::error::VoxResult;
use crate::events::{EventBus, EventPayload};
use crate::frames::{
    Frame, FrameTap, SystemMarker, MARKER_ERROR, MARKER_TTS_STARTED, MARKER_TTS_STOPPED,
    MARKER_USER_STARTED_SPEAKING,
};
use async_trait::async_trait;
use std::sync::Arc;

pub struct EventTap {
    bus: Arc<EventBus>,
}

impl EventTap {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    fn marker_payload(marker: &SystemMarker) -> EventPayload {
        match marker.name.as_str() {
            MARKER_TTS_STARTED => EventPayload::TtsStarted {
                expected_duration_secs: marker.expected_duration(),
            },
            MARKER_TTS_STOPPED => EventPayload::TtsStopped,
            MARKER_USER_STARTED_SPEAKING => EventPayload::UserStartedSpeaking,
            MARKER_ERROR => EventPayload::Error {
                message: marker.error_message().unwrap_or("unknown").to_string(),
            },
            _ => EventPayload::Custom {
                kind: marker.name.clone(),
                data: marker.data.clone(),
            },
        }
    }
}

#[async_trait]
impl FrameTap for EventTap {
    fn name(&self) -> &str {
        "event_bridge"
    }

    async fn process_frame(&mut self, frame: Frame) -> VoxResult<Vec<Frame>> {
        match &frame {
            Frame::Start => {
                self.bus.emit(EventPayload::PipelineStarted).await?;
            }
            Frame::End => {
                self.bus.emit(EventPayload::PipelineEnded).await?;
            }
            Frame::Marker(marker) => {
                self.bus.emit(Self::marker_payload(marker)).await?;
            }
            Frame::Transcript { text, is_final } if *is_final => {
                // Upstream STT reports no confidence over this contract
                self.bus
                    .emit(EventPayload::TranscriptionFinal {
                        text: text.clone(),
                        confidence: 1.0,
                    })
                    .await?;
            }
            _ => {}
        }
        Ok(vec![frame])
    }
}
