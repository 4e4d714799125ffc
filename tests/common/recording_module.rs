//! Recording Module for Testing
//!
//! Captures every event and hook invocation it sees so tests can assert on
//! ordering and content.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use voxweave::context::HookContext;
use voxweave::error::VoxResult;
use voxweave::events::Event;
use voxweave::modules::hooks::{ExtensionPoint, HookSpec};
use voxweave::modules::{AgentModule, Capability};

/// Module double that records what the runtime feeds it
pub struct RecordingModule {
    name: String,
    hooks: Vec<HookSpec>,
    dependencies: Vec<String>,
    /// Event kinds in delivery order
    pub seen_events: Arc<Mutex<Vec<String>>>,
    /// Extension points in invocation order
    pub seen_hooks: Arc<Mutex<Vec<String>>>,
}

impl RecordingModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hooks: Vec::new(),
            dependencies: Vec::new(),
            seen_events: Arc::new(Mutex::new(Vec::new())),
            seen_hooks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_hook(mut self, spec: HookSpec) -> Self {
        self.hooks.push(spec);
        self
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[async_trait]
impl AgentModule for RecordingModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::CustomCommands]
    }

    fn hooks(&self) -> Vec<HookSpec> {
        self.hooks.clone()
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    async fn on_event(&self, event: Arc<Event>) -> VoxResult<()> {
        if let Ok(mut seen) = self.seen_events.lock() {
            seen.push(event.kind().to_string());
        }
        Ok(())
    }

    async fn handle_hook(
        &self,
        point: ExtensionPoint,
        ctx: HookContext,
    ) -> VoxResult<HookContext> {
        if let Ok(mut seen) = self.seen_hooks.lock() {
            seen.push(point.to_string());
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxweave::events::EventPayload;

    #[tokio::test]
    async fn test_recording_module_captures_events() {
        let module = RecordingModule::new("probe");
        module
            .on_event(Arc::new(Event {
                id: 0,
                timestamp: 0.0,
                payload: EventPayload::PipelineStarted,
            }))
            .await
            .unwrap();
        assert_eq!(*module.seen_events.lock().unwrap(), vec!["pipeline_started"]);
    }
}
