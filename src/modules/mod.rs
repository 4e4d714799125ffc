//! Plugin Modules
//!
//! Drop-in extensions hosted by the runtime:
//! - Registry: declaration storage, capability index, load-order resolution
//! - Hooks: extension points with priority and timeout budgets
//! - Runtime: lifecycle, event wiring, out-of-band hook bridging
//! - Memory: bundled conversation-memory module

pub mod hooks;
pub mod memory;
pub mod registry;
pub mod runtime;

use crate::context::HookContext;
use crate::error::{VoxError, VoxResult};
use crate::events::Event;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub use hooks::{ExtensionPoint, HookManager, HookSpec};
pub use memory::MemoryModule;
pub use registry::{ModuleDescriptor, ModuleRegistry};
pub use runtime::ModuleRuntime;

/// Discovery tags a module can advertise. Purely informational: the host
/// finds providers by tag but never enforces behavior behind one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ConversationMemory,
    ContextInjection,
    VoiceRecognition,
    EmotionDetection,
    MetricsCollection,
    AudioProcessing,
    InterruptionHandling,
    CustomCommands,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::ConversationMemory,
        Capability::ContextInjection,
        Capability::VoiceRecognition,
        Capability::EmotionDetection,
        Capability::MetricsCollection,
        Capability::AudioProcessing,
        Capability::InterruptionHandling,
        Capability::CustomCommands,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ConversationMemory => "conversation-memory",
            Capability::ContextInjection => "context-injection",
            Capability::VoiceRecognition => "voice-recognition",
            Capability::EmotionDetection => "emotion-detection",
            Capability::MetricsCollection => "metrics-collection",
            Capability::AudioProcessing => "audio-processing",
            Capability::InterruptionHandling => "interruption-handling",
            Capability::CustomCommands => "custom-commands",
        }
    }

    pub fn parse(s: &str) -> VoxResult<Self> {
        Capability::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| VoxError::Validation(format!("unknown capability '{}'", s)))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pluggable extension of the voice agent.
///
/// `name` and `capabilities` are the mandatory declaration; everything else
/// has a sensible default so a minimal module is a few lines. Modules are
/// shared as `Arc<dyn AgentModule>` and use interior mutability for their
/// own state, like any other engine behind a trait object.
#[async_trait]
pub trait AgentModule: Send + Sync {
    /// Unique module name, also used in dependency declarations
    fn name(&self) -> &str;

    /// Discovery tags this module advertises
    fn capabilities(&self) -> Vec<Capability>;

    /// Extension points this module attaches to
    fn hooks(&self) -> Vec<HookSpec> {
        Vec::new()
    }

    /// Names of modules that must be loaded before this one
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called once when the module is loaded
    async fn initialize(&self) -> VoxResult<()> {
        Ok(())
    }

    /// Called once when the module is unloaded
    async fn shutdown(&self) -> VoxResult<()> {
        Ok(())
    }

    /// Receives every bus event while the module is loaded
    async fn on_event(&self, _event: Arc<Event>) -> VoxResult<()> {
        Ok(())
    }

    /// Handle one extension point invocation; return the (possibly edited)
    /// context for the next handler in the chain
    async fn handle_hook(
        &self,
        _point: ExtensionPoint,
        ctx: HookContext,
    ) -> VoxResult<HookContext> {
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_round_trip() {
        for cap in Capability::ALL {
            assert_eq!(Capability::parse(cap.as_str()).unwrap(), cap);
        }
    }

    #[test]
    fn test_unknown_capability_rejected() {
        let err = Capability::parse("telepathy").unwrap_err();
        assert!(matches!(err, VoxError::Validation(_)));
    }
}
