pub mod recording_module;

use std::sync::Arc;
use std::time::Duration;
use voxweave::config::InterruptionConfig;
use voxweave::context::ConversationContext;
use voxweave::events::tap::EventTap;
use voxweave::events::EventBus;
use voxweave::frames::TapChain;
use voxweave::interruption::InterruptionCoordinator;
use voxweave::metrics::MetricsAggregator;
use voxweave::modules::runtime::ModuleRuntime;

/// Full orchestration stack wired the way the demo binary wires it: event
/// tap, metrics, and interruption handling on the frame stream, module
/// runtime on the bus.
pub struct TestHarness {
    pub bus: Arc<EventBus>,
    pub context: Arc<ConversationContext>,
    pub runtime: ModuleRuntime,
    pub chain: TapChain,
}

impl TestHarness {
    /// Harness with a metrics interval long enough to never fire on its own
    pub fn new() -> Self {
        Self::with_metrics_interval(Duration::from_secs(3600))
    }

    pub fn with_metrics_interval(emit_interval: Duration) -> Self {
        let bus = Arc::new(EventBus::with_defaults());
        let context = Arc::new(ConversationContext::with_defaults());
        let mut runtime = ModuleRuntime::new(bus.clone(), context.clone());
        runtime.attach().expect("Failed to attach module runtime");

        let mut chain = TapChain::new();
        chain.add(EventTap::new(bus.clone()));
        chain.add(MetricsAggregator::new(bus.clone(), emit_interval));
        chain.add(InterruptionCoordinator::from_config(
            bus.clone(),
            &InterruptionConfig::default(),
        ));

        Self {
            bus,
            context,
            runtime,
            chain,
        }
    }
}
