//! Module Runtime
//!
//! Hosts loaded modules: drives their lifecycle, feeds them every bus
//! event, registers their hooks, and bridges out-of-band events
//! (interruption, error, pipeline start/end) to the matching extension
//! points. The runtime listens on the bus only; it never sits in the frame
//! stream.

use crate::context::{ConversationContext, HookContext};
use crate::error::{VoxError, VoxResult};
use crate::events::{async_handler, Event, EventBus, EventPayload, SubscriptionId, WILDCARD};
use crate::interruption::{context_marker, InterruptionDecision};
use crate::modules::hooks::{ExtensionPoint, HookManager};
use crate::modules::registry::ModuleRegistry;
use crate::modules::AgentModule;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ModuleRuntime {
    bus: Arc<EventBus>,
    context: Arc<ConversationContext>,
    hooks: Arc<HookManager>,
    registry: ModuleRegistry,
    subscriptions: HashMap<String, SubscriptionId>,
    bridge_subscription: Option<SubscriptionId>,
}

impl ModuleRuntime {
    pub fn new(bus: Arc<EventBus>, context: Arc<ConversationContext>) -> Self {
        Self {
            bus,
            context,
            hooks: Arc::new(HookManager::new()),
            registry: ModuleRegistry::new(),
            subscriptions: HashMap::new(),
            bridge_subscription: None,
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn hooks(&self) -> Arc<HookManager> {
        self.hooks.clone()
    }

    pub fn context(&self) -> Arc<ConversationContext> {
        self.context.clone()
    }

    pub fn loaded_modules(&self) -> Vec<String> {
        self.registry.module_names()
    }

    /// Start bridging bus events to the out-of-band extension points.
    /// Idempotent.
    pub fn attach(&mut self) -> VoxResult<()> {
        if self.bridge_subscription.is_some() {
            return Ok(());
        }
        let hooks = self.hooks.clone();
        let context = self.context.clone();
        let id = self.bus.subscribe(
            WILDCARD,
            async_handler(move |event: Arc<Event>| {
                let hooks = hooks.clone();
                let context = context.clone();
                async move { bridge_event(&hooks, &context, event).await }
            }),
        )?;
        self.bridge_subscription = Some(id);
        Ok(())
    }

    /// Register and activate one module immediately
    pub async fn load(&mut self, module: Arc<dyn AgentModule>) -> VoxResult<()> {
        let name = module.name().to_string();
        self.registry.register(module)?;
        self.activate(&name).await
    }

    /// Register a batch, resolve their dependency order, and activate them
    /// in that order. Returns the resolved order.
    pub async fn load_all(
        &mut self,
        modules: Vec<Arc<dyn AgentModule>>,
    ) -> VoxResult<Vec<String>> {
        let mut names = Vec::with_capacity(modules.len());
        for module in modules {
            names.push(module.name().to_string());
            self.registry.register(module)?;
        }
        let order = self.registry.load_order(&names)?;
        for name in &order {
            self.activate(name).await?;
        }
        Ok(order)
    }

    async fn activate(&mut self, name: &str) -> VoxResult<()> {
        let descriptor = self
            .registry
            .get(name)
            .ok_or_else(|| VoxError::UnknownModule(name.to_string()))?
            .clone();
        let module = descriptor.module.clone();

        if let Err(e) = module.initialize().await {
            // A module that failed to come up leaves no trace behind
            let _ = self.registry.unregister(name);
            return Err(e);
        }

        let subscription = {
            let module = module.clone();
            self.bus.subscribe(
                WILDCARD,
                async_handler(move |event: Arc<Event>| {
                    let module = module.clone();
                    async move { module.on_event(event).await }
                }),
            )?
        };
        self.subscriptions.insert(name.to_string(), subscription);

        for spec in &descriptor.hooks {
            let module = module.clone();
            let point = spec.point;
            self.hooks.register(
                name,
                spec,
                Arc::new(move |ctx| {
                    let module = module.clone();
                    Box::pin(async move { module.handle_hook(point, ctx).await })
                }),
            )?;
        }

        info!("🧩 Module '{}' loaded", name);
        self.bus
            .emit(EventPayload::ModuleLoaded {
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Shut a module down and remove all its wiring
    pub async fn unload(&mut self, name: &str) -> VoxResult<()> {
        let descriptor = self
            .registry
            .get(name)
            .ok_or_else(|| VoxError::UnknownModule(name.to_string()))?
            .clone();

        if let Err(e) = descriptor.module.shutdown().await {
            warn!("Module '{}' shutdown failed: {}", name, e);
        }
        if let Some(subscription) = self.subscriptions.remove(name) {
            self.bus.unsubscribe(subscription)?;
        }
        self.hooks.unregister_module(name)?;
        self.registry.unregister(name)?;

        info!("🧩 Module '{}' unloaded", name);
        self.bus
            .emit(EventPayload::ModuleUnloaded {
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Toggle a module's hook execution; its event subscription stays live
    pub fn set_enabled(&self, name: &str, enabled: bool) -> VoxResult<()> {
        if !self.registry.contains(name) {
            return Err(VoxError::UnknownModule(name.to_string()));
        }
        self.hooks.set_module_enabled(name, enabled)
    }

    /// Run one extension point over the shared conversation context.
    /// Pipeline embedders call this at the matching stage positions.
    pub async fn run_point(&self, point: ExtensionPoint) -> VoxResult<HookContext> {
        let ctx = self.context.hook_context()?;
        let result = self.hooks.execute_hooks(point, ctx).await?;
        self.context.absorb(result.clone())?;
        Ok(result)
    }
}

impl Drop for ModuleRuntime {
    fn drop(&mut self) {
        if let Some(id) = self.bridge_subscription.take() {
            let _ = self.bus.unsubscribe(id);
        }
        for (_, id) in self.subscriptions.drain() {
            let _ = self.bus.unsubscribe(id);
        }
    }
}

async fn bridge_event(
    hooks: &HookManager,
    context: &ConversationContext,
    event: Arc<Event>,
) -> VoxResult<()> {
    let point = match &event.payload {
        EventPayload::PipelineStarted => ExtensionPoint::PipelineStart,
        EventPayload::PipelineEnded => ExtensionPoint::PipelineEnd,
        EventPayload::Interruption { .. } => ExtensionPoint::Interruption,
        EventPayload::Error { .. } => ExtensionPoint::Error,
        _ => return Ok(()),
    };

    if let EventPayload::Interruption {
        completion_ratio,
        preserve_context,
        elapsed_ms,
    } = &event.payload
    {
        let decision = InterruptionDecision {
            completion_ratio: *completion_ratio,
            preserve_context: *preserve_context,
            elapsed_ms: *elapsed_ms,
        };
        context.set_interrupted(Some(context_marker(&decision)))?;
    }

    let ctx = context.hook_context()?;
    let result = hooks.execute_hooks(point, ctx).await?;
    context.absorb(result)?;
    Ok(())
}
