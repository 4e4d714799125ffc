//! Extension Points
//!
//! Named positions in the pipeline lifecycle where modules can transform
//! the conversation context. Handlers run as a sequential reducer chain in
//! priority order; a handler that fails or overruns its budget is logged
//! and skipped, and the chain continues with the context it received.

use crate::context::HookContext;
use crate::error::VoxResult;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// Where in the pipeline lifecycle a hook runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionPoint {
    PipelineStart,
    PreVad,
    PostVad,
    PreStt,
    PostStt,
    PreLlm,
    LlmStreaming,
    PostLlm,
    PreTts,
    TtsStreaming,
    PostTts,
    PipelineEnd,
    /// Out of band: fires on barge-in, not in the stage traversal
    Interruption,
    /// Out of band: fires on pipeline errors
    Error,
}

impl ExtensionPoint {
    /// Canonical stage order for one pass through the pipeline.
    /// `Interruption` and `Error` fire out of band and are excluded.
    pub const fn traversal_order() -> [ExtensionPoint; 12] {
        [
            ExtensionPoint::PipelineStart,
            ExtensionPoint::PreVad,
            ExtensionPoint::PostVad,
            ExtensionPoint::PreStt,
            ExtensionPoint::PostStt,
            ExtensionPoint::PreLlm,
            ExtensionPoint::LlmStreaming,
            ExtensionPoint::PostLlm,
            ExtensionPoint::PreTts,
            ExtensionPoint::TtsStreaming,
            ExtensionPoint::PostTts,
            ExtensionPoint::PipelineEnd,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionPoint::PipelineStart => "pipeline_start",
            ExtensionPoint::PreVad => "pre_vad",
            ExtensionPoint::PostVad => "post_vad",
            ExtensionPoint::PreStt => "pre_stt",
            ExtensionPoint::PostStt => "post_stt",
            ExtensionPoint::PreLlm => "pre_llm",
            ExtensionPoint::LlmStreaming => "llm_streaming",
            ExtensionPoint::PostLlm => "post_llm",
            ExtensionPoint::PreTts => "pre_tts",
            ExtensionPoint::TtsStreaming => "tts_streaming",
            ExtensionPoint::PostTts => "post_tts",
            ExtensionPoint::PipelineEnd => "pipeline_end",
            ExtensionPoint::Interruption => "interruption",
            ExtensionPoint::Error => "error",
        }
    }
}

impl fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default handler priority; lower runs earlier
pub const DEFAULT_PRIORITY: i32 = 50;

/// How a module attaches to one extension point
#[derive(Debug, Clone)]
pub struct HookSpec {
    pub point: ExtensionPoint,
    /// Lower runs earlier; equal priorities keep registration order
    pub priority: i32,
    /// Per-invocation budget; `None` means unbounded
    pub timeout: Option<Duration>,
}

impl HookSpec {
    pub fn new(point: ExtensionPoint) -> Self {
        Self {
            point,
            priority: DEFAULT_PRIORITY,
            timeout: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Uniform async hook handler signature
pub type HookHandler =
    Arc<dyn Fn(HookContext) -> BoxFuture<'static, VoxResult<HookContext>> + Send + Sync>;

/// Wrap an async closure as a [`HookHandler`]
pub fn hook_handler<F, Fut>(f: F) -> HookHandler
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = VoxResult<HookContext>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

struct RegisteredHook {
    module: String,
    priority: i32,
    timeout: Option<Duration>,
    enabled: bool,
    handler: HookHandler,
}

/// Per-point handler tables with priority ordering and fail-open execution
#[derive(Default)]
pub struct HookManager {
    hooks: Mutex<HashMap<ExtensionPoint, Vec<RegisteredHook>>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, module: &str, spec: &HookSpec, handler: HookHandler) -> VoxResult<()> {
        let mut hooks = self.hooks.lock()?;
        let list = hooks.entry(spec.point).or_default();
        list.push(RegisteredHook {
            module: module.to_string(),
            priority: spec.priority,
            timeout: spec.timeout,
            enabled: true,
            handler,
        });
        // Stable sort: equal priorities keep registration order
        list.sort_by_key(|h| h.priority);
        debug!(
            "Hook registered: {} on {} (priority {})",
            module, spec.point, spec.priority
        );
        Ok(())
    }

    /// Drop every hook a module registered
    pub fn unregister_module(&self, module: &str) -> VoxResult<()> {
        let mut hooks = self.hooks.lock()?;
        for list in hooks.values_mut() {
            list.retain(|h| h.module != module);
        }
        Ok(())
    }

    /// Disabled hooks are skipped without disturbing the others' order
    pub fn set_module_enabled(&self, module: &str, enabled: bool) -> VoxResult<()> {
        let mut hooks = self.hooks.lock()?;
        for list in hooks.values_mut() {
            for hook in list.iter_mut().filter(|h| h.module == module) {
                hook.enabled = enabled;
            }
        }
        Ok(())
    }

    pub fn handler_count(&self, point: ExtensionPoint) -> VoxResult<usize> {
        let hooks = self.hooks.lock()?;
        Ok(hooks.get(&point).map_or(0, Vec::len))
    }

    /// Run every enabled handler for `point` as a reducer over `ctx`.
    ///
    /// A handler error or timeout is logged and the chain continues with
    /// the context that handler received. The chain itself never errors.
    pub async fn execute_hooks(
        &self,
        point: ExtensionPoint,
        ctx: HookContext,
    ) -> VoxResult<HookContext> {
        let snapshot: Vec<(String, Option<Duration>, HookHandler)> = {
            let hooks = self.hooks.lock()?;
            match hooks.get(&point) {
                Some(list) => list
                    .iter()
                    .filter(|h| h.enabled)
                    .map(|h| (h.module.clone(), h.timeout, h.handler.clone()))
                    .collect(),
                None => return Ok(ctx),
            }
        };

        let mut current = ctx;
        for (module, budget, handler) in snapshot {
            let fallback = current.clone();
            let outcome = match budget {
                Some(limit) => match timeout(limit, handler(current)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            "Hook '{}' on {} exceeded its {:?} budget, continuing",
                            module, point, limit
                        );
                        current = fallback;
                        continue;
                    }
                },
                None => handler(current).await,
            };
            current = match outcome {
                Ok(next) => next,
                Err(e) => {
                    warn!("Hook '{}' on {} failed: {}, continuing", module, point, e);
                    fallback
                }
            };
        }
        Ok(current)
    }
}
