//! Conversation Context
//!
//! Shared state for one conversation: turn history, the in-flight
//! transcription and response, interruption bookkeeping, and scratch space
//! for modules. Shared by handle (`Arc<ConversationContext>`); every
//! critical section is short and guards never cross an await.

use crate::error::VoxResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

/// Default turn history bound
pub const DEFAULT_MAX_TURNS: usize = 50;

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Turn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ROLE_USER, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ROLE_ASSISTANT, content)
    }
}

/// Owned context value threaded through a hook chain.
///
/// Clones are cheap enough that the hook runner can keep the pre-handler
/// value and genuinely fall back to it when a handler fails or times out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookContext {
    pub transcription: Option<String>,
    pub response_text: Option<String>,
    pub interrupted: bool,
    pub interruption_marker: Option<String>,
    /// Per-module scratch data, keyed by module name then entry key
    pub module_data: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
}

impl HookContext {
    pub fn set_module_data(&mut self, module: &str, key: &str, value: Value) {
        let entry = self
            .module_data
            .entry(module.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = entry {
            map.insert(key.to_string(), value);
        }
    }

    pub fn module_data(&self, module: &str, key: &str) -> Option<&Value> {
        self.module_data.get(module).and_then(|v| v.get(key))
    }
}

/// Serializable view of the whole conversation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub history: Vec<Turn>,
    pub transcription: Option<String>,
    pub response_text: Option<String>,
    pub interrupted: bool,
    pub interruption_marker: Option<String>,
    pub module_data: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
}

#[derive(Default)]
struct ContextState {
    history: Vec<Turn>,
    transcription: Option<String>,
    response_text: Option<String>,
    interrupted: bool,
    interruption_marker: Option<String>,
    module_data: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
}

/// Shared conversation state with a bounded turn history
pub struct ConversationContext {
    inner: Mutex<ContextState>,
    max_turns: usize,
}

impl ConversationContext {
    pub fn new(max_turns: usize) -> Self {
        Self {
            inner: Mutex::new(ContextState::default()),
            max_turns,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }

    /// Append a turn, dropping the oldest once the bound is hit
    pub fn add_turn(&self, turn: Turn) -> VoxResult<()> {
        let mut state = self.inner.lock()?;
        state.history.push(turn);
        if state.history.len() > self.max_turns {
            let excess = state.history.len() - self.max_turns;
            state.history.drain(..excess);
        }
        Ok(())
    }

    pub fn history(&self) -> VoxResult<Vec<Turn>> {
        Ok(self.inner.lock()?.history.clone())
    }

    pub fn recent_turns(&self, n: usize) -> VoxResult<Vec<Turn>> {
        let state = self.inner.lock()?;
        let start = state.history.len().saturating_sub(n);
        Ok(state.history[start..].to_vec())
    }

    pub fn set_transcription(&self, text: impl Into<String>) -> VoxResult<()> {
        self.inner.lock()?.transcription = Some(text.into());
        Ok(())
    }

    pub fn transcription(&self) -> VoxResult<Option<String>> {
        Ok(self.inner.lock()?.transcription.clone())
    }

    pub fn set_response_text(&self, text: impl Into<String>) -> VoxResult<()> {
        self.inner.lock()?.response_text = Some(text.into());
        Ok(())
    }

    pub fn response_text(&self) -> VoxResult<Option<String>> {
        Ok(self.inner.lock()?.response_text.clone())
    }

    /// Mark the conversation interrupted, remembering the context marker
    /// that was injected into the stream
    pub fn set_interrupted(&self, marker: Option<String>) -> VoxResult<()> {
        let mut state = self.inner.lock()?;
        state.interrupted = true;
        state.interruption_marker = marker;
        Ok(())
    }

    /// Reset after the interruption has been absorbed into a new turn
    pub fn clear_interrupted(&self) -> VoxResult<()> {
        let mut state = self.inner.lock()?;
        state.interrupted = false;
        state.interruption_marker = None;
        Ok(())
    }

    pub fn is_interrupted(&self) -> VoxResult<bool> {
        Ok(self.inner.lock()?.interrupted)
    }

    pub fn interruption_marker(&self) -> VoxResult<Option<String>> {
        Ok(self.inner.lock()?.interruption_marker.clone())
    }

    pub fn set_module_data(&self, module: &str, key: &str, value: Value) -> VoxResult<()> {
        let mut state = self.inner.lock()?;
        let entry = state
            .module_data
            .entry(module.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = entry {
            map.insert(key.to_string(), value);
        }
        Ok(())
    }

    pub fn module_data(&self, module: &str, key: &str) -> VoxResult<Option<Value>> {
        let state = self.inner.lock()?;
        Ok(state
            .module_data
            .get(module)
            .and_then(|v| v.get(key))
            .cloned())
    }

    pub fn set_metadata(&self, key: &str, value: Value) -> VoxResult<()> {
        self.inner.lock()?.metadata.insert(key.to_string(), value);
        Ok(())
    }

    pub fn metadata(&self, key: &str) -> VoxResult<Option<Value>> {
        Ok(self.inner.lock()?.metadata.get(key).cloned())
    }

    /// Owned value for one hook chain run
    pub fn hook_context(&self) -> VoxResult<HookContext> {
        let state = self.inner.lock()?;
        Ok(HookContext {
            transcription: state.transcription.clone(),
            response_text: state.response_text.clone(),
            interrupted: state.interrupted,
            interruption_marker: state.interruption_marker.clone(),
            module_data: state.module_data.clone(),
            metadata: state.metadata.clone(),
        })
    }

    /// Write a finished hook chain's edits back. Interruption flags are
    /// owned by the pipeline side and not absorbed from hooks.
    pub fn absorb(&self, ctx: HookContext) -> VoxResult<()> {
        let mut state = self.inner.lock()?;
        state.transcription = ctx.transcription;
        state.response_text = ctx.response_text;
        state.module_data = ctx.module_data;
        state.metadata = ctx.metadata;
        Ok(())
    }

    pub fn snapshot(&self) -> VoxResult<ContextSnapshot> {
        let state = self.inner.lock()?;
        Ok(ContextSnapshot {
            history: state.history.clone(),
            transcription: state.transcription.clone(),
            response_text: state.response_text.clone(),
            interrupted: state.interrupted,
            interruption_marker: state.interruption_marker.clone(),
            module_data: state.module_data.clone(),
            metadata: state.metadata.clone(),
        })
    }
}
