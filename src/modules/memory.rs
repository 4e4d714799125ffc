//! Conversation Memory Module
//!
//! Bundled module remembering what was said: a bounded short-term history,
//! naive fact extraction from user utterances, and context injection ahead
//! of LLM inference. Doubles as the reference for writing modules.

use crate::config::MemoryConfig;
use crate::context::{ROLE_ASSISTANT, ROLE_USER};
use crate::error::VoxResult;
use crate::events::{Event, EventPayload};
use crate::modules::hooks::{ExtensionPoint, HookSpec};
use crate::modules::{AgentModule, Capability};
use crate::context::HookContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Event kind carrying a finished assistant response; emitted by the LLM
/// side of the pipeline
pub const EVENT_LLM_RESPONSE_COMPLETE: &str = "llm_response_complete";

const MODULE_NAME: &str = "memory";

/// One remembered utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub speaker: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: ROLE_USER.to_string(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: ROLE_ASSISTANT.to_string(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MemoryStore {
    entries: VecDeque<MemoryEntry>,
    facts: HashMap<String, String>,
    preferences: Vec<String>,
}

pub struct MemoryModule {
    max_history: usize,
    save_to_disk: bool,
    path: PathBuf,
    store: Mutex<MemoryStore>,
}

impl MemoryModule {
    pub fn new(config: &MemoryConfig) -> Self {
        let path = if config.memory_file.is_empty() {
            crate::config::default_memory_path()
        } else {
            PathBuf::from(&config.memory_file)
        };
        Self {
            max_history: config.max_history,
            save_to_disk: config.save_to_disk,
            path,
            store: Mutex::new(MemoryStore::default()),
        }
    }

    /// Append an utterance, dropping the oldest beyond the bound. Saves
    /// every tenth entry when persistence is on.
    pub fn remember(&self, entry: MemoryEntry) -> VoxResult<()> {
        let should_save = {
            let mut store = self.store.lock()?;
            store.entries.push_back(entry);
            while store.entries.len() > self.max_history {
                store.entries.pop_front();
            }
            self.save_to_disk && store.entries.len() % 10 == 0
        };
        if should_save {
            self.save()?;
        }
        Ok(())
    }

    /// Naive keyword extraction; a real deployment would swap in NER here
    fn extract_facts(&self, text: &str) -> VoxResult<()> {
        let lower = text.to_lowercase();
        let mut store = self.store.lock()?;

        if let Some(pos) = lower.rfind("my name is") {
            if let Some(rest) = text.get(pos + "my name is".len()..) {
                if let Some(word) = rest.trim().split_whitespace().next() {
                    let name = word.trim_matches(|c: char| !c.is_alphanumeric());
                    if !name.is_empty() {
                        store.facts.insert("name".to_string(), name.to_string());
                    }
                }
            }
        }

        if let Some(pos) = lower.rfind("i like") {
            if let Some(rest) = text.get(pos + "i like".len()..) {
                let liked = rest.trim().trim_end_matches(['.', '!', '?']).trim();
                if !liked.is_empty()
                    && !store
                        .preferences
                        .iter()
                        .any(|p| p.eq_ignore_ascii_case(liked))
                {
                    store.preferences.push(liked.to_string());
                }
            }
        }
        Ok(())
    }

    pub fn recent_context(&self, num_turns: usize) -> VoxResult<Vec<MemoryEntry>> {
        let store = self.store.lock()?;
        let start = store.entries.len().saturating_sub(num_turns);
        Ok(store.entries.iter().skip(start).cloned().collect())
    }

    pub fn facts(&self) -> VoxResult<HashMap<String, String>> {
        Ok(self.store.lock()?.facts.clone())
    }

    pub fn preferences(&self) -> VoxResult<Vec<String>> {
        Ok(self.store.lock()?.preferences.clone())
    }

    /// Case-insensitive substring search over everything remembered
    pub fn search(&self, query: &str) -> VoxResult<Vec<MemoryEntry>> {
        let query = query.to_lowercase();
        let store = self.store.lock()?;
        Ok(store
            .entries
            .iter()
            .filter(|e| e.text.to_lowercase().contains(&query))
            .cloned()
            .collect())
    }

    /// Everything a context-enrichment consumer wants in one object
    pub fn context_summary(&self, num_turns: usize) -> VoxResult<Value> {
        let store = self.store.lock()?;
        let start = store.entries.len().saturating_sub(num_turns);
        let recent: Vec<&MemoryEntry> = store.entries.iter().skip(start).collect();
        Ok(json!({
            "recent_history": recent,
            "facts": store.facts,
            "preferences": store.preferences,
            "conversation_length": store.entries.len(),
        }))
    }

    pub fn save(&self) -> VoxResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = {
            let store = self.store.lock()?;
            serde_json::to_string_pretty(&*store)?
        };
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Restore persisted memory; a corrupt or missing file leaves the
    /// module empty rather than failing the load
    pub fn load_from_disk(&self) -> VoxResult<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let content = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<MemoryStore>(&content) {
            Ok(mut loaded) => {
                while loaded.entries.len() > self.max_history {
                    loaded.entries.pop_front();
                }
                *self.store.lock()? = loaded;
                Ok(true)
            }
            Err(e) => {
                warn!(
                    "⚠️ Memory file {} corrupted, starting empty: {}",
                    self.path.display(),
                    e
                );
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl AgentModule for MemoryModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::ConversationMemory, Capability::ContextInjection]
    }

    fn hooks(&self) -> Vec<HookSpec> {
        vec![HookSpec::new(ExtensionPoint::PreLlm).with_priority(30)]
    }

    async fn initialize(&self) -> VoxResult<()> {
        if self.save_to_disk && self.load_from_disk()? {
            let count = self.store.lock()?.entries.len();
            info!(
                "🧠 Memory restored: {} entries from {}",
                count,
                self.path.display()
            );
        }
        Ok(())
    }

    async fn shutdown(&self) -> VoxResult<()> {
        if self.save_to_disk {
            self.save()?;
        }
        Ok(())
    }

    async fn on_event(&self, event: Arc<Event>) -> VoxResult<()> {
        match &event.payload {
            EventPayload::TranscriptionFinal { text, .. } => {
                self.remember(MemoryEntry::user(text.clone()))?;
                self.extract_facts(text)?;
            }
            EventPayload::Custom { kind, data } if kind == EVENT_LLM_RESPONSE_COMPLETE => {
                if let Some(text) = data.get("text").and_then(Value::as_str) {
                    self.remember(MemoryEntry::assistant(text.to_string()))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_hook(
        &self,
        point: ExtensionPoint,
        mut ctx: HookContext,
    ) -> VoxResult<HookContext> {
        if point == ExtensionPoint::PreLlm {
            ctx.set_module_data(MODULE_NAME, "context", self.context_summary(5)?);
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> MemoryModule {
        MemoryModule::new(&MemoryConfig {
            max_history: 5,
            save_to_disk: false,
            memory_file: String::new(),
        })
    }

    fn event(payload: EventPayload) -> Arc<Event> {
        Arc::new(Event {
            id: 0,
            timestamp: 0.0,
            payload,
        })
    }

    #[test]
    fn test_history_is_bounded() {
        let memory = module();
        for i in 0..8 {
            memory
                .remember(MemoryEntry::user(format!("utterance {}", i)))
                .unwrap();
        }
        let recent = memory.recent_context(10).unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].text, "utterance 3");
    }

    #[test]
    fn test_fact_extraction() {
        let memory = module();
        memory.extract_facts("Hello, my name is Ada.").unwrap();
        memory.extract_facts("I like green tea").unwrap();
        memory.extract_facts("i like green tea!").unwrap();
        memory.extract_facts("Also, I like long walks.").unwrap();

        let facts = memory.facts().unwrap();
        assert_eq!(facts.get("name").map(String::as_str), Some("Ada"));
        assert_eq!(
            memory.preferences().unwrap(),
            vec!["green tea".to_string(), "long walks".to_string()]
        );
    }

    #[test]
    fn test_search() {
        let memory = module();
        memory.remember(MemoryEntry::user("the weather is nice")).unwrap();
        memory
            .remember(MemoryEntry::assistant("Yes, sunny all day"))
            .unwrap();

        let hits = memory.search("SUNNY").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].speaker, ROLE_ASSISTANT);
        assert!(memory.search("snow").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_build_memory() {
        let memory = module();

        memory
            .on_event(event(EventPayload::TranscriptionFinal {
                text: "my name is Grace".to_string(),
                confidence: 1.0,
            }))
            .await
            .unwrap();
        memory
            .on_event(event(EventPayload::Custom {
                kind: EVENT_LLM_RESPONSE_COMPLETE.to_string(),
                data: json!({ "text": "Nice to meet you, Grace" }),
            }))
            .await
            .unwrap();

        let recent = memory.recent_context(5).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].speaker, ROLE_USER);
        assert_eq!(recent[1].speaker, ROLE_ASSISTANT);
        assert_eq!(
            memory.facts().unwrap().get("name").map(String::as_str),
            Some("Grace")
        );
    }

    #[tokio::test]
    async fn test_hook_injects_context_before_llm() {
        let memory = module();
        memory.remember(MemoryEntry::user("I like jazz")).unwrap();
        memory.extract_facts("I like jazz").unwrap();

        let out = memory
            .handle_hook(ExtensionPoint::PreLlm, HookContext::default())
            .await
            .unwrap();
        let injected = out.module_data(MODULE_NAME, "context").unwrap();
        assert_eq!(injected["conversation_length"], 1);
        assert_eq!(injected["preferences"][0], "jazz");

        // Other points pass through untouched
        let untouched = memory
            .handle_hook(ExtensionPoint::PostTts, HookContext::default())
            .await
            .unwrap();
        assert!(untouched.module_data.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = MemoryConfig {
            max_history: 10,
            save_to_disk: true,
            memory_file: dir
                .path()
                .join("memory.json")
                .to_string_lossy()
                .to_string(),
        };

        let first = MemoryModule::new(&config);
        first.remember(MemoryEntry::user("my name is Lin")).unwrap();
        first.extract_facts("my name is Lin").unwrap();
        first.shutdown().await.unwrap();

        let second = MemoryModule::new(&config);
        second.initialize().await.unwrap();
        assert_eq!(second.recent_context(5).unwrap().len(), 1);
        assert_eq!(
            second.facts().unwrap().get("name").map(String::as_str),
            Some("Lin")
        );
    }

    #[tokio::test]
    async fn test_corrupt_memory_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "{ not json").unwrap();

        let memory = MemoryModule::new(&MemoryConfig {
            max_history: 10,
            save_to_disk: true,
            memory_file: path.to_string_lossy().to_string(),
        });
        assert!(!memory.load_from_disk().unwrap());
        assert!(memory.recent_context(5).unwrap().is_empty());
    }
}
