//! In-memory model registry.
//!
//! Models are presentation-level aliases over the single agent engine;
//! an entry can carry a system-prompt override that replaces the default
//! prompt for requests naming that model.

use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub id: String,
    pub description: String,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    entries: RwLock<Vec<ModelEntry>>,
}

impl ModelRegistry {
    /// Registry seeded with the configured default model.
    pub fn with_default(model_id: &str) -> Self {
        Self {
            entries: RwLock::new(vec![ModelEntry {
                id: model_id.to_string(),
                description: "Prism analytics agent".to_string(),
                system_prompt: None,
            }]),
        }
    }

    pub async fn list(&self) -> Vec<ModelEntry> {
        self.entries.read().await.clone()
    }

    /// System-prompt override for the given model, if one is registered.
    pub async fn system_prompt_for(&self, model_id: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.id == model_id)
            .and_then(|entry| entry.system_prompt.clone())
    }

    /// Insert or replace the entry with the same id.
    pub async fn upsert(&self, entry: ModelEntry) {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|existing| existing.id == entry.id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }
}
