//! The AI capability slot: at most one loaded provider, plus its status and config.

use brainmap_core::{AiConfig, AiStatus, Error, Result};
use brainmap_llm::{LlmResult, StructuredProvider};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Builds a provider from the current AI config.
pub type ProviderFactory = Arc<dyn Fn(&AiConfig) -> LlmResult<Arc<dyn StructuredProvider>> + Send + Sync>;

struct Slot {
    provider: Option<Arc<dyn StructuredProvider>>,
    status: AiStatus,
}

pub struct ModelSlot {
    slot: RwLock<Slot>,
    config: RwLock<AiConfig>,
    factory: ProviderFactory,
}

impl ModelSlot {
    pub fn new(config: AiConfig, factory: ProviderFactory) -> Self {
        Self {
            slot: RwLock::new(Slot {
                provider: None,
                status: AiStatus::unloaded(),
            }),
            config: RwLock::new(config),
            factory,
        }
    }

    /// Slot backed by `brainmap_llm::from_config`.
    pub fn from_config(config: AiConfig) -> Self {
        Self::new(config, Arc::new(|c: &AiConfig| brainmap_llm::from_config(c)))
    }

    /// Slot that already holds `provider`. Loading again reinstalls it.
    pub fn preloaded(provider: Arc<dyn StructuredProvider>) -> Self {
        let status = AiStatus::ready(provider.name(), provider.model());
        let installed = provider.clone();
        Self {
            slot: RwLock::new(Slot {
                provider: Some(provider),
                status,
            }),
            config: RwLock::new(AiConfig::default()),
            factory: Arc::new(move |_: &AiConfig| -> LlmResult<Arc<dyn StructuredProvider>> {
                Ok(installed.clone())
            }),
        }
    }

    pub async fn current(&self) -> Option<Arc<dyn StructuredProvider>> {
        self.slot.read().await.provider.clone()
    }

    pub async fn status(&self) -> AiStatus {
        self.slot.read().await.status.clone()
    }

    pub async fn config(&self) -> AiConfig {
        self.config.read().await.clone()
    }

    /// Drop the current provider and build a new one from the config.
    pub async fn load(&self) -> AiStatus {
        let config = self.config().await;
        {
            let mut slot = self.slot.write().await;
            slot.provider = None;
            slot.status = AiStatus::loading();
        }

        info!("Loading AI model {} ({})", config.model, config.provider);
        let mut slot = self.slot.write().await;
        match (self.factory)(&config) {
            Ok(provider) => {
                slot.status = AiStatus::ready(provider.name(), provider.model());
                slot.provider = Some(provider);
                info!("AI model ready");
            }
            Err(e) => {
                error!("Failed to load AI model: {}", e);
                slot.status = AiStatus::error(e.to_string());
            }
        }
        slot.status.clone()
    }

    pub async fn unload(&self) -> AiStatus {
        let mut slot = self.slot.write().await;
        slot.provider = None;
        slot.status = AiStatus::unloaded();
        info!("AI model unloaded");
        slot.status.clone()
    }

    /// Shallow-merge a partial config object. Takes effect on the next load.
    pub async fn update_config(&self, partial: &serde_json::Value) -> Result<AiConfig> {
        let patch = partial
            .as_object()
            .ok_or_else(|| Error::InvalidMessage("ai config must be an object".into()))?;
        let mut config = self.config.write().await;
        let mut merged = serde_json::to_value(&*config)?;
        if let Some(obj) = merged.as_object_mut() {
            for (k, v) in patch {
                obj.insert(k.clone(), v.clone());
            }
        }
        let updated: AiConfig =
            serde_json::from_value(merged).map_err(|e| Error::InvalidMessage(e.to_string()))?;
        *config = updated.clone();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brainmap_core::ModelState;
    use brainmap_llm::LlmError;

    fn failing() -> ModelSlot {
        ModelSlot::new(
            AiConfig::default(),
            Arc::new(|_: &AiConfig| -> LlmResult<Arc<dyn StructuredProvider>> {
                Err(LlmError::NotConfigured("no key".into()))
            }),
        )
    }

    #[tokio::test]
    async fn load_failure_reports_error() {
        let slot = failing();
        assert_eq!(slot.status().await.status, ModelState::Unloaded);
        let status = slot.load().await;
        assert_eq!(status.status, ModelState::Error);
        assert!(status.error.unwrap().contains("no key"));
        assert!(slot.current().await.is_none());
    }

    #[tokio::test]
    async fn config_merge_is_shallow() {
        let slot = failing();
        let updated = slot
            .update_config(&serde_json::json!({ "model": "claude-other", "log_prompts": true }))
            .await
            .unwrap();
        assert_eq!(updated.model, "claude-other");
        assert!(updated.log_prompts);
        assert_eq!(updated.provider, "anthropic");
        assert!(slot.update_config(&serde_json::json!({ "autoload": "yes" })).await.is_err());
        assert_eq!(slot.config().await.model, "claude-other");
    }
}
