//! Provider factory registry.
//!
//! The mission runtime resolves a model reference (`provider/model`, per
//! the `models[provider][key]` configuration surface in spec §6) to a
//! concrete [`crate::LLMProvider`] exactly once, at mission start
//! (spec §4.1). Concrete provider clients are out of scope for this
//! crate (spec §1); embedders register a [`ProviderFactory`] per backend
//! they want to support. Unlike the out-of-process Plugin Host (C3),
//! this registry is in-process: LLM providers are an external
//! collaborator this runtime calls into, not something it loads itself.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{error::LLMError, LLMProvider};

/// Builds a configured provider instance from a JSON config blob.
pub trait ProviderFactory: Send + Sync {
    fn name(&self) -> &str;
    fn from_config(&self, cfg: &serde_json::Value) -> Result<Arc<dyn LLMProvider>, LLMError>;
}

/// In-process registry mapping provider name to factory, and a cache of
/// already-instantiated providers keyed by `provider/model` so a Session
/// reusing the same model key doesn't pay construction cost twice.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ProviderFactory>>>,
    instances: RwLock<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .write()
            .unwrap()
            .insert(factory.name().to_string(), factory);
    }

    /// Resolves `model_key` (e.g. `"anthropic/claude-opus"`) to a provider
    /// instance, instantiating and caching it on first use.
    pub fn resolve(
        &self,
        model_key: &str,
        cfg: &serde_json::Value,
    ) -> Result<Arc<dyn LLMProvider>, LLMError> {
        if let Some(existing) = self.instances.read().unwrap().get(model_key) {
            return Ok(existing.clone());
        }

        let provider_name = model_key
            .split('/')
            .next()
            .ok_or_else(|| LLMError::InvalidRequest(format!("malformed model key: {model_key}")))?;

        let factory = self
            .factories
            .read()
            .unwrap()
            .get(provider_name)
            .cloned()
            .ok_or_else(|| LLMError::ProviderError(format!("unknown provider: {provider_name}")))?;

        let instance = factory.from_config(cfg)?;
        self.instances
            .write()
            .unwrap()
            .insert(model_key.to_string(), instance.clone());
        Ok(instance)
    }

    pub fn list(&self) -> Vec<String> {
        self.factories.read().unwrap().keys().cloned().collect()
    }
}
