//! Provider registration extension point.
//!
//! Concrete LLM-provider clients are out of scope for the core (spec
//! §1: "concrete LLM-provider clients" are an external collaborator,
//! resolved only "by a model-key lookup" at mission start, spec §4.1).
//! This binary therefore ships with an empty [`ProviderRegistry`] --
//! embedders link in real `ProviderFactory` implementations (one HTTP
//! client per backend) and register them here before calling
//! [`missionctl_runtime::MissionRuntime::launch`].
use std::sync::Arc;

use missionctl_llm::plugin::ProviderRegistry;

/// Builds the registry this binary hands to the runtime. Currently
/// empty: a `run`/`resume` invocation will fail with `provider error:
/// unknown provider` for any model key until a factory is registered
/// here for the matching provider name.
pub fn build_registry() -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::new())
}
