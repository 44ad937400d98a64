//! Mission Runtime entry point (spec §2): ties the declarative
//! configuration surface (spec §6) to a running [`Scheduler`] (spec
//! §4.8) -- one DAG of Commander Loops driven to completion,
//! crash-resumable at any point.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use missionctl_llm::plugin::ProviderRegistry;
use missionctl_store::Store;
use missionctl_types::{Mission, MissionId, MissionStatus};

use crate::config::ConfigBundle;
use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::events::EventBus;
use crate::interceptor::Interceptor;
use crate::plugin_host::PluginHost;
use crate::scheduler::Scheduler;
use crate::tool_source::{CompositeToolSource, PluginToolSource, ToolSource};

/// What one mission run hands back to its caller (spec §4.8: the
/// Scheduler drives a mission to one of `Completed`/`Failed`/`Cancelled`).
/// `error` carries the reason when `status` isn't `Completed`, for a CLI
/// presenter to print without re-deriving it from the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionOutcome {
    pub mission_id: String,
    pub status: MissionStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Entry point that resolves one named mission out of a [`ConfigBundle`]
/// into a running [`Scheduler`], for both a fresh [`Self::launch`] and a
/// crash/interrupt [`Self::resume`].
pub struct MissionRuntime;

impl MissionRuntime {
    /// Starts a brand-new mission run: creates the mission's durable row,
    /// builds the shared [`RuntimeContext`], and drives the [`Scheduler`]
    /// to completion.
    pub async fn launch(
        store: Store,
        providers: Arc<ProviderRegistry>,
        plugin_host: Arc<PluginHost>,
        config: &ConfigBundle,
        mission_name: &str,
        inputs: HashMap<String, String>,
        cancel: CancellationToken,
    ) -> Result<MissionOutcome, RuntimeError> {
        let definition = mission_def(config, mission_name)?;

        let mission_id = MissionId::new();
        let mut mission = Mission::new(mission_name, definition.commander.clone());
        mission.id = mission_id.clone();
        mission.default_agents = definition.agents.clone();
        // Declared defaults (spec §6 `missions[name].inputs`) overlaid with
        // whatever the launcher passed at invocation time (spec §6
        // "Mission inputs: key/value strings passed at launch").
        mission.inputs = definition.inputs.clone();
        mission.inputs.extend(inputs);
        store.create_mission(&mission).await?;

        Self::drive(store, providers, plugin_host, config, definition, mission_id, cancel).await
    }

    /// Resumes a mission interrupted mid-run: rebuilds the same
    /// [`RuntimeContext`]/[`Scheduler`] pairing against the mission's
    /// already-persisted id and re-enters [`Scheduler::run`], whose
    /// per-task-instance resume wiring (spec §4.9) picks every in-flight
    /// task back up from its last durable write.
    ///
    /// Takes the same [`ConfigBundle`]/`mission_name` as [`Self::launch`]
    /// rather than reconstructing a `MissionDef` from the leaner
    /// persisted `missionctl_types::Mission` row -- the declarative
    /// configuration loader is an external collaborator (spec §1), not
    /// something the runtime regenerates from state.
    pub async fn resume(
        store: Store,
        providers: Arc<ProviderRegistry>,
        plugin_host: Arc<PluginHost>,
        config: &ConfigBundle,
        mission_name: &str,
        mission_id: MissionId,
        cancel: CancellationToken,
    ) -> Result<MissionOutcome, RuntimeError> {
        let definition = mission_def(config, mission_name)?;

        let status = store
            .get_mission_status(&mission_id)
            .await?
            .ok_or_else(|| RuntimeError::UnknownResume(mission_id.0.clone()))?;
        if matches!(status, MissionStatus::Completed | MissionStatus::Cancelled) {
            return Ok(MissionOutcome { mission_id: mission_id.0, status, error: None });
        }

        Self::drive(store, providers, plugin_host, config, definition, mission_id, cancel).await
    }

    async fn drive(
        store: Store,
        providers: Arc<ProviderRegistry>,
        plugin_host: Arc<PluginHost>,
        config: &ConfigBundle,
        definition: crate::config::MissionDef,
        mission_id: MissionId,
        cancel: CancellationToken,
    ) -> Result<MissionOutcome, RuntimeError> {
        let mission_id_str = mission_id.0.clone();
        let events = EventBus::new(store.clone(), mission_id_str.clone());
        let interceptor = Interceptor::new(store.clone(), mission_id_str.clone());
        let tool_source: Arc<dyn ToolSource> = Arc::new(CompositeToolSource::new(vec![Arc::new(
            PluginToolSource::new(plugin_host, config.plugins.clone()),
        )]));

        let mut datasets = HashMap::new();
        for name in &definition.datasets {
            if let Some(def) = config.datasets.get(name) {
                datasets.insert(name.clone(), def.clone());
            }
        }

        let ctx = Arc::new(RuntimeContext {
            mission_id: mission_id_str.clone(),
            store: store.clone(),
            events,
            interceptor,
            providers,
            tool_source,
            models: config.models.clone(),
            agents: config.agents.clone(),
        });

        let scheduler = Arc::new(Scheduler::new(ctx, definition, datasets, cancel));
        let result = scheduler.run().await;

        match result {
            Ok(()) => Ok(MissionOutcome { mission_id: mission_id_str, status: MissionStatus::Completed, error: None }),
            Err(err) => match store.get_mission_status(&mission_id).await? {
                // The mission reached a terminal state via `Scheduler::fail_mission`;
                // report it rather than propagating, since it's the mission that
                // failed, not the runtime.
                Some(status @ (MissionStatus::Failed | MissionStatus::Cancelled)) => {
                    Ok(MissionOutcome { mission_id: mission_id_str, status, error: Some(err.to_string()) })
                }
                // Rejected before a single session was opened (spec §8 scenario
                // 6: DAG/reference validation failed) -- no mission row transition
                // happened at all, so there's nothing to report but the error.
                _ => Err(err),
            },
        }
    }
}

fn mission_def(config: &ConfigBundle, mission_name: &str) -> Result<crate::config::MissionDef, RuntimeError> {
    config
        .missions
        .get(mission_name)
        .cloned()
        .ok_or_else(|| RuntimeError::Config(format!("no mission named `{mission_name}` in configuration")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentDef, MissionDef, TaskDef};
    use missionctl_llm::chat::{ChatMessage, ChatResponse};
    use missionctl_llm::error::LLMError;
    use missionctl_llm::plugin::ProviderFactory;
    use missionctl_llm::LLMProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubResponse(String);
    impl ChatResponse for StubResponse {
        fn text(&self) -> Option<String> {
            Some(self.0.clone())
        }
        fn tool_calls(&self) -> Option<Vec<missionctl_llm::chat::ToolCall>> {
            None
        }
    }

    struct StubProvider;
    #[async_trait::async_trait]
    impl LLMProvider for StubProvider {
        async fn chat_with_tools(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[missionctl_llm::chat::Tool]>,
        ) -> Result<Box<dyn ChatResponse>, LLMError> {
            Ok(Box::new(StubResponse("<OUTPUT>{}</OUTPUT>".to_string())))
        }

        async fn chat_stream_with_tools(
            &self,
            messages: &[ChatMessage],
            tools: Option<&[missionctl_llm::chat::Tool]>,
        ) -> Result<
            std::pin::Pin<Box<dyn futures::Stream<Item = Result<missionctl_llm::chat::StreamChunk, LLMError>> + Send>>,
            LLMError,
        > {
            let response = self.chat_with_tools(messages, tools).await?;
            let chunk = missionctl_llm::chat::StreamChunk {
                delta: response.text().unwrap_or_default(),
                tool_calls: None,
                done: true,
            };
            Ok(Box::pin(futures::stream::once(async move { Ok(chunk) })))
        }
    }

    struct StubFactory(AtomicUsize);
    impl ProviderFactory for StubFactory {
        fn name(&self) -> &str {
            "stub"
        }
        fn from_config(&self, _cfg: &serde_json::Value) -> Result<Arc<dyn LLMProvider>, LLMError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubProvider))
        }
    }

    fn config_with_one_task() -> ConfigBundle {
        let mut agents = HashMap::new();
        agents.insert(
            "commander".to_string(),
            AgentDef { model: "stub/any".to_string(), personality: None, role: None, tools: vec![] },
        );
        let mut models = HashMap::new();
        models.insert(
            "stub".to_string(),
            HashMap::from([(
                "any".to_string(),
                crate::config::ModelConfig { provider: "stub".to_string(), api_key: None, allowed_models: vec![] },
            )]),
        );
        let mission = MissionDef {
            commander: "commander".to_string(),
            agents: vec![],
            inputs: HashMap::new(),
            datasets: vec![],
            tasks: vec![TaskDef {
                name: "only".to_string(),
                objective: "do the thing".to_string(),
                depends_on: vec![],
                agents: None,
                output_schema: None,
                iterator: None,
            }],
        };
        ConfigBundle {
            variables: HashMap::new(),
            models,
            plugins: HashMap::new(),
            agents,
            missions: HashMap::from([("m".to_string(), mission)]),
            datasets: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn launch_drives_a_single_task_mission_to_completion() {
        let store = Store::open_in_memory().await.unwrap();
        let providers = Arc::new(ProviderRegistry::new());
        providers.register(Arc::new(StubFactory(AtomicUsize::new(0))));
        let plugin_host = Arc::new(PluginHost::new(std::env::temp_dir()));
        let config = config_with_one_task();

        let outcome = MissionRuntime::launch(
            store,
            providers,
            plugin_host,
            &config,
            "m",
            HashMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome.status, MissionStatus::Completed));
    }

    #[tokio::test]
    async fn launch_rejects_unknown_mission_name_without_creating_a_mission_row() {
        let store = Store::open_in_memory().await.unwrap();
        let providers = Arc::new(ProviderRegistry::new());
        let plugin_host = Arc::new(PluginHost::new(std::env::temp_dir()));
        let config = config_with_one_task();

        let err = MissionRuntime::launch(
            store,
            providers,
            plugin_host,
            &config,
            "does-not-exist",
            HashMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }
}
