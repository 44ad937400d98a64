//! Task Runner/Scheduler (spec §4.8, component C8): the only component
//! with visibility across sibling and ancestor Commanders. Partitions the
//! mission DAG into waves, drives one Commander Loop per task instance,
//! fans iterated tasks out over their dataset, and is the
//! [`CommanderContext`] every Commander Loop talks to -- indirected
//! through [`TaskCommanderContext`] so the trait's asker identity
//! (`asker_task`/`asker_index`) never has to ride along on every trait
//! method signature.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use missionctl_knowledge::{KnowledgeStore, Query};
use missionctl_llm::chat::ChatMessage;
use missionctl_llm::session::Session;
use missionctl_types::{qa::question_hash, EventKind, KnowledgeRecord, MissionStatus};

use crate::agent_loop::{AgentLoop, AgentOutcome};
use crate::commander_loop::{self, CommanderContext, CommanderLoop};
use crate::config::{DatasetDef, MissionDef, TaskDef};
use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::persist::{MessageSink, NullSink, StoreSink};
use crate::turn::drive_turn;

/// Stable key for one task *instance* (`"name"` or `"name#index"`),
/// reused as both the persisted session's `owner_ref` and the in-memory
/// ancestor/agent session maps' key.
fn task_key(name: &str, index: Option<u32>) -> String {
    match index {
        Some(i) => format!("{name}#{i}"),
        None => name.to_string(),
    }
}

fn session_id_for(mission_id: &str, owner_kind: &str, owner_ref: &str) -> String {
    format!("{mission_id}:{owner_kind}:{owner_ref}")
}

/// Folds `previous`'s `(summary, output)` into a copy of `item` under
/// `previous_summary`/`previous_output`, for serial iteration context
/// passing (spec §4.8). Leaves `item` untouched if it isn't a JSON object.
fn with_previous_context(item: &Value, previous: Option<&(String, Value)>) -> Value {
    let Some((summary, output)) = previous else { return item.clone() };
    match item.clone() {
        Value::Object(mut map) => {
            map.insert("previous_summary".to_string(), Value::String(summary.clone()));
            map.insert("previous_output".to_string(), output.clone());
            Value::Object(map)
        }
        other => other,
    }
}

/// A suspended or completed Agent Loop session kept alive so `ask_agent`
/// (read-only) or a later `call_agent(continuation_id=...)` (resuming an
/// escalation) can reach it (spec §9 "Coroutine-style control flow").
struct LiveAgent {
    agent_name: String,
    session: Session,
}

/// Drives one mission's DAG to completion (spec §4.8).
pub struct Scheduler {
    ctx: Arc<RuntimeContext>,
    definition: MissionDef,
    datasets: HashMap<String, DatasetDef>,
    cancel: CancellationToken,

    /// Completed ancestor Commander sessions, keyed by [`task_key`], kept
    /// alive so `ask_commander` can reopen them as read-only side
    /// conversations without replaying the whole transcript from disk.
    ancestor_sessions: RwLock<HashMap<String, Session>>,
    /// Suspended or completed Agent Loop sessions, keyed by the
    /// originating `call_agent` tool call's id.
    agent_sessions: Mutex<HashMap<String, LiveAgent>>,
    /// Completed task outputs, keyed by task name, queryable via
    /// `query_task_output` and readable for `${tasks.*}` interpolation.
    knowledge: RwLock<HashMap<String, Vec<KnowledgeRecord>>>,
    /// Dataset names a given task's `populate_dataset` calls have touched
    /// this run, flushed to `populated = true` the moment that task's own
    /// status write lands (spec §4.8's "populated" happens-before a
    /// dependent iterated task's fan-out).
    touched_datasets: Mutex<HashMap<String, HashSet<String>>>,
}

impl Scheduler {
    pub fn new(
        ctx: Arc<RuntimeContext>,
        definition: MissionDef,
        datasets: HashMap<String, DatasetDef>,
        cancel: CancellationToken,
    ) -> Self {
        Scheduler {
            ctx,
            definition,
            datasets,
            cancel,
            ancestor_sessions: RwLock::new(HashMap::new()),
            agent_sessions: Mutex::new(HashMap::new()),
            knowledge: RwLock::new(HashMap::new()),
            touched_datasets: Mutex::new(HashMap::new()),
        }
    }

    fn mission_id(&self) -> &str {
        &self.ctx.mission_id
    }

    fn task_def(&self, name: &str) -> Option<&TaskDef> {
        self.definition.tasks.iter().find(|t| t.name == name)
    }

    /// Seeds every statically-declared dataset (spec §6 `datasets.*`)
    /// before any task runs, so a task whose iterator names one doesn't
    /// race its own producer.
    async fn seed_static_datasets(&self) -> Result<(), RuntimeError> {
        for (name, def) in &self.datasets {
            self.ctx.store.ensure_dataset(self.mission_id(), name).await?;
            // A resumed mission re-enters this on every restart; only the
            // first run's seeding may append, or a resumed run would
            // duplicate every static item on top of what's already there.
            if def.items.is_empty() {
                continue;
            }
            if self.ctx.store.dataset_populated(self.mission_id(), name).await? {
                continue;
            }
            self.ctx.store.append_dataset_items(self.mission_id(), name, def.items.clone()).await?;
            self.ctx.store.mark_dataset_populated(self.mission_id(), name).await?;
        }
        Ok(())
    }

    /// Drives the whole mission to completion: validates, seeds datasets,
    /// then runs each wave (spec §4.8 "tasks whose dependencies are all
    /// satisfied run concurrently, in waves").
    pub async fn run(self: Arc<Self>) -> Result<(), RuntimeError> {
        let known_agents: HashSet<String> = self.ctx.agents.keys().cloned().collect();
        let known_datasets: HashSet<String> = self.datasets.keys().cloned().collect();
        crate::dag::validate(&self.definition, &known_agents, &known_datasets)?;
        let waves = crate::dag::waves(&self.definition)?;

        self.seed_static_datasets().await?;
        self.ctx
            .store
            .set_mission_status(&missionctl_types::MissionId(self.mission_id().to_string()), MissionStatus::Running)
            .await?;
        self.ctx.events.emit(None, None, None, EventKind::MissionStarted).await?;

        for wave in waves {
            if self.cancel.is_cancelled() {
                return self.fail_mission(RuntimeError::Cancelled).await;
            }

            let mut handles = Vec::with_capacity(wave.len());
            for name in wave {
                let Some(task_def) = self.task_def(&name).cloned() else {
                    continue;
                };
                let scheduler = self.clone();
                handles.push(tokio::spawn(async move { scheduler.run_task(task_def).await }));
            }

            for handle in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return self.fail_mission(err).await,
                    Err(join_err) => return self.fail_mission(RuntimeError::Internal(join_err.to_string())).await,
                }
            }
        }

        self.ctx
            .store
            .set_mission_status(&missionctl_types::MissionId(self.mission_id().to_string()), MissionStatus::Completed)
            .await?;
        self.ctx.events.emit(None, None, None, EventKind::MissionCompleted).await?;
        Ok(())
    }

    async fn fail_mission(&self, err: RuntimeError) -> Result<(), RuntimeError> {
        let _ = self
            .ctx
            .store
            .set_mission_status(
                &missionctl_types::MissionId(self.mission_id().to_string()),
                if matches!(err, RuntimeError::Cancelled) { MissionStatus::Cancelled } else { MissionStatus::Failed },
            )
            .await;
        let _ = self
            .ctx
            .events
            .emit(None, None, None, EventKind::MissionFailed { reason: err.to_string() })
            .await;
        Err(err)
    }

    /// Dispatches one DAG node to its single or iterated execution path
    /// (spec §4.8). Takes `self: Arc<Self>` only because a parallel
    /// iterator fans out its own `tokio::spawn` calls below.
    async fn run_task(self: Arc<Self>, task_def: TaskDef) -> Result<(), RuntimeError> {
        match &task_def.iterator {
            None => self.run_single_task(&task_def).await,
            Some(iter) => {
                let iter = iter.clone();
                self.run_iterated_task(task_def, iter).await
            }
        }
    }

    fn agent_definition(&self, agent_name: &str) -> Result<&crate::config::AgentDef, RuntimeError> {
        self.ctx
            .agents
            .get(agent_name)
            .ok_or_else(|| RuntimeError::UnknownReference(format!("unknown agent `{agent_name}`")))
    }

    /// The agents a given task's Commander may `call_agent` into: the
    /// task's own `agents` override if it declared one, else the
    /// mission's default list (spec §4.7 "the list of callable agents").
    fn effective_agents_for_task<'t>(&'t self, task_def: &'t TaskDef) -> &'t [String] {
        task_def.agents.as_deref().unwrap_or(&self.definition.agents)
    }

    /// Enforces that `agent_name` is in `task_def`'s effective callable
    /// set (spec §4.7) -- `TaskDef.agents`/`MissionDef.agents` are
    /// otherwise only validated for existence at DAG-build time and never
    /// consulted at dispatch.
    fn ensure_agent_callable(&self, task_def: &TaskDef, agent_name: &str) -> Result<(), RuntimeError> {
        if self.effective_agents_for_task(task_def).iter().any(|a| a == agent_name) {
            Ok(())
        } else {
            Err(RuntimeError::UnknownReference(format!(
                "agent `{agent_name}` is not callable from task `{}`",
                task_def.name
            )))
        }
    }

    fn system_prompt_for(agent: &crate::config::AgentDef) -> String {
        let mut parts = Vec::new();
        if let Some(role) = &agent.role {
            parts.push(format!("Role: {role}"));
        }
        if let Some(personality) = &agent.personality {
            parts.push(personality.clone());
        }
        parts.join("\n\n")
    }

    /// Builds a Commander's system prompt (spec §4.7): role/personality
    /// plus the five parts an orchestrating Commander needs up front --
    /// its objective, its declared output schema and the OUTPUT-block
    /// instruction, the agents it may call, the tasks it depends on, and
    /// the mission's input bag.
    fn commander_system_prompt(&self, task_def: &TaskDef, agent: &crate::config::AgentDef, objective: &str) -> String {
        let mut parts = Vec::new();
        if let Some(role) = &agent.role {
            parts.push(format!("Role: {role}"));
        }
        if let Some(personality) = &agent.personality {
            parts.push(personality.clone());
        }

        parts.push(format!("Objective: {objective}"));

        match &task_def.output_schema {
            Some(schema) => {
                let fields: Vec<String> = schema
                    .fields
                    .iter()
                    .map(|f| {
                        let req = if f.required { "required" } else { "optional" };
                        match &f.description {
                            Some(d) => format!("- `{}` ({:?}, {req}): {d}", f.name, f.field_type),
                            None => format!("- `{}` ({:?}, {req})", f.name, f.field_type),
                        }
                    })
                    .collect();
                parts.push(format!(
                    "Declared output schema:\n{}\n\nWhen you are finished, emit your final structured answer as \
                     a single JSON object matching this schema inside an {}...{} block.",
                    fields.join("\n"),
                    crate::output_block::OPEN_TAG,
                    crate::output_block::CLOSE_TAG
                ));
            }
            None => {
                parts.push(format!(
                    "When you are finished, emit your final answer inside an {}...{} block.",
                    crate::output_block::OPEN_TAG,
                    crate::output_block::CLOSE_TAG
                ));
            }
        }

        let callable = self.effective_agents_for_task(task_def);
        parts.push(if callable.is_empty() {
            "Callable agents: none".to_string()
        } else {
            format!("Callable agents: {}", callable.join(", "))
        });

        parts.push(if task_def.depends_on.is_empty() {
            "Dependency tasks: none".to_string()
        } else {
            format!("Dependency tasks: {}", task_def.depends_on.join(", "))
        });

        parts.push(if self.definition.inputs.is_empty() {
            "Mission inputs: none".to_string()
        } else {
            let inputs: Vec<String> = self.definition.inputs.iter().map(|(k, v)| format!("- {k}: {v}")).collect();
            format!("Mission inputs:\n{}", inputs.join("\n"))
        });

        parts.join("\n\n")
    }

    /// Ancestor context bootstrap (spec §4.7): before its first model
    /// call, a fresh Commander sends a targeted `ask_commander` to each
    /// direct-dependency ancestor task whose Commander session is still
    /// live, folding the answers into the opening user message. Ancestors
    /// skipped here (not yet reflected in `ancestor_sessions`, e.g. an
    /// iterated dependency with no single aggregate session) simply
    /// contribute nothing -- the Commander can still reach them later via
    /// its own `ask_commander` tool call.
    async fn ancestor_bootstrap_context(&self, task_def: &TaskDef, asker_index: Option<u32>) -> Vec<String> {
        let mut notes = Vec::with_capacity(task_def.depends_on.len());
        for dep in &task_def.depends_on {
            let key = task_key(dep, None);
            if !self.ancestor_sessions.read().await.contains_key(&key) {
                continue;
            }
            let question = format!(
                "Before `{}` begins, what should it know about your task's completed work?",
                task_def.name
            );
            if let Ok(answer) = self.do_ask_commander(&task_def.name, asker_index, dep, None, &question).await {
                notes.push(format!("From `{dep}`: {answer}"));
            }
        }
        notes
    }

    /// Builds the `${inputs.*}`/`${tasks.*}` interpolation map out of
    /// whatever's completed so far (spec §9 open question #1: an iterated
    /// ancestor resolves to its aggregated array output).
    async fn task_interpolation_map(&self) -> HashMap<String, (String, Value)> {
        let knowledge = self.knowledge.read().await;
        let mut map = HashMap::new();
        for (name, records) in knowledge.iter() {
            if records.is_empty() {
                continue;
            }
            if records.len() == 1 && records[0].index.is_none() {
                map.insert(name.clone(), (records[0].summary.clone(), records[0].output.clone()));
            } else {
                let aggregated = Value::Array(records.iter().map(|r| r.output.clone()).collect());
                let summary = records.iter().map(|r| r.summary.clone()).collect::<Vec<_>>().join("\n");
                map.insert(name.clone(), (summary, aggregated));
            }
        }
        map
    }

    async fn interpolated_objective(&self, task_def: &TaskDef, item: Option<&Value>) -> String {
        let tasks = self.task_interpolation_map().await;
        let ctx = missionctl_types::interpolate::InterpolationContext {
            inputs: &self.definition.inputs,
            item,
            tasks: &tasks,
        };
        missionctl_types::interpolate::interpolate(&task_def.objective, &ctx)
    }

    async fn run_single_task(&self, task_def: &TaskDef) -> Result<(), RuntimeError> {
        if let Some(row) = self.ctx.store.get_task(self.mission_id(), &task_def.name, None).await? {
            if row.status == "completed" {
                self.rehydrate_knowledge(&task_def.name, None, &row).await;
                self.rehydrate_commander_session(task_def, None).await?;
                return Ok(());
            }
        }
        self.run_task_instance(task_def, None, None).await
    }

    async fn run_iterated_task(
        self: Arc<Self>,
        task_def: TaskDef,
        iter: missionctl_types::IteratorConfig,
    ) -> Result<(), RuntimeError> {
        if !self.ctx.store.dataset_populated(self.mission_id(), &iter.dataset).await? {
            return Err(RuntimeError::Internal(format!(
                "dataset `{}` used by iterated task `{}` was never marked populated",
                iter.dataset, task_def.name
            )));
        }
        let items = self.ctx.store.list_dataset_items(self.mission_id(), &iter.dataset).await?;
        if items.is_empty() {
            self.finalize_iterated_task(&task_def).await?;
            return Ok(());
        }

        let mut start = 0usize;
        if iter.smoketest {
            self.run_iteration_with_retries(&task_def, &iter, 0, &items[0]).await?;
            start = 1;
        }

        if iter.parallel {
            let limit = iter.concurrency_limit.unwrap_or(items.len().max(1));
            let semaphore = Arc::new(Semaphore::new(limit.max(1)));
            let mut handles = Vec::new();
            for (offset, item) in items[start..].iter().enumerate() {
                let index = (start + offset) as u32;
                let permit = semaphore.clone();
                let task_def = task_def.clone();
                let iter = iter.clone();
                let item = item.clone();
                let scheduler = self.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                    scheduler.run_iteration_with_retries(&task_def, &iter, index, &item).await
                }));
            }
            for handle in handles {
                handle.await.map_err(|e| RuntimeError::Internal(e.to_string()))??;
            }
        } else {
            // Serial iteration: each instance receives the previous one's
            // output and summary in its objective context (spec §4.8),
            // folded into the dataset item under `item.previous_summary`/
            // `item.previous_output` so the existing `${item.<field>}`
            // interpolation grammar (spec §6) reaches it with no new syntax.
            let mut previous: Option<(String, Value)> = None;
            for (offset, item) in items[start..].iter().enumerate() {
                let index = (start + offset) as u32;
                let augmented = with_previous_context(item, previous.as_ref());
                self.run_iteration_with_retries(&task_def, &iter, index, &augmented).await?;
                if let Some(row) = self.ctx.store.get_task(self.mission_id(), &task_def.name, Some(index)).await? {
                    previous = Some((row.summary.unwrap_or_default(), row.output.unwrap_or(Value::Null)));
                }
            }
        }

        self.finalize_iterated_task(&task_def).await
    }

    async fn finalize_iterated_task(&self, task_def: &TaskDef) -> Result<(), RuntimeError> {
        let rows = self.ctx.store.list_task_instances(self.mission_id(), &task_def.name).await?;
        let failed: Vec<_> = rows.iter().filter(|r| r.status == "failed").collect();
        if !failed.is_empty() {
            let reason = format!("{} of {} iterations failed", failed.len(), rows.len());
            self.ctx
                .store
                .upsert_task(self.mission_id(), &task_def.name, None, "failed", None, None, Some(reason.clone()), 0)
                .await?;
            self.ctx
                .events
                .emit(Some(task_def.name.clone()), None, None, EventKind::TaskFailed { reason: reason.clone() })
                .await?;
            return Err(RuntimeError::Internal(reason));
        }

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(KnowledgeRecord {
                mission_id: self.mission_id().to_string(),
                task_name: task_def.name.clone(),
                index: row.index.map(|i| i as u32),
                schema: task_def.output_schema.clone(),
                output: row.output.clone().unwrap_or(Value::Null),
                summary: row.summary.clone().unwrap_or_default(),
            });
        }
        let summary = format!("{} iterations completed", rows.len());
        let aggregate = Value::Array(records.iter().map(|r| r.output.clone()).collect());
        self.ctx
            .store
            .upsert_task(self.mission_id(), &task_def.name, None, "completed", Some(aggregate), Some(summary.clone()), None, 0)
            .await?;
        self.ctx
            .events
            .emit(Some(task_def.name.clone()), None, None, EventKind::TaskCompleted { summary })
            .await?;
        self.knowledge.write().await.insert(task_def.name.clone(), records);
        self.flush_touched_datasets(&task_def.name).await?;
        Ok(())
    }

    async fn run_iteration_with_retries(
        &self,
        task_def: &TaskDef,
        iter: &missionctl_types::IteratorConfig,
        index: u32,
        item: &Value,
    ) -> Result<(), RuntimeError> {
        if let Some(row) = self.ctx.store.get_task(self.mission_id(), &task_def.name, Some(index)).await? {
            if row.status == "completed" {
                self.rehydrate_commander_session(task_def, Some(index)).await?;
                return Ok(());
            }
        }

        self.ctx
            .events
            .emit(Some(task_def.name.clone()), Some(index), None, EventKind::IterationStarted)
            .await?;

        let mut attempt = 0u32;
        loop {
            match self.run_task_instance(task_def, Some(index), Some(item)).await {
                Ok(()) => {
                    self.ctx
                        .events
                        .emit(Some(task_def.name.clone()), Some(index), None, EventKind::IterationCompleted)
                        .await?;
                    return Ok(());
                }
                Err(err) if attempt < iter.max_retries => {
                    attempt += 1;
                    self.ctx
                        .events
                        .emit(Some(task_def.name.clone()), Some(index), None, EventKind::IterationRetrying { attempt })
                        .await?;
                }
                Err(err) => {
                    self.ctx
                        .events
                        .emit(
                            Some(task_def.name.clone()),
                            Some(index),
                            None,
                            EventKind::IterationFailed { reason: err.to_string() },
                        )
                        .await?;
                    return Err(err);
                }
            }
        }
    }

    async fn rehydrate_knowledge(&self, task_name: &str, index: Option<u32>, row: &missionctl_store::TaskRow) {
        let record = KnowledgeRecord {
            mission_id: self.mission_id().to_string(),
            task_name: task_name.to_string(),
            index,
            schema: self.task_def(task_name).and_then(|t| t.output_schema.clone()),
            output: row.output.clone().unwrap_or(Value::Null),
            summary: row.summary.clone().unwrap_or_default(),
        };
        self.knowledge.write().await.entry(task_name.to_string()).or_default().push(record);
    }

    /// Rebuilds an already-completed task's Commander session from its
    /// persisted transcript and keeps it live so `ask_commander` against
    /// this ancestor still works after a resume (spec §4.9) -- without
    /// this, a task that's skipped on resume because it's already
    /// `completed` would never populate `ancestor_sessions`, and a
    /// descendant's `ask_commander` would wrongly report the task "has
    /// not completed".
    async fn rehydrate_commander_session(&self, task_def: &TaskDef, index: Option<u32>) -> Result<(), RuntimeError> {
        let key = task_key(&task_def.name, index);
        if self.ancestor_sessions.read().await.contains_key(&key) {
            return Ok(());
        }
        let session_id = session_id_for(self.mission_id(), "commander", &key);
        if self.ctx.store.get_session_by_owner(self.mission_id(), "commander", &key).await?.is_none() {
            return Ok(());
        }
        let agent_def = self.agent_definition(&self.definition.commander)?;
        let provider = self.ctx.resolve_provider(&agent_def.model)?;
        let records = self.ctx.store.list_messages(&session_id).await?;
        let session = Session::load_messages(provider, crate::resaturation::messages_from_records(&records));
        self.ancestor_sessions.write().await.insert(key, session);
        Ok(())
    }

    async fn flush_touched_datasets(&self, task_name: &str) -> Result<(), RuntimeError> {
        let touched = self.touched_datasets.lock().await.remove(task_name).unwrap_or_default();
        for name in touched {
            self.ctx.store.mark_dataset_populated(self.mission_id(), &name).await?;
        }
        Ok(())
    }

    /// Runs one Commander Loop for one task instance, start to finish:
    /// builds the session, drives the loop, persists the outcome, and
    /// records it into the Knowledge plane.
    async fn run_task_instance(&self, task_def: &TaskDef, index: Option<u32>, item: Option<&Value>) -> Result<(), RuntimeError> {
        if self.cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }

        let key = task_key(&task_def.name, index);
        let agent_def = self.agent_definition(&self.definition.commander)?;
        let provider = self.ctx.resolve_provider(&agent_def.model)?;
        let session_id = session_id_for(self.mission_id(), "commander", &key);

        // A crash mid-task leaves this instance's status as `running` with
        // a session already on disk; resaturate it instead of starting
        // the Commander over from a fresh opening message (spec §4.9/§8).
        let existing = self.ctx.store.get_session_by_owner(self.mission_id(), "commander", &key).await?;
        let fresh_objective = if existing.is_none() {
            Some(self.interpolated_objective(task_def, item).await)
        } else {
            None
        };
        let mut session = match &existing {
            Some(_) => {
                let records = self.ctx.store.list_messages(&session_id).await?;
                Session::load_messages(provider, crate::resaturation::messages_from_records(&records))
            }
            None => {
                self.ctx.store.create_session(&session_id, self.mission_id(), "commander", &key).await?;
                let prompt = self.commander_system_prompt(task_def, agent_def, fresh_objective.as_deref().unwrap_or_default());
                Session::new(provider, Some(prompt))
            }
        };
        session.set_tools(commander_loop::control_tool_descriptors());
        let sink = StoreSink { store: self.ctx.store.clone(), session_id };

        self.ctx
            .store
            .upsert_task(self.mission_id(), &task_def.name, index, "running", None, None, None, 0)
            .await?;
        self.ctx
            .events
            .emit(Some(task_def.name.clone()), index, None, EventKind::TaskStarted)
            .await?;

        let tc_ctx = TaskCommanderContext { scheduler: self, asker_task: task_def.name.clone(), asker_index: index };
        let commander = CommanderLoop {
            context: &tc_ctx,
            events: &self.ctx.events,
            sink: &sink,
            task_name: task_def.name.clone(),
            index,
            output_schema: task_def.output_schema.as_ref(),
        };

        let result = match existing {
            Some(_) => commander.heal_and_resume(&mut session).await,
            None => {
                let objective = fresh_objective.expect("computed when existing session is None");
                let ancestor_notes = self.ancestor_bootstrap_context(task_def, index).await;
                let opening_text = if ancestor_notes.is_empty() {
                    objective
                } else {
                    format!("{objective}\n\nContext from completed dependency tasks:\n{}", ancestor_notes.join("\n\n"))
                };
                let opening = ChatMessage::user().content(opening_text).build();
                commander.run(&mut session, opening).await
            }
        };

        match result {
            Ok(outcome) => {
                self.ctx
                    .store
                    .upsert_task(
                        self.mission_id(),
                        &task_def.name,
                        index,
                        "completed",
                        Some(outcome.output.clone()),
                        Some(outcome.summary.clone()),
                        None,
                        0,
                    )
                    .await?;
                self.ctx
                    .events
                    .emit(
                        Some(task_def.name.clone()),
                        index,
                        None,
                        EventKind::TaskCompleted { summary: outcome.summary.clone() },
                    )
                    .await?;

                if index.is_none() {
                    let record = KnowledgeRecord {
                        mission_id: self.mission_id().to_string(),
                        task_name: task_def.name.clone(),
                        index,
                        schema: task_def.output_schema.clone(),
                        output: outcome.output,
                        summary: outcome.summary,
                    };
                    self.knowledge.write().await.insert(task_def.name.clone(), vec![record]);
                    self.flush_touched_datasets(&task_def.name).await?;
                }
                self.ancestor_sessions.write().await.insert(key, session);
                Ok(())
            }
            Err(err) => {
                self.ctx
                    .store
                    .upsert_task(self.mission_id(), &task_def.name, index, "failed", None, None, Some(err.to_string()), 0)
                    .await?;
                self.ctx
                    .events
                    .emit(Some(task_def.name.clone()), index, None, EventKind::TaskFailed { reason: err.to_string() })
                    .await?;
                Err(err)
            }
        }
    }

    // ---- CommanderContext implementation (spec §4.7) -------------------

    async fn do_call_agent(
        &self,
        asker_task: &str,
        asker_index: Option<u32>,
        agent_name: &str,
        task: &str,
        continuation_id: Option<&str>,
        call_id: &str,
    ) -> Result<AgentOutcome, RuntimeError> {
        if let Some(continuation_id) = continuation_id {
            let suspended = self.agent_sessions.lock().await.remove(continuation_id);
            let Some(LiveAgent { agent_name, mut session }) = suspended else {
                return Err(RuntimeError::UnknownReference(format!("unknown continuation `{continuation_id}`")));
            };
            let agent_def = self.agent_definition(&agent_name)?;
            let tools = self.ctx.tools_for_agent(agent_def).await?;
            let mut all_tools = tools;
            all_tools.extend(self.ctx.synthetic_result_tools());

            let session_id = session_id_for(self.mission_id(), "agent", continuation_id);
            let sink = StoreSink { store: self.ctx.store.clone(), session_id };
            let agent_loop = AgentLoop {
                tools: &all_tools,
                events: &self.ctx.events,
                sink: &sink,
                task_name: asker_task.to_string(),
                index: asker_index,
                agent_name: agent_name.clone(),
            };
            let outcome = agent_loop.run(&mut session, ChatMessage::user().content(task).build()).await?;
            if matches!(outcome, AgentOutcome::FinalAnswer(_)) {
                self.ctx
                    .events
                    .emit(Some(asker_task.to_string()), asker_index, Some(agent_name.clone()), EventKind::AgentCompleted)
                    .await?;
            }
            self.agent_sessions.lock().await.insert(call_id.to_string(), LiveAgent { agent_name, session });
            return Ok(outcome);
        }

        let asker_task_def = self
            .task_def(asker_task)
            .ok_or_else(|| RuntimeError::Internal(format!("unknown asker task `{asker_task}`")))?;
        self.ensure_agent_callable(asker_task_def, agent_name)?;

        let agent_def = self.agent_definition(agent_name)?;
        let provider = self.ctx.resolve_provider(&agent_def.model)?;
        let mut tools = self.ctx.tools_for_agent(agent_def).await?;
        tools.extend(self.ctx.synthetic_result_tools());

        let mut descriptors = crate::agent_loop::control_tool_descriptors();
        descriptors.extend(tools.values().map(|t| t.descriptor()));

        // A Commander resaturated mid-delegation (spec §4.9) re-dispatches
        // this same `call_agent` tool call with no `continuation_id` --
        // reload the agent's own persisted transcript instead of starting
        // a fresh session, or the reload would produce a duplicated
        // transcript the next time this agent is queried or resumed.
        let session_id = session_id_for(self.mission_id(), "agent", call_id);
        let existing = self.ctx.store.get_session_by_owner(self.mission_id(), "agent", call_id).await?;
        let mut session = match &existing {
            Some(_) => {
                let records = self.ctx.store.list_messages(&session_id).await?;
                Session::load_messages(provider, crate::resaturation::messages_from_records(&records))
            }
            None => {
                self.ctx.store.create_session(&session_id, self.mission_id(), "agent", call_id).await?;
                Session::new(provider, Some(Self::system_prompt_for(agent_def)))
            }
        };
        session.set_tools(descriptors);
        let sink = StoreSink { store: self.ctx.store.clone(), session_id };

        if existing.is_none() {
            self.ctx
                .events
                .emit(Some(asker_task.to_string()), asker_index, Some(agent_name.to_string()), EventKind::AgentStarted { agent_name: agent_name.to_string() })
                .await?;
        }

        let agent_loop = AgentLoop {
            tools: &tools,
            events: &self.ctx.events,
            sink: &sink,
            task_name: asker_task.to_string(),
            index: asker_index,
            agent_name: agent_name.to_string(),
        };
        let outcome = match existing {
            Some(_) => agent_loop.heal_and_resume(&mut session).await?,
            None => agent_loop.run(&mut session, ChatMessage::user().content(task).build()).await?,
        };
        if matches!(outcome, AgentOutcome::FinalAnswer(_)) {
            self.ctx
                .events
                .emit(Some(asker_task.to_string()), asker_index, Some(agent_name.to_string()), EventKind::AgentCompleted)
                .await?;
        }
        self.agent_sessions
            .lock()
            .await
            .insert(call_id.to_string(), LiveAgent { agent_name: agent_name.to_string(), session });
        Ok(outcome)
    }

    async fn do_ask_agent(&self, agent_id: &str, question: &str) -> Result<String, RuntimeError> {
        let mut session = {
            let sessions = self.agent_sessions.lock().await;
            let live = sessions
                .get(agent_id)
                .ok_or_else(|| RuntimeError::UnknownReference(format!("unknown agent_id `{agent_id}`")))?;
            live.session.clone_detached()
        };
        session.set_tools(Vec::new());
        let reply = drive_turn(&mut session, Some(ChatMessage::user().content(question).build()), &NullSink, |_| {}).await?;
        Ok(reply.content)
    }

    async fn do_ask_commander(
        &self,
        asker_task: &str,
        _asker_index: Option<u32>,
        target_task: &str,
        target_index: Option<u32>,
        question: &str,
    ) -> Result<String, RuntimeError> {
        let hash = question_hash(question);
        if let Some(answer) = self.ctx.store.qa_lookup(self.mission_id(), asker_task, target_task, target_index, &hash).await? {
            return Ok(answer);
        }

        let mut session = {
            let key = task_key(target_task, target_index);
            let sessions = self.ancestor_sessions.read().await;
            let session = sessions
                .get(&key)
                .ok_or_else(|| RuntimeError::UnknownReference(format!("task `{key}` has not completed")))?;
            session.clone_detached()
        };
        session.set_tools(Vec::new());
        let reply = drive_turn(&mut session, Some(ChatMessage::user().content(question).build()), &NullSink, |_| {}).await?;

        self.ctx
            .store
            .qa_insert(self.mission_id(), asker_task, target_task, target_index, question, &hash, &reply.content)
            .await?;
        Ok(reply.content)
    }

    async fn do_query_task_output(&self, args: Value) -> Result<Value, RuntimeError> {
        #[derive(Deserialize)]
        struct QueryArgs {
            task_name: String,
            #[serde(flatten)]
            query: Query,
        }
        let parsed: QueryArgs =
            serde_json::from_value(args).map_err(|e| RuntimeError::Internal(format!("malformed query_task_output args: {e}")))?;

        let records = self.knowledge.read().await.get(&parsed.task_name).cloned().unwrap_or_default();
        let schema = self.task_def(&parsed.task_name).and_then(|t| t.output_schema.clone());
        let result = KnowledgeStore::new(&records, schema.as_ref())
            .run(&parsed.query)
            .map_err(|e| RuntimeError::Internal(e.to_string()))?;
        Ok(serde_json::to_value(result)?)
    }

    async fn do_list_commander_questions(
        &self,
        asker_task: &str,
        _asker_index: Option<u32>,
        target_task: &str,
    ) -> Result<Vec<(String, String)>, RuntimeError> {
        let rows = self.ctx.store.qa_list_for_asker_target(self.mission_id(), asker_task, target_task).await?;
        Ok(rows
            .into_iter()
            .map(|(idx, hash, question)| {
                let idx_str = idx.map(|i| i.to_string()).unwrap_or_default();
                (format!("{target_task}|{idx_str}|{hash}"), question)
            })
            .collect())
    }

    async fn do_get_commander_answer(&self, asker_task: &str, question_id: &str) -> Result<Option<String>, RuntimeError> {
        let mut parts = question_id.splitn(3, '|');
        let target = parts.next().ok_or_else(|| RuntimeError::Internal("malformed question_id".to_string()))?;
        let idx_str = parts.next().ok_or_else(|| RuntimeError::Internal("malformed question_id".to_string()))?;
        let hash = parts.next().ok_or_else(|| RuntimeError::Internal("malformed question_id".to_string()))?;
        let index = if idx_str.is_empty() { None } else { idx_str.parse::<u32>().ok() };
        Ok(self.ctx.store.qa_lookup(self.mission_id(), asker_task, target, index, hash).await?)
    }

    async fn do_populate_dataset(&self, asker_task: &str, dataset_name: &str, items: Vec<Value>) -> Result<usize, RuntimeError> {
        self.ctx.store.ensure_dataset(self.mission_id(), dataset_name).await?;
        let count = items.len();
        self.ctx.store.append_dataset_items(self.mission_id(), dataset_name, items).await?;
        self.touched_datasets
            .lock()
            .await
            .entry(asker_task.to_string())
            .or_default()
            .insert(dataset_name.to_string());
        Ok(count)
    }
}

/// Closes a [`CommanderContext`] call over the asker task-instance's
/// identity (`asker_task`/`asker_index`) so the Scheduler's `do_*` methods
/// -- which need that identity to scope dedup and delegation bookkeeping
/// -- never have to take it as an extra trait-method parameter.
struct TaskCommanderContext<'a> {
    scheduler: &'a Scheduler,
    asker_task: String,
    asker_index: Option<u32>,
}

#[async_trait]
impl<'a> CommanderContext for TaskCommanderContext<'a> {
    async fn call_agent(
        &self,
        agent_name: &str,
        task: &str,
        continuation_id: Option<&str>,
        call_id: &str,
    ) -> Result<AgentOutcome, RuntimeError> {
        self.scheduler
            .do_call_agent(&self.asker_task, self.asker_index, agent_name, task, continuation_id, call_id)
            .await
    }

    async fn ask_agent(&self, agent_id: &str, question: &str) -> Result<String, RuntimeError> {
        self.scheduler.do_ask_agent(agent_id, question).await
    }

    async fn ask_commander(&self, target_task: &str, target_index: Option<u32>, question: &str) -> Result<String, RuntimeError> {
        self.scheduler
            .do_ask_commander(&self.asker_task, self.asker_index, target_task, target_index, question)
            .await
    }

    async fn query_task_output(&self, query: Value) -> Result<Value, RuntimeError> {
        self.scheduler.do_query_task_output(query).await
    }

    async fn list_commander_questions(&self, task_name: &str) -> Result<Vec<(String, String)>, RuntimeError> {
        self.scheduler.do_list_commander_questions(&self.asker_task, self.asker_index, task_name).await
    }

    async fn get_commander_answer(&self, question_id: &str) -> Result<Option<String>, RuntimeError> {
        self.scheduler.do_get_commander_answer(&self.asker_task, question_id).await
    }

    async fn populate_dataset(&self, dataset_name: &str, items: Vec<Value>) -> Result<usize, RuntimeError> {
        self.scheduler.do_populate_dataset(&self.asker_task, dataset_name, items).await
    }
}

#[cfg(test)]
mod context_tests {
    use super::*;

    #[test]
    fn with_previous_context_is_identity_on_first_iteration() {
        let item = serde_json::json!({"n": 1});
        assert_eq!(with_previous_context(&item, None), item);
    }

    #[test]
    fn with_previous_context_folds_prior_summary_and_output_into_the_item() {
        let item = serde_json::json!({"n": 2});
        let previous = ("squared 1".to_string(), serde_json::json!({"r": 1}));
        let augmented = with_previous_context(&item, Some(&previous));
        assert_eq!(augmented["n"], serde_json::json!(2));
        assert_eq!(augmented["previous_summary"], serde_json::json!("squared 1"));
        assert_eq!(augmented["previous_output"], serde_json::json!({"r": 1}));
    }

    #[test]
    fn with_previous_context_leaves_non_object_items_untouched() {
        let item = serde_json::json!(42);
        let previous = ("x".to_string(), serde_json::json!(null));
        assert_eq!(with_previous_context(&item, Some(&previous)), item);
    }
}
