//! Commander Loop (spec §4.7, component C7): one per task-instance,
//! orchestrating Agent delegations and ancestor queries toward a
//! schema-validated OUTPUT block.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use missionctl_llm::chat::{ChatMessage, ChatRole, FunctionTool, ParameterProperty, ParametersSchema, Tool};
use missionctl_llm::session::Session;
use missionctl_types::{EventKind, OutputSchema};

use crate::agent_loop::AgentOutcome;
use crate::error::RuntimeError;
use crate::events::EventBus;
use crate::limits::{COMMANDER_CORRECTION_ROUNDS, COMMANDER_ITER_CAP};
use crate::output_block::{correction_message, validate_turn};
use crate::persist::MessageSink;
use crate::resaturation::{diagnose, unknown_on_resume_message, HealAction};
use crate::turn::{drive_turn, tool_calls_of};

pub const CALL_AGENT: &str = "call_agent";
pub const ASK_AGENT: &str = "ask_agent";
pub const ASK_COMMANDER: &str = "ask_commander";
pub const QUERY_TASK_OUTPUT: &str = "query_task_output";
pub const LIST_COMMANDER_QUESTIONS: &str = "list_commander_questions";
pub const GET_COMMANDER_ANSWER: &str = "get_commander_answer";
pub const POPULATE_DATASET: &str = "populate_dataset";

/// Everything a Commander Loop needs from the rest of the runtime that it
/// doesn't own itself -- Agent delegation, ancestor queries, the
/// Knowledge Store, the Q&A cache and Dataset mutation. Implemented by
/// the Scheduler (spec §4.8), which is the only component with visibility
/// across sibling and ancestor Commanders.
#[async_trait]
pub trait CommanderContext: Send + Sync {
    /// `call_id` is the originating tool call's id, used as the key under
    /// which an escalated (suspended) Agent session is kept live so a
    /// follow-up `call_agent(continuation_id=call_id)` can resume it
    /// (spec §9 "Coroutine-style control flow").
    async fn call_agent(
        &self,
        agent_name: &str,
        task: &str,
        continuation_id: Option<&str>,
        call_id: &str,
    ) -> Result<AgentOutcome, RuntimeError>;

    async fn ask_agent(&self, agent_id: &str, question: &str) -> Result<String, RuntimeError>;

    async fn ask_commander(&self, target_task: &str, target_index: Option<u32>, question: &str) -> Result<String, RuntimeError>;

    async fn query_task_output(&self, query: Value) -> Result<Value, RuntimeError>;

    async fn list_commander_questions(&self, task_name: &str) -> Result<Vec<(String, String)>, RuntimeError>;

    async fn get_commander_answer(&self, question_id: &str) -> Result<Option<String>, RuntimeError>;

    async fn populate_dataset(&self, dataset_name: &str, items: Vec<Value>) -> Result<usize, RuntimeError>;
}

/// The terminal result of one Commander Loop run (spec §4.7: "commits
/// the structured output and a free-text summary to Knowledge and
/// persistence, and terminates").
#[derive(Debug, Clone)]
pub struct CommanderResult {
    pub output: Value,
    pub summary: String,
}

pub struct CommanderLoop<'a> {
    pub context: &'a dyn CommanderContext,
    pub events: &'a EventBus,
    pub sink: &'a dyn MessageSink,
    pub task_name: String,
    pub index: Option<u32>,
    pub output_schema: Option<&'a OutputSchema>,
}

impl<'a> CommanderLoop<'a> {
    pub async fn run(
        &self,
        session: &mut Session,
        opening_message: ChatMessage,
    ) -> Result<CommanderResult, RuntimeError> {
        self.drive(session, Some(opening_message)).await
    }

    /// Resumes a healthy session (spec §4.9 `HealAction::Healthy`/
    /// `ContinueStream`). Before driving a new turn, checks whether the
    /// transcript already ends on a valid, schema-passing OUTPUT block --
    /// the crash-after-persist-before-status-write scenario spec §8 calls
    /// out, where the answer already exists and a fresh LLM call would
    /// only waste one. If the last assistant turn doesn't validate (or
    /// there isn't one), falls through to actually driving the session.
    pub async fn resume(&self, session: &mut Session) -> Result<CommanderResult, RuntimeError> {
        if let Some(last) = session.messages().last() {
            if matches!(last.role, ChatRole::Assistant) {
                if let Ok((output, summary)) = validate_turn(&last.content, self.output_schema) {
                    return Ok(CommanderResult { output, summary });
                }
            }
        }
        self.drive(session, None).await
    }

    /// Heals a resumed transcript per Resaturation's diagnosis (spec
    /// §4.9), then resumes the loop. The Commander's tool surface is the
    /// fixed set in [`control_tool_descriptors`], so unlike the Agent Loop
    /// a dangling call can always be re-dispatched by name -- there's no
    /// configured-tool-registry to miss a lookup against.
    pub async fn heal_and_resume(&self, session: &mut Session) -> Result<CommanderResult, RuntimeError> {
        match diagnose(session.messages()) {
            HealAction::Healthy | HealAction::ContinueStream => self.resume(session).await,
            HealAction::ReDispatchTool { tool_call_id, tool_name, arguments } => {
                let args: Value = serde_json::from_str(&arguments).unwrap_or(Value::Null);
                let observation = self.dispatch(&tool_name, args, &tool_call_id).await;
                let content = match observation {
                    Ok(value) => value.to_string(),
                    Err(err) => json!({"error": err.to_string()}).to_string(),
                };
                let message = ChatMessage::tool(tool_call_id, tool_name).content(content).build();
                session.push(message.clone());
                self.sink.record(&message).await?;
                self.drive(session, None).await
            }
            HealAction::InjectUnknown { tool_call_id, tool_name } => {
                let message = unknown_on_resume_message(tool_call_id, tool_name);
                session.push(message.clone());
                self.sink.record(&message).await?;
                self.drive(session, None).await
            }
        }
    }

    async fn drive(
        &self,
        session: &mut Session,
        mut next_user_message: Option<ChatMessage>,
    ) -> Result<CommanderResult, RuntimeError> {
        let mut correction_rounds = 0u32;

        for _iteration in 0..COMMANDER_ITER_CAP {
            let assistant = drive_turn(session, next_user_message.take(), self.sink, |chunk| {
                let _ = chunk;
            })
            .await?;
            let calls = tool_calls_of(&assistant);

            if calls.is_empty() {
                match validate_turn(&assistant.content, self.output_schema) {
                    Ok((output, summary)) => {
                        return Ok(CommanderResult { output, summary });
                    }
                    Err(err) => {
                        if correction_rounds >= COMMANDER_CORRECTION_ROUNDS {
                            return Err(RuntimeError::SchemaValidation(err.to_string()));
                        }
                        correction_rounds += 1;
                        let corrective = correction_message(&err);
                        next_user_message = Some(ChatMessage::user().content(corrective).build());
                        continue;
                    }
                }
            }

            for call in &calls {
                let args: Value = serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
                self.events
                    .emit(
                        Some(self.task_name.clone()),
                        self.index,
                        None,
                        EventKind::ToolCall {
                            tool_name: call.function.name.clone(),
                            args: args.clone(),
                        },
                    )
                    .await?;

                let observation = self.dispatch(&call.function.name, args, &call.id).await;
                let content = match observation {
                    Ok(value) => value.to_string(),
                    Err(err) => json!({"error": err.to_string()}).to_string(),
                };
                let message = ChatMessage::tool(call.id.clone(), call.function.name.clone()).content(content).build();
                session.push(message.clone());
                self.sink.record(&message).await?;
            }
        }

        Err(RuntimeError::Internal(format!(
            "commander loop for `{}` exceeded its safety iteration bound without an OUTPUT block",
            self.task_name
        )))
    }

    async fn dispatch(&self, name: &str, args: Value, call_id: &str) -> Result<Value, RuntimeError> {
        match name {
            CALL_AGENT => {
                let agent_name = str_arg(&args, "name")?;
                let task = str_arg(&args, "task")?;
                let continuation_id = args.get("continuation_id").and_then(Value::as_str);
                match self
                    .context
                    .call_agent(&agent_name, &task, continuation_id, call_id)
                    .await?
                {
                    AgentOutcome::FinalAnswer(answer) => Ok(json!({"answer": answer, "agent_id": call_id})),
                    AgentOutcome::Escalation { question } => {
                        Ok(json!({"status": "escalation", "question": question, "continuation_id": call_id}))
                    }
                }
            }
            ASK_AGENT => {
                let agent_id = str_arg(&args, "agent_id")?;
                let question = str_arg(&args, "question")?;
                let answer = self.context.ask_agent(&agent_id, &question).await?;
                Ok(json!({"answer": answer}))
            }
            ASK_COMMANDER => {
                let target_task = str_arg(&args, "task_name")?;
                let question = str_arg(&args, "question")?;
                let index = args.get("index").and_then(Value::as_u64).map(|v| v as u32);
                let answer = self.context.ask_commander(&target_task, index, &question).await?;
                Ok(json!({"answer": answer}))
            }
            QUERY_TASK_OUTPUT => self.context.query_task_output(args).await,
            LIST_COMMANDER_QUESTIONS => {
                let task_name = str_arg(&args, "task_name")?;
                let questions = self.context.list_commander_questions(&task_name).await?;
                Ok(json!({"questions": questions.into_iter().map(|(id, q)| json!({"question_id": id, "question": q})).collect::<Vec<_>>()}))
            }
            GET_COMMANDER_ANSWER => {
                let question_id = str_arg(&args, "question_id")?;
                let answer = self.context.get_commander_answer(&question_id).await?;
                Ok(json!({"answer": answer}))
            }
            POPULATE_DATASET => {
                let dataset_name = str_arg(&args, "name")?;
                let items = args
                    .get("items")
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| RuntimeError::Internal("populate_dataset requires an `items` array".to_string()))?;
                let added = self.context.populate_dataset(&dataset_name, items).await?;
                Ok(json!({"items_added": added}))
            }
            other => Err(RuntimeError::UnknownReference(format!("unknown commander tool `{other}`"))),
        }
    }
}

fn str_arg(args: &Value, key: &str) -> Result<String, RuntimeError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RuntimeError::Internal(format!("missing `{key}` argument")))
}

fn string_property(description: &str) -> ParameterProperty {
    ParameterProperty {
        property_type: "string".to_string(),
        description: description.to_string(),
        items: None,
        enum_list: None,
    }
}

fn function(name: &str, description: &str, properties: Vec<(&str, ParameterProperty)>, required: Vec<&str>) -> Tool {
    Tool {
        tool_type: "function".to_string(),
        function: FunctionTool {
            name: name.to_string(),
            description: description.to_string(),
            parameters: serde_json::to_value(ParametersSchema {
                schema_type: "object".to_string(),
                properties: properties.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
                required: required.into_iter().map(String::from).collect(),
            })
            .expect("schema serializes"),
        },
    }
}

/// The fixed orchestration tool surface every Commander session
/// advertises (spec §4.7).
pub fn control_tool_descriptors() -> Vec<Tool> {
    vec![
        function(
            CALL_AGENT,
            "Spawns or continues an Agent Loop delegation.",
            vec![
                ("name", string_property("Name of the configured agent to delegate to.")),
                ("task", string_property("The task string to hand the agent.")),
                ("continuation_id", string_property("If resuming an escalated delegation, the prior call's id.")),
            ],
            vec!["name", "task"],
        ),
        function(
            ASK_AGENT,
            "Resumes a completed agent's session as a read-only side conversation.",
            vec![
                ("agent_id", string_property("Identifier of the completed agent invocation.")),
                ("question", string_property("Follow-up question for the agent.")),
            ],
            vec!["agent_id", "question"],
        ),
        function(
            ASK_COMMANDER,
            "Directs a question to a completed ancestor Commander.",
            vec![
                ("task_name", string_property("Name of the ancestor task.")),
                ("question", string_property("The question to ask.")),
                ("index", string_property("Iteration index, if the ancestor task was iterated.")),
            ],
            vec!["task_name", "question"],
        ),
        function(
            QUERY_TASK_OUTPUT,
            "Runs a structured query over a completed task's output (filter/order/aggregate).",
            vec![("query", string_property("JSON-shaped query object."))],
            vec!["query"],
        ),
        function(
            LIST_COMMANDER_QUESTIONS,
            "Lists previously asked ancestor questions for a task, for dedup before asking again.",
            vec![("task_name", string_property("Name of the ancestor task."))],
            vec!["task_name"],
        ),
        function(
            GET_COMMANDER_ANSWER,
            "Fetches the cached answer for a previously asked question by its id.",
            vec![("question_id", string_property("Identifier returned by list_commander_questions."))],
            vec!["question_id"],
        ),
        function(
            POPULATE_DATASET,
            "Extends a declared dynamic dataset with new items.",
            vec![
                ("name", string_property("Name of the dataset to extend.")),
                ("items", string_property("Array of items to append.")),
            ],
            vec!["name", "items"],
        ),
    ]
}
