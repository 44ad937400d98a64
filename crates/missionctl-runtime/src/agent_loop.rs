//! Agent Loop (spec §4.6, component C6): drives one delegation as a
//! ReAct-style reason -> act -> observe cycle over a [`Session`].

use std::collections::HashMap;

use serde_json::{json, Value};

use missionctl_llm::chat::{ChatMessage, ChatRole, MessageType};
use missionctl_llm::session::Session;
use missionctl_llm::tool_decorator::CallFunctionTool;

use crate::error::RuntimeError;
use crate::events::EventBus;
use crate::limits::{AGENT_ITER_CAP, AGENT_TOOL_RECOVERY_BUDGET};
use crate::persist::MessageSink;
use crate::resaturation::{diagnose, resolve_redispatch, unknown_on_resume_message, HealAction};
use crate::turn::{drive_turn, tool_calls_of};

pub const FINAL_ANSWER_TOOL: &str = "final_answer";
pub const ESCALATE_TOOL: &str = "escalate_to_commander";

/// The two control tools every Agent Loop session advertises in addition
/// to its configured working tools, used to detect loop termination
/// conditions (a) and (b) (spec §4.6).
pub fn control_tool_descriptors() -> Vec<missionctl_llm::chat::Tool> {
    use missionctl_llm::chat::{FunctionTool, ParameterProperty, ParametersSchema, Tool};

    let final_answer = Tool {
        tool_type: "function".to_string(),
        function: FunctionTool {
            name: FINAL_ANSWER_TOOL.to_string(),
            description: "Call this once you have a complete answer to the delegated task.".to_string(),
            parameters: serde_json::to_value(ParametersSchema {
                schema_type: "object".to_string(),
                properties: HashMap::from([(
                    "answer".to_string(),
                    ParameterProperty {
                        property_type: "string".to_string(),
                        description: "The final answer to the delegated task.".to_string(),
                        items: None,
                        enum_list: None,
                    },
                )]),
                required: vec!["answer".to_string()],
            })
            .expect("schema serializes"),
        },
    };

    let escalate = Tool {
        tool_type: "function".to_string(),
        function: FunctionTool {
            name: ESCALATE_TOOL.to_string(),
            description: "Call this if you need the Commander to supply information before you can continue.".to_string(),
            parameters: serde_json::to_value(ParametersSchema {
                schema_type: "object".to_string(),
                properties: HashMap::from([(
                    "question".to_string(),
                    ParameterProperty {
                        property_type: "string".to_string(),
                        description: "The question the Commander must answer.".to_string(),
                        items: None,
                        enum_list: None,
                    },
                )]),
                required: vec!["question".to_string()],
            })
            .expect("schema serializes"),
        },
    };

    vec![final_answer, escalate]
}

/// What an Agent Loop hands back to its caller (the Commander Loop, spec
/// §4.7).
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    /// The agent emitted its designated final-answer marker.
    FinalAnswer(String),
    /// The agent escalated a question the Commander must answer before
    /// the delegation can continue (spec §4.6 condition b, GLOSSARY
    /// "Escalation").
    Escalation { question: String },
}

/// Drives one Agent Loop invocation. Tool lookups go through `tools`,
/// which the caller has already wrapped in [`crate::interceptor::InterceptedTool`]
/// for every entry that isn't one of the two synthetic control tools
/// above.
pub struct AgentLoop<'a> {
    pub tools: &'a HashMap<String, Box<dyn CallFunctionTool>>,
    pub events: &'a EventBus,
    pub sink: &'a dyn MessageSink,
    pub task_name: String,
    pub index: Option<u32>,
    pub agent_name: String,
}

impl<'a> AgentLoop<'a> {
    /// Runs the loop from a fresh delegation: `opening_message` is the
    /// task string handed to the agent (spec §4.6 "(agent-definition,
    /// task-string, session)").
    pub async fn run(
        &self,
        session: &mut Session,
        opening_message: ChatMessage,
    ) -> Result<AgentOutcome, RuntimeError> {
        self.drive(session, Some(opening_message)).await
    }

    /// Resumes the loop with no new user turn -- the continuation taken
    /// after a Commander answers an escalation (`continuation_id`) or
    /// after Resaturation heals an in-flight session (spec §4.9).
    pub async fn resume(&self, session: &mut Session) -> Result<AgentOutcome, RuntimeError> {
        self.drive(session, None).await
    }

    /// Heals a reloaded transcript per Resaturation's diagnosis (spec
    /// §4.9) before resuming. Unlike the Commander Loop's fixed
    /// orchestration surface, an Agent's tools are the configured,
    /// possibly-changed-since-crash `tools` map, so a dangling call is
    /// re-dispatched only when the registry can still resolve it
    /// ([`resolve_redispatch`]); otherwise the synthetic
    /// `unknown_on_resume` observation is injected instead.
    pub async fn heal_and_resume(&self, session: &mut Session) -> Result<AgentOutcome, RuntimeError> {
        if let Some(last) = session.messages().last() {
            if matches!(last.role, ChatRole::Assistant) && matches!(last.message_type, MessageType::Text) {
                return Ok(AgentOutcome::FinalAnswer(last.content.clone()));
            }
        }

        match resolve_redispatch(diagnose(session.messages()), self.tools) {
            HealAction::Healthy | HealAction::ContinueStream => self.resume(session).await,
            HealAction::ReDispatchTool { tool_call_id, tool_name, arguments } => {
                let args: Value = serde_json::from_str(&arguments).unwrap_or(Value::Null);
                let observation = match self.tools.get(&tool_name) {
                    Some(tool) => tool.call(args).await.map_err(|e| e.to_string()),
                    None => Err(format!("unknown tool `{tool_name}`")),
                };
                let content = match observation {
                    Ok(value) => value,
                    Err(err) => json!({"error": err}).to_string(),
                };
                let message = ChatMessage::tool(tool_call_id, tool_name).content(content).build();
                session.push(message.clone());
                self.sink.record(&message).await?;
                self.resume(session).await
            }
            HealAction::InjectUnknown { tool_call_id, tool_name } => {
                let message = unknown_on_resume_message(tool_call_id, tool_name);
                session.push(message.clone());
                self.sink.record(&message).await?;
                self.resume(session).await
            }
        }
    }

    async fn drive(
        &self,
        session: &mut Session,
        mut next_user_message: Option<ChatMessage>,
    ) -> Result<AgentOutcome, RuntimeError> {
        let mut recovery_budget: HashMap<String, u32> = HashMap::new();

        for _iteration in 0..AGENT_ITER_CAP {
            let assistant = drive_turn(session, next_user_message.take(), self.sink, |_chunk| {}).await?;
            let calls = tool_calls_of(&assistant);

            if calls.is_empty() {
                // No tool call: treat the free-text turn as the terminal answer.
                return Ok(AgentOutcome::FinalAnswer(assistant.content));
            }

            let mut observations = Vec::with_capacity(calls.len());
            let mut terminal: Option<AgentOutcome> = None;

            for call in &calls {
                let args: serde_json::Value =
                    serde_json::from_str(&call.function.arguments).unwrap_or(serde_json::Value::Null);

                match call.function.name.as_str() {
                    FINAL_ANSWER_TOOL => {
                        let answer = args
                            .get("answer")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        terminal = Some(AgentOutcome::FinalAnswer(answer));
                        observations.push((call.id.clone(), call.function.name.clone(), json!({"acknowledged": true}).to_string()));
                    }
                    ESCALATE_TOOL => {
                        let question = args
                            .get("question")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        terminal = Some(AgentOutcome::Escalation { question });
                        observations.push((call.id.clone(), call.function.name.clone(), json!({"status": "pending_commander"}).to_string()));
                    }
                    name => {
                        self.events
                            .emit(
                                Some(self.task_name.clone()),
                                self.index,
                                Some(self.agent_name.clone()),
                                missionctl_types::EventKind::ToolCall {
                                    tool_name: name.to_string(),
                                    args: args.clone(),
                                },
                            )
                            .await?;

                        let result = match self.tools.get(name) {
                            Some(tool) => tool.call(args).await,
                            None => Err(missionctl_llm::error::LLMError::InvalidRequest(format!(
                                "unknown tool `{name}`"
                            ))),
                        };

                        self.events
                            .emit(
                                Some(self.task_name.clone()),
                                self.index,
                                Some(self.agent_name.clone()),
                                missionctl_types::EventKind::ToolResult {
                                    tool_name: name.to_string(),
                                    intercepted: false,
                                },
                            )
                            .await?;

                        match result {
                            Ok(observation) => {
                                observations.push((call.id.clone(), name.to_string(), observation));
                            }
                            Err(err) => {
                                let budget = recovery_budget.entry(name.to_string()).or_insert(0);
                                *budget += 1;
                                if *budget > AGENT_TOOL_RECOVERY_BUDGET {
                                    return Err(RuntimeError::Tool {
                                        tool: name.to_string(),
                                        reason: err.to_string(),
                                    });
                                }
                                observations.push((
                                    call.id.clone(),
                                    name.to_string(),
                                    json!({"error": err.to_string()}).to_string(),
                                ));
                            }
                        }
                    }
                }
            }

            for (tool_call_id, tool_name, content) in observations {
                let message = ChatMessage::tool(tool_call_id, tool_name).content(content).build();
                session.push(message.clone());
                self.sink.record(&message).await?;
            }

            if let Some(outcome) = terminal {
                return Ok(outcome);
            }

            next_user_message = None;
        }

        Err(RuntimeError::AgentIterExceeded)
    }
}
