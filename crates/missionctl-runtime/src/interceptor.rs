//! Tool Registry and Result Interceptor (spec §4.2, component C2).
//!
//! Every tool call configured for an Agent or Commander session is routed
//! through an [`Interceptor`], which wraps the inner [`CallFunctionTool`]
//! and offloads oversized results to the mission-scoped [`ResultStore`],
//! handing the model a compact sample plus a `result_id` and the names of
//! four synthetic retrieval tools. Built over the same dispatch-by-name
//! pattern as `missionctl_llm::tool_decorator`, extended here to also
//! decide *whether* a result needs offloading before it ever reaches a
//! session.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use missionctl_llm::chat::{FunctionTool, ParameterProperty, ParametersSchema, Tool};
use missionctl_llm::error::LLMError;
use missionctl_llm::tool_decorator::CallFunctionTool;
use missionctl_store::{ResultRecord, Store};

use crate::limits::{RESULT_ARRAY_THRESHOLD, RESULT_BYTE_THRESHOLD};

pub const RESULT_ITEMS: &str = "result_items";
pub const RESULT_CHUNK: &str = "result_chunk";
pub const RESULT_FILTER: &str = "result_filter";
pub const RESULT_TO_DATASET: &str = "result_to_dataset";

/// Decides whether a raw tool result must be offloaded, and if so performs
/// the offload (spec §4.2 steps a-c). Stateless beyond the `Store`/mission
/// id it closes over; safe to share across every tool in a session.
#[derive(Clone)]
pub struct Interceptor {
    store: Store,
    mission_id: String,
}

impl Interceptor {
    pub fn new(store: Store, mission_id: impl Into<String>) -> Self {
        Interceptor {
            store,
            mission_id: mission_id.into(),
        }
    }

    pub fn mission_id(&self) -> &str {
        &self.mission_id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Wraps `inner`'s output in interception logic; called once per tool
    /// call so the decision is always made against the latest result.
    pub async fn process(&self, tool_name: &str, raw: String) -> Result<String, LLMError> {
        if let Some(parsed) = serde_json::from_str::<Value>(&raw).ok().filter(|v| v.is_array()) {
            let arr = parsed.as_array().expect("checked is_array");
            if arr.len() > RESULT_ARRAY_THRESHOLD {
                return self.offload_array(tool_name, parsed).await;
            }
        }
        if raw.len() > RESULT_BYTE_THRESHOLD {
            return self.offload_string(tool_name, raw).await;
        }
        Ok(raw)
    }

    async fn offload_array(&self, tool_name: &str, full: Value) -> Result<String, LLMError> {
        let arr = full.as_array().expect("checked is_array").clone();
        let total = arr.len();
        let sample_count = RESULT_ARRAY_THRESHOLD.min(total);
        let sample = Value::Array(arr[..sample_count].to_vec());
        let result_id = Uuid::new_v4().to_string();

        self.store
            .store_result(&ResultRecord {
                mission_id: self.mission_id.clone(),
                result_id: result_id.clone(),
                tool_name: tool_name.to_string(),
                payload: full,
                sample: sample.clone(),
            })
            .await
            .map_err(|e| LLMError::ProviderError(e.to_string()))?;

        Ok(observation_envelope(&result_id, total, sample).to_string())
    }

    async fn offload_string(&self, tool_name: &str, full: String) -> Result<String, LLMError> {
        let half = RESULT_BYTE_THRESHOLD / 2;
        let sample_text = truncate_on_char_boundary(&full, half);
        let result_id = Uuid::new_v4().to_string();
        let full_value = json!(full);
        let sample_value = json!(sample_text);

        self.store
            .store_result(&ResultRecord {
                mission_id: self.mission_id.clone(),
                result_id: result_id.clone(),
                tool_name: tool_name.to_string(),
                payload: full_value,
                sample: sample_value.clone(),
            })
            .await
            .map_err(|e| LLMError::ProviderError(e.to_string()))?;

        Ok(json!({
            "result_id": result_id,
            "sample": sample_text,
            "total_bytes": full.len(),
            "retrieval_tools": [RESULT_CHUNK, RESULT_FILTER],
        })
        .to_string())
    }
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn observation_envelope(result_id: &str, total: usize, sample: Value) -> Value {
    json!({
        "result_id": result_id,
        "sample": sample,
        "total": total,
        "retrieval_tools": [RESULT_ITEMS, RESULT_CHUNK, RESULT_FILTER, RESULT_TO_DATASET],
    })
}

/// Wraps an inner [`CallFunctionTool`] so every call it serves is routed
/// through an [`Interceptor`] before the result reaches the model.
pub struct InterceptedTool {
    inner: Box<dyn CallFunctionTool>,
    interceptor: Interceptor,
}

impl InterceptedTool {
    pub fn new(inner: Box<dyn CallFunctionTool>, interceptor: Interceptor) -> Self {
        InterceptedTool { inner, interceptor }
    }
}

#[async_trait]
impl CallFunctionTool for InterceptedTool {
    fn descriptor(&self) -> Tool {
        self.inner.descriptor()
    }

    fn server_name(&self) -> Option<&str> {
        self.inner.server_name()
    }

    async fn call(&self, args: Value) -> Result<String, LLMError> {
        let name = self.inner.descriptor().function.name.clone();
        let raw = self.inner.call(args).await?;
        self.interceptor.process(&name, raw).await
    }
}

// ---- synthetic retrieval tools ------------------------------------------

fn string_property(description: &str) -> ParameterProperty {
    ParameterProperty {
        property_type: "string".to_string(),
        description: description.to_string(),
        items: None,
        enum_list: None,
    }
}

fn integer_property(description: &str) -> ParameterProperty {
    ParameterProperty {
        property_type: "integer".to_string(),
        description: description.to_string(),
        items: None,
        enum_list: None,
    }
}

fn function_descriptor(name: &str, description: &str, properties: Vec<(&str, ParameterProperty)>, required: Vec<&str>) -> Tool {
    let schema = ParametersSchema {
        schema_type: "object".to_string(),
        properties: properties.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        required: required.into_iter().map(String::from).collect(),
    };
    Tool {
        tool_type: "function".to_string(),
        function: FunctionTool {
            name: name.to_string(),
            description: description.to_string(),
            parameters: serde_json::to_value(&schema).expect("schema serializes"),
        },
    }
}

async fn load_payload(store: &Store, mission_id: &str, result_id: &str) -> Result<Value, LLMError> {
    store
        .load_result(mission_id, result_id)
        .await
        .map_err(|e| LLMError::ProviderError(e.to_string()))?
        .map(|r| r.payload)
        .ok_or_else(|| LLMError::InvalidRequest(format!("unknown result_id `{result_id}`")))
}

fn get_str_arg(args: &Value, key: &str) -> Result<String, LLMError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LLMError::InvalidRequest(format!("missing `{key}` argument")))
}

fn get_usize_arg(args: &Value, key: &str, default: usize) -> usize {
    args.get(key).and_then(Value::as_u64).map(|v| v as usize).unwrap_or(default)
}

/// `result_items(result_id, offset, limit)`: slices an array result (spec
/// §8 scenario 5).
pub struct ResultItemsTool {
    pub store: Store,
    pub mission_id: String,
}

#[async_trait]
impl CallFunctionTool for ResultItemsTool {
    fn descriptor(&self) -> Tool {
        function_descriptor(
            RESULT_ITEMS,
            "Returns a slice of a previously offloaded array result.",
            vec![
                ("result_id", string_property("Identifier returned by the original oversized tool result.")),
                ("offset", integer_property("Zero-based starting index.")),
                ("limit", integer_property("Maximum number of elements to return.")),
            ],
            vec!["result_id"],
        )
    }

    async fn call(&self, args: Value) -> Result<String, LLMError> {
        let result_id = get_str_arg(&args, "result_id")?;
        let offset = get_usize_arg(&args, "offset", 0);
        let limit = get_usize_arg(&args, "limit", RESULT_ARRAY_THRESHOLD);
        let payload = load_payload(&self.store, &self.mission_id, &result_id).await?;
        let arr = payload
            .as_array()
            .ok_or_else(|| LLMError::InvalidRequest(format!("result `{result_id}` is not an array")))?;
        let total = arr.len();
        let end = (offset + limit).min(total);
        let slice = if offset < total { arr[offset..end].to_vec() } else { Vec::new() };
        Ok(json!({"result_id": result_id, "offset": offset, "items": slice, "total": total}).to_string())
    }
}

/// `result_chunk(result_id, offset, length)`: slices a string result by
/// byte range.
pub struct ResultChunkTool {
    pub store: Store,
    pub mission_id: String,
}

#[async_trait]
impl CallFunctionTool for ResultChunkTool {
    fn descriptor(&self) -> Tool {
        function_descriptor(
            RESULT_CHUNK,
            "Returns a byte-range slice of a previously offloaded string result.",
            vec![
                ("result_id", string_property("Identifier returned by the original oversized tool result.")),
                ("offset", integer_property("Zero-based starting byte offset.")),
                ("length", integer_property("Number of bytes to return.")),
            ],
            vec!["result_id"],
        )
    }

    async fn call(&self, args: Value) -> Result<String, LLMError> {
        let result_id = get_str_arg(&args, "result_id")?;
        let offset = get_usize_arg(&args, "offset", 0);
        let length = get_usize_arg(&args, "length", RESULT_BYTE_THRESHOLD / 2);
        let payload = load_payload(&self.store, &self.mission_id, &result_id).await?;
        let text = payload
            .as_str()
            .ok_or_else(|| LLMError::InvalidRequest(format!("result `{result_id}` is not a string")))?;
        let total = text.len();
        let start = offset.min(total);
        let end = (start + length).min(total);
        let chunk = truncate_on_char_boundary(&text[start..], end - start);
        Ok(json!({"result_id": result_id, "offset": start, "chunk": chunk, "total_bytes": total}).to_string())
    }
}

/// `result_filter(result_id, path)`: a jq-ish dotted path over an
/// offloaded array result. A `[]` segment maps the remaining path across
/// every element and flattens arrays it produces.
pub struct ResultFilterTool {
    pub store: Store,
    pub mission_id: String,
}

#[async_trait]
impl CallFunctionTool for ResultFilterTool {
    fn descriptor(&self) -> Tool {
        function_descriptor(
            RESULT_FILTER,
            "Projects a dotted field path (jq-ish, `[]` maps over array elements) out of a previously offloaded result.",
            vec![
                ("result_id", string_property("Identifier returned by the original oversized tool result.")),
                ("path", string_property("Dotted path, e.g. `items.[].name`.")),
            ],
            vec!["result_id", "path"],
        )
    }

    async fn call(&self, args: Value) -> Result<String, LLMError> {
        let result_id = get_str_arg(&args, "result_id")?;
        let path = get_str_arg(&args, "path")?;
        let payload = load_payload(&self.store, &self.mission_id, &result_id).await?;
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let projected = project(&payload, &segments);
        Ok(json!({"result_id": result_id, "path": path, "value": projected}).to_string())
    }
}

fn project(value: &Value, segments: &[&str]) -> Value {
    match segments.split_first() {
        None => value.clone(),
        Some((&"[]", rest)) => match value.as_array() {
            Some(arr) => Value::Array(arr.iter().map(|item| project(item, rest)).collect()),
            None => Value::Null,
        },
        Some((&field, rest)) => match value.get(field) {
            Some(next) => project(next, rest),
            None => Value::Null,
        },
    }
}

/// `result_to_dataset(result_id, dataset_name)`: promotes an array result
/// into a named Dataset for iteration (spec §4.2 step d).
pub struct ResultToDatasetTool {
    pub store: Store,
    pub mission_id: String,
}

#[async_trait]
impl CallFunctionTool for ResultToDatasetTool {
    fn descriptor(&self) -> Tool {
        function_descriptor(
            RESULT_TO_DATASET,
            "Promotes a previously offloaded array result into a named Dataset usable as a task iterator.",
            vec![
                ("result_id", string_property("Identifier returned by the original oversized tool result.")),
                ("dataset_name", string_property("Name of the Dataset to create or append to.")),
            ],
            vec!["result_id", "dataset_name"],
        )
    }

    async fn call(&self, args: Value) -> Result<String, LLMError> {
        let result_id = get_str_arg(&args, "result_id")?;
        let dataset_name = get_str_arg(&args, "dataset_name")?;
        let payload = load_payload(&self.store, &self.mission_id, &result_id).await?;
        let arr = payload
            .as_array()
            .ok_or_else(|| LLMError::InvalidRequest(format!("result `{result_id}` is not an array")))?
            .clone();
        let count = arr.len();

        self.store
            .ensure_dataset(&self.mission_id, &dataset_name)
            .await
            .map_err(|e| LLMError::ProviderError(e.to_string()))?;
        self.store
            .append_dataset_items(&self.mission_id, &dataset_name, arr)
            .await
            .map_err(|e| LLMError::ProviderError(e.to_string()))?;
        self.store
            .mark_dataset_populated(&self.mission_id, &dataset_name)
            .await
            .map_err(|e| LLMError::ProviderError(e.to_string()))?;

        Ok(json!({"dataset_name": dataset_name, "items_added": count}).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn array_under_threshold_passes_through() {
        let store = Store::open_in_memory().await.unwrap();
        let interceptor = Interceptor::new(store, "m1");
        let small = json!([1, 2, 3]).to_string();
        let out = interceptor.process("some_tool", small.clone()).await.unwrap();
        assert_eq!(out, small);
    }

    #[tokio::test]
    async fn oversized_array_is_offloaded_with_sample_and_total() {
        let store = Store::open_in_memory().await.unwrap();
        let interceptor = Interceptor::new(store.clone(), "m1");
        let items: Vec<Value> = (0..400).map(|i| json!({"i": i})).collect();
        let raw = Value::Array(items).to_string();
        let out = interceptor.process("big_tool", raw).await.unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["total"], 400);
        assert_eq!(parsed["sample"].as_array().unwrap().len(), RESULT_ARRAY_THRESHOLD);
        let result_id = parsed["result_id"].as_str().unwrap();

        let items_tool = ResultItemsTool { store: store.clone(), mission_id: "m1".to_string() };
        let page = items_tool
            .call(json!({"result_id": result_id, "offset": 25, "limit": 25}))
            .await
            .unwrap();
        let page: Value = serde_json::from_str(&page).unwrap();
        assert_eq!(page["items"].as_array().unwrap().len(), 25);
        assert_eq!(page["items"][0]["i"], 25);
    }

    #[tokio::test]
    async fn result_filter_maps_over_array() {
        let store = Store::open_in_memory().await.unwrap();
        let record = ResultRecord {
            mission_id: "m1".to_string(),
            result_id: "r1".to_string(),
            tool_name: "t".to_string(),
            payload: json!([{"name": "a"}, {"name": "b"}]),
            sample: json!([{"name": "a"}]),
        };
        store.store_result(&record).await.unwrap();
        let tool = ResultFilterTool { store, mission_id: "m1".to_string() };
        let out = tool.call(json!({"result_id": "r1", "path": "[].name"})).await.unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["value"], json!(["a", "b"]));
    }
}
