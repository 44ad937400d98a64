//! Plugin Host (spec §4.3, component C3): tool providers executed as
//! isolated child processes speaking a framed RPC protocol over a local
//! transport -- their own stdin/stdout pipes.
//!
//! Framing is a 4-byte big-endian length prefix followed by that many
//! bytes of UTF-8 JSON, the shape used throughout this codebase's
//! examples wherever a local transport carries request/response traffic
//! (rather than newline-delimited text, which cannot safely carry a
//! payload containing its own delimiter). Requests are
//! `{"id": u64, "method": str, "params": <value>}`; responses are
//! `{"id": u64, "result": <value>}` or `{"id": u64, "error": str}`.
//! A plugin process speaks three methods: `list_tools`, `call_tool`,
//! `configure`. Checksum verification uses a `sha2::Sha256` digest
//! compared against the manifest's declared checksum before the binary
//! is ever spawned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, RwLock};

use missionctl_llm::chat::Tool;
use missionctl_llm::error::LLMError;
use missionctl_llm::tool_decorator::CallFunctionTool;

use crate::error::RuntimeError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PluginKey {
    name: String,
    version: String,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// One child process tool provider (spec §4.3 "isolated child processes
/// speaking a framed RPC protocol over a local transport"), callable for
/// the tools it advertises over its own stdio pipes.
struct LoadedPlugin {
    name: String,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    next_id: AtomicU64,
}

impl LoadedPlugin {
    async fn spawn(name: &str, binary_path: &Path, settings: &HashMap<String, String>) -> Result<Self, RuntimeError> {
        let mut command = Command::new(binary_path);
        command
            .envs(settings.iter().map(|(k, v)| (format!("PLUGIN_{k}"), v.clone())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|e| RuntimeError::Plugin(format!("{name}: failed to spawn child process: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Plugin(format!("{name}: child process has no stdin pipe")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Plugin(format!("{name}: child process has no stdout pipe")))?;
        Ok(LoadedPlugin {
            name: name.to_string(),
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            next_id: AtomicU64::new(1),
        })
    }

    /// Sends one framed request and waits for its framed response. Holds
    /// the stdin and stdout locks for the full round trip, so at most one
    /// call is in flight per plugin process at a time -- matching the
    /// "one live plugin instance" cache `PluginHost` keeps above it.
    async fn call_json(&self, method: &str, params: &Value) -> Result<Value, RuntimeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest { id, method, params };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| RuntimeError::Plugin(format!("{}: encoding request: {e}", self.name)))?;

        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(&(payload.len() as u32).to_be_bytes())
                .await
                .map_err(|e| RuntimeError::Plugin(format!("{}: writing frame length: {e}", self.name)))?;
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| RuntimeError::Plugin(format!("{}: writing frame body: {e}", self.name)))?;
            stdin
                .flush()
                .await
                .map_err(|e| RuntimeError::Plugin(format!("{}: flushing request: {e}", self.name)))?;
        }

        let response: RpcResponse = {
            let mut stdout = self.stdout.lock().await;
            let mut len_buf = [0u8; 4];
            stdout
                .read_exact(&mut len_buf)
                .await
                .map_err(|e| RuntimeError::Plugin(format!("{}: reading frame length: {e}", self.name)))?;
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            stdout
                .read_exact(&mut body)
                .await
                .map_err(|e| RuntimeError::Plugin(format!("{}: reading frame body: {e}", self.name)))?;
            serde_json::from_slice(&body)
                .map_err(|e| RuntimeError::Plugin(format!("{}: decoding response: {e}", self.name)))?
        };

        if response.id != id {
            return Err(RuntimeError::Plugin(format!(
                "{}: response id {} did not match request id {id}",
                self.name, response.id
            )));
        }
        if let Some(error) = response.error {
            return Err(RuntimeError::Plugin(format!("{}::{method}: {error}", self.name)));
        }
        response
            .result
            .ok_or_else(|| RuntimeError::Plugin(format!("{}::{method}: empty response", self.name)))
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, RuntimeError> {
        let out = self.call_json("list_tools", &Value::Null).await?;
        serde_json::from_value(out).map_err(|e| RuntimeError::Plugin(format!("{}: malformed list_tools: {e}", self.name)))
    }

    async fn call_tool(&self, tool_name: &str, payload: &Value) -> Result<String, RuntimeError> {
        let out = self
            .call_json("call_tool", &serde_json::json!({"tool": tool_name, "payload": payload}))
            .await?;
        Ok(out.to_string())
    }

    async fn configure(&self, settings: &Value) -> Result<(), RuntimeError> {
        self.call_json("configure", settings).await?;
        Ok(())
    }

    /// Terminates the child process. Best-effort: a process that has
    /// already exited (e.g. crashed) is not an error here.
    async fn shutdown(&self) {
        let _ = self.child.lock().await.start_kill();
    }
}

/// Process-wide cache of one live plugin process per `{name, version}`
/// (spec §4.3 "a process-wide registry caches one live plugin ... so that
/// stateful plugins ... persist across tasks inside a mission").
pub struct PluginHost {
    binaries_root: PathBuf,
    live: RwLock<HashMap<PluginKey, std::sync::Arc<LoadedPlugin>>>,
}

impl PluginHost {
    pub fn new(binaries_root: impl Into<PathBuf>) -> Self {
        PluginHost {
            binaries_root: binaries_root.into(),
            live: RwLock::new(HashMap::new()),
        }
    }

    fn binary_path(&self, name: &str, version: &str) -> PathBuf {
        let exe = if cfg!(windows) { format!("{name}.exe") } else { name.to_string() };
        self.binaries_root.join(name).join(version).join(exe)
    }

    /// Verifies `path`'s contents against `expected_sha256` (hex,
    /// optionally `sha256:`-prefixed).
    fn verify_checksum(path: &Path, expected_sha256: &str) -> Result<(), RuntimeError> {
        let expected = expected_sha256.trim_start_matches("sha256:").to_ascii_lowercase();
        let bytes = std::fs::read(path)
            .map_err(|e| RuntimeError::Plugin(format!("reading {}: {e}", path.display())))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let actual = hex_encode(&hasher.finalize());
        if actual != expected {
            return Err(RuntimeError::Plugin(format!(
                "checksum mismatch for {}: expected {expected}, got {actual}",
                path.display()
            )));
        }
        Ok(())
    }

    /// Launches (or returns the already-cached) plugin process for
    /// `{name, version}`, verifying its checksum before the first spawn.
    pub async fn ensure_loaded(
        &self,
        name: &str,
        version: &str,
        expected_sha256: Option<&str>,
        settings: &HashMap<String, String>,
    ) -> Result<std::sync::Arc<LoadedPlugin>, RuntimeError> {
        let key = PluginKey {
            name: name.to_string(),
            version: version.to_string(),
        };
        {
            let live = self.live.read().await;
            if let Some(plugin) = live.get(&key) {
                return Ok(plugin.clone());
            }
        }

        let path = self.binary_path(name, version);
        if !path.exists() {
            return Err(RuntimeError::Plugin(format!(
                "plugin binary not found at {} (fetch-on-demand requires an OCI registry client, out of scope for the core)",
                path.display()
            )));
        }
        if let Some(expected) = expected_sha256 {
            Self::verify_checksum(&path, expected)?;
        }

        let loaded = LoadedPlugin::spawn(name, &path, settings).await?;
        loaded.configure(&serde_json::to_value(settings).unwrap_or(Value::Null)).await?;
        let loaded = std::sync::Arc::new(loaded);

        let mut live = self.live.write().await;
        let loaded = live.entry(key).or_insert(loaded).clone();
        Ok(loaded)
    }

    /// Terminates every live plugin process (spec §4.3 "terminated at
    /// mission teardown ... via an explicit CloseAll").
    pub async fn close_all(&self) {
        let mut live = self.live.write().await;
        for plugin in live.values() {
            plugin.shutdown().await;
        }
        live.clear();
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Adapts one tool surfaced by a loaded plugin to [`CallFunctionTool`] so
/// it can be registered alongside native tools in an Agent/Commander
/// session's tool registry.
pub struct PluginTool {
    pub plugin: std::sync::Arc<LoadedPlugin>,
    pub descriptor: Tool,
}

#[async_trait]
impl CallFunctionTool for PluginTool {
    fn descriptor(&self) -> Tool {
        self.descriptor.clone()
    }

    fn server_name(&self) -> Option<&str> {
        Some(&self.plugin.name)
    }

    async fn call(&self, args: Value) -> Result<String, LLMError> {
        self.plugin
            .call_tool(&self.descriptor.function.name, &args)
            .await
            .map_err(|e| LLMError::PluginError(e.to_string()))
    }
}

/// Builds [`PluginTool`]s for every tool a loaded plugin advertises.
pub async fn tools_for_plugin(plugin: std::sync::Arc<LoadedPlugin>) -> Result<Vec<PluginTool>, RuntimeError> {
    let descriptors = plugin.list_tools().await?;
    Ok(descriptors
        .into_iter()
        .map(|descriptor| PluginTool {
            plugin: plugin.clone(),
            descriptor,
        })
        .collect())
}
