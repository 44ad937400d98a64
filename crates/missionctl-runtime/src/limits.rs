//! Default bounds named throughout spec §4 and centralized here so every
//! loop references one constant instead of a scattered magic number (spec
//! §9 open question #2: "the precise retry counters ... are chosen here as
//! defaults").

/// Oversized-result byte threshold *T* (spec §4.2). A result exactly at
/// this many bytes is **not** intercepted; one byte over is.
pub const RESULT_BYTE_THRESHOLD: usize = 8_192;

/// Oversized-result array-length threshold *K* (spec §4.2).
pub const RESULT_ARRAY_THRESHOLD: usize = 25;

/// Agent Loop hard iteration cap (spec §4.6).
pub const AGENT_ITER_CAP: u32 = 40;

/// Per-distinct-tool recovery budget inside one Agent Loop (spec §4.6).
pub const AGENT_TOOL_RECOVERY_BUDGET: u32 = 3;

/// Commander OUTPUT-block correction rounds (spec §4.7).
pub const COMMANDER_CORRECTION_ROUNDS: u32 = 3;

/// Safety bound on total Commander Loop turns, distinct from the Agent
/// Loop's cap since a Commander fans out to multiple `call_agent`
/// delegations before ever emitting an OUTPUT block.
pub const COMMANDER_ITER_CAP: u32 = 60;

/// Default per-tool dispatch timeout (spec §5).
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 120;

/// Default per-agent-loop timeout (spec §5).
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 600;
