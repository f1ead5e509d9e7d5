use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inference engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settings for the single GPU-resident inference subprocess and the
/// supervision loops around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// TCP port the engine's OpenAI-compatible server listens on.
    #[serde(default = "d_engine_port")]
    pub port: u16,
    /// Wrapper script the launch plan's argv is handed to.
    #[serde(default = "d_wrapper")]
    pub wrapper_script: String,
    /// Substring identifying stray engine processes during the sweep.
    #[serde(default = "d_command_pattern")]
    pub command_pattern: String,
    /// Weights download/cache directory passed as `--download-dir`.
    #[serde(default = "d_download_dir")]
    pub download_dir: String,
    #[serde(default = "d_gpu_mem")]
    pub default_gpu_memory_utilization: f64,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Seconds to wait for a graceful exit before SIGKILL.
    #[serde(default = "d_grace")]
    pub shutdown_grace_secs: u64,
    /// Absolute per-request timeout for the completion stream.
    #[serde(default = "d_stream_timeout")]
    pub stream_timeout_secs: u64,
    /// TTL for the cached pool-status readiness probe.
    #[serde(default = "d_status_cache")]
    pub status_cache_secs: u64,
}

impl EngineConfig {
    /// Base URL of the engine HTTP server.
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    pub fn models_url(&self) -> String {
        format!("{}/v1/models", self.base_url())
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: d_engine_port(),
            wrapper_script: d_wrapper(),
            command_pattern: d_command_pattern(),
            download_dir: d_download_dir(),
            default_gpu_memory_utilization: d_gpu_mem(),
            readiness: ReadinessConfig::default(),
            shutdown_grace_secs: d_grace(),
            stream_timeout_secs: d_stream_timeout(),
            status_cache_secs: d_status_cache(),
        }
    }
}

/// Timing knobs for the readiness poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "d_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "d_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Absolute ceiling on an activation attempt.
    #[serde(default = "d_hard_cap")]
    pub hard_cap_secs: u64,
    /// Elapsed threshold of the stuck heuristic.
    #[serde(default = "d_stuck_after")]
    pub stuck_after_secs: u64,
    /// Consecutive-failure threshold of the stuck heuristic.
    #[serde(default = "d_stuck_failures")]
    pub stuck_failures: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: d_poll_interval(),
            probe_timeout_secs: d_probe_timeout(),
            hard_cap_secs: d_hard_cap(),
            stuck_after_secs: d_stuck_after(),
            stuck_failures: d_stuck_failures(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_engine_port() -> u16 {
    8003
}
fn d_wrapper() -> String {
    "scripts/run-engine.sh".into()
}
fn d_command_pattern() -> String {
    "vllm.entrypoints.openai.api_server".into()
}
fn d_download_dir() -> String {
    "./data/cache".into()
}
fn d_gpu_mem() -> f64 {
    0.85
}
fn d_poll_interval() -> u64 {
    10
}
fn d_probe_timeout() -> u64 {
    8
}
fn d_hard_cap() -> u64 {
    300
}
fn d_stuck_after() -> u64 {
    240
}
fn d_stuck_failures() -> u32 {
    20
}
fn d_grace() -> u64 {
    10
}
fn d_stream_timeout() -> u64 {
    240
}
fn d_status_cache() -> u64 {
    60
}
