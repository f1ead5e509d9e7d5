//! Model records and the on-disk engine configuration they reference.
//!
//! A [`ModelRecord`] is the durable row the registry owns. The engine-side
//! `config.json` next to the weights is parsed into [`DiskModelConfig`];
//! the admin-editable tuning blob stored on the record is [`ModelTuning`].

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// Safetensors / HF checkout servable by the local engine.
    Torch,
    /// Anything else (GGUF, ONNX, ...). Not locally servable.
    Other,
}

/// A model known to the gateway — local weights on disk or a remote
/// provider-backed model (`external_provider_id` set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: u64,
    /// Unique display name, also used for parameter-count heuristics.
    pub name: String,
    /// Directory (HF checkout) or single file on disk.
    pub model_path: PathBuf,
    pub model_format: ModelFormat,
    #[serde(default = "d_context_window")]
    pub context_window: u32,
    /// At most one non-embedding model is active at a time.
    #[serde(default)]
    pub is_active: bool,
    /// At most one model is the default.
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_embedding_model: bool,
    /// Non-null marks this as a remote model served by that provider.
    #[serde(default)]
    pub external_provider_id: Option<u64>,
    #[serde(default = "d_tensor_parallel")]
    pub tensor_parallel_size: u32,
    /// Admin-editable tuning overrides, merged over the on-disk config.
    #[serde(default)]
    pub config: ModelTuning,
}

impl ModelRecord {
    pub fn is_local(&self) -> bool {
        self.external_provider_id.is_none()
    }
}

fn d_context_window() -> u32 {
    4096
}
fn d_tensor_parallel() -> u32 {
    1
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tuning blob (database side)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opaque merged tuning blob carried on the model record. Every field is
/// optional — absent means "defer to on-disk config / family defaults".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTuning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_gpu_layers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_batch: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_ctx: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_seqs: Option<u32>,
    /// Requested precision (`int4`, `int8`, `fp16`, `bf16`, ...). User intent;
    /// the launch planner may refuse and fall back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_precision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_remote_code: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_memory_utilization: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_batched_tokens: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// On-disk config.json (engine side)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Subset of a HF `config.json` the estimator and launch planner read.
/// Unknown fields are ignored on deserialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_hidden_layers: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torch_dtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_position_embeddings: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_local_experts: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_experts_per_tok: Option<u64>,
    /// Explicit parameter counts some exporters write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_parameters: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_params: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_params: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization_config: Option<QuantizationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_config: Option<VisionConfig>,
}

impl DiskModelConfig {
    /// First explicit parameter count, if any exporter wrote one.
    pub fn explicit_param_count(&self) -> Option<u64> {
        self.num_parameters.or(self.n_params).or(self.total_params)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quant_method: Option<String>,
}

/// Vision tower section of a multimodal `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_hidden_layers: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_size: Option<u64>,
}

impl VisionConfig {
    /// True when every field needed by the analytic estimate is present.
    pub fn is_complete(&self) -> bool {
        self.hidden_size.is_some()
            && self.num_hidden_layers.is_some()
            && self.intermediate_size.is_some()
            && self.image_size.is_some()
            && self.patch_size.is_some()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-model configuration snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Snapshot written to `<data>/models/config/<model_dir>.json` whenever a
/// model's tuning changes. Field names match the wire format the UI reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    #[serde(flatten)]
    pub tuning: ModelTuning,
    #[serde(default)]
    pub gpu_assignment: Option<String>,
    pub model_info: SnapshotModelInfo,
    #[serde(rename = "_meta")]
    pub meta: SnapshotMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotModelInfo {
    pub file_name: String,
    pub file_size_bytes: u64,
    #[serde(rename = "fileSizeGB")]
    pub file_size_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub model_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_record_defaults() {
        let json = r#"{
            "id": 1,
            "name": "Llama-3-8B",
            "model_path": "/data/models/llama3-8b",
            "model_format": "torch"
        }"#;
        let rec: ModelRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.context_window, 4096);
        assert_eq!(rec.tensor_parallel_size, 1);
        assert!(!rec.is_active);
        assert!(rec.is_local());
        assert_eq!(rec.config, ModelTuning::default());
    }

    #[test]
    fn disk_config_ignores_unknown_fields() {
        let json = r#"{
            "hidden_size": 4096,
            "num_hidden_layers": 32,
            "torch_dtype": "bfloat16",
            "architectures": ["LlamaForCausalLM"],
            "rope_theta": 500000.0
        }"#;
        let cfg: DiskModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.hidden_size, Some(4096));
        assert_eq!(cfg.num_hidden_layers, Some(32));
        assert_eq!(cfg.torch_dtype.as_deref(), Some("bfloat16"));
        assert!(cfg.quantization_config.is_none());
    }

    #[test]
    fn explicit_param_count_priority() {
        let cfg = DiskModelConfig {
            n_params: Some(8_000_000_000),
            total_params: Some(9_000_000_000),
            ..Default::default()
        };
        assert_eq!(cfg.explicit_param_count(), Some(8_000_000_000));
    }

    #[test]
    fn vision_config_completeness() {
        let mut v = VisionConfig {
            hidden_size: Some(1024),
            num_hidden_layers: Some(24),
            intermediate_size: Some(4096),
            image_size: Some(336),
            patch_size: Some(14),
        };
        assert!(v.is_complete());
        v.patch_size = None;
        assert!(!v.is_complete());
    }

    #[test]
    fn snapshot_wire_format() {
        let snap = ConfigSnapshot {
            tuning: ModelTuning {
                max_num_seqs: Some(64),
                ..Default::default()
            },
            gpu_assignment: None,
            model_info: SnapshotModelInfo {
                file_name: "model.safetensors".into(),
                file_size_bytes: 16_000_000_000,
                file_size_gb: 14.9,
            },
            meta: SnapshotMeta {
                model_path: "/data/models/llama3-8b".into(),
                timestamp: Utc::now(),
            },
        };
        let v = serde_json::to_value(&snap).unwrap();
        assert!(v.get("modelInfo").is_some());
        assert!(v.get("_meta").is_some());
        assert_eq!(v["modelInfo"]["fileSizeGB"], serde_json::json!(14.9));
    }
}
