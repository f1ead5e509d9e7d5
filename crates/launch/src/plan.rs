//! Launch plan assembly.
//!
//! The plan is the full argv handed to the engine wrapper script plus an
//! environment snapshot. Serializing and reloading a plan yields the same
//! argument list, so plans can be logged and replayed verbatim.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use mg_domain::config::EngineConfig;
use mg_domain::error::{Error, Result};
use mg_domain::model::{DiskModelConfig, ModelFormat, ModelRecord};

use crate::families::{family_for_path, FamilyDefaults};

/// Context lengths beyond this are refused on a single GPU.
const SINGLE_GPU_LEN_CAP: u32 = 32_768;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchPlan {
    /// Ordered argument list for the wrapper script.
    pub argv: Vec<String>,
    /// Environment applied on top of the parent process environment.
    pub env: BTreeMap<String, String>,
}

impl LaunchPlan {
    /// Value of a `--flag value` pair, if present.
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.argv
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.argv.get(i + 1))
            .map(String::as_str)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.argv.iter().any(|a| a == flag)
    }
}

pub struct PlanInput<'a> {
    pub model: &'a ModelRecord,
    pub disk: Option<&'a DiskModelConfig>,
    pub engine: &'a EngineConfig,
    /// Air-gapped mode: the engine must not touch the network.
    pub offline: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the launch plan for a local torch model.
pub fn build_plan(input: &PlanInput<'_>) -> Result<LaunchPlan> {
    let model = input.model;
    if model.model_format != ModelFormat::Torch {
        return Err(Error::UnsupportedFormat(model.name.clone()));
    }
    if !model.is_local() {
        return Err(Error::NotLocal(model.name.clone()));
    }

    let path = model.model_path.to_string_lossy();
    let family = family_for_path(&path);
    let tp = model.tensor_parallel_size.max(1);

    let max_model_len = effective_max_model_len(model, family, tp);
    let (dtype, quantization) = resolve_precision(model, input.disk, family);
    let batched = max_num_batched_tokens(model, family, max_model_len);

    let gpu_mem = model
        .config
        .gpu_memory_utilization
        .unwrap_or(family.gpu_memory_utilization);
    let max_num_seqs = model.config.max_num_seqs.unwrap_or(family.max_num_seqs);
    let trust_remote_code = model
        .config
        .trust_remote_code
        .unwrap_or(family.trust_remote_code);

    let mut argv: Vec<String> = Vec::new();
    let mut push = |flag: &str, value: Option<String>| {
        argv.push(flag.to_owned());
        if let Some(v) = value {
            argv.push(v);
        }
    };

    push("--model", Some(path.into_owned()));
    push("--port", Some(input.engine.port.to_string()));
    push("--tensor-parallel-size", Some(tp.to_string()));
    push("--served-model-name", Some(model.id.to_string()));
    push("--gpu-memory-utilization", Some(gpu_mem.to_string()));
    push("--block-size", Some("16".into()));
    push("--swap-space", Some("4".into()));
    push("--download-dir", Some(input.engine.download_dir.clone()));
    push("--max-num-batched-tokens", Some(batched.to_string()));
    push("--max-model-len", Some(max_model_len.to_string()));
    if let Some(q) = &quantization {
        push("--quantization", Some(q.clone()));
    }
    push("--dtype", Some(dtype));
    if trust_remote_code {
        push("--trust-remote-code", None);
    }
    if tp >= 4 {
        // Custom all-reduce misbehaves on larger topologies.
        push("--disable-custom-all-reduce", None);
    }
    push("--enable-prefix-caching", None);
    push("--max-num-seqs", Some(max_num_seqs.to_string()));
    push("--max-num-prefill-tokens", Some(batched.to_string()));

    let mut env = BTreeMap::new();
    env.insert("VLLM_NO_USAGE_STATS".to_owned(), "1".to_owned());
    if input.offline {
        env.insert("HF_HUB_OFFLINE".to_owned(), "1".to_owned());
        env.insert("TRANSFORMERS_OFFLINE".to_owned(), "1".to_owned());
    }

    Ok(LaunchPlan { argv, env })
}

/// min(family cap, requested context), hard-capped on a single GPU.
fn effective_max_model_len(model: &ModelRecord, family: &FamilyDefaults, tp: u32) -> u32 {
    let requested = model.config.n_ctx.unwrap_or(model.context_window);
    let mut len = requested.min(family.max_model_len_cap);
    if tp == 1 {
        len = len.min(SINGLE_GPU_LEN_CAP);
    }
    len
}

/// Returns `(dtype, quantization)`.
///
/// A quantized checkpoint wins outright: its method is passed through and
/// dtype drops to `auto`. Otherwise the admin's requested precision is
/// honored where the engine can actually apply it — on-the-fly int4/int8
/// is not supported for unquantized checkpoints, so those requests fall
/// back to the checkpoint dtype with a warning.
fn resolve_precision(
    model: &ModelRecord,
    disk: Option<&DiskModelConfig>,
    family: &FamilyDefaults,
) -> (String, Option<String>) {
    let disk_dtype = disk.and_then(|d| d.torch_dtype.clone());
    let disk_quant = disk
        .and_then(|d| d.quantization_config.as_ref())
        .and_then(|q| q.quant_method.clone())
        .filter(|m| m != "none");

    if let Some(method) = disk_quant {
        return ("auto".into(), Some(method));
    }

    let fallback_dtype = || disk_dtype.clone().unwrap_or_else(|| family.dtype.to_owned());
    let family_quant = family.quantization.map(str::to_owned);

    match model
        .config
        .model_precision
        .as_deref()
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("awq") | Some("gptq") => {
            let method = model.config.model_precision.clone().map(|p| p.to_lowercase());
            ("auto".into(), method)
        }
        Some(p) if p.contains("int4") || p.contains("int8") => {
            tracing::warn!(
                model = %model.name,
                requested = p,
                "on-the-fly quantization is not supported for unquantized \
                 checkpoints; falling back to the checkpoint dtype"
            );
            (fallback_dtype(), family_quant)
        }
        Some(p) if !p.is_empty() => (p.to_owned(), family_quant),
        _ => (fallback_dtype(), family_quant),
    }
}

/// Batched-token budget: family override first, then the context formula.
fn max_num_batched_tokens(model: &ModelRecord, family: &FamilyDefaults, ctx: u32) -> u32 {
    if let Some(explicit) = model.config.max_num_batched_tokens {
        return explicit;
    }
    if let Some(fam) = family.max_num_batched_tokens {
        return fam;
    }
    if ctx <= 8_192 {
        (ctx * 2).max(8_192)
    } else if ctx <= 32_768 {
        ctx
    } else {
        ctx.min(65_536)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use mg_domain::model::{ModelTuning, QuantizationConfig};

    fn engine() -> EngineConfig {
        EngineConfig::default()
    }

    fn torch_model(name: &str, path: &str, ctx: u32, tp: u32) -> ModelRecord {
        ModelRecord {
            id: 5,
            name: name.into(),
            model_path: path.into(),
            model_format: ModelFormat::Torch,
            context_window: ctx,
            is_active: false,
            is_default: false,
            is_embedding_model: false,
            external_provider_id: None,
            tensor_parallel_size: tp,
            config: ModelTuning::default(),
        }
    }

    fn plan_for(model: &ModelRecord, disk: Option<&DiskModelConfig>) -> LaunchPlan {
        let engine = engine();
        build_plan(&PlanInput {
            model,
            disk,
            engine: &engine,
            offline: false,
        })
        .unwrap()
    }

    #[test]
    fn llama3_8b_plan() {
        let model = torch_model("Llama-3-8B", "/data/models/llama3-8b", 16_384, 1);
        let disk = DiskModelConfig {
            hidden_size: Some(4096),
            num_hidden_layers: Some(32),
            torch_dtype: Some("bfloat16".into()),
            ..Default::default()
        };
        let plan = plan_for(&model, Some(&disk));

        assert_eq!(plan.arg_value("--model"), Some("/data/models/llama3-8b"));
        assert_eq!(plan.arg_value("--port"), Some("8003"));
        assert_eq!(plan.arg_value("--max-model-len"), Some("16384"));
        assert_eq!(plan.arg_value("--dtype"), Some("bfloat16"));
        assert_eq!(plan.arg_value("--gpu-memory-utilization"), Some("0.8"));
        assert!(plan.has_flag("--trust-remote-code"));
        assert_eq!(plan.arg_value("--max-num-batched-tokens"), Some("16384"));
        assert_eq!(plan.arg_value("--served-model-name"), Some("5"));
        assert_eq!(plan.arg_value("--block-size"), Some("16"));
        assert_eq!(plan.arg_value("--swap-space"), Some("4"));
        assert!(plan.has_flag("--enable-prefix-caching"));
        assert!(!plan.has_flag("--disable-custom-all-reduce"));
        assert!(!plan.has_flag("--quantization"));
    }

    #[test]
    fn single_gpu_context_capped() {
        // deepseek family cap is 65536, but one GPU caps at 32768.
        let model = torch_model("DeepSeek-R1", "/data/models/deepseek-r1", 65_536, 1);
        let plan = plan_for(&model, None);
        assert_eq!(plan.arg_value("--max-model-len"), Some("32768"));

        let model = torch_model("DeepSeek-R1", "/data/models/deepseek-r1", 65_536, 2);
        let plan = plan_for(&model, None);
        assert_eq!(plan.arg_value("--max-model-len"), Some("65536"));
    }

    #[test]
    fn batched_token_tiers() {
        let small = torch_model("m", "/data/models/x", 4_096, 1);
        assert_eq!(
            plan_for(&small, None).arg_value("--max-num-batched-tokens"),
            Some("8192")
        );

        let edge = torch_model("m", "/data/models/x", 8_192, 1);
        assert_eq!(
            plan_for(&edge, None).arg_value("--max-num-batched-tokens"),
            Some("16384")
        );

        let mid = torch_model("m", "/data/models/x", 20_000, 1);
        assert_eq!(
            plan_for(&mid, None).arg_value("--max-num-batched-tokens"),
            Some("20000")
        );

        // Above 32768 the budget tops out at 65536 (multi-GPU deepseek).
        let big = torch_model("m", "/data/models/deepseek-v3", 65_536, 2);
        assert_eq!(
            plan_for(&big, None).arg_value("--max-num-batched-tokens"),
            Some("65536")
        );
    }

    #[test]
    fn family_batched_override_wins_over_formula() {
        let model = torch_model("Phi-4", "/data/models/phi-4", 16_384, 1);
        assert_eq!(
            plan_for(&model, None).arg_value("--max-num-batched-tokens"),
            Some("8192")
        );
    }

    #[test]
    fn admin_overrides_beat_family() {
        let mut model = torch_model("Llama-3-8B", "/data/models/llama3-8b", 8_192, 1);
        model.config.max_num_seqs = Some(32);
        model.config.gpu_memory_utilization = Some(0.7);
        let plan = plan_for(&model, None);
        assert_eq!(plan.arg_value("--max-num-seqs"), Some("32"));
        assert_eq!(plan.arg_value("--gpu-memory-utilization"), Some("0.7"));
    }

    #[test]
    fn disk_quantization_wins_and_forces_auto_dtype() {
        let mut model = torch_model("model-awq", "/data/models/custom-awq", 8_192, 1);
        model.config.model_precision = Some("fp16".into());
        let disk = DiskModelConfig {
            torch_dtype: Some("float16".into()),
            quantization_config: Some(QuantizationConfig {
                quant_method: Some("awq".into()),
            }),
            ..Default::default()
        };
        let plan = plan_for(&model, Some(&disk));
        assert_eq!(plan.arg_value("--quantization"), Some("awq"));
        assert_eq!(plan.arg_value("--dtype"), Some("auto"));
    }

    #[test]
    fn int4_on_unquantized_falls_back_to_checkpoint_dtype() {
        let mut model = torch_model("Llama-3-8B", "/data/models/llama3-8b", 8_192, 1);
        model.config.model_precision = Some("int4".into());
        let disk = DiskModelConfig {
            torch_dtype: Some("bfloat16".into()),
            ..Default::default()
        };
        let plan = plan_for(&model, Some(&disk));
        assert_eq!(plan.arg_value("--dtype"), Some("bfloat16"));
        assert!(!plan.has_flag("--quantization"));
    }

    #[test]
    fn family_bitsandbytes_quantization_applies() {
        let model = torch_model("Mistral-Small", "/data/models/mistral3.1-small", 8_192, 1);
        let plan = plan_for(&model, None);
        assert_eq!(plan.arg_value("--quantization"), Some("bitsandbytes"));
        assert_eq!(plan.arg_value("--dtype"), Some("auto"));
    }

    #[test]
    fn tp4_disables_custom_all_reduce() {
        let model = torch_model("Llama-3-70B", "/data/models/llama3-70b", 8_192, 4);
        let plan = plan_for(&model, None);
        assert!(plan.has_flag("--disable-custom-all-reduce"));
        assert_eq!(plan.arg_value("--tensor-parallel-size"), Some("4"));
    }

    #[test]
    fn offline_mode_sets_hub_env() {
        let model = torch_model("Llama-3-8B", "/data/models/llama3-8b", 8_192, 1);
        let eng = engine();
        let plan = build_plan(&PlanInput {
            model: &model,
            disk: None,
            engine: &eng,
            offline: true,
        })
        .unwrap();
        assert_eq!(plan.env.get("HF_HUB_OFFLINE").map(String::as_str), Some("1"));
        assert_eq!(
            plan.env.get("TRANSFORMERS_OFFLINE").map(String::as_str),
            Some("1")
        );
    }

    #[test]
    fn non_torch_model_rejected() {
        let mut model = torch_model("gguf-thing", "/data/models/thing", 8_192, 1);
        model.model_format = ModelFormat::Other;
        let eng = engine();
        let err = build_plan(&PlanInput {
            model: &model,
            disk: None,
            engine: &eng,
            offline: false,
        })
        .unwrap_err();
        assert_eq!(err.code(), "unsupported_format");
    }

    #[test]
    fn remote_model_rejected() {
        let mut model = torch_model("remote", "/none", 8_192, 1);
        model.external_provider_id = Some(2);
        let eng = engine();
        let err = build_plan(&PlanInput {
            model: &model,
            disk: None,
            engine: &eng,
            offline: false,
        })
        .unwrap_err();
        assert_eq!(err.code(), "not_local");
    }

    #[test]
    fn plan_roundtrips_through_serde() {
        let model = torch_model("Llama-3-8B", "/data/models/llama3-8b", 16_384, 2);
        let plan = plan_for(&model, None);
        let json = serde_json::to_string(&plan).unwrap();
        let back: LaunchPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
        assert_eq!(back.argv, plan.argv);
    }
}
