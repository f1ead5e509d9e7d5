//! Hardware-aware VRAM estimation.
//!
//! Pure pipeline from model metadata + on-disk config + file size to an
//! estimated VRAM requirement in GiB. Used advisorily before activation —
//! the engine is the final arbiter of whether a model actually fits.
//!
//! Priority for the parameter count: explicit counts in `config.json`,
//! then name/path heuristics, then file-size division. Missing KV-cache
//! inputs zero that term out rather than extrapolating.

use std::sync::OnceLock;

use regex::Regex;

use mg_domain::model::{DiskModelConfig, ModelRecord, VisionConfig};

const GIB: f64 = 1_073_741_824.0;

/// Common published model sizes, in billions, largest first so a `70B`
/// name never matches on a smaller embedded digit.
const STANDARD_SIZES_B: [u64; 13] = [70, 34, 27, 22, 17, 13, 12, 11, 9, 8, 7, 3, 1];

/// Default number of routed experts per token when the config is silent.
const DEFAULT_EXPERTS_PER_TOK: u64 = 2;

/// Fallback estimate for a vision tower whose config is incomplete.
const VISION_FALLBACK_GIB: f64 = 4.0;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Estimate the VRAM requirement of `model` in GiB.
///
/// Returns `None` for remote and embedding models, and whenever the
/// parameter count cannot be determined from any source.
pub fn estimate(
    model: &ModelRecord,
    disk: Option<&DiskModelConfig>,
    file_size_bytes: Option<u64>,
) -> Option<f64> {
    if !model.is_local() || model.is_embedding_model {
        return None;
    }

    let precision = resolve_precision(model, disk);
    let total_b = total_params_billions(model, disk, file_size_bytes, precision.as_deref())?;

    // MoE: only a subset of parameters is active per token.
    let experts = disk
        .and_then(|d| d.num_local_experts)
        .filter(|&e| e > 1);
    let active_b = match experts {
        Some(e) => {
            let per_tok = disk
                .and_then(|d| d.num_experts_per_tok)
                .unwrap_or(DEFAULT_EXPERTS_PER_TOK);
            (total_b / e as f64) * per_tok as f64
        }
        None => total_b,
    };

    let bpp = bytes_per_param(precision.as_deref());

    // MoE weights stay resident in full; the 0.7 factor accounts for the
    // routing tables and shared layers not duplicated per expert.
    let mut weights_gib = match experts {
        Some(_) => total_b * bpp * 0.7,
        None => active_b * bpp,
    };

    let kv_gib = kv_cache_gib(disk, model.context_window);
    let vision_gib = vision_tower_gib(disk, bpp);

    let mut overhead_gib = framework_overhead_gib(active_b);
    if let Some(e) = experts {
        overhead_gib += (e as f64 * 0.05).min(1.0);
    }

    // Tensor parallelism shards weights and runtime overhead across GPUs.
    // The KV cache is allocated per GPU and is not divided here.
    let tp = model.tensor_parallel_size;
    if tp > 1 {
        weights_gib /= tp as f64;
        overhead_gib /= tp as f64;
    }

    let total = weights_gib + kv_gib + vision_gib + overhead_gib;
    Some(round1(total).max(1.0))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parameter count
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn total_params_billions(
    model: &ModelRecord,
    disk: Option<&DiskModelConfig>,
    file_size_bytes: Option<u64>,
    precision: Option<&str>,
) -> Option<f64> {
    // 1. Explicit counts written by the exporter.
    if let Some(raw) = disk.and_then(|d| d.explicit_param_count()) {
        let raw = raw as f64;
        return Some(if raw > 1e6 { raw / 1e9 } else { raw });
    }

    // 2. Name / path heuristics.
    let haystack = format!("{} {}", model.name, model.model_path.display());
    if let Some(b) = params_from_name(&haystack) {
        return Some(b);
    }

    // 3. File-size fallback.
    let size = file_size_bytes?;
    let divisor = size_divisor(precision, &haystack);
    let b = (size as f64 / GIB) / divisor;
    if b > 0.0 {
        Some(b)
    } else {
        None
    }
}

fn params_from_name(haystack: &str) -> Option<f64> {
    static MOE_BE: OnceLock<Regex> = OnceLock::new();
    static MOE_XB: OnceLock<Regex> = OnceLock::new();
    static SIZE: OnceLock<Regex> = OnceLock::new();

    // "17B-16E": per-expert size times expert count.
    let be = MOE_BE.get_or_init(|| Regex::new(r"(?i)(\d+)B[_-](\d+)E").unwrap());
    if let Some(caps) = be.captures(haystack) {
        let per: f64 = caps[1].parse().ok()?;
        let experts: f64 = caps[2].parse().ok()?;
        return Some(per * experts);
    }

    // "8x7B": expert count times per-expert size.
    let xb = MOE_XB.get_or_init(|| Regex::new(r"(?i)(\d+)x(\d+)B").unwrap());
    if let Some(caps) = xb.captures(haystack) {
        let experts: f64 = caps[1].parse().ok()?;
        let per: f64 = caps[2].parse().ok()?;
        return Some(experts * per);
    }

    // Standard sizes: every "<digits>B" token, matched against the known
    // list so stray digits (revisions, context lengths) don't count.
    let size_re = SIZE.get_or_init(|| Regex::new(r"(?i)(\d+)\s*B\b").unwrap());
    let mentioned: Vec<u64> = size_re
        .captures_iter(haystack)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    STANDARD_SIZES_B
        .iter()
        .find(|s| mentioned.contains(s))
        .map(|&s| s as f64)
}

/// GiB of file per billion parameters, by quantization.
fn size_divisor(precision: Option<&str>, haystack: &str) -> f64 {
    let hint = format!(
        "{} {}",
        precision.unwrap_or_default().to_lowercase(),
        haystack.to_lowercase()
    );
    if hint.contains("int4") || hint.contains("awq") {
        0.55
    } else if hint.contains("int8") {
        1.1
    } else {
        2.2
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Precision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// User-requested precision wins over the checkpoint dtype.
fn resolve_precision(model: &ModelRecord, disk: Option<&DiskModelConfig>) -> Option<String> {
    model
        .config
        .model_precision
        .clone()
        .or_else(|| disk.and_then(|d| d.torch_dtype.clone()))
        .map(|p| p.to_lowercase())
}

fn bytes_per_param(precision: Option<&str>) -> f64 {
    match precision {
        Some(p) if p.contains("int4") || p.contains("awq") => 0.5,
        Some(p) if p.contains("int8") || p.contains("fp8") => 1.0,
        Some(p) if p.contains("fp16") || p.contains("bf16") || p.contains("bfloat16") => 2.0,
        _ => 2.0,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// KV cache, vision tower, overhead
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// KV cache size for the full context window, fp16 keys and values.
/// Without the transformer dimensions this is 0 — an explicit refusal to
/// extrapolate, not an estimate.
fn kv_cache_gib(disk: Option<&DiskModelConfig>, context_window: u32) -> f64 {
    let Some(d) = disk else { return 0.0 };
    let (Some(hidden), Some(layers)) = (d.hidden_size, d.num_hidden_layers) else {
        return 0.0;
    };
    2.0 * layers as f64 * hidden as f64 * context_window as f64 * 2.0 / GIB
}

fn vision_tower_gib(disk: Option<&DiskModelConfig>, bpp: f64) -> f64 {
    let Some(v) = disk.and_then(|d| d.vision_config.as_ref()) else {
        return 0.0;
    };
    if !v.is_complete() {
        return VISION_FALLBACK_GIB;
    }
    vision_params(v) * bpp / GIB
}

/// Analytic parameter count of a ViT-style tower.
fn vision_params(v: &VisionConfig) -> f64 {
    // is_complete() was checked by the caller.
    let hidden = v.hidden_size.unwrap_or(0) as f64;
    let layers = v.num_hidden_layers.unwrap_or(0) as f64;
    let inter = v.intermediate_size.unwrap_or(0) as f64;
    let image = v.image_size.unwrap_or(0) as f64;
    let patch = v.patch_size.unwrap_or(1) as f64;

    let num_patches = (image / patch) * (image / patch);
    layers * (4.0 * hidden * hidden + 2.0 * hidden * inter)
        + (num_patches + 1.0) * hidden
        + patch * patch * 3.0 * hidden
}

/// CUDA context, allocator slack, and engine bookkeeping, tiered by the
/// active parameter count.
fn framework_overhead_gib(active_b: f64) -> f64 {
    if active_b >= 30.0 {
        2.0
    } else if active_b >= 13.0 {
        1.5
    } else if active_b >= 7.0 {
        1.0
    } else {
        0.5
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use mg_domain::model::{ModelFormat, ModelTuning};

    fn local_model(name: &str, ctx: u32, tp: u32) -> ModelRecord {
        ModelRecord {
            id: 1,
            name: name.into(),
            model_path: format!("/data/models/{}", name.to_lowercase()).into(),
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

    fn llama8b_disk() -> DiskModelConfig {
        DiskModelConfig {
            hidden_size: Some(4096),
            num_hidden_layers: Some(32),
            torch_dtype: Some("bfloat16".into()),
            ..Default::default()
        }
    }

    #[test]
    fn llama3_8b_bf16_ctx8192_single_gpu() {
        // 8B * 2 bytes = 16 GiB weights
        // KV: 2 * 32 * 4096 * 8192 * 2 / 2^30 = 4.0 GiB
        // overhead: 1.0 GiB (>= 7B tier)
        let model = local_model("Llama-3-8B", 8192, 1);
        let est = estimate(&model, Some(&llama8b_disk()), None).unwrap();
        assert_eq!(est, 21.0);
    }

    #[test]
    fn estimate_is_deterministic() {
        let model = local_model("Llama-3-8B", 8192, 1);
        let disk = llama8b_disk();
        let a = estimate(&model, Some(&disk), Some(16_000_000_000));
        let b = estimate(&model, Some(&disk), Some(16_000_000_000));
        assert_eq!(a, b);
    }

    #[test]
    fn external_model_returns_none() {
        let mut model = local_model("gpt-4o", 8192, 1);
        model.external_provider_id = Some(3);
        assert_eq!(estimate(&model, None, None), None);
    }

    #[test]
    fn embedding_model_returns_none() {
        let mut model = local_model("bge-large-7B", 512, 1);
        model.is_embedding_model = true;
        assert_eq!(estimate(&model, None, None), None);
    }

    #[test]
    fn unknown_params_returns_none() {
        // No size token in the name, no config, no file size.
        let model = local_model("mystery-model", 4096, 1);
        assert_eq!(estimate(&model, None, None), None);
    }

    #[test]
    fn explicit_param_count_beats_name() {
        // Name says 70B, config says 8B — config wins.
        let disk = DiskModelConfig {
            num_parameters: Some(8_000_000_000),
            ..Default::default()
        };
        let model = local_model("NotReally-70B", 4096, 1);
        let est = estimate(&model, Some(&disk), None).unwrap();
        // 8 * 2 + 0 (no KV dims) + 1.0 overhead
        assert_eq!(est, 17.0);
    }

    #[test]
    fn small_explicit_count_read_as_billions() {
        let disk = DiskModelConfig {
            total_params: Some(7),
            ..Default::default()
        };
        let model = local_model("x", 4096, 1);
        let est = estimate(&model, Some(&disk), None).unwrap();
        assert_eq!(est, 15.0); // 7*2 + 1.0
    }

    #[test]
    fn moe_name_patterns() {
        assert_eq!(params_from_name("Mixtral-8x7B-Instruct"), Some(56.0));
        assert_eq!(params_from_name("Scout-17B-16E"), Some(272.0));
        assert_eq!(params_from_name("llama-3-70b-instruct"), Some(70.0));
        assert_eq!(params_from_name("no size here"), None);
    }

    #[test]
    fn standard_size_not_fooled_by_odd_numbers() {
        // 45B is not a standard size; nothing should match.
        assert_eq!(params_from_name("weird-45B"), None);
    }

    #[test]
    fn file_size_fallback_fp16() {
        // 16.5 GiB file at 2.2 GiB/B -> 7.5B params
        let size = (16.5 * GIB) as u64;
        let model = local_model("custom-model", 4096, 1);
        let est = estimate(&model, None, Some(size)).unwrap();
        // 7.5 * 2 = 15 weights + 1.0 overhead (>=7B), no KV
        assert_eq!(est, 16.0);
    }

    #[test]
    fn file_size_fallback_awq() {
        // AWQ checkpoint: divisor 0.55, bytes/param 0.5
        let size = (0.55 * 8.0 * GIB) as u64; // 8B worth of int4 weights
        let mut model = local_model("model-awq", 4096, 1);
        model.config.model_precision = Some("awq".into());
        let est = estimate(&model, None, Some(size)).unwrap();
        // ~8 * 0.5 = 4 weights + 1.0 overhead
        assert_eq!(est, 5.0);
    }

    #[test]
    fn moe_active_params_and_overhead() {
        // 8x7B with 8 experts, 2 per token:
        //   total 56B, active (56/8)*2 = 14B
        //   weights 56 * 2 * 0.7 = 78.4
        //   overhead 1.5 (active in [13,30)) + min(1, 8*0.05)=0.4 -> 1.9
        let disk = DiskModelConfig {
            num_local_experts: Some(8),
            num_experts_per_tok: Some(2),
            torch_dtype: Some("bfloat16".into()),
            ..Default::default()
        };
        let model = local_model("Mixtral-8x7B", 4096, 1);
        let est = estimate(&model, Some(&disk), None).unwrap();
        assert_eq!(est, round1(78.4 + 1.9));
    }

    #[test]
    fn tensor_parallel_shards_weights_not_kv() {
        let model_1gpu = local_model("Llama-3-8B", 8192, 1);
        let model_2gpu = local_model("Llama-3-8B", 8192, 2);
        let disk = llama8b_disk();
        let one = estimate(&model_1gpu, Some(&disk), None).unwrap();
        let two = estimate(&model_2gpu, Some(&disk), None).unwrap();
        // (16 + 1)/2 + 4.0 = 12.5 vs 21.0
        assert_eq!(one, 21.0);
        assert_eq!(two, 12.5);
    }

    #[test]
    fn vision_config_complete() {
        let disk = DiskModelConfig {
            vision_config: Some(VisionConfig {
                hidden_size: Some(1024),
                num_hidden_layers: Some(24),
                intermediate_size: Some(4096),
                image_size: Some(336),
                patch_size: Some(14),
            }),
            torch_dtype: Some("bfloat16".into()),
            ..Default::default()
        };
        let model = local_model("llava-7B", 4096, 1);
        let with_vision = estimate(&model, Some(&disk), None).unwrap();
        let without = estimate(
            &model,
            Some(&DiskModelConfig {
                torch_dtype: Some("bfloat16".into()),
                ..Default::default()
            }),
            None,
        )
        .unwrap();
        assert!(with_vision > without);
    }

    #[test]
    fn vision_config_incomplete_uses_flat_fallback() {
        let disk = DiskModelConfig {
            vision_config: Some(VisionConfig {
                hidden_size: Some(1024),
                ..Default::default()
            }),
            ..Default::default()
        };
        let model = local_model("llava-7B", 4096, 1);
        let est = estimate(&model, Some(&disk), None).unwrap();
        // 7*2 + 4.0 fallback + 1.0 overhead
        assert_eq!(est, 19.0);
    }

    #[test]
    fn floor_at_one_gib() {
        let disk = DiskModelConfig {
            num_parameters: Some(100_000_000), // 0.1B
            ..Default::default()
        };
        let model = local_model("tiny", 2048, 1);
        let est = estimate(&model, Some(&disk), None).unwrap();
        assert_eq!(est, 1.0);
    }

    #[test]
    fn overhead_tiers() {
        assert_eq!(framework_overhead_gib(3.0), 0.5);
        assert_eq!(framework_overhead_gib(7.0), 1.0);
        assert_eq!(framework_overhead_gib(13.0), 1.5);
        assert_eq!(framework_overhead_gib(34.0), 2.0);
    }

    #[test]
    fn requested_precision_overrides_disk_dtype() {
        // int8 requested on a bf16 checkpoint: 1 byte/param.
        let mut model = local_model("Llama-3-8B", 8192, 1);
        model.config.model_precision = Some("int8".into());
        let est = estimate(&model, Some(&llama8b_disk()), None).unwrap();
        // 8*1 + 4.0 KV + 1.0 overhead
        assert_eq!(est, 13.0);
    }
}
