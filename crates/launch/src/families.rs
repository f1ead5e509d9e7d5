//! Per-family engine defaults.
//!
//! Matched against the model path, first hit wins. The order matters:
//! `mistral3.1` must be probed before `mistral`.

/// Engine defaults for one model family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FamilyDefaults {
    pub name: &'static str,
    /// Engine dtype when neither the checkpoint nor the admin says otherwise.
    pub dtype: &'static str,
    /// Load-time quantization, e.g. `bitsandbytes`.
    pub quantization: Option<&'static str>,
    pub gpu_memory_utilization: f64,
    /// Upper bound on the effective context length.
    pub max_model_len_cap: u32,
    pub max_num_seqs: u32,
    pub trust_remote_code: bool,
    /// Explicit batched-token budget; `None` means "use the context formula".
    pub max_num_batched_tokens: Option<u32>,
}

const MISTRAL31: FamilyDefaults = FamilyDefaults {
    name: "mistral3.1",
    dtype: "auto",
    quantization: Some("bitsandbytes"),
    gpu_memory_utilization: 0.85,
    max_model_len_cap: 32_768,
    max_num_seqs: 64,
    trust_remote_code: true,
    max_num_batched_tokens: None,
};

const MISTRAL: FamilyDefaults = FamilyDefaults {
    name: "mistral",
    dtype: "auto",
    quantization: None,
    gpu_memory_utilization: 0.85,
    max_model_len_cap: 32_768,
    max_num_seqs: 128,
    trust_remote_code: false,
    max_num_batched_tokens: None,
};

const LLAMA: FamilyDefaults = FamilyDefaults {
    name: "llama",
    dtype: "auto",
    quantization: None,
    gpu_memory_utilization: 0.8,
    max_model_len_cap: 32_768,
    max_num_seqs: 256,
    trust_remote_code: true,
    max_num_batched_tokens: None,
};

const GEMMA: FamilyDefaults = FamilyDefaults {
    name: "gemma",
    dtype: "bfloat16",
    quantization: None,
    gpu_memory_utilization: 0.85,
    max_model_len_cap: 8_192,
    max_num_seqs: 128,
    trust_remote_code: false,
    max_num_batched_tokens: None,
};

const DEEPSEEK: FamilyDefaults = FamilyDefaults {
    name: "deepseek",
    dtype: "auto",
    quantization: None,
    gpu_memory_utilization: 0.9,
    max_model_len_cap: 65_536,
    max_num_seqs: 128,
    trust_remote_code: true,
    max_num_batched_tokens: None,
};

const PHI: FamilyDefaults = FamilyDefaults {
    name: "phi",
    dtype: "auto",
    quantization: None,
    gpu_memory_utilization: 0.85,
    max_model_len_cap: 16_384,
    max_num_seqs: 128,
    trust_remote_code: true,
    max_num_batched_tokens: Some(8_192),
};

const DEFAULT: FamilyDefaults = FamilyDefaults {
    name: "default",
    dtype: "auto",
    quantization: None,
    gpu_memory_utilization: 0.85,
    max_model_len_cap: 32_768,
    max_num_seqs: 256,
    trust_remote_code: false,
    max_num_batched_tokens: None,
};

/// Probe order: most specific substrings first.
const PROBES: [(&str, &FamilyDefaults); 7] = [
    ("mistral3.1", &MISTRAL31),
    ("mistral", &MISTRAL),
    ("llama", &LLAMA),
    ("meta-llama", &LLAMA),
    ("gemma", &GEMMA),
    ("deepseek", &DEEPSEEK),
    ("phi", &PHI),
];

/// Select family defaults by path substring; falls back to `default`.
pub fn family_for_path(path: &str) -> &'static FamilyDefaults {
    let lower = path.to_lowercase();
    for (needle, family) in PROBES {
        if lower.contains(needle) {
            return family;
        }
    }
    &DEFAULT
}
