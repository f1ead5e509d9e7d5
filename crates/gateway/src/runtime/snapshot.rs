//! Per-model configuration snapshots.
//!
//! Every tuning edit is mirrored to `<data>/models/config/<model_dir>.json`
//! so the effective settings survive registry rebuilds and can be inspected
//! next to the weights.

use std::path::PathBuf;

use chrono::Utc;

use mg_domain::config::PathsConfig;
use mg_domain::error::{Error, Result};
use mg_domain::model::{ConfigSnapshot, ModelRecord, SnapshotMeta, SnapshotModelInfo};

const BYTES_PER_GB: f64 = 1_073_741_824.0;

/// Write the snapshot for `model`, returning the file path.
pub fn write_config_snapshot(paths: &PathsConfig, model: &ModelRecord) -> Result<PathBuf> {
    let dir_name = model
        .model_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Internal(format!("unusable model path for {}", model.name)))?;

    let (file_name, file_size_bytes) = primary_weights_file(model);
    let file_size_gb = round2(file_size_bytes as f64 / BYTES_PER_GB);

    let snapshot = ConfigSnapshot {
        tuning: model.config.clone(),
        gpu_assignment: None,
        model_info: SnapshotModelInfo {
            file_name,
            file_size_bytes,
            file_size_gb,
        },
        meta: SnapshotMeta {
            model_path: model.model_path.clone(),
            timestamp: Utc::now(),
        },
    };

    let dir = paths.model_config_dir();
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{dir_name}.json"));
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(&snapshot)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}

/// Largest checkpoint file under the model path (or the file itself).
fn primary_weights_file(model: &ModelRecord) -> (String, u64) {
    if model.model_path.is_file() {
        let name = model
            .model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = std::fs::metadata(&model.model_path)
            .map(|m| m.len())
            .unwrap_or(0);
        return (name, size);
    }

    let mut best: (String, u64) = (String::new(), 0);
    if let Ok(entries) = std::fs::read_dir(&model.model_path) {
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !matches!(ext, "safetensors" | "bin" | "pt") {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if meta.len() >= best.1 {
                    best = (
                        path.file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        meta.len(),
                    );
                }
            }
        }
    }
    best
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_domain::model::{ModelFormat, ModelTuning};

    #[test]
    fn snapshot_written_with_meta() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            data_dir: dir.path().to_owned(),
        };
        let model_dir = dir.path().join("models").join("llama3-8b");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("model.safetensors"), vec![0u8; 2048]).unwrap();

        let model = ModelRecord {
            id: 1,
            name: "Llama-3-8B".into(),
            model_path: model_dir,
            model_format: ModelFormat::Torch,
            context_window: 8192,
            is_active: false,
            is_default: false,
            is_embedding_model: false,
            external_provider_id: None,
            tensor_parallel_size: 1,
            config: ModelTuning {
                max_num_seqs: Some(64),
                ..Default::default()
            },
        };

        let path = write_config_snapshot(&paths, &model).unwrap();
        assert_eq!(
            path,
            dir.path().join("models").join("config").join("llama3-8b.json")
        );

        let raw = std::fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["max_num_seqs"], 64);
        assert_eq!(v["modelInfo"]["fileName"], "model.safetensors");
        assert_eq!(v["modelInfo"]["fileSizeBytes"], 2048);
        assert!(v["_meta"]["modelPath"].as_str().unwrap().ends_with("llama3-8b"));
        assert!(v["_meta"]["timestamp"].is_string());
    }

    #[test]
    fn rewrite_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            data_dir: dir.path().to_owned(),
        };
        let model_dir = dir.path().join("models").join("m");
        std::fs::create_dir_all(&model_dir).unwrap();

        let mut model = ModelRecord {
            id: 1,
            name: "m".into(),
            model_path: model_dir,
            model_format: ModelFormat::Torch,
            context_window: 4096,
            is_active: false,
            is_default: false,
            is_embedding_model: false,
            external_provider_id: None,
            tensor_parallel_size: 1,
            config: ModelTuning::default(),
        };
        write_config_snapshot(&paths, &model).unwrap();

        model.config.n_batch = Some(512);
        let path = write_config_snapshot(&paths, &model).unwrap();
        let v: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(v["n_batch"], 512);
    }
}
