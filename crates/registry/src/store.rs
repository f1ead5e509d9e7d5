//! JSON-file-backed registry of models, providers, API keys, and settings.
//!
//! One `RwLock` guards all four tables so a transaction sees and mutates a
//! consistent snapshot. Persistence rewrites the whole document through a
//! tmp-file rename; readers either see the old state or the new one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use mg_domain::error::{Error, Result};
use mg_domain::model::ModelRecord;
use mg_domain::provider::{ApiKeyRecord, ProviderCategory, ProviderRecord};
use mg_domain::settings::SystemSettings;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tables
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The persisted document. `BTreeMap` keeps serialization stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub models: BTreeMap<u64, ModelRecord>,
    #[serde(default)]
    pub providers: BTreeMap<u64, ProviderRecord>,
    #[serde(default)]
    pub keys: BTreeMap<u64, ApiKeyRecord>,
    #[serde(default)]
    pub settings: SystemSettings,
    #[serde(default)]
    next_model_id: u64,
    #[serde(default)]
    next_provider_id: u64,
    #[serde(default)]
    next_key_id: u64,
}

impl Tables {
    /// Providers in any of the given categories.
    pub fn providers_in<'a>(
        &'a self,
        categories: &'a [ProviderCategory],
    ) -> impl Iterator<Item = &'a ProviderRecord> {
        self.providers
            .values()
            .filter(move |p| categories.contains(&p.category))
    }

    pub fn provider_ids_in(&self, categories: &[ProviderCategory]) -> Vec<u64> {
        self.providers_in(categories).map(|p| p.id).collect()
    }

    /// Locally-served (non-remote), non-embedding models currently active.
    pub fn active_local_model_ids(&self) -> Vec<u64> {
        self.models
            .values()
            .filter(|m| m.is_active && !m.is_embedding_model && m.is_local())
            .map(|m| m.id)
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Registry {
    path: PathBuf,
    inner: RwLock<Tables>,
}

impl Registry {
    /// Load the registry from `path`, or start empty if it doesn't exist.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tables = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw)?
        } else {
            Tables::default()
        };
        tracing::info!(
            models = tables.models.len(),
            providers = tables.providers.len(),
            path = %path.display(),
            "registry loaded"
        );
        Ok(Self {
            path: path.to_owned(),
            inner: RwLock::new(tables),
        })
    }

    /// In-memory registry for tests.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            inner: RwLock::new(Tables::default()),
        }
    }

    // ── Transactions ─────────────────────────────────────────────────

    /// Run `f` against a working copy of the tables. On `Ok` the copy
    /// replaces the live tables and is persisted; on `Err` nothing changes.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.write();
        let mut work = guard.clone();
        let out = f(&mut work)?;
        self.persist(&work)?;
        *guard = work;
        Ok(out)
    }

    /// Read-only snapshot access.
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        f(&self.inner.read())
    }

    fn persist(&self, tables: &Tables) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(()); // in-memory
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(tables)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    // ── Models ───────────────────────────────────────────────────────

    pub fn get_model(&self, id: u64) -> Option<ModelRecord> {
        self.inner.read().models.get(&id).cloned()
    }

    pub fn list_models(&self) -> Vec<ModelRecord> {
        self.inner.read().models.values().cloned().collect()
    }

    /// Insert a model, assigning the next id. Fails on duplicate names.
    pub fn insert_model(&self, mut model: ModelRecord) -> Result<u64> {
        self.transaction(|t| {
            if t.models.values().any(|m| m.name == model.name) {
                return Err(Error::InvalidRequest {
                    param: "name".into(),
                    message: format!("model '{}' already exists", model.name),
                });
            }
            t.next_model_id += 1;
            model.id = t.next_model_id;
            let id = model.id;
            t.models.insert(id, model);
            Ok(id)
        })
    }

    pub fn update_model(&self, id: u64, f: impl FnOnce(&mut ModelRecord)) -> Result<()> {
        self.transaction(|t| {
            let model = t
                .models
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("model {id}")))?;
            f(model);
            Ok(())
        })
    }

    /// Models are destroyed only after deactivation.
    pub fn delete_model(&self, id: u64) -> Result<()> {
        self.transaction(|t| {
            let model = t
                .models
                .get(&id)
                .ok_or_else(|| Error::NotFound(format!("model {id}")))?;
            if model.is_active {
                return Err(Error::PreconditionFailed(format!(
                    "model {id} is active; deactivate it first"
                )));
            }
            t.models.remove(&id);
            Ok(())
        })
    }

    /// The two-step activation commit: clear every non-embedding model,
    /// then set this one. One transaction — readers never see zero or two
    /// active models mid-flight.
    pub fn commit_activation(&self, model_id: u64) -> Result<()> {
        self.transaction(|t| {
            if !t.models.contains_key(&model_id) {
                return Err(Error::NotFound(format!("model {model_id}")));
            }
            for model in t.models.values_mut() {
                if !model.is_embedding_model {
                    model.is_active = false;
                }
            }
            if let Some(model) = t.models.get_mut(&model_id) {
                model.is_active = true;
            }
            Ok(())
        })
    }

    /// Clear `is_active` on one model. Used by deactivation and cleanup
    /// paths; missing ids are a no-op, not an error.
    pub fn clear_model_active(&self, model_id: u64) {
        let result = self.transaction(|t| {
            if let Some(model) = t.models.get_mut(&model_id) {
                model.is_active = false;
            }
            Ok(())
        });
        if let Err(e) = result {
            tracing::warn!(model_id, error = %e, "failed to clear active flag");
        }
    }

    // ── Providers ────────────────────────────────────────────────────

    pub fn get_provider(&self, id: u64) -> Option<ProviderRecord> {
        self.inner.read().providers.get(&id).cloned()
    }

    pub fn list_providers(&self) -> Vec<ProviderRecord> {
        self.inner.read().providers.values().cloned().collect()
    }

    pub fn insert_provider(&self, mut provider: ProviderRecord) -> Result<u64> {
        self.transaction(|t| {
            t.next_provider_id += 1;
            provider.id = t.next_provider_id;
            let id = provider.id;
            t.providers.insert(id, provider);
            Ok(id)
        })
    }

    // ── API keys ─────────────────────────────────────────────────────

    pub fn insert_key(&self, mut key: ApiKeyRecord) -> Result<u64> {
        self.transaction(|t| {
            if !t.providers.contains_key(&key.provider_id) {
                return Err(Error::NotFound(format!("provider {}", key.provider_id)));
            }
            t.next_key_id += 1;
            key.id = t.next_key_id;
            let id = key.id;
            t.keys.insert(id, key);
            Ok(id)
        })
    }

    pub fn list_keys(&self) -> Vec<ApiKeyRecord> {
        self.inner.read().keys.values().cloned().collect()
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub fn settings(&self) -> SystemSettings {
        self.inner.read().settings.clone()
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut SystemSettings)) -> Result<()> {
        self.transaction(|t| {
            f(&mut t.settings);
            Ok(())
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use mg_domain::model::{ModelFormat, ModelTuning};

    fn model(name: &str) -> ModelRecord {
        ModelRecord {
            id: 0,
            name: name.into(),
            model_path: format!("/data/models/{name}").into(),
            model_format: ModelFormat::Torch,
            context_window: 4096,
            is_active: false,
            is_default: false,
            is_embedding_model: false,
            external_provider_id: None,
            tensor_parallel_size: 1,
            config: ModelTuning::default(),
        }
    }

    #[test]
    fn insert_assigns_sequential_ids() {
        let reg = Registry::in_memory();
        let a = reg.insert_model(model("a")).unwrap();
        let b = reg.insert_model(model("b")).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn duplicate_name_rejected() {
        let reg = Registry::in_memory();
        reg.insert_model(model("a")).unwrap();
        let err = reg.insert_model(model("a")).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn commit_activation_is_exclusive() {
        let reg = Registry::in_memory();
        let a = reg.insert_model(model("a")).unwrap();
        let b = reg.insert_model(model("b")).unwrap();
        let mut embed = model("embedder");
        embed.is_embedding_model = true;
        embed.is_active = true;
        let e = reg.insert_model(embed).unwrap();

        reg.commit_activation(a).unwrap();
        assert_eq!(reg.read(|t| t.active_local_model_ids()), vec![a]);

        reg.commit_activation(b).unwrap();
        assert_eq!(reg.read(|t| t.active_local_model_ids()), vec![b]);
        // Embedding models are untouched by the exclusivity sweep.
        assert!(reg.get_model(e).unwrap().is_active);
    }

    #[test]
    fn failed_transaction_commits_nothing() {
        let reg = Registry::in_memory();
        let id = reg.insert_model(model("a")).unwrap();
        let result: Result<()> = reg.transaction(|t| {
            t.models.get_mut(&id).unwrap().is_active = true;
            Err(Error::Internal("abort".into()))
        });
        assert!(result.is_err());
        assert!(!reg.get_model(id).unwrap().is_active);
    }

    #[test]
    fn delete_active_model_refused() {
        let reg = Registry::in_memory();
        let id = reg.insert_model(model("a")).unwrap();
        reg.commit_activation(id).unwrap();
        let err = reg.delete_model(id).unwrap_err();
        assert_eq!(err.code(), "precondition_failed");
        reg.clear_model_active(id);
        reg.delete_model(id).unwrap();
        assert!(reg.get_model(id).is_none());
    }

    #[test]
    fn clear_active_missing_id_is_noop() {
        let reg = Registry::in_memory();
        reg.clear_model_active(999); // must not panic or error
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        {
            let reg = Registry::open(&path).unwrap();
            let id = reg.insert_model(model("survivor")).unwrap();
            reg.commit_activation(id).unwrap();
            reg.update_settings(|s| s.set_bool(mg_domain::settings::AIR_GAPPED_MODE, true))
                .unwrap();
        }

        let reg = Registry::open(&path).unwrap();
        let models = reg.list_models();
        assert_eq!(models.len(), 1);
        assert!(models[0].is_active);
        assert!(reg.settings().air_gapped());
        // Id allocation continues after reload.
        let next = reg.insert_model(model("later")).unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn key_requires_existing_provider() {
        let reg = Registry::in_memory();
        let err = reg
            .insert_key(ApiKeyRecord {
                id: 0,
                owner: mg_domain::provider::KeyOwner::Global,
                provider_id: 42,
                is_active: true,
                secret: vec![],
            })
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
