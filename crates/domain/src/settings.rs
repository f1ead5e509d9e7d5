//! System settings — a string key/value map with typed accessors.
//!
//! The recognized keys are constants so callers never scatter literals.
//! Unknown keys round-trip untouched (the UI stores a few of its own).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const GLOBAL_PRIVACY_MODE: &str = "global_privacy_mode";
pub const AIR_GAPPED_MODE: &str = "air_gapped_mode";
pub const PREFERRED_LOCAL_EMBEDDING_MODEL_ID: &str = "preferred_local_embedding_model_id";
pub const ACTIVE_FILTER_LANGUAGES: &str = "active_filter_languages";
pub const ARCHIVE_DELETED_CHATS_FOR_REFINEMENT: &str = "archive_deleted_chats_for_refinement";
pub const SCALYTICS_API_ENABLED: &str = "scalytics_api_enabled";
pub const SCALYTICS_API_RATE_LIMIT_WINDOW_MS: &str = "scalytics_api_rate_limit_window_ms";
pub const SCALYTICS_API_RATE_LIMIT_MAX: &str = "scalytics_api_rate_limit_max";

/// String-typed settings map, persisted alongside the record tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSettings {
    #[serde(flatten)]
    values: HashMap<String, String>,
}

impl SystemSettings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_owned(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    /// `"true"` → true; anything else (including absent) → false.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).map(|v| v == "true").unwrap_or(false)
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set(key, if value { "true" } else { "false" });
    }

    /// Parse an integer setting; unparsable values read as absent.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn privacy_mode(&self) -> bool {
        self.get_bool(GLOBAL_PRIVACY_MODE)
    }

    pub fn air_gapped(&self) -> bool {
        self.get_bool(AIR_GAPPED_MODE)
    }

    pub fn preferred_embedding_model_id(&self) -> Option<u64> {
        self.get_u64(PREFERRED_LOCAL_EMBEDDING_MODEL_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_roundtrip() {
        let mut s = SystemSettings::default();
        assert!(!s.air_gapped());
        s.set_bool(AIR_GAPPED_MODE, true);
        assert!(s.air_gapped());
        s.set_bool(AIR_GAPPED_MODE, false);
        assert!(!s.air_gapped());
        assert_eq!(s.get(AIR_GAPPED_MODE), Some("false"));
    }

    #[test]
    fn non_true_strings_read_false() {
        let mut s = SystemSettings::default();
        s.set(GLOBAL_PRIVACY_MODE, "TRUE");
        assert!(!s.privacy_mode());
        s.set(GLOBAL_PRIVACY_MODE, "1");
        assert!(!s.privacy_mode());
    }

    #[test]
    fn integer_settings() {
        let mut s = SystemSettings::default();
        assert_eq!(s.preferred_embedding_model_id(), None);
        s.set(PREFERRED_LOCAL_EMBEDDING_MODEL_ID, "12");
        assert_eq!(s.preferred_embedding_model_id(), Some(12));
        s.set(PREFERRED_LOCAL_EMBEDDING_MODEL_ID, "not-a-number");
        assert_eq!(s.preferred_embedding_model_id(), None);
    }

    #[test]
    fn unknown_keys_roundtrip_through_serde() {
        let mut s = SystemSettings::default();
        s.set("ui_theme", "dark");
        let json = serde_json::to_string(&s).unwrap();
        let back: SystemSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get("ui_theme"), Some("dark"));
    }
}
