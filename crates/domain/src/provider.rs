//! Provider and API-key records.
//!
//! Providers group the outbound integrations the policy engine governs.
//! Keys are opaque here — encryption/decryption happens at the edges.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCategory {
    /// Remote LLM APIs. Disabled by privacy mode and air-gap.
    ExtLlm,
    /// Hugging Face (downloads, hub metadata). Disabled only by air-gap.
    Hf,
    /// Web search providers. Disabled only by air-gap.
    Search,
    /// Built-in, never policy-disabled.
    Internal,
}

impl ProviderCategory {
    /// Categories that reach the network and therefore fall under the
    /// air-gap rule.
    pub const OUTBOUND: [ProviderCategory; 3] = [
        ProviderCategory::ExtLlm,
        ProviderCategory::Hf,
        ProviderCategory::Search,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: u64,
    pub name: String,
    pub category: ProviderCategory,
    #[serde(default)]
    pub is_active: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// API keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOwner {
    User(u64),
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: u64,
    pub owner: KeyOwner,
    pub provider_id: u64,
    #[serde(default)]
    pub is_active: bool,
    /// Encrypted secret material. Never logged, never serialized to the UI.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret: Vec<u8>,
}

impl ApiKeyRecord {
    pub fn is_global(&self) -> bool {
        self.owner == KeyOwner::Global
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_wire_names() {
        assert_eq!(
            serde_json::to_string(&ProviderCategory::ExtLlm).unwrap(),
            "\"ext_llm\""
        );
        assert_eq!(
            serde_json::to_string(&ProviderCategory::Hf).unwrap(),
            "\"hf\""
        );
    }

    #[test]
    fn outbound_excludes_internal() {
        assert!(!ProviderCategory::OUTBOUND.contains(&ProviderCategory::Internal));
        assert_eq!(ProviderCategory::OUTBOUND.len(), 3);
    }

    #[test]
    fn global_key_predicate() {
        let key = ApiKeyRecord {
            id: 1,
            owner: KeyOwner::Global,
            provider_id: 7,
            is_active: true,
            secret: vec![],
        };
        assert!(key.is_global());

        let key = ApiKeyRecord {
            owner: KeyOwner::User(42),
            ..key
        };
        assert!(!key.is_global());
    }
}
