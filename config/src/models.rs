//! Model definitions persisted as JSON under `~/.choraleia/models.json`.
//!
//! One entry per model: provider id, domain, task types, capability flags,
//! numeric limits, endpoint and credential, plus a free-form `extra` object
//! for provider-specific knobs.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::LoadError;

/// Capability flags advertised by a model entry.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelCapabilities {
    pub streaming: bool,
    pub reasoning: bool,
    pub function_call: bool,
    pub json_mode: bool,
    pub caching: bool,
}

/// Numeric limits for a model entry.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelLimits {
    pub max_tokens: u32,
    pub context_window: u32,
}

impl Default for ModelLimits {
    fn default() -> Self {
        ModelLimits {
            max_tokens: 4096,
            context_window: 128_000,
        }
    }
}

/// One model definition from `models.json`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LlmModelConfig {
    pub id: String,
    pub provider: String,
    /// Provider-side model identifier sent on the wire.
    pub model: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// `language`, `embedding`, ...
    #[serde(default = "default_domain")]
    pub domain: String,
    /// `chat`, `text_embedding`, ...
    #[serde(default)]
    pub task_types: Vec<String>,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
    #[serde(default)]
    pub limits: ModelLimits,
    /// Provider-specific extras, passed through untouched.
    #[serde(default)]
    pub extra: Value,
}

fn default_domain() -> String {
    "language".to_string()
}

/// Loads all model definitions. A missing file is an empty list.
pub fn load_models(path: impl AsRef<Path>) -> Result<Vec<LlmModelConfig>, LoadError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| LoadError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Finds a model by entry id, falling back to the wire model name.
pub fn find_model<'a>(models: &'a [LlmModelConfig], id: &str) -> Option<&'a LlmModelConfig> {
    models
        .iter()
        .find(|m| m.id == id)
        .or_else(|| models.iter().find(|m| m.model == id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"[
            {
                "id": "gpt-main",
                "provider": "openai",
                "model": "gpt-4o-mini",
                "name": "Main",
                "base_url": "https://api.openai.com/v1",
                "api_key": "sk-test",
                "domain": "language",
                "task_types": ["chat"],
                "capabilities": {"streaming": true, "function_call": true},
                "limits": {"max_tokens": 8192, "context_window": 128000},
                "extra": {"org": "acme"}
            }
        ]"#
    }

    #[test]
    fn load_models_parses_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(&path, sample_json()).unwrap();
        let models = load_models(&path).unwrap();
        assert_eq!(models.len(), 1);
        let m = &models[0];
        assert_eq!(m.id, "gpt-main");
        assert!(m.capabilities.streaming);
        assert!(!m.capabilities.reasoning);
        assert_eq!(m.limits.context_window, 128_000);
        assert_eq!(m.extra["org"], "acme");
    }

    #[test]
    fn missing_models_file_is_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let models = load_models(dir.path().join("models.json")).unwrap();
        assert!(models.is_empty());
    }

    #[test]
    fn find_model_matches_id_then_wire_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(&path, sample_json()).unwrap();
        let models = load_models(&path).unwrap();
        assert!(find_model(&models, "gpt-main").is_some());
        assert!(find_model(&models, "gpt-4o-mini").is_some());
        assert!(find_model(&models, "nope").is_none());
    }
}
