use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{Confidence, TierPolicy};

/// Top-level pyshift configuration, matching `.pyshift/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PyshiftConfig {
    pub engine: EngineSection,
    pub analysis: AnalysisSection,
    pub oracle: OracleSection,
    pub knowledge: KnowledgeSection,
}

impl PyshiftConfig {
    /// Load from `.pyshift/config.toml` under the project root, falling
    /// back to defaults when the file does not exist.
    pub fn load(project_root: &std::path::Path) -> Result<Self, ConfigError> {
        let path = project_root.join(".pyshift").join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::NotFound(format!("{}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Worker pool size for file-parallel stages; 0 = available cores.
    pub workers: usize,
    /// Files larger than this are reported as skipped.
    pub max_file_bytes: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            workers: 0,
            max_file_bytes: 1_048_576,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    pub tier_policy: TierPolicy,
    /// Rules below this confidence are skipped.
    pub confidence_floor: Confidence,
    /// Extra exclude globs on top of the built-in defaults.
    pub exclude: Vec<String>,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            tier_policy: TierPolicy::UpToTier2,
            confidence_floor: Confidence::Medium,
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSection {
    pub provider: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Base URL override (for custom providers).
    pub base_url: Option<String>,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Max concurrent oracle calls.
    pub max_concurrent: u32,
    /// Whether oracle-backed tiers are enabled at all.
    pub enabled: bool,
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: None,
            timeout_secs: 60,
            max_concurrent: 4,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeSection {
    /// Spec cache TTL in days; entries older than this are refetched.
    pub cache_ttl_days: u32,
    /// Max changelog documents to fetch per acquisition.
    pub max_documents: u32,
}

impl Default for KnowledgeSection {
    fn default() -> Self {
        Self {
            cache_ttl_days: 180,
            max_documents: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = PyshiftConfig::default();
        assert_eq!(config.engine.workers, 0);
        assert_eq!(config.engine.max_file_bytes, 1_048_576);
        assert_eq!(config.analysis.tier_policy, TierPolicy::UpToTier2);
        assert_eq!(config.analysis.confidence_floor, Confidence::Medium);
        assert_eq!(config.oracle.timeout_secs, 60);
        assert_eq!(config.knowledge.cache_ttl_days, 180);
        assert!(config.oracle.enabled);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
[analysis]
tier_policy = "all"
exclude = ["migrations/**"]

[oracle]
timeout_secs = 30
"#;
        let config: PyshiftConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.analysis.tier_policy, TierPolicy::All);
        assert_eq!(config.analysis.exclude, vec!["migrations/**".to_string()]);
        assert_eq!(config.oracle.timeout_secs, 30);
        // Unspecified fields get defaults
        assert_eq!(config.oracle.max_concurrent, 4);
        assert_eq!(config.analysis.confidence_floor, Confidence::Medium);
    }

    #[test]
    fn confidence_floor_from_toml() {
        let toml_str = r#"
[analysis]
confidence_floor = "low"
"#;
        let config: PyshiftConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.analysis.confidence_floor, Confidence::Low);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let tmp = std::env::temp_dir();
        let config = PyshiftConfig::load(&tmp.join("pyshift-definitely-missing")).unwrap();
        assert_eq!(config.oracle.provider, "anthropic");
    }
}
