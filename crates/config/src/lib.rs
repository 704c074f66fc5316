//! Configuration loading, validation, and management for memtier.
//!
//! Loads configuration from `~/.memtier/config.toml` with environment
//! variable overrides. Validates all settings before the memory manager is
//! constructed.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.memtier/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Context budgeting, retention and summarization policy
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Deadlines for calls into external ports
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Durable storage backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Generation / embedding provider
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Memory policy consumed at manager construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Context budget used when the caller omits one
    #[serde(default = "default_token_budget")]
    pub token_budget_default: usize,

    /// Retention window of a ShortTerm entry
    #[serde(default = "default_short_term_ttl")]
    pub short_term_ttl_seconds: u64,

    /// Accesses needed for an expiring ShortTerm entry to be promoted
    #[serde(default = "default_promotion_threshold")]
    pub promotion_access_threshold: u32,

    /// Uncovered entry count that triggers automatic summarization
    #[serde(default = "default_summarization_trigger")]
    pub summarization_trigger_count: usize,

    /// Enable the automatic summarization trigger on `store`
    #[serde(default = "default_true")]
    pub auto_summarize: bool,

    /// Summarizer window length
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Items shared by consecutive windows
    #[serde(default = "default_overlap")]
    pub overlap: usize,

    /// Minimum similarity for LongTerm / Summary candidates
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f32,

    /// Priority multiplier for summaries over raw hits of equal similarity
    #[serde(default = "default_summary_boost")]
    pub summary_priority_boost: f32,

    /// Smallest truncated fragment worth including
    #[serde(default = "default_min_fragment")]
    pub min_fragment_tokens: usize,

    /// Most recent ShortTerm entries gathered per call
    #[serde(default = "default_short_term_candidates")]
    pub short_term_candidates: usize,

    /// LongTerm hits requested from the vector index per call
    #[serde(default = "default_long_term_top_k")]
    pub long_term_top_k: usize,

    /// Most recent summaries gathered per call
    #[serde(default = "default_summary_candidates")]
    pub summary_candidates: usize,

    /// Vector dimension for scopes without an explicit setting
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Heuristic token estimator ratio
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

fn default_token_budget() -> usize {
    4096
}
fn default_short_term_ttl() -> u64 {
    3600
}
fn default_promotion_threshold() -> u32 {
    3
}
fn default_summarization_trigger() -> usize {
    50
}
fn default_window_size() -> usize {
    8
}
fn default_overlap() -> usize {
    2
}
fn default_relevance_floor() -> f32 {
    0.2
}
fn default_summary_boost() -> f32 {
    1.2
}
fn default_min_fragment() -> usize {
    50
}
fn default_short_term_candidates() -> usize {
    20
}
fn default_long_term_top_k() -> usize {
    10
}
fn default_summary_candidates() -> usize {
    5
}
fn default_embedding_dimension() -> usize {
    256
}
fn default_chars_per_token() -> usize {
    4
}
fn default_true() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            token_budget_default: default_token_budget(),
            short_term_ttl_seconds: default_short_term_ttl(),
            promotion_access_threshold: default_promotion_threshold(),
            summarization_trigger_count: default_summarization_trigger(),
            auto_summarize: true,
            window_size: default_window_size(),
            overlap: default_overlap(),
            relevance_floor: default_relevance_floor(),
            summary_priority_boost: default_summary_boost(),
            min_fragment_tokens: default_min_fragment(),
            short_term_candidates: default_short_term_candidates(),
            long_term_top_k: default_long_term_top_k(),
            summary_candidates: default_summary_candidates(),
            embedding_dimension: default_embedding_dimension(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

impl MemoryConfig {
    pub fn short_term_ttl(&self) -> Duration {
        Duration::from_secs(self.short_term_ttl_seconds)
    }
}

/// Port call deadlines, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_embedding_ms")]
    pub embedding_ms: u64,

    #[serde(default = "default_generation_ms")]
    pub generation_ms: u64,

    #[serde(default = "default_persistence_ms")]
    pub persistence_ms: u64,
}

fn default_embedding_ms() -> u64 {
    5_000
}
fn default_generation_ms() -> u64 {
    30_000
}
fn default_persistence_ms() -> u64 {
    2_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_ms: default_embedding_ms(),
            generation_ms: default_generation_ms(),
            persistence_ms: default_persistence_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_ms)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_millis(self.generation_ms)
    }

    pub fn persistence(&self) -> Duration {
        Duration::from_millis(self.persistence_ms)
    }
}

/// Which durable backend holds ShortTerm / LongTerm data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process memory only; nothing survives a restart
    Memory,
    /// JSON-lines file
    #[default]
    File,
    /// SQLite database
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// File or database path. Defaults under `~/.memtier/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved storage path for file-backed backends.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        match self.backend {
            StorageBackend::Sqlite => AppConfig::config_dir().join("memory.sqlite"),
            _ => AppConfig::config_dir().join("memory.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Offline hashing embedder + extractive summaries
    #[default]
    Local,
    /// Any OpenAI-compatible HTTP endpoint (OpenAI, Ollama, vLLM, ...)
    OpenaiCompat,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_generation_model")]
    pub generation_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".into()
}
fn default_generation_model() -> String {
    "llama3.2".into()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            base_url: default_base_url(),
            api_key: None,
            generation_model: default_generation_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field(
                "api_key",
                &match self.api_key {
                    Some(_) => "[REDACTED]",
                    None => "None",
                },
            )
            .field("generation_model", &self.generation_model)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.memtier/config.toml).
    ///
    /// Environment variables override file values:
    /// - `MEMTIER_TOKEN_BUDGET`
    /// - `MEMTIER_STORAGE_PATH`
    /// - `MEMTIER_API_KEY`
    /// - `MEMTIER_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(budget) = lookup("MEMTIER_TOKEN_BUDGET") {
            self.memory.token_budget_default = budget.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "MEMTIER_TOKEN_BUDGET must be an integer, got '{budget}'"
                ))
            })?;
        }
        if let Some(path) = lookup("MEMTIER_STORAGE_PATH") {
            self.storage.path = Some(PathBuf::from(path));
        }
        if let Some(key) = lookup("MEMTIER_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = lookup("MEMTIER_BASE_URL") {
            self.provider.base_url = url;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.memory;
        if m.window_size == 0 {
            return Err(ConfigError::ValidationError(
                "window_size must be at least 1".into(),
            ));
        }
        if m.overlap >= m.window_size {
            return Err(ConfigError::ValidationError(format!(
                "overlap ({}) must be smaller than window_size ({})",
                m.overlap, m.window_size
            )));
        }
        if !(-1.0..=1.0).contains(&m.relevance_floor) {
            return Err(ConfigError::ValidationError(
                "relevance_floor must be between -1.0 and 1.0".into(),
            ));
        }
        if m.summary_priority_boost <= 0.0 {
            return Err(ConfigError::ValidationError(
                "summary_priority_boost must be > 0".into(),
            ));
        }
        if m.embedding_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "embedding_dimension must be at least 1".into(),
            ));
        }
        if m.chars_per_token == 0 {
            return Err(ConfigError::ValidationError(
                "chars_per_token must be at least 1".into(),
            ));
        }
        if m.short_term_ttl_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "short_term_ttl_seconds must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".memtier")
    }

    /// Generate a default config TOML string (for `memtier config`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory.token_budget_default, 4096);
        assert!((config.memory.summary_priority_boost - 1.2).abs() < 1e-6);
        assert_eq!(config.storage.backend, StorageBackend::File);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.memory.window_size, config.memory.window_size);
        assert_eq!(parsed.timeouts.embedding_ms, config.timeouts.embedding_ms);
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let mut config = AppConfig::default();
        config.memory.window_size = 4;
        config.memory.overlap = 4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn non_positive_boost_rejected() {
        let mut config = AppConfig::default();
        config.memory.summary_priority_boost = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/memtier.toml")).unwrap();
        assert_eq!(config.memory.promotion_access_threshold, 3);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"
[memory]
window_size = 4
overlap = 1
relevance_floor = 0.35

[storage]
backend = "sqlite"
path = "/var/lib/memtier/agents.sqlite"

[provider]
kind = "openai_compat"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(tmp.path()).unwrap();
        assert_eq!(config.memory.window_size, 4);
        assert_eq!(config.memory.overlap, 1);
        assert_eq!(config.memory.token_budget_default, 4096);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(
            config.storage.resolved_path(),
            PathBuf::from("/var/lib/memtier/agents.sqlite")
        );
        assert_eq!(config.provider.kind, ProviderKind::OpenaiCompat);
    }

    #[test]
    fn invalid_file_is_a_validation_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[memory]\nwindow_size = 2\noverlap = 3").unwrap();
        let err = AppConfig::load_from(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn garbage_file_is_a_parse_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "this is = = not toml").unwrap();
        let err = AppConfig::load_from(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MEMTIER_TOKEN_BUDGET", "2048"),
            ("MEMTIER_API_KEY", "sk-test"),
            ("MEMTIER_BASE_URL", "http://gpu-box:8000/v1"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.memory.token_budget_default, 2048);
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.provider.base_url, "http://gpu-box:8000/v1");
    }

    #[test]
    fn bad_budget_override_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "MEMTIER_TOKEN_BUDGET").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MEMTIER_TOKEN_BUDGET"));
    }

    #[test]
    fn api_key_redacted_in_debug() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-secret".into());
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("token_budget_default"));
        assert!(toml_str.contains("summary_priority_boost"));
    }
}
