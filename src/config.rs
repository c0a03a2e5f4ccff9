use anyhow::{bail, Context, Result};
use flipflops_core::command::MAX_EXAM_QUESTIONS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DocumentsConfig {
    /// Defaults to `<data.dir>/documents` when unset.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.md", "**/*.txt", "**/*.pdf", "**/*.docx", "**/*.csv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    250
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override (Ollama host, OpenAI-compatible proxy).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

pub const DEFAULT_HASH_DIMS: usize = 256;

impl EmbeddingConfig {
    /// Dimensionality, with the hash backend's default filled in.
    pub fn effective_dims(&self) -> Option<usize> {
        match (self.provider.as_str(), self.dims) {
            ("hash", None) => Some(DEFAULT_HASH_DIMS),
            (_, dims) => dims,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_provider")]
    pub provider: String,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_model_max_retries")]
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            model: default_model_name(),
            base_url: default_model_base_url(),
            api_key_env: default_api_key_env(),
            max_tokens: default_model_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_model_timeout_secs(),
            max_retries: default_model_max_retries(),
        }
    }
}

fn default_model_provider() -> String {
    "anthropic".to_string()
}
fn default_model_name() -> String {
    "claude-3-5-sonnet-latest".to_string()
}
fn default_model_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}
fn default_model_max_tokens() -> u32 {
    4000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_model_timeout_secs() -> u64 {
    60
}
fn default_model_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Turns included in each prompt's history excerpt.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_exam_questions")]
    pub exam_questions: usize,
    #[serde(default = "default_user_level")]
    pub user_level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            exam_questions: default_exam_questions(),
            user_level: default_user_level(),
        }
    }
}

fn default_history_window() -> usize {
    6
}
fn default_exam_questions() -> usize {
    5
}
fn default_user_level() -> String {
    "ensino médio".to_string()
}

impl Config {
    /// Working defaults for running without a config file.
    pub fn minimal() -> Self {
        Self {
            data: DataConfig::default(),
            documents: DocumentsConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            model: ModelConfig::default(),
            session: SessionConfig::default(),
        }
    }

    /// Same defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::minimal();
        config.data.dir = data_dir.into();
        config
    }

    pub fn documents_root(&self) -> PathBuf {
        self.documents
            .root
            .clone()
            .unwrap_or_else(|| self.data.dir.join("documents"))
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }

        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_score) {
            bail!("retrieval.min_score must be in [-1.0, 1.0]");
        }

        match self.embedding.provider.as_str() {
            "hash" | "disabled" | "local" => {}
            "openai" | "ollama" => {
                if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be hash, openai, ollama, local, or disabled.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        match self.model.provider.as_str() {
            "anthropic" | "disabled" => {}
            other => bail!(
                "Unknown model provider: '{}'. Must be anthropic or disabled.",
                other
            ),
        }
        if !(0.0..=1.0).contains(&self.model.temperature) {
            bail!("model.temperature must be in [0.0, 1.0]");
        }
        if self.model.timeout_secs == 0 {
            bail!("model.timeout_secs must be > 0");
        }

        if !(1..=MAX_EXAM_QUESTIONS).contains(&self.session.exam_questions) {
            bail!(
                "session.exam_questions must be between 1 and {}",
                MAX_EXAM_QUESTIONS
            );
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

/// Default config file contents written by `flipflops init`.
pub fn default_config_toml() -> Result<String> {
    toml::to_string_pretty(&Config::minimal()).context("Failed to render default config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.chunking.max_tokens, 250);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.effective_dims(), Some(DEFAULT_HASH_DIMS));
        assert_eq!(config.model.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.session.exam_questions, 5);
        assert_eq!(config.documents_root(), PathBuf::from("data/documents"));
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [data]
            dir = "/tmp/ff"

            [retrieval]
            top_k = 3
            min_score = 0.2

            [model]
            provider = "disabled"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.model.provider, "disabled");
        assert_eq!(config.model.timeout_secs, 60);
        assert_eq!(config.documents_root(), PathBuf::from("/tmp/ff/documents"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::minimal();
        config.chunking.max_tokens = 0;
        assert!(config.validate().is_err());

        let mut config = Config::minimal();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = Config::minimal();
        config.model.temperature = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::minimal();
        config.embedding.provider = "openai".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::minimal();
        config.embedding.provider = "word2vec".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::minimal();
        config.model.provider = "gpt".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::minimal();
        config.session.exam_questions = MAX_EXAM_QUESTIONS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_parses_back() {
        let rendered = default_config_toml().unwrap();
        let config: Config = toml::from_str(&rendered).unwrap();
        config.validate().unwrap();
        assert_eq!(config.session.user_level, "ensino médio");
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
        assert!(load_or_default(Path::new("/definitely/not/here.toml")).is_ok());
    }
}
