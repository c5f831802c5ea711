use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const ENV_PREFIX: &str = "KB";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub embeddings: EmbeddingsConfig,
    pub retrieval: RetrievalConfig,
    pub storage: StorageConfig,
    pub guidelines: GuidelinesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub azure: AzureConfig,
    pub ollama: OllamaConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureConfig {
    pub endpoint: String,
    pub api_version: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub chat_deployment: String,
    pub summarization_deployment: String,
    pub embedding_deployment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub chat_max_tokens: u32,
    pub summary_max_tokens: u32,
    pub guidelines_max_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Azure,
    Local,
}

/// What an indexing run does with an index that is already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    Replace,
    Append,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub provider: EmbeddingProvider,
    pub local_model_dir: PathBuf,
    pub batch_size: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub index_mode: IndexMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    pub k: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub index_dir: PathBuf,
    pub transcript_path: PathBuf,
    pub staging_path: PathBuf,
    pub reference_dir: PathBuf,
    pub guidelines_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuidelinesConfig {
    pub query: String,
    pub k: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid chunk size: {0} (must be greater than 0)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid retrieval depth for {0}: must be at least 1")]
    InvalidRetrievalDepth(&'static str),
    #[error("Invalid embedding batch size: {0} (must be greater than 0)")]
    InvalidBatchSize(usize),
    #[error("Invalid model name for {0} (cannot be empty)")]
    EmptyModel(&'static str),
    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("Environment variable {0} is not set")]
    MissingApiKey(String),
}

impl AppConfig {
    /// Built-in defaults only, without file or environment overrides.
    pub fn defaults() -> Result<Self> {
        let config: AppConfig = ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULT_CONFIG, ::config::FileFormat::Toml))
            .build()
            .context("Failed to build default configuration")?
            .try_deserialize()
            .context("Failed to parse default configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Layers the defaults, an optional config file and `KB__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULT_CONFIG, ::config::FileFormat::Toml));

        match path {
            Some(path) => {
                builder = builder.add_source(::config::File::from(path.to_path_buf()).required(true));
            }
            None => {
                builder = builder.add_source(::config::File::with_name("config").required(false));
            }
        }

        let config: AppConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config
            .validate()
            .context("Configuration validation failed")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let emb = &self.embeddings;
        if emb.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(emb.chunk_size));
        }
        if emb.chunk_overlap >= emb.chunk_size {
            return Err(ConfigError::OverlapTooLarge(emb.chunk_overlap, emb.chunk_size));
        }
        if emb.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(emb.batch_size));
        }
        if self.retrieval.k == 0 {
            return Err(ConfigError::InvalidRetrievalDepth("retrieval.k"));
        }
        if self.guidelines.k == 0 {
            return Err(ConfigError::InvalidRetrievalDepth("guidelines.k"));
        }

        let azure = &self.models.azure;
        for (field, value) in [
            ("models.azure.chat_deployment", &azure.chat_deployment),
            ("models.azure.summarization_deployment", &azure.summarization_deployment),
            ("models.azure.embedding_deployment", &azure.embedding_deployment),
            ("models.ollama.model", &self.models.ollama.model),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyModel(field));
            }
        }

        for (field, value) in [
            ("models.azure.endpoint", &azure.endpoint),
            ("models.ollama.base_url", &self.models.ollama.base_url),
        ] {
            if Url::parse(value).is_err() {
                return Err(ConfigError::InvalidUrl {
                    field,
                    value: value.clone(),
                });
            }
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl AzureConfig {
    pub fn api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey(self.api_key_env.clone()))
    }

    /// `{endpoint}/openai/deployments/{deployment}/{operation}`
    pub fn deployment_url(&self, deployment: &str, operation: &str) -> String {
        format!(
            "{}/openai/deployments/{}/{}",
            self.endpoint.trim_end_matches('/'),
            deployment,
            operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::defaults().expect("defaults should load");
        assert_eq!(config.embeddings.chunk_size, 1000);
        assert_eq!(config.embeddings.chunk_overlap, 200);
        assert_eq!(config.embeddings.index_mode, IndexMode::Replace);
        assert_eq!(config.embeddings.provider, EmbeddingProvider::Azure);
        assert_eq!(config.retrieval.k, 4);
        assert_eq!(config.guidelines.k, 50);
        assert_eq!(config.server.bind_address(), "0.0.0.0:8000");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut config = AppConfig::defaults().expect("defaults should load");
        config.embeddings.chunk_overlap = config.embeddings.chunk_size;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OverlapTooLarge(1000, 1000))
        ));
    }

    #[test]
    fn zero_retrieval_depth_is_rejected() {
        let mut config = AppConfig::defaults().expect("defaults should load");
        config.retrieval.k = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetrievalDepth("retrieval.k"))
        ));
    }

    #[test]
    fn bad_endpoint_is_rejected() {
        let mut config = AppConfig::defaults().expect("defaults should load");
        config.models.azure.endpoint = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "models.azure.endpoint", .. })
        ));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[retrieval]\nk = 7\n\n[embeddings]\nindex_mode = \"append\"\n",
        )
        .expect("write config");

        let config = AppConfig::load(Some(&path)).expect("config should load");
        assert_eq!(config.retrieval.k, 7);
        assert_eq!(config.embeddings.index_mode, IndexMode::Append);
        assert_eq!(config.embeddings.chunk_size, 1000);
    }

    #[test]
    fn deployment_url_trims_trailing_slash() {
        let config = AppConfig::defaults().expect("defaults should load");
        assert_eq!(
            config.models.azure.deployment_url("gpt-4o", "chat/completions"),
            "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions"
        );
    }
}
