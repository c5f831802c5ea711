use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, AzureConfig, EmbeddingProvider};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifies the vector space; indexes built by different models are not comparable.
    fn model_id(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .context("Embedding model returned no vector for the query")
    }
}

pub fn build_embedder(config: &AppConfig, client: Client) -> Result<Arc<dyn Embedder>> {
    match config.embeddings.provider {
        EmbeddingProvider::Azure => {
            let api_key = config.models.azure.api_key()?;
            Ok(Arc::new(AzureEmbeddingClient::new(
                client,
                &config.models.azure,
                api_key,
                config.embeddings.batch_size,
            )))
        }
        EmbeddingProvider::Local => Ok(Arc::new(LocalEmbeddingModel::load(
            &config.embeddings.local_model_dir,
        )?)),
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Hosted embeddings from an Azure OpenAI deployment.
pub struct AzureEmbeddingClient {
    client: Client,
    url: String,
    api_version: String,
    api_key: String,
    deployment: String,
    batch_size: usize,
}

impl AzureEmbeddingClient {
    pub fn new(client: Client, config: &AzureConfig, api_key: String, batch_size: usize) -> Self {
        Self {
            client,
            url: config.deployment_url(&config.embedding_deployment, "embeddings"),
            api_version: config.api_version.clone(),
            api_key,
            deployment: config.embedding_deployment.clone(),
            batch_size: batch_size.max(1),
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(&self.url)
            .query(&[("api-version", self.api_version.as_str())])
            .header("api-key", &self.api_key)
            .json(&EmbeddingRequest { input: batch })
            .send()
            .await
            .with_context(|| format!("Embedding request to {} failed", self.deployment))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding request failed: {} - {}", status, error_text);
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        if parsed.data.len() != batch.len() {
            anyhow::bail!(
                "Embedding response has {} vectors for {} inputs",
                parsed.data.len(),
                batch.len()
            );
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for AzureEmbeddingClient {
    fn model_id(&self) -> &str {
        &self.deployment
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        tracing::debug!("Embedded {} texts with {}", texts.len(), self.deployment);
        Ok(vectors)
    }
}

/// ONNX embedding model loaded from local files.
pub struct LocalEmbeddingModel {
    model: Arc<TextEmbedding>,
    model_id: String,
}

impl LocalEmbeddingModel {
    pub fn load(model_dir: &Path) -> Result<Self> {
        tracing::info!("Initializing embedding model from {}", model_dir.display());

        if !model_dir.exists() {
            anyhow::bail!("Model directory not found: {}", model_dir.display());
        }

        let read = |name: &str| {
            std::fs::read(model_dir.join(name))
                .with_context(|| format!("Failed to read {}", model_dir.join(name).display()))
        };

        let user_model = UserDefinedEmbeddingModel {
            onnx_file: read("model.onnx")?,
            tokenizer_files: TokenizerFiles {
                tokenizer_file: read("tokenizer.json")?,
                config_file: read("config.json")?,
                special_tokens_map_file: read("special_tokens_map.json")?,
                tokenizer_config_file: read("tokenizer_config.json")?,
            },
        };

        let model = TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
            .map_err(|e| anyhow::anyhow!("Failed to initialize embedding model: {}", e))?;

        let model_id = model_dir
            .file_name()
            .map(|name| format!("local:{}", name.to_string_lossy()))
            .unwrap_or_else(|| "local".to_string());

        tracing::info!("Embedding model {} ready", model_id);
        Ok(Self {
            model: Arc::new(model),
            model_id,
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbeddingModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .context("Embedding task panicked")?
            .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
    }
}
