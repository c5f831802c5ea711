pub mod azure;
pub mod ollama;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ModelsConfig;
use crate::models::ModelType;

pub use self::azure::AzureChatClient;
pub use self::ollama::OllamaChatClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Deployment or model name, for logs.
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// What a chat model is used for; selects the hosted deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Chat,
    Summarization,
}

/// Dispatches a `ModelType` to the matching client.
pub struct ModelRouter {
    hosted_chat: Arc<dyn ChatModel>,
    hosted_summarization: Arc<dyn ChatModel>,
    local: Arc<dyn ChatModel>,
}

impl ModelRouter {
    pub fn new(
        hosted_chat: Arc<dyn ChatModel>,
        hosted_summarization: Arc<dyn ChatModel>,
        local: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            hosted_chat,
            hosted_summarization,
            local,
        }
    }

    pub fn from_config(config: &ModelsConfig, client: reqwest::Client) -> Self {
        // Without a key the hosted clients still build; their calls fail upstream instead.
        let api_key = config.azure.api_key().unwrap_or_else(|e| {
            tracing::warn!("{} (hosted models will reject requests)", e);
            String::new()
        });

        let hosted_chat = AzureChatClient::new(
            client.clone(),
            &config.azure,
            &config.azure.chat_deployment,
            api_key.clone(),
        );
        let hosted_summarization = AzureChatClient::new(
            client.clone(),
            &config.azure,
            &config.azure.summarization_deployment,
            api_key,
        );
        let local = OllamaChatClient::new(client, &config.ollama);

        Self::new(
            Arc::new(hosted_chat),
            Arc::new(hosted_summarization),
            Arc::new(local),
        )
    }

    pub fn select(&self, model_type: ModelType, role: ModelRole) -> Arc<dyn ChatModel> {
        match (model_type, role) {
            (ModelType::ClosedSource, ModelRole::Chat) => self.hosted_chat.clone(),
            (ModelType::ClosedSource, ModelRole::Summarization) => {
                self.hosted_summarization.clone()
            }
            (ModelType::OpenSource, _) => self.local.clone(),
        }
    }

    pub fn local(&self) -> Arc<dyn ChatModel> {
        self.local.clone()
    }
}
