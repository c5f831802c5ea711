use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatModel, CompletionOptions, Message};
use crate::config::AzureConfig;

#[derive(Debug, Serialize)]
struct ChatRequest {
    messages: Vec<Message>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Chat completions against one Azure OpenAI deployment.
pub struct AzureChatClient {
    client: Client,
    url: String,
    api_version: String,
    api_key: String,
    deployment: String,
}

impl AzureChatClient {
    pub fn new(client: Client, config: &AzureConfig, deployment: &str, api_key: String) -> Self {
        Self {
            client,
            url: config.deployment_url(deployment, "chat/completions"),
            api_version: config.api_version.clone(),
            api_key,
            deployment: deployment.to_string(),
        }
    }
}

#[async_trait]
impl ChatModel for AzureChatClient {
    fn name(&self) -> &str {
        &self.deployment
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let request = ChatRequest {
            messages: vec![Message::user(prompt)],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .client
            .post(&self.url)
            .query(&[("api-version", self.api_version.as_str())])
            .header("api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Azure OpenAI request to {} failed", self.deployment))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Azure OpenAI request failed: {} - {}", status, error_text);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse Azure OpenAI chat response")?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .context("Azure OpenAI returned no choices")?;

        if choice.finish_reason.as_deref() == Some("length") {
            tracing::warn!(
                deployment = %self.deployment,
                "Completion was cut off by the max_tokens limit"
            );
        }

        Ok(choice.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AzureChatClient {
        let mut config = AppConfig::defaults().unwrap().models.azure;
        config.endpoint = server.uri();
        AzureChatClient::new(Client::new(), &config, "gpt-4o", "secret".to_string())
    }

    fn options() -> CompletionOptions {
        CompletionOptions {
            temperature: 0.3,
            max_tokens: Some(50),
        }
    }

    #[tokio::test]
    async fn sends_key_version_and_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o/chat/completions"))
            .and(query_param("api-version", "2024-02-01"))
            .and(header("api-key", "secret"))
            .and(body_partial_json(json!({
                "messages": [{ "role": "user", "content": "When does spot settle?" }],
                "max_tokens": 50
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": { "role": "assistant", "content": "T+2" },
                    "finish_reason": "stop"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let answer = client(&server)
            .complete("When does spot settle?", &options())
            .await
            .unwrap();
        assert_eq!(answer, "T+2");
    }

    #[tokio::test]
    async fn error_status_carries_the_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).set_body_string("Rate limit is exceeded. Retry after 7 seconds."),
            )
            .mount(&server)
            .await;

        let err = client(&server).complete("hi", &options()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("429"), "{message}");
        assert!(message.contains("Rate limit is exceeded"), "{message}");
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        assert!(client(&server).complete("hi", &options()).await.is_err());
    }
}
