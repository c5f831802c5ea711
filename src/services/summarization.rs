use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

use crate::config::GenerationConfig;
use crate::llm::{CompletionOptions, ModelRole, ModelRouter};
use crate::models::ModelType;
use crate::prompts::{fill, SUMMARY_TEMPLATE};

static TOKENIZER: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!("Token counting unavailable: {}", e);
        None
    }
});

/// Approximate prompt size in cl100k tokens; falls back to chars / 4.
pub fn estimate_tokens(text: &str) -> usize {
    match TOKENIZER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

pub struct Summarizer {
    models: Arc<ModelRouter>,
    generation: GenerationConfig,
}

impl Summarizer {
    pub fn new(models: Arc<ModelRouter>, generation: GenerationConfig) -> Self {
        Self { models, generation }
    }

    pub async fn summarize(&self, text: &str, model_type: ModelType) -> Result<String> {
        let prompt = fill(SUMMARY_TEMPLATE, &[("content", text)]);
        let model = self.models.select(model_type, ModelRole::Summarization);

        tracing::info!(
            "Summarizing {} chars (~{} prompt tokens) with {}",
            text.chars().count(),
            estimate_tokens(&prompt),
            model.name()
        );

        let options = CompletionOptions {
            temperature: self.generation.temperature,
            max_tokens: Some(self.generation.summary_max_tokens),
        };
        model
            .complete(&prompt, &options)
            .await
            .with_context(|| format!("Summarization with {} failed", model.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::testing::ScriptedModel;

    fn summarizer() -> (Summarizer, Arc<ScriptedModel>, Arc<ScriptedModel>) {
        let hosted = Arc::new(ScriptedModel::new("azure-summary", "## Summary"));
        let local = Arc::new(ScriptedModel::new("ollama", "local summary"));
        let router = ModelRouter::new(
            Arc::new(ScriptedModel::new("azure-chat", "unused")),
            hosted.clone(),
            local.clone(),
        );
        let generation = AppConfig::defaults().unwrap().models.generation;
        (Summarizer::new(Arc::new(router), generation), hosted, local)
    }

    #[tokio::test]
    async fn hosted_summary_uses_template_and_budget() {
        let (summarizer, hosted, local) = summarizer();
        let summary = summarizer
            .summarize("EUR/USD spot settles T+2.", ModelType::ClosedSource)
            .await
            .unwrap();

        assert_eq!(summary, "## Summary");
        let prompts = hosted.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("EUR/USD spot settles T+2."));
        assert!(prompts[0].contains("summarizing a web page"));
        assert_eq!(hosted.max_tokens(), vec![Some(1500)]);
        assert!(local.prompts().is_empty());
    }

    #[tokio::test]
    async fn open_source_goes_to_local_model() {
        let (summarizer, hosted, local) = summarizer();
        let summary = summarizer
            .summarize("text", ModelType::OpenSource)
            .await
            .unwrap();
        assert_eq!(summary, "local summary");
        assert!(hosted.prompts().is_empty());
        assert_eq!(local.prompts().len(), 1);
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let router = ModelRouter::new(
            Arc::new(ScriptedModel::new("azure-chat", "")),
            Arc::new(ScriptedModel::failing("azure-summary")),
            Arc::new(ScriptedModel::new("ollama", "")),
        );
        let generation = AppConfig::defaults().unwrap().models.generation;
        let summarizer = Summarizer::new(Arc::new(router), generation);
        assert!(summarizer
            .summarize("text", ModelType::ClosedSource)
            .await
            .is_err());
    }

    #[test]
    fn token_estimate_grows_with_text() {
        assert_eq!(estimate_tokens(""), 0);
        assert!(estimate_tokens("settlement instructions") > 0);
        assert!(estimate_tokens(&"word ".repeat(100)) > estimate_tokens("word"));
    }
}
