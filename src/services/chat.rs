use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{AppConfig, GenerationConfig};
use crate::llm::{CompletionOptions, ModelRole, ModelRouter};
use crate::models::{ChatTurn, ModelType};
use crate::prompts::{fill, QA_TEMPLATE};
use crate::rag::KnowledgeBase;
use crate::transcript::TranscriptStore;

pub const NO_KNOWLEDGE_BASE_MESSAGE: &str = "No embeddings found. Please create embeddings first.";

#[derive(Debug, Clone, PartialEq)]
pub enum AskOutcome {
    Answered {
        answer: String,
        history: Vec<ChatTurn>,
        /// Distinct sources of the retrieved chunks, in rank order.
        sources: Vec<String>,
    },
    NoKnowledgeBase,
}

/// Question answering over the indexed knowledge base.
pub struct ChatService {
    knowledge_base: Arc<KnowledgeBase>,
    models: Arc<ModelRouter>,
    transcript: TranscriptStore,
    k: usize,
    generation: GenerationConfig,
}

impl ChatService {
    pub fn new(config: &AppConfig, knowledge_base: Arc<KnowledgeBase>, models: Arc<ModelRouter>) -> Self {
        Self {
            knowledge_base,
            models,
            transcript: TranscriptStore::new(config.storage.transcript_path.clone()),
            k: config.retrieval.k,
            generation: config.models.generation.clone(),
        }
    }

    /// The history is owned by the caller: it comes in with the question and goes
    /// back out with the new turn appended.
    pub async fn ask(
        &self,
        question: &str,
        model_type: ModelType,
        history: Vec<ChatTurn>,
    ) -> Result<AskOutcome> {
        let span = tracing::info_span!("ask", request_id = %Uuid::new_v4());
        self.answer(question, model_type, history)
            .instrument(span)
            .await
    }

    async fn answer(
        &self,
        question: &str,
        model_type: ModelType,
        mut history: Vec<ChatTurn>,
    ) -> Result<AskOutcome> {
        let Some(retriever) = self.knowledge_base.load().await? else {
            tracing::info!("Question asked before any index was built");
            return Ok(AskOutcome::NoKnowledgeBase);
        };

        let hits = retriever.search(question, self.k).await?;
        let context = hits
            .iter()
            .map(|hit| hit.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut sources: Vec<String> = Vec::new();
        for hit in &hits {
            if !sources.contains(&hit.chunk.source) {
                sources.push(hit.chunk.source.clone());
            }
        }

        let prompt = fill(QA_TEMPLATE, &[("context", &context), ("question", question)]);
        let model = self.models.select(model_type, ModelRole::Chat);
        tracing::info!(
            "Answering with {} using {} retrieved chunks",
            model.name(),
            hits.len()
        );

        let options = CompletionOptions {
            temperature: self.generation.temperature,
            max_tokens: Some(self.generation.chat_max_tokens),
        };
        let answer = model
            .complete(&prompt, &options)
            .await
            .with_context(|| format!("Chat completion with {} failed", model.name()))?;

        history.push(ChatTurn {
            user: question.to_string(),
            bot: answer.clone(),
        });
        self.transcript.write(&history)?;

        Ok(AskOutcome::Answered {
            answer,
            history,
            sources,
        })
    }
}
