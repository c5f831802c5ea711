//! Deterministic stand-ins for the hosted models, shared by unit tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::AppConfig;
use crate::llm::{ChatModel, CompletionOptions};
use crate::rag::embeddings::Embedder;

/// Defaults with every storage path moved under `root`.
pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::defaults().unwrap();
    config.storage.index_dir = root.join("vector_index");
    config.storage.transcript_path = root.join("chat_history.txt");
    config.storage.staging_path = root.join("output.md");
    config.storage.reference_dir = root.join("reference");
    config.storage.guidelines_dir = root.join("guidelines_output");
    config
}

/// Bag-of-words embedder: each lowercase word hashes into one of `dimension` buckets.
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dimension: 256 }
    }
}

impl HashEmbedder {
    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() as usize) % self.dimension] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        "hash-bow"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Chat model that returns a fixed answer and records what it was asked.
pub struct ScriptedModel {
    name: String,
    answer: String,
    fail: bool,
    calls: Mutex<Vec<(String, Option<u32>)>>,
}

impl ScriptedModel {
    pub fn new(name: &str, answer: &str) -> Self {
        Self {
            name: name.to_string(),
            answer: answer.to_string(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, "")
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn max_tokens(&self) -> Vec<Option<u32>> {
        self.calls.lock().unwrap().iter().map(|(_, m)| *m).collect()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), options.max_tokens));
        if self.fail {
            anyhow::bail!("{} is unavailable", self.name);
        }
        Ok(self.answer.clone())
    }
}
