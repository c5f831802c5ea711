use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};

use crate::config::{AppConfig, GenerationConfig};
use crate::indexer::walker::list_files_with_extension;
use crate::llm::{CompletionOptions, ModelRole, ModelRouter};
use crate::models::{ModelType, ReferenceFile};
use crate::prompts::{fill, GUIDELINES_FALLBACK_CONTEXT, GUIDELINES_TEMPLATE};
use crate::rag::KnowledgeBase;

const REFERENCE_EXTENSION: &str = "txt";

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedGuidelines {
    pub content: String,
    pub file_path: PathBuf,
}

/// Produces FX trade guidelines from the index plus the reference folder.
pub struct GuidelinesGenerator {
    knowledge_base: Arc<KnowledgeBase>,
    models: Arc<ModelRouter>,
    query: String,
    k: usize,
    reference_dir: PathBuf,
    output_dir: PathBuf,
    generation: GenerationConfig,
}

impl GuidelinesGenerator {
    pub fn new(config: &AppConfig, knowledge_base: Arc<KnowledgeBase>, models: Arc<ModelRouter>) -> Self {
        Self {
            knowledge_base,
            models,
            query: config.guidelines.query.clone(),
            k: config.guidelines.k,
            reference_dir: config.storage.reference_dir.clone(),
            output_dir: config.storage.guidelines_dir.clone(),
            generation: config.models.generation.clone(),
        }
    }

    pub fn reference_dir(&self) -> &Path {
        &self.reference_dir
    }

    pub async fn generate(&self) -> Result<GeneratedGuidelines> {
        let retrieved = self.retrieved_context().await;
        let reference = self.reference_context();

        let combined = format!("{}\n\n{}", retrieved, reference);
        let context = if combined.trim().is_empty() {
            tracing::info!("No index or reference material; generating from the fallback instruction");
            GUIDELINES_FALLBACK_CONTEXT.to_string()
        } else {
            combined
        };

        let prompt = fill(GUIDELINES_TEMPLATE, &[("context", &context)]);
        let model = self.models.select(ModelType::ClosedSource, ModelRole::Chat);
        let options = CompletionOptions {
            temperature: self.generation.temperature,
            max_tokens: Some(self.generation.guidelines_max_tokens),
        };
        let content = model
            .complete(&prompt, &options)
            .await
            .with_context(|| format!("Guidelines generation with {} failed", model.name()))?;

        let file_path = self.write_output(&content)?;
        tracing::info!("Saved guidelines to {}", file_path.display());

        Ok(GeneratedGuidelines { content, file_path })
    }

    async fn retrieved_context(&self) -> String {
        let retriever = match self.knowledge_base.load().await {
            Ok(Some(retriever)) => retriever,
            Ok(None) => return String::new(),
            Err(e) => {
                tracing::error!("Failed to load index for guidelines: {:#}", e);
                return String::new();
            }
        };

        match retriever.search(&self.query, self.k).await {
            Ok(hits) => hits
                .iter()
                .map(|hit| hit.chunk.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
            Err(e) => {
                tracing::error!("Failed to retrieve guidelines context: {:#}", e);
                String::new()
            }
        }
    }

    fn reference_context(&self) -> String {
        let mut context = String::new();
        for path in list_files_with_extension(&self.reference_dir, REFERENCE_EXTENSION) {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    context.push_str(&content);
                    context.push_str("\n\n");
                }
                Err(e) => tracing::warn!("Skipping reference file {}: {}", path.display(), e),
            }
        }
        context
    }

    fn write_output(&self, content: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create guidelines directory: {}", self.output_dir.display())
        })?;
        let file_name = format!(
            "fx_trade_guidelines_{}.txt",
            Local::now().format("%Y%m%d%H%M%S")
        );
        let path = self.output_dir.join(file_name);
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write guidelines: {}", path.display()))?;
        Ok(path)
    }

    /// Reference `.txt` files available to generation. Creates the folder when missing.
    pub fn list_references(&self) -> Result<Vec<ReferenceFile>> {
        std::fs::create_dir_all(&self.reference_dir).with_context(|| {
            format!("Failed to create reference directory: {}", self.reference_dir.display())
        })?;

        let mut files = Vec::new();
        for path in list_files_with_extension(&self.reference_dir, REFERENCE_EXTENSION) {
            let metadata = std::fs::metadata(&path)
                .with_context(|| format!("Failed to stat {}", path.display()))?;
            let modified_at: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            files.push(ReferenceFile {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                size: metadata.len(),
                modified_at,
            });
        }
        Ok(files)
    }

    /// Stores an uploaded reference file under its bare file name.
    pub fn save_reference(&self, file_name: &str, contents: &[u8]) -> Result<PathBuf> {
        let name = reference_file_name(file_name)?;

        std::fs::create_dir_all(&self.reference_dir).with_context(|| {
            format!("Failed to create reference directory: {}", self.reference_dir.display())
        })?;
        let path = self.reference_dir.join(name);
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to save reference file: {}", path.display()))?;
        tracing::info!("Saved reference file {}", path.display());
        Ok(path)
    }
}

/// The bare `.txt` name an upload is stored under. Directories and dot-files are refused.
pub fn reference_file_name(file_name: &str) -> Result<&str> {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.starts_with('.'))
        .with_context(|| format!("Invalid reference file name: {:?}", file_name))?;

    let is_text = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(REFERENCE_EXTENSION));
    if !is_text {
        anyhow::bail!("Only .txt reference files are accepted: {}", name);
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::Document;
    use crate::testing::{test_config, HashEmbedder, ScriptedModel};
    use tokio_test::assert_ok;

    fn generator(root: &Path) -> (GuidelinesGenerator, Arc<KnowledgeBase>, Arc<ScriptedModel>) {
        let config = test_config(root);
        let knowledge_base = Arc::new(
            KnowledgeBase::new(&config, Arc::new(HashEmbedder::default())).unwrap(),
        );
        let hosted = Arc::new(ScriptedModel::new("azure-chat", "# FX Guidelines"));
        let router = ModelRouter::new(
            hosted.clone(),
            Arc::new(ScriptedModel::new("azure-summary", "")),
            Arc::new(ScriptedModel::new("ollama", "")),
        );
        (
            GuidelinesGenerator::new(&config, knowledge_base.clone(), Arc::new(router)),
            knowledge_base,
            hosted,
        )
    }

    #[tokio::test]
    async fn falls_back_when_nothing_is_available() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, _, hosted) = generator(dir.path());

        let generated = assert_ok!(generator.generate().await);
        assert_eq!(generated.content, "# FX Guidelines");
        assert!(hosted.prompts()[0].contains(GUIDELINES_FALLBACK_CONTEXT));
        assert_eq!(hosted.max_tokens(), vec![Some(4000)]);
    }

    #[tokio::test]
    async fn combines_index_and_reference_files() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, knowledge_base, hosted) = generator(dir.path());
        knowledge_base
            .build_from_documents(vec![Document {
                source: "policy.md".to_string(),
                content: "Compliance requires trade reporting under EMIR.".to_string(),
            }])
            .await
            .unwrap();
        let reference_dir = dir.path().join("reference");
        std::fs::create_dir_all(&reference_dir).unwrap();
        std::fs::write(reference_dir.join("b.txt"), "Netting is bilateral.").unwrap();
        std::fs::write(reference_dir.join("a.txt"), "Confirm trades same day.").unwrap();
        std::fs::write(reference_dir.join("ignored.md"), "Not a reference.").unwrap();

        generator.generate().await.unwrap();

        let prompt = &hosted.prompts()[0];
        assert!(prompt.contains(
            "Compliance requires trade reporting under EMIR.\n\nConfirm trades same day.\n\nNetting is bilateral.\n\n"
        ));
        assert!(!prompt.contains("Not a reference."));
        assert!(!prompt.contains(GUIDELINES_FALLBACK_CONTEXT));
    }

    #[tokio::test]
    async fn output_is_written_with_a_timestamped_name() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, _, _) = generator(dir.path());

        let generated = generator.generate().await.unwrap();
        assert_eq!(generated.file_path.parent().unwrap(), dir.path().join("guidelines_output"));

        let name = generated.file_path.file_name().unwrap().to_str().unwrap();
        let stamp = name
            .strip_prefix("fx_trade_guidelines_")
            .and_then(|rest| rest.strip_suffix(".txt"))
            .expect("unexpected file name");
        assert_eq!(stamp.len(), 14);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(std::fs::read_to_string(&generated.file_path).unwrap(), "# FX Guidelines");
    }

    #[test]
    fn references_are_saved_and_listed() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, _, _) = generator(dir.path());
        assert!(generator.list_references().unwrap().is_empty());

        let saved = generator
            .save_reference("../../etc/fx_rules.txt", b"Cutoff is 17:00 NY.")
            .unwrap();
        assert_eq!(saved, dir.path().join("reference/fx_rules.txt"));
        assert!(generator.save_reference("rules.pdf", b"%PDF").is_err());
        assert!(generator.save_reference(".hidden.txt", b"x").is_err());

        let listed = generator.list_references().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "fx_rules.txt");
        assert_eq!(listed[0].size, 19);
    }

    #[test]
    fn reference_names_are_reduced_to_safe_txt_files() {
        assert_eq!(reference_file_name("notes/cutoffs.TXT").unwrap(), "cutoffs.TXT");
        assert!(reference_file_name(".env.txt").is_err());
        assert!(reference_file_name("rules.md").is_err());
        assert!(reference_file_name("..").is_err());
    }
}
