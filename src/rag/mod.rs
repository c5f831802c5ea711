pub mod embeddings;
pub mod vector_index;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::{AppConfig, IndexMode};
use crate::indexer::{load_document, Document, DocumentChunk, RecursiveSplitter};
use self::embeddings::Embedder;
use self::vector_index::{IndexEntry, SearchHit, VectorIndex};

/// Summary of one indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
    pub total_chunks: usize,
    pub failed_sources: Vec<String>,
    pub mode: IndexMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub removed: bool,
    pub failure: Option<String>,
}

/// A loaded index bound to the embedder that answers queries against it.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let query_embedding = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;
        self.index.nearest(&query_embedding, k).await
    }
}

/// Owns the persisted index: building, loading and deleting it.
pub struct KnowledgeBase {
    embedder: Arc<dyn Embedder>,
    splitter: RecursiveSplitter,
    index_dir: PathBuf,
    staging_path: PathBuf,
    mode: IndexMode,
    cache: RwLock<Option<Arc<VectorIndex>>>,
}

impl KnowledgeBase {
    pub fn new(config: &AppConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let splitter = RecursiveSplitter::new(
            config.embeddings.chunk_size,
            config.embeddings.chunk_overlap,
        )?;
        Ok(Self {
            embedder,
            splitter,
            index_dir: config.storage.index_dir.clone(),
            staging_path: config.storage.staging_path.clone(),
            mode: config.embeddings.index_mode,
            cache: RwLock::new(None),
        })
    }

    pub fn with_mode(mut self, mode: IndexMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub async fn is_present(&self) -> bool {
        self.cache.read().await.is_some() || VectorIndex::table_path(&self.index_dir).exists()
    }

    /// Stages `text` as a Markdown file, reloads it through the document loader and indexes it.
    pub async fn build_from_text(&self, text: &str) -> Result<IndexReport> {
        if let Some(parent) = self.staging_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create staging directory: {}", parent.display())
                })?;
            }
        }
        std::fs::write(&self.staging_path, text).with_context(|| {
            format!("Failed to write staging file: {}", self.staging_path.display())
        })?;

        let document = load_document(&self.staging_path)?;
        self.build_from_documents(vec![document]).await
    }

    /// Loads every path and indexes whatever could be read.
    pub async fn build_from_files(&self, paths: &[PathBuf]) -> Result<IndexReport> {
        let mut documents = Vec::with_capacity(paths.len());
        let mut failed_sources = Vec::new();

        for path in paths {
            match load_document(path) {
                Ok(document) => documents.push(document),
                Err(e) => {
                    tracing::warn!("Skipping {}: {:#}", path.display(), e);
                    failed_sources.push(path.display().to_string());
                }
            }
        }

        if documents.is_empty() {
            anyhow::bail!("None of the {} files could be loaded", paths.len());
        }

        let mut report = self.build_from_documents(documents).await?;
        report.failed_sources = failed_sources;
        Ok(report)
    }

    pub async fn build_from_documents(&self, documents: Vec<Document>) -> Result<IndexReport> {
        let chunks: Vec<DocumentChunk> = documents
            .iter()
            .flat_map(|doc| self.splitter.split_document(doc))
            .collect();

        if chunks.is_empty() {
            anyhow::bail!("No text to index in {} document(s)", documents.len());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .context("Failed to embed chunks")?;
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();
        let new_chunks = entries.len();

        let (index, mode) = self.merge_into_index(entries).await?;

        tracing::info!(
            "Indexed {} chunks from {} document(s) ({:?}, {} total) into {}",
            new_chunks,
            documents.len(),
            mode,
            index.len(),
            self.index_dir.display()
        );

        let report = IndexReport {
            documents: documents.len(),
            chunks: new_chunks,
            total_chunks: index.len(),
            failed_sources: Vec::new(),
            mode,
        };
        *self.cache.write().await = Some(Arc::new(index));
        Ok(report)
    }

    async fn merge_into_index(
        &self,
        entries: Vec<IndexEntry>,
    ) -> Result<(VectorIndex, IndexMode)> {
        let model_id = self.embedder.model_id();
        if self.mode == IndexMode::Append {
            let dimension = entries.first().map(|e| e.embedding.len()).unwrap_or(0);
            match VectorIndex::open(&self.index_dir).await {
                Ok(Some(mut existing))
                    if existing.embedding_model() == model_id
                        && existing.dimension() == dimension =>
                {
                    existing.append(entries).await?;
                    return Ok((existing, IndexMode::Append));
                }
                Ok(Some(existing)) => tracing::warn!(
                    "Existing index was built with {} ({} dims); replacing it with {} ({} dims)",
                    existing.embedding_model(),
                    existing.dimension(),
                    model_id,
                    dimension
                ),
                Ok(None) => {}
                Err(e) => tracing::warn!("Existing index is unreadable, replacing it: {:#}", e),
            }
        }

        let index = VectorIndex::create(&self.index_dir, model_id, entries).await?;
        Ok((index, IndexMode::Replace))
    }

    /// `Ok(None)` when nothing has been indexed yet.
    pub async fn load(&self) -> Result<Option<Retriever>> {
        if let Some(index) = self.cache.read().await.as_ref() {
            return Ok(Some(self.retriever(index.clone())));
        }

        let mut cache = self.cache.write().await;
        if let Some(index) = cache.as_ref() {
            return Ok(Some(self.retriever(index.clone())));
        }
        let Some(index) = VectorIndex::open(&self.index_dir).await? else {
            return Ok(None);
        };

        if index.embedding_model() != self.embedder.model_id() {
            tracing::warn!(
                "Index was built with {} but queries use {}",
                index.embedding_model(),
                self.embedder.model_id()
            );
        }
        tracing::info!("Loaded index with {} chunks from {}", index.len(), self.index_dir.display());

        let index = Arc::new(index);
        *cache = Some(index.clone());
        Ok(Some(self.retriever(index)))
    }

    fn retriever(&self, index: Arc<VectorIndex>) -> Retriever {
        Retriever {
            index,
            embedder: self.embedder.clone(),
        }
    }

    /// Removes the persisted index. Failures are logged and reported, never raised.
    pub async fn delete(&self) -> DeleteOutcome {
        *self.cache.write().await = None;

        if !self.index_dir.exists() {
            tracing::info!("No index to delete at {}", self.index_dir.display());
            return DeleteOutcome::default();
        }

        match tokio::fs::remove_dir_all(&self.index_dir).await {
            Ok(()) => {
                tracing::info!("Deleted index at {}", self.index_dir.display());
                DeleteOutcome {
                    removed: true,
                    failure: None,
                }
            }
            Err(e) => {
                tracing::error!("Failed to delete index at {}: {}", self.index_dir.display(), e);
                DeleteOutcome {
                    removed: false,
                    failure: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, HashEmbedder};
    use tokio_test::assert_ok;

    fn knowledge_base(root: &Path, mode: IndexMode) -> KnowledgeBase {
        let mut config = test_config(root);
        config.embeddings.chunk_size = 200;
        config.embeddings.chunk_overlap = 20;
        config.embeddings.index_mode = mode;
        KnowledgeBase::new(&config, Arc::new(HashEmbedder::default())).unwrap()
    }

    fn doc(source: &str, content: &str) -> Document {
        Document {
            source: source.to_string(),
            content: content.to_string(),
        }
    }

    fn fx_documents() -> Vec<Document> {
        vec![
            doc("fx.txt", "FX settlement timing: spot trades settle two business days after trade date."),
            doc("lunch.txt", "The cafeteria serves pasta and salad on Fridays."),
            doc("kyc.txt", "Counterparty onboarding requires signed KYC documents."),
        ]
    }

    #[tokio::test]
    async fn retrieves_the_matching_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let kb = knowledge_base(dir.path(), IndexMode::Replace);

        let report = assert_ok!(kb.build_from_documents(fx_documents()).await);
        assert_eq!(report.documents, 3);
        assert_eq!(report.chunks, 3);

        let retriever = kb.load().await.unwrap().expect("index should load");
        let hits = retriever.search("settlement timing for spot trades", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.source, "fx.txt");
    }

    #[tokio::test]
    async fn index_survives_a_fresh_instance() {
        let dir = tempfile::tempdir().unwrap();
        knowledge_base(dir.path(), IndexMode::Replace)
            .build_from_documents(fx_documents())
            .await
            .unwrap();

        let reopened = knowledge_base(dir.path(), IndexMode::Replace);
        let retriever = reopened.load().await.unwrap().expect("index should load from disk");
        assert_eq!(retriever.len(), 3);
    }

    #[tokio::test]
    async fn load_without_index_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let kb = knowledge_base(dir.path(), IndexMode::Replace);
        assert!(kb.load().await.unwrap().is_none());
        assert!(!kb.is_present().await);
    }

    #[tokio::test]
    async fn delete_removes_index_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let kb = knowledge_base(dir.path(), IndexMode::Replace);
        kb.build_from_documents(fx_documents()).await.unwrap();
        assert!(kb.load().await.unwrap().is_some());

        let outcome = kb.delete().await;
        assert_eq!(outcome, DeleteOutcome { removed: true, failure: None });
        assert!(kb.load().await.unwrap().is_none());
        assert!(!kb.index_dir().exists());
    }

    #[tokio::test]
    async fn deleting_nothing_is_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let kb = knowledge_base(dir.path(), IndexMode::Replace);
        assert_eq!(kb.delete().await, DeleteOutcome::default());
    }

    #[tokio::test]
    async fn delete_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let kb = knowledge_base(dir.path(), IndexMode::Replace);
        std::fs::write(kb.index_dir(), "not a directory").unwrap();

        let outcome = kb.delete().await;
        assert!(!outcome.removed);
        assert!(outcome.failure.is_some());
        assert!(kb.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replace_discards_and_append_extends() {
        let dir = tempfile::tempdir().unwrap();
        let first = vec![doc("a.txt", "Spot trades settle at T+2.")];
        let second = vec![doc("b.txt", "Forwards settle on the agreed value date.")];

        let kb = knowledge_base(dir.path(), IndexMode::Replace);
        kb.build_from_documents(first.clone()).await.unwrap();
        let report = kb.build_from_documents(second.clone()).await.unwrap();
        assert_eq!(report.total_chunks, 1);

        let kb = knowledge_base(dir.path(), IndexMode::Append);
        let report = kb.build_from_documents(first).await.unwrap();
        assert_eq!(report.mode, IndexMode::Append);
        assert_eq!(report.total_chunks, 2);
    }

    #[tokio::test]
    async fn text_is_staged_and_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let kb = knowledge_base(dir.path(), IndexMode::Replace);

        let report = kb
            .build_from_text("# Settlement\n\nSpot trades settle at T+2.")
            .await
            .unwrap();
        assert_eq!(report.documents, 1);
        assert!(dir.path().join("output.md").exists());

        let hits = kb.load().await.unwrap().unwrap().search("spot settle", 1).await.unwrap();
        assert!(hits[0].chunk.text.contains("Spot trades settle at T+2."));
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let kb = knowledge_base(dir.path(), IndexMode::Replace);
        assert!(kb.build_from_text("   ").await.is_err());
        assert!(kb.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreadable_files_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("rules.txt");
        std::fs::write(&good, "Confirm every FX trade on trade date.").unwrap();
        let missing = dir.path().join("missing.txt");

        let kb = knowledge_base(dir.path(), IndexMode::Replace);
        let report = kb.build_from_files(&[good, missing.clone()]).await.unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(report.failed_sources, vec![missing.display().to_string()]);

        assert!(kb.build_from_files(&[missing]).await.is_err());
    }
}
