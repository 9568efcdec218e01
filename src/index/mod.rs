//! Semantic index
//!
//! Append-only chunk store with cosine search. Documents arrive either as
//! explicit `IngestEvent`s from the enrichment pipeline or through a periodic
//! rescan of the knowledge directory. A document's chunks become visible to
//! searches all at once, under a single write lock.

pub mod chunker;
pub mod embedder;
pub mod watcher;

pub use embedder::{cosine_similarity, Embedder, EmbeddingCache, GeminiEmbedder, HashingEmbedder};
pub use watcher::spawn_watcher;

use crate::config::IndexConfig;
use crate::error::AdvisorError;
use crate::models::IndexedChunk;
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A document that is ready to be indexed
#[derive(Debug, Clone)]
pub struct IngestEvent {
    pub path: PathBuf,
    pub article_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Indexed { chunks: usize },
    /// Same content hash as the last attempt; nothing re-embedded
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum DocumentStatus {
    Pending,
    Indexed,
    Failed,
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    content_hash: String,
    status: DocumentStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub failed_documents: usize,
    pub chunks: usize,
    pub embedder: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk: Arc<IndexedChunk>,
    pub score: f32,
}

pub struct SemanticIndex {
    embedder: Arc<dyn Embedder>,
    config: IndexConfig,
    chunks: RwLock<Vec<Arc<IndexedChunk>>>,
    documents: RwLock<HashMap<String, DocumentRecord>>,
    sequence: AtomicU64,
}

impl SemanticIndex {
    pub fn new(embedder: Arc<dyn Embedder>, config: IndexConfig) -> Self {
        Self {
            embedder,
            config,
            chunks: RwLock::new(Vec::new()),
            documents: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn knowledge_dir(&self) -> &Path {
        &self.config.knowledge_dir
    }

    /// Chunk, embed and append one document.
    ///
    /// Content already seen under the same id (indexed or failed) is skipped.
    /// An embedding failure fails this document only.
    pub async fn ingest(
        &self,
        document_id: &str,
        text: &str,
        source_article: Option<Uuid>,
    ) -> Result<IngestOutcome> {
        let content_hash = hex::encode(Sha256::digest(text.as_bytes()));

        {
            let mut documents = self.documents.write().await;
            if let Some(record) = documents.get(document_id) {
                if record.content_hash == content_hash {
                    return Ok(IngestOutcome::Unchanged);
                }
            }
            documents.insert(
                document_id.to_string(),
                DocumentRecord {
                    content_hash: content_hash.clone(),
                    status: DocumentStatus::Pending,
                },
            );
        }

        let pieces = chunker::chunk_text(text, self.config.chunk_tokens, self.config.chunk_overlap_tokens);

        let mut embedded = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match self.embedder.embed(&piece).await {
                Ok(vector) => embedded.push((piece, vector)),
                Err(e) => {
                    self.set_status(document_id, DocumentStatus::Failed).await;
                    warn!(document = %document_id, "Embedding failed: {}", e);
                    return Err(AdvisorError::Embedding(format!("{}: {}", document_id, e)));
                }
            }
        }

        let count = embedded.len();
        {
            let mut chunks = self.chunks.write().await;
            let now = Utc::now();
            for (text, embedding) in embedded {
                chunks.push(Arc::new(IndexedChunk {
                    document_id: document_id.to_string(),
                    text,
                    embedding,
                    source_article,
                    sequence: self.sequence.fetch_add(1, AtomicOrdering::SeqCst),
                    ingested_at: now,
                }));
            }
        }

        self.set_status(document_id, DocumentStatus::Indexed).await;
        info!(document = %document_id, chunks = count, "Document indexed");

        Ok(IngestOutcome::Indexed { chunks: count })
    }

    /// Read and ingest a file; the file name is the document id.
    pub async fn ingest_file(&self, path: &Path, source_article: Option<Uuid>) -> Result<IngestOutcome> {
        let document_id = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| AdvisorError::Index(format!("not a file path: {}", path.display())))?;

        let text = tokio::fs::read_to_string(path).await?;
        self.ingest(&document_id, &text, source_article).await
    }

    /// Pick up new or changed `.txt`/`.md` files in the knowledge directory.
    /// Staging files (`*.txt.tmp`) are skipped until renamed into place.
    /// Returns how many documents were (re)indexed.
    pub async fn rescan(&self) -> Result<usize> {
        let dir = self.config.knowledge_dir.clone();
        tokio::fs::create_dir_all(&dir).await?;

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let indexable = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"))
                .unwrap_or(false);
            if indexable && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut indexed = 0;
        for path in paths {
            match self.ingest_file(&path, None).await {
                Ok(IngestOutcome::Indexed { .. }) => indexed += 1,
                Ok(IngestOutcome::Unchanged) => {}
                Err(e) => warn!(path = %path.display(), "Rescan skipped document: {}", e),
            }
        }

        if indexed > 0 {
            debug!(indexed, "Rescan picked up documents");
        }
        Ok(indexed)
    }

    /// Top `top_k` chunks by cosine similarity, ties going to the most
    /// recently ingested chunk.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;

        let chunks = self.chunks.read().await;
        let mut hits: Vec<SearchHit> = chunks
            .iter()
            .map(|chunk| SearchHit {
                score: cosine_similarity(&query_vector, &chunk.embedding),
                chunk: Arc::clone(chunk),
            })
            .collect();
        drop(chunks);

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.chunk.sequence.cmp(&a.chunk.sequence))
        });
        hits.truncate(top_k);

        Ok(hits)
    }

    pub async fn stats(&self) -> IndexStats {
        let documents = self.documents.read().await;
        let chunks = self.chunks.read().await.len();

        IndexStats {
            documents: documents
                .values()
                .filter(|d| d.status == DocumentStatus::Indexed)
                .count(),
            failed_documents: documents
                .values()
                .filter(|d| d.status == DocumentStatus::Failed)
                .count(),
            chunks,
            embedder: self.embedder.name(),
        }
    }

    async fn set_status(&self, document_id: &str, status: DocumentStatus) {
        let mut documents = self.documents.write().await;
        if let Some(record) = documents.get_mut(document_id) {
            record.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn config(dir: &Path) -> IndexConfig {
        IndexConfig {
            knowledge_dir: dir.to_path_buf(),
            chunk_tokens: 20,
            chunk_overlap_tokens: 4,
            rescan_interval_secs: 1,
            embedding_dimension: 256,
        }
    }

    /// Counts calls; fails on any text containing "POISON"
    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if text.contains("POISON") {
                return Err(AdvisorError::Embedding("refused".into()));
            }
            self.inner.embed(text).await
        }
    }

    fn counting() -> Arc<CountingEmbedder> {
        Arc::new(CountingEmbedder {
            inner: HashingEmbedder::new(1024),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_search_ranks_matching_document_first() {
        let dir = tempfile::tempdir().unwrap();
        let index = SemanticIndex::new(Arc::new(HashingEmbedder::new(1024)), config(dir.path()));

        index
            .ingest("infy.txt", "STOCK: INFY Infosys wins large deal", None)
            .await
            .unwrap();
        index
            .ingest("tcs.txt", "STOCK: TCS Tata Consultancy hiring update", None)
            .await
            .unwrap();

        let hits = index.search("INFY", 5).await.unwrap();
        assert_eq!(hits[0].chunk.document_id, "infy.txt");
        assert!(hits[0].score > 0.0);
        assert!(index.search("", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ties_prefer_recent_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let index = SemanticIndex::new(Arc::new(HashingEmbedder::new(1024)), config(dir.path()));

        index.ingest("old.txt", "same words here", None).await.unwrap();
        index.ingest("new.txt", "same words here", None).await.unwrap();

        let hits = index.search("same words", 2).await.unwrap();
        assert_eq!(hits[0].chunk.document_id, "new.txt");
        assert!(hits[0].chunk.sequence > hits[1].chunk.sequence);
    }

    #[tokio::test]
    async fn test_unchanged_content_is_not_reembedded() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = counting();
        let index = SemanticIndex::new(embedder.clone(), config(dir.path()));

        let first = index.ingest("a.txt", "alpha beta gamma", None).await.unwrap();
        let calls = embedder.calls.load(AtomicOrdering::SeqCst);
        let second = index.ingest("a.txt", "alpha beta gamma", None).await.unwrap();

        assert_eq!(first, IngestOutcome::Indexed { chunks: 1 });
        assert_eq!(second, IngestOutcome::Unchanged);
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), calls);

        // Changed content appends alongside the old chunks
        index.ingest("a.txt", "alpha beta delta", None).await.unwrap();
        assert_eq!(index.stats().await.chunks, 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_only_fails_that_document() {
        let dir = tempfile::tempdir().unwrap();
        let index = SemanticIndex::new(counting(), config(dir.path()));

        let bad = index.ingest("bad.txt", "POISON pill", None).await;
        assert!(matches!(bad, Err(AdvisorError::Embedding(_))));
        index.ingest("good.txt", "healthy content", None).await.unwrap();

        let stats = index.stats().await;
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.failed_documents, 1);
        assert_eq!(stats.chunks, 1);
        // Failed content is not retried until it changes
        assert_eq!(
            index.ingest("bad.txt", "POISON pill", None).await.unwrap(),
            IngestOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_rescan_picks_up_new_and_changed_files() {
        let dir = tempfile::tempdir().unwrap();
        let index = SemanticIndex::new(Arc::new(HashingEmbedder::new(1024)), config(dir.path()));

        std::fs::write(dir.path().join("note.md"), "user dropped research note").unwrap();
        std::fs::write(dir.path().join("image.png"), "not text").unwrap();

        assert_eq!(index.rescan().await.unwrap(), 1);
        assert_eq!(index.rescan().await.unwrap(), 0);

        std::fs::write(dir.path().join("note.md"), "user dropped research note, revised").unwrap();
        assert_eq!(index.rescan().await.unwrap(), 1);
        assert_eq!(index.stats().await.documents, 1);
    }

    #[tokio::test]
    async fn test_rescan_ignores_article_still_being_written() {
        let dir = tempfile::tempdir().unwrap();
        let index = SemanticIndex::new(Arc::new(HashingEmbedder::new(1024)), config(dir.path()));
        let full = "STOCK: INFY - Infosys TITLE: Infosys wins a large deal";
        let staging = dir.path().join("INFY_1_1.txt.tmp");
        let target = dir.path().join("INFY_1_1.txt");

        // Only the first bytes have reached the staging file
        std::fs::write(&staging, &full[..30]).unwrap();
        assert_eq!(index.rescan().await.unwrap(), 0);
        assert_eq!(index.stats().await.chunks, 0);

        std::fs::write(&staging, full).unwrap();
        std::fs::rename(&staging, &target).unwrap();
        assert_eq!(index.rescan().await.unwrap(), 1);

        let hits = index.search("INFY", 10).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.chunk.document_id == "INFY_1_1.txt"));
        assert!(hits.iter().all(|h| h.chunk.text != &full[..30]));
        assert_eq!(index.stats().await.documents, 1);
    }

    #[tokio::test]
    async fn test_long_document_is_chunked() {
        let dir = tempfile::tempdir().unwrap();
        let index = SemanticIndex::new(Arc::new(HashingEmbedder::new(1024)), config(dir.path()));
        let text = "market ".repeat(100);

        match index.ingest("long.txt", &text, None).await.unwrap() {
            IngestOutcome::Indexed { chunks } => assert!(chunks > 1),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
