//! Embedding collaborators

use crate::gemini::GeminiClient;
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Turns text into a fixed-dimension vector
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &'static str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Local feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dimension`
/// buckets with a hash-derived sign; the vector is L2-normalized. Texts that
/// share tokens score above zero, texts that share none score zero.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        let index = (u64::from_be_bytes(word) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &'static str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokens(text) {
            let (index, sign) = self.bucket(&token);
            vector[index] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }

        Ok(vector)
    }
}

/// Entries kept by [`GeminiEmbedder`] before the oldest are evicted
pub const DEFAULT_EMBEDDING_CACHE_CAPACITY: usize = 1024;

/// Text to embedding map holding at most `capacity` entries, evicting the
/// oldest insert first
#[derive(Debug)]
pub struct EmbeddingCache {
    capacity: usize,
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, text: &str) -> Option<&Vec<f32>> {
        self.entries.get(text)
    }

    pub fn insert(&mut self, text: &str, embedding: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(text.to_string(), embedding).is_some() {
            return;
        }
        self.order.push_back(text.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Gemini `text-embedding-004`, with a bounded in-memory cache keyed by text
pub struct GeminiEmbedder {
    client: GeminiClient,
    cache: Arc<RwLock<EmbeddingCache>>,
}

impl GeminiEmbedder {
    pub fn new(client: GeminiClient) -> Self {
        Self::with_cache_capacity(client, DEFAULT_EMBEDDING_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(client: GeminiClient, capacity: usize) -> Self {
        Self {
            client,
            cache: Arc::new(RwLock::new(EmbeddingCache::new(capacity))),
        }
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn dimension(&self) -> usize {
        768
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        {
            let cache = self.cache.read().await;
            if let Some(embedding) = cache.get(text) {
                return Ok(embedding.clone());
            }
        }

        let embedding = self.client.embed(text).await?;
        debug!(dimension = embedding.len(), "Generated embedding");

        self.cache.write().await.insert(text, embedding.clone());

        Ok(embedding)
    }
}

/// Cosine similarity; 0 for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '&'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}
