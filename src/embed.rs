use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

use crate::models::Vector;
use crate::similarity::normalize;

/// Anything that turns texts into vectors, one per text, in order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>>;
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(base: &str, model: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let mut url = Url::parse(base).with_context(|| format!("Invalid embedding endpoint {}", base))?;
        if !url.path().ends_with("/embeddings") {
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            url = url.join("embeddings").context("Building embeddings URL")?;
        }
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: url,
            model: model.into(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = std::time::Instant::now();
        debug!("Requesting embeddings - endpoint={}, texts={}", self.endpoint, texts.len());

        let mut req = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "model": self.model, "input": texts }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("Request failed for {}", self.endpoint))?
            .error_for_status()
            .with_context(|| format!("HTTP error for {}", self.endpoint))?;
        let mut body: EmbeddingResponse = resp
            .json()
            .await
            .with_context(|| format!("Decoding embeddings from {}", self.endpoint))?;

        if body.data.len() != texts.len() {
            bail!("Embedding count mismatch - sent={}, received={}", texts.len(), body.data.len());
        }
        body.data.sort_by_key(|d| d.index);
        info!(
            "Embedding call completed - duration={:.2}s, texts={}",
            start.elapsed().as_secs_f32(),
            texts.len()
        );
        Ok(body.data.into_iter().map(|d| normalize(&d.embedding)).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Unbounded,
    /// Oldest insert goes first.
    Fifo { capacity: usize },
    /// Least recently read or written goes first.
    Lru { capacity: usize },
}

/// Per-run embedding cache keyed by text hash.
#[derive(Debug)]
pub struct EmbeddingCache {
    policy: EvictionPolicy,
    entries: HashMap<u64, Vector>,
    order: VecDeque<u64>,
    hits: usize,
    misses: usize,
}

impl EmbeddingCache {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn key(text: &str) -> u64 {
        xxh3_64(text.as_bytes())
    }

    fn touch(&mut self, key: u64) {
        if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key);
    }

    pub fn get(&mut self, text: &str) -> Option<Vector> {
        let key = Self::key(text);
        match self.entries.get(&key).cloned() {
            Some(v) => {
                self.hits += 1;
                if matches!(self.policy, EvictionPolicy::Lru { .. }) {
                    self.touch(key);
                }
                Some(v)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, text: &str, vector: Vector) {
        let key = Self::key(text);
        let fresh = self.entries.insert(key, vector).is_none();
        match self.policy {
            EvictionPolicy::Unbounded => return,
            EvictionPolicy::Fifo { .. } if !fresh => return,
            _ => self.touch(key),
        }
        let capacity = match self.policy {
            EvictionPolicy::Fifo { capacity } | EvictionPolicy::Lru { capacity } => capacity,
            EvictionPolicy::Unbounded => usize::MAX,
        };
        while self.entries.len() > capacity {
            match self.order.pop_front() {
                Some(old) => {
                    self.entries.remove(&old);
                }
                None => break,
            }
        }
    }

    pub fn contains(&self, text: &str) -> bool {
        self.entries.contains_key(&Self::key(text))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

/// Embed `texts`, calling the provider once for the cache misses only.
pub async fn embed_with_cache<P: EmbeddingProvider + ?Sized>(
    provider: &P,
    cache: &mut EmbeddingCache,
    texts: &[String],
) -> Result<Vec<Vector>> {
    let mut out: Vec<Option<Vector>> = texts.iter().map(|t| cache.get(t)).collect();
    let mut missing: Vec<String> = Vec::new();
    for (t, slot) in texts.iter().zip(out.iter()) {
        if slot.is_none() && !missing.contains(t) {
            missing.push(t.clone());
        }
    }
    debug!("Embedding cache lookup - texts={}, misses={}", texts.len(), missing.len());

    let mut fetched: HashMap<String, Vector> = HashMap::new();
    if !missing.is_empty() {
        let vectors = provider.embed(&missing).await?;
        if vectors.len() != missing.len() {
            bail!("Provider returned {} vectors for {} texts", vectors.len(), missing.len());
        }
        for (t, v) in missing.into_iter().zip(vectors) {
            cache.insert(&t, v.clone());
            fetched.insert(t, v);
        }
    }

    texts
        .iter()
        .zip(out.iter_mut())
        .map(|(t, slot)| {
            slot.take()
                .or_else(|| fetched.get(t).cloned())
                .with_context(|| format!("No embedding for text {:?}", t))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        texts: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f64, 1.0]).collect())
        }
    }

    fn texts(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn only_misses_reach_the_provider() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        };
        let mut cache = EmbeddingCache::new(EvictionPolicy::Unbounded);
        let first = embed_with_cache(&provider, &mut cache, &texts(&["a", "bb", "a"])).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], first[2]);
        assert_eq!(provider.texts.load(Ordering::SeqCst), 2);

        let second = embed_with_cache(&provider, &mut cache, &texts(&["bb", "ccc"])).await.unwrap();
        assert_eq!(second[0], vec![2.0, 1.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.texts.load(Ordering::SeqCst), 3);
        assert!(cache.hits() >= 1);
    }

    #[test]
    fn fifo_evicts_oldest_insert() {
        let mut cache = EmbeddingCache::new(EvictionPolicy::Fifo { capacity: 2 });
        cache.insert("a", vec![1.0]);
        cache.insert("b", vec![2.0]);
        assert!(cache.get("a").is_some());
        cache.insert("c", vec![3.0]);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b") && cache.contains("c"));
    }

    #[test]
    fn lru_keeps_recently_read() {
        let mut cache = EmbeddingCache::new(EvictionPolicy::Lru { capacity: 2 });
        cache.insert("a", vec![1.0]);
        cache.insert("b", vec![2.0]);
        assert!(cache.get("a").is_some());
        cache.insert("c", vec![3.0]);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.misses(), 0);
    }

    #[test]
    fn endpoint_gets_embeddings_path() {
        let e = HttpEmbedder::new("http://localhost:8080/v1", "m", None).unwrap();
        assert_eq!(e.endpoint().as_str(), "http://localhost:8080/v1/embeddings");
        let e = HttpEmbedder::new("http://localhost:8080/v1/embeddings", "m", None).unwrap();
        assert_eq!(e.endpoint().as_str(), "http://localhost:8080/v1/embeddings");
        assert!(HttpEmbedder::new("not a url", "m", None).is_err());
    }
}
