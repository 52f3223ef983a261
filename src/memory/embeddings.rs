use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::{
    EmbeddingProvider as EmbeddingProviderKind, ResolvedEmbedding, DEFAULT_LOCAL_MODEL,
};

use super::error::{MemoryError, MemoryResult};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A provider that turns text into dense vector embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute embeddings for a batch of texts.
    ///
    /// Returns one vector per input text, each of length [`Self::dimensions`].
    /// Callers go through [`embed_texts`], which applies the input limit.
    async fn embed_batch(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>>;

    /// Provider family, used as part of the embedding cache key.
    fn id(&self) -> &str;

    /// The model identifier used by this provider (e.g. `local-hash-v1`).
    fn model_name(&self) -> String;

    /// Fingerprint of provider settings that change the produced vectors.
    fn provider_key(&self) -> String;

    /// Dimensionality of the vectors produced by [`Self::embed_batch`].
    fn dimensions(&self) -> usize;

    /// Largest input, in whitespace tokens, the model accepts.
    fn max_input_tokens(&self) -> usize;
}

/// Type-erased wrapper so we can store any provider behind a single type.
pub type EmbeddingProviderBox = Box<dyn EmbeddingProvider>;

/// Embed `texts`, truncating each one to the provider's input limit first.
pub async fn embed_texts(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> MemoryResult<Vec<Vec<f32>>> {
    let limit = provider.max_input_tokens();
    let prepared: Vec<String> = texts
        .iter()
        .map(|t| truncate_to_tokens(t, limit).to_string())
        .collect();

    let vectors = provider.embed_batch(&prepared).await?;
    if vectors.len() != texts.len() {
        return Err(MemoryError::Embedding(format!(
            "provider returned {} vectors for {} inputs",
            vectors.len(),
            texts.len()
        )));
    }
    Ok(vectors)
}

/// Embed a single search query.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> MemoryResult<Vec<f32>> {
    let mut vectors = embed_texts(provider, &[text.to_string()]).await?;
    vectors
        .pop()
        .ok_or_else(|| MemoryError::Embedding("provider returned no vector".into()))
}

/// Keep at most `max_tokens` whitespace-delimited tokens of `text`.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    if max_tokens == 0 {
        return "";
    }
    let mut count = 0;
    let mut in_token = false;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_token && count == max_tokens {
                return &text[..idx];
            }
            in_token = false;
        } else if !in_token {
            in_token = true;
            count += 1;
        }
    }
    text
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Create an [`EmbeddingProviderBox`] from the resolved configuration.
///
/// Returns `Ok(None)` when embeddings are disabled and an error when the
/// configured provider cannot be constructed (unknown model, missing model
/// asset, feature not compiled in). The caller decides whether that error
/// is fatal based on the configured fallback.
pub fn create_provider(config: &ResolvedEmbedding) -> MemoryResult<Option<EmbeddingProviderBox>> {
    match config.provider {
        EmbeddingProviderKind::Disabled => {
            debug!("embedding provider disabled, keyword-only search");
            Ok(None)
        }
        EmbeddingProviderKind::Local => {
            if let Some(path) = &config.model_path {
                if !path.exists() {
                    return Err(MemoryError::ProviderInit(format!(
                        "model asset not found at {}",
                        path.display()
                    )));
                }
            }

            let provider: EmbeddingProviderBox = if config.model == DEFAULT_LOCAL_MODEL {
                Box::new(HashEmbeddingProvider::new(
                    config.dimensions,
                    config.max_input_tokens,
                ))
            } else {
                create_onnx_provider(config)?
            };

            info!(
                provider = provider.id(),
                model = %provider.model_name(),
                dimensions = provider.dimensions(),
                "embedding provider ready"
            );
            Ok(Some(provider))
        }
    }
}

#[cfg(feature = "fastembed")]
fn create_onnx_provider(config: &ResolvedEmbedding) -> MemoryResult<EmbeddingProviderBox> {
    Ok(Box::new(FastembedProvider::new(config)?))
}

#[cfg(not(feature = "fastembed"))]
fn create_onnx_provider(config: &ResolvedEmbedding) -> MemoryResult<EmbeddingProviderBox> {
    Err(MemoryError::ProviderInit(format!(
        "unknown local embedding model '{}' (ONNX models require the `fastembed` feature)",
        config.model
    )))
}

// ---------------------------------------------------------------------------
// Hashing model
// ---------------------------------------------------------------------------

/// Deterministic, dependency-free embedding model.
///
/// Words and their character trigrams are hashed into a fixed number of
/// buckets and the result is L2-normalised. Texts that share vocabulary
/// land close together; there is no semantic generalisation beyond that.
#[derive(Debug)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
    max_input_tokens: usize,
}

const STOP_WORDS: &[&str] = &[
    "the", "is", "at", "which", "on", "a", "an", "as", "are", "was", "were", "for", "to", "of",
    "in", "and", "or", "but", "with", "by", "from", "this", "that", "be", "have", "has", "had",
    "it", "its",
];

impl HashEmbeddingProvider {
    pub fn new(dimensions: usize, max_input_tokens: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            max_input_tokens: max_input_tokens.max(1),
        }
    }

    fn bucket(&self, bytes: &[u8], seed: u64) -> usize {
        let hash = bytes
            .iter()
            .fold(seed, |acc, b| acc.wrapping_mul(0x100_0000_01b3).wrapping_add(*b as u64));
        (hash % self.dimensions as u64) as usize
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let lower = text.to_lowercase();
        let mut freq: HashMap<&str, u32> = HashMap::new();
        for word in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        {
            *freq.entry(word).or_insert(0) += 1;
        }

        for (word, count) in &freq {
            let weight = (*count as f32).sqrt();
            embedding[self.bucket(word.as_bytes(), 0xcbf2_9ce4_8422_2325)] += weight;

            let chars: Vec<char> = word.chars().collect();
            if chars.len() > 3 {
                for window in chars.windows(3) {
                    let trigram: String = window.iter().collect();
                    embedding[self.bucket(trigram.as_bytes(), 0x8422_2325)] += weight * 0.5;
                }
            }
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn id(&self) -> &str {
        "local"
    }

    fn model_name(&self) -> String {
        DEFAULT_LOCAL_MODEL.to_string()
    }

    fn provider_key(&self) -> String {
        provider_key_for(&[DEFAULT_LOCAL_MODEL, &self.dimensions.to_string()])
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }
}

// ---------------------------------------------------------------------------
// ONNX models via fastembed
// ---------------------------------------------------------------------------

/// Runs an ONNX sentence-embedding model in process. Inference blocks the
/// calling thread, which is the worker host's own thread.
#[cfg(feature = "fastembed")]
pub struct FastembedProvider {
    model: parking_lot::Mutex<fastembed::TextEmbedding>,
    model_name: String,
    dimensions: usize,
    max_input_tokens: usize,
}

#[cfg(feature = "fastembed")]
impl FastembedProvider {
    pub fn new(config: &ResolvedEmbedding) -> MemoryResult<Self> {
        let (model, dimensions) = fastembed_model(&config.model)?;
        let mut options = fastembed::InitOptions::new(model).with_show_download_progress(false);
        if let Some(dir) = config.model_cache_dir.clone().or_else(|| config.model_path.clone()) {
            options = options.with_cache_dir(dir);
        }
        let model = fastembed::TextEmbedding::try_new(options).map_err(|e| {
            MemoryError::ProviderInit(format!("failed to load model '{}': {e}", config.model))
        })?;

        Ok(Self {
            model: parking_lot::Mutex::new(model),
            model_name: config.model.clone(),
            dimensions,
            max_input_tokens: config.max_input_tokens.min(512),
        })
    }
}

#[cfg(feature = "fastembed")]
fn fastembed_model(name: &str) -> MemoryResult<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    match name {
        "all-minilm-l6-v2" => Ok((M::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((M::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((M::BGEBaseENV15, 768)),
        "nomic-embed-text-v1.5" => Ok((M::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((M::MultilingualE5Small, 384)),
        other => Err(MemoryError::ProviderInit(format!(
            "unknown local embedding model '{other}'"
        ))),
    }
}

#[cfg(feature = "fastembed")]
#[async_trait]
impl EmbeddingProvider for FastembedProvider {
    async fn embed_batch(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
        let mut model = self.model.lock();
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| MemoryError::Embedding(e.to_string()))
    }

    fn id(&self) -> &str {
        "local"
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }

    fn provider_key(&self) -> String {
        provider_key_for(&["fastembed", &self.model_name])
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }
}

// ---------------------------------------------------------------------------
// Vector helpers
// ---------------------------------------------------------------------------

fn provider_key_for(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Cosine similarity; 0.0 for mismatched or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Encode a float vector as little-endian f32 bytes for sqlite-vec.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Parse an embedding stored as a JSON array. `None` when the payload is
/// not a well-formed array of numbers.
pub fn parse_embedding(raw: &str) -> Option<Vec<f32>> {
    serde_json::from_str::<Vec<f32>>(raw).ok()
}
