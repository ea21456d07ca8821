//! Embedding strategies and vector utilities.
//!
//! Two interchangeable strategies produce vectors of the configured
//! dimension:
//!
//! - **External**: calls an OpenAI-compatible embeddings API with batching,
//!   bounded timeout, and exponential-backoff retry. Any failure (including
//!   missing credentials) degrades to the local strategy instead of failing
//!   the run.
//! - **Local**: a deterministic hash embedding, FNV-1a token hashing into
//!   `dimension` buckets with log-damped term-frequency weights, then
//!   L2 normalization. Identical text and dimension always produce
//!   bit-identical vectors.
//!
//! Retry classification is a typed [`ProviderError`] and the backoff
//! schedule is a pure [`BackoffPolicy`], so the retry policy is testable
//! without any I/O.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::models::EmbedMode;

// ============ Local deterministic embedding ============

/// Lowercase, map control characters to spaces, split on runs of
/// non-alphanumeric characters.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// FNV-1a 32-bit hash over the string's bytes.
pub fn fnv1a(s: &str) -> u32 {
    let mut h: u32 = 0x811c9dc5;
    for &b in s.as_bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(0x01000193);
    }
    h
}

/// Deterministic hash embedding of `text` into a `dim`-length unit vector.
///
/// Each distinct token accumulates `1 + ln(1 + tf)` into bucket
/// `fnv1a(token) % dim`; collisions simply sum. The result is
/// L2-normalized, except that a tokenless input returns the zero vector.
pub fn hash_embed(text: &str, dim: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dim];
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return vec;
    }

    // BTreeMap so bucket accumulation order (and thus float rounding) is
    // identical on every run.
    let mut tf: BTreeMap<String, u64> = BTreeMap::new();
    for t in tokens {
        *tf.entry(t).or_insert(0) += 1;
    }

    for (token, freq) in &tf {
        let idx = (fnv1a(token) as usize) % dim;
        let weight = 1.0 + (1.0 + *freq as f32).ln();
        vec[idx] += weight;
    }

    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vec {
            *v /= norm;
        }
    }

    vec
}

/// Compute cosine similarity between two vectors.
///
/// `dot(a,b) / (‖a‖·‖b‖ + 1e-12)`; the epsilon keeps degenerate
/// (all-zero) vectors at similarity 0 instead of dividing by zero.
/// Returns 0.0 for empty or differently-sized inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt() + 1e-12)
}

// ============ Retry policy ============

/// Error taxonomy for external provider calls.
///
/// Retryable errors (rate limits, server errors, transport failures) are
/// retried under the [`BackoffPolicy`]; fatal errors stop immediately.
/// Either way, exhaustion degrades to the local strategy.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("retryable provider error: {message}")]
    Retryable {
        message: String,
        /// Server-supplied retry hint (e.g. from a `Retry-After` header).
        retry_after: Option<Duration>,
    },
    #[error("fatal provider error: {0}")]
    Fatal(String),
}

/// Exponential backoff schedule for retryable provider errors.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(32),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// Doubles from `base` per attempt, bounded by `cap`. A server hint
    /// takes precedence but is also bounded by `cap`.
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(h) = hint {
            return h.min(self.cap);
        }
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self.base.saturating_mul(1u32 << exp);
        backoff.min(self.cap)
    }
}

// ============ Embedder ============

/// Embedding front end holding the full resolved configuration.
///
/// Constructed once from [`EmbeddingConfig`]; credentials are resolved here
/// and nothing else reads the environment. If external mode is configured
/// but no API key is present, the embedder demotes itself to local mode up
/// front so headers record what was actually used.
pub struct Embedder {
    mode: EmbedMode,
    model: String,
    dims: usize,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    backoff: BackoffPolicy,
}

impl Embedder {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());

        let mode = match config.mode {
            EmbedMode::External if api_key.is_none() => {
                warn!("OPENAI_API_KEY not set; falling back to local embeddings");
                EmbedMode::Local
            }
            m => m,
        };

        Self {
            mode,
            model: config.model.clone(),
            dims: config.dimension,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
            backoff: BackoffPolicy {
                max_retries: config.max_retries,
                ..BackoffPolicy::default()
            },
        }
    }

    /// The model identifier recorded in index headers:
    /// the provider model in external mode, `hash-<dim>` in local mode.
    pub fn model_name(&self) -> String {
        match self.mode {
            EmbedMode::Local => format!("hash-{}", self.dims),
            EmbedMode::External => self.model.clone(),
        }
    }

    /// Effective embedding mode after credential resolution.
    pub fn mode(&self) -> EmbedMode {
        self.mode
    }

    /// Vector dimensionality; identical for both strategies.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed a batch of texts, one vector per input, preserving order.
    ///
    /// In external mode, a batch that still fails after retries is embedded
    /// locally instead, a degraded but functional baseline, so indexing
    /// always completes.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match self.mode {
            EmbedMode::Local => Ok(self.embed_local(texts)),
            EmbedMode::External => match self.embed_external(texts).await {
                Ok(vectors) => Ok(vectors),
                Err(e) => {
                    warn!("external embedding failed ({}); using local fallback", e);
                    Ok(self.embed_local(texts))
                }
            },
        }
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    fn embed_local(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| hash_embed(t, self.dims)).collect()
    }

    async fn embed_external(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProviderError::Fatal(format!("http client: {}", e)))?;

        let mut last_err: Option<ProviderError> = None;

        for attempt in 0..=self.backoff.max_retries {
            if attempt > 0 {
                let hint = match &last_err {
                    Some(ProviderError::Retryable { retry_after, .. }) => *retry_after,
                    _ => None,
                };
                tokio::time::sleep(self.backoff.delay(attempt, hint)).await;
            }

            match self.request_embeddings(&client, texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e @ ProviderError::Fatal(_)) => return Err(e),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| ProviderError::Fatal("embedding failed after retries".into())))
    }

    /// One attempt against `POST {endpoint}/v1/embeddings`.
    async fn request_embeddings(
        &self,
        client: &reqwest::Client,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Fatal("no API key".into()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dims,
        });

        let resp = client
            .post(format!("{}/v1/embeddings", self.endpoint))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Retryable {
                message: format!("transport error: {}", e),
                retry_after: None,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body_text = resp.text().await.unwrap_or_default();

            // Rate limits and server errors are transient; other client
            // errors are not worth retrying.
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(ProviderError::Retryable {
                    message: format!("provider error {}: {}", status, body_text),
                    retry_after,
                });
            }
            return Err(ProviderError::Fatal(format!(
                "provider error {}: {}",
                status, body_text
            )));
        }

        let parsed: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Fatal(format!("invalid provider response: {}", e)))?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        if data.len() != texts.len() {
            return Err(ProviderError::Fatal(format!(
                "provider returned {} vectors for {} inputs",
                data.len(),
                texts.len()
            )));
        }
        for d in &data {
            if d.embedding.len() != self.dims {
                return Err(ProviderError::Fatal(format!(
                    "provider returned dimension {} (expected {})",
                    d.embedding.len(),
                    self.dims
                )));
            }
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(serde::Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(serde::Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_reference_vectors() {
        // Published FNV-1a 32-bit test vectors.
        assert_eq!(fnv1a(""), 0x811c9dc5);
        assert_eq!(fnv1a("a"), 0xe40c292c);
        assert_eq!(fnv1a("foobar"), 0xbf9cf968);
    }

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        let toks = tokenize("Hello, World! rust-lang\t2024");
        assert_eq!(toks, vec!["hello", "world", "rust", "lang", "2024"]);
    }

    #[test]
    fn test_tokenize_empty_and_symbols() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("!!! --- ???").is_empty());
    }

    #[test]
    fn test_hash_embed_deterministic() {
        let a = hash_embed("the quick brown fox", 256);
        let b = hash_embed("the quick brown fox", 256);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_embed_unit_norm() {
        let v = hash_embed("some tokens here and here again", 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {}", norm);
    }

    #[test]
    fn test_hash_embed_no_tokens_zero_vector() {
        let v = hash_embed("—— !!", 32);
        assert_eq!(v.len(), 32);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_hash_embed_term_frequency_dampens() {
        // A repeated token accumulates 1 + ln(1 + tf) once, not tf times.
        let once = hash_embed("cat", 16);
        let thrice = hash_embed("cat cat cat", 16);
        // Both are unit vectors concentrated in the same single bucket.
        assert_eq!(once, thrice);
    }

    #[test]
    fn test_cosine_symmetry_and_self_similarity() {
        let a = hash_embed("alpha beta gamma", 128);
        let b = hash_embed("delta epsilon", 128);
        assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-7);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_zero_not_nan() {
        let zero = vec![0.0; 8];
        let v = hash_embed("something", 8);
        let sim = cosine_similarity(&zero, &v);
        assert_eq!(sim, 0.0);
        assert!(!sim.is_nan());
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1, None), Duration::from_secs(1));
        assert_eq!(policy.delay(2, None), Duration::from_secs(2));
        assert_eq!(policy.delay(3, None), Duration::from_secs(4));
        assert_eq!(policy.delay(6, None), Duration::from_secs(32));
        // Stays capped well past the doubling range.
        assert_eq!(policy.delay(40, None), Duration::from_secs(32));
    }

    #[test]
    fn test_backoff_honors_server_hint_within_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.delay(1, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.delay(1, Some(Duration::from_secs(600))),
            Duration::from_secs(32)
        );
    }

    #[tokio::test]
    async fn test_embedder_local_batch_preserves_order() {
        let config = EmbeddingConfig {
            dimension: 64,
            ..EmbeddingConfig::default()
        };
        let embedder = Embedder::from_config(&config);
        let texts = vec![
            "first text".to_string(),
            "second text".to_string(),
            "third text".to_string(),
        ];
        let vectors = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], hash_embed("first text", 64));
        assert_eq!(vectors[1], hash_embed("second text", 64));
        assert_eq!(vectors[2], hash_embed("third text", 64));
    }

    #[test]
    fn test_local_model_name_encodes_dimension() {
        let config = EmbeddingConfig {
            dimension: 256,
            ..EmbeddingConfig::default()
        };
        let embedder = Embedder::from_config(&config);
        assert_eq!(embedder.model_name(), "hash-256");
        assert_eq!(embedder.mode(), EmbedMode::Local);
    }
}
