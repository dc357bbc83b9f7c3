use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Errors from the embedding provider. Transient variants are retried by the
/// indexing pipeline with bounded backoff; the rest degrade the file to
/// metadata-only.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Embedding provider error: {0}")]
    Http(String),

    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Http(_))
    }
}

/// Which embedding backend to construct. Selected by configuration, not by
/// probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local inference server speaking the Ollama embeddings API.
    Http,
    /// Deterministic hash-seeded vectors; offline and test use.
    Stub,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl HttpBackend {
    async fn embed(&self, text: &str, dimension: usize) -> ProviderResult<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.endpoint))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout)
                } else {
                    ProviderError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http(format!("{status}: {body}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if parsed.embedding.len() != dimension {
            return Err(ProviderError::InvalidResponse(format!(
                "model '{}' returned {} dimensions, expected {dimension}",
                self.model,
                parsed.embedding.len()
            )));
        }
        Ok(parsed.embedding)
    }
}

struct StubBackend;

impl StubBackend {
    fn embed(text: &str, dimension: usize) -> Vec<f32> {
        stub_embed(text, dimension)
    }
}

enum Backend {
    Http(HttpBackend),
    Stub(StubBackend),
}

/// Client for the embedding model, pinned to one model and dimension.
///
/// The two closed variants share one surface so the pipeline and the search
/// coordinator never care where vectors come from.
pub struct EmbeddingProvider {
    backend: Backend,
    dimension: usize,
}

impl EmbeddingProvider {
    /// HTTP provider against a local Ollama-compatible server.
    #[must_use]
    pub fn http(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            backend: Backend::Http(HttpBackend {
                client: reqwest::Client::new(),
                endpoint: endpoint.into(),
                model: model.into(),
                timeout,
            }),
            dimension,
        }
    }

    /// Deterministic offline provider.
    #[must_use]
    pub const fn stub(dimension: usize) -> Self {
        Self {
            backend: Backend::Stub(StubBackend),
            dimension,
        }
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        match &self.backend {
            Backend::Http(http) => http.embed(text, self.dimension).await,
            Backend::Stub(_) => Ok(StubBackend::embed(text, self.dimension)),
        }
    }

    /// Batch variant. The Ollama embeddings endpoint is single-prompt, so
    /// the HTTP backend iterates; a batching server can slot in behind the
    /// same signature.
    pub async fn embed_batch(&self, texts: &[&str]) -> ProviderResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Cosine similarity between two vectors. A zero vector or a length
/// mismatch yields 0.0, never NaN.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

/// Deterministic unit vector derived from the text. Similar inputs do not
/// produce similar vectors; equality of input is the only guarantee.
fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut state =
        fnv1a_64(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let high = (bits >> 32) as u32;
        let mantissa = high >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_vector_with_itself_is_one() {
        let v = stub_embed("some document text", 64);
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-5, "got {sim}");
    }

    #[test]
    fn cosine_of_zero_vector_is_zero_not_nan() {
        let zero = vec![0.0f32; 8];
        let other = vec![1.0f32; 8];
        let sim = cosine_similarity(&zero, &other);
        assert_eq!(sim, 0.0);
        assert!(!sim.is_nan());
    }

    #[test]
    fn cosine_of_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn stub_embeddings_are_deterministic_unit_vectors() {
        let a = stub_embed("hello", 32);
        let b = stub_embed("hello", 32);
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let c = stub_embed("goodbye", 32);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn stub_provider_honors_batch_order() {
        let provider = EmbeddingProvider::stub(16);
        let out = provider.embed_batch(&["a", "b", "a"]).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], out[2]);
        assert_ne!(out[0], out[1]);
        assert_eq!(out[0], provider.embed("a").await.unwrap());
    }

    #[test]
    fn transient_errors_are_classified() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ProviderError::Http("503".to_string()).is_transient());
        assert!(!ProviderError::InvalidResponse("short".to_string()).is_transient());
    }
}
