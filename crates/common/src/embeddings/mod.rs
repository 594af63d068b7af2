//! Embedding service abstraction
//!
//! Turns text into fixed-length vectors for both ingestion and query time.
//! Providers:
//! - OpenAI-compatible `/embeddings` endpoints
//! - A deterministic mock for local runs and tests
//!
//! This layer never retries provider failures; callers own retry policy.
//! The one exception is an interoperability fallback: a provider that rejects
//! the `dimensions` parameter gets the request once more without it.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a document chunk. Blank input yields an empty vector without a
    /// provider call.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a search query. Providers with asymmetric models apply a
    /// different instruction prefix here.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed(query).await
    }

    /// Embed many chunks; output positions match input positions and blank
    /// inputs map to empty vectors.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

fn with_instruction(instruction: Option<&str>, text: &str) -> String {
    match instruction {
        Some(prefix) if !prefix.is_empty() => format!("{}{}", prefix, text),
        _ => text.to_string(),
    }
}

/// OpenAI-compatible embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    send_dimensions: bool,
    query_instruction: Option<String>,
    document_instruction: Option<String>,
    base_url: String,
    batch_size: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Outcome of a single HTTP exchange, before fallback handling
enum Attempt {
    Done(Vec<Vec<f32>>),
    DimensionsRejected(String),
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder from configuration
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "embedding.api_key is required for the openai provider".to_string(),
        })?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            send_dimensions: config.send_dimensions,
            query_instruction: config.query_instruction.clone(),
            document_instruction: config.document_instruction.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            batch_size: config.batch_size.max(1),
            timeout,
        })
    }

    /// Send one request, retrying once without `dimensions` if the provider
    /// rejects that parameter.
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let dimensions = self.send_dimensions.then_some(self.dimension);

        let result = match self.make_request(texts, dimensions).await {
            Ok(Attempt::Done(vectors)) => Ok(vectors),
            Ok(Attempt::DimensionsRejected(body)) => {
                tracing::warn!(
                    model = %self.model,
                    body = %body,
                    "Provider rejected dimensions parameter, retrying without it"
                );
                match self.make_request(texts, None).await {
                    Ok(Attempt::Done(vectors)) => Ok(vectors),
                    Ok(Attempt::DimensionsRejected(body)) => Err(AppError::EmbeddingError {
                        message: format!("API error 400: {}", body),
                    }),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        metrics::record_embedding(
            start.elapsed().as_secs_f64(),
            &self.model,
            texts.len(),
            result.is_ok(),
        );

        result
    }

    async fn make_request(&self, texts: &[String], dimensions: Option<usize>) -> Result<Attempt> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAIRequest {
            input: texts,
            model: &self.model,
            dimensions,
        };

        let response = self.client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(AppError::EmbeddingRateLimited { message: body });
            }
            if status == reqwest::StatusCode::BAD_REQUEST
                && dimensions.is_some()
                && body.to_lowercase().contains("dimensions")
            {
                return Ok(Attempt::DimensionsRejected(body));
            }
            return Err(AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let mut result: OpenAIResponse = response.json().await.map_err(|e| {
            AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            }
        })?;

        if result.data.len() != texts.len() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "Provider returned {} embeddings for {} inputs",
                    result.data.len(),
                    texts.len()
                ),
            });
        }

        result.data.sort_by_key(|e| e.index);
        Ok(Attempt::Done(result.data.into_iter().map(|e| e.embedding).collect()))
    }

    fn transport_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::EmbeddingTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AppError::EmbeddingError {
                message: format!("Request failed: {}", e),
            }
        }
    }

    async fn embed_one(&self, text: String) -> Result<Vec<f32>> {
        let embeddings = self.request(std::slice::from_ref(&text)).await?;
        embeddings.into_iter().next().ok_or_else(|| AppError::EmbeddingError {
            message: "Empty response".to_string(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if is_blank(text) {
            return Ok(Vec::new());
        }
        self.embed_one(with_instruction(self.document_instruction.as_deref(), text)).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if is_blank(query) {
            return Ok(Vec::new());
        }
        self.embed_one(with_instruction(self.query_instruction.as_deref(), query)).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = vec![Vec::new(); texts.len()];

        let pending: Vec<(usize, String)> = texts
            .iter()
            .enumerate()
            .filter(|(_, text)| !is_blank(text))
            .map(|(i, text)| (i, with_instruction(self.document_instruction.as_deref(), text)))
            .collect();

        for batch in pending.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let embeddings = self.request(&inputs).await?;
            for ((position, _), embedding) in batch.iter().zip(embeddings) {
                all_embeddings[*position] = embedding;
            }
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic embedder for local runs and tests.
///
/// Vectors are derived from the SHA-256 of the text and L2-normalised, so the
/// same text always maps to the same vector. Every provider call is counted.
pub struct MockEmbedder {
    dimension: usize,
    model: String,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self::with_model("mock-embedding", dimension)
    }

    pub fn with_model(model: &str, dimension: usize) -> Self {
        Self {
            dimension,
            model: model.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of provider calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let seed = Sha256::digest(text.as_bytes());
        let mut values = Vec::with_capacity(self.dimension);
        let mut block: u32 = 0;

        while values.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update(block.to_le_bytes());
            for byte in hasher.finalize() {
                if values.len() == self.dimension {
                    break;
                }
                values.push(f32::from(byte) / 127.5 - 1.0);
            }
            block += 1;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        values
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if is_blank(text) {
            return Ok(Vec::new());
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().all(|t| is_blank(t)) {
            return Ok(vec![Vec::new(); texts.len()]);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| if is_blank(t) { Vec::new() } else { self.vector_for(t) })
            .collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "mock" => Ok(Arc::new(MockEmbedder::with_model(&config.model, config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::new(768);
        let embedding = embedder.embed("test text").await.unwrap();
        assert_eq!(embedding.len(), 768);

        let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("same text").await.unwrap();
        let b = embedder.embed("same text").await.unwrap();
        let c = embedder.embed("other text").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_blank_input_skips_provider() {
        let embedder = MockEmbedder::new(16);
        assert!(embedder.embed("").await.unwrap().is_empty());
        assert!(embedder.embed("   \n").await.unwrap().is_empty());
        assert!(embedder.embed_query("").await.unwrap().is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_mock_batch_keeps_positions() {
        let embedder = MockEmbedder::new(32);
        let texts = vec!["text1".to_string(), " ".to_string(), "text2".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 3);
        assert_eq!(embeddings[0].len(), 32);
        assert!(embeddings[1].is_empty());
        assert_eq!(embeddings[2], embedder.embed("text2").await.unwrap());
    }

    #[test]
    fn test_instruction_prefix() {
        assert_eq!(with_instruction(Some("query: "), "rust"), "query: rust");
        assert_eq!(with_instruction(Some(""), "rust"), "rust");
        assert_eq!(with_instruction(None, "rust"), "rust");
    }

    #[test]
    fn test_request_omits_dimensions_when_unset() {
        let input = vec!["a".to_string()];
        let body = serde_json::to_value(OpenAIRequest { input: &input, model: "m", dimensions: None }).unwrap();
        assert!(body.get("dimensions").is_none());

        let body = serde_json::to_value(OpenAIRequest { input: &input, model: "m", dimensions: Some(256) }).unwrap();
        assert_eq!(body["dimensions"], 256);
    }

    #[test]
    fn test_create_embedder_requires_api_key() {
        let config = EmbeddingConfig::default();
        assert!(matches!(create_embedder(&config), Err(AppError::Configuration { .. })));

        let mock = EmbeddingConfig { provider: "mock".to_string(), dimension: 8, ..EmbeddingConfig::default() };
        let embedder = create_embedder(&mock).unwrap();
        assert_eq!(embedder.dimension(), 8);
        assert_eq!(embedder.model_name(), "text-embedding-3-small");

        let unknown = EmbeddingConfig { provider: "bogus".to_string(), ..EmbeddingConfig::default() };
        assert!(create_embedder(&unknown).is_err());
    }

    #[derive(Clone, Copy)]
    enum Provider {
        RejectsDimensions,
        BadRequest,
        RateLimited,
        Slow,
    }

    /// Serve `/embeddings` on a local port; returns the base URL and a hit counter
    async fn stub_provider(provider: Provider) -> (String, Arc<AtomicUsize>) {
        use axum::{http::StatusCode, response::IntoResponse, routing::post, Json, Router};

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let app = Router::new().route(
            "/embeddings",
            post(move |Json(body): Json<serde_json::Value>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let ok = Json(serde_json::json!({
                        "data": [{ "index": 0, "embedding": [0.1, 0.2, 0.3] }]
                    }));
                    match provider {
                        Provider::RejectsDimensions if body.get("dimensions").is_some() => (
                            StatusCode::BAD_REQUEST,
                            "This model does not support 'dimensions'",
                        )
                            .into_response(),
                        Provider::RejectsDimensions => ok.into_response(),
                        Provider::BadRequest => {
                            (StatusCode::BAD_REQUEST, "input is too long").into_response()
                        }
                        Provider::RateLimited => {
                            (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response()
                        }
                        Provider::Slow => {
                            tokio::time::sleep(Duration::from_secs(3)).await;
                            ok.into_response()
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), hits)
    }

    fn openai_config(base_url: String) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "openai".to_string(),
            api_key: Some("test-key".to_string()),
            api_base: Some(base_url),
            dimension: 3,
            send_dimensions: true,
            timeout_secs: 1,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_rejected_dimensions_retries_once_without_them() {
        let (base_url, hits) = stub_provider(Provider::RejectsDimensions).await;
        let embedder = OpenAIEmbedder::new(&openai_config(base_url)).unwrap();

        let embedding = embedder.embed("hello").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_bad_requests_are_not_retried() {
        let (base_url, hits) = stub_provider(Provider::BadRequest).await;
        let embedder = OpenAIEmbedder::new(&openai_config(base_url)).unwrap();

        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingError { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_typed_error() {
        let (base_url, hits) = stub_provider(Provider::RateLimited).await;
        let embedder = OpenAIEmbedder::new(&openai_config(base_url)).unwrap();

        let err = embedder.embed_query("hello").await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingRateLimited { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_provider_maps_to_timeout() {
        let (base_url, _) = stub_provider(Provider::Slow).await;
        let embedder = OpenAIEmbedder::new(&openai_config(base_url)).unwrap();

        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingTimeout { timeout_ms: 1000 }));
    }
}
