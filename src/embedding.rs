//! Embedding providers.
//!
//! Concrete [`Embedder`] implementations selected by `embedding.provider`:
//! - **[`OpenAiEmbedder`]**: `POST /v1/embeddings` with retry and backoff.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: fastembed inference (feature `local-embeddings-fastembed`);
//!   no network calls after the first model download.
//! - **[`HashEmbedder`]**: deterministic feature hashing, offline.
//!
//! # Retry Strategy
//!
//! The HTTP providers retry transient failures up to `max_retries` times:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use ragx_core::embedding::{Embedder, HashEmbedder, DEFAULT_HASH_DIMS};

use crate::config::EmbeddingConfig;

/// Model used when `provider = "local"` and no model is configured.
pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Instantiate the provider named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (needs `--features local-embeddings-fastembed`) |
/// | `"hash"` | [`HashEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(local::LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "local embedding provider requires --features local-embeddings-fastembed \
             (or use provider = \"hash\" for offline runs)"
        ),
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        other => bail!("unknown embedding provider: {}", other),
    }
}

/// Model name a provider would report, without constructing it.
///
/// Used to compare a configured model against an index's `info.json`
/// before any network client or model file is touched.
pub fn configured_model_name(config: &EmbeddingConfig) -> String {
    match config.provider() {
        "hash" => HashEmbedder::new(config.dims.unwrap_or(DEFAULT_HASH_DIMS))
            .model_name()
            .to_string(),
        "local" => config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string()),
        _ => config.model.clone().unwrap_or_default(),
    }
}

// ============ HTTP plumbing ============

/// Shared retry loop for the JSON-over-HTTP providers.
struct HttpEmbedClient {
    client: reqwest::Client,
    endpoint: String,
    bearer: Option<String>,
    max_retries: u32,
    label: &'static str,
}

impl HttpEmbedClient {
    fn new(
        endpoint: String,
        bearer: Option<String>,
        config: &EmbeddingConfig,
        label: &'static str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            bearer,
            max_retries: config.max_retries,
            label,
        })
    }

    async fn post(&self, body: &serde_json::Value) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                tracing::debug!(
                    provider = self.label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying embedding request"
                );
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .client
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(token) = &self.bearer {
                req = req.header("Authorization", format!("Bearer {}", token));
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .with_context(|| format!("invalid {} response body", self.label));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if is_retryable(status) {
                        last_err = Some(anyhow::anyhow!(
                            "{} API error {}: {}",
                            self.label,
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!("{} API error {}: {}", self.label, status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "{} request to {} failed: {}",
                        self.label,
                        self.endpoint,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", self.label)))
    }
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

// ============ OpenAI ============

/// Embeddings from the OpenAI API. Requires `OPENAI_API_KEY`.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    http: HttpEmbedClient,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let base = config.url.as_deref().unwrap_or(OPENAI_URL);
        let endpoint = format!("{}/v1/embeddings", base.trim_end_matches('/'));
        let http = HttpEmbedClient::new(endpoint, Some(api_key), config, "OpenAI")?;

        Ok(Self { model, dims, http })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self.http.post(&body).await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow::anyhow!("invalid OpenAI response: missing embedding"))?;
        indexed.push((index, json_to_vector(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embeddings from a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    http: HttpEmbedClient,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let base = config.url.as_deref().unwrap_or(OLLAMA_URL);
        let endpoint = format!("{}/api/embed", base.trim_end_matches('/'));
        let http = HttpEmbedClient::new(endpoint, None, config, "Ollama")?;

        Ok(Self { model, dims, http })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self.http.post(&body).await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid Ollama response: missing embeddings array"))?;

    embeddings.iter().map(json_to_vector).collect()
}

/// Non-numeric entries (e.g. `null` for a NaN the server could not encode)
/// become NaN and are sanitized downstream.
fn json_to_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("embedding is not an array"))?;
    Ok(items
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32).unwrap_or(f32::NAN))
        .collect())
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use super::*;
    use std::sync::Mutex;

    /// fastembed inference. The model is loaded on first use and reused.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        kind: fastembed::EmbeddingModel,
        batch_size: usize,
        model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
            let kind = to_fastembed_model(&model_name)?;
            let dims = config.dims.unwrap_or_else(|| default_dims(&model_name));
            Ok(Self {
                model_name,
                dims,
                kind,
                batch_size: config.batch_size,
                model: Arc::new(Mutex::new(None)),
            })
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let slot = Arc::clone(&self.model);
            let kind = self.kind.clone();
            let batch_size = self.batch_size;
            let texts = texts.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut guard = slot
                    .lock()
                    .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
                if guard.is_none() {
                    tracing::info!(model = ?kind, "loading local embedding model");
                    let model = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(kind).with_show_download_progress(true),
                    )
                    .map_err(|e| {
                        anyhow::anyhow!("failed to initialize local embedding model: {}", e)
                    })?;
                    *guard = Some(model);
                }
                let model = guard
                    .as_mut()
                    .ok_or_else(|| anyhow::anyhow!("local embedding model not loaded"))?;
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow::anyhow!("local embedding failed: {}", e))
            })
            .await?
        }
    }

    fn default_dims(name: &str) -> usize {
        match name {
            "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
            "bge-large-en-v1.5" => 1024,
            _ => 384,
        }
    }

    fn to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2)
            }
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            other => bail!(
                "unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1, nomic-embed-text-v1.5",
                other
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn hash_config(dims: Option<usize>) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: Some("hash".into()),
            dims,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_missing_data() {
        let err = parse_openai_response(&serde_json::json!({"error": "x"})).unwrap_err();
        assert!(err.to_string().contains("missing data array"));
    }

    #[test]
    fn test_parse_ollama_null_component_becomes_nan() {
        let json = serde_json::json!({"embeddings": [[0.5, null], [1.0, 2.0]]});
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0][0], 0.5);
        assert!(vectors[0][1].is_nan());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(20), Duration::from_secs(32));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_retryable(reqwest::StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_create_hash_embedder() {
        let embedder = create_embedder(&hash_config(Some(32))).unwrap();
        assert_eq!(embedder.dims(), 32);
        assert_eq!(embedder.model_name(), "hash-fnv1a-32");
        assert_eq!(configured_model_name(&hash_config(Some(32))), "hash-fnv1a-32");

        let vectors = embedder.embed(&["alpha beta".to_string()]).await.unwrap();
        assert_eq!(vectors[0].len(), 32);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let cfg = EmbeddingConfig {
            provider: Some("bert".into()),
            ..Default::default()
        };
        assert!(create_embedder(&cfg).is_err());
    }

    #[cfg(not(feature = "local-embeddings-fastembed"))]
    #[test]
    fn test_local_without_feature_explains() {
        let err = create_embedder(&EmbeddingConfig::default()).err().unwrap();
        assert!(err.to_string().contains("local-embeddings-fastembed"));
    }

    #[test]
    fn test_ollama_requires_model_and_dims() {
        let cfg = EmbeddingConfig {
            provider: Some("ollama".into()),
            model: Some("nomic-embed-text".into()),
            ..Default::default()
        };
        let err = OllamaEmbedder::new(&cfg).err().unwrap();
        assert!(err.to_string().contains("embedding.dims"));
    }

    /// Serve `responses` in order, one per connection, then stop.
    async fn scripted_server(responses: Vec<(u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 64 * 1024];
                let mut read = 0;
                loop {
                    let n = socket.read(&mut buf[read..]).await.unwrap();
                    read += n;
                    let head = String::from_utf8_lossy(&buf[..read]).to_string();
                    if let Some(end) = head.find("\r\n\r\n") {
                        let len = head
                            .lines()
                            .find_map(|l| {
                                l.to_ascii_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap())
                            })
                            .unwrap_or(0);
                        if read >= end + 4 + len {
                            break;
                        }
                    }
                    if n == 0 {
                        break;
                    }
                }
                let reply = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{}", addr)
    }

    fn ollama_config(url: String, max_retries: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: Some("ollama".into()),
            model: Some("nomic-embed-text".into()),
            dims: Some(2),
            url: Some(url),
            max_retries,
            timeout_secs: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ollama_retries_server_error_once() {
        let url = scripted_server(vec![
            (500, "{}".to_string()),
            (200, r#"{"embeddings": [[0.6, 0.8]]}"#.to_string()),
        ])
        .await;
        let embedder = OllamaEmbedder::new(&ollama_config(url, 1)).unwrap();
        let vectors = embedder.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![0.6, 0.8]]);
    }

    #[tokio::test]
    async fn test_ollama_client_error_not_retried() {
        let url = scripted_server(vec![(400, r#"{"error":"bad model"}"#.to_string())]).await;
        let embedder = OllamaEmbedder::new(&ollama_config(url, 1)).unwrap();
        let err = embedder.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("400"));
    }
}
