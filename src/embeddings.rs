use crate::config::EmbeddingConfig;
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// Gemini accepts at most this many texts per batch request
const MAX_BATCH_SIZE: usize = 100;

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

/// Turns text into vectors
#[allow(async_fn_in_trait)]
pub trait Embedder {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generate embeddings for multiple texts, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// Client for the Gemini embedding API
#[derive(Clone)]
pub struct GeminiEmbedder {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl GeminiEmbedder {
    /// Create a new Gemini embedding client
    pub fn new(config: EmbeddingConfig) -> Self {
        let client = reqwest::Client::new();
        GeminiEmbedder { config, client }
    }

    /// Get the client configuration
    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    fn model_path(&self) -> String {
        format!("models/{}", self.config.model)
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/{}:{}?key={}",
            self.config.base_url.trim_end_matches('/'),
            self.model_path(),
            method,
            self.config.api_key
        )
    }

    async fn post<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(self.endpoint(method))
            .json(request)
            .send()
            .await
            .with_context(|| format!("Failed to call Gemini {}", method))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "API request failed: {} {}",
                status,
                error_text
            ));
        }

        response
            .json()
            .await
            .with_context(|| format!("Invalid Gemini {} response", method))
    }
}

impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let model = self.model_path();
        let request = EmbedContentRequest::new(&model, text);

        let response: EmbedContentResponse = self.post("embedContent", &request).await?;

        Ok(Embedding {
            values: response.embedding.values,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let model = self.model_path();
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_BATCH_SIZE) {
            debug!("Embedding batch of {} texts", batch.len());

            let request = BatchEmbedRequest {
                requests: batch
                    .iter()
                    .map(|text| EmbedContentRequest::new(&model, text))
                    .collect(),
            };

            let response: BatchEmbedResponse = self.post("batchEmbedContents", &request).await?;

            if response.embeddings.len() != batch.len() {
                return Err(anyhow::anyhow!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    response.embeddings.len()
                ));
            }

            embeddings.extend(response.embeddings.into_iter().map(|e| Embedding {
                values: e.values,
            }));
        }

        Ok(embeddings)
    }
}

// Request/response structures for the Gemini embedding API

#[derive(Serialize)]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
}

impl<'a> EmbedContentRequest<'a> {
    fn new(model: &'a str, text: &'a str) -> Self {
        EmbedContentRequest {
            model,
            content: Content {
                parts: vec![Part { text }],
            },
        }
    }
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize, Debug)]
struct EmbedContentResponse {
    embedding: EmbeddingData,
}

#[derive(Deserialize, Debug)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}
