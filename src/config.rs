use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

const DEFAULT_CHAT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
const DEFAULT_EMBEDDING_DIMENSIONS: u64 = 768;
const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
const DEFAULT_CHUNK_SIZE: usize = 500;
const DEFAULT_CHUNK_OVERLAP: usize = 50;
const DEFAULT_TOP_K: usize = 4;

/// Configuration for the chat-completion API
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Without a key, answers come from the fallback formatter
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

/// Configuration for the Gemini embedding API
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dimensions: u64,
}

/// Configuration for Qdrant
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    /// Collection name; `None` means "derive it from the document"
    pub collection: Option<String>,
}

/// Chunking and retrieval parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Everything the pipeline needs, built once at startup
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub chat: ChatConfig,
    pub embedding: EmbeddingConfig,
    pub qdrant: QdrantConfig,
    pub retrieval: RetrievalConfig,
}

impl RagConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let chat = ChatConfig {
            api_key: var("OPENAI_API_KEY"),
            base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_CHAT_BASE_URL.to_string()),
            model: var("CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
        };

        let embedding = EmbeddingConfig {
            api_key: var("GEMINI_API_KEY").context("GEMINI_API_KEY not set")?,
            base_url: var("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_BASE_URL.to_string()),
            model: var("EMBEDDING_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            dimensions: parse_var(&var, "EMBEDDING_DIMENSIONS", DEFAULT_EMBEDDING_DIMENSIONS)?,
        };

        let qdrant = QdrantConfig {
            url: var("QDRANT_URL").unwrap_or_else(|| DEFAULT_QDRANT_URL.to_string()),
            api_key: var("QDRANT_API_KEY"),
            collection: var("RAG_COLLECTION"),
        };

        let retrieval = RetrievalConfig {
            chunk_size: parse_var(&var, "CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            chunk_overlap: parse_var(&var, "CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP)?,
            top_k: parse_var(&var, "TOP_K", DEFAULT_TOP_K)?,
        };

        Ok(RagConfig {
            chat,
            embedding,
            qdrant,
            retrieval,
        })
    }
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
