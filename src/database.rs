use crate::chunking::Chunk;
use crate::config::QdrantConfig;
use crate::embeddings::Embedder;
use crate::tokenizer::estimate_token_count;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Metadata stored next to each document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub page_number: u32,
    pub chunk_id: String,
}

impl From<&Chunk> for ChunkMetadata {
    fn from(chunk: &Chunk) -> Self {
        ChunkMetadata {
            page_number: chunk.page_number(),
            chunk_id: chunk.chunk_id().to_string(),
        }
    }
}

/// A chunk returned by a similarity query
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// 1-based position in the result list, most similar first
    pub rank: usize,
    pub score: f32,
}

/// Stores documents and finds the ones most similar to a query
#[allow(async_fn_in_trait)]
pub trait VectorStore {
    /// Insert documents; the three slices are parallel
    async fn add(&self, ids: &[String], documents: &[String], metadatas: &[ChunkMetadata])
        -> Result<()>;

    /// Return up to `k` documents ranked by similarity to `text`
    async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedChunk>>;

    /// Number of stored documents
    async fn count(&self) -> Result<usize>;
}

/// Vector store backed by a Qdrant collection
pub struct QdrantStore<E> {
    client: Qdrant,
    embedder: E,
    collection: String,
    vector_size: u64,
}

impl<E: Embedder> QdrantStore<E> {
    /// Connect to Qdrant and make sure the collection for `name` exists.
    ///
    /// If the collection cannot be opened or created, a freshly named one is
    /// used instead.
    pub async fn open(
        config: &QdrantConfig,
        name: &str,
        vector_size: u64,
        embedder: E,
    ) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = &config.api_key {
            config_builder.api_key(api_key.clone())
        } else {
            config_builder
        };

        let client = config_builder
            .build()
            .context("Failed to initialize Qdrant client")?;

        let mut store = QdrantStore {
            client,
            embedder,
            collection: collection_name(name),
            vector_size,
        };

        if let Err(e) = store.ensure_collection().await {
            let fallback = fallback_collection_name(&store.collection);
            warn!(
                "Could not open collection {} ({:#}), falling back to {}",
                store.collection, e, fallback
            );
            store.collection = fallback;
            store
                .ensure_collection()
                .await
                .with_context(|| format!("Failed to create collection {}", store.collection))?;
        }

        info!("Using collection {}", store.collection);
        Ok(store)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Check if the collection exists
    pub async fn collection_exists(&self) -> Result<bool> {
        match self.client.collection_info(self.collection.clone()).await {
            Ok(_) => Ok(true),
            Err(qdrant_client::QdrantError::ResponseError { status })
                if status.code() == tonic::Code::NotFound =>
            {
                Ok(false)
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to check collection existence: {}",
                e
            )),
        }
    }

    /// Drop every stored point by deleting and recreating the collection
    pub async fn recreate(&self) -> Result<()> {
        if self.collection_exists().await? {
            self.client
                .delete_collection(self.collection.clone())
                .await
                .with_context(|| format!("Failed to delete collection {}", self.collection))?;
        }
        self.create_collection().await
    }

    async fn ensure_collection(&self) -> Result<()> {
        if self.collection_exists().await? {
            return Ok(());
        }
        self.create_collection().await
    }

    async fn create_collection(&self) -> Result<()> {
        let create_collection = CreateCollectionBuilder::new(self.collection.clone())
            .vectors_config(VectorParamsBuilder::new(self.vector_size, Distance::Cosine));

        self.client
            .create_collection(create_collection)
            .await
            .with_context(|| format!("Failed to create collection {}", self.collection))?;

        Ok(())
    }
}

impl<E: Embedder> VectorStore for QdrantStore<E> {
    async fn add(
        &self,
        ids: &[String],
        documents: &[String],
        metadatas: &[ChunkMetadata],
    ) -> Result<()> {
        if ids.len() != documents.len() || ids.len() != metadatas.len() {
            return Err(anyhow::anyhow!(
                "Mismatched insert: {} ids, {} documents, {} metadatas",
                ids.len(),
                documents.len(),
                metadatas.len()
            ));
        }
        if ids.is_empty() {
            return Ok(());
        }

        let embeddings = self
            .embedder
            .embed_batch(documents)
            .await
            .context("Failed to embed documents")?;

        if embeddings.len() != ids.len() {
            return Err(anyhow::anyhow!(
                "Expected {} embeddings, got {}",
                ids.len(),
                embeddings.len()
            ));
        }

        let mut points = Vec::with_capacity(ids.len());
        for ((id, (document, metadata)), embedding) in ids
            .iter()
            .zip(documents.iter().zip(metadatas))
            .zip(embeddings)
        {
            points.push(PointStruct::new(
                point_id(id),
                embedding.values,
                chunk_payload(document, metadata)?,
            ));
        }

        let upsert_request = UpsertPointsBuilder::new(self.collection.clone(), points).wait(true);

        self.client
            .upsert_points(upsert_request)
            .await
            .with_context(|| format!("Failed to upsert points in collection {}", self.collection))?;

        debug!("Upserted {} points into {}", ids.len(), self.collection);
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(text)
            .await
            .context("Failed to embed query")?;

        let search_request =
            SearchPointsBuilder::new(self.collection.clone(), query_embedding.values, k as u64)
                .with_payload(true);

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .with_context(|| format!("Failed to search collection {}", self.collection))?;

        // Payloads without text are skipped, ranks stay contiguous
        let chunks = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                let score = scored_point.score;
                chunk_from_payload(&scored_point.payload).map(|chunk| (chunk, score))
            })
            .enumerate()
            .map(|(idx, (chunk, score))| RetrievedChunk {
                chunk,
                rank: idx + 1,
                score,
            })
            .collect();

        Ok(chunks)
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(self.collection.clone()).exact(true))
            .await
            .with_context(|| format!("Failed to count points in {}", self.collection))?;

        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}

/// Generate a collection name from a document or configured name
pub fn collection_name(name: &str) -> String {
    let name = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase();

    format!("rag_{}", name)
}

fn fallback_collection_name(collection: &str) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{}_{}", collection, secs)
}

/// Qdrant only accepts integers or UUIDs as point ids
fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

fn chunk_payload(text: &str, metadata: &ChunkMetadata) -> Result<Payload> {
    Payload::try_from(json!({
        "text": text,
        "page_number": metadata.page_number,
        "chunk_id": metadata.chunk_id,
    }))
    .context("Failed to build point payload")
}

fn chunk_from_payload(payload: &HashMap<String, Value>) -> Option<Chunk> {
    let text = payload.get("text")?.as_str()?;

    // Pages are numbered from 1
    let page_number = payload
        .get("page_number")?
        .as_integer()
        .and_then(|v| u32::try_from(v).ok())
        .filter(|page| *page > 0)?;

    let chunk_id = payload
        .get("chunk_id")
        .and_then(|v| v.as_str())
        .cloned()
        .unwrap_or_default();

    Some(Chunk::from_parts(
        text.as_str(),
        page_number,
        chunk_id,
        estimate_token_count(text),
    ))
}
