use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use log::{error, info};
use std::path::Path;

use page_rag::answer::Answerer;
use page_rag::chat::ChatClient;
use page_rag::chunking::Chunker;
use page_rag::config::RagConfig;
use page_rag::database::{QdrantStore, VectorStore};
use page_rag::document::Document;
use page_rag::embeddings::GeminiEmbedder;
use page_rag::rag::{render_answer, RagEngine};
use page_rag::tokenizer::EstimatingTokenizer;

/// Ask questions about a document using Gemini embeddings, Qdrant and a chat model
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the document to process (supports text and PDF)
    #[arg(index = 1)]
    file_path: String,

    /// Answer a single question and exit instead of starting the query loop
    #[arg(short, long)]
    question: Option<String>,

    /// Token budget per chunk (overrides CHUNK_SIZE)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Number of chunks to retrieve per question (overrides TOP_K)
    #[arg(long)]
    top_k: Option<usize>,

    /// Collection to store chunks in (overrides RAG_COLLECTION)
    #[arg(long)]
    collection: Option<String>,

    /// Drop the existing collection and index the document again
    #[arg(long)]
    reindex: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let file_path = args.file_path;

    info!("Processing file: {}", file_path);

    let path = Path::new(&file_path);
    if !path.exists() {
        error!("File not found: {}", file_path);
        return Err(anyhow::anyhow!("File not found"));
    }

    let mut config = RagConfig::from_env().context("Invalid configuration")?;
    if let Some(chunk_size) = args.chunk_size {
        config.retrieval.chunk_size = chunk_size;
    }
    if let Some(top_k) = args.top_k {
        config.retrieval.top_k = top_k;
    }
    if args.collection.is_some() {
        config.qdrant.collection = args.collection;
    }

    let document = Document::from_file(path).context("Failed to process document")?;
    info!("Document type: {}", document.mime_type);

    let collection = config
        .qdrant
        .collection
        .clone()
        .unwrap_or_else(|| document.document_id.clone());

    // Validate the chunk budget before touching the store
    let chunker = Chunker::from_config(EstimatingTokenizer, &config.retrieval)?;
    info!(
        "Chunk size {} tokens, overlap {}, top-k {}",
        chunker.chunk_size(),
        chunker.chunk_overlap(),
        config.retrieval.top_k
    );

    let embedder = GeminiEmbedder::new(config.embedding.clone());
    info!("Embedding with {}", embedder.config().model);
    let store = QdrantStore::open(
        &config.qdrant,
        &collection,
        config.embedding.dimensions,
        embedder,
    )
    .await
    .context("Failed to open vector store")?;

    if args.reindex {
        info!("Recreating collection: {}", store.collection());
        store.recreate().await?;
    }

    let chat = ChatClient::from_config(&config.chat);
    match &chat {
        Some(client) => info!("Answering with {}", client.model()),
        None => info!("OPENAI_API_KEY not set, falling back to page citations"),
    }
    let answerer = Answerer::new(chat);
    let rag_engine = RagEngine::new(chunker, store, answerer, config.retrieval.top_k);

    // Only index the document if the collection is empty
    if rag_engine.store().count().await? > 0 {
        info!("Using existing collection: {}", rag_engine.store().collection());
    } else {
        rag_engine
            .ingest(&document.pages)
            .await
            .context("Failed to index document")?;
    }

    match args.question {
        Some(question) => {
            let answer = rag_engine.ask(&question).await;
            println!("{}", render_answer(&answer));
        }
        None => rag_engine
            .run_query_loop(&document.document_id)
            .await
            .context("Error in query loop")?,
    }

    Ok(())
}
