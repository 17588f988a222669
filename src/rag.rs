use crate::answer::{Answer, Answerer};
use crate::chat::Generator;
use crate::chunking::{Chunk, Chunker};
use crate::database::{ChunkMetadata, RetrievedChunk, VectorStore};
use crate::document::Page;
use crate::tokenizer::Tokenizer;
use anyhow::Result;
use log::{info, warn};
use std::io::{self, BufRead, Write};

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine<T, S, G> {
    chunker: Chunker<T>,
    store: S,
    answerer: Answerer<G>,
    top_k: usize,
}

impl<T, S, G> RagEngine<T, S, G>
where
    T: Tokenizer,
    S: VectorStore,
    G: Generator,
{
    /// Create a new RAG engine
    pub fn new(chunker: Chunker<T>, store: S, answerer: Answerer<G>, top_k: usize) -> Self {
        RagEngine {
            chunker,
            store,
            answerer,
            top_k,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Chunk pages and insert the chunks into the store
    pub async fn ingest(&self, pages: &[Page]) -> Result<usize> {
        let chunks = self.chunker.chunk_pages(pages);
        info!("Split {} pages into {} chunks", pages.len(), chunks.len());

        self.add_chunks(&chunks).await?;
        info!("Stored {} chunks", chunks.len());

        Ok(chunks.len())
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id().to_string()).collect();
        let documents: Vec<String> = chunks.iter().map(|c| c.content().to_string()).collect();
        let metadatas: Vec<ChunkMetadata> = chunks.iter().map(ChunkMetadata::from).collect();

        self.store.add(&ids, &documents, &metadatas).await
    }

    /// Retrieve the most similar chunks. Store failures count as no results.
    pub async fn retrieve(&self, question: &str) -> Vec<RetrievedChunk> {
        match self.store.query(question, self.top_k).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Query failed, continuing without context: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Answer a question from the stored chunks
    pub async fn ask(&self, question: &str) -> Answer {
        let chunks = self.retrieve(question).await;
        self.answerer.answer(question, chunks).await
    }

    /// Run the interactive query loop on stdin
    pub async fn run_query_loop(&self, document_id: &str) -> Result<()> {
        info!(
            "Ready to answer questions about {}. Type 'exit' to quit.",
            document_id
        );
        if !self.answerer.has_generator() {
            info!("No chat API key configured, answers will only cite pages");
        }

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut buffer = String::new();

        loop {
            print!("\nYour question: ");
            stdout.flush()?;

            buffer.clear();
            if stdin.lock().read_line(&mut buffer)? == 0 {
                break;
            }

            let question = buffer.trim();
            if question.is_empty() {
                continue;
            }
            if question.eq_ignore_ascii_case("exit") {
                info!("Goodbye!");
                break;
            }

            let answer = self.ask(question).await;
            println!("\n{}", render_answer(&answer));
        }

        Ok(())
    }
}

/// Format an answer for the terminal, listing the chunks it came from
pub fn render_answer(answer: &Answer) -> String {
    if answer.sources.is_empty() {
        return answer.text.clone();
    }

    let sources = answer
        .sources
        .iter()
        .map(|s| format!("  {}. {} (score {:.3})", s.rank, s.chunk.chunk_id(), s.score))
        .collect::<Vec<String>>()
        .join("\n");

    format!("{}\n\nRetrieved chunks:\n{}", answer.text, sources)
}
