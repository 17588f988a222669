pub mod answer;
pub mod chat;
pub mod chunking;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod rag;
pub mod tokenizer;
