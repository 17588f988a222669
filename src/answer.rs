//! Turning retrieved chunks into an answer.
//!
//! The chat model is asked first when one is configured. Without a model, or
//! when the call fails, a deterministic formatter cites the retrieved pages.

use crate::chat::{ChatMessage, Generator};
use crate::database::RetrievedChunk;
use log::{debug, warn};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the question using only the \
provided context. Cite the pages you rely on as [Page N]. If the context does not contain the \
answer, say that you don't know.";

/// Result of answering a question
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Chunks the answer was based on, in rank order
    pub sources: Vec<RetrievedChunk>,
    /// False when the fallback formatter produced the text
    pub generated: bool,
}

/// Answers questions from retrieved chunks
pub struct Answerer<G> {
    generator: Option<G>,
}

impl<G: Generator> Answerer<G> {
    pub fn new(generator: Option<G>) -> Self {
        Answerer { generator }
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub async fn answer(&self, question: &str, chunks: Vec<RetrievedChunk>) -> Answer {
        if chunks.is_empty() {
            return Answer {
                text: NO_RELEVANT_INFORMATION.to_string(),
                sources: chunks,
                generated: false,
            };
        }

        let context = build_context(&chunks);

        let Some(generator) = &self.generator else {
            debug!("No chat model configured, using fallback answer");
            return Answer {
                text: fallback_answer(question, &context),
                sources: chunks,
                generated: false,
            };
        };

        match generator.complete(&build_messages(question, &context)).await {
            Ok(text) => Answer {
                text: text.trim().to_string(),
                sources: chunks,
                generated: true,
            },
            Err(e) => {
                warn!("Answer generation failed, using fallback answer: {:#}", e);
                Answer {
                    text: fallback_answer(question, &context),
                    sources: chunks,
                    generated: false,
                }
            }
        }
    }
}

/// Join retrieved chunks into a context with `[Page N]` markers
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|retrieved| {
            format!(
                "[Page {}] {}",
                retrieved.chunk.page_number(),
                retrieved.chunk.content()
            )
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}

pub fn build_messages(question: &str, context: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!("Context:\n{}\n\nQuestion: {}", context, question)),
    ]
}

/// Distinct page numbers referenced by `[Page N]` markers, ascending
pub fn cited_pages(context: &str) -> Vec<u32> {
    static PAGE_MARKER: OnceLock<Regex> = OnceLock::new();
    let marker =
        PAGE_MARKER.get_or_init(|| Regex::new(r"\[Page (\d+)\]").expect("valid page marker regex"));

    marker
        .captures_iter(context)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .collect::<BTreeSet<u32>>()
        .into_iter()
        .collect()
}

/// Answer without a language model: point the reader at the cited pages
pub fn fallback_answer(question: &str, context: &str) -> String {
    let pages = cited_pages(context);

    if pages.is_empty() {
        return format!(
            "I could not generate an answer for \"{}\" and no page references were found in the retrieved context.",
            question.trim()
        );
    }

    let citations = pages
        .iter()
        .map(|page| format!("Page {}", page))
        .collect::<Vec<String>>()
        .join(", ");

    format!(
        "Based on the retrieved document sections, the answer to \"{}\" can be found in the passages above. Review the cited pages for details.\n\nSources: {}",
        question.trim(),
        citations
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunk;
    use std::cell::RefCell;

    struct ScriptedGenerator {
        reply: Result<String, String>,
        seen: RefCell<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedGenerator {
        fn new(reply: Result<&str, &str>) -> Self {
            ScriptedGenerator {
                reply: reply.map(str::to_string).map_err(str::to_string),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Generator for ScriptedGenerator {
        async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
            self.seen.borrow_mut().push(messages.to_vec());
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn retrieved(page: u32, text: &str, rank: usize) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk::new(text, page, 1, 0),
            rank,
            score: 1.0 / rank as f32,
        }
    }

    #[test]
    fn test_cited_pages_sorted_and_deduplicated() {
        let context = "[Page 2] beta\n\n[Page 1] alpha\n\n[Page 2] beta again";
        assert_eq!(cited_pages(context), vec![1, 2]);
    }

    #[test]
    fn test_cited_pages_sort_numerically() {
        let context = "[Page 10] ten [Page 2] two [Page 1] one";
        assert_eq!(cited_pages(context), vec![1, 2, 10]);
    }

    #[test]
    fn test_cited_pages_ignores_malformed_markers() {
        assert!(cited_pages("[Page] [page 3] [Page x] Page 4").is_empty());
    }

    #[test]
    fn test_fallback_answer_cites_pages_in_order() {
        let answer = fallback_answer("What is it?", "[Page 2] second\n\n[Page 1] first");

        assert!(answer.contains("\"What is it?\""));
        assert!(answer.ends_with("Sources: Page 1, Page 2"));
    }

    #[test]
    fn test_fallback_answer_without_markers() {
        let answer = fallback_answer("Why?", "plain context");
        assert!(answer.contains("no page references"));
        assert!(!answer.contains("Sources:"));
    }

    #[test]
    fn test_build_context_keeps_rank_order() {
        let chunks = vec![retrieved(4, "four", 1), retrieved(1, "one", 2)];
        assert_eq!(build_context(&chunks), "[Page 4] four\n\n[Page 1] one");
    }

    #[tokio::test]
    async fn test_no_chunks_means_no_relevant_information() {
        let answerer = Answerer::new(Some(ScriptedGenerator::new(Ok("unused"))));

        let answer = answerer.answer("anything", Vec::new()).await;

        assert_eq!(answer.text, NO_RELEVANT_INFORMATION);
        assert!(answer.sources.is_empty());
        assert!(!answer.generated);
        assert!(answerer.generator.as_ref().unwrap().seen.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_without_generator_uses_fallback() {
        let answerer: Answerer<ScriptedGenerator> = Answerer::new(None);
        assert!(!answerer.has_generator());

        let answer = answerer
            .answer("q", vec![retrieved(2, "b", 1), retrieved(1, "a", 2)])
            .await;

        assert!(!answer.generated);
        assert!(answer.text.ends_with("Sources: Page 1, Page 2"));
        assert_eq!(answer.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_generator_reply_is_used() {
        let answerer = Answerer::new(Some(ScriptedGenerator::new(Ok("  It is blue [Page 3].\n"))));

        let answer = answerer.answer("Colour?", vec![retrieved(3, "The sky is blue.", 1)]).await;

        assert!(answer.generated);
        assert_eq!(answer.text, "It is blue [Page 3].");

        let seen = answerer.generator.as_ref().unwrap().seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0], ChatMessage::system(SYSTEM_PROMPT));
        assert!(seen[0][1].content.contains("[Page 3] The sky is blue."));
        assert!(seen[0][1].content.ends_with("Question: Colour?"));
    }

    #[tokio::test]
    async fn test_generator_failure_falls_back() {
        let answerer = Answerer::new(Some(ScriptedGenerator::new(Err("rate limited"))));

        let answer = answerer.answer("q", vec![retrieved(5, "e", 1)]).await;

        assert!(!answer.generated);
        assert!(answer.text.ends_with("Sources: Page 5"));
    }
}
