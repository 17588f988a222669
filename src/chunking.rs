use crate::config::RetrievalConfig;
use crate::document::Page;
use crate::tokenizer::Tokenizer;
use anyhow::Result;
use log::debug;
use std::mem;

const SENTENCE_BREAK: &str = ". ";

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    content: String,
    page_number: u32,
    chunk_id: String,
    token_count: usize,
}

impl Chunk {
    /// `index` is the 1-based position of the chunk within its page
    pub fn new(
        content: impl Into<String>,
        page_number: u32,
        index: usize,
        token_count: usize,
    ) -> Self {
        Chunk {
            content: content.into(),
            page_number,
            chunk_id: chunk_id(page_number, index),
            token_count,
        }
    }

    /// Rebuild a chunk from what the vector store returned
    pub fn from_parts(
        content: impl Into<String>,
        page_number: u32,
        chunk_id: impl Into<String>,
        token_count: usize,
    ) -> Self {
        Chunk {
            content: content.into(),
            page_number,
            chunk_id: chunk_id.into(),
            token_count,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk_id
    }

    /// Token count as measured when the chunk was produced
    pub fn token_count(&self) -> usize {
        self.token_count
    }
}

/// Build the id of the `index`-th chunk on a page
pub fn chunk_id(page_number: u32, index: usize) -> String {
    format!("page_{}_chunk_{}", page_number, index)
}

/// Splits pages into token-bounded chunks aligned to sentence breaks
pub struct Chunker<T> {
    tokenizer: T,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl<T: Tokenizer> Chunker<T> {
    /// Create a chunker with a token budget per chunk.
    ///
    /// The overlap is kept alongside the budget but chunks never share text.
    pub fn new(tokenizer: T, chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            anyhow::bail!("Chunk size must be at least one token");
        }

        Ok(Chunker {
            tokenizer,
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(tokenizer: T, config: &RetrievalConfig) -> Result<Self> {
        Self::new(tokenizer, config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Chunk every page, keeping page order
    pub fn chunk_pages(&self, pages: &[Page]) -> Vec<Chunk> {
        pages.iter().flat_map(|page| self.chunk_page(page)).collect()
    }

    /// Chunk a single page. Chunk numbering restarts at 1 for every page.
    pub fn chunk_page(&self, page: &Page) -> Vec<Chunk> {
        let text = page.content.trim();
        let total_tokens = self.tokenizer.count_tokens(text);

        if total_tokens == 0 {
            return Vec::new();
        }

        if total_tokens <= self.chunk_size {
            return vec![Chunk::new(text, page.page_number, 1, total_tokens)];
        }

        let segments = self.pack_sentences(split_sentences(text));
        debug!(
            "Page {} has {} tokens, split into {} chunks",
            page.page_number,
            total_tokens,
            segments.len()
        );

        segments
            .into_iter()
            .enumerate()
            .map(|(idx, segment)| {
                let token_count = self.tokenizer.count_tokens(&segment);
                Chunk::new(segment, page.page_number, idx + 1, token_count)
            })
            .collect()
    }

    /// Greedily pack sentences into segments that fit the budget.
    /// A sentence that alone exceeds the budget becomes its own segment.
    fn pack_sentences(&self, sentences: Vec<String>) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current = String::new();

        for sentence in sentences {
            if current.is_empty() {
                current = sentence;
                continue;
            }

            let candidate = format!("{} {}", current, sentence);
            if self.tokenizer.count_tokens(&candidate) <= self.chunk_size {
                current = candidate;
            } else {
                segments.push(mem::take(&mut current));
                current = sentence;
            }
        }

        if !current.is_empty() {
            segments.push(current);
        }

        segments
    }
}

/// Split text on ". " and put back the periods the split consumed
fn split_sentences(text: &str) -> Vec<String> {
    let pieces: Vec<&str> = text.split(SENTENCE_BREAK).collect();
    let last = pieces.len().saturating_sub(1);

    pieces
        .iter()
        .enumerate()
        .filter_map(|(idx, piece)| {
            let piece = piece.trim();
            if piece.is_empty() {
                return None;
            }
            if idx < last {
                Some(format!("{}.", piece))
            } else {
                Some(piece.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::EstimatingTokenizer;
    use std::collections::HashSet;

    fn chunker(budget: usize) -> Chunker<EstimatingTokenizer> {
        Chunker::new(EstimatingTokenizer, budget, 0).unwrap()
    }

    fn sentence(words: usize, seed: usize) -> String {
        let body: Vec<String> = (0..words).map(|w| format!("w{}x{}", seed, w)).collect();
        body.join(" ")
    }

    fn long_page(page_number: u32, sentences: usize, words: usize) -> Page {
        let text: Vec<String> = (0..sentences).map(|s| sentence(words, s)).collect();
        Page::new(text.join(". ") + ".", page_number)
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(Chunker::new(EstimatingTokenizer, 0, 0).is_err());
    }

    #[test]
    fn test_from_config() {
        let config = RetrievalConfig {
            chunk_size: 64,
            chunk_overlap: 8,
            top_k: 3,
        };
        let chunker = Chunker::from_config(EstimatingTokenizer, &config).unwrap();

        assert_eq!(chunker.chunk_size(), 64);
        assert_eq!(chunker.chunk_overlap(), 8);
    }

    #[test]
    fn test_empty_page_yields_no_chunks() {
        let chunker = chunker(10);
        assert!(chunker.chunk_page(&Page::new("", 1)).is_empty());
        assert!(chunker.chunk_page(&Page::new("   \t ", 2)).is_empty());
    }

    #[test]
    fn test_short_page_is_single_chunk() {
        let chunker = chunker(50);
        let chunks = chunker.chunk_page(&Page::new("  A short page. Two sentences.  ", 3));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content(), "A short page. Two sentences.");
        assert_eq!(chunks[0].page_number(), 3);
        assert_eq!(chunks[0].chunk_id(), "page_3_chunk_1");
    }

    #[test]
    fn test_long_page_split_on_sentences() {
        let chunker = chunker(12);
        let page = Page::new(
            "One two three four five. Six seven eight nine ten. Eleven twelve thirteen.",
            1,
        );

        let chunks = chunker.chunk_page(&page);
        let contents: Vec<&str> = chunks.iter().map(|c| c.content()).collect();

        assert_eq!(
            contents,
            vec![
                "One two three four five. Six seven eight nine ten.",
                "Eleven twelve thirteen.",
            ]
        );
    }

    #[test]
    fn test_chunks_respect_budget_except_overlong_sentences() {
        let budget = 40;
        let chunker = chunker(budget);
        let pages = vec![
            long_page(1, 30, 7),
            long_page(2, 5, 60),
            long_page(3, 12, 19),
            Page::new(format!("{}. tiny. {}", sentence(3, 1), sentence(80, 2)), 4),
        ];

        let chunks = chunker.chunk_pages(&pages);
        assert!(!chunks.is_empty());

        for chunk in &chunks {
            let tokens = EstimatingTokenizer.count_tokens(chunk.content());
            assert_eq!(tokens, chunk.token_count());
            if tokens > budget {
                let sentences = split_sentences(chunk.content());
                assert_eq!(sentences.len(), 1, "overflowing chunk {}", chunk.chunk_id());
            }
        }
    }

    #[test]
    fn test_overlong_sentence_not_truncated() {
        let chunker = chunker(5);
        let long = sentence(20, 0);
        let page = Page::new(format!("Short one. {}. Tail", long), 7);

        let chunks = chunker.chunk_page(&page);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].content(), format!("{}.", long));
        assert!(chunks[1].token_count() > 5);
    }

    #[test]
    fn test_chunk_ids_unique_and_increasing_per_page() {
        let chunker = chunker(20);
        let pages = vec![long_page(1, 20, 6), long_page(2, 15, 8)];

        let chunks = chunker.chunk_pages(&pages);

        for page_number in [1u32, 2] {
            let ids: Vec<&str> = chunks
                .iter()
                .filter(|c| c.page_number() == page_number)
                .map(|c| c.chunk_id())
                .collect();
            assert!(ids.len() > 1);

            let unique: HashSet<&&str> = ids.iter().collect();
            assert_eq!(unique.len(), ids.len());

            for (idx, id) in ids.iter().enumerate() {
                assert_eq!(*id, chunk_id(page_number, idx + 1));
            }
        }
    }

    #[test]
    fn test_split_sentences_restores_periods() {
        assert_eq!(
            split_sentences("First. Second.  . Third"),
            vec!["First.", "Second.", "Third"]
        );
        assert_eq!(split_sentences("Ends with period."), vec!["Ends with period."]);
    }
}
