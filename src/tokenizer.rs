/// Measures text length in tokens
pub trait Tokenizer {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Approximate tokenizer: words plus punctuation marks
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatingTokenizer;

impl Tokenizer for EstimatingTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        estimate_token_count(text)
    }
}

/// Calculate approximate token count for a text
/// This is a very simple estimation - words plus punctuation
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_token_count() {
        assert_eq!(estimate_token_count(""), 0);
        assert_eq!(estimate_token_count("   \n\t"), 0);
        assert_eq!(estimate_token_count("hello world"), 2);
        // 4 words, a comma and a period
        assert_eq!(estimate_token_count("Hello, brave new world."), 6);
    }

    #[test]
    fn test_tokenizer_trait_delegates() {
        let tokenizer = EstimatingTokenizer;
        assert_eq!(tokenizer.count_tokens("one two three."), 4);
    }
}
