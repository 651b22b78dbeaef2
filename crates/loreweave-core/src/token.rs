//! Token counting.
//!
//! The pipeline never tokenizes text itself; hosts plug in their tokenizer
//! through [`TokenCounter`]. [`HeuristicCounter`] is a rough stand-in
//! (~4 characters per token) for tools and tests.

/// Errors a tokenizer may report.
#[derive(Debug, thiserror::Error)]
pub enum TokenCountError {
    #[error("tokenizer failed: {0}")]
    Failed(String),

    #[error("tokenizer unavailable")]
    Unavailable,
}

/// Counts the tokens a piece of text would occupy in the prompt.
pub trait TokenCounter {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenCountError>;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize,
{
    fn count_tokens(&self, text: &str) -> Result<usize, TokenCountError> {
        Ok(self(text))
    }
}

/// Estimates 1 token per 4 bytes of text, rounding up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl HeuristicCounter {
    pub fn estimate(text: &str) -> usize {
        text.len().div_ceil(4)
    }
}

impl TokenCounter for HeuristicCounter {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenCountError> {
        Ok(Self::estimate(text))
    }
}
