//! Character-based token estimation.
//!
//! Payload sizes only need to be comparable between the cached and uncached
//! variants of the same request, so a calibrated chars-per-token ratio is
//! enough. No tokenizer is loaded.

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Estimates token counts from character counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    chars_per_token: f64,
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    /// Use a calibrated ratio. Non-positive or non-finite ratios are ignored.
    pub fn with_chars_per_token(mut self, chars_per_token: f64) -> Self {
        if chars_per_token.is_finite() && chars_per_token > 0.0 {
            self.chars_per_token = chars_per_token;
        }
        self
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    /// Estimated tokens for `text`. Any non-empty text is at least one token.
    pub fn estimate(&self, text: &str) -> u64 {
        self.estimate_chars(text.chars().count())
    }

    /// Estimated tokens for a text of `chars` characters.
    pub fn estimate_chars(&self, chars: usize) -> u64 {
        if chars == 0 {
            return 0;
        }
        (chars as f64 / self.chars_per_token).ceil() as u64
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Estimate tokens with the default ratio.
pub fn estimate_tokens(text: &str) -> u64 {
    TokenEstimator::default().estimate(text)
}
