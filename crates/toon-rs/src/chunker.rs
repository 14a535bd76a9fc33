//! Splits an oversized JSON document into token-bounded chunks.
//!
//! Arrays are packed element by element and objects entry by entry, greedily,
//! into compact JSON bodies whose estimated size stays within the budget. An
//! element that alone exceeds the budget becomes its own chunk; elements are
//! never split. Any other JSON value is a single chunk.

use crate::error::{CacheError, CacheResult};
use crate::tokens::TokenEstimator;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Default per-chunk budget in estimated tokens.
pub const DEFAULT_CHUNK_TOKENS: u64 = 1500;

/// One slice of the input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub index: usize,
    /// Compact JSON text of this slice.
    pub body: String,
    /// Array elements or object entries in this slice.
    pub items: usize,
    pub estimated_tokens: u64,
}

/// Greedy JSON chunker.
#[derive(Debug, Clone)]
pub struct JsonChunker {
    max_chunk_tokens: u64,
    estimator: TokenEstimator,
}

impl JsonChunker {
    pub fn new(max_chunk_tokens: u64) -> CacheResult<Self> {
        if max_chunk_tokens == 0 {
            return Err(CacheError::invalid("max_chunk_tokens must be greater than zero"));
        }
        Ok(Self {
            max_chunk_tokens,
            estimator: TokenEstimator::default(),
        })
    }

    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn max_chunk_tokens(&self) -> u64 {
        self.max_chunk_tokens
    }

    /// Parse `input` and chunk it.
    pub fn chunk_str(&self, input: &str) -> CacheResult<Vec<Chunk>> {
        let value: Value = serde_json::from_str(input)?;
        self.chunk_value(&value)
    }

    pub fn chunk_value(&self, value: &Value) -> CacheResult<Vec<Chunk>> {
        let chunks = match value {
            Value::Array(items) => {
                let pieces = items
                    .iter()
                    .map(serde_json::to_string)
                    .collect::<Result<Vec<_>, _>>()?;
                self.pack(pieces, '[', ']')
            }
            Value::Object(map) => {
                let pieces = map
                    .iter()
                    .map(|(k, v)| -> CacheResult<String> {
                        Ok(format!(
                            "{}:{}",
                            serde_json::to_string(k)?,
                            serde_json::to_string(v)?
                        ))
                    })
                    .collect::<CacheResult<Vec<_>>>()?;
                self.pack(pieces, '{', '}')
            }
            scalar => {
                let body = serde_json::to_string(scalar)?;
                let estimated_tokens = self.estimator.estimate(&body);
                vec![Chunk {
                    index: 0,
                    body,
                    items: 1,
                    estimated_tokens,
                }]
            }
        };
        debug!(
            "Chunked input into {} chunk(s) of at most ~{} tokens",
            chunks.len(),
            self.max_chunk_tokens
        );
        Ok(chunks)
    }

    /// Pack serialized pieces into `open piece,piece,... close` bodies.
    fn pack(&self, pieces: Vec<String>, open: char, close: char) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut batch: Vec<String> = Vec::new();
        // Characters of the batch body including brackets and commas.
        let mut batch_chars = 2;

        for piece in pieces {
            let piece_chars = piece.chars().count();
            let separator = usize::from(!batch.is_empty());
            let next_chars = batch_chars + separator + piece_chars;
            if !batch.is_empty() && self.estimator.estimate_chars(next_chars) > self.max_chunk_tokens
            {
                chunks.push(self.flush(&mut batch, chunks.len(), open, close));
                batch_chars = 2 + piece_chars;
            } else {
                batch_chars = next_chars;
            }
            batch.push(piece);
        }

        if !batch.is_empty() || chunks.is_empty() {
            chunks.push(self.flush(&mut batch, chunks.len(), open, close));
        }
        chunks
    }

    fn flush(&self, batch: &mut Vec<String>, index: usize, open: char, close: char) -> Chunk {
        let items = batch.len();
        let body = format!("{open}{}{close}", batch.join(","));
        batch.clear();
        let estimated_tokens = self.estimator.estimate(&body);
        Chunk {
            index,
            body,
            items,
            estimated_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunker(max_tokens: u64) -> JsonChunker {
        JsonChunker::new(max_tokens)
            .unwrap()
            .with_estimator(TokenEstimator::new().with_chars_per_token(1.0))
    }

    #[test]
    fn zero_budget_rejected() {
        let err = JsonChunker::new(0).unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }

    #[test]
    fn malformed_json_rejected() {
        let err = chunker(10).chunk_str("[1, 2").unwrap_err();
        assert!(matches!(err, CacheError::Json(_)));
    }

    #[test]
    fn small_array_is_one_chunk() {
        let chunks = chunker(100).chunk_str("[1, 2, 3]").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].body, "[1,2,3]");
        assert_eq!(chunks[0].items, 3);
        assert_eq!(chunks[0].estimated_tokens, 7);
    }

    #[test]
    fn array_packed_within_budget() {
        // "[1234,1234]" is 11 chars; a third element would make it 16.
        let input = json!([1234, 1234, 1234, 1234, 1234]);
        let chunks = chunker(14).chunk_value(&input).unwrap();
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.estimated_tokens <= 14, "chunk too large: {}", chunk.body);
        }
        let items: usize = chunks.iter().map(|c| c.items).sum();
        assert_eq!(items, 5);
        let indices: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn chunks_reassemble_original_elements() {
        let input = json!([{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}]);
        let chunks = chunker(20).chunk_value(&input).unwrap();
        let mut rebuilt = Vec::new();
        for chunk in &chunks {
            let value: Value = serde_json::from_str(&chunk.body).unwrap();
            rebuilt.extend(value.as_array().unwrap().iter().cloned());
        }
        assert_eq!(Value::Array(rebuilt), input);
    }

    #[test]
    fn oversized_element_gets_own_chunk() {
        let big = "x".repeat(50);
        let input = json!(["a", big, "b"]);
        let chunks = chunker(10).chunk_value(&input).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].items, 1);
        assert!(chunks[1].estimated_tokens > 10);
    }

    #[test]
    fn object_entries_packed() {
        let input = json!({"alpha": 1, "beta": 2, "gamma": 3});
        let chunks = chunker(16).chunk_value(&input).unwrap();
        assert!(chunks.len() > 1);
        let mut keys = Vec::new();
        for chunk in &chunks {
            let value: Value = serde_json::from_str(&chunk.body).unwrap();
            keys.extend(value.as_object().unwrap().keys().cloned());
        }
        keys.sort();
        assert_eq!(keys, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn scalar_is_single_chunk() {
        let chunks = chunker(1).chunk_str(r#""just a string""#).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].body, r#""just a string""#);
    }

    #[test]
    fn empty_array_yields_one_empty_chunk() {
        let chunks = chunker(10).chunk_str("[]").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].body, "[]");
        assert_eq!(chunks[0].items, 0);
    }
}
