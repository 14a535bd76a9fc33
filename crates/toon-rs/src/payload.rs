//! Outbound payload composition.
//!
//! [`PayloadBuilder`] assembles one chunk's request from the resolved
//! fragments and the chunk body. Parts are always ordered system prompt,
//! instruction template, chunk, so the fragment prefix stays byte-stable across
//! chunks. Fragments the far end already holds stay in the payload with
//! `cached = true`; they count toward the uncached size only.
//!
//! # Example
//!
//! ```
//! use toon_rs::cache::PromptFragmentCache;
//! use toon_rs::payload::PayloadBuilder;
//!
//! let mut cache = PromptFragmentCache::new("You are a log analyst.");
//! cache.resolve_chunk("incident", "List the root causes.").unwrap();
//! let second = cache.resolve_chunk("incident", "List the root causes.").unwrap();
//!
//! let payload = PayloadBuilder::new(1)
//!     .chunk(r#"[{"level":"error"}]"#)
//!     .resolved(&second)
//!     .build();
//!
//! assert_eq!(payload.render_uncached(), r#"[{"level":"error"}]"#);
//! assert!(payload.size_actual() < payload.size_if_uncached());
//! ```

use crate::cache::ChunkResolution;
use crate::fragment::{FragmentKind, Resolution};
use crate::tokens::TokenEstimator;
use serde::Serialize;

/// Chat role a part is sent under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartRole {
    System,
    User,
}

impl PartRole {
    pub fn as_str(self) -> &'static str {
        match self {
            PartRole::System => "system",
            PartRole::User => "user",
        }
    }
}

/// What a payload part carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    Fragment(FragmentKind),
    Chunk,
}

impl PartKind {
    /// Position in the prefix-stable ordering.
    fn rank(self) -> u8 {
        match self {
            PartKind::Fragment(FragmentKind::SystemPrompt) => 0,
            PartKind::Fragment(FragmentKind::InstructionTemplate) => 1,
            PartKind::Chunk => 2,
        }
    }
}

/// One piece of an outbound request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadPart {
    pub role: PartRole,
    pub kind: PartKind,
    pub text: String,
    /// The far end already holds this part from an earlier chunk.
    pub cached: bool,
    /// Eligible for the provider's prompt cache.
    pub cacheable: bool,
    pub tokens: u64,
}

/// The composed request for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundPayload {
    pub chunk_index: usize,
    pub parts: Vec<PayloadPart>,
}

impl OutboundPayload {
    /// Tokens if every fragment were resent.
    pub fn size_if_uncached(&self) -> u64 {
        self.parts.iter().map(|p| p.tokens).sum()
    }

    /// Tokens that must actually be transmitted.
    pub fn size_actual(&self) -> u64 {
        self.parts.iter().filter(|p| !p.cached).map(|p| p.tokens).sum()
    }

    /// Parts the far end does not hold yet.
    pub fn transmitted_parts(&self) -> impl Iterator<Item = &PayloadPart> {
        self.parts.iter().filter(|p| !p.cached)
    }

    /// Text of the parts that must be transmitted, joined by blank lines.
    pub fn render_uncached(&self) -> String {
        self.transmitted_parts()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Text of every part, joined by blank lines.
    pub fn render_full(&self) -> String {
        self.parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Builder for one chunk's [`OutboundPayload`].
///
/// Empty fragments and empty chunk bodies are skipped.
#[derive(Debug)]
pub struct PayloadBuilder {
    chunk_index: usize,
    estimator: TokenEstimator,
    parts: Vec<PayloadPart>,
}

impl PayloadBuilder {
    pub fn new(chunk_index: usize) -> Self {
        Self {
            chunk_index,
            estimator: TokenEstimator::default(),
            parts: Vec::new(),
        }
    }

    /// Use a calibrated estimator. Applies to parts added afterwards.
    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Append a resolved fragment.
    pub fn fragment(mut self, resolution: &Resolution) -> Self {
        if resolution.text.is_empty() {
            return self;
        }
        let role = match resolution.kind {
            FragmentKind::SystemPrompt => PartRole::System,
            FragmentKind::InstructionTemplate => PartRole::User,
        };
        self.parts.push(PayloadPart {
            role,
            kind: PartKind::Fragment(resolution.kind),
            text: resolution.text.clone(),
            cached: resolution.already_sent,
            cacheable: resolution.cacheable,
            tokens: self.estimator.estimate(&resolution.text),
        });
        self
    }

    /// Append both fragments of a chunk resolution.
    pub fn resolved(self, resolution: &ChunkResolution) -> Self {
        self.fragment(&resolution.system)
            .fragment(&resolution.template)
    }

    /// Append the chunk body. Always transmitted.
    pub fn chunk(mut self, body: impl Into<String>) -> Self {
        let text = body.into();
        if text.is_empty() {
            return self;
        }
        let tokens = self.estimator.estimate(&text);
        self.parts.push(PayloadPart {
            role: PartRole::User,
            kind: PartKind::Chunk,
            text,
            cached: false,
            cacheable: false,
            tokens,
        });
        self
    }

    pub fn build(mut self) -> OutboundPayload {
        // Stable sort: fragments first regardless of insertion order.
        self.parts.sort_by_key(|p| p.kind.rank());
        OutboundPayload {
            chunk_index: self.chunk_index,
            parts: self.parts,
        }
    }
}
