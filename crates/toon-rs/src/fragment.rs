//! Fragment identity and resolution results.
//!
//! A fragment is an immutable piece of outbound text that is identical across
//! every chunk of one run: the system prompt, or the instruction template of a
//! category. [`FragmentKey`] is the closed set of keys; there is exactly one
//! system prompt key and one template key per category.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which kind of fragment a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    /// The single global system prompt.
    SystemPrompt,
    /// A per-category instruction template.
    InstructionTemplate,
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentKind::SystemPrompt => write!(f, "system_prompt"),
            FragmentKind::InstructionTemplate => write!(f, "instruction_template"),
        }
    }
}

/// Cache key for a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FragmentKey {
    SystemPrompt,
    InstructionTemplate(String),
}

impl FragmentKey {
    pub fn kind(&self) -> FragmentKind {
        match self {
            FragmentKey::SystemPrompt => FragmentKind::SystemPrompt,
            FragmentKey::InstructionTemplate(_) => FragmentKind::InstructionTemplate,
        }
    }

    /// The category label, or `None` for the system prompt.
    pub fn category(&self) -> Option<&str> {
        match self {
            FragmentKey::SystemPrompt => None,
            FragmentKey::InstructionTemplate(category) => Some(category),
        }
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentKey::SystemPrompt => write!(f, "system_prompt"),
            FragmentKey::InstructionTemplate(category) => write!(f, "template:{category}"),
        }
    }
}

/// A cached fragment within one session.
#[derive(Debug, Clone)]
pub struct Fragment {
    key: FragmentKey,
    content: String,
    sent: bool,
}

impl Fragment {
    pub(crate) fn new(key: FragmentKey, content: impl Into<String>) -> Self {
        Self {
            key,
            content: content.into(),
            sent: false,
        }
    }

    pub fn key(&self) -> &FragmentKey {
        &self.key
    }

    pub fn kind(&self) -> FragmentKind {
        self.key.kind()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Whether this fragment has been transmitted at least once this session.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }
}

/// The outcome of resolving one fragment for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub kind: FragmentKind,
    /// The cached text. For a template this is always the first text stored
    /// for the category.
    pub text: String,
    /// `true` when the far end already holds this fragment and it may be
    /// omitted from the outbound payload.
    pub already_sent: bool,
    /// Whether the fragment kind is eligible for caching under the session's
    /// optimization level.
    pub cacheable: bool,
    /// Set when the caller supplied template text that differs from the
    /// cached text. The cached text still wins.
    pub template_mismatch: bool,
}

impl Resolution {
    /// Whether the fragment must be included in the outbound payload.
    pub fn must_transmit(&self) -> bool {
        !self.already_sent
    }
}
