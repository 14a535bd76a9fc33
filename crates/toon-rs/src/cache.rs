//! The prompt fragment cache.
//!
//! One [`PromptFragmentCache`] is one session: it is constructed at the start
//! of a multi-chunk run, consulted once per chunk, and dropped when the run
//! ends. For each chunk the caller resolves the system prompt and the
//! chunk's instruction template, includes every fragment whose resolution
//! reports `already_sent == false`, dispatches, and then records both payload
//! sizes with [`record_chunk`](PromptFragmentCache::record_chunk).
//!
//! Each fragment key moves one way, `Unseen -> Sent`, on its first
//! resolution. There is no eviction: the key set is bounded by the categories
//! in use, not by chunk count.
//!
//! # Example
//!
//! ```
//! use toon_rs::cache::PromptFragmentCache;
//!
//! let mut cache = PromptFragmentCache::new("You are an incident analyst.");
//!
//! let first = cache.resolve_system_prompt();
//! assert!(!first.already_sent);
//!
//! let again = cache.resolve_system_prompt();
//! assert!(again.already_sent);
//! assert_eq!(first.text, again.text);
//!
//! cache.record_chunk(1500.0, 1500.0).unwrap();
//! cache.record_chunk(1500.0, 400.0).unwrap();
//! assert_eq!(cache.metrics().saved_tokens, 1100.0);
//! ```

use crate::error::{CacheError, CacheResult};
use crate::fragment::{Fragment, FragmentKey, Resolution};
use crate::level::OptimizationLevel;
use crate::metrics::CacheMetrics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Both resolutions needed to compose one chunk's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResolution {
    pub system: Resolution,
    pub template: Resolution,
}

/// Session-scoped cache of immutable prompt fragments with savings accounting.
#[derive(Debug)]
pub struct PromptFragmentCache {
    system_prompt: String,
    level: OptimizationLevel,
    fragments: HashMap<FragmentKey, Fragment>,
    chunks: u64,
    tokens_without_caching: f64,
    tokens_with_caching: f64,
    template_mismatches: u64,
    started_at: DateTime<Utc>,
}

impl PromptFragmentCache {
    /// Create an empty session for the given system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            level: OptimizationLevel::default(),
            fragments: HashMap::new(),
            chunks: 0,
            tokens_without_caching: 0.0,
            tokens_with_caching: 0.0,
            template_mismatches: 0,
            started_at: Utc::now(),
        }
    }

    /// Restrict which fragment kinds may be served from cache.
    pub fn with_level(mut self, level: OptimizationLevel) -> Self {
        self.level = level;
        self
    }

    pub fn level(&self) -> OptimizationLevel {
        self.level
    }

    /// When this session was created or last reset.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Resolve the system prompt. Only the first call in a session reports
    /// `already_sent == false`.
    pub fn resolve_system_prompt(&mut self) -> Resolution {
        let text = self.system_prompt.clone();
        self.resolve(FragmentKey::SystemPrompt, &text)
    }

    /// Resolve the instruction template for `category`.
    ///
    /// The first text stored for a category wins. A later call with different
    /// text still succeeds with the cached text, sets
    /// [`Resolution::template_mismatch`], and logs a warning.
    pub fn resolve_instruction_template(
        &mut self,
        category: &str,
        template_text: &str,
    ) -> CacheResult<Resolution> {
        validate_category(category)?;
        Ok(self.resolve(
            FragmentKey::InstructionTemplate(category.to_string()),
            template_text,
        ))
    }

    /// Resolve both fragments for one chunk. The category is validated before
    /// anything is resolved, so a rejected call changes nothing.
    pub fn resolve_chunk(
        &mut self,
        category: &str,
        template_text: &str,
    ) -> CacheResult<ChunkResolution> {
        validate_category(category)?;
        let system = self.resolve_system_prompt();
        let template = self.resolve_instruction_template(category, template_text)?;
        Ok(ChunkResolution { system, template })
    }

    fn resolve(&mut self, key: FragmentKey, text: &str) -> Resolution {
        let kind = key.kind();
        let cacheable = self.level.is_eligible(kind);

        if let Some(fragment) = self.fragments.get(&key) {
            let template_mismatch = fragment.content() != text;
            if template_mismatch {
                self.template_mismatches += 1;
                warn!(
                    "Template mismatch for {}: keeping the cached text ({} chars), ignoring new text ({} chars)",
                    key,
                    fragment.content().len(),
                    text.len(),
                );
            }
            let already_sent = cacheable && fragment.is_sent();
            debug!("Resolved {key}: already_sent={already_sent}");
            return Resolution {
                kind,
                text: fragment.content().to_string(),
                already_sent,
                cacheable,
                template_mismatch,
            };
        }

        let mut fragment = Fragment::new(key.clone(), text);
        // Included in the caller's payload right after this returns.
        fragment.mark_sent();
        debug!("Resolved {key}: first use, stored {} chars", text.len());
        self.fragments.insert(key, fragment);

        Resolution {
            kind,
            text: text.to_string(),
            already_sent: false,
            cacheable,
            template_mismatch: false,
        }
    }

    /// Accumulate the sizes of one chunk's payload.
    ///
    /// `size_if_uncached` is the size with every fragment repeated and
    /// `size_actual` the size actually sent. Both must be finite and
    /// non-negative, and `size_actual` may not exceed `size_if_uncached`.
    /// Totals are kept unrounded, so fractional sizes accumulate exactly as
    /// given. A call that would push a total past the finite range is
    /// rejected and leaves every counter as it was.
    pub fn record_chunk(&mut self, size_if_uncached: f64, size_actual: f64) -> CacheResult<()> {
        for (name, value) in [
            ("payload_size_if_uncached", size_if_uncached),
            ("payload_size_actual", size_actual),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CacheError::invalid(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }
        if size_actual > size_if_uncached {
            return Err(CacheError::invalid(format!(
                "payload_size_actual ({size_actual}) exceeds payload_size_if_uncached ({size_if_uncached})"
            )));
        }

        let chunks = self
            .chunks
            .checked_add(1)
            .ok_or_else(|| CacheError::invalid("chunk counter overflow"))?;
        let tokens_without_caching = self.tokens_without_caching + size_if_uncached;
        let tokens_with_caching = self.tokens_with_caching + size_actual;
        if !tokens_without_caching.is_finite() || !tokens_with_caching.is_finite() {
            return Err(CacheError::invalid(
                "accumulated payload sizes exceed the representable range",
            ));
        }

        self.chunks = chunks;
        self.tokens_without_caching = tokens_without_caching;
        self.tokens_with_caching = tokens_with_caching;
        debug!(
            "Recorded chunk {}: {} uncached, {} actual",
            self.chunks, size_if_uncached, size_actual
        );
        Ok(())
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics::from_totals(
            self.chunks,
            self.tokens_without_caching,
            self.tokens_with_caching,
        )
    }

    /// Number of template resolutions whose text disagreed with the cache.
    pub fn template_mismatches(&self) -> u64 {
        self.template_mismatches
    }

    pub fn fragment(&self, key: &FragmentKey) -> Option<&Fragment> {
        self.fragments.get(key)
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Clear all fragments and counters. The system prompt text and level are
    /// configuration and are kept.
    pub fn reset(&mut self) {
        self.fragments.clear();
        self.chunks = 0;
        self.tokens_without_caching = 0.0;
        self.tokens_with_caching = 0.0;
        self.template_mismatches = 0;
        self.started_at = Utc::now();
        debug!("Fragment cache reset");
    }
}

fn validate_category(category: &str) -> CacheResult<()> {
    if category.trim().is_empty() {
        return Err(CacheError::invalid(
            "instruction template category must not be blank",
        ));
    }
    Ok(())
}

/// A [`PromptFragmentCache`] shared between concurrently dispatched chunks.
///
/// Every resolution goes through one mutex, so two chunks can never both
/// observe the same fragment as unsent.
#[derive(Debug, Clone)]
pub struct SharedFragmentCache(Arc<Mutex<PromptFragmentCache>>);

impl SharedFragmentCache {
    pub fn new(cache: PromptFragmentCache) -> Self {
        Self(Arc::new(Mutex::new(cache)))
    }

    fn lock(&self) -> MutexGuard<'_, PromptFragmentCache> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve both fragments for one chunk under a single lock acquisition.
    pub fn resolve_chunk(&self, category: &str, template_text: &str) -> CacheResult<ChunkResolution> {
        self.lock().resolve_chunk(category, template_text)
    }

    pub fn record_chunk(&self, size_if_uncached: f64, size_actual: f64) -> CacheResult<()> {
        self.lock().record_chunk(size_if_uncached, size_actual)
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.lock().metrics()
    }

    pub fn template_mismatches(&self) -> u64 {
        self.lock().template_mismatches()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.lock().started_at()
    }

    pub fn reset(&self) {
        self.lock().reset();
    }
}
