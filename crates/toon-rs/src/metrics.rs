//! Read-only savings view over a session's counters.

use crate::api::pricing::ModelPricing;
use serde::Serialize;
use std::fmt;

/// Snapshot of a session's accumulated token accounting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheMetrics {
    /// Chunks recorded so far.
    pub chunks: u64,
    /// Sum of payload sizes had every fragment been resent.
    pub tokens_without_caching: f64,
    /// Sum of payload sizes actually transmitted.
    pub tokens_with_caching: f64,
    pub saved_tokens: f64,
    /// `saved_tokens / tokens_without_caching`, or 0 when nothing was recorded.
    pub saved_ratio: f64,
}

impl CacheMetrics {
    pub(crate) fn from_totals(
        chunks: u64,
        tokens_without_caching: f64,
        tokens_with_caching: f64,
    ) -> Self {
        let saved_tokens = (tokens_without_caching - tokens_with_caching).max(0.0);
        let saved_ratio = if tokens_without_caching == 0.0 {
            0.0
        } else {
            saved_tokens / tokens_without_caching
        };
        Self {
            chunks,
            tokens_without_caching,
            tokens_with_caching,
            saved_tokens,
            saved_ratio,
        }
    }

    /// Input cost of the uncached variant under `pricing`.
    pub fn cost_without_caching(&self, pricing: &ModelPricing) -> f64 {
        pricing.input_cost(self.tokens_without_caching)
    }

    /// Input cost of what was actually transmitted under `pricing`.
    pub fn cost_with_caching(&self, pricing: &ModelPricing) -> f64 {
        pricing.input_cost(self.tokens_with_caching)
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "chunks: {}, tokens: {} uncached -> {} cached, saved {} ({:.1}%)",
            self.chunks,
            fmt_tokens(self.tokens_without_caching),
            fmt_tokens(self.tokens_with_caching),
            fmt_tokens(self.saved_tokens),
            self.saved_ratio * 100.0,
        )
    }
}

/// Whole token counts print without a fraction.
fn fmt_tokens(tokens: f64) -> String {
    if tokens.fract() == 0.0 {
        format!("{tokens:.0}")
    } else {
        format!("{tokens:.2}")
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::from_totals(0, 0.0, 0.0)
    }
}

impl fmt::Display for CacheMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_log_string())
    }
}
