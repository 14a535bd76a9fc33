//! Per-model pricing, used to express token savings in dollars.

/// Per-model pricing for cost estimation (USD per 1M tokens).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// Price per 1M input tokens.
    pub input_per_million: f64,
    /// Price per 1M output tokens.
    pub output_per_million: f64,
}

impl ModelPricing {
    /// Cost of `prompt_tokens` input tokens.
    pub fn input_cost(&self, prompt_tokens: f64) -> f64 {
        (prompt_tokens / 1_000_000.0) * self.input_per_million
    }

    /// Cost of `completion_tokens` output tokens.
    pub fn output_cost(&self, completion_tokens: u64) -> f64 {
        (completion_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        // Default to a mid-range estimate.
        Self {
            input_per_million: 3.0,
            output_per_million: 15.0,
        }
    }
}

/// Lookup approximate pricing for a model by name.
///
/// Matches on the segment after the last `/` (`"anthropic/claude-sonnet-4"`
/// -> `"claude-sonnet-4"`) so org prefixes don't cause false positives.
pub fn pricing_for_model(model: &str) -> ModelPricing {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();

    // Approximate list prices. Good enough to size savings, not for billing.
    let (input_per_million, output_per_million) = if name.contains("opus") {
        (15.0, 75.0)
    } else if name.contains("sonnet") {
        (3.0, 15.0)
    } else if name.contains("haiku") {
        (0.80, 4.0)
    } else if name.contains("4o-mini") {
        (0.15, 0.60)
    } else if name.contains("gpt-4") {
        (2.50, 10.0)
    } else if name.contains("gemini") && name.contains("flash") {
        (0.075, 0.30)
    } else if name.contains("gemini") {
        (1.25, 5.0)
    } else if name.contains("deepseek") {
        (0.27, 1.10)
    } else {
        return ModelPricing::default();
    };

    ModelPricing {
        input_per_million,
        output_per_million,
    }
}
