//! Token pricing table for LLM cost calculation
//!
//! Backed by LiteLLM-format pricing JSON embedded at compile time.
//! Lookup is case-insensitive with suffix/prefix normalization so that
//! framework-reported model names (`gpt-4o-latest`, `openai/gpt-4o`,
//! dated snapshots) resolve to a priced entry.

use std::collections::HashMap;

use thiserror::Error;

/// Embedded pricing data (compile-time)
const EMBEDDED_PRICING_JSON: &str = include_str!("../../data/model_prices.json");

#[derive(Error, Debug)]
pub enum PricingError {
    #[error("failed to parse pricing data: {0}")]
    Parse(String),
}

/// Per-token rates for one model
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPricing {
    /// Cost per prompt token (USD)
    pub prompt_cost_per_token: f64,
    /// Cost per completion token (USD)
    pub completion_cost_per_token: f64,
}

/// Parsed and indexed pricing table
#[derive(Debug)]
pub struct PricingTable {
    /// Lowercased model key → rates
    models: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// Parse a LiteLLM-format pricing document.
    pub fn from_json_str(json: &str) -> Result<Self, PricingError> {
        let raw: serde_json::Value =
            serde_json::from_str(json).map_err(|e| PricingError::Parse(e.to_string()))?;

        let obj = raw
            .as_object()
            .ok_or_else(|| PricingError::Parse("expected JSON object".into()))?;

        let mut models = HashMap::new();
        for (key, value) in obj {
            // Skip documentation entry
            if key == "sample_spec" {
                continue;
            }
            let Some(entry) = value.as_object() else {
                continue;
            };

            let prompt_cost = entry
                .get("input_cost_per_token")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            let completion_cost = entry
                .get("output_cost_per_token")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);

            if prompt_cost == 0.0 && completion_cost == 0.0 {
                continue;
            }
            if prompt_cost < 0.0 || completion_cost < 0.0 {
                tracing::warn!(model = key, "Skipping model with negative pricing");
                continue;
            }

            models.insert(
                key.to_lowercase(),
                ModelPricing {
                    prompt_cost_per_token: prompt_cost,
                    completion_cost_per_token: completion_cost,
                },
            );
        }

        Ok(Self { models })
    }

    /// Load the embedded pricing document.
    pub fn embedded() -> Result<Self, PricingError> {
        Self::from_json_str(EMBEDDED_PRICING_JSON)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Look up pricing with fallback normalization.
    ///
    /// Order: exact → provider-prefix stripped (`openai/gpt-4o` → `gpt-4o`)
    /// → `-latest`/`:latest` stripped → date suffix stripped
    /// (`claude-3-5-sonnet-20241022` → `claude-3-5-sonnet`).
    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        let model = model.to_lowercase();

        if let Some(pricing) = self.models.get(&model) {
            return Some(*pricing);
        }

        if let Some((_, bare)) = model.split_once('/')
            && !bare.is_empty()
            && let Some(pricing) = self.models.get(bare)
        {
            return Some(*pricing);
        }

        let normalized = model.trim_end_matches("-latest").trim_end_matches(":latest");
        if normalized != model
            && let Some(pricing) = self.models.get(normalized)
        {
            return Some(*pricing);
        }

        let base = strip_date_suffix(normalized);
        if base != normalized
            && let Some(pricing) = self.models.get(base)
        {
            return Some(*pricing);
        }

        None
    }

    /// Compute `(prompt_cost, completion_cost)` for a token usage.
    ///
    /// Returns `None` when the model has no pricing entry; the caller
    /// decides whether that is a warning or a hard error. Negative token
    /// counts are clamped to zero.
    pub fn cost_per_token(
        &self,
        model: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
    ) -> Option<(f64, f64)> {
        let pricing = self.lookup(model)?;
        let prompt_cost = prompt_tokens.max(0) as f64 * pricing.prompt_cost_per_token;
        let completion_cost = completion_tokens.max(0) as f64 * pricing.completion_cost_per_token;
        Some((prompt_cost, completion_cost))
    }
}

/// Strip a trailing snapshot date (`-20241022` or `-2024-11-20`).
fn strip_date_suffix(model: &str) -> &str {
    if let Some(pos) = model.rfind('-') {
        let suffix = &model[pos + 1..];
        if suffix.len() == 8 && suffix.chars().all(|c| c.is_ascii_digit()) {
            return &model[..pos];
        }
    }
    // Dashed form: -YYYY-MM-DD
    if model.is_ascii() && model.len() > 11 {
        let (head, tail) = model.split_at(model.len() - 11);
        let bytes = tail.as_bytes();
        if bytes[0] == b'-'
            && bytes[5] == b'-'
            && bytes[8] == b'-'
            && tail
                .chars()
                .enumerate()
                .all(|(i, c)| matches!(i, 0 | 5 | 8) || c.is_ascii_digit())
        {
            return head;
        }
    }
    model
}
