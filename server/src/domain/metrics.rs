//! Cost and token metric propagation over trace trees
//!
//! Runs once per ingested batch, before any batching/splitting: the input
//! must contain every span of each trace it touches, otherwise cumulative
//! totals come out silently wrong.
//!
//! Two passes per batch:
//! 1. Incremental cost: token counts × per-model price, written to
//!    `ag.metrics.costs.incremental` on cost-bearing spans.
//! 2. Cumulative (costs and tokens independently): post-order accumulation
//!    where `cumulative(node) = incremental(node) + Σ cumulative(child)`.

use std::sync::Arc;

use serde_json::{Value as JsonValue, json};

use crate::data::types::Span;
use crate::domain::attributes::{get_path, set_path};
use crate::domain::pricing::PricingTable;
use crate::domain::tree::SpanArena;

/// Attribute paths, relative to the span attribute root
const TOKENS_INCREMENTAL: [&str; 4] = ["ag", "metrics", "tokens", "incremental"];
const TOKENS_CUMULATIVE: [&str; 4] = ["ag", "metrics", "tokens", "cumulative"];
const COSTS_INCREMENTAL: [&str; 4] = ["ag", "metrics", "costs", "incremental"];
const COSTS_CUMULATIVE: [&str; 4] = ["ag", "metrics", "costs", "cumulative"];
const MODEL_PRIMARY: [&str; 4] = ["ag", "meta", "response", "model"];
const MODEL_FALLBACK: [&str; 4] = ["ag", "data", "parameters", "model"];

// ============================================================================
// BREAKDOWN
// ============================================================================

/// Prompt/completion/total triple for one metric.
///
/// Reading a breakdown from a span never fails: any missing component or
/// missing path defaults to zero. That rule lives here, not at call sites.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricBreakdown {
    pub prompt: f64,
    pub completion: f64,
    pub total: f64,
}

impl MetricBreakdown {
    pub fn is_zero(&self) -> bool {
        self.prompt == 0.0 && self.completion == 0.0 && self.total == 0.0
    }

    pub fn add(&mut self, other: &MetricBreakdown) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }

    /// Read the breakdown at an attribute path, zero-defaulting.
    pub fn read(span: &Span, path: &[&str]) -> Self {
        let Some(node) = get_path(&span.attributes, path) else {
            return Self::default();
        };
        Self {
            prompt: component(node, "prompt"),
            completion: component(node, "completion"),
            total: component(node, "total"),
        }
    }

    /// True when the span carries any value at the path, even all-zero.
    pub fn present(span: &Span, path: &[&str]) -> bool {
        get_path(&span.attributes, path).is_some()
    }

    fn to_json(self, integral: bool) -> JsonValue {
        if integral {
            json!({
                "prompt": self.prompt.round() as i64,
                "completion": self.completion.round() as i64,
                "total": self.total.round() as i64,
            })
        } else {
            json!({
                "prompt": self.prompt,
                "completion": self.completion,
                "total": self.total,
            })
        }
    }
}

fn component(node: &JsonValue, key: &str) -> f64 {
    node.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

/// Cumulative cost totals, as consumed by analytics aggregation.
pub fn cumulative_costs(span: &Span) -> MetricBreakdown {
    MetricBreakdown::read(span, &COSTS_CUMULATIVE)
}

/// Cumulative token totals, as consumed by analytics aggregation.
pub fn cumulative_tokens(span: &Span) -> MetricBreakdown {
    MetricBreakdown::read(span, &TOKENS_CUMULATIVE)
}

// ============================================================================
// PROPAGATOR
// ============================================================================

pub struct MetricsPropagator {
    pricing: Arc<PricingTable>,
}

impl MetricsPropagator {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self { pricing }
    }

    /// Compute incremental costs, then cumulative cost and token totals,
    /// mutating span attributes in place.
    pub fn propagate(&self, spans: &mut [Span]) {
        for span in spans.iter_mut() {
            self.apply_incremental_cost(span);
        }

        let arena = SpanArena::by_arrival(spans);
        accumulate(spans, &arena, &COSTS_INCREMENTAL, &COSTS_CUMULATIVE, false);
        accumulate(spans, &arena, &TOKENS_INCREMENTAL, &TOKENS_CUMULATIVE, true);
    }

    /// Price a single cost-bearing span from its incremental token counts.
    ///
    /// Any lookup failure (no model attribute, no pricing entry) leaves
    /// the span's incremental cost unset and logs a warning; it never
    /// aborts the batch.
    fn apply_incremental_cost(&self, span: &mut Span) {
        if !span.span_type.is_cost_bearing() {
            return;
        }
        if !MetricBreakdown::present(span, &TOKENS_INCREMENTAL) {
            return;
        }
        let tokens = MetricBreakdown::read(span, &TOKENS_INCREMENTAL);

        let Some(model) = response_model(span) else {
            tracing::warn!(
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                span_type = span.span_type.as_str(),
                "Span has token counts but no model attribute, skipping cost calculation"
            );
            return;
        };

        let Some((prompt_cost, completion_cost)) = self.pricing.cost_per_token(
            &model,
            tokens.prompt.round() as i64,
            tokens.completion.round() as i64,
        ) else {
            tracing::warn!(
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                model = %model,
                "No pricing entry for model, skipping cost calculation"
            );
            return;
        };

        let costs = MetricBreakdown {
            prompt: prompt_cost,
            completion: completion_cost,
            total: prompt_cost + completion_cost,
        };
        set_path(&mut span.attributes, &COSTS_INCREMENTAL, costs.to_json(false));
    }
}

/// Model name used for pricing: the response-reported model, falling back
/// to the requested parameter.
fn response_model(span: &Span) -> Option<String> {
    get_path(&span.attributes, &MODEL_PRIMARY)
        .or_else(|| get_path(&span.attributes, &MODEL_FALLBACK))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Post-order accumulation of one metric over the forest. The cumulative
/// value is written only when at least one component is non-zero.
fn accumulate(
    spans: &mut [Span],
    arena: &SpanArena,
    incremental_path: &[&str],
    cumulative_path: &[&str],
    integral: bool,
) {
    let mut cumulative: Vec<MetricBreakdown> = vec![MetricBreakdown::default(); spans.len()];

    for idx in arena.post_order() {
        let mut total = MetricBreakdown::read(&spans[idx], incremental_path);
        for &child in arena.children_of(idx) {
            let child_total = cumulative[child];
            total.add(&child_total);
        }
        cumulative[idx] = total;

        if !total.is_zero() {
            set_path(&mut spans[idx].attributes, cumulative_path, total.to_json(integral));
        }
    }
}
