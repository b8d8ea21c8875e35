//! Trace tree reconstruction from flat span batches
//!
//! Spans arrive flat and possibly out of order; the arena rebuilds the
//! parent→children forest without nested ownership, so traversal is
//! iterative and a malformed parent chain forming a cycle is detected
//! instead of looping forever.

use std::collections::HashMap;

use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;

use crate::data::types::Span;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("parent chain forms a cycle through span {span_id}")]
    CycleDetected { span_id: String },
}

/// Flat forest over a span slice: node `i` is `spans[i]`, children hold
/// indices into the same slice, ordered by `start_time`.
#[derive(Debug)]
pub struct SpanArena {
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
}

impl SpanArena {
    /// Build in arrival order: spans are walked sorted by `start_time`
    /// ascending, and a span attaches to its parent only if the parent
    /// was indexed earlier in the walk. A span with an unknown or
    /// not-yet-seen parent becomes a synthetic root (orphan tolerance).
    ///
    /// A duplicate `span_id` overwrites the earlier occurrence in the
    /// index; later children attach to the surviving occurrence.
    pub fn by_arrival(spans: &[Span]) -> Self {
        let order = sorted_by_start(spans);
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); spans.len()];
        let mut roots = Vec::new();
        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(spans.len());

        for &idx in &order {
            let span = &spans[idx];
            match span.parent_id.as_deref().and_then(|p| seen.get(p).copied()) {
                Some(parent_idx) => children[parent_idx].push(idx),
                None => roots.push(idx),
            }
            if seen.insert(span.span_id.as_str(), idx).is_some() {
                tracing::warn!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    "Duplicate span_id in batch, last occurrence wins"
                );
            }
        }

        Self { children, roots }
    }

    /// Build from stored parent pointers regardless of arrival order:
    /// children may have been persisted before their parents, so the
    /// full span_id index is consulted. An orphan parent_id still yields
    /// a synthetic root; a parent chain that forms a cycle is rejected.
    pub fn by_parent(spans: &[Span]) -> Result<Self, TreeError> {
        let order = sorted_by_start(spans);
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(spans.len());
        for &idx in &order {
            index.insert(spans[idx].span_id.as_str(), idx);
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); spans.len()];
        let mut roots = Vec::new();

        for &idx in &order {
            let span = &spans[idx];
            let parent_idx = span
                .parent_id
                .as_deref()
                .and_then(|p| index.get(p).copied())
                .filter(|&p| p != idx);
            match parent_idx {
                Some(parent_idx) => children[parent_idx].push(idx),
                None => roots.push(idx),
            }
        }

        let arena = Self { children, roots };
        arena.check_reachability(spans)?;
        Ok(arena)
    }

    /// Every span must be reachable from a root; anything left over sits
    /// on a cycle.
    fn check_reachability(&self, spans: &[Span]) -> Result<(), TreeError> {
        let mut visited = vec![false; spans.len()];
        let mut stack: Vec<usize> = self.roots.clone();
        while let Some(idx) = stack.pop() {
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            stack.extend(self.children[idx].iter().copied());
        }
        if let Some(idx) = visited.iter().position(|&v| !v) {
            return Err(TreeError::CycleDetected {
                span_id: spans[idx].span_id.clone(),
            });
        }
        Ok(())
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn children_of(&self, idx: usize) -> &[usize] {
        &self.children[idx]
    }

    /// Iterative post-order over the whole forest: every child index is
    /// yielded before its parent.
    pub fn post_order(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.children.len());
        // (index, children_emitted)
        let mut stack: Vec<(usize, bool)> = self.roots.iter().rev().map(|&r| (r, false)).collect();
        while let Some((idx, expanded)) = stack.pop() {
            if expanded {
                out.push(idx);
            } else {
                stack.push((idx, true));
                for &child in self.children[idx].iter().rev() {
                    stack.push((child, false));
                }
            }
        }
        out
    }
}

fn sorted_by_start(spans: &[Span]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..spans.len()).collect();
    order.sort_by(|&a, &b| {
        spans[a]
            .start_time
            .cmp(&spans[b].start_time)
            .then_with(|| spans[a].span_id.cmp(&spans[b].span_id))
    });
    order
}

// ============================================================================
// NESTED SHAPE
// ============================================================================

/// Key under which a rendered node carries its children map
const CHILDREN_KEY: &str = "spans";

/// Render the forest into the nested `{span_name: node | [node, ...]}`
/// shape. Each node is rendered by `render`; children are grouped under
/// `spans` keyed by child span name, collapsing to a list when sibling
/// names collide (in traversal order). Leaves carry no `spans` key.
pub fn nest_spans(
    spans: &[Span],
    arena: &SpanArena,
    render: &dyn Fn(&Span) -> JsonMap<String, JsonValue>,
) -> Vec<JsonValue> {
    let mut built: Vec<Option<JsonValue>> = vec![None; spans.len()];

    for idx in arena.post_order() {
        let mut node = render(&spans[idx]);
        let child_indices = arena.children_of(idx);
        if !child_indices.is_empty() {
            let mut by_name = JsonMap::new();
            for &child_idx in child_indices {
                let child = built[child_idx]
                    .take()
                    .unwrap_or(JsonValue::Null);
                let name = spans[child_idx].span_name.clone();
                match by_name.get_mut(&name) {
                    Some(JsonValue::Array(items)) => items.push(child),
                    Some(existing) => {
                        let first = existing.take();
                        *existing = JsonValue::Array(vec![first, child]);
                    }
                    None => {
                        by_name.insert(name, child);
                    }
                }
            }
            node.insert(CHILDREN_KEY.to_string(), JsonValue::Object(by_name));
        }
        built[idx] = Some(JsonValue::Object(node));
    }

    arena
        .roots()
        .iter()
        .filter_map(|&r| built[r].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::data::types::{SpanKind, SpanStatusCode, SpanType, TraceType};

    fn span(span_id: &str, parent_id: Option<&str>, name: &str, offset_ms: i64) -> Span {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            + Duration::milliseconds(offset_ms);
        Span {
            trace_id: Uuid::from_u128(1),
            span_id: span_id.to_string(),
            parent_id: parent_id.map(|s| s.to_string()),
            span_name: name.to_string(),
            span_kind: SpanKind::Internal,
            trace_type: TraceType::Invocation,
            span_type: SpanType::Task,
            start_time: start,
            end_time: start + Duration::milliseconds(10),
            status_code: SpanStatusCode::Unset,
            status_message: None,
            attributes: json!({}),
            events: vec![],
            links: vec![],
            references: vec![],
            hashes: vec![],
            created_at: start,
            updated_at: None,
            deleted_at: None,
            created_by_id: None,
            updated_by_id: None,
            deleted_by_id: None,
        }
    }

    #[test]
    fn by_arrival_attaches_children_to_earlier_parents() {
        let spans = vec![
            span("aa", None, "root", 0),
            span("bb", Some("aa"), "child", 5),
            span("cc", Some("bb"), "grandchild", 10),
        ];
        let arena = SpanArena::by_arrival(&spans);
        assert_eq!(arena.roots(), &[0]);
        assert_eq!(arena.children_of(0), &[1]);
        assert_eq!(arena.children_of(1), &[2]);
    }

    #[test]
    fn orphan_becomes_synthetic_root() {
        let spans = vec![
            span("aa", None, "root", 0),
            span("bb", Some("zz"), "orphan", 5),
        ];
        let arena = SpanArena::by_arrival(&spans);
        assert_eq!(arena.roots(), &[0, 1]);

        let arena = SpanArena::by_parent(&spans).unwrap();
        assert_eq!(arena.roots(), &[0, 1]);
    }

    #[test]
    fn by_parent_resolves_child_persisted_before_parent() {
        // Child starts earlier than its parent in the slice ordering
        let spans = vec![
            span("bb", Some("aa"), "child", 0),
            span("aa", None, "root", 5),
        ];
        let arena = SpanArena::by_parent(&spans).unwrap();
        assert_eq!(arena.roots(), &[1]);
        assert_eq!(arena.children_of(1), &[0]);

        // Arrival-order build treats the early child as an orphan root
        let arena = SpanArena::by_arrival(&spans);
        assert_eq!(arena.roots().len(), 2);
    }

    #[test]
    fn by_parent_rejects_cycles() {
        let spans = vec![
            span("aa", Some("bb"), "a", 0),
            span("bb", Some("aa"), "b", 5),
        ];
        let err = SpanArena::by_parent(&spans).unwrap_err();
        assert!(matches!(err, TreeError::CycleDetected { .. }));
    }

    #[test]
    fn self_parent_is_a_root_not_a_cycle_loop() {
        let spans = vec![span("aa", Some("aa"), "selfie", 0)];
        let arena = SpanArena::by_parent(&spans).unwrap();
        assert_eq!(arena.roots(), &[0]);
    }

    #[test]
    fn post_order_emits_children_first() {
        let spans = vec![
            span("aa", None, "root", 0),
            span("bb", Some("aa"), "left", 5),
            span("cc", Some("aa"), "right", 10),
        ];
        let arena = SpanArena::by_arrival(&spans);
        assert_eq!(arena.post_order(), vec![1, 2, 0]);
    }

    #[test]
    fn sibling_name_collision_collapses_to_list() {
        let spans = vec![
            span("aa", None, "workflow", 0),
            span("bb", Some("aa"), "llm_call", 5),
            span("cc", Some("aa"), "llm_call", 10),
        ];
        let arena = SpanArena::by_arrival(&spans);
        let nodes = nest_spans(&spans, &arena, &|s| {
            let mut m = JsonMap::new();
            m.insert("span_id".to_string(), json!(s.span_id));
            m
        });

        assert_eq!(nodes.len(), 1);
        let calls = &nodes[0]["spans"]["llm_call"];
        let items = calls.as_array().expect("colliding names become a list");
        assert_eq!(items.len(), 2);
        // start_time order
        assert_eq!(items[0]["span_id"], json!("bb"));
        assert_eq!(items[1]["span_id"], json!("cc"));
    }

    #[test]
    fn leaf_nodes_have_no_children_map() {
        let spans = vec![span("aa", None, "root", 0), span("bb", Some("aa"), "leaf", 5)];
        let arena = SpanArena::by_arrival(&spans);
        let nodes = nest_spans(&spans, &arena, &|s| {
            let mut m = JsonMap::new();
            m.insert("span_id".to_string(), json!(s.span_id));
            m
        });

        let leaf = &nodes[0]["spans"]["leaf"];
        assert!(leaf.get("spans").is_none());
    }
}
