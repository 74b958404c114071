//! Span storage and nesting.
//!
//! [`SpanTree`] owns every span of one trace in creation order and records
//! the parent/child nesting used to render the debug document. Rendering is
//! a pure function of the tree and may be repeated.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::id::Id;
use crate::types::{Attributes, Span};

/// Ordered span storage with parent/child nesting.
#[derive(Debug, Clone, Default)]
pub struct SpanTree {
    spans: Vec<Span>,
    index: HashMap<Id, usize>,
    children: HashMap<Id, Vec<Id>>,
    roots: Vec<Id>,
}

impl SpanTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a span, nesting it under its parent.
    ///
    /// A span whose parent is unknown to this tree is placed at the top level.
    pub fn push(&mut self, span: Span) {
        let id = span.id.clone();
        match span.parent_id.as_ref() {
            Some(parent) if self.index.contains_key(parent) => {
                self.children.entry(parent.clone()).or_default().push(id.clone());
            }
            Some(parent) => {
                tracing::warn!(span_id = %id, parent_id = %parent, "Parent span not in trace, nesting at top level");
                self.roots.push(id.clone());
            }
            None => self.roots.push(id.clone()),
        }
        self.index.insert(id, self.spans.len());
        self.spans.push(span);
    }

    pub fn get(&self, id: &Id) -> Option<&Span> {
        self.index.get(id).map(|&i| &self.spans[i])
    }

    pub fn get_mut(&mut self, id: &Id) -> Option<&mut Span> {
        self.index.get(id).map(|&i| &mut self.spans[i])
    }

    /// The first top-level span, if any.
    pub fn root(&self) -> Option<&Span> {
        self.roots.first().and_then(|id| self.get(id))
    }

    /// Top-level span ids in insertion order.
    pub fn roots(&self) -> &[Id] {
        &self.roots
    }

    /// Child ids of `id` in insertion order.
    pub fn children(&self, id: &Id) -> &[Id] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All spans in creation order.
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Render the nested `spans` document.
    ///
    /// Each level is keyed by span name. Siblings sharing a name collapse
    /// into an array in creation order; a unique name maps to the span
    /// object directly.
    pub fn to_document(&self) -> Map<String, Value> {
        self.render_level(&self.roots)
    }

    fn render_level(&self, ids: &[Id]) -> Map<String, Value> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for span in ids.iter().filter_map(|id| self.get(id)) {
            *counts.entry(span.name.as_str()).or_default() += 1;
        }

        let mut level = Map::new();
        for span in ids.iter().filter_map(|id| self.get(id)) {
            let entry = self.render_span(span);
            if counts[span.name.as_str()] > 1 {
                let slot = level
                    .entry(span.name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = slot {
                    items.push(entry);
                }
            } else {
                level.insert(span.name.clone(), entry);
            }
        }
        level
    }

    fn render_span(&self, span: &Span) -> Value {
        let mut entry = Map::new();
        entry.insert(
            "start_time".into(),
            Value::String(span.start_time.to_rfc3339()),
        );
        entry.insert(
            "end_time".into(),
            span.end_time
                .map(|t| Value::String(t.to_rfc3339()))
                .unwrap_or(Value::Null),
        );
        entry.insert("inputs".into(), Value::Object(stringify(&span.inputs)));
        entry.insert(
            "locals".into(),
            Value::Object(
                span.locals()
                    .map(|(k, v)| (k.to_string(), Value::String(display_value(v))))
                    .collect(),
            ),
        );
        entry.insert(
            "outputs".into(),
            Value::Object(span.outputs.as_ref().map(stringify).unwrap_or_default()),
        );

        let children = self.render_level(self.children(&span.id));
        if !children.is_empty() {
            entry.insert("spans".into(), Value::Object(children));
        }
        Value::Object(entry)
    }
}

fn stringify(values: &Attributes) -> Map<String, Value> {
    values
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(display_value(v))))
        .collect()
}

/// Human-readable rendering of a value. Lossy: strings lose their quoting,
/// everything else is compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
