//! Cost and token roll-up.
//!
//! When a metered span (LLM, RETRIEVER) closes, the `cost` and `usage`
//! entries of its outputs are folded into the span. Every closing span then
//! adds its accumulated totals into its immediate parent. Because parents
//! close after their children, the root ends up holding the sum of its whole
//! subtree. A parent closed before its children misses their contributions.

use serde_json::Value;

use crate::types::{Attributes, LlmTokens, Span};

/// Accumulated metrics carried from a span into its parent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub cost: Option<f64>,
    pub tokens: Option<LlmTokens>,
}

impl Usage {
    /// Read `cost` and `usage` from close-time outputs. Values of the wrong
    /// shape are ignored.
    pub fn from_outputs(outputs: &Attributes) -> Self {
        let cost = outputs.get("cost").and_then(Value::as_f64);
        let tokens = outputs.get("usage").and_then(LlmTokens::from_value);
        if outputs.contains_key("cost") && cost.is_none() {
            tracing::debug!("Ignoring non-numeric cost output");
        }
        if outputs.contains_key("usage") && tokens.is_none() {
            tracing::debug!("Ignoring malformed usage output");
        }
        Self { cost, tokens }
    }

    /// Totals currently held by a span.
    pub fn of(span: &Span) -> Self {
        Self {
            cost: span.cost,
            tokens: span.tokens,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cost.is_none() && self.tokens.is_none()
    }
}

/// Add `usage` onto a span: first write sets, later writes accumulate.
pub fn accumulate(span: &mut Span, usage: Usage) {
    if let Some(cost) = usage.cost {
        *span.cost.get_or_insert(0.0) += cost;
    }
    if let Some(tokens) = usage.tokens {
        *span.tokens.get_or_insert_with(LlmTokens::default) += tokens;
    }
}

/// Fold a metered span's close-time outputs into the span itself.
pub fn fold_outputs(span: &mut Span, outputs: &Attributes) {
    if span.kind.is_metered() {
        accumulate(span, Usage::from_outputs(outputs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;
    use serde_json::json;

    fn outputs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_first_write_then_accumulate() {
        let mut parent = Span::new(Id::next(), "root", "chain", Attributes::new());
        assert_eq!(parent.cost, None);

        accumulate(&mut parent, Usage { cost: Some(2.5), tokens: None });
        assert_eq!(parent.cost, Some(2.5));

        accumulate(&mut parent, Usage { cost: Some(1.5), tokens: None });
        assert_eq!(parent.cost, Some(4.0));
    }

    #[test]
    fn test_tokens_accumulate() {
        let mut span = Span::new(Id::next(), "root", "chain", Attributes::new());
        accumulate(
            &mut span,
            Usage { cost: None, tokens: Some(LlmTokens::new(10, 5, 15)) },
        );
        accumulate(
            &mut span,
            Usage { cost: None, tokens: Some(LlmTokens::new(1, 2, 3)) },
        );
        assert_eq!(span.tokens, Some(LlmTokens::new(11, 7, 18)));
        assert_eq!(span.cost, None);
    }

    #[test]
    fn test_fold_only_for_metered_kinds() {
        let out = outputs(json!({
            "cost": 1.0,
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }));

        let mut llm = Span::new(Id::next(), "call", "llm", Attributes::new());
        fold_outputs(&mut llm, &out);
        assert_eq!(llm.cost, Some(1.0));
        assert_eq!(llm.tokens.unwrap().total_tokens, 15);

        let mut chain = Span::new(Id::next(), "step", "chain", Attributes::new());
        fold_outputs(&mut chain, &out);
        assert!(Usage::of(&chain).is_empty());
    }

    #[test]
    fn test_malformed_outputs_ignored() {
        let usage = Usage::from_outputs(&outputs(json!({
            "cost": "cheap",
            "usage": {"total_tokens": 3}
        })));
        assert!(usage.is_empty());
    }
}
