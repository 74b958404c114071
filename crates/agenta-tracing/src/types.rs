//! Span data types.
//!
//! Field names on the wire follow the collector's schema (`spankind`,
//! `parent_span_id`, `tokens.*_tokens`), so a [`Span`] can be posted as-is.

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::Id;

/// Free-form key/value mapping used for inputs, outputs, attributes and config.
pub type Attributes = serde_json::Map<String, Value>;

/// Attribute prefix for captured local variables.
pub const LOCALS_PREFIX: &str = "locals.";

/// Category tag of a span, always stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanKind(String);

impl SpanKind {
    pub const LLM: &'static str = "LLM";
    pub const RETRIEVER: &'static str = "RETRIEVER";
    pub const CHAIN: &'static str = "CHAIN";
    pub const TOOL: &'static str = "TOOL";
    pub const EMBEDDING: &'static str = "EMBEDDING";
    pub const WORKFLOW: &'static str = "WORKFLOW";

    /// Normalize a kind to uppercase.
    pub fn new(kind: impl AsRef<str>) -> Self {
        Self(kind.as_ref().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether closing a span of this kind folds cost and usage from its outputs.
    pub fn is_metered(&self) -> bool {
        self.0 == Self::LLM || self.0 == Self::RETRIEVER
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpanKind {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Status code of a span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

impl FromStr for SpanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UNSET" => Ok(Self::Unset),
            "OK" => Ok(Self::Ok),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown span status '{other}'")),
        }
    }
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unset => "UNSET",
            Self::Ok => "OK",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Token usage counters of an LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmTokens {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl LlmTokens {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    /// Read counters from a `usage` output value. All three counters must be
    /// present as unsigned integers.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            prompt_tokens: obj.get("prompt_tokens")?.as_u64()?,
            completion_tokens: obj.get("completion_tokens")?.as_u64()?,
            total_tokens: obj.get("total_tokens")?.as_u64()?,
        })
    }
}

impl AddAssign for LlmTokens {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(rhs.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(rhs.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(rhs.total_tokens);
    }
}

/// One traced operation.
///
/// A span is owned by its trace's [`SpanTree`](crate::tree::SpanTree); the
/// facade addresses the "current" span by id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub id: Id,

    pub name: String,

    #[serde(rename = "spankind")]
    pub kind: SpanKind,

    /// Absent only on the root span of a trace.
    #[serde(rename = "parent_span_id")]
    pub parent_id: Option<Id>,

    pub app_id: String,

    pub inputs: Attributes,

    /// Set when the span closes.
    pub outputs: Option<Attributes>,

    #[serde(default)]
    pub attributes: Attributes,

    pub config: Option<Attributes>,

    /// Stamped on the root span only.
    pub environment: Option<String>,

    pub tags: Option<Vec<String>>,

    pub user: Option<String>,

    #[serde(default)]
    pub status: SpanStatus,

    pub start_time: DateTime<Utc>,

    pub end_time: Option<DateTime<Utc>>,

    pub cost: Option<f64>,

    pub tokens: Option<LlmTokens>,
}

impl Span {
    /// Create an open span starting now.
    pub fn new(
        id: Id,
        name: impl Into<String>,
        kind: impl Into<SpanKind>,
        inputs: Attributes,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind: kind.into(),
            parent_id: None,
            app_id: String::new(),
            inputs,
            outputs: None,
            attributes: Attributes::new(),
            config: None,
            environment: None,
            tags: None,
            user: None,
            status: SpanStatus::Unset,
            start_time: Utc::now(),
            end_time: None,
            cost: None,
            tokens: None,
        }
    }

    pub fn with_parent(mut self, parent_id: Option<Id>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Stamp the end time and outputs. The end time never precedes the start.
    pub fn finish(&mut self, outputs: Attributes) {
        let now = Utc::now();
        self.end_time = Some(now.max(self.start_time));
        self.outputs = Some(outputs);
    }

    /// Seconds between start and end, `None` while open.
    pub fn latency_secs(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_microseconds().unwrap_or(0) as f64 / 1e6)
    }

    /// Captured locals with the `locals.` prefix stripped.
    pub fn locals(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(LOCALS_PREFIX).map(|k| (k, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_is_uppercased() {
        assert_eq!(SpanKind::new("llm").as_str(), "LLM");
        assert!(SpanKind::new("Retriever").is_metered());
        assert!(!SpanKind::new("chain").is_metered());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("ok".parse::<SpanStatus>(), Ok(SpanStatus::Ok));
        assert_eq!("ERROR".parse::<SpanStatus>(), Ok(SpanStatus::Error));
        assert!("maybe".parse::<SpanStatus>().is_err());
        assert_eq!(SpanStatus::default(), SpanStatus::Unset);
    }

    #[test]
    fn test_tokens_from_value() {
        let usage = json!({"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15});
        assert_eq!(
            LlmTokens::from_value(&usage),
            Some(LlmTokens::new(10, 5, 15))
        );
        assert_eq!(LlmTokens::from_value(&json!({"prompt_tokens": 1})), None);
        assert_eq!(LlmTokens::from_value(&json!("lots")), None);
    }

    #[test]
    fn test_token_sum_saturates() {
        let mut tokens = LlmTokens::new(u64::MAX - 1, 3, u64::MAX);
        tokens += LlmTokens::new(5, 4, 1);
        assert_eq!(tokens, LlmTokens::new(u64::MAX, 7, u64::MAX));
    }

    #[test]
    fn test_finish_sets_end_after_start() {
        let mut span = Span::new(Id::next(), "op", "chain", Attributes::new());
        assert!(!span.is_closed());
        assert!(span.latency_secs().is_none());

        span.finish(Attributes::new());
        assert!(span.is_closed());
        assert!(span.end_time.unwrap() >= span.start_time);
        assert!(span.latency_secs().unwrap() >= 0.0);
    }

    #[test]
    fn test_span_wire_names() {
        let span = Span::new(Id::from("abc"), "op", "llm", Attributes::new())
            .with_parent(Some(Id::from("parent")));
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["spankind"], "LLM");
        assert_eq!(json["parent_span_id"], "parent");
        assert_eq!(json["status"], "UNSET");
        assert!(json["end_time"].is_null());
    }

    #[test]
    fn test_locals_strip_prefix() {
        let mut span = Span::new(Id::next(), "op", "chain", Attributes::new());
        span.attributes.insert("locals.x".into(), json!(1));
        span.attributes.insert("model".into(), json!("gpt"));
        let locals: Vec<_> = span.locals().collect();
        assert_eq!(locals, vec![("x", &json!(1))]);
    }
}
