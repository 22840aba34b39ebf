// src/analyze/insight.rs
//! Insight model and the validating parser for the reasoning backend's reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Topic tag of an insight (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Tvl,
    Whale,
    Trend,
    Anomaly,
    Bridge,
    Protocol,
    Stablecoin,
    Chain,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Tvl,
        Category::Whale,
        Category::Trend,
        Category::Anomaly,
        Category::Bridge,
        Category::Protocol,
        Category::Stablecoin,
        Category::Chain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tvl => "tvl",
            Category::Whale => "whale",
            Category::Trend => "trend",
            Category::Anomaly => "anomaly",
            Category::Bridge => "bridge",
            Category::Protocol => "protocol",
            Category::Stablecoin => "stablecoin",
            Category::Chain => "chain",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == norm)
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub category: Category,
    /// One-line finding.
    pub summary: String,
    pub full_analysis: String,
    /// Ready-to-publish text, before house-style composition.
    pub tweet_draft: String,
    /// Always within `[1, 10]`.
    pub confidence: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum InsightError {
    #[error("reasoning backend error {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("reasoning backend transport: {0}")]
    Transport(String),
    #[error("no content in reasoning backend response")]
    EmptyResponse,
    #[error("malformed insight: {0}")]
    MalformedResponse(String),
    #[error("invalid confidence: {0}")]
    InvalidConfidence(String),
}

const REQUIRED_FIELDS: [&str; 5] = [
    "category",
    "summary",
    "fullAnalysis",
    "tweetDraft",
    "confidence",
];

/// Remove incidental markdown code fences around a JSON reply.
pub fn strip_code_fences(raw: &str) -> String {
    static RE_OPEN: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    static RE_CLOSE: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_open = RE_OPEN.get_or_init(|| regex::Regex::new(r"```(?:json|JSON)?[ \t]*\r?\n?").unwrap());
    let re_close = RE_CLOSE.get_or_init(|| regex::Regex::new(r"```\r?\n?").unwrap());
    let out = re_open.replace_all(raw, "");
    re_close.replace_all(&out, "").trim().to_string()
}

fn required_string(obj: &serde_json::Map<String, Value>, field: &str) -> Result<String, InsightError> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(InsightError::MalformedResponse(format!(
            "missing field in insight: {field}"
        ))),
        Some(other) => Err(InsightError::MalformedResponse(format!(
            "field {field} is not a string: {other}"
        ))),
    }
}

/// Coerce a JSON confidence (number or numeric string) into `[1, 10]`.
fn coerce_confidence(v: &Value) -> Result<f64, InsightError> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(c) if c.is_finite() && (1.0..=10.0).contains(&c) => Ok(c),
        _ => Err(InsightError::InvalidConfidence(v.to_string())),
    }
}

/// Parse and validate a raw reply. Every accepted insight has all fields and an
/// in-range confidence.
pub fn parse_insight(raw: &str) -> Result<Insight, InsightError> {
    let cleaned = strip_code_fences(raw);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| InsightError::MalformedResponse(format!("not valid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| InsightError::MalformedResponse("reply is not a JSON object".into()))?;

    for field in REQUIRED_FIELDS {
        if !obj.contains_key(field) {
            return Err(InsightError::MalformedResponse(format!(
                "missing field in insight: {field}"
            )));
        }
    }

    let category = required_string(obj, "category")?
        .parse::<Category>()
        .map_err(InsightError::MalformedResponse)?;
    let confidence = coerce_confidence(&obj["confidence"])?;

    Ok(Insight {
        category,
        summary: required_string(obj, "summary")?,
        full_analysis: required_string(obj, "fullAnalysis")?,
        tweet_draft: required_string(obj, "tweetDraft")?,
        confidence,
    })
}
