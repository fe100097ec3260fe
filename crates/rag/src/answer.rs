use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use policyqa_core::NOT_AVAILABLE;

/// Coverage decision reported by the model. Labels outside the known set
/// are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
    Partial,
    NeedsMoreInfo,
    Error,
    NeedsReview,
    Other(String),
}

impl Decision {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "approved" => Decision::Approved,
            "rejected" => Decision::Rejected,
            "partial" => Decision::Partial,
            "needs more info" => Decision::NeedsMoreInfo,
            "error" => Decision::Error,
            "needs review" => Decision::NeedsReview,
            _ => Decision::Other(label.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Decision::Approved => "Approved",
            Decision::Rejected => "Rejected",
            Decision::Partial => "Partial",
            Decision::NeedsMoreInfo => "Needs More Info",
            Decision::Error => "Error",
            Decision::NeedsReview => "Needs Review",
            Decision::Other(label) => label,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Decision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Decision::from_label(&label))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

impl Confidence {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
        }
    }
}

impl Serialize for Confidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(value
            .as_str()
            .map(Confidence::from_label)
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SupportingParagraph {
    #[serde(default, deserialize_with = "lenient_index")]
    pub index: Option<u64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub doc_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub text: String,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEcho {
    pub text: String,
    pub language: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub generated_by: String,
    pub model_name: String,
    pub retrieval_method: String,
    pub embedding_model: String,
    pub execution_time_ms: Option<u64>,
}

/// Structured answer returned for every query that reached synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub final_answer: Decision,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reasoning: String,
    #[serde(default, deserialize_with = "lenient_paragraphs")]
    pub supporting_paragraphs: Vec<SupportingParagraph>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub limitations: Vec<String>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub waiting_periods: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub payout_amount: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub conditions: Vec<String>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub recommendations: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryEcho>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<AuditLog>,
    /// Keys the model added beyond the documented schema.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Answer {
    /// Skeleton used for answers produced without a parseable model reply.
    pub fn degraded(decision: Decision, reasoning: impl Into<String>) -> Self {
        Self {
            final_answer: decision,
            confidence: Confidence::Low,
            reasoning: reasoning.into(),
            supporting_paragraphs: Vec::new(),
            limitations: Vec::new(),
            waiting_periods: Some(NOT_AVAILABLE.to_string()),
            payout_amount: Some(NOT_AVAILABLE.to_string()),
            conditions: Vec::new(),
            recommendations: None,
            error: None,
            raw_response: None,
            query: None,
            audit_log: None,
            extra: Map::new(),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Array(items) => {
            let parts: Vec<String> = items.into_iter().filter_map(value_to_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        other => Some(other.to_string()),
    }
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(value_to_text(Value::deserialize(deserializer)?))
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(lenient_text(deserializer)?.unwrap_or_default())
}

fn lenient_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().filter_map(value_to_text).collect(),
        other => value_to_text(other).into_iter().collect(),
    })
}

fn lenient_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_paragraphs<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<SupportingParagraph>, D::Error> {
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(SupportingParagraph {
                text,
                ..SupportingParagraph::default()
            }),
            Value::Object(_) => serde_json::from_value(item).ok(),
            _ => None,
        })
        .collect())
}

fn or_na(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => NOT_AVAILABLE,
    }
}

/// Console rendering of an answer.
pub fn format_answer(answer: &Answer) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Decision: {} (confidence: {})\n",
        answer.final_answer,
        answer.confidence.label()
    ));
    out.push_str(&format!(
        "Reasoning: {}\n",
        or_na(Some(answer.reasoning.as_str()))
    ));
    if !answer.supporting_paragraphs.is_empty() {
        out.push_str("Supporting excerpts:\n");
        for (pos, para) in answer.supporting_paragraphs.iter().enumerate() {
            let index = para.index.unwrap_or(pos as u64 + 1);
            let doc = if para.doc_id.is_empty() {
                "Unknown"
            } else {
                para.doc_id.as_str()
            };
            out.push_str(&format!(
                "  [{index}] {doc} (Section {}): \"{}\"\n",
                or_na(para.section.as_deref()),
                para.text.trim()
            ));
        }
    }
    push_list(&mut out, "Limitations", &answer.limitations);
    out.push_str(&format!(
        "Waiting periods: {}\n",
        or_na(answer.waiting_periods.as_deref())
    ));
    out.push_str(&format!(
        "Payout amount: {}\n",
        or_na(answer.payout_amount.as_deref())
    ));
    push_list(&mut out, "Conditions", &answer.conditions);
    out.push_str(&format!(
        "Recommendations: {}\n",
        or_na(answer.recommendations.as_deref())
    ));
    if let Some(error) = &answer.error {
        out.push_str(&format!("Error: {error}\n"));
    }
    out
}

fn push_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(title);
    out.push_str(":\n");
    for item in items {
        out.push_str(&format!("  - {item}\n"));
    }
}
