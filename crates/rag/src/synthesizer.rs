use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::de::Error as _;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use policyqa_llm::{LlmBackend, SamplingConfig};

use crate::answer::{Answer, AuditLog, Decision, QueryEcho};
use crate::config::MAX_CONTEXT_CHUNKS;
use crate::store::QueryHit;

pub const RETRIEVAL_METHOD: &str = "SQLite vector store (top-5 cosine matches)";

const SYSTEM_PROMPT: &str = "You are an expert insurance policy analyzer. Analyze queries and provide accurate responses based on policy documents.

Key requirements:
1. Always respond with valid JSON only - no additional text before or after
2. Include specific quotes from policy documents
3. Be precise about waiting periods and conditions
4. Provide confidence levels based on available information
5. Format numbers and dates consistently
6. Use only the provided policy excerpts for your analysis";

const ANSWER_SCHEMA: &str = r#"{
    "final_answer": "Approved/Rejected/Partial/Needs More Info",
    "confidence": "High/Medium/Low",
    "reasoning": "Detailed explanation of the decision based on policy excerpts",
    "supporting_paragraphs": [
        {
            "index": 1,
            "doc_id": "document_name.pdf",
            "text": "exact quote from the policy text",
            "section": "section reference if available"
        }
    ],
    "limitations": ["list of relevant limitations found in policy"],
    "waiting_periods": "applicable waiting periods mentioned in policy",
    "payout_amount": "coverage amount if specified in policy",
    "conditions": ["specific conditions that must be met"],
    "recommendations": "suggestions for the policyholder based on policy terms"
}"#;

/// Turns a query plus retrieved excerpts into a structured [`Answer`].
#[derive(Clone)]
pub struct AnswerSynthesizer {
    llm: Arc<dyn LlmBackend>,
    sampling: SamplingConfig,
    embedding_model: String,
}

impl AnswerSynthesizer {
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        sampling: SamplingConfig,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            sampling,
            embedding_model: embedding_model.into(),
        }
    }

    /// Never fails: transport and decoding problems are reported inside the
    /// returned answer.
    pub fn synthesize(&self, query: &str, hits: &[QueryHit]) -> Answer {
        let user_prompt = build_user_prompt(query, hits);
        debug!(excerpts = hits.len().min(MAX_CONTEXT_CHUNKS), "calling llm");
        let started = Instant::now();
        let result = self.llm.generate(SYSTEM_PROMPT, &user_prompt, &self.sampling);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut answer = match result {
            Ok(raw) => parse_answer(&raw).unwrap_or_else(|err| {
                warn!(error = %err, "llm response was not valid answer json");
                needs_review_answer(err, raw)
            }),
            Err(err) => {
                error!(error = %format!("{err:#}"), "llm call failed");
                error_answer(&format!("{err:#}"))
            }
        };
        answer.query = Some(QueryEcho {
            text: query.to_string(),
            language: "en".to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        answer.audit_log = Some(AuditLog {
            generated_by: self.llm.provider_label().to_string(),
            model_name: self.llm.model_name().to_string(),
            retrieval_method: RETRIEVAL_METHOD.to_string(),
            embedding_model: self.embedding_model.clone(),
            execution_time_ms: Some(elapsed_ms),
        });
        answer
    }
}

pub fn build_user_prompt(query: &str, hits: &[QueryHit]) -> String {
    let context = hits
        .iter()
        .take(MAX_CONTEXT_CHUNKS)
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[{}] Source: {} (Section {}, Clause {})\nText: {}",
                i + 1,
                hit.metadata.doc_id,
                hit.metadata.section,
                hit.metadata.clause,
                hit.document
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Analyze this insurance query based on the provided policy excerpts:\n\n\
         QUERY: {query}\n\n\
         POLICY EXCERPTS:\n{context}\n\n\
         Provide your analysis as a JSON object with this exact structure:\n\
         {ANSWER_SCHEMA}\n\n\
         Important: Return ONLY the JSON object, no other text."
    )
}

/// Drops any text before the first `{` and after the last `}`.
pub fn extract_json_block(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(start) = text.find('{') {
        text = &text[start..];
    }
    if let Some(end) = text.rfind('}') {
        text = &text[..=end];
    }
    text
}

/// Decodes the model reply. `query` and `audit_log` are owned by the
/// pipeline, so whatever the model put there is discarded before decoding.
pub fn parse_answer(raw: &str) -> serde_json::Result<Answer> {
    let mut value: Value = serde_json::from_str(extract_json_block(raw))?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| serde_json::Error::custom("answer is not a JSON object"))?;
    object.remove("query");
    object.remove("audit_log");
    Answer::deserialize(value)
}

fn needs_review_answer(err: serde_json::Error, raw: String) -> Answer {
    let mut answer = Answer::degraded(
        Decision::NeedsReview,
        "Could not parse LLM response properly. Raw response included for manual review.",
    );
    answer.limitations = vec!["Response parsing failed".to_string()];
    answer.conditions = vec!["Manual review required".to_string()];
    answer.recommendations = Some("Please review the raw response manually".to_string());
    answer.error = Some(format!("JSON parsing failed: {err}"));
    answer.raw_response = Some(raw);
    answer
}

fn error_answer(message: &str) -> Answer {
    let mut answer = Answer::degraded(Decision::Error, format!("API call failed: {message}"));
    answer.limitations = vec!["API error occurred".to_string()];
    answer.conditions = vec!["System error - please try again".to_string()];
    answer.recommendations = Some("Please try your query again".to_string());
    answer.error = Some(message.to_string());
    answer
}
