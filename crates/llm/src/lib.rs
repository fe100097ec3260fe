use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Groq,
    OpenAi,
    Anthropic,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "groq",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Local => "local",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "Groq",
            LlmProvider::OpenAi => "OpenAI",
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::Local => "Local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "groq" => Some(LlmProvider::Groq),
            "openai" => Some(LlmProvider::OpenAi),
            "anthropic" => Some(LlmProvider::Anthropic),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "llama-3.3-70b-versatile",
            LlmProvider::OpenAi => "gpt-4.1-mini",
            LlmProvider::Anthropic => "claude-3-5-sonnet-latest",
            LlmProvider::Local => "local",
        }
    }

    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            LlmProvider::Groq => Some("GROQ_API_KEY"),
            LlmProvider::OpenAi => Some("OPENAI_API_KEY"),
            LlmProvider::Anthropic => Some("ANTHROPIC_API_KEY"),
            LlmProvider::Local => None,
        }
    }
}

/// Decoding parameters sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2048,
            top_p: 0.9,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    pub sampling: SamplingConfig,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Text-generation capability used by answer synthesis.
pub trait LlmBackend: Send + Sync {
    fn generate(&self, system: &str, user: &str, sampling: &SamplingConfig) -> Result<String>;

    /// Provider label recorded in audit metadata.
    fn provider_label(&self) -> &str;

    fn model_name(&self) -> &str;
}

/// Stand-in used when the real client could not be constructed (for example
/// a missing API key); every call fails with the construction error.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    provider: LlmProvider,
    model: String,
    reason: String,
}

impl UnavailableBackend {
    pub fn new(provider: LlmProvider, model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            reason: reason.into(),
        }
    }
}

impl LlmBackend for UnavailableBackend {
    fn generate(&self, _system: &str, _user: &str, _sampling: &SamplingConfig) -> Result<String> {
        Err(anyhow!(self.reason.clone()))
    }

    fn provider_label(&self) -> &str {
        self.provider.label()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAiCompatible(OpenAiConfig),
    Anthropic(AnthropicConfig),
    Local,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

#[derive(Clone)]
struct AnthropicConfig {
    api_key: String,
}

impl LlmClient {
    pub fn new(provider: LlmProvider, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let model = model.into();
        // each blocking call runs on its own runtime, so pooled connections
        // must not outlive it
        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .context("failed to build http client")?;
        let config = match provider {
            LlmProvider::Groq => ProviderConfig::OpenAiCompatible(OpenAiConfig {
                api_key: read_api_key("GROQ_API_KEY")?,
                base_url: env::var("GROQ_BASE_URL")
                    .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string()),
            }),
            LlmProvider::OpenAi => ProviderConfig::OpenAiCompatible(OpenAiConfig {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            }),
            LlmProvider::Anthropic => ProviderConfig::Anthropic(AnthropicConfig {
                api_key: read_api_key("ANTHROPIC_API_KEY")?,
            }),
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http,
            provider,
            model,
            config,
        })
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::OpenAiCompatible(cfg) => self.chat_openai(cfg, req).await,
            ProviderConfig::Anthropic(cfg) => self.chat_anthropic(cfg, req).await,
            ProviderConfig::Local => Ok(self.chat_local(req)),
        }
    }

    pub fn chat_blocking(&self, req: &LlmRequest) -> Result<LlmResponse> {
        let rt = Runtime::new().context("failed to create tokio runtime")?;
        rt.block_on(self.chat(req))
    }

    async fn chat_openai(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({"role": "system", "content": system }));
        }
        messages.push(json!({"role": "user", "content": req.user }));
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": req.sampling.temperature,
            "max_tokens": req.sampling.max_tokens,
            "top_p": req.sampling.top_p,
        });
        let label = self.provider.as_str();
        debug!(provider = label, model = %self.model, "sending chat completion");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&cfg.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("{label} request failed"))?;
        let value = decode_body(label, response).await?;
        let content = extract_openai_text(&value)
            .ok_or_else(|| anyhow!("missing text in {label} response"))?;
        let usage: OpenAiUsage = value
            .get("usage")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    async fn chat_anthropic(&self, cfg: &AnthropicConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": req.sampling.max_tokens,
            "temperature": req.sampling.temperature,
            "top_p": req.sampling.top_p,
            "messages": [ { "role": "user", "content": req.user } ],
        });
        if let Some(system) = &req.system {
            payload["system"] = json!(system);
        }
        let response = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &cfg.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .with_context(|| "anthropic request failed")?
            .error_for_status()
            .context("anthropic returned an error")?
            .json::<AnthropicResponse>()
            .await
            .context("failed to decode anthropic response")?;
        let text = response
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| anyhow!("missing text in Anthropic response"))?;
        let usage = response.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        })
    }

    fn chat_local(&self, req: &LlmRequest) -> LlmResponse {
        LlmResponse {
            content: synthesize_local_response(req),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

impl LlmBackend for LlmClient {
    fn generate(&self, system: &str, user: &str, sampling: &SamplingConfig) -> Result<String> {
        let response = self.chat_blocking(&LlmRequest {
            system: Some(system.to_string()),
            user: user.to_string(),
            sampling: *sampling,
        })?;
        debug!(
            provider = self.provider.as_str(),
            total_tokens = response.total_tokens(),
            "completion received"
        );
        Ok(response.content.trim().to_string())
    }

    fn provider_label(&self) -> &str {
        self.provider.label()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Offline answer: echoes the first excerpt so the pipeline can be exercised
/// without network access.
fn synthesize_local_response(req: &LlmRequest) -> String {
    let excerpts = extract_context_block(&req.user, "POLICY EXCERPTS:", "Provide your analysis");
    let first = excerpts
        .split("\n\n")
        .map(|block| block.trim())
        .find(|block| !block.is_empty())
        .unwrap_or("");
    let source = first
        .lines()
        .next()
        .and_then(|line| line.split("Source: ").nth(1))
        .and_then(|rest| rest.split(" (").next())
        .unwrap_or("Unknown")
        .to_string();
    let quote = first
        .lines()
        .find_map(|line| line.strip_prefix("Text: "))
        .unwrap_or("");
    let supporting = if quote.is_empty() {
        Vec::new()
    } else {
        vec![json!({
            "index": 1,
            "doc_id": source,
            "text": summarize_text(quote, 60),
            "section": "N/A",
        })]
    };
    json!({
        "final_answer": "Needs More Info",
        "confidence": "Low",
        "reasoning": "Generated offline without a language model; review the supporting excerpt.",
        "supporting_paragraphs": supporting,
        "limitations": [],
        "waiting_periods": "N/A",
        "payout_amount": "N/A",
        "conditions": [],
        "recommendations": "Configure a hosted provider for a full analysis.",
    })
    .to_string()
}

fn extract_context_block(text: &str, start_marker: &str, stop_marker: &str) -> String {
    if let Some(start_idx) = text.find(start_marker) {
        let after = &text[start_idx + start_marker.len()..];
        if let Some(end_idx) = after.find(stop_marker) {
            let (segment, _) = after.split_at(end_idx);
            return segment.trim().to_string();
        }
        return after.trim().to_string();
    }
    text.trim().to_string()
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

async fn decode_body(label: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!(format!(
            "{label} returned error (status {status}): {body}"
        )));
    }
    serde_json::from_str(&body).with_context(|| format!("failed to decode {label} response"))
}

fn read_api_key(var: &str) -> Result<String> {
    let value =
        env::var(var).map_err(|_| anyhow!(format!("{var} not set in environment variables")))?;
    validate_api_key(var, &value)?;
    Ok(value)
}

fn validate_api_key(var: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!(format!("{var} is empty")));
    }
    if var.contains("GROQ") && !value.starts_with("gsk_") {
        return Err(anyhow!(format!("{var} must start with 'gsk_'")));
    }
    if var.contains("OPENAI") && !value.starts_with("sk-") {
        return Err(anyhow!(format!(
            "{} must start with 'sk-' (see https://platform.openai.com/)",
            var
        )));
    }
    if var.contains("ANTHROPIC") && !value.starts_with("sk-ant-") {
        return Err(anyhow!(format!("{} must start with 'sk-ant-'", var)));
    }
    Ok(())
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(|text| text.to_string())
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_roundtrip() {
        for provider in [
            LlmProvider::Groq,
            LlmProvider::OpenAi,
            LlmProvider::Anthropic,
            LlmProvider::Local,
        ] {
            assert_eq!(LlmProvider::from_str(provider.as_str()), Some(provider));
        }
        assert_eq!(LlmProvider::from_str(" GROQ "), Some(LlmProvider::Groq));
        assert_eq!(LlmProvider::from_str("gemini"), None);
    }

    #[test]
    fn default_sampling_is_low_temperature() {
        let sampling = SamplingConfig::default();
        assert_eq!(sampling.temperature, 0.1);
        assert_eq!(sampling.max_tokens, 2048);
        assert_eq!(sampling.top_p, 0.9);
    }

    #[test]
    fn chat_message_text_is_extracted() {
        let value = json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"final_answer\":\"Approved\"}" } }]
        });
        assert_eq!(
            extract_openai_text(&value).as_deref(),
            Some("{\"final_answer\":\"Approved\"}")
        );
        let parts = json!({
            "choices": [{ "message": { "content": [{ "type": "text", "text": "hi" }] } }]
        });
        assert_eq!(extract_openai_text(&parts).as_deref(), Some("hi"));
        assert_eq!(extract_openai_text(&json!({ "choices": [] })), None);
    }

    #[test]
    fn api_key_prefixes_are_checked() {
        assert!(validate_api_key("GROQ_API_KEY", "gsk_abc").is_ok());
        assert!(validate_api_key("GROQ_API_KEY", "abc").is_err());
        assert!(validate_api_key("OPENAI_API_KEY", "sk-abc").is_ok());
        assert!(validate_api_key("ANTHROPIC_API_KEY", "sk-abc").is_err());
        assert!(validate_api_key("OPENAI_API_KEY", "  ").is_err());
    }

    #[test]
    fn local_provider_returns_json_citing_first_excerpt() {
        let client = LlmClient::new(LlmProvider::Local, "local", Duration::from_secs(5)).unwrap();
        let user = "QUERY: Is knee surgery covered?\n\nPOLICY EXCERPTS:\n[1] Source: gold.pdf (Section N/A, Clause N/A)\nText: Knee replacement is covered after two years.\n\n[2] Source: silver.pdf (Section N/A, Clause N/A)\nText: Other text.\n\nProvide your analysis as a JSON object";
        let text = client
            .generate("system", user, &SamplingConfig::default())
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["final_answer"], "Needs More Info");
        assert_eq!(value["supporting_paragraphs"][0]["doc_id"], "gold.pdf");
        assert_eq!(
            value["supporting_paragraphs"][0]["text"],
            "Knee replacement is covered after two years."
        );
    }

    #[test]
    fn unavailable_backend_reports_reason() {
        let backend = UnavailableBackend::new(
            LlmProvider::Groq,
            "llama",
            "GROQ_API_KEY not set in environment variables",
        );
        let err = backend
            .generate("s", "u", &SamplingConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("GROQ_API_KEY"));
        assert_eq!(backend.provider_label(), "Groq");
    }
}
