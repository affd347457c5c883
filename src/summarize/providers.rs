//! LLM provider transports.
//!
//! Each transport sends the shared [`Prompt`] to one vendor API and returns the raw text of
//! the answer. Parsing and validation happen once, above this layer.

use crate::error::{ConfigError, ProviderError};
use crate::summarize::prompt::Prompt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = concat!("devport-ingest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Openai,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Openai => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.5-flash",
            ProviderKind::Openai => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-haiku-20241022",
        }
    }

    /// Env var the api key is read from when the config says `"ENV"` or leaves it out.
    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Openai => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "openai" => Ok(ProviderKind::Openai),
            "anthropic" => Ok(ProviderKind::Anthropic),
            _ => Err(ConfigError::UnsupportedProvider(s.to_string())),
        }
    }
}

/// Resolved per-provider request settings.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub base_url: Option<String>,
}

#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// One request; returns the answer text.
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError>;
    fn name(&self) -> &'static str;
}

/// Build the transport for `kind`. Fails only on local setup problems, never on the network.
pub fn build_transport(
    kind: ProviderKind,
    settings: TransportSettings,
) -> Result<Arc<dyn LlmTransport>, ConfigError> {
    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ConfigError::invalid("llm.http_client", e.to_string()))?;
    Ok(match kind {
        ProviderKind::Openai => Arc::new(OpenAiTransport { http, settings }),
        ProviderKind::Anthropic => Arc::new(AnthropicTransport { http, settings }),
        ProviderKind::Gemini => Arc::new(GeminiTransport { http, settings }),
    })
}

async fn send_json(req: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(status.as_u16(), body));
    }
    Ok(resp)
}

fn non_empty(text: String) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        Err(ProviderError::EmptyResponse)
    } else {
        Ok(text)
    }
}

// ------------------------------------------------------------
// OpenAI (chat completions)
// ------------------------------------------------------------

/// OpenAI caps completion tokens for the small models.
const OPENAI_MAX_COMPLETION_TOKENS: u32 = 16_384;

pub struct OpenAiTransport {
    http: reqwest::Client,
    settings: TransportSettings,
}

#[derive(Serialize)]
struct OpenAiMsg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OpenAiReq<'a> {
    model: &'a str,
    messages: Vec<OpenAiMsg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiResp {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMsg,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiResp {
    pub(crate) fn into_text(self) -> Result<String, ProviderError> {
        let text = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        non_empty(text)
    }
}

#[async_trait]
impl LlmTransport for OpenAiTransport {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let base = self
            .settings
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com");
        let req = OpenAiReq {
            model: &self.settings.model,
            messages: vec![
                OpenAiMsg {
                    role: "system",
                    content: &prompt.system,
                },
                OpenAiMsg {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens.min(OPENAI_MAX_COMPLETION_TOKENS),
        };
        let resp = send_json(
            self.http
                .post(format!("{base}/v1/chat/completions"))
                .bearer_auth(&self.settings.api_key)
                .json(&req),
        )
        .await?;
        let body: OpenAiResp = resp.json().await?;
        body.into_text()
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Anthropic (messages)
// ------------------------------------------------------------

pub struct AnthropicTransport {
    http: reqwest::Client,
    settings: TransportSettings,
}

#[derive(Serialize)]
struct AnthropicReq<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<OpenAiMsg<'a>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicResp {
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicResp {
    pub(crate) fn into_text(self) -> Result<String, ProviderError> {
        let text: String = self
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();
        non_empty(text)
    }
}

#[async_trait]
impl LlmTransport for AnthropicTransport {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let base = self
            .settings
            .base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com");
        let req = AnthropicReq {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            system: &prompt.system,
            messages: vec![OpenAiMsg {
                role: "user",
                content: &prompt.user,
            }],
        };
        let resp = send_json(
            self.http
                .post(format!("{base}/v1/messages"))
                .header("x-api-key", &self.settings.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&req),
        )
        .await?;
        let body: AnthropicResp = resp.json().await?;
        body.into_text()
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

// ------------------------------------------------------------
// Gemini (generateContent)
// ------------------------------------------------------------

pub struct GeminiTransport {
    http: reqwest::Client,
    settings: TransportSettings,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiReq<'a> {
    system_instruction: GeminiContent<'a>,
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenConfig,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiResp {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiRespContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiRespContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

impl GeminiResp {
    pub(crate) fn into_text(self) -> Result<String, ProviderError> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        non_empty(text)
    }
}

#[async_trait]
impl LlmTransport for GeminiTransport {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let base = self
            .settings
            .base_url
            .as_deref()
            .unwrap_or("https://generativelanguage.googleapis.com");
        let req = GeminiReq {
            system_instruction: GeminiContent {
                role: "system",
                parts: vec![GeminiPart {
                    text: prompt.system.clone(),
                }],
            },
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPart {
                    text: prompt.user.clone(),
                }],
            }],
            generation_config: GeminiGenConfig {
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_tokens,
                response_mime_type: "application/json",
            },
        };
        let resp = send_json(
            self.http
                .post(format!(
                    "{base}/v1beta/models/{}:generateContent",
                    self.settings.model
                ))
                .header("x-goog-api-key", &self.settings.api_key)
                .json(&req),
        )
        .await?;
        let body: GeminiResp = resp.json().await?;
        body.into_text()
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

// ------------------------------------------------------------
// Mock transport for tests and local runs
// ------------------------------------------------------------

type Responder = dyn Fn(&Prompt) -> Result<String, ProviderError> + Send + Sync;

/// Scripted transport. Counts calls and tracks the peak number of in-flight requests.
pub struct MockTransport {
    responder: Box<Responder>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Prompt) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(f),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Always answers with the same text.
    pub fn fixed(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::from_fn(move |_| Ok(text.clone()))
    }

    /// Answers every url in the prompt with a valid technical summary.
    pub fn valid() -> Self {
        Self::from_fn(|p| Ok(valid_answer(&p.urls)))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// A well-formed answer array for `urls`.
pub fn valid_answer(urls: &[String]) -> String {
    let items: Vec<serde_json::Value> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            serde_json::json!({
                "url": url,
                "is_technical": true,
                "title_ko": format!("요약 제목 {}", i + 1),
                "summary_ko": "## 개요\n본문 요약입니다.",
                "category": "BACKEND",
                "tags": ["rust", "backend"],
            })
        })
        .collect();
    serde_json::Value::Array(items).to_string()
}

/// Releases an in-flight slot on drop, including when the call is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmTransport for MockTransport {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _slot = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(prompt)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
