use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BackendError, GenerationError};
use crate::prompt::Prompt;
use crate::retry::{RetryError, RetryPolicy, Retryable};

/// Sampling parameters sent with every completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_tokens: Option<u32>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4-0125-preview".to_string(),
            temperature: 1.0,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: Some(1500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// `json_object` asks the backend for syntactically valid JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    pub fn new(sampling: &SamplingConfig, prompt: &Prompt, structured: bool) -> Self {
        Self {
            model: sampling.model.clone(),
            messages: vec![Message::system(&prompt.system), Message::user(&prompt.user)],
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            frequency_penalty: sampling.frequency_penalty,
            presence_penalty: sampling.presence_penalty,
            max_tokens: sampling.max_tokens,
            response_format: structured.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }

    pub fn is_structured(&self) -> bool {
        self.response_format.is_some()
    }
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, BackendError>;
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// OpenAI-compatible `/chat/completions` backend.
#[derive(Clone)]
pub struct OpenAiBackend {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }
}

/// Classify a non-success API answer.
fn classify_error(status: u16, body: &str) -> BackendError {
    if status == 413 || body.contains("context_length_exceeded") {
        BackendError::ContextTooLarge(body.to_string())
    } else {
        BackendError::Transient(format!("HTTP {}: {}", status, body))
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Transient(format!("failed to parse completion: {}", e)))?;

        debug!(
            model = %request.model,
            structured = request.is_structured(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Chat completion"
        );

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::Transient("completion had no content".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Text(String),
    /// The input can never fit the model; the item should be skipped.
    Skipped,
}

impl Generation {
    pub fn into_text(self) -> Option<String> {
        match self {
            Generation::Text(text) => Some(text),
            Generation::Skipped => None,
        }
    }
}

#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn CompletionBackend>,
    sampling: SamplingConfig,
    retry: RetryPolicy,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, sampling: SamplingConfig, retry: RetryPolicy) -> Self {
        Self {
            backend,
            sampling,
            retry,
        }
    }

    /// Transient backend errors are retried per the policy; an oversized
    /// input returns `Generation::Skipped` after its first attempt.
    pub async fn generate(
        &self,
        prompt: &Prompt,
        structured: bool,
        cancel: &CancellationToken,
    ) -> Result<Generation, GenerationError> {
        let request = ChatRequest::new(&self.sampling, prompt, structured);

        let outcome = self
            .retry
            .retry("chat_completion", cancel, || self.backend.complete(&request))
            .await;

        match outcome {
            Ok(text) => Ok(Generation::Text(text)),
            Err(RetryError::Permanent(BackendError::ContextTooLarge(detail))) => {
                warn!(detail = %detail, "Context window exceeded, skipping this sample");
                Ok(Generation::Skipped)
            }
            Err(RetryError::Permanent(last)) => Err(GenerationError::RetriesExhausted { attempts: 1, last }),
            Err(RetryError::Exhausted { attempts, last }) => Err(GenerationError::RetriesExhausted { attempts, last }),
            Err(RetryError::Cancelled) => Err(GenerationError::Cancelled),
        }
    }
}
