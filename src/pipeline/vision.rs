//! Chat-completion client for page transcription and note generation.
//!
//! Speaks the OpenRouter chat-completions dialect directly: when more than
//! one vision model is configured, the request declares the whole candidate
//! list with `route: "fallback"` so an unavailable primary fails over
//! server-side, and the response's `model` field reports which candidate
//! actually answered.
//!
//! [`ChatTransport`] is the HTTP seam. The production [`HttpTransport`] posts
//! over reqwest; tests substitute a mock that scripts statuses and bodies,
//! so the retry policy is exercised without a network.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ExtractorConfig;
use crate::error::VisionError;

/// Transcription attempts, total. The per-call ceiling: after this many the
/// failure is surfaced as a typed error and the job-level 60 s retry takes
/// over.
const TRANSCRIBE_ATTEMPTS: u32 = 4;

/// Note-generation attempts, total. Notes are retried at the task level too,
/// so the in-call loop is shorter.
const NOTES_ATTEMPTS: u32 = 3;

/// A chat-completions request body.
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// The raw outcome of one HTTP exchange: status plus unparsed body.
///
/// Kept raw so the retry policy can decide on the status code and error
/// bodies survive verbatim into `last_error`.
#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub status: u16,
    pub body: String,
}

/// HTTP seam for chat-completion calls.
///
/// `Err` means the exchange never produced a response (DNS, TLS, timeout);
/// every received response comes back as `Ok`, whatever its status.
pub trait ChatTransport: Send + Sync + 'static {
    fn post_chat(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<ChatExchange, String>> + Send;
}

/// Production transport posting to the configured endpoint over reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl ChatTransport for HttpTransport {
    async fn post_chat(&self, request: &ChatRequest) -> Result<ChatExchange, String> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://github.com/pagescribe/pagescribe")
            .header("X-Title", "pagescribe")
            .json(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(ChatExchange { status, body })
    }
}

/// A successful page transcription: the text plus the model that produced it.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub model: String,
}

/// Whether a status is worth retrying: rate limits and transient
/// server-side failures. Anything else (400, 401, 404 …) will fail the same
/// way again.
fn is_retryable(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Delay before transcription attempt `attempt + 1` (attempts are 1-based).
///
/// Rate limits back off harder and longer than transient server errors:
/// hammering a 429 just extends the limit window.
fn backoff_delay(status: u16, attempt: u32) -> Duration {
    let ms = if status == 429 {
        (2000u64 << (attempt - 1)).min(10_000)
    } else {
        (300u64 << (attempt - 1)).min(2500)
    };
    Duration::from_millis(ms)
}

/// Chat-completion client parameterised over its HTTP transport.
pub struct VisionClient<T: ChatTransport> {
    transport: T,
    config: ExtractorConfig,
}

impl<T: ChatTransport> VisionClient<T> {
    pub fn new(transport: T, config: ExtractorConfig) -> Self {
        Self { transport, config }
    }

    /// The underlying transport. Exposed so tests can inspect mock state.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn vision_request(&self, prompt: &str, image_data_url: &str) -> ChatRequest {
        let (model, models, route) = if self.config.models.len() == 1 {
            (Some(self.config.models[0].clone()), None, None)
        } else {
            (
                None,
                Some(self.config.models.clone()),
                Some("fallback".to_string()),
            )
        };
        ChatRequest {
            model,
            models,
            route,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(
                        crate::prompts::TRANSCRIBE_SYSTEM_PROMPT.to_string(),
                    ),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: prompt.to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: image_data_url.to_string(),
                            },
                        },
                    ]),
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    /// Transcribe one page image.
    ///
    /// Retries rate limits and transient server errors up to four attempts
    /// total, then surfaces a typed error carrying the final status and body.
    pub async fn transcribe_page(
        &self,
        prompt: &str,
        image_data_url: &str,
    ) -> Result<Transcription, VisionError> {
        let request = self.vision_request(prompt, image_data_url);

        let mut last_failure = VisionError::Request {
            detail: "no attempts made".into(),
        };
        for attempt in 1..=TRANSCRIBE_ATTEMPTS {
            match self.transport.post_chat(&request).await {
                Ok(exchange) if (200..300).contains(&exchange.status) => {
                    return parse_transcription(&exchange.body, self.config.primary_model());
                }
                Ok(exchange) => {
                    warn!(
                        status = exchange.status,
                        attempt, "vision API returned an error status"
                    );
                    last_failure = VisionError::Api {
                        status: exchange.status,
                        body: truncate_body(&exchange.body),
                    };
                    if !is_retryable(exchange.status) {
                        return Err(last_failure);
                    }
                    if attempt < TRANSCRIBE_ATTEMPTS {
                        tokio::time::sleep(backoff_delay(exchange.status, attempt)).await;
                    }
                }
                Err(detail) => {
                    warn!(attempt, %detail, "vision request failed to reach the API");
                    last_failure = VisionError::Request { detail };
                    if attempt < TRANSCRIBE_ATTEMPTS {
                        tokio::time::sleep(backoff_delay(500, attempt)).await;
                    }
                }
            }
        }
        Err(last_failure)
    }

    /// Single-model text chat used by note generation. A shorter retry loop
    /// with second-granularity sleeps; task-level scheduling handles the rest.
    pub async fn notes_chat(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, VisionError> {
        let request = ChatRequest {
            model: Some(self.config.notes_model.clone()),
            models: None,
            route: None,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(system.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Text(user.to_string()),
                },
            ],
            max_tokens,
            temperature,
        };

        let mut last_failure = VisionError::Request {
            detail: "no attempts made".into(),
        };
        for attempt in 1..=NOTES_ATTEMPTS {
            match self.transport.post_chat(&request).await {
                Ok(exchange) if (200..300).contains(&exchange.status) => {
                    let parsed: ChatResponse =
                        serde_json::from_str(&exchange.body).map_err(|e| VisionError::Request {
                            detail: format!("malformed API response: {e}"),
                        })?;
                    let content = parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .unwrap_or_default();
                    return Ok(content);
                }
                Ok(exchange) => {
                    warn!(status = exchange.status, attempt, "notes chat error status");
                    last_failure = VisionError::Api {
                        status: exchange.status,
                        body: truncate_body(&exchange.body),
                    };
                    if !is_retryable(exchange.status) {
                        return Err(last_failure);
                    }
                    if attempt < NOTES_ATTEMPTS {
                        let secs = if exchange.status == 429 {
                            1u64 << attempt
                        } else {
                            attempt as u64
                        };
                        tokio::time::sleep(Duration::from_secs(secs)).await;
                    }
                }
                Err(detail) => {
                    warn!(attempt, %detail, "notes chat request failed");
                    last_failure = VisionError::Request { detail };
                    if attempt < NOTES_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                    }
                }
            }
        }
        Err(last_failure)
    }
}

fn parse_transcription(body: &str, primary_model: &str) -> Result<Transcription, VisionError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| VisionError::Request {
        detail: format!("malformed API response: {e}"),
    })?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    let model = parsed.model.unwrap_or_else(|| primary_model.to_string());
    debug!(%model, chars = text.len(), "transcription received");
    Ok(Transcription { text, model })
}

/// Error bodies can be arbitrarily large; keep `last_error` readable.
fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let cut = body
            .char_indices()
            .nth(MAX)
            .map(|(i, _)| i)
            .unwrap_or(body.len());
        format!("{}…", &body[..cut])
    }
}
