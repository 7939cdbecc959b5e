//! OpenAI-compatible vision-language model client.
//!
//! Serves any endpoint that speaks the chat completions protocol with image
//! parts (vLLM, TGI, hosted APIs). Images are read from disk and inlined as
//! base64 PNG data URLs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{http_client, ModelConfig};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author: `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    pub content: MessageContent,
}

/// Plain text, or a list of text and image parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    /// A user message: every image first, then the text.
    pub fn user_with_images(text: impl Into<String>, image_urls: Vec<String>) -> Self {
        let mut parts: Vec<ContentPart> = image_urls
            .into_iter()
            .map(|url| ContentPart::ImageUrl {
                image_url: ImageUrl { url },
            })
            .collect();
        parts.push(ContentPart::Text { text: text.into() });
        Self {
            role: "user".to_string(),
            content: MessageContent::Parts(parts),
        }
    }

    /// The concatenated text of the message, ignoring images.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect(),
        }
    }
}

/// A single completion choice returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
    /// The reason the model stopped generating (e.g. `"stop"`, `"length"`).
    pub finish_reason: Option<String>,
}

/// Assistant message as returned by the API. Content may be null.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Token usage statistics for a request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Text of the first choice, empty if the model returned nothing.
    pub fn first_text(&self) -> String {
        self.choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default()
    }
}

/// Model failures the CLI branches on.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The endpoint rejected the credentials, or the model is gated.
    #[error("model endpoint rejected the credentials ({status})")]
    Unauthorized { status: u16 },

    #[error("model endpoint unreachable: {0}")]
    Unavailable(#[source] reqwest::Error),

    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },
}

// ---------------------------------------------------------------------------
// VisionModel trait
// ---------------------------------------------------------------------------

/// Produces one text response for a prompt and a set of images.
#[allow(async_fn_in_trait)]
pub trait VisionModel {
    /// Generate a response. Image paths that do not exist are skipped.
    async fn respond(
        &self,
        system_prompt: &str,
        user_text: &str,
        image_paths: &[PathBuf],
    ) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-compatible chat completions API with vision.
#[derive(Debug, Clone)]
pub struct VlmClient {
    api_base: String,
    api_key: Option<String>,
    model_id: String,
    max_new_tokens: u32,
    http: reqwest::Client,
}

impl VlmClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let http = http_client(config.request_timeout_secs).context("failed to build HTTP client")?;

        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.resolved_api_key(),
            model_id: config.model_id.clone(),
            max_new_tokens: config.max_new_tokens,
            http,
        })
    }

    /// Build a client and check that the endpoint accepts our credentials.
    ///
    /// Calls `GET {api_base}/models`.
    pub async fn connect(config: &ModelConfig) -> Result<Self, ModelError> {
        let client = Self::new(config).map_err(|e| ModelError::Api {
            status: 0,
            body: format!("{e:#}"),
        })?;

        let resp = client
            .authorized(client.http.get(format!("{}/models", client.api_base)))
            .send()
            .await
            .map_err(ModelError::Unavailable)?;

        let status = resp.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(ModelError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        info!(model = %client.model_id, api_base = %client.api_base, "model endpoint ready");
        Ok(client)
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Send a chat completion request and return the parsed response.
    ///
    /// Calls `POST {api_base}/chat/completions` with greedy decoding.
    pub async fn chat_completion(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        debug!(model = %self.model_id, max_tokens = self.max_new_tokens, "sending chat completion request");

        let body = serde_json::json!({
            "model": self.model_id,
            "messages": messages,
            "temperature": 0.0,
            "max_tokens": self.max_new_tokens,
        });

        let resp = self
            .authorized(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .context("failed to send chat completion request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat completion API returned {status}: {text}");
        }

        let chat_response: ChatResponse = resp
            .json()
            .await
            .context("failed to parse chat completion response")?;

        if let Some(usage) = &chat_response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                finish_reason = ?chat_response.choices.first().and_then(|c| c.finish_reason.as_deref()),
                "chat completion succeeded"
            );
        }

        Ok(chat_response)
    }
}

impl VisionModel for VlmClient {
    async fn respond(
        &self,
        system_prompt: &str,
        user_text: &str,
        image_paths: &[PathBuf],
    ) -> Result<String> {
        let mut image_urls = Vec::with_capacity(image_paths.len());
        for path in image_paths {
            match png_data_url(path)? {
                Some(url) => image_urls.push(url),
                None => warn!(path = %path.display(), "image not found, sending prompt without it"),
            }
        }

        let messages = [
            ChatMessage::system(system_prompt),
            ChatMessage::user_with_images(user_text, image_urls),
        ];
        let response = self.chat_completion(&messages).await?;
        Ok(response.first_text())
    }
}

/// Read a PNG file into a `data:` URL. `None` when the file does not exist.
fn png_data_url(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(Some(format!("data:image/png;base64,{encoded}")))
}
