use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::CompletionConfig;

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("API key is not configured (set OPENROUTER_API_KEY)")]
    MissingCredential,
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Completion API error: {status} - {body}")]
    ApiError { status: u16, body: String },
    #[error("Completion API returned an empty reply")]
    EmptyReply,
}

/// One chat-completion call: a system instruction, one user message and a
/// bound on the reply size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_message: String,
    pub user_message: String,
    pub max_reply_tokens: u32,
}

/// A hosted chat-completion endpoint.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Whether a credential is available. Callers check this before calling
    /// `complete` so that a missing key never costs a network round trip.
    fn has_credential(&self) -> bool;

    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}

#[derive(Deserialize, Debug)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize, Debug)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client, pointed at OpenRouter by default.
pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenRouterClient {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }

    pub fn from_config(config: &CompletionConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.model.clone(),
            config.api_key.clone(),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionService for OpenRouterClient {
    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CompletionError::MissingCredential)?;

        tracing::debug!(
            "Completion request to {} (model {}, max_tokens {})",
            self.base_url,
            self.model,
            request.max_reply_tokens
        );
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": request.system_message },
                    { "role": "user", "content": request.user_message },
                ],
                "max_tokens": request.max_reply_tokens,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let completion = response.json::<ChatCompletionResponse>().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(CompletionError::EmptyReply)
    }
}
