//! OpenAI-compatible generator.
//!
//! Works with OpenAI's API and any compatible endpoint. Chat goes through
//! `/chat/completions`, avatars through `/images/generations`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chorus_core::{
    config::OpenAiConfig,
    error::ChorusError,
    prompt::{Prompt, Role},
    traits::Generator,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

/// OpenAI-compatible generator.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    image_model: String,
    image_size: String,
}

impl OpenAiGenerator {
    /// Create from config values.
    pub fn from_config(config: &OpenAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            image_model: config.image_model.clone(),
            image_size: config.image_size.clone(),
        }
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, ChorusError> {
        let start = Instant::now();
        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!("openai: POST {url} model={}", self.model);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChorusError::Generator(format!("openai request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ChorusError::Generator(format!(
                "openai returned {status}: {text}"
            )));
        }

        let parsed: ChatCompletionResponse = resp.json().await.map_err(|e| {
            ChorusError::Generator(format!("openai: failed to parse response: {e}"))
        })?;

        let tokens = parsed.usage.as_ref().and_then(|u| u.total_tokens);
        debug!(
            "openai: {} tokens in {}ms",
            tokens.unwrap_or_default(),
            start.elapsed().as_millis()
        );

        first_choice(parsed)
            .ok_or_else(|| ChorusError::Generator("openai: empty completion".to_string()))
    }
}

/// Build OpenAI-format messages (system as a message role).
pub(crate) fn build_openai_messages(prompt: &Prompt) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(prompt.entries.len() + 1);
    if !prompt.system.is_empty() {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: prompt.system.clone(),
        });
    }
    for entry in &prompt.entries {
        messages.push(ChatMessage {
            role: entry.role.as_str().to_string(),
            content: entry.content.clone(),
        });
    }
    messages
}

fn first_choice(parsed: ChatCompletionResponse) -> Option<String> {
    parsed
        .choices?
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .map(|m| m.content)
}

#[derive(Serialize, Deserialize, Clone)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
pub(crate) struct ChatCompletionResponse {
    pub choices: Option<Vec<ChatChoice>>,
    pub usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
pub(crate) struct ChatChoice {
    pub message: Option<ChatMessage>,
}

#[derive(Deserialize)]
pub(crate) struct ChatUsage {
    pub total_tokens: Option<u64>,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
    response_format: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

fn decode_image(parsed: ImageResponse) -> Result<Vec<u8>, ChorusError> {
    let encoded = parsed
        .data
        .into_iter()
        .find_map(|d| d.b64_json)
        .ok_or_else(|| ChorusError::Generator("openai: no image in response".to_string()))?;
    BASE64
        .decode(encoded)
        .map_err(|e| ChorusError::Generator(format!("openai: bad image payload: {e}")))
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn ask(&self, prompt: &str) -> Result<String, ChorusError> {
        self.chat(vec![ChatMessage {
            role: Role::User.as_str().to_string(),
            content: prompt.to_string(),
        }])
        .await
    }

    async fn continue_chat(&self, prompt: &Prompt) -> Result<String, ChorusError> {
        self.chat(build_openai_messages(prompt)).await
    }

    async fn generate_avatar(&self, prompt: &str) -> Result<Vec<u8>, ChorusError> {
        let url = format!("{}/images/generations", self.base_url);
        debug!("openai: POST {url} model={}", self.image_model);

        let body = ImageRequest {
            model: &self.image_model,
            prompt,
            n: 1,
            size: &self.image_size,
            response_format: "b64_json",
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChorusError::Generator(format!("openai image request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ChorusError::Generator(format!(
                "openai images returned {status}: {text}"
            )));
        }

        let parsed: ImageResponse = resp.json().await.map_err(|e| {
            ChorusError::Generator(format!("openai: failed to parse image response: {e}"))
        })?;
        decode_image(parsed)
    }

    async fn is_available(&self) -> bool {
        if self.api_key.is_empty() {
            warn!("openai: no API key configured");
            return false;
        }
        let url = format!("{}/models", self.base_url);
        match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("openai not available: {e}");
                false
            }
        }
    }
}
