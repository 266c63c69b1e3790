//! Google Gemini generator.
//!
//! Calls the Gemini `generateContent` endpoint. Auth via URL query param.
//! Text only: avatar generation is reported as unsupported.

use async_trait::async_trait;
use chorus_core::{
    config::GeminiConfig,
    error::ChorusError,
    prompt::{Prompt, Role},
    traits::Generator,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini generator.
pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiGenerator {
    /// Create from config values.
    pub fn from_config(config: &GeminiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    async fn generate(&self, body: GeminiRequest) -> Result<String, ChorusError> {
        let url = format!(
            "{GEMINI_BASE_URL}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        debug!("gemini: POST models/{}:generateContent", self.model);

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChorusError::Generator(format!("gemini request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ChorusError::Generator(format!(
                "gemini returned {status}: {text}"
            )));
        }

        let parsed: GeminiResponse = resp.json().await.map_err(|e| {
            ChorusError::Generator(format!("gemini: failed to parse response: {e}"))
        })?;

        if let Some(usage) = parsed.usage_metadata.as_ref() {
            debug!("gemini: {} tokens", usage.total_token_count);
        }

        first_text(parsed)
            .ok_or_else(|| ChorusError::Generator("gemini: empty completion".to_string()))
    }
}

/// Map a prompt onto Gemini contents; assistant turns become `model`.
fn build_request(prompt: &Prompt) -> GeminiRequest {
    let system_instruction = if prompt.system.is_empty() {
        None
    } else {
        Some(GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: prompt.system.clone(),
            }],
        })
    };

    let contents = prompt
        .entries
        .iter()
        .map(|e| GeminiContent {
            role: Some(
                match e.role {
                    Role::Assistant => "model",
                    Role::User => "user",
                }
                .to_string(),
            ),
            parts: vec![GeminiPart {
                text: e.content.clone(),
            }],
        })
        .collect();

    GeminiRequest {
        contents,
        system_instruction,
    }
}

fn first_text(parsed: GeminiResponse) -> Option<String> {
    parsed
        .candidates?
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .map(|p| p.text)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    total_token_count: u64,
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn ask(&self, prompt: &str) -> Result<String, ChorusError> {
        let mut single = Prompt::default();
        single.push(Role::User, prompt);
        self.generate(build_request(&single)).await
    }

    async fn continue_chat(&self, prompt: &Prompt) -> Result<String, ChorusError> {
        self.generate(build_request(prompt)).await
    }

    async fn generate_avatar(&self, _prompt: &str) -> Result<Vec<u8>, ChorusError> {
        Err(ChorusError::Generator(
            "gemini: avatar generation not supported".to_string(),
        ))
    }

    async fn is_available(&self) -> bool {
        if self.api_key.is_empty() {
            warn!("gemini: no API key configured");
            return false;
        }
        let url = format!("{GEMINI_BASE_URL}/models?key={}", self.api_key);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("gemini not available: {e}");
                false
            }
        }
    }
}
