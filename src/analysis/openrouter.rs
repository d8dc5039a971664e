//! OpenRouter (OpenAI-compatible) chat-completions client.
//!
//! One POST per call, bearer-authenticated. The key and model are read
//! from the settings store on every call so a change in settings applies
//! to the next request without rebuilding the client.

use super::prompts;
use super::{AnalysisClient, AnalysisError, ConversationTurn};
use crate::config::AnalysisConfig;
use crate::encode::EncodedImage;
use crate::safety::redact::redact_for_display;
use crate::settings::{SettingsStore, DEFAULT_MODEL};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Longest error snippet carried into logs and overlay text.
const ERROR_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    settings: Arc<dyn SettingsStore>,
    config: AnalysisConfig,
}

impl OpenRouterClient {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        config: AnalysisConfig,
    ) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AnalysisError::Unknown(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            http,
            settings,
            config,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn api_key(&self) -> Result<String, AnalysisError> {
        let stored = self.settings.api_key().unwrap_or_else(|e| {
            log::error!("[ANALYSIS] Could not read API key from settings: {}", e);
            String::new()
        });
        let key = if stored.trim().is_empty() {
            self.config.fallback_api_key.clone().unwrap_or_default()
        } else {
            stored
        };
        if key.trim().is_empty() {
            log::warn!("[ANALYSIS] No API key configured");
            return Err(AnalysisError::Unauthenticated);
        }
        Ok(key.trim().to_string())
    }

    fn model(&self) -> String {
        self.settings.selected_model().unwrap_or_else(|e| {
            log::error!("[ANALYSIS] Could not read model from settings: {}", e);
            DEFAULT_MODEL.to_string()
        })
    }

    fn build_request(&self, messages: Vec<WireMessage>) -> CompletionRequest {
        CompletionRequest {
            model: self.model(),
            messages,
            max_tokens: self.config.max_tokens,
        }
    }

    async fn complete(
        &self,
        messages: Vec<WireMessage>,
        label: &str,
    ) -> Result<String, AnalysisError> {
        let api_key = self.api_key()?;
        let request = self.build_request(messages);

        log::info!(
            "[ANALYSIS] {}: model={}, {} message(s)",
            label,
            request.model,
            request.messages.len()
        );
        let start = Instant::now();

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&api_key)
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(label, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(label, e))?;

        log::info!(
            "[ANALYSIS] {}: HTTP {} in {}ms ({} bytes)",
            label,
            status.as_u16(),
            start.elapsed().as_millis(),
            body.len()
        );

        if !status.is_success() {
            let error = classify_status(status.as_u16(), &body);
            log::error!("[ANALYSIS] {} failed: {}", label, error);
            return Err(error);
        }

        parse_completion(&body).inspect_err(|e| {
            log::error!("[ANALYSIS] {} returned unusable body: {}", label, e);
        })
    }
}

#[async_trait]
impl AnalysisClient for OpenRouterClient {
    async fn analyze(
        &self,
        image: EncodedImage,
        question: Option<&str>,
    ) -> Result<String, AnalysisError> {
        log::info!(
            "[ANALYSIS] Image {} ({}x{}, {} bytes)",
            image.digest(),
            image.width(),
            image.height(),
            image.bytes().len()
        );
        let message = image_message(&image, question);
        // The payload is dropped with `image` once the request is built.
        drop(image);
        self.complete(vec![message], "analyze").await
    }

    async fn continue_chat(
        &self,
        transcript: &[ConversationTurn],
    ) -> Result<String, AnalysisError> {
        let messages = transcript
            .iter()
            .map(|turn| WireMessage {
                role: turn.origin.role(),
                content: WireContent::Text(turn.content.clone()),
            })
            .collect();
        self.complete(messages, "chat").await
    }
}

/// One user message carrying the question text and the image as a data URL.
fn image_message(image: &EncodedImage, question: Option<&str>) -> WireMessage {
    WireMessage {
        role: "user",
        content: WireContent::Parts(vec![
            ContentPart::Text {
                text: prompts::analysis_question(question).to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image.data_url(),
                },
            },
        ]),
    }
}

fn transport_error(label: &str, e: reqwest::Error) -> AnalysisError {
    let detail = redact_for_display(&e.to_string(), ERROR_SNIPPET_CHARS);
    log::error!("[ANALYSIS] {} transport error: {}", label, detail);
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        AnalysisError::Unreachable(detail)
    } else if e.is_decode() {
        AnalysisError::Malformed(detail)
    } else {
        AnalysisError::Unknown(detail)
    }
}

/// Maps a non-success HTTP status (and its body) to an error.
pub fn classify_status(status: u16, body: &str) -> AnalysisError {
    match status {
        401 | 403 => AnalysisError::Unauthenticated,
        408 | 502 | 503 | 504 => AnalysisError::Unreachable(format!("HTTP {}", status)),
        _ => {
            let snippet = redact_for_display(body.trim(), ERROR_SNIPPET_CHARS);
            if snippet.is_empty() {
                AnalysisError::Unknown(format!("HTTP {}", status))
            } else {
                AnalysisError::Unknown(format!("HTTP {}: {}", status, snippet))
            }
        }
    }
}

/// Pulls `choices[0].message.content` out of a success body.
pub fn parse_completion(body: &str) -> Result<String, AnalysisError> {
    let response: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| AnalysisError::Malformed(format!("invalid JSON: {}", e)))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| {
            AnalysisError::Malformed("missing choices[0].message.content".to_string())
        })
}
