//! Reply generation
//!
//! A responder turns one user query (plus optional history and profile)
//! into a spoken reply and a structured command. Requests may take seconds
//! and cannot be interrupted server-side; callers cancel by ignoring the
//! result.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::command::{Reply, parse_reply};
use super::prompt::{UserProfile, system_instruction};
use crate::history::{Role, Turn};
use crate::{Error, Result};

/// Default OpenAI-compatible API base
pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.openai.com/v1";
/// Default Gemini API base
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const TEMPERATURE: f32 = 0.8;

/// Upper bound on a single responder request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// One query to a responder
#[derive(Debug, Clone, Copy)]
pub struct ResponderRequest<'a> {
    pub query: &'a str,
    /// Earlier turns, oldest first
    pub history: &'a [Turn],
    pub profile: Option<&'a UserProfile>,
    /// Allow the model to search the web
    pub search_enabled: bool,
}

/// Generates replies
#[async_trait]
pub trait Responder: Send + Sync {
    /// Answer a query
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the model returns nothing
    async fn respond(&self, request: ResponderRequest<'_>) -> Result<Reply>;
}

// OpenAI-compatible chat completion wire types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// Responder backed by an OpenAI-compatible chat completions endpoint
pub struct ChatResponder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl ChatResponder {
    /// Create a chat responder
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty or the HTTP client cannot be built
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("API key required for chat responder".into()));
        }

        Ok(Self {
            client: http_client()?,
            api_key,
            model,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_CHAT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl Responder for ChatResponder {
    async fn respond(&self, request: ResponderRequest<'_>) -> Result<Reply> {
        let system = system_instruction(request.profile, request.search_enabled);

        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: &system,
        });
        messages.extend(request.history.iter().map(|turn| ChatMessage {
            role: match turn.role {
                Role::User => "user",
                Role::Model => "assistant",
            },
            content: &turn.text,
        }));
        messages.push(ChatMessage {
            role: "user",
            content: request.query,
        });

        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            // Search-mode answers are JSON by instruction only
            response_format: (!request.search_enabled).then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        tracing::debug!(
            model = %self.model,
            history = request.history.len(),
            search = request.search_enabled,
            "requesting chat completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Responder(format!("chat API error {status}: {text}")));
        }

        let completion: ChatResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        parse_reply(&content)
    }
}

/// Responder backed by the Gemini `generateContent` API
pub struct GeminiResponder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiResponder {
    /// Create a Gemini responder
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty or the HTTP client cannot be built
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("API key required for Gemini responder".into()));
        }

        Ok(Self {
            client: http_client()?,
            api_key,
            model,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

/// Schema the model's JSON reply must follow when search is off
fn reply_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "type": {
                "type": "STRING",
                "enum": ["chat", "open_app", "toggle_wifi", "set_timer"]
            },
            "textResponse": { "type": "STRING" },
            "params": {
                "type": "OBJECT",
                "properties": {
                    "appName": { "type": "STRING" },
                    "wifiStatus": { "type": "STRING", "enum": ["on", "off"] },
                    "durationSeconds": { "type": "INTEGER" }
                }
            }
        },
        "required": ["type", "textResponse"]
    })
}

#[async_trait]
impl Responder for GeminiResponder {
    async fn respond(&self, request: ResponderRequest<'_>) -> Result<Reply> {
        let system = system_instruction(request.profile, request.search_enabled);

        let mut contents: Vec<serde_json::Value> = request
            .history
            .iter()
            .map(|turn| {
                serde_json::json!({
                    "role": turn.role,
                    "parts": [{ "text": turn.text }]
                })
            })
            .collect();
        contents.push(serde_json::json!({
            "role": Role::User,
            "parts": [{ "text": request.query }]
        }));

        let mut body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": contents,
            "generationConfig": { "temperature": TEMPERATURE }
        });
        if request.search_enabled {
            body["tools"] = serde_json::json!([{ "google_search": {} }]);
        } else {
            body["generationConfig"]["responseMimeType"] = "application/json".into();
            body["generationConfig"]["responseSchema"] = reply_schema();
        }

        tracing::debug!(
            model = %self.model,
            history = request.history.len(),
            search = request.search_enabled,
            "requesting gemini reply"
        );

        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Responder(format!("Gemini API error {status}: {text}")));
        }

        let payload: serde_json::Value = response.json().await?;
        parse_reply(&candidate_text(&payload))
    }
}

/// Concatenate the text parts of the first candidate
fn candidate_text(payload: &serde_json::Value) -> String {
    payload
        .pointer("/candidates/0/content/parts")
        .and_then(serde_json::Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(serde_json::Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_keys_are_rejected() {
        assert!(ChatResponder::new(String::new(), "gpt-4o-mini".into(), None).is_err());
        assert!(GeminiResponder::new("  ".into(), "gemini-2.5-flash".into(), None).is_err());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let responder = ChatResponder::new(
            "key".into(),
            "model".into(),
            Some("http://localhost:8080/v1/".into()),
        )
        .unwrap();
        assert_eq!(responder.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn candidate_text_joins_parts() {
        let payload = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"type\":\"chat\"," }, { "text": "\"textResponse\":\"Chào\"}" }] }
            }]
        });
        let text = candidate_text(&payload);
        assert_eq!(parse_reply(&text).unwrap(), Reply::chat("Chào"));
    }

    #[test]
    fn missing_candidates_give_empty_text() {
        assert_eq!(candidate_text(&serde_json::json!({})), "");
        assert!(parse_reply(&candidate_text(&serde_json::json!({}))).is_err());
    }

    #[test]
    fn schema_requires_text_response() {
        let schema = reply_schema();
        assert_eq!(schema["required"][1], "textResponse");
    }
}
