use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ModelError;
use crate::llm::ModelClient;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT_SECS: u64 = 60;
const MAX_TOKENS: u32 = 2048;

// Model constants
pub const CLAUDE_HAIKU: &str = "claude-3-5-haiku-20241022";
pub const CLAUDE_SONNET: &str = "claude-sonnet-4-20250514";

#[derive(Debug, Serialize, Clone)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

pub struct AnthropicClient {
    client: Client,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
        })
    }
}

/// Turn an error body into a ModelError, preferring the structured form.
fn error_from_body(status: u16, body: &str) -> ModelError {
    match serde_json::from_str::<AnthropicError>(body) {
        Ok(parsed) => ModelError::from_status(
            status,
            &format!("{} - {}", parsed.error.error_type, parsed.error.message),
        ),
        Err(_) => ModelError::from_status(status, body),
    }
}

/// Last text block of the reply.
fn extract_text(response: MessagesResponse) -> Result<String, ModelError> {
    response
        .content
        .into_iter()
        .filter(|c| c.content_type == "text")
        .last()
        .and_then(|c| c.text)
        .ok_or_else(|| ModelError::malformed("No text response from Claude"))
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, ModelError> {
        let request = MessagesRequest {
            model: model.to_string(),
            max_tokens: MAX_TOKENS,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: 0.7,
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::network(&e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(error_from_body(status, &error_text));
        }

        let completion: MessagesResponse = response.json().await.map_err(|e| ModelError::network(&e))?;
        extract_text(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelErrorKind;

    #[test]
    fn test_structured_error_body() {
        let err = error_from_body(
            401,
            r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#,
        );
        assert_eq!(err.kind, ModelErrorKind::Auth);
        assert!(err.message.contains("invalid x-api-key"));

        let err = error_from_body(
            529,
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        assert_eq!(err.kind, ModelErrorKind::Server);
    }

    #[test]
    fn test_last_text_block_wins() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"thinking","text":null},{"type":"text","text":"first"},{"type":"text","text":"Nice work."}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Nice work.");

        let empty: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert_eq!(extract_text(empty).unwrap_err().kind, ModelErrorKind::Malformed);
    }
}
