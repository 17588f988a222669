use crate::config::ChatConfig;
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Produces a reply to a conversation
#[allow(async_fn_in_trait)]
pub trait Generator {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Client for an OpenAI-compatible chat-completion API
#[derive(Clone)]
pub struct ChatClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl ChatClient {
    /// Create a chat client, or `None` when no API key is configured
    pub fn from_config(config: &ChatConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;

        Some(ChatClient {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client: reqwest::Client::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Generator for ChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        debug!("Sending {} messages to {}", messages.len(), self.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Chat completion request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "API request failed: {} {}",
                status,
                error_text
            ));
        }

        let response_data: CompletionResponse = response
            .json()
            .await
            .context("Invalid chat completion response")?;

        first_reply(response_data)
    }
}

fn first_reply(response: CompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| anyhow::anyhow!("No response generated"))
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_key_means_no_client() {
        let config = ChatConfig {
            api_key: None,
            base_url: "https://api.example.test/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        };
        assert!(ChatClient::from_config(&config).is_none());
    }

    #[test]
    fn test_request_shape() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let request = CompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"},
                ],
                "temperature": 0.2f32,
                "max_tokens": 1024,
            })
        );
    }

    #[test]
    fn test_first_reply() {
        let response: CompletionResponse = serde_json::from_value(json!({
            "choices": [
                {"message": {"role": "assistant", "content": "Paris."}},
                {"message": {"role": "assistant", "content": "Lyon."}},
            ]
        }))
        .unwrap();
        assert_eq!(first_reply(response).unwrap(), "Paris.");

        let empty: CompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(first_reply(empty).is_err());
    }
}
