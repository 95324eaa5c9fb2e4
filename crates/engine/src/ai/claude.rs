//! Anthropic Messages API client

use super::{AiError, AiProvider, ChatClient, CompletionOptions};
use crate::api::http_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
}

impl ClaudeClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

#[async_trait]
impl ChatClient for ClaudeClient {
    fn provider(&self) -> AiProvider {
        AiProvider::Claude
    }

    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<String, AiError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                provider: AiProvider::Claude,
                status,
                body,
            });
        }

        let body: MessagesResponse = response.json().await?;
        body.content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or(AiError::EmptyResponse(AiProvider::Claude))
    }
}
