//! OpenAI-compatible chat completions (OpenAI and Groq)

use super::{AiError, AiProvider, ChatClient, CompletionOptions};
use crate::api::http_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
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
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// Any endpoint speaking the `/chat/completions` protocol
#[derive(Clone)]
pub struct OpenAiCompatClient {
    client: Client,
    provider: AiProvider,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(
        provider: AiProvider,
        base_url: impl Into<String>,
        api_key: String,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: http_client(),
            provider,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    pub fn openai(api_key: String) -> Self {
        Self::new(AiProvider::OpenAi, OPENAI_BASE_URL, api_key, "gpt-4o")
    }

    pub fn groq(api_key: String) -> Self {
        Self::new(
            AiProvider::Groq,
            GROQ_BASE_URL,
            api_key,
            "llama-3.3-70b-versatile",
        )
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    fn provider(&self) -> AiProvider {
        self.provider
    }

    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<String, AiError> {
        let request = ChatRequest {
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
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                provider: self.provider,
                status,
                body,
            });
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(AiError::EmptyResponse(self.provider))
    }
}
