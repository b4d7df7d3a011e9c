//! OpenAI chat-completions client for extraction prompts.

use super::Llm;
use crate::error::{EngramError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub struct OpenAiLlm {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiLlm {
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl Llm for OpenAiLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: [ChatMessage {
                    role: "user",
                    content: prompt,
                }],
                response_format: ResponseFormat { kind: "json_object" },
            })
            .send()
            .await
            .map_err(|e| EngramError::Downstream(format!("openai chat request: {e}")))?;

        if !resp.status().is_success() {
            return Err(EngramError::Downstream(format!(
                "openai chat completion failed with status {}",
                resp.status()
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| EngramError::Downstream(format!("openai chat response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngramError::Downstream("openai chat response had no choices".into()))
    }
}
