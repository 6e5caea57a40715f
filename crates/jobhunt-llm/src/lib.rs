//! Completion-API adapter that turns a raw job description into a short
//! Hebrew summary for the summary column.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "jobhunt-llm";

/// Fixed instruction; the summarizer is not a general chat surface.
const SYSTEM_PROMPT: &str =
    "אתה מסכם משרות לעברית בצורה תמציתית ופשוטה, עבור מחפש עבודה.";
const USER_PROMPT_PREFIX: &str =
    "סכם את תיאור המשרה הבא בצורה פשוטה ותמציתית, והצג את עיקרי הדרישות והאחריות:";

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 300;

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("nothing to summarize: the description is empty")]
    EmptyInput,
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("completion API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("completion API returned no text")]
    EmptyCompletion,
}

/// Seam for the completion backend so the web layer can be tested without
/// network access.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, description: &str) -> Result<String, SummarizeError>;
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            model: std::env::var("SUMMARY_MODEL").unwrap_or_else(|_| "gpt-4".to_string()),
            timeout: Duration::from_secs(
                std::env::var("SUMMARY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Chat-completions implementation of [`Summarizer`].
#[derive(Debug)]
pub struct OpenAiSummarizer {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiSummarizer {
    pub fn new(config: LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, description: &str) -> Result<String, SummarizeError> {
        if description.trim().is_empty() {
            return Err(SummarizeError::EmptyInput);
        }

        let user_message = format!("{USER_PROMPT_PREFIX}\n\n{description}");
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_message,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let completion: ChatResponse = response.json().await?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(SummarizeError::EmptyCompletion)?;

        debug!(model = %self.config.model, chars = text.len(), "summary generated");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summarizer() -> OpenAiSummarizer {
        OpenAiSummarizer::new(LlmConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "test".to_string(),
            model: "gpt-4".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn empty_input_short_circuits_without_a_call() {
        // base_url points at a closed port; reaching it would fail loudly.
        let result = summarizer().summarize("   \n\t ").await;
        assert!(matches!(result, Err(SummarizeError::EmptyInput)));
    }

    #[test]
    fn response_parsing_takes_first_choice() {
        let raw = r#"{"choices":[{"message":{"content":"  תקציר קצר  "}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap();
        assert_eq!(text.trim(), "תקציר קצר");
    }

    #[test]
    fn response_with_null_content_is_empty() {
        let raw = r#"{"choices":[{"message":{"content":null}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
