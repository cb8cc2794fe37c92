use super::TextGenerator;
use crate::version::get_useragent;
use anyhow::{anyhow, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are an AI assistant analyzing customer service calls. \
     Provide a brief concern summary (1-2 sentences) and mood (Positive/Neutral/Negative/Urgent).";

// Builder for OpenAiGenerator
pub struct OpenAiGeneratorBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl Default for OpenAiGeneratorBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 150,
            timeout: Duration::from_secs(30),
        }
    }
}

impl OpenAiGeneratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<OpenAiGenerator> {
        let api_key = self
            .api_key
            .ok_or_else(|| anyhow!("API key is required"))?;

        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = self.base_url {
            config = config.with_api_base(base_url);
        }
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(get_useragent())
            .build()?;

        Ok(OpenAiGenerator {
            client: Client::with_config(config).with_http_client(http),
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
    }
}

/// Chat completion backend for concern analysis.
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiGenerator {
    fn messages(prompt: &str) -> Result<Vec<ChatCompletionRequestMessage>> {
        Ok(vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_PROMPT)
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into(),
        ])
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::messages(prompt)?)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()?;

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| anyhow!("empty completion"))
    }
}
