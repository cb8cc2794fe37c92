use super::TranscriptionClient;
use crate::config::TranscriptionConfig;
use crate::error::TranscriptionError;
use crate::version::get_useragent;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;
use tracing::info;

// Deepgram prerecorded response, reduced to the fields we read.
#[derive(Deserialize, Default)]
struct ListenResponse {
    #[serde(default)]
    results: ListenResults,
}

#[derive(Deserialize, Default)]
struct ListenResults {
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Deserialize, Default)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize, Default)]
struct Alternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

pub struct DeepgramClient {
    client: reqwest::Client,
    api_key: String,
    config: TranscriptionConfig,
}

impl DeepgramClient {
    pub fn new(api_key: impl Into<String>, config: TranscriptionConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(get_useragent())
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            config,
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("transcription.api_key is required"))?;
        Ok(Self::new(api_key, config.clone()))
    }
}

#[async_trait]
impl TranscriptionClient for DeepgramClient {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscriptionError> {
        let start = Instant::now();
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", &self.config.content_type)
            .query(&[
                ("model", self.config.model.as_str()),
                ("language", self.config.language.as_str()),
                ("punctuate", if self.config.punctuate { "true" } else { "false" }),
                ("diarize", if self.config.diarize { "true" } else { "false" }),
            ])
            .body(audio.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranscriptionError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let payload: ListenResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Decode(e.to_string()))?;
        let best = payload
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|channel| channel.alternatives.into_iter().next())
            .unwrap_or_default();

        let transcript = best.transcript.trim().to_string();
        if transcript.is_empty() {
            return Err(TranscriptionError::Unavailable);
        }
        info!(
            chars = transcript.len(),
            confidence = best.confidence,
            elapsed = start.elapsed().as_millis(),
            "transcription completed"
        );
        Ok(transcript)
    }
}
