use super::TextGenerator;
use crate::config::AnalysisConfig;
use crate::version::get_useragent;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-pro";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Default)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Default)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Google Gemini `generateContent` backend.
pub struct GeminiGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl GeminiGenerator {
    pub fn from_config(api_key: String, config: &AnalysisConfig) -> Result<Self> {
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(get_useragent())
            .build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/models/{}:generateContent",
                base_url.trim_end_matches('/'),
                model
            ),
            api_key,
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                max_output_tokens: 150,
            },
        };
        let response = self
            .client
            .post(&self.url)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("gemini returned {}: {}", status, body));
        }
        let payload: GenerateResponse = response.json().await?;
        payload
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| anyhow!("gemini returned no candidates"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::spawn_server;
    use axum::{extract::Query, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn generator(addr: std::net::SocketAddr) -> GeminiGenerator {
        let config = AnalysisConfig {
            base_url: Some(format!("http://{}/v1beta", addr)),
            ..Default::default()
        };
        GeminiGenerator::from_config("g-key".to_string(), &config).unwrap()
    }

    #[tokio::test]
    async fn test_generate_reads_first_candidate() {
        let app = Router::new().route(
            "/v1beta/models/gemini-pro:generateContent",
            post(
                |Query(params): Query<HashMap<String, String>>, Json(body): Json<Value>| async move {
                    if params.get("key").map(String::as_str) != Some("g-key")
                        || body["generationConfig"]["maxOutputTokens"] != 150
                    {
                        return (StatusCode::BAD_REQUEST, Json(json!({})));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "candidates": [{"content": {"parts": [
                                {"text": "Concern: Refund for cancelled order\nMood: Polite"}
                            ]}}]
                        })),
                    )
                },
            ),
        );
        let addr = spawn_server(app).await;

        let text = generator(addr).generate("prompt").await.unwrap();
        assert_eq!(text, "Concern: Refund for cancelled order\nMood: Polite");
    }

    #[tokio::test]
    async fn test_error_status_is_an_error() {
        let app = Router::new().route(
            "/v1beta/models/gemini-pro:generateContent",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "quota") }),
        );
        let addr = spawn_server(app).await;

        assert!(generator(addr).generate("prompt").await.is_err());
    }
}
