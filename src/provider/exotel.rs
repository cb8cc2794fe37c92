use super::{CallRecord, CallSource, CallStatus};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::version::get_useragent;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDateTime;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info};

const EXOTEL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Exotel call log and recording download over HTTP basic auth.
pub struct ExotelClient {
    client: reqwest::Client,
    base_url: String,
    sid: String,
    api_key: String,
    api_token: String,
    page_size: u32,
}

#[derive(Deserialize)]
struct CallsResponse {
    #[serde(rename = "Calls", default)]
    calls: Vec<ExotelCall>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExotelCall {
    sid: String,
    from: Option<PhoneField>,
    to: Option<PhoneField>,
    status: Option<String>,
    duration: Option<DurationField>,
    start_time: Option<String>,
    date_created: Option<String>,
    recording_url: Option<String>,
}

// Exotel returns either "From": "0987..." or "From": {"PhoneNumber": "0987..."}
#[derive(Deserialize)]
#[serde(untagged)]
enum PhoneField {
    Plain(String),
    Detailed {
        #[serde(rename = "PhoneNumber")]
        phone_number: String,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationField {
    Seconds(u64),
    Text(String),
}

impl PhoneField {
    fn into_number(self) -> String {
        match self {
            PhoneField::Plain(n) => n,
            PhoneField::Detailed { phone_number } => phone_number,
        }
    }
}

impl DurationField {
    fn seconds(&self) -> u64 {
        match self {
            DurationField::Seconds(s) => *s,
            DurationField::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

impl From<ExotelCall> for CallRecord {
    fn from(call: ExotelCall) -> Self {
        let start_time = call
            .start_time
            .as_deref()
            .or(call.date_created.as_deref())
            .and_then(|t| NaiveDateTime::parse_from_str(t.trim(), EXOTEL_TIME_FORMAT).ok());
        CallRecord {
            id: call.sid,
            caller: call
                .from
                .map(PhoneField::into_number)
                .unwrap_or_else(|| "Unknown".to_string()),
            called: call
                .to
                .map(PhoneField::into_number)
                .unwrap_or_else(|| "Unknown".to_string()),
            status: CallStatus::from(call.status.as_deref().unwrap_or_default()),
            duration_secs: call.duration.map(|d| d.seconds()).unwrap_or(0),
            start_time,
            recording_url: call.recording_url,
        }
    }
}

impl ExotelClient {
    pub fn new(
        sid: impl Into<String>,
        api_key: impl Into<String>,
        api_token: impl Into<String>,
        config: &ProviderConfig,
        page_size: u32,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(get_useragent())
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            sid: sid.into(),
            api_key: api_key.into(),
            api_token: api_token.into(),
            page_size,
        }
    }

    pub fn from_config(config: &ProviderConfig, page_size: u32) -> Result<Self> {
        let field = |value: &Option<String>, name: &str| {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("provider.{} is required", name))
        };
        Ok(Self::new(
            field(&config.sid, "sid")?,
            field(&config.api_key, "api_key")?,
            field(&config.api_token, "api_token")?,
            config,
            page_size,
        ))
    }

    fn calls_url(&self) -> String {
        format!("{}/v1/Accounts/{}/Calls.json", self.base_url, self.sid)
    }
}

#[async_trait]
impl CallSource for ExotelClient {
    async fn list_recent_calls(&self) -> Result<Vec<CallRecord>, ProviderError> {
        let start = Instant::now();
        let response = self
            .client
            .get(self.calls_url())
            .basic_auth(&self.api_key, Some(&self.api_token))
            .query(&[("PageSize", self.page_size), ("Page", 0)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let payload: CallsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let calls: Vec<CallRecord> = payload.calls.into_iter().map(CallRecord::from).collect();
        debug!(
            count = calls.len(),
            elapsed = start.elapsed().as_millis(),
            "listed recent calls"
        );
        Ok(calls)
    }

    async fn download_recording(&self, reference: &str) -> Result<Bytes, ProviderError> {
        let start = Instant::now();
        let response = self
            .client
            .get(reference)
            .basic_auth(&self.api_key, Some(&self.api_token))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(ProviderError::NotFound(reference.to_string()))
            }
            status if !status.is_success() => Err(ProviderError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
            _ => {
                let audio = response.bytes().await?;
                info!(
                    size = audio.len(),
                    elapsed = start.elapsed().as_millis(),
                    "downloaded recording"
                );
                Ok(audio)
            }
        }
    }
}
