use crate::error::ProviderError;
use crate::store::ProcessedCalls;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDateTime;

mod exotel;
pub use exotel::ExotelClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    Completed,
    Other(String),
}

impl From<&str> for CallStatus {
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case("completed") {
            CallStatus::Completed
        } else {
            CallStatus::Other(value.to_string())
        }
    }
}

/// One call as reported by the telephony provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub id: String,
    pub caller: String,
    pub called: String,
    pub status: CallStatus,
    pub duration_secs: u64,
    pub start_time: Option<NaiveDateTime>,
    pub recording_url: Option<String>,
}

impl CallRecord {
    pub fn recording(&self) -> Option<&str> {
        self.recording_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Completed and recorded.
    pub fn is_candidate(&self) -> bool {
        self.status == CallStatus::Completed && self.recording().is_some()
    }

    pub fn duration_label(&self) -> String {
        format!("{}m {}s", self.duration_secs / 60, self.duration_secs % 60)
    }

    pub fn start_time_label(&self) -> String {
        self.start_time
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

#[async_trait]
pub trait CallSource: Send + Sync {
    /// Most recent calls first, bounded by the provider page size.
    async fn list_recent_calls(&self) -> Result<Vec<CallRecord>, ProviderError>;

    async fn download_recording(&self, reference: &str) -> Result<Bytes, ProviderError>;
}

/// Keeps provider order; drops calls that are unfinished, unrecorded or
/// already filed.
pub fn filter_candidates(calls: Vec<CallRecord>, processed: &ProcessedCalls) -> Vec<CallRecord> {
    calls
        .into_iter()
        .filter(|call| call.is_candidate() && !processed.contains(&call.id))
        .collect()
}

pub async fn list_candidate_calls(
    source: &dyn CallSource,
    processed: &ProcessedCalls,
) -> Result<Vec<CallRecord>, ProviderError> {
    let calls = source.list_recent_calls().await?;
    Ok(filter_candidates(calls, processed))
}
