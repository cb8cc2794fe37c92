use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("recording not found: {0}")]
    NotFound(String),

    #[error("provider response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum TranscriptionError {
    #[error("transcription request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("transcription service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transcription response could not be decoded: {0}")]
    Decode(String),

    #[error("transcript unavailable")]
    Unavailable,
}

#[derive(Error, Debug)]
pub enum HelpdeskError {
    #[error("helpdesk request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("helpdesk rejected the refreshed access token")]
    Unauthorized,

    #[error("access token refresh failed: {0}")]
    Refresh(String),

    #[error("helpdesk returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("helpdesk response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("state file io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a call was not filed in this cycle.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Network, timeout or upstream failure; retried next cycle.
    #[error("transient failure: {0}")]
    TransientIo(String),

    /// 401 persisted through one refresh-and-retry.
    #[error("helpdesk authorization expired")]
    AuthExpired,

    #[error("no agent matches caller {caller} or callee {called}")]
    Unresolved { caller: String, called: String },

    #[error("terminal failure: {0}")]
    Terminal(String),

    #[error("{0} is disabled")]
    IntegrationDisabled(&'static str),
}

impl From<ProviderError> for PipelineError {
    fn from(e: ProviderError) -> Self {
        PipelineError::TransientIo(e.to_string())
    }
}

impl From<TranscriptionError> for PipelineError {
    fn from(e: TranscriptionError) -> Self {
        PipelineError::TransientIo(e.to_string())
    }
}

impl From<HelpdeskError> for PipelineError {
    fn from(e: HelpdeskError) -> Self {
        match e {
            HelpdeskError::Unauthorized => PipelineError::AuthExpired,
            HelpdeskError::Transport(_) => PipelineError::TransientIo(e.to_string()),
            HelpdeskError::Status { status, .. } if status >= 500 => {
                PipelineError::TransientIo(e.to_string())
            }
            other => PipelineError::Terminal(other.to_string()),
        }
    }
}
