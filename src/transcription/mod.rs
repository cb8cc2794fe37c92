use crate::error::TranscriptionError;
use async_trait::async_trait;

mod deepgram;
pub use deepgram::DeepgramClient;

/// Speech to text over a complete recording.
///
/// An empty transcript means the service heard nothing usable and is
/// reported as [`TranscriptionError::Unavailable`], never as `Ok("")`.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscriptionError>;
}
