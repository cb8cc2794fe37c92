use crate::agents::Direction;
use crate::analysis::Mood;
use crate::error::HelpdeskError;
use crate::utils::truncate_chars;
use async_trait::async_trait;
use serde::Serialize;

mod credential;
mod zoho;

pub use credential::{
    AccessCredential, CredentialManager, CredentialStatus, CredentialStore, FileCredentialStore,
};
pub use zoho::ZohoDeskFiler;

const SUBJECT_CONCERN_CHARS: usize = 50;

/// Everything the helpdesk needs to know about one processed call.
#[derive(Debug, Clone, Serialize)]
pub struct CallTicket {
    pub call_id: String,
    pub customer_number: String,
    pub agent_name: String,
    pub time: String,
    pub duration: String,
    pub direction: Direction,
    pub mood: Mood,
    pub concern: String,
    pub recording_url: Option<String>,
    pub transcript: String,
}

impl CallTicket {
    pub fn subject(&self) -> String {
        format!(
            "Call from {} - {}",
            self.customer_number,
            truncate_chars(&self.concern, SUBJECT_CONCERN_CHARS)
        )
    }

    /// Ticket body. The transcript goes into a separate private note.
    pub fn description(&self) -> String {
        format!(
            "Call from {customer}\n\
             \n\
             Call Details:\n\
             - Agent: {agent}\n\
             - Time: {time}\n\
             - Duration: {duration}\n\
             - Direction: {direction}\n\
             - Mood: {mood}\n\
             \n\
             Concern Identified:\n\
             {concern}\n\
             \n\
             Recording: {recording}\n\
             \n\
             Call ID: {call_id}\n\
             ---\n\
             Auto-generated from call processing",
            customer = self.customer_number,
            agent = self.agent_name,
            time = self.time,
            duration = self.duration,
            direction = self.direction.describe(),
            mood = self.mood,
            concern = self.concern,
            recording = self.recording_url.as_deref().unwrap_or("Not available"),
            call_id = self.call_id,
        )
    }

    pub fn note(&self) -> String {
        format!(
            "Call Transcription\n\n{}\n\n---\nCall ID: {}",
            self.transcript, self.call_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FiledTicket {
    pub id: String,
    pub number: Option<String>,
    pub contact_id: Option<String>,
    pub note_attached: bool,
}

/// Creates the helpdesk records for a call. Success means the ticket exists;
/// contact and note problems are reported inside [`FiledTicket`].
#[async_trait]
pub trait TicketFiler: Send + Sync {
    async fn file(&self, ticket: &CallTicket) -> Result<FiledTicket, HelpdeskError>;
}
