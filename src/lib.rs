pub mod agents;
pub mod analysis;
pub mod app;
pub mod config;
pub mod error;
pub mod helpdesk;
pub mod pipeline;
pub mod provider;
pub mod store;
pub mod transcription;
pub mod utils;
pub mod version;

#[cfg(test)]
mod test_util;
