use crate::agents::AgentDirectory;
use crate::analysis::ConcernAnalyzer;
use crate::config::{Config, HelpdeskConfig};
use crate::helpdesk::{CredentialManager, TicketFiler, ZohoDeskFiler};
use crate::pipeline::CallProcessor;
use crate::provider::{CallSource, ExotelClient};
use crate::store::ProcessedCalls;
use crate::transcription::{DeepgramClient, TranscriptionClient};
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Wires a [`CallProcessor`] from configuration. Any adapter may be replaced
/// before `build`, which is how tests run the pipeline against fakes.
#[derive(Default)]
pub struct AppBuilder {
    config: Option<Config>,
    source: Option<Arc<dyn CallSource>>,
    transcriber: Option<Arc<dyn TranscriptionClient>>,
    filer: Option<Option<Arc<dyn TicketFiler>>>,
    directory: Option<AgentDirectory>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_call_source(mut self, source: Arc<dyn CallSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn TranscriptionClient>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// `None` disables filing.
    pub fn with_filer(mut self, filer: Option<Arc<dyn TicketFiler>>) -> Self {
        self.filer = Some(filer);
        self
    }

    pub fn with_directory(mut self, directory: AgentDirectory) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn build(self) -> Result<CallProcessor> {
        let config = self.config.unwrap_or_default();

        let directory = match self.directory {
            Some(directory) => directory,
            None => AgentDirectory::load(&config.agents_path)?,
        };
        let processed = ProcessedCalls::load(&config.poller.processed_path)?;

        let source = self.source.or_else(|| build_source(&config));
        let transcriber = self.transcriber.or_else(|| build_transcriber(&config));
        let analyzer = ConcernAnalyzer::from_config(&config.analysis);
        let filer = match self.filer {
            Some(filer) => filer,
            None => build_filer(&config.helpdesk),
        };

        info!(
            agents = directory.len(),
            processed = processed.len(),
            analysis = analyzer.strategy_name(),
            listing = source.is_some(),
            transcription = transcriber.is_some(),
            filing = filer.is_some(),
            "call processor ready"
        );
        Ok(CallProcessor::new(
            directory,
            source,
            transcriber,
            analyzer,
            filer,
            processed,
        ))
    }
}

/// Without provider credentials nothing is listed, but the loop keeps
/// running so a restart with fixed configuration is all that is needed.
fn build_source(config: &Config) -> Option<Arc<dyn CallSource>> {
    match ExotelClient::from_config(&config.provider, config.poller.page_size) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            error!(error = %e, "call provider disabled, no calls will be listed");
            None
        }
    }
}

fn build_transcriber(config: &Config) -> Option<Arc<dyn TranscriptionClient>> {
    match DeepgramClient::from_config(&config.transcription) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            error!(error = %e, "transcription disabled, calls will be skipped");
            None
        }
    }
}

/// Ticket filing disables itself instead of failing startup when its
/// configuration is incomplete. The gate is
/// [`HelpdeskConfig::missing_fields`], the same check `validate` reports.
pub fn build_filer(config: &HelpdeskConfig) -> Option<Arc<dyn TicketFiler>> {
    if !config.enabled {
        warn!("helpdesk disabled, tickets will not be filed");
        return None;
    }
    let missing = config.missing_fields();
    if !missing.is_empty() {
        warn!(missing = ?missing, "helpdesk incomplete, ticket filing disabled");
        return None;
    }
    let credentials = CredentialManager::from_config(config)?;
    match ZohoDeskFiler::new(config, Arc::new(credentials)) {
        Ok(filer) => Some(Arc::new(filer)),
        Err(e) => {
            warn!(error = %e, "helpdesk misconfigured, ticket filing disabled");
            None
        }
    }
}
