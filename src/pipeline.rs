//! Poll loop: list calls, attribute them, transcribe, analyze and file.
//!
//! Calls are handled one at a time in provider order. A call id is recorded
//! as processed only after its ticket exists, so every other failure leaves
//! it to be retried on the next scan. Unattributed calls are dropped without
//! being recorded.
use crate::agents::AgentDirectory;
use crate::analysis::{CallDetails, ConcernAnalyzer};
use crate::error::PipelineError;
use crate::helpdesk::{CallTicket, FiledTicket, TicketFiler};
use crate::provider::{filter_candidates, list_candidate_calls, CallRecord, CallSource};
use crate::store::ProcessedCalls;
use crate::transcription::TranscriptionClient;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CallOutcome {
    Filed { ticket: FiledTicket },
    /// No agent matched; never retried.
    Dropped,
    /// Already processed, or transcription or ticket filing is disabled.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub candidates: usize,
    pub filed: usize,
    pub dropped: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct CallProcessor {
    directory: AgentDirectory,
    source: Option<Arc<dyn CallSource>>,
    transcriber: Option<Arc<dyn TranscriptionClient>>,
    analyzer: ConcernAnalyzer,
    filer: Option<Arc<dyn TicketFiler>>,
    processed: ProcessedCalls,
}

impl CallProcessor {
    /// A `None` adapter is an integration disabled by configuration.
    pub fn new(
        directory: AgentDirectory,
        source: Option<Arc<dyn CallSource>>,
        transcriber: Option<Arc<dyn TranscriptionClient>>,
        analyzer: ConcernAnalyzer,
        filer: Option<Arc<dyn TicketFiler>>,
        processed: ProcessedCalls,
    ) -> Self {
        Self {
            directory,
            source,
            transcriber,
            analyzer,
            filer,
            processed,
        }
    }

    pub fn processed(&self) -> &ProcessedCalls {
        &self.processed
    }

    pub fn filing_enabled(&self) -> bool {
        self.filer.is_some()
    }

    /// Runs one call through the pipeline. Errors mean the call should be
    /// retried on a later scan.
    pub async fn process_call(&mut self, call: &CallRecord) -> Result<CallOutcome, PipelineError> {
        if self.processed.contains(&call.id) {
            debug!(call_id = %call.id, "call already processed");
            return Ok(CallOutcome::Skipped);
        }
        match self.file_call(call).await {
            Ok(ticket) => Ok(CallOutcome::Filed { ticket }),
            Err(PipelineError::Unresolved { caller, called }) => {
                warn!(
                    call_id = %call.id,
                    caller = %caller,
                    called = %called,
                    "no agent matches call, dropping"
                );
                Ok(CallOutcome::Dropped)
            }
            Err(PipelineError::IntegrationDisabled(what)) => {
                debug!(call_id = %call.id, "{} disabled, skipping call", what);
                Ok(CallOutcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    fn source(&self) -> Result<Arc<dyn CallSource>, PipelineError> {
        self.source
            .clone()
            .ok_or(PipelineError::IntegrationDisabled("call listing"))
    }

    async fn file_call(&mut self, call: &CallRecord) -> Result<FiledTicket, PipelineError> {
        let context = self
            .directory
            .resolve(&call.caller, &call.called)
            .ok_or_else(|| PipelineError::Unresolved {
                caller: call.caller.clone(),
                called: call.called.clone(),
            })?;
        let filer = self
            .filer
            .clone()
            .ok_or(PipelineError::IntegrationDisabled("ticket filing"))?;
        let transcriber = self
            .transcriber
            .clone()
            .ok_or(PipelineError::IntegrationDisabled("transcription"))?;
        let source = self.source()?;
        let recording = call
            .recording()
            .ok_or_else(|| PipelineError::Terminal("call has no recording".to_string()))?;

        let start = Instant::now();
        let audio = source.download_recording(recording).await?;
        let transcript = transcriber.transcribe(&audio).await?;

        let details = CallDetails {
            direction: context.direction,
            duration: call.duration_label(),
            time: call.start_time_label(),
        };
        let analysis = self.analyzer.analyze(&transcript, &details).await;
        info!(
            call_id = %call.id,
            agent = %context.agent.name,
            direction = %context.direction,
            concern = %analysis.concern,
            mood = %analysis.mood,
            "call analyzed"
        );

        let ticket = CallTicket {
            call_id: call.id.clone(),
            customer_number: context.customer_number,
            agent_name: context.agent.name,
            time: details.time,
            duration: details.duration,
            direction: context.direction,
            mood: analysis.mood,
            concern: analysis.concern,
            recording_url: Some(recording.to_string()),
            transcript,
        };
        let filed = filer.file(&ticket).await?;

        if let Err(e) = self.processed.insert(call.id.clone()) {
            error!(
                call_id = %call.id,
                path = %self.processed.path().display(),
                error = %e,
                "ticket filed but processed set could not be saved"
            );
        }
        info!(
            call_id = %call.id,
            ticket_id = %filed.id,
            note_attached = filed.note_attached,
            elapsed = start.elapsed().as_millis(),
            "call filed"
        );
        Ok(filed)
    }

    /// One scan of the provider window. Only a failed or disabled listing is
    /// an error; per-call failures are logged and counted.
    pub async fn run_cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CycleSummary, PipelineError> {
        let source = self.source()?;
        let candidates = list_candidate_calls(source.as_ref(), &self.processed).await?;
        let mut summary = CycleSummary {
            candidates: candidates.len(),
            ..Default::default()
        };
        for call in &candidates {
            if cancel.is_cancelled() {
                info!("cancelled, leaving remaining calls for the next run");
                break;
            }
            match self.process_call(call).await {
                Ok(CallOutcome::Filed { .. }) => summary.filed += 1,
                Ok(CallOutcome::Dropped) => summary.dropped += 1,
                Ok(CallOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(call_id = %call.id, error = %e, "call processing failed");
                }
            }
        }
        Ok(summary)
    }

    /// Scans immediately, then once per `interval` until `cancel` fires. A
    /// call in flight is finished before returning.
    pub async fn run(&mut self, interval: Duration, cancel: CancellationToken) {
        info!(
            interval = interval.as_secs(),
            filing = self.filing_enabled(),
            processed = self.processed.len(),
            "poll loop started"
        );
        loop {
            match self.run_cycle(&cancel).await {
                Ok(summary) if summary.candidates > 0 => info!(
                    candidates = summary.candidates,
                    filed = summary.filed,
                    dropped = summary.dropped,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "scan finished"
                ),
                Ok(_) => debug!("no new calls"),
                Err(PipelineError::IntegrationDisabled(what)) => {
                    debug!("{} disabled, nothing to scan", what)
                }
                Err(e) => error!(error = %e, "listing calls failed"),
            }
            select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("poll loop stopped");
    }

    /// Processes the newest candidate, or the candidate with `call_id`.
    /// `None` when nothing matched.
    pub async fn process_once(
        &mut self,
        call_id: Option<&str>,
    ) -> Result<Option<(CallRecord, CallOutcome)>, PipelineError> {
        let calls = self.source()?.list_recent_calls().await?;
        let call = match call_id {
            Some(id) => {
                let Some(call) = calls.into_iter().find(|c| c.id == id) else {
                    return Ok(None);
                };
                if !call.is_candidate() {
                    warn!(call_id = %id, status = ?call.status, "call is not completed with a recording");
                    return Ok(None);
                }
                call
            }
            None => match filter_candidates(calls, &self.processed).into_iter().next() {
                Some(call) => call,
                None => return Ok(None),
            },
        };
        let outcome = self.process_call(&call).await?;
        Ok(Some((call, outcome)))
    }
}
