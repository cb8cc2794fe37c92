//! Concern and mood extraction from a call transcript.
//!
//! A [`ConcernAnalyzer`] asks a language model first when one is configured
//! and falls back to [`KeywordAnalyzer`] whenever the model fails or answers
//! in an unexpected shape. Analysis itself never fails.
use crate::agents::Direction;
use crate::config::{AnalysisConfig, AnalysisStrategy};
use crate::utils::truncate_chars;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

mod gemini;
mod keyword;
mod openai;

pub use gemini::GeminiGenerator;
pub use keyword::KeywordAnalyzer;
pub use openai::{OpenAiGenerator, OpenAiGeneratorBuilder};

pub const DEFAULT_CONCERN: &str = "Call inquiry";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mood {
    Positive,
    Neutral,
    Negative,
    Urgent,
}

impl Mood {
    /// Maps a free-form tone label onto the closed vocabulary. Every word is
    /// considered and the strongest mood wins (Urgent, then Negative, then
    /// Positive), so qualified labels such as "Very frustrated" still count.
    /// A positive word right after a negation reads as Negative.
    pub fn from_label(label: &str) -> Self {
        let mut mood = Mood::Neutral;
        let mut negated = false;
        for word in label
            .split(|c: char| !c.is_alphabetic())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
        {
            let found = match word.as_str() {
                "not" | "no" | "never" | "hardly" => {
                    negated = true;
                    continue;
                }
                "urgent" | "anxious" | "panicked" | "panicky" | "desperate" | "worried"
                | "distressed" | "emergency" => Mood::Urgent,
                "negative" | "frustrated" | "angry" | "upset" | "disappointed" | "annoyed"
                | "irritated" | "dissatisfied" | "impatient" | "unhappy" => Mood::Negative,
                "positive" | "polite" | "happy" | "satisfied" | "grateful" | "friendly"
                | "pleased" | "appreciative" | "cheerful" => {
                    if negated {
                        Mood::Negative
                    } else {
                        Mood::Positive
                    }
                }
                _ => continue,
            };
            negated = false;
            if found.weight() > mood.weight() {
                mood = found;
            }
        }
        mood
    }

    fn weight(&self) -> u8 {
        match self {
            Mood::Neutral => 0,
            Mood::Positive => 1,
            Mood::Negative => 2,
            Mood::Urgent => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Positive => "Positive",
            Mood::Neutral => "Neutral",
            Mood::Negative => "Negative",
            Mood::Urgent => "Urgent",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub concern: String,
    pub mood: Mood,
}

/// Call facts handed to the model alongside the transcript.
#[derive(Debug, Clone)]
pub struct CallDetails {
    pub direction: Direction,
    pub duration: String,
    pub time: String,
}

/// A text generation backend answering one prompt at a time.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub struct ConcernAnalyzer {
    primary: Option<Arc<dyn TextGenerator>>,
    fallback: KeywordAnalyzer,
    max_transcript_chars: usize,
    default_concern: String,
}

impl ConcernAnalyzer {
    pub fn keyword_only(config: &AnalysisConfig) -> Self {
        Self {
            primary: None,
            fallback: KeywordAnalyzer::new(config.default_concern.clone()),
            max_transcript_chars: config.max_transcript_chars,
            default_concern: config.default_concern.clone(),
        }
    }

    pub fn with_generator(generator: Arc<dyn TextGenerator>, config: &AnalysisConfig) -> Self {
        Self {
            primary: Some(generator),
            ..Self::keyword_only(config)
        }
    }

    /// Picks the configured strategy, degrading to keyword matching when the
    /// model cannot be set up.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());
        let generator: Result<Arc<dyn TextGenerator>> = match (&config.strategy, api_key) {
            (AnalysisStrategy::Keyword, _) => return Self::keyword_only(config),
            (strategy, None) => {
                warn!(?strategy, "no analysis api key configured, using keyword analysis");
                return Self::keyword_only(config);
            }
            (AnalysisStrategy::OpenAi, Some(key)) => {
                let mut builder = OpenAiGeneratorBuilder::new()
                    .with_api_key(key)
                    .with_timeout(config.timeout());
                if let Some(model) = &config.model {
                    builder = builder.with_model(model);
                }
                if let Some(base_url) = &config.base_url {
                    builder = builder.with_base_url(base_url);
                }
                builder.build().map(|g| Arc::new(g) as Arc<dyn TextGenerator>)
            }
            (AnalysisStrategy::Gemini, Some(key)) => {
                GeminiGenerator::from_config(key, config).map(|g| Arc::new(g) as Arc<dyn TextGenerator>)
            }
        };
        match generator {
            Ok(generator) => {
                info!(strategy = generator.name(), "concern analysis configured");
                Self::with_generator(generator, config)
            }
            Err(e) => {
                warn!(error = %e, "failed to set up analysis model, using keyword analysis");
                Self::keyword_only(config)
            }
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.primary
            .as_ref()
            .map(|g| g.name())
            .unwrap_or("keyword")
    }

    pub async fn analyze(&self, transcript: &str, details: &CallDetails) -> Analysis {
        let Some(generator) = &self.primary else {
            return self.fallback.analyze(transcript);
        };
        if transcript.trim().is_empty() {
            return self.fallback.analyze(transcript);
        }

        let prompt = build_prompt(
            truncate_chars(transcript, self.max_transcript_chars),
            details,
        );
        match generator.generate(&prompt).await {
            Ok(response) => match parse_response(&response, &self.default_concern) {
                Some(analysis) => {
                    debug!(
                        strategy = generator.name(),
                        concern = %analysis.concern,
                        mood = %analysis.mood,
                        "model analysis parsed"
                    );
                    analysis
                }
                None => {
                    warn!(
                        strategy = generator.name(),
                        "model response had no Concern or Mood line, using keyword analysis"
                    );
                    self.fallback.analyze(transcript)
                }
            },
            Err(e) => {
                warn!(
                    strategy = generator.name(),
                    error = %e,
                    "model analysis failed, using keyword analysis"
                );
                self.fallback.analyze(transcript)
            }
        }
    }
}

pub(crate) fn build_prompt(transcript: &str, details: &CallDetails) -> String {
    format!(
        "Analyze this customer service call transcription and provide:\n\
         \n\
         Call Details:\n\
         - Direction: {direction}\n\
         - Duration: {duration}\n\
         - Time: {time}\n\
         \n\
         Transcription:\n\
         \"{transcript}\"\n\
         \n\
         Analysis Required:\n\
         1. Concern: What is the specific reason for this call? What does the customer need or want?\n\
         2. Mood: What is the caller's emotional tone? (Positive, Neutral, Negative or Urgent)\n\
         \n\
         Special Cases:\n\
         - If only hold messages: \"Caller on hold - No conversation recorded\"\n\
         - If brief/dropped call: \"Brief/Dropped call - Insufficient conversation\"\n\
         \n\
         Response Format:\n\
         Concern: [specific detailed concern]\n\
         Mood: [single word describing emotional tone]",
        direction = details.direction.describe(),
        duration = details.duration,
        time = details.time,
        transcript = transcript,
    )
}

/// Scans for `Concern:` and `Mood:` lines. `None` when neither is present.
pub(crate) fn parse_response(response: &str, default_concern: &str) -> Option<Analysis> {
    let mut concern = None;
    let mut mood = None;
    for line in response.lines() {
        let line = line.trim().trim_start_matches(['*', '-', '#', ' ']);
        if let Some(value) = strip_label(line, "concern") {
            concern.get_or_insert(value);
        } else if let Some(value) = strip_label(line, "mood") {
            mood.get_or_insert(value);
        }
    }
    if concern.is_none() && mood.is_none() {
        return None;
    }
    Some(Analysis {
        concern: concern
            .map(str::to_string)
            .unwrap_or_else(|| default_concern.to_string()),
        mood: mood.map(Mood::from_label).unwrap_or(Mood::Neutral),
    })
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = line[label.len()..].trim_start_matches('*');
    let value = rest.strip_prefix(':')?.trim().trim_matches('*').trim();
    (!value.is_empty()).then_some(value)
}
