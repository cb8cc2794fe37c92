use super::{Analysis, Mood};
use crate::utils::truncate_chars;

// Rule order matters: the first matching rule wins.
const MOOD_RULES: &[(Mood, &[&str])] = &[
    (Mood::Urgent, &["urgent", "emergency", "immediately", "asap"]),
    (Mood::Negative, &["angry", "frustrated", "disappointed", "upset"]),
    (Mood::Positive, &["thank", "great", "happy", "satisfied", "excellent"]),
];

const CONCERN_RULES: &[(&str, &[&str])] = &[
    ("Billing inquiry", &["billing", "payment", "charge", "invoice"]),
    (
        "Technical support request",
        &["technical", "not working", "error", "problem", "issue"],
    ),
    ("Refund/cancellation request", &["refund", "return", "cancel"]),
    (
        "General inquiry - assistance needed",
        &["question", "how to", "help with"],
    ),
];

const SUMMARY_CHARS: usize = 100;

/// Deterministic keyword matching over the lowercased transcript.
#[derive(Debug, Clone)]
pub struct KeywordAnalyzer {
    default_concern: String,
}

impl Default for KeywordAnalyzer {
    fn default() -> Self {
        Self::new(super::DEFAULT_CONCERN)
    }
}

impl KeywordAnalyzer {
    pub fn new(default_concern: impl Into<String>) -> Self {
        Self {
            default_concern: default_concern.into(),
        }
    }

    pub fn analyze(&self, transcript: &str) -> Analysis {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Analysis {
                concern: self.default_concern.clone(),
                mood: Mood::Neutral,
            };
        }
        let lower = transcript.to_lowercase();
        let hit = |terms: &[&str]| terms.iter().any(|term| lower.contains(term));

        let mood = MOOD_RULES
            .iter()
            .find(|(_, terms)| hit(*terms))
            .map(|(mood, _)| *mood)
            .unwrap_or(Mood::Neutral);
        let concern = CONCERN_RULES
            .iter()
            .find(|(_, terms)| hit(*terms))
            .map(|(concern, _)| concern.to_string())
            .unwrap_or_else(|| {
                format!(
                    "Call regarding: {}...",
                    truncate_chars(transcript, SUMMARY_CHARS)
                )
            });
        Analysis { concern, mood }
    }
}
