use crate::helpdesk::AccessCredential;
use anyhow::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub agents_path: String,
    pub poller: PollerConfig,
    pub provider: ProviderConfig,
    pub transcription: TranscriptionConfig,
    pub analysis: AnalysisConfig,
    pub helpdesk: HelpdeskConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_secs: u64,
    pub processed_path: String,
    pub page_size: u32,
}

/// Exotel account used to list calls and fetch recordings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub sid: Option<String>,
    pub api_key: Option<String>,
    pub api_token: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

/// Deepgram prerecorded transcription.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub language: String,
    pub punctuate: bool,
    pub diarize: bool,
    pub content_type: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStrategy {
    Keyword,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub strategy: AnalysisStrategy,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_transcript_chars: usize,
    pub default_concern: String,
    pub timeout_secs: u64,
}

/// Zoho Desk ticketing and its OAuth credential.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HelpdeskConfig {
    pub enabled: bool,
    pub org_id: Option<String>,
    pub department_id: Option<String>,
    pub api_domain: String,
    pub accounts_url: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub default_priority: String,
    pub auto_create_contact: bool,
    pub credential_path: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigIssue {
    pub level: IssueLevel,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            log_file: None,
            agents_path: "agents_config.json".to_string(),
            poller: PollerConfig::default(),
            provider: ProviderConfig::default(),
            transcription: TranscriptionConfig::default(),
            analysis: AnalysisConfig::default(),
            helpdesk: HelpdeskConfig::default(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            processed_path: "processed_calls.json".to_string(),
            page_size: 10,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            sid: None,
            api_key: None,
            api_token: None,
            base_url: "https://api.exotel.com".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.deepgram.com/v1/listen".to_string(),
            model: "general".to_string(),
            language: "en".to_string(),
            punctuate: true,
            diarize: true,
            content_type: "audio/mpeg".to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            strategy: AnalysisStrategy::Keyword,
            api_key: None,
            model: None,
            base_url: None,
            max_transcript_chars: 1000,
            default_concern: "Call inquiry".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Default for HelpdeskConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            org_id: None,
            department_id: None,
            api_domain: "https://desk.zoho.com".to_string(),
            accounts_url: "https://accounts.zoho.com".to_string(),
            access_token: None,
            refresh_token: None,
            client_id: None,
            client_secret: None,
            default_priority: "Medium".to_string(),
            auto_create_contact: true,
            credential_path: "helpdesk_credentials.json".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TranscriptionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl HelpdeskConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Fields ticket filing cannot start without. An access token persisted
    /// at `credential_path` stands in for a configured one.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(&self.org_id) {
            missing.push("org_id");
        }
        if AccessCredential::at_startup(self).is_none() {
            missing.push("access_token");
        }
        if is_blank(&self.department_id) {
            missing.push("department_id");
        }
        missing
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or_default().is_empty()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }

    /// Overlays secrets from the process environment. A `.env` file in the
    /// working directory is loaded first; variables already set win.
    pub fn apply_env(&mut self) {
        let _ = dotenv::dotenv();
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("EXOTEL_SID") {
            self.provider.sid = Some(v);
        }
        if let Some(v) = get("EXOTEL_API_KEY") {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = get("EXOTEL_API_TOKEN") {
            self.provider.api_token = Some(v);
        }
        if let Some(v) = get("DEEPGRAM_API_KEY") {
            self.transcription.api_key = Some(v);
        }

        let llm_key = match self.analysis.strategy {
            AnalysisStrategy::OpenAi => get("OPENAI_API_KEY"),
            AnalysisStrategy::Gemini => get("GEMINI_API_KEY"),
            AnalysisStrategy::Keyword => None,
        };
        if let Some(v) = llm_key {
            self.analysis.api_key = Some(v);
        }

        let helpdesk = &mut self.helpdesk;
        if let Some(v) = get("ZOHO_DESK_ENABLED").and_then(|v| parse_flag(&v)) {
            helpdesk.enabled = v;
        }
        if let Some(v) = get("ZOHO_DESK_ORG_ID") {
            helpdesk.org_id = Some(v);
        }
        if let Some(v) = get("ZOHO_DESK_ACCESS_TOKEN") {
            helpdesk.access_token = Some(v);
        }
        if let Some(v) = get("ZOHO_DESK_REFRESH_TOKEN") {
            helpdesk.refresh_token = Some(v);
        }
        if let Some(v) = get("ZOHO_DESK_CLIENT_ID") {
            helpdesk.client_id = Some(v);
        }
        if let Some(v) = get("ZOHO_DESK_CLIENT_SECRET") {
            helpdesk.client_secret = Some(v);
        }
        if let Some(v) = get("ZOHO_DESK_DEPARTMENT_ID") {
            helpdesk.department_id = Some(v);
        }
        if let Some(v) = get("ZOHO_DESK_API_DOMAIN") {
            helpdesk.api_domain = v;
        }
        if let Some(v) = get("ZOHO_DESK_DEFAULT_PRIORITY") {
            helpdesk.default_priority = v;
        }
        if let Some(v) = get("ZOHO_DESK_AUTO_CREATE_CONTACT").and_then(|v| parse_flag(&v)) {
            helpdesk.auto_create_contact = v;
        }
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        for (field, value) in [
            ("provider.sid", &self.provider.sid),
            ("provider.api_key", &self.provider.api_key),
            ("provider.api_token", &self.provider.api_token),
        ] {
            if is_blank(value) {
                issues.push(ConfigIssue::error(field, "call provider credential is missing; no calls will be listed"));
            }
        }

        if is_blank(&self.transcription.api_key) {
            issues.push(ConfigIssue::error(
                "transcription.api_key",
                "transcription API key is missing; calls will be skipped",
            ));
        }

        if self.analysis.strategy != AnalysisStrategy::Keyword && is_blank(&self.analysis.api_key)
        {
            issues.push(ConfigIssue::warning(
                "analysis.api_key",
                "no API key for the configured language model; keyword analysis will be used",
            ));
        }

        if !self.helpdesk.enabled {
            issues.push(ConfigIssue::warning(
                "helpdesk.enabled",
                "ticket filing is disabled; calls will not be marked processed",
            ));
        } else {
            for field in self.helpdesk.missing_fields() {
                let message = if field == "access_token" {
                    "no access token configured or stored; ticket filing will be disabled"
                } else {
                    "required for ticket filing; ticket filing will be disabled"
                };
                issues.push(ConfigIssue::warning(&format!("helpdesk.{}", field), message));
            }
            if is_blank(&self.helpdesk.refresh_token) {
                issues.push(ConfigIssue::warning(
                    "helpdesk.refresh_token",
                    "expired access tokens cannot be refreshed",
                ));
            }
        }

        if self.poller.page_size == 0 {
            issues.push(ConfigIssue::error("poller.page_size", "must be at least 1"));
        }

        issues
    }
}
