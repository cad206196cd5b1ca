use std::env;
use std::time::Duration;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_PDDD_API_URL: &str = "http://localhost:8000";

/// Analyzer credentials and endpoints, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub gemini_model: String,
    pub pddd_api_url: String,
    /// Applied to both analyzer calls when set; otherwise the transport default holds.
    pub request_timeout: Option<Duration>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            pddd_api_url: DEFAULT_PDDD_API_URL.to_string(),
            request_timeout: None,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();
        Self {
            gemini_api_key: var("GEMINI_API_KEY").or_else(|| var("GOOGLE_API_KEY")),
            gemini_api_base: var("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gemini_api_base),
            gemini_model: var("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            pddd_api_url: var("PDDD_API_URL")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.pddd_api_url),
            request_timeout: var("LEAFLOG_REQUEST_TIMEOUT")
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
                .map(Duration::from_secs_f64),
        }
    }
}
