use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::AnalyzerConfig;
use crate::error::SecondaryError;
use crate::ingest::ImagePayload;

pub const ANALYZE_PATH: &str = "/pddd/analyze";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Unhealthy => "Unhealthy",
        }
    }
}

// Anything other than an exact "Healthy" counts as unhealthy.
impl<'de> Deserialize<'de> for HealthStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            Some("Healthy") => Self::Healthy,
            _ => Self::Unhealthy,
        })
    }
}

/// Narrow disease/health signal from the disease-detection backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryAnalysis {
    #[serde(default)]
    pub disease_name: Option<String>,
    pub disease_confidence: f64,
    pub health_status: HealthStatus,
}

pub trait SecondaryAnalyzer: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, image: &ImagePayload) -> Result<SecondaryAnalysis, SecondaryError>;
}

pub struct PdddClient {
    base_url: String,
    timeout: Option<Duration>,
    http: HttpClient,
}

impl PdddClient {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            base_url: config.pddd_api_url.clone(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, ANALYZE_PATH)
    }
}

impl SecondaryAnalyzer for PdddClient {
    fn name(&self) -> &str {
        "pddd"
    }

    fn analyze(&self, image: &ImagePayload) -> Result<SecondaryAnalysis, SecondaryError> {
        let mut request = self.http.post(self.endpoint()).json(image);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .map_err(|err| SecondaryError::BackendUnreachable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SecondaryError::BackendError {
                status: status.as_u16(),
            });
        }
        let result = response
            .json::<SecondaryAnalysis>()
            .map_err(|err| SecondaryError::BackendMalformed(err.to_string()))?;
        if !(0.0..=1.0).contains(&result.disease_confidence) {
            return Err(SecondaryError::BackendMalformed(format!(
                "disease_confidence {} is outside [0, 1]",
                result.disease_confidence
            )));
        }
        Ok(result)
    }
}
