use std::time::Duration;

use leaflog_contracts::plants::AnalysisResult;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::config::AnalyzerConfig;
use crate::error::PrimaryError;
use crate::ingest::ImagePayload;

pub const ANALYSIS_PROMPT: &str = "You are an expert botanist AI. Your task is to analyze the provided image of a plant with high accuracy.

Provide your final conclusions in a single, clean JSON object that strictly adheres to the provided schema.

Step 1: Internally, think through a detailed, step-by-step analysis of the plant in the image (observations, reasoning, then conclusions).

Step 2: Output only the final JSON object, following the schema exactly. Do NOT include your reasoning or any extra text.

If a field like \"disease\" is not applicable, set its value to null.
For the \"advice\" array, provide exactly 3 concise, actionable care commands. Title them appropriately (e.g., \"Watering\", \"Sunlight\"). Frame the description as a direct instruction (e.g., \"Water thoroughly when the top inch of soil is dry.\", \"Provide 6+ hours of direct sun.\").";

const ANALYSIS_TEMPERATURE: f64 = 0.5;
const EXPECTED_ADVICE_ITEMS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryAnalysis {
    pub analysis: AnalysisResult,
    pub summary: String,
}

pub trait PrimaryAnalyzer: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, image: &ImagePayload) -> Result<PrimaryAnalysis, PrimaryError>;
}

pub struct GeminiAnalyzer {
    api_base: String,
    api_key: Option<String>,
    model: String,
    timeout: Option<Duration>,
    http: HttpClient,
}

impl GeminiAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            api_base: config.gemini_api_base.clone(),
            api_key: config.gemini_api_key.clone(),
            model: config.gemini_model.clone(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(image: &ImagePayload) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": image.mime_type,
                            "data": image.data,
                        }
                    },
                    { "text": ANALYSIS_PROMPT },
                ],
            }],
            "generationConfig": {
                "temperature": ANALYSIS_TEMPERATURE,
                "responseMimeType": "application/json",
                "responseSchema": analysis_schema(),
            },
        })
    }
}

impl PrimaryAnalyzer for GeminiAnalyzer {
    fn name(&self) -> &str {
        "gemini"
    }

    fn analyze(&self, image: &ImagePayload) -> Result<PrimaryAnalysis, PrimaryError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(PrimaryError::ProviderCallFailed(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string(),
            ));
        };
        let endpoint = self.endpoint();
        let mut request = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&Self::build_payload(image));
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        tracing::debug!(model = %self.model, mime_type = %image.mime_type, "calling primary analyzer");
        let response = request.send().map_err(|err| {
            PrimaryError::ProviderCallFailed(format!("Gemini request failed ({endpoint}): {err}"))
        })?;
        let status = response.status();
        let body = response.text().map_err(|err| {
            PrimaryError::ProviderCallFailed(format!("Gemini response body read failed: {err}"))
        })?;
        if !status.is_success() {
            return Err(PrimaryError::ProviderCallFailed(format!(
                "Gemini request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            )));
        }

        let response_value = serde_json::from_str(&body).unwrap_or(Value::String(body));
        let text = extract_response_text(&response_value)?;
        parse_analysis_text(&text)
    }
}

/// The places a response may carry the model's text, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextAccessor {
    DirectString,
    TopLevelText,
    NestedResponseText,
    CandidateParts,
}

impl TextAccessor {
    const ORDER: [TextAccessor; 4] = [
        TextAccessor::DirectString,
        TextAccessor::TopLevelText,
        TextAccessor::NestedResponseText,
        TextAccessor::CandidateParts,
    ];

    fn extract(self, response: &Value) -> Option<String> {
        match self {
            Self::DirectString => response.as_str().map(str::to_string),
            Self::TopLevelText => response
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string),
            Self::NestedResponseText => response
                .get("response")
                .and_then(|inner| inner.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string),
            Self::CandidateParts => {
                let parts = response
                    .get("candidates")
                    .and_then(Value::as_array)
                    .and_then(|candidates| candidates.first())
                    .and_then(|candidate| candidate.get("content"))
                    .and_then(|content| content.get("parts"))
                    .and_then(Value::as_array)?;
                let texts: Vec<&str> = parts
                    .iter()
                    .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect();
                if texts.is_empty() {
                    return None;
                }
                Some(texts.concat())
            }
        }
    }
}

pub fn extract_response_text(response: &Value) -> Result<String, PrimaryError> {
    TextAccessor::ORDER
        .iter()
        .find_map(|accessor| accessor.extract(response))
        .ok_or_else(|| {
            tracing::warn!("unexpected primary analyzer response shape");
            PrimaryError::UnexpectedResponseShape
        })
}

/// Splits the model's JSON answer into the summary and the analysis record.
/// Keys the record does not know are ignored; missing ones take defaults.
pub fn parse_analysis_text(raw: &str) -> Result<PrimaryAnalysis, PrimaryError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PrimaryError::MalformedAnalysis(
            "received an empty response".to_string(),
        ));
    }
    let parsed: Value = serde_json::from_str(trimmed)
        .map_err(|err| PrimaryError::MalformedAnalysis(format!("response is not JSON: {err}")))?;
    let Value::Object(mut fields) = parsed else {
        return Err(PrimaryError::MalformedAnalysis(
            "response is not a JSON object".to_string(),
        ));
    };
    let Some(Value::String(summary)) = fields.remove("summary") else {
        return Err(PrimaryError::MalformedAnalysis(
            "response has no string 'summary' field".to_string(),
        ));
    };
    fields.remove("feedback");

    let analysis: AnalysisResult = serde_json::from_value(Value::Object(fields))
        .map_err(|err| PrimaryError::MalformedAnalysis(format!("analysis fields invalid: {err}")))?;
    if analysis.advice.len() != EXPECTED_ADVICE_ITEMS {
        tracing::warn!(
            count = analysis.advice.len(),
            "primary analyzer returned an unexpected number of advice items"
        );
    }
    Ok(PrimaryAnalysis { analysis, summary })
}

fn analysis_schema() -> Value {
    let nullable_string = |description: &str| {
        json!({ "type": "STRING", "nullable": true, "description": description })
    };
    let mut properties = Map::new();
    properties.insert(
        "summary".to_string(),
        json!({
            "type": "STRING",
            "description": "A concise paragraph explaining the plant analysis (observations and conclusions).",
        }),
    );
    properties.insert(
        "isPlant".to_string(),
        json!({ "type": "BOOLEAN", "description": "Is there a plant in the image?" }),
    );
    properties.insert(
        "confidence".to_string(),
        json!({ "type": "NUMBER", "description": "Confidence score from 0.0 to 1.0 for the analysis." }),
    );
    properties.insert(
        "species".to_string(),
        nullable_string("The scientific species name of the plant. Null if unknown."),
    );
    properties.insert(
        "commonName".to_string(),
        nullable_string("The common or popular name of the plant. Null if unknown."),
    );
    properties.insert(
        "health".to_string(),
        json!({
            "type": "STRING",
            "description": "Health status of the plant.",
            "enum": ["Healthy", "Stressed", "Unhealthy", "Unknown"],
        }),
    );
    properties.insert(
        "height".to_string(),
        nullable_string("Estimated height in cm, e.g., \"15 cm\". Null if not measurable."),
    );
    properties.insert(
        "width".to_string(),
        nullable_string("Estimated width in cm, e.g., \"10 cm\". Null if not measurable."),
    );
    properties.insert(
        "disease".to_string(),
        json!({
            "type": "OBJECT",
            "nullable": true,
            "description": "Information about any detected disease. Null if healthy.",
            "properties": {
                "name": { "type": "STRING", "description": "Name of the disease." },
                "severity": {
                    "type": "STRING",
                    "description": "Severity of the disease (e.g., Mild, Moderate, Severe).",
                },
                "recommendations": {
                    "type": "ARRAY",
                    "description": "List of recommendations to treat the disease.",
                    "items": { "type": "STRING" },
                },
            },
        }),
    );
    properties.insert(
        "advice".to_string(),
        json!({
            "type": "ARRAY",
            "description": "Exactly 3 care instructions for the plant.",
            "minItems": EXPECTED_ADVICE_ITEMS,
            "maxItems": EXPECTED_ADVICE_ITEMS,
            "items": {
                "type": "OBJECT",
                "properties": {
                    "title": {
                        "type": "STRING",
                        "description": "Title of the advice (e.g., Watering, Sunlight).",
                    },
                    "description": {
                        "type": "STRING",
                        "description": "A direct, actionable instruction.",
                    },
                },
                "required": ["title", "description"],
            },
        }),
    );

    json!({
        "type": "OBJECT",
        "properties": properties,
        "required": [
            "summary",
            "isPlant",
            "confidence",
            "species",
            "commonName",
            "health",
            "advice",
        ],
    })
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
