use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Health {
    Healthy,
    Stressed,
    Unhealthy,
    #[default]
    Unknown,
}

impl Health {
    /// Maps a provider label to a health value. Anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "Healthy" => Self::Healthy,
            "Stressed" => Self::Stressed,
            "Unhealthy" => Self::Unhealthy,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Stressed => "Stressed",
            Self::Unhealthy => "Unhealthy",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Health {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Health {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(raw.as_str().map(Health::from_label).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Correct,
    Incorrect,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: Rating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CareAdvice {
    #[serde(default, deserialize_with = "text_or_default")]
    pub title: String,
    #[serde(default, deserialize_with = "text_or_default")]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiseaseInfo {
    #[serde(default, deserialize_with = "text_or_default")]
    pub name: String,
    #[serde(default, deserialize_with = "text_or_default")]
    pub severity: String,
    #[serde(default, deserialize_with = "text_list")]
    pub recommendations: Vec<String>,
}

/// Decoding never fails on a field: nulls and mistyped values fall back to
/// the type default, numbers in text fields are kept as their literal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default, deserialize_with = "flag")]
    pub is_plant: bool,
    #[serde(default, deserialize_with = "unit_interval")]
    pub confidence: f64,
    #[serde(default, deserialize_with = "optional_text")]
    pub species: Option<String>,
    #[serde(default, deserialize_with = "optional_text")]
    pub common_name: Option<String>,
    #[serde(default)]
    pub health: Health,
    #[serde(default, deserialize_with = "optional_text")]
    pub height: Option<String>,
    #[serde(default, deserialize_with = "optional_text")]
    pub width: Option<String>,
    #[serde(default, deserialize_with = "optional_record")]
    pub disease: Option<DiseaseInfo>,
    #[serde(default, deserialize_with = "record_list")]
    pub advice: Vec<CareAdvice>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "optional_record")]
    pub feedback: Option<Feedback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub image_url: String,
    pub analysis: AnalysisResult,
    #[serde(default)]
    pub summary: String,
    pub timestamp: String,
}

impl Snapshot {
    /// Stamps a new snapshot with the current time; the id is the timestamp.
    pub fn new(image_url: impl Into<String>, analysis: AnalysisResult, summary: String) -> Self {
        let timestamp = now_utc_iso();
        Self {
            id: timestamp.clone(),
            image_url: image_url.into(),
            analysis,
            summary,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    pub id: String,
    pub name: String,
    pub snapshots: Vec<Snapshot>,
}

impl Plant {
    pub fn new(name: impl Into<String>, first: Snapshot) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            snapshots: vec![first],
        }
    }

    pub fn latest_snapshot(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn find_snapshot(&self, snapshot_id: &str) -> Option<&Snapshot> {
        self.snapshots
            .iter()
            .find(|snapshot| snapshot.id == snapshot_id)
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn as_text(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn text_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(as_text(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn optional_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(as_text(Value::deserialize(deserializer)?))
}

fn text_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().filter_map(as_text).collect(),
        _ => Vec::new(),
    })
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_bool().unwrap_or(false))
}

// Entries that are not objects of the right shape are dropped.
fn record_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn optional_record<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Value::deserialize(deserializer)?;
    if !raw.is_object() {
        return Ok(None);
    }
    Ok(serde_json::from_value(raw).ok())
}

fn unit_interval<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    let value = raw.as_f64().filter(|value| value.is_finite()).unwrap_or(0.0);
    Ok(value.clamp(0.0, 1.0))
}
