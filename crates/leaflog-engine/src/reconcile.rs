//! Merges the primary and secondary analyzer outputs into one analysis.
//!
//! The secondary backend is authoritative for disease identity; the primary
//! model keeps disease characterisation (severity, recommendations). The
//! secondary may settle health only when the primary is undecided or unsure,
//! and only when it is itself confident.

use leaflog_contracts::events::{EventLog, JournalEvent};
use leaflog_contracts::plants::{AnalysisResult, DiseaseInfo, Health};

use crate::config::AnalyzerConfig;
use crate::error::AnalysisError;
use crate::ingest::ImagePayload;
use crate::primary::{GeminiAnalyzer, PrimaryAnalyzer};
use crate::secondary::{HealthStatus, PdddClient, SecondaryAnalysis, SecondaryAnalyzer};

/// Minimum secondary `disease_confidence` before it may change anything.
pub const SECONDARY_TRUST_THRESHOLD: f64 = 0.6;
/// Primary confidence below this lets the secondary settle health.
pub const PRIMARY_CONFIDENCE_THRESHOLD: f64 = 0.6;

const UNKNOWN_SEVERITY: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    pub secondary_available: bool,
    pub secondary_trusted: bool,
    pub disease_overridden: bool,
    pub health_overridden: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledAnalysis {
    pub analysis: AnalysisResult,
    pub summary: String,
    pub report: ReconcileReport,
}

pub fn reconcile(
    primary: &AnalysisResult,
    secondary: Option<&SecondaryAnalysis>,
) -> AnalysisResult {
    reconcile_with_report(primary, secondary).0
}

pub fn reconcile_with_report(
    primary: &AnalysisResult,
    secondary: Option<&SecondaryAnalysis>,
) -> (AnalysisResult, ReconcileReport) {
    let mut report = ReconcileReport {
        secondary_available: secondary.is_some(),
        ..ReconcileReport::default()
    };
    let Some(secondary) =
        secondary.filter(|result| result.disease_confidence >= SECONDARY_TRUST_THRESHOLD)
    else {
        return (primary.clone(), report);
    };
    report.secondary_trusted = true;

    let secondary_disease = secondary
        .disease_name
        .as_deref()
        .filter(|name| !name.trim().is_empty());
    let disease = match secondary_disease {
        Some(name) => {
            report.disease_overridden = true;
            let characterised = primary.disease.as_ref();
            Some(DiseaseInfo {
                name: name.to_string(),
                severity: characterised
                    .map(|disease| disease.severity.as_str())
                    .filter(|severity| !severity.trim().is_empty())
                    .unwrap_or(UNKNOWN_SEVERITY)
                    .to_string(),
                recommendations: characterised
                    .map(|disease| disease.recommendations.clone())
                    .unwrap_or_default(),
            })
        }
        None => primary.disease.clone(),
    };

    let primary_undecided =
        primary.health == Health::Unknown || primary.confidence < PRIMARY_CONFIDENCE_THRESHOLD;
    let health = if primary_undecided {
        match secondary.health_status {
            HealthStatus::Healthy => Health::Healthy,
            HealthStatus::Unhealthy => Health::Unhealthy,
        }
    } else {
        primary.health
    };
    report.health_overridden = health != primary.health;

    (
        AnalysisResult {
            disease,
            health,
            ..primary.clone()
        },
        report,
    )
}

/// Runs the primary analyzer, then the secondary, and reconciles the two.
/// Only a primary failure fails the run.
pub struct AnalysisEngine {
    primary: Box<dyn PrimaryAnalyzer>,
    secondary: Box<dyn SecondaryAnalyzer>,
    events: Option<EventLog>,
}

impl AnalysisEngine {
    pub fn new(
        primary: impl PrimaryAnalyzer + 'static,
        secondary: impl SecondaryAnalyzer + 'static,
    ) -> Self {
        Self {
            primary: Box::new(primary),
            secondary: Box::new(secondary),
            events: None,
        }
    }

    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self::new(GeminiAnalyzer::new(config), PdddClient::new(config))
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn analyze(&self, image: &ImagePayload) -> Result<ReconciledAnalysis, AnalysisError> {
        self.record(JournalEvent::AnalysisStarted {
            mime_type: image.mime_type.clone(),
            payload_chars: image.data.len(),
            primary: self.primary.name().to_string(),
            secondary: self.secondary.name().to_string(),
        });

        let primary = match self.primary.analyze(image) {
            Ok(primary) => primary,
            Err(err) => {
                tracing::error!(analyzer = self.primary.name(), "primary analysis failed: {err}");
                self.record(JournalEvent::AnalysisFailed {
                    error: err.to_string(),
                });
                return Err(AnalysisError::AnalysisFailed(err));
            }
        };
        self.record(JournalEvent::PrimaryCompleted {
            is_plant: primary.analysis.is_plant,
            confidence: primary.analysis.confidence,
            health: primary.analysis.health,
            disease: disease_name(&primary.analysis),
        });

        let secondary = match self.secondary.analyze(image) {
            Ok(result) => {
                self.record(JournalEvent::SecondaryCompleted {
                    disease_name: result.disease_name.clone(),
                    disease_confidence: result.disease_confidence,
                    health_status: result.health_status.as_str().to_string(),
                });
                Some(result)
            }
            Err(err) => {
                tracing::warn!(
                    analyzer = self.secondary.name(),
                    "secondary analysis unavailable, using primary result only: {err}"
                );
                self.record(JournalEvent::SecondaryUnavailable {
                    error: err.to_string(),
                });
                None
            }
        };

        let (analysis, report) = reconcile_with_report(&primary.analysis, secondary.as_ref());
        tracing::info!(
            health = analysis.health.as_str(),
            disease_overridden = report.disease_overridden,
            health_overridden = report.health_overridden,
            "analysis reconciled"
        );
        self.record(JournalEvent::AnalysisReconciled {
            health: analysis.health,
            disease: disease_name(&analysis),
            secondary_trusted: report.secondary_trusted,
            disease_overridden: report.disease_overridden,
            health_overridden: report.health_overridden,
        });

        Ok(ReconciledAnalysis {
            analysis,
            summary: primary.summary,
            report,
        })
    }

    fn record(&self, event: JournalEvent) {
        if let Some(events) = &self.events {
            events.record_or_warn(&event);
        }
    }
}

fn disease_name(analysis: &AnalysisResult) -> Option<String> {
    analysis.disease.as_ref().map(|disease| disease.name.clone())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use leaflog_contracts::plants::CareAdvice;
    use serde_json::Value;

    use crate::error::{PrimaryError, SecondaryError};
    use crate::primary::PrimaryAnalysis;

    use super::*;

    struct FixedPrimary(Result<PrimaryAnalysis, String>);

    impl PrimaryAnalyzer for FixedPrimary {
        fn name(&self) -> &str {
            "fixed-primary"
        }

        fn analyze(&self, _image: &ImagePayload) -> Result<PrimaryAnalysis, PrimaryError> {
            self.0.clone().map_err(PrimaryError::ProviderCallFailed)
        }
    }

    struct FixedSecondary {
        result: Option<SecondaryAnalysis>,
        calls: Arc<AtomicUsize>,
    }

    impl SecondaryAnalyzer for FixedSecondary {
        fn name(&self) -> &str {
            "fixed-secondary"
        }

        fn analyze(&self, _image: &ImagePayload) -> Result<SecondaryAnalysis, SecondaryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .ok_or(SecondaryError::BackendError { status: 502 })
        }
    }

    fn primary(health: Health, confidence: f64, disease: Option<DiseaseInfo>) -> AnalysisResult {
        AnalysisResult {
            is_plant: true,
            confidence,
            species: Some("Ficus elastica".to_string()),
            common_name: Some("Rubber plant".to_string()),
            health,
            height: Some("40 cm".to_string()),
            width: Some("25 cm".to_string()),
            disease,
            advice: vec![
                CareAdvice {
                    title: "Watering".to_string(),
                    description: "Water when the top inch of soil is dry.".to_string(),
                },
                CareAdvice {
                    title: "Light".to_string(),
                    description: "Give bright, indirect light.".to_string(),
                },
                CareAdvice {
                    title: "Cleaning".to_string(),
                    description: "Wipe leaves monthly.".to_string(),
                },
            ],
            feedback: None,
        }
    }

    fn secondary(name: Option<&str>, confidence: f64, status: HealthStatus) -> SecondaryAnalysis {
        SecondaryAnalysis {
            disease_name: name.map(str::to_string),
            disease_confidence: confidence,
            health_status: status,
        }
    }

    fn image() -> ImagePayload {
        ImagePayload {
            mime_type: "image/png".to_string(),
            data: "iVBORw0KGgo=".to_string(),
        }
    }

    #[test]
    fn confident_secondary_names_disease_and_settles_unknown_health() {
        let base = primary(Health::Unknown, 0.9, None);
        let merged = reconcile(
            &base,
            Some(&secondary(Some("Leaf Spot"), 0.8, HealthStatus::Unhealthy)),
        );
        let disease = merged.disease.clone().unwrap_or_default();
        assert_eq!(disease.name, "Leaf Spot");
        assert_eq!(disease.severity, "Unknown");
        assert!(disease.recommendations.is_empty());
        assert_eq!(merged.health, Health::Unhealthy);
        assert_eq!(merged.species, base.species);
        assert_eq!(merged.advice, base.advice);
    }

    #[test]
    fn confident_primary_verdict_is_never_overridden() {
        let base = primary(Health::Healthy, 0.95, None);
        let (merged, report) = reconcile_with_report(
            &base,
            Some(&secondary(None, 0.9, HealthStatus::Unhealthy)),
        );
        assert_eq!(merged.health, Health::Healthy);
        assert!(!report.health_overridden);
        assert_eq!(merged, base);
    }

    #[test]
    fn disease_identity_keeps_primary_characterisation() {
        let base = primary(
            Health::Stressed,
            0.85,
            Some(DiseaseInfo {
                name: "Fungal infection".to_string(),
                severity: "Moderate".to_string(),
                recommendations: vec!["Remove affected leaves.".to_string()],
            }),
        );
        let merged = reconcile(
            &base,
            Some(&secondary(Some("Powdery Mildew"), 0.75, HealthStatus::Unhealthy)),
        );
        assert_eq!(
            merged.disease,
            Some(DiseaseInfo {
                name: "Powdery Mildew".to_string(),
                severity: "Moderate".to_string(),
                recommendations: vec!["Remove affected leaves.".to_string()],
            })
        );
        assert_eq!(merged.health, Health::Stressed);
    }

    #[test]
    fn unsure_primary_health_follows_secondary() {
        let base = primary(Health::Unhealthy, 0.4, None);
        let merged = reconcile(&base, Some(&secondary(None, 0.7, HealthStatus::Healthy)));
        assert_eq!(merged.health, Health::Healthy);
        assert_eq!(merged.disease, None);
    }

    #[test]
    fn agreeing_secondary_does_not_count_as_health_override() {
        let base = primary(Health::Unhealthy, 0.4, None);
        let (merged, report) = reconcile_with_report(
            &base,
            Some(&secondary(None, 0.8, HealthStatus::Unhealthy)),
        );
        assert_eq!(merged.health, Health::Unhealthy);
        assert!(report.secondary_trusted);
        assert!(!report.health_overridden);

        let (_, flipped) = reconcile_with_report(
            &base,
            Some(&secondary(None, 0.8, HealthStatus::Healthy)),
        );
        assert!(flipped.health_overridden);
    }

    #[test]
    fn secondary_just_below_threshold_changes_nothing() {
        let base = primary(Health::Unknown, 0.3, None);
        let (merged, report) = reconcile_with_report(
            &base,
            Some(&secondary(Some("Blight"), 0.59, HealthStatus::Unhealthy)),
        );
        assert_eq!(merged, base);
        assert!(report.secondary_available);
        assert!(!report.secondary_trusted);
    }

    #[test]
    fn secondary_at_threshold_is_trusted() {
        let base = primary(Health::Unknown, 0.9, None);
        let merged = reconcile(&base, Some(&secondary(None, 0.6, HealthStatus::Healthy)));
        assert_eq!(merged.health, Health::Healthy);
    }

    #[test]
    fn blank_disease_name_keeps_primary_disease() {
        let base = primary(Health::Healthy, 0.9, None);
        let merged = reconcile(&base, Some(&secondary(Some("  "), 0.9, HealthStatus::Unhealthy)));
        assert_eq!(merged.disease, None);
    }

    #[test]
    fn engine_falls_back_to_primary_when_secondary_fails() -> anyhow::Result<()> {
        let base = primary(Health::Unknown, 0.2, None);
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = AnalysisEngine::new(
            FixedPrimary(Ok(PrimaryAnalysis {
                analysis: base.clone(),
                summary: "A rubber plant.".to_string(),
            })),
            FixedSecondary {
                result: None,
                calls: calls.clone(),
            },
        );

        let result = engine.analyze(&image())?;
        assert_eq!(result.analysis, base);
        assert_eq!(result.summary, "A rubber plant.");
        assert!(!result.report.secondary_available);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn engine_never_consults_secondary_without_primary() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = AnalysisEngine::new(
            FixedPrimary(Err("quota exceeded".to_string())),
            FixedSecondary {
                result: Some(secondary(Some("Rust"), 0.9, HealthStatus::Unhealthy)),
                calls: calls.clone(),
            },
        );
        assert!(matches!(
            engine.analyze(&image()),
            Err(AnalysisError::AnalysisFailed(PrimaryError::ProviderCallFailed(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn engine_keeps_primary_summary_and_records_events() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let engine = AnalysisEngine::new(
            FixedPrimary(Ok(PrimaryAnalysis {
                analysis: primary(Health::Unknown, 0.9, None),
                summary: "Spots on lower leaves.".to_string(),
            })),
            FixedSecondary {
                result: Some(secondary(Some("Leaf Spot"), 0.8, HealthStatus::Unhealthy)),
                calls: Arc::new(AtomicUsize::new(0)),
            },
        )
        .with_events(EventLog::new(&events_path, "session-1"));

        let result = engine.analyze(&image())?;
        assert_eq!(result.summary, "Spots on lower leaves.");
        assert_eq!(result.analysis.health, Health::Unhealthy);
        assert!(result.report.disease_overridden);

        let raw = std::fs::read_to_string(events_path)?;
        let types: Vec<String> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(
            types,
            vec![
                "analysis_started",
                "primary_completed",
                "secondary_completed",
                "analysis_reconciled"
            ]
        );
        Ok(())
    }
}
