//! Journal of store mutations and analysis runs, one JSON object per line.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use crate::plants::{now_utc_iso, Health, Rating};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEvent {
    PlantCreated {
        plant_id: String,
        name: String,
        snapshots: usize,
    },
    SnapshotAppended {
        plant_id: String,
        snapshot_id: String,
        health: Health,
    },
    PlantRenamed {
        plant_id: String,
        name: String,
    },
    FeedbackRecorded {
        plant_id: String,
        snapshot_id: String,
        rating: Rating,
    },
    SnapshotDeleted {
        plant_id: String,
        snapshot_id: String,
        plant_removed: bool,
    },
    AnalysisStarted {
        mime_type: String,
        payload_chars: usize,
        primary: String,
        secondary: String,
    },
    PrimaryCompleted {
        is_plant: bool,
        confidence: f64,
        health: Health,
        disease: Option<String>,
    },
    SecondaryCompleted {
        disease_name: Option<String>,
        disease_confidence: f64,
        health_status: String,
    },
    SecondaryUnavailable {
        error: String,
    },
    AnalysisReconciled {
        health: Health,
        disease: Option<String>,
        secondary_trusted: bool,
        disease_overridden: bool,
        health_overridden: bool,
    },
    AnalysisFailed {
        error: String,
    },
}

impl JournalEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlantCreated { .. } => "plant_created",
            Self::SnapshotAppended { .. } => "snapshot_appended",
            Self::PlantRenamed { .. } => "plant_renamed",
            Self::FeedbackRecorded { .. } => "feedback_recorded",
            Self::SnapshotDeleted { .. } => "snapshot_deleted",
            Self::AnalysisStarted { .. } => "analysis_started",
            Self::PrimaryCompleted { .. } => "primary_completed",
            Self::SecondaryCompleted { .. } => "secondary_completed",
            Self::SecondaryUnavailable { .. } => "secondary_unavailable",
            Self::AnalysisReconciled { .. } => "analysis_reconciled",
            Self::AnalysisFailed { .. } => "analysis_failed",
        }
    }
}

#[derive(Serialize)]
struct JournalLine<'a> {
    #[serde(flatten)]
    event: &'a JournalEvent,
    session_id: &'a str,
    ts: String,
}

/// Appends [`JournalEvent`]s to `events.jsonl`, stamped with the session
/// that produced them.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    session_id: String,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, event: &JournalEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(&JournalLine {
            event,
            session_id: &self.session_id,
            ts: now_utc_iso(),
        })?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Records `event`, downgrading a failure to a warning.
    pub fn record_or_warn(&self, event: &JournalEvent) {
        if let Err(err) = self.record(event) {
            tracing::warn!(event = event.kind(), "failed to record journal event: {err:#}");
        }
    }
}
