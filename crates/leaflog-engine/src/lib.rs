mod config;
mod error;
pub mod ingest;
pub mod primary;
pub mod reconcile;
pub mod secondary;

#[cfg(test)]
mod test_support;

pub use config::AnalyzerConfig;
pub use error::{AnalysisError, IngestError, PrimaryError, SecondaryError};
pub use ingest::ImagePayload;
pub use primary::{GeminiAnalyzer, PrimaryAnalysis, PrimaryAnalyzer};
pub use reconcile::{reconcile, AnalysisEngine, ReconcileReport, ReconciledAnalysis};
pub use secondary::{HealthStatus, PdddClient, SecondaryAnalysis, SecondaryAnalyzer};
