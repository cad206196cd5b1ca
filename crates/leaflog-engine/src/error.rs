//! Error taxonomy for ingestion and analysis.
//!
//! Ingestion and primary analyzer errors reach the user. Secondary analyzer
//! errors never leave [`crate::AnalysisEngine`].

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid image format: {0}")]
    InvalidFormat(String),

    #[error("failed to read image {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PrimaryError {
    #[error("primary analyzer call failed: {0}")]
    ProviderCallFailed(String),

    #[error("unexpected response shape from primary analyzer")]
    UnexpectedResponseShape,

    #[error("malformed analysis: {0}")]
    MalformedAnalysis(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SecondaryError {
    #[error("disease backend returned status {status}")]
    BackendError { status: u16 },

    #[error("disease backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("disease backend returned an unreadable body: {0}")]
    BackendMalformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis failed: {0}")]
    AnalysisFailed(#[from] PrimaryError),
}
