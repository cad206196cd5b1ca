pub mod collection;
mod growth;
mod model;

pub use growth::{growth_series, parse_measurement, GrowthPoint, GrowthSeries};
pub use model::{
    now_utc_iso, AnalysisResult, CareAdvice, DiseaseInfo, Feedback, Health, Plant, Rating,
    Snapshot,
};
