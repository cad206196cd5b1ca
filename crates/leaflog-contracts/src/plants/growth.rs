use chrono::{DateTime, FixedOffset};

use super::model::Plant;

#[derive(Debug, Clone, PartialEq)]
pub struct GrowthPoint {
    pub timestamp: DateTime<FixedOffset>,
    pub height: f64,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GrowthSeries {
    pub points: Vec<GrowthPoint>,
}

impl GrowthSeries {
    /// A line needs two points.
    pub fn is_chartable(&self) -> bool {
        self.points.len() >= 2
    }
}

/// Height and width per snapshot, oldest first. Snapshots whose timestamp
/// does not parse are left out.
pub fn growth_series(plant: &Plant) -> GrowthSeries {
    let mut points: Vec<GrowthPoint> = plant
        .snapshots
        .iter()
        .filter_map(|snapshot| {
            let Ok(timestamp) = DateTime::parse_from_rfc3339(&snapshot.timestamp) else {
                tracing::debug!(snapshot = %snapshot.id, "skipping snapshot with unparsable timestamp");
                return None;
            };
            Some(GrowthPoint {
                timestamp,
                height: parse_measurement(snapshot.analysis.height.as_deref()),
                width: parse_measurement(snapshot.analysis.width.as_deref()),
            })
        })
        .collect();
    points.sort_by_key(|point| point.timestamp);
    GrowthSeries { points }
}

/// Reads the leading number of a measurement such as `"15 cm"`. Missing or
/// non-numeric values read as zero.
pub fn parse_measurement(raw: Option<&str>) -> f64 {
    let Some(raw) = raw else {
        return 0.0;
    };
    let trimmed = raw.trim_start();
    let candidate: String = trimmed
        .chars()
        .take_while(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '+' | '-' | 'e' | 'E'))
        .collect();
    (1..=candidate.len())
        .rev()
        .find_map(|end| candidate[..end].parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}
