//! Pure transforms over the plant collection.
//!
//! Every function takes the previous collection by reference and returns the
//! next one. Nothing is modified in place, so callers can compare the two
//! values and decide whether anything changed.

use super::model::{AnalysisResult, Feedback, Plant, Snapshot};

pub fn find_by_id<'a>(plants: &'a [Plant], plant_id: &str) -> Option<&'a Plant> {
    plants.iter().find(|plant| plant.id == plant_id)
}

/// Adds a brand-new plant at the end. Plants without snapshots, or whose id is
/// already taken, are not inserted.
pub fn create(plants: &[Plant], plant: Plant) -> Vec<Plant> {
    let mut next = plants.to_vec();
    if plant.snapshots.is_empty() || find_by_id(plants, &plant.id).is_some() {
        return next;
    }
    next.push(plant);
    next
}

pub fn append(plants: &[Plant], plant_id: &str, snapshot: &Snapshot) -> Vec<Plant> {
    map_plant(plants, plant_id, |plant| {
        let mut snapshots = plant.snapshots.clone();
        snapshots.push(snapshot.clone());
        Plant {
            snapshots,
            ..plant.clone()
        }
    })
}

pub fn rename(plants: &[Plant], plant_id: &str, name: &str) -> Vec<Plant> {
    map_plant(plants, plant_id, |plant| Plant {
        name: name.to_string(),
        ..plant.clone()
    })
}

pub fn set_feedback(
    plants: &[Plant],
    plant_id: &str,
    snapshot_id: &str,
    feedback: &Feedback,
) -> Vec<Plant> {
    map_plant(plants, plant_id, |plant| Plant {
        snapshots: plant
            .snapshots
            .iter()
            .map(|snapshot| {
                if snapshot.id != snapshot_id {
                    return snapshot.clone();
                }
                Snapshot {
                    analysis: AnalysisResult {
                        feedback: Some(feedback.clone()),
                        ..snapshot.analysis.clone()
                    },
                    ..snapshot.clone()
                }
            })
            .collect(),
        ..plant.clone()
    })
}

/// Removes one snapshot. Any plant left without snapshots is dropped from the
/// collection in the same pass.
pub fn delete_snapshot(plants: &[Plant], plant_id: &str, snapshot_id: &str) -> Vec<Plant> {
    map_plant(plants, plant_id, |plant| Plant {
        snapshots: plant
            .snapshots
            .iter()
            .filter(|snapshot| snapshot.id != snapshot_id)
            .cloned()
            .collect(),
        ..plant.clone()
    })
    .into_iter()
    .filter(|plant| !plant.snapshots.is_empty())
    .collect()
}

fn map_plant(plants: &[Plant], plant_id: &str, update: impl Fn(&Plant) -> Plant) -> Vec<Plant> {
    plants
        .iter()
        .map(|plant| {
            if plant.id == plant_id {
                update(plant)
            } else {
                plant.clone()
            }
        })
        .collect()
}
