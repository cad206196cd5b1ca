use anyhow::Context;
use serde_json::Value;

use crate::events::{EventLog, JournalEvent};
use crate::plants::collection;
use crate::plants::{Feedback, Plant, Snapshot};

use super::keyed::KeyedStore;

pub const PLANTS_KEY: &str = "plants";

/// Owns the plant collection and writes all of it to the backend after every
/// change. The in-memory value is only replaced once the write succeeded.
#[derive(Debug)]
pub struct PlantStore<B: KeyedStore> {
    backend: B,
    plants: Vec<Plant>,
    events: Option<EventLog>,
}

impl<B: KeyedStore> PlantStore<B> {
    pub fn open(mut backend: B) -> Self {
        let plants = decode_plants(backend.get(PLANTS_KEY));
        Self {
            backend,
            plants,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn plants(&self) -> &[Plant] {
        &self.plants
    }

    pub fn find_by_id(&self, plant_id: &str) -> Option<&Plant> {
        collection::find_by_id(&self.plants, plant_id)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn create(&mut self, plant: Plant) -> anyhow::Result<bool> {
        let event = JournalEvent::PlantCreated {
            plant_id: plant.id.clone(),
            name: plant.name.clone(),
            snapshots: plant.snapshots.len(),
        };
        let next = collection::create(&self.plants, plant);
        self.commit(next, event)
    }

    pub fn append(&mut self, plant_id: &str, snapshot: Snapshot) -> anyhow::Result<bool> {
        let event = JournalEvent::SnapshotAppended {
            plant_id: plant_id.to_string(),
            snapshot_id: snapshot.id.clone(),
            health: snapshot.analysis.health,
        };
        let next = collection::append(&self.plants, plant_id, &snapshot);
        self.commit(next, event)
    }

    pub fn rename(&mut self, plant_id: &str, name: &str) -> anyhow::Result<bool> {
        let next = collection::rename(&self.plants, plant_id, name);
        let event = JournalEvent::PlantRenamed {
            plant_id: plant_id.to_string(),
            name: name.to_string(),
        };
        self.commit(next, event)
    }

    pub fn set_feedback(
        &mut self,
        plant_id: &str,
        snapshot_id: &str,
        feedback: Feedback,
    ) -> anyhow::Result<bool> {
        let next = collection::set_feedback(&self.plants, plant_id, snapshot_id, &feedback);
        let event = JournalEvent::FeedbackRecorded {
            plant_id: plant_id.to_string(),
            snapshot_id: snapshot_id.to_string(),
            rating: feedback.rating,
        };
        self.commit(next, event)
    }

    pub fn delete_snapshot(&mut self, plant_id: &str, snapshot_id: &str) -> anyhow::Result<bool> {
        let next = collection::delete_snapshot(&self.plants, plant_id, snapshot_id);
        let event = JournalEvent::SnapshotDeleted {
            plant_id: plant_id.to_string(),
            snapshot_id: snapshot_id.to_string(),
            plant_removed: collection::find_by_id(&next, plant_id).is_none(),
        };
        self.commit(next, event)
    }

    fn commit(&mut self, next: Vec<Plant>, event: JournalEvent) -> anyhow::Result<bool> {
        if next == self.plants {
            return Ok(false);
        }
        let serialized = serde_json::to_value(&next).context("failed to encode plant collection")?;
        self.backend
            .set(PLANTS_KEY, serialized)
            .context("failed to persist plant collection")?;
        self.plants = next;

        if let Some(events) = &self.events {
            events.record_or_warn(&event);
        }
        Ok(true)
    }
}

fn decode_plants(stored: Option<Value>) -> Vec<Plant> {
    let items = match stored {
        None => return Vec::new(),
        Some(Value::Array(items)) => items,
        Some(other) => {
            tracing::warn!(
                kind = json_kind(&other),
                "stored plant collection is not an array; starting empty"
            );
            return Vec::new();
        }
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| match serde_json::from_value::<Plant>(item) {
            Ok(plant) if plant.snapshots.is_empty() => {
                tracing::warn!(plant = %plant.id, "dropping stored plant without snapshots");
                None
            }
            Ok(plant) => Some(plant),
            Err(err) => {
                tracing::warn!(index = idx, "skipping undecodable stored plant: {err}");
                None
            }
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::plants::{AnalysisResult, Health, Rating};
    use crate::storage::{JsonFileStore, MemoryStore};

    use super::*;

    struct FailingStore;

    impl KeyedStore for FailingStore {
        fn get(&mut self, _key: &str) -> Option<Value> {
            None
        }

        fn set(&mut self, _key: &str, _value: Value) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    fn snapshot(id: &str) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            image_url: "images/leaf.png".to_string(),
            analysis: AnalysisResult {
                is_plant: true,
                confidence: 0.9,
                health: Health::Healthy,
                ..AnalysisResult::default()
            },
            summary: "Healthy leaves.".to_string(),
            timestamp: id.to_string(),
        }
    }

    fn plant(id: &str, snapshot_ids: &[&str]) -> Plant {
        Plant {
            id: id.to_string(),
            name: format!("plant {id}"),
            snapshots: snapshot_ids.iter().map(|sid| snapshot(sid)).collect(),
        }
    }

    #[test]
    fn mutations_persist_full_collection() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        let mut store = PlantStore::open(JsonFileStore::new(&path));

        assert!(store.create(plant("p1", &["2026-01-01T00:00:00Z"]))?);
        assert!(store.append("p1", snapshot("2026-01-02T00:00:00Z"))?);
        assert!(store.rename("p1", "Calathea")?);

        let reopened = PlantStore::open(JsonFileStore::new(&path));
        assert_eq!(reopened.plants(), store.plants());
        let stored = reopened.find_by_id("p1").map(|p| (p.name.clone(), p.snapshots.len()));
        assert_eq!(stored, Some(("Calathea".to_string(), 2)));
        Ok(())
    }

    #[test]
    fn noop_mutations_skip_the_write() -> anyhow::Result<()> {
        let mut store = PlantStore::open(MemoryStore::new());
        store.create(plant("p1", &["2026-01-01T00:00:00Z"]))?;
        assert_eq!(store.backend().writes(), 1);

        let feedback = Feedback {
            rating: Rating::Correct,
            comment: None,
        };
        assert!(!store.set_feedback("p1", "missing", feedback)?);
        assert!(!store.append("missing", snapshot("2026-01-02T00:00:00Z"))?);
        assert!(!store.delete_snapshot("p1", "missing")?);
        assert_eq!(store.backend().writes(), 1);
        Ok(())
    }

    #[test]
    fn failed_write_leaves_collection_untouched() {
        let mut store = PlantStore::open(FailingStore);
        let result = store.create(plant("p1", &["2026-01-01T00:00:00Z"]));
        assert!(result.is_err());
        assert!(store.plants().is_empty());
    }

    #[test]
    fn deleting_last_snapshot_cascades_to_plant() -> anyhow::Result<()> {
        let mut store = PlantStore::open(MemoryStore::new());
        store.create(plant("p1", &["2026-01-01T00:00:00Z", "2026-01-02T00:00:00Z"]))?;
        store.create(plant("p2", &["2026-01-03T00:00:00Z"]))?;

        store.delete_snapshot("p1", "2026-01-01T00:00:00Z")?;
        assert_eq!(store.find_by_id("p1").map(|p| p.snapshots.len()), Some(1));

        store.delete_snapshot("p2", "2026-01-03T00:00:00Z")?;
        assert!(store.find_by_id("p2").is_none());
        assert_eq!(store.plants().len(), 1);
        Ok(())
    }

    #[test]
    fn open_recovers_from_incompatible_stored_values() -> anyhow::Result<()> {
        let mut backend = MemoryStore::new();
        backend.set(PLANTS_KEY, json!({ "not": "a list" }))?;
        assert!(PlantStore::open(backend).plants().is_empty());

        let mut backend = MemoryStore::new();
        let good = serde_json::to_value(plant("p1", &["2026-01-01T00:00:00Z"]))?;
        let empty = serde_json::to_value(plant("p2", &[]))?;
        backend.set(PLANTS_KEY, json!([good, { "id": 7 }, empty]))?;
        let store = PlantStore::open(backend);
        let ids: Vec<&str> = store.plants().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1"]);
        Ok(())
    }

    #[test]
    fn interrupted_write_does_not_cost_existing_plants() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        let mut store = PlantStore::open(JsonFileStore::new(&path));
        store.create(plant("p1", &["2026-01-01T00:00:00Z"]))?;
        let complete = std::fs::read_to_string(&path)?;
        std::fs::write(&path, &complete[..complete.len() / 2])?;

        let mut reopened = PlantStore::open(JsonFileStore::new(&path));
        assert!(reopened.plants().is_empty());
        reopened.create(plant("p2", &["2026-02-01T00:00:00Z"]))?;

        let backup = std::fs::read_dir(temp.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|candidate| candidate != &path);
        let backup = backup.ok_or_else(|| anyhow::anyhow!("no backup of the damaged store"))?;
        assert_eq!(std::fs::read_to_string(backup)?, complete[..complete.len() / 2]);
        Ok(())
    }

    #[test]
    fn mutations_are_recorded_in_event_log() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut store = PlantStore::open(MemoryStore::new())
            .with_events(EventLog::new(&events_path, "session-1"));

        store.create(plant("p1", &["2026-01-01T00:00:00Z"]))?;
        store.delete_snapshot("p1", "2026-01-01T00:00:00Z")?;

        let raw = std::fs::read_to_string(events_path)?;
        let rows: Vec<Value> = raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["type"], json!("plant_created"));
        assert_eq!(rows[1]["type"], json!("snapshot_deleted"));
        assert_eq!(rows[1]["plant_removed"], json!(true));
        Ok(())
    }
}
