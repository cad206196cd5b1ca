mod keyed;
mod plant_store;

pub use keyed::{JsonFileStore, KeyedStore, MemoryStore};
pub use plant_store::{PlantStore, PLANTS_KEY};
