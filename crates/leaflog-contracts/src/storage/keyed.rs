use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

/// Get/set persistence by string key with JSON values.
pub trait KeyedStore {
    fn get(&mut self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()>;
}

/// A single JSON object on disk, owned by one writer.
///
/// The file is read once on first access. Each `set` writes a sibling temp
/// file and renames it over the original, so readers only ever see a complete
/// object. A file that does not hold a JSON object is moved aside to
/// `<name>.corrupt-<timestamp>` before the store starts empty.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn loaded(&mut self) -> &mut Map<String, Value> {
        let path = &self.path;
        self.payload.get_or_insert_with(|| load_json_object(path))
    }
}

impl KeyedStore for JsonFileStore {
    fn get(&mut self, key: &str) -> Option<Value> {
        self.loaded().get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut next = self.loaded().clone();
        if next.get(key) == Some(&value) {
            return Ok(());
        }
        next.insert(key.to_string(), value);
        write_json_object(&self.path, &next)?;
        self.payload = Some(next);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl KeyedStore for MemoryStore {
    fn get(&mut self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value);
        self.writes += 1;
        Ok(())
    }
}

fn load_json_object(path: &Path) -> Map<String, Value> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Map::new(),
        Err(err) => {
            tracing::warn!(path = %path.display(), "failed to read store file: {err}");
            return Map::new();
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(payload)) => payload,
        Ok(_) => {
            tracing::warn!(path = %path.display(), "store file is not a JSON object");
            set_aside(path);
            Map::new()
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), "store file is not valid JSON: {err}");
            set_aside(path);
            Map::new()
        }
    }
}

fn set_aside(path: &Path) {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("store"));
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.6f")));
    let backup = path.with_file_name(name);
    match fs::rename(path, &backup) {
        Ok(()) => tracing::warn!(backup = %backup.display(), "moved unreadable store file aside"),
        Err(err) => tracing::warn!("failed to move unreadable store file aside: {err}"),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to stage a write in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut staged, payload)?;
    staged.write_all(b"\n")?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
