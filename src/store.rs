use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One extracted table. The cell grid, bounding geometry and whatever else
/// the extraction tool emits ride along untouched in `extra`; only the
/// originating page is pulled out, and even that is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub total_tables: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// The whole-document table collection as persisted on disk. Table order is
/// insertion order, not page order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub tables: Vec<TableRecord>,
}

/// Reads and writes the canonical dataset file. Every write is a whole-file
/// overwrite; there are no partial or append writes.
pub struct TableStore {
    path: PathBuf,
}

impl TableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TableStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Raw file bytes, or None if no dataset has been written yet.
    pub fn read_raw(&self) -> Result<Option<Vec<u8>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        Ok(Some(bytes))
    }

    pub fn try_load(&self) -> Result<Option<Dataset>> {
        let Some(bytes) = self.read_raw()? else {
            return Ok(None);
        };
        let dataset = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(dataset))
    }

    pub fn load(&self) -> Result<Dataset> {
        self.try_load()?
            .with_context(|| format!("no dataset at {}", self.path.display()))
    }

    /// Overwrite the dataset file. `total_tables` is recomputed from the
    /// sequence length and `timestamp` restamped on every write, so the
    /// metadata can never drift from the content.
    pub fn save(&self, dataset: &mut Dataset) -> Result<()> {
        dataset.metadata.total_tables = dataset.tables.len();
        dataset.metadata.timestamp = Some(now_iso8601());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(dataset)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(page: i64, label: &str) -> TableRecord {
        let mut extra = serde_json::Map::new();
        extra.insert("label".into(), json!(label));
        TableRecord {
            page: Some(page),
            extra,
        }
    }

    #[test]
    fn save_recomputes_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::new(dir.path().join("tables.json"));

        let mut dataset = Dataset {
            metadata: Metadata {
                total_tables: 999, // stale on purpose
                ..Metadata::default()
            },
            tables: vec![record(1, "a"), record(2, "b")],
        };
        store.save(&mut dataset).unwrap();
        assert_eq!(dataset.metadata.total_tables, 2);

        let loaded = store.load().unwrap();
        assert_eq!(loaded.metadata.total_tables, 2);
        assert_eq!(loaded.tables.len(), 2);
        let ts = loaded.metadata.timestamp.unwrap();
        chrono::DateTime::parse_from_rfc3339(&ts).expect("timestamp must be ISO-8601");
    }

    #[test]
    fn opaque_payload_survives_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::new(dir.path().join("tables.json"));

        let raw = json!({
            "metadata": { "total_tables": 1, "source": "extractor-v2" },
            "tables": [
                { "page": 4, "cells": [["a", "b"], ["c", "d"]], "bbox": [0, 0, 10, 10] }
            ]
        });
        fs::write(store.path(), serde_json::to_vec(&raw).unwrap()).unwrap();

        let mut dataset = store.load().unwrap();
        assert_eq!(dataset.tables[0].page, Some(4));
        assert!(dataset.tables[0].extra.contains_key("cells"));
        assert_eq!(dataset.metadata.extra["source"], json!("extractor-v2"));

        store.save(&mut dataset).unwrap();
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.tables[0].extra["bbox"], json!([0, 0, 10, 10]));
        assert_eq!(reloaded.metadata.extra["source"], json!("extractor-v2"));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::new(dir.path().join("tables.json"));
        assert!(store.try_load().unwrap().is_none());
        assert!(store.load().is_err());
    }
}
