use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::store::TableRecord;

#[derive(Serialize)]
struct ReferenceMetadata {
    reference_for_page: u32,
}

#[derive(Serialize)]
struct Reference<'a> {
    metadata: ReferenceMetadata,
    tables: &'a [TableRecord],
}

/// Write the reference payload the extraction tool may read for context:
/// the page being regenerated plus every table currently known for the
/// document, not just that page's. The full sequence is what lets the tool
/// tell already-known tables from newly found ones.
///
/// Returns false without writing when there is nothing to reference. A stale
/// file from an earlier run is simply overwritten next time.
pub fn write_reference(path: &Path, page: u32, tables: &[TableRecord]) -> Result<bool> {
    if tables.is_empty() {
        return Ok(false);
    }
    let payload = Reference {
        metadata: ReferenceMetadata {
            reference_for_page: page,
        },
        tables,
    };
    let json = serde_json::to_string_pretty(&payload)?;
    fs::write(path, json)
        .with_context(|| format!("failed to write reference {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_collection_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables_reference.json");
        assert!(!write_reference(&path, 3, &[]).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn reference_tags_page_and_keeps_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables_reference.json");
        let tables = vec![
            TableRecord {
                page: Some(1),
                extra: serde_json::Map::new(),
            },
            TableRecord {
                page: Some(5),
                extra: serde_json::Map::new(),
            },
        ];

        assert!(write_reference(&path, 3, &tables).unwrap());
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["metadata"]["reference_for_page"], json!(3));
        // All pages present, not a page-3 subset
        assert_eq!(written["tables"].as_array().unwrap().len(), 2);
    }
}
