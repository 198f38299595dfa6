use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::store::{Dataset, TableStore};

/// Single-slot backup of the dataset, written right before a regeneration
/// run. There is only ever one slot per dataset; a run must finish with
/// `discard` before the next one may capture.
pub struct SnapshotSlot {
    path: PathBuf,
}

impl SnapshotSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotSlot { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A leftover slot file means an earlier run never finished.
    pub fn is_occupied(&self) -> bool {
        self.path.exists()
    }

    /// Copy the current dataset into the slot. The copy is byte-for-byte so
    /// a later restore reproduces the pre-run file exactly. `data` is None
    /// when no dataset exists yet, which is the normal first-run case.
    pub fn capture(&self, store: &TableStore) -> Result<CapturedSnapshot<'_>> {
        let Some(raw) = store.read_raw()? else {
            return Ok(CapturedSnapshot {
                slot: self,
                data: None,
            });
        };
        let data: Dataset = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", store.path().display()))?;
        fs::write(&self.path, &raw)
            .with_context(|| format!("failed to write backup {}", self.path.display()))?;
        Ok(CapturedSnapshot {
            slot: self,
            data: Some(data),
        })
    }

    /// Read the slot without touching it. Operator recovery path.
    pub fn read(&self) -> Result<Option<Dataset>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)
            .with_context(|| format!("failed to read backup {}", self.path.display()))?;
        let dataset = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse backup {}", self.path.display()))?;
        Ok(Some(dataset))
    }

    /// Copy the slot back over the canonical dataset file, then clear the
    /// slot. Returns false if the slot was empty.
    pub fn restore_into(&self, store: &TableStore) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::copy(&self.path, store.path()).with_context(|| {
            format!(
                "failed to restore {} from {}",
                store.path().display(),
                self.path.display()
            )
        })?;
        self.clear()?;
        Ok(true)
    }

    /// Delete the slot file. Idempotent; clearing an empty slot is fine.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove backup {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// A snapshot taken for one run. The content was read into memory at capture
/// time; the slot file stays on disk until `discard`, so a crash mid-run
/// always leaves the backup behind for the operator.
pub struct CapturedSnapshot<'a> {
    slot: &'a SnapshotSlot,
    pub data: Option<Dataset>,
}

impl CapturedSnapshot<'_> {
    pub fn was_captured(&self) -> bool {
        self.data.is_some()
    }

    /// Finish with this snapshot: drop the content and clear the slot.
    pub fn discard(self) -> Result<()> {
        self.slot.clear()
    }
}
