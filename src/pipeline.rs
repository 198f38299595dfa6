use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::reconcile::{self, Outcome};
use crate::reference;
use crate::runner::{self, ToolInvocation};
use crate::snapshot::SnapshotSlot;
use crate::store::{Dataset, TableStore};

const DATASET_FILE: &str = "tables.json";
const BACKUP_FILE: &str = "tables_backup.json";
const REFERENCE_FILE: &str = "tables_reference.json";
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;

/// Why a regeneration run could not complete. Configuration problems are the
/// caller's fault; everything else is a tool or storage failure. On every
/// failure after capture, the snapshot slot is left in place as the sole
/// recovery artifact.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Config(String),

    #[error(
        "backup slot {path} still holds a snapshot from an earlier interrupted run; \
         run `recover --restore` or `recover --discard` first"
    )]
    SnapshotLeftover { path: PathBuf },

    #[error("extraction tool failed: {reason}")]
    Tool { reason: String, stderr: String },

    #[error("regenerated dataset at {path} is missing or unreadable: {detail}")]
    Integrity { path: PathBuf, detail: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct RunRequest {
    pub page: u32,
    pub exclude_merge: bool,
}

#[derive(Debug)]
pub struct RunReport {
    pub page: u32,
    pub outcome: Outcome,
}

impl RunReport {
    pub fn message(&self) -> String {
        self.outcome.message()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Recovery {
    /// Write the leftover snapshot back over the dataset, then clear the slot.
    Restore,
    /// Drop the leftover snapshot, keeping the dataset as-is.
    Discard,
}

pub struct DatasetSummary {
    pub total_tables: usize,
    pub timestamp: Option<String>,
    /// Table count per tagged page, ordered by page number.
    pub pages: BTreeMap<i64, usize>,
    /// Tables whose payload carries no page tag.
    pub untagged: usize,
    pub snapshot_pending: bool,
}

/// Drives one page-regeneration request end to end: validate config, back up
/// the dataset, hand the tool its reference, run it, reconcile the result.
///
/// One pipeline instance owns one dataset (one data directory) and its
/// single backup slot; `run_lock` serializes runs so two regenerations can
/// never race on the slot or on the dataset file. Independent datasets get
/// independent pipeline instances and may run in parallel.
pub struct Pipeline {
    store: TableStore,
    slot: SnapshotSlot,
    reference_path: PathBuf,
    config_path: PathBuf,
    tool_timeout: Duration,
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(data_dir: impl Into<PathBuf>, tool_timeout: Duration) -> Self {
        let data_dir = data_dir.into();
        Pipeline {
            store: TableStore::new(data_dir.join(DATASET_FILE)),
            slot: SnapshotSlot::new(data_dir.join(BACKUP_FILE)),
            reference_path: data_dir.join(REFERENCE_FILE),
            config_path: data_dir.join(CONFIG_FILE),
            tool_timeout,
            run_lock: Mutex::new(()),
        }
    }

    /// Re-run extraction for one page and fold the result into the dataset.
    pub async fn regenerate(&self, request: RunRequest) -> Result<RunReport, PipelineError> {
        let _guard = self.run_lock.lock().await;
        let page = request.page;
        info!("regenerating tables for page {page}");

        if page == 0 {
            return Err(PipelineError::Config(
                "page number must be positive".to_string(),
            ));
        }
        let config =
            RunConfig::load(&self.config_path).map_err(|err| PipelineError::Config(err.to_string()))?;

        if self.slot.is_occupied() {
            return Err(PipelineError::SnapshotLeftover {
                path: self.slot.path().to_path_buf(),
            });
        }
        let snapshot = self.slot.capture(&self.store)?;
        if let Some(data) = &snapshot.data {
            info!("backed up current dataset ({} tables)", data.tables.len());
        }

        // The reference is an optional aid to the tool; failing to write it
        // must not abort the run.
        let reference = match &snapshot.data {
            Some(data) => match reference::write_reference(&self.reference_path, page, &data.tables)
            {
                Ok(true) => Some(self.reference_path.as_path()),
                Ok(false) => None,
                Err(err) => {
                    warn!("failed to write reference file: {err:#}");
                    None
                }
            },
            None => None,
        };

        let output = runner::run(&ToolInvocation {
            tool: &config.script_path,
            document: &config.pdf_path,
            page,
            reference,
            exclude_merge: request.exclude_merge,
            timeout: self.tool_timeout,
        })
        .await?;

        if !output.stdout.trim().is_empty() {
            info!("tool stdout:\n{}", output.stdout.trim_end());
        }
        if !output.success() {
            let reason = if output.timed_out {
                format!("timed out after {:?}", self.tool_timeout)
            } else {
                match output.exit_code {
                    Some(code) => format!("exit code {code}"),
                    None => "killed by signal".to_string(),
                }
            };
            return Err(PipelineError::Tool {
                reason,
                stderr: output.stderr,
            });
        }

        let outcome = reconcile::reconcile(&self.store, snapshot)?;
        info!("page {page} done: {}", outcome.message());
        Ok(RunReport { page, outcome })
    }

    /// Current dataset, if one has been written yet.
    pub async fn load_dataset(&self) -> Result<Option<Dataset>> {
        let _guard = self.run_lock.lock().await;
        self.store.try_load()
    }

    /// Direct external save: overwrite the dataset wholesale. Counts and
    /// timestamp are restamped like on any other write.
    pub async fn save_dataset(&self, dataset: &mut Dataset) -> Result<()> {
        let _guard = self.run_lock.lock().await;
        self.store.save(dataset)
    }

    /// Operator handling of a backup slot left behind by an interrupted run.
    /// Returns false if the slot was already empty.
    pub async fn recover(&self, mode: Recovery) -> Result<bool> {
        let _guard = self.run_lock.lock().await;
        match mode {
            Recovery::Restore => self.slot.restore_into(&self.store),
            Recovery::Discard => {
                if !self.slot.is_occupied() {
                    return Ok(false);
                }
                self.slot.clear()?;
                Ok(true)
            }
        }
    }

    pub async fn summary(&self) -> Result<Option<DatasetSummary>> {
        let _guard = self.run_lock.lock().await;
        let Some(dataset) = self.store.try_load()? else {
            return Ok(None);
        };
        let mut pages: BTreeMap<i64, usize> = BTreeMap::new();
        let mut untagged = 0usize;
        for table in &dataset.tables {
            match table.page {
                Some(page) => *pages.entry(page).or_default() += 1,
                None => untagged += 1,
            }
        }
        Ok(Some(DatasetSummary {
            total_tables: dataset.tables.len(),
            timestamp: dataset.metadata.timestamp,
            pages,
            untagged,
            snapshot_pending: self.slot.is_occupied(),
        }))
    }

    pub fn snapshot_pending(&self) -> bool {
        self.slot.is_occupied()
    }
}
