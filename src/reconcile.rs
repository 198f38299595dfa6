use anyhow::Context;
use tracing::{info, warn};

use crate::pipeline::PipelineError;
use crate::snapshot::CapturedSnapshot;
use crate::store::TableStore;

/// How a run's output was folded into the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No dataset existed before the run; whatever the tool wrote stands.
    FirstRun,
    /// The tool's output already covers the full collection; accepted as-is,
    /// the file is not rewritten.
    Accepted { total: usize },
    /// The tool overwrote the collection with only its page-scoped subset.
    /// The pre-run tables were restored and the new ones appended.
    Merged {
        kept: usize,
        appended: usize,
        total: usize,
    },
}

impl Outcome {
    pub fn message(&self) -> String {
        match self {
            Outcome::FirstRun => "tables regenerated".to_string(),
            Outcome::Accepted { total } => {
                format!("tables regenerated ({total} total)")
            }
            Outcome::Merged { total, .. } => {
                format!("tables regenerated and merged ({total} total)")
            }
        }
    }
}

/// Fold the tool's output back into the dataset, comparing it against the
/// pre-run snapshot so unrelated pages' tables are never lost.
///
/// On any error the snapshot slot is left on disk untouched; it is the only
/// recovery artifact.
pub fn reconcile(
    store: &TableStore,
    mut snapshot: CapturedSnapshot<'_>,
) -> Result<Outcome, PipelineError> {
    let Some(previous) = snapshot.data.take() else {
        // First-ever run: nothing to compare against, the tool's output is
        // final even if it wrote nothing.
        snapshot.discard()?;
        return Ok(Outcome::FirstRun);
    };

    let fresh = store
        .try_load()
        .map_err(|err| PipelineError::Integrity {
            path: store.path().to_path_buf(),
            detail: err.to_string(),
        })?
        .ok_or_else(|| PipelineError::Integrity {
            path: store.path().to_path_buf(),
            detail: "file not found after tool run".to_string(),
        })?;

    if !collection_was_overwritten(previous.tables.len(), fresh.tables.len()) {
        // The tool carried the rest of the collection along itself.
        let total = fresh.tables.len();
        info!("tool output has {total} tables (had {}), accepting as-is", previous.tables.len());
        snapshot.discard()?;
        return Ok(Outcome::Accepted { total });
    }

    // Fewer tables than before a single-page run: the tool replaced the whole
    // collection with just the pages it recomputed. Rebuild on top of the
    // snapshot. Tables the tool meant to delete come back too; that is the
    // accepted cost of never losing other pages' data.
    let kept = previous.tables.len();
    let appended = fresh.tables.len();
    warn!("tool output shrank the collection ({kept} -> {appended}), merging with pre-run snapshot");

    let mut merged = previous;
    merged.tables.extend(fresh.tables);
    let total = merged.tables.len();
    store
        .save(&mut merged)
        .context("failed to write merged dataset")?;
    snapshot.discard()?;
    info!("merged dataset now holds {total} tables");

    Ok(Outcome::Merged {
        kept,
        appended,
        total,
    })
}

/// The detection heuristic, kept on its own so it can be replaced by a
/// page-tagged diff without touching anything else: after a single-page run,
/// a strictly smaller collection is taken as certain evidence the tool threw
/// away unrelated pages.
fn collection_was_overwritten(previous: usize, fresh: usize) -> bool {
    fresh < previous
}
