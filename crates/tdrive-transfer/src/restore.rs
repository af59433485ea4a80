//! RestorationImporter: seeds the store from the backend's snapshot of
//! transfers that were in flight before this session started.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info, warn};

use tdrive_core::config::DEFAULT_CHUNK_SIZE;
use tdrive_core::{ItemKind, TdriveError, TdriveResult, TransferKind};

use crate::aggregate;
use crate::store::TransferTaskStore;
use crate::task::{unix_millis, NodeId, Task, TaskSource, TaskStatus};

/// Snapshot returned by `TransferBackend::incomplete_transfers`, keyed by task id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncompleteTransfers {
    pub uploads: BTreeMap<String, TaskDescriptor>,
    pub downloads: BTreeMap<String, TaskDescriptor>,
}

impl IncompleteTransfers {
    pub fn from_json(json: &str) -> TdriveResult<Self> {
        serde_json::from_str(json).map_err(|e| TdriveError::Snapshot(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.downloads.is_empty()
    }

    pub fn collection(&self, kind: TransferKind) -> &BTreeMap<String, TaskDescriptor> {
        match kind {
            TransferKind::Upload => &self.uploads,
            TransferKind::Download => &self.downloads,
        }
    }
}

/// Last persisted state of one transfer, as the backend recorded it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDescriptor {
    pub name: Option<String>,
    pub total_size: u64,
    /// Indices of chunks already on the other side. May repeat or be stale.
    pub transferred_chunks: Vec<u64>,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Upload source on disk
    pub local_path: Option<PathBuf>,
    /// Cloud folder an upload lands in
    pub parent_id: Option<String>,
    /// Cloud item a download reads from
    pub source_id: Option<String>,
    /// Unix seconds
    pub created_at: Option<u64>,
    pub updated_at: Option<u64>,
    pub error_message: Option<String>,
    pub children: BTreeMap<String, TaskDescriptor>,
}

impl TaskDescriptor {
    pub fn is_folder(&self) -> bool {
        self.kind.is_folder() || !self.children.is_empty()
    }

    /// Recorded status as the backend wrote it; unknown strings read as paused.
    pub fn recorded_status(&self) -> TaskStatus {
        TaskStatus::from_str(&self.status).unwrap_or_else(|_| {
            warn!(status = %self.status, "unknown status in snapshot, importing as paused");
            TaskStatus::Paused
        })
    }

    /// Status the task is imported with. Nothing moves bytes right after a
    /// restart, so anything that was in flight comes back paused.
    pub fn imported_status(&self) -> TaskStatus {
        match self.recorded_status() {
            TaskStatus::Transferring | TaskStatus::StartingFolder => TaskStatus::Paused,
            other => other,
        }
    }

    /// Declared size, or the sum of the children when the folder never recorded one.
    pub fn size(&self) -> u64 {
        if self.total_size > 0 || self.children.is_empty() {
            return self.total_size;
        }
        self.live_children().map(|(_, c)| c.size()).sum()
    }

    /// Bytes already transferred, estimated from chunk accounting.
    pub fn estimate_progress(&self, chunk_size: u64) -> u64 {
        if self.recorded_status() == TaskStatus::Completed {
            return self.size();
        }
        if !self.children.is_empty() {
            return self
                .live_children()
                .map(|(_, c)| c.estimate_progress(chunk_size))
                .sum();
        }
        let mut chunks = self.transferred_chunks.clone();
        chunks.sort_unstable();
        chunks.dedup();
        (chunks.len() as u64)
            .saturating_mul(chunk_size)
            .min(self.total_size)
    }

    fn live_children(&self) -> impl Iterator<Item = (&String, &TaskDescriptor)> {
        self.children
            .iter()
            .filter(|(_, c)| c.recorded_status() != TaskStatus::Cancelled)
    }

    fn display_name(&self, id: &str) -> String {
        if let Some(name) = self.name.as_ref().filter(|n| !n.is_empty()) {
            return name.clone();
        }
        self.local_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string())
    }
}

/// Counts of top-level tasks an import produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct RestorationImporter {
    chunk_size: u64,
}

impl Default for RestorationImporter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl RestorationImporter {
    pub fn new(chunk_size: u64) -> Self {
        RestorationImporter {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Ask the store's backend for its snapshot and import it.
    pub fn import_from_backend(&self, store: &mut TransferTaskStore) -> TdriveResult<ImportReport> {
        let snapshot = store.backend.incomplete_transfers()?;
        Ok(self.import(store, snapshot))
    }

    /// Insert every descriptor directly into the store's collections.
    ///
    /// Ids the store already tracks are left alone, as are descriptors that
    /// were cancelled. The refresh loop is not armed; the first live event for
    /// an imported task does that.
    pub fn import(&self, store: &mut TransferTaskStore, snapshot: IncompleteTransfers) -> ImportReport {
        let now = unix_millis();
        let mut report = ImportReport::default();

        for kind in TransferKind::ALL {
            for (id, desc) in snapshot.collection(kind) {
                if store.find_in(kind, id).is_some() {
                    debug!(kind = %kind, task_id = %id, "already tracked, snapshot entry skipped");
                    report.skipped += 1;
                    continue;
                }
                if desc.recorded_status() == TaskStatus::Cancelled {
                    debug!(kind = %kind, task_id = %id, "cancelled snapshot entry skipped");
                    report.skipped += 1;
                    continue;
                }

                let task = self.build_task(kind, id, desc, now);
                let Some(node) = store.insert_root(kind, task) else {
                    report.skipped += 1;
                    continue;
                };
                self.import_children(store, kind, node, desc, now);
                aggregate::refresh_subtree(store, node, now);
                report.imported += 1;
            }
        }

        info!(
            imported = report.imported,
            skipped = report.skipped,
            "restored incomplete transfers"
        );
        report
    }

    fn import_children(
        &self,
        store: &mut TransferTaskStore,
        kind: TransferKind,
        parent: NodeId,
        desc: &TaskDescriptor,
        now: u64,
    ) {
        for (id, child) in desc.live_children() {
            let task = self.build_task(kind, id, child, now);
            if let Some(node) = store.insert_child(parent, task) {
                self.import_children(store, kind, node, child, now);
            }
        }
    }

    fn build_task(&self, kind: TransferKind, id: &str, desc: &TaskDescriptor, now: u64) -> Task {
        let item_kind = if desc.is_folder() {
            ItemKind::Folder
        } else {
            ItemKind::File
        };
        let start = desc.created_at.map(|s| s * 1000).unwrap_or(now);
        let source = match kind {
            TransferKind::Download => TaskSource::Remote {
                item_id: desc.source_id.clone().unwrap_or_else(|| id.to_string()),
            },
            TransferKind::Upload => TaskSource::Local {
                path: desc.local_path.clone().unwrap_or_default(),
                remote_parent: desc.parent_id.clone(),
            },
        };

        let mut task = Task::new(id, desc.display_name(id), item_kind, start)
            .with_size(desc.size())
            .with_source(source);
        task.progress = self.estimate(desc);
        task.status = desc.imported_status();

        match task.status {
            TaskStatus::Completed => {
                task.completed_at = Some(desc.updated_at.map(|s| s * 1000).unwrap_or(now));
                task.progress = task.size;
                // finished in an earlier session; no toast now
                task.feedback_shown = true;
            }
            TaskStatus::Failed => {
                task.message = Some(
                    desc.error_message
                        .clone()
                        .unwrap_or_else(|| "Transfer failed".to_string()),
                );
                task.alert_shown = true;
            }
            _ => {}
        }
        task.clamp_progress();
        task
    }

    fn estimate(&self, desc: &TaskDescriptor) -> u64 {
        desc.estimate_progress(self.chunk_size)
    }
}
