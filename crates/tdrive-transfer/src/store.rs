//! TransferTaskStore: the single source of truth for known transfer tasks.
//!
//! Tasks live in one arena keyed by [`NodeId`]. Two top-level collections
//! (uploads, downloads) map task ids to arena handles; folder tasks map their
//! child ids the same way. Lookups that find nothing are silent at the
//! public-operation level: an unknown id is treated as already resolved.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use tdrive_core::{ItemKind, TransferKind};

use crate::aggregate;
use crate::bridge::{ErrorSurface, TransferBackend};
use crate::refresh::RefreshLoop;
use crate::task::{unix_millis, NodeId, Task, TaskSource, TaskStatus};

/// A user-initiated download of a cloud item.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    pub id: String,
    pub item_id: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "type")]
    pub kind: ItemKind,
}

/// A user-initiated upload; `id` is generated client-side.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    pub id: String,
    pub name: String,
    pub local_path: PathBuf,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "type")]
    pub kind: ItemKind,
    #[serde(default)]
    pub remote_parent: Option<String>,
}

/// Result of [`TransferTaskStore::find`]: owning collection, arena handle, and
/// the parent folder when the task is nested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub kind: TransferKind,
    pub node: NodeId,
    pub parent: Option<NodeId>,
}

pub struct TransferTaskStore {
    pub(crate) nodes: HashMap<NodeId, Task>,
    uploads: BTreeMap<String, NodeId>,
    downloads: BTreeMap<String, NodeId>,
    next_node: u64,
    pub(crate) refresh: RefreshLoop,
    pub(crate) backend: Arc<dyn TransferBackend>,
    pub(crate) errors: Arc<dyn ErrorSurface>,
}

impl TransferTaskStore {
    pub fn new(backend: Arc<dyn TransferBackend>, errors: Arc<dyn ErrorSurface>) -> Self {
        TransferTaskStore {
            nodes: HashMap::new(),
            uploads: BTreeMap::new(),
            downloads: BTreeMap::new(),
            next_node: 0,
            refresh: RefreshLoop::default(),
            backend,
            errors,
        }
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Register a new download as `queued`. No-op (returns false) if the id is
    /// already known, which absorbs double-click submissions.
    pub fn add_download(&mut self, req: DownloadRequest) -> bool {
        if self.downloads.contains_key(&req.id) {
            debug!(task_id = %req.id, "duplicate download ignored");
            return false;
        }
        let task = Task::new(req.id.clone(), req.name, req.kind, unix_millis())
            .with_size(req.size)
            .with_source(TaskSource::Remote {
                item_id: req.item_id,
            });
        self.insert_root(TransferKind::Download, task);
        self.refresh.arm();
        info!(task_id = %req.id, size = req.size, "download queued");
        true
    }

    /// Register a new upload as `queued`. Same duplicate rule as downloads.
    pub fn add_upload(&mut self, req: UploadRequest) -> bool {
        if self.uploads.contains_key(&req.id) {
            debug!(task_id = %req.id, "duplicate upload ignored");
            return false;
        }
        let task = Task::new(req.id.clone(), req.name, req.kind, unix_millis())
            .with_size(req.size)
            .with_source(TaskSource::Local {
                path: req.local_path,
                remote_parent: req.remote_parent,
            });
        self.insert_root(TransferKind::Upload, task);
        self.refresh.arm();
        info!(task_id = %req.id, size = req.size, "upload queued");
        true
    }

    // ── User actions ─────────────────────────────────────────────────────────

    /// Ask the backend to cancel `id`, then stop tracking it.
    ///
    /// Only the addressed id is cancelled in the protocol. When `id` is a
    /// folder, its children leave the store with it but are not cancelled on
    /// the backend; callers that need that must cancel each child explicitly.
    pub fn cancel(&mut self, id: &str) -> bool {
        let Some(loc) = self.find(id) else {
            debug!(task_id = %id, "cancel: task not found");
            return false;
        };
        if let Err(e) = self.backend.cancel_transfer(loc.kind, id) {
            warn!(task_id = %id, "cancel command failed: {e}");
        }
        self.detach(loc, id);
        info!(kind = %loc.kind, task_id = %id, "transfer cancelled");
        true
    }

    /// Pause a `queued` or `transferring` task. Other states are a no-op.
    pub fn pause(&mut self, id: &str) -> bool {
        let Some(loc) = self.find(id) else {
            debug!(task_id = %id, "pause: task not found");
            return false;
        };
        let status = self.nodes[&loc.node].status;
        if !matches!(
            status,
            TaskStatus::Queued | TaskStatus::Transferring | TaskStatus::StartingFolder
        ) {
            debug!(task_id = %id, %status, "pause ignored");
            return false;
        }
        if let Err(e) = self.backend.pause_transfer(loc.kind, id) {
            warn!(task_id = %id, "pause command failed: {e}");
        }
        if let Some(task) = self.nodes.get_mut(&loc.node) {
            task.status = TaskStatus::Paused;
            task.speed = 0.0;
            task.waiting_until = None;
        }
        if let Some(parent) = loc.parent {
            aggregate::refresh_from(self, parent, unix_millis());
        }
        info!(kind = %loc.kind, task_id = %id, "transfer paused");
        true
    }

    /// Resume (retry) a `paused` or `failed` task.
    ///
    /// The store optimistically re-queues; the next progress event corrects it.
    /// A retry is a new occurrence, so its alert and feedback guards are reset.
    pub fn resume(&mut self, id: &str) -> bool {
        let Some(loc) = self.find(id) else {
            debug!(task_id = %id, "resume: task not found");
            return false;
        };
        let status = self.nodes[&loc.node].status;
        if !matches!(status, TaskStatus::Paused | TaskStatus::Failed) {
            debug!(task_id = %id, %status, "resume ignored");
            return false;
        }
        if let Err(e) = self.backend.resume_transfer(loc.kind, id) {
            warn!(task_id = %id, "resume command failed: {e}");
        }

        self.requeue_subtree(loc.node);

        // a failed ancestor would otherwise keep reporting the old failure
        let mut cursor = loc.parent;
        while let Some(node) = cursor {
            if let Some(task) = self.nodes.get_mut(&node) {
                if task.status == TaskStatus::Failed {
                    requeue(task);
                }
                cursor = task.parent;
            } else {
                cursor = None;
            }
        }
        if let Some(parent) = loc.parent {
            aggregate::refresh_from(self, parent, unix_millis());
        }
        self.refresh.arm();
        info!(kind = %loc.kind, task_id = %id, "transfer resumed");
        true
    }

    /// Remove every completed, failed or cancelled task, including nested
    /// children of folders that stay. Returns the number of tasks removed.
    pub fn clear_terminal(&mut self) -> usize {
        let now = unix_millis();
        let mut removed = 0;
        for kind in TransferKind::ALL {
            let terminal: Vec<(String, NodeId)> = self
                .collection(kind)
                .iter()
                .filter(|(_, node)| self.nodes[*node].status.is_terminal())
                .map(|(id, node)| (id.clone(), *node))
                .collect();
            for (id, node) in terminal {
                self.collection_mut(kind).remove(&id);
                self.remove_subtree(node);
                removed += 1;
            }

            let remaining: Vec<NodeId> = self.collection(kind).values().copied().collect();
            for root in remaining {
                removed += self.clear_terminal_children(root, now);
            }
        }
        if removed > 0 {
            info!(removed, "cleared finished transfers");
        }
        removed
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Locate `id` in uploads, then downloads, descending into folder children.
    pub fn find(&self, id: &str) -> Option<Location> {
        TransferKind::ALL
            .iter()
            .find_map(|&kind| self.find_in(kind, id))
    }

    /// Locate `id` within one collection: top-level first, then nested.
    pub fn find_in(&self, kind: TransferKind, id: &str) -> Option<Location> {
        let collection = self.collection(kind);
        if let Some(&node) = collection.get(id) {
            return Some(Location {
                kind,
                node,
                parent: None,
            });
        }
        collection
            .values()
            .find_map(|&root| self.find_nested(kind, root, id))
    }

    fn find_nested(&self, kind: TransferKind, parent: NodeId, id: &str) -> Option<Location> {
        let task = self.nodes.get(&parent)?;
        if let Some(&node) = task.children.get(id) {
            return Some(Location {
                kind,
                node,
                parent: Some(parent),
            });
        }
        task.children
            .values()
            .find_map(|&child| self.find_nested(kind, child, id))
    }

    pub fn get(&self, node: NodeId) -> Option<&Task> {
        self.nodes.get(&node)
    }

    pub(crate) fn get_mut(&mut self, node: NodeId) -> Option<&mut Task> {
        self.nodes.get_mut(&node)
    }

    /// Convenience: the task addressed by `id` within `kind`, nested or not.
    pub fn task(&self, kind: TransferKind, id: &str) -> Option<&Task> {
        self.find_in(kind, id).and_then(|loc| self.get(loc.node))
    }

    /// Arena handle of the direct child `id` of `parent`.
    pub fn child(&self, parent: NodeId, id: &str) -> Option<NodeId> {
        self.nodes.get(&parent)?.children.get(id).copied()
    }

    pub fn children(&self, parent: NodeId) -> impl Iterator<Item = &Task> + '_ {
        self.nodes
            .get(&parent)
            .into_iter()
            .flat_map(|t| t.children.values())
            .filter_map(|node| self.nodes.get(node))
    }

    pub fn roots(&self, kind: TransferKind) -> impl Iterator<Item = &Task> + '_ {
        self.collection(kind)
            .values()
            .filter_map(|node| self.nodes.get(node))
    }

    pub fn root_nodes(&self, kind: TransferKind) -> impl Iterator<Item = NodeId> + '_ {
        self.collection(kind).values().copied()
    }

    /// Number of top-level tasks in `kind`.
    pub fn len(&self, kind: TransferKind) -> usize {
        self.collection(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.downloads.is_empty()
    }

    /// Whether any top-level task still expects progress.
    pub fn has_non_terminal(&self) -> bool {
        TransferKind::ALL
            .iter()
            .flat_map(|&kind| self.roots(kind))
            .any(|t| !t.status.is_terminal())
    }

    pub fn refresh_armed(&self) -> bool {
        self.refresh.is_armed()
    }

    pub(crate) fn arm_refresh(&mut self) {
        self.refresh.arm();
    }

    // ── Arena plumbing ───────────────────────────────────────────────────────

    fn collection(&self, kind: TransferKind) -> &BTreeMap<String, NodeId> {
        match kind {
            TransferKind::Upload => &self.uploads,
            TransferKind::Download => &self.downloads,
        }
    }

    fn collection_mut(&mut self, kind: TransferKind) -> &mut BTreeMap<String, NodeId> {
        match kind {
            TransferKind::Upload => &mut self.uploads,
            TransferKind::Download => &mut self.downloads,
        }
    }

    fn alloc(&mut self) -> NodeId {
        self.next_node += 1;
        NodeId(self.next_node)
    }

    /// Insert a top-level task. Returns None if the id is taken.
    pub(crate) fn insert_root(&mut self, kind: TransferKind, mut task: Task) -> Option<NodeId> {
        if self.collection(kind).contains_key(&task.id) {
            return None;
        }
        let node = self.alloc();
        task.parent = None;
        self.collection_mut(kind).insert(task.id.clone(), node);
        self.nodes.insert(node, task);
        Some(node)
    }

    /// Insert `task` under `parent`. Returns None if the parent is gone or
    /// already has a child with that id.
    pub(crate) fn insert_child(&mut self, parent: NodeId, mut task: Task) -> Option<NodeId> {
        if self.nodes.get(&parent)?.children.contains_key(&task.id) {
            return None;
        }
        let node = self.alloc();
        task.parent = Some(parent);
        let id = task.id.clone();
        self.nodes.insert(node, task);
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.insert(id, node);
        }
        Some(node)
    }

    /// Unlink `loc` from its owning map and drop its subtree from the arena.
    fn detach(&mut self, loc: Location, id: &str) {
        match loc.parent {
            Some(parent) => {
                if let Some(p) = self.nodes.get_mut(&parent) {
                    p.children.remove(id);
                }
                self.remove_subtree(loc.node);
                aggregate::refresh_from(self, parent, unix_millis());
            }
            None => {
                self.collection_mut(loc.kind).remove(id);
                self.remove_subtree(loc.node);
            }
        }
    }

    fn remove_subtree(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if let Some(task) = self.nodes.remove(&n) {
                stack.extend(task.children.values().copied());
            }
        }
    }

    fn clear_terminal_children(&mut self, folder: NodeId, now: u64) -> usize {
        let Some(task) = self.nodes.get(&folder) else {
            return 0;
        };
        if !task.has_children() {
            return 0;
        }
        let children: Vec<(String, NodeId)> = task
            .children
            .iter()
            .map(|(id, node)| (id.clone(), *node))
            .collect();

        let mut removed = 0;
        for (id, node) in children {
            let terminal = self
                .nodes
                .get(&node)
                .map(|t| t.status.is_terminal())
                .unwrap_or(false);
            if terminal {
                if let Some(p) = self.nodes.get_mut(&folder) {
                    p.children.remove(&id);
                }
                self.remove_subtree(node);
                removed += 1;
            } else {
                removed += self.clear_terminal_children(node, now);
            }
        }
        if removed > 0 {
            aggregate::refresh_node(self, folder, now);
        }
        removed
    }

    /// Put `node` and any paused/failed descendants back into `queued`.
    fn requeue_subtree(&mut self, node: NodeId) {
        if let Some(task) = self.nodes.get_mut(&node) {
            requeue(task);
        }
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(&node)
            .map(|t| t.children.values().copied().collect())
            .unwrap_or_default();
        while let Some(n) = stack.pop() {
            if let Some(task) = self.nodes.get_mut(&n) {
                if matches!(task.status, TaskStatus::Paused | TaskStatus::Failed) {
                    requeue(task);
                }
                stack.extend(task.children.values().copied());
            }
        }
    }
}

fn requeue(task: &mut Task) {
    task.status = TaskStatus::Queued;
    task.message = None;
    task.error_code = None;
    task.alert_shown = false;
    task.feedback_shown = false;
    task.speed = 0.0;
    task.waiting_until = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ErrorReport;
    use crate::restore::IncompleteTransfers;
    use std::sync::Mutex;
    use tdrive_core::{TdriveError, TdriveResult};

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingBackend {
        fn record(&self, op: &str, id: &str) -> TdriveResult<()> {
            self.calls.lock().unwrap().push(format!("{op}:{id}"));
            if self.fail {
                return Err(TdriveError::Bridge("bridge offline".into()));
            }
            Ok(())
        }
    }

    impl TransferBackend for RecordingBackend {
        fn cancel_transfer(&self, _kind: TransferKind, id: &str) -> TdriveResult<()> {
            self.record("cancel", id)
        }
        fn pause_transfer(&self, _kind: TransferKind, id: &str) -> TdriveResult<()> {
            self.record("pause", id)
        }
        fn resume_transfer(&self, _kind: TransferKind, id: &str) -> TdriveResult<()> {
            self.record("resume", id)
        }
        fn incomplete_transfers(&self) -> TdriveResult<IncompleteTransfers> {
            Ok(IncompleteTransfers::default())
        }
    }

    struct SilentErrors;

    impl ErrorSurface for SilentErrors {
        fn show_error(&self, _report: &ErrorReport) {}
    }

    fn store_with(backend: Arc<RecordingBackend>) -> TransferTaskStore {
        TransferTaskStore::new(backend, Arc::new(SilentErrors))
    }

    fn download(id: &str, kind: ItemKind) -> DownloadRequest {
        DownloadRequest {
            id: id.into(),
            item_id: format!("item-{id}"),
            name: format!("{id}.bin"),
            size: 100,
            kind,
        }
    }

    #[test]
    fn add_download_is_idempotent() {
        let mut store = store_with(Arc::default());
        assert!(store.add_download(download("d1", ItemKind::File)));
        assert!(!store.add_download(download("d1", ItemKind::File)));
        assert_eq!(store.len(TransferKind::Download), 1);
        assert!(store.refresh_armed());
    }

    #[test]
    fn upload_and_download_ids_are_separate_namespaces() {
        let mut store = store_with(Arc::default());
        store.add_download(download("same", ItemKind::File));
        assert!(store.add_upload(UploadRequest {
            id: "same".into(),
            name: "same.txt".into(),
            local_path: PathBuf::from("/tmp/same.txt"),
            size: 5,
            kind: ItemKind::File,
            remote_parent: None,
        }));
        assert_eq!(store.find("same").unwrap().kind, TransferKind::Upload);
        assert_eq!(
            store.task(TransferKind::Download, "same").unwrap().size,
            100
        );
    }

    #[test]
    fn pause_from_completed_is_noop() {
        let backend = Arc::new(RecordingBackend::default());
        let mut store = store_with(backend.clone());
        store.add_download(download("d1", ItemKind::File));
        let node = store.find("d1").unwrap().node;
        store.get_mut(node).unwrap().status = TaskStatus::Completed;

        assert!(!store.pause("d1"));
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn pause_then_resume_requeues() {
        let backend = Arc::new(RecordingBackend::default());
        let mut store = store_with(backend.clone());
        store.add_download(download("d1", ItemKind::File));

        assert!(store.pause("d1"));
        assert_eq!(store.task(TransferKind::Download, "d1").unwrap().status, TaskStatus::Paused);
        assert!(!store.pause("d1"));

        assert!(store.resume("d1"));
        assert_eq!(store.task(TransferKind::Download, "d1").unwrap().status, TaskStatus::Queued);
        assert_eq!(
            *backend.calls.lock().unwrap(),
            vec!["pause:d1".to_string(), "resume:d1".to_string()]
        );
    }

    #[test]
    fn command_failure_still_applies_locally() {
        let backend = Arc::new(RecordingBackend {
            fail: true,
            ..Default::default()
        });
        let mut store = store_with(backend);
        store.add_download(download("d1", ItemKind::File));

        assert!(store.pause("d1"));
        assert_eq!(store.task(TransferKind::Download, "d1").unwrap().status, TaskStatus::Paused);
        assert!(store.cancel("d1"));
        assert!(store.find("d1").is_none());
    }

    #[test]
    fn cancel_unknown_is_silent() {
        let backend = Arc::new(RecordingBackend::default());
        let mut store = store_with(backend.clone());
        assert!(!store.cancel("ghost"));
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn cancel_folder_does_not_cascade_to_backend() {
        let backend = Arc::new(RecordingBackend::default());
        let mut store = store_with(backend.clone());
        store.add_download(download("f1", ItemKind::Folder));
        let folder = store.find("f1").unwrap().node;
        let now = unix_millis();
        store
            .insert_child(folder, Task::new("c1", "c1", ItemKind::File, now))
            .unwrap();

        assert!(store.cancel("f1"));
        assert!(store.find("c1").is_none());
        assert_eq!(*backend.calls.lock().unwrap(), vec!["cancel:f1".to_string()]);
        assert!(store.nodes.is_empty());
    }

    #[test]
    fn find_descends_into_nested_folders() {
        let mut store = store_with(Arc::default());
        store.add_download(download("root", ItemKind::Folder));
        let root = store.find("root").unwrap().node;
        let now = unix_millis();
        let sub = store
            .insert_child(root, Task::new("sub", "sub", ItemKind::Folder, now))
            .unwrap();
        let leaf = store
            .insert_child(sub, Task::new("leaf", "leaf", ItemKind::File, now))
            .unwrap();

        let loc = store.find("leaf").unwrap();
        assert_eq!(loc.node, leaf);
        assert_eq!(loc.parent, Some(sub));
        assert_eq!(loc.kind, TransferKind::Download);
    }
}
